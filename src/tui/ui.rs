//! UI rendering for the debugger.

use ratatui::{
    prelude::*,
    widgets::{Block, Borders, Paragraph, List, ListItem},
    style::{Color, Style, Modifier},
};
use super::app::{DebuggerApp, MEM_ROW};
use crate::cpu::MEMORY_SIZE;

/// Main draw function.
pub fn draw(frame: &mut Frame, app: &DebuggerApp) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(50),
            Constraint::Percentage(50),
        ])
        .split(frame.area());

    // Left side: code and status
    let left_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(10),
            Constraint::Length(9),
            Constraint::Length(3),
        ])
        .split(chunks[0]);

    draw_disassembly(frame, left_chunks[0], app);
    draw_registers(frame, left_chunks[1], app);
    draw_status(frame, left_chunks[2], app);

    // Right side: memory and help
    let right_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(10),
            Constraint::Length(4),
        ])
        .split(chunks[1]);

    draw_memory(frame, right_chunks[0], app);
    draw_help(frame, right_chunks[1]);
}

/// Draw disassembly view starting at PC.
fn draw_disassembly(frame: &mut Frame, area: Rect, app: &DebuggerApp) {
    let disasm = app.get_disassembly((area.height as usize).saturating_sub(2));

    let items: Vec<ListItem> = disasm
        .iter()
        .map(|(addr, instr, is_current)| {
            let prefix = if *is_current { "▶ " } else { "  " };
            let bp = if app.breakpoints.contains(addr) { "●" } else { " " };
            let text = format!("{}{:04X}: {}", prefix, addr, instr);

            let style = if *is_current {
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
            } else if app.breakpoints.contains(addr) {
                Style::default().fg(Color::Red)
            } else {
                Style::default()
            };

            ListItem::new(format!("{} {}", bp, text)).style(style)
        })
        .collect();

    let list = List::new(items)
        .block(Block::default()
            .title(" Disassembly ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan)));

    frame.render_widget(list, area);
}

fn reg_span(name: &str, value: String) -> Vec<Span<'static>> {
    vec![
        Span::raw(format!("{}: ", name)),
        Span::styled(value, Style::default().fg(Color::White)),
        Span::raw("  "),
    ]
}

/// Draw register state.
fn draw_registers(frame: &mut Frame, area: Rect, app: &DebuggerApp) {
    let regs = &app.cpu.regs;
    let byte = |v: u8| format!("{:02X}", v);
    let word = |v: u16| format!("{:04X}", v);

    let content = vec![
        Line::from([
            reg_span("A", byte(regs.a)),
            reg_span("F", byte(regs.f)),
            vec![Span::styled(regs.flags_string(), Style::default().fg(Color::Yellow))],
        ].concat()),
        Line::from([
            reg_span("BC", word(regs.bc())),
            reg_span("DE", word(regs.de())),
            reg_span("HL", word(regs.hl())),
        ].concat()),
        Line::from([
            reg_span("IX", word(regs.ix)),
            reg_span("IY", word(regs.iy)),
            reg_span("I", byte(regs.i)),
            reg_span("R", byte(regs.r)),
        ].concat()),
        Line::from([
            reg_span("PC", word(regs.pc)),
            reg_span("SP", word(regs.sp)),
            reg_span("IFF", (regs.interrupt_enable as u8).to_string()),
        ].concat()),
        Line::from(vec![
            Span::raw("Cycles: "),
            Span::styled(format!("{}", app.cpu.cycles), Style::default().fg(Color::Cyan)),
            Span::raw("   Unknown: "),
            Span::styled(format!("{}", app.cpu.unknown_opcodes), Style::default().fg(Color::Cyan)),
        ]),
        Line::from(vec![
            Span::raw("State: "),
            match app.stopped {
                None if app.running => Span::styled("Running", Style::default().fg(Color::Green)),
                None => Span::styled("Ready", Style::default().fg(Color::Green)),
                Some(reason) => Span::styled(format!("{:?}", reason), Style::default().fg(Color::Red)),
            },
        ]),
    ];

    let paragraph = Paragraph::new(content)
        .block(Block::default()
            .title(" Registers ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Green)));

    frame.render_widget(paragraph, area);
}

/// Draw memory view, 16 bytes per row.
fn draw_memory(frame: &mut Frame, area: Rect, app: &DebuggerApp) {
    let visible_rows = (area.height as usize).saturating_sub(2);
    let start = app.mem_scroll;
    let end = (start + visible_rows).min(MEMORY_SIZE / MEM_ROW);
    let pc = app.cpu.regs.pc as usize;

    let items: Vec<ListItem> = (start..end)
        .map(|row| {
            let base = row * MEM_ROW;
            let cells = app.cpu.mem.dump(base as u16, MEM_ROW);
            let hex: Vec<String> = cells.iter().map(|(_, v)| format!("{:02X}", v)).collect();
            let text = format!("{:04X}: {}", base, hex.join(" "));

            let style = if (base..base + MEM_ROW).contains(&pc) {
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
            } else if cells.iter().any(|(_, v)| *v != 0) {
                Style::default().fg(Color::White)
            } else {
                Style::default().fg(Color::DarkGray)
            };

            ListItem::new(text).style(style)
        })
        .collect();

    let list = List::new(items)
        .block(Block::default()
            .title(" Memory ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Magenta)));

    frame.render_widget(list, area);
}

/// Draw status bar.
fn draw_status(frame: &mut Frame, area: Rect, app: &DebuggerApp) {
    let status = Paragraph::new(app.status.clone())
        .style(Style::default().fg(Color::White))
        .block(Block::default()
            .title(" Status ")
            .borders(Borders::ALL));

    frame.render_widget(status, area);
}

/// Draw help panel.
fn draw_help(frame: &mut Frame, area: Rect) {
    let help = Paragraph::new(vec![
        Line::from("s: Step  r: Run  p: Pause  b: Breakpoint"),
        Line::from("x: Reset  ↑↓: Scroll memory  q: Quit"),
    ])
    .style(Style::default().fg(Color::DarkGray))
    .block(Block::default()
        .title(" Help ")
        .borders(Borders::ALL));

    frame.render_widget(help, area);
}
