//! Debugger application state and logic.

use crate::asm::disasm::{disassemble_from, disassemble_instruction};
use crate::{Cpu, StopReason};
use std::collections::HashSet;

/// Bytes shown per memory row.
pub const MEM_ROW: usize = 16;

/// Instructions executed per UI tick while running.
const STEPS_PER_TICK: usize = 64;

/// Debugger application state.
pub struct DebuggerApp {
    /// The CPU being debugged.
    pub cpu: Cpu,
    /// Original image for reset.
    pub program: Vec<u8>,
    /// Breakpoints (by address).
    pub breakpoints: HashSet<u16>,
    /// Is the debugger running continuously?
    pub running: bool,
    /// Set once HALT executes or PC runs off the end of memory.
    pub stopped: Option<StopReason>,
    /// Should we quit?
    pub should_quit: bool,
    /// Set by `run` so the first step may leave a breakpoint.
    resuming: bool,
    /// Status message to display.
    pub status: String,
    /// Memory view scroll offset, in rows.
    pub mem_scroll: usize,
}

impl DebuggerApp {
    /// Create a new debugger with a loaded program.
    pub fn new(program: Vec<u8>) -> Self {
        let mut cpu = Cpu::new();
        let status = match cpu.load_program(&program) {
            Ok(()) => "Ready. Press 's' to step, 'r' to run, 'q' to quit.".to_string(),
            Err(e) => format!("Load failed: {}", e),
        };

        Self {
            cpu,
            program,
            breakpoints: HashSet::new(),
            running: false,
            stopped: None,
            should_quit: false,
            resuming: false,
            status,
            mem_scroll: 0,
        }
    }

    /// Step one instruction.
    pub fn step(&mut self) {
        if let Some(reason) = self.stopped {
            self.status = format!("CPU stopped: {:?}. Press 'x' to reset.", reason);
            self.running = false;
            return;
        }

        let step = self.cpu.step();
        let text = disassemble_instruction(&step.instruction);
        self.status = format!("PC={:04X}: {}", step.address, text);

        if let Some(reason) = step.stop {
            self.stopped = Some(reason);
            self.running = false;
            self.status = format!("{:?} after {} cycles", reason, self.cpu.cycles);
        }
    }

    /// Run until halt or breakpoint.
    pub fn run(&mut self) {
        self.running = true;
        self.resuming = true;
        self.status = "Running...".into();
    }

    /// Run one batch of continuous execution.
    pub fn tick(&mut self) {
        for _ in 0..STEPS_PER_TICK {
            if !self.running {
                return;
            }

            // Check for breakpoint
            let pc = self.cpu.regs.pc;
            let resuming = std::mem::take(&mut self.resuming);
            if !resuming && self.breakpoints.contains(&pc) {
                self.running = false;
                self.status = format!("Breakpoint at PC={:04X}", pc);
                return;
            }

            self.step();
        }
    }

    /// Toggle breakpoint at current PC.
    pub fn toggle_breakpoint(&mut self) {
        let pc = self.cpu.regs.pc;
        if self.breakpoints.remove(&pc) {
            self.status = format!("Removed breakpoint at PC={:04X}", pc);
        } else {
            self.breakpoints.insert(pc);
            self.status = format!("Set breakpoint at PC={:04X}", pc);
        }
    }

    /// Reset CPU to initial state, keeping breakpoints.
    pub fn reset(&mut self) {
        self.cpu.reset();
        let _ = self.cpu.load_program(&self.program);
        self.running = false;
        self.stopped = None;
        self.status = "Reset. Ready.".into();
    }

    pub fn scroll_up(&mut self) {
        self.mem_scroll = self.mem_scroll.saturating_sub(1);
    }

    pub fn scroll_down(&mut self) {
        if self.mem_scroll + 1 < crate::cpu::MEMORY_SIZE / MEM_ROW {
            self.mem_scroll += 1;
        }
    }

    /// Get disassembly starting at the current PC.
    pub fn get_disassembly(&self, lines: usize) -> Vec<(u16, String, bool)> {
        let pc = self.cpu.regs.pc;
        disassemble_from(&self.cpu.mem, pc, lines)
            .into_iter()
            .map(|line| {
                let text = format!("{:<12} {}", hex(&line.bytes), line.text);
                (line.address, text, line.address == pc)
            })
            .collect()
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect::<Vec<_>>().join(" ")
}

/// Run the debugger with a program.
pub fn run_debugger(program: Vec<u8>) -> std::io::Result<()> {
    use crossterm::{
        event::{self, Event, KeyCode, KeyEventKind},
        terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
        ExecutableCommand,
    };
    use ratatui::prelude::*;
    use std::io::stdout;
    use std::time::Duration;

    // Setup terminal
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    // Create app
    let mut app = DebuggerApp::new(program);

    // Main loop
    loop {
        // Draw
        terminal.draw(|frame| {
            super::ui::draw(frame, &app);
        })?;

        // Handle input
        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') => app.should_quit = true,
                        KeyCode::Char('s') => {
                            app.running = false;
                            app.step();
                        }
                        KeyCode::Char('r') => app.run(),
                        KeyCode::Char('p') => {
                            app.running = false;
                            app.status = "Paused.".into();
                        }
                        KeyCode::Char('b') => app.toggle_breakpoint(),
                        KeyCode::Char('x') => app.reset(),
                        KeyCode::Up => app.scroll_up(),
                        KeyCode::Down => app.scroll_down(),
                        _ => {}
                    }
                }
            }
        }

        // Tick for continuous running
        if app.running {
            app.tick();
        }

        if app.should_quit {
            break;
        }
    }

    // Restore terminal
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // LD A,5; LD B,3; ADD A,B; HALT
    const PROGRAM: [u8; 6] = [0x3E, 0x05, 0x06, 0x03, 0x80, 0x76];

    #[test]
    fn test_step_until_halt() {
        let mut app = DebuggerApp::new(PROGRAM.to_vec());
        for _ in 0..4 {
            app.step();
        }
        assert_eq!(app.cpu.regs.a, 8);
        assert_eq!(app.stopped, Some(StopReason::Halted));

        // Further steps are refused until reset
        app.step();
        assert_eq!(app.cpu.instructions, 4);

        app.reset();
        assert_eq!(app.stopped, None);
        assert_eq!(app.cpu.regs.pc, 0);
        assert_eq!(app.cpu.mem.read(0), 0x3E);
    }

    #[test]
    fn test_breakpoint_stops_run() {
        let mut app = DebuggerApp::new(PROGRAM.to_vec());
        app.cpu.regs.pc = 4;
        app.toggle_breakpoint();
        app.cpu.regs.pc = 0;

        app.run();
        app.tick();
        assert!(!app.running);
        assert_eq!(app.cpu.regs.pc, 4);
        assert_eq!(app.cpu.regs.a, 5);
    }

    #[test]
    fn test_disassembly_marks_pc() {
        let app = DebuggerApp::new(PROGRAM.to_vec());
        let lines = app.get_disassembly(3);
        assert_eq!(lines[0].0, 0);
        assert!(lines[0].2);
        assert!(lines[0].1.ends_with("LD A, $05"));
        assert_eq!(lines[2].0, 4);
    }

    #[test]
    fn test_run_leaves_current_breakpoint() {
        let mut app = DebuggerApp::new(PROGRAM.to_vec());
        app.toggle_breakpoint();
        app.cpu.regs.pc = 2;
        app.toggle_breakpoint();
        app.cpu.regs.pc = 0;

        // Starting on a breakpoint runs to the next one
        app.run();
        app.tick();
        assert!(!app.running);
        assert_eq!(app.cpu.regs.pc, 2);

        app.run();
        app.tick();
        assert_eq!(app.stopped, Some(StopReason::Halted));
        assert_eq!(app.cpu.regs.a, 8);
    }
}
