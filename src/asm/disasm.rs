//! Disassembler for Z80 programs.
//!
//! Converts decoded instructions and raw images back to readable assembly.
//! The output syntax is accepted by the assembler.

use crate::cpu::decode::{decode, encode, Instruction, Op, Target};
use crate::cpu::{Memory, MEMORY_SIZE};

/// One line of a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisasmLine {
    pub address: u16,
    pub bytes: Vec<u8>,
    pub text: String,
}

/// Disassemble a single instruction to text.
pub fn disassemble_instruction(instr: &Instruction) -> String {
    let operand = instr.operand;
    match instr.op {
        Op::Nop => "NOP".to_string(),
        Op::Halt => "HALT".to_string(),
        Op::Scf => "SCF".to_string(),

        // Loads
        Op::LdImm(reg) => format!("LD {}, {}", reg.name(), byte(operand.byte())),
        Op::LdPairImm(pair) => format!("LD {}, {}", pair.name(), word(operand.word())),
        Op::StoreA(pair) => format!("LD ({}), A", pair.name()),
        Op::StoreHl(reg) => format!("LD (HL), {}", reg.name()),
        Op::LdIA => "LD I, A".to_string(),
        Op::LdRA => "LD R, A".to_string(),

        // Arithmetic
        Op::Add(reg) => format!("ADD A, {}", reg.name()),
        Op::Sub(reg) => format!("SUB {}", reg.name()),
        Op::AdcHl(pair) => format!("ADC HL, {}", pair.name()),
        Op::SbcHl(pair) => format!("SBC HL, {}", pair.name()),

        // Rotate / bit
        Op::Shift(op, target) => format!("{} {}", op.mnemonic(), format_target(target)),
        Op::Bit(bit, target) => format!("BIT {}, {}", bit, format_target(target)),

        // Index
        Op::LdIndexImm(reg) => format!("LD {}, {}", reg.name(), word(operand.word())),
        Op::StoreIndexed(reg) => format!("LD {}, A", indexed(reg.name(), operand.offset())),
        Op::SubIndexed(reg) => format!("SUB {}", indexed(reg.name(), operand.offset())),
        Op::BitIndexed(reg, bit) => format!("BIT {}, {}", bit, indexed(reg.name(), operand.offset())),

        // Control
        Op::Jp => format!("JP {}", word(operand.word())),
        Op::Jr => format!("JR {:+}", operand.offset()),
        Op::Call => format!("CALL {}", word(operand.word())),
        Op::Ret => "RET".to_string(),

        Op::Unknown(..) => {
            let bytes = encode(instr).unwrap_or_default();
            format!("??? {}", hex_bytes(&bytes))
        }
    }
}

/// Disassemble `count` consecutive instructions starting at `start`.
pub fn disassemble_from(mem: &Memory, start: u16, count: usize) -> Vec<DisasmLine> {
    let mut lines = Vec::with_capacity(count);
    let mut addr = start;
    for _ in 0..count {
        let line = disassemble_at(mem, addr);
        addr = addr.wrapping_add(line.bytes.len() as u16);
        lines.push(line);
    }
    lines
}

/// Disassemble the instruction at `addr`.
pub fn disassemble_at(mem: &Memory, addr: u16) -> DisasmLine {
    let decoded = decode(mem, addr);
    let bytes = (0..decoded.length)
        .map(|i| mem.read(addr.wrapping_add(i)))
        .collect();
    let mut text = disassemble_instruction(&decoded.instruction);
    if decoded.instruction.op == Op::Jr {
        let target = addr
            .wrapping_add(decoded.length)
            .wrapping_add(decoded.instruction.operand.offset() as i16 as u16);
        text.push_str(&format!("  ; {}", word(target)));
    }
    DisasmLine { address: addr, bytes, text }
}

/// Disassemble a raw image loaded at `origin` into a listing.
///
/// Bytes that would fall past 0xFFFF are ignored.
pub fn disassemble(image: &[u8], origin: u16) -> String {
    let fit = image.len().min(MEMORY_SIZE - origin as usize);
    let mut mem = Memory::new();
    // The slice is clamped to the space above `origin`, so this cannot fail.
    let _ = mem.load_program(origin as usize, &image[..fit]);

    let mut output = String::new();
    output.push_str("; Z80 Disassembly\n");
    output.push_str("; ---------------\n\n");

    let end = origin as usize + fit;
    let mut addr = origin as usize;
    while addr < end {
        let line = disassemble_at(&mem, addr as u16);
        output.push_str(&format!(
            "{:04X}: {:<12} {}\n",
            line.address,
            hex_bytes(&line.bytes),
            line.text
        ));
        addr += line.bytes.len();
    }

    output
}

fn format_target(target: Target) -> String {
    match target {
        Target::Reg(reg) => reg.name().to_string(),
        Target::IndirectHl => "(HL)".to_string(),
    }
}

fn indexed(reg: &str, displacement: i8) -> String {
    format!("({}{:+})", reg, displacement)
}

fn byte(value: u8) -> String {
    format!("${:02X}", value)
}

fn word(value: u16) -> String {
    format!("${:04X}", value)
}

fn hex_bytes(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
