//! Simple assembler for Z80 programs.
//!
//! Syntax:
//! ```text
//! ; Comment
//!         ORG $0000       ; Set origin address
//! START:  LD A, 5         ; Define a label
//!         LD B, $03
//!         ADD A, B
//!         CALL SUB1
//!         JR START        ; Relative jumps take a label or address...
//!         JR -4           ; ...or an explicitly signed offset
//! SUB1:   LD (IX+2), A
//!         RET
//!         DB 1, 2, 3      ; Define bytes
//!         DW $1234        ; Define little-endian words
//! ```
//!
//! Numbers may be decimal, `$FF`, `0xFF` or `0FFh`. Mnemonics, registers and
//! labels are case-insensitive. Every instruction is encoded through the
//! same opcode tables the interpreter decodes with.

use crate::cpu::alu::ShiftOp;
use crate::cpu::decode::{encode, Instruction, Op, Operand, Target};
use crate::cpu::{IndexReg, Reg16, Reg8, MEMORY_SIZE};
use std::collections::HashMap;
use thiserror::Error;

/// Assemble source code to a raw image loaded at address 0.
///
/// Gaps left by `ORG` are zero-filled.
pub fn assemble(source: &str) -> Result<Vec<u8>, AssemblerError> {
    let mut asm = Assembler::new();
    asm.assemble(source)
}

/// A numeric expression.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Expr {
    Number(i64),
    /// A literal written with an explicit `+` or `-`.
    Signed(i64),
    Label(String),
}

/// A parsed operand.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Arg {
    Reg8(Reg8),
    Reg16(Reg16),
    Index(IndexReg),
    I,
    R,
    /// `(BC)`, `(DE)`, `(HL)`
    Indirect(Reg16),
    /// `(IX+d)` / `(IY-d)`
    Indexed(IndexReg, Expr),
    Value(Expr),
}

/// How an instruction's expression becomes operand bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    None,
    Byte,
    Word,
    Offset,
    /// JR target: an address, or a signed literal taken as the raw offset.
    Relative,
}

#[derive(Debug)]
enum ItemKind {
    Instr { op: Op, value: Option<Expr>, role: Role },
    Data { values: Vec<Expr>, word: bool },
}

#[derive(Debug)]
struct Item {
    line: usize,
    addr: usize,
    size: usize,
    kind: ItemKind,
}

/// The assembler state.
struct Assembler {
    /// Current address (origin).
    current_addr: usize,
    /// Symbol table (label -> address).
    symbols: HashMap<String, i64>,
    /// Items laid out by pass 1, encoded by pass 2.
    items: Vec<Item>,
}

impl Assembler {
    fn new() -> Self {
        Self {
            current_addr: 0,
            symbols: HashMap::new(),
            items: Vec::new(),
        }
    }

    fn assemble(&mut self, source: &str) -> Result<Vec<u8>, AssemblerError> {
        // Pass 1: parse, size every item, collect labels
        for (line_num, line) in source.lines().enumerate() {
            self.process_line(line, line_num + 1)?;
        }

        // Pass 2: resolve expressions and emit bytes
        let end = self.items.iter().map(|item| item.addr + item.size).max().unwrap_or(0);
        let mut output = vec![0u8; end];
        for item in &self.items {
            let bytes = self.emit(item)?;
            output[item.addr..item.addr + bytes.len()].copy_from_slice(&bytes);
        }

        Ok(output)
    }

    fn process_line(&mut self, line: &str, line_num: usize) -> Result<(), AssemblerError> {
        // Remove comments
        let line = match line.find(';') {
            Some(idx) => &line[..idx],
            None => line,
        };
        let mut line = line.trim();
        if line.is_empty() {
            return Ok(());
        }

        // Check for label definition
        if let Some(colon_idx) = line.find(':') {
            let label = line[..colon_idx].trim().to_uppercase();
            if !is_identifier(&label) {
                return Err(AssemblerError::SyntaxError {
                    line: line_num,
                    message: format!("invalid label '{}'", label),
                });
            }
            if self.symbols.insert(label.clone(), self.current_addr as i64).is_some() {
                return Err(AssemblerError::DuplicateLabel { line: line_num, label });
            }
            line = line[colon_idx + 1..].trim();
            if line.is_empty() {
                return Ok(());
            }
        }

        let (mnemonic, rest) = match line.find(char::is_whitespace) {
            Some(idx) => (&line[..idx], line[idx..].trim()),
            None => (line, ""),
        };
        let mnemonic = mnemonic.to_uppercase();
        let operands: Vec<&str> = if rest.is_empty() {
            Vec::new()
        } else {
            rest.split(',').map(str::trim).collect()
        };

        match mnemonic.as_str() {
            // Directives
            "ORG" => {
                let &[operand] = operands.as_slice() else {
                    return Err(AssemblerError::SyntaxError {
                        line: line_num,
                        message: "ORG requires one address".into(),
                    });
                };
                match parse_expr(operand, line_num)? {
                    Expr::Number(addr) if (0..MEMORY_SIZE as i64).contains(&addr) => {
                        self.current_addr = addr as usize;
                    }
                    Expr::Number(addr) | Expr::Signed(addr) => {
                        return Err(AssemblerError::ValueOutOfRange { line: line_num, value: addr });
                    }
                    Expr::Label(_) => {
                        return Err(AssemblerError::SyntaxError {
                            line: line_num,
                            message: "ORG requires a numeric address".into(),
                        });
                    }
                }
            }

            "DB" | "DEFB" | "DW" | "DEFW" => {
                if operands.is_empty() {
                    return Err(AssemblerError::SyntaxError {
                        line: line_num,
                        message: format!("{} requires at least one value", mnemonic),
                    });
                }
                let word = mnemonic.ends_with('W');
                let values = operands
                    .iter()
                    .map(|op| parse_expr(op, line_num))
                    .collect::<Result<Vec<_>, _>>()?;
                let size = values.len() * if word { 2 } else { 1 };
                self.push_item(line_num, size, ItemKind::Data { values, word })?;
            }

            // Instructions
            _ => {
                let args = operands
                    .iter()
                    .map(|op| parse_arg(op, line_num))
                    .collect::<Result<Vec<_>, _>>()?;
                let (op, value, role) = parse_instruction(&mnemonic, &args, line_num)?;
                let size = instruction_size(op, role);
                self.push_item(line_num, size, ItemKind::Instr { op, value, role })?;
            }
        }

        Ok(())
    }

    fn push_item(&mut self, line: usize, size: usize, kind: ItemKind) -> Result<(), AssemblerError> {
        if self.current_addr + size > MEMORY_SIZE {
            return Err(AssemblerError::AddressOverflow { line });
        }
        self.items.push(Item { line, addr: self.current_addr, size, kind });
        self.current_addr += size;
        Ok(())
    }

    fn resolve(&self, expr: &Expr, line: usize) -> Result<i64, AssemblerError> {
        match expr {
            Expr::Number(value) | Expr::Signed(value) => Ok(*value),
            Expr::Label(label) => self.symbols.get(label).copied().ok_or_else(|| {
                AssemblerError::UndefinedLabel { line, label: label.clone() }
            }),
        }
    }

    fn emit(&self, item: &Item) -> Result<Vec<u8>, AssemblerError> {
        let line = item.line;
        match &item.kind {
            ItemKind::Data { values, word } => {
                let mut bytes = Vec::with_capacity(item.size);
                for expr in values {
                    let value = self.resolve(expr, line)?;
                    if *word {
                        bytes.extend_from_slice(&checked_word(value, line)?.to_le_bytes());
                    } else {
                        bytes.push(checked_byte(value, line)?);
                    }
                }
                Ok(bytes)
            }

            ItemKind::Instr { op, value, role } => {
                let operand = match (role, value) {
                    (Role::None, _) | (_, None) => Operand::None,
                    (Role::Byte, Some(expr)) => Operand::Byte(checked_byte(self.resolve(expr, line)?, line)?),
                    (Role::Word, Some(expr)) => Operand::Word(checked_word(self.resolve(expr, line)?, line)?),
                    (Role::Offset, Some(expr)) => Operand::Offset(checked_offset(self.resolve(expr, line)?, line)?),
                    (Role::Relative, Some(Expr::Signed(offset))) => {
                        Operand::Offset(checked_offset(*offset, line)?)
                    }
                    (Role::Relative, Some(expr)) => {
                        let target = checked_word(self.resolve(expr, line)?, line)?;
                        let next = (item.addr + item.size) as i64;
                        Operand::Offset(checked_offset(target as i64 - next, line)?)
                    }
                };
                encode(&Instruction::new(*op, operand)).ok_or_else(|| AssemblerError::SyntaxError {
                    line,
                    message: format!("no encoding for {:?}", op),
                })
            }
        }
    }
}

fn instruction_size(op: Op, role: Role) -> usize {
    let placeholder = match role {
        Role::None => Operand::None,
        Role::Byte => Operand::Byte(0),
        Role::Word => Operand::Word(0),
        Role::Offset | Role::Relative => Operand::Offset(0),
    };
    encode(&Instruction::new(op, placeholder)).map_or(0, |bytes| bytes.len())
}

/// Map a mnemonic and its parsed operands onto an operation.
fn parse_instruction(
    mnemonic: &str,
    args: &[Arg],
    line: usize,
) -> Result<(Op, Option<Expr>, Role), AssemblerError> {
    let invalid = || AssemblerError::InvalidOperands {
        line,
        mnemonic: mnemonic.to_string(),
    };

    let shift = match mnemonic {
        "RLC" => Some(ShiftOp::Rlc),
        "RRC" => Some(ShiftOp::Rrc),
        "RL" => Some(ShiftOp::Rl),
        "RR" => Some(ShiftOp::Rr),
        "SLA" => Some(ShiftOp::Sla),
        "SRA" => Some(ShiftOp::Sra),
        "SRL" => Some(ShiftOp::Srl),
        _ => None,
    };
    if let Some(shift) = shift {
        return match args {
            [Arg::Reg8(reg)] => Ok((Op::Shift(shift, Target::Reg(*reg)), None, Role::None)),
            [Arg::Indirect(Reg16::HL)] => Ok((Op::Shift(shift, Target::IndirectHl), None, Role::None)),
            _ => Err(invalid()),
        };
    }

    let result = match (mnemonic, args) {
        ("NOP", []) => (Op::Nop, None, Role::None),
        ("HALT" | "HLT", []) => (Op::Halt, None, Role::None),
        ("SCF", []) => (Op::Scf, None, Role::None),
        ("RET", []) => (Op::Ret, None, Role::None),

        ("LD", [Arg::Reg8(reg), Arg::Value(expr)]) => (Op::LdImm(*reg), Some(expr.clone()), Role::Byte),
        ("LD", [Arg::Reg16(pair), Arg::Value(expr)]) => (Op::LdPairImm(*pair), Some(expr.clone()), Role::Word),
        ("LD", [Arg::Index(reg), Arg::Value(expr)]) => (Op::LdIndexImm(*reg), Some(expr.clone()), Role::Word),
        ("LD", [Arg::Indirect(pair @ (Reg16::BC | Reg16::DE)), Arg::Reg8(Reg8::A)]) => {
            (Op::StoreA(*pair), None, Role::None)
        }
        ("LD", [Arg::Indirect(Reg16::HL), Arg::Reg8(reg)]) => (Op::StoreHl(*reg), None, Role::None),
        ("LD", [Arg::Indexed(reg, d), Arg::Reg8(Reg8::A)]) => (Op::StoreIndexed(*reg), Some(d.clone()), Role::Offset),
        ("LD", [Arg::I, Arg::Reg8(Reg8::A)]) => (Op::LdIA, None, Role::None),
        ("LD", [Arg::R, Arg::Reg8(Reg8::A)]) => (Op::LdRA, None, Role::None),

        ("ADD", [Arg::Reg8(Reg8::A), Arg::Reg8(reg)]) => (Op::Add(*reg), None, Role::None),
        ("SUB", [Arg::Reg8(reg)]) => (Op::Sub(*reg), None, Role::None),
        ("SUB", [Arg::Indexed(reg, d)]) => (Op::SubIndexed(*reg), Some(d.clone()), Role::Offset),
        ("ADC", [Arg::Reg16(Reg16::HL), Arg::Reg16(pair)]) => (Op::AdcHl(*pair), None, Role::None),
        ("SBC", [Arg::Reg16(Reg16::HL), Arg::Reg16(pair)]) => (Op::SbcHl(*pair), None, Role::None),

        ("BIT", [Arg::Value(bit), target]) => {
            let bit = match bit {
                Expr::Number(n) if (0..8).contains(n) => *n as u8,
                _ => return Err(invalid()),
            };
            match target {
                Arg::Reg8(reg) => (Op::Bit(bit, Target::Reg(*reg)), None, Role::None),
                Arg::Indirect(Reg16::HL) => (Op::Bit(bit, Target::IndirectHl), None, Role::None),
                Arg::Indexed(reg, d) => (Op::BitIndexed(*reg, bit), Some(d.clone()), Role::Offset),
                _ => return Err(invalid()),
            }
        }

        ("JP", [Arg::Value(expr)]) => (Op::Jp, Some(expr.clone()), Role::Word),
        ("JR", [Arg::Value(expr)]) => (Op::Jr, Some(expr.clone()), Role::Relative),
        ("CALL", [Arg::Value(expr)]) => (Op::Call, Some(expr.clone()), Role::Word),

        (
            "NOP" | "HALT" | "HLT" | "SCF" | "RET" | "LD" | "ADD" | "SUB" | "ADC" | "SBC" | "BIT"
            | "JP" | "JR" | "CALL",
            _,
        ) => return Err(invalid()),

        _ => {
            return Err(AssemblerError::UnknownMnemonic {
                line,
                mnemonic: mnemonic.to_string(),
            })
        }
    };

    Ok(result)
}

fn parse_arg(text: &str, line: usize) -> Result<Arg, AssemblerError> {
    let upper = text.to_uppercase();

    if let Some(inner) = upper.strip_prefix('(').and_then(|s| s.strip_suffix(')')) {
        let inner = inner.trim();
        return match inner {
            "BC" => Ok(Arg::Indirect(Reg16::BC)),
            "DE" => Ok(Arg::Indirect(Reg16::DE)),
            "HL" => Ok(Arg::Indirect(Reg16::HL)),
            _ => {
                let reg = if inner.starts_with("IX") {
                    IndexReg::IX
                } else if inner.starts_with("IY") {
                    IndexReg::IY
                } else {
                    return Err(AssemblerError::SyntaxError {
                        line,
                        message: format!("unsupported indirect operand '{}'", text),
                    });
                };
                let displacement = inner[2..].trim();
                if displacement.is_empty() {
                    Ok(Arg::Indexed(reg, Expr::Number(0)))
                } else if displacement.starts_with('+') || displacement.starts_with('-') {
                    Ok(Arg::Indexed(reg, parse_expr(displacement, line)?))
                } else {
                    Err(AssemblerError::SyntaxError {
                        line,
                        message: format!("expected +d or -d in '{}'", text),
                    })
                }
            }
        };
    }

    Ok(match upper.as_str() {
        "A" => Arg::Reg8(Reg8::A),
        "B" => Arg::Reg8(Reg8::B),
        "C" => Arg::Reg8(Reg8::C),
        "D" => Arg::Reg8(Reg8::D),
        "E" => Arg::Reg8(Reg8::E),
        "H" => Arg::Reg8(Reg8::H),
        "L" => Arg::Reg8(Reg8::L),
        "BC" => Arg::Reg16(Reg16::BC),
        "DE" => Arg::Reg16(Reg16::DE),
        "HL" => Arg::Reg16(Reg16::HL),
        "SP" => Arg::Reg16(Reg16::SP),
        "IX" => Arg::Index(IndexReg::IX),
        "IY" => Arg::Index(IndexReg::IY),
        "I" => Arg::I,
        "R" => Arg::R,
        _ => Arg::Value(parse_expr(text, line)?),
    })
}

fn parse_expr(text: &str, line: usize) -> Result<Expr, AssemblerError> {
    let text = text.trim();

    if is_identifier(text) && !text.starts_with(|c: char| c.is_ascii_digit()) {
        return Ok(Expr::Label(text.to_uppercase()));
    }

    let (negative, signed, digits) = match text.as_bytes().first() {
        Some(b'-') => (true, true, text[1..].trim()),
        Some(b'+') => (false, true, text[1..].trim()),
        _ => (false, false, text),
    };

    let value = parse_number(digits).ok_or_else(|| AssemblerError::SyntaxError {
        line,
        message: format!("invalid number '{}'", text),
    })?;
    let value = if negative { -value } else { value };

    Ok(if signed { Expr::Signed(value) } else { Expr::Number(value) })
}

fn parse_number(text: &str) -> Option<i64> {
    let upper = text.to_uppercase();
    if let Some(hex) = upper.strip_prefix('$').or_else(|| upper.strip_prefix("0X")) {
        return i64::from_str_radix(hex, 16).ok();
    }
    if let Some(hex) = upper.strip_suffix('H') {
        if hex.starts_with(|c: char| c.is_ascii_digit()) {
            return i64::from_str_radix(hex, 16).ok();
        }
        return None;
    }
    upper.parse::<i64>().ok()
}

fn is_identifier(text: &str) -> bool {
    !text.is_empty()
        && text.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

fn checked_byte(value: i64, line: usize) -> Result<u8, AssemblerError> {
    if (-128..=255).contains(&value) {
        Ok((value & 0xFF) as u8)
    } else {
        Err(AssemblerError::ValueOutOfRange { line, value })
    }
}

fn checked_word(value: i64, line: usize) -> Result<u16, AssemblerError> {
    if (-32768..=65535).contains(&value) {
        Ok((value & 0xFFFF) as u16)
    } else {
        Err(AssemblerError::ValueOutOfRange { line, value })
    }
}

fn checked_offset(value: i64, line: usize) -> Result<i8, AssemblerError> {
    i8::try_from(value).map_err(|_| AssemblerError::ValueOutOfRange { line, value })
}

/// Errors that can occur during assembly.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssemblerError {
    #[error("syntax error on line {line}: {message}")]
    SyntaxError { line: usize, message: String },

    #[error("unknown mnemonic on line {line}: {mnemonic}")]
    UnknownMnemonic { line: usize, mnemonic: String },

    #[error("invalid operands for {mnemonic} on line {line}")]
    InvalidOperands { line: usize, mnemonic: String },

    #[error("undefined label on line {line}: {label}")]
    UndefinedLabel { line: usize, label: String },

    #[error("label defined twice on line {line}: {label}")]
    DuplicateLabel { line: usize, label: String },

    #[error("value out of range on line {line}: {value}")]
    ValueOutOfRange { line: usize, value: i64 },

    #[error("code on line {line} runs past the end of memory")]
    AddressOverflow { line: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assemble_simple() {
        let source = r#"
            ; load A=5, load B=3, add, halt
            LD A, 5
            LD B, 3
            ADD A, B
            HALT
        "#;

        let result = assemble(source).unwrap();
        assert_eq!(result, vec![0x3E, 0x05, 0x06, 0x03, 0x80, 0x76]);
    }

    #[test]
    fn test_assemble_with_labels() {
        let source = r#"
        START:
            CALL SUB1
            JR START
        SUB1: RET
        "#;

        let result = assemble(source).unwrap();
        assert_eq!(result, vec![0xCD, 0x05, 0x00, 0x18, 0xFB, 0xC9]);
    }

    #[test]
    fn test_assemble_signed_relative_offset() {
        let result = assemble("JR +5\nJR -5").unwrap();
        assert_eq!(result, vec![0x18, 0x05, 0x18, 0xFB]);
    }

    #[test]
    fn test_assemble_prefixed_forms() {
        let source = r#"
            ld ix, $4000
            LD (IX+2), A
            SUB (IY-2)
            BIT 5, (IX+3)
            BIT 7, (HL)
            RLC B
            SRA (HL)
            ADC HL, DE
            SBC HL, BC
            LD R, A
        "#;

        let result = assemble(source).unwrap();
        assert_eq!(
            result,
            vec![
                0xDD, 0x21, 0x00, 0x40, 0xDD, 0x77, 0x02, 0xFD, 0x96, 0xFE, 0xDD, 0xCB, 0x03, 0x6E,
                0xCB, 0x7E, 0xCB, 0x00, 0xCB, 0x2E, 0xED, 0x5A, 0xED, 0x42, 0xED, 0x4F,
            ]
        );
    }

    #[test]
    fn test_assemble_data_and_org() {
        let source = r#"
            DB 42, -1, 0FFh
            ORG $08
            DW $1234
        "#;

        let result = assemble(source).unwrap();
        assert_eq!(result.len(), 10);
        assert_eq!(&result[..3], &[42, 0xFF, 0xFF]);
        assert_eq!(&result[8..], &[0x34, 0x12]);
    }

    #[test]
    fn test_assemble_errors() {
        assert!(matches!(assemble("FOO A"), Err(AssemblerError::UnknownMnemonic { line: 1, .. })));
        assert!(matches!(assemble("JP NOWHERE"), Err(AssemblerError::UndefinedLabel { line: 1, .. })));
        assert!(matches!(assemble("LD A, 300"), Err(AssemblerError::ValueOutOfRange { value: 300, .. })));
        assert!(matches!(assemble("ADD B, A"), Err(AssemblerError::InvalidOperands { .. })));
        assert!(matches!(assemble("X: NOP\nX: NOP"), Err(AssemblerError::DuplicateLabel { line: 2, .. })));
        assert!(matches!(assemble("ORG $FFFF\nLD BC, 0"), Err(AssemblerError::AddressOverflow { line: 2 })));
    }

    #[test]
    fn test_jr_target_out_of_reach() {
        let source = "JR FAR\nORG $0200\nFAR: NOP";
        assert!(matches!(assemble(source), Err(AssemblerError::ValueOutOfRange { .. })));
    }
}
