//! Flag-producing arithmetic.
//!
//! Each function takes its operands by value and returns `(result, flags)`.
//! All width truncation is explicit; nothing here relies on integer
//! overflow behaviour.

use crate::cpu::registers::{result_flags, FLAG_C, FLAG_H, FLAG_N, FLAG_S, FLAG_Z};
use serde::{Serialize, Deserialize};

/// `A + value`.
pub fn add8(a: u8, value: u8) -> (u8, u8) {
    let raw = a as u16 + value as u16;
    let result = (raw & 0xFF) as u8;

    let mut f = result_flags(result);
    if (a as u16 ^ value as u16 ^ raw) & 0x10 != 0 {
        f |= FLAG_H;
    }
    if raw > 0xFF {
        f |= FLAG_C;
    }
    (result, f)
}

/// `A - value`.
pub fn sub8(a: u8, value: u8) -> (u8, u8) {
    let raw = a as i16 - value as i16;
    let result = (raw & 0xFF) as u8;

    let mut f = result_flags(result) | FLAG_N;
    if (a as i16 ^ value as i16 ^ raw) & 0x10 != 0 {
        f |= FLAG_H;
    }
    if value > a {
        f |= FLAG_C;
    }
    (result, f)
}

/// `HL + rr + carry`.
pub fn adc16(hl: u16, rr: u16, carry: bool) -> (u16, u8) {
    let raw = hl as u32 + rr as u32 + carry as u32;
    let result = (raw & 0xFFFF) as u16;

    let mut f = word_flags(result);
    if (hl as u32 ^ rr as u32 ^ raw) & 0x1000 != 0 {
        f |= FLAG_H;
    }
    if raw & 0x1_0000 != 0 {
        f |= FLAG_C;
    }
    (result, f)
}

/// `HL - rr - carry`.
pub fn sbc16(hl: u16, rr: u16, carry: bool) -> (u16, u8) {
    let raw = hl as i32 - rr as i32 - carry as i32;
    let result = (raw & 0xFFFF) as u16;

    let mut f = word_flags(result) | FLAG_N;
    if (hl as i32 ^ rr as i32 ^ raw) & 0x1000 != 0 {
        f |= FLAG_H;
    }
    if raw < 0 {
        f |= FLAG_C;
    }
    (result, f)
}

fn word_flags(result: u16) -> u8 {
    let mut f = 0;
    if result == 0 {
        f |= FLAG_Z;
    }
    if result & 0x8000 != 0 {
        f |= FLAG_S;
    }
    f
}

/// Rotate and shift operations of the `CB` family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShiftOp {
    /// Rotate left circular: bit 7 goes to carry and bit 0.
    Rlc,
    /// Rotate right circular: bit 0 goes to carry and bit 7.
    Rrc,
    /// Rotate left through carry.
    Rl,
    /// Rotate right through carry.
    Rr,
    /// Shift left arithmetic, bit 0 cleared.
    Sla,
    /// Shift right arithmetic, bit 7 preserved.
    Sra,
    /// Shift right logical, bit 7 cleared.
    Srl,
}

impl ShiftOp {
    /// Decode bits 5..3 of a `CB 00..3F` opcode.
    ///
    /// Field 6 is the undocumented SLL and is not supported.
    pub fn from_field(field: u8) -> Option<Self> {
        match field & 0x07 {
            0 => Some(ShiftOp::Rlc),
            1 => Some(ShiftOp::Rrc),
            2 => Some(ShiftOp::Rl),
            3 => Some(ShiftOp::Rr),
            4 => Some(ShiftOp::Sla),
            5 => Some(ShiftOp::Sra),
            7 => Some(ShiftOp::Srl),
            _ => None,
        }
    }

    pub fn field(self) -> u8 {
        match self {
            ShiftOp::Rlc => 0,
            ShiftOp::Rrc => 1,
            ShiftOp::Rl => 2,
            ShiftOp::Rr => 3,
            ShiftOp::Sla => 4,
            ShiftOp::Sra => 5,
            ShiftOp::Srl => 7,
        }
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            ShiftOp::Rlc => "RLC",
            ShiftOp::Rrc => "RRC",
            ShiftOp::Rl => "RL",
            ShiftOp::Rr => "RR",
            ShiftOp::Sla => "SLA",
            ShiftOp::Sra => "SRA",
            ShiftOp::Srl => "SRL",
        }
    }
}

/// Apply a rotate/shift to `value`, with `carry` as the incoming carry flag.
///
/// The new carry is the bit shifted out, except for SRA, which clears the
/// carry and reports only Z and S.
pub fn shift(op: ShiftOp, value: u8, carry: bool) -> (u8, u8) {
    let carry_in = carry as u8;
    let (result, carry_out) = match op {
        ShiftOp::Rlc => (value.rotate_left(1), value >> 7),
        ShiftOp::Rrc => (value.rotate_right(1), value & 0x01),
        ShiftOp::Rl => ((value << 1) | carry_in, value >> 7),
        ShiftOp::Rr => ((value >> 1) | (carry_in << 7), value & 0x01),
        ShiftOp::Sla => (value << 1, value >> 7),
        ShiftOp::Sra => ((value >> 1) | (value & 0x80), 0),
        ShiftOp::Srl => (value >> 1, value & 0x01),
    };

    let mut f = result_flags(result);
    if carry_out != 0 {
        f |= FLAG_C;
    }
    (result, f)
}
