//! Z80 register file.
//!
//! The Z80 exposes:
//! - A: 8-bit accumulator, F: 8-bit flags
//! - BC, DE, HL: general purpose pairs addressable as 8-bit halves
//! - A', F', B', C', D', E': shadow copies of the above
//! - IX, IY: 16-bit index registers for displacement addressing
//! - PC, SP: program counter and stack pointer
//! - I: interrupt vector base, R: memory refresh counter

use serde::{Serialize, Deserialize};
use std::fmt;

/// Sign flag (bit 7 of the result).
pub const FLAG_S: u8 = 0x80;
/// Zero flag.
pub const FLAG_Z: u8 = 0x40;
/// Half-carry flag (carry out of bit 3, or bit 11 for 16-bit ops).
pub const FLAG_H: u8 = 0x10;
/// Parity/overflow flag. Never written by this interpreter.
pub const FLAG_PV: u8 = 0x04;
/// Subtract flag, set by subtraction-class operations.
pub const FLAG_N: u8 = 0x02;
/// Carry flag.
pub const FLAG_C: u8 = 0x01;

/// An 8-bit register operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Reg8 {
    A,
    B,
    C,
    D,
    E,
    H,
    L,
}

impl Reg8 {
    /// Decode the 3-bit register field used throughout the opcode map.
    ///
    /// Field value 6 selects `(HL)` and has no register, so it yields `None`.
    pub fn from_field(field: u8) -> Option<Self> {
        match field & 0x07 {
            0 => Some(Reg8::B),
            1 => Some(Reg8::C),
            2 => Some(Reg8::D),
            3 => Some(Reg8::E),
            4 => Some(Reg8::H),
            5 => Some(Reg8::L),
            7 => Some(Reg8::A),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Reg8::A => "A",
            Reg8::B => "B",
            Reg8::C => "C",
            Reg8::D => "D",
            Reg8::E => "E",
            Reg8::H => "H",
            Reg8::L => "L",
        }
    }
}

/// A 16-bit register pair operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Reg16 {
    BC,
    DE,
    HL,
    SP,
}

impl Reg16 {
    pub fn name(self) -> &'static str {
        match self {
            Reg16::BC => "BC",
            Reg16::DE => "DE",
            Reg16::HL => "HL",
            Reg16::SP => "SP",
        }
    }
}

/// One of the two index registers, selected by the `DD`/`FD` prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexReg {
    IX,
    IY,
}

impl IndexReg {
    /// The prefix byte that selects this register.
    pub fn prefix(self) -> u8 {
        match self {
            IndexReg::IX => 0xDD,
            IndexReg::IY => 0xFD,
        }
    }

    pub fn from_prefix(byte: u8) -> Option<Self> {
        match byte {
            0xDD => Some(IndexReg::IX),
            0xFD => Some(IndexReg::IY),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            IndexReg::IX => "IX",
            IndexReg::IY => "IY",
        }
    }
}

/// The Z80 register file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registers {
    pub a: u8,
    pub f: u8,
    pub b: u8,
    pub c: u8,
    pub d: u8,
    pub e: u8,
    pub h: u8,
    pub l: u8,

    /// Shadow set. Inspectable only; no implemented opcode swaps it in.
    pub a_alt: u8,
    pub f_alt: u8,
    pub b_alt: u8,
    pub c_alt: u8,
    pub d_alt: u8,
    pub e_alt: u8,

    pub ix: u16,
    pub iy: u16,
    pub pc: u16,
    pub sp: u16,

    /// Interrupt vector base.
    pub i: u8,
    /// Memory refresh counter, bumped once per fetched instruction.
    pub r: u8,

    /// Single interrupt-enable latch. Reported as both IFF1 and IFF2.
    pub interrupt_enable: bool,
}

impl Registers {
    /// Create a register file holding the power-on values.
    pub fn new() -> Self {
        Self {
            a: 0,
            f: FLAG_Z,
            b: 0,
            c: 0,
            d: 0,
            e: 0,
            h: 0,
            l: 0,
            a_alt: 0,
            f_alt: 0,
            b_alt: 0,
            c_alt: 0,
            d_alt: 0,
            e_alt: 0,
            ix: 0xFFFF,
            iy: 0xFFFF,
            pc: 0x0000,
            sp: 0x0000,
            i: 0,
            r: 0x01,
            interrupt_enable: false,
        }
    }

    /// Restore the power-on values.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn get(&self, reg: Reg8) -> u8 {
        match reg {
            Reg8::A => self.a,
            Reg8::B => self.b,
            Reg8::C => self.c,
            Reg8::D => self.d,
            Reg8::E => self.e,
            Reg8::H => self.h,
            Reg8::L => self.l,
        }
    }

    pub fn set(&mut self, reg: Reg8, value: u8) {
        match reg {
            Reg8::A => self.a = value,
            Reg8::B => self.b = value,
            Reg8::C => self.c = value,
            Reg8::D => self.d = value,
            Reg8::E => self.e = value,
            Reg8::H => self.h = value,
            Reg8::L => self.l = value,
        }
    }

    #[inline]
    pub fn bc(&self) -> u16 {
        u16::from_be_bytes([self.b, self.c])
    }

    #[inline]
    pub fn de(&self) -> u16 {
        u16::from_be_bytes([self.d, self.e])
    }

    #[inline]
    pub fn hl(&self) -> u16 {
        u16::from_be_bytes([self.h, self.l])
    }

    pub fn set_bc(&mut self, value: u16) {
        [self.b, self.c] = value.to_be_bytes();
    }

    pub fn set_de(&mut self, value: u16) {
        [self.d, self.e] = value.to_be_bytes();
    }

    pub fn set_hl(&mut self, value: u16) {
        [self.h, self.l] = value.to_be_bytes();
    }

    pub fn pair(&self, pair: Reg16) -> u16 {
        match pair {
            Reg16::BC => self.bc(),
            Reg16::DE => self.de(),
            Reg16::HL => self.hl(),
            Reg16::SP => self.sp,
        }
    }

    pub fn set_pair(&mut self, pair: Reg16, value: u16) {
        match pair {
            Reg16::BC => self.set_bc(value),
            Reg16::DE => self.set_de(value),
            Reg16::HL => self.set_hl(value),
            Reg16::SP => self.sp = value,
        }
    }

    pub fn index(&self, reg: IndexReg) -> u16 {
        match reg {
            IndexReg::IX => self.ix,
            IndexReg::IY => self.iy,
        }
    }

    pub fn set_index(&mut self, reg: IndexReg, value: u16) {
        match reg {
            IndexReg::IX => self.ix = value,
            IndexReg::IY => self.iy = value,
        }
    }

    /// Compute `index + displacement` with 16-bit wraparound.
    pub fn indexed_address(&self, reg: IndexReg, displacement: i8) -> u16 {
        self.index(reg).wrapping_add(displacement as i16 as u16)
    }

    #[inline]
    pub fn flag(&self, mask: u8) -> bool {
        self.f & mask != 0
    }

    /// Derive F from an 8-bit result: Z if zero, S if bit 7 set, everything
    /// else cleared.
    pub fn set_result_flags(&mut self, result: u8) {
        self.f = result_flags(result);
    }

    /// Flag update for `BIT b, x`.
    ///
    /// S, Z and H are cleared first, then H is always set and Z reflects a
    /// clear tested bit. S is only set when testing bit 7 and it is 1.
    /// N, P/V and C are left untouched.
    pub fn set_bit_flags(&mut self, value: u8, bit: u8) {
        let bit = bit & 0x07;
        self.f &= !(FLAG_Z | FLAG_S | FLAG_H);
        if value & (1 << bit) == 0 {
            self.f |= FLAG_Z;
        }
        self.f |= FLAG_H;
        if bit == 7 && value & 0x80 != 0 {
            self.f |= FLAG_S;
        }
    }

    /// Advance R, keeping it within its 7 counting bits.
    #[inline]
    pub fn bump_refresh(&mut self) {
        self.r = self.r.wrapping_add(1) & 0x7F;
    }

    /// Render F as `SZ-H-PNC`, with `.` for clear bits.
    pub fn flags_string(&self) -> String {
        const NAMES: [char; 8] = ['S', 'Z', '-', 'H', '-', 'P', 'N', 'C'];
        NAMES
            .iter()
            .enumerate()
            .map(|(i, &name)| match name {
                '-' => '-',
                _ if self.flag(0x80 >> i) => name,
                _ => '.',
            })
            .collect()
    }
}

/// One register per line, in hex.
impl fmt::Display for Registers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = [
            ("A", self.a), ("F", self.f), ("B", self.b), ("C", self.c),
            ("D", self.d), ("E", self.e), ("H", self.h), ("L", self.l),
            ("I", self.i), ("R", self.r),
            ("A'", self.a_alt), ("F'", self.f_alt), ("B'", self.b_alt),
            ("C'", self.c_alt), ("D'", self.d_alt), ("E'", self.e_alt),
        ];
        for (name, value) in bytes {
            writeln!(f, "{}: {:02x}", name, value)?;
        }
        let latch = self.interrupt_enable as u8;
        writeln!(f, "IFF1: {}", latch)?;
        writeln!(f, "IFF2: {}", latch)?;
        writeln!(f, "IM: 0")?;
        // The internal address latch is not modelled.
        writeln!(f, "Hidden 16-bit math register: 00")?;
        writeln!(f, "IX: {:04x}", self.ix)?;
        writeln!(f, "IY: {:04x}", self.iy)?;
        writeln!(f, "PC: {:04x}", self.pc)?;
        write!(f, "SP: {:04x}", self.sp)
    }
}

impl Default for Registers {
    fn default() -> Self {
        Self::new()
    }
}

/// Z and S for an 8-bit result.
#[inline]
pub fn result_flags(result: u8) -> u8 {
    let mut f = 0;
    if result == 0 {
        f |= FLAG_Z;
    }
    if result & 0x80 != 0 {
        f |= FLAG_S;
    }
    f
}
