//! Instruction decoder for the Z80.
//!
//! Decoding is table driven. Every opcode map (unprefixed, `CB`, `ED`,
//! `DD`/`FD` and `DD CB`/`FD CB`) is a 256-entry table of [`OpcodeInfo`]
//! descriptors giving the operation, the kind of operand that follows the
//! opcode and the cycle cost. A missing entry decodes to [`Op::Unknown`].
//!
//! The same tables drive [`encode`], so the assembler and the interpreter
//! can never disagree about an encoding.

use crate::cpu::alu::ShiftOp;
use crate::cpu::registers::{IndexReg, Reg16, Reg8};
use crate::cpu::Memory;
use serde::{Serialize, Deserialize};
use std::sync::OnceLock;

/// Cycles charged for any byte sequence without a table entry.
pub const UNKNOWN_CYCLES: u32 = 4;

/// The prefix chain in front of an opcode byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Prefix {
    Unprefixed,
    /// `CB`: rotates, shifts and bit tests.
    Cb,
    /// `ED`: extended operations.
    Ed,
    /// `DD` (IX) or `FD` (IY).
    Index(IndexReg),
    /// `DD CB d op` / `FD CB d op`.
    IndexCb(IndexReg),
}

impl Prefix {
    /// The prefix bytes preceding the opcode (and, for `IndexCb`, preceding
    /// the displacement).
    pub fn bytes(self) -> Vec<u8> {
        match self {
            Prefix::Unprefixed => vec![],
            Prefix::Cb => vec![0xCB],
            Prefix::Ed => vec![0xED],
            Prefix::Index(reg) => vec![reg.prefix()],
            Prefix::IndexCb(reg) => vec![reg.prefix(), 0xCB],
        }
    }
}

/// Operand of a `CB`-family operation: a register or the byte at `(HL)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Target {
    Reg(Reg8),
    IndirectHl,
}

impl Target {
    /// Decode the 3-bit register field; 6 means `(HL)`.
    pub fn from_field(field: u8) -> Self {
        match Reg8::from_field(field) {
            Some(reg) => Target::Reg(reg),
            None => Target::IndirectHl,
        }
    }
}

/// An operation, with every register choice fixed but no immediate data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Op {
    // ==================== Unprefixed ====================

    /// No operation
    Nop,
    /// Stop the run loop
    Halt,
    /// Set carry flag
    Scf,
    /// `LD r, n`
    LdImm(Reg8),
    /// `LD rr, nn`
    LdPairImm(Reg16),
    /// `LD (BC), A` / `LD (DE), A`
    StoreA(Reg16),
    /// `LD (HL), r`
    StoreHl(Reg8),
    /// `ADD A, r`
    Add(Reg8),
    /// `SUB r`
    Sub(Reg8),
    /// `JP nn`
    Jp,
    /// `JR e`
    Jr,
    /// `CALL nn`
    Call,
    /// `RET`
    Ret,

    // ==================== CB ====================

    /// Rotate or shift a register or `(HL)`
    Shift(ShiftOp, Target),
    /// `BIT b, r` / `BIT b, (HL)`
    Bit(u8, Target),

    // ==================== ED ====================

    /// `LD I, A`
    LdIA,
    /// `LD R, A`
    LdRA,
    /// `ADC HL, rr`
    AdcHl(Reg16),
    /// `SBC HL, rr`
    SbcHl(Reg16),

    // ==================== DD / FD ====================

    /// `LD IX, nn` / `LD IY, nn`
    LdIndexImm(IndexReg),
    /// `LD (IX+d), A`
    StoreIndexed(IndexReg),
    /// `SUB (IX+d)`
    SubIndexed(IndexReg),
    /// `BIT b, (IX+d)`
    BitIndexed(IndexReg, u8),

    /// A byte sequence with no table entry.
    Unknown(Prefix, u8),
}

impl Op {
    /// The opcode map this operation lives in.
    pub fn prefix(self) -> Prefix {
        match self {
            Op::Shift(..) | Op::Bit(..) => Prefix::Cb,
            Op::LdIA | Op::LdRA | Op::AdcHl(_) | Op::SbcHl(_) => Prefix::Ed,
            Op::LdIndexImm(reg) | Op::StoreIndexed(reg) | Op::SubIndexed(reg) => Prefix::Index(reg),
            Op::BitIndexed(reg, _) => Prefix::IndexCb(reg),
            Op::Unknown(prefix, _) => prefix,
            _ => Prefix::Unprefixed,
        }
    }
}

/// What follows the opcode byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    None,
    /// 8-bit immediate.
    Byte,
    /// 16-bit little-endian immediate.
    Word,
    /// Signed 8-bit relative offset or index displacement.
    Offset,
}

impl OperandKind {
    /// Number of operand bytes after the opcode byte.
    ///
    /// For `IndexCb` the displacement sits before the opcode and is counted
    /// as part of the prefix chain instead.
    pub fn len(self) -> u16 {
        match self {
            OperandKind::None => 0,
            OperandKind::Byte | OperandKind::Offset => 1,
            OperandKind::Word => 2,
        }
    }
}

/// Immediate data carried by a decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operand {
    None,
    Byte(u8),
    Word(u16),
    Offset(i8),
}

impl Operand {
    pub fn byte(self) -> u8 {
        match self {
            Operand::Byte(value) => value,
            Operand::Offset(value) => value as u8,
            Operand::Word(value) => (value & 0xFF) as u8,
            Operand::None => 0,
        }
    }

    pub fn word(self) -> u16 {
        match self {
            Operand::Word(value) => value,
            Operand::Byte(value) => value as u16,
            Operand::Offset(value) => value as i16 as u16,
            Operand::None => 0,
        }
    }

    pub fn offset(self) -> i8 {
        self.byte() as i8
    }
}

/// A decoded Z80 instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instruction {
    pub op: Op,
    pub operand: Operand,
}

impl Instruction {
    pub fn new(op: Op, operand: Operand) -> Self {
        Self { op, operand }
    }

    /// An instruction without immediate data.
    pub fn bare(op: Op) -> Self {
        Self { op, operand: Operand::None }
    }
}

/// Static description of one opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpcodeInfo {
    pub opcode: u8,
    pub op: Op,
    pub operand: OperandKind,
    pub cycles: u32,
}

/// One opcode map.
pub type OpcodeTable = [Option<OpcodeInfo>; 256];

/// An instruction together with its encoded size and cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decoded {
    pub instruction: Instruction,
    /// Total bytes: prefixes, displacement, opcode and operands.
    pub length: u16,
    pub cycles: u32,
}

struct Tables {
    base: OpcodeTable,
    cb: OpcodeTable,
    ed: OpcodeTable,
    ix: OpcodeTable,
    iy: OpcodeTable,
    ix_cb: OpcodeTable,
    iy_cb: OpcodeTable,
}

static TABLES: OnceLock<Tables> = OnceLock::new();

fn tables() -> &'static Tables {
    TABLES.get_or_init(|| Tables {
        base: base_table(),
        cb: cb_table(),
        ed: ed_table(),
        ix: index_table(IndexReg::IX),
        iy: index_table(IndexReg::IY),
        ix_cb: index_cb_table(IndexReg::IX),
        iy_cb: index_cb_table(IndexReg::IY),
    })
}

/// The opcode map selected by `prefix`.
pub fn table(prefix: Prefix) -> &'static OpcodeTable {
    let t = tables();
    match prefix {
        Prefix::Unprefixed => &t.base,
        Prefix::Cb => &t.cb,
        Prefix::Ed => &t.ed,
        Prefix::Index(IndexReg::IX) => &t.ix,
        Prefix::Index(IndexReg::IY) => &t.iy,
        Prefix::IndexCb(IndexReg::IX) => &t.ix_cb,
        Prefix::IndexCb(IndexReg::IY) => &t.iy_cb,
    }
}

/// Look up the descriptor for `opcode` in the map selected by `prefix`.
pub fn lookup(prefix: Prefix, opcode: u8) -> Option<&'static OpcodeInfo> {
    table(prefix)[opcode as usize].as_ref()
}

fn insert(table: &mut OpcodeTable, opcode: u8, op: Op, operand: OperandKind, cycles: u32) {
    debug_assert!(table[opcode as usize].is_none(), "opcode {:02X} defined twice", opcode);
    table[opcode as usize] = Some(OpcodeInfo { opcode, op, operand, cycles });
}

fn base_table() -> OpcodeTable {
    use Reg8::*;
    let mut t: OpcodeTable = [None; 256];

    insert(&mut t, 0x00, Op::Nop, OperandKind::None, 4);

    for (opcode, reg) in [(0x06, B), (0x0E, C), (0x16, D), (0x1E, E), (0x26, H), (0x2E, L), (0x3E, A)] {
        insert(&mut t, opcode, Op::LdImm(reg), OperandKind::Byte, 7);
    }
    for (opcode, pair) in [(0x01, Reg16::BC), (0x11, Reg16::DE), (0x21, Reg16::HL), (0x31, Reg16::SP)] {
        insert(&mut t, opcode, Op::LdPairImm(pair), OperandKind::Word, 10);
    }
    insert(&mut t, 0x02, Op::StoreA(Reg16::BC), OperandKind::None, 7);
    insert(&mut t, 0x12, Op::StoreA(Reg16::DE), OperandKind::None, 7);

    for field in 0..8u8 {
        if let Some(reg) = Reg8::from_field(field) {
            insert(&mut t, 0x70 | field, Op::StoreHl(reg), OperandKind::None, 7);
            insert(&mut t, 0x80 | field, Op::Add(reg), OperandKind::None, 4);
            insert(&mut t, 0x90 | field, Op::Sub(reg), OperandKind::None, 4);
        }
    }

    insert(&mut t, 0x37, Op::Scf, OperandKind::None, 4);
    insert(&mut t, 0x76, Op::Halt, OperandKind::None, 4);
    insert(&mut t, 0xC3, Op::Jp, OperandKind::Word, 10);
    insert(&mut t, 0x18, Op::Jr, OperandKind::Offset, 12);
    insert(&mut t, 0xCD, Op::Call, OperandKind::Word, 17);
    insert(&mut t, 0xC9, Op::Ret, OperandKind::None, 10);
    t
}

fn cb_table() -> OpcodeTable {
    let mut t: OpcodeTable = [None; 256];

    for opcode in 0x00..=0x7Fu8 {
        let target = Target::from_field(opcode);
        let cycles = match target {
            Target::Reg(_) => 8,
            Target::IndirectHl => 12,
        };
        let field = (opcode >> 3) & 0x07;

        if opcode < 0x40 {
            if let Some(shift) = ShiftOp::from_field(field) {
                insert(&mut t, opcode, Op::Shift(shift, target), OperandKind::None, cycles);
            }
        } else {
            insert(&mut t, opcode, Op::Bit(field, target), OperandKind::None, cycles);
        }
    }
    t
}

fn ed_table() -> OpcodeTable {
    let mut t: OpcodeTable = [None; 256];

    insert(&mut t, 0x47, Op::LdIA, OperandKind::None, 9);
    insert(&mut t, 0x4F, Op::LdRA, OperandKind::None, 9);
    for (base, pair) in [(0x40, Reg16::BC), (0x50, Reg16::DE), (0x60, Reg16::HL)] {
        insert(&mut t, base | 0x02, Op::SbcHl(pair), OperandKind::None, 15);
        insert(&mut t, base | 0x0A, Op::AdcHl(pair), OperandKind::None, 15);
    }
    t
}

fn index_table(reg: IndexReg) -> OpcodeTable {
    let mut t: OpcodeTable = [None; 256];

    insert(&mut t, 0x21, Op::LdIndexImm(reg), OperandKind::Word, 14);
    insert(&mut t, 0x77, Op::StoreIndexed(reg), OperandKind::Offset, 19);
    insert(&mut t, 0x96, Op::SubIndexed(reg), OperandKind::Offset, 19);
    t
}

fn index_cb_table(reg: IndexReg) -> OpcodeTable {
    let mut t: OpcodeTable = [None; 256];

    // The displacement is read before the opcode, so no trailing operand.
    for bit in 0..8u8 {
        insert(&mut t, 0x46 | (bit << 3), Op::BitIndexed(reg, bit), OperandKind::None, 20);
    }
    t
}

/// Decode the instruction starting at `pc`.
///
/// Never fails: byte sequences without a table entry become [`Op::Unknown`]
/// spanning exactly the prefix and opcode bytes consumed. Reads past 0xFFFF
/// wrap to 0x0000.
pub fn decode(mem: &Memory, pc: u16) -> Decoded {
    let fetch = |offset: u16| mem.read(pc.wrapping_add(offset));

    let first = fetch(0);
    // (prefix chain, opcode byte, bytes consumed through the opcode, displacement)
    let (prefix, opcode, head, displacement) = match first {
        0xCB => (Prefix::Cb, fetch(1), 2, None),
        0xED => (Prefix::Ed, fetch(1), 2, None),
        0xDD | 0xFD => {
            let reg = if first == 0xDD { IndexReg::IX } else { IndexReg::IY };
            let second = fetch(1);
            if second == 0xCB {
                (Prefix::IndexCb(reg), fetch(3), 4, Some(fetch(2) as i8))
            } else {
                (Prefix::Index(reg), second, 2, None)
            }
        }
        _ => (Prefix::Unprefixed, first, 1, None),
    };

    let Some(info) = lookup(prefix, opcode) else {
        return Decoded {
            instruction: Instruction::new(
                Op::Unknown(prefix, opcode),
                displacement.map_or(Operand::None, Operand::Offset),
            ),
            length: head,
            cycles: UNKNOWN_CYCLES,
        };
    };

    let (operand, tail) = match (info.operand, displacement) {
        (_, Some(d)) => (Operand::Offset(d), 0),
        (OperandKind::None, None) => (Operand::None, 0),
        (OperandKind::Byte, None) => (Operand::Byte(fetch(head)), 1),
        (OperandKind::Offset, None) => (Operand::Offset(fetch(head) as i8), 1),
        (OperandKind::Word, None) => {
            (Operand::Word(u16::from_le_bytes([fetch(head), fetch(head + 1)])), 2)
        }
    };

    Decoded {
        instruction: Instruction::new(info.op, operand),
        length: head + tail,
        cycles: info.cycles,
    }
}

/// Encode an instruction back to bytes.
///
/// Returns `None` for an operation that has no table entry (for example a
/// bit index above 7 built by hand).
pub fn encode(instr: &Instruction) -> Option<Vec<u8>> {
    let prefix = instr.op.prefix();
    let mut bytes = prefix.bytes();

    if let Op::Unknown(_, opcode) = instr.op {
        if let Prefix::IndexCb(_) = prefix {
            bytes.push(instr.operand.byte());
        }
        bytes.push(opcode);
        return Some(bytes);
    }

    let info = table(prefix).iter().flatten().find(|info| info.op == instr.op)?;

    if let Prefix::IndexCb(_) = prefix {
        bytes.push(instr.operand.byte());
        bytes.push(info.opcode);
        return Some(bytes);
    }

    bytes.push(info.opcode);
    match info.operand {
        OperandKind::None => {}
        OperandKind::Byte | OperandKind::Offset => bytes.push(instr.operand.byte()),
        OperandKind::Word => bytes.extend_from_slice(&instr.operand.word().to_le_bytes()),
    }
    Some(bytes)
}
