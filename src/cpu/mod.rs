//! CPU emulation for the Z80.
//!
//! This module implements the interpreter core:
//! - 64 KiB flat byte-addressed memory
//! - Main and shadow register sets, IX/IY, PC, SP, I, R
//! - Table-driven decoding of unprefixed, CB, ED, DD/FD and DD/FD CB opcodes

pub mod memory;
pub mod registers;
pub mod alu;
pub mod decode;
pub mod execute;

pub use memory::{Memory, MemoryError, MEMORY_SIZE};
pub use registers::{Registers, Reg8, Reg16, IndexReg};
pub use decode::{Instruction, Op, Operand, Prefix, Target, decode, encode};
pub use execute::{Cpu, RunReport, Step, StopReason, Tracer};
