//! Assembler and disassembler for Z80 programs.
//!
//! This module provides:
//! - A simple two-pass assembler (text → raw binary image)
//! - A disassembler (binary image → readable text)

pub mod assembler;
pub mod disasm;

pub use assembler::{assemble, AssemblerError};
pub use disasm::{disassemble, disassemble_from, disassemble_instruction, DisasmLine};
