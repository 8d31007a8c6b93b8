//! # Z80 Emulator
//!
//! A table-driven interpreter for a subset of the Zilog Z80 instruction set.
//!
//! Programs are raw byte images loaded at address 0 into a flat 64 KiB
//! address space and executed under a cycle budget. The crate also ships a
//! small assembler and disassembler, a terminal debugger and a WebAssembly
//! wrapper.

pub mod cpu;
pub mod asm;

#[cfg(feature = "tui")]
pub mod tui;

#[cfg(feature = "wasm")]
pub mod wasm;

// Re-export commonly used types
pub use cpu::{Cpu, Memory, MemoryError, MEMORY_SIZE, Registers, Instruction, RunReport, StopReason};
pub use asm::{assemble, disassemble, AssemblerError};

#[cfg(feature = "tui")]
pub use tui::run_debugger;
