//! TUI debugger for the Z80 emulator.
//!
//! Provides an interactive terminal-based debugger with:
//! - Register and flag view
//! - Hex memory view
//! - Step/run/breakpoint controls
//! - Disassembly from the program counter

mod app;
mod ui;

pub use app::{DebuggerApp, run_debugger};
