//! WebAssembly bindings for the Z80 emulator.
//!
//! This module provides JavaScript-friendly wrappers around the core emulator.

use wasm_bindgen::prelude::*;
use crate::{Cpu, StopReason};
use crate::asm::assembler::assemble;
use crate::asm::disasm::{disassemble, disassemble_instruction};

/// Initialize panic hook for better error messages in console.
#[wasm_bindgen(start)]
pub fn init() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

/// WebAssembly-friendly CPU wrapper.
#[wasm_bindgen]
pub struct WasmCpu {
    cpu: Cpu,
    program: Vec<u8>,
    stopped: Option<StopReason>,
}

#[wasm_bindgen]
impl WasmCpu {
    /// Create a new CPU instance.
    #[wasm_bindgen(constructor)]
    pub fn new() -> Self {
        Self {
            cpu: Cpu::new(),
            program: Vec::new(),
            stopped: None,
        }
    }

    /// Load a raw program image at address 0.
    #[wasm_bindgen]
    pub fn load_bytes(&mut self, image: &[u8]) -> Result<usize, JsError> {
        self.program = image.to_vec();
        self.reload()?;
        Ok(image.len())
    }

    /// Load a program from assembly source code.
    #[wasm_bindgen]
    pub fn load_asm(&mut self, source: &str) -> Result<usize, JsError> {
        let image = assemble(source)
            .map_err(|e| JsError::new(&format!("{}", e)))?;
        self.load_bytes(&image)
    }

    /// Step one instruction. Returns the disassembled instruction.
    #[wasm_bindgen]
    pub fn step(&mut self) -> Result<String, JsError> {
        if let Some(reason) = self.stopped {
            return Err(JsError::new(&format!("CPU stopped: {:?}", reason)));
        }

        let step = self.cpu.step();
        self.stopped = step.stop;
        Ok(disassemble_instruction(&step.instruction))
    }

    /// Run under a cycle budget. Returns the cycles consumed.
    #[wasm_bindgen]
    pub fn run(&mut self, max_cycles: u32) -> u64 {
        if self.stopped.is_some() {
            return 0;
        }
        let report = self.cpu.run(max_cycles as u64);
        if report.halted_early() {
            self.stopped = Some(report.stop);
        }
        report.cycles
    }

    /// Reset CPU to initial state with loaded program.
    #[wasm_bindgen]
    pub fn reset(&mut self) {
        // The image was accepted by an earlier load, so reloading cannot fail.
        let _ = self.reload();
    }

    /// Check if the last run or step ended in HALT.
    #[wasm_bindgen]
    pub fn is_halted(&self) -> bool {
        self.stopped == Some(StopReason::Halted)
    }

    /// Get cycle count.
    #[wasm_bindgen]
    pub fn cycles(&self) -> u64 {
        self.cpu.cycles
    }

    /// Get program counter.
    #[wasm_bindgen]
    pub fn pc(&self) -> u16 {
        self.cpu.regs.pc
    }

    /// Get accumulator value.
    #[wasm_bindgen]
    pub fn accumulator(&self) -> u8 {
        self.cpu.regs.a
    }

    /// Get flags as `SZ-H-PNC`.
    #[wasm_bindgen]
    pub fn flags(&self) -> String {
        self.cpu.regs.flags_string()
    }

    /// Get memory byte at an address.
    #[wasm_bindgen]
    pub fn memory_at(&self, addr: u16) -> u8 {
        self.cpu.mem.read(addr)
    }

    /// Copy `len` bytes starting at `start` into a typed array.
    #[wasm_bindgen]
    pub fn memory_slice(&self, start: u16, len: usize) -> js_sys::Uint8Array {
        let bytes: Vec<u8> = self.cpu.mem.dump(start, len).into_iter().map(|(_, v)| v).collect();
        js_sys::Uint8Array::from(bytes.as_slice())
    }

    /// Get registers as JSON string.
    #[wasm_bindgen]
    pub fn registers_json(&self) -> Result<String, JsError> {
        serde_json::to_string(&self.cpu.regs).map_err(|e| JsError::new(&format!("{}", e)))
    }

    fn reload(&mut self) -> Result<(), JsError> {
        self.cpu.reset();
        self.stopped = None;
        self.cpu.load_program(&self.program)
            .map_err(|e| JsError::new(&format!("{}", e)))
    }
}

impl Default for WasmCpu {
    fn default() -> Self {
        Self::new()
    }
}

/// Assemble source code and return the image size in bytes.
#[wasm_bindgen]
pub fn wasm_assemble(source: &str) -> Result<usize, JsError> {
    let image = assemble(source)
        .map_err(|e| JsError::new(&format!("{}", e)))?;
    Ok(image.len())
}

/// Disassemble a raw image loaded at `origin` into a listing.
#[wasm_bindgen]
pub fn wasm_disassemble(image: &[u8], origin: u16) -> String {
    disassemble(image, origin)
}
