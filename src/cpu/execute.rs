//! CPU execution engine for the Z80.
//!
//! Implements the fetch-decode-execute cycle and all instruction behaviors.

use crate::cpu::alu;
use crate::cpu::decode::{self, Decoded, Instruction, Op, Target};
use crate::cpu::memory::MemoryError;
use crate::cpu::registers::{FLAG_C, FLAG_H, FLAG_N};
use crate::cpu::{Memory, Registers};
use crate::asm::disasm::disassemble_instruction;
use serde::{Serialize, Deserialize};
use std::io::Read;
use std::path::Path;

/// Why a run returned control to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// The cycle budget was used up.
    BudgetExhausted,
    /// A HALT instruction executed.
    Halted,
    /// A sequential advance carried the program counter past 0xFFFF.
    AddressOutOfRange,
}

/// The result of executing one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    /// Address the instruction was fetched from.
    pub address: u16,
    pub instruction: Instruction,
    pub length: u16,
    pub cycles: u32,
    /// Set when this instruction ends the run.
    pub stop: Option<StopReason>,
}

impl Step {
    pub fn is_unknown(&self) -> bool {
        matches!(self.instruction.op, Op::Unknown(..))
    }
}

/// Summary of one [`Cpu::run`] invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    /// Cycles consumed. May exceed the budget by at most one instruction.
    pub cycles: u64,
    pub instructions: u64,
    pub unknown_opcodes: u64,
    pub stop: StopReason,
}

impl RunReport {
    /// True when the run ended on its own rather than by exhausting the budget.
    pub fn halted_early(&self) -> bool {
        self.stop != StopReason::BudgetExhausted
    }
}

/// Observer invoked after every executed instruction.
pub trait Tracer {
    fn on_step(&mut self, step: &Step, regs: &Registers);
}

impl<F: FnMut(&Step, &Registers)> Tracer for F {
    fn on_step(&mut self, step: &Step, regs: &Registers) {
        self(step, regs)
    }
}

/// The Z80 CPU together with its address space.
#[derive(Clone, Serialize, Deserialize)]
pub struct Cpu {
    /// CPU registers.
    pub regs: Registers,
    /// Main memory.
    pub mem: Memory,
    /// Cycles executed since creation or the last reset.
    pub cycles: u64,
    /// Instructions executed since creation or the last reset.
    pub instructions: u64,
    /// Unknown opcodes skipped since creation or the last reset.
    pub unknown_opcodes: u64,
    /// Last executed instruction (for debugging).
    last_instr: Option<Instruction>,
}

impl Cpu {
    /// Create a CPU in its power-on state with zeroed memory.
    pub fn new() -> Self {
        Self {
            regs: Registers::new(),
            mem: Memory::new(),
            cycles: 0,
            instructions: 0,
            unknown_opcodes: 0,
            last_instr: None,
        }
    }

    /// Reset registers, memory and counters to the power-on state.
    pub fn reset(&mut self) {
        self.regs.reset();
        self.mem.clear();
        self.cycles = 0;
        self.instructions = 0;
        self.unknown_opcodes = 0;
        self.last_instr = None;
    }

    /// Load a program image at address 0.
    pub fn load_program(&mut self, program: &[u8]) -> Result<(), MemoryError> {
        self.mem.load_program(0, program)
    }

    /// Load a program image from any byte source at address 0.
    pub fn load_from_reader<R: Read>(&mut self, reader: R) -> Result<usize, MemoryError> {
        self.mem.load_from_reader(reader)
    }

    /// Load a raw binary file at address 0.
    pub fn load_image_file<P: AsRef<Path>>(&mut self, path: P) -> Result<usize, MemoryError> {
        self.mem.load_image_file(path)
    }

    /// Execute a single instruction at PC.
    pub fn step(&mut self) -> Step {
        let address = self.regs.pc;

        // Fetch and decode
        let decoded = decode::decode(&self.mem, address);
        self.regs.bump_refresh();

        // Execute
        let stop = self.execute(&decoded);

        // Update counters
        self.cycles += decoded.cycles as u64;
        self.instructions += 1;
        self.last_instr = Some(decoded.instruction);

        let step = Step {
            address,
            instruction: decoded.instruction,
            length: decoded.length,
            cycles: decoded.cycles,
            stop,
        };

        if let Op::Unknown(prefix, opcode) = decoded.instruction.op {
            self.unknown_opcodes += 1;
            log::warn!("unknown opcode {:02X} ({:?}) at {:04X}", opcode, prefix, address);
        } else {
            log::trace!("{:04X}: {}", address, disassemble_instruction(&decoded.instruction));
        }
        if stop == Some(StopReason::AddressOutOfRange) {
            log::warn!("program counter ran past FFFF after {:04X}", address);
        }

        step
    }

    /// Run until the budget is used up, a HALT executes, or PC runs off the
    /// end of the address space.
    ///
    /// The budget is checked between instructions only, so the returned
    /// cycle count can exceed it by up to one instruction's cost.
    pub fn run(&mut self, budget: u64) -> RunReport {
        self.run_traced(budget, &mut |_: &Step, _: &Registers| {})
    }

    /// Like [`Cpu::run`], invoking `tracer` after every instruction.
    pub fn run_traced(&mut self, budget: u64, tracer: &mut dyn Tracer) -> RunReport {
        let mut report = RunReport {
            cycles: 0,
            instructions: 0,
            unknown_opcodes: 0,
            stop: StopReason::BudgetExhausted,
        };

        while report.cycles < budget {
            let step = self.step();
            report.cycles += step.cycles as u64;
            report.instructions += 1;
            if step.is_unknown() {
                report.unknown_opcodes += 1;
            }
            tracer.on_step(&step, &self.regs);

            if let Some(stop) = step.stop {
                report.stop = stop;
                break;
            }
        }

        log::debug!(
            "ran {} cycles ({} instructions, {} unknown): {:?}",
            report.cycles, report.instructions, report.unknown_opcodes, report.stop
        );
        report
    }

    /// Apply a decoded instruction. PC still points at its first byte.
    fn execute(&mut self, decoded: &Decoded) -> Option<StopReason> {
        let operand = decoded.instruction.operand;
        let mut jump = None;

        match decoded.instruction.op {
            // ==================== Loads ====================

            Op::LdImm(reg) => self.regs.set(reg, operand.byte()),

            Op::LdPairImm(pair) => self.regs.set_pair(pair, operand.word()),

            Op::StoreA(pair) => {
                let addr = self.regs.pair(pair);
                self.mem.write(addr, self.regs.a);
            }

            Op::StoreHl(reg) => {
                let value = self.regs.get(reg);
                self.mem.write(self.regs.hl(), value);
            }

            Op::LdIA => self.regs.i = self.regs.a,

            Op::LdRA => self.regs.r = self.regs.a,

            // ==================== Arithmetic ====================

            Op::Add(reg) => {
                let (result, flags) = alu::add8(self.regs.a, self.regs.get(reg));
                self.regs.a = result;
                self.regs.f = flags;
            }

            Op::Sub(reg) => {
                let (result, flags) = alu::sub8(self.regs.a, self.regs.get(reg));
                self.regs.a = result;
                self.regs.f = flags;
            }

            Op::AdcHl(pair) => {
                let (result, flags) =
                    alu::adc16(self.regs.hl(), self.regs.pair(pair), self.regs.flag(FLAG_C));
                self.regs.set_hl(result);
                self.regs.f = flags;
            }

            Op::SbcHl(pair) => {
                let (result, flags) =
                    alu::sbc16(self.regs.hl(), self.regs.pair(pair), self.regs.flag(FLAG_C));
                self.regs.set_hl(result);
                self.regs.f = flags;
            }

            Op::Scf => {
                self.regs.f = (self.regs.f & !(FLAG_H | FLAG_N)) | FLAG_C;
            }

            // ==================== Rotate / Bit ====================

            Op::Shift(op, target) => {
                let value = self.read_target(target);
                let (result, flags) = alu::shift(op, value, self.regs.flag(FLAG_C));
                self.write_target(target, result);
                self.regs.f = flags;
            }

            Op::Bit(bit, target) => {
                let value = self.read_target(target);
                self.regs.set_bit_flags(value, bit);
            }

            // ==================== Index ====================

            Op::LdIndexImm(reg) => self.regs.set_index(reg, operand.word()),

            Op::StoreIndexed(reg) => {
                let addr = self.regs.indexed_address(reg, operand.offset());
                self.mem.write(addr, self.regs.a);
            }

            Op::SubIndexed(reg) => {
                let addr = self.regs.indexed_address(reg, operand.offset());
                let (result, flags) = alu::sub8(self.regs.a, self.mem.read(addr));
                self.regs.a = result;
                self.regs.f = flags;
            }

            Op::BitIndexed(reg, bit) => {
                let addr = self.regs.indexed_address(reg, operand.offset());
                let value = self.mem.read(addr);
                self.regs.set_bit_flags(value, bit);
            }

            // ==================== Control Flow ====================

            Op::Jp => jump = Some(operand.word()),

            Op::Jr => {
                let next = self.regs.pc.wrapping_add(decoded.length);
                jump = Some(next.wrapping_add(operand.offset() as i16 as u16));
            }

            Op::Call => {
                let ret = self.regs.pc.wrapping_add(decoded.length);
                self.push(ret);
                jump = Some(operand.word());
            }

            Op::Ret => jump = Some(self.pop()),

            // PC stays on the HALT; the caller decides whether to resume.
            Op::Halt => return Some(StopReason::Halted),

            // ==================== Special ====================

            Op::Nop | Op::Unknown(..) => {}
        }

        match jump {
            Some(target) => {
                self.regs.pc = target;
                None
            }
            None => self.advance(decoded.length),
        }
    }

    /// Move PC past the current instruction, reporting a carry past 0xFFFF.
    fn advance(&mut self, length: u16) -> Option<StopReason> {
        let next = self.regs.pc as u32 + length as u32;
        self.regs.pc = (next & 0xFFFF) as u16;
        if next > 0xFFFF {
            Some(StopReason::AddressOutOfRange)
        } else {
            None
        }
    }

    fn read_target(&self, target: Target) -> u8 {
        match target {
            Target::Reg(reg) => self.regs.get(reg),
            Target::IndirectHl => self.mem.read(self.regs.hl()),
        }
    }

    fn write_target(&mut self, target: Target, value: u8) {
        match target {
            Target::Reg(reg) => self.regs.set(reg, value),
            Target::IndirectHl => self.mem.write(self.regs.hl(), value),
        }
    }

    /// Push a word: high byte first, so the low byte ends up at SP.
    fn push(&mut self, value: u16) {
        let [hi, lo] = value.to_be_bytes();
        self.regs.sp = self.regs.sp.wrapping_sub(1);
        self.mem.write(self.regs.sp, hi);
        self.regs.sp = self.regs.sp.wrapping_sub(1);
        self.mem.write(self.regs.sp, lo);
    }

    /// Pop a word: low byte first.
    fn pop(&mut self) -> u16 {
        let lo = self.mem.read(self.regs.sp);
        self.regs.sp = self.regs.sp.wrapping_add(1);
        let hi = self.mem.read(self.regs.sp);
        self.regs.sp = self.regs.sp.wrapping_add(1);
        u16::from_be_bytes([hi, lo])
    }

    /// Get the last executed instruction.
    pub fn last_instruction(&self) -> Option<Instruction> {
        self.last_instr
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Cpu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cpu")
            .field("cycles", &self.cycles)
            .field("instructions", &self.instructions)
            .field("regs", &self.regs)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::registers::{IndexReg, FLAG_S, FLAG_Z};

    fn cpu_with(program: &[u8]) -> Cpu {
        let mut cpu = Cpu::new();
        cpu.load_program(program).unwrap();
        cpu
    }

    #[test]
    fn test_cpu_halt() {
        let mut cpu = cpu_with(&[0x76]);

        let report = cpu.run(1024);

        assert_eq!(report.cycles, 4);
        assert_eq!(report.stop, StopReason::Halted);
        assert_eq!(cpu.regs.pc, 0);
    }

    #[test]
    fn test_cpu_nop_then_halt() {
        let mut cpu = cpu_with(&[0x00, 0x00, 0x00, 0x76]);

        let report = cpu.run(1024);

        assert_eq!(report.instructions, 4);
        assert_eq!(report.cycles, 16);
        assert_eq!(cpu.regs.pc, 3);
    }

    #[test]
    fn test_load_add_halt() {
        let mut cpu = cpu_with(&[0x3E, 0x05, 0x06, 0x03, 0x80, 0x76]);

        let report = cpu.run(26);

        assert_eq!(cpu.regs.a, 8);
        assert_eq!(cpu.regs.f & (FLAG_Z | FLAG_S), 0);
        // LD A,n + LD B,n + ADD A,B + HALT
        assert_eq!(report.cycles, 7 + 7 + 4 + 4);
        assert_eq!(report.stop, StopReason::Halted);
    }

    #[test]
    fn test_budget_checked_between_instructions() {
        // LD BC,nn ; LD DE,nn: 10 + 10 cycles against a budget of 11.
        let mut cpu = cpu_with(&[0x01, 0x34, 0x12, 0x11, 0x78, 0x56, 0x76]);

        let report = cpu.run(11);

        assert_eq!(report.cycles, 20);
        assert_eq!(report.stop, StopReason::BudgetExhausted);
        assert!(!report.halted_early());
        assert_eq!(cpu.regs.bc(), 0x1234);
        assert_eq!(cpu.regs.de(), 0x5678);
    }

    #[test]
    fn test_zero_budget_runs_nothing() {
        let mut cpu = cpu_with(&[0x76]);
        let report = cpu.run(0);
        assert_eq!(report.cycles, 0);
        assert_eq!(report.instructions, 0);
    }

    #[test]
    fn test_store_indirect() {
        let mut cpu = cpu_with(&[0x3E, 0x99, 0x01, 0x00, 0x40, 0x02, 0x76]);
        cpu.run(100);
        assert_eq!(cpu.mem.read(0x4000), 0x99);
    }

    #[test]
    fn test_call_ret() {
        // 0000: LD SP,8000 ; CALL 0010 ; HALT
        // 0010: RET
        let mut cpu = cpu_with(&[0x31, 0x00, 0x80, 0xCD, 0x10, 0x00, 0x76]);
        cpu.mem.write(0x0010, 0xC9);

        cpu.step();
        let call = cpu.step();
        assert_eq!(call.cycles, 17);
        assert_eq!(cpu.regs.pc, 0x0010);
        assert_eq!(cpu.regs.sp, 0x7FFE);
        assert_eq!(cpu.mem.read(0x7FFE), 0x06);
        assert_eq!(cpu.mem.read(0x7FFF), 0x00);

        let ret = cpu.step();
        assert_eq!(ret.cycles, 10);
        assert_eq!(cpu.regs.pc, 0x0006);
        assert_eq!(cpu.regs.sp, 0x8000);
    }

    #[test]
    fn test_call_with_zero_stack_pointer_wraps() {
        let mut cpu = cpu_with(&[0xCD, 0x00, 0x20]);
        cpu.step();
        assert_eq!(cpu.regs.sp, 0xFFFE);
        assert_eq!(cpu.mem.read_word(0xFFFE), 0x0003);
    }

    #[test]
    fn test_jump_absolute() {
        let mut cpu = cpu_with(&[0xC3, 0x34, 0x12]);
        let step = cpu.step();
        assert_eq!(step.cycles, 10);
        assert_eq!(cpu.regs.pc, 0x1234);
    }

    #[test]
    fn test_jump_relative() {
        let mut cpu = Cpu::new();
        cpu.regs.pc = 0x0100;
        cpu.mem.load_program(0x0100, &[0x18, 0x05]).unwrap();
        let step = cpu.step();
        assert_eq!(step.cycles, 12);
        assert_eq!(cpu.regs.pc, 0x0107);

        cpu.regs.pc = 0x0100;
        cpu.mem.write(0x0101, (-5i8) as u8);
        cpu.step();
        assert_eq!(cpu.regs.pc, 0x00FD);
    }

    #[test]
    fn test_jump_relative_wraps() {
        let mut cpu = cpu_with(&[0x18, (-5i8) as u8]);
        let step = cpu.step();
        assert_eq!(cpu.regs.pc, 0xFFFD);
        assert_eq!(step.stop, None);
    }

    #[test]
    fn test_unknown_opcode_continues() {
        let mut cpu = cpu_with(&[0xFF, 0x76]);
        let before = cpu.regs.clone();

        let step = cpu.step();

        assert!(step.is_unknown());
        assert_eq!(step.cycles, 4);
        assert_eq!(cpu.regs.pc, 1);
        assert_eq!(cpu.unknown_opcodes, 1);
        let mut after = cpu.regs.clone();
        after.pc = before.pc;
        after.r = before.r;
        assert_eq!(after, before);

        let report = cpu.run(100);
        assert_eq!(report.stop, StopReason::Halted);
    }

    #[test]
    fn test_unknown_prefixed_opcodes_skip_whole_sequence() {
        let mut cpu = cpu_with(&[0xED, 0x00, 0xDD, 0xCB, 0x00, 0x00, 0xCB, 0x30, 0x76]);
        let report = cpu.run(100);
        assert_eq!(report.unknown_opcodes, 3);
        assert_eq!(report.cycles, 4 * 4);
        assert_eq!(cpu.regs.pc, 8);
    }

    #[test]
    fn test_sequential_advance_past_end_stops() {
        let mut cpu = Cpu::new();
        cpu.regs.pc = 0xFFFF;

        let report = cpu.run(1024);

        assert_eq!(report.stop, StopReason::AddressOutOfRange);
        assert_eq!(report.cycles, 4);
        assert!(report.halted_early());
    }

    #[test]
    fn test_scf() {
        let mut cpu = cpu_with(&[0x37]);
        cpu.regs.f = FLAG_S | FLAG_Z | FLAG_H | FLAG_N;
        cpu.step();
        assert_eq!(cpu.regs.f, FLAG_S | FLAG_Z | FLAG_C);
    }

    #[test]
    fn test_sub_sets_borrow() {
        let mut cpu = cpu_with(&[0x3E, 0x03, 0x06, 0x05, 0x90]);
        cpu.run(15);
        assert_eq!(cpu.regs.a, 0xFE);
        assert_eq!(cpu.regs.f & (FLAG_C | FLAG_N | FLAG_S), FLAG_C | FLAG_N | FLAG_S);
    }

    #[test]
    fn test_refresh_and_ld_r() {
        let mut cpu = cpu_with(&[0x00, 0x3E, 0x80, 0xED, 0x4F, 0x00]);
        cpu.step();
        assert_eq!(cpu.regs.r, 2);
        cpu.step();
        cpu.step();
        assert_eq!(cpu.regs.r, 0x80);
        cpu.step();
        assert_eq!(cpu.regs.r, 0x01);
    }

    #[test]
    fn test_rotate_memory_operand() {
        // LD HL,4000 ; RLC (HL)
        let mut cpu = cpu_with(&[0x21, 0x00, 0x40, 0xCB, 0x06]);
        cpu.mem.write(0x4000, 0x81);
        cpu.step();
        let step = cpu.step();
        assert_eq!(step.cycles, 12);
        assert_eq!(cpu.mem.read(0x4000), 0x03);
        assert!(cpu.regs.flag(FLAG_C));
    }

    #[test]
    fn test_rotate_through_carry_uses_flag() {
        let mut cpu = cpu_with(&[0x37, 0xCB, 0x10]);
        cpu.regs.b = 0x00;
        cpu.run(12);
        assert_eq!(cpu.regs.b, 0x01);
        assert!(!cpu.regs.flag(FLAG_C));
        assert!(!cpu.regs.flag(FLAG_Z));
    }

    #[test]
    fn test_bit_test_register_and_memory() {
        let mut cpu = cpu_with(&[0xCB, 0x6F, 0x21, 0x00, 0x40, 0xCB, 0x6E]);
        cpu.regs.a = 0x20;
        cpu.step();
        assert!(!cpu.regs.flag(FLAG_Z));
        assert!(cpu.regs.flag(FLAG_H));

        cpu.step();
        let step = cpu.step();
        assert_eq!(step.cycles, 12);
        assert!(cpu.regs.flag(FLAG_Z));
    }

    #[test]
    fn test_adc_and_sbc_hl() {
        // LD HL,1000 ; LD DE,0FFF ; SCF ; ADC HL,DE ; LD BC,0001 ; SBC HL,BC
        let mut cpu = cpu_with(&[
            0x21, 0x00, 0x10, 0x11, 0xFF, 0x0F, 0x37, 0xED, 0x5A, 0x01, 0x01, 0x00, 0xED, 0x42,
        ]);
        cpu.run(10 + 10 + 4 + 15);
        assert_eq!(cpu.regs.hl(), 0x2000);
        assert!(!cpu.regs.flag(FLAG_C));

        cpu.run(10 + 15);
        assert_eq!(cpu.regs.hl(), 0x1FFF);
        assert!(cpu.regs.flag(FLAG_N));
    }

    #[test]
    fn test_index_register_operations() {
        // LD IX,4000 ; LD A,10 ; LD (IX+2),A ; LD IY,4004 ; SUB (IY-2)
        let mut cpu = cpu_with(&[
            0xDD, 0x21, 0x00, 0x40, 0x3E, 0x10, 0xDD, 0x77, 0x02, 0xFD, 0x21, 0x04, 0x40, 0xFD,
            0x96, 0xFE, 0x76,
        ]);

        let report = cpu.run(1024);

        assert_eq!(report.cycles, 14 + 7 + 19 + 14 + 19 + 4);
        assert_eq!(cpu.regs.ix, 0x4000);
        assert_eq!(cpu.regs.iy, 0x4004);
        assert_eq!(cpu.mem.read(0x4002), 0x10);
        assert_eq!(cpu.regs.a, 0);
        assert!(cpu.regs.flag(FLAG_Z));
        assert!(cpu.regs.flag(FLAG_N));
    }

    #[test]
    fn test_index_bit_test() {
        let mut cpu = cpu_with(&[0xFD, 0xCB, 0xFF, 0x7E, 0x76]);
        cpu.regs.set_index(IndexReg::IY, 0x4001);
        cpu.mem.write(0x4000, 0x80);

        let step = cpu.step();

        assert_eq!(step.cycles, 20);
        assert_eq!(step.length, 4);
        assert_eq!(cpu.regs.pc, 4);
        assert!(cpu.regs.flag(FLAG_S));
        assert!(!cpu.regs.flag(FLAG_Z));
    }

    #[test]
    fn test_tracer_sees_every_instruction() {
        let mut cpu = cpu_with(&[0x00, 0x3E, 0x01, 0x76]);
        let mut seen = Vec::new();

        cpu.run_traced(1024, &mut |step: &Step, regs: &Registers| {
            seen.push((step.address, regs.a));
        });

        assert_eq!(seen, vec![(0, 0), (1, 1), (3, 1)]);
    }

    #[test]
    fn test_reset() {
        let mut cpu = cpu_with(&[0x3E, 0x42]);
        cpu.run(7);
        cpu.reset();
        assert_eq!(cpu.regs, Registers::new());
        assert_eq!(cpu.mem.read(0), 0);
        assert_eq!(cpu.cycles, 0);
        assert_eq!(cpu.last_instruction(), None);
    }

    #[test]
    fn test_restored_cpu_must_carry_full_memory() {
        let mut cpu = cpu_with(&[0x3E, 0x42, 0x76]);
        cpu.run(1024);

        let snapshot = serde_json::to_value(&cpu).unwrap();
        let restored: Cpu = serde_json::from_value(snapshot.clone()).unwrap();
        assert_eq!(restored.regs, cpu.regs);
        assert_eq!(restored.mem.read(0), 0x3E);

        let mut truncated = snapshot;
        truncated["mem"] = serde_json::json!([0]);
        assert!(serde_json::from_value::<Cpu>(truncated).is_err());
    }
}
