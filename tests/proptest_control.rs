//! Property-based tests for control flow and the stack.

use proptest::prelude::*;
use z80::cpu::decode::{lookup, Prefix};
use z80::{Cpu, StopReason};

proptest! {
    /// Property: CALL then RET returns to the byte after the CALL and restores SP
    #[test]
    fn prop_call_ret_round_trip(target in 0x1000u16..0x8000u16, sp in 0x9000u16..=0xFFFFu16) {
        let mut cpu = Cpu::new();
        let [lo, hi] = target.to_le_bytes();
        cpu.load_program(&[0xCD, lo, hi]).unwrap();
        cpu.mem.write(target, 0xC9);
        cpu.regs.sp = sp;

        let call = cpu.step();
        prop_assert_eq!(call.cycles, 17);
        prop_assert_eq!(cpu.regs.pc, target);
        prop_assert_eq!(cpu.regs.sp, sp - 2);
        // Low byte of the return address sits at SP, high byte above it
        prop_assert_eq!(cpu.mem.read(sp - 2), 0x03);
        prop_assert_eq!(cpu.mem.read(sp - 1), 0x00);

        let ret = cpu.step();
        prop_assert_eq!(ret.cycles, 10);
        prop_assert_eq!(cpu.regs.pc, 0x0003);
        prop_assert_eq!(cpu.regs.sp, sp);
    }

    /// Property: the round trip also holds with the stack at the bottom of memory
    #[test]
    fn prop_call_ret_round_trip_low_stack(sp in 2u16..0x1000u16, target in 0x1000u16..0x8000u16) {
        let mut cpu = Cpu::new();
        let [lo, hi] = target.to_le_bytes();
        cpu.mem.load_program(0x8000, &[0xCD, lo, hi]).unwrap();
        cpu.mem.write(target, 0xC9);
        cpu.regs.pc = 0x8000;
        cpu.regs.sp = sp;

        cpu.step();
        prop_assert_eq!(cpu.regs.pc, target);
        prop_assert_eq!(cpu.regs.sp, sp - 2);
        prop_assert_eq!(cpu.mem.read(sp - 2), 0x03);
        prop_assert_eq!(cpu.mem.read(sp - 1), 0x80);

        cpu.step();
        prop_assert_eq!(cpu.regs.pc, 0x8003);
        prop_assert_eq!(cpu.regs.sp, sp);
    }

    /// Property: JR lands at PC + 2 + offset, wrapping across the address space
    #[test]
    fn prop_jr_offset(start in any::<u16>(), offset in any::<i8>()) {
        prop_assume!(start <= 0xFFFD);
        let mut cpu = Cpu::new();
        cpu.mem.write(start, 0x18);
        cpu.mem.write(start + 1, offset as u8);
        cpu.regs.pc = start;

        let step = cpu.step();
        let expected = start.wrapping_add(2).wrapping_add(offset as i16 as u16);
        prop_assert_eq!(cpu.regs.pc, expected);
        prop_assert_eq!(step.cycles, 12);
        prop_assert_eq!(step.stop, None);
    }

    /// Property: JP reaches any absolute address
    #[test]
    fn prop_jp_absolute(target in any::<u16>()) {
        let mut cpu = Cpu::new();
        let [lo, hi] = target.to_le_bytes();
        cpu.load_program(&[0xC3, lo, hi]).unwrap();
        cpu.step();
        prop_assert_eq!(cpu.regs.pc, target);
    }

    /// Property: an undefined ED opcode costs 4 cycles and skips both bytes
    #[test]
    fn prop_unknown_ed_continues(opcode in any::<u8>()) {
        prop_assume!(lookup(Prefix::Ed, opcode).is_none());
        let mut cpu = Cpu::new();
        cpu.load_program(&[0xED, opcode, 0x76]).unwrap();

        let report = cpu.run(1024);
        prop_assert_eq!(report.unknown_opcodes, 1);
        prop_assert_eq!(report.cycles, 4 + 4);
        prop_assert_eq!(report.stop, StopReason::Halted);
        prop_assert_eq!(cpu.regs.pc, 2);
    }

    /// Property: R counts fetched instructions modulo 128
    #[test]
    fn prop_refresh_counts_fetches(nops in 1usize..400) {
        let mut cpu = Cpu::new();
        for _ in 0..nops {
            cpu.step();
        }
        prop_assert_eq!(cpu.regs.r as usize, (1 + nops) & 0x7F);
        prop_assert_eq!(cpu.cycles, 4 * nops as u64);
    }

    /// Property: the budget is only checked between instructions
    #[test]
    fn prop_budget_overshoots_by_less_than_one_instruction(budget in 1u64..5000) {
        let mut cpu = Cpu::new();
        // JR -2: a 12-cycle spin on itself
        cpu.load_program(&[0x18, 0xFE]).unwrap();

        let report = cpu.run(budget);
        prop_assert_eq!(report.stop, StopReason::BudgetExhausted);
        prop_assert!(report.cycles >= budget);
        prop_assert!(report.cycles < budget + 12);
        prop_assert_eq!(report.cycles % 12, 0);
    }
}
