//! Integration tests for the cycle-budgeted execution loop.

use z80::cpu::registers::FLAG_Z;
use z80::{Cpu, MemoryError, StopReason, MEMORY_SIZE};

#[test]
fn test_add_program_end_to_end() {
    // LD A,5; LD B,3; ADD A,B; HALT
    let mut cpu = Cpu::new();
    cpu.load_program(&[0x3E, 0x05, 0x06, 0x03, 0x80, 0x76]).unwrap();

    let report = cpu.run(1024);

    assert_eq!(cpu.regs.a, 8);
    assert_eq!(cpu.regs.b, 3);
    assert_eq!(report.cycles, 7 + 7 + 4 + 4);
    assert_eq!(report.instructions, 4);
    assert_eq!(report.stop, StopReason::Halted);
    assert!(report.halted_early());
    assert_eq!(cpu.regs.pc, 5, "HALT leaves PC on itself");
}

#[test]
fn test_indexed_program() {
    let program = [
        0xDD, 0x21, 0x00, 0x40, // LD IX,$4000
        0x3E, 0x07, // LD A,7
        0xDD, 0x77, 0x02, // LD (IX+2),A
        0xDD, 0xCB, 0x02, 0x46, // BIT 0,(IX+2)
        0x76, // HALT
    ];
    let mut cpu = Cpu::new();
    cpu.load_program(&program).unwrap();

    let report = cpu.run(1024);

    assert_eq!(cpu.regs.ix, 0x4000);
    assert_eq!(cpu.mem.read(0x4002), 7);
    assert!(!cpu.regs.flag(FLAG_Z));
    assert_eq!(report.cycles, 14 + 7 + 19 + 20 + 4);
    assert_eq!(cpu.regs.pc, 13);
}

#[test]
fn test_budget_exhausted_in_loop() {
    let mut cpu = Cpu::new();
    cpu.load_program(&[0x18, 0xFE]).unwrap();

    let report = cpu.run(100);

    assert_eq!(report.stop, StopReason::BudgetExhausted);
    assert_eq!(report.cycles, 108);
    assert_eq!(report.instructions, 9);
    assert_eq!(cpu.regs.pc, 0);
}

#[test]
fn test_sequential_advance_past_top_of_memory_stops() {
    let mut cpu = Cpu::new();
    cpu.regs.pc = 0xFFFF;

    let report = cpu.run(1024);

    assert_eq!(report.stop, StopReason::AddressOutOfRange);
    assert_eq!(report.cycles, 4);
    assert_eq!(report.instructions, 1);
}

#[test]
fn test_unknown_opcodes_are_skipped_and_counted() {
    // Unknown unprefixed 0x08, unknown CB 0x30 (SLL B), unknown DD CB op, HALT
    let mut cpu = Cpu::new();
    cpu.load_program(&[0x08, 0xCB, 0x30, 0xDD, 0xCB, 0x01, 0x00, 0x76]).unwrap();

    let report = cpu.run(1024);

    assert_eq!(report.unknown_opcodes, 3);
    assert_eq!(report.cycles, 4 * 4);
    assert_eq!(report.stop, StopReason::Halted);
    assert_eq!(cpu.regs.pc, 7);
    assert_eq!(cpu.unknown_opcodes, 3);
}

#[test]
fn test_load_r_keeps_value_until_next_fetch() {
    // LD A,$42; LD R,A; NOP
    let mut cpu = Cpu::new();
    cpu.load_program(&[0x3E, 0x42, 0xED, 0x4F, 0x00]).unwrap();

    cpu.step();
    let step = cpu.step();
    assert_eq!(step.cycles, 9);
    assert_eq!(cpu.regs.r, 0x42);

    cpu.step();
    assert_eq!(cpu.regs.r, 0x43);
}

#[test]
fn test_traced_run_sees_every_step() {
    let mut cpu = Cpu::new();
    cpu.load_program(&[0x3E, 0x05, 0x06, 0x03, 0x80, 0x76]).unwrap();

    let mut seen = Vec::new();
    cpu.run_traced(1024, &mut |step: &z80::cpu::Step, regs: &z80::Registers| {
        seen.push((step.address, regs.a));
    });

    assert_eq!(seen, vec![(0, 5), (2, 5), (4, 8), (5, 8)]);
}

#[test]
fn test_oversized_image_leaves_memory_untouched() {
    let mut cpu = Cpu::new();
    cpu.mem.write(0x0000, 0xAA);

    let image = vec![0x11u8; MEMORY_SIZE + 1];
    let result = cpu.load_program(&image);

    assert!(matches!(result, Err(MemoryError::LoadTooLarge { .. })));
    assert_eq!(cpu.mem.read(0x0000), 0xAA);
    assert_eq!(cpu.mem.read(0xFFFF), 0x00);
}

#[test]
fn test_full_size_image_loads() {
    let mut cpu = Cpu::new();
    let image = vec![0x00u8; MEMORY_SIZE];
    assert!(cpu.load_from_reader(image.as_slice()).is_ok());
}

#[test]
fn test_reset_restores_power_on_state() {
    let mut cpu = Cpu::new();
    cpu.load_program(&[0x3E, 0x05, 0x76]).unwrap();
    cpu.run(1024);

    cpu.reset();

    assert_eq!(cpu.regs, z80::Registers::new());
    assert_eq!(cpu.cycles, 0);
    assert_eq!(cpu.mem.read(0), 0);
}
