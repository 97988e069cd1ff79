//! Assembles and runs the two concrete example programs end to end:
//! source text in, final register/memory state out.

use mos6502::asm;
use mos6502::emulator::Emulator;

#[test]
fn decrement_loop_with_label_runs_to_the_documented_final_state() {
    let source = "\
LDX #$08
decrement:
DEX
STX $0200
CPX #$03
BNE decrement
STX $0201
BRK";

    let image = asm::assemble(source).unwrap();
    assert_eq!(hex::encode(&image.bytes), "a208ca8e0002e003d0f88e01020000");

    // No ABS label references in this program, so relocation to any base
    // leaves every byte untouched.
    assert_eq!(image.relocate(0x0000).unwrap(), image.bytes);
    assert_eq!(image.relocate(0x1234).unwrap(), image.bytes);

    let mut emulator = Emulator::new();
    emulator.mem.write16(0xFFFE, 0x1234);
    let program = image.relocate(0x0600).unwrap();
    emulator.load(0x0600, &program);
    let summary = emulator.run(1_000, |_, _| {}).unwrap();

    assert_eq!(emulator.regs.a, 0);
    assert_eq!(emulator.regs.x, 3);
    assert_eq!(emulator.regs.y, 0);
    assert_eq!(emulator.regs.s, 0xFC);
    assert_eq!(emulator.regs.pc, 0x1234);
    assert_eq!(emulator.regs.p, 0x13);
    assert_eq!(emulator.mem.read8(0x0200), 0x03);
    assert_eq!(emulator.mem.read8(0x0201), 0x03);
    assert!(!summary.step_limit_reached);
}

#[test]
fn forward_declared_label_resolves_to_the_correct_branch_target() {
    let source = "\
LDA #$01
CMP #$02
BNE notequal
STA $22
notequal:
BRK";

    let image = asm::assemble(source).unwrap();
    assert_eq!(hex::encode(&image.bytes), "a901c902d00285220000");
    assert_eq!(image.labels.get("notequal"), Some(&8));
    // The branch is position-independent; nothing here needs relocation.
    assert!(image.relocation_sites.is_empty());

    let mut emulator = Emulator::new();
    let program = image.relocate(0x0600).unwrap();
    emulator.load(0x0600, &program);

    // LDA #$01, CMP #$02, BNE notequal (taken, skipping STA $22).
    for _ in 0..3 {
        emulator.step().unwrap();
    }

    assert_eq!(emulator.regs.a, 1);
    assert_eq!(emulator.regs.x, 0);
    assert_eq!(emulator.regs.y, 0);
    assert_eq!(emulator.regs.s, 0xFF);
    assert_eq!(emulator.regs.pc, 0x0608);
}
