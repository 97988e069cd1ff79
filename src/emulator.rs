//! Cycle-counting instruction-set emulator. Fetches an opcode at PC, decodes
//! its operand per the addressing mode the opcode table reports, executes
//! the instruction's effect on registers/memory/flags, and returns the
//! number of cycles consumed.

use crate::error::RuntimeError;
use crate::memory::Memory;
use crate::opcodes::{self, AddressMode};
use crate::registers::{Registers, StatusFlag};

/// What an addressing mode resolves to: a bare register (accumulator mode)
/// or a 16-bit effective address.
enum Operand {
    Register,
    Address(u16),
}

fn page_crossed(base: u16, effective: u16) -> bool {
    (base & 0xFF00) != (effective & 0xFF00)
}

/// The outcome of a single `step`: enough for a caller to print a trace line
/// or just keep a running cycle total.
#[derive(Debug, Clone)]
pub struct StepResult {
    pub pc_before: u16,
    pub opcode: u8,
    pub mnemonic: &'static str,
    pub mode: AddressMode,
    pub cycles: u8,
    /// Set once BRK has executed and the B flag is observed; the run loop
    /// should stop after a step reporting this.
    pub halted: bool,
}

/// Summary returned by `run`: how many steps executed and the cycle total.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunSummary {
    pub steps: u64,
    pub total_cycles: u64,
    /// True if the run stopped because `max_steps` was reached without a
    /// halt condition (an escape hatch against runaway programs).
    pub step_limit_reached: bool,
}

pub struct Emulator {
    pub regs: Registers,
    pub mem: Memory,
}

impl Emulator {
    pub fn new() -> Emulator {
        Emulator { regs: Registers::new(), mem: Memory::new() }
    }

    /// Copies `bytes` into memory at `addr` and sets PC to `addr`.
    pub fn load(&mut self, addr: u16, bytes: &[u8]) {
        self.mem.load(addr, bytes);
        self.regs.pc = addr;
    }

    fn next_u8(&mut self) -> u8 {
        let value = self.mem.read8(self.regs.pc);
        self.regs.pc = self.regs.pc.wrapping_add(1);
        value
    }

    fn next_u16(&mut self) -> u16 {
        let value = self.mem.read16(self.regs.pc);
        self.regs.pc = self.regs.pc.wrapping_add(2);
        value
    }

    /// Fetches the indirect pointer for JMP (IND), reproducing the 6502's
    /// page-boundary fetch bug: when the pointer's low byte is 0xFF, the
    /// high byte is read from the start of the same page rather than the
    /// next page.
    fn read16_indirect(&self, ptr: u16) -> u16 {
        let lo = self.mem.read8(ptr);
        let hi_addr = if ptr & 0x00FF == 0x00FF { ptr & 0xFF00 } else { ptr.wrapping_add(1) };
        let hi = self.mem.read8(hi_addr);
        u16::from_le_bytes([lo, hi])
    }

    /// Resolves an addressing mode to an effective address or the
    /// accumulator, advancing PC past the operand bytes. Returns whether
    /// the effective-address computation crossed a page boundary.
    fn resolve(&mut self, mode: AddressMode) -> (Operand, bool) {
        use AddressMode::*;
        match mode {
            Acc => (Operand::Register, false),
            Imm => {
                let addr = self.regs.pc;
                self.regs.pc = self.regs.pc.wrapping_add(1);
                (Operand::Address(addr), false)
            }
            Zp => (Operand::Address(self.next_u8() as u16), false),
            Zpx => (Operand::Address(self.next_u8().wrapping_add(self.regs.x) as u16), false),
            Zpy => (Operand::Address(self.next_u8().wrapping_add(self.regs.y) as u16), false),
            Abs => (Operand::Address(self.next_u16()), false),
            Absx => {
                let base = self.next_u16();
                let addr = base.wrapping_add(self.regs.x as u16);
                (Operand::Address(addr), page_crossed(base, addr))
            }
            Absy => {
                let base = self.next_u16();
                let addr = base.wrapping_add(self.regs.y as u16);
                (Operand::Address(addr), page_crossed(base, addr))
            }
            Ind => {
                let ptr = self.next_u16();
                (Operand::Address(self.read16_indirect(ptr)), false)
            }
            Indx => {
                let zp = self.next_u8().wrapping_add(self.regs.x);
                (Operand::Address(self.mem.read16(zp as u16)), false)
            }
            Indy => {
                let zp = self.next_u8();
                let base = self.mem.read16(zp as u16);
                let addr = base.wrapping_add(self.regs.y as u16);
                (Operand::Address(addr), page_crossed(base, addr))
            }
            Rel => {
                let offset = self.next_u8() as i8;
                let base = self.regs.pc;
                let target = base.wrapping_add(offset as u16);
                (Operand::Address(target), page_crossed(base, target))
            }
            Imp => unreachable!("implied mode has no operand to resolve"),
        }
    }

    fn read_value(&mut self, mode: AddressMode) -> (u8, bool) {
        let (operand, crossed) = self.resolve(mode);
        let value = match operand {
            Operand::Register => self.regs.a,
            Operand::Address(addr) => self.mem.read8(addr),
        };
        (value, crossed)
    }

    fn push8(&mut self, value: u8) {
        let addr = 0x0100u16 + self.regs.s as u16;
        self.mem.write8(addr, value);
        self.regs.s = self.regs.s.wrapping_sub(1);
    }

    fn pop8(&mut self) -> u8 {
        self.regs.s = self.regs.s.wrapping_add(1);
        let addr = 0x0100u16 + self.regs.s as u16;
        self.mem.read8(addr)
    }

    /// Pushes high byte first, then low, so that `pop16` restores low then
    /// high.
    fn push16(&mut self, value: u16) {
        let [lo, hi] = value.to_le_bytes();
        self.push8(hi);
        self.push8(lo);
    }

    fn pop16(&mut self) -> u16 {
        let lo = self.pop8();
        let hi = self.pop8();
        u16::from_le_bytes([lo, hi])
    }

    fn i_adc(&mut self, value: u8) -> Result<(), RuntimeError> {
        if self.regs.flag(StatusFlag::Decimal) {
            return Err(RuntimeError::DecimalModeUnimplemented { pc: self.regs.pc });
        }
        let carry_in: u16 = if self.regs.flag(StatusFlag::Carry) { 1 } else { 0 };
        let a = self.regs.a;
        let sum = a as u16 + value as u16 + carry_in;
        let result = (sum & 0xFF) as u8;
        let overflow = (!(a ^ value) & (a ^ result) & 0x80) != 0;
        self.regs.a = result;
        self.regs.set_zero_and_negative(result);
        self.regs.set_flag(StatusFlag::Carry, sum > 0xFF);
        self.regs.set_flag(StatusFlag::Overflow, overflow);
        Ok(())
    }

    fn i_sbc(&mut self, value: u8) -> Result<(), RuntimeError> {
        if self.regs.flag(StatusFlag::Decimal) {
            return Err(RuntimeError::DecimalModeUnimplemented { pc: self.regs.pc });
        }
        let carry_in: u16 = if self.regs.flag(StatusFlag::Carry) { 1 } else { 0 };
        let a = self.regs.a;
        let inverted = !value;
        let sum = a as u16 + inverted as u16 + carry_in;
        let result = (sum & 0xFF) as u8;
        let overflow = (!(a ^ inverted) & (a ^ result) & 0x80) != 0;
        self.regs.a = result;
        self.regs.set_zero_and_negative(result);
        self.regs.set_flag(StatusFlag::Carry, sum > 0xFF);
        self.regs.set_flag(StatusFlag::Overflow, overflow);
        Ok(())
    }

    fn compare(&mut self, register: u8, value: u8) {
        let diff = register.wrapping_sub(value);
        self.regs.set_zero_and_negative(diff);
        self.regs.set_flag(StatusFlag::Carry, register >= value);
    }

    fn i_bit(&mut self, value: u8) {
        let test = self.regs.a & value;
        self.regs.set_flag(StatusFlag::Zero, test == 0);
        self.regs.set_flag(StatusFlag::Negative, value & 0x80 != 0);
        self.regs.set_flag(StatusFlag::Overflow, value & 0x40 != 0);
    }

    fn i_asl(&mut self, value: u8) -> u8 {
        let result = value << 1;
        self.regs.set_flag(StatusFlag::Carry, value & 0x80 != 0);
        self.regs.set_zero_and_negative(result);
        result
    }

    fn i_lsr(&mut self, value: u8) -> u8 {
        let result = value >> 1;
        self.regs.set_flag(StatusFlag::Carry, value & 0x01 != 0);
        self.regs.set_zero_and_negative(result);
        result
    }

    fn i_rol(&mut self, value: u8) -> u8 {
        let carry_in: u8 = if self.regs.flag(StatusFlag::Carry) { 1 } else { 0 };
        let result = (value << 1) | carry_in;
        self.regs.set_flag(StatusFlag::Carry, value & 0x80 != 0);
        self.regs.set_zero_and_negative(result);
        result
    }

    fn i_ror(&mut self, value: u8) -> u8 {
        let carry_in: u8 = if self.regs.flag(StatusFlag::Carry) { 0x80 } else { 0 };
        let result = (value >> 1) | carry_in;
        self.regs.set_flag(StatusFlag::Carry, value & 0x01 != 0);
        self.regs.set_zero_and_negative(result);
        result
    }

    fn rmw<F: FnOnce(&mut Self, u8) -> u8>(&mut self, mode: AddressMode, f: F) {
        let (operand, _) = self.resolve(mode);
        match operand {
            Operand::Register => {
                let result = f(self, self.regs.a);
                self.regs.a = result;
            }
            Operand::Address(addr) => {
                let value = self.mem.read8(addr);
                let result = f(self, value);
                self.mem.write8(addr, result);
            }
        }
    }

    /// Executes one instruction. Returns the cycles consumed (base cycles
    /// from the opcode table plus page-cross/branch-taken adjustments), or
    /// a `RuntimeError` on an illegal opcode or unimplemented BCD path.
    pub fn step(&mut self) -> Result<StepResult, RuntimeError> {
        use StatusFlag::*;

        let pc_before = self.regs.pc;
        let opcode = self.next_u8();
        let info = opcodes::lookup(opcode)
            .ok_or(RuntimeError::IllegalOpcode { opcode, pc: pc_before })?;
        let mode = info.mode;
        let mnemonic = info.mnemonic;
        let mut extra_cycles: u8 = 0;
        let mut halted = false;

        macro_rules! page_bonus {
            ($crossed:expr) => {
                if opcodes::incurs_page_cross_penalty(mnemonic) && $crossed {
                    extra_cycles += 1;
                }
            };
        }

        match mnemonic {
            "LDA" => {
                let (v, crossed) = self.read_value(mode);
                self.regs.a = v;
                self.regs.set_zero_and_negative(v);
                page_bonus!(crossed);
            }
            "LDX" => {
                let (v, crossed) = self.read_value(mode);
                self.regs.x = v;
                self.regs.set_zero_and_negative(v);
                page_bonus!(crossed);
            }
            "LDY" => {
                let (v, crossed) = self.read_value(mode);
                self.regs.y = v;
                self.regs.set_zero_and_negative(v);
                page_bonus!(crossed);
            }
            "STA" => {
                let (operand, _) = self.resolve(mode);
                if let Operand::Address(addr) = operand {
                    self.mem.write8(addr, self.regs.a);
                }
            }
            "STX" => {
                let (operand, _) = self.resolve(mode);
                if let Operand::Address(addr) = operand {
                    self.mem.write8(addr, self.regs.x);
                }
            }
            "STY" => {
                let (operand, _) = self.resolve(mode);
                if let Operand::Address(addr) = operand {
                    self.mem.write8(addr, self.regs.y);
                }
            }
            "ADC" => {
                let (v, crossed) = self.read_value(mode);
                self.i_adc(v)?;
                page_bonus!(crossed);
            }
            "SBC" => {
                let (v, crossed) = self.read_value(mode);
                self.i_sbc(v)?;
                page_bonus!(crossed);
            }
            "AND" => {
                let (v, crossed) = self.read_value(mode);
                self.regs.a &= v;
                self.regs.set_zero_and_negative(self.regs.a);
                page_bonus!(crossed);
            }
            "ORA" => {
                let (v, crossed) = self.read_value(mode);
                self.regs.a |= v;
                self.regs.set_zero_and_negative(self.regs.a);
                page_bonus!(crossed);
            }
            "EOR" => {
                let (v, crossed) = self.read_value(mode);
                self.regs.a ^= v;
                self.regs.set_zero_and_negative(self.regs.a);
                page_bonus!(crossed);
            }
            "CMP" => {
                let (v, crossed) = self.read_value(mode);
                self.compare(self.regs.a, v);
                page_bonus!(crossed);
            }
            "CPX" => {
                let (v, crossed) = self.read_value(mode);
                self.compare(self.regs.x, v);
                page_bonus!(crossed);
            }
            "CPY" => {
                let (v, crossed) = self.read_value(mode);
                self.compare(self.regs.y, v);
                page_bonus!(crossed);
            }
            "BIT" => {
                let (v, crossed) = self.read_value(mode);
                self.i_bit(v);
                page_bonus!(crossed);
            }
            "ASL" => self.rmw(mode, Self::i_asl),
            "LSR" => self.rmw(mode, Self::i_lsr),
            "ROL" => self.rmw(mode, Self::i_rol),
            "ROR" => self.rmw(mode, Self::i_ror),
            "INC" => {
                let (operand, _) = self.resolve(mode);
                if let Operand::Address(addr) = operand {
                    let v = self.mem.read8(addr).wrapping_add(1);
                    self.mem.write8(addr, v);
                    self.regs.set_zero_and_negative(v);
                }
            }
            "DEC" => {
                let (operand, _) = self.resolve(mode);
                if let Operand::Address(addr) = operand {
                    let v = self.mem.read8(addr).wrapping_sub(1);
                    self.mem.write8(addr, v);
                    self.regs.set_zero_and_negative(v);
                }
            }
            "INX" => {
                self.regs.x = self.regs.x.wrapping_add(1);
                self.regs.set_zero_and_negative(self.regs.x);
            }
            "INY" => {
                self.regs.y = self.regs.y.wrapping_add(1);
                self.regs.set_zero_and_negative(self.regs.y);
            }
            "DEX" => {
                self.regs.x = self.regs.x.wrapping_sub(1);
                self.regs.set_zero_and_negative(self.regs.x);
            }
            "DEY" => {
                self.regs.y = self.regs.y.wrapping_sub(1);
                self.regs.set_zero_and_negative(self.regs.y);
            }
            "TAX" => {
                self.regs.x = self.regs.a;
                self.regs.set_zero_and_negative(self.regs.x);
            }
            "TXA" => {
                self.regs.a = self.regs.x;
                self.regs.set_zero_and_negative(self.regs.a);
            }
            "TAY" => {
                self.regs.y = self.regs.a;
                self.regs.set_zero_and_negative(self.regs.y);
            }
            "TYA" => {
                self.regs.a = self.regs.y;
                self.regs.set_zero_and_negative(self.regs.a);
            }
            "TSX" => {
                self.regs.x = self.regs.s;
                self.regs.set_zero_and_negative(self.regs.x);
            }
            "TXS" => {
                // Changing the stack register does not affect flags.
                self.regs.s = self.regs.x;
            }
            "PHA" => self.push8(self.regs.a),
            "PHP" => self.push8(self.regs.p | (Break as u8)),
            "PLA" => {
                self.regs.a = self.pop8();
                self.regs.set_zero_and_negative(self.regs.a);
            }
            "PLP" => self.regs.p = self.pop8(),
            "JMP" => {
                let (operand, _) = self.resolve(mode);
                if let Operand::Address(addr) = operand {
                    self.regs.pc = addr;
                }
            }
            "JSR" => {
                let (operand, _) = self.resolve(mode);
                if let Operand::Address(target) = operand {
                    self.push16(self.regs.pc.wrapping_sub(1));
                    self.regs.pc = target;
                }
            }
            "RTS" => {
                self.regs.pc = self.pop16().wrapping_add(1);
            }
            "BRK" => {
                self.push16(self.regs.pc);
                self.push8(self.regs.p | (Break as u8));
                self.regs.pc = self.mem.read16(0xFFFE);
                self.regs.set_flag(Break, true);
            }
            "RTI" => {
                self.regs.p = self.pop8();
                self.regs.pc = self.pop16();
            }
            "BPL" | "BMI" | "BVC" | "BVS" | "BCC" | "BCS" | "BNE" | "BEQ" => {
                let (operand, crossed) = self.resolve(mode);
                let target = match operand {
                    Operand::Address(addr) => addr,
                    Operand::Register => unreachable!("branches always resolve to an address"),
                };
                let taken = match mnemonic {
                    "BPL" => !self.regs.flag(Negative),
                    "BMI" => self.regs.flag(Negative),
                    "BVC" => !self.regs.flag(Overflow),
                    "BVS" => self.regs.flag(Overflow),
                    "BCC" => !self.regs.flag(Carry),
                    "BCS" => self.regs.flag(Carry),
                    "BNE" => !self.regs.flag(Zero),
                    "BEQ" => self.regs.flag(Zero),
                    _ => unreachable!(),
                };
                if taken {
                    self.regs.pc = target;
                    extra_cycles += 1;
                    if crossed {
                        extra_cycles += 1;
                    }
                }
            }
            "CLC" => self.regs.set_flag(Carry, false),
            "SEC" => self.regs.set_flag(Carry, true),
            "CLI" => self.regs.set_flag(InterruptDisable, false),
            "SEI" => self.regs.set_flag(InterruptDisable, true),
            "CLD" => self.regs.set_flag(Decimal, false),
            "SED" => self.regs.set_flag(Decimal, true),
            "CLV" => self.regs.set_flag(Overflow, false),
            "NOP" => {}
            other => unreachable!("opcode table entry without a dispatch arm: {other}"),
        }

        if self.regs.flag(Break) {
            halted = true;
        }

        Ok(StepResult {
            pc_before,
            opcode,
            mnemonic,
            mode,
            cycles: info.n_cycles + extra_cycles,
            halted,
        })
    }

    /// Steps until a BRK sets the B flag, an illegal opcode halts the run,
    /// or `max_steps` is reached. `on_step` is an external trace sink; pass
    /// a no-op closure to run silently.
    pub fn run<F: FnMut(&Emulator, &StepResult)>(
        &mut self,
        max_steps: u64,
        mut on_step: F,
    ) -> Result<RunSummary, RuntimeError> {
        let mut summary = RunSummary::default();
        loop {
            if summary.steps >= max_steps {
                summary.step_limit_reached = true;
                break;
            }
            let result = self.step()?;
            summary.steps += 1;
            summary.total_cycles += result.cycles as u64;
            on_step(self, &result);
            if result.halted {
                break;
            }
        }
        Ok(summary)
    }
}

impl Default for Emulator {
    fn default() -> Emulator {
        Emulator::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn sbc_underflow_with_carry_set() {
        let mut emu = Emulator::new();
        emu.regs.set_flag(StatusFlag::Carry, true);
        emu.regs.a = 0x01;
        emu.i_sbc(0x02).unwrap();
        assert_eq!(emu.regs.a, 0xFF);
        assert!(!emu.regs.flag(StatusFlag::Carry));
        assert!(!emu.regs.flag(StatusFlag::Zero));
        assert!(emu.regs.flag(StatusFlag::Negative));
        assert!(!emu.regs.flag(StatusFlag::Overflow));
    }

    #[test]
    fn sbc_no_underflow_without_carry() {
        let mut emu = Emulator::new();
        emu.regs.a = 0x02;
        emu.i_sbc(0x01).unwrap();
        assert_eq!(emu.regs.a, 0x00);
        assert!(emu.regs.flag(StatusFlag::Carry));
        assert!(emu.regs.flag(StatusFlag::Zero));
    }

    #[test]
    fn adc_sets_overflow_on_sign_change() {
        let mut emu = Emulator::new();
        emu.regs.set_flag(StatusFlag::Carry, true);
        emu.regs.a = 0x7F;
        emu.i_adc(0x01).unwrap();
        assert_eq!(emu.regs.a, 0x81);
        assert!(!emu.regs.flag(StatusFlag::Carry));
        assert!(!emu.regs.flag(StatusFlag::Zero));
        assert!(emu.regs.flag(StatusFlag::Negative));
        assert!(emu.regs.flag(StatusFlag::Overflow));
    }

    #[test]
    fn adc_signals_decimal_mode_as_unimplemented() {
        let mut emu = Emulator::new();
        emu.regs.set_flag(StatusFlag::Decimal, true);
        let err = emu.i_adc(0x01).unwrap_err();
        assert!(matches!(err, RuntimeError::DecimalModeUnimplemented { .. }));
    }

    #[test]
    fn transfer_tax_on_zero_sets_zero_flag_only() {
        let mut emu = Emulator::new();
        emu.regs.a = 0;
        emu.regs.x = 0x55;
        emu.load(0x0600, &[0xAA]); // TAX
        emu.step().unwrap();
        assert_eq!(emu.regs.x, 0);
        assert!(emu.regs.flag(StatusFlag::Zero));
        assert!(!emu.regs.flag(StatusFlag::Negative));
        assert!(!emu.regs.flag(StatusFlag::Carry));
        assert!(!emu.regs.flag(StatusFlag::Overflow));
    }

    #[test]
    fn illegal_opcode_halts_with_error() {
        let mut emu = Emulator::new();
        emu.load(0x0600, &[0x02]); // KIL/illegal on the real 6502, unused here
        let err = emu.step().unwrap_err();
        assert!(matches!(err, RuntimeError::IllegalOpcode { opcode: 0x02, .. }));
    }

    #[test]
    fn lda_immediate_then_brk_halts_the_run() {
        let mut emu = Emulator::new();
        emu.mem.write16(0xFFFE, 0x1234);
        emu.load(0x0600, &[0xA9, 0x42, 0x00]); // LDA #$42, BRK
        let summary = emu.run(100, |_, _| {}).unwrap();
        assert_eq!(emu.regs.a, 0x42);
        assert_eq!(emu.regs.pc, 0x1234);
        assert!(emu.regs.flag(StatusFlag::Break));
        assert_eq!(summary.steps, 2);
        assert!(!summary.step_limit_reached);
    }

    #[test]
    fn decrement_loop_scenario_matches_recorded_trace() {
        // LDX #$08 / decrement: DEX / STX $0200 / CPX #$03 / BNE decrement / STX $0201 / BRK
        let program = [
            0xA2, 0x08, 0xCA, 0x8E, 0x00, 0x02, 0xE0, 0x03, 0xD0, 0xF8, 0x8E, 0x01, 0x02, 0x00,
            0x00,
        ];
        let mut emu = Emulator::new();
        emu.mem.write16(0xFFFE, 0x1234);
        emu.load(0x0600, &program);
        emu.run(1000, |_, _| {}).unwrap();

        assert_eq!(emu.regs.a, 0);
        assert_eq!(emu.regs.x, 3);
        assert_eq!(emu.regs.y, 0);
        assert_eq!(emu.regs.s, 0xFC);
        assert_eq!(emu.regs.pc, 0x1234);
        assert_eq!(emu.regs.p, 0x13);
        assert_eq!(emu.mem.read8(0x0200), 0x03);
        assert_eq!(emu.mem.read8(0x0201), 0x03);
    }

    #[test]
    fn page_crossing_absx_read_adds_a_cycle() {
        let mut emu = Emulator::new();
        emu.regs.x = 0xFF;
        emu.mem.write8(0x0300, 0x42); // $0201 + $FF wraps into the next page
        emu.load(0x0600, &[0xBD, 0x01, 0x02]); // LDA $0201,X
        let result = emu.step().unwrap();
        assert_eq!(emu.regs.a, 0x42);
        assert_eq!(result.cycles, 5); // base 4 + 1 page-cross bonus
    }

    #[test]
    fn branch_taken_across_a_page_boundary_adds_two_cycles() {
        let mut emu = Emulator::new();
        emu.regs.set_flag(StatusFlag::Zero, true);
        // BEQ with a -1 displacement: PC lands on 0x06FF, one page below
        // the operand's own page (0x0700), so the crossing bonus applies.
        emu.load(0x06FE, &[0xF0, 0xFF]);
        let result = emu.step().unwrap();
        assert_eq!(result.cycles, 4); // base 2 + 1 taken + 1 page-cross
    }
}
