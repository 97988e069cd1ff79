//! The opcode table: the single source of truth that binds mnemonic, addressing
//! mode, instruction length and base cycle count to every documented 6502 opcode
//! byte. Both the assembler and the emulator consult this table instead of
//! carrying their own copies of the instruction set.

/// How an instruction's operand bytes are interpreted to produce an effective
/// address or a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressMode {
    /// Accumulator: the operand is register A itself.
    Acc,
    Imm,
    Zp,
    Zpx,
    Zpy,
    Abs,
    Absx,
    Absy,
    /// Indirect. Only used by JMP.
    Ind,
    Indx,
    Indy,
    /// Relative: an 8-bit signed displacement, used only by branches.
    Rel,
    Imp,
}

/// A single opcode table entry. The mnemonic is compared case-insensitively
/// against source text by the assembler.
#[derive(Debug, Clone, Copy)]
pub struct OpInfo {
    pub mnemonic: &'static str,
    pub n_bytes: u8,
    pub n_cycles: u8,
    pub mode: AddressMode,
}

const fn op(mnemonic: &'static str, n_bytes: u8, n_cycles: u8, mode: AddressMode) -> Option<OpInfo> {
    Some(OpInfo { mnemonic, n_bytes, n_cycles, mode })
}

use AddressMode::*;

/// Dense 256-entry table indexed by opcode byte. `None` marks an illegal
/// opcode slot; illegal/undocumented opcodes are a non-goal of this toolchain.
#[rustfmt::skip]
pub static OPCODE_TABLE: [Option<OpInfo>; 256] = [
    // 0x00 - 0x0F
    op("BRK", 2, 7, Imp),  op("ORA", 2, 6, Indx), None,                  None,
    None,                  op("ORA", 2, 3, Zp),   op("ASL", 2, 5, Zp),   None,
    op("PHP", 1, 3, Imp),  op("ORA", 2, 2, Imm),  op("ASL", 1, 2, Acc),  None,
    None,                  op("ORA", 3, 4, Abs),  op("ASL", 3, 6, Abs),  None,

    // 0x10 - 0x1F
    op("BPL", 2, 2, Rel),  op("ORA", 2, 5, Indy), None,                  None,
    None,                  op("ORA", 2, 4, Zpx),  op("ASL", 2, 6, Zpx),  None,
    op("CLC", 1, 2, Imp),  op("ORA", 3, 4, Absy), None,                  None,
    None,                  op("ORA", 3, 4, Absx), op("ASL", 3, 7, Absx), None,

    // 0x20 - 0x2F
    op("JSR", 3, 6, Abs),  op("AND", 2, 6, Indx), None,                  None,
    op("BIT", 2, 3, Zp),   op("AND", 2, 3, Zp),   op("ROL", 2, 5, Zp),   None,
    op("PLP", 1, 4, Imp),  op("AND", 2, 2, Imm),  op("ROL", 1, 2, Acc),  None,
    op("BIT", 3, 4, Abs),  op("AND", 3, 4, Abs),  op("ROL", 3, 6, Abs),  None,

    // 0x30 - 0x3F
    op("BMI", 2, 2, Rel),  op("AND", 2, 5, Indy), None,                  None,
    None,                  op("AND", 2, 4, Zpx),  op("ROL", 2, 6, Zpx),  None,
    op("SEC", 1, 2, Imp),  op("AND", 3, 4, Absy), None,                  None,
    None,                  op("AND", 3, 4, Absx), op("ROL", 3, 7, Absx), None,

    // 0x40 - 0x4F
    op("RTI", 1, 6, Imp),  op("EOR", 2, 6, Indx), None,                  None,
    None,                  op("EOR", 2, 3, Zp),   op("LSR", 2, 5, Zp),   None,
    op("PHA", 1, 3, Imp),  op("EOR", 2, 2, Imm),  op("LSR", 1, 2, Acc),  None,
    op("JMP", 3, 3, Abs),  op("EOR", 3, 4, Abs),  op("LSR", 3, 6, Abs),  None,

    // 0x50 - 0x5F
    op("BVC", 2, 2, Rel),  op("EOR", 2, 5, Indy), None,                  None,
    None,                  op("EOR", 2, 4, Zpx),  op("LSR", 2, 6, Zpx),  None,
    op("CLI", 1, 2, Imp),  op("EOR", 3, 4, Absy), None,                  None,
    None,                  op("EOR", 3, 4, Absx), op("LSR", 3, 7, Absx), None,

    // 0x60 - 0x6F
    op("RTS", 1, 6, Imp),  op("ADC", 2, 6, Indx), None,                  None,
    None,                  op("ADC", 2, 3, Zp),   op("ROR", 2, 5, Zp),   None,
    op("PLA", 1, 4, Imp),  op("ADC", 2, 2, Imm),  op("ROR", 1, 2, Acc),  None,
    op("JMP", 3, 5, Ind),  op("ADC", 3, 4, Abs),  op("ROR", 3, 6, Abs),  None,

    // 0x70 - 0x7F
    op("BVS", 2, 2, Rel),  op("ADC", 2, 5, Indy), None,                  None,
    None,                  op("ADC", 2, 4, Zpx),  op("ROR", 2, 6, Zpx),  None,
    op("SEI", 1, 2, Imp),  op("ADC", 3, 4, Absy), None,                  None,
    None,                  op("ADC", 3, 4, Absx), op("ROR", 3, 7, Absx), None,

    // 0x80 - 0x8F
    None,                  op("STA", 2, 6, Indx), None,                  None,
    op("STY", 2, 3, Zp),   op("STA", 2, 3, Zp),   op("STX", 2, 3, Zp),   None,
    op("DEY", 1, 2, Imp),  None,                  op("TXA", 1, 2, Imp),  None,
    op("STY", 3, 4, Abs),  op("STA", 3, 4, Abs),  op("STX", 3, 4, Abs),  None,

    // 0x90 - 0x9F
    op("BCC", 2, 2, Rel),  op("STA", 2, 6, Indy), None,                  None,
    op("STY", 2, 4, Zpx),  op("STA", 2, 4, Zpx),  op("STX", 2, 4, Zpy),  None,
    op("TYA", 1, 2, Imp),  op("STA", 3, 5, Absy), op("TXS", 1, 2, Imp),  None,
    None,                  op("STA", 3, 5, Absx), None,                  None,

    // 0xA0 - 0xAF
    op("LDY", 2, 2, Imm),  op("LDA", 2, 6, Indx), op("LDX", 2, 2, Imm),  None,
    op("LDY", 2, 3, Zp),   op("LDA", 2, 3, Zp),   op("LDX", 2, 3, Zp),   None,
    op("TAY", 1, 2, Imp),  op("LDA", 2, 2, Imm),  op("TAX", 1, 2, Imp),  None,
    op("LDY", 3, 4, Abs),  op("LDA", 3, 4, Abs),  op("LDX", 3, 4, Abs),  None,

    // 0xB0 - 0xBF
    op("BCS", 2, 2, Rel),  op("LDA", 2, 5, Indy), None,                  None,
    op("LDY", 2, 4, Zpx),  op("LDA", 2, 4, Zpx),  op("LDX", 2, 4, Zpy),  None,
    op("CLV", 1, 2, Imp),  op("LDA", 3, 4, Absy), op("TSX", 1, 2, Imp),  None,
    op("LDY", 3, 4, Absx), op("LDA", 3, 4, Absx), op("LDX", 3, 4, Absy), None,

    // 0xC0 - 0xCF
    op("CPY", 2, 2, Imm),  op("CMP", 2, 6, Indx), None,                  None,
    op("CPY", 2, 3, Zp),   op("CMP", 2, 3, Zp),   op("DEC", 2, 5, Zp),   None,
    op("INY", 1, 2, Imp),  op("CMP", 2, 2, Imm),  op("DEX", 1, 2, Imp),  None,
    op("CPY", 3, 4, Abs),  op("CMP", 3, 4, Abs),  op("DEC", 3, 6, Abs),  None,

    // 0xD0 - 0xDF
    op("BNE", 2, 2, Rel),  op("CMP", 2, 5, Indy), None,                  None,
    None,                  op("CMP", 2, 4, Zpx),  op("DEC", 2, 6, Zpx),  None,
    op("CLD", 1, 2, Imp),  op("CMP", 3, 4, Absy), None,                  None,
    None,                  op("CMP", 3, 4, Absx), op("DEC", 3, 7, Absx), None,

    // 0xE0 - 0xEF
    op("CPX", 2, 2, Imm),  op("SBC", 2, 6, Indx), None,                  None,
    op("CPX", 2, 3, Zp),   op("SBC", 2, 3, Zp),   op("INC", 2, 5, Zp),   None,
    op("INX", 1, 2, Imp),  op("SBC", 2, 2, Imm),  op("NOP", 1, 2, Imp),  None,
    op("CPX", 3, 4, Abs),  op("SBC", 3, 4, Abs),  op("INC", 3, 6, Abs),  None,

    // 0xF0 - 0xFF
    op("BEQ", 2, 2, Rel),  op("SBC", 2, 5, Indy), None,                  None,
    None,                  op("SBC", 2, 4, Zpx),  op("INC", 2, 6, Zpx),  None,
    op("SED", 1, 2, Imp),  op("SBC", 3, 4, Absy), None,                  None,
    None,                  op("SBC", 3, 4, Absx), op("INC", 3, 7, Absx), None,
];

/// Branch mnemonics use relative addressing for a label operand; everything
/// else uses absolute addressing.
pub const BRANCH_MNEMONICS: [&str; 8] =
    ["bcc", "bcs", "beq", "bne", "bmi", "bpl", "bvs", "bvc"];

/// Instructions that incur an extra cycle when their effective-address
/// computation (ABSX/ABSY/INDY) crosses a page boundary.
pub const PAGE_CROSS_MNEMONICS: [&str; 12] = [
    "adc", "and", "bit", "cmp", "cpx", "cpy", "eor", "lda", "ldx", "ldy", "ora", "sbc",
];

pub fn is_branch_mnemonic(mnemonic: &str) -> bool {
    let lower = mnemonic.to_ascii_lowercase();
    BRANCH_MNEMONICS.contains(&lower.as_str())
}

pub fn incurs_page_cross_penalty(mnemonic: &str) -> bool {
    let lower = mnemonic.to_ascii_lowercase();
    PAGE_CROSS_MNEMONICS.contains(&lower.as_str())
}

/// Constant-time lookup by opcode byte.
pub fn lookup(opcode: u8) -> Option<OpInfo> {
    OPCODE_TABLE[opcode as usize]
}

/// Linear scan for the opcode byte matching `mnemonic` (case-insensitive) and,
/// if given, `mode`. Returns the first match when `mode` is `None`.
pub fn find(mnemonic: &str, mode: Option<AddressMode>) -> Option<u8> {
    for (opcode, entry) in OPCODE_TABLE.iter().enumerate() {
        if let Some(info) = entry {
            if info.mnemonic.eq_ignore_ascii_case(mnemonic) {
                match mode {
                    Some(wanted) if wanted != info.mode => continue,
                    _ => return Some(opcode as u8),
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn every_entry_has_a_valid_byte_length() {
        for entry in OPCODE_TABLE.iter().flatten() {
            assert!(matches!(entry.n_bytes, 1 | 2 | 3));
            assert!(entry.n_cycles >= 2);
        }
    }

    #[test]
    fn finds_documented_instruction_mode_pairs() {
        assert_eq!(find("LDA", Some(Imm)), Some(0xA9));
        assert_eq!(find("lda", Some(Imm)), Some(0xA9));
        assert_eq!(find("STA", Some(Absx)), Some(0x9D));
        assert_eq!(find("BRK", None), Some(0x00));
        assert_eq!(find("XXX", None), None);
    }

    #[test]
    fn lookup_reports_illegal_opcodes_as_null() {
        assert!(lookup(0x02).is_none());
        assert!(lookup(0xFF).is_none());
    }

    #[test]
    fn lookup_round_trips_with_find() {
        for opcode in 0u16..256 {
            if let Some(info) = lookup(opcode as u8) {
                let found = find(info.mnemonic, Some(info.mode));
                assert_eq!(found, Some(opcode as u8));
            }
        }
    }
}
