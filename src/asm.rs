//! Two-pass symbolic assembler. Source is read one line at a time; each line
//! is either blank, a comment, a label definition (`name:`), or an
//! instruction with at most one operand. Labels referenced before their
//! definition are recorded and patched in a second pass once every label in
//! the source has been seen.

use std::collections::HashMap;
use std::iter::Peekable;
use std::str::Chars;

use crate::error::AssemblyError;
use crate::opcodes::{self, AddressMode};

fn mode_name(mode: AddressMode) -> &'static str {
    match mode {
        AddressMode::Acc => "accumulator",
        AddressMode::Imm => "immediate",
        AddressMode::Zp => "zero-page",
        AddressMode::Zpx => "zero-page,X",
        AddressMode::Zpy => "zero-page,Y",
        AddressMode::Abs => "absolute",
        AddressMode::Absx => "absolute,X",
        AddressMode::Absy => "absolute,Y",
        AddressMode::Ind => "indirect",
        AddressMode::Indx => "(indirect,X)",
        AddressMode::Indy => "(indirect),Y",
        AddressMode::Rel => "relative",
        AddressMode::Imp => "implied",
    }
}

fn find_opcode(mnemonic: &str, mode: AddressMode) -> Result<u8, AssemblyError> {
    opcodes::find(mnemonic, Some(mode)).ok_or_else(|| AssemblyError::OpcodeNotFound {
        mnemonic: mnemonic.to_string(),
        mode: mode_name(mode),
    })
}

/// Whether a label reference is assembled as a one-byte relative
/// displacement (branches) or a two-byte absolute address (everything
/// else that can take a label operand).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LabelMode {
    Absolute,
    Relative,
}

/// A forward reference to a label: the byte offset of its (not yet known)
/// operand, the label name, and how to encode it once resolved.
struct Unresolved {
    site: usize,
    label: String,
    mode: LabelMode,
    line: u64,
}

/// The assembled output: a relocatable byte image plus the label table and
/// the list of two-byte absolute-address sites that must be adjusted by
/// `relocate` before the image is loaded anywhere but address 0.
#[derive(Debug, Clone)]
pub struct CodeImage {
    pub bytes: Vec<u8>,
    pub labels: HashMap<String, u16>,
    pub relocation_sites: Vec<usize>,
}

impl CodeImage {
    /// Adds `base` to every absolute address recorded in `relocation_sites`,
    /// returning a new image ready to load at `base`. Every instruction
    /// using ZP/REL addressing is position-independent and untouched; only
    /// two-byte absolute operands need adjusting.
    pub fn relocate(&self, base: u16) -> Result<Vec<u8>, AssemblyError> {
        if base as usize + self.bytes.len() > 0xFFFF {
            return Err(AssemblyError::RelocationOutOfBounds { base, size: self.bytes.len() });
        }
        let mut out = self.bytes.clone();
        for &site in &self.relocation_sites {
            let lo = out[site] as u16;
            let hi = out[site + 1] as u16;
            let original = (hi << 8) | lo;
            let relocated = original as u32 + base as u32;
            if relocated > 0xFFFF {
                return Err(AssemblyError::RelocationOutOfBounds { base, size: self.bytes.len() });
            }
            out[site] = (relocated & 0xFF) as u8;
            out[site + 1] = ((relocated >> 8) & 0xFF) as u8;
        }
        Ok(out)
    }
}

struct Assembler<'a> {
    chars: Peekable<Chars<'a>>,
    line: u64,
    bytes: Vec<u8>,
    labels: HashMap<String, u16>,
    relocation_sites: Vec<usize>,
    unresolved: Vec<Unresolved>,
}

impl<'a> Assembler<'a> {
    fn new() -> Assembler<'a> {
        Assembler {
            chars: "".chars().peekable(),
            line: 0,
            bytes: Vec::new(),
            labels: HashMap::new(),
            relocation_sites: Vec::new(),
            unresolved: Vec::new(),
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn advance(&mut self) -> Option<char> {
        self.chars.next()
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(c) if c == ' ' || c == '\t') {
            self.advance();
        }
    }

    fn skip_to_end_of_line(&mut self) {
        while self.advance().is_some() {}
    }

    fn malformed(&self, message: impl Into<String>) -> AssemblyError {
        AssemblyError::MalformedLine { message: message.into(), line: self.line }
    }

    fn read_word(&mut self) -> Result<String, AssemblyError> {
        let mut word = String::new();
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric()) {
            word.push(self.advance().unwrap());
        }
        if word.is_empty() {
            return Err(self.malformed("expected a name here"));
        }
        Ok(word)
    }

    fn read_number(&mut self) -> Result<u32, AssemblyError> {
        if self.peek() == Some('$') {
            self.advance();
            let mut digits = String::new();
            while matches!(self.peek(), Some(c) if c.is_ascii_hexdigit()) {
                digits.push(self.advance().unwrap());
            }
            if digits.is_empty() {
                return Err(self.malformed("expected hex digits after '$'"));
            }
            u32::from_str_radix(&digits, 16)
                .map_err(|_| AssemblyError::NumberOutOfRange { text: format!("${digits}"), line: self.line })
        } else {
            let mut digits = String::new();
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                digits.push(self.advance().unwrap());
            }
            if digits.is_empty() {
                return Err(self.malformed("expected a number here"));
            }
            digits
                .parse::<u32>()
                .map_err(|_| AssemblyError::NumberOutOfRange { text: digits, line: self.line })
        }
    }

    /// Consumes whatever trails an instruction or label: optional
    /// whitespace, then either nothing, or a `;` comment running to the end
    /// of the line.
    fn expect_end_of_line(&mut self) -> Result<(), AssemblyError> {
        self.skip_whitespace();
        match self.peek() {
            None => Ok(()),
            Some(';') => {
                self.skip_to_end_of_line();
                Ok(())
            }
            Some(c) => Err(self.malformed(format!("unexpected trailing character '{c}'"))),
        }
    }

    fn add_label(&mut self, name: String) -> Result<(), AssemblyError> {
        if self.labels.contains_key(&name) {
            return Err(AssemblyError::DuplicateLabel { label: name, line: self.line });
        }
        self.labels.insert(name, self.bytes.len() as u16);
        Ok(())
    }

    fn push_implied(&mut self, mnemonic: &str) -> Result<(), AssemblyError> {
        let opcode = find_opcode(mnemonic, AddressMode::Imp)?;
        self.bytes.push(opcode);
        // BRK reserves a second byte: real 6502 programs skip it as a
        // signature byte for the break handler to inspect.
        if mnemonic.eq_ignore_ascii_case("BRK") {
            self.bytes.push(0);
        }
        Ok(())
    }

    fn push_accumulator(&mut self, mnemonic: &str) -> Result<(), AssemblyError> {
        let opcode = find_opcode(mnemonic, AddressMode::Acc)?;
        self.bytes.push(opcode);
        Ok(())
    }

    fn push_immediate(&mut self, mnemonic: &str, value: u32) -> Result<(), AssemblyError> {
        if value > 0xFF {
            return Err(AssemblyError::NumberOutOfRange {
                text: format!("#{value}"),
                line: self.line,
            });
        }
        let opcode = find_opcode(mnemonic, AddressMode::Imm)?;
        self.bytes.push(opcode);
        self.bytes.push(value as u8);
        Ok(())
    }

    fn push_zero_page(&mut self, mnemonic: &str, value: u8) -> Result<(), AssemblyError> {
        let opcode = find_opcode(mnemonic, AddressMode::Zp)?;
        self.bytes.push(opcode);
        self.bytes.push(value);
        Ok(())
    }

    /// `relocatable` is true only for label references: a numeric absolute
    /// operand is a fixed address the programmer wrote literally (e.g.
    /// `STX $0200`) and must not shift when the image is relocated.
    fn push_absolute(&mut self, mnemonic: &str, addr: u16, relocatable: bool) -> Result<(), AssemblyError> {
        let opcode = find_opcode(mnemonic, AddressMode::Abs)?;
        self.bytes.push(opcode);
        let site = self.bytes.len();
        self.bytes.push((addr & 0xFF) as u8);
        self.bytes.push((addr >> 8) as u8);
        if relocatable {
            self.relocation_sites.push(site);
        }
        Ok(())
    }

    fn displacement(&self, site: usize, target: u16) -> Result<i8, AssemblyError> {
        let delta = target as i32 - (site as i32 + 1);
        if !(-128..=127).contains(&delta) {
            return Err(AssemblyError::BranchOutOfRange { displacement: delta, line: self.line });
        }
        Ok(delta as i8)
    }

    fn push_relative(&mut self, mnemonic: &str, target: u16) -> Result<(), AssemblyError> {
        let opcode = find_opcode(mnemonic, AddressMode::Rel)?;
        self.bytes.push(opcode);
        let site = self.bytes.len();
        let displacement = self.displacement(site, target)?;
        self.bytes.push(displacement as u8);
        Ok(())
    }

    fn push_number_operand(&mut self, mnemonic: &str, value: u32) -> Result<(), AssemblyError> {
        if value > 0xFFFF {
            return Err(AssemblyError::NumberOutOfRange {
                text: format!("${value:x}"),
                line: self.line,
            });
        }
        if value <= 0xFF {
            self.push_zero_page(mnemonic, value as u8)
        } else {
            self.push_absolute(mnemonic, value as u16, false)
        }
    }

    fn push_label_operand(&mut self, mnemonic: &str, label: String) -> Result<(), AssemblyError> {
        let mode = if opcodes::is_branch_mnemonic(mnemonic) {
            LabelMode::Relative
        } else {
            LabelMode::Absolute
        };
        if let Some(&target) = self.labels.get(&label) {
            return match mode {
                LabelMode::Absolute => self.push_absolute(mnemonic, target, true),
                LabelMode::Relative => self.push_relative(mnemonic, target),
            };
        }
        // Not seen yet; reserve the operand bytes and resolve it once the
        // whole source has been scanned.
        let address_mode = match mode {
            LabelMode::Absolute => AddressMode::Abs,
            LabelMode::Relative => AddressMode::Rel,
        };
        let opcode = find_opcode(mnemonic, address_mode)?;
        self.bytes.push(opcode);
        let site = self.bytes.len();
        let padding = if mode == LabelMode::Absolute { 2 } else { 1 };
        for _ in 0..padding {
            self.bytes.push(0);
        }
        self.unresolved.push(Unresolved { site, label, mode, line: self.line });
        Ok(())
    }

    fn parse_instruction(&mut self, mnemonic: &str) -> Result<(), AssemblyError> {
        self.skip_whitespace();
        match self.peek() {
            None | Some(';') => self.push_implied(mnemonic),
            Some('#') => {
                self.advance();
                let value = self.read_number()?;
                self.push_immediate(mnemonic, value)
            }
            Some('$') => {
                let value = self.read_number()?;
                self.push_number_operand(mnemonic, value)
            }
            Some(c) if c.is_ascii_digit() => {
                let value = self.read_number()?;
                self.push_number_operand(mnemonic, value)
            }
            Some(c) if c.is_ascii_alphabetic() => {
                let word = self.read_word()?;
                if word == "A" || word == "a" {
                    self.push_accumulator(mnemonic)
                } else {
                    self.push_label_operand(mnemonic, word)
                }
            }
            Some(c) => Err(self.malformed(format!("unexpected character '{c}' in operand"))),
        }
    }

    fn parse_line(&mut self) -> Result<(), AssemblyError> {
        self.skip_whitespace();
        match self.peek() {
            None => Ok(()),
            Some(';') => {
                self.skip_to_end_of_line();
                Ok(())
            }
            _ => {
                let word = self.read_word()?;
                self.skip_whitespace();
                if self.peek() == Some(':') {
                    self.advance();
                    self.add_label(word)?;
                    self.expect_end_of_line()
                } else {
                    self.parse_instruction(&word)?;
                    self.expect_end_of_line()
                }
            }
        }
    }

    fn resolve_labels(&mut self) -> Result<(), AssemblyError> {
        let pending = std::mem::take(&mut self.unresolved);
        for reference in pending {
            let target = *self.labels.get(&reference.label).ok_or_else(|| {
                AssemblyError::UndefinedLabel { label: reference.label.clone() }
            })?;
            match reference.mode {
                LabelMode::Absolute => {
                    self.bytes[reference.site] = (target & 0xFF) as u8;
                    self.bytes[reference.site + 1] = (target >> 8) as u8;
                    self.relocation_sites.push(reference.site);
                }
                LabelMode::Relative => {
                    let delta = target as i32 - (reference.site as i32 + 1);
                    if !(-128..=127).contains(&delta) {
                        return Err(AssemblyError::BranchOutOfRange {
                            displacement: delta,
                            line: reference.line,
                        });
                    }
                    self.bytes[reference.site] = delta as i8 as u8;
                }
            }
        }
        self.relocation_sites.sort_unstable();
        self.relocation_sites.dedup();
        Ok(())
    }
}

/// Assembles `source` into a relocatable `CodeImage`. Labels may be
/// referenced before they are defined; undefined labels are reported once
/// the whole source has been scanned.
pub fn assemble(source: &str) -> Result<CodeImage, AssemblyError> {
    let mut assembler = Assembler::new();
    for (index, line) in source.lines().enumerate() {
        assembler.line = index as u64 + 1;
        assembler.chars = line.chars().peekable();
        assembler.parse_line()?;
    }
    assembler.resolve_labels()?;
    Ok(CodeImage {
        bytes: assembler.bytes,
        labels: assembler.labels,
        relocation_sites: assembler.relocation_sites,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn assembles_implied_and_immediate_instructions() {
        let image = assemble("LDA #$2A\nCLC\nADC #10").unwrap();
        assert_eq!(image.bytes, vec![0xA9, 0x2A, 0x18, 0x69, 10]);
    }

    #[test]
    fn assembles_a_backward_label_reference() {
        let source = "\
loop:
  DEX
  BNE loop
  BRK";
        let image = assemble(source).unwrap();
        assert_eq!(image.bytes, vec![0xCA, 0xD0, (-3i8) as u8, 0x00, 0x00]);
    }

    #[test]
    fn assembles_a_forward_label_reference() {
        let source = "\
  JMP skip
  BRK
skip:
  LDA #1";
        let image = assemble(source).unwrap();
        // JMP $0005 ; BRK BRK ; LDA #1
        assert_eq!(image.bytes, vec![0x4C, 0x05, 0x00, 0x00, 0x00, 0xA9, 0x01]);
        assert_eq!(image.labels.get("skip"), Some(&5));
        assert_eq!(image.relocation_sites, vec![1]);
    }

    #[test]
    fn ignores_comment_only_and_trailing_comment_lines() {
        let source = "; a whole comment line\nCLC ; clear carry\n";
        let image = assemble(source).unwrap();
        assert_eq!(image.bytes, vec![0x18]);
    }

    #[test]
    fn accumulator_mode_emits_the_acc_opcode() {
        let image = assemble("ASL A").unwrap();
        assert_eq!(image.bytes, vec![0x0A]);
    }

    #[test]
    fn duplicate_label_is_an_error() {
        let err = assemble("one:\n  NOP\none:\n  NOP").unwrap_err();
        assert!(matches!(err, AssemblyError::DuplicateLabel { .. }));
    }

    #[test]
    fn undefined_label_is_an_error() {
        let err = assemble("JMP nowhere").unwrap_err();
        assert!(matches!(err, AssemblyError::UndefinedLabel { .. }));
    }

    #[test]
    fn branch_displacement_too_far_is_an_error() {
        let mut source = String::from("start:\n");
        for _ in 0..200 {
            source.push_str("  NOP\n");
        }
        source.push_str("  BEQ start\n");
        let err = assemble(&source).unwrap_err();
        assert!(matches!(err, AssemblyError::BranchOutOfRange { .. }));
    }

    #[test]
    fn relocate_shifts_absolute_operands_but_not_zero_page_or_relative() {
        let source = "\
loop:
  LDA $10
  JMP loop";
        let image = assemble(source).unwrap();
        let relocated = image.relocate(0x0600).unwrap();
        // LDA $10 is untouched (zero page); JMP loop becomes JMP $0600.
        assert_eq!(relocated[0], 0xA5);
        assert_eq!(relocated[1], 0x10);
        assert_eq!(relocated[2], 0x4C);
        assert_eq!(&relocated[3..5], &[0x00, 0x06]);
    }

    #[test]
    fn relocation_past_the_top_of_memory_is_an_error() {
        let image = assemble("JMP $FFFF").unwrap();
        let err = image.relocate(0xFFFF).unwrap_err();
        assert!(matches!(err, AssemblyError::RelocationOutOfBounds { .. }));
    }

    #[test]
    fn numeric_absolute_operands_are_not_relocation_sites() {
        // A literal absolute address like `STX $0200` is a fixed memory
        // location the programmer wrote directly; only label references
        // shift with the load address.
        let image = assemble("STX $0200\nSTX $0201").unwrap();
        assert!(image.relocation_sites.is_empty());
        assert_eq!(image.relocate(0x1234).unwrap(), image.bytes);
    }

    #[test]
    fn relocation_exactly_at_the_top_of_memory_is_an_error() {
        // base + size == 0x10000 means the last byte would land at 0xFFFF;
        // the image must fit with room to spare, not flush against the end.
        let image = assemble("NOP").unwrap();
        let err = image.relocate(0xFFFF).unwrap_err();
        assert!(matches!(err, AssemblyError::RelocationOutOfBounds { .. }));
    }
}
