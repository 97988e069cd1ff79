//! The two fatal error kinds surfaced at the core boundary: assembly-time
//! failures from the assembler, and runtime failures from the emulator.
//! Both implement `Display` + `std::error::Error` so the CLI can propagate
//! them with `?` and print them without string-matching on a message.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssemblyError {
    DuplicateLabel { label: String, line: u64 },
    UndefinedLabel { label: String },
    NumberOutOfRange { text: String, line: u64 },
    BranchOutOfRange { displacement: i32, line: u64 },
    MalformedLine { message: String, line: u64 },
    OpcodeNotFound { mnemonic: String, mode: &'static str },
    RelocationOutOfBounds { base: u16, size: usize },
}

impl fmt::Display for AssemblyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssemblyError::DuplicateLabel { label, line } => {
                write!(f, "line {line}: label '{label}' is defined twice")
            }
            AssemblyError::UndefinedLabel { label } => {
                write!(f, "undefined label '{label}'")
            }
            AssemblyError::NumberOutOfRange { text, line } => {
                write!(f, "line {line}: number '{text}' is out of range for this context")
            }
            AssemblyError::BranchOutOfRange { displacement, line } => {
                write!(
                    f,
                    "line {line}: relative branch displacement {displacement} is outside [-128, 127]"
                )
            }
            AssemblyError::MalformedLine { message, line } => {
                write!(f, "line {line}: {message}")
            }
            AssemblyError::OpcodeNotFound { mnemonic, mode } => {
                write!(f, "no opcode for instruction '{mnemonic}' in {mode} mode")
            }
            AssemblyError::RelocationOutOfBounds { base, size } => {
                write!(
                    f,
                    "relocating {size} bytes to base {base:#06x} overflows the 16-bit address space"
                )
            }
        }
    }
}

impl std::error::Error for AssemblyError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    IllegalOpcode { opcode: u8, pc: u16 },
    DecimalModeUnimplemented { pc: u16 },
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::IllegalOpcode { opcode, pc } => {
                write!(f, "illegal opcode {opcode:#04x} at {pc:#06x}")
            }
            RuntimeError::DecimalModeUnimplemented { pc } => {
                write!(f, "BCD mode not implemented (ADC/SBC at {pc:#06x} with D set)")
            }
        }
    }
}

impl std::error::Error for RuntimeError {}
