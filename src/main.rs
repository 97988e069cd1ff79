//! Command-line front end: assemble a source file, relocate it to a base
//! address, load it into memory, and run it to completion (or until a step
//! limit trips the safety valve), printing a per-step trace as it goes.

use std::fs;
use std::process::ExitCode;

use clap::Parser;
use colored::Colorize;
use log::{debug, trace, warn};

use mos6502::asm;
use mos6502::emulator::Emulator;

/// Assemble and run a 6502 program.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the assembly source file.
    source: String,

    /// Address to relocate and load the assembled program at.
    #[arg(long, value_parser = parse_hex_or_decimal, default_value = "0x0600")]
    base: u16,

    /// Suppress the per-step trace; print only the final summary.
    #[arg(long)]
    quiet: bool,

    /// Stop the run after this many steps even if the program never halts.
    #[arg(long, default_value_t = 100_000)]
    max_steps: u64,
}

fn parse_hex_or_decimal(text: &str) -> Result<u16, String> {
    let trimmed = text.trim();
    let parsed = if let Some(hex) = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        u16::from_str_radix(hex, 16)
    } else {
        trimmed.parse::<u16>()
    };
    parsed.map_err(|e| format!("'{text}' is not a valid address: {e}"))
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Warn)
        .init()
        .expect("logger installs exactly once");

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {}", "error:".red().bold(), err);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let source = fs::read_to_string(&cli.source)?;

    let image = asm::assemble(&source)?;
    debug!("assembled {} bytes, {} label(s)", image.bytes.len(), image.labels.len());
    let program = image.relocate(cli.base)?;
    println!("{}", hex::encode_upper(&program));

    let mut emulator = Emulator::new();
    emulator.load(cli.base, &program);

    let quiet = cli.quiet;
    let summary = emulator.run(cli.max_steps, |emu, step| {
        trace!(
            "{:04X}: {:02X} {:<4} ({:?})  A={:02X} X={:02X} Y={:02X} P={:02X} S={:02X}",
            step.pc_before,
            step.opcode,
            step.mnemonic,
            step.mode,
            emu.regs.a,
            emu.regs.x,
            emu.regs.y,
            emu.regs.p,
            emu.regs.s,
        );
        if !quiet {
            println!(
                "{:04X}  {:<4} {}  A={:02X} X={:02X} Y={:02X} P={:02X} S={:02X} PC={:04X}",
                step.pc_before,
                step.mnemonic.green(),
                format!("{:?}", step.mode).dimmed(),
                emu.regs.a,
                emu.regs.x,
                emu.regs.y,
                emu.regs.p,
                emu.regs.s,
                emu.regs.pc,
            );
        }
    })?;

    if summary.step_limit_reached {
        warn!("stopped after {} steps without halting", summary.steps);
    }

    println!(
        "{} {} step(s), {} cycle(s){}",
        "done:".bold(),
        summary.steps,
        summary.total_cycles,
        if summary.step_limit_reached { " (step limit reached)" } else { "" },
    );
    Ok(())
}
