mod assembler;
mod bitfield;
mod cli;
mod ds;
mod encoding;
mod error;
mod lexer;
mod microcode;

use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{AsmArgs, Cli, Command, RomFormat, UcodeArgs};
use error::ParseError;

fn main() -> ExitCode {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_writer(io::stderr)
        .init();

    if let Err(e) = run(cli.command) {
        match e.downcast_ref::<ParseError>() {
            Some(err) => tracing::error!(kind = err.kind().category(), "{:#}", e),
            None => tracing::error!("{:#}", e),
        }
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn run(command: Command) -> Result<()> {
    match command {
        Command::Ucode(args) => run_ucode(&args),
        Command::Asm(args) => run_asm(&args),
    }
}

fn open_input(path: Option<&Path>) -> Result<Box<dyn BufRead>> {
    Ok(match path {
        Some(path) => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("cannot open '{}'", path.display()))?,
        )),
        None => Box::new(BufReader::new(io::stdin())),
    })
}

fn write_output(path: Option<&Path>, data: &[u8]) -> Result<()> {
    match path {
        Some(path) => std::fs::write(path, data)
            .with_context(|| format!("cannot write '{}'", path.display())),
        None => io::stdout()
            .lock()
            .write_all(data)
            .context("cannot write to stdout"),
    }
}

/// One line per ROM entry, each entry as uppercase hex bytes.
fn render_hex(rom: &[u8], entry_width: usize) -> String {
    if entry_width == 0 {
        return String::new();
    }
    rom.chunks(entry_width)
        .map(|entry| {
            let mut line: String = entry.iter().map(|b| format!("{:02X}", b)).collect();
            line.push('\n');
            line
        })
        .collect()
}

fn run_ucode(args: &UcodeArgs) -> Result<()> {
    let reader = open_input(args.input.as_deref())?;
    let ucode = microcode::compile(reader)?;
    let rom = ucode.rom_image()?;
    tracing::info!(
        entries = ucode.address_space(),
        entry_width = ucode.entry_width(),
        "built ROM image"
    );

    let rendered = match args.format {
        RomFormat::Binary => rom,
        RomFormat::Hex => render_hex(&rom, ucode.entry_width()).into_bytes(),
    };
    write_output(args.output.as_deref(), &rendered)?;

    if args.verbose {
        let listing = ucode.listing()?.join("\n");
        // Keep stdout clean when it carries the image itself.
        if args.output.is_some() {
            println!("{}", listing);
        } else {
            eprintln!("{}", listing);
        }
    }
    Ok(())
}

fn run_asm(args: &AsmArgs) -> Result<()> {
    let ucode = microcode::compile(open_input(Some(args.ucode.as_path()))?)
        .with_context(|| format!("in microcode '{}'", args.ucode.display()))?;
    let assembly = assembler::assemble(ucode.table(), open_input(args.input.as_deref())?)?;

    if let Some(output) = &args.output {
        write_output(Some(output), assembly.bytes())?;
    }
    for line in assembly.dump() {
        println!("{}", line);
    }
    Ok(())
}
