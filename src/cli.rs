use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::Level;

#[derive(Parser)]
#[command(name = "ucasm")]
#[command(version)]
#[command(about = "Compiles microcode ROM images and assembles programs for them", long_about = None)]
pub(crate) struct Cli {
    /// One of `TRACE`, `DEBUG`, `INFO`, `WARN`, or `ERROR`
    #[arg(short, long, global = true, env = "UCASM_LOG", default_value_t = Level::WARN)]
    pub(crate) log_level: Level,

    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Compile microcode into a ROM image
    Ucode(UcodeArgs),
    /// Assemble a program against the instructions of a microcode file
    Asm(AsmArgs),
}

#[derive(Args)]
pub(crate) struct UcodeArgs {
    /// Microcode source file (defaults to stdin)
    #[arg(short, long)]
    pub(crate) input: Option<PathBuf>,

    /// ROM image file (defaults to stdout)
    #[arg(short, long)]
    pub(crate) output: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = RomFormat::Binary)]
    pub(crate) format: RomFormat,

    /// Print the decoded control word of every address
    #[arg(short, long)]
    pub(crate) verbose: bool,
}

#[derive(Args)]
pub(crate) struct AsmArgs {
    /// Microcode source file declaring the instruction set
    #[arg(short, long)]
    pub(crate) ucode: PathBuf,

    /// Assembly source file (defaults to stdin)
    #[arg(short, long)]
    pub(crate) input: Option<PathBuf>,

    /// Machine code file; only the dump is printed when omitted
    #[arg(short, long)]
    pub(crate) output: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum RomFormat {
    /// Raw big-endian bytes
    Binary,
    /// One uppercase hex entry per line
    Hex,
}
