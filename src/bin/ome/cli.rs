//! CLI argument parsing, grounded in `why/cli.rs`'s `clap`-derive `Cli`/
//! `LogLevel` shape.

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(author, version, about)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Specify the log level of the compiler.
    #[arg(value_enum, short, long, default_value_t = LogLevel::default())]
    pub verbosity: LogLevel,
}

impl Cli {
    pub fn init() -> Self {
        Cli::parse()
    }
}

#[derive(ValueEnum, Clone, Default, Debug)]
pub enum LogLevel {
    #[default]
    #[value(alias("0"))]
    Error,
    #[value(alias("1"))]
    Warn,
    #[value(alias("2"))]
    Info,
    #[value(alias("3"))]
    Debug,
    #[value(alias("4"))]
    Trace,
}

impl From<&LogLevel> for log::Level {
    fn from(value: &LogLevel) -> Self {
        match value {
            LogLevel::Error => log::Level::Error,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Info => log::Level::Info,
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Trace => log::Level::Trace,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Compile an OME source file to a native executable.
    Build(BuildArgs),

    /// Compile an OME source file to assembly text only, without invoking
    /// the assembler or linker.
    Asm(BuildArgs),
}

#[derive(Args, Debug, Clone)]
pub struct BuildArgs {
    /// The path to the OME source file.
    #[arg(index = 1)]
    pub file: std::path::PathBuf,

    /// The path to the output binary (or assembly text file for `asm`).
    #[arg(short, long)]
    pub output: Option<std::path::PathBuf>,

    /// The target platform to compile for (e.g. `x86_64-linux`,
    /// `x86_64-macos`). Defaults to the host platform.
    #[arg(long)]
    pub target: Option<String>,

    /// Dump the parsed AST as JSON instead of compiling, and exit.
    #[arg(long)]
    pub dump_ast: bool,

    /// Dump the AST after both resolver passes as JSON instead of
    /// compiling, and exit.
    #[arg(long)]
    pub dump_resolved_ast: bool,

    /// Dump the lowered, optimised, register-allocated IR as JSON instead
    /// of compiling, and exit.
    #[arg(long)]
    pub dump_ir: bool,

    /// Dump the final emitted NASM text instead of compiling, and exit.
    /// Equivalent to the `asm` subcommand, offered here too so any of the
    /// four dump flags can be reached from `build` without switching
    /// subcommands.
    #[arg(long)]
    pub dump_target_code: bool,
}
