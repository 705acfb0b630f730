use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum, builder::{Styles, styling::{AnsiColor, Effects}}, crate_description, crate_version};
use clap_complete::Shell;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormatCli {
    Text,
    Yaml,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LineEndingCli {
    Lf,
    Crlf,
}

#[derive(Parser)]
#[command(name = "aiwdis",
    version = crate_version!(),
    about = crate_description!(),
    styles = Styles::styled()
        .header(AnsiColor::BrightGreen.on_default() | Effects::BOLD | Effects::UNDERLINE)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::BrightCyan.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Cyan.on_default()))]
pub struct Cli {
    /// Print debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<TopLevel>,
}

#[derive(Subcommand)]
pub enum TopLevel {
    /// Disassembles an AIW script file
    Disasm {
        /// Path to the script file
        input: PathBuf,

        /// Where to write the listing (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Encoding of the string pool, any WHATWG label (shift_jis, gbk, utf-8, ...)
        #[arg(short, long, default_value = "shift_jis")]
        encoding: String,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormatCli::Text)]
        format: OutputFormatCli,

        /// Line ending of the text listing
        #[arg(long, value_enum, default_value_t = LineEndingCli::Lf)]
        line_ending: LineEndingCli,
    },
    /// Generate shell completion
    Completion {
        #[arg(value_enum)]
        shell: Shell,
    },
}
