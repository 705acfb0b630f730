use std::path::Path;

use anyhow::{Context, Result, anyhow};
use clap::{CommandFactory, Parser};

use crate::cli::{Cli, LineEndingCli, OutputFormatCli, TopLevel};

mod cli;

fn init_logger(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    env_logger::init_from_env(env_logger::Env::default().default_filter_or(default));
}

fn render(
    bytes: &[u8],
    encoding: &'static encoding_rs::Encoding,
    format: OutputFormatCli,
    line_ending: LineEndingCli,
) -> Result<String> {
    let line_ending = match line_ending {
        LineEndingCli::Lf => aiwdis_lib::LineEnding::Lf,
        LineEndingCli::Crlf => aiwdis_lib::LineEnding::CrLf,
    };

    Ok(match format {
        OutputFormatCli::Text => aiwdis_lib::disassemble_with_options(
            bytes,
            aiwdis_lib::DisasmOptions {
                encoding,
                line_ending,
            },
        )?,
        OutputFormatCli::Yaml => serde_yaml::to_string(&aiwdis_lib::disassemble(bytes, &encoding)?)?,
    })
}

fn disasm(
    input: &Path,
    output: Option<&Path>,
    encoding: &str,
    format: OutputFormatCli,
    line_ending: LineEndingCli,
) -> Result<()> {
    let encoding = resolve_encoding(encoding)?;
    let bytes = std::fs::read(input).with_context(|| format!("failed to read {input:?}"))?;
    log::info!("disassembling {input:?} ({} bytes) as {}", bytes.len(), encoding.name());

    let out = render(&bytes, encoding, format, line_ending)
        .with_context(|| format!("failed to disassemble {input:?}"))?;

    match output {
        Some(path) => {
            std::fs::write(path, out).with_context(|| format!("failed to write {path:?}"))?;
            log::info!("wrote {path:?}");
        }
        None => print!("{out}"),
    }
    Ok(())
}

fn resolve_encoding(label: &str) -> Result<&'static encoding_rs::Encoding> {
    encoding_rs::Encoding::for_label(label.as_bytes())
        .ok_or_else(|| anyhow!("unknown encoding: {label}"))
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Some(TopLevel::Disasm {
            input,
            output,
            encoding,
            format,
            line_ending,
        }) => disasm(&input, output.as_deref(), &encoding, format, line_ending),
        Some(TopLevel::Completion { shell }) => {
            let mut cmd = Cli::command();
            let bin_name = cmd.get_name().to_string();
            clap_complete::generate(shell, &mut cmd, bin_name, &mut std::io::stdout());
            Ok(())
        }
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_logger(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
