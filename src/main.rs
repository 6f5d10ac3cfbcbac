//! hexcast CLI
//!
//! Command-line tool for converting, merging and inspecting hex record
//! files. A path of `-` stands for stdin/stdout.

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use hexcast::codec::parse_int;
use hexcast::{load, merge};
use std::io::Write;
use std::process::ExitCode;

/// Hex record file toolkit.
///
/// Converts, merges and inspects Intel HEX, Motorola S-record, Tektronix
/// extended HEX, ASCII-HEX, TI-TXT, MOS Technology, Atmel generic and raw
/// binary files.
#[derive(Parser, Debug)]
#[command(name = "hexcast")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert a file into another record format
    Convert {
        /// Input file path (- for stdin)
        input: String,

        /// Output file path (- for stdout)
        output: String,

        /// Input format name (guessed when omitted)
        #[arg(short = 'i', long)]
        input_format: Option<String>,

        /// Output format name (guessed from the output extension)
        #[arg(short = 'o', long)]
        output_format: Option<String>,

        /// Shift content addresses by this signed offset
        #[arg(long, allow_hyphen_values = true)]
        shift: Option<String>,

        /// Crop content to [START, ENDEX)
        #[arg(long, num_args = 2, value_names = ["START", "ENDEX"])]
        crop: Option<Vec<String>>,
    },

    /// Merge multiple files into one
    Merge {
        /// Input file paths, in merging order
        #[arg(required = true)]
        inputs: Vec<String>,

        /// Output file path (- for stdout)
        #[arg(short, long)]
        output: String,

        /// Output format name (guessed from the output extension)
        #[arg(long)]
        output_format: Option<String>,
    },

    /// Show file metadata and memory layout
    Info {
        /// Input file path (- for stdin)
        input: String,

        /// Input format name (guessed when omitted)
        #[arg(short = 'i', long)]
        input_format: Option<String>,

        /// Output format
        #[arg(short, long, default_value = "human")]
        format: OutputFormat,
    },

    /// Print records with field-level colors
    Print {
        /// Input file path (- for stdin)
        input: String,

        /// Input format name (guessed when omitted)
        #[arg(short = 'i', long)]
        input_format: Option<String>,

        /// Colorize record tokens with ANSI escapes
        #[arg(short, long)]
        color: bool,
    },

    /// Validate record structure
    Validate {
        /// Input file path (- for stdin)
        input: String,

        /// Input format name (guessed when omitted)
        #[arg(short = 'i', long)]
        input_format: Option<String>,
    },
}

/// Output format options for `info`.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON output
    Json,
}

fn main() -> ExitCode {
    let args = Args::parse();

    if args.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("hexcast=debug")
            .init();
    }

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("Error: {error:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> anyhow::Result<()> {
    match &args.command {
        Command::Convert {
            input,
            output,
            input_format,
            output_format,
            shift,
            crop,
        } => cmd_convert(
            input,
            output,
            input_format.as_deref(),
            output_format.as_deref(),
            shift.as_deref(),
            crop.as_deref(),
        ),
        Command::Merge {
            inputs,
            output,
            output_format,
        } => cmd_merge(inputs, output, output_format.as_deref()),
        Command::Info {
            input,
            input_format,
            format,
        } => cmd_info(input, input_format.as_deref(), *format),
        Command::Print {
            input,
            input_format,
            color,
        } => cmd_print(input, input_format.as_deref(), *color),
        Command::Validate {
            input,
            input_format,
        } => cmd_validate(input, input_format.as_deref()),
    }
}

fn parse_address(text: &str) -> anyhow::Result<u64> {
    let value = parse_int(text).with_context(|| format!("invalid address {text:?}"))?;
    u64::try_from(value).with_context(|| format!("address out of range: {text:?}"))
}

fn cmd_convert(
    input: &str,
    output: &str,
    input_format: Option<&str>,
    output_format: Option<&str>,
    shift: Option<&str>,
    crop: Option<&[String]>,
) -> anyhow::Result<()> {
    let mut in_file =
        load(input, input_format).with_context(|| format!("cannot load {input:?}"))?;
    tracing::debug!(format = in_file.format_name(), "loaded input");

    if let Some(shift) = shift {
        let offset = parse_int(shift).with_context(|| format!("invalid offset {shift:?}"))?;
        let offset = i64::try_from(offset).context("offset out of range")?;
        in_file.shift(offset)?;
    }
    if let Some([start, endex]) = crop {
        let start = parse_address(start)?;
        let endex = parse_address(endex)?;
        in_file.crop(Some(start), Some(endex))?;
    }

    let out_name = match output_format {
        Some(name) => name,
        None => hexcast::guess_format_name(output)
            .with_context(|| format!("cannot guess format of {output:?}"))?,
    };
    let mut out_file = in_file.convert_to(out_name)?;
    out_file
        .save(output)
        .with_context(|| format!("cannot save {output:?}"))?;
    tracing::debug!(format = out_name, "saved output");
    Ok(())
}

fn cmd_merge(inputs: &[String], output: &str, output_format: Option<&str>) -> anyhow::Result<()> {
    let in_paths: Vec<&str> = inputs.iter().map(String::as_str).collect();
    merge(&in_paths, Some(output), &[], output_format)
        .with_context(|| format!("cannot merge into {output:?}"))?;
    Ok(())
}

fn cmd_info(input: &str, input_format: Option<&str>, format: OutputFormat) -> anyhow::Result<()> {
    let mut file = load(input, input_format).with_context(|| format!("cannot load {input:?}"))?;
    let name = file.format_name();
    let memory = file.memory()?;
    let spans = memory.intervals(None, None);
    let holes = memory.gaps(None, None);
    let content_bytes = memory.len();
    let meta = file.meta();

    match format {
        OutputFormat::Human => {
            println!("File:    {input}");
            println!("Format:  {name}");
            println!("Bytes:   {content_bytes}");
            if let Some(startaddr) = meta.startaddr {
                println!("Start:   0x{startaddr:X}");
            }
            if let Some(header) = &meta.header {
                println!("Header:  {:?}", String::from_utf8_lossy(header));
            }
            println!("Spans:");
            for (start, endex) in &spans {
                println!("  0x{start:08X} - 0x{endex:08X} ({} bytes)", endex - start);
            }
            if !holes.is_empty() {
                println!("Holes:");
                for (start, endex) in &holes {
                    println!("  0x{start:08X} - 0x{endex:08X} ({} bytes)", endex - start);
                }
            }
        }
        OutputFormat::Json => {
            #[derive(serde::Serialize)]
            struct JsonOutput<'a> {
                file: &'a str,
                format: &'a str,
                bytes: usize,
                meta: &'a hexcast::Meta,
                spans: &'a [(u64, u64)],
                holes: &'a [(u64, u64)],
            }

            let output = JsonOutput {
                file: input,
                format: name,
                bytes: content_bytes,
                meta: &meta,
                spans: &spans,
                holes: &holes,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

fn cmd_print(input: &str, input_format: Option<&str>, color: bool) -> anyhow::Result<()> {
    let mut file = load(input, input_format).with_context(|| format!("cannot load {input:?}"))?;
    let mut stdout = std::io::stdout().lock();
    file.print(&mut stdout, color, b"\n")?;
    stdout.flush()?;
    Ok(())
}

fn cmd_validate(input: &str, input_format: Option<&str>) -> anyhow::Result<()> {
    let mut file = load(input, input_format).with_context(|| format!("cannot load {input:?}"))?;
    file.validate_records()
        .with_context(|| format!("{input:?} is not structurally valid"))?;
    println!("{input}: OK ({})", file.format_name());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parsing() {
        let args = Args::try_parse_from(["hexcast", "convert", "in.hex", "out.srec"]).unwrap();
        match args.command {
            Command::Convert { input, output, .. } => {
                assert_eq!(input, "in.hex");
                assert_eq!(output, "out.srec");
            }
            _ => panic!("expected convert"),
        }
    }

    #[test]
    fn test_convert_options() {
        let args = Args::try_parse_from([
            "hexcast", "convert", "in.hex", "out.srec", "--shift", "-0x100", "--crop", "0x1000",
            "2k",
        ])
        .unwrap();
        match args.command {
            Command::Convert { shift, crop, .. } => {
                assert_eq!(shift.as_deref(), Some("-0x100"));
                assert_eq!(crop.unwrap(), ["0x1000", "2k"]);
            }
            _ => panic!("expected convert"),
        }
    }

    #[test]
    fn test_merge_requires_inputs() {
        assert!(Args::try_parse_from(["hexcast", "merge", "-o", "out.hex"]).is_err());
    }

    #[test]
    fn test_info_format_options() {
        let args = Args::try_parse_from(["hexcast", "info", "-f", "json", "in.hex"]).unwrap();
        match args.command {
            Command::Info { format, .. } => assert!(matches!(format, OutputFormat::Json)),
            _ => panic!("expected info"),
        }
    }

    #[test]
    fn test_parse_address_values() {
        assert_eq!(parse_address("0x1000").unwrap(), 0x1000);
        assert_eq!(parse_address("4k").unwrap(), 4096);
        assert!(parse_address("-1").is_err());
    }

    #[test]
    fn test_end_to_end_convert() {
        let dir = tempfile::tempdir().unwrap();
        let in_path = dir.path().join("data.hex");
        let out_path = dir.path().join("data.srec");
        std::fs::write(&in_path, b":0312340061626391\r\n:00000001FF\r\n").unwrap();

        cmd_convert(
            in_path.to_str().unwrap(),
            out_path.to_str().unwrap(),
            None,
            None,
            Some("0x10"),
            None,
        )
        .unwrap();

        let mut out_file = load(out_path.to_str().unwrap(), None).unwrap();
        assert_eq!(
            out_file.memory().unwrap().to_blocks(),
            [(0x1244, b"abc".to_vec())]
        );
    }
}
