use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use patscan_core::AddressKind;
use tracing::debug;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use commands::find::FindOptions;
use commands::hex_utils::parse_hex_address;
use config::Config;

#[derive(Parser)]
#[command(name = "patscan")]
#[command(about = "Byte-pattern scanner for code images")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Config file (defaults to ./patscan.toml when present)
    #[arg(short, long, global = true, env = "PATSCAN_CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Run every signature of a signature file against an image
    Scan {
        /// Image file to scan
        file: PathBuf,

        /// Signature file (JSON)
        #[arg(short, long)]
        signatures: Option<PathBuf>,

        /// Address of the image's first byte (hex)
        #[arg(short, long, value_parser = parse_hex_address)]
        base: Option<u64>,

        /// Print hits as JSON
        #[arg(long)]
        json: bool,
    },

    /// Search an image for a single pattern
    Find {
        /// Image file to search
        file: PathBuf,

        /// Pattern text, e.g. "48 8B 05 @@ @@ @@ @@"
        #[arg(short, long)]
        pattern: String,

        /// Report every non-overlapping match
        #[arg(long)]
        all: bool,

        /// Address kind of the captured bytes, e.g. "rel32|indirect"
        #[arg(short, long)]
        kind: Option<AddressKind>,

        /// Distance from the match start that relative displacements count from
        #[arg(short, long, default_value_t = 0, allow_negative_numbers = true)]
        relative_to: i64,

        /// Only accept a match at the first byte of the image
        #[arg(long)]
        at_start: bool,

        /// Address of the image's first byte (hex)
        #[arg(short, long, value_parser = parse_hex_address)]
        base: Option<u64>,
    },

    /// Dump raw bytes of an image
    Hexdump {
        /// Image file
        file: PathBuf,

        /// File offset to start at (hex)
        #[arg(short, long, value_parser = parse_hex_address, default_value = "0")]
        offset: u64,

        /// Number of bytes to dump
        #[arg(short, long, default_value_t = 256)]
        size: usize,

        /// Address of the image's first byte (hex)
        #[arg(short, long, value_parser = parse_hex_address)]
        base: Option<u64>,

        /// Hide the ASCII column
        #[arg(long)]
        no_ascii: bool,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let directive = if args.verbose {
        "patscan=debug"
    } else {
        "patscan=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(directive.parse()?))
        .with_writer(std::io::stderr)
        .init();

    let config = Config::resolve(args.config.as_deref())?;
    debug!("Using config: {:?}", config);

    match args.command {
        Command::Scan {
            file,
            signatures,
            base,
            json,
        } => {
            let Some(signatures) = signatures.or_else(|| config.signatures.clone()) else {
                bail!("No signature file given; pass --signatures or set `signatures` in the config");
            };
            commands::scan::run(&file, &signatures, config.base_or(base), json)
        }
        Command::Find {
            file,
            pattern,
            all,
            kind,
            relative_to,
            at_start,
            base,
        } => commands::find::run(
            &file,
            &FindOptions {
                pattern,
                all,
                kind,
                relative_to,
                must_match_at_start: at_start,
                base: config.base_or(base),
                context: config.context_bytes(),
            },
        ),
        Command::Hexdump {
            file,
            offset,
            size,
            base,
            no_ascii,
        } => commands::hexdump::run(&file, offset, size, config.base_or(base), !no_ascii),
    }
}
