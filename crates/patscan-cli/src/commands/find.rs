//! Find command implementation.
//!
//! Compiles one ad-hoc pattern, searches an image file and prints each
//! match with its resolved address and surrounding bytes.

use std::path::Path;

use anyhow::{Context, Result, bail};
use owo_colors::OwoColorize;
use patscan_core::{AddressKind, AddressMeaning, Pattern, PatternMatch, SliceMemory};
use tracing::info;

use super::hex_utils::{format_hex_address, format_hex_bytes};
use super::hexdump::dump_lines;

#[derive(Debug, Clone)]
pub struct FindOptions {
    pub pattern: String,
    pub all: bool,
    pub kind: Option<AddressKind>,
    pub relative_to: i64,
    pub must_match_at_start: bool,
    pub base: u64,
    /// Bytes of context shown before and after each match.
    pub context: usize,
}

/// Run the find command
pub fn run(file: &Path, options: &FindOptions) -> Result<()> {
    let image = super::read_image(file)?;
    let pattern = build_pattern(options)?;
    let matches = search(&pattern, &image, options.all);

    if matches.is_empty() {
        bail!("Pattern not found: {}", pattern);
    }
    info!("{} match(es) for '{}'", matches.len(), pattern);

    let memory = SliceMemory::new(&image, options.base);
    for found in &matches {
        let at = options.base.wrapping_add(found.offset as u64);
        print!(
            "{} +{} [{}]",
            format_hex_address(at).green(),
            found.length,
            format_hex_bytes(&image[found.offset..found.end().min(found.offset + 16)])
        );
        if found.length > 16 {
            print!(" ...");
        }

        match pattern.resolve_address(found, options.base, &memory) {
            Ok(Some(address)) => print!(" -> {}", format_hex_address(address).cyan()),
            Ok(None) => {}
            Err(e) => print!(" -> {}", e.to_string().red()),
        }
        println!();

        if options.context > 0 {
            let start = found.offset.saturating_sub(options.context);
            let end = found.end().saturating_add(options.context).min(image.len());
            for line in dump_lines(&image[start..end], options.base.wrapping_add(start as u64), true)
            {
                println!("    {}", line.dimmed());
            }
        }
    }

    Ok(())
}

/// Compile the pattern with the requested address meaning.
pub fn build_pattern(options: &FindOptions) -> Result<Pattern> {
    let meaning = match options.kind {
        Some(kind) if kind.is_relative() => AddressMeaning::relative(kind, options.relative_to)?,
        Some(kind) => {
            if options.relative_to != 0 {
                bail!("--relative-to only applies to relative address kinds");
            }
            AddressMeaning::absolute(kind)?
        }
        None => AddressMeaning::NONE,
    };
    Pattern::parse(&options.pattern, meaning, options.must_match_at_start)
        .with_context(|| format!("Invalid pattern '{}'", options.pattern))
}

pub fn search(pattern: &Pattern, image: &[u8], all: bool) -> Vec<PatternMatch> {
    if all {
        pattern.find_all(image)
    } else {
        pattern.find_match(image).into_iter().collect()
    }
}
