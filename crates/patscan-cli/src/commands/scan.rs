//! Scan command implementation.
//!
//! Loads a signature file, compiles it into one pattern set and reports the
//! first hit of every signature in a single pass over the image.

use std::path::Path;

use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use patscan_core::{SignatureHit, SliceMemory, load_signatures};
use tracing::{info, warn};

use super::hex_utils::format_hex_address;

/// Run the scan command
pub fn run(file: &Path, signatures: &Path, base: u64, json: bool) -> Result<()> {
    let image = super::read_image(file)?;
    let set = load_signatures(signatures)
        .with_context(|| format!("Failed to load signatures from {}", signatures.display()))?;
    info!(
        "Loaded signature set '{}' ({} entries)",
        set.version,
        set.entries.len()
    );

    let compiled = set.compile()?;
    let memory = SliceMemory::new(&image, base);
    let hits = compiled.scan(&image, base, &memory);
    let missing = missing_names(compiled.names(), &hits);

    if json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
    } else {
        print_hits(&hits, base);
        for name in &missing {
            println!("{:<32} {}", name, "not found".red());
        }
    }

    if !missing.is_empty() {
        warn!("{} of {} signatures not found", missing.len(), compiled.len());
    }
    Ok(())
}

fn print_hits(hits: &[SignatureHit], base: u64) {
    let width = hits.iter().map(|h| h.name.len()).max().unwrap_or(0).max(32);
    for hit in hits {
        let at = format_hex_address(base.wrapping_add(hit.offset as u64));
        match hit.address {
            Some(address) => println!(
                "{:<width$} {} at {}",
                hit.name,
                format_hex_address(address).green(),
                at,
                width = width
            ),
            None => println!(
                "{:<width$} {} at {}",
                hit.name,
                "matched".yellow(),
                at,
                width = width
            ),
        }
    }
}

/// Signatures without a hit, in registration order.
fn missing_names<'a>(names: &'a [String], hits: &[SignatureHit]) -> Vec<&'a str> {
    names
        .iter()
        .filter(|name| !hits.iter().any(|hit| &hit.name == *name))
        .map(String::as_str)
        .collect()
}
