//! CLI command implementations.

pub mod find;
pub mod hex_utils;
pub mod hexdump;
pub mod scan;

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

/// Read a whole image file.
fn read_image(path: &Path) -> Result<Vec<u8>> {
    let image = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    info!("Read {} ({} bytes)", path.display(), image.len());
    Ok(image)
}
