//! Optional `patscan.toml` defaults.
//!
//! ```toml
//! base = 0x140000000
//! signatures = "signatures.json"
//! context = 16
//! ```
//!
//! Command-line arguments always take precedence over the file.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Address of an image's first byte.
    pub base: Option<u64>,
    /// Signature file used by `scan` when none is given.
    pub signatures: Option<PathBuf>,
    /// Bytes of context shown around each `find` match.
    pub context: Option<usize>,
}

impl Config {
    pub const DEFAULT_PATH: &'static str = "patscan.toml";
    const DEFAULT_CONTEXT: usize = 16;

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Invalid config {}", path.display()))
    }

    /// Load `explicit`, or the default file when it exists, or nothing.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path,
            None if Path::new(Self::DEFAULT_PATH).is_file() => Path::new(Self::DEFAULT_PATH),
            None => return Ok(Self::default()),
        };
        let config = Self::load(path)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn base_or(&self, arg: Option<u64>) -> u64 {
        arg.or(self.base).unwrap_or(0)
    }

    pub fn context_bytes(&self) -> usize {
        self.context.unwrap_or(Self::DEFAULT_CONTEXT)
    }
}
