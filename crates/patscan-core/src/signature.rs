//! Signature files: named patterns with address meanings, stored as JSON.
//!
//! ```json
//! {
//!   "version": "2024-06",
//!   "entries": [
//!     { "name": "GlobalTable",
//!       "pattern": "48 8B 05 @@ @@ @@ @@ 48 85 C0",
//!       "address": { "kind": "rel32|indirect", "relative_to": 7 } }
//!   ]
//! }
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::address::{AddressKind, AddressMeaning};
use crate::error::{Error, Result};
use crate::memory::ReadMemory;
use crate::pattern::Pattern;
use crate::set::PatternSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressSpec {
    pub kind: AddressKind,
    /// Distance from the match start that relative displacements are
    /// measured from. Must be 0 for absolute kinds.
    #[serde(default)]
    pub relative_to: i64,
}

impl AddressSpec {
    pub fn meaning(&self) -> Result<AddressMeaning> {
        if self.kind.is_relative() {
            return AddressMeaning::relative(self.kind, self.relative_to);
        }
        if self.relative_to != 0 {
            return Err(Error::InvalidAddressMeaning(format!(
                "'{}' is absolute but relative_to is {}",
                self.kind, self.relative_to
            )));
        }
        AddressMeaning::absolute(self.kind)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureDef {
    pub name: String,
    pub pattern: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<AddressSpec>,
    #[serde(default)]
    pub must_match_at_start: bool,
    /// Added to the resolved address.
    #[serde(default)]
    pub addend: i64,
}

impl SignatureDef {
    pub fn compile(&self) -> Result<Pattern> {
        let meaning = match &self.address {
            Some(spec) => spec.meaning(),
            None => Ok(AddressMeaning::NONE),
        };
        meaning
            .and_then(|meaning| Pattern::parse(&self.pattern, meaning, self.must_match_at_start))
            .map_err(|e| Error::Signature {
                name: self.name.clone(),
                source: Box::new(e),
            })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureSet {
    pub version: String,
    pub entries: Vec<SignatureDef>,
}

impl SignatureSet {
    pub fn entry(&self, name: &str) -> Option<&SignatureDef> {
        self.entries
            .iter()
            .find(|entry| entry.name.eq_ignore_ascii_case(name))
    }

    pub fn compile(&self) -> Result<CompiledSignatures> {
        let patterns = self
            .entries
            .iter()
            .map(SignatureDef::compile)
            .collect::<Result<Vec<_>>>()?;

        debug!(
            "Compiled signature set '{}' ({} entries)",
            self.version,
            patterns.len()
        );

        Ok(CompiledSignatures {
            names: self.entries.iter().map(|e| e.name.clone()).collect(),
            addends: self.entries.iter().map(|e| e.addend).collect(),
            set: PatternSet::new(patterns),
        })
    }
}

pub fn load_signatures<P: AsRef<Path>>(path: P) -> Result<SignatureSet> {
    let content = fs::read_to_string(&path)?;
    let data = serde_json::from_str(&content)?;
    Ok(data)
}

pub fn save_signatures<P: AsRef<Path>>(path: P, signatures: &SignatureSet) -> Result<()> {
    let content = serde_json::to_string_pretty(signatures)?;
    fs::write(path, content)?;
    Ok(())
}

/// First match of one signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignatureHit {
    pub name: String,
    pub offset: usize,
    pub length: usize,
    /// Resolved address plus addend; `None` when the signature captures
    /// nothing or the address could not be resolved.
    pub address: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct CompiledSignatures {
    names: Vec<String>,
    addends: Vec<i64>,
    set: PatternSet,
}

impl CompiledSignatures {
    pub fn set(&self) -> &PatternSet {
        &self.set
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Find every signature in `data`, a buffer that lives at `base`.
    ///
    /// Signatures that do not match are omitted. Hits are ordered by
    /// signature registration order.
    pub fn scan<R: ReadMemory + ?Sized>(&self, data: &[u8], base: u64, memory: &R) -> Vec<SignatureHit> {
        let mut hits = Vec::new();

        for (index, found) in self.set.find_each(data).into_iter().enumerate() {
            let Some(found) = found else {
                debug!("Signature '{}' not found", self.names[index]);
                continue;
            };
            let pattern = &self.set.patterns()[index];

            let address = match pattern.resolve_address(&found, base, memory) {
                Ok(address) => address.map(|a| a.wrapping_add_signed(self.addends[index])),
                Err(e) => {
                    warn!(
                        "Signature '{}' matched at 0x{:X} but its address could not be resolved: {}",
                        self.names[index],
                        base + found.offset as u64,
                        e
                    );
                    None
                }
            };

            hits.push(SignatureHit {
                name: self.names[index].clone(),
                offset: found.offset,
                length: found.length,
                address,
            });
        }

        hits
    }
}
