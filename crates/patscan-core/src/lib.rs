//! # patscan-core
//!
//! Byte-pattern matching for code images.
//!
//! This crate provides:
//! - Pattern compilation from packed, mask/value or text descriptions
//! - Single-pattern matching with fixed skips, one unbounded gap and captures
//! - Multi-pattern dispatch keyed on each pattern's first literal byte
//! - Resolution of captured values into addresses (relative, absolute,
//!   indirect, precode stubs)
//! - JSON signature files that bundle named patterns with address meanings

pub mod address;
pub mod error;
pub mod memory;
pub mod pattern;
pub mod set;
pub mod signature;

pub use address::{AddressBase, AddressKind, AddressMeaning, AddressWidth};
pub use error::{Error, Result};
pub use memory::{LocalMemory, ReadMemory, SliceMemory};
pub use pattern::{
    MAX_CAPTURE_BYTES, Pattern, PatternMatch, Segment, SegmentKind, Token, format_tokens,
    parse_tokens, tokens_from_mask, tokens_from_packed,
};
pub use set::{PatternSet, SetMatch};
pub use signature::{
    AddressSpec, CompiledSignatures, SignatureDef, SignatureHit, SignatureSet, load_signatures,
    save_signatures,
};
