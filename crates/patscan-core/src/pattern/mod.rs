//! Compiled byte patterns.
//!
//! A [`Pattern`] is built once from a token stream and then matched against
//! any number of caller-owned buffers:
//!
//! ```
//! use patscan_core::{AddressKind, AddressMeaning, Pattern};
//!
//! // lea rcx, [rip+disp32]
//! let meaning = AddressMeaning::relative(AddressKind::REL32, 7).unwrap();
//! let pattern = Pattern::parse("48 8D 0D @@ @@ @@ @@", meaning, false).unwrap();
//!
//! let code = [0x90, 0x48, 0x8D, 0x0D, 0x10, 0x00, 0x00, 0x00];
//! let found = pattern.find_match(&code).unwrap();
//! assert_eq!(found.offset, 1);
//! assert_eq!(found.length, 7);
//! assert_eq!(pattern.address(&found, 0x1000), Some(0x1000 + 1 + 7 + 0x10));
//! ```

mod matcher;
mod segment;
mod token;

use std::fmt;
use std::str::FromStr;

use memchr::memmem;
use tracing::debug;

use crate::address::AddressMeaning;
use crate::error::{Error, Result};
use crate::memory::ReadMemory;

pub use segment::{Segment, SegmentKind};
pub use token::{Token, format_tokens, parse_tokens, tokens_from_mask, tokens_from_packed};

/// Maximum number of captured bytes (one machine word).
pub const MAX_CAPTURE_BYTES: usize = 8;

/// Result of a successful match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatternMatch {
    /// Offset of the first matched byte in the searched buffer.
    pub offset: usize,
    /// Number of bytes covered, including bytes consumed by an unbounded gap.
    pub length: usize,
    /// Raw little-endian value of the captured bytes, if the pattern captures.
    pub capture: Option<u64>,
}

impl PatternMatch {
    pub fn end(&self) -> usize {
        self.offset + self.length
    }
}

/// A literal segment used to seed a substring search.
#[derive(Debug, Clone)]
struct Anchor {
    /// Index of the literal segment.
    segment: usize,
    /// Fixed distance from the search origin to the literal.
    distance: usize,
    finder: memmem::Finder<'static>,
}

#[derive(Debug, Clone)]
pub struct Pattern {
    bytes: Vec<u8>,
    mask: Vec<u8>,
    segments: Vec<Segment>,
    min_length: usize,
    capture_bytes: usize,
    meaning: AddressMeaning,
    must_match_at_start: bool,
    /// Earliest literal ahead of any unbounded gap, measured from the
    /// pattern start.
    first_literal: Option<Anchor>,
    /// First literal after the unbounded gap, measured from the gap.
    gap_anchor: Option<Anchor>,
}

impl Pattern {
    pub fn new(
        tokens: impl IntoIterator<Item = Token>,
        meaning: AddressMeaning,
        must_match_at_start: bool,
    ) -> Result<Self> {
        let compiled = segment::compile(tokens)?;

        let min_length = compiled.bytes.len();
        let capture_bytes = compiled
            .segments
            .iter()
            .filter(|s| s.kind == SegmentKind::Capture)
            .map(|s| s.length)
            .sum::<usize>()
            .min(MAX_CAPTURE_BYTES);

        let first_literal = find_anchor(&compiled.segments, &compiled.bytes, 0);
        let gap_anchor = compiled
            .segments
            .iter()
            .position(|s| s.kind == SegmentKind::SkipVariable)
            .and_then(|gap| find_anchor(&compiled.segments, &compiled.bytes, gap + 1));

        let pattern = Self {
            bytes: compiled.bytes,
            mask: compiled.mask,
            segments: compiled.segments,
            min_length,
            capture_bytes,
            meaning,
            must_match_at_start,
            first_literal,
            gap_anchor,
        };

        debug!(
            "Compiled pattern '{}': {} segments, min_length={}, capture_bytes={}",
            pattern,
            pattern.segments.len(),
            pattern.min_length,
            pattern.capture_bytes
        );
        Ok(pattern)
    }

    /// Build from the packed `u16` form (see [`Token::from_packed`]).
    pub fn from_packed(
        packed: &[u16],
        meaning: AddressMeaning,
        must_match_at_start: bool,
    ) -> Result<Self> {
        if packed.is_empty() {
            return Err(Error::EmptyPattern);
        }
        Self::new(tokens_from_packed(packed)?, meaning, must_match_at_start)
    }

    /// Build from a mask array and a value array (see [`Token::from_masked`]).
    pub fn from_mask(
        mask: &[u8],
        values: &[u8],
        meaning: AddressMeaning,
        must_match_at_start: bool,
    ) -> Result<Self> {
        if values.is_empty() {
            return Err(Error::EmptyPattern);
        }
        Self::new(tokens_from_mask(mask, values)?, meaning, must_match_at_start)
    }

    /// Build from the text form, e.g. `"E8 @@ @@ @@ @@ 48 85 C0"`.
    pub fn parse(text: &str, meaning: AddressMeaning, must_match_at_start: bool) -> Result<Self> {
        Self::new(parse_tokens(text)?, meaning, must_match_at_start)
    }

    /// A pattern of exact bytes.
    pub fn literal(bytes: &[u8]) -> Result<Self> {
        Self::new(
            bytes.iter().copied().map(Token::Literal),
            AddressMeaning::NONE,
            false,
        )
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Bytes a match needs at minimum; unbounded gaps count as zero.
    pub fn min_length(&self) -> usize {
        self.min_length
    }

    pub fn capture_bytes(&self) -> usize {
        self.capture_bytes
    }

    pub fn meaning(&self) -> AddressMeaning {
        self.meaning
    }

    pub fn must_match_at_start(&self) -> bool {
        self.must_match_at_start
    }

    /// Bytes of the earliest literal segment and their offset from the
    /// pattern start. `None` when no literal sits at a fixed distance.
    pub fn first_literal(&self) -> Option<(&[u8], usize)> {
        self.first_literal
            .as_ref()
            .map(|anchor| (anchor.finder.needle(), anchor.distance))
    }

    pub fn has_variable_gap(&self) -> bool {
        self.segments
            .iter()
            .any(|s| s.kind == SegmentKind::SkipVariable)
    }

    /// Reconstruct the token stream.
    pub fn tokens(&self) -> Vec<Token> {
        let mut tokens = Vec::with_capacity(self.bytes.len() + 1);
        for segment in &self.segments {
            for i in segment.range() {
                tokens.push(match segment.kind {
                    SegmentKind::Literal => Token::Literal(self.bytes[i]),
                    SegmentKind::MaskedLiteral => Token::Masked {
                        value: self.bytes[i],
                        mask: self.mask[i],
                    },
                    SegmentKind::SkipFixed => Token::SkipOne,
                    SegmentKind::Capture => Token::Capture,
                    SegmentKind::SkipVariable => unreachable!("variable gaps have no width"),
                });
            }
            if segment.kind == SegmentKind::SkipVariable {
                tokens.push(Token::SkipMany);
            }
        }
        tokens
    }

    /// Resolve the captured value without reading memory.
    ///
    /// Indirect and precode kinds need [`Pattern::resolve_address`].
    pub fn address(&self, found: &PatternMatch, base: u64) -> Option<u64> {
        found
            .capture
            .map(|raw| self.meaning.resolve(base, found.offset, raw))
    }

    /// Resolve the captured value through this pattern's address meaning.
    ///
    /// `base` is the address of the first byte of the searched buffer.
    pub fn resolve_address<R: ReadMemory + ?Sized>(
        &self,
        found: &PatternMatch,
        base: u64,
        memory: &R,
    ) -> Result<Option<u64>> {
        found
            .capture
            .map(|raw| {
                self.meaning
                    .process_address(base, found.offset, raw, memory)
            })
            .transpose()
    }

    fn literal_bytes(&self, segment: &Segment) -> &[u8] {
        &self.bytes[segment.range()]
    }
}

/// Locate the first literal at or after `from`, summing the widths of the
/// fixed segments in between. An unbounded gap ends the search since the
/// distance past it is not fixed.
fn find_anchor(segments: &[Segment], bytes: &[u8], from: usize) -> Option<Anchor> {
    let mut distance = 0;
    for (index, segment) in segments.iter().enumerate().skip(from) {
        match segment.kind {
            SegmentKind::Literal => {
                return Some(Anchor {
                    segment: index,
                    distance,
                    finder: memmem::Finder::new(&bytes[segment.range()]).into_owned(),
                });
            }
            SegmentKind::SkipVariable => return None,
            _ => distance += segment.length,
        }
    }
    None
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_tokens(&self.tokens()))
    }
}

impl FromStr for Pattern {
    type Err = Error;

    /// Parse with [`AddressMeaning::NONE`], free search.
    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s, AddressMeaning::NONE, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::AddressKind;

    #[test]
    fn test_lengths_and_capture_bytes() {
        let pattern: Pattern = "48 8B ?? * @@ @@ @@ @@ C3".parse().unwrap();
        assert_eq!(pattern.min_length(), 8);
        assert_eq!(pattern.capture_bytes(), 4);
        assert!(pattern.has_variable_gap());

        let wide: Pattern = "AA @@ @@ @@ @@ @@ @@ @@ @@ @@ @@".parse().unwrap();
        assert_eq!(wide.capture_bytes(), MAX_CAPTURE_BYTES);
    }

    #[test]
    fn test_first_literal() {
        let pattern: Pattern = "?? ?? 4? 8B 05 @@ C3".parse().unwrap();
        assert_eq!(pattern.first_literal(), Some((&[0x8B, 0x05][..], 3)));

        let anchorless: Pattern = "?? 4? @@".parse().unwrap();
        assert_eq!(anchorless.first_literal(), None);

        let behind_gap: Pattern = "?? * AA".parse().unwrap();
        assert_eq!(behind_gap.first_literal(), None);

        let before_gap: Pattern = "?? AA * BB".parse().unwrap();
        assert_eq!(before_gap.first_literal(), Some((&[0xAA][..], 1)));
    }

    #[test]
    fn test_construction_styles_agree() {
        let meaning = AddressMeaning::relative(AddressKind::REL32, 7).unwrap();
        let packed = Pattern::from_packed(
            &[0x0048, 0x008D, 0x000D, 0xFF02, 0xFF02, 0xFF02, 0xFF02, 0xFF01, 0xFF00, 0x00C3],
            meaning,
            false,
        )
        .unwrap();
        let masked = Pattern::from_mask(
            &[0xFF, 0xFF, 0xFF, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xFF],
            &[0x48, 0x8D, 0x0D, 0x02, 0x02, 0x02, 0x02, 0x01, 0x00, 0xC3],
            meaning,
            false,
        )
        .unwrap();
        let text = Pattern::parse("48 8D 0D @@ @@ @@ @@ * ?? C3", meaning, false).unwrap();

        assert_eq!(packed.segments(), masked.segments());
        assert_eq!(packed.segments(), text.segments());
        assert_eq!(packed.tokens(), text.tokens());
        assert_eq!(packed.to_string(), "48 8D 0D @@ @@ @@ @@ * ?? C3");
    }

    #[test]
    fn test_construction_errors() {
        assert!(matches!(
            Pattern::from_packed(&[], AddressMeaning::NONE, false),
            Err(Error::EmptyPattern)
        ));
        assert!(matches!(
            Pattern::from_mask(&[], &[], AddressMeaning::NONE, false),
            Err(Error::EmptyPattern)
        ));
        assert!(matches!("*".parse::<Pattern>(), Err(Error::NoContent)));
        assert!(matches!(
            Pattern::from_mask(&[0xFF], &[1, 2], AddressMeaning::NONE, false),
            Err(Error::MaskTooShort { .. })
        ));
        assert!(matches!(
            Pattern::from_packed(&[0xFF09], AddressMeaning::NONE, false),
            Err(Error::InvalidToken { .. })
        ));
        assert!(matches!("".parse::<Pattern>(), Err(Error::EmptyPattern)));
    }

    #[test]
    fn test_degenerate_masks_display_and_reparse() {
        let pattern = Pattern::new(
            [
                Token::Literal(0xAA),
                Token::Masked {
                    value: 0x00,
                    mask: 0x00,
                },
                Token::Masked {
                    value: 0xC3,
                    mask: 0xFF,
                },
            ],
            AddressMeaning::NONE,
            false,
        )
        .unwrap();
        assert_eq!(pattern.to_string(), "AA ?? C3");

        let reparsed: Pattern = pattern.to_string().parse().unwrap();
        assert_eq!(reparsed.segments(), pattern.segments());
    }

    #[test]
    fn test_address_without_capture_is_none() {
        let pattern = Pattern::literal(&[0xAA, 0xBB]).unwrap();
        let found = pattern.find_match(&[0xAA, 0xBB]).unwrap();
        assert_eq!(found.capture, None);
        assert_eq!(pattern.address(&found, 0x1000), None);
    }
}
