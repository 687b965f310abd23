//! Run-length compression of token streams into segments.

use strum::IntoStaticStr;

use super::Token;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr)]
pub enum SegmentKind {
    Literal,
    MaskedLiteral,
    SkipFixed,
    SkipVariable,
    Capture,
}

impl SegmentKind {
    /// Whether the segment consumes a fixed number of bytes.
    pub fn is_fixed(&self) -> bool {
        *self != Self::SkipVariable
    }
}

/// A maximal run of same-kind tokens.
///
/// `offset` indexes the pattern's raw byte and mask arrays, which hold one
/// entry per fixed-width token. It is also the segment's distance from the
/// pattern start when every unbounded gap matches zero bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub offset: usize,
    pub length: usize,
    pub kind: SegmentKind,
}

impl Segment {
    pub fn range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.length
    }
}

#[derive(Debug, Default)]
pub(crate) struct Compiled {
    pub bytes: Vec<u8>,
    pub mask: Vec<u8>,
    pub segments: Vec<Segment>,
}

pub(crate) fn compile(tokens: impl IntoIterator<Item = Token>) -> Result<Compiled> {
    let mut out = Compiled::default();
    let mut token_count = 0;
    let mut has_gap = false;

    for (index, token) in tokens.into_iter().enumerate() {
        token_count += 1;
        let token = token.normalized();
        let kind = token.kind();

        if kind == SegmentKind::SkipVariable {
            if matches!(out.segments.last(), Some(last) if last.kind == kind) {
                continue;
            }
            if has_gap {
                return Err(Error::MultipleVariableGaps(index));
            }
            has_gap = true;
            out.segments.push(Segment {
                offset: out.bytes.len(),
                length: 0,
                kind,
            });
            continue;
        }

        let (value, mask) = token.raw();
        out.bytes.push(value);
        out.mask.push(mask);

        match out.segments.last_mut() {
            Some(last) if last.kind == kind => last.length += 1,
            _ => out.segments.push(Segment {
                offset: out.bytes.len() - 1,
                length: 1,
                kind,
            }),
        }
    }

    if token_count == 0 {
        return Err(Error::EmptyPattern);
    }
    if out.bytes.is_empty() {
        return Err(Error::NoContent);
    }
    Ok(out)
}
