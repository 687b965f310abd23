//! Segment walking.
//!
//! Fixed segments are checked in order from a cursor. The single unbounded
//! gap is resolved by searching forward for the next literal segment and
//! re-matching the rest of the pattern from each candidate, so a failed
//! attempt costs at most one pass over the remaining segments.

use tracing::trace;

use super::{MAX_CAPTURE_BYTES, Pattern, PatternMatch, SegmentKind};

/// Little-endian accumulator for captured bytes.
#[derive(Debug, Default, Clone, Copy)]
struct CaptureBuffer {
    bytes: [u8; MAX_CAPTURE_BYTES],
    len: usize,
}

impl CaptureBuffer {
    fn push(&mut self, src: &[u8]) {
        let n = src.len().min(MAX_CAPTURE_BYTES - self.len);
        self.bytes[self.len..self.len + n].copy_from_slice(&src[..n]);
        self.len += n;
    }

    fn value(&self) -> u64 {
        u64::from_le_bytes(self.bytes)
    }
}

impl Pattern {
    /// Match the pattern starting exactly at `offset`.
    pub fn match_at(&self, data: &[u8], offset: usize) -> Option<PatternMatch> {
        if offset > data.len() || data.len() - offset < self.min_length {
            return None;
        }

        let mut capture = CaptureBuffer::default();
        let end = self.match_segments(data, offset, 0, &mut capture)?;
        Some(PatternMatch {
            offset,
            length: end - offset,
            capture: (self.capture_bytes > 0).then(|| capture.value()),
        })
    }

    /// Find the first match in `data`, scanning offsets in ascending order.
    pub fn find_match(&self, data: &[u8]) -> Option<PatternMatch> {
        self.find_match_from(data, 0)
    }

    /// Like [`Pattern::find_match`], ignoring matches that start before
    /// `from`. Offsets in the result are relative to `data`.
    pub fn find_match_from(&self, data: &[u8], from: usize) -> Option<PatternMatch> {
        if self.must_match_at_start {
            return if from == 0 {
                self.match_at(data, 0)
            } else {
                None
            };
        }
        if from > data.len() || data.len() - from < self.min_length {
            return None;
        }

        match &self.first_literal {
            Some(anchor) => {
                let mut search = from + anchor.distance;
                while search <= data.len() {
                    let pos = search + anchor.finder.find(&data[search..])?;
                    let start = pos - anchor.distance;
                    trace!("Anchor hit at {:#x}, trying pattern start {:#x}", pos, start);
                    if let Some(found) = self.match_at(data, start) {
                        return Some(found);
                    }
                    search = pos + 1;
                }
                None
            }
            None => (from..=data.len() - self.min_length).find_map(|start| self.match_at(data, start)),
        }
    }

    /// All non-overlapping matches, in ascending order.
    pub fn find_all(&self, data: &[u8]) -> Vec<PatternMatch> {
        let mut results = Vec::new();
        let mut from = 0;
        while let Some(found) = self.find_match_from(data, from) {
            from = found.offset + found.length.max(1);
            results.push(found);
        }
        results
    }

    /// Walk segments from `first` onwards, returning the end cursor.
    fn match_segments(
        &self,
        data: &[u8],
        mut cursor: usize,
        first: usize,
        capture: &mut CaptureBuffer,
    ) -> Option<usize> {
        for (index, segment) in self.segments.iter().enumerate().skip(first) {
            if segment.kind == SegmentKind::SkipVariable {
                return self.match_variable_gap(data, cursor, index, capture);
            }

            let end = cursor.checked_add(segment.length)?;
            let window = data.get(cursor..end)?;
            match segment.kind {
                SegmentKind::Literal => {
                    if window != self.literal_bytes(segment) {
                        return None;
                    }
                }
                SegmentKind::MaskedLiteral => {
                    let range = segment.range();
                    let matched = window
                        .iter()
                        .zip(&self.bytes[range.clone()])
                        .zip(&self.mask[range])
                        .all(|((&byte, &value), &mask)| byte & mask == value);
                    if !matched {
                        return None;
                    }
                }
                SegmentKind::SkipFixed => {}
                SegmentKind::Capture => capture.push(window),
                SegmentKind::SkipVariable => unreachable!(),
            }
            cursor = end;
        }
        Some(cursor)
    }

    /// Resolve the unbounded gap at `gap` with the cursor at `cursor`.
    fn match_variable_gap(
        &self,
        data: &[u8],
        cursor: usize,
        gap: usize,
        capture: &mut CaptureBuffer,
    ) -> Option<usize> {
        let rest = gap + 1;
        if rest == self.segments.len() {
            // Trailing gap: nothing left to match, consumes nothing.
            return Some(cursor);
        }

        let mut attempt = |start: usize| {
            let mut scratch = *capture;
            let end = self.match_segments(data, start, rest, &mut scratch)?;
            *capture = scratch;
            Some(end)
        };

        match &self.gap_anchor {
            Some(anchor) => {
                debug_assert!(anchor.segment > gap);
                let mut search = cursor + anchor.distance;
                while search <= data.len() {
                    let pos = search + anchor.finder.find(&data[search..])?;
                    if let Some(end) = attempt(pos - anchor.distance) {
                        return Some(end);
                    }
                    search = pos + 1;
                }
                None
            }
            None => {
                let remaining: usize = self.segments[rest..].iter().map(|s| s.length).sum();
                let last = data.len().checked_sub(remaining)?;
                (cursor..=last).find_map(attempt)
            }
        }
    }
}
