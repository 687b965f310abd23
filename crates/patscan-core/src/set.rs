//! Dispatch over many patterns at once.
//!
//! Patterns are bucketed by the offset of their first literal and, inside a
//! bucket, by that literal's first byte:
//!
//! ```text
//! bucket(offset=0)  table[0x48] -> [p0, p3]   table[0xE8] -> [p1]
//! bucket(offset=3)  table[0x05] -> [p2]
//! anchorless        [p4]
//! ```
//!
//! A position is only handed to a pattern's matcher when the byte at the
//! pattern's anchor offset is one it can start with, so scanning costs
//! roughly one pass over the buffer plus verification of real candidates.

use memchr::{memchr, memchr2, memchr3};
use tracing::debug;

use crate::error::Result;
use crate::memory::ReadMemory;
use crate::pattern::{Pattern, PatternMatch};

/// A match together with the pattern that produced it.
#[derive(Debug, Clone, Copy)]
pub struct SetMatch<'a> {
    /// Registration index of the pattern.
    pub index: usize,
    pub pattern: &'a Pattern,
    pub found: PatternMatch,
}

impl SetMatch<'_> {
    pub fn offset(&self) -> usize {
        self.found.offset
    }

    pub fn length(&self) -> usize {
        self.found.length
    }

    pub fn address(&self, base: u64) -> Option<u64> {
        self.pattern.address(&self.found, base)
    }

    pub fn resolve_address<R: ReadMemory + ?Sized>(
        &self,
        base: u64,
        memory: &R,
    ) -> Result<Option<u64>> {
        self.pattern.resolve_address(&self.found, base, memory)
    }
}

#[derive(Debug, Clone)]
struct Bucket {
    /// Anchor offset shared by every pattern in the bucket.
    offset: usize,
    /// Smallest `min_length` among the bucket's patterns.
    min_length: usize,
    /// Pattern indices keyed by anchor byte, in registration order.
    table: Vec<Vec<usize>>,
}

impl Bucket {
    fn new(offset: usize) -> Self {
        Self {
            offset,
            min_length: usize::MAX,
            table: vec![Vec::new(); 256],
        }
    }

    fn candidates(&self, byte: u8) -> &[usize] {
        &self.table[byte as usize]
    }
}

/// Every byte some bucket can start with.
#[derive(Debug, Clone)]
struct FirstBytes {
    table: [bool; 256],
    bytes: Vec<u8>,
}

impl FirstBytes {
    fn from_buckets(buckets: &[Bucket]) -> Self {
        let mut table = [false; 256];
        for bucket in buckets {
            for (byte, patterns) in bucket.table.iter().enumerate() {
                if !patterns.is_empty() {
                    table[byte] = true;
                }
            }
        }
        let bytes = (0..=255u8).filter(|&b| table[b as usize]).collect();
        Self { table, bytes }
    }

    fn find(&self, haystack: &[u8]) -> Option<usize> {
        match *self.bytes.as_slice() {
            [] => None,
            [a] => memchr(a, haystack),
            [a, b] => memchr2(a, b, haystack),
            [a, b, c] => memchr3(a, b, c, haystack),
            _ => haystack.iter().position(|&b| self.table[b as usize]),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PatternSet {
    patterns: Vec<Pattern>,
    /// Sorted by ascending anchor offset.
    buckets: Vec<Bucket>,
    /// Patterns without any literal segment; checked by brute force.
    anchorless: Vec<usize>,
    min_length: usize,
    max_min_length: usize,
    max_capture_bytes: usize,
    first_bytes: FirstBytes,
}

impl PatternSet {
    pub fn new(patterns: impl IntoIterator<Item = Pattern>) -> Self {
        let patterns: Vec<Pattern> = patterns.into_iter().collect();
        let mut buckets: Vec<Bucket> = Vec::new();
        let mut anchorless = Vec::new();

        for (index, pattern) in patterns.iter().enumerate() {
            let Some((literal, offset)) = pattern.first_literal() else {
                anchorless.push(index);
                continue;
            };

            let slot = match buckets.iter().position(|b| b.offset == offset) {
                Some(slot) => slot,
                None => {
                    buckets.push(Bucket::new(offset));
                    buckets.len() - 1
                }
            };
            let bucket = &mut buckets[slot];
            bucket.table[literal[0] as usize].push(index);
            bucket.min_length = bucket.min_length.min(pattern.min_length());
        }
        buckets.sort_by_key(|b| b.offset);

        let min_length = patterns.iter().map(Pattern::min_length).min().unwrap_or(0);
        let max_min_length = patterns.iter().map(Pattern::min_length).max().unwrap_or(0);
        let max_capture_bytes = patterns
            .iter()
            .map(Pattern::capture_bytes)
            .max()
            .unwrap_or(0);
        let first_bytes = FirstBytes::from_buckets(&buckets);

        debug!(
            "Built pattern set: {} patterns, {} buckets, {} anchorless, {} distinct anchor bytes",
            patterns.len(),
            buckets.len(),
            anchorless.len(),
            first_bytes.bytes.len()
        );

        Self {
            patterns,
            buckets,
            anchorless,
            min_length,
            max_min_length,
            max_capture_bytes,
            first_bytes,
        }
    }

    pub fn patterns(&self) -> &[Pattern] {
        &self.patterns
    }

    pub fn get(&self, index: usize) -> Option<&Pattern> {
        self.patterns.get(index)
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn min_length(&self) -> usize {
        self.min_length
    }

    pub fn max_min_length(&self) -> usize {
        self.max_min_length
    }

    pub fn max_capture_bytes(&self) -> usize {
        self.max_capture_bytes
    }

    /// Distinct anchor offsets, ascending.
    pub fn anchor_offsets(&self) -> Vec<usize> {
        self.buckets.iter().map(|b| b.offset).collect()
    }

    pub fn anchorless_count(&self) -> usize {
        self.anchorless.len()
    }

    fn hit(&self, index: usize, found: PatternMatch) -> SetMatch<'_> {
        SetMatch {
            index,
            pattern: &self.patterns[index],
            found,
        }
    }

    /// First pattern matching exactly at `offset`.
    ///
    /// Precedence: ascending anchor offset, then registration order, then
    /// anchorless patterns. Patterns that must match at the start of the
    /// buffer are only considered when `offset` is 0.
    pub fn match_at(&self, data: &[u8], offset: usize) -> Option<SetMatch<'_>> {
        if offset > data.len() {
            return None;
        }
        let available = data.len() - offset;
        let try_pattern = |index: usize| {
            let pattern = &self.patterns[index];
            if pattern.must_match_at_start() && offset != 0 {
                return None;
            }
            pattern
                .match_at(data, offset)
                .map(|found| self.hit(index, found))
        };

        for bucket in &self.buckets {
            // min_length always covers the anchor byte.
            if available < bucket.min_length {
                continue;
            }
            let byte = data[offset + bucket.offset];
            if let Some(hit) = bucket.candidates(byte).iter().find_map(|&i| try_pattern(i)) {
                return Some(hit);
            }
        }

        self.anchorless.iter().find_map(|&i| try_pattern(i))
    }

    /// Lowest-offset match of any pattern. Ties resolve as in
    /// [`PatternSet::match_at`].
    pub fn find_match(&self, data: &[u8]) -> Option<SetMatch<'_>> {
        self.find_match_from(data, 0)
    }

    /// Like [`PatternSet::find_match`], ignoring matches that start before
    /// `from`.
    pub fn find_match_from(&self, data: &[u8], from: usize) -> Option<SetMatch<'_>> {
        if self.patterns.is_empty() || from > data.len() || data.len() - from < self.min_length {
            return None;
        }

        let mut best: Option<SetMatch<'_>> = None;
        let max_offset = self.buckets.last().map_or(0, |b| b.offset);
        let mut cursor = from;

        while let Some(rel) = self.first_bytes.find(&data[cursor..]) {
            let pos = cursor + rel;
            // Past this point every candidate starts at or after the best match.
            if best.is_some_and(|b| pos >= b.found.offset + max_offset) {
                break;
            }

            let byte = data[pos];
            for bucket in &self.buckets {
                if bucket.offset > pos {
                    break;
                }
                let start = pos - bucket.offset;
                if start < from
                    || data.len() - start < bucket.min_length
                    || best.is_some_and(|b| start >= b.found.offset)
                {
                    continue;
                }
                for &index in bucket.candidates(byte) {
                    let pattern = &self.patterns[index];
                    if pattern.must_match_at_start() && start != 0 {
                        continue;
                    }
                    if let Some(found) = pattern.match_at(data, start) {
                        best = Some(self.hit(index, found));
                        break;
                    }
                }
            }
            cursor = pos + 1;
        }

        for &index in &self.anchorless {
            let Some(found) = self.patterns[index].find_match_from(data, from) else {
                continue;
            };
            if best.is_none_or(|b| found.offset < b.found.offset) {
                best = Some(self.hit(index, found));
            }
        }

        best
    }

    /// Every non-overlapping match, ascending.
    pub fn find_all(&self, data: &[u8]) -> Vec<SetMatch<'_>> {
        let mut results = Vec::new();
        let mut from = 0;
        while let Some(hit) = self.find_match_from(data, from) {
            from = hit.found.offset + hit.found.length.max(1);
            results.push(hit);
        }
        results
    }

    /// First match of every member pattern, indexed by registration order,
    /// found in a single pass over `data`.
    pub fn find_each(&self, data: &[u8]) -> Vec<Option<PatternMatch>> {
        let mut results: Vec<Option<PatternMatch>> = vec![None; self.patterns.len()];
        let bucketed = self.patterns.len() - self.anchorless.len();
        let mut found_count = 0;
        let mut cursor = 0;

        while found_count < bucketed {
            let Some(rel) = self.first_bytes.find(&data[cursor..]) else {
                break;
            };
            let pos = cursor + rel;
            let byte = data[pos];

            for bucket in &self.buckets {
                if bucket.offset > pos {
                    break;
                }
                let start = pos - bucket.offset;
                if data.len() - start < bucket.min_length {
                    continue;
                }
                for &index in bucket.candidates(byte) {
                    if results[index].is_some() {
                        continue;
                    }
                    let pattern = &self.patterns[index];
                    if pattern.must_match_at_start() && start != 0 {
                        continue;
                    }
                    if let Some(found) = pattern.match_at(data, start) {
                        results[index] = Some(found);
                        found_count += 1;
                    }
                }
            }
            cursor = pos + 1;
        }

        for &index in &self.anchorless {
            results[index] = self.patterns[index].find_match(data);
        }
        results
    }
}

impl FromIterator<Pattern> for PatternSet {
    fn from_iter<I: IntoIterator<Item = Pattern>>(iter: I) -> Self {
        Self::new(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{AddressKind, AddressMeaning};

    fn set(patterns: &[&str]) -> PatternSet {
        patterns.iter().map(|p| p.parse::<Pattern>().unwrap()).collect()
    }

    #[test]
    fn test_bucketing_and_metadata() {
        let set = set(&["AA BB", "AA CC", "?? ?? 05 @@", "4? ??", "E8 @@ @@ @@ @@"]);
        assert_eq!(set.len(), 5);
        assert_eq!(set.anchor_offsets(), vec![0, 2]);
        assert_eq!(set.anchorless_count(), 1);
        assert_eq!(set.min_length(), 2);
        assert_eq!(set.max_min_length(), 5);
        assert_eq!(set.max_capture_bytes(), 4);
        assert_eq!(set.first_bytes.bytes, vec![0x05, 0xAA, 0xE8]);
    }

    #[test]
    fn test_match_at_precedence() {
        // Both match at 0; the smaller anchor offset wins.
        let set = set(&["?? BB", "AA ??"]);
        let hit = set.match_at(&[0xAA, 0xBB], 0).unwrap();
        assert_eq!(hit.index, 1);

        // Same bucket: registration order.
        let set2 = self::set(&["AA ??", "AA BB"]);
        assert_eq!(set2.match_at(&[0xAA, 0xBB], 0).unwrap().index, 0);
    }

    #[test]
    fn test_match_at_anchorless_last() {
        let set = set(&["?? ??", "AA"]);
        assert_eq!(set.match_at(&[0xAA, 0xBB], 0).unwrap().index, 1);
        assert_eq!(set.match_at(&[0xCC, 0xBB], 0).unwrap().index, 0);
        assert!(set.match_at(&[0xCC], 0).is_none());
    }

    #[test]
    fn test_match_at_with_offset() {
        let set = set(&["AA BB", "CC"]);
        let hit = set.match_at(&[0x00, 0xCC, 0xAA, 0xBB], 2).unwrap();
        assert_eq!(hit.index, 0);
        assert_eq!(hit.offset(), 2);
        assert!(set.match_at(&[0x00], 2).is_none());
    }

    #[test]
    fn test_find_match_end_to_end() {
        let set = set(&["AA BB", "AA CC"]);
        let hit = set.find_match(&[0x00, 0xAA, 0xCC]).unwrap();
        assert_eq!(hit.offset(), 1);
        assert_eq!(hit.index, 1);
        assert_eq!(hit.length(), 2);
    }

    #[test]
    fn test_find_match_prefers_lowest_offset_across_buckets() {
        // Pattern 0 anchors late but starts first.
        let set = set(&["?? ?? ?? ?? DD", "BB"]);
        let data = [0x00, 0xBB, 0x00, 0x00, 0xDD];
        let hit = set.find_match(&data).unwrap();
        assert_eq!(hit.offset(), 0);
        assert_eq!(hit.index, 0);
    }

    #[test]
    fn test_find_match_honors_must_match_at_start() {
        let anchored = Pattern::parse("AA BB", AddressMeaning::NONE, true).unwrap();
        let free: Pattern = "BB CC".parse().unwrap();
        let set = PatternSet::new([anchored, free]);

        assert!(set.find_match(&[0x00, 0xAA, 0xBB]).is_none());
        assert_eq!(set.find_match(&[0xAA, 0xBB]).unwrap().index, 0);
        assert_eq!(set.find_match(&[0x00, 0xAA, 0xBB, 0xCC]).unwrap().index, 1);
    }

    #[test]
    fn test_match_at_honors_must_match_at_start() {
        let anchored = Pattern::parse("AA BB", AddressMeaning::NONE, true).unwrap();
        let anchorless = Pattern::parse("A? B?", AddressMeaning::NONE, true).unwrap();
        let set = PatternSet::new([anchored, anchorless]);
        let data = [0x00, 0xAA, 0xBB];

        assert!(set.match_at(&data, 1).is_none());
        assert!(set.find_match(&data).is_none());
        assert_eq!(set.match_at(&data[1..], 0).unwrap().index, 0);
    }

    #[test]
    fn test_find_match_anchorless_fallback() {
        let set = set(&["AA BB", "4? 5?"]);
        let hit = set.find_match(&[0x00, 0x41, 0x52, 0x00]).unwrap();
        assert_eq!(hit.index, 1);
        assert_eq!(hit.offset(), 1);

        // Anchorless only wins with a strictly lower offset.
        let tied = self::set(&["A? B?", "AA BB"]);
        let hit = tied.find_match(&[0x00, 0xAA, 0xBB]).unwrap();
        assert_eq!(hit.index, 1);
        assert_eq!(hit.offset(), 1);
    }

    #[test]
    fn test_find_match_many_first_bytes() {
        let set = set(&["01 02", "03 04", "05 06", "07 08", "09 0A"]);
        let data = [0x00, 0x07, 0x00, 0x09, 0x0A, 0x07, 0x08];
        let hit = set.find_match(&data).unwrap();
        assert_eq!(hit.index, 4);
        assert_eq!(hit.offset(), 3);
    }

    #[test]
    fn test_find_all_and_find_each() {
        let set = set(&["AA BB", "CC", "?? DD"]);
        let data = [0xCC, 0xAA, 0xBB, 0xCC, 0x00, 0xDD];

        let all: Vec<(usize, usize)> = set
            .find_all(&data)
            .iter()
            .map(|h| (h.index, h.offset()))
            .collect();
        assert_eq!(all, vec![(1, 0), (0, 1), (1, 3), (2, 4)]);

        let each = set.find_each(&data);
        assert_eq!(each[0].map(|m| m.offset), Some(1));
        assert_eq!(each[1].map(|m| m.offset), Some(0));
        assert_eq!(each[2].map(|m| m.offset), Some(4));
    }

    #[test]
    fn test_set_match_resolves_address() {
        let meaning = AddressMeaning::relative(AddressKind::REL32, 5).unwrap();
        let call = Pattern::parse("E8 @@ @@ @@ @@", meaning, false).unwrap();
        let set = PatternSet::new([call]);
        let data = [0x90, 0xE8, 0x10, 0x00, 0x00, 0x00];
        let hit = set.find_match(&data).unwrap();
        assert_eq!(hit.address(0x1000), Some(0x1000 + 1 + 5 + 0x10));
    }

    #[test]
    fn test_empty_set() {
        let set = PatternSet::new(Vec::new());
        assert!(set.is_empty());
        assert!(set.find_match(&[0xAA]).is_none());
        assert!(set.match_at(&[0xAA], 0).is_none());
        assert!(set.find_each(&[0xAA]).is_empty());
    }
}
