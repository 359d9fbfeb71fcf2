//! Codepoint interval sets used as string alphabets.

use serde::{Deserialize, Serialize};

const MAX_CODEPOINT: u32 = 0x10FFFF;
const SURROGATES: (u32, u32) = (0xD800, 0xDFFF);

/// A sorted, merged set of inclusive codepoint ranges. Surrogates are never
/// members, so every member converts to a `char`. Serialized as its list of
/// ranges; deserializing normalizes them again.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Vec<(u32, u32)>", into = "Vec<(u32, u32)>")]
pub struct IntervalSet {
    intervals: Vec<(u32, u32)>,
    /// Running count of codepoints before each interval.
    offsets: Vec<usize>,
}

impl IntervalSet {
    pub fn new<I>(ranges: I) -> Self
    where
        I: IntoIterator<Item = (u32, u32)>,
    {
        let mut pieces: Vec<(u32, u32)> = Vec::new();
        for (start, end) in ranges {
            let end = end.min(MAX_CODEPOINT);
            if start > end {
                continue;
            }
            // Split around the surrogate block.
            if start < SURROGATES.0 {
                pieces.push((start, end.min(SURROGATES.0 - 1)));
            }
            if end > SURROGATES.1 {
                pieces.push((start.max(SURROGATES.1 + 1), end));
            }
        }
        pieces.sort_unstable();

        let mut intervals: Vec<(u32, u32)> = Vec::with_capacity(pieces.len());
        for (start, end) in pieces {
            match intervals.last_mut() {
                Some(last) if start <= last.1.saturating_add(1) => last.1 = last.1.max(end),
                _ => intervals.push((start, end)),
            }
        }

        let mut offsets = Vec::with_capacity(intervals.len());
        let mut total = 0usize;
        for &(start, end) in &intervals {
            offsets.push(total);
            total += (end - start) as usize + 1;
        }
        Self { intervals, offsets }
    }

    pub fn from_chars(alphabet: &str) -> Self {
        Self::new(alphabet.chars().map(|c| (c as u32, c as u32)))
    }

    pub fn ascii() -> Self {
        Self::new([(0, 0x7F)])
    }

    pub fn all() -> Self {
        Self::new([(0, MAX_CODEPOINT)])
    }

    pub fn intervals(&self) -> &[(u32, u32)] {
        &self.intervals
    }

    /// Number of codepoints in the set.
    pub fn len(&self) -> usize {
        match (self.intervals.last(), self.offsets.last()) {
            (Some(&(start, end)), Some(&offset)) => offset + (end - start) as usize + 1,
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    fn interval_containing(&self, codepoint: u32) -> Option<usize> {
        let position = self.intervals.partition_point(|&(_, end)| end < codepoint);
        match self.intervals.get(position) {
            Some(&(start, _)) if start <= codepoint => Some(position),
            _ => None,
        }
    }

    pub fn contains(&self, c: char) -> bool {
        self.contains_codepoint(c as u32)
    }

    pub fn contains_codepoint(&self, codepoint: u32) -> bool {
        self.interval_containing(codepoint).is_some()
    }

    /// The `index`-th member in ascending codepoint order.
    pub fn char_at(&self, index: usize) -> Option<char> {
        if index >= self.len() {
            return None;
        }
        let position = self.offsets.partition_point(|&offset| offset <= index) - 1;
        let (start, _) = self.intervals[position];
        let codepoint = start + (index - self.offsets[position]) as u32;
        char::from_u32(codepoint)
    }

    /// Inverse of [`IntervalSet::char_at`].
    pub fn index_of(&self, c: char) -> Option<usize> {
        let position = self.interval_containing(c as u32)?;
        let (start, _) = self.intervals[position];
        Some(self.offsets[position] + (c as u32 - start) as usize)
    }
}

impl From<Vec<(u32, u32)>> for IntervalSet {
    fn from(ranges: Vec<(u32, u32)>) -> Self {
        Self::new(ranges)
    }
}

impl From<IntervalSet> for Vec<(u32, u32)> {
    fn from(set: IntervalSet) -> Self {
        set.intervals
    }
}

impl Default for IntervalSet {
    fn default() -> Self {
        Self::all()
    }
}
