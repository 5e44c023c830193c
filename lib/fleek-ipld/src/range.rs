//! Byte range arithmetic for chunked files and HAMT link names.
//!
//! All ranges are inclusive on both ends, `[start, end]`.
use std::fmt;
use std::str::FromStr;

use crate::errors::IpldError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AbsoluteRange {
    pub start: u64,
    pub end: u64,
}

/// A range expressed relative to the start of some enclosing range.
pub type RelativeRange = AbsoluteRange;

impl AbsoluteRange {
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start <= end, "range start must not exceed its end");
        Self { start, end }
    }

    pub fn len(&self) -> u64 {
        (self.end - self.start).saturating_add(1)
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Moves the range forward by `offset` bytes. `None` when the end would overflow.
    pub fn shift(&self, offset: u64) -> Option<Self> {
        let end = self.end.checked_add(offset)?;
        Some(Self::new(self.start + offset, end))
    }

    /// Clamps the range to a resource of `size` bytes.
    pub fn clamp(&self, size: u64) -> Option<Self> {
        if size == 0 || self.start >= size {
            return None;
        }
        Some(Self::new(self.start, self.end.min(size - 1)))
    }
}

impl fmt::Display for AbsoluteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Cumulative offset table for an ordered list of chunk lengths.
///
/// Zero length chunks cover no bytes and map to `None`. Returns `None` when the chunks
/// add up to more than `u64::MAX` bytes.
pub fn chunk_ranges_from_sizes(sizes: &[u64]) -> Option<Vec<Option<AbsoluteRange>>> {
    let mut offset: u64 = 0;
    let mut ranges = Vec::with_capacity(sizes.len());
    for &size in sizes {
        let next = offset.checked_add(size)?;
        ranges.push((size > 0).then(|| AbsoluteRange::new(offset, next - 1)));
        offset = next;
    }
    Some(ranges)
}

/// Overlap of `requested` and `candidate`, relative to the start of `candidate`.
pub fn intersect_relative(
    requested: &AbsoluteRange,
    candidate: &AbsoluteRange,
) -> Option<RelativeRange> {
    let base = candidate.start;
    if requested.start <= candidate.start && candidate.end <= requested.end {
        // candidate fully inside the request
        Some(AbsoluteRange::new(0, candidate.end - base))
    } else if requested.start <= candidate.start && candidate.start <= requested.end {
        // only the start of the candidate is inside
        Some(AbsoluteRange::new(0, requested.end - base))
    } else if requested.start <= candidate.end && candidate.end <= requested.end {
        // only the end of the candidate is inside
        Some(AbsoluteRange::new(requested.start - base, candidate.end - base))
    } else if candidate.start < requested.start && requested.end < candidate.end {
        // candidate spans the whole request
        Some(AbsoluteRange::new(
            requested.start - base,
            requested.end - base,
        ))
    } else {
        None
    }
}

/// Number of hex digits needed to print `fanout - 1`, which is the length of a HAMT shard link
/// name.
pub fn hamt_pad_width(fanout: u64) -> usize {
    format!("{:X}", fanout.saturating_sub(1)).len()
}

/// A caller requested byte range of an entity.
///
/// Negative offsets count back from the end of the resource, `to: None` means through the end of
/// the resource (written `*`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntityBytes {
    pub from: i64,
    pub to: Option<i64>,
}

impl EntityBytes {
    pub fn new(from: i64, to: Option<i64>) -> Self {
        Self { from, to }
    }

    /// Resolves the range against a resource of `size` bytes. Returns `None` when nothing of the
    /// resource is selected.
    pub fn resolve(&self, size: u64) -> Option<AbsoluteRange> {
        if size == 0 {
            return None;
        }
        let from_end = |offset: i64| size.checked_sub(offset.unsigned_abs());
        let start = if self.from < 0 {
            from_end(self.from).unwrap_or(0)
        } else {
            self.from as u64
        };
        let end = match self.to {
            None => size - 1,
            Some(to) if to < 0 => from_end(to)?,
            Some(to) => (to as u64).min(size - 1),
        };
        if start >= size || end < start {
            return None;
        }
        Some(AbsoluteRange::new(start, end))
    }
}

impl FromStr for EntityBytes {
    type Err = IpldError;

    /// Parses `from:to` where `to` may be `*`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || IpldError::MalformedPath(format!("invalid entity-bytes: {s}"));
        let (from, to) = s.split_once(':').ok_or_else(invalid)?;
        let from = from.trim().parse::<i64>().map_err(|_| invalid())?;
        let to = match to.trim() {
            "*" => None,
            to => Some(to.parse::<i64>().map_err(|_| invalid())?),
        };
        Ok(Self { from, to })
    }
}
