//! Partitioning of the 128-bit trace id space.

use crate::errors::ConfigurationError;
use std::fmt;

pub const KEY_LEN: usize = 16;

/// One boundary of the trace id space. Ordered lexicographically, like the ids themselves.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KeyBoundary(pub [u8; KEY_LEN]);

impl KeyBoundary {
    pub const MIN: KeyBoundary = KeyBoundary([0x00; KEY_LEN]);
    pub const MAX: KeyBoundary = KeyBoundary([0xff; KEY_LEN]);

    /// 32 lowercase hex characters.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn first_byte(&self) -> u8 {
        self.0[0]
    }
}

impl fmt::Display for KeyBoundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// An inclusive slice `[start, end]` of the trace id space.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct KeyRange {
    pub start: KeyBoundary,
    pub end: KeyBoundary,
}

impl KeyRange {
    pub fn new(start: KeyBoundary, end: KeyBoundary) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, id: &[u8; KEY_LEN]) -> bool {
        self.start.0 <= *id && *id <= self.end.0
    }
}

impl fmt::Display for KeyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Splits the id space into `shard_count` ranges and returns their `shard_count + 1` boundaries.
///
/// Only the first byte is used to place interior boundaries, so resolution is
/// 256-way. The last boundary is always the all-ones key, which absorbs the
/// rounding remainder into the final range.
pub fn boundaries(shard_count: usize) -> Result<Vec<KeyBoundary>, ConfigurationError> {
    if shard_count == 0 {
        return Err(ConfigurationError::ZeroShards);
    }

    let step = u8::MAX as usize / shard_count;
    let mut bounds = Vec::with_capacity(shard_count + 1);
    bounds.push(KeyBoundary::MIN);
    for i in 1..shard_count {
        let mut key = [0u8; KEY_LEN];
        // step * i <= 255 * (n-1) / n, so this never truncates
        key[0] = (step * i) as u8;
        bounds.push(KeyBoundary(key));
    }
    bounds.push(KeyBoundary::MAX);

    Ok(bounds)
}

/// Pairs adjacent boundaries into ranges.
pub fn ranges(bounds: &[KeyBoundary]) -> Vec<KeyRange> {
    bounds
        .windows(2)
        .map(|pair| KeyRange::new(pair[0], pair[1]))
        .collect()
}
