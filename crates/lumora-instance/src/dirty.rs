//! Coalesced dirty-byte-range tracking.

/// A coalesced `[start, end)` byte interval pending upload.
///
/// All unflushed mutations since the last device sync are folded into one
/// spanning interval. This trades upload precision for bookkeeping
/// simplicity: two far-apart edits force the bytes between them to be
/// re-uploaded as well.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ByteRange {
    start: u64,
    end: u64,
}

impl ByteRange {
    /// The empty range (`start > end` sentinel).
    pub const EMPTY: Self = Self {
        start: u64::MAX,
        end: 0,
    };

    /// Create a range covering `[start, end)`.
    #[inline]
    pub const fn spanning(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Whether no bytes are pending.
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Start of the interval. Meaningless when empty.
    #[inline]
    pub const fn start(&self) -> u64 {
        self.start
    }

    /// End of the interval. Meaningless when empty.
    #[inline]
    pub const fn end(&self) -> u64 {
        self.end
    }

    /// Widen the interval to also cover `[start, end)`.
    #[inline]
    pub fn mark(&mut self, start: u64, end: u64) {
        if start >= end {
            return;
        }
        self.start = self.start.min(start);
        self.end = self.end.max(end);
    }

    /// Widen the interval to also cover `other`.
    #[inline]
    pub fn merge(&mut self, other: Self) {
        if !other.is_empty() {
            self.mark(other.start, other.end);
        }
    }

    /// Reset to empty.
    #[inline]
    pub fn clear(&mut self) {
        *self = Self::EMPTY;
    }

    /// Drain the interval, clamped to `[0, limit)`.
    ///
    /// Returns `None` if nothing (within the limit) is pending. The range
    /// is left empty either way. The clamp covers shrinking arrays: a
    /// deletion can leave the recorded end past the current host length.
    pub fn take_clamped(&mut self, limit: u64) -> Option<(u64, u64)> {
        let start = self.start;
        let end = self.end.min(limit);
        self.clear();
        if start >= end {
            None
        } else {
            Some((start, end))
        }
    }
}

impl Default for ByteRange {
    fn default() -> Self {
        Self::EMPTY
    }
}
