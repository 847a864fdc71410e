use std::fmt;
use std::ops::Deref;

use crate::num::format_segment_index;

/// Sequential index of a WAL segment, starting at 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[derive(Default)]
pub struct SegmentIndex(pub u64);

impl fmt::Display for SegmentIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Segment({})", format_segment_index(self.0))
    }
}

impl From<u64> for SegmentIndex {
    fn from(index: u64) -> Self {
        SegmentIndex(index)
    }
}

impl Deref for SegmentIndex {
    type Target = u64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl SegmentIndex {
    /// Returns the index of the segment that follows this one.
    pub fn next(&self) -> SegmentIndex {
        SegmentIndex(self.0 + 1)
    }

    /// Returns the index of the segment before this one, if any.
    pub fn prev(&self) -> Option<SegmentIndex> {
        self.0.checked_sub(1).map(SegmentIndex)
    }
}
