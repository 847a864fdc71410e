use std::fmt;

use crate::num::format_pad9_u64;
use crate::num::format_segment_index;
use crate::SegmentIndex;

/// A logical position in the WAL: a segment index and a byte offset within
/// that segment.
///
/// Pointers are totally ordered by `(index, offset)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[derive(Default)]
pub struct WalPointer {
    pub index: SegmentIndex,
    pub offset: u64,
}

impl WalPointer {
    pub fn new(index: impl Into<SegmentIndex>, offset: u64) -> Self {
        Self {
            index: index.into(),
            offset,
        }
    }

    pub fn index(&self) -> SegmentIndex {
        self.index
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }
}

impl fmt::Display for WalPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "WalPointer({}:{})",
            format_segment_index(*self.index),
            format_pad9_u64(self.offset)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::WalPointer;

    #[test]
    fn test_pointer_order() {
        assert!(WalPointer::new(0, 100) < WalPointer::new(1, 0));
        assert!(WalPointer::new(1, 5) < WalPointer::new(1, 6));
        assert_eq!(
            WalPointer::new(3, 1).min(WalPointer::new(2, 900)),
            WalPointer::new(2, 900)
        );
    }

    #[test]
    fn test_pointer_display() {
        assert_eq!(
            WalPointer::new(1, 1_200).to_string(),
            "WalPointer(0000000000000001:000_001_200)"
        );
    }
}
