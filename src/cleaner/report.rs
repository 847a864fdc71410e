use std::fmt;

use crate::num::format_pad9_u64;
use crate::SegmentIndex;
use crate::WalPointer;

/// Result of one archive cleaning pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Sequence number of the pass, starting at 1.
    pub pass: u64,

    /// Segments deleted by this pass, ascending.
    pub removed: Vec<SegmentIndex>,

    pub reclaimed_bytes: u64,

    /// Ids of checkpoints evicted from the history to meet the budget.
    pub evicted_checkpoints: Vec<u64>,

    /// The floor deletion was bounded by, if any.
    pub safe_floor: Option<WalPointer>,

    /// Archive size after the pass.
    pub archive_size: u64,

    pub last_truncated: Option<SegmentIndex>,

    /// The archive is still at or above the budget: the newest checkpoint
    /// needs more than the budget allows.
    pub over_budget: bool,
}

impl CleanupReport {
    pub fn removed_anything(&self) -> bool {
        !self.removed.is_empty()
    }
}

impl fmt::Display for CleanupReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CleanupReport{{pass: {}, removed: {}, reclaimed: {}, evicted_checkpoints: {:?}, archive_size: {}, last_truncated: {}, over_budget: {}}}",
            self.pass,
            self.removed.len(),
            format_pad9_u64(self.reclaimed_bytes),
            self.evicted_checkpoints,
            format_pad9_u64(self.archive_size),
            self.last_truncated
                .map(|x| x.to_string())
                .unwrap_or_else(|| "None".to_string()),
            self.over_budget
        )
    }
}
