#[derive(Debug, Clone, PartialEq, Eq)]
#[derive(thiserror::Error)]
#[error("Invalid WAL segment file name: {bad_file_name}: {reason}")]
pub struct InvalidSegmentFileName {
    pub bad_file_name: String,
    pub reason: String,
}

impl InvalidSegmentFileName {
    pub fn new(bad_file_name: impl ToString, reason: impl ToString) -> Self {
        Self {
            bad_file_name: bad_file_name.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// A segment was handed to the archive out of index order.
#[derive(Debug, Clone, PartialEq, Eq)]
#[derive(thiserror::Error)]
#[error("Segment archived out of order: expected index {expected}, got {got}")]
pub struct ArchiveOutOfOrder {
    pub expected: u64,
    pub got: u64,
}

impl ArchiveOutOfOrder {
    pub fn new(expected: u64, got: u64) -> Self {
        Self { expected, got }
    }
}
