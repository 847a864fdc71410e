use std::fmt;
use std::fmt::Formatter;

use crate::checkpoint::progress::CheckpointProgress;
use crate::num::format_pad9_u64;
use crate::segment::SegmentStatus;
use crate::SegmentIndex;
use crate::WalPointer;

/// Statistics of the WAL, its archive, checkpoints and cleaning.
#[derive(Debug, Clone)]
pub struct Stat {
    /// Archived segments, ascending
    pub archived_segments: Vec<SegmentStat>,
    /// The segment being written
    pub active_segment: SegmentStat,
    /// Number of files in the reuse pool
    pub reusable_segments: usize,
    /// Total bytes of archived segments
    pub archive_size: u64,
    /// Archive budget; `None` if the archive is unlimited or count based
    pub max_archive_size: Option<u64>,
    /// Highest deleted segment index
    pub last_truncated: Option<SegmentIndex>,
    /// Why archiving stopped; appends fail while this is set
    pub archive_failure: Option<String>,
    /// WAL bytes appended since the last checkpoint mark
    pub bytes_since_checkpoint: u64,
    /// Number of checkpoints in the history
    pub checkpoint_history_len: usize,
    /// Floor of the oldest retained checkpoint
    pub earliest_required: Option<WalPointer>,
    /// The running or the last checkpoint
    pub checkpoint: CheckpointProgress,
    pub checkpoints_completed: u64,
    pub checkpoint_consecutive_failures: u64,
    /// Number of archive cleaning passes
    pub cleanup_passes: u64,
    /// Number of passes that left the archive over budget
    pub cleanup_backpressure: u64,
}

fn opt<T: fmt::Display>(x: &Option<T>) -> String {
    match x {
        Some(x) => x.to_string(),
        None => "None".to_string(),
    }
}

impl fmt::Display for Stat {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let lb = if f.alternate() { "\n" } else { "" };
        let idt = if f.alternate() { "  " } else { "" };
        write!(
            f,
            "Stat{{{lb} archived_segments: [{lb}{idt}{}{lb} ],{lb} active_segment: {},{lb} \
            reusable_segments: {},{lb} \
            archive:{{size: {}, max: {}, last_truncated: {}, failure: {}}},{lb} \
            checkpoint:{{\
            bytes_since: {}, \
            history: {}, \
            earliest_required: {}, \
            progress: {}, \
            completed: {}, \
            consecutive_failures: {}\
            }},{lb} \
            cleanup:{{passes: {}, backpressure: {}}}{lb}\
            }}",
            self.archived_segments
                .iter()
                .map(|c| format!("{}", c))
                .collect::<Vec<String>>()
                .join(&format!(",{lb}{idt}")),
            self.active_segment,
            self.reusable_segments,
            format_pad9_u64(self.archive_size),
            self.max_archive_size
                .map(format_pad9_u64)
                .unwrap_or_else(|| "None".to_string()),
            opt(&self.last_truncated),
            opt(&self.archive_failure),
            format_pad9_u64(self.bytes_since_checkpoint),
            self.checkpoint_history_len,
            opt(&self.earliest_required),
            self.checkpoint,
            self.checkpoints_completed,
            self.checkpoint_consecutive_failures,
            self.cleanup_passes,
            self.cleanup_backpressure,
        )
    }
}

/// Statistics of a single segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentStat {
    pub index: SegmentIndex,
    pub size: u64,
    pub status: SegmentStatus,
}

impl fmt::Display for SegmentStat {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SegmentStat({}){{size: {}, status: {:?}}}",
            self.index,
            format_pad9_u64(self.size),
            self.status
        )
    }
}

#[cfg(test)]
mod tests {
    use super::SegmentStat;
    use crate::segment::SegmentStatus;
    use crate::SegmentIndex;

    #[test]
    fn test_segment_stat_display() {
        let s = SegmentStat {
            index: SegmentIndex(3),
            size: 1_024,
            status: SegmentStatus::Archived,
        };
        assert_eq!(
            s.to_string(),
            "SegmentStat(Segment(0000000000000003)){size: 000_001_024, status: Archived}"
        );
    }
}
