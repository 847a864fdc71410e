mod storage_errors;

use std::io;
use std::time::Duration;

pub use storage_errors::ArchiveOutOfOrder;
pub use storage_errors::InvalidSegmentFileName;

/// Invalid [`Config`](crate::Config), detected before the engine writes
/// anything.
#[derive(Debug, Clone, PartialEq, Eq)]
#[derive(thiserror::Error)]
pub enum ConfigError {
    #[error(
        "Should be used only one of wal history size or max wal archive size: \
        wal_history_size and max_wal_archive_size are both set"
    )]
    BothRetentionOptions,

    #[error("Invalid config option {option}: {reason}")]
    Invalid {
        option: &'static str,
        reason: String,
    },
}

impl ConfigError {
    pub fn invalid(option: &'static str, reason: impl ToString) -> Self {
        Self::Invalid {
            option,
            reason: reason.to_string(),
        }
    }
}

impl From<ConfigError> for io::Error {
    fn from(value: ConfigError) -> Self {
        io::Error::new(io::ErrorKind::InvalidInput, value.to_string())
    }
}

/// Error of a checkpoint, delivered to every caller waiting for it.
///
/// It is `Clone` because one failed checkpoint is reported to all force
/// requests that collapsed into it.
#[derive(Debug, Clone, PartialEq, Eq)]
#[derive(thiserror::Error)]
pub enum CheckpointError {
    /// Writing the checkpoint mark or a marker file failed.
    #[error("Checkpoint {id} failed to write WAL or marker: {message}")]
    Io { id: u64, message: String },

    /// The page store failed to flush dirty pages.
    #[error("Checkpoint {id} failed to flush dirty pages: {message}")]
    PageFlush { id: u64, message: String },

    /// The caller's deadline passed; the checkpoint itself keeps running.
    #[error("Timeout waiting for checkpoint after {waited:?}")]
    Timeout { waited: Duration },

    /// The reason does not fit in a checkpoint marker.
    #[error("Checkpoint reason of {size} bytes exceeds {max} bytes")]
    ReasonTooLarge { size: usize, max: usize },

    /// The checkpointer is stopped.
    #[error("Checkpointer is shut down")]
    ShutDown,
}

impl CheckpointError {
    pub(crate) fn io(id: u64, e: &io::Error) -> Self {
        Self::Io {
            id,
            message: e.to_string(),
        }
    }

    pub(crate) fn page_flush(id: u64, e: &io::Error) -> Self {
        Self::PageFlush {
            id,
            message: e.to_string(),
        }
    }
}

impl From<CheckpointError> for io::Error {
    fn from(value: CheckpointError) -> Self {
        let kind = match value {
            CheckpointError::Timeout { .. } => io::ErrorKind::TimedOut,
            CheckpointError::ShutDown => io::ErrorKind::BrokenPipe,
            CheckpointError::ReasonTooLarge { .. } => io::ErrorKind::InvalidInput,
            CheckpointError::Io { .. } | CheckpointError::PageFlush { .. } => {
                io::ErrorKind::Other
            }
        };
        io::Error::new(kind, value.to_string())
    }
}

impl From<ArchiveOutOfOrder> for io::Error {
    fn from(value: ArchiveOutOfOrder) -> Self {
        io::Error::new(io::ErrorKind::InvalidInput, value.to_string())
    }
}
