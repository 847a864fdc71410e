use std::fmt;

use crate::WalPointer;

/// State of the checkpointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CheckpointState {
    /// No checkpoint requested.
    #[default]
    Idle,

    /// A checkpoint is requested and will start soon.
    Scheduled,

    /// A checkpoint is running.
    Running,
}

/// The running checkpoint, or the last one if none is running.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckpointProgress {
    pub state: CheckpointState,

    /// Id of the checkpoint, once allocated.
    pub id: Option<u64>,

    /// Reason the checkpoint was started for.
    pub reason: Option<String>,

    /// WAL position of the checkpoint's begin record, once written.
    pub mark: Option<WalPointer>,
}

impl fmt::Display for CheckpointProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CheckpointProgress({:?}", self.state)?;
        if let Some(id) = self.id {
            write!(f, ", id: {}", id)?;
        }
        if let Some(reason) = &self.reason {
            write!(f, ", reason: {}", reason)?;
        }
        if let Some(mark) = &self.mark {
            write!(f, ", mark: {}", mark)?;
        }
        write!(f, ")")
    }
}
