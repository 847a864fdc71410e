use std::fmt;

use crate::errors::CheckpointError;

/// Why a checkpoint was started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointReason {
    /// The checkpoint timer fired.
    Timeout,

    /// Too many bytes were written to the WAL since the last checkpoint.
    WalSizeThreshold,

    /// Requested by a caller, with the caller's own description.
    Explicit(String),
}

impl CheckpointReason {
    pub const TIMEOUT: &'static str = "timeout";

    pub const WAL_SIZE_THRESHOLD: &'static str =
        "too big size of WAL without checkpoint";

    /// Maximum length in bytes of a reason stored in a checkpoint marker.
    pub const MAX_SIZE: usize = 64 * 1024;

    pub fn explicit(reason: impl ToString) -> Self {
        CheckpointReason::Explicit(reason.to_string())
    }

    pub fn as_str(&self) -> &str {
        match self {
            CheckpointReason::Timeout => Self::TIMEOUT,
            CheckpointReason::WalSizeThreshold => Self::WAL_SIZE_THRESHOLD,
            CheckpointReason::Explicit(s) => s,
        }
    }

    /// Reject a reason that can not be stored in a checkpoint marker.
    pub(crate) fn check_size(&self) -> Result<(), CheckpointError> {
        let size = self.as_str().len();
        if size > Self::MAX_SIZE {
            return Err(CheckpointError::ReasonTooLarge {
                size,
                max: Self::MAX_SIZE,
            });
        }
        Ok(())
    }
}

impl fmt::Display for CheckpointReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
