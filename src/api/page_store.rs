use std::io;

use crate::CheckpointEntry;
use crate::WalPointer;

/// The page cache whose dirty pages a checkpoint makes durable.
///
/// The engine calls it from the checkpointer thread, one checkpoint at a
/// time.
pub trait PageStore: Send + Sync + 'static {
    /// Write every page dirtied before `mark` to durable storage.
    ///
    /// Returns the floor: the lowest WAL position recovery from this
    /// checkpoint has to replay, usually `mark` itself. A floor above `mark`,
    /// or below the previous checkpoint's floor, is clamped.
    fn flush_dirty_pages_since(&self, mark: WalPointer) -> Result<WalPointer, io::Error>;

    /// Called after the checkpoint is recorded in the history.
    fn on_checkpoint_complete(&self, entry: &CheckpointEntry) {
        let _ = entry;
    }
}

/// A [`PageStore`] without pages: every checkpoint's floor is its mark.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPages;

impl PageStore for NoPages {
    fn flush_dirty_pages_since(&self, mark: WalPointer) -> Result<WalPointer, io::Error> {
        Ok(mark)
    }
}
