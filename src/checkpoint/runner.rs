use std::sync::Arc;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use log::info;
use log::warn;

use crate::api::page_store::PageStore;
use crate::checkpoint::checkpointer::CheckpointResult;
use crate::checkpoint::checkpointer::ProgressReporter;
use crate::checkpoint::checkpointer::RunCheckpoint;
use crate::checkpoint::history::CheckpointHistory;
use crate::checkpoint::markers::CheckpointMarkers;
use crate::cleaner::CleanerHandle;
use crate::errors::CheckpointError;
use crate::wal::WalWriter;
use crate::CheckpointEntry;
use crate::CheckpointReason;
use crate::Config;

/// Milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Executes checkpoints: marks the WAL, lets the page store flush, and
/// records the result in the history and on disk.
pub(crate) struct CheckpointRunner {
    pub(crate) config: Arc<Config>,
    pub(crate) writer: Arc<WalWriter>,
    pub(crate) history: Arc<CheckpointHistory>,
    pub(crate) markers: Arc<CheckpointMarkers>,
    pub(crate) page_store: Arc<dyn PageStore>,
    pub(crate) cleaner: Option<CleanerHandle>,

    /// Id of the next checkpoint. Ids of failed checkpoints are not reused.
    pub(crate) next_id: u64,
}

impl RunCheckpoint for CheckpointRunner {
    fn run(
        &mut self,
        reason: &CheckpointReason,
        progress: &ProgressReporter,
    ) -> CheckpointResult {
        let id = self.next_id;
        self.next_id += 1;

        let started = now_millis();

        let mark = self
            .writer
            .checkpoint_mark(id)
            .map_err(|e| CheckpointError::io(id, &e))?;
        progress.set_mark(id, mark);

        info!("Checkpoint {} started at {}, reason: {}", id, mark, reason);

        let start = CheckpointEntry::new(id, started, mark, reason);
        self.markers
            .write_start(&start)
            .map_err(|e| CheckpointError::io(id, &e))?;

        let lower = self.history.begin_checkpoint();

        let flushed = match self.page_store.flush_dirty_pages_since(mark) {
            Ok(x) => x,
            Err(e) => {
                self.history.abort_checkpoint();
                if let Err(rm_err) = self.markers.remove_start(started, id) {
                    warn!("Failed to remove START marker of checkpoint {}: {}", id, rm_err);
                }
                return Err(CheckpointError::page_flush(id, &e));
            }
        };

        // The floor stays between the previous floor and this checkpoint's
        // mark.
        let floor = flushed.max(lower).min(mark);
        if floor != flushed {
            warn!(
                "Page store returned floor {} for checkpoint {}, clamped to {}",
                flushed, id, floor
            );
        }

        let entry = CheckpointEntry::new(id, started, floor, reason);

        if let Err(e) = self.markers.write_end(&entry) {
            self.history.abort_checkpoint();
            return Err(CheckpointError::io(id, &e));
        }

        let evicted = self
            .history
            .finish_checkpoint(entry.clone(), self.config.checkpoint_history_cap());

        if !evicted.is_empty() {
            if let Err(e) = self.markers.remove(&evicted) {
                warn!("Failed to remove markers of evicted checkpoints: {}", e);
            }
        }

        info!(
            "Checkpoint {} finished: floor: {}, history: {}, evicted: {}",
            id,
            floor,
            self.history.len(),
            evicted.len()
        );

        self.page_store.on_checkpoint_complete(&entry);

        if let Some(cleaner) = &self.cleaner {
            cleaner.schedule();
        }

        Ok(entry)
    }
}
