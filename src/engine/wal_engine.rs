use std::io;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::sync::Mutex;
use std::thread::JoinHandle;
use std::time::Duration;

use log::error;
use log::info;
use log::warn;

use crate::api::page_store::PageStore;
use crate::checkpoint::checkpointer::CheckpointResult;
use crate::checkpoint::checkpointer::Checkpointer;
use crate::checkpoint::history::CheckpointHistory;
use crate::checkpoint::markers::CheckpointMarkers;
use crate::checkpoint::runner::now_millis;
use crate::checkpoint::runner::CheckpointRunner;
use crate::cleaner::ArchiveCleaner;
use crate::engine::stat::SegmentStat;
use crate::engine::stat::Stat;
use crate::file_lock::DirLock;
use crate::segment::store::SegmentStore;
use crate::segment::SegmentDescriptor;
use crate::segment::SegmentStatus;
use crate::wal::reader::WalReader;
use crate::wal::WalWriter;
use crate::CheckpointEntry;
use crate::CheckpointReason;
use crate::CleanupReport;
use crate::Config;
use crate::Retention;
use crate::SegmentIndex;
use crate::WalPointer;
use crate::WalRecord;

/// A Write-Ahead Log with segment archiving, checkpoints and archive
/// retention.
///
/// Opening an engine starts three threads: one archives sealed segments, one
/// runs checkpoints, and one deletes archived segments no checkpoint needs.
/// The last one is not started if the archive is unlimited. Dropping the
/// engine stops them.
pub struct WalEngine {
    config: Arc<Config>,
    retention: Retention,

    store: Arc<SegmentStore>,
    writer: Arc<WalWriter>,
    history: Arc<CheckpointHistory>,
    markers: Arc<CheckpointMarkers>,

    checkpointer: Checkpointer,
    cleaner: Option<ArchiveCleaner>,

    archive_worker: Mutex<Option<JoinHandle<()>>>,

    _dir_lock: DirLock,
}

impl WalEngine {
    /// Validate `config`, recover the state left by a previous run, and
    /// start the workers.
    ///
    /// An invalid config is rejected before anything is created on disk.
    pub fn open(
        config: Arc<Config>,
        page_store: Arc<dyn PageStore>,
    ) -> Result<Self, io::Error> {
        let retention = config.validate()?;

        std::fs::create_dir_all(&config.dir)?;
        let dir_lock = DirLock::acquire(&config.dir)?;

        let store = Arc::new(SegmentStore::open(config.clone())?);
        let markers = Arc::new(CheckpointMarkers::open(config.clone())?);

        let history = Arc::new(CheckpointHistory::from_entries(markers.recover()?));
        Self::drop_unusable_checkpoints(&config, &store, &history, &markers)?;

        let checkpointer = Checkpointer::new(config.checkpoint_frequency());

        let (writer, archive_worker) =
            WalWriter::open(config.clone(), store.clone(), Some(checkpointer.trigger()))?;
        let writer = Arc::new(writer);

        markers.write_node_started(now_millis(), writer.current_pointer()?)?;

        let cleaner = if retention.deletion_enabled() {
            Some(ArchiveCleaner::start(
                retention,
                store.clone(),
                history.clone(),
                markers.clone(),
            )?)
        } else {
            info!("WAL archive is unlimited, archive cleaner is disabled");
            None
        };

        let runner = CheckpointRunner {
            config: config.clone(),
            writer: writer.clone(),
            history: history.clone(),
            markers: markers.clone(),
            page_store,
            cleaner: cleaner.as_ref().map(|c| c.handle()),
            next_id: history.last_id() + 1,
        };
        checkpointer.start(runner)?;

        info!(
            "WalEngine opened: dir: {}, retention: {:?}, history: {}, active at {}",
            config.dir,
            retention,
            history.len(),
            writer.current_pointer()?
        );

        Ok(Self {
            config,
            retention,
            store,
            writer,
            history,
            markers,
            checkpointer,
            cleaner,
            archive_worker: Mutex::new(Some(archive_worker)),
            _dir_lock: dir_lock,
        })
    }

    /// Prune restored history to the cap, and drop checkpoints whose floor
    /// segment is already deleted: they can not be recovered from.
    fn drop_unusable_checkpoints(
        config: &Config,
        store: &SegmentStore,
        history: &CheckpointHistory,
        markers: &CheckpointMarkers,
    ) -> Result<(), io::Error> {
        if let Some(cap) = config.checkpoint_history_cap() {
            let evicted = history.prune_to_cap(cap);
            markers.remove(&evicted)?;
        }

        if let Some(truncated) = store.last_truncated_segment() {
            let evicted = history.evict_oldest_while(|e| e.floor.index <= truncated);
            if !evicted.is_empty() {
                warn!(
                    "Drop {} checkpoints whose WAL is truncated up to {}",
                    evicted.len(),
                    truncated
                );
                markers.remove(&evicted)?;
            }
        }
        Ok(())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn retention(&self) -> Retention {
        self.retention
    }

    /// Append a record to the WAL and return its position.
    pub fn append(&self, rec: &WalRecord) -> Result<WalPointer, io::Error> {
        self.writer.append(rec)
    }

    /// Append a key-value record.
    pub fn put(
        &self,
        key: impl Into<Vec<u8>>,
        value: impl Into<Vec<u8>>,
    ) -> Result<WalPointer, io::Error> {
        self.append(&WalRecord::data(key, value))
    }

    /// Make every appended record durable, according to the
    /// [`WalMode`](crate::WalMode).
    pub fn flush(&self) -> Result<(), io::Error> {
        self.writer.flush()
    }

    /// Position the next appended record will get.
    pub fn current_pointer(&self) -> Result<WalPointer, io::Error> {
        self.writer.current_pointer()
    }

    /// Run a checkpoint now and wait for it.
    pub fn force_checkpoint(&self, reason: impl ToString) -> CheckpointResult {
        self.checkpointer
            .force(CheckpointReason::explicit(reason), None)
    }

    /// Like [`Self::force_checkpoint`], but give up waiting after `timeout`.
    pub fn force_checkpoint_timeout(
        &self,
        reason: impl ToString,
        timeout: Duration,
    ) -> CheckpointResult {
        self.checkpointer
            .force(CheckpointReason::explicit(reason), Some(timeout))
    }

    /// Schedule a checkpoint without waiting.
    pub fn request_checkpoint(&self, reason: impl ToString) {
        self.checkpointer
            .schedule(CheckpointReason::explicit(reason))
    }

    pub fn checkpointer(&self) -> &Checkpointer {
        &self.checkpointer
    }

    pub fn checkpoint_history(&self) -> &CheckpointHistory {
        &self.history
    }

    /// File names in the checkpoint marker directory.
    pub fn checkpoint_marker_files(&self) -> Result<Vec<String>, io::Error> {
        self.markers.list_files()
    }

    /// Archived segments, ascending.
    pub fn wal_archive_files(&self) -> Vec<SegmentDescriptor> {
        self.store.list_archived()
    }

    pub fn total_archive_size(&self) -> u64 {
        self.store.total_archive_size()
    }

    /// Highest segment index deleted from the archive.
    pub fn last_truncated_segment(&self) -> Option<SegmentIndex> {
        self.store.last_truncated_segment()
    }

    /// Whether archived segments are ever deleted.
    pub fn is_archive_cleaner_enabled(&self) -> bool {
        self.cleaner.is_some()
    }

    /// Run one cleaning pass now. `None` if the archive is unlimited.
    pub fn clean_archive(&self) -> Result<Option<CleanupReport>, io::Error> {
        match &self.cleaner {
            Some(c) => Ok(Some(c.clean_once()?)),
            None => Ok(None),
        }
    }

    /// Receive a report of every later cleaning pass. `None` if the archive
    /// is unlimited.
    pub fn subscribe_cleanup(&self) -> Option<Receiver<CleanupReport>> {
        self.cleaner.as_ref().map(|c| c.subscribe())
    }

    /// Block until sealed segments are archived and scheduled cleaning
    /// passes are done.
    pub fn sync_archive(&self) -> Result<(), io::Error> {
        self.writer.sync_archive()?;
        if let Some(c) = &self.cleaner {
            c.sync()?;
        }
        Ok(())
    }

    /// Read WAL records from `from` onward.
    ///
    /// Fails with `NotFound` if the segment `from` points into is deleted.
    pub fn replay_from(&self, from: WalPointer) -> Result<WalReader, io::Error> {
        self.writer.flush()?;

        let (active, _, _) = self.writer.active_segment()?;

        let mut segments = self
            .store
            .list_archived()
            .into_iter()
            .map(|d| d.index)
            .collect::<Vec<_>>();

        // Segments sealed but not yet archived are still in the work dir.
        let mut i = segments
            .last()
            .copied()
            .or_else(|| self.store.last_truncated_segment())
            .map(|x| x.next())
            .unwrap_or_default();
        while i <= active {
            segments.push(i);
            i = i.next();
        }

        WalReader::new(self.config.clone(), segments, from)
    }

    /// Read the WAL from the floor of the oldest retained checkpoint.
    pub fn replay_from_earliest_checkpoint(&self) -> Result<Option<WalReader>, io::Error> {
        match self.history.earliest_required_pointer() {
            Some(p) => Ok(Some(self.replay_from(p)?)),
            None => Ok(None),
        }
    }

    /// The last completed checkpoint.
    pub fn last_checkpoint(&self) -> Option<CheckpointEntry> {
        self.history.last()
    }

    pub fn stat(&self) -> Result<Stat, io::Error> {
        let (index, _path, size) = self.writer.active_segment()?;

        let archived_segments = self
            .store
            .list_archived()
            .into_iter()
            .map(|d| SegmentStat {
                index: d.index,
                size: d.size,
                status: d.status,
            })
            .collect();

        let max_archive_size = match self.retention {
            Retention::ArchiveSize(max) => Some(max),
            Retention::Unlimited | Retention::HistoryDepth(_) => None,
        };

        Ok(Stat {
            archived_segments,
            active_segment: SegmentStat {
                index,
                size,
                status: SegmentStatus::Active,
            },
            reusable_segments: self.store.list_reusable().len(),
            archive_size: self.store.total_archive_size(),
            max_archive_size,
            last_truncated: self.store.last_truncated_segment(),
            archive_failure: self.store.archive_failure(),
            bytes_since_checkpoint: self.writer.bytes_since_checkpoint(),
            checkpoint_history_len: self.history.len(),
            earliest_required: self.history.earliest_required_pointer(),
            checkpoint: self.checkpointer.progress(),
            checkpoints_completed: self.checkpointer.completed_count(),
            checkpoint_consecutive_failures: self.checkpointer.consecutive_failures(),
            cleanup_passes: self.cleaner.as_ref().map(|c| c.pass_count()).unwrap_or(0),
            cleanup_backpressure: self
                .cleaner
                .as_ref()
                .map(|c| c.backpressure_count())
                .unwrap_or(0),
        })
    }
}

impl Drop for WalEngine {
    fn drop(&mut self) {
        self.checkpointer.shutdown();

        if let Some(c) = &self.cleaner {
            c.shutdown();
        }

        if let Err(e) = self.writer.close() {
            error!("Failed to flush WAL when closing: {}", e);
        }

        let h = self
            .archive_worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(h) = h {
            if h.join().is_err() {
                error!("Archive worker thread panicked");
            }
        }

        info!("WalEngine closed: {}", self.config.dir);
    }
}
