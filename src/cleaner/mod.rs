//! Deletes archived segments that no retained checkpoint needs.
//!
//! A pass runs after every completed checkpoint, on a worker thread, or on
//! demand. Deletion never crosses the safe floor: the floor of the oldest
//! retained checkpoint, or of the running one if lower. When the archive is
//! over its byte budget, the oldest checkpoints are evicted from the
//! history first, which raises the floor; the newest checkpoint is always
//! kept.

pub(crate) mod report;

use std::io;
use std::sync::mpsc::Receiver;
use std::sync::mpsc::Sender;
use std::sync::mpsc::SyncSender;
use std::sync::mpsc::TrySendError;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::thread::JoinHandle;

use log::debug;
use log::error;
use log::info;
use log::warn;

use crate::checkpoint::history::CheckpointHistory;
use crate::checkpoint::markers::CheckpointMarkers;
use crate::segment::store::SegmentStore;
use crate::CleanupReport;
use crate::Retention;

pub(crate) enum CleanRequest {
    /// Run a cleaning pass.
    Clean,

    /// Reply after every request sent before it is handled.
    Sync { tx: SyncSender<()> },

    Shutdown,
}

/// Schedules cleaning passes on the worker without blocking.
#[derive(Debug, Clone)]
pub(crate) struct CleanerHandle {
    tx: SyncSender<CleanRequest>,
}

impl CleanerHandle {
    pub(crate) fn schedule(&self) {
        match self.tx.try_send(CleanRequest::Clean) {
            Ok(_) => {}
            Err(TrySendError::Full(_)) => {
                debug!("Archive cleaner queue is full, a pass is already pending");
            }
            Err(TrySendError::Disconnected(_)) => {
                warn!("Archive cleaner is stopped, skip cleaning");
            }
        }
    }
}

#[derive(Debug, Default)]
struct CleanerStats {
    passes: u64,
    backpressure: u64,
}

struct CleanerCore {
    retention: Retention,
    store: Arc<SegmentStore>,
    history: Arc<CheckpointHistory>,
    markers: Arc<CheckpointMarkers>,

    /// Serializes passes.
    stats: Mutex<CleanerStats>,

    subscribers: Mutex<Vec<Sender<CleanupReport>>>,
}

/// Runs cleaning passes on a worker thread, and on demand.
pub struct ArchiveCleaner {
    core: Arc<CleanerCore>,
    tx: SyncSender<CleanRequest>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ArchiveCleaner {
    pub(crate) fn start(
        retention: Retention,
        store: Arc<SegmentStore>,
        history: Arc<CheckpointHistory>,
        markers: Arc<CheckpointMarkers>,
    ) -> Result<Self, io::Error> {
        let core = Arc::new(CleanerCore {
            retention,
            store,
            history,
            markers,
            stats: Mutex::new(CleanerStats::default()),
            subscribers: Mutex::new(vec![]),
        });

        // One pending pass is enough; more collapse into it.
        let (tx, rx) = std::sync::mpsc::sync_channel(1);

        let worker_core = core.clone();
        let h = std::thread::Builder::new()
            .name("wal_archive_cleaner".to_string())
            .spawn(move || Self::run(worker_core, rx))?;

        Ok(Self {
            core,
            tx,
            handle: Mutex::new(Some(h)),
        })
    }

    pub(crate) fn handle(&self) -> CleanerHandle {
        CleanerHandle {
            tx: self.tx.clone(),
        }
    }

    /// Run one pass on the calling thread.
    pub fn clean_once(&self) -> Result<CleanupReport, io::Error> {
        self.core.clean_once()
    }

    /// Block until the worker finished every pass scheduled so far.
    pub fn sync(&self) -> Result<(), io::Error> {
        let (tx, rx) = std::sync::mpsc::sync_channel(1);
        self.tx
            .send(CleanRequest::Sync { tx })
            .map_err(|e| io::Error::new(io::ErrorKind::BrokenPipe, e.to_string()))?;
        rx.recv()
            .map_err(|e| io::Error::new(io::ErrorKind::BrokenPipe, e.to_string()))
    }

    /// Receive a report of every later pass.
    pub fn subscribe(&self) -> Receiver<CleanupReport> {
        let (tx, rx) = std::sync::mpsc::channel();
        self.core.lock_subscribers().push(tx);
        rx
    }

    /// Number of passes that ended with the archive still over budget.
    pub fn backpressure_count(&self) -> u64 {
        self.core.lock_stats().backpressure
    }

    pub fn pass_count(&self) -> u64 {
        self.core.lock_stats().passes
    }

    pub(crate) fn shutdown(&self) {
        let _ = self.tx.send(CleanRequest::Shutdown);

        let h = self.handle.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(h) = h {
            if h.join().is_err() {
                error!("Archive cleaner thread panicked");
            }
        }
    }

    fn run(core: Arc<CleanerCore>, rx: Receiver<CleanRequest>) {
        loop {
            let Ok(req) = rx.recv() else {
                info!("Archive cleaner input channel closed, quit");
                return;
            };

            match req {
                CleanRequest::Clean => {
                    // A failed pass is retried with the next request.
                    if let Err(e) = core.clean_once() {
                        error!("Failed to clean WAL archive: {}", e);
                    }
                }
                CleanRequest::Sync { tx } => {
                    let _ = tx.send(());
                }
                CleanRequest::Shutdown => {
                    info!("Archive cleaner received shutdown, quit");
                    return;
                }
            }
        }
    }
}

impl CleanerCore {
    fn lock_stats(&self) -> MutexGuard<'_, CleanerStats> {
        self.stats.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_subscribers(&self) -> MutexGuard<'_, Vec<Sender<CleanupReport>>> {
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn clean_once(&self) -> Result<CleanupReport, io::Error> {
        let mut stats = self.lock_stats();

        // Before the first checkpoint every segment may be needed.
        let has_checkpoint = !self.history.is_empty();

        let mut evicted = vec![];

        if let Retention::ArchiveSize(budget) = self.retention {
            if self.store.total_archive_size() >= budget {
                evicted = self.history.evict_oldest_while(|oldest| {
                    self.store.retained_size_from(oldest.floor.index) >= budget
                });
            }
        }

        if !evicted.is_empty() {
            info!(
                "Evict {} checkpoints from history to meet the archive budget",
                evicted.len()
            );
            // Markers go first: a restart must not restore a checkpoint
            // whose segments are deleted.
            self.markers.remove(&evicted)?;
        }

        let safe_floor = self.history.safe_floor();

        let deleted = match safe_floor.and_then(|f| f.index.prev()) {
            Some(boundary) => self.store.delete_upto(boundary)?,
            None => Default::default(),
        };

        let archive_size = self.store.total_archive_size();
        let over_budget = match self.retention {
            Retention::ArchiveSize(budget) => archive_size >= budget,
            Retention::Unlimited | Retention::HistoryDepth(_) => false,
        };

        stats.passes += 1;

        if over_budget && has_checkpoint {
            stats.backpressure += 1;
            warn!(
                "WAL archive size {} is still over the budget after cleaning; \
                the newest checkpoint needs WAL from {:?}",
                archive_size, safe_floor
            );
        }

        let report = CleanupReport {
            pass: stats.passes,
            removed: deleted.removed,
            reclaimed_bytes: deleted.reclaimed_bytes,
            evicted_checkpoints: evicted.iter().map(|e| e.id).collect(),
            safe_floor,
            archive_size,
            last_truncated: self.store.last_truncated_segment(),
            over_budget,
        };

        if report.removed_anything() {
            info!(
                "Finish clean WAL archive [cleanCnt={}, lastTruncatedSegment={:?}, reclaimed={}, archiveSize={}, safeFloor={:?}]",
                report.removed.len(),
                report.last_truncated.map(|x| x.0),
                report.reclaimed_bytes,
                report.archive_size,
                report.safe_floor,
            );
        } else {
            debug!("WAL archive clean pass removed nothing: {}", report);
        }

        self.lock_subscribers()
            .retain(|s| s.send(report.clone()).is_ok());

        Ok(report)
    }
}
