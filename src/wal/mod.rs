//! The Write-Ahead Log writer.
//!
//! Records are appended to the active segment. When a record does not fit
//! into the rest of the active segment, the segment is sealed and handed to
//! the archive worker, and a new segment with the next index is created.
//! The bytes written since the last checkpoint mark are counted; once they
//! exceed the configured threshold a checkpoint is requested.

pub(crate) mod pointer;
pub(crate) mod reader;
pub(crate) mod wal_record;

use std::io;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::thread::JoinHandle;

use log::error;
use log::info;
use log::warn;

use crate::checkpoint::checkpointer::CheckpointTrigger;
use crate::checkpoint::reason::CheckpointReason;
use crate::segment::active_segment::ActiveSegment;
use crate::segment::archiver::ArchiveRequest;
use crate::segment::archiver::ArchiveWorker;
use crate::segment::list_segment_files;
use crate::segment::recover_segment_file;
use crate::segment::store::SegmentStore;
use crate::segment::SealedSegment;
use crate::Config;
use crate::SegmentIndex;
use crate::WalMode;
use crate::WalPointer;
use crate::WalRecord;

/// Appends records to the WAL and rotates segments.
///
/// All appends are serialized by one lock. After an I/O error the writer
/// refuses further appends: the state of the active segment file is
/// unknown. It also refuses appends once the archive worker has failed, so
/// that sealed segments do not pile up in the work directory.
pub(crate) struct WalWriter {
    config: Arc<Config>,
    store: Arc<SegmentStore>,

    inner: Mutex<WriterInner>,

    bytes_since_checkpoint: AtomicU64,

    /// Request a checkpoint when `bytes_since_checkpoint` exceeds this.
    trigger_bytes: Option<u64>,
    trigger: Option<CheckpointTrigger>,
}

struct WriterInner {
    active: ActiveSegment,
    archive_tx: Sender<ArchiveRequest>,

    /// Set after the first I/O error.
    broken: Option<String>,
}

impl WalWriter {
    /// Recover segments left in the work directory by the previous run,
    /// archive them, and start a new active segment.
    ///
    /// Returns the writer and the handle of the archive worker thread.
    pub(crate) fn open(
        config: Arc<Config>,
        store: Arc<SegmentStore>,
        trigger: Option<CheckpointTrigger>,
    ) -> Result<(Self, JoinHandle<()>), io::Error> {
        let left = list_segment_files(&config.work_dir())?;

        for index in left.iter().copied() {
            let path = config.work_segment_path(index);
            let size = recover_segment_file(&config, &path, index)?;

            if size == 0 {
                warn!("Remove empty {} left in work dir", index);
                std::fs::remove_file(&path)?;
                continue;
            }

            info!("Archive {} left in work dir, size: {}", index, size);
            store.archive(SealedSegment { index, path, size })?;
        }

        let next = match (store.last_archived(), store.last_truncated_segment())
        {
            (Some(archived), _) => archived.next(),
            (None, Some(truncated)) => truncated.next(),
            (None, None) => SegmentIndex(0),
        };

        let active = ActiveSegment::create(&config, &store, next)?;

        let (archive_tx, handle) = ArchiveWorker::spawn(store.clone())?;

        info!("WalWriter opened, active: {}", next);

        let writer = Self {
            trigger_bytes: config.checkpoint_trigger_bytes(),
            config,
            store,
            inner: Mutex::new(WriterInner {
                active,
                archive_tx,
                broken: None,
            }),
            bytes_since_checkpoint: AtomicU64::new(0),
            trigger,
        };

        Ok((writer, handle))
    }

    /// Lock for appending: fails if the writer or the archive worker failed.
    fn lock(&self) -> Result<MutexGuard<'_, WriterInner>, io::Error> {
        let inner = self.lock_unbroken()?;

        if let Some(reason) = self.store.archive_failure() {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("WalWriter stopped, WAL archive {}", reason),
            ));
        }
        Ok(inner)
    }

    /// Lock for writing what is already appended: fails only if the active
    /// segment is in an unknown state.
    fn lock_unbroken(&self) -> Result<MutexGuard<'_, WriterInner>, io::Error> {
        let inner = self.lock_state()?;

        if let Some(reason) = &inner.broken {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("WalWriter is broken by a previous error: {}", reason),
            ));
        }
        Ok(inner)
    }

    /// Lock for reading the state, which stays valid after a failure.
    fn lock_state(&self) -> Result<MutexGuard<'_, WriterInner>, io::Error> {
        self.inner.lock().map_err(|_| {
            io::Error::new(io::ErrorKind::Other, "WalWriter lock is poisoned")
        })
    }

    /// Largest record that fits into an empty segment.
    fn max_record_size(&self) -> u64 {
        let header = WalRecord::SegmentHeader { index: 0 }.encoded_size();
        self.config.wal_segment_size() - header
    }

    /// Append a record, rotating to a new segment if it does not fit in the
    /// active one.
    pub(crate) fn append(&self, rec: &WalRecord) -> Result<WalPointer, io::Error> {
        let size = rec.encoded_size();
        if size > self.max_record_size() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "record of {} bytes does not fit in a segment of {} bytes",
                    size,
                    self.config.wal_segment_size()
                ),
            ));
        }

        let (pointer, rotated, total) = {
            let mut inner = self.lock()?;
            let rotated = self.rotate_if_full(&mut inner, size)?;
            let pointer = Self::poison_on_err(
                &mut inner,
                |active, mode| active.append_record(rec, mode),
                self.config.wal_mode(),
            )?;

            // Under the same lock as the reset in `checkpoint_mark`.
            let total =
                self.bytes_since_checkpoint.fetch_add(size, Ordering::Relaxed) + size;
            (pointer, rotated, total)
        };

        if rotated {
            self.check_size_trigger(total);
        }

        Ok(pointer)
    }

    /// Append the begin record of checkpoint `id` and make the WAL durable
    /// up to it.
    ///
    /// The byte counter of the size trigger restarts from this point.
    pub(crate) fn checkpoint_mark(&self, id: u64) -> Result<WalPointer, io::Error> {
        let rec = WalRecord::CheckpointBegin { id };
        let size = rec.encoded_size();
        let mode = self.config.wal_mode();

        let mut inner = self.lock()?;
        self.rotate_if_full(&mut inner, size)?;

        let pointer = Self::poison_on_err(
            &mut inner,
            |active, mode| {
                let p = active.append_record(&rec, mode)?;
                active.flush(mode.fsync_enabled())?;
                Ok(p)
            },
            mode,
        )?;

        self.bytes_since_checkpoint.store(0, Ordering::Relaxed);
        Ok(pointer)
    }

    /// Write buffered records and fsync the active segment, unless fsync is
    /// disabled by [`WalMode::None`](crate::WalMode::None).
    pub(crate) fn flush(&self) -> Result<(), io::Error> {
        let mut inner = self.lock_unbroken()?;
        Self::poison_on_err(
            &mut inner,
            |active, mode| active.flush(mode.fsync_enabled()),
            self.config.wal_mode(),
        )
    }

    /// Block until every sealed segment has been moved into the archive.
    pub(crate) fn sync_archive(&self) -> Result<(), io::Error> {
        let (tx, rx) = std::sync::mpsc::sync_channel(1);
        {
            let inner = self.lock_state()?;
            inner
                .archive_tx
                .send(ArchiveRequest::Sync { tx })
                .map_err(|e| {
                    io::Error::new(io::ErrorKind::BrokenPipe, e.to_string())
                })?;
        }

        rx.recv()
            .map_err(|e| io::Error::new(io::ErrorKind::BrokenPipe, e.to_string()))?
    }

    /// Flush the active segment and stop the archive worker once it has
    /// archived everything sealed so far.
    pub(crate) fn close(&self) -> Result<(), io::Error> {
        let flush_res = self.flush();

        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let _ = inner.archive_tx.send(ArchiveRequest::Shutdown);

        flush_res
    }

    /// Position where the next record will be written.
    pub(crate) fn current_pointer(&self) -> Result<WalPointer, io::Error> {
        Ok(self.lock()?.active.end_pointer())
    }

    /// Index and path of the active segment.
    pub(crate) fn active_segment(&self) -> Result<(SegmentIndex, String, u64), io::Error> {
        let inner = self.lock_state()?;
        Ok((
            inner.active.index(),
            inner.active.path().to_string(),
            inner.active.size(),
        ))
    }

    pub(crate) fn bytes_since_checkpoint(&self) -> u64 {
        self.bytes_since_checkpoint.load(Ordering::Relaxed)
    }

    fn rotate_if_full(
        &self,
        inner: &mut WriterInner,
        size: u64,
    ) -> Result<bool, io::Error> {
        if inner.active.size() + size <= self.config.wal_segment_size() {
            return Ok(false);
        }

        if let Err(e) = self.rotate(inner) {
            error!("Failed to rotate WAL segment: {}", e);
            inner.broken = Some(e.to_string());
            return Err(e);
        }
        Ok(true)
    }

    fn rotate(&self, inner: &mut WriterInner) -> Result<(), io::Error> {
        let next = inner.active.index().next();
        let new_active = ActiveSegment::create(&self.config, &self.store, next)?;

        let old = std::mem::replace(&mut inner.active, new_active);
        let sealed = old.seal(self.config.wal_mode())?;

        info!(
            "Rotate WAL segment: sealed {} with {} bytes, new active {}",
            sealed.index, sealed.size, next
        );

        inner
            .archive_tx
            .send(ArchiveRequest::Archive(sealed))
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "archive worker is gone",
                )
            })
    }

    fn poison_on_err<T>(
        inner: &mut WriterInner,
        f: impl FnOnce(&mut ActiveSegment, WalMode) -> Result<T, io::Error>,
        mode: WalMode,
    ) -> Result<T, io::Error> {
        let res = f(&mut inner.active, mode);
        if let Err(e) = &res {
            error!("WAL write failed, writer is now unusable: {}", e);
            inner.broken = Some(e.to_string());
        }
        res
    }

    fn check_size_trigger(&self, written: u64) {
        let (Some(limit), Some(trigger)) = (self.trigger_bytes, &self.trigger)
        else {
            return;
        };

        if written > limit {
            info!(
                "{} bytes written since last checkpoint, exceeds {}, request checkpoint",
                written, limit
            );
            trigger.schedule(CheckpointReason::WalSizeThreshold);
        }
    }
}
