use std::io;
use std::sync::mpsc::Receiver;
use std::sync::mpsc::Sender;
use std::sync::mpsc::SyncSender;
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::segment::store::SegmentStore;
use crate::segment::SealedSegment;

pub(crate) enum ArchiveRequest {
    /// Move a sealed segment into the archive.
    Archive(SealedSegment),

    /// Reply once every request sent before it is handled.
    Sync {
        tx: SyncSender<Result<(), io::Error>>,
    },

    /// Quit after handling every request sent before it.
    Shutdown,
}

/// Moves sealed segments into the archive, one at a time and in the order
/// they were sealed.
///
/// The request channel is unbounded: the WAL writer sends while holding its
/// lock and must not wait for a slow archive. The number of queued segments
/// is bounded by the writer, which stops appending once an archive failure
/// is recorded in the [`SegmentStore`].
pub(crate) struct ArchiveWorker {
    rx: Receiver<ArchiveRequest>,
    store: Arc<SegmentStore>,

    /// The first archive failure; later requests are answered with it.
    failure: Option<io::Error>,
}

impl ArchiveWorker {
    pub(crate) fn new(store: Arc<SegmentStore>) -> (Sender<ArchiveRequest>, Self) {
        let (tx, rx) = std::sync::mpsc::channel();

        let worker = ArchiveWorker {
            rx,
            store,
            failure: None,
        };

        (tx, worker)
    }

    pub(crate) fn spawn(
        store: Arc<SegmentStore>,
    ) -> Result<(Sender<ArchiveRequest>, JoinHandle<()>), io::Error> {
        let (tx, worker) = Self::new(store);

        let handle = std::thread::Builder::new()
            .name("wal_archive_worker".to_string())
            .spawn(move || {
                worker.run();
            })?;

        Ok((tx, handle))
    }

    fn run(mut self) {
        loop {
            let req = self.rx.recv();
            let Ok(req) = req else {
                log::info!("ArchiveWorker input channel closed, quit");
                return;
            };

            match req {
                ArchiveRequest::Archive(sealed) => {
                    if self.failure.is_some() {
                        log::error!(
                            "ArchiveWorker is failed, skip archiving {}",
                            sealed.index
                        );
                        continue;
                    }

                    let index = sealed.index;
                    if let Err(e) = self.store.archive(sealed) {
                        log::error!("Failed to archive {}: {}", index, e);
                        self.store.set_archive_failure(index, &e);
                        self.failure = Some(e);
                    }
                }
                ArchiveRequest::Sync { tx } => {
                    let res = match &self.failure {
                        None => Ok(()),
                        Some(e) => Err(io::Error::new(e.kind(), e.to_string())),
                    };
                    let _ = tx.send(res);
                }
                ArchiveRequest::Shutdown => {
                    log::info!("ArchiveWorker received shutdown, quit");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::Arc;

    use pretty_assertions::assert_eq;

    use super::ArchiveRequest;
    use super::ArchiveWorker;
    use crate::segment::store::SegmentStore;
    use crate::segment::SealedSegment;
    use crate::tests::context::TestContext;
    use crate::SegmentIndex;

    fn sealed(ctx: &TestContext, index: u64, write: bool) -> Result<SealedSegment, io::Error> {
        let index = SegmentIndex(index);
        let path = ctx.config.work_segment_path(index);
        if write {
            std::fs::write(&path, b"x")?;
        }
        Ok(SealedSegment {
            index,
            path,
            size: 1,
        })
    }

    #[test]
    fn test_requests_queue_while_worker_is_busy() -> Result<(), io::Error> {
        let ctx = TestContext::new()?;
        let store = Arc::new(SegmentStore::open(ctx.arc_config())?);

        // Nothing is consumed until every request is sent.
        let (tx, worker) = ArchiveWorker::new(store.clone());
        for i in 0..1500 {
            tx.send(ArchiveRequest::Archive(sealed(&ctx, i, true)?)).unwrap();
        }
        let (sync_tx, sync_rx) = std::sync::mpsc::sync_channel(1);
        tx.send(ArchiveRequest::Sync { tx: sync_tx }).unwrap();
        tx.send(ArchiveRequest::Shutdown).unwrap();

        worker.run();

        sync_rx.recv().unwrap()?;
        assert_eq!(1500, store.list_archived().len());
        assert_eq!(Some(SegmentIndex(1499)), store.last_archived());
        assert_eq!(None, store.archive_failure());
        Ok(())
    }

    #[test]
    fn test_failure_is_recorded_in_store() -> Result<(), io::Error> {
        let ctx = TestContext::new()?;
        let store = Arc::new(SegmentStore::open(ctx.arc_config())?);

        let (tx, worker) = ArchiveWorker::new(store.clone());
        tx.send(ArchiveRequest::Archive(sealed(&ctx, 0, true)?)).unwrap();
        // The file of segment 1 is missing.
        tx.send(ArchiveRequest::Archive(sealed(&ctx, 1, false)?)).unwrap();
        tx.send(ArchiveRequest::Archive(sealed(&ctx, 2, true)?)).unwrap();
        let (sync_tx, sync_rx) = std::sync::mpsc::sync_channel(1);
        tx.send(ArchiveRequest::Sync { tx: sync_tx }).unwrap();
        tx.send(ArchiveRequest::Shutdown).unwrap();

        worker.run();

        let err = sync_rx.recv().unwrap().unwrap_err();
        assert_eq!(io::ErrorKind::NotFound, err.kind());

        let failure = store.archive_failure().unwrap();
        assert!(
            failure.starts_with("failed to archive Segment(0000000000000001)"),
            "{}",
            failure
        );

        // Segments after the failed one stay in the work dir.
        assert_eq!(Some(SegmentIndex(0)), store.last_archived());
        assert!(std::path::Path::new(&ctx.config.work_segment_path(SegmentIndex(2))).exists());
        Ok(())
    }
}
