use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use codeq::error_context_ext::ErrorContextExt;
use log::debug;
use log::info;
use log::warn;

use crate::errors::ArchiveOutOfOrder;
use crate::segment::ensure_consecutive;
use crate::segment::list_segment_files;
use crate::segment::SealedSegment;
use crate::segment::SegmentDescriptor;
use crate::segment::SegmentStatus;
use crate::Config;
use crate::SegmentIndex;

const REUSE_SUFFIX: &str = ".wal.reuse";

/// Segments removed by one [`SegmentStore::delete_upto`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteReport {
    /// Indexes removed from the archive, ascending
    pub removed: Vec<SegmentIndex>,

    /// Total bytes of the removed segments
    pub reclaimed_bytes: u64,

    /// How many of the removed files went into the reuse pool
    pub recycled: usize,
}

/// Owns the archive directory: which segments are archived, their sizes,
/// and the highest deleted index.
///
/// All mutations go through one lock, so the archiver and the cleaner never
/// observe each other's partial updates.
#[derive(Debug)]
pub struct SegmentStore {
    config: Arc<Config>,
    inner: Mutex<StoreInner>,
}

#[derive(Debug, Default)]
struct StoreInner {
    /// Archived segments and their sizes.
    archived: BTreeMap<SegmentIndex, u64>,

    total_size: u64,

    last_truncated: Option<SegmentIndex>,

    /// The only index [`SegmentStore::archive`] accepts next.
    ///
    /// `None` until the first segment is archived.
    next_archive: Option<SegmentIndex>,

    /// Recycled files in the work directory.
    reuse_pool: Vec<String>,

    /// Suffix number for the next recycled file name.
    next_reuse_id: u64,

    /// The first error of the archive worker. Once set, no segment is
    /// archived until the engine is reopened.
    archive_failure: Option<String>,
}

impl SegmentStore {
    /// Load the archive directory and the reuse pool.
    pub(crate) fn open(config: Arc<Config>) -> Result<Self, io::Error> {
        let archive_dir = config.archive_dir();
        let work_dir = config.work_dir();

        std::fs::create_dir_all(&archive_dir)
            .context(|| format!("create archive dir {}", archive_dir))?;
        std::fs::create_dir_all(&work_dir)
            .context(|| format!("create work dir {}", work_dir))?;

        let indexes = list_segment_files(&archive_dir)?;
        ensure_consecutive(&indexes)?;

        let mut inner = StoreInner::default();

        for index in indexes.iter().copied() {
            let path = config.archive_segment_path(index);
            let size = std::fs::metadata(&path)
                .context(|| format!("stat archived {}", index))?
                .len();

            inner.archived.insert(index, size);
            inner.total_size += size;
        }

        if let (Some(first), Some(last)) = (indexes.first(), indexes.last()) {
            inner.last_truncated = first.prev();
            inner.next_archive = Some(last.next());
        }

        let (pool, next_reuse_id) = Self::load_reuse_pool(&work_dir)?;
        inner.reuse_pool = pool;
        inner.next_reuse_id = next_reuse_id;

        info!(
            "SegmentStore opened: {} archived segments, {} bytes, last truncated: {:?}, reuse pool: {}",
            inner.archived.len(),
            inner.total_size,
            inner.last_truncated,
            inner.reuse_pool.len()
        );

        Ok(Self {
            config,
            inner: Mutex::new(inner),
        })
    }

    fn load_reuse_pool(work_dir: &str) -> Result<(Vec<String>, u64), io::Error> {
        let mut pool = vec![];
        let mut next_id = 0;

        for entry in std::fs::read_dir(work_dir)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let fn_str = file_name.to_string_lossy();

            let Some(stem) = fn_str.strip_suffix(REUSE_SUFFIX) else {
                continue;
            };

            match stem.parse::<u64>() {
                Ok(n) => {
                    next_id = next_id.max(n + 1);
                    pool.push(format!("{}/{}", work_dir, fn_str));
                }
                Err(_) => {
                    warn!("Ignore invalid reuse file name: '{}'", fn_str);
                }
            }
        }

        pool.sort();
        Ok((pool, next_id))
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        // A panic while holding the lock leaves a consistent map; keep going.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Move a sealed segment from the work directory into the archive.
    ///
    /// Segments must be archived in index order, without gaps.
    pub(crate) fn archive(&self, sealed: SealedSegment) -> Result<(), io::Error> {
        let mut inner = self.lock();

        if let Some(expected) = inner.next_archive {
            if sealed.index != expected {
                return Err(ArchiveOutOfOrder::new(*expected, *sealed.index).into());
            }
        }

        let target = self.config.archive_segment_path(sealed.index);
        std::fs::rename(&sealed.path, &target)
            .context(|| format!("archive {} to {}", sealed.index, target))?;

        if inner.archived.is_empty() && inner.last_truncated.is_none() {
            // Everything before the first archived segment is gone.
            inner.last_truncated = sealed.index.prev();
        }

        inner.archived.insert(sealed.index, sealed.size);
        inner.total_size += sealed.size;
        inner.next_archive = Some(sealed.index.next());

        debug!(
            "Archived {}: {} bytes; archive size: {}",
            sealed.index, sealed.size, inner.total_size
        );
        Ok(())
    }

    /// Remove every archived segment whose index is `<= boundary`.
    ///
    /// Removed files go to the reuse pool while it has room. Segments that
    /// are already gone are skipped, so calling this twice is harmless.
    pub(crate) fn delete_upto(
        &self,
        boundary: SegmentIndex,
    ) -> Result<DeleteReport, io::Error> {
        let mut inner = self.lock();
        let mut report = DeleteReport::default();

        let to_delete = inner
            .archived
            .range(..=boundary)
            .map(|(index, size)| (*index, *size))
            .collect::<Vec<_>>();

        for (index, size) in to_delete {
            let path = self.config.archive_segment_path(index);

            let recycled = if inner.reuse_pool.len()
                < self.config.wal_segment_reuse_count()
            {
                let reuse_path = format!(
                    "{}/{:016}{}",
                    self.config.work_dir(),
                    inner.next_reuse_id,
                    REUSE_SUFFIX
                );
                std::fs::rename(&path, &reuse_path)
                    .context(|| format!("recycle {}", index))?;
                inner.next_reuse_id += 1;
                inner.reuse_pool.push(reuse_path);
                true
            } else {
                match std::fs::remove_file(&path) {
                    Ok(_) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {
                        warn!("Archived {} is already removed", index);
                    }
                    Err(e) => {
                        return Err(e).context(|| format!("remove {}", index));
                    }
                }
                false
            };

            inner.archived.remove(&index);
            inner.total_size -= size;
            inner.last_truncated = inner.last_truncated.max(Some(index));

            report.removed.push(index);
            report.reclaimed_bytes += size;
            if recycled {
                report.recycled += 1;
            }
        }

        Ok(report)
    }

    /// Move a recycled file to `target`. Returns `false` if the pool is
    /// empty.
    pub(crate) fn take_reusable(&self, target: &str) -> Result<bool, io::Error> {
        let mut inner = self.lock();

        let Some(path) = inner.reuse_pool.pop() else {
            return Ok(false);
        };

        std::fs::rename(&path, target)
            .context(|| format!("reuse {} as {}", path, target))?;
        Ok(true)
    }

    /// Archived segments, ascending by index.
    pub fn list_archived(&self) -> Vec<SegmentDescriptor> {
        let inner = self.lock();
        inner
            .archived
            .iter()
            .map(|(index, size)| SegmentDescriptor {
                index: *index,
                path: self.config.archive_segment_path(*index),
                size: *size,
                status: SegmentStatus::Archived,
            })
            .collect()
    }

    /// Files in the reuse pool.
    pub fn list_reusable(&self) -> Vec<SegmentDescriptor> {
        let inner = self.lock();
        inner
            .reuse_pool
            .iter()
            .map(|path| SegmentDescriptor {
                index: SegmentIndex::default(),
                path: path.clone(),
                size: std::fs::metadata(path).map(|m| m.len()).unwrap_or(0),
                status: SegmentStatus::ReservedForReuse,
            })
            .collect()
    }

    pub fn total_archive_size(&self) -> u64 {
        self.lock().total_size
    }

    /// Highest index ever deleted from the archive.
    pub fn last_truncated_segment(&self) -> Option<SegmentIndex> {
        self.lock().last_truncated
    }

    pub fn first_archived(&self) -> Option<SegmentIndex> {
        self.lock().archived.keys().next().copied()
    }

    pub fn last_archived(&self) -> Option<SegmentIndex> {
        self.lock().archived.keys().next_back().copied()
    }

    /// Bytes of the archived segments with index `>= from`.
    pub fn retained_size_from(&self, from: SegmentIndex) -> u64 {
        self.lock().archived.range(from..).map(|(_, size)| *size).sum()
    }

    pub fn contains(&self, index: SegmentIndex) -> bool {
        self.lock().archived.contains_key(&index)
    }

    /// Record the error that stopped the archive worker. The first one is
    /// kept.
    pub(crate) fn set_archive_failure(&self, index: SegmentIndex, e: &io::Error) {
        let mut inner = self.lock();
        if inner.archive_failure.is_none() {
            inner.archive_failure = Some(format!("failed to archive {}: {}", index, e));
        }
    }

    /// Why archiving stopped, if it did.
    pub fn archive_failure(&self) -> Option<String> {
        self.lock().archive_failure.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::Arc;

    use pretty_assertions::assert_eq;

    use super::SegmentStore;
    use crate::segment::SealedSegment;
    use crate::tests::context::TestContext;
    use crate::SegmentIndex;

    fn seal(
        ctx: &TestContext,
        index: u64,
        size: usize,
    ) -> Result<SealedSegment, io::Error> {
        let index = SegmentIndex(index);
        let path = ctx.config.work_segment_path(index);
        std::fs::write(&path, vec![1u8; size])?;
        Ok(SealedSegment {
            index,
            path,
            size: size as u64,
        })
    }

    #[test]
    fn test_archive_in_order() -> Result<(), io::Error> {
        let ctx = TestContext::new()?;
        let store = SegmentStore::open(Arc::new(ctx.config.clone()))?;

        store.archive(seal(&ctx, 0, 10)?)?;
        store.archive(seal(&ctx, 1, 20)?)?;

        assert_eq!(store.total_archive_size(), 30);
        assert_eq!(store.last_truncated_segment(), None);
        assert_eq!(
            store
                .list_archived()
                .iter()
                .map(|d| d.file_name())
                .collect::<Vec<_>>(),
            vec!["0000000000000000.wal", "0000000000000001.wal"]
        );

        let res = store.archive(seal(&ctx, 3, 10)?);
        assert_eq!(res.unwrap_err().kind(), io::ErrorKind::InvalidInput);
        Ok(())
    }

    #[test]
    fn test_delete_upto() -> Result<(), io::Error> {
        let ctx = TestContext::new()?;
        let store = SegmentStore::open(Arc::new(ctx.config.clone()))?;

        for i in 0..5 {
            store.archive(seal(&ctx, i, 100)?)?;
        }

        let report = store.delete_upto(SegmentIndex(2))?;
        assert_eq!(report.removed, vec![
            SegmentIndex(0),
            SegmentIndex(1),
            SegmentIndex(2)
        ]);
        assert_eq!(report.reclaimed_bytes, 300);
        assert_eq!(store.total_archive_size(), 200);
        assert_eq!(store.last_truncated_segment(), Some(SegmentIndex(2)));
        assert_eq!(store.first_archived(), Some(SegmentIndex(3)));
        assert_eq!(store.retained_size_from(SegmentIndex(4)), 100);

        assert!(!std::path::Path::new(
            &ctx.config.archive_segment_path(SegmentIndex(1))
        )
        .exists());

        // Idempotent
        let report = store.delete_upto(SegmentIndex(2))?;
        assert!(report.removed.is_empty());
        assert_eq!(store.last_truncated_segment(), Some(SegmentIndex(2)));
        Ok(())
    }

    #[test]
    fn test_reopen_and_recycle() -> Result<(), io::Error> {
        let mut ctx = TestContext::new()?;
        ctx.config.wal_segment_reuse_count = Some(1);
        let config = Arc::new(ctx.config.clone());

        {
            let store = SegmentStore::open(config.clone())?;
            for i in 0..4 {
                store.archive(seal(&ctx, i, 10)?)?;
            }
            let report = store.delete_upto(SegmentIndex(1))?;
            assert_eq!(report.recycled, 1);
            assert_eq!(store.list_reusable().len(), 1);
        }

        let store = SegmentStore::open(config.clone())?;
        assert_eq!(store.first_archived(), Some(SegmentIndex(2)));
        assert_eq!(store.last_archived(), Some(SegmentIndex(3)));
        assert_eq!(store.last_truncated_segment(), Some(SegmentIndex(1)));
        assert_eq!(store.total_archive_size(), 20);
        assert_eq!(store.list_reusable().len(), 1);

        let target = config.work_segment_path(SegmentIndex(4));
        assert!(store.take_reusable(&target)?);
        assert!(std::path::Path::new(&target).exists());
        assert!(!store.take_reusable(&target)?);

        // The next archived index must follow the last one on disk.
        let res = store.archive(seal(&ctx, 5, 10)?);
        assert!(res.is_err());
        store.archive(seal(&ctx, 4, 10)?)?;
        Ok(())
    }
}
