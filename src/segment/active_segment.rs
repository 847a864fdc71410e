use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::io::Write;

use codeq::error_context_ext::ErrorContextExt;
use codeq::Encode;
use log::debug;

use crate::segment::store::SegmentStore;
use crate::segment::SealedSegment;
use crate::Config;
use crate::SegmentIndex;
use crate::WalMode;
use crate::WalPointer;
use crate::WalRecord;

/// The segment currently being appended to.
///
/// Appended records are encoded into `pending_data` first; whether they are
/// written to the file right away depends on the [`WalMode`].
#[derive(Debug)]
pub(crate) struct ActiveSegment {
    index: SegmentIndex,
    path: String,
    f: File,

    /// Size including data not yet written to the file.
    size: u64,

    pending_data: Vec<u8>,

    /// Written to the file but not yet fsync-ed.
    unsynced: bool,
}

impl ActiveSegment {
    /// Create the segment file in the work directory and write its header.
    ///
    /// A recycled file from the reuse pool is used if one is available.
    pub(crate) fn create(
        config: &Config,
        store: &SegmentStore,
        index: SegmentIndex,
    ) -> Result<Self, io::Error> {
        let path = config.work_segment_path(index);

        let reused = store.take_reusable(&path)?;

        let f = OpenOptions::new()
            .write(true)
            .read(true)
            .create_new(!reused)
            .truncate(reused)
            .open(&path)
            .context(|| format!("create {}", index))?;

        debug!("Created active {}, reused file: {}", index, reused);

        let mut active = Self {
            index,
            path,
            f,
            size: 0,
            pending_data: Vec::new(),
            unsynced: false,
        };

        active.append_record(
            &WalRecord::SegmentHeader { index: *index },
            WalMode::Background,
        )?;
        active.flush(config.wal_mode().fsync_enabled())?;

        Ok(active)
    }

    pub(crate) fn index(&self) -> SegmentIndex {
        self.index
    }

    pub(crate) fn path(&self) -> &str {
        &self.path
    }

    /// Size of all appended records, written or not.
    pub(crate) fn size(&self) -> u64 {
        self.size
    }

    /// Pointer to the position where the next record goes.
    pub(crate) fn end_pointer(&self) -> WalPointer {
        WalPointer::new(self.index, self.size)
    }

    /// Append one record and return the pointer to its first byte.
    pub(crate) fn append_record(
        &mut self,
        rec: &WalRecord,
        mode: WalMode,
    ) -> Result<WalPointer, io::Error> {
        let pointer = self.end_pointer();

        let n = rec.encode(&mut self.pending_data)?;
        self.size += n as u64;

        if mode.write_through() {
            self.write_pending()?;
        }
        if mode == WalMode::Fsync {
            self.sync()?;
        }

        Ok(pointer)
    }

    /// Write buffered records to the file, and fsync if `sync` is true.
    pub(crate) fn flush(&mut self, sync: bool) -> Result<(), io::Error> {
        self.write_pending()?;
        if sync {
            self.sync()?;
        }
        Ok(())
    }

    /// Make the segment durable and close it for writing.
    pub(crate) fn seal(mut self, mode: WalMode) -> Result<SealedSegment, io::Error> {
        self.flush(mode.fsync_enabled())
            .context(|| format!("seal {}", self.index))?;

        Ok(SealedSegment {
            index: self.index,
            path: self.path,
            size: self.size,
        })
    }

    fn write_pending(&mut self) -> Result<(), io::Error> {
        if self.pending_data.is_empty() {
            return Ok(());
        }

        self.f
            .write_all(&self.pending_data)
            .context(|| format!("write to {}", self.index))?;
        self.pending_data.clear();
        self.unsynced = true;
        Ok(())
    }

    fn sync(&mut self) -> Result<(), io::Error> {
        if !self.unsynced {
            return Ok(());
        }

        self.f
            .sync_data()
            .context(|| format!("sync {}", self.index))?;
        self.unsynced = false;
        Ok(())
    }
}
