use std::fs::File;
use std::io;
use std::sync::Arc;

use codeq::error_context_ext::ErrorContextExt;

use crate::segment::record_iterator::RecordIterator;
use crate::Config;
use crate::SegmentIndex;
use crate::WalPointer;
use crate::WalRecord;

/// Reads WAL records from a pointer onward, through the archived segments
/// and then the active one.
///
/// The list of segments is fixed when the reader is created. A segment that
/// is archived while the reader runs is still found: its archive path is
/// tried when the work directory path is gone.
pub struct WalReader {
    config: Arc<Config>,

    /// Segments to read, ascending.
    segments: Vec<SegmentIndex>,

    from: WalPointer,
}

impl WalReader {
    /// Create a reader starting at `from`.
    ///
    /// Returns a `NotFound` error if the segment `from` points into has been
    /// deleted from the archive.
    pub(crate) fn new(
        config: Arc<Config>,
        segments: Vec<SegmentIndex>,
        from: WalPointer,
    ) -> Result<Self, io::Error> {
        let first = segments.first().copied();

        match first {
            Some(first) if first <= from.index => {}
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!(
                        "WAL {} is not available; first segment: {:?}",
                        from, first
                    ),
                ));
            }
        }

        let segments = segments.into_iter().filter(|i| *i >= from.index).collect();

        Ok(Self {
            config,
            segments,
            from,
        })
    }

    fn open_segment(&self, index: SegmentIndex) -> Result<File, io::Error> {
        let work = self.config.work_segment_path(index);
        match File::open(&work) {
            Ok(f) => Ok(f),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let archived = self.config.archive_segment_path(index);
                File::open(&archived).context(|| format!("open {}", index))
            }
            Err(e) => Err(e).context(|| format!("open {}", index)),
        }
    }

    /// Visit every record from the start pointer on, in WAL order.
    ///
    /// Stops at the first error, which is passed to `f` as well.
    pub fn for_each<F>(&self, mut f: F) -> Result<(), io::Error>
    where F: FnMut(WalPointer, WalRecord) -> Result<(), io::Error> {
        for index in self.segments.iter().copied() {
            let offset = if index == self.from.index {
                self.from.offset
            } else {
                0
            };

            let file = self.open_segment(index)?;
            let it = RecordIterator::open_at(&self.config, &file, index, offset)?;

            for res in it {
                let (pointer, rec) = res?;
                f(pointer, rec)?;
            }
        }
        Ok(())
    }

    /// Collect every record from the start pointer on.
    pub fn read_all(&self) -> Result<Vec<(WalPointer, WalRecord)>, io::Error> {
        let mut out = vec![];
        self.for_each(|p, rec| {
            out.push((p, rec));
            Ok(())
        })?;
        Ok(out)
    }

    /// The segments this reader visits.
    pub fn segments(&self) -> &[SegmentIndex] {
        &self.segments
    }
}
