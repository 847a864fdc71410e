use std::fs::File;
use std::io;
use std::io::BufReader;
use std::io::Seek;

use codeq::error_context_ext::ErrorContextExt;
use codeq::Decode;

use crate::Config;
use crate::SegmentIndex;
use crate::WalPointer;
use crate::WalRecord;

/// Counts the bytes read through it.
pub(crate) struct OffsetReader<R> {
    inner: R,
    offset: u64,
}

impl<R: io::Read> OffsetReader<R> {
    pub(crate) fn new(inner: R, offset: u64) -> Self {
        Self { inner, offset }
    }

    pub(crate) fn offset(&self) -> u64 {
        self.offset
    }
}

impl<R: io::Read> io::Read for OffsetReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.offset += n as u64;
        Ok(n)
    }
}

/// Iterates the records of one segment file, yielding each with its
/// [`WalPointer`].
///
/// The file size is captured when the iterator is created; bytes appended
/// afterwards are not visited. The iteration stops at the first error.
pub(crate) struct RecordIterator<R> {
    r: OffsetReader<R>,
    total_size: u64,
    index: SegmentIndex,
    error: Option<io::Error>,
}

impl<'a> RecordIterator<BufReader<&'a File>> {
    /// Iterate records of `f` from the start of the file.
    pub(crate) fn open(
        config: &Config,
        f: &'a File,
        index: SegmentIndex,
    ) -> Result<Self, io::Error> {
        Self::open_at(config, f, index, 0)
    }

    /// Iterate records of `f` starting at `offset`, which must be a record
    /// boundary.
    pub(crate) fn open_at(
        config: &Config,
        mut f: &'a File,
        index: SegmentIndex,
        offset: u64,
    ) -> Result<Self, io::Error> {
        let size = f.metadata()?.len();
        let offset = offset.min(size);

        f.seek(io::SeekFrom::Start(offset))
            .context(|| format!("seek to {} in {}", offset, index))?;

        let br = BufReader::with_capacity(config.read_buffer_size(), f);
        Ok(Self::new(br, offset, size, index))
    }
}

impl<R> RecordIterator<R>
where R: io::Read
{
    pub(crate) fn new(
        r: R,
        offset: u64,
        size: u64,
        index: SegmentIndex,
    ) -> Self {
        Self {
            r: OffsetReader::new(r, offset),
            total_size: size,
            index,
            error: None,
        }
    }
}

impl<R> Iterator for RecordIterator<R>
where R: io::Read
{
    type Item = Result<(WalPointer, WalRecord), io::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.error.is_some() {
            return None;
        }

        let start = self.r.offset();
        if start >= self.total_size {
            return None;
        }

        let res = WalRecord::decode(&mut self.r)
            .map(|rec| (WalPointer::new(self.index, start), rec))
            .context(|| format!("decode record at offset {}", start))
            .context(|| format!("iterate {}", self.index));

        if let Err(ref e) = res {
            self.error = Some(io::Error::new(e.kind(), e.to_string()));
        }

        Some(res)
    }
}
