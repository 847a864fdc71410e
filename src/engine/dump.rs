use std::fs::File;
use std::io;
use std::sync::Arc;

use crate::dump_writer;
use crate::segment::list_segment_files;
use crate::segment::record_iterator::RecordIterator;
use crate::Config;
use crate::SegmentIndex;
use crate::WalPointer;
use crate::WalRecord;

/// Writes every record of every segment on disk, archived ones first, in a
/// human readable form.
///
/// It only reads files and does not lock the directory, so it can inspect
/// the WAL of a running engine.
pub struct Dump {
    config: Arc<Config>,
}

impl Dump {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    pub fn write_to_string(&self) -> Result<String, io::Error> {
        let mut buf = Vec::new();
        self.write(&mut buf)?;
        String::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }

    pub fn write<W: io::Write>(&self, mut w: W) -> Result<(), io::Error> {
        writeln!(&mut w, "WAL:")?;
        self.write_with(w, dump_writer::multiline_string)
    }

    /// Writes records with a custom function.
    ///
    /// `write_record` receives the output, the index of the record in its
    /// segment, and the record or the error that stopped reading the segment.
    pub fn write_with<W: io::Write, D>(
        &self,
        mut w: W,
        write_record: D,
    ) -> Result<(), io::Error>
    where
        D: Fn(
            &mut W,
            u64,
            Result<(WalPointer, WalRecord), io::Error>,
        ) -> Result<(), io::Error>,
    {
        let config = self.config.as_ref();

        let dirs = [
            (config.archive_dir(), false),
            (config.work_dir(), true),
        ];

        for (dir, is_work) in dirs {
            if !std::path::Path::new(&dir).exists() {
                continue;
            }

            for index in list_segment_files(&dir)? {
                let path = if is_work {
                    config.work_segment_path(index)
                } else {
                    config.archive_segment_path(index)
                };
                Self::write_segment(config, &path, index, &mut w, &write_record)?;
            }
        }
        Ok(())
    }

    fn write_segment<W, D>(
        config: &Config,
        path: &str,
        index: SegmentIndex,
        w: &mut W,
        write_record: &D,
    ) -> Result<(), io::Error>
    where
        D: Fn(
            &mut W,
            u64,
            Result<(WalPointer, WalRecord), io::Error>,
        ) -> Result<(), io::Error>,
    {
        let f = File::open(path)?;
        let it = RecordIterator::open(config, &f, index)?;
        for (i, res) in it.enumerate() {
            write_record(w, i as u64, res)?;
        }
        Ok(())
    }
}
