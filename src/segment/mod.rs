//! WAL segment files.
//!
//! A segment is a fixed-size piece of the Write-Ahead Log. Segments are used
//! to:
//! - Bound the size of a single file
//! - Move sealed parts of the log into the archive without touching the one
//!   being written
//! - Reclaim space by deleting whole files once no checkpoint needs them
//!
//! The active segment lives in the work directory. When it is full it is
//! sealed, and the archiver moves it into the archive directory, keeping its
//! file name, which encodes the segment index.

pub(crate) mod active_segment;
pub(crate) mod archiver;
pub(crate) mod record_iterator;
pub(crate) mod segment_index;
pub(crate) mod store;

use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::io::BufReader;
use std::io::Read;
use std::io::Seek;

use codeq::error_context_ext::ErrorContextExt;
use log::error;
use log::warn;

use crate::segment::record_iterator::RecordIterator;
use crate::Config;
use crate::SegmentIndex;

/// Lifecycle state of a segment file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentStatus {
    /// Being written by the WAL writer. Exactly one segment is active.
    Active,

    /// Sealed and moved into the archive; read only.
    Archived,

    /// A deleted segment's file kept in the work directory for recycling.
    ReservedForReuse,

    /// Removed from disk.
    Deleted,
}

/// Describes one segment file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentDescriptor {
    pub index: SegmentIndex,
    pub path: String,
    pub size: u64,
    pub status: SegmentStatus,
}

impl SegmentDescriptor {
    /// Returns the file name, e.g. `0000000000000001.wal`.
    pub fn file_name(&self) -> String {
        Config::segment_file_name(self.index)
    }
}

/// A segment that is completely written and fsync-ed but not yet archived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SealedSegment {
    pub(crate) index: SegmentIndex,
    /// Path in the work directory
    pub(crate) path: String,
    pub(crate) size: u64,
}

/// List segment indexes of the `*.wal` files in `dir`, sorted.
///
/// Files with other names are ignored with a warning.
pub(crate) fn list_segment_files(
    dir: &str,
) -> Result<Vec<SegmentIndex>, io::Error> {
    let entries = std::fs::read_dir(dir).context(|| format!("list {}", dir))?;
    let mut indexes = vec![];

    for entry in entries {
        let entry = entry?;
        let file_name = entry.file_name();
        let fn_str = file_name.to_string_lossy();

        if !fn_str.ends_with(".wal") {
            continue;
        }

        match Config::parse_segment_file_name(&fn_str) {
            Ok(index) => indexes.push(SegmentIndex(index)),
            Err(err) => {
                warn!("Ignore invalid WAL file name: '{}': {}", fn_str, err);
            }
        }
    }

    indexes.sort();
    Ok(indexes)
}

/// Verifies that a sorted list of segment indexes has no gap.
///
/// A gap would indicate data loss or corruption.
pub(crate) fn ensure_consecutive(
    indexes: &[SegmentIndex],
) -> Result<(), io::Error> {
    for w in indexes.windows(2) {
        if w[0].next() != w[1] {
            let message = format!(
                "Gap between WAL segments: {} -> {}; Can not open, \
                    fix this error and re-open",
                w[0], w[1],
            );
            return Err(io::Error::new(io::ErrorKind::InvalidData, message));
        }
    }
    Ok(())
}

/// Scan a segment file left in the work directory by a previous run and
/// return its valid length.
///
/// An incomplete last record, or a tail of zero bytes, is treated as an
/// unfinished write and truncated if `truncate_incomplete_record` is
/// enabled. Any other damage is an error.
pub(crate) fn recover_segment_file(
    config: &Config,
    path: &str,
    index: SegmentIndex,
) -> Result<u64, io::Error> {
    let f = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .context(|| format!("open {} to recover", index))?;

    let file_size = f.metadata()?.len();
    let it = RecordIterator::open(config, &f, index)?;

    let mut valid_end = 0;
    let mut truncate = false;

    for res in it {
        match res {
            Ok((pointer, record)) => {
                valid_end = pointer.offset + record.encoded_size();
            }
            Err(io_err) => {
                if io_err.kind() == io::ErrorKind::UnexpectedEof {
                    // Incomplete record, discard it.
                    truncate = config.truncate_incomplete_record();
                } else {
                    // Maybe damaged or unfinished write with trailing zeros.
                    //
                    // Trailing zeros can happen if EXT4 is mounted with
                    // `data=writeback` mode, with which, data and
                    // metadata(file len) will be written to disk in arbitrary
                    // order.
                    let all_zero = verify_trailing_zeros(&f, valid_end, index)?;

                    if all_zero {
                        warn!(
                            "Trailing zeros detected at {} in {}; Treat it as unfinished write",
                            valid_end, index
                        );
                        truncate = config.truncate_incomplete_record();
                    } else {
                        error!("Found damaged bytes in {}: {}", index, io_err);
                    }
                }

                if !truncate {
                    return Err(io_err);
                }
                break;
            }
        }
    }

    if truncate {
        warn!(
            "Truncate {} from {} to {} bytes",
            index, file_size, valid_end
        );
        f.set_len(valid_end)?;
        f.sync_all()?;
    }

    Ok(valid_end)
}

/// Checks if a file contains only zero bytes from a specified offset to the
/// end.
fn verify_trailing_zeros(
    file: &File,
    mut start_offset: u64,
    index: SegmentIndex,
) -> Result<bool, io::Error> {
    let file_size = file.metadata()?.len();

    if start_offset > file_size {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "Start offset {} exceeds file size {}",
                start_offset, file_size
            ),
        ));
    }

    if file_size == start_offset {
        return Ok(true);
    }

    let mut f = file;
    f.seek(io::SeekFrom::Start(start_offset))?;

    const READ_CHUNK_SIZE: usize = 16 * 1024;
    let mut reader = BufReader::with_capacity(READ_CHUNK_SIZE * 16, f);
    let mut buffer = vec![0; READ_CHUNK_SIZE];

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }

        if let Some(i) = buffer[..n].iter().position(|b| *b != 0) {
            error!(
                "Non-zero byte detected at offset {} in {}",
                start_offset + i as u64,
                index
            );
            return Ok(false);
        }

        start_offset += n as u64;
    }
    Ok(true)
}
