use std::io;

use crate::num::format_pad9_u64;
use crate::WalPointer;
use crate::WalRecord;

/// Write one record per line, with a segment heading before the first
/// record of each segment.
pub fn multiline_string<W: io::Write>(
    w: &mut W,
    record_index: u64,
    res: Result<(WalPointer, WalRecord), io::Error>,
) -> Result<(), io::Error> {
    match res {
        Ok((pointer, rec)) => {
            if pointer.offset == 0 {
                writeln!(w, "{}", pointer.index)?;
            }
            writeln!(
                w,
                "  R-{record_index:05}: [{}, {}) {}: {:?}",
                format_pad9_u64(pointer.offset),
                format_pad9_u64(pointer.offset + rec.encoded_size()),
                rec.encoded_size(),
                rec
            )?;
        }
        Err(io_err) => {
            writeln!(w, "Error: {}", io_err)?;
        }
    }
    Ok(())
}
