use std::fmt;
use std::io;
use std::io::Read;

use byteorder::BigEndian;
use byteorder::ByteOrder;
use byteorder::ReadBytesExt;
use byteorder::WriteBytesExt;

use crate::CheckpointReason;
use crate::WalPointer;

/// A completed checkpoint.
///
/// `floor` is the lowest WAL position that must be replayed to recover from
/// this checkpoint: every segment with an index below `floor.index` is not
/// needed by it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointEntry {
    /// Checkpoint id, strictly increasing.
    pub id: u64,

    /// Start time, in milliseconds since the Unix epoch.
    pub timestamp: u64,

    pub floor: WalPointer,

    pub reason: String,
}

impl CheckpointEntry {
    pub fn new(id: u64, timestamp: u64, floor: WalPointer, reason: impl ToString) -> Self {
        Self {
            id,
            timestamp,
            floor,
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for CheckpointEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Checkpoint(id: {}, ts: {}, floor: {}, reason: {})",
            self.id, self.timestamp, self.floor, self.reason
        )
    }
}

/// Encoded as:
/// - 8 bytes: id
/// - 8 bytes: timestamp
/// - 8 bytes: floor segment index
/// - 8 bytes: floor offset
/// - 4 bytes: reason length, followed by the reason in UTF-8
/// - 4 bytes: crc32 of all the bytes above
impl codeq::Encode for CheckpointEntry {
    fn encode<W: io::Write>(&self, mut w: W) -> Result<usize, io::Error> {
        if self.reason.len() > CheckpointReason::MAX_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "Checkpoint reason too large: {}, max: {}",
                    self.reason.len(),
                    CheckpointReason::MAX_SIZE
                ),
            ));
        }

        let mut buf = Vec::with_capacity(40 + self.reason.len() + 4);

        buf.write_u64::<BigEndian>(self.id)?;
        buf.write_u64::<BigEndian>(self.timestamp)?;
        buf.write_u64::<BigEndian>(*self.floor.index)?;
        buf.write_u64::<BigEndian>(self.floor.offset)?;
        buf.write_u32::<BigEndian>(self.reason.len() as u32)?;
        buf.extend_from_slice(self.reason.as_bytes());

        let crc = crc32fast::hash(&buf);
        buf.write_u32::<BigEndian>(crc)?;

        w.write_all(&buf)?;
        Ok(buf.len())
    }
}

impl codeq::Decode for CheckpointEntry {
    fn decode<R: io::Read>(mut r: R) -> Result<Self, io::Error> {
        let mut header = [0u8; 36];
        r.read_exact(&mut header)?;

        let reason_len = BigEndian::read_u32(&header[32..36]);
        if reason_len as usize > CheckpointReason::MAX_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Checkpoint reason too large: {}", reason_len),
            ));
        }

        let mut reason = Vec::with_capacity(reason_len as usize);
        (&mut r).take(reason_len as u64).read_to_end(&mut reason)?;
        if reason.len() != reason_len as usize {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "Checkpoint reason incomplete",
            ));
        }

        let checksum = r.read_u32::<BigEndian>()?;

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&header);
        hasher.update(&reason);
        let actual = hasher.finalize();

        if actual != checksum {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Checkpoint checksum mismatch: expected {:#010x}, actual {:#010x}",
                    checksum, actual
                ),
            ));
        }

        let reason = String::from_utf8(reason)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        Ok(Self {
            id: BigEndian::read_u64(&header[0..8]),
            timestamp: BigEndian::read_u64(&header[8..16]),
            floor: WalPointer::new(
                BigEndian::read_u64(&header[16..24]),
                BigEndian::read_u64(&header[24..32]),
            ),
            reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use codeq::Decode;
    use codeq::Encode;

    use super::CheckpointEntry;
    use crate::WalPointer;

    #[test]
    fn test_entry_codec() -> Result<(), io::Error> {
        let e = CheckpointEntry::new(3, 1_000, WalPointer::new(2, 77), "timeout");

        let mut b = Vec::new();
        let n = e.encode(&mut b)?;
        assert_eq!(n, b.len());
        assert_eq!(n, 36 + 7 + 4);

        let got = CheckpointEntry::decode(&mut b.as_slice())?;
        assert_eq!(e, got);

        b[20] ^= 1;
        let err = CheckpointEntry::decode(&mut b.as_slice()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        Ok(())
    }

    #[test]
    fn test_entry_reason_too_large() -> Result<(), io::Error> {
        let floor = WalPointer::new(2, 77);

        let e = CheckpointEntry::new(3, 1_000, floor, "r".repeat(64 * 1024));
        let mut b = Vec::new();
        e.encode(&mut b)?;
        assert_eq!(e, CheckpointEntry::decode(&mut b.as_slice())?);

        let e = CheckpointEntry::new(3, 1_000, floor, "r".repeat(64 * 1024 + 1));
        let mut b = Vec::new();
        let err = e.encode(&mut b).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert!(b.is_empty(), "nothing is written");

        Ok(())
    }

    #[test]
    fn test_entry_display() {
        let e = CheckpointEntry::new(3, 1_000, WalPointer::new(2, 77), "x");
        assert_eq!(
            e.to_string(),
            "Checkpoint(id: 3, ts: 1000, floor: WalPointer(0000000000000002:000_000_077), reason: x)"
        );
    }
}
