use std::fmt;
use std::io;
use std::io::Read;
use std::io::Write;

use byteorder::BigEndian;
use byteorder::ByteOrder;
use byteorder::ReadBytesExt;
use byteorder::WriteBytesExt;

/// Upper bound of a record payload; anything larger is treated as damaged
/// data rather than allocated.
pub(crate) const MAX_PAYLOAD_SIZE: u32 = 1024 * 1024 * 1024;

/// Size of `type` and `payload length` in front of the payload.
const HEADER_SIZE: usize = 8;

/// Size of the trailing checksum.
const CHECKSUM_SIZE: usize = 4;

/// WalRecord represents the records that can be written to the
/// Write-Ahead Log (WAL).
#[derive(Clone, PartialEq, Eq)]
pub enum WalRecord {
    /// The first record of every segment, carrying the segment's own index.
    SegmentHeader { index: u64 },

    /// A key-value mutation.
    Data { key: Vec<u8>, value: Vec<u8> },

    /// A full image of a page, logged the first time the page is dirtied
    /// after a checkpoint.
    PageSnapshot { page_id: u64, image: Vec<u8> },

    /// Marks the WAL position where checkpoint `id` starts.
    CheckpointBegin { id: u64 },
}

impl WalRecord {
    /// Returns the numeric type identifier for this record
    /// Used during encoding and decoding.
    pub(crate) fn record_type(&self) -> u32 {
        match self {
            WalRecord::SegmentHeader { .. } => 0,
            WalRecord::Data { .. } => 1,
            WalRecord::PageSnapshot { .. } => 2,
            WalRecord::CheckpointBegin { .. } => 3,
        }
    }

    /// Build a data record.
    pub fn data(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        WalRecord::Data {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Returns the number of bytes this record occupies once encoded.
    pub fn encoded_size(&self) -> u64 {
        (HEADER_SIZE + self.payload_size() + CHECKSUM_SIZE) as u64
    }

    fn payload_size(&self) -> usize {
        match self {
            WalRecord::SegmentHeader { .. } => 8,
            WalRecord::Data { key, value } => 4 + key.len() + 4 + value.len(),
            WalRecord::PageSnapshot { image, .. } => 8 + 4 + image.len(),
            WalRecord::CheckpointBegin { .. } => 8,
        }
    }

    fn encode_payload(&self, buf: &mut Vec<u8>) -> Result<(), io::Error> {
        match self {
            WalRecord::SegmentHeader { index } => {
                buf.write_u64::<BigEndian>(*index)?;
            }
            WalRecord::Data { key, value } => {
                write_bytes(buf, key)?;
                write_bytes(buf, value)?;
            }
            WalRecord::PageSnapshot { page_id, image } => {
                buf.write_u64::<BigEndian>(*page_id)?;
                write_bytes(buf, image)?;
            }
            WalRecord::CheckpointBegin { id } => {
                buf.write_u64::<BigEndian>(*id)?;
            }
        }
        Ok(())
    }

    fn decode_payload(
        record_type: u32,
        mut payload: &[u8],
    ) -> Result<Self, io::Error> {
        let r = &mut payload;

        let rec = match record_type {
            0 => WalRecord::SegmentHeader {
                index: r.read_u64::<BigEndian>()?,
            },
            1 => WalRecord::Data {
                key: read_bytes(r)?,
                value: read_bytes(r)?,
            },
            2 => WalRecord::PageSnapshot {
                page_id: r.read_u64::<BigEndian>()?,
                image: read_bytes(r)?,
            },
            3 => WalRecord::CheckpointBegin {
                id: r.read_u64::<BigEndian>()?,
            },
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("Unknown record type: {}", record_type),
                ));
            }
        };

        if !r.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "{} trailing bytes in record payload of type {}",
                    r.len(),
                    record_type
                ),
            ));
        }

        Ok(rec)
    }
}

fn write_bytes(buf: &mut Vec<u8>, b: &[u8]) -> Result<(), io::Error> {
    buf.write_u32::<BigEndian>(b.len() as u32)?;
    buf.write_all(b)
}

fn read_bytes(r: &mut &[u8]) -> Result<Vec<u8>, io::Error> {
    let len = r.read_u32::<BigEndian>()? as usize;
    if len > r.len() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("byte string length {} exceeds payload {}", len, r.len()),
        ));
    }
    let (head, tail) = r.split_at(len);
    let v = head.to_vec();
    *r = tail;
    Ok(v)
}

impl fmt::Debug for WalRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WalRecord::SegmentHeader { index } => {
                write!(f, "SegmentHeader({})", index)
            }
            WalRecord::Data { key, value } => write!(
                f,
                "Data({}, {})",
                String::from_utf8_lossy(key),
                String::from_utf8_lossy(value)
            ),
            WalRecord::PageSnapshot { page_id, image } => {
                write!(f, "PageSnapshot({}, {} bytes)", page_id, image.len())
            }
            WalRecord::CheckpointBegin { id } => {
                write!(f, "CheckpointBegin({})", id)
            }
        }
    }
}

/// Each record is encoded as:
/// - 4 bytes: record type
/// - 4 bytes: payload length
/// - variable bytes: record payload
/// - 4 bytes: crc32 of all the bytes above
impl codeq::Encode for WalRecord {
    fn encode<W: io::Write>(&self, mut w: W) -> Result<usize, io::Error> {
        let mut buf = Vec::with_capacity(self.encoded_size() as usize);

        buf.write_u32::<BigEndian>(self.record_type())?;
        buf.write_u32::<BigEndian>(self.payload_size() as u32)?;
        self.encode_payload(&mut buf)?;

        let crc = crc32fast::hash(&buf);
        buf.write_u32::<BigEndian>(crc)?;

        w.write_all(&buf)?;
        Ok(buf.len())
    }
}

/// Reads the header, payload and checksum, and verifies the checksum before
/// parsing the payload.
impl codeq::Decode for WalRecord {
    fn decode<R: io::Read>(mut r: R) -> Result<Self, io::Error> {
        let mut header = [0u8; HEADER_SIZE];
        r.read_exact(&mut header)?;

        let record_type = BigEndian::read_u32(&header[0..4]);
        let payload_size = BigEndian::read_u32(&header[4..8]);

        if payload_size > MAX_PAYLOAD_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Record payload size too large: {}", payload_size),
            ));
        }

        let mut payload = Vec::with_capacity(payload_size as usize);
        (&mut r).take(payload_size as u64).read_to_end(&mut payload)?;
        if payload.len() != payload_size as usize {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "Record payload incomplete: {} of {} bytes",
                    payload.len(),
                    payload_size
                ),
            ));
        }

        let checksum = r.read_u32::<BigEndian>()?;

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&header);
        hasher.update(&payload);
        let actual = hasher.finalize();

        if actual != checksum {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Record checksum mismatch: expected {:#010x}, actual {:#010x}",
                    checksum, actual
                ),
            ));
        }

        Self::decode_payload(record_type, &payload)
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use codeq::Decode;
    use codeq::Encode;

    use crate::testing::test_codec_without_corruption;
    use crate::WalRecord;

    #[test]
    fn test_record_codec_segment_header() -> Result<(), io::Error> {
        let rec = WalRecord::SegmentHeader { index: 1 };

        let b = vec![
            0, 0, 0, 0, // typ
            0, 0, 0, 8, // payload len
            0, 0, 0, 0, 0, 0, 0, 1, // index
            32, 100, 217, 219, // checksum
        ];

        test_codec_without_corruption(&b, &rec)
    }

    #[test]
    fn test_record_codec_data() -> Result<(), io::Error> {
        let rec = WalRecord::data("foo", "bar");

        let b = vec![
            0, 0, 0, 1, // typ
            0, 0, 0, 14, // payload len
            0, 0, 0, 3, // key.len
            102, 111, 111, // key
            0, 0, 0, 3, // value.len
            98, 97, 114, // value
            198, 185, 61, 207, // checksum
        ];

        test_codec_without_corruption(&b, &rec)
    }

    #[test]
    fn test_record_codec_checkpoint_begin() -> Result<(), io::Error> {
        let rec = WalRecord::CheckpointBegin { id: 7 };

        let b = vec![
            0, 0, 0, 3, // typ
            0, 0, 0, 8, // payload len
            0, 0, 0, 0, 0, 0, 0, 7, // id
            116, 205, 16, 32, // checksum
        ];

        test_codec_without_corruption(&b, &rec)
    }

    #[test]
    fn test_encoded_size() -> Result<(), io::Error> {
        let recs = [
            WalRecord::SegmentHeader { index: 3 },
            WalRecord::data("k", vec![0u8; 100]),
            WalRecord::PageSnapshot {
                page_id: 9,
                image: vec![1u8; 4096],
            },
            WalRecord::CheckpointBegin { id: 1 },
        ];

        for rec in recs {
            let mut b = Vec::new();
            let n = rec.encode(&mut b)?;
            assert_eq!(rec.encoded_size(), n as u64, "{:?}", rec);
        }
        Ok(())
    }

    #[test]
    fn test_decode_damaged() -> Result<(), io::Error> {
        let mut b = Vec::new();
        WalRecord::data("foo", "bar").encode(&mut b)?;

        // Flip one payload byte.
        let mut damaged = b.clone();
        damaged[10] ^= 0xff;
        let err = WalRecord::decode(&mut damaged.as_slice()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        // Cut the record short.
        let short = &b[..b.len() - 2];
        let err = WalRecord::decode(&mut &short[..]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);

        // All zero bytes are not a valid record.
        let zeros = vec![0u8; 32];
        let err = WalRecord::decode(&mut zeros.as_slice()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        Ok(())
    }
}
