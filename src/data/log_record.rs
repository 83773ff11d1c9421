//! Log record format implementation.
//!
//! Each record consists of:
//! - Checksum (4 bytes): CRC32 of everything that follows
//! - Type (1 byte): Normal, Deleted or TxFinished
//! - Key length (varint, at most 5 bytes)
//! - Value length (varint, at most 5 bytes)
//! - Key (variable)
//! - Value (variable)

use crate::error::{Error, Result};
use bytes::{BufMut, BytesMut};
use crc32fast::Hasher;

/// Size of the checksum field at the start of every record.
pub const CRC_SIZE: usize = 4;

/// Longest varint encoding of a 32-bit length.
const MAX_VARINT_LEN32: usize = 5;

/// Longest varint encoding of a 64-bit integer.
pub const MAX_VARINT_LEN64: usize = 10;

/// Upper bound of an encoded header (crc + type + key length + value length).
pub const MAX_HEADER_SIZE: usize = CRC_SIZE + 1 + MAX_VARINT_LEN32 * 2;

/// Record types stored in the type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LogRecordType {
    /// A live key/value pair.
    Normal = 0,
    /// A tombstone for the key.
    Deleted = 1,
    /// Marks the end of a write batch.
    TxFinished = 2,
}

impl LogRecordType {
    /// Convert from u8 to LogRecordType
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(LogRecordType::Normal),
            1 => Ok(LogRecordType::Deleted),
            2 => Ok(LogRecordType::TxFinished),
            _ => Err(Error::corruption(format!("invalid log record type: {}", value))),
        }
    }
}

/// A record appended to a data file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Stored key, including the sequence number prefix for data files.
    pub key: Vec<u8>,
    /// Value payload, empty for tombstones and batch markers.
    pub value: Vec<u8>,
    /// Type of the record
    pub rec_type: LogRecordType,
}

/// Decoded fixed part of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogRecordHeader {
    pub(crate) crc: u32,
    pub(crate) rec_type: u8,
    pub(crate) key_size: u32,
    pub(crate) value_size: u32,
}

/// Location of one encoded record on disk. This is the value type of every index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LogRecordPos {
    /// Data file holding the record.
    pub file_id: u32,
    /// Byte offset of the record inside the file.
    pub offset: u64,
    /// Encoded size of the record.
    pub size: u32,
}

/// A record read back during replay together with where it was found.
#[derive(Debug)]
pub(crate) struct TransactionRecord {
    pub(crate) record: LogRecord,
    pub(crate) pos: LogRecordPos,
}

impl LogRecord {
    /// Create a record of the given type.
    pub fn new(key: Vec<u8>, value: Vec<u8>, rec_type: LogRecordType) -> Self {
        Self { key, value, rec_type }
    }

    /// Create a live key/value record.
    pub fn normal(key: Vec<u8>, value: Vec<u8>) -> Self {
        Self::new(key, value, LogRecordType::Normal)
    }

    /// Create a tombstone.
    pub fn deleted(key: Vec<u8>) -> Self {
        Self::new(key, Vec::new(), LogRecordType::Deleted)
    }

    /// Encode the record into bytes
    ///
    /// Format: [crc: u32][type: u8][key_len: varint][value_len: varint][key][value]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(self.encoded_size());

        // Reserve space for checksum (will be filled later)
        buf.put_u32_le(0);
        buf.put_u8(self.rec_type as u8);
        put_varint(&mut buf, self.key.len() as i64);
        put_varint(&mut buf, self.value.len() as i64);
        buf.put_slice(&self.key);
        buf.put_slice(&self.value);

        let crc = crc32fast::hash(&buf[CRC_SIZE..]);
        buf[..CRC_SIZE].copy_from_slice(&crc.to_le_bytes());

        buf.to_vec()
    }

    /// Get the total size of the encoded record
    pub fn encoded_size(&self) -> usize {
        CRC_SIZE
            + 1
            + varint_len(self.key.len() as i64)
            + varint_len(self.value.len() as i64)
            + self.key.len()
            + self.value.len()
    }

    /// Decode one complete record from `data`.
    ///
    /// Returns the record and the number of bytes it occupied, or `None` when
    /// `data` holds no further record (zeroed or truncated tail).
    pub fn decode(data: &[u8]) -> Result<Option<(Self, usize)>> {
        let header_buf = &data[..data.len().min(MAX_HEADER_SIZE)];
        let (header, header_size) = match decode_header(header_buf) {
            Some(h) => h,
            None => return Ok(None),
        };
        if header.is_eof_marker() {
            return Ok(None);
        }
        let body_size = header.key_size as usize + header.value_size as usize;
        if data.len() < header_size + body_size {
            return Ok(None);
        }
        let body = &data[header_size..header_size + body_size];
        let record = Self::from_parts(&header, &header_buf[CRC_SIZE..header_size], body)?;
        Ok(Some((record, header_size + body_size)))
    }

    /// Rebuild a record from its decoded header and body, checking the CRC.
    pub(crate) fn from_parts(header: &LogRecordHeader, header_tail: &[u8], body: &[u8]) -> Result<Self> {
        let key_size = header.key_size as usize;
        let key = &body[..key_size];
        let value = &body[key_size..];

        let actual = record_crc(header_tail, key, value);
        if actual != header.crc {
            return Err(Error::InvalidCrc { expected: header.crc, actual });
        }

        Ok(LogRecord {
            key: key.to_vec(),
            value: value.to_vec(),
            rec_type: LogRecordType::from_u8(header.rec_type)?,
        })
    }
}

impl LogRecordHeader {
    /// A zero-filled header marks the unwritten tail of a file.
    pub(crate) fn is_eof_marker(&self) -> bool {
        self.crc == 0 && self.key_size == 0 && self.value_size == 0
    }
}

impl LogRecordPos {
    /// Encode as varints `(file_id, offset, size)` for hint files and the
    /// disk-resident index.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(MAX_VARINT_LEN32 * 2 + MAX_VARINT_LEN64);
        put_uvarint(&mut buf, self.file_id as u64);
        put_uvarint(&mut buf, self.offset);
        put_uvarint(&mut buf, self.size as u64);
        buf.to_vec()
    }

    /// Decode a position written by [`LogRecordPos::encode`]. A missing
    /// trailing size decodes as 0.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let (file_id, n) =
            get_uvarint(buf).ok_or_else(|| Error::corruption("truncated position file id"))?;
        let (offset, m) =
            get_uvarint(&buf[n..]).ok_or_else(|| Error::corruption("truncated position offset"))?;
        let size = get_uvarint(&buf[n + m..]).map(|(s, _)| s).unwrap_or(0);
        Ok(LogRecordPos { file_id: file_id as u32, offset, size: size as u32 })
    }
}

/// Decode the header at the start of `buf`, returning it with its encoded length.
pub(crate) fn decode_header(buf: &[u8]) -> Option<(LogRecordHeader, usize)> {
    if buf.len() <= CRC_SIZE {
        return None;
    }
    let crc = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let rec_type = buf[4];

    let mut index = CRC_SIZE + 1;
    let (key_size, n) = get_varint(&buf[index..])?;
    index += n;
    let (value_size, n) = get_varint(&buf[index..])?;
    index += n;

    if key_size < 0 || value_size < 0 {
        return None;
    }

    Some((
        LogRecordHeader { crc, rec_type, key_size: key_size as u32, value_size: value_size as u32 },
        index,
    ))
}

/// CRC over the header bytes after the checksum, then key, then value.
fn record_crc(header_tail: &[u8], key: &[u8], value: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(header_tail);
    hasher.update(key);
    hasher.update(value);
    hasher.finalize()
}

/// Prefix `key` with the sequence number it was written under.
pub(crate) fn key_with_seq(key: &[u8], seq_no: u64) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(MAX_VARINT_LEN64 + key.len());
    put_uvarint(&mut buf, seq_no);
    buf.put_slice(key);
    buf.to_vec()
}

/// Split a stored key into the user key and its sequence number.
pub(crate) fn parse_key_with_seq(key: &[u8]) -> Result<(&[u8], u64)> {
    let (seq_no, n) =
        get_uvarint(key).ok_or_else(|| Error::corruption("log record key has no sequence number"))?;
    Ok((&key[n..], seq_no))
}

pub(crate) fn put_uvarint(buf: &mut BytesMut, mut value: u64) {
    while value >= 0x80 {
        buf.put_u8((value as u8) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

pub(crate) fn get_uvarint(buf: &[u8]) -> Option<(u64, usize)> {
    let mut value = 0u64;
    let mut shift = 0u32;
    for (i, &byte) in buf.iter().enumerate().take(MAX_VARINT_LEN64) {
        if byte < 0x80 {
            if i == MAX_VARINT_LEN64 - 1 && byte > 1 {
                return None; // overflow
            }
            return Some((value | (byte as u64) << shift, i + 1));
        }
        value |= ((byte & 0x7f) as u64) << shift;
        shift += 7;
    }
    None
}

fn put_varint(buf: &mut BytesMut, value: i64) {
    put_uvarint(buf, zigzag(value));
}

fn get_varint(buf: &[u8]) -> Option<(i64, usize)> {
    let (ux, n) = get_uvarint(buf)?;
    let mut x = (ux >> 1) as i64;
    if ux & 1 != 0 {
        x = !x;
    }
    Some((x, n))
}

fn zigzag(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

fn varint_len(value: i64) -> usize {
    let mut ux = zigzag(value);
    let mut len = 1;
    while ux >= 0x80 {
        ux >>= 7;
        len += 1;
    }
    len
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_record_encode_decode() {
        let record = LogRecord::normal(b"name".to_vec(), b"hello world".to_vec());

        let encoded = record.encode();
        assert_eq!(encoded.len(), record.encoded_size());

        let (decoded, size) = LogRecord::decode(&encoded).unwrap().unwrap();
        assert_eq!(decoded, record);
        assert_eq!(size, encoded.len());
    }

    #[test]
    fn test_type_byte_covered_by_crc() {
        let mut encoded = LogRecord::normal(b"key".to_vec(), b"value".to_vec()).encode();
        encoded[CRC_SIZE] = LogRecordType::Deleted as u8;
        assert!(matches!(LogRecord::decode(&encoded), Err(Error::InvalidCrc { .. })));
    }

    #[test]
    fn test_record_types() {
        let records = vec![
            LogRecord::normal(b"k".to_vec(), b"v".to_vec()),
            LogRecord::deleted(b"k".to_vec()),
            LogRecord::new(b"txn-fin".to_vec(), Vec::new(), LogRecordType::TxFinished),
        ];

        for record in records {
            let encoded = record.encode();
            let (decoded, _) = LogRecord::decode(&encoded).unwrap().unwrap();
            assert_eq!(decoded.rec_type, record.rec_type);
        }
    }

    #[test]
    fn test_empty_value() {
        let record = LogRecord::normal(b"key".to_vec(), Vec::new());
        let encoded = record.encode();
        // crc + type + two one-byte lengths + key
        assert_eq!(encoded.len(), 4 + 1 + 1 + 1 + 3);
        let (decoded, _) = LogRecord::decode(&encoded).unwrap().unwrap();
        assert!(decoded.value.is_empty());
    }

    #[test]
    fn test_checksum_validation() {
        let record = LogRecord::normal(b"key".to_vec(), b"test data".to_vec());
        let mut encoded = record.encode();

        // Corrupt the value
        let last = encoded.len() - 1;
        encoded[last] ^= 0xFF;

        match LogRecord::decode(&encoded) {
            Err(Error::InvalidCrc { .. }) => {}
            other => panic!("Expected crc error, got {:?}", other),
        }
    }

    #[test]
    fn test_zeroed_tail_is_eof() {
        let zeros = vec![0u8; 32];
        assert!(LogRecord::decode(&zeros).unwrap().is_none());
        assert!(LogRecord::decode(&[]).unwrap().is_none());
    }

    #[test]
    fn test_truncated_record_is_eof() {
        let record = LogRecord::normal(b"key".to_vec(), vec![7u8; 100]);
        let encoded = record.encode();
        assert!(LogRecord::decode(&encoded[..encoded.len() - 10]).unwrap().is_none());
    }

    #[test]
    fn test_pos_encode_decode() {
        let pos = LogRecordPos { file_id: 7, offset: 1 << 40, size: 1234 };
        assert_eq!(LogRecordPos::decode(&pos.encode()).unwrap(), pos);
    }

    #[test]
    fn test_pos_decode_without_size() {
        let mut buf = BytesMut::new();
        put_uvarint(&mut buf, 3);
        put_uvarint(&mut buf, 99);
        let pos = LogRecordPos::decode(&buf).unwrap();
        assert_eq!(pos, LogRecordPos { file_id: 3, offset: 99, size: 0 });
    }

    #[test]
    fn test_key_with_seq() {
        let key = key_with_seq(b"user:1", 300);
        let (real, seq) = parse_key_with_seq(&key).unwrap();
        assert_eq!(real, b"user:1");
        assert_eq!(seq, 300);

        let key = key_with_seq(b"k", 0);
        assert_eq!(key, vec![0, b'k']);
    }

    #[test]
    fn test_varint_lengths() {
        for value in [0i64, 1, 63, 64, 127, 128, 8191, 8192, 1 << 30, i32::MAX as i64] {
            let mut buf = BytesMut::new();
            put_varint(&mut buf, value);
            assert_eq!(buf.len(), varint_len(value));
            assert_eq!(get_varint(&buf), Some((value, buf.len())));
        }
    }

    proptest! {
        #[test]
        fn prop_round_trip(
            key in proptest::collection::vec(any::<u8>(), 1..64),
            value in proptest::collection::vec(any::<u8>(), 0..256),
            kind in 0u8..3,
        ) {
            let record = LogRecord::new(key, value, LogRecordType::from_u8(kind).unwrap());
            let encoded = record.encode();
            let (decoded, size) = LogRecord::decode(&encoded).unwrap().unwrap();
            prop_assert_eq!(decoded, record);
            prop_assert_eq!(size, encoded.len());
        }

        #[test]
        fn prop_corruption_detected(
            key in proptest::collection::vec(any::<u8>(), 1..32),
            value in proptest::collection::vec(any::<u8>(), 1..64),
            kind in 0u8..3,
            pick in any::<prop::sample::Index>(),
            flip in 1u8..=255,
        ) {
            let record = LogRecord::new(key, value, LogRecordType::from_u8(kind).unwrap());
            let mut encoded = record.encode();
            // Candidates are the type byte followed by every key and value byte
            let body_start = encoded.len() - record.key.len() - record.value.len();
            let at = match pick.index(1 + encoded.len() - body_start) {
                0 => CRC_SIZE,
                n => body_start + n - 1,
            };
            encoded[at] ^= flip;
            let is_crc_error = matches!(LogRecord::decode(&encoded), Err(Error::InvalidCrc { .. }));
            prop_assert!(is_crc_error);
        }
    }
}
