//! Log record types and serialization.
//!
//! Every record is wrapped in an envelope:
//!
//! ```text
//! | magic "KVLG" (4) | version u16 | type u8 | payload len u32 | payload | crc32 |
//! ```
//!
//! All integers are little endian. The CRC covers everything before it.

use kvwrap_core::{DbError, DbResult};

/// Magic bytes identifying a log record.
pub(crate) const LOG_MAGIC: [u8; 4] = *b"KVLG";

/// Current log format version.
pub(crate) const LOG_VERSION: u16 = 1;

/// Magic + version + type + payload length.
pub(crate) const HEADER_SIZE: usize = 4 + 2 + 1 + 4;

pub(crate) const CRC_SIZE: usize = 4;

/// Type of log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum LogRecordType {
    Put = 1,
    Delete = 2,
    Commit = 3,
}

impl LogRecordType {
    pub(crate) fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Put),
            2 => Some(Self::Delete),
            3 => Some(Self::Commit),
            _ => None,
        }
    }

    pub(crate) const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// One entry of the append-only log.
///
/// Puts and deletes only take effect once a `Commit` follows them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LogRecord {
    /// Insert or replace a value.
    Put { key: Vec<u8>, value: Vec<u8> },
    /// Remove a key.
    Delete { key: Vec<u8> },
    /// Closes a batch and assigns its sequence number.
    Commit { seqnum: u64 },
}

impl LogRecord {
    #[must_use]
    pub(crate) fn record_type(&self) -> LogRecordType {
        match self {
            Self::Put { .. } => LogRecordType::Put,
            Self::Delete { .. } => LogRecordType::Delete,
            Self::Commit { .. } => LogRecordType::Commit,
        }
    }

    fn encode_payload(&self) -> DbResult<Vec<u8>> {
        let mut buf = Vec::new();
        match self {
            Self::Put { key, value } => {
                put_bytes(&mut buf, key)?;
                put_bytes(&mut buf, value)?;
            }
            Self::Delete { key } => put_bytes(&mut buf, key)?,
            Self::Commit { seqnum } => buf.extend_from_slice(&seqnum.to_le_bytes()),
        }
        Ok(buf)
    }

    fn decode_payload(record_type: LogRecordType, payload: &[u8]) -> DbResult<Self> {
        let mut cursor = Cursor::new(payload);
        let record = match record_type {
            LogRecordType::Put => {
                let key = cursor.bytes()?;
                let value = cursor.bytes()?;
                Self::Put { key, value }
            }
            LogRecordType::Delete => Self::Delete {
                key: cursor.bytes()?,
            },
            LogRecordType::Commit => Self::Commit {
                seqnum: cursor.u64()?,
            },
        };
        if !cursor.is_empty() {
            return Err(DbError::corrupted(format!(
                "trailing bytes in {record_type:?} record"
            )));
        }
        Ok(record)
    }

    /// Serializes the record with its envelope.
    pub(crate) fn encode(&self) -> DbResult<Vec<u8>> {
        let payload = self.encode_payload()?;
        let payload_len = u32::try_from(payload.len())
            .map_err(|_| DbError::invalid_value("log record too large"))?;

        let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
        buf.extend_from_slice(&LOG_MAGIC);
        buf.extend_from_slice(&LOG_VERSION.to_le_bytes());
        buf.push(self.record_type().as_byte());
        buf.extend_from_slice(&payload_len.to_le_bytes());
        buf.extend_from_slice(&payload);
        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        Ok(buf)
    }

    /// Decodes the record at the start of `buf`.
    ///
    /// Returns the record and the number of bytes it occupied, or `None` if
    /// `buf` ends before the record does. A short buffer is how a torn write
    /// looks, so it is not an error here.
    ///
    /// # Errors
    ///
    /// `Corrupted` on a bad magic, unknown version or type, or checksum
    /// mismatch.
    pub(crate) fn decode(buf: &[u8]) -> DbResult<Option<(Self, usize)>> {
        if buf.len() < HEADER_SIZE {
            return Ok(None);
        }
        if buf[0..4] != LOG_MAGIC {
            return Err(DbError::corrupted("invalid magic"));
        }
        let version = u16::from_le_bytes([buf[4], buf[5]]);
        if version > LOG_VERSION {
            return Err(DbError::corrupted(format!("unsupported version {version}")));
        }
        let type_byte = buf[6];
        let record_type = LogRecordType::from_byte(type_byte)
            .ok_or_else(|| DbError::corrupted(format!("unknown record type {type_byte}")))?;
        let payload_len = u32::from_le_bytes([buf[7], buf[8], buf[9], buf[10]]) as usize;

        let payload_end = HEADER_SIZE + payload_len;
        let total_len = payload_end + CRC_SIZE;
        if buf.len() < total_len {
            return Ok(None);
        }

        let stored_crc = u32::from_le_bytes([
            buf[payload_end],
            buf[payload_end + 1],
            buf[payload_end + 2],
            buf[payload_end + 3],
        ]);
        let computed_crc = crc32fast::hash(&buf[..payload_end]);
        if stored_crc != computed_crc {
            return Err(DbError::corrupted(format!(
                "checksum mismatch: stored {stored_crc:#010x}, computed {computed_crc:#010x}"
            )));
        }

        let record = Self::decode_payload(record_type, &buf[HEADER_SIZE..payload_end])?;
        Ok(Some((record, total_len)))
    }
}

fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8]) -> DbResult<()> {
    let len = u32::try_from(bytes.len())
        .map_err(|_| DbError::invalid_value("key or value exceeds u32::MAX bytes"))?;
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(bytes);
    Ok(())
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, len: usize) -> DbResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| DbError::corrupted("unexpected end of payload"))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u32(&mut self) -> DbResult<u32> {
        let raw: [u8; 4] = self
            .take(4)?
            .try_into()
            .map_err(|_| DbError::corrupted("invalid u32"))?;
        Ok(u32::from_le_bytes(raw))
    }

    fn u64(&mut self) -> DbResult<u64> {
        let raw: [u8; 8] = self
            .take(8)?
            .try_into()
            .map_err(|_| DbError::corrupted("invalid u64"))?;
        Ok(u64::from_le_bytes(raw))
    }

    fn bytes(&mut self) -> DbResult<Vec<u8>> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    fn is_empty(&self) -> bool {
        self.pos == self.data.len()
    }
}
