//! Log entry format.
//!
//! Every entry stored in a segment, or shipped between nodes as recovery
//! data, has the same layout (little-endian):
//!
//! ```text
//! | type (1) | length (4) | checksum (4) | payload (length) |
//! ```
//!
//! The checksum is CRC32 (IEEE) over the type byte, the length field and the
//! payload, so a copy of an entry carries its checksum unchanged wherever it
//! is relocated or replayed.

mod object;

pub use object::{Object, ObjectTombstone};

use crate::error::{LogError, LogResult};
use crate::types::LogEntryHandle;
use bytes::Bytes;

/// Size of the fixed entry header: type (1) + length (4) + checksum (4).
pub const ENTRY_HEADER_SIZE: usize = 9;

/// Type tag of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogEntryType {
    /// First entry of every segment; identifies log and segment.
    SegmentHeader = 0x01,
    /// Last entry of a closed segment; checksums everything before it.
    SegmentFooter = 0x02,
    /// List of segment ids in the log, written at the start of each head.
    LogDigest = 0x03,
    /// A versioned object.
    Object = 0x04,
    /// Deletion marker for an object version.
    ObjectTombstone = 0x05,
}

impl LogEntryType {
    /// Converts from the wire byte.
    #[must_use]
    pub const fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(Self::SegmentHeader),
            0x02 => Some(Self::SegmentFooter),
            0x03 => Some(Self::LogDigest),
            0x04 => Some(Self::Object),
            0x05 => Some(Self::ObjectTombstone),
            _ => None,
        }
    }

    /// Returns the wire byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Returns true for types the log writes itself and never hands to a
    /// registered handler.
    #[must_use]
    pub const fn is_reserved(self) -> bool {
        matches!(
            self,
            Self::SegmentHeader | Self::SegmentFooter | Self::LogDigest
        )
    }
}

/// Total encoded size of an entry with a payload of `payload_len` bytes.
#[must_use]
pub const fn entry_size(payload_len: usize) -> usize {
    ENTRY_HEADER_SIZE + payload_len
}

/// Computes the checksum stored in an entry header.
#[must_use]
pub fn compute_checksum(entry_type: LogEntryType, payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&[entry_type.as_byte()]);
    hasher.update(&(payload.len() as u32).to_le_bytes());
    hasher.update(payload);
    hasher.finalize()
}

/// Writes an encoded entry into `out`, which must be exactly
/// `entry_size(payload.len())` bytes long.
pub(crate) fn write_entry(out: &mut [u8], entry_type: LogEntryType, payload: &[u8]) {
    debug_assert_eq!(out.len(), entry_size(payload.len()));
    out[0] = entry_type.as_byte();
    out[1..5].copy_from_slice(&(payload.len() as u32).to_le_bytes());
    out[5..9].copy_from_slice(&compute_checksum(entry_type, payload).to_le_bytes());
    out[ENTRY_HEADER_SIZE..].copy_from_slice(payload);
}

/// Appends an encoded entry to a buffer.
pub fn encode_entry(buf: &mut Vec<u8>, entry_type: LogEntryType, payload: &[u8]) {
    let start = buf.len();
    buf.resize(start + entry_size(payload.len()), 0);
    write_entry(&mut buf[start..], entry_type, payload);
}

/// Borrowed view of one encoded entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryView<'a> {
    /// Entry type.
    pub entry_type: LogEntryType,
    /// Checksum stored in the header.
    pub checksum: u32,
    /// Payload bytes.
    pub payload: &'a [u8],
    /// Offset of the entry header within the buffer it was read from.
    pub offset: u32,
}

impl<'a> EntryView<'a> {
    /// Decodes the entry starting at `offset` of `buf`.
    ///
    /// Only the structure is checked here; use [`EntryView::verify`] to check
    /// the checksum.
    pub fn parse(buf: &'a [u8], offset: usize) -> LogResult<Self> {
        let header = buf
            .get(offset..offset + ENTRY_HEADER_SIZE)
            .ok_or_else(|| {
                LogError::corruption(format!(
                    "truncated entry header at offset {offset} of {} byte buffer",
                    buf.len()
                ))
            })?;
        let entry_type = LogEntryType::from_byte(header[0]).ok_or_else(|| {
            LogError::corruption(format!(
                "unknown entry type {:#04x} at offset {offset}",
                header[0]
            ))
        })?;
        let length = u32::from_le_bytes([header[1], header[2], header[3], header[4]]) as usize;
        let checksum = u32::from_le_bytes([header[5], header[6], header[7], header[8]]);
        let start = offset + ENTRY_HEADER_SIZE;
        let payload = buf.get(start..start + length).ok_or_else(|| {
            LogError::corruption(format!(
                "entry at offset {offset} claims {length} payload bytes, only {} remain",
                buf.len().saturating_sub(start)
            ))
        })?;
        Ok(Self {
            entry_type,
            checksum,
            payload,
            offset: offset as u32,
        })
    }

    /// Total encoded length, header included.
    #[must_use]
    pub fn total_len(&self) -> usize {
        entry_size(self.payload.len())
    }

    /// Returns the checksum recomputed over this entry's bytes.
    #[must_use]
    pub fn computed_checksum(&self) -> u32 {
        compute_checksum(self.entry_type, self.payload)
    }

    /// Verifies the stored checksum against the entry's bytes.
    pub fn verify(&self) -> LogResult<()> {
        let actual = self.computed_checksum();
        if actual != self.checksum {
            return Err(LogError::ChecksumMismatch {
                expected: self.checksum,
                actual,
            });
        }
        Ok(())
    }
}

/// Iterates over consecutive entries of a buffer.
///
/// Works on full segment images as well as filtered recovery data. A
/// structural error is yielded once and ends the iteration.
#[derive(Debug, Clone)]
pub struct EntryIterator<'a> {
    buf: &'a [u8],
    offset: usize,
    failed: bool,
}

impl<'a> EntryIterator<'a> {
    /// Creates an iterator over all entries in `buf`.
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            offset: 0,
            failed: false,
        }
    }

    /// Bytes consumed so far.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }
}

impl<'a> Iterator for EntryIterator<'a> {
    type Item = LogResult<EntryView<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.buf.len() {
            return None;
        }
        match EntryView::parse(self.buf, self.offset) {
            Ok(view) => {
                self.offset += view.total_len();
                Some(Ok(view))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// An entry copied out of the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Where the entry lives.
    pub handle: LogEntryHandle,
    /// Checksum stored in the header.
    pub checksum: u32,
    /// Payload bytes.
    pub payload: Bytes,
}

impl LogEntry {
    /// Returns the entry type.
    #[must_use]
    pub fn entry_type(&self) -> LogEntryType {
        self.handle.entry_type()
    }

    /// Total encoded length, header included.
    #[must_use]
    pub fn total_len(&self) -> usize {
        entry_size(self.payload.len())
    }
}
