//! Log digest: the manifest written at the start of every head segment.

use crate::entry::{entry_size, EntryIterator, LogEntryType};
use crate::error::{LogError, LogResult};

/// The set of segment ids that made up the log when a head was opened.
///
/// Recovery uses the digest of the newest head to tell which segments it
/// must find replicas for. A digest is immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LogDigest {
    segment_ids: Vec<u64>,
}

impl LogDigest {
    /// Creates a digest listing `segment_ids` in the given order.
    #[must_use]
    pub fn new(segment_ids: Vec<u64>) -> Self {
        Self { segment_ids }
    }

    /// Payload bytes needed for a digest of `count` segment ids.
    #[must_use]
    pub const fn payload_size(count: usize) -> usize {
        4 + 8 * count
    }

    /// Encoded entry bytes (header included) for a digest of `count` ids.
    #[must_use]
    pub const fn entry_size(count: usize) -> usize {
        entry_size(Self::payload_size(count))
    }

    /// Segment ids in the digest.
    #[must_use]
    pub fn segment_ids(&self) -> &[u64] {
        &self.segment_ids
    }

    /// Number of segment ids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.segment_ids.len()
    }

    /// Returns true if the digest names no segment.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segment_ids.is_empty()
    }

    /// Returns true if `segment_id` is listed.
    #[must_use]
    pub fn contains(&self, segment_id: u64) -> bool {
        self.segment_ids.contains(&segment_id)
    }

    /// Encodes the digest payload: `count: u32 | id: u64 × count`.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::payload_size(self.segment_ids.len()));
        buf.extend_from_slice(&(self.segment_ids.len() as u32).to_le_bytes());
        for id in &self.segment_ids {
            buf.extend_from_slice(&id.to_le_bytes());
        }
        buf
    }

    /// Decodes a digest payload.
    pub fn decode(payload: &[u8]) -> LogResult<Self> {
        let count_bytes: [u8; 4] = payload
            .get(0..4)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| LogError::corruption("digest payload shorter than its count"))?;
        let count = u32::from_le_bytes(count_bytes) as usize;
        if payload.len() != Self::payload_size(count) {
            return Err(LogError::corruption(format!(
                "digest of {count} ids has {} payload bytes, expected {}",
                payload.len(),
                Self::payload_size(count)
            )));
        }
        let segment_ids = payload[4..]
            .chunks_exact(8)
            .map(|chunk| {
                let mut id = [0u8; 8];
                id.copy_from_slice(chunk);
                u64::from_le_bytes(id)
            })
            .collect();
        Ok(Self { segment_ids })
    }

    /// Finds the digest in a segment image (the entry after the header).
    ///
    /// Returns `None` for segments that were never a head, such as cleaner
    /// survivors.
    pub fn find_in_segment(segment: &[u8]) -> LogResult<Option<Self>> {
        let mut entries = EntryIterator::new(segment);
        match entries.next() {
            Some(Ok(first)) if first.entry_type == LogEntryType::SegmentHeader => {}
            Some(Err(e)) => return Err(e),
            _ => return Err(LogError::corruption("segment does not start with a header")),
        }
        match entries.next() {
            Some(Ok(second)) if second.entry_type == LogEntryType::LogDigest => {
                second.verify()?;
                Ok(Some(Self::decode(second.payload)?))
            }
            Some(Err(e)) => Err(e),
            _ => Ok(None),
        }
    }
}
