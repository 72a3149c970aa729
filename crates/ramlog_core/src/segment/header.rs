//! Segment header and footer payloads.

use crate::error::{LogError, LogResult};
use crate::types::ServerId;

/// Payload of the first entry in every segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    /// Log (server) that owns the segment.
    pub log_id: ServerId,
    /// Segment id within that log.
    pub segment_id: u64,
    /// Segment capacity in bytes.
    pub capacity: u32,
}

impl SegmentHeader {
    /// Encoded payload size: log_id (8) + segment_id (8) + capacity (4).
    pub const PAYLOAD_SIZE: usize = 20;

    /// Encodes the header payload.
    #[must_use]
    pub fn encode(&self) -> [u8; Self::PAYLOAD_SIZE] {
        let mut buf = [0u8; Self::PAYLOAD_SIZE];
        buf[0..8].copy_from_slice(&self.log_id.as_u64().to_le_bytes());
        buf[8..16].copy_from_slice(&self.segment_id.to_le_bytes());
        buf[16..20].copy_from_slice(&self.capacity.to_le_bytes());
        buf
    }

    /// Decodes a header payload.
    pub fn decode(payload: &[u8]) -> LogResult<Self> {
        if payload.len() != Self::PAYLOAD_SIZE {
            return Err(LogError::corruption(format!(
                "segment header payload is {} bytes, expected {}",
                payload.len(),
                Self::PAYLOAD_SIZE
            )));
        }
        let mut log_id = [0u8; 8];
        let mut segment_id = [0u8; 8];
        let mut capacity = [0u8; 4];
        log_id.copy_from_slice(&payload[0..8]);
        segment_id.copy_from_slice(&payload[8..16]);
        capacity.copy_from_slice(&payload[16..20]);
        Ok(Self {
            log_id: ServerId::new(u64::from_le_bytes(log_id)),
            segment_id: u64::from_le_bytes(segment_id),
            capacity: u32::from_le_bytes(capacity),
        })
    }
}

/// Payload of the entry that closes a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentFooter {
    /// CRC32 over every segment byte preceding the footer entry.
    pub checksum: u32,
}

impl SegmentFooter {
    /// Encoded payload size.
    pub const PAYLOAD_SIZE: usize = 4;

    /// Encodes the footer payload.
    #[must_use]
    pub fn encode(&self) -> [u8; Self::PAYLOAD_SIZE] {
        self.checksum.to_le_bytes()
    }

    /// Decodes a footer payload.
    pub fn decode(payload: &[u8]) -> LogResult<Self> {
        let bytes: [u8; 4] = payload.try_into().map_err(|_| {
            LogError::corruption(format!(
                "segment footer payload is {} bytes, expected {}",
                payload.len(),
                Self::PAYLOAD_SIZE
            ))
        })?;
        Ok(Self {
            checksum: u32::from_le_bytes(bytes),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout() {
        let header = SegmentHeader {
            log_id: ServerId::new(5),
            segment_id: 42,
            capacity: 8192,
        };
        let bytes = header.encode();
        assert_eq!(&bytes[0..8], &5u64.to_le_bytes());
        assert_eq!(&bytes[8..16], &42u64.to_le_bytes());
        assert_eq!(&bytes[16..20], &8192u32.to_le_bytes());
        assert_eq!(SegmentHeader::decode(&bytes).unwrap(), header);
        assert!(SegmentHeader::decode(&bytes[..19]).is_err());
    }

    #[test]
    fn footer_layout() {
        let footer = SegmentFooter { checksum: 0xabcd };
        assert_eq!(SegmentFooter::decode(&footer.encode()).unwrap(), footer);
        assert!(SegmentFooter::decode(&[1, 2, 3]).is_err());
    }
}
