//! Object and tombstone payloads.

use crate::error::{LogError, LogResult};
use crate::types::TableId;

/// Object payload header: table_id (8) + version (8) + timestamp (4) + key_len (2).
const OBJECT_HEADER_SIZE: usize = 22;
/// Tombstone payload header: table_id (8) + segment_id (8) + object_version (8)
/// + timestamp (4) + key_len (2).
const TOMBSTONE_HEADER_SIZE: usize = 30;

/// A versioned object, borrowed from an encoded payload or from the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Object<'a> {
    /// Owning table.
    pub table_id: TableId,
    /// Primary key.
    pub key: &'a [u8],
    /// Version; strictly increases across writes of a key.
    pub version: u64,
    /// Seconds since the Unix epoch when the object was written.
    pub timestamp: u32,
    /// Value bytes.
    pub data: &'a [u8],
}

impl<'a> Object<'a> {
    /// Encoded payload length.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        OBJECT_HEADER_SIZE + self.key.len() + self.data.len()
    }

    /// Encodes the object payload.
    pub fn encode(&self) -> LogResult<Vec<u8>> {
        let key_len = key_len(self.key)?;
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.extend_from_slice(&self.table_id.as_u64().to_le_bytes());
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.extend_from_slice(&key_len.to_le_bytes());
        buf.extend_from_slice(self.key);
        buf.extend_from_slice(self.data);
        Ok(buf)
    }

    /// Decodes an object payload.
    pub fn decode(payload: &'a [u8]) -> LogResult<Self> {
        if payload.len() < OBJECT_HEADER_SIZE {
            return Err(LogError::corruption(format!(
                "object payload too short: {} bytes",
                payload.len()
            )));
        }
        let table_id = TableId::new(read_u64(payload, 0));
        let version = read_u64(payload, 8);
        let timestamp = read_u32(payload, 16);
        let key_len = u16::from_le_bytes([payload[20], payload[21]]) as usize;
        let key = payload
            .get(OBJECT_HEADER_SIZE..OBJECT_HEADER_SIZE + key_len)
            .ok_or_else(|| {
                LogError::corruption(format!(
                    "object key length {key_len} exceeds payload of {} bytes",
                    payload.len()
                ))
            })?;
        Ok(Self {
            table_id,
            key,
            version,
            timestamp,
            data: &payload[OBJECT_HEADER_SIZE + key_len..],
        })
    }
}

/// Deletion marker for one object version.
///
/// Records the segment that held the deleted object; the tombstone stays
/// meaningful only while that segment is still part of the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectTombstone<'a> {
    /// Owning table.
    pub table_id: TableId,
    /// Primary key.
    pub key: &'a [u8],
    /// Segment that held the deleted object.
    pub segment_id: u64,
    /// Version of the deleted object.
    pub object_version: u64,
    /// Seconds since the Unix epoch when the tombstone was written.
    pub timestamp: u32,
}

impl<'a> ObjectTombstone<'a> {
    /// Creates the tombstone for `object`, which was stored in `segment_id`.
    #[must_use]
    pub fn for_object(object: &Object<'a>, segment_id: u64, timestamp: u32) -> Self {
        Self {
            table_id: object.table_id,
            key: object.key,
            segment_id,
            object_version: object.version,
            timestamp,
        }
    }

    /// Encoded payload length.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        TOMBSTONE_HEADER_SIZE + self.key.len()
    }

    /// Encodes the tombstone payload.
    pub fn encode(&self) -> LogResult<Vec<u8>> {
        let key_len = key_len(self.key)?;
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.extend_from_slice(&self.table_id.as_u64().to_le_bytes());
        buf.extend_from_slice(&self.segment_id.to_le_bytes());
        buf.extend_from_slice(&self.object_version.to_le_bytes());
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.extend_from_slice(&key_len.to_le_bytes());
        buf.extend_from_slice(self.key);
        Ok(buf)
    }

    /// Decodes a tombstone payload.
    pub fn decode(payload: &'a [u8]) -> LogResult<Self> {
        if payload.len() < TOMBSTONE_HEADER_SIZE {
            return Err(LogError::corruption(format!(
                "tombstone payload too short: {} bytes",
                payload.len()
            )));
        }
        let key_len = u16::from_le_bytes([payload[28], payload[29]]) as usize;
        if payload.len() != TOMBSTONE_HEADER_SIZE + key_len {
            return Err(LogError::corruption(format!(
                "tombstone key length {key_len} does not match payload of {} bytes",
                payload.len()
            )));
        }
        Ok(Self {
            table_id: TableId::new(read_u64(payload, 0)),
            segment_id: read_u64(payload, 8),
            object_version: read_u64(payload, 16),
            timestamp: read_u32(payload, 24),
            key: &payload[TOMBSTONE_HEADER_SIZE..],
        })
    }
}

fn key_len(key: &[u8]) -> LogResult<u16> {
    u16::try_from(key.len()).map_err(|_| LogError::EntryTooLarge {
        size: key.len(),
        limit: u16::MAX as usize,
    })
}

fn read_u64(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(bytes)
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[at..at + 4]);
    u32::from_le_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_layout() {
        let object = Object {
            table_id: TableId::new(3),
            key: b"k1",
            version: 9,
            timestamp: 77,
            data: b"value",
        };
        let bytes = object.encode().unwrap();
        assert_eq!(bytes.len(), 22 + 2 + 5);
        assert_eq!(&bytes[0..8], &3u64.to_le_bytes());
        assert_eq!(&bytes[8..16], &9u64.to_le_bytes());
        assert_eq!(&bytes[16..20], &77u32.to_le_bytes());
        assert_eq!(&bytes[20..22], &2u16.to_le_bytes());
        assert_eq!(&bytes[22..24], b"k1");
        assert_eq!(&bytes[24..], b"value");
        assert_eq!(Object::decode(&bytes).unwrap(), object);
    }

    #[test]
    fn empty_object_data() {
        let object = Object {
            table_id: TableId::new(1),
            key: b"empty",
            version: 1,
            timestamp: 0,
            data: b"",
        };
        let bytes = object.encode().unwrap();
        let decoded = Object::decode(&bytes).unwrap();
        assert!(decoded.data.is_empty());
        assert_eq!(decoded.key, b"empty");
    }

    #[test]
    fn tombstone_for_object() {
        let object = Object {
            table_id: TableId::new(2),
            key: b"gone",
            version: 4,
            timestamp: 10,
            data: b"x",
        };
        let tomb = ObjectTombstone::for_object(&object, 17, 11);
        let bytes = tomb.encode().unwrap();
        assert_eq!(bytes.len(), 30 + 4);
        let decoded = ObjectTombstone::decode(&bytes).unwrap();
        assert_eq!(decoded.table_id, TableId::new(2));
        assert_eq!(decoded.key, b"gone");
        assert_eq!(decoded.segment_id, 17);
        assert_eq!(decoded.object_version, 4);
        assert_eq!(decoded.timestamp, 11);
    }

    #[test]
    fn rejects_malformed_payloads() {
        assert!(Object::decode(&[0u8; 10]).is_err());
        let mut bytes = Object {
            table_id: TableId::new(1),
            key: b"abc",
            version: 1,
            timestamp: 0,
            data: b"",
        }
        .encode()
        .unwrap();
        bytes.truncate(23);
        assert!(Object::decode(&bytes).is_err());

        assert!(ObjectTombstone::decode(&[0u8; 29]).is_err());
        let mut tomb = ObjectTombstone {
            table_id: TableId::new(1),
            key: b"abc",
            segment_id: 0,
            object_version: 1,
            timestamp: 0,
        }
        .encode()
        .unwrap();
        tomb.push(0);
        assert!(ObjectTombstone::decode(&tomb).is_err());
    }

    #[test]
    fn rejects_oversized_key() {
        let key = vec![0u8; u16::MAX as usize + 1];
        let object = Object {
            table_id: TableId::new(1),
            key: &key,
            version: 1,
            timestamp: 0,
            data: b"",
        };
        assert!(matches!(
            object.encode(),
            Err(LogError::EntryTooLarge { .. })
        ));
    }
}
