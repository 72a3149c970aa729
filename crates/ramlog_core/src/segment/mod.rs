//! Fixed-capacity, append-only segments.
//!
//! A segment owns one memory block taken from the log's free pool. The
//! block moves into the segment when it opens and moves back to the pool
//! when the segment is reclaimed, so exactly one owner holds it at a time.
//!
//! Layout of a segment:
//!
//! ```text
//! | SegmentHeader entry | [LogDigest entry] | entries ... | [SegmentFooter entry] |
//! ```
//!
//! Room for the footer is reserved from the start, so closing never fails
//! for lack of space.

mod digest;
mod header;

pub use digest::LogDigest;
pub use header::{SegmentFooter, SegmentHeader};

use crate::entry::{entry_size, write_entry, EntryIterator, EntryView, LogEntryType};
use crate::error::{LogError, LogResult};
use crate::types::ServerId;

/// Encoded size of the header entry.
const HEADER_ENTRY_SIZE: usize = entry_size(SegmentHeader::PAYLOAD_SIZE);
/// Encoded size of the footer entry.
const FOOTER_ENTRY_SIZE: usize = entry_size(SegmentFooter::PAYLOAD_SIZE);

/// An append-only segment of the log.
#[derive(Debug)]
pub struct Segment {
    log_id: ServerId,
    id: u64,
    data: Box<[u8]>,
    tail: usize,
    closed: bool,
    entry_count: u32,
    bytes_explicitly_freed: u64,
    cleaned_epoch: Option<u64>,
}

impl Segment {
    /// Bytes every segment spends on its header and footer entries.
    #[must_use]
    pub const fn fixed_overhead() -> usize {
        HEADER_ENTRY_SIZE + FOOTER_ENTRY_SIZE
    }

    /// Opens a segment over `block` and writes its header entry.
    pub fn open(log_id: ServerId, id: u64, block: Box<[u8]>) -> LogResult<Self> {
        let capacity = u32::try_from(block.len())
            .map_err(|_| LogError::invalid_config("segment block larger than 4 GiB"))?;
        if block.len() < Self::fixed_overhead() {
            return Err(LogError::invalid_config(format!(
                "segment block of {} bytes cannot hold header and footer",
                block.len()
            )));
        }
        let mut segment = Self {
            log_id,
            id,
            data: block,
            tail: 0,
            closed: false,
            entry_count: 0,
            bytes_explicitly_freed: 0,
            cleaned_epoch: None,
        };
        let header = SegmentHeader {
            log_id,
            segment_id: id,
            capacity,
        };
        segment.append(LogEntryType::SegmentHeader, &header.encode())?;
        Ok(segment)
    }

    /// Segment id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Id of the owning log.
    #[must_use]
    pub fn log_id(&self) -> ServerId {
        self.log_id
    }

    /// Capacity in bytes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Offset of the next append.
    #[must_use]
    pub fn tail(&self) -> u32 {
        self.tail as u32
    }

    /// Returns true once the footer has been written.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Number of entries written, header and footer included.
    #[must_use]
    pub fn entry_count(&self) -> u32 {
        self.entry_count
    }

    /// Bytes of entries the owner has declared dead.
    #[must_use]
    pub fn bytes_explicitly_freed(&self) -> u64 {
        self.bytes_explicitly_freed
    }

    /// Bytes written that have not been explicitly freed.
    #[must_use]
    pub fn live_bytes(&self) -> u64 {
        (self.tail as u64).saturating_sub(self.bytes_explicitly_freed)
    }

    /// Live bytes as a percentage of capacity.
    #[must_use]
    pub fn utilization(&self) -> u32 {
        (self.live_bytes() * 100 / self.capacity() as u64) as u32
    }

    /// Bytes still available for entries, excluding the footer reservation.
    #[must_use]
    pub fn appendable_bytes(&self) -> usize {
        if self.closed {
            return 0;
        }
        self.capacity()
            .saturating_sub(self.tail)
            .saturating_sub(FOOTER_ENTRY_SIZE)
    }

    /// Returns true if an entry with `payload_len` payload bytes fits.
    #[must_use]
    pub fn can_fit(&self, payload_len: usize) -> bool {
        entry_size(payload_len) <= self.appendable_bytes()
    }

    /// Appends an entry and returns its offset.
    pub fn append(&mut self, entry_type: LogEntryType, payload: &[u8]) -> LogResult<u32> {
        if self.closed {
            return Err(LogError::SegmentClosed {
                segment_id: self.id,
            });
        }
        let needed = entry_size(payload.len());
        let available = self.appendable_bytes();
        if needed > available {
            return Err(LogError::SegmentFull {
                segment_id: self.id,
                needed,
                available,
            });
        }
        let offset = self.tail;
        write_entry(&mut self.data[offset..offset + needed], entry_type, payload);
        self.tail += needed;
        self.entry_count += 1;
        Ok(offset as u32)
    }

    /// Writes the footer and closes the segment.
    pub fn close(&mut self) -> LogResult<()> {
        if self.closed {
            return Err(LogError::SegmentClosed {
                segment_id: self.id,
            });
        }
        let footer = SegmentFooter {
            checksum: self.checksum(),
        };
        let offset = self.tail;
        write_entry(
            &mut self.data[offset..offset + FOOTER_ENTRY_SIZE],
            LogEntryType::SegmentFooter,
            &footer.encode(),
        );
        self.tail += FOOTER_ENTRY_SIZE;
        self.entry_count += 1;
        self.closed = true;
        Ok(())
    }

    /// CRC32 over the bytes written so far.
    #[must_use]
    pub fn checksum(&self) -> u32 {
        crc32fast::hash(self.bytes())
    }

    /// Bytes written so far.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.tail]
    }

    /// Reads the entry whose header starts at `offset`.
    pub fn entry(&self, offset: u32) -> LogResult<EntryView<'_>> {
        EntryView::parse(self.bytes(), offset as usize)
    }

    /// Iterates over every entry written so far.
    #[must_use]
    pub fn entries(&self) -> EntryIterator<'_> {
        EntryIterator::new(self.bytes())
    }

    /// Records `bytes` of entries as dead.
    pub fn free_bytes(&mut self, bytes: u64) {
        self.bytes_explicitly_freed += bytes;
    }

    /// Epoch in which cleaning of this segment completed.
    #[must_use]
    pub fn cleaned_epoch(&self) -> Option<u64> {
        self.cleaned_epoch
    }

    pub(crate) fn set_cleaned_epoch(&mut self, epoch: u64) {
        self.cleaned_epoch = Some(epoch);
    }

    /// Gives the memory block back.
    #[must_use]
    pub fn into_block(self) -> Box<[u8]> {
        self.data
    }

    /// Checks a closed segment image: a valid header first, every entry
    /// intact, and a footer whose checksum covers all preceding bytes.
    pub fn verify_image(image: &[u8]) -> LogResult<SegmentHeader> {
        let mut entries = EntryIterator::new(image);
        let header = match entries.next() {
            Some(Ok(view)) if view.entry_type == LogEntryType::SegmentHeader => {
                view.verify()?;
                SegmentHeader::decode(view.payload)?
            }
            Some(Err(e)) => return Err(e),
            _ => return Err(LogError::corruption("segment does not start with a header")),
        };
        for view in entries {
            let view = view?;
            view.verify()?;
            if view.entry_type == LogEntryType::SegmentFooter {
                let footer = SegmentFooter::decode(view.payload)?;
                let offset = view.offset as usize;
                let actual = crc32fast::hash(&image[..offset]);
                if actual != footer.checksum {
                    return Err(LogError::ChecksumMismatch {
                        expected: footer.checksum,
                        actual,
                    });
                }
                if offset + view.total_len() != image.len() {
                    return Err(LogError::corruption(format!(
                        "segment {} has bytes after its footer",
                        header.segment_id
                    )));
                }
                return Ok(header);
            }
        }
        Err(LogError::corruption(format!(
            "segment {} has no footer",
            header.segment_id
        )))
    }
}
