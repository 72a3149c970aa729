//! Log configuration.

use crate::entry::ENTRY_HEADER_SIZE;
use crate::error::{LogError, LogResult};
use crate::segment::{LogDigest, Segment};

/// Whether a cleaner reclaims space in this log.
///
/// With the cleaner disabled nothing will ever return segments to the free
/// list, so the last free segment is not held back as a reserve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CleanerMode {
    /// No cleaner runs.
    Disabled,
    /// A cleaner runs, either inline or on a background thread.
    #[default]
    Enabled,
}

/// Configuration for a [`Log`](crate::Log).
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Total bytes of memory backing the log.
    pub log_capacity: u64,

    /// Bytes per segment.
    pub segment_capacity: u32,

    /// Largest single append (or multi-append batch) in bytes, headers included.
    pub max_bytes_per_append: u32,

    /// Cleaner mode.
    pub cleaner: CleanerMode,

    /// Maximum number of segments the cleaner compacts per pass.
    pub max_segments_per_clean: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_capacity: 64 * 8 * 1024 * 1024, // 512 MB
            segment_capacity: 8 * 1024 * 1024,  // 8 MB
            max_bytes_per_append: 1024 * 1024,  // 1 MB
            cleaner: CleanerMode::Enabled,
            max_segments_per_clean: 8,
        }
    }
}

impl LogConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the total log capacity in bytes.
    #[must_use]
    pub const fn log_capacity(mut self, bytes: u64) -> Self {
        self.log_capacity = bytes;
        self
    }

    /// Sets the segment capacity in bytes.
    #[must_use]
    pub const fn segment_capacity(mut self, bytes: u32) -> Self {
        self.segment_capacity = bytes;
        self
    }

    /// Sets the largest permitted append in bytes.
    #[must_use]
    pub const fn max_bytes_per_append(mut self, bytes: u32) -> Self {
        self.max_bytes_per_append = bytes;
        self
    }

    /// Sets the cleaner mode.
    #[must_use]
    pub const fn cleaner(mut self, mode: CleanerMode) -> Self {
        self.cleaner = mode;
        self
    }

    /// Sets how many segments one cleaner pass may compact.
    #[must_use]
    pub const fn max_segments_per_clean(mut self, count: usize) -> Self {
        self.max_segments_per_clean = count;
        self
    }

    /// Number of segments the log capacity is divided into.
    #[must_use]
    pub fn segment_count(&self) -> usize {
        if self.segment_capacity == 0 {
            return 0;
        }
        (self.log_capacity / u64::from(self.segment_capacity)) as usize
    }

    /// Checks that a log built from this configuration can accept appends.
    ///
    /// A head segment must hold its header, a digest naming every segment of
    /// the log, the largest append and the footer.
    pub fn validate(&self) -> LogResult<()> {
        let segments = self.segment_count();
        if segments == 0 {
            return Err(LogError::invalid_config(format!(
                "log capacity {} holds no segment of {} bytes",
                self.log_capacity, self.segment_capacity
            )));
        }
        if self.max_bytes_per_append as usize <= ENTRY_HEADER_SIZE {
            return Err(LogError::invalid_config(format!(
                "max bytes per append {} leaves no room for a payload",
                self.max_bytes_per_append
            )));
        }
        let overhead = Segment::fixed_overhead() + LogDigest::entry_size(segments);
        let usable = (self.segment_capacity as usize).saturating_sub(overhead);
        if self.max_bytes_per_append as usize > usable {
            return Err(LogError::invalid_config(format!(
                "max bytes per append {} exceeds the {} usable bytes of a {} byte segment",
                self.max_bytes_per_append, usable, self.segment_capacity
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = LogConfig::default();
        assert_eq!(config.segment_count(), 64);
        assert_eq!(config.cleaner, CleanerMode::Enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_pattern() {
        let config = LogConfig::new()
            .log_capacity(4 * 8192)
            .segment_capacity(8192)
            .max_bytes_per_append(2048)
            .cleaner(CleanerMode::Disabled)
            .max_segments_per_clean(2);

        assert_eq!(config.segment_count(), 4);
        assert_eq!(config.max_bytes_per_append, 2048);
        assert_eq!(config.cleaner, CleanerMode::Disabled);
        assert_eq!(config.max_segments_per_clean, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_append_larger_than_segment() {
        let config = LogConfig::new()
            .log_capacity(8192)
            .segment_capacity(8192)
            .max_bytes_per_append(8193);
        assert!(matches!(
            config.validate(),
            Err(LogError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn rejects_capacity_below_one_segment() {
        let config = LogConfig::new().log_capacity(100).segment_capacity(8192);
        assert!(config.validate().is_err());
    }
}
