//! Benchmark utilities.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use ramlog_core::entry::{encode_entry, Object};
use ramlog_core::{
    Log, LogConfig, LogEntryType, MemoryIndex, NullReplicaManager, ServerId, TableId,
};
use ramlog_recovery::SegmentReplayer;
use rand::Rng;
use std::sync::Arc;

/// Segment size used by the benchmarks.
pub const BENCH_SEGMENT_CAPACITY: u32 = 1024 * 1024;

/// Generate random object data of the specified size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Creates a log of `segments` benchmark-sized segments with no replicas.
pub fn bench_log(segments: u64) -> Arc<Log> {
    let config = LogConfig::new()
        .log_capacity(segments * u64::from(BENCH_SEGMENT_CAPACITY))
        .segment_capacity(BENCH_SEGMENT_CAPACITY)
        .max_bytes_per_append(BENCH_SEGMENT_CAPACITY / 2);
    let log = Log::new(ServerId::new(1), config, Arc::new(NullReplicaManager))
        .expect("Failed to create log");
    Arc::new(log)
}

/// Creates a replayer over a fresh log and index.
pub fn bench_replayer(segments: u64) -> SegmentReplayer {
    SegmentReplayer::new(bench_log(segments), Arc::new(MemoryIndex::new()), 50_000)
}

/// Recovery data of about `bytes` bytes holding distinct objects of
/// `object_size` bytes each. Returns the buffer and the object count.
pub fn recovery_buffer(bytes: usize, object_size: usize) -> (Vec<u8>, u64) {
    let data = random_data(object_size);
    let mut buf = Vec::with_capacity(bytes);
    let mut count = 0u64;
    while buf.len() + object_size < bytes {
        let key = format!("key{count:010}");
        let payload = Object {
            table_id: TableId(1),
            key: key.as_bytes(),
            version: 1,
            timestamp: 0,
            data: &data,
        }
        .encode()
        .expect("Failed to encode object");
        encode_entry(&mut buf, LogEntryType::Object, &payload);
        count += 1;
    }
    (buf, count)
}
