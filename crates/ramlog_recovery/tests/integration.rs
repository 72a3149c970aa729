//! Integration tests for crash recovery.

use proptest::prelude::*;
use ramlog_core::{
    IndexedVersion, Log, LogCleaner, LogConfig, LogEntryType, LogError, NullReplicaManager,
    ObjectIndex, ServerId, TableId,
};
use ramlog_recovery::{
    RecoverRequest, RecoveryConfig, RecoveryError, RecoveryMaster, Replica, ReplicaState, Tablet,
    TabletState,
};
use ramlog_testkit::prelude::*;
use std::sync::Arc;
use std::time::Duration;

const T: TableId = TableId(1);
const CRASHED: ServerId = ServerId(99);
const BACKUP_A: ServerId = ServerId(10);
const BACKUP_B: ServerId = ServerId(11);

fn config() -> RecoveryConfig {
    RecoveryConfig::new()
        .with_max_concurrent_fetches(4)
        .with_worker_threads(4)
        .with_fetch_timeout(Duration::from_secs(5))
}

fn master_for(
    node: &TestNode,
    cluster: &MockBackupCluster,
    config: RecoveryConfig,
) -> (RecoveryMaster, Arc<RecordingAuthority>) {
    let authority = Arc::new(RecordingAuthority::new());
    let master = node.recovery_master(config, Arc::new(cluster.clone()), authority.clone());
    (master, authority)
}

fn indexed(node: &TestNode, key: &[u8]) -> IndexedVersion {
    IndexedVersion::lookup(&node.log, node.index.as_ref(), T, key)
        .unwrap()
        .0
}

fn one_object_segment(key: &[u8], version: u64) -> bytes::Bytes {
    EntryBuilder::new().object(T, key, version, b"value").build()
}

#[test]
fn failed_replica_falls_over_to_next_backup() {
    init_tracing();
    let cluster = MockBackupCluster::new();
    cluster.store(BACKUP_A, 7, one_object_segment(b"x", 1));
    cluster.store(BACKUP_B, 7, one_object_segment(b"x", 1));
    cluster.set_behavior(BACKUP_A, 7, BackupBehavior::TransportFailure);

    let node = TestNode::new(2);
    let (master, _) = master_for(&node, &cluster, config());
    let mut rows = vec![Replica::new(BACKUP_A, 7), Replica::new(BACKUP_B, 7)];

    let stats = master.recover(CRASHED, 0, &mut rows).unwrap();
    assert_eq!(stats.segments_recovered, 1);
    assert_eq!(stats.fetch_failures, 1);
    assert!(rows.iter().all(|r| r.state == ReplicaState::Ok));
    assert_eq!(indexed(&node, b"x"), IndexedVersion::Object(1));
}

#[test]
fn segment_without_working_replica_is_unrecoverable() {
    let cluster = MockBackupCluster::new();
    cluster.store(BACKUP_A, 9, one_object_segment(b"x", 1));
    cluster.set_behavior(BACKUP_A, 9, BackupBehavior::TransportFailure);

    let node = TestNode::new(2);
    let (master, _) = master_for(&node, &cluster, config());
    let mut rows = vec![Replica::new(BACKUP_A, 9)];

    let err = master.recover(CRASHED, 0, &mut rows).unwrap_err();
    match err {
        RecoveryError::UnrecoverableSegments {
            crashed, segments, ..
        } => {
            assert_eq!(crashed, CRASHED);
            assert_eq!(segments, vec![9]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(rows[0].state, ReplicaState::Failed);
}

#[test]
fn older_tombstone_does_not_delete_newer_object() {
    let node = TestNode::new(2);
    let (master, _) = master_for(&node, &MockBackupCluster::new(), config());
    let buffer = EntryBuilder::new()
        .object(T, b"x", 3, b"three")
        .tombstone(T, b"x", 1, 2)
        .build();

    let stats = master.recover_segment(1, &buffer).unwrap();
    assert_eq!(stats.tombstones_discarded, 1);
    assert_eq!(indexed(&node, b"x"), IndexedVersion::Object(3));
    assert_eq!(node.read(T, b"x").unwrap().data.as_ref(), b"three");
}

#[test]
fn newer_object_frees_older() {
    let node = TestNode::new(2);
    let (master, _) = master_for(&node, &MockBackupCluster::new(), config());
    let buffer = EntryBuilder::new()
        .object(T, b"x", 2, b"two")
        .object(T, b"x", 5, b"five")
        .build();

    master.recover_segment(1, &buffer).unwrap();
    assert_eq!(node.read(T, b"x").unwrap().version, 5);
    assert!(node.log.stats().total_bytes_freed > 0);
}

#[test]
fn allocate_head_without_free_segments_is_out_of_memory() {
    // Two segments: one reserved for the cleaner, one held back as the head
    // reserve while nothing is waiting to be freed.
    let config = LogConfig::new()
        .log_capacity(2 * 16_384)
        .segment_capacity(16_384)
        .max_bytes_per_append(8192);
    let log = Log::new(ServerId::new(1), config, Arc::new(NullReplicaManager)).unwrap();
    let err = log.allocate_head().unwrap_err();
    assert!(matches!(err, LogError::OutOfMemory { .. }));
    assert!(err.is_retryable());
}

#[test]
fn crashed_node_is_rebuilt_on_another() {
    init_tracing();
    let crashed = TestNode::new(1);
    for i in 0..200u32 {
        let key = format!("key{}", i % 50);
        crashed.write(T, key.as_bytes(), format!("value{i}").as_bytes());
    }
    crashed.write(TableId(2), b"other", b"not in this partition");
    crashed.remove(T, b"key7");
    crashed.remove(T, b"key8");
    crashed.write(T, b"key8", b"back again");
    crashed.log.sync().unwrap();

    let cluster = MockBackupCluster::new();
    let tablets = vec![Tablet::whole_table(T)];
    let replicas = cluster.store_replicas(
        &[BACKUP_A, BACKUP_B],
        &crashed.replicas.snapshots(),
        &tablets,
    );
    assert!(replicas.len() >= 4);

    let survivor = TestNode::new(2);
    let (master, authority) = master_for(&survivor, &cluster, config());
    let stats = master
        .recover_partition(RecoverRequest {
            crashed: crashed.server_id,
            partition_id: 0,
            tablets: tablets.clone(),
            replicas,
        })
        .unwrap();
    assert!(stats.segments_recovered >= 2);
    assert_eq!(cluster.duplicate_fetches(), 0);

    for i in 0..50u32 {
        let key = format!("key{i}");
        assert_eq!(
            survivor.read(T, key.as_bytes()),
            crashed.read(T, key.as_bytes()),
            "{key}"
        );
    }
    assert!(survivor.read(T, b"key7").is_none());
    assert_eq!(survivor.read(T, b"key8").unwrap().data.as_ref(), b"back again");
    assert!(survivor.read(TableId(2), b"other").is_none());

    // Tombstones only live in the index while replaying.
    let mut tombstones = 0;
    survivor.index.remove_where(&mut |_, _, handle| {
        if handle.entry_type() == LogEntryType::ObjectTombstone {
            tombstones += 1;
        }
        false
    });
    assert_eq!(tombstones, 0);

    let owned = master.tablets();
    assert_eq!(owned.len(), 1);
    assert_eq!(owned[0].state, TabletState::Normal);
    assert_eq!(owned[0].server_id, survivor.server_id);
    let recovered = authority.recovered();
    assert_eq!(recovered.len(), 1);
    assert_eq!(recovered[0].0, survivor.server_id);

    // The survivor keeps versions increasing past what it recovered.
    let before = survivor.read(T, b"key3").unwrap().version;
    assert_eq!(survivor.write(T, b"key3", b"new"), before + 1);
}

#[test]
fn fetches_in_flight_stay_within_limit() {
    let cluster = MockBackupCluster::new();
    let mut rows = Vec::new();
    for segment in 1..=12u64 {
        let key = format!("key{segment}");
        for backup in [BACKUP_A, BACKUP_B] {
            cluster.store(backup, segment, one_object_segment(key.as_bytes(), 1));
            cluster.set_behavior(backup, segment, BackupBehavior::Delay(Duration::from_millis(5)));
            rows.push(Replica::new(backup, segment));
        }
    }

    let node = TestNode::new(2);
    let config = config()
        .with_max_concurrent_fetches(3)
        .with_worker_threads(8);
    let (master, _) = master_for(&node, &cluster, config);
    let stats = master.recover(CRASHED, 0, &mut rows).unwrap();

    assert_eq!(stats.segments_recovered, 12);
    assert!(cluster.max_in_flight() <= 3);
    assert!(cluster.max_in_flight() >= 1);
    assert_eq!(cluster.duplicate_fetches(), 0);
    // One successful fetch per segment; second replicas are never asked.
    assert_eq!(cluster.total_attempts(), 12);
}

#[test]
fn not_ready_backup_is_asked_again() {
    let cluster = MockBackupCluster::new();
    cluster.store(BACKUP_A, 3, one_object_segment(b"x", 4));
    cluster.set_behavior(BACKUP_A, 3, BackupBehavior::NotReady(3));

    let node = TestNode::new(2);
    let (master, _) = master_for(&node, &cluster, config());
    let mut rows = vec![Replica::new(BACKUP_A, 3)];

    let stats = master.recover(CRASHED, 0, &mut rows).unwrap();
    assert_eq!(stats.retries, 3);
    assert_eq!(stats.fetches_started, 4);
    assert_eq!(stats.fetch_failures, 0);
    assert_eq!(cluster.attempts(BACKUP_A, 3), 4);
    assert_eq!(indexed(&node, b"x"), IndexedVersion::Object(4));
}

#[test]
fn unknown_and_unreachable_backups_are_skipped() {
    let cluster = MockBackupCluster::new();
    cluster.set_unreachable(BACKUP_A);
    cluster.store(BACKUP_B, 5, one_object_segment(b"x", 1));

    let node = TestNode::new(2);
    let (master, _) = master_for(&node, &cluster, config());
    let mut rows = vec![
        Replica::new(ServerId::new(42), 5),
        Replica::new(BACKUP_A, 5),
        Replica::new(BACKUP_B, 5),
    ];

    let stats = master.recover(CRASHED, 0, &mut rows).unwrap();
    assert_eq!(stats.fetch_failures, 2);
    assert_eq!(cluster.attempts(BACKUP_B, 5), 1);
}

#[test]
fn corrupt_replica_falls_over_to_intact_copy() {
    let full = EntryBuilder::new()
        .object(T, b"a", 1, b"one")
        .object(T, b"b", 1, b"two");
    let cluster = MockBackupCluster::new();
    cluster.store(BACKUP_A, 6, full.clone().truncate(4).build());
    cluster.store(BACKUP_B, 6, full.build());

    let node = TestNode::new(2);
    let (master, _) = master_for(&node, &cluster, config());
    let mut rows = vec![Replica::new(BACKUP_A, 6), Replica::new(BACKUP_B, 6)];

    let stats = master.recover(CRASHED, 0, &mut rows).unwrap();
    assert_eq!(stats.fetch_failures, 1);
    assert_eq!(indexed(&node, b"a"), IndexedVersion::Object(1));
    assert_eq!(indexed(&node, b"b"), IndexedVersion::Object(1));
}

#[test]
fn request_errors_and_timeouts_fall_over() {
    let cluster = MockBackupCluster::new();
    for segment in [1u64, 2] {
        let key = format!("key{segment}");
        cluster.store(BACKUP_A, segment, one_object_segment(key.as_bytes(), 1));
        cluster.store(BACKUP_B, segment, one_object_segment(key.as_bytes(), 1));
    }
    cluster.set_behavior(BACKUP_A, 1, BackupBehavior::RequestError);
    cluster.set_behavior(BACKUP_A, 2, BackupBehavior::Delay(Duration::from_millis(300)));

    let node = TestNode::new(2);
    let config = config().with_fetch_timeout(Duration::from_millis(20));
    let (master, _) = master_for(&node, &cluster, config);
    let mut rows = vec![
        Replica::new(BACKUP_A, 1),
        Replica::new(BACKUP_B, 1),
        Replica::new(BACKUP_A, 2),
        Replica::new(BACKUP_B, 2),
    ];

    let stats = master.recover(CRASHED, 0, &mut rows).unwrap();
    assert_eq!(stats.segments_recovered, 2);
    assert_eq!(stats.fetch_failures, 2);
}

#[test]
fn hung_backup_does_not_hold_up_recovery() {
    let cluster = MockBackupCluster::new();
    cluster.store(BACKUP_A, 1, one_object_segment(b"x", 1));
    cluster.store(BACKUP_B, 1, one_object_segment(b"x", 1));
    cluster.set_behavior(BACKUP_A, 1, BackupBehavior::Delay(Duration::from_secs(3)));

    let node = TestNode::new(2);
    let config = config()
        .with_worker_threads(1)
        .with_fetch_timeout(Duration::from_millis(50));
    let (master, _) = master_for(&node, &cluster, config);
    let mut rows = vec![Replica::new(BACKUP_A, 1), Replica::new(BACKUP_B, 1)];

    let started = std::time::Instant::now();
    let stats = master.recover(CRASHED, 0, &mut rows).unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(stats.segments_recovered, 1);
    assert_eq!(rows[0].state, ReplicaState::Failed);
    assert_eq!(indexed(&node, b"x"), IndexedVersion::Object(1));
}

#[test]
fn replayed_tombstone_survives_cleaning() {
    let cluster = MockBackupCluster::new();
    let node = TestNode::new(2);
    let (master, _) = master_for(&node, &cluster, config());
    let tombstone = EntryBuilder::new().tombstone(T, b"x", 999, 4).build();
    master.recover_segment(1, &tombstone).unwrap();

    node.log.allocate_head().unwrap();
    let pass = LogCleaner::new(Arc::clone(&node.log)).run_pass().unwrap();
    assert_eq!(pass.entries_dropped, 0);
    node.log.allocate_head().unwrap();

    let stats = master.recover_segment(2, &one_object_segment(b"x", 3)).unwrap();
    assert_eq!(stats.objects_discarded, 1);
    assert_eq!(indexed(&node, b"x"), IndexedVersion::Tombstone(4));
}

#[test]
fn failed_partition_claims_no_tablets() {
    let cluster = MockBackupCluster::new();
    cluster.store(BACKUP_A, 1, one_object_segment(b"x", 1));
    let node = TestNode::new(2);
    let (master, authority) = master_for(&node, &cluster, config());

    let result = master.recover_partition(RecoverRequest {
        crashed: CRASHED,
        partition_id: 3,
        tablets: vec![Tablet::whole_table(T)],
        replicas: vec![Replica::new(BACKUP_A, 1), Replica::new(BACKUP_A, 2)],
    });

    assert!(matches!(
        result,
        Err(RecoveryError::UnrecoverableSegments { partition_id: 3, .. })
    ));
    assert!(master.tablets().is_empty());
    assert!(authority.recovered().is_empty());
    assert!(node.read(T, b"x").is_none());
    assert_eq!(indexed(&node, b"x"), IndexedVersion::Absent);
}

#[test]
fn refused_ownership_drops_tablets() {
    let cluster = MockBackupCluster::new();
    cluster.store(BACKUP_A, 1, one_object_segment(b"x", 1));
    let node = TestNode::new(2);
    let (master, authority) = master_for(&node, &cluster, config());
    authority.refuse();

    let result = master.recover_partition(RecoverRequest {
        crashed: CRASHED,
        partition_id: 0,
        tablets: vec![Tablet::whole_table(T)],
        replicas: vec![Replica::new(BACKUP_A, 1)],
    });

    assert!(matches!(result, Err(RecoveryError::Ownership { .. })));
    assert!(master.tablets().is_empty());
    assert!(node.read(T, b"x").is_none());
}

#[test]
fn ingest_replays_migrated_data() {
    let node = TestNode::new(2);
    let (master, _) = master_for(&node, &MockBackupCluster::new(), config());
    let buffer = EntryBuilder::new()
        .object(T, b"moved", 8, b"payload")
        .build();

    let stats = master.ingest_segment(&buffer).unwrap();
    assert_eq!(stats.objects_appended, 1);
    assert_eq!(node.read(T, b"moved").unwrap().version, 8);
    assert!(node.replicas.sync_count() >= 1);
}

#[test]
fn replay_order_does_not_matter() {
    let buffer_a = EntryBuilder::new()
        .object(T, b"k", 1, b"1")
        .tombstone(T, b"k", 1, 1)
        .object(T, b"k", 2, b"2")
        .build();
    let buffer_b = EntryBuilder::new()
        .object(T, b"k", 2, b"2")
        .object(T, b"k", 1, b"1")
        .tombstone(T, b"k", 1, 1)
        .build();

    for (first, second) in [(&buffer_a, &buffer_b), (&buffer_b, &buffer_a)] {
        let node = TestNode::new(2);
        let (master, _) = master_for(&node, &MockBackupCluster::new(), config());
        master.recover_segment(1, first).unwrap();
        master.recover_segment(2, second).unwrap();
        assert_eq!(indexed(&node, b"k"), IndexedVersion::Object(2));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn recovery_completes_with_one_healthy_replica_per_segment(
        faults in prop::collection::vec(
            prop::collection::vec(0u8..4, 0..3),
            1..6,
        )
    ) {
        let cluster = MockBackupCluster::new();
        let mut rows = Vec::new();
        for (i, segment_faults) in faults.iter().enumerate() {
            let segment = i as u64 + 1;
            let data = one_object_segment(format!("key{segment}").as_bytes(), 1);
            for (j, fault) in segment_faults.iter().enumerate() {
                let backup = ServerId::new(100 + j as u64);
                cluster.store(backup, segment, data.clone());
                let behavior = match *fault {
                    0 => BackupBehavior::TransportFailure,
                    1 => BackupBehavior::RequestError,
                    2 => BackupBehavior::NotReady(1),
                    _ => BackupBehavior::Serve,
                };
                cluster.set_behavior(backup, segment, behavior);
                rows.push(Replica::new(backup, segment));
            }
            cluster.store(ServerId::new(200), segment, data);
            rows.push(Replica::new(ServerId::new(200), segment));
        }

        let node = TestNode::new(2);
        let (master, _) = master_for(&node, &cluster, config().with_max_concurrent_fetches(2));
        let stats = master.recover(CRASHED, 0, &mut rows).unwrap();
        prop_assert_eq!(stats.segments_recovered, faults.len() as u64);
        prop_assert!(rows.iter().all(|r| r.state == ReplicaState::Ok));
        prop_assert_eq!(cluster.duplicate_fetches(), 0);
    }
}
