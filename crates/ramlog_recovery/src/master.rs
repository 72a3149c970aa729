//! The recovery master: rebuilds a partition of a crashed server from
//! replicas held by backups.

use crate::backup::BackupDirectory;
use crate::config::RecoveryConfig;
use crate::error::{FetchError, RecoveryError, RecoveryResult};
use crate::replay::{ReplayStats, SegmentReplayer};
use crate::scoreboard::{Replica, Scoreboard};
use crate::tablet::{OwnershipAuthority, RecoverRequest, Tablet, TabletState};
use crate::task::{FetchPool, RecoveryTask, TaskPoll};
use bytes::Bytes;
use parking_lot::Mutex;
use ramlog_core::{Log, LogEntryType, ObjectIndex, ServerId};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Counters for one recovery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Distinct segments replayed.
    pub segments_recovered: u64,
    /// Fetch attempts sent, resends included.
    pub fetches_started: u64,
    /// Replicas given up on.
    pub fetch_failures: u64,
    /// Not-ready answers that led to a resend.
    pub retries: u64,
    /// Replay counters over all segments.
    pub replay: ReplayStats,
    /// Wall time of the whole recovery.
    pub total_time: Duration,
    /// Time spent replaying.
    pub replay_time: Duration,
}

/// Rebuilds partitions of crashed servers into the local log.
pub struct RecoveryMaster {
    server_id: ServerId,
    config: RecoveryConfig,
    log: Arc<Log>,
    index: Arc<dyn ObjectIndex>,
    replayer: SegmentReplayer,
    directory: Arc<dyn BackupDirectory>,
    authority: Arc<dyn OwnershipAuthority>,
    tablets: Mutex<Vec<Tablet>>,
}

impl std::fmt::Debug for RecoveryMaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryMaster")
            .field("server_id", &self.server_id)
            .field("config", &self.config)
            .field("tablets", &self.tablets.lock().len())
            .finish_non_exhaustive()
    }
}

impl RecoveryMaster {
    /// Creates a recovery master that replays into `log` and `index`.
    pub fn new(
        server_id: ServerId,
        config: RecoveryConfig,
        log: Arc<Log>,
        index: Arc<dyn ObjectIndex>,
        directory: Arc<dyn BackupDirectory>,
        authority: Arc<dyn OwnershipAuthority>,
    ) -> RecoveryResult<Self> {
        config.validate()?;
        let replayer = SegmentReplayer::new(
            Arc::clone(&log),
            Arc::clone(&index),
            config.progress_interval_bytes,
        );
        Ok(Self {
            server_id,
            config,
            log,
            index,
            replayer,
            directory,
            authority,
            tablets: Mutex::new(Vec::new()),
        })
    }

    /// This server's id.
    #[must_use]
    pub fn server_id(&self) -> ServerId {
        self.server_id
    }

    /// The log recovered data lands in.
    #[must_use]
    pub fn log(&self) -> &Arc<Log> {
        &self.log
    }

    /// Tablets this master knows about, recovering or owned.
    #[must_use]
    pub fn tablets(&self) -> Vec<Tablet> {
        self.tablets.lock().clone()
    }

    /// Replays one buffer of recovery data.
    pub fn recover_segment(&self, segment_id: u64, buffer: &[u8]) -> RecoveryResult<ReplayStats> {
        self.replayer.recover_segment(Some(segment_id), buffer)
    }

    /// Replays data handed over outside crash recovery (for example a
    /// migrated tablet) and waits until it is durable.
    pub fn ingest_segment(&self, buffer: &[u8]) -> RecoveryResult<ReplayStats> {
        let stats = self.replayer.recover_segment(None, buffer)?;
        self.log.sync()?;
        Ok(stats)
    }

    /// Fetches and replays every segment named in `replicas`.
    ///
    /// Each segment is replayed from exactly one replica. At most
    /// `max_concurrent_fetches` fetches are in flight, never two for the same
    /// segment. A replica that fails is marked failed and the next replica of
    /// its segment is tried; a backup that is not ready yet is asked again
    /// after `retry_delay`. Row states are left in `replicas` for the caller.
    ///
    /// Fails with [`RecoveryError::UnrecoverableSegments`] if some segment
    /// had no replica that could be fetched and replayed.
    pub fn recover(
        &self,
        crashed: ServerId,
        partition_id: u64,
        replicas: &mut [Replica],
    ) -> RecoveryResult<RecoveryStats> {
        let started = Instant::now();
        let mut stats = RecoveryStats::default();
        let pool = FetchPool::new(self.config.worker_threads)?;
        let mut board = Scoreboard::new(replicas);
        let mut slots: Vec<Option<RecoveryTask>> =
            (0..self.config.max_concurrent_fetches).map(|_| None).collect();

        info!(
            crashed = %crashed,
            partition_id,
            segments = board.segment_count(),
            "starting recovery"
        );

        loop {
            let mut progressed = false;

            for slot in &mut slots {
                let Some(task) = slot.as_mut() else {
                    continue;
                };
                let result = match task.poll(&pool, Instant::now(), self.config.fetch_timeout) {
                    TaskPoll::Pending => continue,
                    TaskPoll::Done(result) => result,
                };
                match result {
                    Err(e) if e.is_retryable() => {
                        stats.retries += 1;
                        task.schedule_resend(Instant::now() + self.config.retry_delay);
                    }
                    result => {
                        progressed = true;
                        if let Some(task) = slot.take() {
                            self.finish_task(&mut board, task, result, &mut stats)?;
                        }
                    }
                }
            }

            for slot in slots.iter_mut().filter(|slot| slot.is_none()) {
                while let Some(row) = board.next_candidate() {
                    let replica = board.row(row).clone();
                    match self.start_task(&pool, row, &replica, crashed, partition_id) {
                        Ok(task) => {
                            board.mark_waiting(row);
                            *slot = Some(task);
                            progressed = true;
                            break;
                        }
                        Err(e) => {
                            warn!(replica = %replica, error = %e, "cannot start recovery fetch");
                            stats.fetch_failures += 1;
                            board.mark_failed(row);
                        }
                    }
                }
            }

            self.log.replica_manager().proceed();

            if slots.iter().all(Option::is_none) {
                break;
            }
            if !progressed {
                std::thread::sleep(self.config.poll_interval);
            }
        }

        let unrecovered = board.unrecovered_segments();
        if !unrecovered.is_empty() {
            error!(
                crashed = %crashed,
                partition_id,
                segments = ?unrecovered,
                "recovery failed, segments have no usable replica"
            );
            return Err(RecoveryError::UnrecoverableSegments {
                crashed,
                partition_id,
                segments: unrecovered,
            });
        }

        self.log.sync()?;
        stats.total_time = started.elapsed();
        info!(
            crashed = %crashed,
            partition_id,
            segments = stats.segments_recovered,
            bytes = stats.replay.bytes_replayed,
            total_ms = stats.total_time.as_millis() as u64,
            replay_ms = stats.replay_time.as_millis() as u64,
            "recovery complete"
        );
        Ok(stats)
    }

    fn start_task(
        &self,
        pool: &FetchPool,
        row: usize,
        replica: &Replica,
        crashed: ServerId,
        partition_id: u64,
    ) -> Result<RecoveryTask, FetchError> {
        let client = self.directory.session(replica.backup_id)?;
        let task = RecoveryTask::start(
            pool,
            row,
            replica,
            client,
            crashed,
            partition_id,
            self.log.pin(),
        )?;
        debug!(
            backup = %task.backup,
            segment_id = task.segment_id,
            "started recovery fetch"
        );
        Ok(task)
    }

    /// Settles a finished fetch. Only errors from the local log end the
    /// recovery; anything wrong with the replica fails just its row.
    fn finish_task(
        &self,
        board: &mut Scoreboard<'_>,
        task: RecoveryTask,
        result: Result<Bytes, FetchError>,
        stats: &mut RecoveryStats,
    ) -> RecoveryResult<()> {
        stats.fetches_started += u64::from(task.attempts());
        let data = match result {
            Ok(data) => data,
            Err(e) => {
                warn!(
                    backup = %task.backup,
                    segment_id = task.segment_id,
                    attempts = task.attempts(),
                    error = %e,
                    "recovery fetch failed"
                );
                stats.fetch_failures += 1;
                board.mark_failed(task.row);
                return Ok(());
            }
        };

        let replay_started = Instant::now();
        let outcome = self.replayer.recover_segment(Some(task.segment_id), &data);
        stats.replay_time += replay_started.elapsed();
        match outcome {
            Ok(replayed) => {
                debug!(
                    backup = %task.backup,
                    segment_id = task.segment_id,
                    bytes = data.len(),
                    "segment recovered"
                );
                stats.replay.merge(&replayed);
                stats.segments_recovered += 1;
                board.mark_ok(task.segment_id);
                Ok(())
            }
            Err(e @ RecoveryError::CorruptSegment { .. }) => {
                warn!(
                    backup = %task.backup,
                    segment_id = task.segment_id,
                    error = %e,
                    "replica is corrupt, trying another"
                );
                stats.fetch_failures += 1;
                board.mark_failed(task.row);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Recovers one partition and takes ownership of its tablets.
    ///
    /// Ownership is claimed only after every segment has been replayed and
    /// the replayed data is durable. On any failure the partition's tablets
    /// are dropped again.
    pub fn recover_partition(&self, request: RecoverRequest) -> RecoveryResult<RecoveryStats> {
        let RecoverRequest {
            crashed,
            partition_id,
            tablets,
            mut replicas,
        } = request;
        if tablets.is_empty() {
            return Err(RecoveryError::invalid_request(format!(
                "partition {partition_id} of {crashed} has no tablets"
            )));
        }

        self.install_tablets(&tablets);
        let head = self.log.head_of_log();

        let stats = match self.recover(crashed, partition_id, &mut replicas) {
            Ok(stats) => stats,
            Err(e) => {
                self.abandon_partition(&tablets);
                return Err(e);
            }
        };

        let purged = self.remove_tombstones(&tablets);
        debug!(purged, "removed recovery tombstones from the index");

        let owned: Vec<Tablet> = tablets
            .iter()
            .map(|t| Tablet {
                server_id: self.server_id,
                ctime: head,
                ..t.clone()
            })
            .collect();
        if let Err(e) = self.authority.tablets_recovered(self.server_id, &owned) {
            warn!(crashed = %crashed, partition_id, error = %e, "ownership update refused");
            self.abandon_partition(&tablets);
            return Err(e);
        }

        let mut installed = self.tablets.lock();
        for tablet in installed.iter_mut() {
            if let Some(o) = owned.iter().find(|o| same_range(o, tablet)) {
                *tablet = Tablet {
                    state: TabletState::Normal,
                    ..o.clone()
                };
            }
        }
        info!(
            crashed = %crashed,
            partition_id,
            tablets = owned.len(),
            ctime = %head,
            "partition recovered and owned"
        );
        Ok(stats)
    }

    fn install_tablets(&self, tablets: &[Tablet]) {
        let mut installed = self.tablets.lock();
        for tablet in tablets {
            installed.retain(|t| !same_range(t, tablet));
            installed.push(Tablet {
                state: TabletState::Recovering,
                server_id: self.server_id,
                ..tablet.clone()
            });
        }
    }

    fn drop_tablets(&self, tablets: &[Tablet]) {
        self.tablets
            .lock()
            .retain(|t| !tablets.iter().any(|d| same_range(t, d)));
    }

    /// Forgets a partition whose recovery failed: its tablets and every
    /// index entry replayed into them, so none of it can be read.
    fn abandon_partition(&self, tablets: &[Tablet]) {
        self.drop_tablets(tablets);
        let mut objects = Vec::new();
        let removed = self.index.remove_where(&mut |table_id, key, handle| {
            if !tablets.iter().any(|t| t.contains(table_id, key)) {
                return false;
            }
            if handle.entry_type() == LogEntryType::Object {
                objects.push(handle);
            }
            true
        });
        for handle in objects {
            if let Err(e) = self.log.free(handle) {
                warn!(%handle, error = %e, "cannot free abandoned object");
            }
        }
        debug!(removed, "discarded partially recovered entries");
    }

    /// Tombstones only guard against older replicas during replay; once
    /// every segment is in, the index drops them.
    fn remove_tombstones(&self, tablets: &[Tablet]) -> usize {
        self.index.remove_where(&mut |table_id, key, handle| {
            handle.entry_type() == LogEntryType::ObjectTombstone
                && tablets.iter().any(|t| t.contains(table_id, key))
        })
    }
}

fn same_range(a: &Tablet, b: &Tablet) -> bool {
    a.table_id == b.table_id
        && a.start_key_hash == b.start_key_hash
        && a.end_key_hash == b.end_key_hash
}
