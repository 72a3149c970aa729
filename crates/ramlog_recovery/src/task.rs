//! Segment fetches.
//!
//! Fetches run on a pool of detached worker threads. Each fetch reports back
//! through a small channel that the recovery loop polls without blocking:
//! first when a worker picks the job up, then with its result. A fetch times
//! out only once a worker is on it, and the worker it leaves stuck is
//! replaced, so hung backups never hold up queued fetches or the caller.

use crate::backup::BackupClient;
use crate::error::FetchError;
use crate::scoreboard::Replica;
use bytes::Bytes;
use crossbeam::channel::{self, Receiver, Sender, TryRecvError};
use ramlog_core::{EpochGuard, ServerId};
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

type FetchReply = Result<Bytes, FetchError>;

enum FetchEvent {
    Started(Instant),
    Finished(FetchReply),
}

struct FetchJob {
    client: Arc<dyn BackupClient>,
    crashed: ServerId,
    segment_id: u64,
    partition_id: u64,
    reply: Sender<FetchEvent>,
}

/// Worker threads that carry out blocking fetches.
///
/// Workers are never joined. Once the pool is dropped each one exits after
/// its current fetch returns.
pub(crate) struct FetchPool {
    jobs: Sender<FetchJob>,
    queue: Receiver<FetchJob>,
}

impl FetchPool {
    pub(crate) fn new(threads: usize) -> io::Result<Self> {
        let (jobs, queue) = channel::unbounded::<FetchJob>();
        let pool = Self { jobs, queue };
        for _ in 0..threads {
            pool.spawn_worker()?;
        }
        Ok(pool)
    }

    fn spawn_worker(&self) -> io::Result<()> {
        let queue = self.queue.clone();
        std::thread::Builder::new()
            .name("ramlog-fetch".into())
            .spawn(move || {
                for job in queue.iter() {
                    // The task may have given up and dropped its receiver.
                    let _ = job.reply.send(FetchEvent::Started(Instant::now()));
                    let result = job.client.get_recovery_data(
                        job.crashed,
                        job.segment_id,
                        job.partition_id,
                    );
                    let _ = job.reply.send(FetchEvent::Finished(result));
                }
            })
            .map(drop)
    }

    fn submit(&self, job: FetchJob) -> Result<(), FetchError> {
        self.jobs
            .send(job)
            .map_err(|_| FetchError::Request("fetch pool shut down".into()))
    }
}

/// What a poll of a task found.
#[derive(Debug)]
pub(crate) enum TaskPoll {
    /// No result yet, or waiting to resend.
    Pending,
    /// The fetch finished.
    Done(FetchReply),
}

/// One fetch of one replica, occupying one concurrency slot.
pub(crate) struct RecoveryTask {
    pub(crate) row: usize,
    pub(crate) backup: ServerId,
    pub(crate) segment_id: u64,
    crashed: ServerId,
    partition_id: u64,
    client: Arc<dyn BackupClient>,
    reply: Receiver<FetchEvent>,
    /// Set once a worker has picked up the current attempt.
    attempt_started: Option<Instant>,
    resend_at: Option<Instant>,
    attempts: u32,
    _epoch: EpochGuard,
}

impl RecoveryTask {
    /// Submits the first fetch for `replica`.
    pub(crate) fn start(
        pool: &FetchPool,
        row: usize,
        replica: &Replica,
        client: Arc<dyn BackupClient>,
        crashed: ServerId,
        partition_id: u64,
        epoch: EpochGuard,
    ) -> Result<Self, FetchError> {
        let (tx, rx) = channel::bounded(2);
        let mut task = Self {
            row,
            backup: replica.backup_id,
            segment_id: replica.segment_id,
            crashed,
            partition_id,
            client,
            reply: rx,
            attempt_started: None,
            resend_at: None,
            attempts: 0,
            _epoch: epoch,
        };
        task.send(pool, tx)?;
        Ok(task)
    }

    /// Number of fetch attempts sent.
    pub(crate) fn attempts(&self) -> u32 {
        self.attempts
    }

    fn send(&mut self, pool: &FetchPool, reply: Sender<FetchEvent>) -> Result<(), FetchError> {
        self.attempts += 1;
        self.attempt_started = None;
        trace!(
            backup = %self.backup,
            segment_id = self.segment_id,
            attempt = self.attempts,
            "sending recovery fetch"
        );
        pool.submit(FetchJob {
            client: Arc::clone(&self.client),
            crashed: self.crashed,
            segment_id: self.segment_id,
            partition_id: self.partition_id,
            reply,
        })
    }

    /// Asks the same backup again once `at` has passed.
    pub(crate) fn schedule_resend(&mut self, at: Instant) {
        self.resend_at = Some(at);
    }

    /// Checks for a result without blocking.
    pub(crate) fn poll(&mut self, pool: &FetchPool, now: Instant, timeout: Duration) -> TaskPoll {
        if let Some(at) = self.resend_at {
            if now < at {
                return TaskPoll::Pending;
            }
            self.resend_at = None;
            let (tx, rx) = channel::bounded(2);
            self.reply = rx;
            if let Err(e) = self.send(pool, tx) {
                return TaskPoll::Done(Err(e));
            }
            return TaskPoll::Pending;
        }
        loop {
            match self.reply.try_recv() {
                Ok(FetchEvent::Started(at)) => self.attempt_started = Some(at),
                Ok(FetchEvent::Finished(result)) => return TaskPoll::Done(result),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.replace_worker(pool);
                    return TaskPoll::Done(Err(FetchError::Request(
                        "fetch worker dropped the reply".into(),
                    )));
                }
            }
        }
        match self.attempt_started {
            Some(at) if now.saturating_duration_since(at) >= timeout => {
                self.replace_worker(pool);
                TaskPoll::Done(Err(FetchError::Timeout(timeout)))
            }
            _ => TaskPoll::Pending,
        }
    }

    /// The worker on this fetch is lost to the pool; start another in its
    /// place.
    fn replace_worker(&self, pool: &FetchPool) {
        if let Err(e) = pool.spawn_worker() {
            debug!(segment_id = self.segment_id, error = %e, "fetch worker not replaced");
        }
    }
}
