//! # Queue Broker
//!
//! Durable job submission and state transitions behind a trait, with a Redis
//! implementation for production and an in-memory double for tests. Two
//! sibling queues share the broker: split (the engine's critical path) and
//! repair, structurally identical with its own timeouts.
//!
//! The broker owns every lifecycle transition: waiting jobs sit in a FIFO
//! list, a fetch moves one to active under a worker lock, and terminal
//! transitions record the outcome and start the retention clock. Failed jobs
//! are never re-enqueued.

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use job_types::{
    JobRecord, JobState, QueuePosition, SplitResult, DEFAULT_AVG_PROCESSING_SECS,
};

pub mod memory;
pub mod redis;

pub use memory::MemoryBroker;
pub use redis::RedisBroker;

/// Broker key that asks every worker to exit for restart.
pub const RESTART_KEY: &str = "worker:restart";

/// TTL on the restart key so a missed signal cannot wedge future workers.
pub const RESTART_TTL: Duration = Duration::from_secs(60);

/// Completed-job samples consulted for wait estimates.
pub const ETA_SAMPLE_LIMIT: usize = 20;

/// Per-queue processing limits and retention.
#[derive(Debug, Clone, Copy)]
pub struct QueuePolicy {
    pub name: &'static str,

    /// Failed jobs are not retried; the typical failure is a bad input.
    pub attempts: u32,

    /// Hard deadline for one job.
    pub job_timeout: Duration,

    /// Worker lock on an active job.
    pub lock_duration: Duration,

    pub lock_renew_interval: Duration,

    pub stall_check_interval: Duration,

    /// Lock expiries tolerated before the job is failed.
    pub max_stalls: u32,

    pub completed_retention: Duration,

    pub failed_retention: Duration,
}

impl QueuePolicy {
    /// The split queue: 15 minute jobs under a 16 minute lock renewed every
    /// 30 seconds.
    pub fn split() -> Self {
        Self {
            name: "split",
            attempts: 1,
            job_timeout: Duration::from_secs(15 * 60),
            lock_duration: Duration::from_secs(16 * 60),
            lock_renew_interval: Duration::from_secs(30),
            stall_check_interval: Duration::from_secs(60),
            max_stalls: 1,
            completed_retention: Duration::from_secs(48 * 3600),
            failed_retention: Duration::from_secs(7 * 24 * 3600),
        }
    }

    /// The repair queue: same structure, roomier deadlines for mesh repair.
    pub fn repair() -> Self {
        Self {
            name: "repair",
            job_timeout: Duration::from_secs(30 * 60),
            lock_duration: Duration::from_secs(31 * 60),
            ..Self::split()
        }
    }

    /// Applies the configured retention horizon; failed jobs keep the 7 to 2
    /// day ratio of the defaults.
    pub fn with_retention_hours(mut self, hours: u64) -> Self {
        self.completed_retention = Duration::from_secs(hours * 3600);
        self.failed_retention = Duration::from_secs(hours * 3600 * 7 / 2);
        self
    }
}

/// Durable queue operations shared by workers and the HTTP surface.
#[async_trait]
pub trait JobBroker: Send + Sync {
    /// Adds a waiting job.
    async fn enqueue(&self, record: JobRecord) -> Result<(), QueueError>;

    /// Pops the oldest waiting job, marks it active, and takes the worker
    /// lock for `lock`.
    async fn fetch_next(&self, lock: Duration) -> Result<Option<JobRecord>, QueueError>;

    async fn get(&self, id: Uuid) -> Result<Option<JobRecord>, QueueError>;

    /// Single-writer progress update, observed by status readers.
    async fn publish_progress(
        &self,
        id: Uuid,
        percent: u8,
        message: &str,
    ) -> Result<(), QueueError>;

    async fn renew_lock(&self, id: Uuid, lock: Duration) -> Result<(), QueueError>;

    async fn complete(
        &self,
        id: Uuid,
        result: SplitResult,
        retention: Duration,
    ) -> Result<(), QueueError>;

    async fn fail(&self, id: Uuid, error: &str, retention: Duration) -> Result<(), QueueError>;

    /// Flags cooperative cancellation on the payload. Returns false when the
    /// job does not exist.
    async fn set_cancelled(&self, id: Uuid) -> Result<bool, QueueError>;

    async fn is_cancelled(&self, id: Uuid) -> Result<bool, QueueError>;

    /// Removes a waiting job outright. Returns false when it is not waiting.
    async fn remove_waiting(&self, id: Uuid) -> Result<bool, QueueError>;

    /// Waiting job ids in queue order.
    async fn waiting_ids(&self) -> Result<Vec<Uuid>, QueueError>;

    async fn active_ids(&self) -> Result<Vec<Uuid>, QueueError>;

    /// Wall-clock processing times of recently completed jobs, milliseconds.
    async fn recent_processing_millis(&self, limit: usize) -> Result<Vec<u64>, QueueError>;

    /// Increments and returns the stall counter for an active job.
    async fn record_stall(&self, id: Uuid) -> Result<u32, QueueError>;

    async fn request_restart(&self, ttl: Duration) -> Result<(), QueueError>;

    async fn restart_requested(&self) -> Result<bool, QueueError>;

    /// Reclaims terminal records past their retention deadline. Brokers with
    /// native key expiry return zero.
    async fn sweep_retention(&self) -> Result<u32, QueueError>;

    /// Admin: removes every job in `state`, returning the count.
    async fn clean_state(&self, state: JobState) -> Result<u32, QueueError>;
}

/// Queue position and wait estimate for one job.
///
/// The estimate divides the jobs ahead across the active workers and scales
/// by the recent average processing time, defaulting to two minutes before
/// any job has completed.
pub async fn queue_position(
    broker: &dyn JobBroker,
    id: Uuid,
) -> Result<Option<QueuePosition>, QueueError> {
    let Some(record) = broker.get(id).await? else {
        return Ok(None);
    };
    let total_waiting = broker.waiting_ids().await?.len() as u32;

    if record.state != JobState::Waiting {
        return Ok(Some(QueuePosition {
            state: record.state,
            position: 0,
            total_waiting,
            estimated_wait_time: 0,
        }));
    }

    let waiting = broker.waiting_ids().await?;
    let jobs_ahead = waiting.iter().position(|w| *w == id).unwrap_or(0) as u64;
    let active = (broker.active_ids().await?.len() as u64).max(1);

    let samples = broker.recent_processing_millis(ETA_SAMPLE_LIMIT).await?;
    let avg_millis = if samples.is_empty() {
        DEFAULT_AVG_PROCESSING_SECS * 1000
    } else {
        samples.iter().sum::<u64>() / samples.len() as u64
    };

    Ok(Some(QueuePosition {
        state: record.state,
        position: jobs_ahead as u32 + 1,
        total_waiting,
        estimated_wait_time: jobs_ahead * avg_millis / active / 1000,
    }))
}

/// Broker failures.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("broker backend error: {0}")]
    Backend(String),

    #[error("record serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<::redis::RedisError> for QueueError {
    fn from(err: ::redis::RedisError) -> Self {
        QueueError::Backend(err.to_string())
    }
}
