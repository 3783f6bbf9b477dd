//! Redis-backed job broker.
//!
//! Layout, all under a per-queue prefix: the job record as a JSON value at
//! `job:{id}`, the FIFO waiting list, an active id set, and a capped list of
//! recent processing durations. Retention rides on native key expiry set at
//! the terminal transition. The restart signal is the shared, unprefixed
//! `worker:restart` key.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use uuid::Uuid;

use job_types::{now_millis, JobRecord, JobState, SplitResult};

use super::{JobBroker, QueueError, ETA_SAMPLE_LIMIT, RESTART_KEY};

/// Broker over a shared Redis instance.
pub struct RedisBroker {
    manager: ConnectionManager,
    prefix: String,
}

impl RedisBroker {
    /// Connects and namespaces every key under `queue`.
    pub async fn connect(url: &str, queue: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(url)?;
        let manager = client.get_connection_manager().await?;
        Ok(Self {
            manager,
            prefix: format!("printsplit:{}", queue),
        })
    }

    fn job_key(&self, id: Uuid) -> String {
        format!("{}:job:{}", self.prefix, id)
    }

    fn waiting_key(&self) -> String {
        format!("{}:waiting", self.prefix)
    }

    fn active_key(&self) -> String {
        format!("{}:active", self.prefix)
    }

    fn durations_key(&self) -> String {
        format!("{}:durations", self.prefix)
    }

    async fn load(&self, id: Uuid) -> Result<Option<JobRecord>, QueueError> {
        let mut con = self.manager.clone();
        let raw: Option<String> = con.get(self.job_key(id)).await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, record: &JobRecord) -> Result<(), QueueError> {
        let mut con = self.manager.clone();
        let json = serde_json::to_string(record)?;
        let _: () = con.set(self.job_key(record.id), json).await?;
        Ok(())
    }

    /// Load, mutate, save. Returns false when the record no longer exists.
    async fn update<F>(&self, id: Uuid, mutate: F) -> Result<bool, QueueError>
    where
        F: FnOnce(&mut JobRecord) + Send,
    {
        match self.load(id).await? {
            Some(mut record) => {
                mutate(&mut record);
                self.save(&record).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Terminal bookkeeping: detach from the live lists and start the
    /// retention clock on the record key.
    async fn finish(&self, id: Uuid, retention: Duration) -> Result<(), QueueError> {
        let mut con = self.manager.clone();
        let _: i64 = con.lrem(self.waiting_key(), 0, id.to_string()).await?;
        let _: i64 = con.srem(self.active_key(), id.to_string()).await?;
        let _: bool = con
            .expire(self.job_key(id), retention.as_secs().max(1) as i64)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl JobBroker for RedisBroker {
    async fn enqueue(&self, record: JobRecord) -> Result<(), QueueError> {
        self.save(&record).await?;
        let mut con = self.manager.clone();
        let _: i64 = con.rpush(self.waiting_key(), record.id.to_string()).await?;
        Ok(())
    }

    async fn fetch_next(&self, lock: Duration) -> Result<Option<JobRecord>, QueueError> {
        let mut con = self.manager.clone();
        let popped: Option<String> = con.lpop(self.waiting_key(), None).await?;
        let Some(raw_id) = popped else {
            return Ok(None);
        };
        let Ok(id) = Uuid::parse_str(&raw_id) else {
            return Ok(None);
        };

        let now = now_millis();
        let updated = self
            .update(id, |record| {
                record.state = JobState::Active;
                record.processed_at_ms = Some(now);
                record.lock_expires_at_ms = Some(now + lock.as_millis() as u64);
            })
            .await?;
        if !updated {
            // Record expired between push and pop; nothing to run.
            return Ok(None);
        }
        let _: i64 = con.sadd(self.active_key(), raw_id).await?;
        self.load(id).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<JobRecord>, QueueError> {
        self.load(id).await
    }

    async fn publish_progress(
        &self,
        id: Uuid,
        percent: u8,
        message: &str,
    ) -> Result<(), QueueError> {
        self.update(id, |record| {
            record.progress = percent.min(100);
            record.progress_message = Some(message.to_string());
        })
        .await?;
        Ok(())
    }

    async fn renew_lock(&self, id: Uuid, lock: Duration) -> Result<(), QueueError> {
        let deadline = now_millis() + lock.as_millis() as u64;
        self.update(id, |record| {
            record.lock_expires_at_ms = Some(deadline);
        })
        .await?;
        Ok(())
    }

    async fn complete(
        &self,
        id: Uuid,
        result: SplitResult,
        retention: Duration,
    ) -> Result<(), QueueError> {
        let now = now_millis();
        let mut sample = None;
        self.update(id, |record| {
            record.state = JobState::Completed;
            record.result = Some(result);
            record.finished_at_ms = Some(now);
            record.progress = 100;
            record.lock_expires_at_ms = None;
            sample = record.processing_millis();
        })
        .await?;

        if let Some(millis) = sample {
            let mut con = self.manager.clone();
            let _: i64 = con.lpush(self.durations_key(), millis).await?;
            let _: () = con
                .ltrim(self.durations_key(), 0, ETA_SAMPLE_LIMIT as isize - 1)
                .await?;
        }
        self.finish(id, retention).await
    }

    async fn fail(&self, id: Uuid, error: &str, retention: Duration) -> Result<(), QueueError> {
        let now = now_millis();
        self.update(id, |record| {
            record.state = JobState::Failed;
            record.error = Some(error.to_string());
            record.finished_at_ms = Some(now);
            record.lock_expires_at_ms = None;
        })
        .await?;
        self.finish(id, retention).await
    }

    async fn set_cancelled(&self, id: Uuid) -> Result<bool, QueueError> {
        self.update(id, |record| {
            record.payload.cancelled = true;
        })
        .await
    }

    async fn is_cancelled(&self, id: Uuid) -> Result<bool, QueueError> {
        Ok(self
            .load(id)
            .await?
            .is_some_and(|record| record.payload.cancelled))
    }

    async fn remove_waiting(&self, id: Uuid) -> Result<bool, QueueError> {
        let mut con = self.manager.clone();
        let removed: i64 = con.lrem(self.waiting_key(), 0, id.to_string()).await?;
        if removed > 0 {
            let _: i64 = con.del(self.job_key(id)).await?;
            return Ok(true);
        }
        Ok(false)
    }

    async fn waiting_ids(&self) -> Result<Vec<Uuid>, QueueError> {
        let mut con = self.manager.clone();
        let raw: Vec<String> = con.lrange(self.waiting_key(), 0, -1).await?;
        Ok(raw
            .iter()
            .filter_map(|s| Uuid::parse_str(s).ok())
            .collect())
    }

    async fn active_ids(&self) -> Result<Vec<Uuid>, QueueError> {
        let mut con = self.manager.clone();
        let raw: Vec<String> = con.smembers(self.active_key()).await?;
        Ok(raw
            .iter()
            .filter_map(|s| Uuid::parse_str(s).ok())
            .collect())
    }

    async fn recent_processing_millis(&self, limit: usize) -> Result<Vec<u64>, QueueError> {
        let mut con = self.manager.clone();
        let raw: Vec<String> = con
            .lrange(self.durations_key(), 0, limit as isize - 1)
            .await?;
        Ok(raw.iter().filter_map(|s| s.parse().ok()).collect())
    }

    async fn record_stall(&self, id: Uuid) -> Result<u32, QueueError> {
        let mut stalls = 0;
        self.update(id, |record| {
            record.stalls += 1;
            stalls = record.stalls;
        })
        .await?;
        Ok(stalls)
    }

    async fn request_restart(&self, ttl: Duration) -> Result<(), QueueError> {
        let mut con = self.manager.clone();
        let _: () = con
            .set_ex(RESTART_KEY, "1", ttl.as_secs().max(1))
            .await?;
        Ok(())
    }

    async fn restart_requested(&self) -> Result<bool, QueueError> {
        let mut con = self.manager.clone();
        Ok(con.exists(RESTART_KEY).await?)
    }

    async fn sweep_retention(&self) -> Result<u32, QueueError> {
        // Retention is enforced by key expiry.
        Ok(0)
    }

    async fn clean_state(&self, state: JobState) -> Result<u32, QueueError> {
        let mut con = self.manager.clone();
        let mut removed = 0;

        let ids: Vec<Uuid> = match state {
            JobState::Waiting => self.waiting_ids().await?,
            JobState::Active => self.active_ids().await?,
            _ => {
                // Terminal records are only reachable through their keys.
                let pattern = format!("{}:job:*", self.prefix);
                let keys: Vec<String> = con.keys(pattern).await?;
                let mut terminal = Vec::new();
                for key in keys {
                    if let Some(raw_id) = key.rsplit(':').next() {
                        if let Ok(id) = Uuid::parse_str(raw_id) {
                            if let Some(record) = self.load(id).await? {
                                if record.state == state {
                                    terminal.push(id);
                                }
                            }
                        }
                    }
                }
                terminal
            }
        };

        for id in ids {
            if let Some(record) = self.load(id).await? {
                if record.state != state {
                    continue;
                }
            } else {
                continue;
            }
            let _: i64 = con.del(self.job_key(id)).await?;
            let _: i64 = con.lrem(self.waiting_key(), 0, id.to_string()).await?;
            let _: i64 = con.srem(self.active_key(), id.to_string()).await?;
            removed += 1;
        }
        Ok(removed)
    }
}
