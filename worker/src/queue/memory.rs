//! In-memory broker double for tests and self-contained development.
//!
//! Single-process only, but the visible semantics match the Redis broker:
//! FIFO waiting list, explicit terminal transitions, retention deadlines
//! honored by `sweep_retention`.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use job_types::{now_millis, JobRecord, JobState, SplitResult};

use super::{JobBroker, QueueError, ETA_SAMPLE_LIMIT};

#[derive(Default)]
struct Inner {
    jobs: HashMap<Uuid, JobRecord>,
    waiting: VecDeque<Uuid>,
    active: Vec<Uuid>,
    recent_millis: VecDeque<u64>,
    /// Terminal job id to reclamation deadline, epoch ms.
    expirations: HashMap<Uuid, u64>,
    restart_deadline_ms: Option<u64>,
}

impl Inner {
    fn finish(&mut self, id: Uuid, retention: Duration) {
        self.active.retain(|a| *a != id);
        self.waiting.retain(|w| *w != id);
        self.expirations
            .insert(id, now_millis() + retention.as_millis() as u64);
    }
}

/// Map-backed job broker.
#[derive(Default)]
pub struct MemoryBroker {
    inner: Mutex<Inner>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobBroker for MemoryBroker {
    async fn enqueue(&self, record: JobRecord) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        let id = record.id;
        inner.jobs.insert(id, record);
        inner.waiting.push_back(id);
        Ok(())
    }

    async fn fetch_next(&self, lock: Duration) -> Result<Option<JobRecord>, QueueError> {
        let mut inner = self.inner.lock().await;
        let Some(id) = inner.waiting.pop_front() else {
            return Ok(None);
        };
        inner.active.push(id);
        let now = now_millis();
        let record = inner.jobs.get_mut(&id).expect("waiting id has a record");
        record.state = JobState::Active;
        record.processed_at_ms = Some(now);
        record.lock_expires_at_ms = Some(now + lock.as_millis() as u64);
        Ok(Some(record.clone()))
    }

    async fn get(&self, id: Uuid) -> Result<Option<JobRecord>, QueueError> {
        Ok(self.inner.lock().await.jobs.get(&id).cloned())
    }

    async fn publish_progress(
        &self,
        id: Uuid,
        percent: u8,
        message: &str,
    ) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        if let Some(record) = inner.jobs.get_mut(&id) {
            record.progress = percent.min(100);
            record.progress_message = Some(message.to_string());
        }
        Ok(())
    }

    async fn renew_lock(&self, id: Uuid, lock: Duration) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        if let Some(record) = inner.jobs.get_mut(&id) {
            record.lock_expires_at_ms = Some(now_millis() + lock.as_millis() as u64);
        }
        Ok(())
    }

    async fn complete(
        &self,
        id: Uuid,
        result: SplitResult,
        retention: Duration,
    ) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        let now = now_millis();
        let mut sample = None;
        if let Some(record) = inner.jobs.get_mut(&id) {
            record.state = JobState::Completed;
            record.result = Some(result);
            record.finished_at_ms = Some(now);
            record.progress = 100;
            record.lock_expires_at_ms = None;
            sample = record.processing_millis();
        }
        if let Some(millis) = sample {
            inner.recent_millis.push_front(millis);
            inner.recent_millis.truncate(ETA_SAMPLE_LIMIT);
        }
        inner.finish(id, retention);
        Ok(())
    }

    async fn fail(&self, id: Uuid, error: &str, retention: Duration) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        if let Some(record) = inner.jobs.get_mut(&id) {
            record.state = JobState::Failed;
            record.error = Some(error.to_string());
            record.finished_at_ms = Some(now_millis());
            record.lock_expires_at_ms = None;
        }
        inner.finish(id, retention);
        Ok(())
    }

    async fn set_cancelled(&self, id: Uuid) -> Result<bool, QueueError> {
        let mut inner = self.inner.lock().await;
        match inner.jobs.get_mut(&id) {
            Some(record) => {
                record.payload.cancelled = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn is_cancelled(&self, id: Uuid) -> Result<bool, QueueError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .jobs
            .get(&id)
            .is_some_and(|record| record.payload.cancelled))
    }

    async fn remove_waiting(&self, id: Uuid) -> Result<bool, QueueError> {
        let mut inner = self.inner.lock().await;
        let was_waiting = inner.waiting.contains(&id);
        if was_waiting {
            inner.waiting.retain(|w| *w != id);
            inner.jobs.remove(&id);
        }
        Ok(was_waiting)
    }

    async fn waiting_ids(&self) -> Result<Vec<Uuid>, QueueError> {
        Ok(self.inner.lock().await.waiting.iter().copied().collect())
    }

    async fn active_ids(&self) -> Result<Vec<Uuid>, QueueError> {
        Ok(self.inner.lock().await.active.clone())
    }

    async fn recent_processing_millis(&self, limit: usize) -> Result<Vec<u64>, QueueError> {
        Ok(self
            .inner
            .lock()
            .await
            .recent_millis
            .iter()
            .take(limit)
            .copied()
            .collect())
    }

    async fn record_stall(&self, id: Uuid) -> Result<u32, QueueError> {
        let mut inner = self.inner.lock().await;
        match inner.jobs.get_mut(&id) {
            Some(record) => {
                record.stalls += 1;
                Ok(record.stalls)
            }
            None => Ok(0),
        }
    }

    async fn request_restart(&self, ttl: Duration) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        inner.restart_deadline_ms = Some(now_millis() + ttl.as_millis() as u64);
        Ok(())
    }

    async fn restart_requested(&self) -> Result<bool, QueueError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .restart_deadline_ms
            .is_some_and(|deadline| now_millis() <= deadline))
    }

    async fn sweep_retention(&self) -> Result<u32, QueueError> {
        let mut inner = self.inner.lock().await;
        let now = now_millis();
        let expired: Vec<Uuid> = inner
            .expirations
            .iter()
            .filter(|(_, &deadline)| deadline <= now)
            .map(|(&id, _)| id)
            .collect();
        for id in &expired {
            inner.jobs.remove(id);
            inner.expirations.remove(id);
        }
        Ok(expired.len() as u32)
    }

    async fn clean_state(&self, state: JobState) -> Result<u32, QueueError> {
        let mut inner = self.inner.lock().await;
        let doomed: Vec<Uuid> = inner
            .jobs
            .iter()
            .filter(|(_, record)| record.state == state)
            .map(|(&id, _)| id)
            .collect();
        for id in &doomed {
            inner.jobs.remove(id);
            inner.waiting.retain(|w| w != id);
            inner.active.retain(|a| a != id);
            inner.expirations.remove(id);
        }
        Ok(doomed.len() as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{queue_position, QueuePolicy};
    use job_types::{Dimensions, SplitJobPayload};

    fn record() -> JobRecord {
        JobRecord::new(SplitJobPayload::new(
            "file/model.stl".to_string(),
            "model.stl".to_string(),
            Dimensions::new(100.0, 100.0, 100.0),
        ))
    }

    fn result() -> SplitResult {
        SplitResult {
            parts: Vec::new(),
            total_parts: 0,
            sections: [1, 1, 1],
            original_dimensions: [1.0, 1.0, 1.0],
            zip_key: "x/all-parts.zip".to_string(),
        }
    }

    #[tokio::test]
    async fn test_fifo_fetch_and_complete() {
        let broker = MemoryBroker::new();
        let first = record();
        let second = record();
        broker.enqueue(first.clone()).await.unwrap();
        broker.enqueue(second.clone()).await.unwrap();

        let fetched = broker
            .fetch_next(Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.id, first.id);
        assert_eq!(fetched.state, JobState::Active);
        assert!(fetched.lock_expires_at_ms.is_some());

        broker
            .complete(first.id, result(), Duration::from_secs(3600))
            .await
            .unwrap();
        let done = broker.get(first.id).await.unwrap().unwrap();
        assert_eq!(done.state, JobState::Completed);
        assert_eq!(done.progress, 100);
        assert!(broker.active_ids().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_queue_position_and_eta() {
        let broker = MemoryBroker::new();
        let running = record();
        broker.enqueue(running.clone()).await.unwrap();
        broker.fetch_next(Duration::from_secs(60)).await.unwrap();

        let a = record();
        let b = record();
        broker.enqueue(a.clone()).await.unwrap();
        broker.enqueue(b.clone()).await.unwrap();

        let position = queue_position(&broker, b.id).await.unwrap().unwrap();
        assert_eq!(position.state, JobState::Waiting);
        assert_eq!(position.position, 2);
        assert_eq!(position.total_waiting, 2);
        // One job ahead, one active worker, no samples: the default average.
        assert_eq!(position.estimated_wait_time, 120);

        let head = queue_position(&broker, a.id).await.unwrap().unwrap();
        assert_eq!(head.position, 1);
        assert_eq!(head.estimated_wait_time, 0);

        assert!(queue_position(&broker, Uuid::new_v4())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_remove_waiting_only_removes_waiting() {
        let broker = MemoryBroker::new();
        let job = record();
        broker.enqueue(job.clone()).await.unwrap();
        assert!(broker.remove_waiting(job.id).await.unwrap());
        assert!(broker.get(job.id).await.unwrap().is_none());

        let job = record();
        broker.enqueue(job.clone()).await.unwrap();
        broker.fetch_next(Duration::from_secs(60)).await.unwrap();
        assert!(!broker.remove_waiting(job.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_cancellation_flag_round_trip() {
        let broker = MemoryBroker::new();
        let job = record();
        broker.enqueue(job.clone()).await.unwrap();
        assert!(!broker.is_cancelled(job.id).await.unwrap());
        assert!(broker.set_cancelled(job.id).await.unwrap());
        assert!(broker.is_cancelled(job.id).await.unwrap());
        assert!(!broker.set_cancelled(Uuid::new_v4()).await.unwrap());
    }

    #[tokio::test]
    async fn test_retention_sweep_reclaims_terminal_jobs() {
        let broker = MemoryBroker::new();
        let done = record();
        let failed = record();
        broker.enqueue(done.clone()).await.unwrap();
        broker.enqueue(failed.clone()).await.unwrap();
        broker.fetch_next(Duration::from_secs(60)).await.unwrap();
        broker.fetch_next(Duration::from_secs(60)).await.unwrap();

        broker
            .complete(done.id, result(), Duration::ZERO)
            .await
            .unwrap();
        broker
            .fail(failed.id, "boom", Duration::from_secs(3600))
            .await
            .unwrap();

        let swept = broker.sweep_retention().await.unwrap();
        assert_eq!(swept, 1);
        assert!(broker.get(done.id).await.unwrap().is_none());
        // Failed retention has not elapsed.
        assert!(broker.get(failed.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_restart_signal_expires() {
        let broker = MemoryBroker::new();
        assert!(!broker.restart_requested().await.unwrap());
        broker
            .request_restart(Duration::from_secs(60))
            .await
            .unwrap();
        assert!(broker.restart_requested().await.unwrap());
        broker.request_restart(Duration::ZERO).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(!broker.restart_requested().await.unwrap());
    }

    #[tokio::test]
    async fn test_clean_state() {
        let broker = MemoryBroker::new();
        let a = record();
        let b = record();
        broker.enqueue(a.clone()).await.unwrap();
        broker.enqueue(b.clone()).await.unwrap();
        broker.fetch_next(Duration::from_secs(60)).await.unwrap();
        broker
            .fail(a.id, "boom", Duration::from_secs(3600))
            .await
            .unwrap();

        assert_eq!(broker.clean_state(JobState::Failed).await.unwrap(), 1);
        assert_eq!(broker.clean_state(JobState::Waiting).await.unwrap(), 1);
        assert!(broker.waiting_ids().await.unwrap().is_empty());
    }

    #[test]
    fn test_policy_retention_override() {
        let policy = QueuePolicy::split().with_retention_hours(24);
        assert_eq!(policy.completed_retention, Duration::from_secs(24 * 3600));
        assert_eq!(
            policy.failed_retention,
            Duration::from_secs(24 * 3600 * 7 / 2)
        );
    }

    #[test]
    fn test_repair_policy_shares_structure() {
        let split = QueuePolicy::split();
        let repair = QueuePolicy::repair();
        assert_eq!(repair.name, "repair");
        assert_eq!(repair.attempts, split.attempts);
        assert_eq!(repair.max_stalls, split.max_stalls);
        assert_eq!(repair.completed_retention, split.completed_retention);
        // Repair gets roomier deadlines, lock just past the timeout.
        assert!(repair.job_timeout > split.job_timeout);
        assert!(repair.lock_duration > repair.job_timeout);
    }
}
