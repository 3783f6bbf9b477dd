//! # Split Worker
//!
//! Pulls jobs from the split queue and runs them through the engine: create
//! a working directory, download the input, split on a blocking thread with
//! progress forwarded to the broker, upload parts and the bundle, record the
//! result. Cancellation is cooperative and observed at three points: before
//! the download, after the download, and after CSG processing.
//!
//! Alongside the job loop the worker polls the restart signal, checks active
//! jobs for stalls and timeouts, and sweeps expired terminal records.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{error, info, warn};
use uuid::Uuid;

use job_types::{config::RuntimeConfig, now_millis, JobRecord, PartRef, SplitResult};
use printsplit_splitter::{SplitEngine, SplitError, SplitProgress, SplitRequest};

use crate::queue::{JobBroker, QueuePolicy, QueueError, RESTART_TTL};
use crate::storage::{ObjectStore, StoreError, STL_CONTENT_TYPE, ZIP_CONTENT_TYPE};

/// How often an idle worker polls the waiting list.
pub const FETCH_INTERVAL: Duration = Duration::from_millis(500);

/// How often the restart signal is polled; the exit bound from the signal.
pub const RESTART_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Retention sweep cadence.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Grace allowed to in-flight jobs when a restart is requested.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Everything that can end a job without a result.
#[derive(Debug, thiserror::Error)]
enum JobError {
    #[error("Job was cancelled")]
    Cancelled,

    #[error(transparent)]
    Split(#[from] SplitError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("worker task failed: {0}")]
    Task(String),
}

impl JobError {
    /// Failure reason recorded on the job for the submitting user.
    fn user_message(&self) -> String {
        match self {
            JobError::Cancelled => "Job was cancelled".to_string(),
            JobError::Split(err) => err.user_message(),
            JobError::Store(_) | JobError::Io(_) => {
                "A storage error occurred while processing the model".to_string()
            }
            JobError::Queue(err) => format!("Queue error: {}", err),
            JobError::Task(_) => "The job worker failed unexpectedly".to_string(),
        }
    }
}

/// Removes the per-job scratch directory on every exit path.
struct WorkDirGuard {
    path: PathBuf,
}

impl Drop for WorkDirGuard {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_dir_all(&self.path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %err, "working directory cleanup failed");
            }
        }
    }
}

/// The split queue worker.
pub struct SplitWorker {
    broker: Arc<dyn JobBroker>,
    store: Arc<dyn ObjectStore>,
    config: RuntimeConfig,
    policy: QueuePolicy,
}

impl SplitWorker {
    pub fn new(
        broker: Arc<dyn JobBroker>,
        store: Arc<dyn ObjectStore>,
        config: RuntimeConfig,
    ) -> Self {
        let policy = QueuePolicy::split().with_retention_hours(config.job_retention_hours);
        Self {
            broker,
            store,
            config,
            policy,
        }
    }

    pub fn policy(&self) -> &QueuePolicy {
        &self.policy
    }

    /// Runs until the restart signal is observed, then returns so the
    /// process can exit 0 and be restarted by its supervisor.
    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        info!(
            concurrency = self.config.worker_concurrency,
            queue = self.policy.name,
            "worker started"
        );

        let mut jobs: JoinSet<()> = JoinSet::new();
        let mut fetch_tick = tokio::time::interval(FETCH_INTERVAL);
        let mut restart_tick = tokio::time::interval(RESTART_POLL_INTERVAL);
        let mut stall_tick = tokio::time::interval(self.policy.stall_check_interval);
        let mut sweep_tick = tokio::time::interval(SWEEP_INTERVAL);

        loop {
            tokio::select! {
                _ = restart_tick.tick() => {
                    match self.broker.restart_requested().await {
                        Ok(true) => {
                            info!("restart signal observed, shutting down");
                            break;
                        }
                        Ok(false) => {}
                        Err(err) => warn!(error = %err, "restart poll failed"),
                    }
                }
                _ = stall_tick.tick() => {
                    if let Err(err) = self.check_stalls().await {
                        warn!(error = %err, "stall check failed");
                    }
                }
                _ = sweep_tick.tick() => {
                    if let Err(err) = self.broker.sweep_retention().await {
                        warn!(error = %err, "retention sweep failed");
                    }
                }
                Some(_) = jobs.join_next(), if !jobs.is_empty() => {}
                _ = fetch_tick.tick(), if jobs.len() < self.config.worker_concurrency => {
                    match self.broker.fetch_next(self.policy.lock_duration).await {
                        Ok(Some(record)) => {
                            let worker = Arc::clone(&self);
                            jobs.spawn(async move {
                                worker.process_job(record).await;
                            });
                        }
                        Ok(None) => {}
                        Err(err) => warn!(error = %err, "fetch failed"),
                    }
                }
            }
        }

        // Give in-flight jobs a short grace, then abandon them; the stall
        // checker of the next worker generation fails whatever is left.
        let deadline = tokio::time::Instant::now() + SHUTDOWN_GRACE;
        while !jobs.is_empty() {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    warn!(abandoned = jobs.len(), "restart grace elapsed");
                    jobs.abort_all();
                    break;
                }
                _ = jobs.join_next() => {}
            }
        }
        Ok(())
    }

    /// Runs one job to a terminal state.
    pub async fn process_job(&self, record: JobRecord) {
        let job_id = record.id;
        info!(%job_id, file = %record.payload.file_name, "job started");

        match self.execute(&record).await {
            Ok(result) => {
                let _ = self
                    .broker
                    .publish_progress(job_id, 100, "Done")
                    .await;
                if let Err(err) = self
                    .broker
                    .complete(job_id, result, self.policy.completed_retention)
                    .await
                {
                    error!(%job_id, error = %err, "completion could not be recorded");
                } else {
                    info!(%job_id, "job completed");
                }
            }
            Err(err) => {
                let message = err.user_message();
                warn!(%job_id, error = %err, "job failed");
                if let Err(record_err) = self
                    .broker
                    .fail(job_id, &message, self.policy.failed_retention)
                    .await
                {
                    error!(%job_id, error = %record_err, "failure could not be recorded");
                }
            }
        }
    }

    async fn execute(&self, record: &JobRecord) -> Result<SplitResult, JobError> {
        let job_id = record.id;
        let payload = &record.payload;

        let work_dir = std::env::temp_dir().join(format!("printsplit-{}", job_id));
        tokio::fs::create_dir_all(&work_dir).await?;
        let _guard = WorkDirGuard {
            path: work_dir.clone(),
        };

        self.checkpoint(job_id).await?;
        self.progress(job_id, 10, "Downloading model").await;

        let input = self
            .store
            .get(&self.config.store.upload_bucket, &payload.file_id)
            .await?;
        tokio::fs::write(work_dir.join("input.stl"), &input).await?;
        self.progress(job_id, 20, "Download complete").await;

        self.checkpoint(job_id).await?;

        // Keep the lock fresh while the engine grinds.
        let renewal = {
            let broker = Arc::clone(&self.broker);
            let lock = self.policy.lock_duration;
            let interval = self.policy.lock_renew_interval;
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(interval);
                tick.tick().await;
                loop {
                    tick.tick().await;
                    if broker.renew_lock(job_id, lock).await.is_err() {
                        break;
                    }
                }
            })
        };

        // The engine is compute-bound: run it on a blocking thread and
        // forward its progress through a channel back onto the runtime.
        let (progress_tx, mut progress_rx) =
            tokio::sync::mpsc::unbounded_channel::<SplitProgress>();
        let forwarder = {
            let broker = Arc::clone(&self.broker);
            tokio::spawn(async move {
                while let Some(update) = progress_rx.recv().await {
                    let _ = broker
                        .publish_progress(job_id, update.percent, &update.message)
                        .await;
                }
            })
        };

        let request = SplitRequest {
            dimensions: payload.dimensions,
            balanced_cutting: payload.balanced_cutting,
            smart_boundaries: payload.smart_boundaries,
            alignment_holes: payload.alignment_holes,
        };
        let split_result = tokio::task::spawn_blocking(move || {
            let engine = SplitEngine::with_progress(Arc::new(move |update: &SplitProgress| {
                let _ = progress_tx.send(update.clone());
            }));
            engine.split(&input, &request)
        })
        .await;

        renewal.abort();
        let _ = forwarder.await;

        let outcome = split_result.map_err(|err| JobError::Task(err.to_string()))??;

        self.checkpoint(job_id).await?;
        self.progress(job_id, 75, "Processing complete").await;

        let results_bucket = &self.config.store.results_bucket;
        let total = outcome.parts.len().max(1);
        let mut parts = Vec::with_capacity(outcome.parts.len());
        for (index, part) in outcome.parts.iter().enumerate() {
            let key = format!("{}/{}", job_id, part.name);
            self.store
                .put(results_bucket, &key, part.bytes.clone(), STL_CONTENT_TYPE)
                .await?;
            parts.push(PartRef {
                name: part.name.clone(),
                section: part.section,
                key,
                size_bytes: part.bytes.len() as u64,
            });
            let percent = 75 + (15 * (index + 1) / total) as u8;
            self.progress(job_id, percent, "Uploading parts").await;
        }

        self.progress(job_id, 90, "Uploading bundle").await;
        let zip_key = format!("{}/all-parts.zip", job_id);
        self.store
            .put(results_bucket, &zip_key, outcome.zip_bytes, ZIP_CONTENT_TYPE)
            .await?;

        self.progress(job_id, 95, "Finalizing").await;
        Ok(SplitResult {
            total_parts: parts.len() as u32,
            parts,
            sections: outcome.sections,
            original_dimensions: outcome.original_dimensions,
            zip_key,
        })
    }

    /// Cooperative cancellation checkpoint.
    async fn checkpoint(&self, job_id: Uuid) -> Result<(), JobError> {
        if self.broker.is_cancelled(job_id).await? {
            return Err(JobError::Cancelled);
        }
        Ok(())
    }

    async fn progress(&self, job_id: Uuid, percent: u8, message: &str) {
        if let Err(err) = self.broker.publish_progress(job_id, percent, message).await {
            warn!(%job_id, error = %err, "progress publish failed");
        }
    }

    /// Fails active jobs that missed their hard deadline or whose lock
    /// expired more often than the policy tolerates.
    async fn check_stalls(&self) -> Result<(), QueueError> {
        let now = now_millis();
        for id in self.broker.active_ids().await? {
            let Some(record) = self.broker.get(id).await? else {
                continue;
            };
            let timed_out = record
                .processed_at_ms
                .is_some_and(|start| now > start + self.policy.job_timeout.as_millis() as u64);
            if timed_out {
                warn!(job_id = %id, "job exceeded hard timeout");
                self.broker
                    .fail(id, "Job timed out", self.policy.failed_retention)
                    .await?;
                continue;
            }

            let lock_lost = record
                .lock_expires_at_ms
                .is_some_and(|deadline| now > deadline);
            if lock_lost {
                let stalls = self.broker.record_stall(id).await?;
                if stalls > self.policy.max_stalls {
                    warn!(job_id = %id, stalls, "job stalled");
                    self.broker
                        .fail(id, "Job stalled", self.policy.failed_retention)
                        .await?;
                }
            }
        }
        Ok(())
    }
}

/// Asks every worker on the broker to restart.
pub async fn signal_restart(broker: &dyn JobBroker) -> Result<(), QueueError> {
    broker.request_restart(RESTART_TTL).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use job_types::{Dimensions, HoleSpec, JobState, SplitJobPayload};
    use printsplit_splitter::{stl_codec, Solid};

    use crate::queue::MemoryBroker;
    use crate::storage::MemoryStore;

    fn test_config() -> RuntimeConfig {
        RuntimeConfig {
            redis_url: "redis://unused".to_string(),
            store: job_types::config::StoreConfig {
                endpoint: "unused".to_string(),
                port: 9000,
                access_key: String::new(),
                secret_key: String::new(),
                use_ssl: false,
                upload_bucket: "uploads".to_string(),
                results_bucket: "results".to_string(),
            },
            worker_concurrency: 2,
            max_file_size: 150 * 1024 * 1024,
            admin_password: None,
            job_retention_hours: 48,
            allowed_origins: Vec::new(),
            rate_limit_enabled: false,
        }
    }

    fn cube_stl() -> Vec<u8> {
        stl_codec::encode(&Solid::cube([100.0, 60.0, 40.0]).export_mesh())
    }

    async fn setup() -> (Arc<MemoryBroker>, Arc<MemoryStore>, SplitWorker, JobRecord) {
        let broker = Arc::new(MemoryBroker::new());
        let store = Arc::new(MemoryStore::new());

        let mut payload = SplitJobPayload::new(
            "upload-test/model.stl".to_string(),
            "model.stl".to_string(),
            Dimensions::new(50.0, 100.0, 100.0),
        );
        payload.alignment_holes = HoleSpec::default();
        store
            .put("uploads", &payload.file_id, cube_stl(), STL_CONTENT_TYPE)
            .await
            .unwrap();

        let record = JobRecord::new(payload);
        broker.enqueue(record).await.unwrap();

        let worker = SplitWorker::new(
            broker.clone() as Arc<dyn JobBroker>,
            store.clone() as Arc<dyn ObjectStore>,
            test_config(),
        );
        let record = broker
            .fetch_next(Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();
        (broker, store, worker, record)
    }

    #[tokio::test]
    async fn test_job_completes_and_uploads_artifacts() {
        let (broker, store, worker, record) = setup().await;
        let job_id = record.id;

        worker.process_job(record).await;

        let done = broker.get(job_id).await.unwrap().unwrap();
        assert_eq!(done.state, JobState::Completed);
        assert_eq!(done.progress, 100);
        let result = done.result.unwrap();
        // 100 mm extent over 50 mm pieces: two sections along X.
        assert_eq!(result.sections, [2, 1, 1]);
        assert_eq!(result.total_parts, 2);

        for part in &result.parts {
            assert!(store.exists("results", &part.key).await.unwrap());
            let stat = store.stat("results", &part.key).await.unwrap();
            assert_eq!(stat.size, part.size_bytes);
        }
        assert_eq!(result.zip_key, format!("{}/all-parts.zip", job_id));
        assert!(store.exists("results", &result.zip_key).await.unwrap());

        // Scratch directory is gone.
        assert!(!std::env::temp_dir()
            .join(format!("printsplit-{}", job_id))
            .exists());
    }

    #[tokio::test]
    async fn test_cancelled_job_fails_with_reason() {
        let (broker, store, worker, record) = setup().await;
        let job_id = record.id;
        broker.set_cancelled(job_id).await.unwrap();

        worker.process_job(record).await;

        let done = broker.get(job_id).await.unwrap().unwrap();
        assert_eq!(done.state, JobState::Failed);
        assert_eq!(done.error.as_deref(), Some("Job was cancelled"));
        assert!(done.result.is_none());

        // Cancelled before download: nothing was uploaded.
        assert!(store.list("results", "").await.unwrap().is_empty());
        assert!(!std::env::temp_dir()
            .join(format!("printsplit-{}", job_id))
            .exists());
    }

    #[tokio::test]
    async fn test_missing_upload_fails_job() {
        let broker = Arc::new(MemoryBroker::new());
        let store = Arc::new(MemoryStore::new());
        let payload = SplitJobPayload::new(
            "upload-missing/model.stl".to_string(),
            "model.stl".to_string(),
            Dimensions::new(50.0, 100.0, 100.0),
        );
        let record = JobRecord::new(payload);
        broker.enqueue(record).await.unwrap();
        let record = broker
            .fetch_next(Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();

        let worker = SplitWorker::new(
            broker.clone() as Arc<dyn JobBroker>,
            store as Arc<dyn ObjectStore>,
            test_config(),
        );
        let job_id = record.id;
        worker.process_job(record).await;

        let done = broker.get(job_id).await.unwrap().unwrap();
        assert_eq!(done.state, JobState::Failed);
        assert!(done.error.is_some());
    }

    #[tokio::test]
    async fn test_malformed_input_surfaces_user_message() {
        let broker = Arc::new(MemoryBroker::new());
        let store = Arc::new(MemoryStore::new());
        let payload = SplitJobPayload::new(
            "upload-bad/model.stl".to_string(),
            "model.stl".to_string(),
            Dimensions::new(50.0, 100.0, 100.0),
        );
        store
            .put(
                "uploads",
                &payload.file_id,
                b"solid x\nvertex 1 2\nendfacet\n".to_vec(),
                STL_CONTENT_TYPE,
            )
            .await
            .unwrap();
        let record = JobRecord::new(payload);
        broker.enqueue(record).await.unwrap();
        let record = broker
            .fetch_next(Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();

        let worker = SplitWorker::new(
            broker.clone() as Arc<dyn JobBroker>,
            store as Arc<dyn ObjectStore>,
            test_config(),
        );
        let job_id = record.id;
        worker.process_job(record).await;

        let done = broker.get(job_id).await.unwrap().unwrap();
        assert_eq!(done.state, JobState::Failed);
        assert!(done.error.unwrap().contains("not a readable STL"));
    }

    #[tokio::test]
    async fn test_stall_check_fails_timed_out_job() {
        let (broker, _store, mut worker, record) = setup().await;
        let job_id = record.id;

        // An active job against a zero hard timeout is overdue immediately.
        worker.policy.job_timeout = Duration::ZERO;
        tokio::time::sleep(Duration::from_millis(5)).await;
        worker.check_stalls().await.unwrap();

        let done = broker.get(job_id).await.unwrap().unwrap();
        assert_eq!(done.state, JobState::Failed);
        assert_eq!(done.error.as_deref(), Some("Job timed out"));
    }

    #[tokio::test]
    async fn test_stall_check_tolerates_one_lock_expiry() {
        let (broker, _store, worker, record) = setup().await;
        let job_id = record.id;

        // Expire the lock without touching the hard deadline.
        broker.renew_lock(job_id, Duration::ZERO).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        // First detection only counts a stall.
        worker.check_stalls().await.unwrap();
        let record = broker.get(job_id).await.unwrap().unwrap();
        assert_eq!(record.state, JobState::Active);
        assert_eq!(record.stalls, 1);

        // Second detection exceeds max_stalls = 1 and fails the job.
        worker.check_stalls().await.unwrap();
        let record = broker.get(job_id).await.unwrap().unwrap();
        assert_eq!(record.state, JobState::Failed);
        assert_eq!(record.error.as_deref(), Some("Job stalled"));
    }
}
