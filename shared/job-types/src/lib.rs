//! # PrintSplit Job Type Definitions
//!
//! This library defines the job payloads, states, and progress records shared
//! between the split worker and the control interface. The worker consumes
//! validated payloads from the queue; the control interface produces them from
//! HTTP requests and reads back state and progress for status endpoints.
//!
//! ## Payload Lifecycle
//!
//! A job is created when a split request is submitted (state `waiting`),
//! picked up by a worker (`active`), and finishes as either `completed` or
//! `failed`. Waiting jobs may be removed outright; active jobs are cancelled
//! cooperatively through the `_cancelled` flag on the payload, which workers
//! check at defined points.
//!
//! ## Validation
//!
//! Payloads are validated at the submission boundary, never trusted from the
//! wire: dimensions must be positive, hole parameters must sit inside their
//! documented ranges, and the file id must be present. A version field guards
//! against records written by incompatible producers.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod config;

/// Payload format version written by this crate.
pub const PAYLOAD_VERSION: u32 = 1;

/// Default processing time assumed for wait estimates when no completed jobs
/// have been observed yet (seconds).
pub const DEFAULT_AVG_PROCESSING_SECS: u64 = 120;

/// Target piece dimensions in millimeters, one entry per axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Dimensions {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Dimensions {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Returns the dimension along the given axis index (0 = x, 1 = y, 2 = z).
    pub fn axis(&self, axis: usize) -> f64 {
        match axis {
            0 => self.x,
            1 => self.y,
            _ => self.z,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        for (name, value) in [("x", self.x), ("y", self.y), ("z", self.z)] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ValidationError::InvalidDimension {
                    axis: name,
                    value,
                });
            }
        }
        Ok(())
    }
}

/// Candidate spacing for alignment holes, from fewest to most positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HoleSpacing {
    Sparse,
    Normal,
    Dense,
}

impl HoleSpacing {
    pub fn as_str(&self) -> &'static str {
        match self {
            HoleSpacing::Sparse => "sparse",
            HoleSpacing::Normal => "normal",
            HoleSpacing::Dense => "dense",
        }
    }
}

/// Alignment hole configuration.
///
/// Holes are cylindrical cavities drilled across each grid cut so printed
/// pieces can be pinned back together with filament. Depth is measured per
/// side; the drilled cylinder spans twice this value centered on the cut.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoleSpec {
    pub enabled: bool,

    /// Hole diameter in millimeters.
    pub diameter_mm: f64,

    /// Drill depth per side in millimeters.
    pub depth_mm: f64,

    pub spacing: HoleSpacing,
}

/// Accepted diameter range in millimeters.
pub const HOLE_DIAMETER_RANGE: (f64, f64) = (1.0, 5.0);

/// Accepted per-side depth range in millimeters.
pub const HOLE_DEPTH_RANGE: (f64, f64) = (1.0, 10.0);

impl Default for HoleSpec {
    fn default() -> Self {
        Self {
            enabled: false,
            diameter_mm: 2.0,
            depth_mm: 3.0,
            spacing: HoleSpacing::Normal,
        }
    }
}

impl HoleSpec {
    pub fn radius(&self) -> f64 {
        self.diameter_mm / 2.0
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.enabled {
            return Ok(());
        }
        let (dia_min, dia_max) = HOLE_DIAMETER_RANGE;
        if !self.diameter_mm.is_finite() || self.diameter_mm < dia_min || self.diameter_mm > dia_max
        {
            return Err(ValidationError::HoleDiameterOutOfRange(self.diameter_mm));
        }
        let (depth_min, depth_max) = HOLE_DEPTH_RANGE;
        if !self.depth_mm.is_finite() || self.depth_mm < depth_min || self.depth_mm > depth_max {
            return Err(ValidationError::HoleDepthOutOfRange(self.depth_mm));
        }
        Ok(())
    }
}

/// A queued unit of split work.
///
/// `file_id` is the object store key of the uploaded model inside the uploads
/// bucket. `_cancelled` is flipped by the control interface and observed
/// cooperatively by the worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitJobPayload {
    pub version: u32,

    pub job_id: Uuid,

    pub file_id: String,

    pub file_name: String,

    pub dimensions: Dimensions,

    /// Accepted for API compatibility; the engine does not act on it.
    #[serde(default)]
    pub smart_boundaries: bool,

    #[serde(default)]
    pub balanced_cutting: bool,

    #[serde(default)]
    pub alignment_holes: HoleSpec,

    #[serde(rename = "_cancelled", default)]
    pub cancelled: bool,
}

impl SplitJobPayload {
    pub fn new(file_id: String, file_name: String, dimensions: Dimensions) -> Self {
        Self {
            version: PAYLOAD_VERSION,
            job_id: Uuid::new_v4(),
            file_id,
            file_name,
            dimensions,
            smart_boundaries: false,
            balanced_cutting: false,
            alignment_holes: HoleSpec::default(),
            cancelled: false,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.version != PAYLOAD_VERSION {
            return Err(ValidationError::UnsupportedVersion(self.version));
        }
        if self.file_id.trim().is_empty() {
            return Err(ValidationError::MissingFileId);
        }
        self.dimensions.validate()?;
        self.alignment_holes.validate()?;
        Ok(())
    }
}

/// Lifecycle state of a job as exposed to status readers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    Active,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    /// Terminal states are retained for a bounded period, then reclaimed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

/// Reference to one emitted part in the results bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartRef {
    /// `part_{x}_{y}_{z}.stl`, 1-based grid indices.
    pub name: String,

    /// Grid cell this part came from, 1-based.
    pub section: [u32; 3],

    /// Object store key under the results bucket.
    pub key: String,

    pub size_bytes: u64,
}

/// Result summary attached to a completed job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitResult {
    pub parts: Vec<PartRef>,

    pub total_parts: u32,

    /// Grid section counts per axis.
    pub sections: [u32; 3],

    /// Model extent in millimeters before cutting.
    pub original_dimensions: [f64; 3],

    /// Object store key of the bundle archive.
    pub zip_key: String,
}

/// Full broker-side record of a job.
///
/// `progress` and `progress_message` form the per-job progress record: the
/// worker is its single writer, status readers observe it through the
/// broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: Uuid,

    pub state: JobState,

    pub payload: SplitJobPayload,

    pub progress: u8,

    pub progress_message: Option<String>,

    pub result: Option<SplitResult>,

    pub error: Option<String>,

    /// Submission time, epoch milliseconds.
    pub created_at_ms: u64,

    /// When a worker picked the job up.
    pub processed_at_ms: Option<u64>,

    /// When the job reached a terminal state.
    pub finished_at_ms: Option<u64>,

    /// Consecutive stall checks this job has failed while active.
    pub stalls: u32,

    /// Worker lock expiry, epoch milliseconds. Absent for non-active jobs.
    pub lock_expires_at_ms: Option<u64>,
}

impl JobRecord {
    pub fn new(payload: SplitJobPayload) -> Self {
        Self {
            id: payload.job_id,
            state: JobState::Waiting,
            payload,
            progress: 0,
            progress_message: None,
            result: None,
            error: None,
            created_at_ms: now_millis(),
            processed_at_ms: None,
            finished_at_ms: None,
            stalls: 0,
            lock_expires_at_ms: None,
        }
    }

    /// Wall-clock processing duration for completed jobs, used for wait
    /// estimates.
    pub fn processing_millis(&self) -> Option<u64> {
        match (self.processed_at_ms, self.finished_at_ms) {
            (Some(start), Some(end)) if end >= start => Some(end - start),
            _ => None,
        }
    }
}

/// Queue position snapshot for a waiting job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuePosition {
    pub state: JobState,

    /// 1-based rank in the waiting list. Zero when not waiting.
    pub position: u32,

    pub total_waiting: u32,

    /// Estimated wait in seconds.
    pub estimated_wait_time: u64,
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Validation failures for submitted payloads.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("unsupported payload version {0}")]
    UnsupportedVersion(u32),

    #[error("file id is required")]
    MissingFileId,

    #[error("dimension {axis} must be positive, got {value}")]
    InvalidDimension { axis: &'static str, value: f64 },

    #[error("hole diameter {0} mm outside accepted range 1-5 mm")]
    HoleDiameterOutOfRange(f64),

    #[error("hole depth {0} mm outside accepted range 1-10 mm")]
    HoleDepthOutOfRange(f64),
}
