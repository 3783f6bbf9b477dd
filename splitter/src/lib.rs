//! # PrintSplit Split Engine Library
//!
//! This library turns one STL model into a grid of printable pieces. The
//! pipeline decodes the input into an indexed mesh, builds a watertight solid
//! from it, optionally drills cylindrical alignment cavities across the
//! planned cut planes, intersects the solid against an axis-aligned grid of
//! cutting boxes, and serializes one binary STL per occupied cell plus a ZIP
//! bundle of all parts.
//!
//! ## Architecture
//!
//! - **core**: the split pipeline itself: STL codec, grid planner, alignment
//!   hole placement, and the engine that orchestrates them
//! - **csg**: the solid-modeling kernel behind an owned [`csg::Solid`] handle
//!
//! ## Split Workflow
//!
//! 1. Decode the STL (binary or ASCII) into a deduplicated indexed mesh
//! 2. Build a manifold solid; reject inputs that are not watertight
//! 3. Plan the cutting grid from the model extent and the requested maximums
//! 4. When alignment holes are enabled and the grid has interior cuts, probe
//!    each cut plane for material and carve quality-gated cavities
//! 5. Intersect the working solid with each grid cell and emit parts
//!
//! All coordinates are interpreted as millimeters.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use job_types::{Dimensions, HoleSpec};

pub mod core;
pub mod csg;

pub use crate::core::engine::{PartArtifact, SplitEngine, SplitOutcome};
pub use crate::core::grid::GridPlan;
pub use crate::core::stl_codec;
pub use crate::csg::Solid;

/// Number of decimal places in the vertex deduplication key.
///
/// Two vertices are the same point when their coordinates agree after
/// rounding to this many decimals. The textual key is deliberate: it matches
/// the output byte-for-byte across runs and platforms.
pub const DEDUP_PRECISION: usize = 6;

/// Indexed triangle mesh with deduplicated vertices.
///
/// `vertices` holds contiguous `x, y, z` triples; `triangles` holds triples
/// of indices into the vertex table. `bounds` is the componentwise min/max
/// over every referenced vertex.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedMesh {
    pub vertices: Vec<f32>,
    pub triangles: Vec<u32>,
    pub bounds: Bounds,
}

impl IndexedMesh {
    pub fn vertex_count(&self) -> usize {
        self.vertices.len() / 3
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len() / 3
    }

    /// Returns vertex coordinates by index.
    pub fn vertex(&self, index: usize) -> [f32; 3] {
        let start = index * 3;
        [
            self.vertices[start],
            self.vertices[start + 1],
            self.vertices[start + 2],
        ]
    }

    /// Validates index ranges and table shapes.
    pub fn validate(&self) -> Result<(), SplitError> {
        if self.vertices.len() % 3 != 0 {
            return Err(SplitError::InvalidFormat(
                "vertex table length is not a multiple of 3".to_string(),
            ));
        }
        if self.triangles.len() % 3 != 0 {
            return Err(SplitError::InvalidFormat(
                "triangle table length is not a multiple of 3".to_string(),
            ));
        }
        let vertex_count = self.vertex_count() as u32;
        for &idx in &self.triangles {
            if idx >= vertex_count {
                return Err(SplitError::InvalidFormat(format!(
                    "triangle references out-of-bounds vertex {}",
                    idx
                )));
            }
        }
        Ok(())
    }
}

/// Axis-aligned bounding box in single precision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

impl Bounds {
    /// An empty box that any point expands.
    pub fn empty() -> Self {
        Self {
            min: [f32::MAX; 3],
            max: [f32::MIN; 3],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.min[0] > self.max[0]
    }

    pub fn update(&mut self, p: [f32; 3]) {
        for i in 0..3 {
            self.min[i] = self.min[i].min(p[i]);
            self.max[i] = self.max[i].max(p[i]);
        }
    }

    /// Extent along one axis, zero for an empty box.
    pub fn extent(&self, axis: usize) -> f64 {
        if self.is_empty() {
            0.0
        } else {
            (self.max[axis] - self.min[axis]).max(0.0) as f64
        }
    }

    pub fn size(&self) -> [f64; 3] {
        [self.extent(0), self.extent(1), self.extent(2)]
    }
}

/// Incremental mesh builder with textual-key vertex deduplication.
///
/// Both the STL decoder and the kernel's mesh export go through this type so
/// that every [`IndexedMesh`] in the system shares one equality notion.
pub struct MeshBuilder {
    precision: usize,
    index: HashMap<String, u32>,
    vertices: Vec<f32>,
    triangles: Vec<u32>,
    bounds: Bounds,
}

impl MeshBuilder {
    pub fn new() -> Self {
        Self::with_precision(DEDUP_PRECISION)
    }

    /// Precision is parameterized so tests can exercise near-coincident
    /// vertices without millions of samples.
    pub fn with_precision(precision: usize) -> Self {
        Self {
            precision,
            index: HashMap::new(),
            vertices: Vec::new(),
            triangles: Vec::new(),
            bounds: Bounds::empty(),
        }
    }

    /// Adds one vertex, returning its (possibly shared) index.
    pub fn add_vertex(&mut self, p: [f32; 3]) -> u32 {
        let key = format!(
            "{:.prec$},{:.prec$},{:.prec$}",
            p[0],
            p[1],
            p[2],
            prec = self.precision
        );
        if let Some(&existing) = self.index.get(&key) {
            self.bounds.update(p);
            return existing;
        }
        let idx = (self.vertices.len() / 3) as u32;
        self.vertices.extend_from_slice(&p);
        self.index.insert(key, idx);
        self.bounds.update(p);
        idx
    }

    pub fn add_triangle(&mut self, indices: [u32; 3]) {
        self.triangles.extend_from_slice(&indices);
    }

    pub fn finish(self) -> IndexedMesh {
        let bounds = if self.vertices.is_empty() {
            Bounds {
                min: [0.0; 3],
                max: [0.0; 3],
            }
        } else {
            self.bounds
        };
        IndexedMesh {
            vertices: self.vertices,
            triangles: self.triangles,
            bounds,
        }
    }
}

impl Default for MeshBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Parameters for one split run, independent of queue plumbing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitRequest {
    /// Maximum piece size per axis, millimeters.
    pub dimensions: Dimensions,

    /// Equalize piece sizes instead of leaving a small last row.
    pub balanced_cutting: bool,

    /// Reserved; accepted but not acted on.
    pub smart_boundaries: bool,

    pub alignment_holes: HoleSpec,
}

impl SplitRequest {
    pub fn new(dimensions: Dimensions) -> Self {
        Self {
            dimensions,
            balanced_cutting: false,
            smart_boundaries: false,
            alignment_holes: HoleSpec::default(),
        }
    }
}

/// Progress notification emitted by the engine while it works.
///
/// Percent values stay inside the processing band; the surrounding runtime
/// owns the download and upload milestones.
#[derive(Debug, Clone)]
pub struct SplitProgress {
    pub percent: u8,
    pub message: String,
}

/// Progress callback for monitoring split operations.
pub type ProgressCallback = Arc<dyn Fn(&SplitProgress) + Send + Sync>;

/// Errors a split run can end with. Each kills only its own job.
#[derive(Debug, thiserror::Error)]
pub enum SplitError {
    #[error("invalid STL file: {0}")]
    InvalidFormat(String),

    #[error("model is not a closed manifold solid")]
    NonManifoldInput,

    #[error("CSG operation failed: {0}")]
    CsgFailure(String),

    #[error("CSG kernel ran out of capacity")]
    CsgMemoryExhaustion,

    #[error("no grid cell produced any geometry")]
    EmptyResult,

    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),
}

impl SplitError {
    /// Message shown to the submitting user.
    pub fn user_message(&self) -> String {
        match self {
            SplitError::InvalidFormat(detail) => {
                format!("The uploaded file is not a readable STL model ({})", detail)
            }
            SplitError::NonManifoldInput => {
                "The model is not a closed solid. Repair the mesh and try again".to_string()
            }
            SplitError::CsgFailure(_) | SplitError::CsgMemoryExhaustion => {
                "The model is too large or complex to process".to_string()
            }
            SplitError::EmptyResult => "The model is outside the cutting bounds".to_string(),
            SplitError::Io(_) => "A storage error occurred while processing the model".to_string(),
        }
    }
}

impl SplitError {
    /// Maps a kernel status onto the job error taxonomy.
    pub(crate) fn from_status(status: csg::SolidStatus) -> Self {
        match status {
            csg::SolidStatus::TooComplex => SplitError::CsgMemoryExhaustion,
            other => SplitError::CsgFailure(format!("{:?}", other)),
        }
    }
}

impl From<stl_codec::CodecError> for SplitError {
    fn from(err: stl_codec::CodecError) -> Self {
        match err {
            stl_codec::CodecError::InvalidFormat(detail) => SplitError::InvalidFormat(detail),
            stl_codec::CodecError::Io(io) => SplitError::Io(io),
        }
    }
}
