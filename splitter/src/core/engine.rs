//! # Split Engine
//!
//! Orchestrates one split run end to end: decode the STL, build the solid,
//! plan the grid, carve alignment holes when asked, intersect each grid
//! cell, and bundle the emitted parts.
//!
//! The engine is deliberately synchronous and compute-bound; callers that
//! need it off their event loop run it on a worker thread. Progress is
//! reported through an optional callback and stays within the processing
//! band, leaving transfer milestones to the caller.

use std::io::{Cursor, Write};

use tracing::{debug, info};
use zip::write::FileOptions;

use crate::core::grid::GridPlan;
use crate::core::hole_placer::carve_alignment_holes;
use crate::core::stl_codec;
use crate::csg::Solid;
use crate::{Bounds, ProgressCallback, SplitError, SplitProgress, SplitRequest};

/// Cells whose intersection volume is at or below this are not emitted.
pub const MIN_PART_VOLUME: f64 = 1e-3;

/// One emitted piece.
#[derive(Debug, Clone)]
pub struct PartArtifact {
    /// `part_{x}_{y}_{z}.stl`, 1-based grid indices.
    pub name: String,

    /// Grid cell, 1-based.
    pub section: [u32; 3],

    /// Exact bounds recomputed from the exported vertices.
    pub bounds: Bounds,

    /// Binary STL bytes.
    pub bytes: Vec<u8>,
}

/// Everything a successful split produces.
#[derive(Debug)]
pub struct SplitOutcome {
    pub parts: Vec<PartArtifact>,

    /// ZIP archive of every part, basenames only.
    pub zip_bytes: Vec<u8>,

    pub sections: [u32; 3],

    /// Model extent in millimeters before cutting.
    pub original_dimensions: [f64; 3],
}

impl SplitOutcome {
    pub fn total_parts(&self) -> u32 {
        self.parts.len() as u32
    }
}

/// The batch pipeline from STL bytes to part artifacts.
pub struct SplitEngine {
    progress: Option<ProgressCallback>,
}

impl SplitEngine {
    pub fn new() -> Self {
        Self { progress: None }
    }

    pub fn with_progress(progress: ProgressCallback) -> Self {
        Self {
            progress: Some(progress),
        }
    }

    fn report(&self, percent: u8, message: &str) {
        if let Some(callback) = &self.progress {
            callback(&SplitProgress {
                percent,
                message: message.to_string(),
            });
        }
    }

    /// Runs the complete split.
    pub fn split(&self, input: &[u8], request: &SplitRequest) -> Result<SplitOutcome, SplitError> {
        self.report(30, "Reading model");
        let mesh = stl_codec::decode(input)?;
        mesh.validate()?;
        info!(
            vertices = mesh.vertex_count(),
            triangles = mesh.triangle_count(),
            "model decoded"
        );

        let solid = Solid::from_mesh(&mesh);
        if !solid.status().is_ok() {
            return Err(SplitError::NonManifoldInput);
        }

        let extent = mesh.bounds.size();
        let plan = GridPlan::compute(extent, &request.dimensions, request.balanced_cutting);
        let sections = plan.sections();
        info!(?sections, ?extent, "grid planned");

        let working = if request.alignment_holes.enabled && plan.has_interior_cut() {
            let (carved, stats) = carve_alignment_holes(
                solid,
                &mesh.bounds,
                &plan,
                &request.alignment_holes,
                |percent, message| self.report(percent, message),
            )?;
            info!(
                accepted = stats.accepted,
                rejected_quality = stats.rejected_quality,
                rejected_boundary = stats.rejected_boundary,
                "alignment holes carved"
            );
            carved
        } else {
            solid
        };

        self.report(70, "Cutting model into sections");
        let parts = self.cut_sections(&working, &mesh.bounds, &plan)?;
        if parts.is_empty() {
            return Err(SplitError::EmptyResult);
        }

        let zip_bytes = build_bundle(&parts)?;
        info!(
            parts = parts.len(),
            zip_bytes = zip_bytes.len(),
            "split complete"
        );

        Ok(SplitOutcome {
            parts,
            zip_bytes,
            sections,
            original_dimensions: extent,
        })
    }

    /// Intersects every grid cell with the working solid, in lexicographic
    /// cell order, and serializes the occupied ones.
    fn cut_sections(
        &self,
        working: &Solid,
        bounds: &Bounds,
        plan: &GridPlan,
    ) -> Result<Vec<PartArtifact>, SplitError> {
        let piece = [
            plan.axes[0].piece_size,
            plan.axes[1].piece_size,
            plan.axes[2].piece_size,
        ];
        let [nx, ny, nz] = plan.sections();

        let mut parts = Vec::new();
        for x in 0..nx {
            for y in 0..ny {
                for z in 0..nz {
                    let origin = [
                        f64::from(bounds.min[0]) + f64::from(x) * piece[0],
                        f64::from(bounds.min[1]) + f64::from(y) * piece[1],
                        f64::from(bounds.min[2]) + f64::from(z) * piece[2],
                    ];
                    let cell = Solid::cube(piece).translate(origin);
                    let part = working.intersect(&cell);
                    if !part.status().is_ok() {
                        return Err(SplitError::from_status(part.status()));
                    }
                    if part.volume() <= MIN_PART_VOLUME {
                        debug!(x, y, z, "cell empty, skipped");
                        continue;
                    }

                    let part_mesh = part.export_mesh();
                    let name = format!("part_{}_{}_{}.stl", x + 1, y + 1, z + 1);
                    let bytes = stl_codec::encode(&part_mesh);
                    debug!(name = %name, triangles = part_mesh.triangle_count(), "part emitted");
                    parts.push(PartArtifact {
                        name,
                        section: [x + 1, y + 1, z + 1],
                        bounds: part_mesh.bounds,
                        bytes,
                    });
                }
            }
        }
        Ok(parts)
    }
}

impl Default for SplitEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Deflates every part into one archive with no path prefixes.
fn build_bundle(parts: &[PartArtifact]) -> Result<Vec<u8>, SplitError> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .compression_level(Some(9));

    for part in parts {
        writer
            .start_file(part.name.as_str(), options)
            .map_err(zip_error)?;
        writer.write_all(&part.bytes)?;
    }

    let cursor = writer.finish().map_err(zip_error)?;
    Ok(cursor.into_inner())
}

fn zip_error(err: zip::result::ZipError) -> SplitError {
    SplitError::Io(std::io::Error::new(std::io::ErrorKind::Other, err))
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use job_types::{Dimensions, HoleSpacing, HoleSpec};

    fn cube_stl(size: [f64; 3]) -> Vec<u8> {
        let mesh = Solid::cube(size).export_mesh();
        stl_codec::encode(&mesh)
    }

    fn request(x: f64, y: f64, z: f64) -> SplitRequest {
        SplitRequest::new(Dimensions::new(x, y, z))
    }

    /// Divergence-theorem volume straight off an indexed mesh.
    fn mesh_volume(mesh: &crate::IndexedMesh) -> f64 {
        let mut volume = 0.0;
        for tri in mesh.triangles.chunks_exact(3) {
            let a = mesh.vertex(tri[0] as usize).map(f64::from);
            let b = mesh.vertex(tri[1] as usize).map(f64::from);
            let c = mesh.vertex(tri[2] as usize).map(f64::from);
            volume += a[0] * (b[1] * c[2] - b[2] * c[1])
                + a[1] * (b[2] * c[0] - b[0] * c[2])
                + a[2] * (b[0] * c[1] - b[1] * c[0]);
        }
        (volume / 6.0).abs()
    }

    #[test]
    fn test_trivial_single_part() {
        let input = cube_stl([100.0; 3]);
        let outcome = SplitEngine::new()
            .split(&input, &request(200.0, 200.0, 200.0))
            .unwrap();

        assert_eq!(outcome.sections, [1, 1, 1]);
        assert_eq!(outcome.total_parts(), 1);
        assert_eq!(outcome.parts[0].name, "part_1_1_1.stl");
        assert_eq!(outcome.parts[0].section, [1, 1, 1]);

        // The single part covers the whole model.
        for axis in 0..3 {
            assert!((outcome.parts[0].bounds.min[axis]).abs() < 1e-3);
            assert!((outcome.parts[0].bounds.max[axis] - 100.0).abs() < 1e-3);
        }

        let archive =
            zip::ZipArchive::new(Cursor::new(outcome.zip_bytes)).unwrap();
        assert_eq!(archive.len(), 1);
    }

    #[test]
    fn test_two_by_one_by_one_slab() {
        let input = cube_stl([300.0, 100.0, 50.0]);
        let outcome = SplitEngine::new()
            .split(&input, &request(150.0, 200.0, 200.0))
            .unwrap();

        assert_eq!(outcome.sections, [2, 1, 1]);
        assert_eq!(outcome.total_parts(), 2);
        assert_eq!(outcome.parts[0].name, "part_1_1_1.stl");
        assert_eq!(outcome.parts[1].name, "part_2_1_1.stl");
        assert_eq!(outcome.original_dimensions, [300.0, 100.0, 50.0]);

        for part in &outcome.parts {
            let b = part.bounds;
            assert!((f64::from(b.max[0] - b.min[0]) - 150.0).abs() < 1e-3);
            assert!((f64::from(b.max[1] - b.min[1]) - 100.0).abs() < 1e-3);
            assert!((f64::from(b.max[2] - b.min[2]) - 50.0).abs() < 1e-3);
        }
        assert!((outcome.parts[0].bounds.min[0]).abs() < 1e-3);
        assert!((outcome.parts[1].bounds.min[0] - 150.0).abs() < 1e-3);

        let mut archive =
            zip::ZipArchive::new(Cursor::new(outcome.zip_bytes)).unwrap();
        assert_eq!(archive.len(), 2);
        // Entries carry no folder prefix.
        for i in 0..archive.len() {
            let entry = archive.by_index(i).unwrap();
            assert!(!entry.name().contains('/'));
        }
    }

    #[test]
    fn test_alignment_holes_remove_volume_from_parts() {
        let input = cube_stl([120.0, 60.0, 60.0]);
        let mut with_holes = request(60.0, 100.0, 100.0);
        with_holes.alignment_holes = HoleSpec {
            enabled: true,
            diameter_mm: 1.8,
            depth_mm: 3.0,
            spacing: HoleSpacing::Sparse,
        };

        let plain = SplitEngine::new()
            .split(&input, &request(60.0, 100.0, 100.0))
            .unwrap();
        let drilled = SplitEngine::new().split(&input, &with_holes).unwrap();

        assert_eq!(plain.total_parts(), 2);
        assert_eq!(drilled.total_parts(), 2);

        let plain_volume: f64 = plain
            .parts
            .iter()
            .map(|p| mesh_volume(&stl_codec::decode(&p.bytes).unwrap()))
            .sum();
        let drilled_volume: f64 = drilled
            .parts
            .iter()
            .map(|p| mesh_volume(&stl_codec::decode(&p.bytes).unwrap()))
            .sum();

        // Five sparse holes of r 0.9, length 6 across the single cut.
        let expected_removed = 5.0 * std::f64::consts::PI * 0.9 * 0.9 * 6.0;
        let removed = plain_volume - drilled_volume;
        assert!(
            removed > 0.9 * expected_removed && removed < 1.05 * expected_removed,
            "removed {}",
            removed
        );
    }

    #[test]
    fn test_progress_is_monotonic_in_band() {
        let seen: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let engine = SplitEngine::with_progress(Arc::new(move |p: &SplitProgress| {
            sink.lock().unwrap().push(p.percent);
        }));

        let input = cube_stl([100.0, 40.0, 40.0]);
        let mut req = request(50.0, 50.0, 50.0);
        req.alignment_holes.enabled = true;
        req.alignment_holes.diameter_mm = 1.8;
        req.alignment_holes.depth_mm = 3.0;
        engine.split(&input, &req).unwrap();

        let percents = seen.lock().unwrap();
        assert!(!percents.is_empty());
        assert!(percents.windows(2).all(|w| w[0] <= w[1]));
        assert!(percents.iter().all(|&p| (30..=70).contains(&p)));
    }

    #[test]
    fn test_malformed_ascii_is_invalid_format() {
        let err = SplitEngine::new()
            .split(b"solid x\nvertex 1 2\nendfacet\n", &request(10.0, 10.0, 10.0))
            .unwrap_err();
        assert!(matches!(err, SplitError::InvalidFormat(_)));
    }

    #[test]
    fn test_unrecognized_bytes_are_non_manifold() {
        // Neither a consistent binary header nor any vertex lines: decodes
        // to an empty mesh, which the solid constructor rejects.
        let garbage = vec![0x42u8; 200];
        let err = SplitEngine::new()
            .split(&garbage, &request(10.0, 10.0, 10.0))
            .unwrap_err();
        assert!(matches!(err, SplitError::NonManifoldInput));
    }

    #[test]
    fn test_kernel_handles_released_after_split() {
        let baseline = crate::csg::live_solids();
        let input = cube_stl([80.0, 40.0, 40.0]);
        let outcome = SplitEngine::new().split(&input, &request(40.0, 50.0, 50.0));
        assert!(outcome.is_ok());
        drop(outcome);
        assert_eq!(crate::csg::live_solids(), baseline);
    }

    #[test]
    fn test_kernel_handles_released_after_failure() {
        let baseline = crate::csg::live_solids();
        let err = SplitEngine::new().split(b"not an stl", &request(10.0, 10.0, 10.0));
        assert!(err.is_err());
        assert_eq!(crate::csg::live_solids(), baseline);
    }
}
