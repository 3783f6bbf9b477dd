//! # Alignment Hole Placement
//!
//! Drills cylindrical cavities centered on the interior cut planes so that
//! printed pieces can be pinned back together. Carving happens before the
//! grid intersection on one evolving working solid: a candidate that
//! survives its gates replaces the working solid with the drilled trial.
//!
//! Placement is conservative. The cut plane is probed with thin test boxes
//! to find where material actually is, candidates are laid out inside that
//! measured footprint, and each one must remove nearly its full cylinder of
//! material. A borderline removal additionally has to be concentrated in one
//! half of the drill depth, which separates a pocket in a single wall from a
//! puncture through two.

use tracing::debug;

use job_types::{HoleSpacing, HoleSpec};

use crate::core::grid::GridPlan;
use crate::csg::{Solid, CYLINDER_SEGMENTS};
use crate::{Bounds, SplitError};

/// Minimum fraction of the expected cylinder volume a candidate must remove.
pub const MIN_VOLUME_RATIO: f64 = 0.80;

/// Below this primary ratio the half-depth check runs as well.
pub const BORDERLINE_VOLUME_RATIO: f64 = 0.90;

/// Minimum fraction of the removed volume that must come from one half
/// depth.
pub const MIN_DEPTH_RATIO: f64 = 0.60;

/// Clearance added around the hole disc when checking the footprint edge,
/// millimeters.
pub const BOUNDARY_MARGIN: f64 = 0.1;

/// Probe box footprint on the cut plane, millimeters.
pub const PROBE_FOOTPRINT: f64 = 0.5;

/// Probe box thickness across the cut plane, millimeters.
pub const PROBE_THICKNESS: f64 = 0.1;

/// Probe centers per cell edge.
pub const PROBE_GRID: usize = 12;

const VOLUME_EPS: f64 = 1e-9;

/// Cutting axes in the fixed carving order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const CUT_ORDER: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Axis::X => "x",
            Axis::Y => "y",
            Axis::Z => "z",
        }
    }

    /// The two remaining axes, in axis order.
    pub fn perpendicular(self) -> (Axis, Axis) {
        match self {
            Axis::X => (Axis::Y, Axis::Z),
            Axis::Y => (Axis::X, Axis::Z),
            Axis::Z => (Axis::X, Axis::Y),
        }
    }

    /// Assembles a point from the cut coordinate and the two perpendicular
    /// coordinates.
    pub fn position(self, cut: f64, u: f64, v: f64) -> [f64; 3] {
        match self {
            Axis::X => [cut, u, v],
            Axis::Y => [u, cut, v],
            Axis::Z => [u, v, cut],
        }
    }

    /// Euler rotation taking a Z-aligned cylinder onto this axis.
    fn cylinder_rotation(self) -> [f64; 3] {
        match self {
            Axis::X => [0.0, 90.0, 0.0],
            Axis::Y => [90.0, 0.0, 0.0],
            Axis::Z => [0.0, 0.0, 0.0],
        }
    }
}

/// Constants derived once from the hole spec.
#[derive(Debug, Clone, Copy)]
pub struct HoleParams {
    pub radius: f64,

    /// Full drilled length, both sides of the cut.
    pub total_depth: f64,

    /// Analytic volume of the full drill cylinder.
    pub expected_volume: f64,

    /// Candidate distance from the footprint edge.
    pub edge_inset: f64,

    pub spacing: HoleSpacing,
}

impl HoleParams {
    pub fn from_spec(spec: &HoleSpec) -> Self {
        let radius = spec.radius();
        let total_depth = 2.0 * spec.depth_mm;
        Self {
            radius,
            total_depth,
            expected_volume: std::f64::consts::PI * radius * radius * total_depth,
            edge_inset: 2.5 * radius,
            spacing: spec.spacing,
        }
    }
}

/// One potential hole position on a cut plane.
#[derive(Debug, Clone)]
pub struct HoleCandidate {
    pub axis: Axis,

    /// Cut plane coordinate along `axis`.
    pub cut: f64,

    /// Coordinates along the two perpendicular axes.
    pub u: f64,
    pub v: f64,

    /// Ladder position name, for logs.
    pub label: &'static str,
}

/// Measured material rectangle at a cut plane within one cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SectionRect {
    pub u_min: f64,
    pub u_max: f64,
    pub v_min: f64,
    pub v_max: f64,
}

impl SectionRect {
    pub fn width(&self) -> f64 {
        self.u_max - self.u_min
    }

    pub fn height(&self) -> f64 {
        self.v_max - self.v_min
    }

    /// True when the disc of `radius` around `(u, v)` lies strictly inside.
    pub fn contains_disc(&self, u: f64, v: f64, radius: f64) -> bool {
        u - radius > self.u_min
            && u + radius < self.u_max
            && v - radius > self.v_min
            && v + radius < self.v_max
    }
}

/// Counters for one carving run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CarveStats {
    pub planes: u32,
    pub cells_probed: u32,
    pub cells_without_material: u32,
    pub accepted: u32,
    pub rejected_boundary: u32,
    pub rejected_quality: u32,
}

/// Drills alignment holes across every interior cut plane.
///
/// Consumes the incoming solid and returns the carved working solid; when no
/// candidate is accepted the geometry is returned unchanged. `progress`
/// receives monotonic percents in the 30 to 70 band as planes finish.
pub fn carve_alignment_holes<F>(
    solid: Solid,
    bounds: &Bounds,
    plan: &GridPlan,
    spec: &HoleSpec,
    mut progress: F,
) -> Result<(Solid, CarveStats), SplitError>
where
    F: FnMut(u8, &str),
{
    let params = HoleParams::from_spec(spec);
    let mut working = solid;
    let mut stats = CarveStats::default();

    let total_planes = plan.interior_cut_count().max(1);
    let mut planes_done = 0u32;

    for axis in Axis::CUT_ORDER {
        let axis_plan = plan.axes[axis.index()];
        let (u_axis, v_axis) = axis.perpendicular();

        for cut_index in 1..axis_plan.sections {
            let cut =
                f64::from(bounds.min[axis.index()]) + f64::from(cut_index) * axis_plan.piece_size;
            stats.planes += 1;

            let u_sections = plan.axes[u_axis.index()].sections;
            let v_sections = plan.axes[v_axis.index()].sections;
            for cell_u in 0..u_sections {
                for cell_v in 0..v_sections {
                    let u_range = cell_range(bounds, plan, u_axis, cell_u);
                    let v_range = cell_range(bounds, plan, v_axis, cell_v);

                    stats.cells_probed += 1;
                    let Some(rect) =
                        probe_footprint(&working, axis, cut, u_range, v_range)
                    else {
                        stats.cells_without_material += 1;
                        continue;
                    };

                    for candidate in enumerate_candidates(&params, &rect, axis, cut) {
                        if !rect.contains_disc(
                            candidate.u,
                            candidate.v,
                            params.radius + BOUNDARY_MARGIN,
                        ) {
                            stats.rejected_boundary += 1;
                            debug!(
                                axis = axis.label(),
                                cut,
                                label = candidate.label,
                                "hole candidate too close to footprint edge"
                            );
                            continue;
                        }
                        working = evaluate_candidate(working, &params, &candidate, &mut stats)?;
                    }
                }
            }

            planes_done += 1;
            let percent = 30 + (40 * planes_done / total_planes) as u8;
            progress(
                percent,
                &format!(
                    "Drilling alignment holes (plane {} of {})",
                    planes_done, total_planes
                ),
            );
        }
    }

    Ok((working, stats))
}

/// Range covered by cell `index` along `axis`, clipped to the model extent.
fn cell_range(bounds: &Bounds, plan: &GridPlan, axis: Axis, index: u32) -> (f64, f64) {
    let min = f64::from(bounds.min[axis.index()]);
    let max = f64::from(bounds.max[axis.index()]);
    let piece = plan.axes[axis.index()].piece_size;
    let start = min + f64::from(index) * piece;
    (start.min(max), (start + piece).min(max))
}

/// Samples the cut plane with thin test boxes and returns the bounding
/// rectangle of material, `None` when the cell is empty at this plane.
fn probe_footprint(
    working: &Solid,
    axis: Axis,
    cut: f64,
    u_range: (f64, f64),
    v_range: (f64, f64),
) -> Option<SectionRect> {
    let (u0, u1) = u_range;
    let (v0, v1) = v_range;
    if u1 - u0 <= 0.0 || v1 - v0 <= 0.0 {
        return None;
    }

    let step_u = (u1 - u0) / PROBE_GRID as f64;
    let step_v = (v1 - v0) / PROBE_GRID as f64;

    let mut occupied: Option<SectionRect> = None;
    for ku in 0..PROBE_GRID {
        let cu = u0 + (ku as f64 + 0.5) * step_u;
        for kv in 0..PROBE_GRID {
            let cv = v0 + (kv as f64 + 0.5) * step_v;
            if !probe_box_occupied(working, axis, cut, cu, cv) {
                continue;
            }
            let rect = occupied.get_or_insert(SectionRect {
                u_min: cu,
                u_max: cu,
                v_min: cv,
                v_max: cv,
            });
            rect.u_min = rect.u_min.min(cu);
            rect.u_max = rect.u_max.max(cu);
            rect.v_min = rect.v_min.min(cv);
            rect.v_max = rect.v_max.max(cv);
        }
    }

    // Centers undershoot the true footprint by up to half a probe step;
    // expand back out and clamp to the cell.
    occupied.map(|rect| SectionRect {
        u_min: (rect.u_min - step_u / 2.0).max(u0),
        u_max: (rect.u_max + step_u / 2.0).min(u1),
        v_min: (rect.v_min - step_v / 2.0).max(v0),
        v_max: (rect.v_max + step_v / 2.0).min(v1),
    })
}

/// True when the thin test box at `(cut, u, v)` intersects material.
fn probe_box_occupied(working: &Solid, axis: Axis, cut: f64, u: f64, v: f64) -> bool {
    let center = axis.position(cut, u, v);
    let size = axis.position(PROBE_THICKNESS, PROBE_FOOTPRINT, PROBE_FOOTPRINT);

    // Reject on bounds before paying for a boolean.
    if let Some((min, max)) = working.bounds() {
        for i in 0..3 {
            if center[i] + size[i] / 2.0 < min[i] || center[i] - size[i] / 2.0 > max[i] {
                return false;
            }
        }
    } else {
        return false;
    }

    let probe = Solid::cube(size).translate([
        center[0] - size[0] / 2.0,
        center[1] - size[1] / 2.0,
        center[2] - size[2] / 2.0,
    ]);
    working.intersect(&probe).volume() > VOLUME_EPS
}

/// Lays out the candidate ladder for one footprint rectangle.
///
/// Sparse is the four inset corners plus the center; normal adds the four
/// edge midpoints; dense adds four third-points on the diagonals. The wider
/// ladders need room for two inset rows, so they gate on four insets per
/// side.
pub fn enumerate_candidates(
    params: &HoleParams,
    rect: &SectionRect,
    axis: Axis,
    cut: f64,
) -> Vec<HoleCandidate> {
    let inset = params.edge_inset;
    let w = rect.width();
    let h = rect.height();
    if w < 2.0 * inset || h < 2.0 * inset {
        return Vec::new();
    }

    let (u0, u1) = (rect.u_min, rect.u_max);
    let (v0, v1) = (rect.v_min, rect.v_max);
    let mid_u = (u0 + u1) / 2.0;
    let mid_v = (v0 + v1) / 2.0;

    let make = |u: f64, v: f64, label: &'static str| HoleCandidate {
        axis,
        cut,
        u,
        v,
        label,
    };

    let mut candidates = vec![
        make(u0 + inset, v0 + inset, "corner-sw"),
        make(u1 - inset, v0 + inset, "corner-se"),
        make(u0 + inset, v1 - inset, "corner-nw"),
        make(u1 - inset, v1 - inset, "corner-ne"),
        make(mid_u, mid_v, "center"),
    ];

    let roomy = w >= 4.0 * inset && h >= 4.0 * inset;
    if params.spacing != HoleSpacing::Sparse && roomy {
        candidates.extend([
            make(mid_u, v0 + inset, "edge-s"),
            make(mid_u, v1 - inset, "edge-n"),
            make(u0 + inset, mid_v, "edge-w"),
            make(u1 - inset, mid_v, "edge-e"),
        ]);
    }
    if params.spacing == HoleSpacing::Dense && roomy {
        candidates.extend([
            make(u0 + w / 3.0, v0 + h / 3.0, "third-sw"),
            make(u1 - w / 3.0, v1 - h / 3.0, "third-ne"),
            make(u0 + w / 3.0, v1 - h / 3.0, "third-nw"),
            make(u1 - w / 3.0, v0 + h / 3.0, "third-se"),
        ]);
    }

    candidates
}

/// Runs the quality gates for one candidate, returning the next working
/// solid: the drilled trial on acceptance, the original otherwise.
fn evaluate_candidate(
    working: Solid,
    params: &HoleParams,
    candidate: &HoleCandidate,
    stats: &mut CarveStats,
) -> Result<Solid, SplitError> {
    let position = candidate.axis.position(candidate.cut, candidate.u, candidate.v);

    let drill = Solid::cylinder(
        params.total_depth,
        params.radius,
        params.radius,
        CYLINDER_SEGMENTS,
    )
    .rotate(candidate.axis.cylinder_rotation())
    .translate(position);

    let volume_before = working.volume();
    let trial = working.subtract(&drill);
    if !trial.status().is_ok() {
        return Err(SplitError::from_status(trial.status()));
    }

    let removed = volume_before - trial.volume();
    let ratio = removed / params.expected_volume;
    if ratio < MIN_VOLUME_RATIO {
        stats.rejected_quality += 1;
        debug!(
            axis = candidate.axis.label(),
            cut = candidate.cut,
            label = candidate.label,
            ratio,
            "hole candidate rejected by volume ratio"
        );
        return Ok(working);
    }

    if ratio < BORDERLINE_VOLUME_RATIO {
        // Borderline removal: require it concentrated in one half depth,
        // otherwise the drill is puncturing two walls.
        let half_drill = Solid::cylinder(
            params.total_depth / 2.0,
            params.radius,
            params.radius,
            CYLINDER_SEGMENTS,
        )
        .rotate(candidate.axis.cylinder_rotation())
        .translate(position);

        let half_trial = working.subtract(&half_drill);
        if !half_trial.status().is_ok() {
            return Err(SplitError::from_status(half_trial.status()));
        }
        let removed_half = volume_before - half_trial.volume();
        let depth_ratio = if removed > VOLUME_EPS {
            removed_half / removed
        } else {
            0.0
        };
        if depth_ratio < MIN_DEPTH_RATIO {
            stats.rejected_quality += 1;
            debug!(
                axis = candidate.axis.label(),
                cut = candidate.cut,
                label = candidate.label,
                ratio,
                depth_ratio,
                "hole candidate rejected by depth ratio"
            );
            return Ok(working);
        }
    }

    stats.accepted += 1;
    debug!(
        axis = candidate.axis.label(),
        cut = candidate.cut,
        label = candidate.label,
        ratio,
        "alignment hole accepted"
    );
    Ok(trial)
}
