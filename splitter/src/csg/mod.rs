//! # CSG Kernel
//!
//! Solid modeling behind a single owned handle type. A [`Solid`] is a closed,
//! watertight volume represented by its boundary polygons; booleans run over
//! BSP trees built on demand. The engine never manipulates polygons directly:
//! it constructs primitives, transforms them, combines them, inspects
//! `status()` and `volume()`, and exports meshes.
//!
//! ## Ownership
//!
//! Every `Solid` is exclusively owned and released by `Drop`. The kernel
//! counts live handles per thread, matching its context-per-job model, so
//! tests can assert that a finished job returns to its baseline. `Solid` is
//! deliberately not `Clone`: each handle is created by a constructor or an
//! operation, never duplicated silently.
//!
//! ## Status
//!
//! Constructors and operations record failure in the handle instead of
//! panicking; downstream code accepts only [`SolidStatus::NoError`].

use std::cell::Cell;
use std::collections::HashMap;

use nalgebra::{Rotation3, Vector3};

use crate::{IndexedMesh, MeshBuilder};

pub mod bsp;
pub mod models;
pub mod primitives;

pub use models::{Plane, Polygon, Vertex, EPSILON};

/// Facet count used for every drilled cylinder.
pub const CYLINDER_SEGMENTS: u32 = 32;

/// Boolean results beyond this polygon count are reported as capacity
/// exhaustion rather than ground on indefinitely.
pub const MAX_BOOLEAN_POLYGONS: usize = 2_000_000;

thread_local! {
    // One kernel context per job, one job per thread: the handle count is
    // tracked per thread so concurrent jobs account independently.
    static LIVE_SOLIDS: Cell<usize> = const { Cell::new(0) };
}

/// Number of kernel handles currently alive on this thread.
pub fn live_solids() -> usize {
    LIVE_SOLIDS.with(Cell::get)
}

/// Health of a solid handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolidStatus {
    NoError,
    /// A triangle referenced a vertex outside the table.
    InvalidIndex,
    /// The surface is not closed: some edge is not shared by exactly two
    /// triangles with opposite winding.
    NotManifold,
    /// A boolean blew past the kernel's polygon budget.
    TooComplex,
}

impl SolidStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, SolidStatus::NoError)
    }
}

/// An owned, watertight solid.
#[derive(Debug)]
pub struct Solid {
    polygons: Vec<Polygon>,
    status: SolidStatus,
    bounds: Option<(Vector3<f64>, Vector3<f64>)>,
}

impl Solid {
    fn track(polygons: Vec<Polygon>, status: SolidStatus) -> Self {
        LIVE_SOLIDS.with(|count| count.set(count.get() + 1));
        let bounds = polygon_bounds(&polygons);
        Self {
            polygons,
            status,
            bounds,
        }
    }

    /// Axis-aligned box spanning the origin to `size`.
    pub fn cube(size: [f64; 3]) -> Self {
        Self::track(
            primitives::cube_polygons(size, [0.0, 0.0, 0.0]),
            SolidStatus::NoError,
        )
    }

    /// Cylinder along Z centered on the origin.
    pub fn cylinder(length: f64, r_bottom: f64, r_top: f64, segments: u32) -> Self {
        Self::track(
            primitives::cylinder_polygons(length, r_bottom, r_top, segments),
            SolidStatus::NoError,
        )
    }

    /// Builds a solid from an indexed mesh, verifying index ranges and the
    /// two-triangles-per-edge manifold condition.
    pub fn from_mesh(mesh: &IndexedMesh) -> Self {
        let status = check_mesh(mesh);
        if !status.is_ok() {
            return Self::track(Vec::new(), status);
        }

        let polygons = mesh
            .triangles
            .chunks_exact(3)
            .filter_map(|tri| {
                let a = mesh.vertex(tri[0] as usize);
                let b = mesh.vertex(tri[1] as usize);
                let c = mesh.vertex(tri[2] as usize);
                Polygon::from_points(&[to_vec(a), to_vec(b), to_vec(c)])
            })
            .collect();
        Self::track(polygons, SolidStatus::NoError)
    }

    pub fn status(&self) -> SolidStatus {
        self.status
    }

    /// Enclosed volume. Zero for empty or failed solids.
    pub fn volume(&self) -> f64 {
        if !self.status.is_ok() {
            return 0.0;
        }
        bsp::enclosed_volume(&self.polygons)
    }

    /// Axis-aligned bounds, `None` for an empty solid.
    pub fn bounds(&self) -> Option<([f64; 3], [f64; 3])> {
        self.bounds
            .map(|(min, max)| ([min.x, min.y, min.z], [max.x, max.y, max.z]))
    }

    pub fn polygon_count(&self) -> usize {
        self.polygons.len()
    }

    /// Moves the solid by `offset`, consuming the receiver.
    pub fn translate(self, offset: [f64; 3]) -> Self {
        let delta = Vector3::new(offset[0], offset[1], offset[2]);
        let status = self.status;
        let polygons = map_positions(&self.polygons, |p| p + delta);
        Self::track(polygons, status)
    }

    /// Rotates by euler angles in degrees, applied X then Y then Z,
    /// consuming the receiver.
    pub fn rotate(self, euler_deg: [f64; 3]) -> Self {
        let rotation = Rotation3::from_euler_angles(
            euler_deg[0].to_radians(),
            euler_deg[1].to_radians(),
            euler_deg[2].to_radians(),
        );
        let status = self.status;
        let polygons = map_positions(&self.polygons, |p| rotation * p);
        Self::track(polygons, status)
    }

    /// Volume common to both solids.
    pub fn intersect(&self, other: &Solid) -> Solid {
        if let Some(failed) = self.propagate_failure(other) {
            return failed;
        }
        // Disjoint bounds cannot intersect; skip the tree work.
        if !bounds_overlap(self.bounds, other.bounds) {
            return Self::track(Vec::new(), SolidStatus::NoError);
        }
        let result = bsp::intersect(self.polygons.clone(), other.polygons.clone());
        Self::finish_boolean(result)
    }

    /// This solid minus `other`.
    pub fn subtract(&self, other: &Solid) -> Solid {
        if let Some(failed) = self.propagate_failure(other) {
            return failed;
        }
        if !bounds_overlap(self.bounds, other.bounds) {
            return Self::track(self.polygons.clone(), SolidStatus::NoError);
        }
        let result = bsp::subtract(self.polygons.clone(), other.polygons.clone());
        Self::finish_boolean(result)
    }

    /// Triangulates the boundary into a deduplicated indexed mesh.
    pub fn export_mesh(&self) -> IndexedMesh {
        let mut builder = MeshBuilder::new();
        for polygon in &self.polygons {
            for [a, b, c] in polygon.triangles() {
                let ia = builder.add_vertex(to_f32(a));
                let ib = builder.add_vertex(to_f32(b));
                let ic = builder.add_vertex(to_f32(c));
                builder.add_triangle([ia, ib, ic]);
            }
        }
        builder.finish()
    }

    fn propagate_failure(&self, other: &Solid) -> Option<Solid> {
        if !self.status.is_ok() {
            return Some(Self::track(Vec::new(), self.status));
        }
        if !other.status.is_ok() {
            return Some(Self::track(Vec::new(), other.status));
        }
        None
    }

    fn finish_boolean(polygons: Vec<Polygon>) -> Solid {
        if polygons.len() > MAX_BOOLEAN_POLYGONS {
            return Self::track(Vec::new(), SolidStatus::TooComplex);
        }
        Self::track(polygons, SolidStatus::NoError)
    }
}

impl Drop for Solid {
    fn drop(&mut self) {
        LIVE_SOLIDS.with(|count| count.set(count.get().saturating_sub(1)));
    }
}

fn to_vec(p: [f32; 3]) -> Vector3<f64> {
    Vector3::new(p[0] as f64, p[1] as f64, p[2] as f64)
}

fn to_f32(p: Vector3<f64>) -> [f32; 3] {
    [p.x as f32, p.y as f32, p.z as f32]
}

fn map_positions<F>(polygons: &[Polygon], f: F) -> Vec<Polygon>
where
    F: Fn(Vector3<f64>) -> Vector3<f64>,
{
    polygons
        .iter()
        .filter_map(|poly| {
            let points: Vec<Vector3<f64>> = poly.vertices.iter().map(|v| f(v.pos)).collect();
            Polygon::from_points(&points)
        })
        .collect()
}

fn polygon_bounds(polygons: &[Polygon]) -> Option<(Vector3<f64>, Vector3<f64>)> {
    let mut min = Vector3::repeat(f64::MAX);
    let mut max = Vector3::repeat(f64::MIN);
    let mut any = false;
    for poly in polygons {
        for v in &poly.vertices {
            min = min.inf(&v.pos);
            max = max.sup(&v.pos);
            any = true;
        }
    }
    any.then_some((min, max))
}

fn bounds_overlap(
    a: Option<(Vector3<f64>, Vector3<f64>)>,
    b: Option<(Vector3<f64>, Vector3<f64>)>,
) -> bool {
    match (a, b) {
        (Some((amin, amax)), Some((bmin, bmax))) => {
            (0..3).all(|i| amin[i] <= bmax[i] + EPSILON && bmin[i] <= amax[i] + EPSILON)
        }
        _ => false,
    }
}

/// Validates triangle indices and edge sharing for a candidate solid.
fn check_mesh(mesh: &IndexedMesh) -> SolidStatus {
    if mesh.triangles.is_empty() {
        return SolidStatus::NotManifold;
    }
    let vertex_count = (mesh.vertices.len() / 3) as u32;
    for &idx in &mesh.triangles {
        if idx >= vertex_count {
            return SolidStatus::InvalidIndex;
        }
    }

    // Closed 2-manifold: every directed edge appears exactly once and its
    // reverse exactly once.
    let mut edges: HashMap<(u32, u32), u32> = HashMap::new();
    for tri in mesh.triangles.chunks_exact(3) {
        let (a, b, c) = (tri[0], tri[1], tri[2]);
        if a == b || b == c || c == a {
            return SolidStatus::NotManifold;
        }
        for edge in [(a, b), (b, c), (c, a)] {
            *edges.entry(edge).or_insert(0) += 1;
        }
    }
    for (&(u, v), &count) in &edges {
        if count != 1 || edges.get(&(v, u)) != Some(&1) {
            return SolidStatus::NotManifold;
        }
    }
    SolidStatus::NoError
}
