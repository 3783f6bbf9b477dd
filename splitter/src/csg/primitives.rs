//! Boundary polygon sets for the kernel's primitive solids.

use nalgebra::Vector3;

use super::models::Polygon;

/// Axis-aligned box spanning `origin` to `origin + size`, faces wound
/// outward.
pub fn cube_polygons(size: [f64; 3], origin: [f64; 3]) -> Vec<Polygon> {
    let [sx, sy, sz] = size;
    let o = Vector3::new(origin[0], origin[1], origin[2]);
    let p = |x: f64, y: f64, z: f64| o + Vector3::new(x, y, z);

    let faces: [[Vector3<f64>; 4]; 6] = [
        // z = 0, outward -Z
        [p(0.0, 0.0, 0.0), p(0.0, sy, 0.0), p(sx, sy, 0.0), p(sx, 0.0, 0.0)],
        // z = sz, outward +Z
        [p(0.0, 0.0, sz), p(sx, 0.0, sz), p(sx, sy, sz), p(0.0, sy, sz)],
        // y = 0, outward -Y
        [p(0.0, 0.0, 0.0), p(sx, 0.0, 0.0), p(sx, 0.0, sz), p(0.0, 0.0, sz)],
        // y = sy, outward +Y
        [p(0.0, sy, 0.0), p(0.0, sy, sz), p(sx, sy, sz), p(sx, sy, 0.0)],
        // x = 0, outward -X
        [p(0.0, 0.0, 0.0), p(0.0, 0.0, sz), p(0.0, sy, sz), p(0.0, sy, 0.0)],
        // x = sx, outward +X
        [p(sx, 0.0, 0.0), p(sx, sy, 0.0), p(sx, sy, sz), p(sx, 0.0, sz)],
    ];

    faces
        .iter()
        .filter_map(|corners| Polygon::from_points(corners))
        .collect()
}

/// Cylinder along the Z axis centered on the origin: caps at `±length/2`,
/// radii `r_bottom` and `r_top`, `segments` flat side faces.
pub fn cylinder_polygons(
    length: f64,
    r_bottom: f64,
    r_top: f64,
    segments: u32,
) -> Vec<Polygon> {
    let segments = segments.max(3);
    let half = length / 2.0;
    let bottom_center = Vector3::new(0.0, 0.0, -half);
    let top_center = Vector3::new(0.0, 0.0, half);

    let ring = |radius: f64, z: f64, i: u32| {
        let theta = std::f64::consts::TAU * f64::from(i % segments) / f64::from(segments);
        Vector3::new(radius * theta.cos(), radius * theta.sin(), z)
    };

    let mut polygons = Vec::with_capacity(segments as usize * 3);
    for i in 0..segments {
        let j = i + 1;
        let bi = ring(r_bottom, -half, i);
        let bj = ring(r_bottom, -half, j);
        let ti = ring(r_top, half, i);
        let tj = ring(r_top, half, j);

        // Caps wound outward (-Z below, +Z above).
        if let Some(poly) = Polygon::from_points(&[bottom_center, bj, bi]) {
            polygons.push(poly);
        }
        if let Some(poly) = Polygon::from_points(&[top_center, ti, tj]) {
            polygons.push(poly);
        }
        if let Some(poly) = Polygon::from_points(&[bi, bj, tj, ti]) {
            polygons.push(poly);
        }
    }
    polygons
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::csg::bsp::enclosed_volume;

    #[test]
    fn test_cube_is_closed_with_expected_volume() {
        let cube = cube_polygons([2.0, 5.0, 1.0], [10.0, -3.0, 0.0]);
        assert_eq!(cube.len(), 6);
        assert!((enclosed_volume(&cube) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_cylinder_volume_approaches_analytic() {
        let r = 2.0;
        let length = 10.0;
        let cylinder = cylinder_polygons(length, r, r, 32);
        let analytic = std::f64::consts::PI * r * r * length;
        let volume = enclosed_volume(&cylinder);
        // A 32-gon prism underestimates the circle by sin(tau/n)*n/tau.
        let ratio = volume / analytic;
        assert!(ratio > 0.99 && ratio <= 1.0, "ratio {}", ratio);
    }

    #[test]
    fn test_cube_faces_point_outward() {
        let cube = cube_polygons([2.0, 2.0, 2.0], [0.0, 0.0, 0.0]);
        let center = nalgebra::Vector3::new(1.0, 1.0, 1.0);
        for face in &cube {
            let to_face = face.vertices[0].pos - center;
            assert!(face.plane.normal.dot(&to_face) > 0.0);
        }
    }
}
