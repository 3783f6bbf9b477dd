//! Geometric primitives for the CSG kernel: vertices, planes, and convex
//! polygons, plus the plane-side splitting that the BSP tree is built on.

use nalgebra::Vector3;

/// Classification tolerance for plane-side tests.
///
/// Coordinates are millimeters; 1e-5 separates genuine geometry from
/// floating-point noise at the model scales this engine handles.
pub const EPSILON: f64 = 1e-5;

const COPLANAR: u8 = 0;
const FRONT: u8 = 1;
const BACK: u8 = 2;
const SPANNING: u8 = 3;

/// A polygon corner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vertex {
    pub pos: Vector3<f64>,
}

impl Vertex {
    pub fn new(pos: Vector3<f64>) -> Self {
        Self { pos }
    }

    /// Linear interpolation toward `other`, with the parameter clamped so a
    /// split point can never land outside its edge.
    pub fn interpolate(&self, other: &Vertex, t: f64) -> Vertex {
        let t = t.clamp(0.0, 1.0);
        Vertex::new(self.pos + (other.pos - self.pos) * t)
    }
}

/// An oriented plane in normal/offset form: `normal · p == w`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    pub normal: Vector3<f64>,
    pub w: f64,
}

impl Plane {
    /// Plane through three points, `None` when they are collinear.
    pub fn from_points(a: Vector3<f64>, b: Vector3<f64>, c: Vector3<f64>) -> Option<Self> {
        let cross = (b - a).cross(&(c - a));
        let len = cross.norm();
        if len < 1e-12 {
            return None;
        }
        let normal = cross / len;
        Some(Self {
            normal,
            w: normal.dot(&a),
        })
    }

    pub fn flip(&mut self) {
        self.normal = -self.normal;
        self.w = -self.w;
    }

    /// Signed distance of a point from the plane.
    pub fn distance(&self, p: &Vector3<f64>) -> f64 {
        self.normal.dot(p) - self.w
    }

    /// Splits `polygon` by this plane into the four output buckets.
    ///
    /// Coplanar polygons go front or back by normal agreement; spanning
    /// polygons are cut along the plane with interpolated edge crossings.
    /// Fragments degenerating below three vertices are dropped.
    pub fn split_polygon(
        &self,
        polygon: &Polygon,
        coplanar_front: &mut Vec<Polygon>,
        coplanar_back: &mut Vec<Polygon>,
        front: &mut Vec<Polygon>,
        back: &mut Vec<Polygon>,
    ) {
        let mut polygon_type = COPLANAR;
        let mut types = Vec::with_capacity(polygon.vertices.len());

        for vertex in &polygon.vertices {
            let t = self.distance(&vertex.pos);
            let vertex_type = if t < -EPSILON {
                BACK
            } else if t > EPSILON {
                FRONT
            } else {
                COPLANAR
            };
            polygon_type |= vertex_type;
            types.push(vertex_type);
        }

        match polygon_type {
            COPLANAR => {
                if self.normal.dot(&polygon.plane.normal) > 0.0 {
                    coplanar_front.push(polygon.clone());
                } else {
                    coplanar_back.push(polygon.clone());
                }
            }
            FRONT => front.push(polygon.clone()),
            BACK => back.push(polygon.clone()),
            _ => {
                let mut f = Vec::with_capacity(polygon.vertices.len() + 1);
                let mut b = Vec::with_capacity(polygon.vertices.len() + 1);

                for i in 0..polygon.vertices.len() {
                    let j = (i + 1) % polygon.vertices.len();
                    let ti = types[i];
                    let tj = types[j];
                    let vi = polygon.vertices[i];
                    let vj = polygon.vertices[j];

                    if ti != BACK {
                        f.push(vi);
                    }
                    if ti != FRONT {
                        b.push(vi);
                    }
                    if (ti | tj) == SPANNING {
                        let denom = self.normal.dot(&(vj.pos - vi.pos));
                        if denom.abs() > 1e-12 {
                            let t = (self.w - self.normal.dot(&vi.pos)) / denom;
                            let v = vi.interpolate(&vj, t);
                            f.push(v);
                            b.push(v);
                        }
                    }
                }

                if let Some(poly) = Polygon::from_vertices(f) {
                    front.push(poly);
                }
                if let Some(poly) = Polygon::from_vertices(b) {
                    back.push(poly);
                }
            }
        }
    }
}

/// A convex polygon with its supporting plane.
#[derive(Debug, Clone)]
pub struct Polygon {
    pub vertices: Vec<Vertex>,
    pub plane: Plane,
}

impl Polygon {
    /// Builds a polygon, `None` when the vertices do not span a plane.
    pub fn from_vertices(vertices: Vec<Vertex>) -> Option<Self> {
        if vertices.len() < 3 {
            return None;
        }
        let plane = Plane::from_points(vertices[0].pos, vertices[1].pos, vertices[2].pos)?;
        Some(Self { vertices, plane })
    }

    pub fn from_points(points: &[Vector3<f64>]) -> Option<Self> {
        Self::from_vertices(points.iter().map(|p| Vertex::new(*p)).collect())
    }

    /// Reverses orientation.
    pub fn flip(&mut self) {
        self.vertices.reverse();
        self.plane.flip();
    }

    /// Fan-triangulates into vertex position triples.
    pub fn triangles(&self) -> impl Iterator<Item = [Vector3<f64>; 3]> + '_ {
        (1..self.vertices.len().saturating_sub(1)).map(move |i| {
            [
                self.vertices[0].pos,
                self.vertices[i].pos,
                self.vertices[i + 1].pos,
            ]
        })
    }

    /// Signed volume contribution of this polygon's triangle fan, one sixth
    /// of the scalar triple products. Summed over a closed surface this is
    /// the enclosed volume.
    pub fn signed_volume(&self) -> f64 {
        self.triangles()
            .map(|[a, b, c]| a.dot(&b.cross(&c)) / 6.0)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(z: f64) -> Polygon {
        Polygon::from_points(&[
            Vector3::new(0.0, 0.0, z),
            Vector3::new(2.0, 0.0, z),
            Vector3::new(2.0, 2.0, z),
            Vector3::new(0.0, 2.0, z),
        ])
        .unwrap()
    }

    #[test]
    fn test_plane_from_collinear_points_is_none() {
        assert!(Plane::from_points(
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(2.0, 0.0, 0.0),
        )
        .is_none());
    }

    #[test]
    fn test_split_spanning_polygon() {
        let poly = square(0.0);
        let plane = Plane {
            normal: Vector3::new(1.0, 0.0, 0.0),
            w: 1.0,
        };

        let (mut cf, mut cb, mut front, mut back) = (vec![], vec![], vec![], vec![]);
        plane.split_polygon(&poly, &mut cf, &mut cb, &mut front, &mut back);

        assert!(cf.is_empty() && cb.is_empty());
        assert_eq!(front.len(), 1);
        assert_eq!(back.len(), 1);

        // Both halves keep the source orientation.
        assert!(front[0].plane.normal.dot(&poly.plane.normal) > 0.99);
        assert!(back[0].plane.normal.dot(&poly.plane.normal) > 0.99);

        // And split exactly at x = 1.
        for v in &front[0].vertices {
            assert!(v.pos.x >= 1.0 - EPSILON);
        }
        for v in &back[0].vertices {
            assert!(v.pos.x <= 1.0 + EPSILON);
        }
    }

    #[test]
    fn test_split_coplanar_polygon_by_normal_agreement() {
        let poly = square(1.0);
        let plane = Plane {
            normal: Vector3::new(0.0, 0.0, 1.0),
            w: 1.0,
        };

        let (mut cf, mut cb, mut front, mut back) = (vec![], vec![], vec![], vec![]);
        plane.split_polygon(&poly, &mut cf, &mut cb, &mut front, &mut back);
        assert_eq!(cf.len(), 1);
        assert!(cb.is_empty() && front.is_empty() && back.is_empty());
    }

    #[test]
    fn test_flip_reverses_signed_volume() {
        let mut poly = square(3.0);
        let v = poly.signed_volume();
        poly.flip();
        assert!((poly.signed_volume() + v).abs() < 1e-9);
    }
}
