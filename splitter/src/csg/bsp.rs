//! Binary space partitioning tree and the boolean operations built on it.
//!
//! Nodes live in a flat arena indexed by `u32`; every traversal is an
//! explicit work list, so pathological splitting orders cannot exhaust the
//! call stack. The boolean sequences are the classic clip/invert/build
//! combination over two trees.

use super::models::{Plane, Polygon};

#[derive(Debug, Default)]
struct BspNode {
    plane: Option<Plane>,
    front: Option<u32>,
    back: Option<u32>,
    polygons: Vec<Polygon>,
}

/// A BSP tree holding a solid's boundary polygons.
#[derive(Debug)]
pub struct BspTree {
    nodes: Vec<BspNode>,
}

impl BspTree {
    pub fn new(polygons: Vec<Polygon>) -> Self {
        let mut tree = Self {
            nodes: vec![BspNode::default()],
        };
        tree.insert(polygons);
        tree
    }

    fn alloc(&mut self) -> u32 {
        self.nodes.push(BspNode::default());
        (self.nodes.len() - 1) as u32
    }

    /// Inserts polygons, splitting them down to the leaves.
    pub fn insert(&mut self, polygons: Vec<Polygon>) {
        let mut stack = vec![(0u32, polygons)];

        while let Some((idx, polys)) = stack.pop() {
            if polys.is_empty() {
                continue;
            }

            if self.nodes[idx as usize].plane.is_none() {
                self.nodes[idx as usize].plane = Some(polys[0].plane);
            }
            let plane = self.nodes[idx as usize].plane.expect("plane just set");

            let mut coplanar_front = Vec::new();
            let mut coplanar_back = Vec::new();
            let mut front = Vec::new();
            let mut back = Vec::new();
            for poly in &polys {
                plane.split_polygon(
                    poly,
                    &mut coplanar_front,
                    &mut coplanar_back,
                    &mut front,
                    &mut back,
                );
            }

            {
                let node = &mut self.nodes[idx as usize];
                node.polygons.append(&mut coplanar_front);
                node.polygons.append(&mut coplanar_back);
            }

            if !front.is_empty() {
                let child = match self.nodes[idx as usize].front {
                    Some(c) => c,
                    None => {
                        let c = self.alloc();
                        self.nodes[idx as usize].front = Some(c);
                        c
                    }
                };
                stack.push((child, front));
            }
            if !back.is_empty() {
                let child = match self.nodes[idx as usize].back {
                    Some(c) => c,
                    None => {
                        let c = self.alloc();
                        self.nodes[idx as usize].back = Some(c);
                        c
                    }
                };
                stack.push((child, back));
            }
        }
    }

    /// Converts the tree to its complement in place.
    pub fn invert(&mut self) {
        for node in &mut self.nodes {
            for poly in &mut node.polygons {
                poly.flip();
            }
            if let Some(plane) = &mut node.plane {
                plane.flip();
            }
            std::mem::swap(&mut node.front, &mut node.back);
        }
    }

    /// Removes the parts of `polygons` inside this tree's solid.
    pub fn clip_polygons(&self, polygons: Vec<Polygon>) -> Vec<Polygon> {
        let mut result = Vec::new();
        let mut stack = vec![(0u32, polygons)];

        while let Some((idx, polys)) = stack.pop() {
            let node = &self.nodes[idx as usize];
            let Some(plane) = node.plane else {
                result.extend(polys);
                continue;
            };

            let mut coplanar_front = Vec::new();
            let mut coplanar_back = Vec::new();
            let mut front = Vec::new();
            let mut back = Vec::new();
            for poly in &polys {
                plane.split_polygon(
                    poly,
                    &mut coplanar_front,
                    &mut coplanar_back,
                    &mut front,
                    &mut back,
                );
            }
            // Clipping routes coplanar polygons with their half-spaces.
            front.append(&mut coplanar_front);
            back.append(&mut coplanar_back);

            match node.front {
                Some(child) => stack.push((child, front)),
                None => result.extend(front),
            }
            if let Some(child) = node.back {
                stack.push((child, back));
            }
            // Back polygons with no back subtree are inside the solid: clipped.
        }

        result
    }

    /// Clips every polygon stored in this tree against `other`.
    pub fn clip_to(&mut self, other: &BspTree) {
        for i in 0..self.nodes.len() {
            let polys = std::mem::take(&mut self.nodes[i].polygons);
            self.nodes[i].polygons = other.clip_polygons(polys);
        }
    }

    /// Collects every polygon in the tree.
    pub fn all_polygons(&self) -> Vec<Polygon> {
        self.nodes
            .iter()
            .flat_map(|node| node.polygons.iter().cloned())
            .collect()
    }
}

/// `a ∪ b` on boundary polygon sets.
pub fn union(a: Vec<Polygon>, b: Vec<Polygon>) -> Vec<Polygon> {
    let mut a = BspTree::new(a);
    let mut b = BspTree::new(b);
    a.clip_to(&b);
    b.clip_to(&a);
    b.invert();
    b.clip_to(&a);
    b.invert();
    a.insert(b.all_polygons());
    a.all_polygons()
}

/// `a − b` on boundary polygon sets.
pub fn subtract(a: Vec<Polygon>, b: Vec<Polygon>) -> Vec<Polygon> {
    let mut a = BspTree::new(a);
    let mut b = BspTree::new(b);
    a.invert();
    a.clip_to(&b);
    b.clip_to(&a);
    b.invert();
    b.clip_to(&a);
    b.invert();
    a.insert(b.all_polygons());
    a.invert();
    a.all_polygons()
}

/// `a ∩ b` on boundary polygon sets.
pub fn intersect(a: Vec<Polygon>, b: Vec<Polygon>) -> Vec<Polygon> {
    let mut a = BspTree::new(a);
    let mut b = BspTree::new(b);
    a.invert();
    b.clip_to(&a);
    b.invert();
    a.clip_to(&b);
    b.clip_to(&a);
    a.insert(b.all_polygons());
    a.invert();
    a.all_polygons()
}

/// Volume enclosed by a closed polygon set, by the divergence theorem.
pub fn enclosed_volume(polygons: &[Polygon]) -> f64 {
    polygons.iter().map(Polygon::signed_volume).sum::<f64>().abs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::csg::primitives;

    fn unit_cube_at(origin: [f64; 3]) -> Vec<Polygon> {
        primitives::cube_polygons([1.0, 1.0, 1.0], origin)
    }

    #[test]
    fn test_cube_volume() {
        let cube = primitives::cube_polygons([2.0, 3.0, 4.0], [0.0, 0.0, 0.0]);
        assert!((enclosed_volume(&cube) - 24.0).abs() < 1e-9);
    }

    #[test]
    fn test_intersect_overlapping_cubes() {
        let a = unit_cube_at([0.0, 0.0, 0.0]);
        let b = unit_cube_at([0.5, 0.0, 0.0]);
        let result = intersect(a, b);
        assert!((enclosed_volume(&result) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_intersect_disjoint_cubes_is_empty() {
        let a = unit_cube_at([0.0, 0.0, 0.0]);
        let b = unit_cube_at([5.0, 0.0, 0.0]);
        let result = intersect(a, b);
        assert!(enclosed_volume(&result) < 1e-9);
    }

    #[test]
    fn test_subtract_corner_bite() {
        let a = primitives::cube_polygons([2.0, 2.0, 2.0], [0.0, 0.0, 0.0]);
        let b = unit_cube_at([1.0, 1.0, 1.0]);
        let result = subtract(a, b);
        assert!((enclosed_volume(&result) - 7.0).abs() < 1e-6);
    }

    #[test]
    fn test_union_of_disjoint_cubes_adds_volumes() {
        let a = unit_cube_at([0.0, 0.0, 0.0]);
        let b = unit_cube_at([3.0, 0.0, 0.0]);
        let result = union(a, b);
        assert!((enclosed_volume(&result) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_invert_round_trip_preserves_volume() {
        let mut tree = BspTree::new(unit_cube_at([0.0, 0.0, 0.0]));
        tree.invert();
        tree.invert();
        assert!((enclosed_volume(&tree.all_polygons()) - 1.0).abs() < 1e-9);
    }
}
