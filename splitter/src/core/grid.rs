//! # Grid Planner
//!
//! Computes, independently per axis, how many sections the model is cut
//! into and how large each piece is. Planning is pure arithmetic over the
//! model extent and the requested maximum piece size; the same inputs always
//! produce the same plan.

use job_types::Dimensions;

/// Per-axis slice of the cutting plan.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisPlan {
    /// Number of pieces along this axis, at least one.
    pub sections: u32,

    /// Piece size in millimeters. `sections * piece_size` covers the extent;
    /// under balanced cutting it equals the extent exactly.
    pub piece_size: f64,
}

/// Complete cutting plan, axes ordered x, y, z.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridPlan {
    pub axes: [AxisPlan; 3],
}

impl GridPlan {
    /// Plans the grid for a model of `extent` cut into pieces no larger than
    /// `max_dims`.
    ///
    /// Balanced cutting equalizes piece sizes when the last row would
    /// otherwise be a sliver smaller than half a piece; when it triggers,
    /// every piece along that axis shrinks to `extent / sections`.
    pub fn compute(extent: [f64; 3], max_dims: &Dimensions, balanced_cutting: bool) -> Self {
        Self {
            axes: std::array::from_fn(|axis| {
                plan_axis(extent[axis], max_dims.axis(axis), balanced_cutting)
            }),
        }
    }

    pub fn sections(&self) -> [u32; 3] {
        [
            self.axes[0].sections,
            self.axes[1].sections,
            self.axes[2].sections,
        ]
    }

    pub fn total_cells(&self) -> u64 {
        self.axes.iter().map(|a| u64::from(a.sections)).product()
    }

    /// True when at least one axis has an interior cut plane.
    pub fn has_interior_cut(&self) -> bool {
        self.axes.iter().any(|a| a.sections > 1)
    }

    /// Total interior cut planes across all axes.
    pub fn interior_cut_count(&self) -> u32 {
        self.axes.iter().map(|a| a.sections - 1).sum()
    }
}

fn plan_axis(extent: f64, max_dim: f64, balanced_cutting: bool) -> AxisPlan {
    let sections = ((extent / max_dim).ceil() as u32).max(1);

    let remainder = extent % max_dim;
    let piece_size = if balanced_cutting && remainder > 0.0 && remainder < 0.5 * max_dim {
        extent / f64::from(sections)
    } else {
        max_dim
    };

    AxisPlan {
        sections,
        piece_size,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dims(x: f64, y: f64, z: f64) -> Dimensions {
        Dimensions::new(x, y, z)
    }

    #[test]
    fn test_single_cell_when_model_fits() {
        let plan = GridPlan::compute([100.0; 3], &dims(200.0, 200.0, 200.0), false);
        assert_eq!(plan.sections(), [1, 1, 1]);
        assert_eq!(plan.total_cells(), 1);
        assert!(!plan.has_interior_cut());
    }

    #[test]
    fn test_exact_two_by_one_by_one() {
        let plan = GridPlan::compute([300.0, 100.0, 50.0], &dims(150.0, 200.0, 200.0), false);
        assert_eq!(plan.sections(), [2, 1, 1]);
        assert_eq!(plan.axes[0].piece_size, 150.0);
        assert_eq!(plan.axes[1].piece_size, 200.0);
    }

    #[test]
    fn test_balanced_does_not_trigger_on_large_remainder() {
        // Remainder 100 is not below half of 150.
        let plan = GridPlan::compute([250.0, 100.0, 50.0], &dims(150.0, 200.0, 200.0), true);
        assert_eq!(plan.axes[0].sections, 2);
        assert_eq!(plan.axes[0].piece_size, 150.0);
    }

    #[test]
    fn test_balanced_triggers_on_small_remainder() {
        // Remainder 50 is below half of 200: both pieces become 125.
        let plan = GridPlan::compute([250.0, 100.0, 50.0], &dims(200.0, 200.0, 200.0), true);
        assert_eq!(plan.axes[0].sections, 2);
        assert_eq!(plan.axes[0].piece_size, 125.0);
        // Coverage is exact under balancing.
        let covered = f64::from(plan.axes[0].sections) * plan.axes[0].piece_size;
        assert_eq!(covered, 250.0);
    }

    #[test]
    fn test_balanced_skips_exact_multiples() {
        let plan = GridPlan::compute([300.0, 100.0, 50.0], &dims(150.0, 200.0, 200.0), true);
        assert_eq!(plan.axes[0].sections, 2);
        assert_eq!(plan.axes[0].piece_size, 150.0);
    }

    #[test]
    fn test_coverage_invariant() {
        for &(extent, max_dim) in &[
            (1.0, 10.0),
            (99.9, 10.0),
            (100.0, 33.0),
            (250.0, 200.0),
            (500.0, 149.5),
        ] {
            for balanced in [false, true] {
                let plan = GridPlan::compute(
                    [extent, 1.0, 1.0],
                    &dims(max_dim, 10.0, 10.0),
                    balanced,
                );
                let axis = plan.axes[0];
                let covered = f64::from(axis.sections) * axis.piece_size;
                assert!(
                    covered >= extent - 1e-9,
                    "extent {} max {} balanced {}: covered {}",
                    extent,
                    max_dim,
                    balanced,
                    covered
                );
            }
        }
    }

    #[test]
    fn test_planning_is_idempotent() {
        let a = GridPlan::compute([321.5, 77.0, 140.2], &dims(90.0, 80.0, 70.0), true);
        let b = GridPlan::compute([321.5, 77.0, 140.2], &dims(90.0, 80.0, 70.0), true);
        assert_eq!(a, b);
    }

    #[test]
    fn test_zero_extent_plans_one_section() {
        let plan = GridPlan::compute([0.0, 10.0, 10.0], &dims(50.0, 50.0, 50.0), false);
        assert_eq!(plan.axes[0].sections, 1);
        assert_eq!(plan.axes[0].piece_size, 50.0);
    }

    #[test]
    fn test_interior_cut_count() {
        let plan = GridPlan::compute([300.0, 300.0, 100.0], &dims(100.0, 150.0, 200.0), false);
        assert_eq!(plan.sections(), [3, 2, 1]);
        assert_eq!(plan.interior_cut_count(), 3);
    }
}
