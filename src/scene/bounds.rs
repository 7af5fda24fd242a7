//! Axis-aligned bounding box with a derived bounding sphere
//!
//! The derived sphere (center = box midpoint, radius = distance to the max
//! corner) is relied on by the impostor resolution and validity heuristics,
//! so every mutator recomputes it immediately.

use crate::foundation::math::{Mat4, Point3, Vec3};
use crate::scene::camera::Camera;

/// Result of classifying a box against a view frustum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CullResult {
    /// Entirely inside the frustum
    CompleteIn,
    /// Straddles at least one frustum plane
    Partial,
    /// Entirely outside the frustum
    CompleteOut,
}

/// Axis-aligned bounding box with an always-fresh derived sphere
#[derive(Debug, Clone, Copy)]
pub struct BoundingBox {
    min: Vec3,
    max: Vec3,
    center: Vec3,
    radius: f32,
}

impl BoundingBox {
    /// Create an empty (degenerate) box that contains nothing
    pub fn empty() -> Self {
        Self {
            min: Vec3::repeat(f32::INFINITY),
            max: Vec3::repeat(f32::NEG_INFINITY),
            center: Vec3::zeros(),
            radius: 0.0,
        }
    }

    /// Create a box from explicit min/max corners
    pub fn new(min: Vec3, max: Vec3) -> Self {
        let mut this = Self::empty();
        this.min = min;
        this.max = max;
        this.update_sphere();
        this
    }

    /// Create a box centered at a point with the given half-extents
    pub fn from_center_extents(center: Vec3, extents: Vec3) -> Self {
        Self::new(center - extents, center + extents)
    }

    /// Reset to the empty (degenerate) state
    pub fn clear(&mut self) {
        *self = Self::empty();
    }

    /// True if no point has been added yet
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x
    }

    /// Minimum corner
    pub fn min(&self) -> Vec3 {
        self.min
    }

    /// Maximum corner
    pub fn max(&self) -> Vec3 {
        self.max
    }

    /// Center of the derived bounding sphere (box midpoint)
    pub fn center(&self) -> Vec3 {
        self.center
    }

    /// Radius of the derived bounding sphere
    pub fn radius(&self) -> f32 {
        self.radius
    }

    /// Replace the minimum corner
    pub fn set_min(&mut self, min: Vec3) {
        self.min = min;
        self.update_sphere();
    }

    /// Replace the maximum corner
    pub fn set_max(&mut self, max: Vec3) {
        self.max = max;
        self.update_sphere();
    }

    /// Grow the box to include a point
    pub fn add_point(&mut self, point: Vec3) {
        self.min = self.min.inf(&point);
        self.max = self.max.sup(&point);
        self.update_sphere();
    }

    /// Grow the box to include another box
    pub fn union(&mut self, other: &BoundingBox) {
        if other.is_empty() {
            return;
        }
        self.min = self.min.inf(&other.min);
        self.max = self.max.sup(&other.max);
        self.update_sphere();
    }

    /// Check if this box contains a point
    pub fn contains_point(&self, point: Vec3) -> bool {
        point.x >= self.min.x
            && point.x <= self.max.x
            && point.y >= self.min.y
            && point.y <= self.max.y
            && point.z >= self.min.z
            && point.z <= self.max.z
    }

    /// The 8 corners of the box
    pub fn corners(&self) -> [Vec3; 8] {
        let (a, b) = (self.min, self.max);
        [
            Vec3::new(a.x, a.y, a.z),
            Vec3::new(b.x, a.y, a.z),
            Vec3::new(a.x, b.y, a.z),
            Vec3::new(b.x, b.y, a.z),
            Vec3::new(a.x, a.y, b.z),
            Vec3::new(b.x, a.y, b.z),
            Vec3::new(a.x, b.y, b.z),
            Vec3::new(b.x, b.y, b.z),
        ]
    }

    /// Recompute the box from its 8 transformed corners.
    ///
    /// Conservative: a rotated box re-wrapped in axis-aligned bounds may be
    /// larger than the tight oriented bounds.
    pub fn transformed(&self, matrix: &Mat4) -> BoundingBox {
        if self.is_empty() {
            return *self;
        }
        let mut result = BoundingBox::empty();
        for corner in self.corners() {
            let p = matrix.transform_point(&Point3::from(corner));
            result.add_point(Vec3::new(p.x, p.y, p.z));
        }
        result
    }

    /// Classify this box (placed by `world`) against the camera frustum.
    ///
    /// Tests the world-space axis-aligned corners against all six frustum
    /// planes. May report `Partial` for a box that is geometrically outside
    /// (corner tests are conservative), but never reports `CompleteOut` for a
    /// box that intersects the frustum.
    pub fn view_frustum_cull(&self, camera: &Camera, world: &Mat4) -> CullResult {
        let world_box = self.transformed(world);
        let corners = world_box.corners();

        let mut all_inside = true;
        for plane in camera.frustum_planes() {
            let mut inside = 0u32;
            for corner in &corners {
                if plane.distance_to_point(*corner) >= 0.0 {
                    inside += 1;
                }
            }
            if inside == 0 {
                return CullResult::CompleteOut;
            }
            if inside < 8 {
                all_inside = false;
            }
        }

        if all_inside {
            CullResult::CompleteIn
        } else {
            CullResult::Partial
        }
    }

    fn update_sphere(&mut self) {
        if self.is_empty() {
            self.center = Vec3::zeros();
            self.radius = 0.0;
        } else {
            self.center = (self.min + self.max) * 0.5;
            self.radius = (self.max - self.center).magnitude();
        }
    }
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Mat4;
    use crate::scene::camera::Camera;
    use approx::assert_relative_eq;

    #[test]
    fn test_contains_point() {
        let bbox = BoundingBox::new(Vec3::new(-1.0, -1.0, -1.0), Vec3::new(1.0, 1.0, 1.0));

        assert!(bbox.contains_point(Vec3::zeros()));
        assert!(bbox.contains_point(Vec3::new(0.5, 0.5, 0.5)));
        assert!(!bbox.contains_point(Vec3::new(2.0, 0.0, 0.0)));
    }

    #[test]
    fn test_sphere_tracks_add_point() {
        let mut bbox = BoundingBox::empty();
        bbox.add_point(Vec3::new(-2.0, 0.0, 0.0));
        bbox.add_point(Vec3::new(2.0, 0.0, 0.0));

        assert_relative_eq!(bbox.center().x, 0.0);
        assert_relative_eq!(bbox.radius(), 2.0);

        // Sphere must not go stale after a further mutation
        bbox.add_point(Vec3::new(0.0, 4.0, 0.0));
        assert!(bbox.radius() > 2.0);
        assert!(bbox.contains_point(Vec3::new(0.0, 3.9, 0.0)));
    }

    #[test]
    fn test_clear_resets_to_degenerate() {
        let mut bbox = BoundingBox::new(Vec3::zeros(), Vec3::new(1.0, 1.0, 1.0));
        bbox.clear();
        assert!(bbox.is_empty());
        assert_eq!(bbox.radius(), 0.0);

        bbox.add_point(Vec3::new(3.0, 3.0, 3.0));
        assert_eq!(bbox.min(), Vec3::new(3.0, 3.0, 3.0));
    }

    #[test]
    fn test_union() {
        let mut a = BoundingBox::new(Vec3::zeros(), Vec3::new(1.0, 1.0, 1.0));
        let b = BoundingBox::new(Vec3::new(2.0, 0.0, 0.0), Vec3::new(3.0, 1.0, 1.0));
        a.union(&b);
        assert_eq!(a.max().x, 3.0);
        assert!(a.contains_point(Vec3::new(2.5, 0.5, 0.5)));
    }

    #[test]
    fn test_transformed_is_conservative() {
        let bbox = BoundingBox::new(Vec3::new(-1.0, -1.0, -1.0), Vec3::new(1.0, 1.0, 1.0));
        let rot = Mat4::from_axis_angle(&Vec3::y_axis(), std::f32::consts::FRAC_PI_4);
        let rotated = bbox.transformed(&rot);

        // A 45-degree rotated unit cube needs sqrt(2) extents in x/z
        assert!(rotated.max().x >= 1.0);
        assert!(rotated.max().x <= std::f32::consts::SQRT_2 + 1e-4);
    }

    #[test]
    fn test_frustum_classification() {
        let camera = Camera::perspective(Vec3::zeros(), 90.0, 1.0, 0.1, 1000.0, 512, 512)
            .looking_along(-Vec3::z_axis().into_inner(), Vec3::y_axis().into_inner());

        // Small box straight ahead
        let ahead = BoundingBox::from_center_extents(Vec3::new(0.0, 0.0, -10.0), Vec3::repeat(1.0));
        assert_eq!(
            ahead.view_frustum_cull(&camera, &Mat4::identity()),
            CullResult::CompleteIn
        );

        // Box behind the camera
        let behind = BoundingBox::from_center_extents(Vec3::new(0.0, 0.0, 10.0), Vec3::repeat(1.0));
        assert_eq!(
            behind.view_frustum_cull(&camera, &Mat4::identity()),
            CullResult::CompleteOut
        );

        // Large box straddling the near plane
        let straddle = BoundingBox::from_center_extents(Vec3::zeros(), Vec3::repeat(5.0));
        assert_eq!(
            straddle.view_frustum_cull(&camera, &Mat4::identity()),
            CullResult::Partial
        );
    }

    #[test]
    fn test_world_matrix_moves_box_out() {
        let camera = Camera::perspective(Vec3::zeros(), 90.0, 1.0, 0.1, 1000.0, 512, 512)
            .looking_along(-Vec3::z_axis().into_inner(), Vec3::y_axis().into_inner());

        let local = BoundingBox::from_center_extents(Vec3::new(0.0, 0.0, -10.0), Vec3::repeat(1.0));
        let world = Mat4::new_translation(&Vec3::new(0.0, 0.0, 100.0));
        assert_eq!(
            local.view_frustum_cull(&camera, &world),
            CullResult::CompleteOut
        );
    }
}
