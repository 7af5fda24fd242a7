//! Generic placed instances (non-cloud scene objects)
//!
//! Free instances are the aircraft, buildings and effects that share the sky
//! with the clouds. The library only needs their placement, bounds,
//! transparency class and material key: enough to cull them, resolve whether
//! they sit inside a cloud volume, and hand them to the backend in the right
//! draw order.

use crate::foundation::math::{Transform, Vec3};
use crate::render::material::MaterialKey;
use crate::scene::bounds::BoundingBox;
use crate::scene::camera::Camera;

slotmap::new_key_type! {
    /// Handle to a free (non-cloud) instance
    pub struct InstanceKey;
}

/// A placed non-cloud object
#[derive(Debug)]
pub struct SceneInstance {
    transform: Transform,
    local_bounds: BoundingBox,
    world_bounds: BoundingBox,
    material: Option<MaterialKey>,
    transparent: bool,
    alive: bool,
}

impl SceneInstance {
    /// Place an instance with the given local-space bounds
    pub fn new(
        transform: Transform,
        local_bounds: BoundingBox,
        material: Option<MaterialKey>,
        transparent: bool,
    ) -> Self {
        let world_bounds = local_bounds.transformed(&transform.to_matrix());
        Self {
            transform,
            local_bounds,
            world_bounds,
            material,
            transparent,
            alive: true,
        }
    }

    /// World-space position
    pub fn position(&self) -> Vec3 {
        self.transform.position
    }

    /// Placement
    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    /// Move the instance, recomputing its world bounds
    pub fn set_transform(&mut self, transform: Transform) {
        self.transform = transform;
        self.world_bounds = self.local_bounds.transformed(&self.transform.to_matrix());
    }

    /// Conservative world-space bounds
    pub fn world_bounds(&self) -> &BoundingBox {
        &self.world_bounds
    }

    /// Material used at draw submission, if any
    pub fn material(&self) -> Option<MaterialKey> {
        self.material
    }

    /// Whether the instance draws in the transparent pass
    pub fn is_transparent(&self) -> bool {
        self.transparent
    }

    /// Whether the instance participates in the frame
    pub fn is_alive(&self) -> bool {
        self.alive
    }

    /// Not-alive instances are skipped by the solver, never torn down
    /// mid-frame
    pub fn set_alive(&mut self, alive: bool) {
        self.alive = alive;
    }

    /// Per-frame hook. Animation/property binding lives outside this
    /// library, so there is nothing view-dependent to refresh here yet.
    pub fn update(&mut self, _camera: &Camera) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_world_bounds_follow_transform() {
        let local = BoundingBox::from_center_extents(Vec3::zeros(), Vec3::repeat(1.0));
        let mut instance =
            SceneInstance::new(Transform::from_position(Vec3::new(10.0, 0.0, 0.0)), local, None, false);

        assert!(instance.world_bounds().contains_point(Vec3::new(10.5, 0.0, 0.0)));

        instance.set_transform(Transform::from_position(Vec3::new(-10.0, 0.0, 0.0)));
        assert!(instance.world_bounds().contains_point(Vec3::new(-10.5, 0.0, 0.0)));
        assert!(!instance.world_bounds().contains_point(Vec3::new(10.5, 0.0, 0.0)));
    }
}
