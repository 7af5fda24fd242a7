//! Camera value type and frustum mathematics
//!
//! A [`Camera`] is a plain value supplied by the host once per frame: origin,
//! orthonormal basis, near/far distances, frustum half-extents at the near
//! plane, and the viewport size in pixels. The same type doubles as the
//! capture camera for impostor snapshots ([`Camera::fit_to_sphere`] builds a
//! tight off-axis frustum around a bounding sphere).

use crate::foundation::math::{utils, Vec3};

/// Plane defined by normal and distance from origin
#[derive(Debug, Clone, Copy)]
pub struct Plane {
    /// Normal vector (normalized, points toward the inside half-space)
    pub normal: Vec3,
    /// Distance from origin along the normal
    pub distance: f32,
}

impl Plane {
    /// Create a plane from a normal and a point on the plane
    pub fn from_point_normal(point: Vec3, normal: Vec3) -> Self {
        let normal = normal.normalize();
        Self {
            normal,
            distance: -normal.dot(&point),
        }
    }

    /// Signed distance from the plane to a point (positive = inside)
    pub fn distance_to_point(&self, point: Vec3) -> f32 {
        self.normal.dot(&point) + self.distance
    }
}

/// Camera state for one frame: position, basis, frustum, viewport
#[derive(Debug, Clone)]
pub struct Camera {
    /// Camera origin in world space
    pub position: Vec3,
    /// View direction (normalized)
    pub forward: Vec3,
    /// Up axis (normalized, orthogonal to forward)
    pub up: Vec3,
    /// Right axis (normalized, orthogonal to forward and up)
    pub right: Vec3,
    /// Distance to the near plane
    pub near: f32,
    /// Distance to the far plane
    pub far: f32,
    /// Frustum half-width at the near plane
    pub half_width: f32,
    /// Frustum half-height at the near plane
    pub half_height: f32,
    /// Viewport width in pixels
    pub viewport_width: u32,
    /// Viewport height in pixels
    pub viewport_height: u32,
}

impl Camera {
    /// Create a perspective camera looking down -Z with +Y up.
    ///
    /// `fov_degrees` is the vertical field of view; the half-extents at the
    /// near plane are derived from it and `aspect`.
    pub fn perspective(
        position: Vec3,
        fov_degrees: f32,
        aspect: f32,
        near: f32,
        far: f32,
        viewport_width: u32,
        viewport_height: u32,
    ) -> Self {
        let half_height = near * (utils::deg_to_rad(fov_degrees) * 0.5).tan();
        let half_width = half_height * aspect;
        Self {
            position,
            forward: -Vec3::z_axis().into_inner(),
            up: Vec3::y_axis().into_inner(),
            right: Vec3::x_axis().into_inner(),
            near,
            far,
            half_width,
            half_height,
            viewport_width,
            viewport_height,
        }
    }

    /// Reorient the camera along a view direction, re-orthonormalizing the
    /// basis from the supplied up hint.
    pub fn looking_along(mut self, forward: Vec3, up: Vec3) -> Self {
        self.forward = forward.normalize();
        self.right = self.forward.cross(&up).normalize();
        self.up = self.right.cross(&self.forward);
        self
    }

    /// Reorient the camera to look at a target point
    pub fn look_at(self, target: Vec3, up: Vec3) -> Self {
        let forward = target - self.position;
        self.looking_along(forward, up)
    }

    /// The six frustum planes (near, far, left, right, bottom, top), normals
    /// pointing inward.
    pub fn frustum_planes(&self) -> [Plane; 6] {
        let f = self.forward;
        let u = self.up;
        let r = self.right;
        let n = self.near;

        let left_edge = f * n - r * self.half_width;
        let right_edge = f * n + r * self.half_width;
        let bottom_edge = f * n - u * self.half_height;
        let top_edge = f * n + u * self.half_height;

        [
            Plane::from_point_normal(self.position + f * n, f),
            Plane::from_point_normal(self.position + f * self.far, -f),
            Plane::from_point_normal(self.position, left_edge.cross(&u)),
            Plane::from_point_normal(self.position, u.cross(&right_edge)),
            Plane::from_point_normal(self.position, r.cross(&bottom_edge)),
            Plane::from_point_normal(self.position, top_edge.cross(&r)),
        ]
    }

    /// Effective camera radius used by the inside/outside impostor decision:
    /// the distance from the origin to a near-plane corner in the horizontal
    /// plane, `sqrt(half_width^2 + near^2)`.
    pub fn camera_radius(&self) -> f32 {
        (self.half_width * self.half_width + self.near * self.near).sqrt()
    }

    /// Projected diameter of a sphere in pixels at the given distance.
    ///
    /// Zero when the sphere center is at or behind the origin plane.
    pub fn projected_pixels(&self, radius: f32, distance: f32) -> f32 {
        if distance <= 0.0 {
            return 0.0;
        }
        let focal_px = (self.viewport_height as f32 * 0.5) * (self.near / self.half_height);
        (2.0 * radius / distance) * focal_px
    }

    /// Build a tight off-axis capture frustum around a bounding sphere, seen
    /// from this camera's position with this camera's up hint.
    ///
    /// Only meaningful when the position is outside the sphere; the near
    /// distance is clamped to stay positive regardless.
    pub fn fit_to_sphere(&self, center: Vec3, radius: f32) -> Camera {
        let to_center = center - self.position;
        let distance = to_center.magnitude();

        let near = (distance - radius).max(1e-3);
        let far = distance + radius;
        // tan of the half-angle of the cone tangent to the sphere
        let tangent_sq = (distance * distance - radius * radius).max(1e-6);
        let tan_half = radius / tangent_sq.sqrt();
        let half_extent = near * tan_half;

        Camera {
            position: self.position,
            near,
            far,
            half_width: half_extent,
            half_height: half_extent,
            viewport_width: self.viewport_width,
            viewport_height: self.viewport_height,
            ..self.clone()
        }
        .looking_along(to_center, self.up)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn test_camera() -> Camera {
        Camera::perspective(Vec3::zeros(), 90.0, 1.0, 1.0, 100.0, 512, 512)
            .looking_along(-Vec3::z_axis().into_inner(), Vec3::y_axis().into_inner())
    }

    #[test]
    fn test_basis_is_orthonormal() {
        let cam = test_camera().looking_along(Vec3::new(1.0, 2.0, -0.5), Vec3::new(0.0, 1.0, 0.0));
        assert_relative_eq!(cam.forward.magnitude(), 1.0, epsilon = 1e-5);
        assert_relative_eq!(cam.forward.dot(&cam.up), 0.0, epsilon = 1e-5);
        assert_relative_eq!(cam.forward.dot(&cam.right), 0.0, epsilon = 1e-5);
        assert_relative_eq!(cam.up.dot(&cam.right), 0.0, epsilon = 1e-5);
    }

    #[test]
    fn test_frustum_planes_contain_interior_point() {
        let cam = test_camera();
        let inside = Vec3::new(0.0, 0.0, -10.0);
        for plane in cam.frustum_planes() {
            assert!(plane.distance_to_point(inside) > 0.0);
        }
    }

    #[test]
    fn test_frustum_planes_reject_exterior_points() {
        let cam = test_camera();
        // Behind the near plane
        let behind = Vec3::new(0.0, 0.0, 0.5);
        assert!(cam
            .frustum_planes()
            .iter()
            .any(|p| p.distance_to_point(behind) < 0.0));
        // Far off to the side at moderate depth
        let side = Vec3::new(100.0, 0.0, -10.0);
        assert!(cam
            .frustum_planes()
            .iter()
            .any(|p| p.distance_to_point(side) < 0.0));
    }

    #[test]
    fn test_camera_radius() {
        let cam = test_camera();
        // 90-degree fov, aspect 1, near 1 => half_width = 1
        assert_relative_eq!(cam.camera_radius(), std::f32::consts::SQRT_2, epsilon = 1e-4);
    }

    #[test]
    fn test_fit_to_sphere_encloses_sphere() {
        let cam = test_camera();
        let center = Vec3::new(5.0, 2.0, -50.0);
        let radius = 3.0;
        let capture = cam.fit_to_sphere(center, radius);

        assert_relative_eq!(
            capture.forward.dot(&(center - capture.position).normalize()),
            1.0,
            epsilon = 1e-4
        );

        // Sphere extreme points along the capture axes stay inside the frustum
        for offset in [
            capture.up * radius * 0.99,
            -capture.up * radius * 0.99,
            capture.right * radius * 0.99,
            -capture.right * radius * 0.99,
            capture.forward * radius * 0.99,
            -capture.forward * radius * 0.99,
        ] {
            let p = center + offset;
            for plane in capture.frustum_planes() {
                assert!(
                    plane.distance_to_point(p) > -1e-3,
                    "point {p:?} fell outside the capture frustum"
                );
            }
        }
    }

    #[test]
    fn test_projected_pixels_shrinks_with_distance() {
        let cam = test_camera();
        let near_size = cam.projected_pixels(1.0, 10.0);
        let far_size = cam.projected_pixels(1.0, 100.0);
        assert!(near_size > far_size);
        assert!(far_size > 0.0);
    }
}
