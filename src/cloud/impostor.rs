//! Billboard impostor for one placed cloud occurrence
//!
//! An [`ImpostorInstance`] caches a rendered snapshot of its cloud volume and
//! only recaptures when the view has changed enough to matter. Validity is
//! judged from two witness points on the bounding sphere: the angle they
//! subtend from the current camera origin (zero at the capture origin) is the
//! view error, compared against a configurable tolerance. Capture happens
//! synchronously through the backend; a frame that invalidates many
//! impostors at once pays for all of those captures before it can display.

use crate::cloud::particles::{CloudKey, CloudVolume, SortDirection};
use crate::foundation::math::{Transform, Vec3};
use crate::render::backend::{BackendError, BackendResult, RenderBackend, TextureId};
use crate::render::lighting::Light;
use crate::render::texture_pool::{PoolError, TextureKey, TexturePool};
use crate::scene::bounds::BoundingBox;
use crate::scene::camera::Camera;
use thiserror::Error;

slotmap::new_key_type! {
    /// Handle to a placed cloud instance
    pub struct CloudInstanceKey;
}

/// Default view-error tolerance before a world impostor goes stale, degrees
pub const DEFAULT_ERROR_TOLERANCE_DEG: f32 = 0.125;

/// Smallest capture resolution, as log2 (16 pixels)
const MIN_LOG2_RESOLUTION: u32 = 4;

/// Impostor update errors
#[derive(Debug, Error)]
pub enum ImpostorError {
    /// Texture pool failure
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// Backend failure during capture
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// A checked-out texture vanished from the pool (internal inconsistency)
    #[error("pooled texture disappeared during capture")]
    MissingTexture,
}

/// Image state of an impostor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImpostorState {
    /// No snapshot captured yet
    NoImage,
    /// Full-viewport snapshot taken from inside (or nearly inside) the
    /// volume; never valid on the next frame
    ScreenImpostor,
    /// Snapshot through a tight off-axis frustum fit to the bounding sphere
    WorldImpostor,
}

/// One placed occurrence of a cloud volume with its cached snapshot
#[derive(Debug)]
pub struct ImpostorInstance {
    transform: Transform,
    cloud: CloudKey,
    world_bounds: BoundingBox,
    state: ImpostorState,
    /// Snapshot texture; the back half when split
    texture: Option<TextureKey>,
    /// Front-half texture, held only while split
    front_texture: Option<TextureKey>,
    capture_position: Vec3,
    witness_near: Vec3,
    witness_far: Vec3,
    cached_log2_resolution: u32,
    split: bool,
    split_point: Vec3,
    cull_count: u32,
    alive: bool,
}

impl ImpostorInstance {
    /// Place a cloud in the world. `cloud_bounds` is the volume's local-space
    /// box; the instance keeps the conservative world-space version.
    pub fn new(cloud: CloudKey, transform: Transform, cloud_bounds: &BoundingBox) -> Self {
        let world_bounds = cloud_bounds.transformed(&transform.to_matrix());
        Self {
            transform,
            cloud,
            world_bounds,
            state: ImpostorState::NoImage,
            texture: None,
            front_texture: None,
            capture_position: Vec3::zeros(),
            witness_near: Vec3::zeros(),
            witness_far: Vec3::zeros(),
            cached_log2_resolution: 0,
            split: false,
            split_point: Vec3::zeros(),
            cull_count: 0,
            alive: true,
        }
    }

    /// The cloud volume this instance references
    pub fn cloud(&self) -> CloudKey {
        self.cloud
    }

    /// World placement of the volume
    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    /// World-space bounds of the placed volume
    pub fn world_bounds(&self) -> &BoundingBox {
        &self.world_bounds
    }

    /// Current image state
    pub fn state(&self) -> ImpostorState {
        self.state
    }

    /// Snapshot texture (the back half when split), if captured
    pub fn back_texture(&self) -> Option<TextureKey> {
        self.texture
    }

    /// Front-half texture, present only while split
    pub fn front_texture(&self) -> Option<TextureKey> {
        self.front_texture
    }

    /// Whether the instance participates in the frame at all
    pub fn is_alive(&self) -> bool {
        self.alive
    }

    /// Instances flagged not-alive are skipped by the solver, never torn
    /// down mid-frame
    pub fn set_alive(&mut self, alive: bool) {
        self.alive = alive;
    }

    /// Whether the instance currently captures/draws as two half-images
    pub fn is_split(&self) -> bool {
        self.split
    }

    /// Enter or leave split mode. The split point is the position of the
    /// nearest contained instance; any change forces a recapture because
    /// split impostors are never valid.
    pub fn set_split(&mut self, split_point: Option<Vec3>) {
        match split_point {
            Some(point) => {
                self.split = true;
                self.split_point = point;
            }
            None => self.split = false,
        }
    }

    /// Record one frame of being culled; returns true once the instance has
    /// been continuously culled long enough that its resources should be
    /// released.
    pub fn note_culled(&mut self, hysteresis_frames: u32) -> bool {
        self.cull_count = self.cull_count.saturating_add(1);
        self.cull_count >= hysteresis_frames
    }

    /// Whether a snapshot exists
    pub fn has_image(&self) -> bool {
        self.state != ImpostorState::NoImage && self.texture.is_some()
    }

    /// Capture resolution (log2) required for the current camera.
    ///
    /// Derived from the projected size of the bounding sphere, downgraded in
    /// three escalating tiers as the camera closes in (captures get
    /// disproportionately expensive exactly when the impostor is about to be
    /// replaced by a screen impostor anyway), and clamped to the viewport
    /// since captures share the caller's framebuffer.
    pub fn required_log2_resolution(&self, camera: &Camera) -> u32 {
        let radius = self.world_bounds.radius();
        let distance = (camera.position - self.world_bounds.center()).magnitude();

        let pixels = camera.projected_pixels(radius, distance).max(1.0);
        let mut log2 = pixels.log2().ceil() as i32;
        if distance < radius * 4.0 {
            log2 -= 1;
        }
        if distance < radius * 3.0 {
            log2 -= 1;
        }
        if distance < radius * 2.0 {
            log2 -= 1;
        }

        // The viewport bound wins over the minimum on degenerate viewports
        let viewport = camera.viewport_width.min(camera.viewport_height).max(1);
        let max_log2 = viewport.ilog2() as i32;
        let min_log2 = (MIN_LOG2_RESOLUTION as i32).min(max_log2);
        log2.clamp(min_log2, max_log2) as u32
    }

    /// Whether the cached snapshot is still usable for this camera.
    ///
    /// Screen impostors and split impostors are never valid. Otherwise the
    /// snapshot survives while the camera stands exactly at the capture
    /// origin, the witness-ray angle stays under `tolerance_rad`, the
    /// required resolution has not grown past the cached one, and the camera
    /// has not crossed to the far side of the volume.
    pub fn is_valid(&self, camera: &Camera, tolerance_rad: f32) -> bool {
        if !self.has_image() {
            return false;
        }
        if self.state == ImpostorState::ScreenImpostor || self.split {
            return false;
        }
        if camera.position == self.capture_position {
            return true;
        }

        let to_near = self.witness_near - camera.position;
        let to_far = self.witness_far - camera.position;
        let near_len = to_near.magnitude();
        let far_len = to_far.magnitude();
        if near_len < 1e-6 || far_len < 1e-6 {
            return false;
        }
        // Longer ray to the near witness than to the far one means the
        // camera moved past the volume to its opposite side
        if near_len > far_len {
            return false;
        }

        let cos = (to_near / near_len).dot(&(to_far / far_len)).clamp(-1.0, 1.0);
        if cos.acos() > tolerance_rad {
            return false;
        }

        self.required_log2_resolution(camera) <= self.cached_log2_resolution
    }

    /// Validate the snapshot and recapture it when needed.
    ///
    /// Blocking: the capture renders through the backend before returning,
    /// so captures always land before the same frame's display.
    pub fn update(
        &mut self,
        camera: &Camera,
        cloud: &mut CloudVolume,
        lights: &[Light],
        phase_weighted: bool,
        tolerance_rad: f32,
        pool: &mut TexturePool,
        backend: &mut dyn RenderBackend,
    ) -> Result<(), ImpostorError> {
        if !self.alive {
            return Ok(());
        }
        self.cull_count = 0;

        if self.is_valid(camera, tolerance_rad) {
            return Ok(());
        }

        let center = self.world_bounds.center();
        let radius = self.world_bounds.radius();
        let distance = (camera.position - center).magnitude();

        let outside = distance > radius + camera.camera_radius();
        let viewport = camera.viewport_width.min(camera.viewport_height) as f32;
        let fits_viewport = camera.projected_pixels(radius, distance) < viewport;

        let (capture_cam, screen) = if outside && fits_viewport {
            (camera.fit_to_sphere(center, radius), false)
        } else {
            (camera.clone(), true)
        };

        self.witness_near = center - capture_cam.forward * radius;
        self.witness_far = center + capture_cam.forward * radius;

        let log2 = self.required_log2_resolution(camera);
        let resolution = 1u32 << log2;

        // Back-to-front from the capture camera; ordering is computed in
        // cloud-local space (rigid placement preserves it)
        let local_dir = self.transform.rotation.inverse() * capture_cam.forward;
        let sort_point = cloud.sort_point_along(local_dir);
        cloud.sort_particles(local_dir, sort_point, SortDirection::Toward);

        let back_id = self.ensure_back_texture(resolution, pool, backend)?;

        if self.split {
            let front_id = self.ensure_front_texture(resolution, pool, backend)?;
            self.capture_pass(
                cloud,
                &capture_cam,
                lights,
                phase_weighted,
                back_id,
                Some(true),
                backend,
            )?;
            self.capture_pass(
                cloud,
                &capture_cam,
                lights,
                phase_weighted,
                front_id,
                Some(false),
                backend,
            )?;
        } else {
            if let Some(front) = self.front_texture.take() {
                pool.check_in(front, backend)?;
            }
            self.capture_pass(
                cloud,
                &capture_cam,
                lights,
                phase_weighted,
                back_id,
                None,
                backend,
            )?;
        }

        self.capture_position = camera.position;
        self.cached_log2_resolution = log2;
        self.state = if screen {
            ImpostorState::ScreenImpostor
        } else {
            ImpostorState::WorldImpostor
        };
        log::trace!(
            "impostor recapture: {} {}x{} split={}",
            if screen { "screen" } else { "world" },
            resolution,
            resolution,
            self.split
        );
        Ok(())
    }

    /// Return all held textures to the pool and forget the snapshot.
    ///
    /// Invoked from the tree's cull callback once the instance has been
    /// continuously culled past the hysteresis count.
    pub fn release_resources(
        &mut self,
        pool: &mut TexturePool,
        backend: &mut dyn RenderBackend,
    ) -> Result<(), PoolError> {
        if let Some(texture) = self.texture.take() {
            pool.check_in(texture, backend)?;
        }
        if let Some(front) = self.front_texture.take() {
            pool.check_in(front, backend)?;
        }
        self.state = ImpostorState::NoImage;
        self.cull_count = 0;
        Ok(())
    }

    fn ensure_back_texture(
        &mut self,
        resolution: u32,
        pool: &mut TexturePool,
        backend: &mut dyn RenderBackend,
    ) -> Result<TextureId, ImpostorError> {
        Self::ensure_texture(&mut self.texture, resolution, pool, backend)
    }

    fn ensure_front_texture(
        &mut self,
        resolution: u32,
        pool: &mut TexturePool,
        backend: &mut dyn RenderBackend,
    ) -> Result<TextureId, ImpostorError> {
        Self::ensure_texture(&mut self.front_texture, resolution, pool, backend)
    }

    /// Keep an exact-size texture in `slot`, swapping through the pool when
    /// the required resolution changed
    fn ensure_texture(
        slot: &mut Option<TextureKey>,
        resolution: u32,
        pool: &mut TexturePool,
        backend: &mut dyn RenderBackend,
    ) -> Result<TextureId, ImpostorError> {
        if let Some(key) = *slot {
            match pool.get(key) {
                Some(texture) if texture.width == resolution && texture.height == resolution => {
                    return Ok(texture.id);
                }
                _ => {
                    pool.check_in(key, backend)?;
                    *slot = None;
                }
            }
        }
        let key = pool.check_out(resolution, resolution, backend)?;
        *slot = Some(key);
        pool.get(key)
            .map(|texture| texture.id)
            .ok_or(ImpostorError::MissingTexture)
    }

    /// Render the (pre-sorted) particles through the capture camera.
    /// `split_side`: None draws everything, Some(true) the half behind the
    /// split point, Some(false) the half in front of it.
    fn capture_pass(
        &self,
        cloud: &CloudVolume,
        capture_cam: &Camera,
        lights: &[Light],
        phase_weighted: bool,
        target: TextureId,
        split_side: Option<bool>,
        backend: &mut dyn RenderBackend,
    ) -> BackendResult<()> {
        backend.begin_capture(capture_cam, target)?;
        for particle in cloud.particles() {
            let world_pos = self.transform.transform_point(particle.position);
            if let Some(behind) = split_side {
                let depth = (world_pos - self.split_point).dot(&capture_cam.forward);
                if behind != (depth >= 0.0) {
                    continue;
                }
            }
            let color = particle.shaded_color(lights, capture_cam.position, phase_weighted);
            backend.draw_particle(world_pos, particle.radius * self.transform.scale, color)?;
        }
        backend.end_capture()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::particles::Particle;
    use crate::foundation::math::Vec4;
    use crate::render::backend::NullBackend;
    use crate::render::texture_pool::TexturePool;
    use slotmap::SlotMap;

    fn test_cloud() -> CloudVolume {
        let mut volume = CloudVolume::new();
        for i in -2..=2 {
            volume.add_particle(Particle::new(
                Vec3::new(i as f32 * 2.0, 0.0, 0.0),
                1.5,
                Vec4::new(0.8, 0.8, 0.85, 0.7),
            ));
        }
        volume
    }

    fn cloud_key() -> CloudKey {
        let mut map: SlotMap<CloudKey, ()> = SlotMap::with_key();
        map.insert(())
    }

    fn far_camera() -> Camera {
        Camera::perspective(Vec3::new(0.0, 0.0, 200.0), 60.0, 1.0, 0.5, 5000.0, 1024, 768)
            .looking_along(-Vec3::z_axis().into_inner(), Vec3::y_axis().into_inner())
    }

    fn tolerance() -> f32 {
        DEFAULT_ERROR_TOLERANCE_DEG.to_radians()
    }

    fn placed_instance(cloud: &CloudVolume) -> ImpostorInstance {
        ImpostorInstance::new(cloud_key(), Transform::identity(), cloud.bounds())
    }

    #[test]
    fn test_fresh_instance_is_never_valid() {
        let cloud = test_cloud();
        let instance = placed_instance(&cloud);
        assert!(!instance.is_valid(&far_camera(), tolerance()));
        assert_eq!(instance.state(), ImpostorState::NoImage);
    }

    #[test]
    fn test_update_captures_world_impostor() {
        let mut cloud = test_cloud();
        let mut instance = placed_instance(&cloud);
        let mut pool = TexturePool::new(32);
        let mut backend = NullBackend::new();
        let camera = far_camera();

        instance
            .update(&camera, &mut cloud, &[], true, tolerance(), &mut pool, &mut backend)
            .unwrap();

        assert_eq!(instance.state(), ImpostorState::WorldImpostor);
        assert!(instance.back_texture().is_some());
        assert!(instance.front_texture().is_none());
        // Same camera origin: still valid, no recapture needed
        assert!(instance.is_valid(&camera, tolerance()));
    }

    #[test]
    fn test_small_camera_motion_stays_valid() {
        let mut cloud = test_cloud();
        let mut instance = placed_instance(&cloud);
        let mut pool = TexturePool::new(32);
        let mut backend = NullBackend::new();
        let camera = far_camera();

        instance
            .update(&camera, &mut cloud, &[], true, tolerance(), &mut pool, &mut backend)
            .unwrap();

        // A nanometer sideways: witness angle far below 0.125 degrees
        let mut nudged = camera.clone();
        nudged.position += Vec3::new(1e-4, 0.0, 0.0);
        assert!(instance.is_valid(&nudged, tolerance()));

        // A large lateral move: stale
        let mut moved = camera;
        moved.position += Vec3::new(50.0, 0.0, 0.0);
        assert!(!instance.is_valid(&moved, tolerance()));
    }

    #[test]
    fn test_opposite_side_invalidates() {
        let mut cloud = test_cloud();
        let mut instance = placed_instance(&cloud);
        let mut pool = TexturePool::new(32);
        let mut backend = NullBackend::new();
        let camera = far_camera();

        instance
            .update(&camera, &mut cloud, &[], true, tolerance(), &mut pool, &mut backend)
            .unwrap();

        let mut opposite = far_camera();
        opposite.position = Vec3::new(0.0, 0.0, -200.0);
        assert!(!instance.is_valid(&opposite, tolerance()));
    }

    #[test]
    fn test_inside_volume_becomes_screen_impostor() {
        let mut cloud = test_cloud();
        let mut instance = placed_instance(&cloud);
        let mut pool = TexturePool::new(32);
        let mut backend = NullBackend::new();

        let mut camera = far_camera();
        camera.position = cloud.bounds().center();

        instance
            .update(&camera, &mut cloud, &[], true, tolerance(), &mut pool, &mut backend)
            .unwrap();

        assert_eq!(instance.state(), ImpostorState::ScreenImpostor);
        // Screen impostors are unconditionally stale
        assert!(!instance.is_valid(&camera, tolerance()));
    }

    #[test]
    fn test_split_capture_holds_two_textures_and_stays_invalid() {
        let mut cloud = test_cloud();
        let mut instance = placed_instance(&cloud);
        let mut pool = TexturePool::new(32);
        let mut backend = NullBackend::new();
        let camera = far_camera();

        instance.set_split(Some(cloud.bounds().center()));
        instance
            .update(&camera, &mut cloud, &[], true, tolerance(), &mut pool, &mut backend)
            .unwrap();

        assert!(instance.back_texture().is_some());
        assert!(instance.front_texture().is_some());
        assert_eq!(pool.checked_out_count(), 2);
        assert!(!instance.is_valid(&camera, tolerance()));

        // Leaving split mode returns the front texture on the next capture
        instance.set_split(None);
        instance
            .update(&camera, &mut cloud, &[], true, tolerance(), &mut pool, &mut backend)
            .unwrap();
        assert!(instance.front_texture().is_none());
        assert_eq!(pool.checked_out_count(), 1);
    }

    #[test]
    fn test_release_returns_textures() {
        let mut cloud = test_cloud();
        let mut instance = placed_instance(&cloud);
        let mut pool = TexturePool::new(32);
        let mut backend = NullBackend::new();
        let camera = far_camera();

        instance
            .update(&camera, &mut cloud, &[], true, tolerance(), &mut pool, &mut backend)
            .unwrap();
        assert_eq!(pool.checked_out_count(), 1);

        instance.release_resources(&mut pool, &mut backend).unwrap();
        assert_eq!(pool.checked_out_count(), 0);
        assert_eq!(pool.available_count(), 1);
        assert!(!instance.has_image());
    }

    #[test]
    fn test_cull_hysteresis() {
        let cloud = test_cloud();
        let mut instance = placed_instance(&cloud);

        for _ in 0..99 {
            assert!(!instance.note_culled(100));
        }
        assert!(instance.note_culled(100));
    }

    #[test]
    fn test_resolution_grows_with_proximity_then_downgrades() {
        let cloud = test_cloud();
        let instance = placed_instance(&cloud);

        let mut far = far_camera();
        far.position = Vec3::new(0.0, 0.0, 400.0);
        let mut near = far_camera();
        near.position = Vec3::new(0.0, 0.0, 40.0);

        let far_res = instance.required_log2_resolution(&far);
        let near_res = instance.required_log2_resolution(&near);
        assert!(near_res >= far_res);

        // Very close: the downgrade tiers bite and the viewport clamp holds
        let mut touching = far_camera();
        touching.position = Vec3::new(0.0, 0.0, cloud.bounds().radius() * 1.1);
        let close_res = instance.required_log2_resolution(&touching);
        assert!(close_res <= 768u32.ilog2());
    }

    #[test]
    fn test_tiny_viewport_degrades_instead_of_failing() {
        let mut cloud = test_cloud();
        let mut instance = placed_instance(&cloud);
        let mut pool = TexturePool::new(32);
        let mut backend = NullBackend::new();

        // Smaller than the usual 16-pixel floor
        let mut camera = far_camera();
        camera.viewport_width = 8;
        camera.viewport_height = 8;

        assert_eq!(instance.required_log2_resolution(&camera), 3);

        instance
            .update(&camera, &mut cloud, &[], true, tolerance(), &mut pool, &mut backend)
            .unwrap();
        let key = instance.back_texture().unwrap();
        assert_eq!(pool.get(key).unwrap().width, 8);
    }
}
