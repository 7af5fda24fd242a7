//! Per-frame visibility orchestration
//!
//! The [`SceneManager`] owns the clouds, their placed impostor instances,
//! the free instances sharing the sky with them, and the explicit
//! [`SceneContext`] (texture pool plus light/material registries) that
//! replaces any process-wide state. Each frame runs `update` then `display`
//! on the calling thread, in lockstep: all captures and illumination sweeps
//! issued by `update` are blocking backend calls and land strictly before
//! `display` submits draws.

use crate::cloud::impostor::{CloudInstanceKey, ImpostorError, ImpostorInstance, ImpostorState};
use crate::cloud::particles::{CloudKey, CloudVolume};
use crate::foundation::math::{Mat4, Transform, Vec3};
use crate::render::backend::{BackendError, RenderBackend, TextureId};
use crate::render::lighting::{Light, LightId};
use crate::render::material::{Material, MaterialKey};
use crate::render::texture_pool::{PoolError, TexturePool};
use crate::scene::bounds::{BoundingBox, CullResult};
use crate::scene::camera::Camera;
use crate::scene::instance::{InstanceKey, SceneInstance};
use crate::spatial::bounds_tree::{BoundsTree, DEFAULT_LEAF_CAPACITY};
use serde::{Deserialize, Serialize};
use slotmap::SlotMap;
use std::collections::HashMap;
use thiserror::Error;

/// Scene manager errors
#[derive(Debug, Error)]
pub enum SceneError {
    /// A cloud key did not resolve to a registered volume
    #[error("unknown cloud {0:?}")]
    UnknownCloud(CloudKey),

    /// A cloud instance key did not resolve
    #[error("unknown cloud instance {0:?}")]
    UnknownCloudInstance(CloudInstanceKey),

    /// A light id did not resolve
    #[error("unknown light {0:?}")]
    UnknownLight(LightId),

    /// Impostor capture failure
    #[error(transparent)]
    Impostor(#[from] ImpostorError),

    /// Texture pool failure
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// Backend failure
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Tunables for the visibility and caching pipeline.
///
/// The bucket cap and hysteresis counter are configuration, not semantic
/// invariants; the defaults match long-standing practice for impostor cloud
/// fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneConfig {
    /// Per-(log2 w, log2 h) cap on pooled available textures
    pub texture_bucket_cap: usize,

    /// Consecutive culled frames before an impostor releases its textures
    pub cull_hysteresis_frames: u32,

    /// Witness-ray angle tolerance before a world impostor goes stale, degrees
    pub error_tolerance_deg: f32,

    /// Leaf capacity of the cloud bounding-volume tree
    pub tree_leaf_capacity: usize,

    /// Apply the anisotropic phase function when shading particles
    pub phase_weighting: bool,

    /// Scattering coefficient applied during the illumination sweep
    pub scattering: f32,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            texture_bucket_cap: 32,
            cull_hysteresis_frames: 100,
            error_tolerance_deg: crate::cloud::impostor::DEFAULT_ERROR_TOLERANCE_DEG,
            tree_leaf_capacity: DEFAULT_LEAF_CAPACITY,
            phase_weighting: true,
            scattering: 0.8,
        }
    }
}

/// Explicitly owned shared state: texture pool and registries.
///
/// Constructed by the host and moved into the manager, so its lifetime is
/// exactly the manager's; nothing here is process-wide.
#[derive(Debug)]
pub struct SceneContext {
    pub(crate) texture_pool: TexturePool,
    pub(crate) materials: SlotMap<MaterialKey, Material>,
    pub(crate) lights: Vec<Light>,
}

impl SceneContext {
    /// Create a context sized by the configuration
    pub fn new(config: &SceneConfig) -> Self {
        Self {
            texture_pool: TexturePool::new(config.texture_bucket_cap),
            materials: SlotMap::with_key(),
            lights: Vec::new(),
        }
    }

    /// The texture pool
    pub fn texture_pool(&self) -> &TexturePool {
        &self.texture_pool
    }
}

/// Contained instances of one visible cloud, split by transparency class.
/// Both lists are kept sorted farthest-from-camera first after step 5.
#[derive(Debug, Default)]
struct ContainerRecord {
    opaque: Vec<InstanceKey>,
    transparent: Vec<InstanceKey>,
}

/// An entry of the final back-to-front draw list
#[derive(Debug, Clone, Copy)]
enum DrawItem {
    Cloud(CloudInstanceKey),
    Free(InstanceKey),
}

/// Per-frame visibility solver and draw-order resolver
pub struct SceneManager {
    config: SceneConfig,
    context: SceneContext,
    clouds: SlotMap<CloudKey, CloudVolume>,
    cloud_instances: SlotMap<CloudInstanceKey, ImpostorInstance>,
    instances: SlotMap<InstanceKey, SceneInstance>,
    cloud_tree: BoundsTree<CloudInstanceKey>,
    tree_dirty: bool,
    reshade: bool,
    error_tolerance_rad: f32,
    // results of the most recent update()
    visible_clouds: Vec<CloudInstanceKey>,
    containers: HashMap<CloudInstanceKey, ContainerRecord>,
    free_draw_list: Vec<InstanceKey>,
}

impl SceneManager {
    /// Create a manager with a fresh context
    pub fn new(config: SceneConfig) -> Self {
        let context = SceneContext::new(&config);
        Self::with_context(config, context)
    }

    /// Create a manager around an explicitly constructed context
    pub fn with_context(config: SceneConfig, context: SceneContext) -> Self {
        let error_tolerance_rad = config.error_tolerance_deg.to_radians();
        Self {
            config,
            context,
            clouds: SlotMap::with_key(),
            cloud_instances: SlotMap::with_key(),
            instances: SlotMap::with_key(),
            cloud_tree: BoundsTree::new(),
            tree_dirty: false,
            reshade: false,
            error_tolerance_rad,
            visible_clouds: Vec::new(),
            containers: HashMap::new(),
            free_draw_list: Vec::new(),
        }
    }

    /// Register a cloud volume, returning its handle
    pub fn add_cloud(&mut self, volume: CloudVolume) -> CloudKey {
        self.reshade = true;
        self.clouds.insert(volume)
    }

    /// Place an instance of a registered cloud
    pub fn add_cloud_instance(
        &mut self,
        cloud: CloudKey,
        transform: Transform,
    ) -> Result<CloudInstanceKey, SceneError> {
        let volume = self.clouds.get(cloud).ok_or(SceneError::UnknownCloud(cloud))?;
        let instance = ImpostorInstance::new(cloud, transform, volume.bounds());
        let key = self.cloud_instances.insert(instance);
        self.tree_dirty = true;
        Ok(key)
    }

    /// Add a free (non-cloud) instance
    pub fn add_instance(
        &mut self,
        transform: Transform,
        local_bounds: BoundingBox,
        material: Option<MaterialKey>,
        transparent: bool,
    ) -> InstanceKey {
        self.instances
            .insert(SceneInstance::new(transform, local_bounds, material, transparent))
    }

    /// Register a light; clouds are reshaded on the next update
    pub fn add_light(&mut self, light: Light) -> LightId {
        self.context.lights.push(light);
        self.reshade = true;
        LightId(self.context.lights.len() - 1)
    }

    /// Look up a registered light; unknown ids are non-fatal
    pub fn light(&self, id: LightId) -> Option<&Light> {
        self.context.lights.get(id.0)
    }

    /// Register a material
    pub fn add_material(&mut self, material: Material) -> MaterialKey {
        self.context.materials.insert(material)
    }

    /// Look up a registered material; unknown keys are non-fatal
    pub fn material(&self, key: MaterialKey) -> Option<&Material> {
        self.context.materials.get(key)
    }

    /// Mutable access to a free instance (placement changes, alive flag)
    pub fn instance_mut(&mut self, key: InstanceKey) -> Option<&mut SceneInstance> {
        self.instances.get_mut(key)
    }

    /// Access a cloud instance
    pub fn cloud_instance(&self, key: CloudInstanceKey) -> Option<&ImpostorInstance> {
        self.cloud_instances.get(key)
    }

    /// The context owned by this manager
    pub fn context(&self) -> &SceneContext {
        &self.context
    }

    /// Request a full relighting pass on the next update
    pub fn force_reshade(&mut self) {
        self.reshade = true;
    }

    /// Change the impostor staleness tolerance
    pub fn set_error_tolerance_angle(&mut self, degrees: f32) {
        self.error_tolerance_rad = degrees.to_radians();
    }

    /// Rebuild the cloud bounding-volume tree from scratch.
    ///
    /// Called automatically by `update` after instances were added; exposed
    /// for hosts that add many instances and want to pay the cost eagerly.
    pub fn rebuild_bounds_tree(&mut self) {
        let items: Vec<(CloudInstanceKey, BoundingBox)> = self
            .cloud_instances
            .iter()
            .map(|(key, instance)| (key, *instance.world_bounds()))
            .collect();
        self.cloud_tree = BoundsTree::build(items, self.config.tree_leaf_capacity);
        self.tree_dirty = false;
        log::debug!(
            "rebuilt cloud tree over {} instances",
            self.cloud_tree.object_count()
        );
    }

    /// Run the illumination sweep for every light against every cloud
    /// instance, immediately
    pub fn shade_clouds(&mut self, backend: &mut dyn RenderBackend) -> Result<(), SceneError> {
        self.reshade_pass(backend);
        self.reshade = false;
        Ok(())
    }

    /// Number of cloud instances that survived culling in the last update
    pub fn visible_cloud_count(&self) -> usize {
        self.visible_clouds.len()
    }

    /// Number of free instances on the last update's draw list
    pub fn free_instance_count(&self) -> usize {
        self.free_draw_list.len()
    }

    /// Contained (opaque, transparent) instances recorded for a cloud in the
    /// last update
    pub fn contained_instances(
        &self,
        cloud_instance: CloudInstanceKey,
    ) -> Option<(&[InstanceKey], &[InstanceKey])> {
        self.containers
            .get(&cloud_instance)
            .map(|record| (record.opaque.as_slice(), record.transparent.as_slice()))
    }

    /// Resolve visibility, containment, lighting and impostor captures for
    /// this frame's camera.
    pub fn update(
        &mut self,
        camera: &Camera,
        backend: &mut dyn RenderBackend,
    ) -> Result<(), SceneError> {
        if self.tree_dirty {
            self.rebuild_bounds_tree();
        }

        self.free_draw_list.clear();
        self.containers.clear();

        self.classify_free_instances(camera);
        self.cull_cloud_tree(camera, backend);

        if self.reshade {
            self.reshade_pass(backend);
            self.reshade = false;
        }

        self.resolve_split_points(camera);
        self.update_visible_impostors(camera, backend);

        Ok(())
    }

    /// Submit this frame's draws back-to-front.
    ///
    /// A split cloud's record displays as: back half, contained opaque
    /// instances nearest-first, contained transparent instances
    /// back-to-front, front half. Failures skip the failed item only.
    pub fn display(
        &self,
        camera: &Camera,
        backend: &mut dyn RenderBackend,
    ) -> Result<(), SceneError> {
        let mut items: Vec<(f32, DrawItem)> = Vec::with_capacity(
            self.visible_clouds.len() + self.free_draw_list.len(),
        );

        for &key in &self.visible_clouds {
            if let Some(instance) = self.cloud_instances.get(key) {
                let dist_sq =
                    (instance.world_bounds().center() - camera.position).magnitude_squared();
                items.push((dist_sq, DrawItem::Cloud(key)));
            }
        }
        for &key in &self.free_draw_list {
            if let Some(instance) = self.instances.get(key) {
                let dist_sq = (instance.position() - camera.position).magnitude_squared();
                items.push((dist_sq, DrawItem::Free(key)));
            }
        }

        // Back-to-front for correct alpha compositing
        items.sort_unstable_by(|a, b| b.0.total_cmp(&a.0));

        for (_, item) in items {
            let result = match item {
                DrawItem::Cloud(key) => self.display_cloud(key, backend),
                DrawItem::Free(key) => self.display_free(key, backend),
            };
            if let Err(error) = result {
                log::error!("skipping draw item {item:?}: {error}");
            }
        }
        Ok(())
    }

    // Steps 1-2: frustum-cull free instances, then resolve which of the
    // survivors sit inside a cloud volume
    fn classify_free_instances(&mut self, camera: &Camera) {
        let identity = Mat4::identity();
        for (key, instance) in &mut self.instances {
            if !instance.is_alive() {
                continue;
            }
            if instance.world_bounds().view_frustum_cull(camera, &identity)
                == CullResult::CompleteOut
            {
                continue;
            }
            instance.update(camera);

            let position = instance.position();
            let containing = self.cloud_tree.containing(position);
            let host = containing
                .into_iter()
                .find(|cloud_key| {
                    self.cloud_instances
                        .get(*cloud_key)
                        .is_some_and(|cloud| cloud.is_alive())
                });

            match host {
                Some(cloud_key) => {
                    let record = self.containers.entry(cloud_key).or_default();
                    if instance.is_transparent() {
                        record.transparent.push(key);
                    } else {
                        record.opaque.push(key);
                    }
                }
                None => self.free_draw_list.push(key),
            }
        }
    }

    // Step 3: cull the cloud tree; continuously culled instances release
    // their cached textures after the hysteresis count
    fn cull_cloud_tree(&mut self, camera: &Camera, backend: &mut dyn RenderBackend) {
        let mut visible = Vec::new();
        let mut released = Vec::new();
        self.cloud_tree.cull(
            camera,
            &mut |key| visible.push(key),
            &mut |key| released.push(key),
        );

        for key in released {
            if let Some(instance) = self.cloud_instances.get_mut(key) {
                if instance.is_alive()
                    && instance.note_culled(self.config.cull_hysteresis_frames)
                {
                    if let Err(error) =
                        instance.release_resources(&mut self.context.texture_pool, backend)
                    {
                        log::error!("impostor resource release failed: {error}");
                    }
                }
            }
        }

        visible.retain(|key| {
            self.cloud_instances
                .get(*key)
                .is_some_and(ImpostorInstance::is_alive)
        });
        self.visible_clouds = visible;
    }

    // Step 4: the forward-scattering sweep, every light against every cloud
    // volume. Lit colors live in the shared volume, so each volume is swept
    // once, in the local frame of its first alive instance; further
    // instances with a different rotation reuse that lighting.
    fn reshade_pass(&mut self, backend: &mut dyn RenderBackend) {
        let cloud_keys: Vec<CloudKey> = self.clouds.keys().collect();
        for cloud_key in cloud_keys {
            let mut rotation = None;
            for (key, instance) in &self.cloud_instances {
                if !instance.is_alive() || instance.cloud() != cloud_key {
                    continue;
                }
                let r = instance.transform().rotation;
                match rotation {
                    None => rotation = Some(r),
                    Some(first) if first != r => {
                        log::warn!(
                            "cloud {cloud_key:?} instances disagree on rotation; \
                             lighting follows the first, instance {key:?} reuses it"
                        );
                    }
                    Some(_) => {}
                }
            }
            // Volumes with no alive instance are not swept
            let Some(rotation) = rotation else {
                continue;
            };
            let inverse = rotation.inverse();
            let Some(cloud) = self.clouds.get_mut(cloud_key) else {
                continue;
            };

            for (index, light) in self.context.lights.iter().enumerate() {
                let local_light = Light {
                    direction: inverse * light.direction,
                    diffuse: light.diffuse,
                };
                if let Err(error) = cloud.illuminate(
                    &local_light,
                    self.config.scattering,
                    index == 0,
                    backend,
                ) {
                    log::error!("illumination sweep failed for cloud {cloud_key:?}: {error}");
                    break;
                }
            }
        }
        log::debug!(
            "reshaded {} cloud volumes with {} lights",
            self.clouds.len(),
            self.context.lights.len()
        );
    }

    // Step 5: depth-sort each cloud's contained instances and pick the
    // nearest one as the split point
    fn resolve_split_points(&mut self, camera: &Camera) {
        for (cloud_key, record) in &mut self.containers {
            let instances = &self.instances;
            let dist_sq = |key: &InstanceKey| {
                instances
                    .get(*key)
                    .map(|i| (i.position() - camera.position).magnitude_squared())
                    .unwrap_or(f32::MAX)
            };

            // Farthest-first; the nearest contained instance ends up last
            record
                .opaque
                .sort_unstable_by(|a, b| dist_sq(b).total_cmp(&dist_sq(a)));
            record
                .transparent
                .sort_unstable_by(|a, b| dist_sq(b).total_cmp(&dist_sq(a)));

            // Nearest across both lists; opaque wins exact ties
            let nearest_opaque = record.opaque.last().copied();
            let nearest_transparent = record.transparent.last().copied();
            let nearest = match (nearest_opaque, nearest_transparent) {
                (Some(o), Some(t)) => {
                    if dist_sq(&t) < dist_sq(&o) {
                        Some(t)
                    } else {
                        Some(o)
                    }
                }
                (Some(o), None) => Some(o),
                (None, Some(t)) => Some(t),
                (None, None) => None,
            };

            if let Some(split_instance) = nearest {
                let split_point = instances
                    .get(split_instance)
                    .map(SceneInstance::position)
                    .unwrap_or_else(Vec3::zeros);
                if let Some(cloud) = self.cloud_instances.get_mut(*cloud_key) {
                    cloud.set_split(Some(split_point));
                }
            }
        }

        for key in &self.visible_clouds {
            if !self.containers.contains_key(key) {
                if let Some(cloud) = self.cloud_instances.get_mut(*key) {
                    cloud.set_split(None);
                }
            }
        }
    }

    // Step 6: validate/recapture each visible cloud's snapshot
    fn update_visible_impostors(&mut self, camera: &Camera, backend: &mut dyn RenderBackend) {
        for index in 0..self.visible_clouds.len() {
            let key = self.visible_clouds[index];
            let Some(instance) = self.cloud_instances.get_mut(key) else {
                continue;
            };
            let Some(cloud) = self.clouds.get_mut(instance.cloud()) else {
                continue;
            };
            if let Err(error) = instance.update(
                camera,
                cloud,
                &self.context.lights,
                self.config.phase_weighting,
                self.error_tolerance_rad,
                &mut self.context.texture_pool,
                backend,
            ) {
                log::error!("impostor update failed for {key:?}: {error}");
            }
        }
    }

    fn display_cloud(
        &self,
        key: CloudInstanceKey,
        backend: &mut dyn RenderBackend,
    ) -> Result<(), SceneError> {
        let instance = self
            .cloud_instances
            .get(key)
            .ok_or(SceneError::UnknownCloudInstance(key))?;
        if !instance.has_image() {
            log::trace!("cloud instance {key:?} has no image, skipping");
            return Ok(());
        }

        let back = instance
            .back_texture()
            .and_then(|texture_key| self.context.texture_pool.get(texture_key))
            .ok_or(SceneError::UnknownCloudInstance(key))?;

        Self::submit_impostor(instance, back.id, backend)?;

        if instance.is_split() {
            if let Some(record) = self.containers.get(&key) {
                // Contained opaque instances nearest-first, then contained
                // transparent instances back-to-front, between the halves
                for contained in record.opaque.iter().rev() {
                    if let Err(error) = self.display_free(*contained, backend) {
                        log::error!("skipping contained instance {contained:?}: {error}");
                    }
                }
                for contained in &record.transparent {
                    if let Err(error) = self.display_free(*contained, backend) {
                        log::error!("skipping contained instance {contained:?}: {error}");
                    }
                }
            }
            if let Some(front) = instance
                .front_texture()
                .and_then(|texture_key| self.context.texture_pool.get(texture_key))
            {
                Self::submit_impostor(instance, front.id, backend)?;
            }
        }
        Ok(())
    }

    // Screen impostors fill the viewport; the backend needs to know which
    // kind it is handed
    fn submit_impostor(
        instance: &ImpostorInstance,
        texture: TextureId,
        backend: &mut dyn RenderBackend,
    ) -> Result<(), SceneError> {
        if instance.state() == ImpostorState::ScreenImpostor {
            backend.draw_screen_impostor(texture)?;
        } else {
            let bounds = instance.world_bounds();
            backend.draw_impostor(bounds.center(), bounds.radius(), texture)?;
        }
        Ok(())
    }

    fn display_free(
        &self,
        key: InstanceKey,
        backend: &mut dyn RenderBackend,
    ) -> Result<(), SceneError> {
        let Some(instance) = self.instances.get(key) else {
            return Ok(());
        };
        let material = instance.material().filter(|material_key| {
            let known = self.context.materials.contains_key(*material_key);
            if !known {
                log::warn!("instance {key:?} references unknown material {material_key:?}");
            }
            known
        });
        backend.draw_instance(&instance.transform().to_matrix(), material)?;
        Ok(())
    }
}
