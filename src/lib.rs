//! # Cloudscape
//!
//! Scene-graph support library for volumetric cloud fields rendered as
//! billboard impostors.
//!
//! ## Features
//!
//! - **Impostor Caching**: Clouds are captured to dynamic textures and
//!   redrawn as camera-facing billboards until camera motion makes the
//!   snapshot visibly stale
//! - **Hierarchical Culling**: A binary bounding-volume tree over placed
//!   clouds with tri-state frustum tests and deferred resource release
//! - **Forward-Scattering Illumination**: A per-light sweep through the
//!   particles of each cloud, accumulated into per-particle color lists
//! - **Split Compositing**: Objects flying inside a cloud are drawn between
//!   the cloud's back and front halves
//! - **Texture Pooling**: Size-bucketed reuse of capture targets
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cloudscape::prelude::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut manager = SceneManager::new(SceneConfig::default());
//!     let mut backend = NullBackend::new();
//!
//!     let mut volume = CloudVolume::new();
//!     volume.add_particle(Particle::new(
//!         Vec3::zeros(),
//!         50.0,
//!         Vec4::new(0.9, 0.9, 0.95, 0.6),
//!     ));
//!     let cloud = manager.add_cloud(volume);
//!     manager.add_cloud_instance(
//!         cloud,
//!         Transform::from_position(Vec3::new(0.0, 800.0, -2000.0)),
//!     )?;
//!     manager.add_light(Light::directional(
//!         Vec3::new(0.2, -1.0, 0.1),
//!         Vec4::new(1.0, 0.96, 0.9, 1.0),
//!     ));
//!
//!     let camera = Camera::perspective(
//!         Vec3::zeros(), 60.0, 16.0 / 9.0, 0.5, 40_000.0, 1920, 1080,
//!     );
//!     manager.update(&camera, &mut backend)?;
//!     manager.display(&camera, &mut backend)?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod cloud;
pub mod config;
pub mod foundation;
pub mod render;
pub mod scene;
pub mod spatial;

/// Common imports for library users
pub mod prelude {
    pub use crate::{
        cloud::{
            impostor::{CloudInstanceKey, ImpostorInstance, ImpostorState},
            particles::{CloudKey, CloudVolume, Particle, SortDirection},
        },
        config::Config,
        foundation::math::{Mat4, Point3, Quat, Transform, Vec3, Vec4},
        render::{
            backend::{NullBackend, RenderBackend, TextureId},
            lighting::{Light, LightId},
            material::{Material, MaterialKey},
            texture_pool::{TextureKey, TexturePool},
        },
        scene::{
            bounds::{BoundingBox, CullResult},
            camera::Camera,
            instance::{InstanceKey, SceneInstance},
            scene_manager::{SceneConfig, SceneContext, SceneError, SceneManager},
        },
        spatial::bounds_tree::BoundsTree,
    };
}
