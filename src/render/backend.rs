//! Backend abstraction for the rendering system
//!
//! This library decides *what* to draw and *when*; the backend performs the
//! actual rasterization, material activation, and GPU texture lifetime. All
//! backend calls are blocking: impostor captures and illumination sweeps
//! issued during `update` complete before the same frame's `display`, which
//! is a documented latency hazard when many impostors invalidate at once.

use crate::foundation::math::{Mat4, Vec3, Vec4};
use crate::render::material::MaterialKey;
use crate::scene::camera::Camera;
use thiserror::Error;

/// Opaque handle to a backend-owned GPU texture object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub u64);

/// Backend operation errors
#[derive(Debug, Error)]
pub enum BackendError {
    /// Texture object creation failed
    #[error("texture creation failed ({width}x{height}): {reason}")]
    TextureCreation {
        /// Requested width in pixels
        width: u32,
        /// Requested height in pixels
        height: u32,
        /// Backend-specific failure description
        reason: String,
    },

    /// A texture id was not recognized by the backend
    #[error("unknown texture id {0:?}")]
    UnknownTexture(TextureId),

    /// A capture or illumination pass was started while another was active,
    /// or ended without being started
    #[error("pass state error: {0}")]
    PassState(String),

    /// Draw submission failed
    #[error("draw submission failed: {0}")]
    Submit(String),
}

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Rendering backend boundary.
///
/// Capture passes render particles through a capture camera into a texture;
/// illumination passes run the orthographic forward-scattering sweep, where
/// the backend maintains the accumulation buffer that
/// [`sample_accumulation`](RenderBackend::sample_accumulation) reads and
/// [`splat_extinction`](RenderBackend::splat_extinction) darkens.
pub trait RenderBackend {
    /// Create a GPU texture of the given size
    fn create_texture(&mut self, width: u32, height: u32) -> BackendResult<TextureId>;

    /// Destroy a GPU texture
    fn destroy_texture(&mut self, id: TextureId) -> BackendResult<()>;

    /// Begin rendering into `target` through `camera`
    fn begin_capture(&mut self, camera: &Camera, target: TextureId) -> BackendResult<()>;

    /// End the active capture pass
    fn end_capture(&mut self) -> BackendResult<()>;

    /// Begin an orthographic illumination sweep along `light_dir` over the
    /// volume's bounding sphere, with the accumulation buffer cleared to full
    /// intensity
    fn begin_illumination(
        &mut self,
        light_dir: Vec3,
        volume_center: Vec3,
        volume_radius: f32,
    ) -> BackendResult<()>;

    /// Average intensity of a small solid-angle window of the accumulation
    /// buffer centered on the projection of `position`
    fn sample_accumulation(&mut self, position: Vec3, window_radius: f32) -> BackendResult<f32>;

    /// Rasterize a particle's extinction into the accumulation buffer
    fn splat_extinction(&mut self, position: Vec3, radius: f32, opacity: f32)
        -> BackendResult<()>;

    /// End the active illumination sweep
    fn end_illumination(&mut self) -> BackendResult<()>;

    /// Draw a camera-facing textured quad of the given world radius
    fn draw_impostor(&mut self, center: Vec3, radius: f32, texture: TextureId)
        -> BackendResult<()>;

    /// Draw a screen-impostor snapshot as a full-viewport quad
    fn draw_screen_impostor(&mut self, texture: TextureId) -> BackendResult<()>;

    /// Draw one shaded particle splat (used during capture passes and for
    /// screen-impostor clouds drawn directly)
    fn draw_particle(&mut self, position: Vec3, radius: f32, color: Vec4) -> BackendResult<()>;

    /// Submit a generic instance draw; the backend resolves and activates the
    /// material state
    fn draw_instance(&mut self, world: &Mat4, material: Option<MaterialKey>)
        -> BackendResult<()>;
}

/// No-op backend for headless operation and tests.
///
/// Creates distinct texture ids, reports full intensity for every
/// accumulation sample, and discards all draws.
#[derive(Debug, Default)]
pub struct NullBackend {
    next_texture: u64,
    live_textures: std::collections::HashSet<TextureId>,
    in_pass: bool,
}

impl NullBackend {
    /// Create a new null backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of textures currently alive in the backend
    pub fn live_texture_count(&self) -> usize {
        self.live_textures.len()
    }
}

impl RenderBackend for NullBackend {
    fn create_texture(&mut self, _width: u32, _height: u32) -> BackendResult<TextureId> {
        let id = TextureId(self.next_texture);
        self.next_texture += 1;
        self.live_textures.insert(id);
        Ok(id)
    }

    fn destroy_texture(&mut self, id: TextureId) -> BackendResult<()> {
        if self.live_textures.remove(&id) {
            Ok(())
        } else {
            Err(BackendError::UnknownTexture(id))
        }
    }

    fn begin_capture(&mut self, _camera: &Camera, target: TextureId) -> BackendResult<()> {
        if !self.live_textures.contains(&target) {
            return Err(BackendError::UnknownTexture(target));
        }
        if self.in_pass {
            return Err(BackendError::PassState("capture already active".into()));
        }
        self.in_pass = true;
        Ok(())
    }

    fn end_capture(&mut self) -> BackendResult<()> {
        if !self.in_pass {
            return Err(BackendError::PassState("no active capture".into()));
        }
        self.in_pass = false;
        Ok(())
    }

    fn begin_illumination(
        &mut self,
        _light_dir: Vec3,
        _volume_center: Vec3,
        _volume_radius: f32,
    ) -> BackendResult<()> {
        if self.in_pass {
            return Err(BackendError::PassState("pass already active".into()));
        }
        self.in_pass = true;
        Ok(())
    }

    fn sample_accumulation(&mut self, _position: Vec3, _window_radius: f32) -> BackendResult<f32> {
        Ok(1.0)
    }

    fn splat_extinction(
        &mut self,
        _position: Vec3,
        _radius: f32,
        _opacity: f32,
    ) -> BackendResult<()> {
        Ok(())
    }

    fn end_illumination(&mut self) -> BackendResult<()> {
        if !self.in_pass {
            return Err(BackendError::PassState("no active illumination".into()));
        }
        self.in_pass = false;
        Ok(())
    }

    fn draw_impostor(
        &mut self,
        _center: Vec3,
        _radius: f32,
        texture: TextureId,
    ) -> BackendResult<()> {
        if self.live_textures.contains(&texture) {
            Ok(())
        } else {
            Err(BackendError::UnknownTexture(texture))
        }
    }

    fn draw_screen_impostor(&mut self, texture: TextureId) -> BackendResult<()> {
        if self.live_textures.contains(&texture) {
            Ok(())
        } else {
            Err(BackendError::UnknownTexture(texture))
        }
    }

    fn draw_particle(&mut self, _position: Vec3, _radius: f32, _color: Vec4) -> BackendResult<()> {
        Ok(())
    }

    fn draw_instance(
        &mut self,
        _world: &Mat4,
        _material: Option<MaterialKey>,
    ) -> BackendResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_backend_texture_lifecycle() {
        let mut backend = NullBackend::new();
        let a = backend.create_texture(64, 64).unwrap();
        let b = backend.create_texture(64, 64).unwrap();
        assert_ne!(a, b);
        assert_eq!(backend.live_texture_count(), 2);

        backend.destroy_texture(a).unwrap();
        assert!(backend.destroy_texture(a).is_err());
        assert_eq!(backend.live_texture_count(), 1);
    }

    #[test]
    fn test_null_backend_pass_state() {
        let mut backend = NullBackend::new();
        assert!(backend.end_capture().is_err());

        backend
            .begin_illumination(Vec3::new(0.0, -1.0, 0.0), Vec3::zeros(), 10.0)
            .unwrap();
        assert!(backend
            .begin_illumination(Vec3::new(0.0, -1.0, 0.0), Vec3::zeros(), 10.0)
            .is_err());
        backend.end_illumination().unwrap();
    }
}
