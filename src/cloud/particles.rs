//! Cloud particles: storage, depth sorting, and scattering precomputation
//!
//! A [`CloudVolume`] owns an array of light-scattering particles plus a
//! bounding box grown incrementally as particles are added. Particles are
//! created once at load time and persist for the cloud's lifetime; sorting
//! and illumination mutate them in place with no per-frame allocation.
//!
//! Illumination approximates multiple forward scattering with a rasterized
//! sweep from the light (Harris-style impostor clouds): particles are
//! processed front-to-back as seen from the light, each one sampling the
//! accumulation buffer before darkening it with its own extinction. The
//! result is stored per light, kept separate so the view-dependent phase
//! function can weight each light's contribution at draw time.

use crate::foundation::math::{Vec3, Vec4};
use crate::render::backend::{BackendResult, RenderBackend};
use crate::render::lighting::Light;
use crate::scene::bounds::BoundingBox;

slotmap::new_key_type! {
    /// Handle to a registered cloud volume
    pub struct CloudKey;
}

/// Rayleigh-approximation phase function `0.75 * (1 + cos^2 theta)`.
///
/// `cos_theta` is the cosine of the angle between a light's travel direction
/// and the particle-to-viewer vector.
pub fn phase_function(cos_theta: f32) -> f32 {
    0.75 * (1.0 + cos_theta * cos_theta)
}

/// Sort order along the view axis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    /// Ascending signed depth: nearest the sort point first
    Away,
    /// Descending signed depth: farthest from the sort point first
    Toward,
}

/// One light-scattering particle, owned exclusively by its volume
#[derive(Debug, Clone)]
pub struct Particle {
    /// Position in cloud-local space
    pub position: Vec3,
    /// Splat radius
    pub radius: f32,
    /// Ambient base color
    pub base_color: Vec4,
    /// Accumulated contribution per light, in light registration order.
    /// Kept separate (never summed here) for draw-time phase weighting.
    pub lit_colors: Vec<Vec4>,
    /// Scalar projection used only during the current sort pass
    sort_key: f32,
}

impl Particle {
    /// Create a particle with no accumulated lighting
    pub fn new(position: Vec3, radius: f32, base_color: Vec4) -> Self {
        Self {
            position,
            radius,
            base_color,
            lit_colors: Vec::new(),
            sort_key: 0.0,
        }
    }

    /// Final draw color for a viewer at `view_point`: ambient base plus each
    /// light's stored contribution, phase-weighted when enabled.
    pub fn shaded_color(&self, lights: &[Light], view_point: Vec3, phase_weighted: bool) -> Vec4 {
        let mut color = self.base_color;
        let to_viewer = view_point - self.position;
        let to_viewer = if to_viewer.magnitude_squared() > 1e-12 {
            to_viewer.normalize()
        } else {
            to_viewer
        };

        for (light, lit) in lights.iter().zip(&self.lit_colors) {
            let weight = if phase_weighted {
                phase_function(light.direction.dot(&to_viewer))
            } else {
                1.0
            };
            color.x += lit.x * weight;
            color.y += lit.y * weight;
            color.z += lit.z * weight;
        }
        color
    }
}

/// A cloud's particle array plus its incrementally maintained bounds.
///
/// Invariant: the bounding sphere derived from the box encloses every
/// particle position.
#[derive(Debug, Default)]
pub struct CloudVolume {
    particles: Vec<Particle>,
    bounds: BoundingBox,
}

impl CloudVolume {
    /// Create an empty volume
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a volume from the loader's raw position/radius/color buffers.
    ///
    /// Buffers are consumed positionally; the shortest buffer bounds the
    /// particle count.
    pub fn from_buffers(positions: &[Vec3], radii: &[f32], colors: &[Vec4]) -> Self {
        let mut volume = Self::new();
        for ((position, radius), color) in positions.iter().zip(radii).zip(colors) {
            volume.add_particle(Particle::new(*position, *radius, *color));
        }
        volume
    }

    /// Add a particle, growing the bounds to cover its position
    pub fn add_particle(&mut self, particle: Particle) {
        self.bounds.add_point(particle.position);
        self.particles.push(particle);
    }

    /// Bounding box (and derived sphere) over all particle positions
    pub fn bounds(&self) -> &BoundingBox {
        &self.bounds
    }

    /// The particle array, in current sort order
    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    /// Number of particles
    pub fn len(&self) -> usize {
        self.particles.len()
    }

    /// True when the volume holds no particles
    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    /// Sort particles by signed depth along `view_dir`.
    ///
    /// The key is `dot(position - sort_point, view_dir)`, a projection rather
    /// than a Euclidean distance: callers supply a synthetic `sort_point`
    /// placed just outside the bounding sphere along the view direction, so
    /// the keys stay well-conditioned even when the real camera is far away.
    pub fn sort_particles(&mut self, view_dir: Vec3, sort_point: Vec3, direction: SortDirection) {
        for particle in &mut self.particles {
            particle.sort_key = (particle.position - sort_point).dot(&view_dir);
        }
        match direction {
            SortDirection::Away => self
                .particles
                .sort_unstable_by(|a, b| a.sort_key.total_cmp(&b.sort_key)),
            SortDirection::Toward => self
                .particles
                .sort_unstable_by(|a, b| b.sort_key.total_cmp(&a.sort_key)),
        }
    }

    /// Synthetic sort point just outside the bounding sphere along `dir`
    pub fn sort_point_along(&self, dir: Vec3) -> Vec3 {
        self.bounds.center() - dir * (self.bounds.radius() * 1.1 + 1.0)
    }

    /// Run the forward-scattering sweep for one light.
    ///
    /// Sorts particles front-to-back as seen from the light, then for each
    /// particle samples a small window of the accumulation buffer at its
    /// projected position, converts the averaged intensity into a lit-color
    /// contribution (`scattering * intensity * light diffuse`), appends it to
    /// the particle's per-light list (cleared first when `reset`), and splats
    /// the particle's extinction into the buffer.
    ///
    /// This reproduces a coarse rasterization-based approximation; it is not
    /// an exact participating-media solve and is not meant to become one.
    pub fn illuminate(
        &mut self,
        light: &Light,
        scattering: f32,
        reset: bool,
        backend: &mut dyn RenderBackend,
    ) -> BackendResult<()> {
        let sort_point = self.sort_point_along(light.direction);
        self.sort_particles(light.direction, sort_point, SortDirection::Away);

        backend.begin_illumination(light.direction, self.bounds.center(), self.bounds.radius())?;
        for particle in &mut self.particles {
            let intensity = backend.sample_accumulation(particle.position, particle.radius)?;
            let contribution = light.diffuse * (scattering * intensity);

            if reset {
                particle.lit_colors.clear();
            }
            particle.lit_colors.push(contribution);

            backend.splat_extinction(
                particle.position,
                particle.radius,
                particle.base_color.w,
            )?;
        }
        backend.end_illumination()?;

        log::trace!(
            "illuminated {} particles, dir {:?}",
            self.particles.len(),
            light.direction
        );
        Ok(())
    }
}
