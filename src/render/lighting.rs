//! Light sources for cloud shading

use crate::foundation::math::{Vec3, Vec4};

/// Identifier of a registered light.
///
/// Lights are stored in registration order because each particle's
/// accumulated contribution list is positional: entry `i` belongs to the
/// `i`-th registered light.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LightId(pub(crate) usize);

impl LightId {
    /// Position of this light in registration order
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Directional light used by the cloud illumination sweep.
///
/// Only the travel direction and diffuse color participate in the
/// forward-scattering precomputation; positional light types are not
/// meaningful at cloud scale.
#[derive(Debug, Clone)]
pub struct Light {
    /// Direction the light travels (normalized)
    pub direction: Vec3,
    /// Diffuse color (RGBA)
    pub diffuse: Vec4,
}

impl Light {
    /// Create a directional light
    pub fn directional(direction: Vec3, diffuse: Vec4) -> Self {
        Self {
            direction: direction.normalize(),
            diffuse,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_is_normalized() {
        let light = Light::directional(Vec3::new(0.0, -10.0, 0.0), Vec4::repeat(1.0));
        assert!((light.direction.magnitude() - 1.0).abs() < 1e-6);
        assert_eq!(light.direction.y, -1.0);
    }
}
