//! Materials for generic scene instances
//!
//! The backend owns shader/state activation; this side only registers
//! material values and hands out stable keys. Unknown keys at draw time are
//! non-fatal lookups.

use crate::foundation::math::Vec4;

slotmap::new_key_type! {
    /// Handle to a registered material
    pub struct MaterialKey;
}

/// Material parameters for a generic instance
#[derive(Debug, Clone)]
pub struct Material {
    /// Base color (RGBA); alpha below 1.0 marks the material transparent
    pub base_color: Vec4,
}

impl Material {
    /// Create an opaque material with the given RGB color
    pub fn opaque(r: f32, g: f32, b: f32) -> Self {
        Self {
            base_color: Vec4::new(r, g, b, 1.0),
        }
    }

    /// Create a transparent material
    pub fn transparent(r: f32, g: f32, b: f32, alpha: f32) -> Self {
        Self {
            base_color: Vec4::new(r, g, b, alpha),
        }
    }

    /// Whether this material requires back-to-front blending
    pub fn is_transparent(&self) -> bool {
        self.base_color.w < 1.0
    }
}
