//! Scene lighting parameters

use serde::{Deserialize, Serialize};

use crate::foundation::math::{Color, Vec3};

/// Directional sun light plus ambient term
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LightModel {
    /// Direction the sun shines in (not necessarily normalized)
    pub sun_direction: Vec3,
    /// Ambient light color
    pub ambient_color: Color,
    /// Ambient light strength
    pub ambient_strength: f32,
    /// Diffuse light strength
    pub diffuse_strength: f32,
    /// How dark shadowed areas get (0 = no shadow, 1 = black)
    pub shadow_opacity: f32,
    /// Render shadow cascades
    pub shadows: bool,
}

impl LightModel {
    /// Normalized sun direction, straight down if the stored one is degenerate
    pub fn sun_direction_normalized(&self) -> Vec3 {
        self.sun_direction
            .try_normalize(f32::EPSILON)
            .unwrap_or_else(|| Vec3::new(0.0, -1.0, 0.0))
    }
}

impl Default for LightModel {
    fn default() -> Self {
        Self {
            sun_direction: Vec3::new(-0.5, -1.0, -0.3),
            ambient_color: Color::WHITE,
            ambient_strength: 0.4,
            diffuse_strength: 0.8,
            shadow_opacity: 0.6,
            shadows: true,
        }
    }
}
