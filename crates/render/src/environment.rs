use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Scene-wide ambient lighting.
///
/// A two-color hemisphere stands in for image-based lighting: normals facing
/// up receive `sky`, normals facing down receive `ground`, blended in between.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Environment {
    pub sky: Vec3,
    pub ground: Vec3,
    pub intensity: f32,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            sky: Vec3::new(0.6, 0.7, 0.9),
            ground: Vec3::new(0.25, 0.2, 0.15),
            intensity: 0.3,
        }
    }
}

impl Environment {
    /// Ambient radiance for a world-space normal. Mirrors the forward shader.
    pub fn ambient(&self, normal: Vec3) -> Vec3 {
        let t = normal.normalize_or_zero().y * 0.5 + 0.5;
        self.ground.lerp(self.sky, t) * self.intensity
    }
}
