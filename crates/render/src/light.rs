use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Upper bound of lights a shader receives. Extra scene lights are ignored.
pub const MAX_LIGHTS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LightKind {
    #[default]
    Directional,
    Point,
    Spot,
}

impl LightKind {
    /// Value the shaders switch on.
    pub const fn shader_code(self) -> u32 {
        match self {
            Self::Directional => 0,
            Self::Point => 1,
            Self::Spot => 2,
        }
    }
}

/// A light source. Directional lights ignore position and range; spot cones
/// are given as cosines of their half-angles.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Light {
    pub kind: LightKind,
    pub position: Vec3,
    pub direction: Vec3,
    pub color: Vec3,
    pub intensity: f32,
    pub range: f32,
    pub inner_cone_cos: f32,
    pub outer_cone_cos: f32,
}

impl Default for Light {
    fn default() -> Self {
        Self {
            kind: LightKind::Directional,
            position: Vec3::ZERO,
            direction: Vec3::NEG_Z,
            color: Vec3::ONE,
            intensity: 1.0,
            range: 10.0,
            inner_cone_cos: 0.0,
            outer_cone_cos: 0.0,
        }
    }
}

impl Light {
    pub fn directional(direction: Vec3) -> Self {
        Self {
            direction: direction.normalize_or(Vec3::NEG_Z),
            ..Self::default()
        }
    }

    pub fn point(position: Vec3, range: f32) -> Self {
        Self {
            kind: LightKind::Point,
            position,
            range,
            ..Self::default()
        }
    }

    pub fn with_color(mut self, color: Vec3, intensity: f32) -> Self {
        self.color = color;
        self.intensity = intensity;
        self
    }
}
