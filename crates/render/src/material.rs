use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Surface shading parameters, multiplied with the matching texture maps.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Material {
    /// Linear RGB tint applied to the albedo map.
    pub albedo: Vec3,
    pub metallic: f32,
    pub roughness: f32,
    /// Linear RGB radiance added on top of lighting.
    pub emission: Vec3,
    pub ambient_occlusion: f32,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            albedo: Vec3::ONE,
            metallic: 0.0,
            roughness: 1.0,
            emission: Vec3::ZERO,
            ambient_occlusion: 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_white_dielectric() {
        let m = Material::default();
        assert_eq!(m.albedo, Vec3::ONE);
        assert_eq!(m.metallic, 0.0);
        assert_eq!(m.emission, Vec3::ZERO);
    }
}
