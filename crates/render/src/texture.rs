use serde::{Deserialize, Serialize};

use crate::backend::{
    Backend, SamplerSource, TextureData, TextureFilter, TextureFormat, TextureId, TextureWrap,
};
use crate::error::RenderError;

/// Number of texture units a mesh binds: albedo, normal, metallic-roughness
/// and ambient occlusion.
pub const SAMPLER_UNITS: usize = 4;

/// What a texture is used for. Decides its sampler unit and color space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextureKind {
    Albedo,
    NormalMap,
    /// glTF packing: roughness in green, metallic in blue.
    MetallicRoughnessMap,
    /// Tagged by loaders but not sampled by the forward pass; emission comes
    /// from the material factor.
    EmissionMap,
    AmbientOcclusionMap,
    Dither,
}

impl TextureKind {
    /// Unit this kind binds to during the forward pass.
    pub const fn sampler_unit(self) -> Option<u32> {
        match self {
            Self::Albedo => Some(0),
            Self::NormalMap => Some(1),
            Self::MetallicRoughnessMap => Some(2),
            Self::AmbientOcclusionMap => Some(3),
            Self::EmissionMap | Self::Dither => None,
        }
    }
}

/// 8x8 ordered-dither (Bayer) thresholds, row-major.
#[rustfmt::skip]
pub const BAYER_MATRIX: [u8; 64] = [
     0, 32,  8, 40,  2, 34, 10, 42,
    48, 16, 56, 24, 50, 18, 58, 26,
    12, 44,  4, 36, 14, 46,  6, 38,
    60, 28, 52, 20, 62, 30, 54, 22,
     3, 35, 11, 43,  1, 33,  9, 41,
    51, 19, 59, 27, 49, 17, 57, 25,
    15, 47,  7, 39, 13, 45,  5, 37,
    63, 31, 55, 23, 61, 29, 53, 21,
];

/// A GPU image of a known kind.
#[derive(Debug)]
pub struct Texture {
    id: TextureId,
    kind: TextureKind,
    width: u32,
    height: u32,
}

impl Texture {
    pub fn load<B: Backend>(backend: &mut B, data: &TextureData) -> Result<Self, RenderError> {
        data.validate()?;
        let id = backend.create_texture(data)?;
        let (width, height) = (data.width, data.height);
        tracing::debug!(kind = ?data.kind, width, height, "texture created");
        Ok(Self {
            id,
            kind: data.kind,
            width: data.width,
            height: data.height,
        })
    }

    /// Upload the Bayer table: single channel, repeat wrap, nearest filter.
    pub fn dither<B: Backend>(backend: &mut B) -> Result<Self, RenderError> {
        Self::load(backend, &dither_data())
    }

    pub fn id(&self) -> TextureId {
        self.id
    }

    pub fn kind(&self) -> TextureKind {
        self.kind
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn sampler(&self) -> SamplerSource {
        SamplerSource::Texture(self.id)
    }

    pub fn release<B: Backend>(self, backend: &mut B) {
        backend.destroy_texture(self.id);
    }
}

fn dither_data() -> TextureData {
    TextureData {
        kind: TextureKind::Dither,
        width: 8,
        height: 8,
        format: TextureFormat::R8Unorm,
        filter: TextureFilter::Nearest,
        wrap: TextureWrap::Repeat,
        pixels: BAYER_MATRIX.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RecordingBackend;

    fn bayer(n: usize) -> Vec<u8> {
        if n == 1 {
            return vec![0];
        }
        let half = n / 2;
        let inner = bayer(half);
        let offset = [[0u8, 2], [3, 1]];
        let mut out = vec![0u8; n * n];
        for y in 0..n {
            for x in 0..n {
                let cell = inner[(y % half) * half + x % half];
                out[y * n + x] = 4 * cell + offset[y / half][x / half];
            }
        }
        out
    }

    #[test]
    fn bayer_matrix_holds_each_threshold_once() {
        let mut seen = [false; 64];
        for v in BAYER_MATRIX {
            assert!(v < 64);
            assert!(!seen[v as usize], "duplicate threshold {v}");
            seen[v as usize] = true;
        }
        assert!(seen.iter().all(|s| *s));
    }

    #[test]
    fn bayer_matrix_is_recursive_pattern() {
        assert_eq!(BAYER_MATRIX.to_vec(), bayer(8));
    }

    #[test]
    fn dither_texture_is_nearest_and_wrapping() {
        let data = dither_data();
        assert_eq!(data.filter, TextureFilter::Nearest);
        assert_eq!(data.wrap, TextureWrap::Repeat);
        assert!(data.validate().is_ok());

        let mut backend = RecordingBackend::new();
        let texture = Texture::dither(&mut backend).unwrap();
        assert_eq!(texture.kind(), TextureKind::Dither);
        assert_eq!(texture.size(), (8, 8));
        texture.release(&mut backend);
        assert_eq!(backend.live_resources(), 0);
    }

    #[test]
    fn sampler_units_are_distinct() {
        let units: Vec<u32> = [
            TextureKind::Albedo,
            TextureKind::NormalMap,
            TextureKind::MetallicRoughnessMap,
            TextureKind::AmbientOcclusionMap,
        ]
        .iter()
        .filter_map(|k| k.sampler_unit())
        .collect();
        assert_eq!(units, vec![0, 1, 2, 3]);
        assert_eq!(TextureKind::Dither.sampler_unit(), None);
    }
}
