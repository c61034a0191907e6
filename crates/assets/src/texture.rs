use std::path::Path;

use gltf::image::Format;
use prism_render::{TextureData, TextureFilter, TextureKind, TextureWrap};

use crate::error::AssetError;

/// Decode an image file into RGBA8 texture data of the given kind.
pub fn load_texture_data(
    kind: TextureKind,
    path: impl AsRef<Path>,
) -> Result<TextureData, AssetError> {
    let path = path.as_ref();
    let image = image::open(path)?.into_rgba8();
    let (width, height) = image.dimensions();
    tracing::debug!(?kind, width, height, path = %path.display(), "image decoded");
    Ok(TextureData::rgba8(kind, width, height, image.into_raw()))
}

/// Convert a glTF-decoded image to RGBA8. 16-bit channels keep their high
/// byte; float images are rejected.
pub(crate) fn from_gltf_image(
    kind: TextureKind,
    data: &gltf::image::Data,
    sampler: &gltf::texture::Sampler<'_>,
) -> Result<TextureData, AssetError> {
    let (channels, bytes_per_channel) = match data.format {
        Format::R8 => (1, 1),
        Format::R8G8 => (2, 1),
        Format::R8G8B8 => (3, 1),
        Format::R8G8B8A8 => (4, 1),
        Format::R16 => (1, 2),
        Format::R16G16 => (2, 2),
        Format::R16G16B16 => (3, 2),
        Format::R16G16B16A16 => (4, 2),
        other => return Err(AssetError::UnsupportedImageFormat(format!("{other:?}"))),
    };

    let texel = channels * bytes_per_channel;
    let mut pixels = Vec::with_capacity(data.width as usize * data.height as usize * 4);
    for chunk in data.pixels.chunks_exact(texel) {
        // Little-endian 16-bit: the high byte is the second of each pair.
        let channel = |c: usize| chunk[c * bytes_per_channel + bytes_per_channel - 1];
        let rgba = match channels {
            1 => [channel(0), channel(0), channel(0), 255],
            2 => [channel(0), channel(1), 0, 255],
            3 => [channel(0), channel(1), channel(2), 255],
            _ => [channel(0), channel(1), channel(2), channel(3)],
        };
        pixels.extend_from_slice(&rgba);
    }

    let mut texture = TextureData::rgba8(kind, data.width, data.height, pixels);
    if let Some(gltf::texture::MagFilter::Nearest) = sampler.mag_filter() {
        texture.filter = TextureFilter::Nearest;
    }
    if sampler.wrap_s() == gltf::texture::WrappingMode::ClampToEdge {
        texture.wrap = TextureWrap::ClampToEdge;
    }
    Ok(texture)
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_render::TextureFormat;

    #[test]
    fn decodes_png_as_rgba8() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("albedo.png");
        image::RgbImage::from_pixel(3, 2, image::Rgb([10, 20, 30]))
            .save(&path)
            .unwrap();

        let data = load_texture_data(TextureKind::Albedo, &path).unwrap();
        assert_eq!((data.width, data.height), (3, 2));
        assert_eq!(data.format, TextureFormat::Rgba8Srgb);
        assert_eq!(&data.pixels[..4], &[10, 20, 30, 255]);
        assert!(data.validate().is_ok());
    }

    #[test]
    fn normal_maps_are_linear() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("normal.png");
        image::RgbaImage::from_pixel(1, 1, image::Rgba([128, 128, 255, 255]))
            .save(&path)
            .unwrap();
        let data = load_texture_data(TextureKind::NormalMap, &path).unwrap();
        assert_eq!(data.format, TextureFormat::Rgba8Unorm);
    }

    #[test]
    fn missing_file_is_an_image_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_texture_data(TextureKind::Albedo, dir.path().join("nope.png")).unwrap_err();
        assert!(matches!(err, AssetError::Image(_)));
    }
}
