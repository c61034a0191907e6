//! The GPU seam.
//!
//! Every GPU operation the core performs goes through [`Backend`]. The trait
//! mirrors an immediate-mode graphics context: resources are created up
//! front, then each frame binds state and issues draws against whatever is
//! currently bound. Implementations are free to record and replay.
//!
//! # Invariants
//! - All calls happen on the thread that owns the graphics context.
//! - `set_uniform` applies to the program bound by the last `use_program`.
//! - A uniform location is only meaningful for the program it was resolved on.

mod recording;

use std::fmt;

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, UVec2, Vec3, Vec4};
use serde::{Deserialize, Serialize};

use crate::error::RenderError;
use crate::texture::TextureKind;

pub use recording::{Call, Counters, RecordingBackend};

slotmap::new_key_type! {
    /// Vertex + index buffers of one mesh.
    pub struct MeshId;
    /// A sampled 2D image.
    pub struct TextureId;
    /// A compiled and linked shader program.
    pub struct ProgramId;
    /// An offscreen render target.
    pub struct FramebufferId;
}

/// Pixel dimensions of a render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Same dimensions with each axis raised to at least one pixel.
    pub fn clamped(self) -> Self {
        Self::new(self.width.max(1), self.height.max(1))
    }

    pub fn aspect_ratio(self) -> f32 {
        let d = self.clamped();
        d.width as f32 / d.height as f32
    }

    pub fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl From<(u32, u32)> for Dimensions {
    fn from((width, height): (u32, u32)) -> Self {
        Self::new(width, height)
    }
}

/// One interleaved vertex as uploaded to the GPU.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    /// xyz tangent, w handedness of the bitangent.
    pub tangent: [f32; 4],
    pub texcoord: [f32; 2],
}

impl Vertex {
    pub fn new(position: Vec3, normal: Vec3) -> Self {
        Self {
            position: position.to_array(),
            normal: normal.to_array(),
            tangent: [1.0, 0.0, 0.0, 1.0],
            texcoord: [0.0, 0.0],
        }
    }

    pub fn with_texcoord(mut self, u: f32, v: f32) -> Self {
        self.texcoord = [u, v];
        self
    }

    pub fn with_tangent(mut self, tangent: Vec4) -> Self {
        self.tangent = tangent.to_array();
        self
    }
}

/// CPU-side geometry handed over by a loader.
#[derive(Debug, Clone, Default)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn new(vertices: Vec<Vertex>, indices: Vec<u32>) -> Self {
        Self { vertices, indices }
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertices.len() as u32
    }

    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Check that every index addresses an existing vertex.
    pub fn validate(&self) -> Result<(), RenderError> {
        let count = self.vertices.len();
        if let Some((at, index)) = self
            .indices
            .iter()
            .enumerate()
            .find(|(_, i)| **i as usize >= count)
        {
            return Err(RenderError::InvalidGeometry(format!(
                "index {index} at position {at} is out of range for {count} vertices"
            )));
        }
        if self.indices.len() % 3 != 0 {
            return Err(RenderError::InvalidGeometry(format!(
                "{} indices do not form whole triangles",
                self.indices.len()
            )));
        }
        Ok(())
    }
}

/// Texel layout of a [`TextureData`] upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    /// 8-bit RGBA, sRGB encoded color.
    Rgba8Srgb,
    /// 8-bit RGBA, linear data.
    Rgba8Unorm,
    /// Single 8-bit channel, linear.
    R8Unorm,
}

impl TextureFormat {
    pub fn bytes_per_texel(self) -> usize {
        match self {
            Self::Rgba8Srgb | Self::Rgba8Unorm => 4,
            Self::R8Unorm => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFilter {
    Linear,
    Nearest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureWrap {
    Repeat,
    ClampToEdge,
}

/// A decoded image ready for upload.
#[derive(Debug, Clone)]
pub struct TextureData {
    pub kind: TextureKind,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub filter: TextureFilter,
    pub wrap: TextureWrap,
    pub pixels: Vec<u8>,
}

impl TextureData {
    /// RGBA8 pixels for a material texture. Albedo is treated as sRGB, every
    /// other kind as linear data.
    pub fn rgba8(kind: TextureKind, width: u32, height: u32, pixels: Vec<u8>) -> Self {
        let format = if kind == TextureKind::Albedo {
            TextureFormat::Rgba8Srgb
        } else {
            TextureFormat::Rgba8Unorm
        };
        Self {
            kind,
            width,
            height,
            format,
            filter: TextureFilter::Linear,
            wrap: TextureWrap::Repeat,
            pixels,
        }
    }

    pub fn validate(&self) -> Result<(), RenderError> {
        if self.width == 0 || self.height == 0 {
            return Err(RenderError::InvalidTexture(format!(
                "{:?} texture has zero size {}x{}",
                self.kind, self.width, self.height
            )));
        }
        let expected = self.width as usize * self.height as usize * self.format.bytes_per_texel();
        if self.pixels.len() != expected {
            return Err(RenderError::InvalidTexture(format!(
                "{:?} texture {}x{} expects {expected} bytes, got {}",
                self.kind,
                self.width,
                self.height,
                self.pixels.len()
            )));
        }
        Ok(())
    }
}

/// Program source in the backend's shading language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderSource {
    pub label: String,
    pub code: String,
}

impl ShaderSource {
    pub fn new(label: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            code: code.into(),
        }
    }
}

/// Programs every backend ships with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinShader {
    /// Lit forward shading for model meshes.
    Forward,
    /// Fullscreen HDR resolve, tone mapping and ordered dithering.
    ToneMap,
}

/// Resolved location of a uniform inside one program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UniformLocation(u32);

impl UniformLocation {
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    pub const fn index(self) -> u32 {
        self.0
    }
}

/// A value written to a uniform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Float(f32),
    UInt(u32),
    UVec2(UVec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Mat4(Mat4),
}

/// What a texture unit samples from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SamplerSource {
    Texture(TextureId),
    /// Color attachment of an offscreen framebuffer.
    FramebufferColor(FramebufferId),
    /// The backend's 1x1 white texture, bound where a material has no map.
    Fallback,
}

/// Immediate-mode graphics context.
pub trait Backend {
    fn create_mesh(&mut self, data: &MeshData) -> Result<MeshId, RenderError>;
    fn destroy_mesh(&mut self, mesh: MeshId);

    fn create_texture(&mut self, data: &TextureData) -> Result<TextureId, RenderError>;
    fn destroy_texture(&mut self, texture: TextureId);

    /// Compile and link a program.
    fn create_program(&mut self, source: &ShaderSource) -> Result<ProgramId, RenderError>;
    fn destroy_program(&mut self, program: ProgramId);

    /// Look up a uniform by name. `None` when the program does not use it.
    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation>;

    /// Create a multisampled color + depth render target.
    fn create_framebuffer(
        &mut self,
        dimensions: Dimensions,
        samples: u32,
    ) -> Result<FramebufferId, RenderError>;
    fn destroy_framebuffer(&mut self, framebuffer: FramebufferId);

    fn builtin_shader(&self, shader: BuiltinShader) -> ShaderSource;

    /// Size of the default render target.
    fn set_viewport(&mut self, dimensions: Dimensions);
    /// Rasterize triangles as outlines.
    fn set_wireframe(&mut self, enabled: bool);

    /// Redirect subsequent clears and draws. `None` targets the screen.
    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>);
    /// Clear color and depth of the current target.
    fn clear(&mut self, color: [f32; 4]);

    fn use_program(&mut self, program: Option<ProgramId>);
    fn bind_mesh(&mut self, mesh: Option<MeshId>);
    fn bind_texture(&mut self, unit: u32, source: Option<SamplerSource>);
    fn set_uniform(&mut self, location: UniformLocation, value: UniformValue);

    /// Draw `index_count` indices of the bound mesh as triangles.
    fn draw_indexed(&mut self, index_count: u32);
    /// Draw three vertices with no vertex buffer bound.
    fn draw_fullscreen_triangle(&mut self);

    /// Finish the frame and show it.
    fn present(&mut self) -> Result<(), RenderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mesh_data_rejects_out_of_range_index() {
        let v = Vertex::new(Vec3::ZERO, Vec3::Z);
        let data = MeshData::new(vec![v, v, v], vec![0, 1, 3]);
        assert!(matches!(
            data.validate(),
            Err(RenderError::InvalidGeometry(_))
        ));
    }

    #[test]
    fn empty_mesh_data_is_valid() {
        let data = MeshData::default();
        assert!(data.validate().is_ok());
        assert!(data.is_empty());
    }

    #[test]
    fn texture_data_checks_byte_count() {
        let ok = TextureData::rgba8(TextureKind::Albedo, 2, 2, vec![255; 16]);
        assert!(ok.validate().is_ok());
        assert_eq!(ok.format, TextureFormat::Rgba8Srgb);

        let short = TextureData::rgba8(TextureKind::NormalMap, 2, 2, vec![0; 15]);
        assert_eq!(short.format, TextureFormat::Rgba8Unorm);
        assert!(short.validate().is_err());
    }

    #[test]
    fn dimensions_clamp_and_aspect() {
        let d = Dimensions::new(0, 720);
        assert!(d.is_empty());
        assert_eq!(d.clamped(), Dimensions::new(1, 720));
        assert_eq!(Dimensions::new(1280, 720).aspect_ratio(), 1280.0 / 720.0);
        assert_eq!(Dimensions::new(1280, 720).to_string(), "1280x720");
    }
}
