//! Prism render core: backend-agnostic scene and frame pipeline.
//!
//! # Invariants
//! - Every GPU operation goes through the [`Backend`] trait.
//! - Model state is bound once per mesh per frame; only the entity
//!   transform changes inside the entity loop.
//! - Entities never mutate model state.
//!
//! The wgpu implementation lives in `prism-render-wgpu`. The
//! [`RecordingBackend`] runs the whole pipeline without a GPU and is what
//! the tests and the headless CLI use.

pub mod backend;
mod camera;
mod entity;
mod environment;
mod error;
mod framebuffer;
mod light;
mod material;
mod mesh;
mod model;
mod renderer;
mod scene;
mod shader;
mod texture;

pub use backend::{
    Backend, BuiltinShader, Call, Counters, Dimensions, FramebufferId, MeshData, MeshId, ProgramId,
    RecordingBackend, SamplerSource, ShaderSource, TextureData, TextureFilter, TextureFormat,
    TextureId, TextureWrap, UniformLocation, UniformValue, Vertex,
};
pub use camera::Camera;
pub use entity::Entity;
pub use environment::Environment;
pub use error::RenderError;
pub use framebuffer::{Framebuffer, FramebufferBinding};
pub use light::{Light, LightKind, MAX_LIGHTS};
pub use material::Material;
pub use mesh::{Mesh, MeshBinding, TextureSlots};
pub use model::{MeshSource, Model, ModelBuilder, initial_transform};
pub use renderer::{FrameStats, Renderer, RendererConfig};
pub use scene::{EntityId, Group, LightId, ModelId, Scene};
pub use shader::{LightField, Shader, ShaderBinding, TextureSamplers, Uniform, normal_matrix};
pub use texture::{BAYER_MATRIX, SAMPLER_UNITS, Texture, TextureKind};

pub fn crate_info() -> &'static str {
    concat!("prism-render v", env!("CARGO_PKG_VERSION"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("render"));
    }
}
