//! Loader boundary for Prism: turns files into render core inputs.
//!
//! Parsers only produce CPU-side data ([`MeshSource`], [`TextureData`],
//! [`ShaderSource`]). GPU resources are created by `prism-render` when a
//! model is assembled, so a parse failure never leaks anything.
//!
//! [`MeshSource`]: prism_render::MeshSource
//! [`TextureData`]: prism_render::TextureData
//! [`ShaderSource`]: prism_render::ShaderSource

mod error;
mod import;
mod manifest;
mod model;
pub mod primitives;
mod texture;

pub use error::AssetError;
pub use import::{LoadedGeometry, load_meshes};
pub use manifest::{CameraParams, EntityParams, SceneManifest};
pub use model::{Geometry, ModelParams, TexturePaths, load_model, load_shader_source};
pub use texture::load_texture_data;

pub fn crate_info() -> &'static str {
    concat!("prism-assets v", env!("CARGO_PKG_VERSION"))
}
