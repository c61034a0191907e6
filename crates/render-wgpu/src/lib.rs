//! wgpu backend for the Prism render core.
//!
//! The core's immediate-mode calls are recorded per frame and replayed into
//! render passes at present time. Uniforms are addressed by name through
//! naga reflection of each program's WGSL.
//!
//! # Invariants
//! - One uniform struct per program at `@group(0) @binding(0)`.
//! - Texture unit `u` lives at `@group(1)`, texture at binding `2u`,
//!   sampler at `2u + 1`.
//! - Offscreen targets are HDR (`Rgba16Float`) and resolved before sampling.

mod camera;
mod frame;
mod gpu;
mod reflect;
mod shaders;

pub use camera::FlyController;
pub use frame::MAX_TEXTURE_UNITS;
pub use gpu::{DEPTH_FORMAT, HDR_FORMAT, WgpuBackend};
pub use reflect::{ProgramLayout, ReflectError, UniformField, reflect};
pub use shaders::{FORWARD_SHADER, TONE_MAP_SHADER};
