use std::path::{Path, PathBuf};

use glam::Vec3;
use prism_render::{Backend, BuiltinShader, Material, MeshSource, Model, ShaderSource, TextureKind};
use serde::{Deserialize, Serialize};

use crate::error::AssetError;
use crate::import::{LoadedGeometry, load_meshes};
use crate::primitives;
use crate::texture::load_texture_data;

/// Where a model's geometry comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Geometry {
    /// A `.gltf` / `.glb` file.
    File { path: PathBuf },
    Cube { size: f32 },
    Sphere {
        radius: f32,
        #[serde(default = "default_segments")]
        segments: u32,
        #[serde(default = "default_rings")]
        rings: u32,
    },
}

fn default_segments() -> u32 {
    32
}

fn default_rings() -> u32 {
    16
}

impl Geometry {
    pub fn load(&self) -> Result<LoadedGeometry, AssetError> {
        let data = match self {
            Self::File { path } => return load_meshes(path),
            Self::Cube { size } => primitives::cube(*size),
            Self::Sphere {
                radius,
                segments,
                rings,
            } => primitives::sphere(*radius, *segments, *rings),
        };
        Ok(LoadedGeometry {
            meshes: vec![MeshSource::new(data)],
            textures: Vec::new(),
        })
    }
}

/// Model-wide texture files. Each one replaces the maps of the same kind
/// found in the geometry file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TexturePaths {
    pub albedo: Option<PathBuf>,
    pub normal: Option<PathBuf>,
    pub metallic_roughness: Option<PathBuf>,
    pub occlusion: Option<PathBuf>,
    /// Kept with the manifest but never loaded: emission comes from the
    /// material factor.
    pub emission: Option<PathBuf>,
}

impl TexturePaths {
    fn iter(&self) -> impl Iterator<Item = (TextureKind, &Path)> {
        [
            (TextureKind::Albedo, &self.albedo),
            (TextureKind::NormalMap, &self.normal),
            (TextureKind::MetallicRoughnessMap, &self.metallic_roughness),
            (TextureKind::AmbientOcclusionMap, &self.occlusion),
        ]
        .into_iter()
        .filter_map(|(kind, path)| path.as_deref().map(|p| (kind, p)))
    }

    fn iter_mut(&mut self) -> impl Iterator<Item = &mut PathBuf> {
        [
            &mut self.albedo,
            &mut self.normal,
            &mut self.metallic_roughness,
            &mut self.occlusion,
            &mut self.emission,
        ]
        .into_iter()
        .flatten()
    }
}

/// Everything needed to load one [`Model`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelParams {
    pub name: String,
    pub geometry: Geometry,
    #[serde(default)]
    pub textures: TexturePaths,
    /// WGSL program. The backend's forward shader when absent.
    #[serde(default)]
    pub shader: Option<PathBuf>,
    #[serde(default = "default_scale")]
    pub scale: f32,
    /// Euler angles in degrees, applied X then Y then Z.
    #[serde(default)]
    pub rotation: Vec3,
    /// Overrides every material in the geometry file.
    #[serde(default)]
    pub material: Option<Material>,
}

fn default_scale() -> f32 {
    1.0
}

impl ModelParams {
    pub fn new(name: impl Into<String>, geometry: Geometry) -> Self {
        Self {
            name: name.into(),
            geometry,
            textures: TexturePaths::default(),
            shader: None,
            scale: 1.0,
            rotation: Vec3::ZERO,
            material: None,
        }
    }

    /// Make every relative path relative to `base` instead.
    pub fn resolve_paths(&mut self, base: &Path) {
        let paths = self
            .textures
            .iter_mut()
            .chain(self.shader.as_mut())
            .chain(match &mut self.geometry {
                Geometry::File { path } => Some(path),
                _ => None,
            });
        for path in paths {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }
}

/// Read a WGSL program. The label is the file stem.
pub fn load_shader_source(path: impl AsRef<Path>) -> Result<ShaderSource, AssetError> {
    let path = path.as_ref();
    let code = std::fs::read_to_string(path).map_err(|e| AssetError::io(path, e))?;
    let label = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "shader".into());
    Ok(ShaderSource::new(label, code))
}

/// Parse every input of `params` and assemble the model on `backend`.
///
/// All files are read before the first GPU resource is created, so a
/// missing file never leaves anything to clean up.
pub fn load_model<B: Backend>(backend: &mut B, params: &ModelParams) -> Result<Model, AssetError> {
    let geometry = params.geometry.load()?;
    let overrides = params
        .textures
        .iter()
        .map(|(kind, path)| load_texture_data(kind, path))
        .collect::<Result<Vec<_>, _>>()?;
    let shader = match &params.shader {
        Some(path) => load_shader_source(path)?,
        None => backend.builtin_shader(BuiltinShader::Forward),
    };
    if let Some(path) = &params.textures.emission {
        tracing::debug!(model = %params.name, path = %path.display(), "emission map skipped");
    }

    let mut builder = Model::builder(&params.name)
        .meshes(geometry.meshes)
        .textures(geometry.textures)
        .shader(shader)
        .scale(params.scale)
        .rotation(Vec3::new(
            params.rotation.x.to_radians(),
            params.rotation.y.to_radians(),
            params.rotation.z.to_radians(),
        ));
    for texture in overrides {
        builder = builder.texture_override(texture);
    }
    if let Some(material) = params.material {
        builder = builder.material(material);
    }

    let model = builder.build(backend)?;
    tracing::info!(model = %params.name, meshes = model.meshes().len(), "model loaded");
    Ok(model)
}
