//! Loaded models and their assembly.

use glam::{Mat4, Vec3};

use crate::backend::{Backend, MeshData, ShaderSource, TextureData};
use crate::error::RenderError;
use crate::material::Material;
use crate::mesh::{Mesh, TextureSlots};
use crate::shader::Shader;
use crate::texture::{SAMPLER_UNITS, Texture, TextureKind};

/// Geometry of one mesh as delivered by a parser.
#[derive(Debug, Clone, Default)]
pub struct MeshSource {
    pub data: MeshData,
    pub material: Option<Material>,
    /// Indices into [`ModelBuilder::textures`].
    pub textures: Vec<usize>,
}

impl MeshSource {
    pub fn new(data: MeshData) -> Self {
        Self {
            data,
            ..Self::default()
        }
    }
}

/// Named set of meshes sharing textures, shaders and an initial transform.
#[derive(Debug)]
pub struct Model {
    name: String,
    meshes: Vec<Mesh>,
    textures: Vec<Texture>,
    shaders: Vec<Shader>,
    initial_transform: Mat4,
}

impl Model {
    pub fn builder(name: impl Into<String>) -> ModelBuilder {
        ModelBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn meshes(&self) -> &[Mesh] {
        &self.meshes
    }

    pub fn textures(&self) -> &[Texture] {
        &self.textures
    }

    pub fn shaders(&self) -> &[Shader] {
        &self.shaders
    }

    pub fn shader_for(&self, mesh: &Mesh) -> Option<&Shader> {
        self.shaders.get(mesh.shader_index())
    }

    pub fn initial_transform(&self) -> Mat4 {
        self.initial_transform
    }

    /// Texture ids for every sampler unit of `mesh`.
    pub fn samplers_for(&self, mesh: &Mesh) -> crate::shader::TextureSamplers {
        let mut samplers = [None; SAMPLER_UNITS];
        for (sampler, slot) in samplers.iter_mut().zip(mesh.texture_slots()) {
            *sampler = slot.and_then(|i| self.textures.get(i)).map(Texture::id);
        }
        samplers
    }

    /// Destroy every GPU resource the model owns.
    pub fn release<B: Backend>(self, backend: &mut B) {
        tracing::debug!(model = %self.name, meshes = self.meshes.len(), "model released");
        let parts = Parts {
            textures: self.textures,
            meshes: self.meshes,
            shaders: self.shaders,
        };
        parts.release(backend);
    }
}

/// Initial transform `R_z * R_y * R_x * S`. Angles in radians; a zero
/// scale leaves the scale out.
pub fn initial_transform(scale: f32, rotation: Vec3) -> Mat4 {
    let mut transform = Mat4::IDENTITY;
    if scale != 0.0 {
        transform *= Mat4::from_scale(Vec3::splat(scale));
    }
    transform = Mat4::from_rotation_x(rotation.x) * transform;
    transform = Mat4::from_rotation_y(rotation.y) * transform;
    Mat4::from_rotation_z(rotation.z) * transform
}

/// Resources created so far during assembly.
#[derive(Default)]
struct Parts {
    textures: Vec<Texture>,
    meshes: Vec<Mesh>,
    shaders: Vec<Shader>,
}

impl Parts {
    fn release<B: Backend>(self, backend: &mut B) {
        for shader in self.shaders {
            shader.release(backend);
        }
        for mesh in self.meshes {
            mesh.release(backend);
        }
        for texture in self.textures {
            texture.release(backend);
        }
    }
}

/// Collects parsed inputs and creates the GPU side of a [`Model`].
#[derive(Debug, Clone)]
pub struct ModelBuilder {
    name: String,
    meshes: Vec<MeshSource>,
    textures: Vec<TextureData>,
    overrides: Vec<TextureData>,
    shader: Option<ShaderSource>,
    scale: f32,
    rotation: Vec3,
    material: Option<Material>,
}

impl ModelBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            meshes: Vec::new(),
            textures: Vec::new(),
            overrides: Vec::new(),
            shader: None,
            scale: 1.0,
            rotation: Vec3::ZERO,
            material: None,
        }
    }

    pub fn mesh(mut self, mesh: MeshSource) -> Self {
        self.meshes.push(mesh);
        self
    }

    pub fn meshes(mut self, meshes: impl IntoIterator<Item = MeshSource>) -> Self {
        self.meshes.extend(meshes);
        self
    }

    /// Textures the meshes reference by index.
    pub fn textures(mut self, textures: impl IntoIterator<Item = TextureData>) -> Self {
        self.textures.extend(textures);
        self
    }

    /// A model-wide texture. Replaces every mesh texture of the same kind.
    pub fn texture_override(mut self, texture: TextureData) -> Self {
        self.overrides.retain(|t| t.kind != texture.kind);
        self.overrides.push(texture);
        self
    }

    pub fn shader(mut self, source: ShaderSource) -> Self {
        self.shader = Some(source);
        self
    }

    pub fn scale(mut self, scale: f32) -> Self {
        self.scale = scale;
        self
    }

    /// Euler angles in radians, applied X then Y then Z.
    pub fn rotation(mut self, rotation: Vec3) -> Self {
        self.rotation = rotation;
        self
    }

    /// Model-wide material. Wins over every mesh material.
    pub fn material(mut self, material: Material) -> Self {
        self.material = Some(material);
        self
    }

    /// Create textures, then meshes, then the shader. On failure everything
    /// created so far is destroyed before the error is returned.
    pub fn build<B: Backend>(self, backend: &mut B) -> Result<Model, RenderError> {
        let Some(shader) = self.shader.as_ref() else {
            return Err(RenderError::MissingShader(self.name));
        };

        let mut parts = Parts::default();
        match self.create(backend, shader, &mut parts) {
            Ok(()) => {
                tracing::debug!(
                    model = %self.name,
                    meshes = parts.meshes.len(),
                    textures = parts.textures.len(),
                    "model built"
                );
                Ok(Model {
                    name: self.name,
                    meshes: parts.meshes,
                    textures: parts.textures,
                    shaders: parts.shaders,
                    initial_transform: initial_transform(self.scale, self.rotation),
                })
            }
            Err(err) => {
                tracing::debug!(model = %self.name, error = %err, "model build failed, releasing");
                parts.release(backend);
                Err(err)
            }
        }
    }

    fn create<B: Backend>(
        &self,
        backend: &mut B,
        shader: &ShaderSource,
        parts: &mut Parts,
    ) -> Result<(), RenderError> {
        for data in self.textures.iter().chain(&self.overrides) {
            parts.textures.push(Texture::load(backend, data)?);
        }

        let first_override = self.textures.len();
        let mut model_slots: TextureSlots = [None; SAMPLER_UNITS];
        for (offset, data) in self.overrides.iter().enumerate() {
            if let Some(unit) = data.kind.sampler_unit() {
                model_slots[unit as usize] = Some(first_override + offset);
            }
        }

        for source in &self.meshes {
            let slots = self.mesh_slots(source, &model_slots);
            let material = self.material.or(source.material).unwrap_or_default();
            parts
                .meshes
                .push(Mesh::load(backend, &source.data, material, slots, 0)?);
        }

        parts.shaders.push(Shader::load(backend, shader)?);
        Ok(())
    }

    fn mesh_slots(&self, source: &MeshSource, model_slots: &TextureSlots) -> TextureSlots {
        let mut slots = *model_slots;
        for &index in &source.textures {
            let Some(data) = self.textures.get(index) else {
                tracing::warn!(model = %self.name, index, "mesh references a missing texture");
                continue;
            };
            if let Some(unit) = kind_unit(data.kind) {
                slots[unit].get_or_insert(index);
            }
        }
        slots
    }
}

fn kind_unit(kind: TextureKind) -> Option<usize> {
    kind.sampler_unit().map(|u| u as usize)
}
