use std::ops::{Deref, DerefMut};

use crate::backend::{Backend, MeshData, MeshId};
use crate::error::RenderError;
use crate::material::Material;
use crate::shader::ShaderBinding;
use crate::texture::SAMPLER_UNITS;

/// Index into the owning model's texture list, per sampler unit.
pub type TextureSlots = [Option<usize>; SAMPLER_UNITS];

/// GPU buffers for one drawable surface, with the material, textures and
/// shader it is drawn with. Immutable once created.
#[derive(Debug)]
pub struct Mesh {
    id: MeshId,
    vertex_count: u32,
    index_count: u32,
    material: Material,
    textures: TextureSlots,
    shader: usize,
}

impl Mesh {
    pub fn load<B: Backend>(
        backend: &mut B,
        data: &MeshData,
        material: Material,
        textures: TextureSlots,
        shader: usize,
    ) -> Result<Self, RenderError> {
        data.validate()?;
        let id = backend.create_mesh(data)?;
        tracing::debug!(
            vertices = data.vertex_count(),
            indices = data.index_count(),
            "mesh created"
        );
        Ok(Self {
            id,
            vertex_count: data.vertex_count(),
            index_count: data.index_count(),
            material,
            textures,
            shader,
        })
    }

    pub fn id(&self) -> MeshId {
        self.id
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    /// Nothing to draw.
    pub fn is_empty(&self) -> bool {
        self.index_count == 0
    }

    pub fn material(&self) -> &Material {
        &self.material
    }

    pub fn texture_slots(&self) -> &TextureSlots {
        &self.textures
    }

    pub fn shader_index(&self) -> usize {
        self.shader
    }

    /// Bind the buffers inside an active shader scope.
    pub fn activate<'a, B: Backend>(
        &'a self,
        mut shader: ShaderBinding<'a, B>,
    ) -> MeshBinding<'a, B> {
        shader.backend().bind_mesh(Some(self.id));
        MeshBinding { shader, mesh: self }
    }

    pub fn release<B: Backend>(self, backend: &mut B) {
        backend.destroy_mesh(self.id);
    }
}

/// Scoped mesh binding. Derefs to the enclosing [`ShaderBinding`], so the
/// per-entity uniforms are written through it. Unbinds the mesh, then the
/// shader scope, on drop.
pub struct MeshBinding<'a, B: Backend> {
    shader: ShaderBinding<'a, B>,
    mesh: &'a Mesh,
}

impl<B: Backend> MeshBinding<'_, B> {
    /// Issue one indexed draw. Returns whether anything was submitted.
    pub fn draw(&mut self) -> bool {
        if self.mesh.is_empty() {
            return false;
        }
        self.shader.backend().draw_indexed(self.mesh.index_count);
        true
    }
}

impl<'a, B: Backend> Deref for MeshBinding<'a, B> {
    type Target = ShaderBinding<'a, B>;

    fn deref(&self) -> &Self::Target {
        &self.shader
    }
}

impl<B: Backend> DerefMut for MeshBinding<'_, B> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.shader
    }
}

impl<B: Backend> Drop for MeshBinding<'_, B> {
    fn drop(&mut self) {
        self.shader.backend().bind_mesh(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Call, RecordingBackend, ShaderSource, Vertex};
    use crate::shader::Shader;
    use glam::{Mat4, Vec3};

    fn quad() -> MeshData {
        let v = Vertex::new(Vec3::ZERO, Vec3::Z);
        MeshData::new(vec![v; 4], vec![0, 1, 2, 2, 3, 0])
    }

    #[test]
    fn binding_scope_unwinds_in_order() {
        let mut backend = RecordingBackend::new();
        let shader = Shader::load(&mut backend, &ShaderSource::new("s", "transform")).unwrap();
        let mesh = Mesh::load(&mut backend, &quad(), Material::default(), [None; 4], 0).unwrap();
        backend.reset();
        {
            let mut bound = mesh.activate(shader.activate(&mut backend));
            bound.bind_transform(&Mat4::IDENTITY);
            assert!(bound.draw());
        }
        let calls = backend.calls();
        assert_eq!(calls[0], Call::UseProgram(Some(shader.program())));
        assert_eq!(calls[1], Call::BindMesh(Some(mesh.id())));
        assert_eq!(calls[calls.len() - 3], Call::DrawIndexed(6));
        assert_eq!(calls[calls.len() - 2], Call::BindMesh(None));
        assert_eq!(calls[calls.len() - 1], Call::UseProgram(None));
    }

    #[test]
    fn rejects_bad_indices_before_upload() {
        let mut backend = RecordingBackend::new();
        let v = Vertex::new(Vec3::ZERO, Vec3::Z);
        let bad = MeshData::new(vec![v], vec![0, 0, 5]);
        let err = Mesh::load(&mut backend, &bad, Material::default(), [None; 4], 0);
        assert!(matches!(err, Err(RenderError::InvalidGeometry(_))));
        assert_eq!(backend.live_resources(), 0);
    }

    #[test]
    fn empty_mesh_draws_nothing() {
        let mut backend = RecordingBackend::new();
        let shader = Shader::load(&mut backend, &ShaderSource::new("s", "x")).unwrap();
        let empty = MeshData::default();
        let mesh = Mesh::load(&mut backend, &empty, Material::default(), [None; 4], 0).unwrap();
        assert!(mesh.is_empty());
        let mut bound = mesh.activate(shader.activate(&mut backend));
        assert!(!bound.draw());
        drop(bound);
        assert_eq!(backend.counters().draws, 0);
    }
}
