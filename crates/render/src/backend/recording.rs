//! A backend that draws nothing and remembers everything.
//!
//! Used by the core's tests and by headless tooling to check what a frame
//! would have done on a GPU. A program's uniforms are the whitespace
//! separated names in its source text.

use std::collections::HashMap;

use serde::Serialize;
use slotmap::SlotMap;

use super::{
    Backend, BuiltinShader, Dimensions, FramebufferId, MeshData, MeshId, ProgramId, SamplerSource,
    ShaderSource, TextureData, TextureId, UniformLocation, UniformValue,
};
use crate::error::RenderError;
use crate::light::MAX_LIGHTS;
use crate::shader::{LightField, Uniform};

/// One recorded backend call.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    CreateMesh(MeshId),
    DestroyMesh(MeshId),
    CreateTexture(TextureId),
    DestroyTexture(TextureId),
    CreateProgram(ProgramId),
    DestroyProgram(ProgramId),
    CreateFramebuffer(FramebufferId, Dimensions),
    DestroyFramebuffer(FramebufferId),
    SetViewport(Dimensions),
    SetWireframe(bool),
    BindFramebuffer(Option<FramebufferId>),
    Clear([f32; 4]),
    UseProgram(Option<ProgramId>),
    BindMesh(Option<MeshId>),
    BindTexture(u32, Option<SamplerSource>),
    SetUniform(UniformLocation, UniformValue),
    DrawIndexed(u32),
    DrawFullscreenTriangle,
    Present,
}

/// Per-kind call totals since construction or the last [`RecordingBackend::reset`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counters {
    pub program_binds: usize,
    pub mesh_binds: usize,
    pub texture_binds: usize,
    pub uniform_writes: usize,
    pub draws: usize,
    pub fullscreen_draws: usize,
    pub clears: usize,
    pub framebuffer_binds: usize,
    pub framebuffers_created: usize,
    pub framebuffers_destroyed: usize,
    pub presents: usize,
}

#[derive(Debug)]
struct Program {
    uniforms: Vec<String>,
    values: HashMap<u32, UniformValue>,
}

#[derive(Debug, Default)]
pub struct RecordingBackend {
    meshes: SlotMap<MeshId, u32>,
    textures: SlotMap<TextureId, (u32, u32)>,
    programs: SlotMap<ProgramId, Program>,
    framebuffers: SlotMap<FramebufferId, Dimensions>,
    calls: Vec<Call>,
    counters: Counters,
    viewport: Option<Dimensions>,
    wireframe: bool,
    program: Option<ProgramId>,
    mesh: Option<MeshId>,
    framebuffer: Option<FramebufferId>,
    max_dimension: Option<u32>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject framebuffers wider or taller than `max`, like a device limit.
    pub fn with_max_dimension(mut self, max: u32) -> Self {
        self.max_dimension = Some(max);
        self
    }

    pub fn calls(&self) -> &[Call] {
        &self.calls
    }

    pub fn counters(&self) -> Counters {
        self.counters
    }

    /// Forget recorded calls and counters. Live resources are kept.
    pub fn reset(&mut self) {
        self.calls.clear();
        self.counters = Counters::default();
    }

    /// Meshes, textures, programs and framebuffers not yet destroyed.
    pub fn live_resources(&self) -> usize {
        self.meshes.len() + self.textures.len() + self.programs.len() + self.framebuffers.len()
    }

    pub fn viewport(&self) -> Option<Dimensions> {
        self.viewport
    }

    pub fn wireframe(&self) -> bool {
        self.wireframe
    }

    pub fn framebuffer_size(&self, framebuffer: FramebufferId) -> Option<Dimensions> {
        self.framebuffers.get(framebuffer).copied()
    }

    /// Last value written to a uniform of `program`.
    pub fn uniform_value(&self, program: ProgramId, name: &str) -> Option<UniformValue> {
        let program = self.programs.get(program)?;
        let index = program.uniforms.iter().position(|u| u == name)?;
        program.values.get(&(index as u32)).copied()
    }

    fn record(&mut self, call: Call) {
        tracing::trace!(?call, "backend call");
        self.calls.push(call);
    }
}

fn builtin_source(shader: BuiltinShader) -> String {
    match shader {
        BuiltinShader::Forward => {
            let mut names: Vec<String> = Uniform::ALL
                .iter()
                .filter(|u| !matches!(u, Uniform::Exposure | Uniform::Dimensions))
                .map(|u| u.name().to_owned())
                .collect();
            for index in 0..MAX_LIGHTS {
                names.extend(LightField::ALL.iter().map(|f| f.uniform_name(index)));
            }
            names.join("\n")
        }
        BuiltinShader::ToneMap => {
            let names = [Uniform::Exposure.name(), Uniform::Dimensions.name()];
            names.join("\n")
        }
    }
}

impl Backend for RecordingBackend {
    fn create_mesh(&mut self, data: &MeshData) -> Result<MeshId, RenderError> {
        data.validate()?;
        let id = self.meshes.insert(data.index_count());
        self.record(Call::CreateMesh(id));
        Ok(id)
    }

    fn destroy_mesh(&mut self, mesh: MeshId) {
        self.meshes.remove(mesh);
        self.record(Call::DestroyMesh(mesh));
    }

    fn create_texture(&mut self, data: &TextureData) -> Result<TextureId, RenderError> {
        data.validate()?;
        let id = self.textures.insert((data.width, data.height));
        self.record(Call::CreateTexture(id));
        Ok(id)
    }

    fn destroy_texture(&mut self, texture: TextureId) {
        self.textures.remove(texture);
        self.record(Call::DestroyTexture(texture));
    }

    fn create_program(&mut self, source: &ShaderSource) -> Result<ProgramId, RenderError> {
        let uniforms: Vec<String> = source.code.split_whitespace().map(str::to_owned).collect();
        if uniforms.is_empty() {
            return Err(RenderError::creation(
                "program",
                format!("`{}` has an empty source", source.label),
            ));
        }
        let id = self.programs.insert(Program {
            uniforms,
            values: HashMap::new(),
        });
        self.record(Call::CreateProgram(id));
        Ok(id)
    }

    fn destroy_program(&mut self, program: ProgramId) {
        self.programs.remove(program);
        self.record(Call::DestroyProgram(program));
    }

    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        self.programs
            .get(program)?
            .uniforms
            .iter()
            .position(|u| u == name)
            .map(|index| UniformLocation::new(index as u32))
    }

    fn create_framebuffer(
        &mut self,
        dimensions: Dimensions,
        samples: u32,
    ) -> Result<FramebufferId, RenderError> {
        if dimensions.is_empty() {
            return Err(RenderError::InvalidDimensions(dimensions));
        }
        if samples == 0 {
            return Err(RenderError::creation("framebuffer", "zero samples"));
        }
        if let Some(max) = self
            .max_dimension
            .filter(|&max| dimensions.width > max || dimensions.height > max)
        {
            return Err(RenderError::creation(
                "framebuffer",
                format!("{dimensions} exceeds {max}"),
            ));
        }
        let id = self.framebuffers.insert(dimensions);
        self.counters.framebuffers_created += 1;
        self.record(Call::CreateFramebuffer(id, dimensions));
        Ok(id)
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferId) {
        self.framebuffers.remove(framebuffer);
        self.counters.framebuffers_destroyed += 1;
        self.record(Call::DestroyFramebuffer(framebuffer));
    }

    fn builtin_shader(&self, shader: BuiltinShader) -> ShaderSource {
        let label = match shader {
            BuiltinShader::Forward => "forward",
            BuiltinShader::ToneMap => "tone_map",
        };
        ShaderSource::new(label, builtin_source(shader))
    }

    fn set_viewport(&mut self, dimensions: Dimensions) {
        self.viewport = Some(dimensions);
        self.record(Call::SetViewport(dimensions));
    }

    fn set_wireframe(&mut self, enabled: bool) {
        self.wireframe = enabled;
        self.record(Call::SetWireframe(enabled));
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>) {
        if framebuffer.is_some() {
            self.counters.framebuffer_binds += 1;
        }
        self.framebuffer = framebuffer;
        self.record(Call::BindFramebuffer(framebuffer));
    }

    fn clear(&mut self, color: [f32; 4]) {
        self.counters.clears += 1;
        self.record(Call::Clear(color));
    }

    fn use_program(&mut self, program: Option<ProgramId>) {
        if program.is_some() {
            self.counters.program_binds += 1;
        }
        self.program = program;
        self.record(Call::UseProgram(program));
    }

    fn bind_mesh(&mut self, mesh: Option<MeshId>) {
        if mesh.is_some() {
            self.counters.mesh_binds += 1;
        }
        self.mesh = mesh;
        self.record(Call::BindMesh(mesh));
    }

    fn bind_texture(&mut self, unit: u32, source: Option<SamplerSource>) {
        if source.is_some() {
            self.counters.texture_binds += 1;
        }
        self.record(Call::BindTexture(unit, source));
    }

    fn set_uniform(&mut self, location: UniformLocation, value: UniformValue) {
        let program = self
            .program
            .and_then(|id| self.programs.get_mut(id));
        assert!(program.is_some(), "set_uniform without a bound program");
        if let Some(program) = program {
            program.values.insert(location.index(), value);
        }
        self.counters.uniform_writes += 1;
        self.record(Call::SetUniform(location, value));
    }

    fn draw_indexed(&mut self, index_count: u32) {
        assert!(self.program.is_some(), "draw without a bound program");
        let available = self.mesh.and_then(|m| self.meshes.get(m)).copied();
        assert!(available.is_some(), "draw without a bound mesh");
        assert!(
            available.is_some_and(|n| index_count <= n),
            "draw of {index_count} indices exceeds the bound mesh"
        );
        self.counters.draws += 1;
        self.record(Call::DrawIndexed(index_count));
    }

    fn draw_fullscreen_triangle(&mut self) {
        assert!(self.program.is_some(), "draw without a bound program");
        self.counters.fullscreen_draws += 1;
        self.record(Call::DrawFullscreenTriangle);
    }

    fn present(&mut self) -> Result<(), RenderError> {
        self.counters.presents += 1;
        self.record(Call::Present);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    use crate::backend::Vertex;

    fn triangle() -> MeshData {
        let v = Vertex::new(Vec3::ZERO, Vec3::Z);
        MeshData::new(vec![v, v, v], vec![0, 1, 2])
    }

    #[test]
    fn tracks_live_resources() {
        let mut backend = RecordingBackend::new();
        let mesh = backend.create_mesh(&triangle()).unwrap();
        let size = Dimensions::new(4, 4);
        let fb = backend.create_framebuffer(size, 4).unwrap();
        assert_eq!(backend.live_resources(), 2);
        backend.destroy_mesh(mesh);
        backend.destroy_framebuffer(fb);
        assert_eq!(backend.live_resources(), 0);
        assert_eq!(backend.counters().framebuffers_created, 1);
        assert_eq!(backend.counters().framebuffers_destroyed, 1);
    }

    #[test]
    fn empty_program_fails_to_compile() {
        let mut backend = RecordingBackend::new();
        let err = backend.create_program(&ShaderSource::new("blank", "  \n"));
        assert!(matches!(err, Err(RenderError::ResourceCreation { .. })));
        assert_eq!(backend.live_resources(), 0);
    }

    #[test]
    fn zero_sized_framebuffer_is_rejected() {
        let mut backend = RecordingBackend::new();
        let err = backend.create_framebuffer(Dimensions::new(0, 10), 4);
        assert!(matches!(err, Err(RenderError::InvalidDimensions(_))));
    }

    #[test]
    fn uniform_values_follow_the_bound_program() {
        let mut backend = RecordingBackend::new();
        let program = backend.create_program(&ShaderSource::new("p", "a b")).unwrap();
        let b = backend.uniform_location(program, "b").unwrap();
        assert_eq!(b.index(), 1);
        assert!(backend.uniform_location(program, "c").is_none());

        backend.use_program(Some(program));
        backend.set_uniform(b, UniformValue::Float(2.0));
        assert_eq!(
            backend.uniform_value(program, "b"),
            Some(UniformValue::Float(2.0))
        );
        assert_eq!(backend.uniform_value(program, "a"), None);
    }

    #[test]
    #[should_panic(expected = "without a bound mesh")]
    fn draw_without_mesh_panics() {
        let mut backend = RecordingBackend::new();
        let program = backend.create_program(&ShaderSource::new("p", "x")).unwrap();
        backend.use_program(Some(program));
        backend.draw_indexed(3);
    }

    #[test]
    fn builtin_sources_compile() {
        let mut backend = RecordingBackend::new();
        for builtin in [BuiltinShader::Forward, BuiltinShader::ToneMap] {
            let source = backend.builtin_shader(builtin);
            assert!(backend.create_program(&source).is_ok());
        }
    }
}
