//! Deferred frame recording.
//!
//! The core drives the backend like an immediate-mode context, but wgpu
//! wants whole render passes. Calls are recorded here as passes of draw
//! commands and replayed into one command encoder at present time. Each
//! draw snapshots the bound program's uniform block into a shared staging
//! area at a dynamic-offset aligned position.

use prism_render::{FramebufferId, MeshId, ProgramId, SamplerSource, UniformValue};

/// Texture units a program may use.
pub const MAX_TEXTURE_UNITS: usize = 8;

pub type TextureUnits = [Option<SamplerSource>; MAX_TEXTURE_UNITS];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    Surface,
    Offscreen(FramebufferId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Geometry {
    Mesh { mesh: MeshId, index_count: u32 },
    FullscreenTriangle,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DrawCommand {
    pub program: ProgramId,
    pub geometry: Geometry,
    pub textures: TextureUnits,
    pub wireframe: bool,
    pub uniform_offset: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pass {
    pub target: Target,
    /// `None` loads the previous contents.
    pub clear: Option<[f32; 4]>,
    pub draws: Vec<DrawCommand>,
}

#[derive(Debug)]
pub struct FrameRecorder {
    passes: Vec<Pass>,
    uniforms: Vec<u8>,
    alignment: usize,
}

impl FrameRecorder {
    pub fn new(alignment: u32) -> Self {
        Self {
            passes: Vec::new(),
            uniforms: Vec::new(),
            alignment: alignment.max(1) as usize,
        }
    }

    pub fn passes(&self) -> &[Pass] {
        &self.passes
    }

    /// Staged uniform blocks for every draw of the frame.
    pub fn uniforms(&self) -> &[u8] {
        &self.uniforms
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// Clear `target`. A clear after draws on the same target opens a new pass.
    pub fn clear(&mut self, target: Target, color: [f32; 4]) {
        match self.passes.last_mut() {
            Some(pass) if pass.target == target && pass.draws.is_empty() => {
                pass.clear = Some(color);
            }
            _ => self.passes.push(Pass {
                target,
                clear: Some(color),
                draws: Vec::new(),
            }),
        }
    }

    /// Record a draw against `target` with a copy of `block`.
    pub fn draw(
        &mut self,
        target: Target,
        program: ProgramId,
        geometry: Geometry,
        textures: TextureUnits,
        wireframe: bool,
        block: &[u8],
    ) {
        let uniform_offset = self.stage(block);
        let command = DrawCommand {
            program,
            geometry,
            textures,
            wireframe,
            uniform_offset,
        };
        match self.passes.last_mut() {
            Some(pass) if pass.target == target => pass.draws.push(command),
            _ => self.passes.push(Pass {
                target,
                clear: None,
                draws: vec![command],
            }),
        }
    }

    fn stage(&mut self, block: &[u8]) -> u32 {
        let offset = self.uniforms.len().next_multiple_of(self.alignment);
        self.uniforms.resize(offset, 0);
        self.uniforms.extend_from_slice(block);
        offset as u32
    }
}

/// Native-endian bytes of a uniform value as laid out in WGSL.
pub fn uniform_bytes(value: &UniformValue) -> Vec<u8> {
    match value {
        UniformValue::Float(v) => bytemuck::bytes_of(v).to_vec(),
        UniformValue::UInt(v) => bytemuck::bytes_of(v).to_vec(),
        UniformValue::UVec2(v) => bytemuck::cast_slice(&v.to_array()).to_vec(),
        UniformValue::Vec3(v) => bytemuck::cast_slice(&v.to_array()).to_vec(),
        UniformValue::Vec4(v) => bytemuck::cast_slice(&v.to_array()).to_vec(),
        UniformValue::Mat4(m) => bytemuck::cast_slice(&m.to_cols_array()).to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Mat4, Vec3};
    use prism_render::{Backend, Dimensions, RecordingBackend, ShaderSource};

    const UNBOUND: TextureUnits = [None; MAX_TEXTURE_UNITS];

    fn ids() -> (FramebufferId, ProgramId) {
        let mut backend = RecordingBackend::new();
        let fb = backend.create_framebuffer(Dimensions::new(4, 4), 1);
        let program = backend.create_program(&ShaderSource::new("p", "x"));
        (fb.unwrap(), program.unwrap())
    }

    fn triangle(program: ProgramId) -> (ProgramId, Geometry) {
        (program, Geometry::FullscreenTriangle)
    }

    #[test]
    fn clear_after_draws_opens_a_new_pass() {
        let (fb, program) = ids();
        let target = Target::Offscreen(fb);
        let (program, geometry) = triangle(program);
        let mut frame = FrameRecorder::new(256);

        frame.clear(target, [0.0; 4]);
        frame.clear(target, [1.0; 4]);
        assert_eq!(frame.passes().len(), 1);
        assert_eq!(frame.passes()[0].clear, Some([1.0; 4]));

        frame.draw(target, program, geometry, UNBOUND, false, &[]);
        frame.clear(target, [0.5; 4]);
        assert_eq!(frame.passes().len(), 2);
    }

    #[test]
    fn switching_target_loads_instead_of_clearing() {
        let (fb, program) = ids();
        let (program, geometry) = triangle(program);
        let mut frame = FrameRecorder::new(256);

        let offscreen = Target::Offscreen(fb);
        frame.clear(offscreen, [0.0; 4]);
        frame.draw(offscreen, program, geometry, UNBOUND, false, &[]);
        frame.draw(Target::Surface, program, geometry, UNBOUND, false, &[]);

        let passes = frame.passes();
        assert_eq!(passes.len(), 2);
        assert_eq!(passes[1].target, Target::Surface);
        assert_eq!(passes[1].clear, None);
    }

    #[test]
    fn uniform_blocks_are_aligned() {
        let (_, program) = ids();
        let (program, geometry) = triangle(program);
        let mut frame = FrameRecorder::new(256);
        let block = vec![7u8; 100];
        for _ in 0..3 {
            frame.draw(Target::Surface, program, geometry, UNBOUND, false, &block);
        }
        let offsets: Vec<u32> = frame.passes()[0]
            .draws
            .iter()
            .map(|d| d.uniform_offset)
            .collect();
        assert_eq!(offsets, [0, 256, 512]);
        assert_eq!(frame.uniforms().len(), 512 + 100);
        assert_eq!(frame.uniforms()[256], 7);
        assert_eq!(frame.uniforms()[200], 0);
    }

    #[test]
    fn value_bytes_follow_wgsl_layout() {
        let one = uniform_bytes(&UniformValue::Float(1.0));
        assert_eq!(one, 1.0f32.to_ne_bytes());
        assert_eq!(uniform_bytes(&UniformValue::Vec3(Vec3::ONE)).len(), 12);
        let m = uniform_bytes(&UniformValue::Mat4(Mat4::from_translation(Vec3::X)));
        assert_eq!(m.len(), 64);
        // Column-major: the translation sits in the fourth column.
        assert_eq!(&m[48..52], &1.0f32.to_ne_bytes());
    }
}
