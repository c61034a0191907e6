//! Compiled programs and the uniform binding protocol.
//!
//! Uniform names the renderer binds every frame are interned as [`Uniform`]
//! and [`LightField`] and resolved once when the program loads, so the hot
//! path is an array lookup. A name the program does not use resolves to
//! `None` and binding it does nothing: optimizing compilers strip unused
//! uniforms and shader variants legitimately omit whole categories.

use std::cell::RefCell;
use std::collections::HashMap;

use glam::{Mat3, Mat4, UVec2};

use crate::backend::{
    Backend, ProgramId, SamplerSource, ShaderSource, TextureId, UniformLocation, UniformValue,
};
use crate::camera::Camera;
use crate::environment::Environment;
use crate::error::RenderError;
use crate::light::{Light, MAX_LIGHTS};
use crate::material::Material;
use crate::texture::SAMPLER_UNITS;

/// Interned uniform names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Uniform {
    Projection,
    View,
    CameraPosition,
    Transform,
    NormalMatrix,
    Albedo,
    Metallic,
    Roughness,
    Emission,
    AmbientOcclusion,
    HasAlbedoMap,
    HasNormalMap,
    HasMetallicRoughnessMap,
    HasAmbientOcclusionMap,
    AmbientSky,
    AmbientGround,
    AmbientIntensity,
    LightCount,
    Exposure,
    Dimensions,
}

impl Uniform {
    pub const ALL: [Uniform; 20] = [
        Self::Projection,
        Self::View,
        Self::CameraPosition,
        Self::Transform,
        Self::NormalMatrix,
        Self::Albedo,
        Self::Metallic,
        Self::Roughness,
        Self::Emission,
        Self::AmbientOcclusion,
        Self::HasAlbedoMap,
        Self::HasNormalMap,
        Self::HasMetallicRoughnessMap,
        Self::HasAmbientOcclusionMap,
        Self::AmbientSky,
        Self::AmbientGround,
        Self::AmbientIntensity,
        Self::LightCount,
        Self::Exposure,
        Self::Dimensions,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Self::Projection => "projection",
            Self::View => "view",
            Self::CameraPosition => "camera_position",
            Self::Transform => "transform",
            Self::NormalMatrix => "normal_matrix",
            Self::Albedo => "albedo",
            Self::Metallic => "metallic",
            Self::Roughness => "roughness",
            Self::Emission => "emission",
            Self::AmbientOcclusion => "ambient_occlusion",
            Self::HasAlbedoMap => "has_albedo_map",
            Self::HasNormalMap => "has_normal_map",
            Self::HasMetallicRoughnessMap => "has_metallic_roughness_map",
            Self::HasAmbientOcclusionMap => "has_ambient_occlusion_map",
            Self::AmbientSky => "ambient_sky",
            Self::AmbientGround => "ambient_ground",
            Self::AmbientIntensity => "ambient_intensity",
            Self::LightCount => "light_count",
            Self::Exposure => "exposure",
            Self::Dimensions => "dimensions",
        }
    }

    /// Presence flag for the texture bound on `unit`.
    const fn map_flag(unit: usize) -> Self {
        match unit {
            0 => Self::HasAlbedoMap,
            1 => Self::HasNormalMap,
            2 => Self::HasMetallicRoughnessMap,
            _ => Self::HasAmbientOcclusionMap,
        }
    }
}

/// Members of one entry in the `lights` uniform array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LightField {
    Kind,
    Position,
    Direction,
    Color,
    Intensity,
    Range,
    InnerConeCos,
    OuterConeCos,
}

impl LightField {
    pub const ALL: [LightField; 8] = [
        Self::Kind,
        Self::Position,
        Self::Direction,
        Self::Color,
        Self::Intensity,
        Self::Range,
        Self::InnerConeCos,
        Self::OuterConeCos,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Self::Kind => "kind",
            Self::Position => "position",
            Self::Direction => "direction",
            Self::Color => "color",
            Self::Intensity => "intensity",
            Self::Range => "range",
            Self::InnerConeCos => "inner_cone_cos",
            Self::OuterConeCos => "outer_cone_cos",
        }
    }

    /// Full uniform name, e.g. `lights[2].color`.
    pub fn uniform_name(self, index: usize) -> String {
        format!("lights[{index}].{}", self.name())
    }
}

/// Texture ids per sampler unit. `None` units receive the fallback texture.
pub type TextureSamplers = [Option<TextureId>; SAMPLER_UNITS];

/// A compiled program with its uniform table.
pub struct Shader {
    program: ProgramId,
    label: String,
    locations: [Option<UniformLocation>; Uniform::ALL.len()],
    lights: [[Option<UniformLocation>; LightField::ALL.len()]; MAX_LIGHTS],
    named: RefCell<HashMap<String, Option<UniformLocation>>>,
}

impl std::fmt::Debug for Shader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shader")
            .field("program", &self.program)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

impl Shader {
    /// Compile a program and resolve every interned uniform.
    pub fn load<B: Backend>(backend: &mut B, source: &ShaderSource) -> Result<Self, RenderError> {
        let program = backend.create_program(source)?;

        let mut locations = [None; Uniform::ALL.len()];
        for (slot, uniform) in locations.iter_mut().zip(Uniform::ALL) {
            *slot = backend.uniform_location(program, uniform.name());
        }

        let mut lights = [[None; LightField::ALL.len()]; MAX_LIGHTS];
        for (index, fields) in lights.iter_mut().enumerate() {
            for (slot, field) in fields.iter_mut().zip(LightField::ALL) {
                *slot = backend.uniform_location(program, &field.uniform_name(index));
            }
        }

        let resolved = locations.iter().filter(|l| l.is_some()).count();
        tracing::debug!(label = %source.label, resolved, "shader loaded");

        Ok(Self {
            program,
            label: source.label.clone(),
            locations,
            lights,
            named: RefCell::new(HashMap::new()),
        })
    }

    pub fn program(&self) -> ProgramId {
        self.program
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn location(&self, uniform: Uniform) -> Option<UniformLocation> {
        self.locations[uniform as usize]
    }

    pub fn light_location(&self, index: usize, field: LightField) -> Option<UniformLocation> {
        self.lights.get(index)?[field as usize]
    }

    /// Look up a name outside the interned set. The answer, hit or miss, is
    /// cached after the first query.
    pub fn find_uniform<B: Backend>(&self, backend: &B, name: &str) -> Option<UniformLocation> {
        if let Some(cached) = self.named.borrow().get(name) {
            return *cached;
        }
        let location = backend.uniform_location(self.program, name);
        self.named.borrow_mut().insert(name.to_owned(), location);
        location
    }

    /// Make this program current until the returned guard drops.
    pub fn activate<'a, B: Backend>(&'a self, backend: &'a mut B) -> ShaderBinding<'a, B> {
        backend.use_program(Some(self.program));
        ShaderBinding {
            backend,
            shader: self,
            bound_units: 0,
        }
    }

    pub fn release<B: Backend>(self, backend: &mut B) {
        backend.destroy_program(self.program);
    }
}

/// Scoped activation of a [`Shader`].
///
/// Dropping the guard unbinds every texture unit bound through it, then the
/// program.
pub struct ShaderBinding<'a, B: Backend> {
    backend: &'a mut B,
    shader: &'a Shader,
    bound_units: u32,
}

impl<'a, B: Backend> ShaderBinding<'a, B> {
    pub fn shader(&self) -> &Shader {
        self.shader
    }

    pub fn backend(&mut self) -> &mut B {
        self.backend
    }

    /// Write an interned uniform. Absent uniforms are skipped.
    pub fn set(&mut self, uniform: Uniform, value: UniformValue) {
        self.write(self.shader.location(uniform), uniform.name(), value);
    }

    /// Write an arbitrary uniform by name. Absent uniforms are skipped.
    pub fn set_named(&mut self, name: &str, value: UniformValue) {
        let location = self.shader.find_uniform(&*self.backend, name);
        self.write(location, name, value);
    }

    fn write(&mut self, location: Option<UniformLocation>, name: &str, value: UniformValue) {
        match location {
            Some(location) => self.backend.set_uniform(location, value),
            None => {
                let shader = &self.shader.label;
                tracing::trace!(%shader, uniform = name, "uniform not in program");
            }
        }
    }

    pub fn bind_projection(&mut self, projection: &Mat4) {
        self.set(Uniform::Projection, UniformValue::Mat4(*projection));
    }

    pub fn bind_camera(&mut self, camera: &Camera) {
        self.set(Uniform::View, UniformValue::Mat4(camera.view_matrix()));
        self.set(
            Uniform::CameraPosition,
            UniformValue::Vec3(camera.position()),
        );
    }

    /// Bind up to [`MAX_LIGHTS`] lights; the rest are dropped.
    /// Upload at most [`MAX_LIGHTS`] lights followed by their count.
    pub fn bind_lights<'l>(&mut self, lights: impl IntoIterator<Item = &'l Light>) {
        let mut count = 0;
        for (index, light) in lights.into_iter().take(MAX_LIGHTS).enumerate() {
            count += 1;
            for field in LightField::ALL {
                let value = match field {
                    LightField::Kind => UniformValue::UInt(light.kind.shader_code()),
                    LightField::Position => UniformValue::Vec3(light.position),
                    LightField::Direction => UniformValue::Vec3(light.direction),
                    LightField::Color => UniformValue::Vec3(light.color),
                    LightField::Intensity => UniformValue::Float(light.intensity),
                    LightField::Range => UniformValue::Float(light.range),
                    LightField::InnerConeCos => UniformValue::Float(light.inner_cone_cos),
                    LightField::OuterConeCos => UniformValue::Float(light.outer_cone_cos),
                };
                let location = self.shader.light_location(index, field);
                if let Some(location) = location {
                    self.backend.set_uniform(location, value);
                }
            }
        }
        self.set(Uniform::LightCount, UniformValue::UInt(count));
    }

    pub fn bind_material(&mut self, material: &Material) {
        self.set(Uniform::Albedo, UniformValue::Vec3(material.albedo));
        self.set(Uniform::Metallic, UniformValue::Float(material.metallic));
        self.set(Uniform::Roughness, UniformValue::Float(material.roughness));
        self.set(Uniform::Emission, UniformValue::Vec3(material.emission));
        self.set(
            Uniform::AmbientOcclusion,
            UniformValue::Float(material.ambient_occlusion),
        );
    }

    pub fn bind_environment(&mut self, environment: &Environment) {
        self.set(Uniform::AmbientSky, UniformValue::Vec3(environment.sky));
        self.set(
            Uniform::AmbientGround,
            UniformValue::Vec3(environment.ground),
        );
        self.set(
            Uniform::AmbientIntensity,
            UniformValue::Float(environment.intensity),
        );
    }

    /// Bind every material unit. Units without a texture get the fallback
    /// texture and a cleared presence flag, so nothing from an earlier
    /// binding leaks through.
    pub fn bind_texture_samplers(&mut self, samplers: &TextureSamplers) {
        for (unit, texture) in samplers.iter().enumerate() {
            let source = texture.map_or(SamplerSource::Fallback, SamplerSource::Texture);
            self.bind_sampler(unit as u32, source);
            self.set(
                Uniform::map_flag(unit),
                UniformValue::UInt(u32::from(texture.is_some())),
            );
        }
    }

    pub fn bind_sampler(&mut self, unit: u32, source: SamplerSource) {
        self.backend.bind_texture(unit, Some(source));
        self.bound_units |= 1 << unit;
    }

    /// Per-draw model matrix plus its normal matrix.
    pub fn bind_transform(&mut self, transform: &Mat4) {
        self.set(Uniform::Transform, UniformValue::Mat4(*transform));
        self.set(
            Uniform::NormalMatrix,
            UniformValue::Mat4(normal_matrix(transform)),
        );
    }

    pub fn bind_dimensions(&mut self, width: u32, height: u32) {
        self.set(
            Uniform::Dimensions,
            UniformValue::UVec2(UVec2::new(width, height)),
        );
    }
}

impl<B: Backend> Drop for ShaderBinding<'_, B> {
    fn drop(&mut self) {
        let mut units = self.bound_units;
        while units != 0 {
            let unit = units.trailing_zeros();
            self.backend.bind_texture(unit, None);
            units &= units - 1;
        }
        self.backend.use_program(None);
    }
}

/// Inverse-transpose of the model matrix's upper 3x3, without translation.
///
/// Singular transforms (a zero scale axis) use the cofactor matrix, which
/// is the inverse-transpose up to a scale factor and stays finite. Shaders
/// normalize the result, so the factor does not matter.
pub fn normal_matrix(transform: &Mat4) -> Mat4 {
    let m = Mat3::from_mat4(*transform);
    let cofactor = Mat3::from_cols(
        m.y_axis.cross(m.z_axis),
        m.z_axis.cross(m.x_axis),
        m.x_axis.cross(m.y_axis),
    );
    let det = m.determinant();
    if det == 0.0 || !det.is_finite() {
        return Mat4::from_mat3(cofactor);
    }
    Mat4::from_mat3(cofactor / det)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BuiltinShader, Call, RecordingBackend};
    use glam::Vec3;

    fn forward_shader(backend: &mut RecordingBackend) -> Shader {
        let source = backend.builtin_shader(BuiltinShader::Forward);
        Shader::load(backend, &source).unwrap()
    }

    #[test]
    fn interned_uniforms_resolve_at_load() {
        let mut backend = RecordingBackend::new();
        let shader = forward_shader(&mut backend);
        for uniform in [Uniform::Projection, Uniform::Transform, Uniform::LightCount] {
            assert!(shader.location(uniform).is_some(), "{uniform:?}");
        }
        let color = LightField::Color;
        assert!(shader.light_location(MAX_LIGHTS - 1, color).is_some());
        assert!(shader.light_location(MAX_LIGHTS, color).is_none());
        // Tone mapping uniforms are not part of the forward program.
        assert!(shader.location(Uniform::Dimensions).is_none());
    }

    #[test]
    fn missing_uniform_is_a_silent_no_op() {
        let mut backend = RecordingBackend::new();
        let shader = Shader::load(&mut backend, &ShaderSource::new("tiny", "transform")).unwrap();
        backend.reset();
        {
            let mut binding = shader.activate(&mut backend);
            binding.bind_projection(&Mat4::IDENTITY);
            binding.set_named("does_not_exist", UniformValue::Float(1.0));
            binding.bind_transform(&Mat4::IDENTITY);
        }
        assert_eq!(backend.counters().uniform_writes, 1);
    }

    #[test]
    fn find_uniform_caches_hits_and_misses() {
        let mut backend = RecordingBackend::new();
        let shader = Shader::load(&mut backend, &ShaderSource::new("s", "custom")).unwrap();
        assert!(shader.find_uniform(&backend, "custom").is_some());
        assert!(shader.find_uniform(&backend, "absent").is_none());
        assert_eq!(shader.named.borrow().len(), 2);
        assert!(shader.find_uniform(&backend, "custom").is_some());
        assert_eq!(shader.named.borrow().len(), 2);
    }

    #[test]
    fn lights_are_truncated_to_the_bound() {
        let mut backend = RecordingBackend::new();
        let shader = forward_shader(&mut backend);
        let lights = vec![Light::default(); MAX_LIGHTS + 3];
        backend.reset();
        {
            let mut binding = shader.activate(&mut backend);
            binding.bind_lights(&lights);
        }
        let count = backend.uniform_value(shader.program(), "light_count");
        assert_eq!(count, Some(UniformValue::UInt(MAX_LIGHTS as u32)));
        let writes = backend.counters().uniform_writes;
        assert_eq!(writes, 1 + MAX_LIGHTS * LightField::ALL.len());
    }

    #[test]
    fn absent_textures_bind_fallback_and_guard_unbinds() {
        let mut backend = RecordingBackend::new();
        let shader = forward_shader(&mut backend);
        backend.reset();
        {
            let mut binding = shader.activate(&mut backend);
            binding.bind_texture_samplers(&[None; SAMPLER_UNITS]);
        }
        let calls = backend.calls();
        assert_eq!(calls[0], Call::UseProgram(Some(shader.program())));
        let fallback = Some(SamplerSource::Fallback);
        for unit in 0..SAMPLER_UNITS as u32 {
            assert!(calls.contains(&Call::BindTexture(unit, fallback)));
            assert!(calls.contains(&Call::BindTexture(unit, None)));
        }
        assert_eq!(calls.last(), Some(&Call::UseProgram(None)));
        assert_eq!(
            backend.uniform_value(shader.program(), "has_albedo_map"),
            Some(UniformValue::UInt(0))
        );
    }

    #[test]
    fn normal_matrix_undoes_non_uniform_scale() {
        let m = Mat4::from_scale(Vec3::new(2.0, 1.0, 1.0));
        let n = normal_matrix(&m);
        let scaled = n.transform_vector3(Vec3::X);
        assert!(scaled.abs_diff_eq(Vec3::new(0.5, 0.0, 0.0), 1e-6));
    }

    #[test]
    fn normal_matrix_handles_tiny_scales() {
        let s = 1e-3;
        let m = Mat4::from_scale_rotation_translation(
            Vec3::new(s, s, 2.0 * s),
            glam::Quat::IDENTITY,
            Vec3::new(5.0, 0.0, 0.0),
        );
        let n = normal_matrix(&m)
            .transform_vector3(Vec3::new(1.0, 0.0, 1.0))
            .normalize();
        assert!(n.abs_diff_eq(Vec3::new(2.0, 0.0, 1.0).normalize(), 1e-5));
    }

    #[test]
    fn normal_matrix_of_flattened_transform_stays_finite() {
        let flat = Mat4::from_scale(Vec3::new(1.0, 1.0, 0.0));
        let n = normal_matrix(&flat);
        assert!(n.is_finite());
        assert!(n.transform_vector3(Vec3::Z).abs_diff_eq(Vec3::Z, 1e-6));
        assert!(n.transform_vector3(Vec3::X).abs_diff_eq(Vec3::ZERO, 1e-6));
    }
}
