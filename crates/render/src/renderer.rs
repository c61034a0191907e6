//! The per-frame render loop.
//!
//! A frame is two passes. The scene is drawn into an offscreen multisampled
//! HDR [`Framebuffer`], then a fullscreen triangle resolves it to the
//! default target through the tone-map shader, which also applies ordered
//! dithering from the Bayer texture.

use glam::Mat4;
use serde::{Deserialize, Serialize};

use crate::backend::{Backend, BuiltinShader, Dimensions, ShaderSource, UniformValue};
use crate::environment::Environment;
use crate::error::RenderError;
use crate::framebuffer::Framebuffer;
use crate::scene::Scene;
use crate::shader::{Shader, Uniform};
use crate::texture::Texture;

/// Renderer settings, usually read from a scene manifest.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Vertical field of view in degrees.
    pub fov: f32,
    pub near: f32,
    pub far: f32,
    /// MSAA sample count of the offscreen target.
    pub samples: u32,
    pub clear_color: [f32; 4],
    pub exposure: f32,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            fov: 45.0,
            near: 0.1,
            far: 1000.0,
            samples: 4,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            exposure: 1.0,
        }
    }
}

impl RendererConfig {
    pub fn projection(&self, dimensions: Dimensions) -> Mat4 {
        Mat4::perspective_rh(
            self.fov.to_radians(),
            dimensions.aspect_ratio(),
            self.near,
            self.far,
        )
    }
}

/// What one call to [`Renderer::render`] submitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FrameStats {
    /// Indexed draws in the scene pass. The tone-map triangle is not counted.
    pub draw_calls: u32,
    pub groups: u32,
    pub meshes: u32,
    pub entities: u32,
}

pub struct Renderer<B: Backend> {
    backend: B,
    config: RendererConfig,
    dimensions: Dimensions,
    projection: Mat4,
    framebuffer: Framebuffer,
    tone_map: Shader,
    dither: Texture,
    environment: Environment,
    wireframe: bool,
}

impl<B: Backend> Renderer<B> {
    /// Create the offscreen target, the tone-map program and the dither
    /// texture. Anything created before a failure is released again.
    pub fn new(
        mut backend: B,
        dimensions: Dimensions,
        config: RendererConfig,
    ) -> Result<Self, RenderError> {
        let dimensions = dimensions.clamped();
        let framebuffer = Framebuffer::new(&mut backend, dimensions, config.samples)?;

        let source = backend.builtin_shader(BuiltinShader::ToneMap);
        let tone_map = match Shader::load(&mut backend, &source) {
            Ok(shader) => shader,
            Err(err) => {
                framebuffer.release(&mut backend);
                return Err(err);
            }
        };

        let dither = match Texture::dither(&mut backend) {
            Ok(texture) => texture,
            Err(err) => {
                tone_map.release(&mut backend);
                framebuffer.release(&mut backend);
                return Err(err);
            }
        };

        backend.set_viewport(dimensions);
        tracing::info!(%dimensions, samples = config.samples, "renderer ready");

        Ok(Self {
            backend,
            config,
            dimensions,
            projection: config.projection(dimensions),
            framebuffer,
            tone_map,
            dither,
            environment: Environment::default(),
            wireframe: false,
        })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Access for loading models and other resources.
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// The backend's lit forward program, for models without their own.
    pub fn forward_shader(&self) -> ShaderSource {
        self.backend.builtin_shader(BuiltinShader::Forward)
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    pub fn projection(&self) -> &Mat4 {
        &self.projection
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    pub fn environment_mut(&mut self) -> &mut Environment {
        &mut self.environment
    }

    pub fn set_exposure(&mut self, exposure: f32) {
        self.config.exposure = exposure;
    }

    pub fn set_wireframe(&mut self, enabled: bool) {
        self.wireframe = enabled;
    }

    pub fn wireframe(&self) -> bool {
        self.wireframe
    }

    /// Follow a window resize. Zero sizes are treated as one pixel. On
    /// failure the previous size, projection and target stay in effect.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<(), RenderError> {
        let dimensions = Dimensions::new(width, height).clamped();
        if self.framebuffer.resize(&mut self.backend, dimensions)? {
            tracing::debug!(%dimensions, "renderer resized");
        }
        self.projection = self.config.projection(dimensions);
        self.backend.set_viewport(dimensions);
        self.dimensions = dimensions;
        Ok(())
    }

    /// Draw one frame of `scene` and present it.
    pub fn render(&mut self, scene: &Scene) -> Result<FrameStats, RenderError> {
        let stats = self.scene_pass(scene);
        if self.wireframe {
            self.backend.set_wireframe(false);
        }
        self.tone_map_pass();
        self.backend.present()?;
        Ok(stats)
    }

    fn scene_pass(&mut self, scene: &Scene) -> FrameStats {
        let camera = scene.camera().copied().unwrap_or_default();
        let mut stats = FrameStats::default();

        let mut target = self.framebuffer.bind(&mut self.backend);
        target.backend().clear(self.config.clear_color);
        target.backend().set_wireframe(self.wireframe);

        for group in scene.groups() {
            let Some(model) = scene.model(group.model) else {
                continue;
            };
            stats.groups += 1;
            stats.entities += group.entities.len() as u32;

            for mesh in model.meshes().iter().filter(|m| !m.is_empty()) {
                let Some(shader) = model.shader_for(mesh) else {
                    tracing::warn!(model = %model.name(), "mesh has no shader, skipped");
                    continue;
                };
                stats.meshes += 1;

                let mut bound = mesh.activate(shader.activate(target.backend()));
                bound.bind_texture_samplers(&model.samplers_for(mesh));
                bound.bind_projection(&self.projection);
                bound.bind_camera(&camera);
                bound.bind_lights(scene.lights());
                bound.bind_material(mesh.material());
                bound.bind_environment(&self.environment);

                for entity in group.entities.iter().filter_map(|id| scene.entity(*id)) {
                    bound.bind_transform(entity.transform());
                    if bound.draw() {
                        stats.draw_calls += 1;
                    }
                }
            }
        }
        stats
    }

    fn tone_map_pass(&mut self) {
        let dimensions = self.dimensions;
        let mut pass = self.tone_map.activate(&mut self.backend);
        pass.bind_sampler(0, self.framebuffer.color());
        pass.bind_sampler(1, self.dither.sampler());
        pass.bind_dimensions(dimensions.width, dimensions.height);
        pass.set(Uniform::Exposure, UniformValue::Float(self.config.exposure));
        pass.backend().clear(self.config.clear_color);
        pass.backend().draw_fullscreen_triangle();
    }

    /// Destroy the renderer's own resources and hand the backend back.
    /// Scene models are released separately through [`Scene::release`].
    pub fn release(mut self) -> B {
        self.framebuffer.release(&mut self.backend);
        self.tone_map.release(&mut self.backend);
        self.dither.release(&mut self.backend);
        self.backend
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Call, MeshData, RecordingBackend, SamplerSource, Vertex};
    use crate::camera::Camera;
    use crate::light::{Light, LightKind};
    use crate::model::{MeshSource, Model};
    use crate::scene::{EntityId, ModelId};
    use glam::Vec3;

    fn triangle() -> MeshData {
        let v = Vertex::new(Vec3::ZERO, Vec3::Z);
        MeshData::new(vec![v; 3], vec![0, 1, 2])
    }

    fn renderer() -> Renderer<RecordingBackend> {
        Renderer::new(
            RecordingBackend::new(),
            Dimensions::new(800, 600),
            RendererConfig::default(),
        )
        .unwrap()
    }

    fn add_model(
        renderer: &mut Renderer<RecordingBackend>,
        scene: &mut Scene,
        meshes: Vec<MeshData>,
    ) -> ModelId {
        let shader = renderer.forward_shader();
        let model = Model::builder("m")
            .meshes(meshes.into_iter().map(MeshSource::new))
            .shader(shader)
            .build(renderer.backend_mut())
            .unwrap();
        scene.add_model(model)
    }

    fn spawn(scene: &mut Scene, model: ModelId, n: usize) -> Vec<EntityId> {
        (0..n).map(|_| scene.spawn(model).unwrap()).collect()
    }

    #[test]
    fn model_state_is_bound_once_per_mesh() {
        let mut renderer = renderer();
        let mut scene = Scene::new();
        let model = add_model(&mut renderer, &mut scene, vec![triangle(), triangle()]);
        spawn(&mut scene, model, 3);
        renderer.backend_mut().reset();

        let stats = renderer.render(&scene).unwrap();
        assert_eq!(
            stats,
            FrameStats {
                draw_calls: 6,
                groups: 1,
                meshes: 2,
                entities: 3,
            }
        );
        let counters = renderer.backend().counters();
        // One program bind per mesh plus the tone-map pass.
        assert_eq!(counters.program_binds, 3);
        assert_eq!(counters.mesh_binds, 2);
        assert_eq!(counters.draws, 6);
        assert_eq!(counters.fullscreen_draws, 1);
        assert_eq!(counters.presents, 1);
    }

    #[test]
    fn frame_runs_both_passes_in_order() {
        let mut renderer = renderer();
        let mut scene = Scene::new();
        let mut camera = Camera::new();
        camera.move_at(0.0, 0.0, 20.0);
        camera.look_at(0.0, 0.0, 0.0);
        scene.add_camera(camera);
        let model = add_model(&mut renderer, &mut scene, vec![triangle()]);
        let entities = spawn(&mut scene, model, 2);
        let back = scene.entity_mut(entities[1]).unwrap();
        back.translate(0.0, 0.0, -10.0);
        renderer.backend_mut().reset();

        renderer.render(&scene).unwrap();
        let calls = renderer.backend().calls();
        let position = |wanted: &Call| calls.iter().position(|c| c == wanted).unwrap();

        let fb = renderer.framebuffer.id();
        assert_eq!(calls[0], Call::BindFramebuffer(Some(fb)));
        assert!(matches!(calls[1], Call::Clear(_)));
        let draws: Vec<usize> = calls
            .iter()
            .enumerate()
            .filter(|(_, c)| matches!(c, Call::DrawIndexed(3)))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(draws.len(), 2);

        let unbind = position(&Call::BindFramebuffer(None));
        assert!(draws.iter().all(|d| *d < unbind));
        let framebuffer_color = Some(SamplerSource::FramebufferColor(fb));
        let color = position(&Call::BindTexture(0, framebuffer_color));
        let fullscreen = position(&Call::DrawFullscreenTriangle);
        assert!(unbind < color && color < fullscreen);
        assert!(matches!(calls[fullscreen - 1], Call::Clear(_)));
        assert_eq!(calls.last(), Some(&Call::Present));

        let program = scene.model(model).unwrap().shaders()[0].program();
        let transform = renderer.backend().uniform_value(program, "transform");
        let expected = *scene.entity(entities[1]).unwrap().transform();
        assert_eq!(transform, Some(UniformValue::Mat4(expected)));
        let view = renderer.backend().uniform_value(program, "camera_position");
        assert_eq!(view, Some(UniformValue::Vec3(Vec3::new(0.0, 0.0, 20.0))));
    }

    #[test]
    fn single_lit_entity_submits_one_draw_per_pass() {
        let mut renderer = renderer();
        let mut scene = Scene::new();
        let mut camera = Camera::new();
        camera.move_at(0.0, 0.0, 20.0);
        camera.look_at(0.0, 0.0, 0.0);
        scene.add_camera(camera);
        let sun = Light::directional(Vec3::new(-1.0, -1.0, -1.0));
        scene.add_light(sun);
        let model = add_model(&mut renderer, &mut scene, vec![triangle()]);
        let entity = spawn(&mut scene, model, 1)[0];
        let placed = scene.entity_mut(entity).unwrap();
        placed.translate(0.0, 0.0, -10.0);
        renderer.backend_mut().reset();

        let stats = renderer.render(&scene).unwrap();
        assert_eq!(stats.draw_calls, 1);
        assert_eq!(stats.entities, 1);

        let calls = renderer.backend().calls();
        let submissions: Vec<&Call> = calls
            .iter()
            .filter(|c| matches!(c, Call::DrawIndexed(_) | Call::DrawFullscreenTriangle))
            .collect();
        assert_eq!(
            submissions,
            [&Call::DrawIndexed(3), &Call::DrawFullscreenTriangle]
        );

        let fb = renderer.framebuffer.id();
        let position = |wanted: &Call| calls.iter().position(|c| c == wanted).unwrap();
        let offscreen = position(&Call::BindFramebuffer(Some(fb)));
        let draw = position(&Call::DrawIndexed(3));
        let cleared = calls[offscreen..draw]
            .iter()
            .any(|c| matches!(c, Call::Clear(_)));
        assert!(cleared);
        assert!(draw < position(&Call::BindFramebuffer(None)));

        let program = scene.model(model).unwrap().shaders()[0].program();
        let backend = renderer.backend();
        assert_eq!(
            backend.uniform_value(program, "light_count"),
            Some(UniformValue::UInt(1))
        );
        assert_eq!(
            backend.uniform_value(program, "lights[0].direction"),
            Some(UniformValue::Vec3(sun.direction))
        );
        assert_eq!(
            backend.uniform_value(program, "lights[0].kind"),
            Some(UniformValue::UInt(LightKind::Directional.shader_code()))
        );
        let transform = backend.uniform_value(program, "transform");
        let Some(UniformValue::Mat4(transform)) = transform else {
            panic!("transform not uploaded");
        };
        let origin = glam::Vec4::new(0.0, 0.0, -10.0, 1.0);
        assert!(transform.w_axis.abs_diff_eq(origin, 1e-6));
    }

    #[test]
    fn tone_map_pass_clears_after_uploading_uniforms() {
        let mut renderer = renderer();
        renderer.backend_mut().reset();
        renderer.render(&Scene::new()).unwrap();
        let calls = renderer.backend().calls();
        let unbind = calls
            .iter()
            .position(|c| *c == Call::BindFramebuffer(None))
            .unwrap();
        let tone_map = &calls[unbind..];
        let use_tone_map = Call::UseProgram(Some(renderer.tone_map.program()));
        let program = tone_map.iter().position(|c| *c == use_tone_map).unwrap();
        let last_uniform = tone_map
            .iter()
            .rposition(|c| matches!(c, Call::SetUniform(..)))
            .unwrap();
        let clear = tone_map
            .iter()
            .position(|c| matches!(c, Call::Clear(_)))
            .unwrap();
        let fullscreen = tone_map
            .iter()
            .position(|c| *c == Call::DrawFullscreenTriangle)
            .unwrap();
        assert!(program < last_uniform);
        assert!(last_uniform < clear && clear < fullscreen);
    }

    #[test]
    fn tone_map_pass_receives_exposure_and_dimensions() {
        let mut renderer = renderer();
        renderer.set_exposure(2.0);
        renderer.render(&Scene::new()).unwrap();
        let program = renderer.tone_map.program();
        let backend = renderer.backend();
        assert_eq!(
            backend.uniform_value(program, "exposure"),
            Some(UniformValue::Float(2.0))
        );
        assert_eq!(
            backend.uniform_value(program, "dimensions"),
            Some(UniformValue::UVec2(glam::UVec2::new(800, 600)))
        );
        let dither = Call::BindTexture(1, Some(renderer.dither.sampler()));
        assert!(backend.calls().contains(&dither));
    }

    #[test]
    fn empty_meshes_are_never_bound() {
        let mut renderer = renderer();
        let mut scene = Scene::new();
        let model = add_model(&mut renderer, &mut scene, vec![MeshData::default()]);
        spawn(&mut scene, model, 2);
        renderer.backend_mut().reset();

        let stats = renderer.render(&scene).unwrap();
        assert_eq!(stats.draw_calls, 0);
        assert_eq!(stats.meshes, 0);
        assert_eq!(renderer.backend().counters().mesh_binds, 0);
        assert_eq!(renderer.backend().counters().draws, 0);
    }

    #[test]
    fn resize_is_idempotent() {
        let mut renderer = renderer();
        renderer.backend_mut().reset();
        renderer.resize(1024, 768).unwrap();
        let first = *renderer.projection();
        renderer.resize(1024, 768).unwrap();
        assert_eq!(*renderer.projection(), first);
        assert_eq!(renderer.backend().counters().framebuffers_created, 1);
        assert_eq!(renderer.backend().counters().framebuffers_destroyed, 1);
        assert_eq!(
            renderer.backend().viewport(),
            Some(Dimensions::new(1024, 768))
        );
    }

    #[test]
    fn failed_resize_keeps_previous_state() {
        let backend = RecordingBackend::new().with_max_dimension(4096);
        let size = Dimensions::new(800, 600);
        let mut renderer = Renderer::new(backend, size, RendererConfig::default()).unwrap();
        let projection = *renderer.projection();
        let framebuffer = renderer.framebuffer.id();

        let result = renderer.resize(5000, 100);
        assert!(matches!(result, Err(RenderError::ResourceCreation { .. })));
        assert_eq!(renderer.dimensions(), size);
        assert_eq!(*renderer.projection(), projection);
        assert_eq!(
            *renderer.projection(),
            renderer.config().projection(renderer.dimensions())
        );
        assert_eq!(renderer.framebuffer.id(), framebuffer);
        assert_eq!(renderer.backend().viewport(), Some(size));

        renderer.resize(1024, 768).unwrap();
        assert_eq!(renderer.dimensions(), Dimensions::new(1024, 768));
    }

    #[test]
    fn zero_size_clamps_to_one_pixel() {
        let mut renderer = renderer();
        renderer.resize(0, 0).unwrap();
        assert_eq!(renderer.dimensions(), Dimensions::new(1, 1));
        assert!(renderer.projection().is_finite());
    }

    #[test]
    fn wireframe_applies_to_scene_pass_only() {
        let mut renderer = renderer();
        renderer.set_wireframe(true);
        renderer.backend_mut().reset();
        renderer.render(&Scene::new()).unwrap();
        let calls = renderer.backend().calls();
        let on = calls
            .iter()
            .position(|c| *c == Call::SetWireframe(true))
            .unwrap();
        let off = calls
            .iter()
            .position(|c| *c == Call::SetWireframe(false))
            .unwrap();
        let fullscreen = calls
            .iter()
            .position(|c| *c == Call::DrawFullscreenTriangle)
            .unwrap();
        assert!(on < off && off < fullscreen);
    }

    #[test]
    fn missing_camera_uses_default_view() {
        let mut renderer = renderer();
        let mut scene = Scene::new();
        let model = add_model(&mut renderer, &mut scene, vec![triangle()]);
        spawn(&mut scene, model, 1);
        renderer.render(&scene).unwrap();
        let program = scene.model(model).unwrap().shaders()[0].program();
        assert_eq!(
            renderer.backend().uniform_value(program, "view"),
            Some(UniformValue::Mat4(Mat4::IDENTITY))
        );
    }

    #[test]
    fn zero_samples_fail_construction() {
        let config = RendererConfig {
            samples: 0,
            ..RendererConfig::default()
        };
        let result = Renderer::new(RecordingBackend::new(), Dimensions::new(4, 4), config);
        assert!(matches!(result, Err(RenderError::ResourceCreation { .. })));
    }

    #[test]
    fn release_returns_a_clean_backend() {
        let mut renderer = renderer();
        let mut scene = Scene::new();
        let model = add_model(&mut renderer, &mut scene, vec![triangle()]);
        spawn(&mut scene, model, 1);
        scene.release(renderer.backend_mut());
        let backend = renderer.release();
        assert_eq!(backend.live_resources(), 0);
    }
}
