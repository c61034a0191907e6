use std::collections::HashMap;
use std::num::NonZeroU64;

use prism_render::{
    Backend, BuiltinShader, Dimensions, FramebufferId, MeshData, MeshId, ProgramId, RenderError,
    SamplerSource, ShaderSource, TextureData, TextureFilter, TextureFormat, TextureId, TextureWrap,
    UniformLocation, UniformValue, Vertex,
};
use slotmap::SlotMap;
use wgpu::util::DeviceExt;

use crate::frame::{FrameRecorder, Geometry, MAX_TEXTURE_UNITS, Target, TextureUnits, uniform_bytes};
use crate::reflect::{self, FRAGMENT_ENTRY, ProgramLayout, TextureBindingKind, VERTEX_ENTRY};
use crate::shaders;

/// Color format of offscreen targets.
pub const HDR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;
pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

const VERTEX_ATTRIBUTES: [wgpu::VertexAttribute; 4] = wgpu::vertex_attr_array![
    0 => Float32x3,
    1 => Float32x3,
    2 => Float32x4,
    3 => Float32x2,
];

const INITIAL_UNIFORM_CAPACITY: u64 = 64 * 1024;

struct GpuMesh {
    vertices: wgpu::Buffer,
    indices: wgpu::Buffer,
}

struct GpuTexture {
    view: wgpu::TextureView,
    sampler: wgpu::Sampler,
}

struct GpuFramebuffer {
    samples: u32,
    msaa: Option<wgpu::TextureView>,
    resolve: GpuTexture,
    depth: wgpu::TextureView,
}

struct GpuProgram {
    module: wgpu::ShaderModule,
    layout: ProgramLayout,
    uniform_layout: wgpu::BindGroupLayout,
    texture_layout: Option<wgpu::BindGroupLayout>,
    pipeline_layout: wgpu::PipelineLayout,
    /// Current uniform values, copied into the frame on every draw.
    block: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum TargetKind {
    Surface,
    Offscreen { samples: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PipelineKey {
    program: ProgramId,
    target: TargetKind,
    wireframe: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct TextureGroupKey {
    program: ProgramId,
    textures: TextureUnits,
}

/// Immediate-mode state the core binds between draws.
#[derive(Debug, Clone, Copy)]
struct BindState {
    target: Target,
    program: Option<ProgramId>,
    mesh: Option<MeshId>,
    textures: TextureUnits,
    wireframe: bool,
}

impl Default for BindState {
    fn default() -> Self {
        Self {
            target: Target::Surface,
            program: None,
            mesh: None,
            textures: [None; MAX_TEXTURE_UNITS],
            wireframe: false,
        }
    }
}

/// [`Backend`] on a wgpu device presenting to a window surface.
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter: wgpu::Adapter,
    surface: wgpu::Surface<'static>,
    config: wgpu::SurfaceConfiguration,
    view_format: wgpu::TextureFormat,
    polygon_line: bool,
    alignment: u32,

    meshes: SlotMap<MeshId, GpuMesh>,
    textures: SlotMap<TextureId, GpuTexture>,
    programs: SlotMap<ProgramId, GpuProgram>,
    framebuffers: SlotMap<FramebufferId, GpuFramebuffer>,
    fallback: GpuTexture,

    uniform_buffer: wgpu::Buffer,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
    uniform_groups: HashMap<ProgramId, wgpu::BindGroup>,
    texture_groups: HashMap<TextureGroupKey, wgpu::BindGroup>,

    state: BindState,
    frame: FrameRecorder,
}

impl WgpuBackend {
    /// Open a device for `target` and configure its surface.
    pub fn new(
        target: impl Into<wgpu::SurfaceTarget<'static>>,
        dimensions: Dimensions,
    ) -> Result<Self, RenderError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let surface = instance
            .create_surface(target)
            .map_err(|e| RenderError::Surface(e.to_string()))?;

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| RenderError::creation("adapter", "no compatible GPU adapter"))?;

        let features = adapter.features();
        let polygon_line = features.contains(wgpu::Features::POLYGON_MODE_LINE);
        let required_features = if polygon_line {
            wgpu::Features::POLYGON_MODE_LINE
        } else {
            wgpu::Features::empty()
        };
        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("prism_device"),
                required_features,
                required_limits: wgpu::Limits::default().using_resolution(adapter.limits()),
                memory_hints: Default::default(),
            },
            None,
        ))
        .map_err(|e| RenderError::creation("device", e.to_string()))?;
        device.on_uncaptured_error(Box::new(|error: wgpu::Error| {
            tracing::error!("wgpu error: {error}");
        }));

        let caps = surface.get_capabilities(&adapter);
        let format = caps
            .formats
            .iter()
            .find(|f| !f.is_srgb())
            .or(caps.formats.first())
            .copied()
            .ok_or_else(|| RenderError::Surface("surface reports no formats".into()))?;
        // The tone-map pass writes display-encoded values itself.
        let view_format = format.remove_srgb_suffix();
        let dimensions = dimensions.clamped();
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: dimensions.width,
            height: dimensions.height,
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode: caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: if view_format == format {
                vec![]
            } else {
                vec![view_format]
            },
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        let fallback = white_texture(&device, &queue);
        let uniform_buffer = uniform_buffer(&device, INITIAL_UNIFORM_CAPACITY);
        let alignment = device.limits().min_uniform_buffer_offset_alignment;

        let info = adapter.get_info();
        tracing::info!(
            adapter = %info.name,
            backend = info.backend.to_str(),
            format = ?format,
            wireframe = polygon_line,
            "GPU initialized"
        );

        Ok(Self {
            device,
            queue,
            adapter,
            surface,
            config,
            view_format,
            polygon_line,
            alignment,
            meshes: SlotMap::with_key(),
            textures: SlotMap::with_key(),
            programs: SlotMap::with_key(),
            framebuffers: SlotMap::with_key(),
            fallback,
            uniform_buffer,
            pipelines: HashMap::new(),
            uniform_groups: HashMap::new(),
            texture_groups: HashMap::new(),
            state: BindState::default(),
            frame: FrameRecorder::new(alignment),
        })
    }

    pub fn adapter_info(&self) -> wgpu::AdapterInfo {
        self.adapter.get_info()
    }

    /// Largest supported sample count not above `requested`.
    fn supported_samples(&self, requested: u32) -> u32 {
        let color = self.adapter.get_texture_format_features(HDR_FORMAT).flags;
        let depth = self.adapter.get_texture_format_features(DEPTH_FORMAT).flags;
        let mut samples = requested.max(1).next_power_of_two();
        if samples > requested {
            samples /= 2;
        }
        while samples > 1
            && !(color.sample_count_supported(samples) && depth.sample_count_supported(samples))
        {
            samples /= 2;
        }
        if samples != requested {
            tracing::warn!(
                requested,
                samples,
                "sample count not supported, using fallback"
            );
        }
        samples.max(1)
    }

    fn target_kind(&self, target: Target) -> Option<TargetKind> {
        match target {
            Target::Surface => Some(TargetKind::Surface),
            Target::Offscreen(id) => self
                .framebuffers
                .get(id)
                .map(|fb| TargetKind::Offscreen {
                    samples: fb.samples,
                }),
        }
    }

    /// Create every pipeline and bind group the recorded frame needs and
    /// upload its uniforms.
    fn prepare(&mut self, frame: &FrameRecorder) -> Result<(), RenderError> {
        let staged = frame.uniforms();
        if staged.len() as u64 > self.uniform_buffer.size() {
            let capacity = (staged.len() as u64).next_power_of_two();
            tracing::debug!(capacity, "growing uniform buffer");
            self.uniform_buffer = uniform_buffer(&self.device, capacity);
            self.uniform_groups.clear();
        }
        if !staged.is_empty() {
            self.queue.write_buffer(&self.uniform_buffer, 0, staged);
        }

        for pass in frame.passes() {
            let Some(target) = self.target_kind(pass.target) else {
                continue;
            };
            for draw in &pass.draws {
                let Some(program) = self.programs.get(draw.program) else {
                    continue;
                };

                let key = PipelineKey {
                    program: draw.program,
                    target,
                    wireframe: draw.wireframe,
                };
                if !self.pipelines.contains_key(&key) {
                    let format = match target {
                        TargetKind::Surface => self.view_format,
                        TargetKind::Offscreen { .. } => HDR_FORMAT,
                    };
                    let pipeline =
                        create_pipeline(&self.device, program, target, format, draw.wireframe)?;
                    self.pipelines.insert(key, pipeline);
                }

                if !self.uniform_groups.contains_key(&draw.program) {
                    let group = uniform_group(&self.device, program, &self.uniform_buffer);
                    self.uniform_groups.insert(draw.program, group);
                }

                if let Some(layout) = &program.texture_layout {
                    let key = texture_group_key(draw.program, &program.layout, &draw.textures);
                    if !self.texture_groups.contains_key(&key) {
                        let group = self.texture_group(layout, &program.layout, &key.textures);
                        self.texture_groups.insert(key, group);
                    }
                }
            }
        }
        Ok(())
    }

    fn resolve_source(&self, source: Option<SamplerSource>) -> &GpuTexture {
        match source {
            Some(SamplerSource::Texture(id)) => self.textures.get(id),
            Some(SamplerSource::FramebufferColor(id)) => {
                self.framebuffers.get(id).map(|fb| &fb.resolve)
            }
            Some(SamplerSource::Fallback) | None => None,
        }
        .unwrap_or(&self.fallback)
    }

    fn texture_group(
        &self,
        layout: &wgpu::BindGroupLayout,
        program: &ProgramLayout,
        textures: &TextureUnits,
    ) -> wgpu::BindGroup {
        let entries: Vec<wgpu::BindGroupEntry> = program
            .textures
            .iter()
            .map(|binding| {
                let texture = self.resolve_source(textures[binding.unit() as usize]);
                let resource = match binding.kind {
                    TextureBindingKind::Texture { .. } => {
                        wgpu::BindingResource::TextureView(&texture.view)
                    }
                    TextureBindingKind::Sampler => wgpu::BindingResource::Sampler(&texture.sampler),
                };
                wgpu::BindGroupEntry {
                    binding: binding.binding,
                    resource,
                }
            })
            .collect();
        let device = &self.device;
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("texture_bind_group"),
            layout,
            entries: &entries,
        })
    }

    /// Replay the recorded passes.
    fn encode(&self, frame: &FrameRecorder, surface: &wgpu::TextureView) -> wgpu::CommandBuffer {
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("frame_encoder"),
            });

        for pass in frame.passes() {
            let Some(target) = self.target_kind(pass.target) else {
                tracing::warn!(?pass.target, "render target destroyed, pass skipped");
                continue;
            };
            let (view, resolve_target, depth) = match pass.target {
                Target::Surface => (surface, None, None),
                Target::Offscreen(id) => {
                    let Some(fb) = self.framebuffers.get(id) else {
                        continue;
                    };
                    match &fb.msaa {
                        Some(msaa) => (msaa, Some(&fb.resolve.view), Some(&fb.depth)),
                        None => (&fb.resolve.view, None, Some(&fb.depth)),
                    }
                }
            };

            let load = match pass.clear {
                Some([r, g, b, a]) => wgpu::LoadOp::Clear(wgpu::Color {
                    r: r as f64,
                    g: g as f64,
                    b: b as f64,
                    a: a as f64,
                }),
                None => wgpu::LoadOp::Load,
            };
            let depth_load = if pass.clear.is_some() {
                wgpu::LoadOp::Clear(1.0)
            } else {
                wgpu::LoadOp::Load
            };

            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("prism_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target,
                    ops: wgpu::Operations {
                        load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: depth.map(|view| wgpu::RenderPassDepthStencilAttachment {
                    view,
                    depth_ops: Some(wgpu::Operations {
                        load: depth_load,
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                ..Default::default()
            });

            for draw in &pass.draws {
                let Some(program) = self.programs.get(draw.program) else {
                    continue;
                };
                let key = PipelineKey {
                    program: draw.program,
                    target,
                    wireframe: draw.wireframe,
                };
                let (Some(pipeline), Some(uniforms)) =
                    (self.pipelines.get(&key), self.uniform_groups.get(&draw.program))
                else {
                    continue;
                };

                render_pass.set_pipeline(pipeline);
                if program.layout.uniform_size > 0 {
                    render_pass.set_bind_group(0, uniforms, &[draw.uniform_offset]);
                } else {
                    render_pass.set_bind_group(0, uniforms, &[]);
                }
                if program.texture_layout.is_some() {
                    let key = texture_group_key(draw.program, &program.layout, &draw.textures);
                    let Some(group) = self.texture_groups.get(&key) else {
                        continue;
                    };
                    render_pass.set_bind_group(1, group, &[]);
                }

                match draw.geometry {
                    Geometry::Mesh { mesh, index_count } => {
                        let Some(mesh) = self.meshes.get(mesh) else {
                            continue;
                        };
                        render_pass.set_vertex_buffer(0, mesh.vertices.slice(..));
                        let indices = mesh.indices.slice(..);
                        render_pass.set_index_buffer(indices, wgpu::IndexFormat::Uint32);
                        render_pass.draw_indexed(0..index_count, 0, 0..1);
                    }
                    Geometry::FullscreenTriangle => render_pass.draw(0..3, 0..1),
                }
            }
        }
        encoder.finish()
    }

    fn record_draw(&mut self, geometry: Geometry) {
        let Some(program_id) = self.state.program else {
            tracing::warn!("draw without a bound program, ignored");
            return;
        };
        let Some(program) = self.programs.get(program_id) else {
            tracing::warn!("draw with a destroyed program, ignored");
            return;
        };
        self.frame.draw(
            self.state.target,
            program_id,
            geometry,
            self.state.textures,
            self.state.wireframe,
            &program.block,
        );
    }

    fn forget_program_caches(&mut self, program: ProgramId) {
        self.pipelines.retain(|key, _| key.program != program);
        self.uniform_groups.remove(&program);
        self.texture_groups.retain(|key, _| key.program != program);
    }
}

impl Backend for WgpuBackend {
    fn create_mesh(&mut self, data: &MeshData) -> Result<MeshId, RenderError> {
        data.validate()?;
        let device = &self.device;
        let vertices = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("mesh_vertices"),
            contents: bytemuck::cast_slice::<Vertex, u8>(&data.vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let indices = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("mesh_indices"),
            contents: bytemuck::cast_slice(&data.indices),
            usage: wgpu::BufferUsages::INDEX,
        });
        Ok(self.meshes.insert(GpuMesh { vertices, indices }))
    }

    fn destroy_mesh(&mut self, mesh: MeshId) {
        if let Some(mesh) = self.meshes.remove(mesh) {
            mesh.vertices.destroy();
            mesh.indices.destroy();
        }
    }

    fn create_texture(&mut self, data: &TextureData) -> Result<TextureId, RenderError> {
        data.validate()?;
        let format = match data.format {
            TextureFormat::Rgba8Srgb => wgpu::TextureFormat::Rgba8UnormSrgb,
            TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
            TextureFormat::R8Unorm => wgpu::TextureFormat::R8Unorm,
        };
        let device = &self.device;
        let texture = device.create_texture_with_data(
            &self.queue,
            &wgpu::TextureDescriptor {
                label: Some("material_texture"),
                size: wgpu::Extent3d {
                    width: data.width,
                    height: data.height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            },
            wgpu::util::TextureDataOrder::LayerMajor,
            &data.pixels,
        );
        let sampler = sampler(device, data.filter, data.wrap);
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Ok(self.textures.insert(GpuTexture { view, sampler }))
    }

    fn destroy_texture(&mut self, texture: TextureId) {
        if self.textures.remove(texture).is_some() {
            let source = Some(SamplerSource::Texture(texture));
            self.texture_groups
                .retain(|key, _| !key.textures.contains(&source));
        }
    }

    fn create_program(&mut self, source: &ShaderSource) -> Result<ProgramId, RenderError> {
        let layout = reflect::reflect(&source.code)
            .map_err(|e| RenderError::creation("program", format!("`{}`: {e}", source.label)))?;

        let device = &self.device;
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(source.label.as_str()),
            source: wgpu::ShaderSource::Wgsl(source.code.as_str().into()),
        });
        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            return Err(RenderError::creation(
                "program",
                format!("`{}`: {error}", source.label),
            ));
        }

        let uniform_size = NonZeroU64::new(layout.uniform_size as u64);
        let uniform_entries: Vec<wgpu::BindGroupLayoutEntry> = uniform_size
            .map(|size| wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: Some(size),
                },
                count: None,
            })
            .into_iter()
            .collect();
        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("uniform_bind_group_layout"),
            entries: &uniform_entries,
        });

        let texture_layout = (!layout.textures.is_empty()).then(|| {
            let entries: Vec<wgpu::BindGroupLayoutEntry> = layout
                .textures
                .iter()
                .map(|binding| wgpu::BindGroupLayoutEntry {
                    binding: binding.binding,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: match binding.kind {
                        TextureBindingKind::Texture { multisampled } => wgpu::BindingType::Texture {
                            sample_type: wgpu::TextureSampleType::Float {
                                filterable: !multisampled,
                            },
                            view_dimension: wgpu::TextureViewDimension::D2,
                            multisampled,
                        },
                        TextureBindingKind::Sampler => {
                            wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering)
                        }
                    },
                    count: None,
                })
                .collect();
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("texture_bind_group_layout"),
                entries: &entries,
            })
        });

        let mut groups = vec![&uniform_layout];
        groups.extend(texture_layout.as_ref());
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(source.label.as_str()),
            bind_group_layouts: &groups,
            push_constant_ranges: &[],
        });

        tracing::debug!(
            label = %source.label,
            uniforms = layout.fields.len(),
            texture_units = layout.texture_units(),
            "program compiled"
        );
        let block = vec![0; layout.uniform_size as usize];
        Ok(self.programs.insert(GpuProgram {
            module,
            layout,
            uniform_layout,
            texture_layout,
            pipeline_layout,
            block,
        }))
    }

    fn destroy_program(&mut self, program: ProgramId) {
        if self.programs.remove(program).is_some() {
            self.forget_program_caches(program);
        }
        if self.state.program == Some(program) {
            self.state.program = None;
        }
    }

    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        self.programs
            .get(program)?
            .layout
            .field_index(name)
            .map(UniformLocation::new)
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
        let device = &self.device;
        let max = device.limits().max_texture_dimension_2d;
        if dimensions.width > max || dimensions.height > max {
            return Err(RenderError::creation(
                "framebuffer",
                format!("{dimensions} exceeds the device limit of {max}"),
            ));
        }
        let samples = self.supported_samples(samples);
        let size = wgpu::Extent3d {
            width: dimensions.width,
            height: dimensions.height,
            depth_or_array_layers: 1,
        };
        let attachment = |label, format, samples, usage| {
            device
                .create_texture(&wgpu::TextureDescriptor {
                    label: Some(label),
                    size,
                    mip_level_count: 1,
                    sample_count: samples,
                    dimension: wgpu::TextureDimension::D2,
                    format,
                    usage,
                    view_formats: &[],
                })
                .create_view(&wgpu::TextureViewDescriptor::default())
        };

        let resolve = attachment(
            "hdr_resolve",
            HDR_FORMAT,
            1,
            wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
        );
        let msaa = (samples > 1).then(|| {
            attachment(
                "hdr_msaa",
                HDR_FORMAT,
                samples,
                wgpu::TextureUsages::RENDER_ATTACHMENT,
            )
        });
        let depth = attachment(
            "hdr_depth",
            DEPTH_FORMAT,
            samples,
            wgpu::TextureUsages::RENDER_ATTACHMENT,
        );
        let framebuffer = GpuFramebuffer {
            samples,
            msaa,
            resolve: GpuTexture {
                view: resolve,
                sampler: sampler(device, TextureFilter::Linear, TextureWrap::ClampToEdge),
            },
            depth,
        };
        Ok(self.framebuffers.insert(framebuffer))
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferId) {
        if self.framebuffers.remove(framebuffer).is_some() {
            let color = Some(SamplerSource::FramebufferColor(framebuffer));
            self.texture_groups
                .retain(|key, _| !key.textures.contains(&color));
        }
        if self.state.target == Target::Offscreen(framebuffer) {
            self.state.target = Target::Surface;
        }
    }

    fn builtin_shader(&self, shader: BuiltinShader) -> ShaderSource {
        match shader {
            BuiltinShader::Forward => ShaderSource::new("forward", shaders::FORWARD_SHADER),
            BuiltinShader::ToneMap => ShaderSource::new("tone_map", shaders::TONE_MAP_SHADER),
        }
    }

    fn set_viewport(&mut self, dimensions: Dimensions) {
        let dimensions = dimensions.clamped();
        if self.config.width == dimensions.width && self.config.height == dimensions.height {
            return;
        }
        self.config.width = dimensions.width;
        self.config.height = dimensions.height;
        self.surface.configure(&self.device, &self.config);
        tracing::debug!(%dimensions, "surface reconfigured");
    }

    fn set_wireframe(&mut self, enabled: bool) {
        if enabled && !self.polygon_line {
            tracing::warn!("adapter lacks line polygon mode, wireframe ignored");
            self.state.wireframe = false;
            return;
        }
        self.state.wireframe = enabled;
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>) {
        self.state.target = framebuffer.map_or(Target::Surface, Target::Offscreen);
    }

    fn clear(&mut self, color: [f32; 4]) {
        self.frame.clear(self.state.target, color);
    }

    fn use_program(&mut self, program: Option<ProgramId>) {
        self.state.program = program;
    }

    fn bind_mesh(&mut self, mesh: Option<MeshId>) {
        self.state.mesh = mesh;
    }

    fn bind_texture(&mut self, unit: u32, source: Option<SamplerSource>) {
        match self.state.textures.get_mut(unit as usize) {
            Some(slot) => *slot = source,
            None => tracing::warn!(unit, max = MAX_TEXTURE_UNITS, "texture unit out of range"),
        }
    }

    fn set_uniform(&mut self, location: UniformLocation, value: UniformValue) {
        let Some(program) = self.state.program.and_then(|id| self.programs.get_mut(id)) else {
            return;
        };
        let Some(field) = program.layout.field(location.index()) else {
            return;
        };
        let (offset, size) = (field.offset as usize, field.size as usize);
        let bytes = uniform_bytes(&value);
        let len = bytes.len().min(size);
        program.block[offset..offset + len].copy_from_slice(&bytes[..len]);
    }

    fn draw_indexed(&mut self, index_count: u32) {
        let Some(mesh) = self.state.mesh else {
            tracing::warn!("draw without a bound mesh, ignored");
            return;
        };
        self.record_draw(Geometry::Mesh { mesh, index_count });
    }

    fn draw_fullscreen_triangle(&mut self) {
        self.record_draw(Geometry::FullscreenTriangle);
    }

    fn present(&mut self) -> Result<(), RenderError> {
        let frame = std::mem::replace(&mut self.frame, FrameRecorder::new(self.alignment));

        let output = match self.surface.get_current_texture() {
            Ok(output) => output,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                tracing::warn!("surface lost, reconfiguring and skipping frame");
                self.surface.configure(&self.device, &self.config);
                return Ok(());
            }
            Err(wgpu::SurfaceError::Timeout) => {
                tracing::warn!("surface timeout, skipping frame");
                return Ok(());
            }
            Err(e) => return Err(RenderError::Surface(e.to_string())),
        };

        self.prepare(&frame)?;
        let view = output.texture.create_view(&wgpu::TextureViewDescriptor {
            format: Some(self.view_format),
            ..Default::default()
        });
        let commands = self.encode(&frame, &view);
        self.queue.submit(std::iter::once(commands));
        output.present();
        Ok(())
    }
}

fn texture_group_key(
    program: ProgramId,
    layout: &ProgramLayout,
    bound: &TextureUnits,
) -> TextureGroupKey {
    let mut textures = [None; MAX_TEXTURE_UNITS];
    for binding in &layout.textures {
        let unit = binding.unit() as usize;
        if let Some(slot) = textures.get_mut(unit) {
            *slot = bound[unit];
        }
    }
    TextureGroupKey { program, textures }
}

fn create_pipeline(
    device: &wgpu::Device,
    program: &GpuProgram,
    target: TargetKind,
    format: wgpu::TextureFormat,
    wireframe: bool,
) -> Result<wgpu::RenderPipeline, RenderError> {
    let vertex_buffers = [wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<Vertex>() as u64,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &VERTEX_ATTRIBUTES,
    }];
    let buffers: &[wgpu::VertexBufferLayout] = if program.layout.vertex_inputs {
        &vertex_buffers
    } else {
        &[]
    };
    let (samples, depth_stencil) = match target {
        TargetKind::Surface => (1, None),
        TargetKind::Offscreen { samples } => (
            samples,
            Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::Less,
                stencil: Default::default(),
                bias: Default::default(),
            }),
        ),
    };

    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some("prism_pipeline"),
        layout: Some(&program.pipeline_layout),
        vertex: wgpu::VertexState {
            module: &program.module,
            entry_point: Some(VERTEX_ENTRY),
            compilation_options: Default::default(),
            buffers,
        },
        fragment: Some(wgpu::FragmentState {
            module: &program.module,
            entry_point: Some(FRAGMENT_ENTRY),
            compilation_options: Default::default(),
            targets: &[Some(wgpu::ColorTargetState {
                format,
                blend: Some(wgpu::BlendState::REPLACE),
                write_mask: wgpu::ColorWrites::ALL,
            })],
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: program.layout.vertex_inputs.then_some(wgpu::Face::Back),
            polygon_mode: if wireframe {
                wgpu::PolygonMode::Line
            } else {
                wgpu::PolygonMode::Fill
            },
            ..Default::default()
        },
        depth_stencil,
        multisample: wgpu::MultisampleState {
            count: samples,
            ..Default::default()
        },
        multiview: None,
        cache: None,
    });
    match pollster::block_on(device.pop_error_scope()) {
        Some(error) => Err(RenderError::creation("pipeline", error.to_string())),
        None => Ok(pipeline),
    }
}

fn uniform_group(
    device: &wgpu::Device,
    program: &GpuProgram,
    buffer: &wgpu::Buffer,
) -> wgpu::BindGroup {
    let uniform_size = NonZeroU64::new(program.layout.uniform_size as u64);
    let entries: Vec<wgpu::BindGroupEntry> = uniform_size
        .map(|size| wgpu::BindGroupEntry {
            binding: 0,
            resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                buffer,
                offset: 0,
                size: Some(size),
            }),
        })
        .into_iter()
        .collect();
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("uniform_bind_group"),
        layout: &program.uniform_layout,
        entries: &entries,
    })
}

fn uniform_buffer(device: &wgpu::Device, size: u64) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("uniform_buffer"),
        size,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

fn sampler(device: &wgpu::Device, filter: TextureFilter, wrap: TextureWrap) -> wgpu::Sampler {
    let filter = match filter {
        TextureFilter::Linear => wgpu::FilterMode::Linear,
        TextureFilter::Nearest => wgpu::FilterMode::Nearest,
    };
    let address = match wrap {
        TextureWrap::Repeat => wgpu::AddressMode::Repeat,
        TextureWrap::ClampToEdge => wgpu::AddressMode::ClampToEdge,
    };
    device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some("texture_sampler"),
        address_mode_u: address,
        address_mode_v: address,
        address_mode_w: address,
        mag_filter: filter,
        min_filter: filter,
        mipmap_filter: wgpu::FilterMode::Nearest,
        ..Default::default()
    })
}

fn white_texture(device: &wgpu::Device, queue: &wgpu::Queue) -> GpuTexture {
    let texture = device.create_texture_with_data(
        queue,
        &wgpu::TextureDescriptor {
            label: Some("fallback_texture"),
            size: wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        },
        wgpu::util::TextureDataOrder::LayerMajor,
        &[255; 4],
    );
    GpuTexture {
        view: texture.create_view(&wgpu::TextureViewDescriptor::default()),
        sampler: sampler(device, TextureFilter::Nearest, TextureWrap::Repeat),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_render::RecordingBackend;

    #[test]
    fn texture_group_key_ignores_unused_units() {
        let mut backend = RecordingBackend::new();
        let program = backend
            .create_program(&ShaderSource::new("p", "x"))
            .unwrap();
        let layout = reflect::reflect(shaders::TONE_MAP_SHADER).unwrap();

        let mut bound = [None; MAX_TEXTURE_UNITS];
        bound[0] = Some(SamplerSource::Fallback);
        bound[1] = Some(SamplerSource::Fallback);
        let key = texture_group_key(program, &layout, &bound);

        bound[5] = Some(SamplerSource::Fallback);
        assert_eq!(texture_group_key(program, &layout, &bound), key);
        assert_eq!(key.textures[5], None);
    }

    #[test]
    fn vertex_layout_matches_core_vertex() {
        assert_eq!(std::mem::size_of::<Vertex>(), 48);
        let last = VERTEX_ATTRIBUTES[3];
        assert_eq!(last.offset, 40);
        assert_eq!(last.shader_location, 3);
    }
}
