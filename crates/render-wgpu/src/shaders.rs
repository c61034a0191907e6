/// Lit forward shading: Cook-Torrance BRDF over up to eight lights plus a
/// hemispherical ambient term. Writes linear HDR color.
pub const FORWARD_SHADER: &str = r#"
const PI: f32 = 3.14159265;
const MAX_LIGHTS: u32 = 8u;

const DIRECTIONAL: u32 = 0u;
const SPOT: u32 = 2u;

struct Light {
    kind: u32,
    position: vec3<f32>,
    direction: vec3<f32>,
    color: vec3<f32>,
    intensity: f32,
    range: f32,
    inner_cone_cos: f32,
    outer_cone_cos: f32,
};

struct Uniforms {
    projection: mat4x4<f32>,
    view: mat4x4<f32>,
    transform: mat4x4<f32>,
    normal_matrix: mat4x4<f32>,
    camera_position: vec3<f32>,
    metallic: f32,
    albedo: vec3<f32>,
    roughness: f32,
    emission: vec3<f32>,
    ambient_occlusion: f32,
    ambient_sky: vec3<f32>,
    ambient_intensity: f32,
    ambient_ground: vec3<f32>,
    light_count: u32,
    has_albedo_map: u32,
    has_normal_map: u32,
    has_metallic_roughness_map: u32,
    has_ambient_occlusion_map: u32,
    lights: array<Light, 8>,
};

@group(0) @binding(0)
var<uniform> u: Uniforms;

@group(1) @binding(0) var albedo_map: texture_2d<f32>;
@group(1) @binding(1) var albedo_sampler: sampler;
@group(1) @binding(2) var normal_map: texture_2d<f32>;
@group(1) @binding(3) var normal_sampler: sampler;
@group(1) @binding(4) var metallic_roughness_map: texture_2d<f32>;
@group(1) @binding(5) var metallic_roughness_sampler: sampler;
@group(1) @binding(6) var occlusion_map: texture_2d<f32>;
@group(1) @binding(7) var occlusion_sampler: sampler;

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) tangent: vec4<f32>,
    @location(3) texcoord: vec2<f32>,
};

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) world_position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) tangent: vec4<f32>,
    @location(3) texcoord: vec2<f32>,
};

@vertex
fn vs_main(in: VertexInput) -> VertexOutput {
    let world = u.transform * vec4<f32>(in.position, 1.0);
    let tangent = (u.transform * vec4<f32>(in.tangent.xyz, 0.0)).xyz;

    var out: VertexOutput;
    out.clip_position = u.projection * u.view * world;
    out.world_position = world.xyz;
    out.normal = (u.normal_matrix * vec4<f32>(in.normal, 0.0)).xyz;
    out.tangent = vec4<f32>(tangent, in.tangent.w);
    out.texcoord = in.texcoord;
    return out;
}

fn distribution_ggx(n_dot_h: f32, roughness: f32) -> f32 {
    let a = roughness * roughness;
    let a2 = a * a;
    let d = n_dot_h * n_dot_h * (a2 - 1.0) + 1.0;
    return a2 / max(PI * d * d, 1e-4);
}

fn geometry_smith(n_dot_v: f32, n_dot_l: f32, roughness: f32) -> f32 {
    let r = roughness + 1.0;
    let k = r * r / 8.0;
    let view = n_dot_v / (n_dot_v * (1.0 - k) + k);
    let light = n_dot_l / (n_dot_l * (1.0 - k) + k);
    return view * light;
}

fn fresnel_schlick(cos_theta: f32, f0: vec3<f32>) -> vec3<f32> {
    return f0 + (vec3<f32>(1.0) - f0) * pow(clamp(1.0 - cos_theta, 0.0, 1.0), 5.0);
}

// xyz: unit vector towards the light, w: attenuation.
fn incident(light: Light, world_position: vec3<f32>) -> vec4<f32> {
    if light.kind == DIRECTIONAL {
        return vec4<f32>(normalize(-light.direction), 1.0);
    }
    let to_light = light.position - world_position;
    let dist = max(length(to_light), 1e-4);
    let l = to_light / dist;
    let falloff = clamp(1.0 - pow(dist / max(light.range, 1e-4), 4.0), 0.0, 1.0);
    var attenuation = falloff * falloff / (dist * dist + 1.0);
    if light.kind == SPOT {
        let cos_angle = dot(-l, normalize(light.direction));
        attenuation *= smoothstep(light.outer_cone_cos, light.inner_cone_cos, cos_angle);
    }
    return vec4<f32>(l, attenuation);
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let albedo_texel = textureSample(albedo_map, albedo_sampler, in.texcoord);
    let normal_texel = textureSample(normal_map, normal_sampler, in.texcoord);
    let mr_texel = textureSample(metallic_roughness_map, metallic_roughness_sampler, in.texcoord);
    let occlusion_texel = textureSample(occlusion_map, occlusion_sampler, in.texcoord);

    let albedo = u.albedo * select(vec3<f32>(1.0), albedo_texel.rgb, u.has_albedo_map != 0u);
    let metallic = u.metallic * select(1.0, mr_texel.b, u.has_metallic_roughness_map != 0u);
    let roughness = clamp(
        u.roughness * select(1.0, mr_texel.g, u.has_metallic_roughness_map != 0u),
        0.04,
        1.0,
    );
    let occlusion = u.ambient_occlusion
        * select(1.0, occlusion_texel.r, u.has_ambient_occlusion_map != 0u);

    var n = normalize(in.normal);
    if u.has_normal_map != 0u {
        let t = normalize(in.tangent.xyz - n * dot(n, in.tangent.xyz));
        let b = cross(n, t) * in.tangent.w;
        n = normalize(mat3x3<f32>(t, b, n) * (normal_texel.xyz * 2.0 - 1.0));
    }

    let v = normalize(u.camera_position - in.world_position);
    let n_dot_v = max(dot(n, v), 1e-4);
    let f0 = mix(vec3<f32>(0.04), albedo, metallic);

    var radiance = vec3<f32>(0.0);
    let count = min(u.light_count, MAX_LIGHTS);
    for (var i = 0u; i < count; i++) {
        let light = u.lights[i];
        let incoming = incident(light, in.world_position);
        let l = incoming.xyz;
        let h = normalize(v + l);
        let n_dot_l = max(dot(n, l), 0.0);

        let d = distribution_ggx(max(dot(n, h), 0.0), roughness);
        let g = geometry_smith(n_dot_v, n_dot_l, roughness);
        let f = fresnel_schlick(max(dot(h, v), 0.0), f0);
        let specular = d * g * f / max(4.0 * n_dot_v * n_dot_l, 1e-4);
        let diffuse = (vec3<f32>(1.0) - f) * (1.0 - metallic) * albedo / PI;

        radiance += (diffuse + specular) * light.color * light.intensity * incoming.w * n_dot_l;
    }

    let sky = mix(u.ambient_ground, u.ambient_sky, n.y * 0.5 + 0.5) * u.ambient_intensity;
    let color = sky * albedo * occlusion + radiance + u.emission;
    return vec4<f32>(color, 1.0);
}
"#;

/// Fullscreen resolve of the HDR target: exposure, ACES tone curve, gamma,
/// then an 8x8 ordered dither to break up banding.
pub const TONE_MAP_SHADER: &str = r#"
struct Uniforms {
    dimensions: vec2<u32>,
    exposure: f32,
};

@group(0) @binding(0)
var<uniform> u: Uniforms;

@group(1) @binding(0) var hdr_buffer: texture_2d<f32>;
@group(1) @binding(2) var bayer_matrix: texture_2d<f32>;

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
};

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> VertexOutput {
    let uv = vec2<f32>(f32((index << 1u) & 2u), f32(index & 2u));
    var out: VertexOutput;
    out.clip_position = vec4<f32>(uv * vec2<f32>(2.0, -2.0) + vec2<f32>(-1.0, 1.0), 0.0, 1.0);
    return out;
}

fn aces(x: vec3<f32>) -> vec3<f32> {
    let a = 2.51;
    let b = 0.03;
    let c = 2.43;
    let d = 0.59;
    let e = 0.14;
    return clamp((x * (a * x + b)) / (x * (c * x + d) + e), vec3<f32>(0.0), vec3<f32>(1.0));
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let pixel = vec2<u32>(in.clip_position.xy);
    let last = max(u.dimensions, vec2<u32>(1u)) - vec2<u32>(1u);
    let hdr = textureLoad(hdr_buffer, min(pixel, last), 0).rgb;

    let mapped = pow(aces(hdr * u.exposure), vec3<f32>(1.0 / 2.2));

    let threshold = textureLoad(bayer_matrix, pixel % vec2<u32>(8u), 0).r * 255.0;
    let offset = ((threshold + 0.5) / 64.0 - 0.5) / 255.0;
    return vec4<f32>(mapped + vec3<f32>(offset), 1.0);
}
"#;
