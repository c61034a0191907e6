//! WGSL interface reflection.
//!
//! Programs follow one binding convention: a single uniform struct at
//! `@group(0) @binding(0)`, and for texture unit `u` a texture at
//! `@group(1) @binding(2u)` with its sampler at `@binding(2u + 1)`. The
//! uniform struct is flattened into named fields (`lights[3].color`) so the
//! core can address any member by name, like a GL uniform.

use std::collections::HashMap;

use naga::{AddressSpace, ImageClass, ResourceBinding, TypeInner};

pub const UNIFORM_GROUP: u32 = 0;
pub const TEXTURE_GROUP: u32 = 1;
pub const VERTEX_ENTRY: &str = "vs_main";
pub const FRAGMENT_ENTRY: &str = "fs_main";

#[derive(Debug, thiserror::Error)]
pub enum ReflectError {
    #[error("WGSL parse error:\n{0}")]
    Parse(String),
    #[error("missing entry point `{0}`")]
    MissingEntryPoint(&'static str),
    #[error("binding @group({group}) @binding({binding}) does not follow the unit layout")]
    UnexpectedBinding { group: u32, binding: u32 },
}

/// A leaf member of the uniform block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformField {
    pub name: String,
    pub offset: u32,
    pub size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureBindingKind {
    Texture { multisampled: bool },
    Sampler,
}

/// One resource in the texture group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureBinding {
    pub binding: u32,
    pub kind: TextureBindingKind,
}

impl TextureBinding {
    pub fn unit(&self) -> u32 {
        self.binding / 2
    }
}

/// Everything the backend needs to know about a program's interface.
#[derive(Debug, Clone, Default)]
pub struct ProgramLayout {
    /// Byte size of the uniform block, 0 when the program has none.
    pub uniform_size: u32,
    pub fields: Vec<UniformField>,
    pub textures: Vec<TextureBinding>,
    /// Whether `vs_main` consumes vertex attributes.
    pub vertex_inputs: bool,
    index: HashMap<String, u32>,
}

impl ProgramLayout {
    pub fn field_index(&self, name: &str) -> Option<u32> {
        self.index.get(name).copied()
    }

    pub fn field(&self, index: u32) -> Option<&UniformField> {
        self.fields.get(index as usize)
    }

    /// Highest texture unit used, plus one.
    pub fn texture_units(&self) -> u32 {
        self.textures
            .iter()
            .map(|t| t.unit() + 1)
            .max()
            .unwrap_or(0)
    }
}

pub fn reflect(source: &str) -> Result<ProgramLayout, ReflectError> {
    let module = naga::front::wgsl::parse_str(source)
        .map_err(|e| ReflectError::Parse(e.emit_to_string(source)))?;

    let mut layout = ProgramLayout::default();

    for (_, global) in module.global_variables.iter() {
        let Some(ResourceBinding { group, binding }) = global.binding.clone() else {
            continue;
        };
        let inner = &module.types[global.ty].inner;
        match (group, global.space) {
            (UNIFORM_GROUP, AddressSpace::Uniform) if binding == 0 => {
                layout.uniform_size = inner.size(module.to_ctx());
                flatten(&module, global.ty, String::new(), 0, &mut layout.fields);
            }
            (TEXTURE_GROUP, AddressSpace::Handle) => {
                let kind = match inner {
                    TypeInner::Image {
                        class: ImageClass::Sampled { multi, .. },
                        ..
                    } if binding % 2 == 0 => TextureBindingKind::Texture {
                        multisampled: *multi,
                    },
                    TypeInner::Sampler { .. } if binding % 2 == 1 => TextureBindingKind::Sampler,
                    _ => return Err(ReflectError::UnexpectedBinding { group, binding }),
                };
                layout.textures.push(TextureBinding { binding, kind });
            }
            _ => return Err(ReflectError::UnexpectedBinding { group, binding }),
        }
    }
    layout.textures.sort_by_key(|t| t.binding);

    let vertex = module
        .entry_points
        .iter()
        .find(|e| e.name == VERTEX_ENTRY)
        .ok_or(ReflectError::MissingEntryPoint(VERTEX_ENTRY))?;
    if !module.entry_points.iter().any(|e| e.name == FRAGMENT_ENTRY) {
        return Err(ReflectError::MissingEntryPoint(FRAGMENT_ENTRY));
    }
    layout.vertex_inputs = vertex.function.arguments.iter().any(|arg| {
        is_location(arg.binding.as_ref())
            || match &module.types[arg.ty].inner {
                TypeInner::Struct { members, .. } => {
                    members.iter().any(|m| is_location(m.binding.as_ref()))
                }
                _ => false,
            }
    });

    layout.index = layout
        .fields
        .iter()
        .enumerate()
        .map(|(i, f)| (f.name.clone(), i as u32))
        .collect();
    Ok(layout)
}

fn is_location(binding: Option<&naga::Binding>) -> bool {
    matches!(binding, Some(naga::Binding::Location { .. }))
}

fn flatten(
    module: &naga::Module,
    ty: naga::Handle<naga::Type>,
    name: String,
    offset: u32,
    out: &mut Vec<UniformField>,
) {
    match &module.types[ty].inner {
        TypeInner::Struct { members, .. } => {
            for member in members {
                let Some(member_name) = member.name.as_deref() else {
                    continue;
                };
                let path = if name.is_empty() {
                    member_name.to_owned()
                } else {
                    format!("{name}.{member_name}")
                };
                flatten(module, member.ty, path, offset + member.offset, out);
            }
        }
        TypeInner::Array {
            base,
            size: naga::ArraySize::Constant(count),
            stride,
        } => {
            for i in 0..count.get() {
                let element = format!("{name}[{i}]");
                flatten(module, *base, element, offset + i * stride, out);
            }
        }
        inner => out.push(UniformField {
            size: inner.size(module.to_ctx()),
            name,
            offset,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shaders::{FORWARD_SHADER, TONE_MAP_SHADER};
    use prism_render::{LightField, MAX_LIGHTS, Uniform};

    #[test]
    fn flattens_nested_arrays() {
        let src = r#"
            struct Item { a: f32, b: vec3<f32> };
            struct U { m: mat4x4<f32>, items: array<Item, 2>, n: u32 };
            @group(0) @binding(0) var<uniform> u: U;
            @vertex fn vs_main(@builtin(vertex_index) i: u32) -> @builtin(position) vec4<f32> {
                return u.m * vec4<f32>(u.items[0].b, u.items[1].a);
            }
            @fragment fn fs_main() -> @location(0) vec4<f32> { return vec4<f32>(f32(u.n)); }
        "#;
        let layout = reflect(src).unwrap();
        let names: Vec<&str> = layout.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(
            names.join(" "),
            "m items[0].a items[0].b items[1].a items[1].b n"
        );

        let b1 = layout.field(layout.field_index("items[1].b").unwrap()).unwrap();
        assert_eq!(b1.offset, 64 + 32 + 16);
        assert_eq!(b1.size, 12);
        assert!(!layout.vertex_inputs);
        assert!(layout.textures.is_empty());
    }

    #[test]
    fn forward_shader_exposes_every_bound_uniform() {
        let layout = reflect(FORWARD_SHADER).unwrap();
        for uniform in Uniform::ALL {
            if matches!(uniform, Uniform::Exposure | Uniform::Dimensions) {
                continue;
            }
            let name = uniform.name();
            assert!(layout.field_index(name).is_some(), "{name}");
        }
        for i in 0..MAX_LIGHTS {
            for field in LightField::ALL {
                let name = field.uniform_name(i);
                assert!(layout.field_index(&name).is_some(), "{name}");
            }
        }
        assert!(layout.vertex_inputs);
        assert_eq!(layout.texture_units(), 4);
    }

    #[test]
    fn tone_map_shader_reads_framebuffer_and_dither() {
        let layout = reflect(TONE_MAP_SHADER).unwrap();
        assert!(layout.field_index(Uniform::Exposure.name()).is_some());
        assert!(layout.field_index(Uniform::Dimensions.name()).is_some());
        assert!(!layout.vertex_inputs);
        let units: Vec<u32> = layout.textures.iter().map(|t| t.unit()).collect();
        assert_eq!(units, [0, 1]);
    }

    #[test]
    fn rejects_missing_entry_points_and_odd_bindings() {
        let no_fragment = r#"
            @vertex fn vs_main() -> @builtin(position) vec4<f32> { return vec4<f32>(); }
        "#;
        assert!(matches!(
            reflect(no_fragment),
            Err(ReflectError::MissingEntryPoint(FRAGMENT_ENTRY))
        ));

        let sampler_on_even = r#"
            @group(1) @binding(0) var s: sampler;
            @vertex fn vs_main() -> @builtin(position) vec4<f32> { return vec4<f32>(); }
            @fragment fn fs_main() -> @location(0) vec4<f32> { return vec4<f32>(); }
        "#;
        assert!(matches!(
            reflect(sampler_on_even),
            Err(ReflectError::UnexpectedBinding {
                group: 1,
                binding: 0
            })
        ));
        assert!(matches!(reflect("fn ("), Err(ReflectError::Parse(_))));
    }
}
