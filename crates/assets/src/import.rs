//! glTF geometry and material import.
//!
//! Node hierarchies are flattened: each primitive becomes one
//! [`MeshSource`] with the world transform of its node baked into the
//! vertices. Textures are shared between meshes by glTF image index.

use std::collections::HashMap;
use std::path::Path;

use glam::{Mat3, Mat4, Vec3, Vec4};
use prism_render::{Material, MeshData, MeshSource, TextureData, TextureKind, Vertex};

use crate::error::AssetError;
use crate::texture::from_gltf_image;

/// Used when a primitive carries no TANGENT attribute.
const DEFAULT_TANGENT: Vec4 = Vec4::new(1.0, 0.0, 0.0, 1.0);

/// Everything parsed out of one model file.
#[derive(Debug, Clone, Default)]
pub struct LoadedGeometry {
    pub meshes: Vec<MeshSource>,
    /// Texture pool the meshes index into.
    pub textures: Vec<TextureData>,
}

impl LoadedGeometry {
    pub fn vertex_count(&self) -> u32 {
        self.meshes.iter().map(|m| m.data.vertex_count()).sum()
    }

    pub fn index_count(&self) -> u32 {
        self.meshes.iter().map(|m| m.data.index_count()).sum()
    }
}

/// Parse a `.gltf` or `.glb` file.
pub fn load_meshes(path: impl AsRef<Path>) -> Result<LoadedGeometry, AssetError> {
    let path = path.as_ref();
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    if !matches!(extension.as_deref(), Some("gltf" | "glb")) {
        return Err(AssetError::UnsupportedFormat(path.to_path_buf()));
    }

    let (document, buffers, images) = gltf::import(path)?;
    let mut import = Import {
        buffers: &buffers,
        images: &images,
        geometry: LoadedGeometry::default(),
        texture_ids: HashMap::new(),
    };

    match document.default_scene().or(document.scenes().next()) {
        Some(scene) => {
            for node in scene.nodes() {
                import.node(&node, Mat4::IDENTITY)?;
            }
        }
        // No scene: take every mesh untransformed.
        None => {
            for mesh in document.meshes() {
                import.mesh(&mesh, Mat4::IDENTITY)?;
            }
        }
    }

    let geometry = import.geometry;
    tracing::debug!(
        path = %path.display(),
        meshes = geometry.meshes.len(),
        textures = geometry.textures.len(),
        vertices = geometry.vertex_count(),
        "glTF imported"
    );
    Ok(geometry)
}

struct Import<'a> {
    buffers: &'a [gltf::buffer::Data],
    images: &'a [gltf::image::Data],
    geometry: LoadedGeometry,
    texture_ids: HashMap<(usize, TextureKind), usize>,
}

impl Import<'_> {
    fn node(&mut self, node: &gltf::Node<'_>, parent: Mat4) -> Result<(), AssetError> {
        let world = parent * Mat4::from_cols_array_2d(&node.transform().matrix());
        if let Some(mesh) = node.mesh() {
            self.mesh(&mesh, world)?;
        }
        for child in node.children() {
            self.node(&child, world)?;
        }
        Ok(())
    }

    fn mesh(&mut self, mesh: &gltf::Mesh<'_>, world: Mat4) -> Result<(), AssetError> {
        for primitive in mesh.primitives() {
            if primitive.mode() != gltf::mesh::Mode::Triangles {
                tracing::warn!(
                    mesh = mesh.name().unwrap_or("unnamed"),
                    mode = ?primitive.mode(),
                    "skipping non-triangle primitive"
                );
                continue;
            }
            let Some(data) = self.geometry_of(&primitive, world) else {
                tracing::warn!(
                    mesh = mesh.name().unwrap_or("unnamed"),
                    "skipping primitive without positions"
                );
                continue;
            };
            let (material, textures) = self.material(&primitive.material())?;
            self.geometry.meshes.push(MeshSource {
                data,
                material: Some(material),
                textures,
            });
        }
        Ok(())
    }

    fn geometry_of(&self, primitive: &gltf::Primitive<'_>, world: Mat4) -> Option<MeshData> {
        let buffers = self.buffers;
        let reader = primitive.reader(|buffer| buffers.get(buffer.index()).map(|data| &data[..]));

        let positions: Vec<Vec3> = reader.read_positions()?.map(Vec3::from).collect();
        let mut indices: Vec<u32> = match reader.read_indices() {
            Some(indices) => indices.into_u32().collect(),
            None => (0..positions.len() as u32).collect(),
        };
        let normals: Vec<Vec3> = match reader.read_normals() {
            Some(normals) => normals.map(Vec3::from).collect(),
            None => smooth_normals(&positions, &indices),
        };
        let tangents: Vec<Vec4> = reader
            .read_tangents()
            .map(|t| t.map(Vec4::from).collect())
            .unwrap_or_default();
        let texcoords: Vec<[f32; 2]> = reader
            .read_tex_coords(0)
            .map(|t| t.into_f32().collect())
            .unwrap_or_default();

        let normal_matrix = Mat3::from_mat4(prism_render::normal_matrix(&world));
        let linear = Mat3::from_mat4(world);
        let vertices = positions
            .iter()
            .enumerate()
            .map(|(i, &position)| {
                let normal = normals.get(i).copied().unwrap_or(Vec3::Z);
                let tangent = tangents.get(i).copied().unwrap_or(DEFAULT_TANGENT);
                let [u, v] = texcoords.get(i).copied().unwrap_or_default();
                Vertex::new(
                    world.transform_point3(position),
                    (normal_matrix * normal).normalize_or(Vec3::Z),
                )
                .with_tangent(
                    (linear * tangent.truncate())
                        .normalize_or(Vec3::X)
                        .extend(tangent.w),
                )
                .with_texcoord(u, v)
            })
            .collect();

        // Mirroring transforms flip the winding.
        if world.determinant() < 0.0 {
            for triangle in indices.chunks_exact_mut(3) {
                triangle.swap(1, 2);
            }
        }
        Some(MeshData::new(vertices, indices))
    }

    fn material(
        &mut self,
        material: &gltf::Material<'_>,
    ) -> Result<(Material, Vec<usize>), AssetError> {
        let pbr = material.pbr_metallic_roughness();
        let [r, g, b, _] = pbr.base_color_factor();
        let occlusion = material.occlusion_texture();
        let values = Material {
            albedo: Vec3::new(r, g, b),
            metallic: pbr.metallic_factor(),
            roughness: pbr.roughness_factor(),
            emission: Vec3::from(material.emissive_factor()),
            ambient_occlusion: occlusion.as_ref().map_or(1.0, |o| o.strength()),
        };

        let mut textures = Vec::new();
        let maps = [
            (pbr.base_color_texture().map(|i| i.texture()), TextureKind::Albedo),
            (material.normal_texture().map(|n| n.texture()), TextureKind::NormalMap),
            (
                pbr.metallic_roughness_texture().map(|i| i.texture()),
                TextureKind::MetallicRoughnessMap,
            ),
            (occlusion.map(|o| o.texture()), TextureKind::AmbientOcclusionMap),
        ];
        for (texture, kind) in maps {
            if let Some(texture) = texture {
                textures.push(self.texture(&texture, kind)?);
            }
        }
        Ok((values, textures))
    }

    fn texture(
        &mut self,
        texture: &gltf::Texture<'_>,
        kind: TextureKind,
    ) -> Result<usize, AssetError> {
        let image = texture.source().index();
        if let Some(&index) = self.texture_ids.get(&(image, kind)) {
            return Ok(index);
        }
        let data = self.images.get(image).ok_or_else(|| {
            AssetError::UnsupportedImageFormat(format!("image {image} was not decoded"))
        })?;
        let index = self.geometry.textures.len();
        self.geometry
            .textures
            .push(from_gltf_image(kind, data, &texture.sampler())?);
        self.texture_ids.insert((image, kind), index);
        Ok(index)
    }
}

/// Area-weighted vertex normals for meshes that ship without them.
fn smooth_normals(positions: &[Vec3], indices: &[u32]) -> Vec<Vec3> {
    let mut normals = vec![Vec3::ZERO; positions.len()];
    for triangle in indices.chunks_exact(3) {
        let [a, b, c] = [triangle[0], triangle[1], triangle[2]].map(|i| i as usize);
        let (Some(pa), Some(pb), Some(pc)) = (positions.get(a), positions.get(b), positions.get(c))
        else {
            continue;
        };
        let face = (*pb - *pa).cross(*pc - *pa);
        for i in [a, b, c] {
            normals[i] += face;
        }
    }
    normals
        .into_iter()
        .map(|n| n.normalize_or(Vec3::Z))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// One triangle, POSITION/NORMAL/TEXCOORD_0 and u16 indices.
    const TRIANGLE_BUFFER: &str = "data:application/octet-stream;base64,AAAAAAAAAAAAAAAAAACAPwAAAAAAAAAAAAAAAAAAgD8AAAAAAAAAAAAAAAAAAIA/AAAAAAAAAAAAAIA/AAAAAAAAAAAAAIA/AAAAAAAAAAAAAIA/AAAAAAAAAAAAAIA/AAABAAIAAAA=";

    fn triangle_gltf(nodes: &str) -> String {
        format!(
            r#"{{
  "asset": {{ "version": "2.0" }},
  "scene": 0,
  "scenes": [{{ "nodes": [0] }}],
  "nodes": {nodes},
  "meshes": [{{
    "name": "tri",
    "primitives": [{{
      "attributes": {{ "POSITION": 0, "NORMAL": 1, "TEXCOORD_0": 2 }},
      "indices": 3,
      "material": 0
    }}]
  }}],
  "materials": [{{
    "pbrMetallicRoughness": {{
      "baseColorFactor": [0.5, 0.25, 1.0, 1.0],
      "metallicFactor": 0.75,
      "roughnessFactor": 0.5
    }},
    "emissiveFactor": [1.0, 0.0, 0.0]
  }}],
  "buffers": [{{ "byteLength": 104, "uri": "{TRIANGLE_BUFFER}" }}],
  "bufferViews": [
    {{ "buffer": 0, "byteOffset": 0, "byteLength": 36 }},
    {{ "buffer": 0, "byteOffset": 36, "byteLength": 36 }},
    {{ "buffer": 0, "byteOffset": 72, "byteLength": 24 }},
    {{ "buffer": 0, "byteOffset": 96, "byteLength": 6 }}
  ],
  "accessors": [
    {{ "bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3",
       "min": [0.0, 0.0, 0.0], "max": [1.0, 1.0, 0.0] }},
    {{ "bufferView": 1, "componentType": 5126, "count": 3, "type": "VEC3" }},
    {{ "bufferView": 2, "componentType": 5126, "count": 3, "type": "VEC2" }},
    {{ "bufferView": 3, "componentType": 5123, "count": 3, "type": "SCALAR" }}
  ]
}}"#
        )
    }

    fn write(dir: &Path, name: &str, contents: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn imports_triangle_with_material() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "tri.gltf", &triangle_gltf(r#"[{ "mesh": 0 }]"#));

        let geometry = load_meshes(&path).unwrap();
        assert_eq!(geometry.meshes.len(), 1);
        assert!(geometry.textures.is_empty());

        let mesh = &geometry.meshes[0];
        assert_eq!(mesh.data.indices, [0, 1, 2]);
        assert_eq!(mesh.data.vertices[1].position, [1.0, 0.0, 0.0]);
        assert_eq!(mesh.data.vertices[2].texcoord, [0.0, 1.0]);

        let material = mesh.material.unwrap();
        assert_eq!(material.albedo, Vec3::new(0.5, 0.25, 1.0));
        assert_eq!(material.metallic, 0.75);
        assert_eq!(material.emission, Vec3::X);
        assert_eq!(material.ambient_occlusion, 1.0);
    }

    #[test]
    fn bakes_node_hierarchy_transforms() {
        let dir = tempfile::tempdir().unwrap();
        let nodes = r#"[
            { "children": [1], "translation": [0.0, 0.0, -10.0] },
            { "mesh": 0, "scale": [2.0, 2.0, 2.0] }
        ]"#;
        let path = write(dir.path(), "nested.gltf", &triangle_gltf(nodes));

        let geometry = load_meshes(&path).unwrap();
        let vertices = &geometry.meshes[0].data.vertices;
        assert_eq!(vertices[1].position, [2.0, 0.0, -10.0]);
        // Uniform scale keeps normals unit length.
        assert_eq!(vertices[0].normal, [0.0, 0.0, 1.0]);
    }

    #[test]
    fn mirrored_nodes_flip_winding() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "mirror.gltf",
            &triangle_gltf(r#"[{ "mesh": 0, "scale": [-1.0, 1.0, 1.0] }]"#),
        );
        let geometry = load_meshes(&path).unwrap();
        assert_eq!(geometry.meshes[0].data.indices, [0, 2, 1]);
    }

    #[test]
    fn rejects_unknown_extensions() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "model.obj", "v 0 0 0");
        assert!(matches!(
            load_meshes(&path),
            Err(AssetError::UnsupportedFormat(p)) if p == path
        ));
    }

    #[test]
    fn malformed_gltf_is_a_gltf_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "broken.gltf", "{ not json");
        assert!(matches!(load_meshes(&path), Err(AssetError::Gltf(_))));
    }

    #[test]
    fn smooth_normals_follow_winding() {
        let positions = [Vec3::ZERO, Vec3::X, Vec3::Y];
        let normals = smooth_normals(&positions, &[0, 1, 2]);
        assert!(normals.iter().all(|n| n.abs_diff_eq(Vec3::Z, 1e-6)));
    }
}
