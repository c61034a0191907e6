//! Procedural meshes for scenes that do not ship model files.

use std::f32::consts::{PI, TAU};

use glam::{Vec3, Vec4};
use prism_render::{MeshData, Vertex};

/// Axis-aligned cube centered on the origin, four vertices per face so
/// every face gets its own normal.
pub fn cube(size: f32) -> MeshData {
    let h = size * 0.5;
    // (normal, tangent) per face.
    let faces = [
        (Vec3::X, Vec3::NEG_Z),
        (Vec3::NEG_X, Vec3::Z),
        (Vec3::Y, Vec3::X),
        (Vec3::NEG_Y, Vec3::X),
        (Vec3::Z, Vec3::X),
        (Vec3::NEG_Z, Vec3::NEG_X),
    ];

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (normal, tangent) in faces {
        let bitangent = normal.cross(tangent);
        let base = vertices.len() as u32;
        for (u, v) in [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)] {
            let position = (normal + tangent * (u * 2.0 - 1.0) + bitangent * (v * 2.0 - 1.0)) * h;
            vertices.push(
                Vertex::new(position, normal)
                    .with_tangent(tangent.extend(1.0))
                    .with_texcoord(u, 1.0 - v),
            );
        }
        indices.extend([base, base + 1, base + 2, base, base + 2, base + 3]);
    }
    MeshData::new(vertices, indices)
}

/// UV sphere with `segments` around the equator and `rings` pole to pole.
pub fn sphere(radius: f32, segments: u32, rings: u32) -> MeshData {
    let segments = segments.max(3);
    let rings = rings.max(2);

    let mut vertices = Vec::with_capacity(((segments + 1) * (rings + 1)) as usize);
    for ring in 0..=rings {
        let v = ring as f32 / rings as f32;
        let theta = v * PI;
        for segment in 0..=segments {
            let u = segment as f32 / segments as f32;
            let phi = u * TAU;
            let ring = theta.sin();
            let normal = Vec3::new(ring * phi.cos(), theta.cos(), -ring * phi.sin());
            let tangent = Vec3::new(-phi.sin(), 0.0, -phi.cos());
            vertices.push(
                Vertex::new(normal * radius, normal)
                    .with_tangent(Vec4::from((tangent, 1.0)))
                    .with_texcoord(u, v),
            );
        }
    }

    let stride = segments + 1;
    let mut indices = Vec::with_capacity((segments * rings * 6) as usize);
    for ring in 0..rings {
        for segment in 0..segments {
            let a = ring * stride + segment;
            let b = a + stride;
            indices.extend([a, b, a + 1, a + 1, b, b + 1]);
        }
    }
    MeshData::new(vertices, indices)
}
