//! Mesh data and OBJ loading
//!
//! Geometry is kept on the CPU as an indexed triangle list of [`Vertex`]
//! values. OBJ files are triangulated on load and identical vertices merged.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use std::collections::HashMap;
use std::mem;

use crate::render::AssetError;

/// One vertex as laid out in the vertex buffer
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    /// Position in model space
    pub position: [f32; 3],
    /// Vertex color, multiplied with the texture
    pub color: [f32; 3],
    /// Texture coordinates, V pointing down
    pub tex_coord: [f32; 2],
}

impl Vertex {
    /// Create a new vertex
    pub fn new(position: [f32; 3], color: [f32; 3], tex_coord: [f32; 2]) -> Self {
        Self {
            position,
            color,
            tex_coord,
        }
    }

    /// Vertex buffer binding at slot 0
    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: mem::size_of::<Self>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    /// Position, color and texture coordinate at locations 0, 1 and 2
    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 3] {
        [
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: mem::offset_of!(Self, position) as u32,
            },
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 1,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: mem::offset_of!(Self, color) as u32,
            },
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 2,
                format: vk::Format::R32G32_SFLOAT,
                offset: mem::offset_of!(Self, tex_coord) as u32,
            },
        ]
    }

    /// Bit pattern used to merge identical vertices
    fn key(&self) -> [u32; 8] {
        bytemuck::cast(*self)
    }
}

/// Indexed triangle list
#[derive(Debug, Clone, Default)]
pub struct Mesh {
    /// Unique vertices
    pub vertices: Vec<Vertex>,
    /// Three indices per triangle
    pub indices: Vec<u32>,
}

impl Mesh {
    /// Unit quad facing +Z, used when no model is configured
    pub fn quad() -> Self {
        let white = [1.0, 1.0, 1.0];
        Self {
            vertices: vec![
                Vertex::new([-0.5, -0.5, 0.0], white, [1.0, 0.0]),
                Vertex::new([0.5, -0.5, 0.0], white, [0.0, 0.0]),
                Vertex::new([0.5, 0.5, 0.0], white, [0.0, 1.0]),
                Vertex::new([-0.5, 0.5, 0.0], white, [1.0, 1.0]),
            ],
            indices: vec![0, 1, 2, 2, 3, 0],
        }
    }

    /// Load and triangulate an OBJ file
    pub fn load_obj(path: &str) -> Result<Self, AssetError> {
        let options = tobj::LoadOptions {
            triangulate: true,
            single_index: true,
            ..Default::default()
        };

        let (models, _materials) = tobj::load_obj(path, &options).map_err(|source| AssetError::Model {
            path: path.to_string(),
            source,
        })?;

        let mut builder = MeshBuilder::default();
        for model in &models {
            let mesh = &model.mesh;
            for &index in &mesh.indices {
                let i = index as usize;
                let position = [
                    mesh.positions[3 * i],
                    mesh.positions[3 * i + 1],
                    mesh.positions[3 * i + 2],
                ];
                // OBJ puts V=0 at the bottom of the image
                let tex_coord = if mesh.texcoords.len() >= 2 * i + 2 {
                    [mesh.texcoords[2 * i], 1.0 - mesh.texcoords[2 * i + 1]]
                } else {
                    [0.0, 0.0]
                };
                builder.push(Vertex::new(position, [1.0, 1.0, 1.0], tex_coord));
            }
        }

        let loaded = builder.build();
        if loaded.indices.is_empty() {
            return Err(AssetError::Unusable {
                path: path.to_string(),
                reason: "model contains no triangles".to_string(),
            });
        }

        log::info!(
            "Loaded {}: {} vertices, {} indices",
            path,
            loaded.vertices.len(),
            loaded.indices.len()
        );
        Ok(loaded)
    }

    /// Load the configured model, or the fallback quad
    pub fn load_or_quad(path: Option<&str>) -> Result<Self, AssetError> {
        path.map_or_else(|| Ok(Self::quad()), Self::load_obj)
    }

    /// Number of indices to draw
    pub fn index_count(&self) -> u32 {
        u32::try_from(self.indices.len()).unwrap_or(u32::MAX)
    }
}

/// Accumulates triangle corners, emitting each distinct vertex once
#[derive(Default)]
struct MeshBuilder {
    unique: HashMap<[u32; 8], u32>,
    mesh: Mesh,
}

impl MeshBuilder {
    fn push(&mut self, vertex: Vertex) {
        let vertices = &mut self.mesh.vertices;
        let index = *self.unique.entry(vertex.key()).or_insert_with(|| {
            let next = vertices.len() as u32;
            vertices.push(vertex);
            next
        });
        self.mesh.indices.push(index);
    }

    fn build(self) -> Mesh {
        self.mesh
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_vertex_layout_matches_attributes() {
        assert_eq!(mem::size_of::<Vertex>(), 32);
        let attributes = Vertex::attribute_descriptions();
        assert_eq!(attributes[1].offset, 12);
        assert_eq!(attributes[2].offset, 24);
        assert_eq!(Vertex::binding_description().stride, 32);
    }

    #[test]
    fn test_builder_merges_duplicate_vertices() {
        let a = Vertex::new([0.0, 0.0, 0.0], [1.0; 3], [0.0, 0.0]);
        let b = Vertex::new([1.0, 0.0, 0.0], [1.0; 3], [1.0, 0.0]);
        let c = Vertex::new([0.0, 1.0, 0.0], [1.0; 3], [0.0, 1.0]);
        let d = Vertex::new([1.0, 1.0, 0.0], [1.0; 3], [1.0, 1.0]);

        let mut builder = MeshBuilder::default();
        for vertex in [a, b, c, c, b, d] {
            builder.push(vertex);
        }
        let mesh = builder.build();

        assert_eq!(mesh.vertices.len(), 4);
        assert_eq!(mesh.indices, vec![0, 1, 2, 2, 1, 3]);
    }

    #[test]
    fn test_quad_fallback() {
        let mesh = Mesh::load_or_quad(None).unwrap();
        assert_eq!(mesh.vertices.len(), 4);
        assert_eq!(mesh.index_count(), 6);
    }

    #[test]
    fn test_load_obj_triangulates_and_flips_v() {
        let path = std::env::temp_dir().join(format!("render_core_quad_{}.obj", std::process::id()));
        {
            let mut file = std::fs::File::create(&path).unwrap();
            writeln!(file, "v 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0").unwrap();
            writeln!(file, "vt 0 0\nvt 1 0\nvt 1 1\nvt 0 1").unwrap();
            writeln!(file, "f 1/1 2/2 3/3 4/4").unwrap();
        }

        let mesh = Mesh::load_obj(path.to_str().unwrap()).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(mesh.indices.len(), 6);
        assert_eq!(mesh.vertices.len(), 4);
        assert!(mesh.vertices.iter().any(|v| v.position == [0.0, 0.0, 0.0] && v.tex_coord == [0.0, 1.0]));
    }

    #[test]
    fn test_missing_model_is_reported() {
        let result = Mesh::load_obj("no/such/model.obj");
        assert!(matches!(result, Err(AssetError::Model { .. })));
    }
}
