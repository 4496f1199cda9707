//! Mesh representation for 3D models
//!
//! Mesh data is split across three parallel vertex streams that map one to
//! one onto the pooled GPU buffers: base vertices, extra vertex data
//! (normals) and, for skinned meshes, bone weights. Every stream is a
//! `#[repr(C)]` plain-old-data type so it can be uploaded with
//! [`bytemuck::cast_slice`].
//!
//! Entity models own their meshes through `Arc`, so the same geometry can be
//! submitted by any number of objects in a frame. Per-object overrides live
//! in [`MetaState`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};

use super::backend::TextureHandle;
use super::error::{RenderError, RenderResult};
use super::instance::ObjectFlags;
use super::shader::OwnedUniform;
use crate::foundation::math::Color;
use crate::world::Aabb;

/// Base vertex layout
///
/// The `#[repr(C)]` attribute ensures consistent memory layout for GPU
/// buffer uploads.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    /// Position in 3D space
    pub position: [f32; 3],
    /// Texture coordinates
    pub uv: [f32; 2],
    /// Vertex color
    pub color: [f32; 4],
}

impl Vertex {
    /// Create a white vertex
    pub fn new(position: [f32; 3], uv: [f32; 2]) -> Self {
        Self {
            position,
            uv,
            color: [1.0; 4],
        }
    }
}

/// Extra per-vertex data of 3D meshes
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ExtraVertex {
    /// Normal vector
    pub normal: [f32; 3],
}

/// Skinning data of one vertex
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct BoneWeights {
    /// Indices into the bone matrix array
    pub bone_ids: [f32; 4],
    /// Weight of each referenced bone
    pub weights: [f32; 4],
}

/// Surface material of a mesh
#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    /// Material name
    pub name: String,
    /// Diffuse color; alpha below 1 makes the mesh transparent
    pub diffuse_color: Color,
    /// Diffuse texture, white when missing
    pub diffuse_texture: Option<TextureHandle>,
}

impl Material {
    /// Untextured material of one color
    pub fn colored(name: impl Into<String>, diffuse_color: Color) -> Self {
        Self {
            name: name.into(),
            diffuse_color,
            diffuse_texture: None,
        }
    }
}

impl Default for Material {
    fn default() -> Self {
        Self::colored("default", Color::WHITE)
    }
}

/// Identity of a mesh, used as the batching key
///
/// Allocated from a process-wide counter when the mesh is created, so two
/// meshes with identical contents still batch separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshId(u64);

impl MeshId {
    fn next() -> Self {
        static NEXT_MESH_ID: AtomicU64 = AtomicU64::new(1);
        Self(NEXT_MESH_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw id value
    pub fn get(self) -> u64 {
        self.0
    }
}

/// Geometry plus material of one drawable part of an entity
///
/// Cloning allocates a fresh [`MeshId`]; the copy may be edited freely
/// without sharing batches or GPU buffers with the original.
#[derive(Debug)]
pub struct Mesh {
    id: MeshId,
    /// Mesh name
    pub name: String,
    /// Base vertex stream
    pub vertices: Vec<Vertex>,
    /// Extra vertex stream, same length as `vertices`
    pub extra_vertices: Vec<ExtraVertex>,
    /// Bone weight stream of skinned meshes
    pub bone_weights: Option<Vec<BoneWeights>>,
    /// Triangle indices
    pub indices: Vec<u16>,
    /// Surface material
    pub material: Material,
}

impl Clone for Mesh {
    fn clone(&self) -> Self {
        Self {
            id: MeshId::next(),
            name: self.name.clone(),
            vertices: self.vertices.clone(),
            extra_vertices: self.extra_vertices.clone(),
            bone_weights: self.bone_weights.clone(),
            indices: self.indices.clone(),
            material: self.material.clone(),
        }
    }
}

impl Mesh {
    /// Create a static mesh
    pub fn new(
        name: impl Into<String>,
        vertices: Vec<Vertex>,
        extra_vertices: Vec<ExtraVertex>,
        indices: Vec<u16>,
        material: Material,
    ) -> Self {
        Self {
            id: MeshId::next(),
            name: name.into(),
            vertices,
            extra_vertices,
            bone_weights: None,
            indices,
            material,
        }
    }

    /// Attach skinning data
    pub fn with_bone_weights(mut self, bone_weights: Vec<BoneWeights>) -> Self {
        self.bone_weights = Some(bone_weights);
        self
    }

    /// Axis-aligned quad in the xy plane, handy for sprites and tests
    pub fn quad(name: impl Into<String>, size: f32, material: Material) -> Self {
        let h = size * 0.5;
        let vertices = vec![
            Vertex::new([-h, -h, 0.0], [0.0, 0.0]),
            Vertex::new([h, -h, 0.0], [1.0, 0.0]),
            Vertex::new([h, h, 0.0], [1.0, 1.0]),
            Vertex::new([-h, h, 0.0], [0.0, 1.0]),
        ];
        let extra = vec![ExtraVertex { normal: [0.0, 0.0, 1.0] }; 4];
        Self::new(name, vertices, extra, vec![0, 1, 2, 0, 2, 3], material)
    }

    /// Batching identity
    pub fn id(&self) -> MeshId {
        self.id
    }

    /// Whether the mesh carries bone weights
    pub fn is_skinned(&self) -> bool {
        self.bone_weights.is_some()
    }

    /// Check that the vertex streams line up
    pub fn validate(&self) -> RenderResult<()> {
        if self.vertices.len() != self.extra_vertices.len() {
            return Err(RenderError::MeshDataMismatch {
                mesh: self.name.clone(),
                vertices: self.vertices.len(),
                extra: self.extra_vertices.len(),
            });
        }
        if let Some(weights) = &self.bone_weights {
            if weights.len() != self.vertices.len() {
                return Err(RenderError::MeshDataMismatch {
                    mesh: self.name.clone(),
                    vertices: self.vertices.len(),
                    extra: weights.len(),
                });
            }
        }
        Ok(())
    }
}

/// An ordered set of meshes drawn together
#[derive(Debug, Clone)]
pub struct EntityModel {
    /// Model name
    pub name: String,
    /// Meshes in draw order
    pub meshes: Vec<Arc<Mesh>>,
    /// Cull back faces when drawing
    pub backface_culling: bool,
    /// Bounds in model space
    pub local_bounds: Aabb,
}

impl EntityModel {
    /// Create a model from meshes
    pub fn new(name: impl Into<String>, meshes: Vec<Arc<Mesh>>, local_bounds: Aabb) -> Self {
        Self {
            name: name.into(),
            meshes,
            backface_culling: true,
            local_bounds,
        }
    }
}

/// Per-object overrides layered on top of the shared entity data
#[derive(Debug, Clone, Default)]
pub struct MetaState {
    /// Color multiplied into every mesh
    pub tint: Color,
    /// Name of a shader program replacing the default choice
    pub shader_override: Option<String>,
    /// Per-mesh visibility; meshes past the end of the list are visible
    pub mesh_visibility: Vec<bool>,
    /// Draw through the transparent path even when fully opaque
    pub force_transparent: bool,
    /// Replaces the object's own flags when set
    pub custom_flags: Option<ObjectFlags>,
    /// Extra uniforms uploaded when the shader is overridden
    pub shader_uniforms: Vec<(String, OwnedUniform)>,
}

impl MetaState {
    /// Whether mesh `index` should be drawn
    pub fn is_mesh_visible(&self, index: usize) -> bool {
        self.mesh_visibility.get(index).copied().unwrap_or(true)
    }

    /// Hide or show mesh `index`
    pub fn set_mesh_visible(&mut self, index: usize, visible: bool) {
        if self.mesh_visibility.len() <= index {
            self.mesh_visibility.resize(index + 1, true);
        }
        self.mesh_visibility[index] = visible;
    }

    /// Whether a mesh with `material` goes through the transparent path
    pub fn is_transparent(&self, material: &Material) -> bool {
        self.force_transparent
            || self.tint.is_translucent()
            || material.diffuse_color.is_translucent()
    }
}
