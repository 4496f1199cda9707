//! Per-frame render records
//!
//! Plain data describing what was submitted in the current frame. Records
//! live in [`ArenaAllocator`](crate::foundation::arena::ArenaAllocator)s
//! owned by the batch collector and reference each other by
//! [`ArenaIndex`]; all of them are invalidated by the next scene start.
//!
//! Shared, long-lived data (meta state, meshes, bone matrices) is held
//! through `Arc` so a record never owns anything expensive.

use std::sync::Arc;

use bitflags::bitflags;

use super::backend::ShaderHandle;
use super::mesh::{EntityModel, Mesh, MetaState};
use crate::config::MAX_SHADOW_CASCADES;
use crate::foundation::arena::{ArenaIndex, ArenaList, LinkedNode};
use crate::foundation::math::{Mat4, Vec3};

bitflags! {
    /// Lighting participation of an object
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ObjectFlags: u32 {
        /// Rendered into the shadow cascades
        const CAST_SHADOWS = 1 << 0;
        /// Darkened by shadows of other objects
        const RECEIVE_SHADOWS = 1 << 1;
        /// Lit by the ambient term
        const RECEIVE_AMBIENT = 1 << 2;
    }
}

impl Default for ObjectFlags {
    fn default() -> Self {
        ObjectFlags::all()
    }
}

impl ObjectFlags {
    /// Value of the `lightMode` uniform for these flags
    pub fn light_mode(self) -> i32 {
        match (
            self.contains(ObjectFlags::RECEIVE_AMBIENT),
            self.contains(ObjectFlags::RECEIVE_SHADOWS),
        ) {
            (true, true) => 0,
            (false, true) => 1,
            (true, false) => 2,
            (false, false) => 3,
        }
    }
}

/// What the renderer needs from a submitted object
pub trait Renderable {
    /// Meshes to draw; `None` when the object has no visual representation
    fn entity(&self) -> Option<&EntityModel>;

    /// Per-object overrides
    fn meta_state(&self) -> &Arc<MetaState>;

    /// Model to world transform
    fn model_matrix(&self) -> Mat4;

    /// Bounding sphere in world space (center, radius)
    fn bounding_sphere(&self) -> (Vec3, f32);

    /// Lighting participation
    fn object_flags(&self) -> ObjectFlags {
        ObjectFlags::default()
    }

    /// Skinning matrices of mesh `mesh_index`, if animated
    fn bone_matrices(&self, _mesh_index: usize) -> Option<Arc<[Mat4]>> {
        None
    }
}

/// Visibility of an object per view: slot 0 is the camera, slot `i + 1`
/// is shadow cascade `i`
pub type ViewVisibility = [bool; MAX_SHADOW_CASCADES + 1];

/// One submitted object
#[derive(Debug, Clone)]
pub struct RenderInstanceObjectData {
    /// Model to world transform
    pub model_matrix: Mat4,
    /// Cull back faces when drawing
    pub backface_culling: bool,
    /// Shared per-object overrides
    pub meta_state: Arc<MetaState>,
    /// Distance from the camera to the bounding sphere center
    pub distance_to_camera: f32,
    /// Bounding sphere center
    pub sphere_center: Vec3,
    /// Bounding sphere radius
    pub sphere_radius: f32,
    /// Lighting participation
    pub flags: ObjectFlags,
    /// Frustum test results, filled in at scene end
    pub visibility: ViewVisibility,
}

/// One opaque (object, mesh) pair inside a mesh batch
#[derive(Debug, Clone)]
pub struct RenderInstanceMeshData {
    /// Object this mesh belongs to
    pub object: ArenaIndex,
    /// Skinning matrices
    pub bones: Option<Arc<[Mat4]>>,
    next: Option<ArenaIndex>,
}

impl RenderInstanceMeshData {
    /// Instance of `object` with optional bones
    pub fn new(object: ArenaIndex, bones: Option<Arc<[Mat4]>>) -> Self {
        Self {
            object,
            bones,
            next: None,
        }
    }
}

impl LinkedNode for RenderInstanceMeshData {
    fn next(&self) -> Option<ArenaIndex> {
        self.next
    }

    fn set_next(&mut self, next: Option<ArenaIndex>) {
        self.next = next;
    }
}

/// One transparent (object, mesh) pair; drawn individually after sorting
#[derive(Debug, Clone)]
pub struct RenderInstanceMeshDataTransparent {
    /// Mesh to draw
    pub mesh: Arc<Mesh>,
    /// Shader chosen at submission
    pub shader: ShaderHandle,
    /// Object this mesh belongs to
    pub object: ArenaIndex,
    /// Copy of the object's camera distance, the sort key
    pub distance_to_camera: f32,
    /// Skinning matrices
    pub bones: Option<Arc<[Mat4]>>,
    /// Upload the meta state uniforms before drawing
    pub upload_meta_state: bool,
    /// Submission order within the frame
    pub sequence: u32,
}

/// All instances of one mesh drawn with one shader
#[derive(Debug, Clone)]
pub struct MeshRenderMeshBatch {
    /// Shared mesh
    pub mesh: Arc<Mesh>,
    /// Shader of the owning pipeline group
    pub shader: ShaderHandle,
    /// Instances, in submission order
    pub instances: ArenaList,
    next: Option<ArenaIndex>,
}

impl MeshRenderMeshBatch {
    /// Empty batch for `mesh`
    pub fn new(mesh: Arc<Mesh>, shader: ShaderHandle) -> Self {
        Self {
            mesh,
            shader,
            instances: ArenaList::new(),
            next: None,
        }
    }
}

impl LinkedNode for MeshRenderMeshBatch {
    fn next(&self) -> Option<ArenaIndex> {
        self.next
    }

    fn set_next(&mut self, next: Option<ArenaIndex>) {
        self.next = next;
    }
}

/// All mesh batches sharing one shader
#[derive(Debug, Clone)]
pub struct MeshRenderPipelineStateGroup {
    /// Shader bound once for the whole group
    pub shader: ShaderHandle,
    /// The shader is an override and wants the meta state uniforms
    pub upload_meta_state: bool,
    /// Mesh batches, in first-use order
    pub batches: ArenaList,
    next: Option<ArenaIndex>,
}

impl MeshRenderPipelineStateGroup {
    /// Empty group for `shader`
    pub fn new(shader: ShaderHandle, upload_meta_state: bool) -> Self {
        Self {
            shader,
            upload_meta_state,
            batches: ArenaList::new(),
            next: None,
        }
    }
}

impl LinkedNode for MeshRenderPipelineStateGroup {
    fn next(&self) -> Option<ArenaIndex> {
        self.next
    }

    fn set_next(&mut self, next: Option<ArenaIndex>) {
        self.next = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_light_mode_encoding() {
        assert_eq!(ObjectFlags::all().light_mode(), 0);
        assert_eq!(ObjectFlags::RECEIVE_SHADOWS.light_mode(), 1);
        assert_eq!(ObjectFlags::RECEIVE_AMBIENT.light_mode(), 2);
        assert_eq!(ObjectFlags::empty().light_mode(), 3);
    }

    #[test]
    fn test_default_flags_cast_shadows() {
        assert!(ObjectFlags::default().contains(ObjectFlags::CAST_SHADOWS));
    }
}
