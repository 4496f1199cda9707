//! Pooled GPU buffers for mesh drawing
//!
//! Meshes are not kept resident on the GPU. Every frame each distinct mesh
//! in use borrows a [`RenderObject`] (vertex, extra-vertex, optional bone
//! and index buffers plus a vertex array) sized for the largest mesh the
//! renderer accepts, and the data is streamed into it. Borrowed objects are
//! only returned by [`RenderObjectPool::do_tasks`] after the frame has been
//! drawn, so a buffer is never overwritten while draws still reference it.
//!
//! ```text
//! RenderObjectPool
//!         ├── free_static  ─┐
//!         ├── free_skinned  ├─ borrow ──> used_*  ── do_tasks ──> free_*
//!         └── mesh_to_object (MeshId -> handle, cleared by do_tasks)
//! ```

use std::collections::HashMap;
use std::mem::size_of;

use super::backend::{BufferHandle, BufferKind, GraphicsBackend, VertexArrayHandle};
use super::error::{RenderError, RenderResult};
use super::mesh::{BoneWeights, ExtraVertex, Mesh, MeshId, Vertex};
use crate::config::RendererConfig;

/// GPU buffers for one mesh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderObject {
    /// Base vertex stream
    pub vertex_buffer: BufferHandle,
    /// Extra vertex stream
    pub extra_vertex_buffer: BufferHandle,
    /// Bone weight stream, skinned objects only
    pub bone_buffer: Option<BufferHandle>,
    /// Index buffer
    pub index_buffer: BufferHandle,
    /// Vertex array binding all of the above
    pub vertex_array: VertexArrayHandle,
}

/// Handle of a pooled render object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderObjectHandle(u32);

/// Pool statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Render objects ever created
    pub created: usize,
    /// Objects borrowed this frame
    pub in_use: usize,
    /// Objects ready to be borrowed
    pub free: usize,
}

/// Free lists of reusable render objects
#[derive(Debug)]
pub struct RenderObjectPool {
    objects: Vec<RenderObject>,
    free_static: Vec<RenderObjectHandle>,
    free_skinned: Vec<RenderObjectHandle>,
    used_static: Vec<RenderObjectHandle>,
    used_skinned: Vec<RenderObjectHandle>,
    mesh_to_object: HashMap<MeshId, RenderObjectHandle>,
    max_vertices: usize,
    max_indices: usize,
}

impl RenderObjectPool {
    /// Create an empty pool sized by the renderer limits
    pub fn new(config: &RendererConfig) -> Self {
        Self {
            objects: Vec::new(),
            free_static: Vec::new(),
            free_skinned: Vec::new(),
            used_static: Vec::new(),
            used_skinned: Vec::new(),
            mesh_to_object: HashMap::new(),
            max_vertices: config.max_vertices_per_mesh as usize,
            max_indices: config.max_indices_per_mesh as usize,
        }
    }

    fn allocate(&mut self, skinned: bool, backend: &mut dyn GraphicsBackend) -> RenderResult<RenderObjectHandle> {
        let vertex_buffer = backend.create_buffer(BufferKind::Vertex, self.max_vertices * size_of::<Vertex>())?;
        let extra_vertex_buffer =
            backend.create_buffer(BufferKind::ExtraVertex, self.max_vertices * size_of::<ExtraVertex>())?;
        let bone_buffer = if skinned {
            Some(backend.create_buffer(BufferKind::BoneWeights, self.max_vertices * size_of::<BoneWeights>())?)
        } else {
            None
        };
        let index_buffer = backend.create_buffer(BufferKind::Index, self.max_indices * size_of::<u16>())?;

        let mut bound = vec![vertex_buffer, extra_vertex_buffer];
        bound.extend(bone_buffer);
        bound.push(index_buffer);
        let vertex_array = backend.create_vertex_array(&bound)?;

        let handle = RenderObjectHandle(self.objects.len() as u32);
        self.objects.push(RenderObject {
            vertex_buffer,
            extra_vertex_buffer,
            bone_buffer,
            index_buffer,
            vertex_array,
        });
        log::debug!(
            "Render object pool grew to {} ({})",
            self.objects.len(),
            if skinned { "skinned" } else { "static" }
        );
        Ok(handle)
    }

    /// Render object assigned to `mesh` this frame, borrowing one if needed
    ///
    /// The flag is `true` when the mesh already had an object this frame and
    /// its data is on the GPU. Meshes are assumed not to change within a
    /// frame; the second submission of a mesh never re-uploads.
    pub fn get_mesh_render_object_or_create_new(
        &mut self,
        mesh: &Mesh,
        backend: &mut dyn GraphicsBackend,
    ) -> RenderResult<(RenderObjectHandle, bool)> {
        if let Some(&handle) = self.mesh_to_object.get(&mesh.id()) {
            return Ok((handle, true));
        }

        let skinned = mesh.is_skinned();
        let free = if skinned { &mut self.free_skinned } else { &mut self.free_static };
        let handle = match free.pop() {
            Some(handle) => handle,
            None => self.allocate(skinned, backend)?,
        };

        if skinned {
            self.used_skinned.push(handle);
        } else {
            self.used_static.push(handle);
        }
        self.mesh_to_object.insert(mesh.id(), handle);
        Ok((handle, false))
    }

    /// Render object currently assigned to a mesh
    pub fn lookup(&self, mesh: MeshId) -> Option<(RenderObjectHandle, &RenderObject)> {
        let handle = *self.mesh_to_object.get(&mesh)?;
        self.objects.get(handle.0 as usize).map(|object| (handle, object))
    }

    /// Buffers of a render object
    pub fn get(&self, handle: RenderObjectHandle) -> Option<&RenderObject> {
        self.objects.get(handle.0 as usize)
    }

    /// Stream a mesh into its render object
    pub fn upload(
        &self,
        handle: RenderObjectHandle,
        mesh: &Mesh,
        backend: &mut dyn GraphicsBackend,
    ) -> RenderResult<()> {
        mesh.validate()?;
        if mesh.vertices.len() > self.max_vertices || mesh.indices.len() > self.max_indices {
            return Err(RenderError::ResourceCreationFailed(format!(
                "mesh '{}' ({} vertices, {} indices) exceeds render object limits",
                mesh.name,
                mesh.vertices.len(),
                mesh.indices.len()
            )));
        }

        let object = self.get(handle).ok_or_else(|| {
            RenderError::ResourceCreationFailed(format!("unknown render object {:?}", handle))
        })?;

        backend.upload_buffer(object.vertex_buffer, bytemuck::cast_slice(&mesh.vertices))?;
        backend.upload_buffer(object.extra_vertex_buffer, bytemuck::cast_slice(&mesh.extra_vertices))?;
        if let (Some(buffer), Some(weights)) = (object.bone_buffer, &mesh.bone_weights) {
            backend.upload_buffer(buffer, bytemuck::cast_slice(weights))?;
        }
        backend.upload_buffer(object.index_buffer, bytemuck::cast_slice(&mesh.indices))?;
        Ok(())
    }

    /// End-of-frame recycling: every borrowed object becomes free again
    pub fn do_tasks(&mut self) {
        self.free_static.append(&mut self.used_static);
        self.free_skinned.append(&mut self.used_skinned);
        self.mesh_to_object.clear();
    }

    /// Pool statistics
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            created: self.objects.len(),
            in_use: self.used_static.len() + self.used_skinned.len(),
            free: self.free_static.len() + self.free_skinned.len(),
        }
    }
}
