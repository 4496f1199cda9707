//! Backend abstraction traits for the rendering system
//!
//! The batch renderer never talks to a graphics API directly. Everything it
//! needs from the GPU goes through [`GraphicsBackend`]: buffer creation and
//! upload, shader binding with named uniforms, render-target selection and a
//! handful of fixed-function toggles.

use super::error::RenderResult;
use crate::foundation::math::{Color, Mat4, Vec3};

/// Handle to a GPU buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub u64);

/// Handle to a vertex array (vertex layout + bound buffers)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexArrayHandle(pub u64);

/// Handle to a texture resource stored in the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub u64);

/// Handle to a compiled shader program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShaderHandle(pub u64);

/// What a buffer holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    /// Base vertex data (position, uv, color)
    Vertex,
    /// Per-vertex normals and other mesh extras
    ExtraVertex,
    /// Bone ids and weights of skinned meshes
    BoneWeights,
    /// Triangle indices
    Index,
}

/// Value of a named shader uniform
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue<'a> {
    /// Integer (also used for sampler slots and mode switches)
    Int(i32),
    /// Float
    Float(f32),
    /// Three component vector
    Vec3(Vec3),
    /// RGBA color
    Color(Color),
    /// Single matrix
    Mat4(Mat4),
    /// Matrix array, e.g. bone matrices
    Mat4Array(&'a [Mat4]),
    /// Float array, e.g. cascade split distances
    FloatArray(&'a [f32]),
}

/// Main rendering backend trait
///
/// Implemented by the GPU backend of the host application and by
/// [`HeadlessBackend`](super::headless::HeadlessBackend) for tests and tools.
/// Every call must be made from the frame thread.
pub trait GraphicsBackend {
    /// Create a buffer of `size_bytes`
    fn create_buffer(&mut self, kind: BufferKind, size_bytes: usize) -> RenderResult<BufferHandle>;

    /// Create a vertex array over the given buffers, in binding order
    fn create_vertex_array(&mut self, buffers: &[BufferHandle]) -> RenderResult<VertexArrayHandle>;

    /// Upload bytes to the start of a buffer
    fn upload_buffer(&mut self, buffer: BufferHandle, data: &[u8]) -> RenderResult<()>;

    /// Make a shader program current
    fn use_shader(&mut self, shader: ShaderHandle);

    /// Set a named uniform on a shader program
    fn set_uniform(&mut self, shader: ShaderHandle, name: &str, value: UniformValue<'_>);

    /// Bind a vertex array for drawing
    fn bind_vertex_array(&mut self, vertex_array: VertexArrayHandle);

    /// Bind a texture to a slot; `None` binds the flat white texture
    fn bind_texture(&mut self, slot: u32, texture: Option<TextureHandle>);

    /// Render into the depth target of a shadow cascade and clear it
    fn bind_shadow_target(&mut self, cascade: usize);

    /// Render into the main framebuffer
    fn bind_main_target(&mut self);

    /// Depth texture of a shadow cascade, if the backend created one
    fn shadow_texture(&self, cascade: usize) -> Option<TextureHandle>;

    /// Toggle color buffer writes
    fn set_color_write(&mut self, enabled: bool);

    /// Toggle depth buffer writes
    fn set_depth_write(&mut self, enabled: bool);

    /// Toggle alpha blending
    fn set_blending(&mut self, enabled: bool);

    /// Toggle back face culling
    fn set_face_culling(&mut self, enabled: bool);

    /// Draw indexed triangles from the bound vertex array
    fn draw_indexed(&mut self, index_count: u32) -> RenderResult<()>;
}
