//! Recording backend without a GPU
//!
//! [`HeadlessBackend`] implements [`GraphicsBackend`] by appending every call
//! to a command log. Tests inspect the log to check draw order, upload
//! counts and state toggles; tools use it to run the pipeline without a
//! window.

use std::collections::HashMap;

use super::backend::{
    BufferHandle, BufferKind, GraphicsBackend, ShaderHandle, TextureHandle, UniformValue,
    VertexArrayHandle,
};
use super::error::{RenderError, RenderResult};
use super::shader::{uniforms, OwnedUniform};
use crate::foundation::math::Mat4;

/// Render target a draw went to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordedTarget {
    /// Main framebuffer
    Main,
    /// Depth target of a shadow cascade
    ShadowCascade(usize),
}

/// Snapshot of the state a draw call was issued with
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedDraw {
    /// Active shader
    pub shader: Option<ShaderHandle>,
    /// Bound vertex array
    pub vertex_array: Option<VertexArrayHandle>,
    /// Number of indices drawn
    pub index_count: u32,
    /// Last model matrix pushed to the active shader
    pub model: Option<Mat4>,
    /// Render target
    pub target: RecordedTarget,
    /// Whether color writes were enabled
    pub color_write: bool,
    /// Whether blending was enabled
    pub blending: bool,
}

/// One recorded backend call
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCommand {
    /// Buffer creation
    CreateBuffer(BufferHandle, BufferKind, usize),
    /// Vertex array creation
    CreateVertexArray(VertexArrayHandle),
    /// Buffer upload with byte count
    Upload(BufferHandle, usize),
    /// Shader bind
    UseShader(ShaderHandle),
    /// Uniform set
    SetUniform(ShaderHandle, String, OwnedUniform),
    /// Vertex array bind
    BindVertexArray(VertexArrayHandle),
    /// Texture bind (`None` = white texture)
    BindTexture(u32, Option<TextureHandle>),
    /// Render target switch
    BindTarget(RecordedTarget),
    /// Color write toggle
    ColorWrite(bool),
    /// Depth write toggle
    DepthWrite(bool),
    /// Blending toggle
    Blending(bool),
    /// Face culling toggle
    FaceCulling(bool),
    /// Indexed draw
    Draw(RecordedDraw),
}

/// Backend that records calls instead of talking to a GPU
#[derive(Debug)]
pub struct HeadlessBackend {
    commands: Vec<BackendCommand>,
    next_handle: u64,
    buffer_sizes: HashMap<BufferHandle, usize>,
    shadow_cascades: usize,
    current_shader: Option<ShaderHandle>,
    current_vertex_array: Option<VertexArrayHandle>,
    current_model: Option<Mat4>,
    target: RecordedTarget,
    color_write: bool,
    blending: bool,
}

impl HeadlessBackend {
    /// Create a backend with depth targets for `shadow_cascades` cascades
    pub fn new(shadow_cascades: usize) -> Self {
        Self {
            commands: Vec::new(),
            next_handle: 1,
            buffer_sizes: HashMap::new(),
            shadow_cascades,
            current_shader: None,
            current_vertex_array: None,
            current_model: None,
            target: RecordedTarget::Main,
            color_write: true,
            blending: false,
        }
    }

    fn next_handle(&mut self) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    /// Every call recorded so far
    pub fn commands(&self) -> &[BackendCommand] {
        &self.commands
    }

    /// Forget recorded calls, keeping created resources
    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    /// Recorded draws, in issue order
    pub fn draws(&self) -> impl Iterator<Item = &RecordedDraw> {
        self.commands.iter().filter_map(|command| match command {
            BackendCommand::Draw(draw) => Some(draw),
            _ => None,
        })
    }

    /// Draws that wrote color to the main framebuffer
    pub fn visible_draws(&self) -> impl Iterator<Item = &RecordedDraw> {
        self.draws()
            .filter(|draw| draw.target == RecordedTarget::Main && draw.color_write)
    }

    /// Number of buffer uploads
    pub fn upload_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|command| matches!(command, BackendCommand::Upload(..)))
            .count()
    }

    /// Number of buffers created
    pub fn buffer_count(&self) -> usize {
        self.buffer_sizes.len()
    }

    /// Values set for a uniform name, in call order
    pub fn uniform_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a OwnedUniform> + 'a {
        self.commands.iter().filter_map(move |command| match command {
            BackendCommand::SetUniform(_, uniform, value) if uniform == name => Some(value),
            _ => None,
        })
    }
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new(crate::config::RendererConfig::default().shadow_cascade_count)
    }
}

impl GraphicsBackend for HeadlessBackend {
    fn create_buffer(&mut self, kind: BufferKind, size_bytes: usize) -> RenderResult<BufferHandle> {
        let handle = BufferHandle(self.next_handle());
        self.buffer_sizes.insert(handle, size_bytes);
        self.commands.push(BackendCommand::CreateBuffer(handle, kind, size_bytes));
        Ok(handle)
    }

    fn create_vertex_array(&mut self, buffers: &[BufferHandle]) -> RenderResult<VertexArrayHandle> {
        if let Some(missing) = buffers.iter().find(|b| !self.buffer_sizes.contains_key(b)) {
            return Err(RenderError::ResourceCreationFailed(format!(
                "vertex array references unknown buffer {:?}",
                missing
            )));
        }
        let handle = VertexArrayHandle(self.next_handle());
        self.commands.push(BackendCommand::CreateVertexArray(handle));
        Ok(handle)
    }

    fn upload_buffer(&mut self, buffer: BufferHandle, data: &[u8]) -> RenderResult<()> {
        let capacity = self
            .buffer_sizes
            .get(&buffer)
            .copied()
            .ok_or_else(|| RenderError::BackendError(format!("upload to unknown buffer {:?}", buffer)))?;
        if data.len() > capacity {
            return Err(RenderError::BackendError(format!(
                "upload of {} bytes overflows buffer {:?} ({} bytes)",
                data.len(),
                buffer,
                capacity
            )));
        }
        self.commands.push(BackendCommand::Upload(buffer, data.len()));
        Ok(())
    }

    fn use_shader(&mut self, shader: ShaderHandle) {
        self.current_shader = Some(shader);
        self.commands.push(BackendCommand::UseShader(shader));
    }

    fn set_uniform(&mut self, shader: ShaderHandle, name: &str, value: UniformValue<'_>) {
        if name == uniforms::MODEL_MATRIX {
            if let UniformValue::Mat4(model) = value {
                self.current_model = Some(model);
            }
        }
        self.commands
            .push(BackendCommand::SetUniform(shader, name.to_string(), value.into()));
    }

    fn bind_vertex_array(&mut self, vertex_array: VertexArrayHandle) {
        self.current_vertex_array = Some(vertex_array);
        self.commands.push(BackendCommand::BindVertexArray(vertex_array));
    }

    fn bind_texture(&mut self, slot: u32, texture: Option<TextureHandle>) {
        self.commands.push(BackendCommand::BindTexture(slot, texture));
    }

    fn bind_shadow_target(&mut self, cascade: usize) {
        self.target = RecordedTarget::ShadowCascade(cascade);
        self.commands.push(BackendCommand::BindTarget(self.target));
    }

    fn bind_main_target(&mut self) {
        self.target = RecordedTarget::Main;
        self.commands.push(BackendCommand::BindTarget(self.target));
    }

    fn shadow_texture(&self, cascade: usize) -> Option<TextureHandle> {
        // Depth textures live in a reserved handle range
        (cascade < self.shadow_cascades).then(|| TextureHandle(u64::MAX - cascade as u64))
    }

    fn set_color_write(&mut self, enabled: bool) {
        self.color_write = enabled;
        self.commands.push(BackendCommand::ColorWrite(enabled));
    }

    fn set_depth_write(&mut self, enabled: bool) {
        self.commands.push(BackendCommand::DepthWrite(enabled));
    }

    fn set_blending(&mut self, enabled: bool) {
        self.blending = enabled;
        self.commands.push(BackendCommand::Blending(enabled));
    }

    fn set_face_culling(&mut self, enabled: bool) {
        self.commands.push(BackendCommand::FaceCulling(enabled));
    }

    fn draw_indexed(&mut self, index_count: u32) -> RenderResult<()> {
        let Some(vertex_array) = self.current_vertex_array else {
            return Err(RenderError::RenderingFailed("draw without a bound vertex array".to_string()));
        };
        self.commands.push(BackendCommand::Draw(RecordedDraw {
            shader: self.current_shader,
            vertex_array: Some(vertex_array),
            index_count,
            model: self.current_model,
            target: self.target,
            color_write: self.color_write,
            blending: self.blending,
        }));
        Ok(())
    }
}
