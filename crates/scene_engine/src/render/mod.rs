//! # Rendering System
//!
//! Batched 3D mesh rendering over an abstract graphics backend.
//!
//! ## Architecture
//!
//! - **Backend**: [`GraphicsBackend`] is the narrow set of GPU calls the
//!   renderer needs; [`HeadlessBackend`] records them for tests and tools
//! - **Scene renderer**: [`MeshEntityBatchRenderer`] collects submitted
//!   objects into pipeline groups and mesh batches, then draws shadow
//!   cascades, the main pass and the sorted transparent pass
//! - **Resources**: meshes and materials, pooled GPU render objects and the
//!   shader library with its compiled variants
//! - **Frame thread queue**: [`GlTaskQueue`] runs closures handed over from
//!   loader threads on the thread owning the backend

pub mod backend;
pub mod batch_collector;
pub mod camera;
pub mod error;
pub mod gl_queue;
pub mod headless;
pub mod instance;
pub mod light;
pub mod mesh;
pub mod render_object_pool;
pub mod scene_renderer;
pub mod shader;
pub mod shadow;

pub use backend::{
    BufferHandle, BufferKind, GraphicsBackend, ShaderHandle, TextureHandle, UniformValue,
    VertexArrayHandle,
};
pub use batch_collector::{BatchCollector, BatchKey, MeshSubmission};
pub use camera::{Camera, Frustum};
pub use error::{RenderError, RenderResult};
pub use gl_queue::{GlTask, GlTaskQueue, GlTaskSender};
pub use headless::{BackendCommand, HeadlessBackend, RecordedDraw, RecordedTarget};
pub use instance::{
    MeshRenderMeshBatch, MeshRenderPipelineStateGroup, ObjectFlags, RenderInstanceMeshData,
    RenderInstanceMeshDataTransparent, RenderInstanceObjectData, Renderable,
};
pub use light::LightModel;
pub use mesh::{BoneWeights, EntityModel, ExtraVertex, Material, Mesh, MeshId, MetaState, Vertex};
pub use render_object_pool::{PoolStats, RenderObject, RenderObjectHandle, RenderObjectPool};
pub use scene_renderer::{FrameStats, MeshEntityBatchRenderer, SceneState};
pub use shader::{OwnedUniform, ShaderLibrary, ShaderProgram, ShaderVariant};
pub use shadow::{practical_splits, ShadowCascade, ShadowCascades};
