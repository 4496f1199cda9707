//! Rendering error types

/// Rendering system errors
///
/// Comprehensive error type covering the failure modes of the batch
/// renderer and the graphics backend behind it. Most of these are recovered
/// inside the renderer (logged and the affected draw skipped) rather than
/// surfaced from a frame.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// Renderer initialization failed during setup
    ///
    /// Occurs when the renderer cannot be built from its configuration, for
    /// example when the default shader program is not registered.
    #[error("Renderer initialization failed: {0}")]
    InitializationFailed(String),

    /// A rendering operation failed during execution
    #[error("Rendering failed: {0}")]
    RenderingFailed(String),

    /// Resource creation or management failed
    ///
    /// Occurs when GPU resources (buffers, vertex arrays) cannot be created
    /// or when mesh data does not fit the pooled buffers.
    #[error("Resource creation failed: {0}")]
    ResourceCreationFailed(String),

    /// Backend-specific error occurred
    #[error("Backend error: {0}")]
    BackendError(String),

    /// Mesh data arrays disagree in length
    #[error("Mesh '{mesh}' has {vertices} vertices but {extra} extra vertices")]
    MeshDataMismatch {
        /// Mesh name
        mesh: String,
        /// Vertex count
        vertices: usize,
        /// Extra vertex count
        extra: usize,
    },
}

/// Result type for rendering operations
pub type RenderResult<T> = Result<T, RenderError>;
