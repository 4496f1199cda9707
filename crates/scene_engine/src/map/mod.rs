//! Map object management
//!
//! Game objects, their component initialization handshake, the cooperative
//! routines loading them, spatial queries over the initialized ones and
//! persistence of whole maps.

pub mod component;
pub mod game_map;
pub mod object;
pub mod query;
pub mod routine;
pub mod storage;

pub use component::{CompletionFlag, Component, ComponentInit};
pub use game_map::{GameMap, LoadPendingObjects, MapCore, MapListener, MapState};
pub use object::{
    GameObject, InitState, ObjectAdapter, ObjectBehavior, ObjectId, ObjectKey, ObjectKind,
    ObjectRenderData, ObjectState,
};
pub use query::{
    AnyType, ObjectQuery, ObjectQueryIter, ObjectVisitor, OfBehavior, OfKind, QueryOptions, TypeFilter,
};
pub use routine::{Routine, RoutineHandle, RoutineStatus, Scheduler, WaitUntil};
pub use storage::{DirectoryStorage, MapDocument, MapStorage, MemoryStorage, ObjectRecord, MAP_FORMAT_VERSION};

/// Result type for map operations
pub type MapResult<T> = Result<T, MapError>;

/// Errors reported by maps
#[derive(Debug, thiserror::Error)]
pub enum MapError {
    /// Spatial index rejected an operation
    #[error("World tree error: {0}")]
    Tree(#[from] crate::world::WorldTreeError),

    /// Map configuration was rejected
    #[error("Invalid map configuration: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Storage has no map under the name
    #[error("Map '{0}' not found")]
    NotFound(String),

    /// Storage refused the write
    #[error("Failed to save map '{0}'")]
    SaveFailed(String),

    /// Stored bytes are not a valid map document
    #[error("Malformed map data: {0}")]
    Parse(String),

    /// Map could not be serialized
    #[error("Failed to serialize map: {0}")]
    Serialize(String),
}
