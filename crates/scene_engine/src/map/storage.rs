//! Map persistence
//!
//! Maps are stored as RON documents listing one [`ObjectRecord`] per object.
//! Where the bytes live is up to a [`MapStorage`] implementation.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::object::{GameObject, ObjectKind, ObjectState};
use super::{MapError, MapResult};
use crate::world::{Aabb, LayerMask};

/// Current version of the map document format
pub const MAP_FORMAT_VERSION: u32 = 1;

/// Byte store for saved maps
pub trait MapStorage {
    /// Store `bytes` under `name`; false if the write failed
    fn save(&mut self, name: &str, bytes: &[u8]) -> bool;

    /// Bytes stored under `name`
    fn load(&self, name: &str) -> Option<Vec<u8>>;
}

/// In-memory storage, mostly for tests and tools
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: HashMap<String, Vec<u8>>,
}

impl MemoryStorage {
    /// Create an empty storage
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `name` has been saved
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Number of stored maps
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been saved
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl MapStorage for MemoryStorage {
    fn save(&mut self, name: &str, bytes: &[u8]) -> bool {
        self.entries.insert(name.to_string(), bytes.to_vec());
        true
    }

    fn load(&self, name: &str) -> Option<Vec<u8>> {
        self.entries.get(name).cloned()
    }
}

/// Storage keeping one `<name>.ron` file per map under a root directory
#[derive(Debug, Clone)]
pub struct DirectoryStorage {
    root: PathBuf,
}

impl DirectoryStorage {
    /// Storage rooted at `root`; the directory is created on first save
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.ron", name))
    }
}

impl MapStorage for DirectoryStorage {
    fn save(&mut self, name: &str, bytes: &[u8]) -> bool {
        let path = self.path_of(name);
        let result = fs::create_dir_all(&self.root).and_then(|()| fs::write(&path, bytes));
        match result {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Failed to write map file {}: {}", path.display(), e);
                false
            }
        }
    }

    fn load(&self, name: &str) -> Option<Vec<u8>> {
        let path = self.path_of(name);
        match fs::read(&path) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                log::debug!("Map file {} not readable: {}", path.display(), e);
                None
            }
        }
    }
}

/// Persisted form of one object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectRecord {
    /// Display name
    pub name: String,
    /// Type tag
    pub kind: ObjectKind,
    /// World bounds
    pub bounds: Aabb,
    /// Layer membership
    #[serde(default)]
    pub layers: LayerMask,
    /// Stored without being spawned
    #[serde(default)]
    pub non_spawned: bool,
}

impl ObjectRecord {
    /// Snapshot of an object
    pub fn from_object(object: &GameObject) -> Self {
        Self {
            name: object.name().to_string(),
            kind: object.kind().clone(),
            bounds: object.bounds(),
            layers: object.layers(),
            non_spawned: object.state() == ObjectState::ConditionallyNonSpawned,
        }
    }

    /// Plain object built from the record
    pub fn to_object(&self) -> GameObject {
        let object = GameObject::new(self.name.clone(), self.kind.clone(), self.bounds).with_layers(self.layers);
        if self.non_spawned {
            object.non_spawned()
        } else {
            object
        }
    }
}

/// A saved map document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapDocument {
    /// Format version
    pub version: u32,
    /// Map name
    pub name: String,
    /// Objects in id order
    pub objects: Vec<ObjectRecord>,
}

impl MapDocument {
    /// Serialize to RON
    pub fn to_bytes(&self) -> MapResult<Vec<u8>> {
        ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map(String::into_bytes)
            .map_err(|e| MapError::Serialize(e.to_string()))
    }

    /// Parse a RON document, rejecting unknown versions
    pub fn from_bytes(bytes: &[u8]) -> MapResult<Self> {
        let text = std::str::from_utf8(bytes).map_err(|e| MapError::Parse(e.to_string()))?;
        let document: MapDocument = ron::from_str(text).map_err(|e| MapError::Parse(e.to_string()))?;
        if document.version != MAP_FORMAT_VERSION {
            return Err(MapError::Parse(format!(
                "unsupported map format version {} (expected {})",
                document.version, MAP_FORMAT_VERSION
            )));
        }
        Ok(document)
    }
}
