//! # Engine Configuration
//!
//! Configuration for the renderer, the world tree and the map lifecycle.
//!
//! ## Configuration Categories
//!
//! - **Renderer Config**: shadow cascades, GPU buffer pool sizing, default shader
//! - **World Tree Config**: spatial subdivision parameters
//! - **Map Config**: object storage mode and loading budget

use serde::{Deserialize, Serialize};

use super::{Config, ConfigError};
use crate::foundation::math::Vec3;
use crate::world::Aabb;

/// Maximum number of shadow cascades a renderer can be configured with
pub const MAX_SHADOW_CASCADES: usize = 4;

/// # Renderer Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Number of shadow cascades (1 to [`MAX_SHADOW_CASCADES`])
    pub shadow_cascade_count: usize,
    /// Blend between uniform (0.0) and logarithmic (1.0) cascade splits
    pub cascade_split_lambda: f32,
    /// Extra depth added in front of each cascade so off-screen casters still cast
    pub shadow_caster_padding: f32,
    /// Edge length of one cascade depth target in texels
    pub shadow_map_resolution: u32,
    /// Largest index count a pooled render object can address
    pub max_indices_per_mesh: u32,
    /// Largest vertex count a pooled render object can address
    pub max_vertices_per_mesh: u32,
    /// Largest bone count a skinned render object can address
    pub max_bones_per_mesh: u32,
    /// Initial arena capacity for per-frame draw records
    pub initial_instance_capacity: usize,
    /// Name of the program used when a requested shader is missing
    pub default_shader: String,
}

impl RendererConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.shadow_cascade_count == 0 || self.shadow_cascade_count > MAX_SHADOW_CASCADES {
            return Err(ConfigError::Invalid(format!(
                "shadow_cascade_count must be within 1..={}, got {}",
                MAX_SHADOW_CASCADES, self.shadow_cascade_count
            )));
        }

        if !(0.0..=1.0).contains(&self.cascade_split_lambda) {
            return Err(ConfigError::Invalid(format!(
                "cascade_split_lambda must be within 0..=1, got {}",
                self.cascade_split_lambda
            )));
        }

        if self.max_indices_per_mesh == 0 || self.max_vertices_per_mesh == 0 {
            return Err(ConfigError::Invalid("render object buffers cannot be empty".to_string()));
        }

        if self.default_shader.is_empty() {
            return Err(ConfigError::Invalid("default_shader cannot be empty".to_string()));
        }

        Ok(())
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            shadow_cascade_count: 3,
            cascade_split_lambda: 0.75,
            shadow_caster_padding: 50.0,
            shadow_map_resolution: 2048,
            max_indices_per_mesh: u16::MAX as u32,
            max_vertices_per_mesh: u16::MAX as u32,
            max_bones_per_mesh: 64,
            initial_instance_capacity: 256,
            default_shader: "default".to_string(),
        }
    }
}

/// How a world tree node subdivides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SplitMode {
    /// Split x and y only, four children (2D maps)
    Quad,
    /// Split all three axes, eight children (3D maps)
    Oct,
}

impl SplitMode {
    /// Number of children a split node gets
    pub fn child_count(self) -> usize {
        match self {
            SplitMode::Quad => 4,
            SplitMode::Oct => 8,
        }
    }
}

/// # World Tree Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldTreeConfig {
    /// Quad or oct subdivision
    pub split_mode: SplitMode,
    /// World-space bounds of every layer root
    pub bounds: Aabb,
    /// Maximum objects per node before subdivision
    pub max_objects_per_node: usize,
    /// Maximum subdivision depth
    pub max_depth: u32,
    /// Minimum node half-size (prevents excessive subdivision)
    pub min_node_size: f32,
}

impl WorldTreeConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_objects_per_node == 0 {
            return Err(ConfigError::Invalid("max_objects_per_node must be at least 1".to_string()));
        }

        let size = self.bounds.max - self.bounds.min;
        let flat_ok = self.split_mode == SplitMode::Quad && size.z >= 0.0;
        if size.x <= 0.0 || size.y <= 0.0 || (!flat_ok && size.z <= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "world tree bounds are degenerate: {:?}",
                self.bounds
            )));
        }

        Ok(())
    }
}

impl Default for WorldTreeConfig {
    fn default() -> Self {
        Self {
            split_mode: SplitMode::Oct,
            bounds: Aabb::new(
                Vec3::new(-1024.0, -1024.0, -1024.0),
                Vec3::new(1024.0, 1024.0, 1024.0),
            ),
            max_objects_per_node: 8,
            max_depth: 8,
            min_node_size: 1.0,
        }
    }
}

/// # Map Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MapConfig {
    /// Index live objects in a world tree; a flat list is used otherwise
    pub use_world_tree: bool,
    /// Number of queued objects the loader may start per tick
    pub load_budget_per_tick: usize,
}

impl MapConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.load_budget_per_tick == 0 {
            return Err(ConfigError::Invalid("load_budget_per_tick must be at least 1".to_string()));
        }
        Ok(())
    }
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            use_world_tree: true,
            load_budget_per_tick: 1,
        }
    }
}

/// # Complete Engine Configuration
///
/// Top-level configuration that encompasses all engine subsystems.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Default log filter, overridden by `RUST_LOG`
    pub log_level: String,
    /// Renderer configuration
    pub renderer: RendererConfig,
    /// World tree configuration
    pub world_tree: WorldTreeConfig,
    /// Map lifecycle configuration
    pub map: MapConfig,
}

impl EngineConfig {
    /// Set log level
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.renderer.validate()?;
        self.world_tree.validate()?;
        self.map.validate()?;
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            renderer: RendererConfig::default(),
            world_tree: WorldTreeConfig::default(),
            map: MapConfig::default(),
        }
    }
}

impl Config for EngineConfig {}
