//! # Scene Engine
//!
//! Data-oriented core of a real-time game engine: a batched mesh renderer
//! with cascaded shadows and sorted transparency, and map object management
//! with cooperative loading and spatial queries.
//!
//! ## Features
//!
//! - **Batched Rendering**: per-frame arenas group submissions by shader and
//!   mesh so state changes happen once per group and once per batch
//! - **Shadow Cascades**: practical split scheme with light projections
//!   fitted to each slice of the camera frustum
//! - **Backend Agnostic**: the GPU is reached through [`render::GraphicsBackend`];
//!   [`render::HeadlessBackend`] records calls for tests and tools
//! - **World Tree**: layered quad/oct tree with pooled traversal stacks
//! - **Map Lifecycle**: queued object loading spread over ticks, immediate
//!   removal, RON persistence
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use scene_engine::prelude::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EngineConfig::default();
//!     scene_engine::foundation::logging::init_with_level(&config.log_level);
//!
//!     let shaders = ShaderLibrary::new(config.renderer.default_shader.clone(), ShaderHandle(1));
//!     let mut renderer = MeshEntityBatchRenderer::new(config.renderer.clone(), shaders)?;
//!     let mut backend = HeadlessBackend::default();
//!
//!     let mut map = GameMap::from_engine_config("level", &config)?;
//!     map.init();
//!     map.tick();
//!
//!     let camera = Camera::default();
//!     renderer.start_scene(&mut backend, &camera, &LightModel::default());
//!     map.submit_visible(&mut renderer, LayerId::ALL, NoShape);
//!     let stats = renderer.end_scene(&mut backend);
//!     renderer.do_tasks(&mut backend);
//!     println!("{} draw calls", stats.draw_calls);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod config;
pub mod foundation;
pub mod map;
pub mod render;
pub mod world;

/// Common imports for engine users
pub mod prelude {
    pub use crate::{
        config::{Config, EngineConfig, MapConfig, RendererConfig, SplitMode, WorldTreeConfig},
        foundation::math::{Color, Mat4, Transform, Vec3},
        map::{
            GameMap, GameObject, MapState, ObjectId, ObjectKind, ObjectRenderData, ObjectState,
            ObjectVisitor, OfBehavior, OfKind,
        },
        render::{
            Camera, EntityModel, FrameStats, GraphicsBackend, HeadlessBackend, LightModel, Material,
            Mesh, MeshEntityBatchRenderer, MetaState, ObjectFlags, Renderable, ShaderHandle,
            ShaderLibrary,
        },
        world::{Aabb, LayerId, LayerMask, NoShape, Point, Ray, Shape, Sphere},
    };
}
