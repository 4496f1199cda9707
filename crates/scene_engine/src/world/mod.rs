//! Spatial partitioning for map objects
//!
//! Query shapes plus the layered quad/oct world tree used by the map query
//! engine.

pub mod shape;
pub mod world_tree;

pub use shape::{Aabb, NoShape, Point, Ray, Shape, Sphere};
pub use world_tree::{
    LayerId, LayerMask, NodeIndex, TreeCursor, TreeEntry, TreeResult, WorldTree, WorldTreeError,
};
