//! World tree spatial partitioning
//!
//! Hierarchical quad/oct subdivision of the world used by map queries. Each
//! registered layer owns its own tree; layer 0 is implicit and holds every
//! object. An object is stored in the deepest node whose bounds fully
//! contain it, so objects straddling a split line stay at the parent and no
//! object is ever duplicated inside one layer. Objects outside the world
//! bounds stay at the root, which every traversal visits.
//!
//! Traversal is iterative: candidates are produced by a [`TreeCursor`]
//! walking an explicit node stack. Stacks are pooled inside the tree and
//! handed back when a cursor is dropped, so steady-state queries do not
//! allocate.

use std::cell::RefCell;
use std::collections::HashMap;
use std::hash::Hash;

use bitflags::bitflags;

use super::shape::{Aabb, Shape};
use crate::config::{SplitMode, WorldTreeConfig};
use crate::foundation::math::Vec3;

/// Result type for world tree operations
pub type TreeResult<T> = Result<T, WorldTreeError>;

/// Errors reported by the world tree
#[derive(Debug, thiserror::Error)]
pub enum WorldTreeError {
    /// Layers must be registered before the first object is inserted
    #[error("Layer {0} registered after objects were added")]
    LayersLocked(LayerId),

    /// Layer id does not fit in a [`LayerMask`]
    #[error("Layer id {0} is out of range (max {max})", max = LayerId::MAX)]
    LayerOutOfRange(u8),

    /// The tree configuration was rejected
    #[error("Invalid world tree configuration: {0}")]
    InvalidConfig(#[from] crate::config::ConfigError),
}

/// Identifier of a spatial layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerId(u8);

impl LayerId {
    /// Implicit layer containing every object
    pub const ALL: LayerId = LayerId(0);

    /// Highest usable layer id
    pub const MAX: u8 = 31;

    /// Create a layer id
    pub fn new(id: u8) -> TreeResult<Self> {
        if id > Self::MAX {
            return Err(WorldTreeError::LayerOutOfRange(id));
        }
        Ok(Self(id))
    }

    /// Raw layer number
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Mask with only this layer set
    pub fn mask(self) -> LayerMask {
        LayerMask::from_bits_retain(1 << self.0)
    }
}

impl std::fmt::Display for LayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

bitflags! {
    /// Set of layers an object belongs to
    ///
    /// Bit 0 is the implicit all-objects layer and is always considered set.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
    pub struct LayerMask: u32 {
        /// The implicit all-objects layer
        const ALL_OBJECTS = 1;
    }
}

impl LayerMask {
    /// Whether the mask includes `layer`
    pub fn has_layer(self, layer: LayerId) -> bool {
        layer == LayerId::ALL || self.contains(layer.mask())
    }

    /// Mask extended with `layer`
    pub fn with_layer(self, layer: LayerId) -> Self {
        self | layer.mask()
    }
}

/// Index of a node inside one layer tree
pub type NodeIndex = u32;

/// Object stored in a tree node
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TreeEntry<K> {
    /// Key of the stored object
    pub key: K,
    /// Bounds the object had when it was inserted
    pub bounds: Aabb,
}

/// Single node in a layer tree
#[derive(Debug, Clone)]
pub struct TreeNode<K> {
    /// World-space bounds of this node
    pub bounds: Aabb,
    /// Depth in the tree (0 = root)
    pub depth: u32,
    /// Objects stored at this node
    pub entries: Vec<TreeEntry<K>>,
    /// Index of the first child; children are stored contiguously
    first_child: Option<NodeIndex>,
}

impl<K> TreeNode<K> {
    fn new(bounds: Aabb, depth: u32) -> Self {
        Self {
            bounds,
            depth,
            entries: Vec::new(),
            first_child: None,
        }
    }

    /// Check if this node is a leaf (has no children)
    pub fn is_leaf(&self) -> bool {
        self.first_child.is_none()
    }
}

/// Tree of one layer
#[derive(Debug, Clone)]
struct LayerTree<K> {
    nodes: Vec<TreeNode<K>>,
    locations: HashMap<K, NodeIndex>,
}

impl<K: Copy + Eq + Hash> LayerTree<K> {
    fn new(bounds: Aabb) -> Self {
        Self {
            nodes: vec![TreeNode::new(bounds, 0)],
            locations: HashMap::new(),
        }
    }

    fn children(&self, node: &TreeNode<K>, mode: SplitMode) -> std::ops::Range<usize> {
        match node.first_child {
            Some(first) => first as usize..first as usize + mode.child_count(),
            None => 0..0,
        }
    }

    /// Deepest existing node that fully contains `bounds`
    fn find_home(&self, bounds: &Aabb, mode: SplitMode) -> NodeIndex {
        let mut current: NodeIndex = 0;
        loop {
            let node = &self.nodes[current as usize];
            let next = self
                .children(node, mode)
                .find(|&child| self.nodes[child].bounds.contains(bounds));
            match next {
                Some(child) => current = child as NodeIndex,
                None => return current,
            }
        }
    }

    fn insert(&mut self, key: K, bounds: Aabb, config: &WorldTreeConfig) {
        let home = self.find_home(&bounds, config.split_mode);
        self.nodes[home as usize].entries.push(TreeEntry { key, bounds });
        self.locations.insert(key, home);

        let node = &self.nodes[home as usize];
        let should_subdivide = node.is_leaf()
            && node.entries.len() > config.max_objects_per_node
            && node.depth < config.max_depth
            && min_split_extent(&node.bounds, config.split_mode) > config.min_node_size;

        if should_subdivide {
            self.subdivide(home, config.split_mode);
        }
    }

    fn remove(&mut self, key: &K) -> bool {
        let Some(node_index) = self.locations.remove(key) else {
            return false;
        };
        let entries = &mut self.nodes[node_index as usize].entries;
        match entries.iter().position(|e| e.key == *key) {
            Some(position) => {
                entries.swap_remove(position);
                true
            }
            None => {
                log::error!("World tree location table out of sync with node {}", node_index);
                debug_assert!(false, "world tree location table out of sync");
                false
            }
        }
    }

    /// Subdivide a leaf and push down every entry that fits a child
    fn subdivide(&mut self, index: NodeIndex, mode: SplitMode) {
        let (bounds, depth) = {
            let node = &self.nodes[index as usize];
            (node.bounds, node.depth)
        };

        let first_child = self.nodes.len() as NodeIndex;
        for child in 0..mode.child_count() {
            self.nodes.push(TreeNode::new(child_bounds(&bounds, child, mode), depth + 1));
        }
        self.nodes[index as usize].first_child = Some(first_child);

        let entries = std::mem::take(&mut self.nodes[index as usize].entries);
        for entry in entries {
            let target = (first_child as usize..first_child as usize + mode.child_count())
                .find(|&child| self.nodes[child].bounds.contains(&entry.bounds))
                .map_or(index, |child| child as NodeIndex);
            self.nodes[target as usize].entries.push(entry);
            self.locations.insert(entry.key, target);
        }

        log::trace!(
            "World tree node {} split at depth {} ({} children)",
            index,
            depth,
            mode.child_count()
        );
    }
}

/// Smallest half-size along the axes a node splits on
fn min_split_extent(bounds: &Aabb, mode: SplitMode) -> f32 {
    let extents = bounds.extents();
    match mode {
        SplitMode::Quad => extents.x.min(extents.y),
        SplitMode::Oct => extents.x.min(extents.y).min(extents.z),
    }
}

/// Bounds of child `child` of a node
///
/// Child layout uses bit 0 for +X, bit 1 for +Y and bit 2 for +Z.
fn child_bounds(bounds: &Aabb, child: usize, mode: SplitMode) -> Aabb {
    let center = bounds.center();
    let pick = |bit: usize, min: f32, mid: f32, max: f32| {
        if child & bit != 0 { (mid, max) } else { (min, mid) }
    };

    let (min_x, max_x) = pick(1, bounds.min.x, center.x, bounds.max.x);
    let (min_y, max_y) = pick(2, bounds.min.y, center.y, bounds.max.y);
    let (min_z, max_z) = match mode {
        SplitMode::Quad => (bounds.min.z, bounds.max.z),
        SplitMode::Oct => pick(4, bounds.min.z, center.z, bounds.max.z),
    };

    Aabb::new(Vec3::new(min_x, min_y, min_z), Vec3::new(max_x, max_y, max_z))
}

/// Per-layer spatial index of object keys
///
/// `K` is the key type of the owning object store.
pub struct WorldTree<K> {
    config: WorldTreeConfig,
    layers: Vec<Option<LayerTree<K>>>,
    objects: HashMap<K, (Aabb, LayerMask)>,
    stack_pool: RefCell<Vec<Vec<NodeIndex>>>,
}

impl<K: Copy + Eq + Hash> WorldTree<K> {
    /// Create a tree with only the implicit all-objects layer
    pub fn new(config: WorldTreeConfig) -> TreeResult<Self> {
        config.validate()?;
        let mut layers = Vec::with_capacity(LayerId::MAX as usize + 1);
        layers.resize_with(LayerId::MAX as usize + 1, || None);
        layers[LayerId::ALL.index()] = Some(LayerTree::new(config.bounds));

        Ok(Self {
            config,
            layers,
            objects: HashMap::new(),
            stack_pool: RefCell::new(Vec::new()),
        })
    }

    /// Configuration the tree was built with
    pub fn config(&self) -> &WorldTreeConfig {
        &self.config
    }

    /// Register an additional layer
    ///
    /// Only allowed while the tree is empty; registering an existing layer
    /// again is a no-op.
    pub fn register_layer(&mut self, layer: LayerId) -> TreeResult<()> {
        if self.layers[layer.index()].is_some() {
            return Ok(());
        }
        if !self.objects.is_empty() {
            return Err(WorldTreeError::LayersLocked(layer));
        }
        self.layers[layer.index()] = Some(LayerTree::new(self.config.bounds));
        log::debug!("Registered world tree layer {}", layer);
        Ok(())
    }

    /// Whether `layer` has been registered
    pub fn has_layer(&self, layer: LayerId) -> bool {
        self.layers[layer.index()].is_some()
    }

    /// Insert an object, replacing any previous placement of the same key
    pub fn insert(&mut self, key: K, bounds: Aabb, layers: LayerMask) {
        if self.objects.contains_key(&key) {
            self.remove(&key);
        }

        for (index, tree) in self.layers.iter_mut().enumerate() {
            let Some(tree) = tree else { continue };
            if index == LayerId::ALL.index() || layers.bits() & (1 << index) != 0 {
                tree.insert(key, bounds, &self.config);
            }
        }
        self.objects.insert(key, (bounds, layers));
    }

    /// Remove an object from every layer; returns false if it was not present
    pub fn remove(&mut self, key: &K) -> bool {
        if self.objects.remove(key).is_none() {
            return false;
        }
        for tree in self.layers.iter_mut().flatten() {
            tree.remove(key);
        }
        true
    }

    /// Re-insert an object after its bounds or layers changed
    pub fn update(&mut self, key: K, bounds: Aabb, layers: LayerMask) {
        self.insert(key, bounds, layers);
    }

    /// Whether the key is stored
    pub fn contains(&self, key: &K) -> bool {
        self.objects.contains_key(key)
    }

    /// Bounds the object was last inserted with
    pub fn bounds_of(&self, key: &K) -> Option<Aabb> {
        self.objects.get(key).map(|(bounds, _)| *bounds)
    }

    /// Number of stored objects
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the tree stores no objects
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Number of nodes in a layer (0 for unregistered layers)
    pub fn node_count(&self, layer: LayerId) -> usize {
        self.layers[layer.index()].as_ref().map_or(0, |tree| tree.nodes.len())
    }

    /// Depth of the node currently holding `key` in `layer`
    pub fn depth_of(&self, layer: LayerId, key: &K) -> Option<u32> {
        let tree = self.layers[layer.index()].as_ref()?;
        let node = tree.locations.get(key)?;
        Some(tree.nodes[*node as usize].depth)
    }

    /// Remove every object, keeping the registered layers
    pub fn clear(&mut self) {
        for tree in self.layers.iter_mut().flatten() {
            *tree = LayerTree::new(self.config.bounds);
        }
        self.objects.clear();
    }

    /// Walk the nodes of `layer` that may hold objects touching `shape`
    ///
    /// The cursor yields every entry of every visited node; callers still
    /// test each entry against the shape. An unregistered layer yields
    /// nothing.
    pub fn candidates<S: Shape>(&self, layer: LayerId, shape: S) -> TreeCursor<'_, K, S> {
        let tree = self.layers[layer.index()].as_ref();
        let mut stack = self.stack_pool.borrow_mut().pop().unwrap_or_default();
        if tree.is_some() {
            stack.push(0);
        }

        TreeCursor {
            tree,
            mode: self.config.split_mode,
            shape,
            stack,
            pool: &self.stack_pool,
            node: None,
            entry: 0,
        }
    }
}

/// Pull-style traversal over the candidate entries of one layer
pub struct TreeCursor<'a, K, S> {
    tree: Option<&'a LayerTree<K>>,
    mode: SplitMode,
    shape: S,
    stack: Vec<NodeIndex>,
    pool: &'a RefCell<Vec<Vec<NodeIndex>>>,
    node: Option<&'a TreeNode<K>>,
    entry: usize,
}

impl<'a, K: Copy + Eq + Hash, S: Shape> TreeCursor<'a, K, S> {
    /// The query shape the traversal prunes with
    pub fn shape(&self) -> &S {
        &self.shape
    }
}

impl<'a, K: Copy + Eq + Hash, S: Shape> Iterator for TreeCursor<'a, K, S> {
    type Item = &'a TreeEntry<K>;

    fn next(&mut self) -> Option<Self::Item> {
        let tree = self.tree?;
        loop {
            if let Some(node) = self.node {
                if let Some(entry) = node.entries.get(self.entry) {
                    self.entry += 1;
                    return Some(entry);
                }
                self.node = None;
            }

            let index = self.stack.pop()?;
            let node = &tree.nodes[index as usize];
            for child in tree.children(node, self.mode) {
                if self.shape.intersects_aabb(&tree.nodes[child].bounds) {
                    self.stack.push(child as NodeIndex);
                }
            }
            self.node = Some(node);
            self.entry = 0;
        }
    }
}

impl<K, S> Drop for TreeCursor<'_, K, S> {
    fn drop(&mut self) {
        let mut stack = std::mem::take(&mut self.stack);
        stack.clear();
        self.pool.borrow_mut().push(stack);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::shape::{NoShape, Sphere};

    fn config(mode: SplitMode) -> WorldTreeConfig {
        WorldTreeConfig {
            split_mode: mode,
            bounds: Aabb::new(Vec3::new(-100.0, -100.0, -100.0), Vec3::new(100.0, 100.0, 100.0)),
            max_objects_per_node: 4,
            max_depth: 5,
            min_node_size: 1.0,
        }
    }

    fn small_box(x: f32, y: f32, z: f32) -> Aabb {
        Aabb::from_center_extents(Vec3::new(x, y, z), Vec3::new(0.5, 0.5, 0.5))
    }

    fn keys<S: Shape>(tree: &WorldTree<u32>, layer: LayerId, shape: S) -> Vec<u32> {
        let mut keys: Vec<u32> = tree
            .candidates(layer, &shape)
            .filter(|e| shape.intersects_aabb(&e.bounds))
            .map(|e| e.key)
            .collect();
        keys.sort_unstable();
        keys
    }

    #[test]
    fn test_tree_basic_insertion() {
        let mut tree = WorldTree::new(config(SplitMode::Oct)).unwrap();
        tree.insert(1u32, small_box(0.0, 0.0, 0.0), LayerMask::empty());
        assert_eq!(tree.len(), 1);
        assert!(tree.contains(&1));
    }

    #[test]
    fn test_tree_subdivision_pushes_entries_down() {
        let mut tree = WorldTree::new(config(SplitMode::Oct)).unwrap();
        for i in 0..10u32 {
            let offset = i as f32;
            tree.insert(i, small_box(50.0 + offset, 50.0, 50.0), LayerMask::empty());
        }

        assert_eq!(tree.len(), 10);
        assert!(tree.node_count(LayerId::ALL) > 1);
        assert!(tree.depth_of(LayerId::ALL, &0).unwrap() > 0);
    }

    #[test]
    fn test_straddling_object_stays_at_root() {
        let mut tree = WorldTree::new(config(SplitMode::Quad)).unwrap();
        for i in 0..6u32 {
            tree.insert(i, small_box(-50.0 + i as f32, -50.0, 0.0), LayerMask::empty());
        }
        tree.insert(99, small_box(0.0, 0.0, 0.0), LayerMask::empty());
        assert_eq!(tree.depth_of(LayerId::ALL, &99), Some(0));
    }

    #[test]
    fn test_out_of_bounds_object_is_still_found() {
        let mut tree = WorldTree::new(config(SplitMode::Oct)).unwrap();
        for i in 0..8u32 {
            tree.insert(i, small_box(10.0 + i as f32, 10.0, 10.0), LayerMask::empty());
        }
        tree.insert(42, small_box(500.0, 0.0, 0.0), LayerMask::empty());

        let found = keys(&tree, LayerId::ALL, Sphere::new(Vec3::new(500.0, 0.0, 0.0), 2.0));
        assert_eq!(found, vec![42]);
    }

    #[test]
    fn test_sphere_query_matches_brute_force() {
        let mut tree = WorldTree::new(config(SplitMode::Oct)).unwrap();
        let mut boxes = Vec::new();
        for i in 0..200u32 {
            let x = ((i * 37) % 180) as f32 - 90.0;
            let y = ((i * 53) % 180) as f32 - 90.0;
            let z = ((i * 71) % 180) as f32 - 90.0;
            let bounds = small_box(x, y, z);
            boxes.push((i, bounds));
            tree.insert(i, bounds, LayerMask::empty());
        }

        let query = Sphere::new(Vec3::new(10.0, -20.0, 5.0), 40.0);
        let mut expected: Vec<u32> = boxes
            .iter()
            .filter(|(_, b)| query.intersects_aabb(b))
            .map(|(k, _)| *k)
            .collect();
        expected.sort_unstable();

        assert_eq!(keys(&tree, LayerId::ALL, query), expected);
    }

    #[test]
    fn test_remove_and_update() {
        let mut tree = WorldTree::new(config(SplitMode::Oct)).unwrap();
        tree.insert(1u32, small_box(0.0, 0.0, 0.0), LayerMask::empty());
        tree.update(1, small_box(80.0, 80.0, 80.0), LayerMask::empty());

        assert!(keys(&tree, LayerId::ALL, Sphere::new(Vec3::zeros(), 2.0)).is_empty());
        assert_eq!(keys(&tree, LayerId::ALL, Sphere::new(Vec3::new(80.0, 80.0, 80.0), 2.0)), vec![1]);

        assert!(tree.remove(&1));
        assert!(!tree.remove(&1));
        assert!(tree.is_empty());
    }

    #[test]
    fn test_layers_must_be_registered_first() {
        let mut tree = WorldTree::new(config(SplitMode::Oct)).unwrap();
        let layer = LayerId::new(3).unwrap();
        tree.register_layer(layer).unwrap();
        tree.insert(1u32, small_box(0.0, 0.0, 0.0), layer.mask());
        tree.insert(2u32, small_box(1.0, 0.0, 0.0), LayerMask::empty());

        assert_eq!(keys(&tree, layer, NoShape), vec![1]);
        assert_eq!(keys(&tree, LayerId::ALL, NoShape), vec![1, 2]);

        let late = LayerId::new(4).unwrap();
        assert!(matches!(tree.register_layer(late), Err(WorldTreeError::LayersLocked(_))));
        assert!(keys(&tree, late, NoShape).is_empty());
    }

    #[test]
    fn test_layer_id_range() {
        assert!(LayerId::new(31).is_ok());
        assert!(LayerId::new(32).is_err());
    }

    #[test]
    fn test_cursor_stacks_are_pooled() {
        let mut tree = WorldTree::new(config(SplitMode::Quad)).unwrap();
        tree.insert(1u32, small_box(0.0, 0.0, 0.0), LayerMask::empty());
        for _ in 0..3 {
            assert_eq!(tree.candidates(LayerId::ALL, NoShape).count(), 1);
        }
        assert_eq!(tree.stack_pool.borrow().len(), 1);
    }
}
