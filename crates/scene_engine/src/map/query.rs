//! Map query engine
//!
//! A query is built from three filters applied cheapest first:
//!
//! 1. object state (`None` matches every state)
//! 2. type ([`AnyType`], [`OfKind`], [`OfBehavior`])
//! 3. shape, tested against the object bounds ([`NoShape`] matches all)
//!
//! Candidates come from the world tree of the queried layer, pruned by the
//! shape, or from the flat object list when the map runs without a tree.
//! Every query can be consumed three ways: pulled lazily through
//! [`ObjectQuery::iter`], filled into a caller-owned list with
//! [`ObjectQuery::collect_into`], or pushed into an [`ObjectVisitor`].

use std::collections::HashSet;
use std::marker::PhantomData;

use slotmap::SlotMap;

use super::object::{GameObject, ObjectAdapter, ObjectBehavior, ObjectId, ObjectKey, ObjectKind, ObjectState};
use super::MapResult;
use crate::config::WorldTreeConfig;
use crate::world::{Aabb, LayerId, LayerMask, NoShape, Shape, TreeCursor, WorldTree};

/// Type part of a query
pub trait TypeFilter {
    /// Whether `object` passes
    fn matches(&self, object: &GameObject) -> bool;
}

/// Matches every object
#[derive(Debug, Clone, Copy, Default)]
pub struct AnyType;

impl TypeFilter for AnyType {
    #[inline]
    fn matches(&self, _object: &GameObject) -> bool {
        true
    }
}

/// Matches objects with the given kind tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfKind(pub ObjectKind);

impl TypeFilter for OfKind {
    fn matches(&self, object: &GameObject) -> bool {
        *object.kind() == self.0
    }
}

/// Matches objects whose behaviour is a `T`
pub struct OfBehavior<T>(PhantomData<fn() -> T>);

impl<T> OfBehavior<T> {
    /// Filter for behaviour type `T`
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for OfBehavior<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ObjectBehavior> TypeFilter for OfBehavior<T> {
    fn matches(&self, object: &GameObject) -> bool {
        object.behavior::<T>().is_some()
    }
}

/// Push-style consumer of query results
pub trait ObjectVisitor {
    /// Called for every matching object
    fn visit(&mut self, object: &GameObject);
}

impl<F: FnMut(&GameObject)> ObjectVisitor for F {
    fn visit(&mut self, object: &GameObject) {
        self(object)
    }
}

/// Options of the legacy appending query path
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryOptions {
    /// Skip ids already present in the output list
    pub unique: bool,
}

/// Where live objects are indexed
pub(crate) enum ObjectIndex {
    Tree(WorldTree<ObjectKey>),
    Flat {
        keys: Vec<ObjectKey>,
        members: HashSet<ObjectKey>,
        layers: LayerMask,
    },
}

impl ObjectIndex {
    pub(crate) fn new(use_world_tree: bool, tree_config: WorldTreeConfig) -> MapResult<Self> {
        if use_world_tree {
            Ok(Self::Tree(WorldTree::new(tree_config)?))
        } else {
            Ok(Self::Flat {
                keys: Vec::new(),
                members: HashSet::new(),
                layers: LayerMask::ALL_OBJECTS,
            })
        }
    }

    pub(crate) fn register_layer(&mut self, layer: LayerId) -> MapResult<()> {
        match self {
            Self::Tree(tree) => tree.register_layer(layer)?,
            Self::Flat { layers, .. } => *layers = layers.with_layer(layer),
        }
        Ok(())
    }

    pub(crate) fn has_layer(&self, layer: LayerId) -> bool {
        match self {
            Self::Tree(tree) => tree.has_layer(layer),
            Self::Flat { layers, .. } => layers.has_layer(layer),
        }
    }

    pub(crate) fn insert(&mut self, key: ObjectKey, bounds: Aabb, layers: LayerMask) {
        match self {
            Self::Tree(tree) => tree.insert(key, bounds, layers),
            Self::Flat { keys, members, .. } => {
                if members.insert(key) {
                    keys.push(key);
                }
            }
        }
    }

    pub(crate) fn remove(&mut self, key: ObjectKey) -> bool {
        match self {
            Self::Tree(tree) => tree.remove(&key),
            Self::Flat { keys, members, .. } => {
                if !members.remove(&key) {
                    return false;
                }
                if let Some(position) = keys.iter().position(|k| *k == key) {
                    keys.remove(position);
                }
                true
            }
        }
    }

    /// Re-insert an indexed object under new bounds; unindexed keys are left alone
    pub(crate) fn update(&mut self, key: ObjectKey, bounds: Aabb, layers: LayerMask) {
        match self {
            Self::Tree(tree) => {
                if tree.contains(&key) {
                    tree.update(key, bounds, layers);
                }
            }
            // Flat candidates are not spatial
            Self::Flat { .. } => {}
        }
    }

    pub(crate) fn contains(&self, key: ObjectKey) -> bool {
        match self {
            Self::Tree(tree) => tree.contains(&key),
            Self::Flat { members, .. } => members.contains(&key),
        }
    }

    pub(crate) fn len(&self) -> usize {
        match self {
            Self::Tree(tree) => tree.len(),
            Self::Flat { keys, .. } => keys.len(),
        }
    }

    fn candidates<S: Shape>(&self, layer: LayerId, shape: S) -> Candidates<'_, S> {
        if !self.has_layer(layer) {
            return Candidates::Empty;
        }
        match self {
            Self::Tree(tree) => Candidates::Tree(tree.candidates(layer, shape)),
            Self::Flat { keys, .. } => Candidates::Flat(keys.iter()),
        }
    }
}

impl ObjectAdapter for ObjectIndex {
    fn object_ready(&mut self, object: &GameObject) {
        self.insert(object.key, object.bounds(), object.layers());
    }
}

enum Candidates<'a, S> {
    Tree(TreeCursor<'a, ObjectKey, S>),
    Flat(std::slice::Iter<'a, ObjectKey>),
    Empty,
}

impl<S: Shape> Candidates<'_, S> {
    fn next_key(&mut self) -> Option<ObjectKey> {
        match self {
            Self::Tree(cursor) => cursor.next().map(|entry| entry.key),
            Self::Flat(keys) => keys.next().copied(),
            Self::Empty => None,
        }
    }

    fn is_flat(&self) -> bool {
        matches!(self, Self::Flat(_))
    }
}

/// A query over the live objects of a map
pub struct ObjectQuery<'a, T = AnyType, S = NoShape> {
    objects: &'a SlotMap<ObjectKey, GameObject>,
    index: &'a ObjectIndex,
    layer: LayerId,
    state: Option<ObjectState>,
    type_filter: T,
    shape: S,
}

impl<'a> ObjectQuery<'a> {
    pub(crate) fn new(objects: &'a SlotMap<ObjectKey, GameObject>, index: &'a ObjectIndex) -> Self {
        Self {
            objects,
            index,
            layer: LayerId::ALL,
            state: None,
            type_filter: AnyType,
            shape: NoShape,
        }
    }
}

impl<'a, T, S> ObjectQuery<'a, T, S> {
    /// Search only `layer`
    pub fn layer(mut self, layer: LayerId) -> Self {
        self.layer = layer;
        self
    }

    /// Only objects in `state`
    pub fn state(mut self, state: ObjectState) -> Self {
        self.state = Some(state);
        self
    }

    /// Only objects passing `type_filter`
    pub fn of_type<T2: TypeFilter>(self, type_filter: T2) -> ObjectQuery<'a, T2, S> {
        ObjectQuery {
            objects: self.objects,
            index: self.index,
            layer: self.layer,
            state: self.state,
            type_filter,
            shape: self.shape,
        }
    }

    /// Only objects whose bounds touch `shape`
    pub fn in_shape<S2: Shape>(self, shape: S2) -> ObjectQuery<'a, T, S2> {
        ObjectQuery {
            objects: self.objects,
            index: self.index,
            layer: self.layer,
            state: self.state,
            type_filter: self.type_filter,
            shape,
        }
    }
}

impl<'a, T: TypeFilter, S: Shape + Clone> ObjectQuery<'a, T, S> {
    #[inline]
    fn matches(&self, object: &GameObject) -> bool {
        if let Some(state) = self.state {
            if object.state() != state {
                return false;
            }
        }
        self.type_filter.matches(object) && self.shape.intersects_aabb(&object.bounds())
    }

    /// Lazy iterator over matching objects
    pub fn iter(self) -> ObjectQueryIter<'a, T, S> {
        let candidates = self.index.candidates(self.layer, self.shape.clone());
        ObjectQueryIter { query: self, candidates }
    }

    /// Clear `out` and fill it with the ids of matching objects
    pub fn collect_into(self, out: &mut Vec<ObjectId>) -> usize {
        out.clear();
        out.extend(self.iter().map(GameObject::id));
        out.len()
    }

    /// Call `visitor` for every matching object; returns the match count
    pub fn visit<V: ObjectVisitor + ?Sized>(self, visitor: &mut V) -> usize {
        let mut count = 0;
        for object in self.iter() {
            visitor.visit(object);
            count += 1;
        }
        count
    }

    /// Number of matching objects
    pub fn count(self) -> usize {
        self.iter().count()
    }

    /// Append matching ids to `out` without clearing it
    ///
    /// With `unique` set, ids already in `out` are skipped with a linear
    /// scan per result.
    #[deprecated(note = "use `collect_into`; chained queries should not rely on deduplication")]
    pub fn append_into(self, out: &mut Vec<ObjectId>, options: QueryOptions) -> usize {
        let before = out.len();
        for object in self.iter() {
            let id = object.id();
            if options.unique && out.contains(&id) {
                continue;
            }
            out.push(id);
        }
        out.len() - before
    }
}

/// Pull iterator returned by [`ObjectQuery::iter`]
pub struct ObjectQueryIter<'a, T, S> {
    query: ObjectQuery<'a, T, S>,
    candidates: Candidates<'a, S>,
}

impl<'a, T: TypeFilter, S: Shape + Clone> Iterator for ObjectQueryIter<'a, T, S> {
    type Item = &'a GameObject;

    fn next(&mut self) -> Option<Self::Item> {
        let flat = self.candidates.is_flat();
        while let Some(key) = self.candidates.next_key() {
            let Some(object) = self.query.objects.get(key) else {
                continue;
            };
            if flat && !object.layers().has_layer(self.query.layer) {
                continue;
            }
            if self.query.matches(object) {
                return Some(object);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Vec3;
    use crate::world::Sphere;
    use std::any::Any;

    struct Door;

    impl ObjectBehavior for Door {
        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    fn cube(x: f32) -> Aabb {
        Aabb::from_center_extents(Vec3::new(x, 0.0, 0.0), Vec3::repeat(0.5))
    }

    struct Fixture {
        objects: SlotMap<ObjectKey, GameObject>,
        index: ObjectIndex,
    }

    impl Fixture {
        fn new(use_tree: bool) -> Self {
            let mut index = ObjectIndex::new(use_tree, WorldTreeConfig::default()).unwrap();
            index.register_layer(LayerId::new(3).unwrap()).unwrap();
            let mut fixture = Self {
                objects: SlotMap::with_key(),
                index,
            };

            let layer3 = LayerMask::ALL_OBJECTS.with_layer(LayerId::new(3).unwrap());
            fixture.add(GameObject::new("rock", ObjectKind::Prop, cube(0.0)));
            fixture.add(GameObject::new("door", ObjectKind::Actor, cube(10.0)).with_behavior(Door));
            fixture.add(GameObject::new("guard", ObjectKind::Actor, cube(20.0)).with_layers(layer3));
            fixture.add(GameObject::new("zone", ObjectKind::Trigger, cube(30.0)).non_spawned());
            fixture
        }

        fn add(&mut self, mut object: GameObject) {
            let key = self.objects.insert_with_key(|key| {
                object.key = key;
                object
            });
            self.objects[key].begin_init(&mut self.index);
        }

        fn query(&self) -> ObjectQuery<'_> {
            ObjectQuery::new(&self.objects, &self.index)
        }
    }

    fn names<'a>(objects: impl Iterator<Item = &'a GameObject>) -> Vec<String> {
        let mut names: Vec<String> = objects.map(|o| o.name().to_string()).collect();
        names.sort();
        names
    }

    #[test]
    fn test_filter_combinations() {
        for use_tree in [true, false] {
            let f = Fixture::new(use_tree);

            assert_eq!(f.query().count(), 4);
            assert_eq!(f.query().state(ObjectState::Alive).count(), 3);
            assert_eq!(
                names(f.query().of_type(OfKind(ObjectKind::Actor)).iter()),
                vec!["door", "guard"]
            );
            assert_eq!(
                names(f.query().in_shape(Sphere::new(Vec3::new(15.0, 0.0, 0.0), 6.0)).iter()),
                vec!["door", "guard"]
            );
            assert_eq!(
                names(
                    f.query()
                        .of_type(OfBehavior::<Door>::new())
                        .in_shape(Sphere::new(Vec3::new(15.0, 0.0, 0.0), 6.0))
                        .iter()
                ),
                vec!["door"]
            );
        }
    }

    #[test]
    fn test_layer_queries() {
        for use_tree in [true, false] {
            let f = Fixture::new(use_tree);
            assert_eq!(names(f.query().layer(LayerId::new(3).unwrap()).iter()), vec!["guard"]);
            assert_eq!(f.query().layer(LayerId::new(7).unwrap()).count(), 0);
        }
    }

    #[test]
    fn test_collect_into_clears_and_visit_counts() {
        let f = Fixture::new(true);
        let mut ids = vec![ObjectId::UNASSIGNED];
        assert_eq!(f.query().of_type(OfKind(ObjectKind::Prop)).collect_into(&mut ids), 1);
        assert_eq!(ids.len(), 1);
        assert_ne!(ids[0], ObjectId::UNASSIGNED);

        let mut seen = Vec::new();
        let count = f.query().state(ObjectState::Alive).visit(&mut |o: &GameObject| seen.push(o.id()));
        assert_eq!(count, 3);
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn test_index_membership_and_moves() {
        for use_tree in [true, false] {
            let mut f = Fixture::new(use_tree);
            let rock = f.objects.iter().find(|(_, o)| o.name() == "rock").map(|(k, _)| k).unwrap();
            let before = f.index.len();

            f.index.insert(rock, cube(0.0), LayerMask::ALL_OBJECTS);
            assert_eq!(f.index.len(), before);

            f.objects[rock].set_bounds(cube(50.0));
            f.index.update(rock, cube(50.0), LayerMask::ALL_OBJECTS);
            let far = Sphere::new(Vec3::new(50.0, 0.0, 0.0), 1.0);
            assert_eq!(f.query().in_shape(far).count(), 1);
            assert_eq!(f.index.len(), before);

            assert!(f.index.remove(rock));
            assert!(!f.index.remove(rock));
            assert!(!f.index.contains(rock));
            assert_eq!(f.index.len(), before - 1);
        }
    }

    #[test]
    #[allow(deprecated)]
    fn test_legacy_unique_append() {
        let f = Fixture::new(true);
        let mut ids = Vec::new();
        f.query().of_type(OfKind(ObjectKind::Actor)).append_into(&mut ids, QueryOptions::default());
        f.query().in_shape(cube(10.0)).append_into(&mut ids, QueryOptions::default());
        assert_eq!(ids.len(), 3);

        ids.clear();
        f.query().of_type(OfKind(ObjectKind::Actor)).append_into(&mut ids, QueryOptions { unique: true });
        let added = f.query().in_shape(cube(10.0)).append_into(&mut ids, QueryOptions { unique: true });
        assert_eq!(added, 0);
        assert_eq!(ids.len(), 2);
    }
}
