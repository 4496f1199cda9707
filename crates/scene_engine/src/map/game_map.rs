//! # Game Map
//!
//! Owns every object of one map, indexes the initialized ones for queries
//! and drives their initialization with cooperative routines.
//!
//! ## Lifecycle
//!
//! ```text
//! Uninitialized ──init──> LoadingObjects ──(queue drained)──> Initialized
//! ```
//!
//! `add_object` only queues. The [`LoadPendingObjects`] routine starts up to
//! `load_budget_per_tick` queued objects per tick and waits for an object's
//! asynchronous components before starting the next one, spreading bulk
//! loads over several frames. Removal is immediate: a removed object is
//! never returned by a later query, and a queued object removed before the
//! loader reached it is never initialized.
//!
//! [`GameMap::update`] runs the routines and then updates every alive
//! object. Dropping a map tears down the objects it still holds.

use std::collections::{HashMap, VecDeque};

use slotmap::SlotMap;

use super::object::{GameObject, InitState, ObjectId, ObjectKey, ObjectRenderData, ObjectState};
use super::query::{ObjectIndex, ObjectQuery};
use super::routine::{Routine, RoutineHandle, RoutineStatus, Scheduler};
use super::storage::{MapDocument, MapStorage, ObjectRecord, MAP_FORMAT_VERSION};
use super::{MapError, MapResult};
use crate::config::{EngineConfig, MapConfig, WorldTreeConfig};
use crate::foundation::math::Transform;
use crate::render::scene_renderer::MeshEntityBatchRenderer;
use crate::world::{Aabb, LayerId, Shape};

/// Loading progress of a map
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapState {
    /// `init` not called yet; added objects wait in the queue
    Uninitialized,
    /// Initial objects are being loaded
    LoadingObjects,
    /// Initial load finished
    Initialized,
}

/// Observer of objects joining and leaving a map
pub trait MapListener {
    /// `object` finished initialization and joined the map
    fn object_added(&mut self, _object: &GameObject) {}

    /// `object` was removed and torn down
    fn object_removed(&mut self, _object: &GameObject) {}
}

/// Object storage and indexing shared with map routines
pub struct MapCore {
    name: String,
    config: MapConfig,
    state: MapState,
    objects: SlotMap<ObjectKey, GameObject>,
    ids: HashMap<ObjectId, ObjectKey>,
    pending: VecDeque<ObjectKey>,
    index: ObjectIndex,
    listeners: Vec<Box<dyn MapListener>>,
}

impl MapCore {
    /// Map name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Map configuration
    pub fn config(&self) -> &MapConfig {
        &self.config
    }

    /// Loading progress
    pub fn state(&self) -> MapState {
        self.state
    }

    /// Number of objects, initialized or not
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the map holds no objects
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Objects waiting for the loader
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Objects visible to queries
    pub fn live_count(&self) -> usize {
        self.index.len()
    }

    /// Object by id
    pub fn object(&self, id: ObjectId) -> Option<&GameObject> {
        self.ids.get(&id).and_then(|key| self.objects.get(*key))
    }

    /// Mutable object by id
    ///
    /// Use [`GameMap::set_object_bounds`] to move an object so the spatial
    /// index stays in sync.
    pub fn object_mut(&mut self, id: ObjectId) -> Option<&mut GameObject> {
        let key = *self.ids.get(&id)?;
        self.objects.get_mut(key)
    }

    /// Every object in storage order
    pub fn objects(&self) -> impl Iterator<Item = &GameObject> {
        self.objects.values()
    }

    /// Alive object called `name`; the oldest wins when names repeat
    ///
    /// `include_non_spawned` also considers objects stored unspawned.
    pub fn object_by_name(&self, name: &str, include_non_spawned: bool) -> Option<&GameObject> {
        self.objects
            .values()
            .filter(|object| object.name() == name)
            .filter(|object| match object.state() {
                ObjectState::Alive => true,
                ObjectState::ConditionallyNonSpawned => include_non_spawned,
                ObjectState::Loading | ObjectState::Destroyed => false,
            })
            .min_by_key(|object| object.id())
    }

    /// Whether `layer` can be queried
    pub fn has_layer(&self, layer: LayerId) -> bool {
        self.index.has_layer(layer)
    }

    /// Start a query over initialized objects
    pub fn query(&self) -> ObjectQuery<'_> {
        ObjectQuery::new(&self.objects, &self.index)
    }

    fn begin_object_init(&mut self, key: ObjectKey) -> Option<InitState> {
        let object = self.objects.get_mut(key)?;
        let state = object.begin_init(&mut self.index);
        if state == InitState::Initialized {
            self.notify_added(key);
        }
        Some(state)
    }

    fn poll_object_init(&mut self, key: ObjectKey) -> Option<InitState> {
        let object = self.objects.get_mut(key)?;
        let state = object.poll_init(&mut self.index);
        if state == InitState::Initialized {
            self.notify_added(key);
        }
        Some(state)
    }

    fn notify_added(&mut self, key: ObjectKey) {
        if let Some(object) = self.objects.get(key) {
            for listener in &mut self.listeners {
                listener.object_added(object);
            }
        }
    }
}

/// Routine draining the map's object queue
#[derive(Debug, Default)]
pub struct LoadPendingObjects {
    current: Option<ObjectKey>,
}

impl LoadPendingObjects {
    /// Create the loader
    pub fn new() -> Self {
        Self::default()
    }
}

impl Routine<MapCore> for LoadPendingObjects {
    fn resume(&mut self, map: &mut MapCore) -> RoutineStatus {
        let mut started = 0;
        loop {
            if let Some(key) = self.current {
                if map.poll_object_init(key) == Some(InitState::InitializingAsync) {
                    return RoutineStatus::Yield;
                }
                self.current = None;
            }

            if started >= map.config.load_budget_per_tick {
                return RoutineStatus::Yield;
            }

            let Some(key) = map.pending.pop_front() else {
                if map.state == MapState::LoadingObjects {
                    map.state = MapState::Initialized;
                    log::info!("Map '{}' loaded ({} objects)", map.name, map.objects.len());
                }
                return RoutineStatus::Yield;
            };

            match map.begin_object_init(key) {
                // Removed while queued
                None => continue,
                Some(InitState::InitializingAsync) => self.current = Some(key),
                Some(_) => {}
            }
            started += 1;
        }
    }

    fn name(&self) -> &str {
        "load_pending_objects"
    }
}

/// A map of game objects
pub struct GameMap {
    core: MapCore,
    scheduler: Scheduler<MapCore>,
    loader: Option<RoutineHandle>,
}

impl GameMap {
    /// Create an empty map
    pub fn new(name: impl Into<String>, config: MapConfig, tree_config: WorldTreeConfig) -> MapResult<Self> {
        config.validate()?;
        let index = ObjectIndex::new(config.use_world_tree, tree_config)?;
        let name = name.into();
        log::debug!(
            "Created map '{}' ({})",
            name,
            if config.use_world_tree { "world tree" } else { "flat list" }
        );

        Ok(Self {
            core: MapCore {
                name,
                config,
                state: MapState::Uninitialized,
                objects: SlotMap::with_key(),
                ids: HashMap::new(),
                pending: VecDeque::new(),
                index,
                listeners: Vec::new(),
            },
            scheduler: Scheduler::new(),
            loader: None,
        })
    }

    /// Create a map from the engine configuration
    pub fn from_engine_config(name: impl Into<String>, config: &EngineConfig) -> MapResult<Self> {
        Self::new(name, config.map.clone(), config.world_tree.clone())
    }

    /// Storage and query side of the map
    pub fn core(&self) -> &MapCore {
        &self.core
    }

    /// Map name
    pub fn name(&self) -> &str {
        self.core.name()
    }

    /// Loading progress
    pub fn state(&self) -> MapState {
        self.core.state()
    }

    /// Number of objects, initialized or not
    pub fn len(&self) -> usize {
        self.core.len()
    }

    /// Whether the map holds no objects
    pub fn is_empty(&self) -> bool {
        self.core.is_empty()
    }

    /// Object by id
    pub fn object(&self, id: ObjectId) -> Option<&GameObject> {
        self.core.object(id)
    }

    /// Mutable object by id
    pub fn object_mut(&mut self, id: ObjectId) -> Option<&mut GameObject> {
        self.core.object_mut(id)
    }

    /// Start a query over initialized objects
    pub fn query(&self) -> ObjectQuery<'_> {
        self.core.query()
    }

    /// Alive object called `name`, see [`MapCore::object_by_name`]
    pub fn object_by_name(&self, name: &str, include_non_spawned: bool) -> Option<&GameObject> {
        self.core.object_by_name(name, include_non_spawned)
    }

    /// Be told about objects joining and leaving the map
    pub fn register_listener(&mut self, listener: Box<dyn MapListener>) {
        self.core.listeners.push(listener);
    }

    /// Register a spatial layer; only allowed before objects are indexed
    pub fn register_layer(&mut self, layer: LayerId) -> MapResult<()> {
        self.core.index.register_layer(layer)
    }

    /// Begin loading queued objects
    pub fn init(&mut self) {
        if self.core.state != MapState::Uninitialized {
            log::warn!("Map '{}' initialized twice", self.core.name);
            return;
        }
        self.core.state = MapState::LoadingObjects;
        self.loader = Some(self.scheduler.start(LoadPendingObjects::new()));
        log::info!("Loading map '{}' ({} queued objects)", self.core.name, self.core.pending.len());
    }

    /// Run one tick of every map routine; returns how many finished
    pub fn tick(&mut self) -> usize {
        self.scheduler.tick(&mut self.core)
    }

    /// Tick routines, then update every alive object by `dt` seconds
    ///
    /// Objects whose behaviour moved their render data get new bounds and
    /// are re-indexed. Returns how many routines finished.
    pub fn update(&mut self, dt: f32) -> usize {
        let finished = self.tick();

        let core = &mut self.core;
        for (key, object) in core.objects.iter_mut() {
            if object.state() != ObjectState::Alive || !object.update(dt) {
                continue;
            }
            if let Some(bounds) = object.render_data().map(ObjectRenderData::world_bounds) {
                object.set_bounds(bounds);
                core.index.update(key, bounds, object.layers());
            }
        }
        finished
    }

    /// Tear down every object and stop every routine
    ///
    /// Objects are removed in id order, so listeners see the same order
    /// objects were added in. The map is left empty and `Uninitialized`.
    pub fn dispose(&mut self) {
        let mut ids: Vec<ObjectId> = self.core.ids.keys().copied().collect();
        ids.sort_unstable();
        for id in &ids {
            self.remove_object(*id);
        }

        self.core.pending.clear();
        self.scheduler = Scheduler::new();
        self.loader = None;
        self.core.state = MapState::Uninitialized;
        log::info!("Disposed map '{}' ({} objects)", self.core.name, ids.len());
    }

    /// Start an additional routine over the map
    pub fn start_routine(&mut self, routine: impl Routine<MapCore> + 'static) -> RoutineHandle {
        self.scheduler.start(routine)
    }

    /// Whether a routine started on this map is still running
    pub fn is_routine_running(&self, handle: RoutineHandle) -> bool {
        self.scheduler.is_running(handle)
    }

    /// Queue an object for loading and return its id
    pub fn add_object(&mut self, mut object: GameObject) -> ObjectId {
        if !object.id().is_assigned() || self.core.ids.contains_key(&object.id()) {
            object.assign_id(ObjectId::next());
        }
        let id = object.id();

        let key = self.core.objects.insert_with_key(|key| {
            object.key = key;
            object
        });
        self.core.ids.insert(id, key);
        self.core.pending.push_back(key);
        log::trace!("Queued object {} in map '{}'", id, self.core.name);
        id
    }

    /// Remove an object immediately
    ///
    /// Tears down components if initialization had begun. Listeners hear
    /// about the removal only if they heard about the object joining.
    /// Returns false for unknown or already removed ids.
    pub fn remove_object(&mut self, id: ObjectId) -> bool {
        let Some(key) = self.core.ids.remove(&id) else {
            return false;
        };
        self.core.index.remove(key);
        if let Some(mut object) = self.core.objects.remove(key) {
            let announced = object.is_initialized();
            object.done();
            if announced {
                for listener in &mut self.core.listeners {
                    listener.object_removed(&object);
                }
            }
            log::trace!("Removed object {} '{}'", id, object.name());
        }
        true
    }

    /// Move an object, keeping the spatial index in sync
    pub fn set_object_bounds(&mut self, id: ObjectId, bounds: Aabb) -> bool {
        let Some(&key) = self.core.ids.get(&id) else {
            return false;
        };
        let Some(object) = self.core.objects.get_mut(key) else {
            return false;
        };
        object.set_bounds(bounds);
        self.core.index.update(key, bounds, object.layers());
        true
    }

    /// Place an object's render data and derive its bounds from it
    pub fn set_object_transform(&mut self, id: ObjectId, transform: Transform) -> bool {
        let bounds = match self.core.object_mut(id).and_then(GameObject::render_data_mut) {
            Some(render) => {
                render.transform = transform;
                render.world_bounds()
            }
            None => return false,
        };
        self.set_object_bounds(id, bounds)
    }

    /// Submit every alive, drawable object touching `shape` in `layer`
    ///
    /// Returns the number of objects submitted.
    pub fn submit_visible<S: Shape + Clone>(
        &self,
        renderer: &mut MeshEntityBatchRenderer,
        layer: LayerId,
        shape: S,
    ) -> usize {
        let mut submitted = 0;
        for object in self.query().layer(layer).state(ObjectState::Alive).in_shape(shape).iter() {
            if let Some(render) = object.render_data() {
                renderer.submit_object_for_rendering(render);
                submitted += 1;
            }
        }
        submitted
    }

    /// Save every object through `storage`
    pub fn save(&self, storage: &mut dyn MapStorage, name: &str) -> MapResult<()> {
        let mut objects: Vec<&GameObject> = self.core.objects.values().collect();
        objects.sort_by_key(|object| object.id());

        let document = MapDocument {
            version: MAP_FORMAT_VERSION,
            name: self.core.name.clone(),
            objects: objects.into_iter().map(ObjectRecord::from_object).collect(),
        };
        let bytes = document.to_bytes()?;
        if !storage.save(name, &bytes) {
            log::error!("Saving map '{}' as '{}' failed", self.core.name, name);
            return Err(MapError::SaveFailed(name.to_string()));
        }
        log::info!("Saved map '{}' as '{}' ({} objects)", self.core.name, name, document.objects.len());
        Ok(())
    }

    /// Queue every object of a saved map; returns how many were queued
    pub fn load(&mut self, storage: &dyn MapStorage, name: &str) -> MapResult<usize> {
        self.load_with(storage, name, ObjectRecord::to_object)
    }

    /// Like [`load`](Self::load), building objects with `factory`
    ///
    /// The document is parsed completely before anything is queued, so a
    /// broken document leaves the map unchanged.
    pub fn load_with<F>(&mut self, storage: &dyn MapStorage, name: &str, mut factory: F) -> MapResult<usize>
    where
        F: FnMut(&ObjectRecord) -> GameObject,
    {
        let document = storage
            .load(name)
            .ok_or_else(|| MapError::NotFound(name.to_string()))
            .and_then(|bytes| MapDocument::from_bytes(&bytes))
            .map_err(|e| {
                log::error!("Loading map '{}' failed: {}", name, e);
                e
            })?;

        for record in &document.objects {
            self.add_object(factory(record));
        }
        log::info!("Queued {} objects from '{}'", document.objects.len(), name);
        Ok(document.objects.len())
    }
}

impl Drop for GameMap {
    fn drop(&mut self) {
        if !self.core.objects.is_empty() {
            self.dispose();
        }
    }
}

impl std::fmt::Debug for GameMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameMap")
            .field("name", &self.core.name)
            .field("state", &self.core.state)
            .field("objects", &self.core.objects.len())
            .field("pending", &self.core.pending.len())
            .field("routines", &self.scheduler)
            .finish()
    }
}
