//! Game objects and their initialization state machine
//!
//! ```text
//! Uninitialized ──begin_init──> Initializing ──(pending components)──> InitializingAsync
//!                                    │                                       │ poll_init
//!                                    └──────────────> finalize <─────────────┘
//!                                                         │
//!                                         on_init hook, Loading -> Alive,
//!                                         adapter.object_ready (indexing)
//! ```
//!
//! An object only becomes visible to queries once the adapter has been
//! notified, so half-initialized objects never show up in results.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::component::{CompletionFlag, Component, ComponentInit};
use crate::foundation::math::{Mat4, Transform, Vec3, Vec4};
use crate::render::instance::{ObjectFlags, Renderable};
use crate::render::mesh::{EntityModel, MetaState};
use crate::world::{Aabb, LayerMask};

slotmap::new_key_type! {
    /// Storage key of an object inside its map
    pub struct ObjectKey;
}

/// Process-unique object identifier
///
/// Ids are handed out by a monotonic counter and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(u64);

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

impl ObjectId {
    /// Placeholder of an object that was never added to a map
    pub const UNASSIGNED: ObjectId = ObjectId(0);

    /// Allocate a fresh id
    pub fn next() -> Self {
        Self(NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Whether this is a real id
    pub fn is_assigned(self) -> bool {
        self != Self::UNASSIGNED
    }

    /// Raw value
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Gameplay state of an object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectState {
    /// Added, initialization not finished
    Loading,
    /// Initialized and part of the simulation
    Alive,
    /// Torn down
    Destroyed,
    /// Stored in the map but not spawned
    ConditionallyNonSpawned,
}

/// Initialization progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitState {
    /// `begin_init` not called yet
    Uninitialized,
    /// Components are being initialized
    Initializing,
    /// Waiting on pending components
    InitializingAsync,
    /// Fully initialized
    Initialized,
}

/// Type tag used by queries and persistence
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    /// Static scenery
    Prop,
    /// Moving, simulated object
    Actor,
    /// Invisible volume reacting to other objects
    Trigger,
    /// Light source placement
    Light,
    /// Game specific kind
    Custom(String),
}

/// Typed game logic attached to an object
pub trait ObjectBehavior: Any {
    /// Called once when the object finishes initialization
    fn on_init(&mut self, _id: ObjectId) {}

    /// Called every map update while the object is alive
    ///
    /// Changes made to `render` move the object; the map re-derives its
    /// bounds afterwards.
    fn update(&mut self, _id: ObjectId, _dt: f32, _render: Option<&mut ObjectRenderData>) {}

    /// Called when the object is removed from its map
    fn on_done(&mut self, _id: ObjectId) {}

    /// Upcast for downcasting to the concrete type
    fn as_any(&self) -> &dyn Any;

    /// Mutable upcast for downcasting to the concrete type
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Receives objects as they finish initialization
pub trait ObjectAdapter {
    /// `object` is initialized and may now be indexed
    fn object_ready(&mut self, object: &GameObject);
}

/// What an object needs to be drawn by the mesh renderer
#[derive(Debug, Clone)]
pub struct ObjectRenderData {
    /// Meshes to draw
    pub entity: Arc<EntityModel>,
    /// Per-object overrides
    pub meta_state: Arc<MetaState>,
    /// Placement in the world
    pub transform: Transform,
    /// Lighting participation
    pub flags: ObjectFlags,
    /// Skinning matrices per mesh
    pub bones: Vec<Option<Arc<[Mat4]>>>,
}

impl ObjectRenderData {
    /// Render data with default overrides and flags
    pub fn new(entity: Arc<EntityModel>, transform: Transform) -> Self {
        Self {
            entity,
            meta_state: Arc::new(MetaState::default()),
            transform,
            flags: ObjectFlags::default(),
            bones: Vec::new(),
        }
    }

    /// World space box around the bounding sphere
    pub fn world_bounds(&self) -> Aabb {
        let (center, radius) = self.bounding_sphere();
        Aabb::from_center_extents(center, Vec3::repeat(radius))
    }
}

impl Renderable for ObjectRenderData {
    fn entity(&self) -> Option<&EntityModel> {
        Some(&self.entity)
    }

    fn meta_state(&self) -> &Arc<MetaState> {
        &self.meta_state
    }

    fn model_matrix(&self) -> Mat4 {
        self.transform.to_matrix()
    }

    fn bounding_sphere(&self) -> (Vec3, f32) {
        let local = self.entity.local_bounds;
        let c = local.center();
        let center = self.model_matrix() * Vec4::new(c.x, c.y, c.z, 1.0);
        (center.xyz(), local.bounding_radius() * self.transform.max_scale())
    }

    fn object_flags(&self) -> ObjectFlags {
        self.flags
    }

    fn bone_matrices(&self, mesh_index: usize) -> Option<Arc<[Mat4]>> {
        self.bones.get(mesh_index).cloned().flatten()
    }
}

/// An object living in a [`GameMap`](super::GameMap)
pub struct GameObject {
    pub(crate) key: ObjectKey,
    id: ObjectId,
    name: String,
    kind: ObjectKind,
    behavior: Option<Box<dyn ObjectBehavior>>,
    bounds: Aabb,
    state: ObjectState,
    layers: LayerMask,
    components: Vec<Box<dyn Component>>,
    init_state: InitState,
    pending: Vec<CompletionFlag>,
    render: Option<ObjectRenderData>,
}

impl GameObject {
    /// Create an object in the `Loading` state
    pub fn new(name: impl Into<String>, kind: ObjectKind, bounds: Aabb) -> Self {
        Self {
            key: ObjectKey::default(),
            id: ObjectId::UNASSIGNED,
            name: name.into(),
            kind,
            behavior: None,
            bounds,
            state: ObjectState::Loading,
            layers: LayerMask::ALL_OBJECTS,
            components: Vec::new(),
            init_state: InitState::Uninitialized,
            pending: Vec::new(),
            render: None,
        }
    }

    /// Attach typed game logic
    pub fn with_behavior(mut self, behavior: impl ObjectBehavior) -> Self {
        self.behavior = Some(Box::new(behavior));
        self
    }

    /// Attach a component
    pub fn with_component(mut self, component: impl Component) -> Self {
        self.components.push(Box::new(component));
        self
    }

    /// Set layer membership
    pub fn with_layers(mut self, layers: LayerMask) -> Self {
        self.layers = layers | LayerMask::ALL_OBJECTS;
        self
    }

    /// Attach render data
    pub fn with_render_data(mut self, render: ObjectRenderData) -> Self {
        self.render = Some(render);
        self
    }

    /// Keep the object stored but unspawned
    pub fn non_spawned(mut self) -> Self {
        self.state = ObjectState::ConditionallyNonSpawned;
        self
    }

    /// Object id, [`ObjectId::UNASSIGNED`] before it joins a map
    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub(crate) fn assign_id(&mut self, id: ObjectId) {
        self.id = id;
    }

    /// Display name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Type tag
    pub fn kind(&self) -> &ObjectKind {
        &self.kind
    }

    /// World bounds
    pub fn bounds(&self) -> Aabb {
        self.bounds
    }

    pub(crate) fn set_bounds(&mut self, bounds: Aabb) {
        self.bounds = bounds;
    }

    /// Gameplay state
    pub fn state(&self) -> ObjectState {
        self.state
    }

    /// Layer membership
    pub fn layers(&self) -> LayerMask {
        self.layers
    }

    /// Initialization progress
    pub fn init_state(&self) -> InitState {
        self.init_state
    }

    /// Whether initialization finished
    pub fn is_initialized(&self) -> bool {
        self.init_state == InitState::Initialized
    }

    /// Render data, if the object is drawn
    pub fn render_data(&self) -> Option<&ObjectRenderData> {
        self.render.as_ref()
    }

    /// Mutable render data; bounds are not updated
    pub fn render_data_mut(&mut self) -> Option<&mut ObjectRenderData> {
        self.render.as_mut()
    }

    /// Behaviour of type `T`
    pub fn behavior<T: ObjectBehavior>(&self) -> Option<&T> {
        self.behavior.as_ref()?.as_any().downcast_ref::<T>()
    }

    /// Mutable behaviour of type `T`
    pub fn behavior_mut<T: ObjectBehavior>(&mut self) -> Option<&mut T> {
        self.behavior.as_mut()?.as_any_mut().downcast_mut::<T>()
    }

    /// First component of type `T`
    pub fn component<T: Component>(&self) -> Option<&T> {
        self.components.iter().find_map(|c| c.as_any().downcast_ref::<T>())
    }

    /// Mutable first component of type `T`
    pub fn component_mut<T: Component>(&mut self) -> Option<&mut T> {
        self.components.iter_mut().find_map(|c| c.as_any_mut().downcast_mut::<T>())
    }

    /// Start initialization
    ///
    /// Assigns an id if the object has none and initializes every component.
    /// Finalizes immediately when no component is pending.
    pub fn begin_init(&mut self, adapter: &mut dyn ObjectAdapter) -> InitState {
        if self.init_state != InitState::Uninitialized {
            log::warn!("Object {} '{}' initialized twice", self.id, self.name);
            return self.init_state;
        }
        if !self.id.is_assigned() {
            self.id = ObjectId::next();
        }

        self.init_state = InitState::Initializing;
        for component in &mut self.components {
            if let ComponentInit::Pending(flag) = component.init(self.id) {
                log::trace!("Object {}: component {} initializing asynchronously", self.id, component.name());
                self.pending.push(flag);
            }
        }

        if self.pending.is_empty() {
            self.finalize(adapter);
        } else {
            self.init_state = InitState::InitializingAsync;
        }
        self.init_state
    }

    /// Check pending components, finalizing once all are done
    pub fn poll_init(&mut self, adapter: &mut dyn ObjectAdapter) -> InitState {
        if self.init_state == InitState::InitializingAsync {
            self.pending.retain(|flag| !flag.is_complete());
            if self.pending.is_empty() {
                self.finalize(adapter);
            }
        }
        self.init_state
    }

    fn finalize(&mut self, adapter: &mut dyn ObjectAdapter) {
        if let Some(behavior) = &mut self.behavior {
            behavior.on_init(self.id);
        }
        self.init_state = InitState::Initialized;
        if self.state == ObjectState::Loading {
            self.state = ObjectState::Alive;
        }
        adapter.object_ready(self);
        log::trace!("Object {} '{}' initialized", self.id, self.name);
    }

    /// Advance components, then the behaviour, by `dt` seconds
    ///
    /// Returns true when the render transform changed.
    pub fn update(&mut self, dt: f32) -> bool {
        for component in &mut self.components {
            component.update(self.id, dt);
        }
        let Some(behavior) = &mut self.behavior else {
            return false;
        };
        let before = self.render.as_ref().map(|render| render.transform.clone());
        behavior.update(self.id, dt, self.render.as_mut());
        self.render.as_ref().map(|render| &render.transform) != before.as_ref()
    }

    /// Tear the object down
    ///
    /// Components are only torn down if initialization had begun.
    pub fn done(&mut self) {
        if self.init_state != InitState::Uninitialized {
            for component in self.components.iter_mut().rev() {
                component.done(self.id);
            }
            if let Some(behavior) = &mut self.behavior {
                behavior.on_done(self.id);
            }
        }
        self.pending.clear();
        self.state = ObjectState::Destroyed;
    }
}

impl fmt::Debug for GameObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GameObject")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("state", &self.state)
            .field("init_state", &self.init_state)
            .field("bounds", &self.bounds)
            .field("components", &self.components.len())
            .finish()
    }
}
