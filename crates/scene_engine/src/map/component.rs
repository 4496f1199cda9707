//! Object components and their initialization handshake
//!
//! A component's `init` either finishes synchronously or hands back a
//! [`CompletionFlag`] that some other party (usually a loader thread or a
//! task queued on the frame thread) sets when the work is done. The map
//! polls the flags once per tick; nothing ever blocks on them.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::object::ObjectId;

/// Shared "work finished" flag
#[derive(Debug, Clone, Default)]
pub struct CompletionFlag(Arc<AtomicBool>);

impl CompletionFlag {
    /// Create an unset flag
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the work as finished
    pub fn complete(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether the work has finished
    pub fn is_complete(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Outcome of [`Component::init`]
#[derive(Debug, Clone)]
pub enum ComponentInit {
    /// Initialization finished
    Ready,
    /// Initialization continues elsewhere; poll the flag
    Pending(CompletionFlag),
}

/// Data and behaviour attached to a game object
pub trait Component: Any {
    /// Name used in log messages
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Start initializing for the object `owner`
    fn init(&mut self, owner: ObjectId) -> ComponentInit;

    /// Per-frame update while the owner is alive
    fn update(&mut self, _owner: ObjectId, _dt: f32) {}

    /// Tear down; only called if `init` was called
    fn done(&mut self, _owner: ObjectId) {}

    /// Upcast for downcasting to the concrete type
    fn as_any(&self) -> &dyn Any;

    /// Mutable upcast for downcasting to the concrete type
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_is_shared_between_clones() {
        let flag = CompletionFlag::new();
        let worker_side = flag.clone();
        assert!(!flag.is_complete());

        std::thread::spawn(move || worker_side.complete()).join().unwrap();
        assert!(flag.is_complete());
    }
}
