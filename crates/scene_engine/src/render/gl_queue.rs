//! Marshalling work onto the frame thread
//!
//! Graphics calls may only be issued from the frame thread. Other threads
//! hand closures to a [`GlTaskSender`]; the renderer drains them with the
//! backend at scene start and in `do_tasks`. Tasks are fire-and-forget:
//! a producer that needs to know when its task ran polls a
//! [`CompletionFlag`](crate::map::component::CompletionFlag) it captured.

use crossbeam::channel::{unbounded, Receiver, Sender};

use super::backend::GraphicsBackend;

/// Work to run on the frame thread
pub type GlTask = Box<dyn FnOnce(&mut dyn GraphicsBackend) + Send + 'static>;

/// Cloneable producer side of the queue
#[derive(Clone)]
pub struct GlTaskSender {
    sender: Sender<GlTask>,
}

impl GlTaskSender {
    /// Queue `task` to run on the frame thread
    ///
    /// Silently dropped if the renderer owning the queue is gone.
    pub fn execute_async<F>(&self, task: F)
    where
        F: FnOnce(&mut dyn GraphicsBackend) + Send + 'static,
    {
        if self.sender.send(Box::new(task)).is_err() {
            log::warn!("GL task dropped: frame thread queue closed");
        }
    }
}

/// Frame thread side of the queue
pub struct GlTaskQueue {
    sender: Sender<GlTask>,
    receiver: Receiver<GlTask>,
}

impl GlTaskQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self { sender, receiver }
    }

    /// Producer handle for other threads
    pub fn sender(&self) -> GlTaskSender {
        GlTaskSender {
            sender: self.sender.clone(),
        }
    }

    /// Queue a task from the frame thread itself
    pub fn execute_async<F>(&self, task: F)
    where
        F: FnOnce(&mut dyn GraphicsBackend) + Send + 'static,
    {
        self.sender().execute_async(task);
    }

    /// Run every queued task in submission order; returns how many ran
    pub fn drain(&self, backend: &mut dyn GraphicsBackend) -> usize {
        let mut count = 0;
        while let Ok(task) = self.receiver.try_recv() {
            task(&mut *backend);
            count += 1;
        }
        if count > 0 {
            log::trace!("Ran {} GL thread tasks", count);
        }
        count
    }

    /// Number of tasks waiting
    pub fn pending(&self) -> usize {
        self.receiver.len()
    }
}

impl Default for GlTaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backend::BufferKind;
    use crate::render::headless::HeadlessBackend;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_tasks_from_other_threads_run_on_drain() {
        let queue = GlTaskQueue::new();
        let sender = queue.sender();
        let done = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&done);
        std::thread::spawn(move || {
            sender.execute_async(move |backend| {
                let _ = backend.create_buffer(BufferKind::Vertex, 16);
                flag.store(true, Ordering::Release);
            });
        })
        .join()
        .unwrap();

        assert_eq!(queue.pending(), 1);
        assert!(!done.load(Ordering::Acquire));

        let mut backend = HeadlessBackend::new(1);
        assert_eq!(queue.drain(&mut backend), 1);
        assert!(done.load(Ordering::Acquire));
        assert_eq!(backend.buffer_count(), 1);
    }
}
