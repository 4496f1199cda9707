//! Cooperative routines
//!
//! A [`Routine`] is a hand-written state machine that the [`Scheduler`]
//! resumes once per tick. It runs until it yields, so routines never run
//! concurrently and every tick sees them in start order.

use std::fmt;

/// What a routine wants after being resumed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutineStatus {
    /// Resume again next tick
    Yield,
    /// Finished; drop the routine
    Done,
}

/// A resumable unit of work over a context `C`
pub trait Routine<C> {
    /// Advance until the next suspension point
    fn resume(&mut self, context: &mut C) -> RoutineStatus;

    /// Name used in log messages
    fn name(&self) -> &str {
        "routine"
    }
}

impl<C, F> Routine<C> for F
where
    F: FnMut(&mut C) -> RoutineStatus,
{
    fn resume(&mut self, context: &mut C) -> RoutineStatus {
        self(context)
    }
}

/// Suspends until a predicate over the context holds
pub struct WaitUntil<P> {
    predicate: P,
}

impl<P> WaitUntil<P> {
    /// Wait for `predicate` to return true
    pub fn new(predicate: P) -> Self {
        Self { predicate }
    }
}

impl<C, P> Routine<C> for WaitUntil<P>
where
    P: FnMut(&C) -> bool,
{
    fn resume(&mut self, context: &mut C) -> RoutineStatus {
        if (self.predicate)(context) {
            RoutineStatus::Done
        } else {
            RoutineStatus::Yield
        }
    }

    fn name(&self) -> &str {
        "wait_until"
    }
}

/// Handle of a started routine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RoutineHandle(u64);

/// Single-threaded executor of routines over a context `C`
pub struct Scheduler<C> {
    routines: Vec<(RoutineHandle, Box<dyn Routine<C>>)>,
    next_handle: u64,
    ticks: u64,
}

impl<C> Scheduler<C> {
    /// Create an empty scheduler
    pub fn new() -> Self {
        Self {
            routines: Vec::new(),
            next_handle: 0,
            ticks: 0,
        }
    }

    /// Start a routine; it is first resumed on the next tick
    pub fn start(&mut self, routine: impl Routine<C> + 'static) -> RoutineHandle {
        let handle = RoutineHandle(self.next_handle);
        self.next_handle += 1;
        log::trace!("Starting routine {} ({:?})", routine.name(), handle);
        self.routines.push((handle, Box::new(routine)));
        handle
    }

    /// Resume every routine once, in start order; returns how many finished
    pub fn tick(&mut self, context: &mut C) -> usize {
        self.ticks += 1;
        let before = self.routines.len();
        self.routines.retain_mut(|(handle, routine)| match routine.resume(context) {
            RoutineStatus::Yield => true,
            RoutineStatus::Done => {
                log::trace!("Routine {} ({:?}) finished", routine.name(), handle);
                false
            }
        });
        before - self.routines.len()
    }

    /// Whether the routine behind `handle` is still running
    pub fn is_running(&self, handle: RoutineHandle) -> bool {
        self.routines.iter().any(|(h, _)| *h == handle)
    }

    /// Stop a routine without resuming it again
    pub fn stop(&mut self, handle: RoutineHandle) -> bool {
        let before = self.routines.len();
        self.routines.retain(|(h, _)| *h != handle);
        before != self.routines.len()
    }

    /// Number of running routines
    pub fn len(&self) -> usize {
        self.routines.len()
    }

    /// Whether no routine is running
    pub fn is_empty(&self) -> bool {
        self.routines.is_empty()
    }

    /// Ticks run so far
    pub fn ticks(&self) -> u64 {
        self.ticks
    }
}

impl<C> Default for Scheduler<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> fmt::Debug for Scheduler<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("routines", &self.routines.len())
            .field("ticks", &self.ticks)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routines_resume_once_per_tick_in_order() {
        let mut scheduler: Scheduler<Vec<&'static str>> = Scheduler::new();
        scheduler.start(|log: &mut Vec<&'static str>| {
            log.push("a");
            RoutineStatus::Yield
        });
        scheduler.start(|log: &mut Vec<&'static str>| {
            log.push("b");
            RoutineStatus::Done
        });

        let mut log = Vec::new();
        assert_eq!(scheduler.tick(&mut log), 1);
        assert_eq!(scheduler.tick(&mut log), 0);
        assert_eq!(log, vec!["a", "b", "a"]);
        assert_eq!(scheduler.len(), 1);
    }

    #[test]
    fn test_wait_until_polls_context() {
        let mut scheduler: Scheduler<u32> = Scheduler::new();
        let handle = scheduler.start(WaitUntil::new(|count: &u32| *count >= 3));

        let mut count = 0;
        while scheduler.is_running(handle) {
            count += 1;
            scheduler.tick(&mut count);
        }
        assert_eq!(count, 3);
        assert_eq!(scheduler.ticks(), 3);
    }

    #[test]
    fn test_stop_drops_routine() {
        let mut scheduler: Scheduler<()> = Scheduler::new();
        let handle = scheduler.start(|_: &mut ()| RoutineStatus::Yield);
        assert!(scheduler.stop(handle));
        assert!(!scheduler.stop(handle));
        assert!(scheduler.is_empty());
    }
}
