// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Single-threaded host event loop.
//!
//! The runtime owns three things: a macrotask queue (dispatcher ticks,
//! fired timers), a timer heap, and the [`Dispatcher`]. Entering it installs
//! a thread-local [`Handle`] that channels and processes use to schedule
//! work. `run()` turns the loop until there is nothing left to do.
//!
//! With `virtual_time` on, an idle loop jumps the clock straight to the
//! next deadline instead of sleeping, which keeps timing tests hermetic.

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::future::Future;
use std::rc::Rc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::dispatch::{Dispatcher, Task};
use crate::error::Error;
use crate::process::Process;
use crate::TASK_BATCH_SIZE;

/// Runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Dispatcher tasks run per host tick.
    pub batch_size: usize,
    /// Advance a virtual clock instead of sleeping.
    pub virtual_time: bool,
    /// Seed for `alts` shuffling. `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            batch_size: TASK_BATCH_SIZE,
            virtual_time: false,
            seed: None,
        }
    }
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batch_size(mut self, n: usize) -> Self {
        self.batch_size = n;
        self
    }

    pub fn virtual_time(mut self, on: bool) -> Self {
        self.virtual_time = on;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

enum Clock {
    Real(Instant),
    Virtual(Cell<Duration>),
}

impl Clock {
    fn now(&self) -> Duration {
        match self {
            Clock::Real(origin) => origin.elapsed(),
            Clock::Virtual(now) => now.get(),
        }
    }

    fn advance_to(&self, deadline: Duration) {
        match self {
            Clock::Real(origin) => {
                let now = origin.elapsed();
                if deadline > now {
                    std::thread::sleep(deadline - now);
                }
            }
            Clock::Virtual(now) => {
                if deadline > now.get() {
                    now.set(deadline);
                }
            }
        }
    }
}

struct Timer {
    deadline: Duration,
    /// Insertion order; breaks deadline ties FIFO.
    seq: u64,
    task: Task,
}

impl PartialEq for Timer {
    fn eq(&self, other: &Self) -> bool {
        (self.deadline, self.seq) == (other.deadline, other.seq)
    }
}

impl Eq for Timer {}

impl PartialOrd for Timer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timer {
    // Reversed: BinaryHeap is a max-heap, we want the earliest deadline.
    fn cmp(&self, other: &Self) -> Ordering {
        (other.deadline, other.seq).cmp(&(self.deadline, self.seq))
    }
}

#[derive(Default)]
struct HostQueue {
    ready: VecDeque<Task>,
    timers: BinaryHeap<Timer>,
    next_seq: u64,
}

struct Shared {
    config: RuntimeConfig,
    dispatcher: Dispatcher,
    host: RefCell<HostQueue>,
    clock: Clock,
    rng: RefCell<StdRng>,
}

/// Cheap, cloneable reference to a runtime.
#[derive(Clone)]
pub struct Handle {
    shared: Rc<Shared>,
}

thread_local! {
    static CURRENT: RefCell<Option<Handle>> = const { RefCell::new(None) };
}

impl Handle {
    /// The runtime entered on this thread.
    ///
    /// # Panics
    ///
    /// Panics if there is none; see [`Handle::try_current`].
    pub fn current() -> Handle {
        match Self::try_current() {
            Ok(handle) => handle,
            Err(err) => panic!("{err}"),
        }
    }

    pub fn try_current() -> Result<Handle, Error> {
        CURRENT
            .with(|current| current.borrow().clone())
            .ok_or(Error::NoRuntime)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.shared.config
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.shared.dispatcher
    }

    /// Time since the runtime was created.
    pub fn now(&self) -> Duration {
        self.shared.clock.now()
    }

    /// Queue a macrotask for the next host turn.
    pub fn set_immediate<F: FnOnce() + 'static>(&self, task: F) {
        self.shared.host.borrow_mut().ready.push_back(Box::new(task));
    }

    /// Run `task` once `delay` has elapsed.
    pub fn set_timeout<F: FnOnce() + 'static>(&self, delay: Duration, task: F) {
        let deadline = self.now() + delay;
        let mut host = self.shared.host.borrow_mut();
        let seq = host.next_seq;
        host.next_seq += 1;
        host.timers.push(Timer {
            deadline,
            seq,
            task: Box::new(task),
        });
    }

    pub(crate) fn dispatch(&self, task: Task) {
        if self.shared.dispatcher.push(task) {
            self.arm_tick();
        }
    }

    fn arm_tick(&self) {
        let handle = self.clone();
        self.set_immediate(move || {
            if handle.shared.dispatcher.drain_batch() {
                handle.arm_tick();
            }
        });
    }

    /// Shuffle with the runtime's (possibly seeded) generator.
    pub(crate) fn shuffle<T>(&self, items: &mut [T]) {
        items.shuffle(&mut *self.shared.rng.borrow_mut());
    }

    /// Pending macrotasks plus armed timers.
    pub fn pending(&self) -> usize {
        let host = self.shared.host.borrow();
        host.ready.len() + host.timers.len()
    }

    /// One host turn. Returns `false` once there is nothing left to do.
    fn turn(&self) -> bool {
        self.promote_due_timers();
        let next = self.shared.host.borrow_mut().ready.pop_front();
        if let Some(task) = next {
            task();
            return true;
        }
        let deadline = self.shared.host.borrow().timers.peek().map(|t| t.deadline);
        match deadline {
            Some(deadline) => {
                self.shared.clock.advance_to(deadline);
                true
            }
            None => false,
        }
    }

    fn promote_due_timers(&self) {
        let now = self.now();
        let mut host = self.shared.host.borrow_mut();
        while host.timers.peek().is_some_and(|t| t.deadline <= now) {
            if let Some(timer) = host.timers.pop() {
                tracing::trace!(deadline = ?timer.deadline, "timer fired");
                host.ready.push_back(timer.task);
            }
        }
    }

    /// Discard queued work. Returns how many tasks were dropped.
    fn clear(&self) -> usize {
        let (ready, timers) = {
            let mut host = self.shared.host.borrow_mut();
            (
                std::mem::take(&mut host.ready),
                std::mem::take(&mut host.timers),
            )
        };
        let dropped = ready.len() + timers.len() + self.shared.dispatcher.clear();
        // Dropping tasks may drop channels; do it with no borrow held.
        drop(ready);
        drop(timers);
        dropped
    }
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("config", &self.shared.config)
            .field("now", &self.now())
            .field("pending", &self.pending())
            .field("dispatcher", &self.shared.dispatcher)
            .finish()
    }
}

/// Restores the previously entered runtime on drop.
#[must_use = "the runtime is only entered while the guard is alive"]
pub struct EnterGuard {
    prev: Option<Handle>,
}

impl Drop for EnterGuard {
    fn drop(&mut self) {
        let prev = self.prev.take();
        CURRENT.with(|current| *current.borrow_mut() = prev);
    }
}

/// Owns the event loop.
pub struct Runtime {
    handle: Handle,
}

impl Runtime {
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        let clock = if config.virtual_time {
            Clock::Virtual(Cell::new(Duration::ZERO))
        } else {
            Clock::Real(Instant::now())
        };
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        tracing::debug!(
            batch_size = config.batch_size,
            virtual_time = config.virtual_time,
            seed = ?config.seed,
            "runtime created"
        );
        Self {
            handle: Handle {
                shared: Rc::new(Shared {
                    dispatcher: Dispatcher::new(config.batch_size),
                    config,
                    host: RefCell::new(HostQueue::default()),
                    clock,
                    rng: RefCell::new(rng),
                }),
            },
        }
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Make this runtime current on this thread until the guard drops.
    pub fn enter(&self) -> EnterGuard {
        let prev = CURRENT.with(|current| current.borrow_mut().replace(self.handle.clone()));
        EnterGuard { prev }
    }

    /// Turn the loop until no macrotasks, timers, or dispatcher work remain.
    pub fn run(&self) {
        let _guard = self.enter();
        let mut turns = 0u64;
        while self.handle.turn() {
            turns += 1;
        }
        tracing::trace!(turns, now = ?self.handle.now(), "runtime idle");
    }

    /// Spawn `coroutine` as a process and run the loop until idle.
    ///
    /// Returns [`Error::Stalled`] if the loop went idle first, i.e. the
    /// process is parked on a channel nobody will ever touch again.
    pub fn block_on<F>(&self, coroutine: F) -> Result<F::Output, Error>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        let _guard = self.enter();
        let result: Rc<RefCell<Option<F::Output>>> = Rc::new(RefCell::new(None));
        let slot = result.clone();
        Process::new(coroutine, move |value| *slot.borrow_mut() = Some(value)).run();
        self.run();
        let value = result.borrow_mut().take();
        match value {
            Some(value) => Ok(value),
            None => {
                tracing::warn!("runtime went idle with the root process still suspended");
                Err(Error::Stalled)
            }
        }
    }

    pub fn now(&self) -> Duration {
        self.handle.now()
    }

    /// Drop all pending work without running it.
    pub fn shutdown(self) {
        // The Drop impl does the work.
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        // Armed ticks hold handles, so pending work would keep `Shared` alive.
        let dropped = self.handle.clear();
        if dropped > 0 {
            tracing::debug!(dropped, "runtime shut down with pending work");
        }
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Runtime").field(&self.handle).finish()
    }
}

/// Run `task` after `delay` on the current runtime.
///
/// # Panics
///
/// Panics if no runtime has been entered on this thread.
pub fn queue_delay<F: FnOnce() + 'static>(delay: Duration, task: F) {
    Handle::current().set_timeout(delay, task);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn virtual_rt() -> Runtime {
        Runtime::with_config(RuntimeConfig::new().virtual_time(true).seed(7))
    }

    #[test]
    fn no_runtime_outside_enter() {
        assert_eq!(Handle::try_current().unwrap_err(), Error::NoRuntime);
        let rt = virtual_rt();
        {
            let _g = rt.enter();
            assert!(Handle::try_current().is_ok());
        }
        assert!(Handle::try_current().is_err());
    }

    #[test]
    fn nested_enter_restores_previous() {
        let outer = virtual_rt();
        let inner = virtual_rt();
        let _a = outer.enter();
        {
            let _b = inner.enter();
            Handle::current().set_immediate(|| {});
            assert_eq!(inner.handle().pending(), 1);
        }
        Handle::current().set_immediate(|| {});
        assert_eq!(outer.handle().pending(), 1);
    }

    #[test]
    fn timers_fire_in_deadline_order() {
        let rt = virtual_rt();
        let log = Rc::new(RefCell::new(Vec::new()));
        for (ms, tag) in [(30, "c"), (10, "a"), (20, "b"), (10, "a2")] {
            let log = log.clone();
            rt.handle()
                .set_timeout(Duration::from_millis(ms), move || log.borrow_mut().push(tag));
        }
        rt.run();
        assert_eq!(*log.borrow(), vec!["a", "a2", "b", "c"]);
        assert_eq!(rt.now(), Duration::from_millis(30));
    }

    #[test]
    fn dispatched_work_runs_before_idle() {
        let rt = virtual_rt();
        let hits = Rc::new(Cell::new(0));
        {
            let _g = rt.enter();
            for _ in 0..3 {
                let hits = hits.clone();
                crate::dispatch::run(move || hits.set(hits.get() + 1));
            }
        }
        assert_eq!(rt.handle().pending(), 1);
        rt.run();
        assert_eq!(hits.get(), 3);
        assert_eq!(rt.handle().dispatcher().pending(), 0);
    }

    #[test]
    fn block_on_returns_value() {
        let rt = virtual_rt();
        assert_eq!(rt.block_on(async { 40 + 2 }), Ok(42));
    }

    #[test]
    fn shutdown_drops_pending_work() {
        let rt = virtual_rt();
        let ran = Rc::new(Cell::new(false));
        let r = ran.clone();
        rt.handle().set_timeout(Duration::from_secs(1), move || r.set(true));
        rt.shutdown();
        assert!(!ran.get());
    }
}
