// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Trampoline for channel continuations.
//!
//! Channels never run a continuation inline: they hand it to the dispatcher,
//! which queues it and asks the host runtime for a tick. The tick drains at
//! most `batch_size` tasks and re-arms itself if more remain, so a burst of
//! channel activity can't starve timers or other host work.

use std::cell::{Cell, RefCell};

use crate::handler::Continuation;
use crate::ring::{default_ring, RingBuffer};
use crate::runtime::Handle;

/// A unit of deferred work.
pub(crate) type Task = Box<dyn FnOnce()>;

/// FIFO task queue with single-tick arming.
pub struct Dispatcher {
    tasks: RefCell<RingBuffer<Task>>,
    /// A drain tick is queued on the host and hasn't started yet.
    armed: Cell<bool>,
    draining: Cell<bool>,
    batch_size: usize,
}

impl Dispatcher {
    pub(crate) fn new(batch_size: usize) -> Self {
        Self {
            tasks: RefCell::new(default_ring()),
            armed: Cell::new(false),
            draining: Cell::new(false),
            batch_size: batch_size.max(1),
        }
    }

    /// Queue a task. Returns `true` when the caller must arm a host tick.
    pub(crate) fn push(&self, task: Task) -> bool {
        self.tasks.borrow_mut().unbounded_unshift(task);
        if self.armed.get() || self.draining.get() {
            return false;
        }
        self.armed.set(true);
        true
    }

    /// Run up to one batch. Returns `true` if tasks remain queued.
    pub(crate) fn drain_batch(&self) -> bool {
        self.armed.set(false);
        let mut ran = 0;
        {
            let _draining = DrainingGuard::set(&self.draining);
            while ran < self.batch_size {
                // Release the borrow before running: tasks push more tasks.
                let next = self.tasks.borrow_mut().pop();
                let Some(task) = next else { break };
                task();
                ran += 1;
            }
        }
        let remaining = self.tasks.borrow().len();
        tracing::trace!(ran, remaining, "dispatcher batch");
        if remaining > 0 {
            self.armed.set(true);
            true
        } else {
            false
        }
    }

    /// Drop every queued task. Returns how many were discarded.
    pub(crate) fn clear(&self) -> usize {
        let dropped: Vec<Task> = self.tasks.borrow_mut().drain().collect();
        self.armed.set(false);
        dropped.len()
    }

    pub fn pending(&self) -> usize {
        self.tasks.borrow().len()
    }

    pub fn is_draining(&self) -> bool {
        self.draining.get()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}

/// Clears the draining flag on exit, including when a task panics, so the
/// next push can arm a tick again.
struct DrainingGuard<'a>(&'a Cell<bool>);

impl<'a> DrainingGuard<'a> {
    fn set(flag: &'a Cell<bool>) -> Self {
        flag.set(true);
        DrainingGuard(flag)
    }
}

impl Drop for DrainingGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("pending", &self.pending())
            .field("armed", &self.armed.get())
            .field("draining", &self.draining.get())
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

/// Queue `task` on the current thread's runtime.
///
/// # Panics
///
/// Panics if no runtime has been entered on this thread.
pub fn run<F: FnOnce() + 'static>(task: F) {
    match Handle::try_current() {
        Ok(handle) => handle.dispatch(Box::new(task)),
        Err(err) => panic!("{err}: enter a Runtime before using channels"),
    }
}

/// Queue `cont(value)`.
pub(crate) fn schedule<V: 'static>(cont: Continuation<V>, value: V) {
    run(move || cont(value));
}
