// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Pending-operation handlers.
//!
//! A handler stands for one put or take waiting on a channel. The channel
//! asks `is_active()` before touching it and calls `commit()` exactly once
//! when the operation completes; `commit` hands back the continuation to
//! run with the result. Consuming `self` makes a second commit impossible.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

/// Callback run with the result of a completed operation.
pub type Continuation<V> = Box<dyn FnOnce(V)>;

pub trait Handler<V> {
    fn is_active(&self) -> bool;
    /// Whether the operation may be parked when it can't complete now.
    fn is_blockable(&self) -> bool;
    fn commit(self: Box<Self>) -> Continuation<V>;
}

/// Always-active handler for plain put/take and for poll/offer.
pub struct FnHandler<V> {
    blockable: bool,
    func: Option<Continuation<V>>,
}

impl<V: 'static> FnHandler<V> {
    pub fn new<F: FnOnce(V) + 'static>(func: F) -> Self {
        Self {
            blockable: true,
            func: Some(Box::new(func)),
        }
    }

    /// Handler for an immediate-or-nothing operation. Never parked.
    pub fn non_blocking() -> Self {
        Self {
            blockable: false,
            func: None,
        }
    }
}

impl<V: 'static> Handler<V> for FnHandler<V> {
    fn is_active(&self) -> bool {
        true
    }

    fn is_blockable(&self) -> bool {
        self.blockable
    }

    fn commit(self: Box<Self>) -> Continuation<V> {
        match self.func {
            Some(func) => func,
            None => Box::new(|_| {}),
        }
    }
}

/// Exclusivity flag shared by all handlers of one `alts` call.
#[derive(Clone)]
pub struct Flag(Rc<Cell<bool>>);

impl Flag {
    /// A fresh, raised flag.
    pub fn new() -> Self {
        Self(Rc::new(Cell::new(true)))
    }

    pub fn is_raised(&self) -> bool {
        self.0.get()
    }

    pub fn lower(&self) {
        self.0.set(false);
    }
}

impl Default for Flag {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Flag").field(&self.0.get()).finish()
    }
}

/// Handler that is active only while its flag is raised. Committing lowers
/// the flag, so every sibling registered on other channels goes dead.
pub struct AltHandler<V> {
    flag: Flag,
    func: Continuation<V>,
}

impl<V: 'static> AltHandler<V> {
    pub fn new<F: FnOnce(V) + 'static>(flag: Flag, func: F) -> Self {
        Self {
            flag,
            func: Box::new(func),
        }
    }
}

impl<V: 'static> Handler<V> for AltHandler<V> {
    fn is_active(&self) -> bool {
        self.flag.is_raised()
    }

    fn is_blockable(&self) -> bool {
        true
    }

    fn commit(self: Box<Self>) -> Continuation<V> {
        self.flag.lower();
        self.func
    }
}

/// A parked put: the handler plus the value it wants to deliver.
pub struct PutBox<T> {
    pub handler: Box<dyn Handler<bool>>,
    pub value: T,
}
