// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Buffering policies.
//!
//! A channel with a buffer lands puts in it before waking takers. The
//! policy decides what happens when the buffer is at capacity:
//! - [`FixedBuffer`]: reports full; the channel parks further puts.
//! - [`DroppingBuffer`]: never full; discards the incoming item.
//! - [`SlidingBuffer`]: never full; evicts the oldest item.
//! - [`PromiseBuffer`]: keeps the first item forever.

use std::num::NonZeroUsize;

use crate::error::Error;
use crate::ring::{ring, RingBuffer};

/// Capability every buffering policy provides to a channel.
pub trait Buffer<T> {
    /// Whether the channel must stop admitting puts.
    fn is_full(&self) -> bool;
    fn add(&mut self, item: T);
    fn remove(&mut self) -> Option<T>;
    fn count(&self) -> usize;
    /// Called once when the owning channel closes.
    fn close_buffer(&mut self);
}

/// Bounded FIFO. Full at exactly `n` items.
///
/// `add` itself never refuses: a transform may expand one put into several
/// items, so the ring grows past `n` instead of losing data.
#[derive(Debug)]
pub struct FixedBuffer<T> {
    buf: RingBuffer<T>,
    n: usize,
}

pub fn fixed<T>(n: usize) -> Result<FixedBuffer<T>, Error> {
    Ok(FixedBuffer { buf: ring(n)?, n })
}

impl<T> FixedBuffer<T> {
    pub fn with_capacity(n: NonZeroUsize) -> Self {
        Self {
            buf: RingBuffer::with_capacity(n),
            n: n.get(),
        }
    }
}

impl<T> Buffer<T> for FixedBuffer<T> {
    fn is_full(&self) -> bool {
        self.buf.len() >= self.n
    }

    fn add(&mut self, item: T) {
        self.buf.unbounded_unshift(item);
    }

    fn remove(&mut self) -> Option<T> {
        self.buf.pop()
    }

    fn count(&self) -> usize {
        self.buf.len()
    }

    fn close_buffer(&mut self) {}
}

/// Keeps the oldest `n` items; later ones are dropped on the floor.
#[derive(Debug)]
pub struct DroppingBuffer<T> {
    buf: RingBuffer<T>,
    n: usize,
}

pub fn dropping<T>(n: usize) -> Result<DroppingBuffer<T>, Error> {
    Ok(DroppingBuffer { buf: ring(n)?, n })
}

impl<T> Buffer<T> for DroppingBuffer<T> {
    fn is_full(&self) -> bool {
        false
    }

    fn add(&mut self, item: T) {
        if self.buf.len() < self.n {
            self.buf.unshift(item);
        }
    }

    fn remove(&mut self) -> Option<T> {
        self.buf.pop()
    }

    fn count(&self) -> usize {
        self.buf.len()
    }

    fn close_buffer(&mut self) {}
}

/// Keeps the newest `n` items; the oldest is evicted to make room.
#[derive(Debug)]
pub struct SlidingBuffer<T> {
    buf: RingBuffer<T>,
    n: usize,
}

pub fn sliding<T>(n: usize) -> Result<SlidingBuffer<T>, Error> {
    Ok(SlidingBuffer { buf: ring(n)?, n })
}

impl<T> Buffer<T> for SlidingBuffer<T> {
    fn is_full(&self) -> bool {
        false
    }

    fn add(&mut self, item: T) {
        if self.buf.len() >= self.n {
            self.buf.pop();
        }
        self.buf.unshift(item);
    }

    fn remove(&mut self) -> Option<T> {
        self.buf.pop()
    }

    fn count(&self) -> usize {
        self.buf.len()
    }

    fn close_buffer(&mut self) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Delivery<T> {
    Undelivered,
    Delivered(T),
    /// Closed before anything arrived. Permanent.
    Empty,
}

/// Single-assignment buffer: the first item wins and is handed to every
/// taker from then on.
#[derive(Debug)]
pub struct PromiseBuffer<T> {
    state: Delivery<T>,
}

pub fn promise<T>() -> PromiseBuffer<T> {
    PromiseBuffer {
        state: Delivery::Undelivered,
    }
}

impl<T: Clone> Buffer<T> for PromiseBuffer<T> {
    fn is_full(&self) -> bool {
        false
    }

    fn add(&mut self, item: T) {
        if let Delivery::Undelivered = self.state {
            self.state = Delivery::Delivered(item);
        }
    }

    fn remove(&mut self) -> Option<T> {
        match &self.state {
            Delivery::Delivered(v) => Some(v.clone()),
            _ => None,
        }
    }

    fn count(&self) -> usize {
        match self.state {
            Delivery::Delivered(_) => 1,
            _ => 0,
        }
    }

    fn close_buffer(&mut self) {
        if let Delivery::Undelivered = self.state {
            self.state = Delivery::Empty;
        }
    }
}
