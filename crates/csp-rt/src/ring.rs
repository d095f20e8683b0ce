// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Growable ring container.
//!
//! Items enter at `head` and leave at `tail`, so `unshift` + `pop` is FIFO.
//! Backs every buffer, both pending-operation queues of a channel, and the
//! dispatcher's task queue.

use std::num::NonZeroUsize;

use crate::error::Error;
use crate::DEFAULT_RING_CAPACITY;

/// Fixed-capacity circular sequence that can double on demand.
///
/// Invariant: `len <= capacity`, `head` and `tail` are always taken modulo
/// the current capacity.
pub struct RingBuffer<T> {
    head: usize,
    tail: usize,
    len: usize,
    slots: Vec<Option<T>>,
}

/// Create a ring with room for `n` items.
pub fn ring<T>(n: usize) -> Result<RingBuffer<T>, Error> {
    NonZeroUsize::new(n)
        .map(RingBuffer::with_capacity)
        .ok_or(Error::ZeroCapacity)
}

/// Ring used for channel queues and the dispatcher.
pub(crate) fn default_ring<T>() -> RingBuffer<T> {
    RingBuffer {
        head: 0,
        tail: 0,
        len: 0,
        slots: empty_slots(DEFAULT_RING_CAPACITY),
    }
}

fn empty_slots<T>(n: usize) -> Vec<Option<T>> {
    let mut slots = Vec::with_capacity(n);
    slots.resize_with(n, || None);
    slots
}

impl<T> RingBuffer<T> {
    pub fn with_capacity(n: NonZeroUsize) -> Self {
        Self {
            head: 0,
            tail: 0,
            len: 0,
            slots: empty_slots(n.get()),
        }
    }

    /// Remove the oldest item.
    pub fn pop(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        let item = self.slots[self.tail].take();
        self.tail = (self.tail + 1) % self.slots.len();
        self.len -= 1;
        item
    }

    /// Push without growing. The caller guarantees there is room.
    pub fn unshift(&mut self, item: T) {
        debug_assert!(self.len < self.slots.len(), "unshift on a full ring");
        self.slots[self.head] = Some(item);
        self.head = (self.head + 1) % self.slots.len();
        self.len += 1;
    }

    /// Push, doubling the capacity first when the ring is about to fill.
    pub fn unbounded_unshift(&mut self, item: T) {
        if self.len + 1 >= self.slots.len() {
            self.resize();
        }
        self.unshift(item);
    }

    /// Double the capacity and re-linearize so the oldest item sits at 0.
    pub fn resize(&mut self) {
        let cap = self.slots.len();
        let mut slots = empty_slots(cap * 2);
        for (i, slot) in slots.iter_mut().take(self.len).enumerate() {
            *slot = self.slots[(self.tail + i) % cap].take();
        }
        self.slots = slots;
        self.tail = 0;
        self.head = self.len;
    }

    /// Keep only items matching `keep`, preserving their order.
    pub fn cleanup<F: FnMut(&T) -> bool>(&mut self, mut keep: F) {
        for _ in 0..self.len {
            if let Some(item) = self.pop() {
                if keep(&item) {
                    self.unshift(item);
                }
            }
        }
    }

    /// Remove every item, oldest first.
    pub fn drain(&mut self) -> Drain<'_, T> {
        Drain { ring: self }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

/// Iterator returned by [`RingBuffer::drain`].
pub struct Drain<'a, T> {
    ring: &'a mut RingBuffer<T>,
}

impl<T> Iterator for Drain<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.ring.pop()
    }
}

impl<T> std::fmt::Debug for RingBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("len", &self.len)
            .field("capacity", &self.slots.len())
            .finish()
    }
}
