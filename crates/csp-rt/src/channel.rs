// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! CSP channels.
//!
//! A channel is a meeting point for puts and takes. Each side either
//! completes immediately ([`Outcome::Ready`]) or parks its handler until the
//! other side shows up ([`Outcome::Pending`]). Parked continuations always
//! resume through the dispatcher, never inline.
//!
//! Closing is one-way. After close, puts report `false` and takes drain the
//! buffer and then observe `None`.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::buffers::{promise, Buffer};
use crate::dispatch::schedule;
use crate::error::{Error, Side};
use crate::handler::{Handler, PutBox};
use crate::ring::{default_ring, RingBuffer};
use crate::transform::{default_exception_hook, ExceptionHook, Step, Transform, TransformError};
use crate::{MAX_DIRTY, MAX_QUEUE_SIZE};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a channel, stable across clones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u64);

impl ChannelId {
    fn next() -> Self {
        ChannelId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chan#{}", self.0)
    }
}

/// Per-channel bounds on the pending-operation queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Parks allowed between sweeps of dead handlers.
    pub max_dirty: usize,
    /// Parked operations allowed per side.
    pub max_queue_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_dirty: MAX_DIRTY,
            max_queue_size: MAX_QUEUE_SIZE,
        }
    }
}

/// Result of a put or take attempt.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome<V> {
    /// Completed now. The handler's continuation will not run.
    Ready(V),
    /// Parked, or dropped if the handler was inactive or non-blocking.
    Pending,
}

impl<V> Outcome<V> {
    pub fn is_ready(&self) -> bool {
        matches!(self, Outcome::Ready(_))
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Outcome::Pending)
    }

    pub fn ready(self) -> Option<V> {
        match self {
            Outcome::Ready(v) => Some(v),
            Outcome::Pending => None,
        }
    }
}

struct State<T: 'static> {
    id: ChannelId,
    buf: Option<Box<dyn Buffer<T>>>,
    xform: Option<Box<dyn Transform<T>>>,
    on_error: ExceptionHook<T>,
    takes: RingBuffer<Box<dyn Handler<Option<T>>>>,
    puts: RingBuffer<PutBox<T>>,
    dirty_takes: usize,
    dirty_puts: usize,
    closed: bool,
    limits: Limits,
}

impl<T: 'static> State<T> {
    fn put(&mut self, value: T, handler: Box<dyn Handler<bool>>) -> Result<Outcome<bool>, Error> {
        if !handler.is_active() {
            return Ok(Outcome::Pending);
        }
        if self.closed {
            let _ = handler.commit();
            return Ok(Outcome::Ready(false));
        }

        if self.buf.as_ref().is_some_and(|b| !b.is_full()) {
            let _ = handler.commit();
            let reduced = self.step(value);
            self.drain_buffer_to_takers();
            if reduced {
                self.close();
            }
            return Ok(Outcome::Ready(true));
        }

        while let Some(taker) = self.takes.pop() {
            if taker.is_active() {
                let _ = handler.commit();
                schedule(taker.commit(), Some(value));
                return Ok(Outcome::Ready(true));
            }
        }

        if self.dirty_puts > self.limits.max_dirty {
            self.puts.cleanup(|p| p.handler.is_active());
            self.dirty_puts = 0;
        } else {
            self.dirty_puts += 1;
        }
        if handler.is_blockable() {
            if self.puts.len() >= self.limits.max_queue_size {
                return Err(Error::overflow(Side::Puts, self.limits.max_queue_size));
            }
            self.puts.unbounded_unshift(PutBox { handler, value });
        }
        Ok(Outcome::Pending)
    }

    fn take(&mut self, handler: Box<dyn Handler<Option<T>>>) -> Result<Outcome<Option<T>>, Error> {
        if !handler.is_active() {
            return Ok(Outcome::Pending);
        }

        if self.buf.as_ref().is_some_and(|b| b.count() > 0) {
            let _ = handler.commit();
            let value = self.buf.as_mut().and_then(|b| b.remove());
            self.refill_from_putters();
            return Ok(Outcome::Ready(value));
        }

        while let Some(putter) = self.puts.pop() {
            if putter.handler.is_active() {
                let _ = handler.commit();
                schedule(putter.handler.commit(), true);
                return Ok(Outcome::Ready(Some(putter.value)));
            }
        }

        if self.closed {
            let _ = handler.commit();
            return Ok(Outcome::Ready(None));
        }

        if self.dirty_takes > self.limits.max_dirty {
            self.takes.cleanup(|h| h.is_active());
            self.dirty_takes = 0;
        } else {
            self.dirty_takes += 1;
        }
        if handler.is_blockable() {
            if self.takes.len() >= self.limits.max_queue_size {
                return Err(Error::overflow(Side::Takes, self.limits.max_queue_size));
            }
            self.takes.unbounded_unshift(handler);
        }
        Ok(Outcome::Pending)
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        tracing::trace!(
            channel = %self.id,
            takes = self.takes.len(),
            puts = self.puts.len(),
            "closing channel"
        );

        if let Some(buf) = self.buf.as_deref_mut() {
            if let Some(xform) = self.xform.as_mut() {
                if let Err(err) = xform.complete(buf) {
                    if let Some(v) = (self.on_error)(&err) {
                        buf.add(v);
                    }
                }
            }
            buf.close_buffer();
        }
        self.drain_buffer_to_takers();

        for taker in self.takes.drain() {
            if taker.is_active() {
                schedule(taker.commit(), None);
            }
        }
        for putter in self.puts.drain() {
            if putter.handler.is_active() {
                schedule(putter.handler.commit(), false);
            }
        }
    }

    /// Push one value through the transform into the buffer. Returns `true`
    /// if the transform asked to terminate.
    fn step(&mut self, value: T) -> bool {
        let Some(buf) = self.buf.as_deref_mut() else {
            return false;
        };
        let Some(xform) = self.xform.as_mut() else {
            buf.add(value);
            return false;
        };
        match xform.step(buf, value) {
            Ok(step) => step == Step::Reduced,
            Err(err) => {
                if let Some(v) = (self.on_error)(&err) {
                    buf.add(v);
                }
                false
            }
        }
    }

    /// Hand buffered values to parked takers until one side runs out.
    fn drain_buffer_to_takers(&mut self) {
        let Some(buf) = self.buf.as_deref_mut() else {
            return;
        };
        while buf.count() > 0 {
            let Some(taker) = self.takes.pop() else { break };
            if taker.is_active() {
                schedule(taker.commit(), buf.remove());
            }
        }
    }

    /// Move parked puts into the buffer while it has room.
    fn refill_from_putters(&mut self) {
        while self.buf.as_ref().is_some_and(|b| !b.is_full()) {
            let Some(putter) = self.puts.pop() else { break };
            if putter.handler.is_active() {
                schedule(putter.handler.commit(), true);
                if self.step(putter.value) {
                    self.close();
                }
            }
        }
    }
}

/// Channel state plus the flags readable while a transform or hook runs.
struct Shared<T: 'static> {
    state: RefCell<State<T>>,
    /// Mirror of `State::closed`, refreshed after every operation.
    closed: Cell<bool>,
    /// `close` was called while the state was borrowed.
    close_requested: Cell<bool>,
}

/// Shared reference to a channel. Clones refer to the same channel.
///
/// A transform or exception hook runs while its channel is busy. From there
/// `close` is deferred until the running operation returns, `put`/`take`
/// fail with [`Error::Reentrant`], and `poll`/`offer` report nothing.
pub struct Chan<T: 'static> {
    id: ChannelId,
    shared: Rc<Shared<T>>,
}

impl<T: 'static> Chan<T> {
    pub fn builder() -> ChanBuilder<T> {
        ChanBuilder::new()
    }

    fn from_parts(
        buf: Option<Box<dyn Buffer<T>>>,
        xform: Option<Box<dyn Transform<T>>>,
        on_error: Option<ExceptionHook<T>>,
        limits: Limits,
    ) -> Self {
        let id = ChannelId::next();
        let on_error: ExceptionHook<T> = match on_error {
            Some(hook) => hook,
            None => Rc::new(default_exception_hook::<T>),
        };
        let state = State {
            id,
            buf,
            xform,
            on_error,
            takes: default_ring(),
            puts: default_ring(),
            dirty_takes: 0,
            dirty_puts: 0,
            closed: false,
            limits,
        };
        Self {
            id,
            shared: Rc::new(Shared {
                state: RefCell::new(state),
                closed: Cell::new(false),
                close_requested: Cell::new(false),
            }),
        }
    }

    /// Channel backed by `buf`, no transform.
    pub fn with_buffer<B: Buffer<T> + 'static>(buf: B) -> Self {
        Self::from_parts(Some(Box::new(buf)), None, None, Limits::default())
    }

    /// Run `f` against the state, then apply a close requested meanwhile.
    fn with_state<R>(&self, f: impl FnOnce(&mut State<T>) -> R) -> Result<R, Error> {
        let result = {
            let mut state = self
                .shared
                .state
                .try_borrow_mut()
                .map_err(|_| Error::Reentrant(self.id))?;
            let result = f(&mut state);
            self.shared.closed.set(state.closed);
            result
        };
        if self.shared.close_requested.take() {
            self.close();
        }
        Ok(result)
    }

    /// Offer `value`. On [`Outcome::Pending`] the handler is parked (if
    /// blockable) and its continuation later receives `true` on delivery or
    /// `false` if the channel closes first.
    pub fn put<H: Handler<bool> + 'static>(
        &self,
        value: T,
        handler: H,
    ) -> Result<Outcome<bool>, Error> {
        self.with_state(|state| state.put(value, Box::new(handler)))?
    }

    /// Ask for a value. `Ready(None)` and a continuation receiving `None`
    /// both mean the channel is closed and drained.
    pub fn take<H: Handler<Option<T>> + 'static>(
        &self,
        handler: H,
    ) -> Result<Outcome<Option<T>>, Error> {
        self.with_state(|state| state.take(Box::new(handler)))?
    }

    /// Close the channel. Idempotent.
    pub fn close(&self) {
        if self.with_state(State::close).is_err() {
            tracing::trace!(channel = %self.id, "close deferred until the channel is free");
            self.shared.close_requested.set(true);
        }
    }

    /// `true` once closed, or once a deferred close is pending.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.get() || self.shared.close_requested.get()
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Items currently buffered.
    ///
    /// # Panics
    ///
    /// Panics if called from the channel's own transform or hook, as do
    /// `pending_puts`, `pending_takes` and `limits`.
    pub fn count(&self) -> usize {
        self.shared.state.borrow().buf.as_ref().map_or(0, |b| b.count())
    }

    /// Parked puts, including ones whose handler has since gone inactive.
    pub fn pending_puts(&self) -> usize {
        self.shared.state.borrow().puts.len()
    }

    /// Parked takes, including ones whose handler has since gone inactive.
    pub fn pending_takes(&self) -> usize {
        self.shared.state.borrow().takes.len()
    }

    pub fn limits(&self) -> Limits {
        self.shared.state.borrow().limits
    }
}

impl<T: 'static> Clone for Chan<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            shared: self.shared.clone(),
        }
    }
}

impl<T: 'static> PartialEq for Chan<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T: 'static> Eq for Chan<T> {}

impl<T: 'static> Hash for Chan<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<T: 'static> fmt::Debug for Chan<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.shared.state.try_borrow() {
            Ok(state) => f
                .debug_struct("Chan")
                .field("id", &self.id)
                .field("buffered", &state.buf.as_ref().map(|b| b.count()))
                .field("takes", &state.takes.len())
                .field("puts", &state.puts.len())
                .field("closed", &state.closed)
                .finish(),
            Err(_) => f.debug_struct("Chan").field("id", &self.id).finish_non_exhaustive(),
        }
    }
}

/// Builder for channels with a buffer, transform, or custom limits.
pub struct ChanBuilder<T: 'static> {
    buf: Option<Box<dyn Buffer<T>>>,
    xform: Option<Box<dyn Transform<T>>>,
    on_error: Option<ExceptionHook<T>>,
    limits: Limits,
}

impl<T: 'static> ChanBuilder<T> {
    pub fn new() -> Self {
        Self {
            buf: None,
            xform: None,
            on_error: None,
            limits: Limits::default(),
        }
    }

    pub fn buffer<B: Buffer<T> + 'static>(mut self, buf: B) -> Self {
        self.buf = Some(Box::new(buf));
        self
    }

    /// Requires a buffer; `build` fails otherwise.
    pub fn transform<X: Transform<T> + 'static>(mut self, xform: X) -> Self {
        self.xform = Some(Box::new(xform));
        self
    }

    /// Replace the default hook, which logs and drops the failed value.
    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&TransformError) -> Option<T> + 'static,
    {
        self.on_error = Some(Rc::new(hook));
        self
    }

    pub fn limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    pub fn build(self) -> Result<Chan<T>, Error> {
        if self.xform.is_some() && self.buf.is_none() {
            return Err(Error::TransformWithoutBuffer);
        }
        Ok(Chan::from_parts(self.buf, self.xform, self.on_error, self.limits))
    }
}

impl<T: 'static> Default for ChanBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Rendezvous channel: every put waits for a taker.
pub fn unbuffered<T: 'static>() -> Chan<T> {
    Chan::from_parts(None, None, None, Limits::default())
}

/// Channel with a fixed buffer of `n`. `n == 0` gives an unbuffered channel.
pub fn buffered<T: 'static>(n: usize) -> Result<Chan<T>, Error> {
    if n == 0 {
        return Ok(unbuffered());
    }
    Ok(Chan::with_buffer(crate::buffers::fixed(n)?))
}

/// Channel whose first value is delivered to every taker, forever.
pub fn promise_chan<T: Clone + 'static>() -> Chan<T> {
    Chan::with_buffer(promise())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffers::{dropping, fixed, sliding};
    use crate::handler::{AltHandler, Flag, FnHandler};
    use crate::runtime::{Runtime, RuntimeConfig};
    use crate::transform::{filter, map, take_n, try_map};

    fn rt() -> Runtime {
        Runtime::with_config(RuntimeConfig::new().virtual_time(true).seed(1))
    }

    fn noop<V: 'static>() -> FnHandler<V> {
        FnHandler::new(|_| {})
    }

    fn recording<V: 'static>() -> (Rc<RefCell<Vec<V>>>, impl Fn() -> FnHandler<V>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let l = log.clone();
        (log, move || {
            let l = l.clone();
            FnHandler::new(move |v| l.borrow_mut().push(v))
        })
    }

    #[test]
    fn unbuffered_put_parks_until_take() {
        let rt = rt();
        let _g = rt.enter();
        let ch = unbuffered::<i32>();
        let (acks, put_handler) = recording::<bool>();
        assert_eq!(ch.put(1, put_handler()).unwrap(), Outcome::Pending);
        assert_eq!(ch.pending_puts(), 1);
        assert_eq!(ch.take(noop()).unwrap(), Outcome::Ready(Some(1)));
        // The putter's continuation goes through the dispatcher.
        assert!(acks.borrow().is_empty());
        rt.run();
        assert_eq!(*acks.borrow(), vec![true]);
    }

    #[test]
    fn take_parks_until_put() {
        let rt = rt();
        let _g = rt.enter();
        let ch = unbuffered::<&str>();
        let (got, take_handler) = recording();
        assert!(ch.take(take_handler()).unwrap().is_pending());
        assert_eq!(ch.put("hi", noop()).unwrap(), Outcome::Ready(true));
        rt.run();
        assert_eq!(*got.borrow(), vec![Some("hi")]);
    }

    #[test]
    fn buffered_fills_then_parks() {
        let rt = rt();
        let _g = rt.enter();
        let ch = buffered::<i32>(2).unwrap();
        assert_eq!(ch.put(1, noop()).unwrap(), Outcome::Ready(true));
        assert_eq!(ch.put(2, noop()).unwrap(), Outcome::Ready(true));
        let (acks, put_handler) = recording::<bool>();
        assert!(ch.put(3, put_handler()).unwrap().is_pending());
        assert_eq!(ch.count(), 2);

        // Taking one makes room; the parked put moves into the buffer.
        assert_eq!(ch.take(noop()).unwrap(), Outcome::Ready(Some(1)));
        assert_eq!(ch.count(), 2);
        assert_eq!(ch.pending_puts(), 0);
        rt.run();
        assert_eq!(*acks.borrow(), vec![true]);
        assert_eq!(ch.take(noop()).unwrap(), Outcome::Ready(Some(2)));
        assert_eq!(ch.take(noop()).unwrap(), Outcome::Ready(Some(3)));
    }

    #[test]
    fn buffered_zero_is_unbuffered() {
        let rt = rt();
        let _g = rt.enter();
        let ch = buffered::<i32>(0).unwrap();
        assert!(ch.put(1, noop()).unwrap().is_pending());
        assert_eq!(ch.count(), 0);
    }

    #[test]
    fn close_flushes_both_sides() {
        let rt = rt();
        let _g = rt.enter();
        let takes = unbuffered::<i32>();
        let (got, take_handler) = recording();
        let _ = takes.take(take_handler()).unwrap();
        let _ = takes.take(take_handler()).unwrap();
        takes.close();
        takes.close();

        let puts = unbuffered::<i32>();
        let (acks, put_handler) = recording();
        let _ = puts.put(1, put_handler()).unwrap();
        puts.close();

        rt.run();
        assert_eq!(*got.borrow(), vec![None, None]);
        assert_eq!(*acks.borrow(), vec![false]);
        assert!(takes.is_closed() && puts.is_closed());
        assert_eq!(puts.put(2, noop()).unwrap(), Outcome::Ready(false));
        assert_eq!(takes.take(noop()).unwrap(), Outcome::Ready(None));
    }

    #[test]
    fn closed_channel_drains_buffer_before_none() {
        let rt = rt();
        let _g = rt.enter();
        let ch = buffered::<i32>(4).unwrap();
        let _ = ch.put(1, noop()).unwrap();
        let _ = ch.put(2, noop()).unwrap();
        ch.close();
        assert_eq!(ch.take(noop()).unwrap(), Outcome::Ready(Some(1)));
        assert_eq!(ch.take(noop()).unwrap(), Outcome::Ready(Some(2)));
        assert_eq!(ch.take(noop()).unwrap(), Outcome::Ready(None));
    }

    #[test]
    fn dropping_and_sliding_channels_never_park() {
        let rt = rt();
        let _g = rt.enter();
        let drop_ch = Chan::with_buffer(dropping::<i32>(1).unwrap());
        let slide_ch = Chan::with_buffer(sliding::<i32>(1).unwrap());
        for i in 1..=3 {
            assert_eq!(drop_ch.put(i, noop()).unwrap(), Outcome::Ready(true));
            assert_eq!(slide_ch.put(i, noop()).unwrap(), Outcome::Ready(true));
        }
        assert_eq!(drop_ch.take(noop()).unwrap(), Outcome::Ready(Some(1)));
        assert_eq!(slide_ch.take(noop()).unwrap(), Outcome::Ready(Some(3)));
    }

    #[test]
    fn promise_chan_serves_every_taker() {
        let rt = rt();
        let _g = rt.enter();
        let ch = promise_chan::<String>();
        let (got, take_handler) = recording();
        let _ = ch.take(take_handler()).unwrap();
        let _ = ch.take(take_handler()).unwrap();
        assert_eq!(ch.put("v".to_string(), noop()).unwrap(), Outcome::Ready(true));
        assert_eq!(ch.put("w".to_string(), noop()).unwrap(), Outcome::Ready(true));
        rt.run();
        assert_eq!(*got.borrow(), vec![Some("v".to_string()), Some("v".to_string())]);
        assert_eq!(ch.take(noop()).unwrap(), Outcome::Ready(Some("v".to_string())));
        ch.close();
        assert_eq!(ch.take(noop()).unwrap(), Outcome::Ready(Some("v".to_string())));
    }

    #[test]
    fn promise_closed_empty_yields_none() {
        let rt = rt();
        let _g = rt.enter();
        let ch = promise_chan::<i32>();
        ch.close();
        assert_eq!(ch.put(1, noop()).unwrap(), Outcome::Ready(false));
        assert_eq!(ch.take(noop()).unwrap(), Outcome::Ready(None));
    }

    #[test]
    fn transform_without_buffer_rejected() {
        let err = Chan::<i32>::builder().transform(map(|v: i32| v)).build().unwrap_err();
        assert_eq!(err, Error::TransformWithoutBuffer);
    }

    #[test]
    fn map_and_filter_transforms() {
        let rt = rt();
        let _g = rt.enter();
        let doubled = Chan::<i32>::builder()
            .buffer(fixed::<i32>(4).unwrap())
            .transform(map(|v: i32| v * 10))
            .build()
            .unwrap();
        let _ = doubled.put(2, noop()).unwrap();
        assert_eq!(doubled.take(noop()).unwrap(), Outcome::Ready(Some(20)));

        let odds = Chan::<i32>::builder()
            .buffer(fixed::<i32>(4).unwrap())
            .transform(filter(|v: &i32| v % 2 == 1))
            .build()
            .unwrap();
        for i in 1..=4 {
            assert_eq!(odds.put(i, noop()).unwrap(), Outcome::Ready(true));
        }
        assert_eq!(odds.count(), 2);
    }

    #[test]
    fn reduced_transform_closes_channel() {
        let rt = rt();
        let _g = rt.enter();
        let ch = Chan::<i32>::builder()
            .buffer(fixed::<i32>(4).unwrap())
            .transform(take_n(2))
            .build()
            .unwrap();
        assert_eq!(ch.put(1, noop()).unwrap(), Outcome::Ready(true));
        assert!(!ch.is_closed());
        assert_eq!(ch.put(2, noop()).unwrap(), Outcome::Ready(true));
        assert!(ch.is_closed());
        assert_eq!(ch.put(3, noop()).unwrap(), Outcome::Ready(false));
        assert_eq!(ch.take(noop()).unwrap(), Outcome::Ready(Some(1)));
        assert_eq!(ch.take(noop()).unwrap(), Outcome::Ready(Some(2)));
        assert_eq!(ch.take(noop()).unwrap(), Outcome::Ready(None));
    }

    #[test]
    fn transform_error_goes_to_hook() {
        let rt = rt();
        let _g = rt.enter();
        let failures = Rc::new(Cell::new(0));
        let f = failures.clone();
        let ch = Chan::<i32>::builder()
            .buffer(fixed::<i32>(4).unwrap())
            .transform(try_map(|v: i32| {
                if v < 0 {
                    Err(TransformError::new("negative"))
                } else {
                    Ok(v)
                }
            }))
            .on_error(move |_| {
                f.set(f.get() + 1);
                Some(0)
            })
            .build()
            .unwrap();
        assert_eq!(ch.put(-5, noop()).unwrap(), Outcome::Ready(true));
        assert_eq!(failures.get(), 1);
        assert!(!ch.is_closed());
        assert_eq!(ch.take(noop()).unwrap(), Outcome::Ready(Some(0)));
    }

    #[test]
    fn hook_can_close_its_own_channel() {
        let rt = rt();
        let _g = rt.enter();
        let slot: Rc<RefCell<Option<Chan<i32>>>> = Rc::new(RefCell::new(None));
        let s = slot.clone();
        let offered = Rc::new(Cell::new(None));
        let o = offered.clone();
        let ch = Chan::<i32>::builder()
            .buffer(fixed::<i32>(4).unwrap())
            .transform(try_map(|_: i32| -> Result<i32, TransformError> {
                Err(TransformError::new("always"))
            }))
            .on_error(move |_| {
                if let Some(c) = s.borrow().as_ref() {
                    o.set(Some(crate::process::offer(c, 9)));
                    c.close();
                    assert!(c.is_closed());
                }
                None
            })
            .build()
            .unwrap();
        *slot.borrow_mut() = Some(ch.clone());

        let (takes, take_handler) = recording::<Option<i32>>();
        assert_eq!(ch.take(take_handler()).unwrap(), Outcome::Pending);
        assert_eq!(ch.put(1, noop()).unwrap(), Outcome::Ready(true));
        assert_eq!(offered.get(), Some(false));
        assert!(ch.is_closed());
        assert_eq!(ch.put(2, noop()).unwrap(), Outcome::Ready(false));
        rt.run();
        assert_eq!(*takes.borrow(), vec![None]);
        slot.borrow_mut().take();
    }

    #[test]
    fn reentrant_put_from_transform_is_rejected() {
        let rt = rt();
        let _g = rt.enter();
        let slot: Rc<RefCell<Option<Chan<i32>>>> = Rc::new(RefCell::new(None));
        let s = slot.clone();
        let inner = Rc::new(RefCell::new(None));
        let i = inner.clone();
        let ch = Chan::<i32>::builder()
            .buffer(fixed::<i32>(4).unwrap())
            .transform(
                move |buf: &mut dyn Buffer<i32>, v: i32| -> Result<Step, TransformError> {
                    if let Some(c) = s.borrow().as_ref() {
                        *i.borrow_mut() = Some(c.put(v + 1, FnHandler::non_blocking()));
                    }
                    buf.add(v);
                    Ok(Step::Continue)
                },
            )
            .build()
            .unwrap();
        *slot.borrow_mut() = Some(ch.clone());

        assert_eq!(ch.put(5, noop()).unwrap(), Outcome::Ready(true));
        assert_eq!(*inner.borrow(), Some(Err(Error::Reentrant(ch.id()))));
        assert_eq!(ch.count(), 1);
        assert!(!ch.is_closed());
        slot.borrow_mut().take();
    }

    #[test]
    fn default_hook_drops_value_and_keeps_channel_open() {
        let rt = rt();
        let _g = rt.enter();
        let ch = Chan::<i32>::builder()
            .buffer(fixed::<i32>(4).unwrap())
            .transform(try_map(|_: i32| -> Result<i32, TransformError> {
                Err(TransformError::new("always"))
            }))
            .build()
            .unwrap();
        assert_eq!(ch.put(1, noop()).unwrap(), Outcome::Ready(true));
        assert_eq!(ch.count(), 0);
        assert!(!ch.is_closed());
    }

    #[test]
    fn queue_overflow_is_an_error() {
        let rt = rt();
        let _g = rt.enter();
        let ch = Chan::<i32>::builder()
            .limits(Limits {
                max_dirty: 64,
                max_queue_size: 3,
            })
            .build()
            .unwrap();
        for _ in 0..3 {
            assert!(ch.take(noop()).unwrap().is_pending());
        }
        assert_eq!(
            ch.take(noop()).unwrap_err(),
            Error::overflow(Side::Takes, 3)
        );
        for i in 0..3 {
            // Parked takers absorb these.
            assert_eq!(ch.put(i, noop()).unwrap(), Outcome::Ready(true));
        }
        for i in 0..3 {
            assert!(ch.put(i, noop()).unwrap().is_pending());
        }
        assert_eq!(
            ch.put(9, noop()).unwrap_err(),
            Error::overflow(Side::Puts, 3)
        );
    }

    #[test]
    fn non_blocking_handlers_are_never_parked() {
        let rt = rt();
        let _g = rt.enter();
        let ch = unbuffered::<i32>();
        assert!(ch.put(1, FnHandler::non_blocking()).unwrap().is_pending());
        assert!(ch.take(FnHandler::non_blocking()).unwrap().is_pending());
        assert_eq!(ch.pending_puts(), 0);
        assert_eq!(ch.pending_takes(), 0);
    }

    #[test]
    fn inactive_handlers_are_skipped_and_swept() {
        let rt = rt();
        let _g = rt.enter();
        let ch = Chan::<i32>::builder()
            .limits(Limits {
                max_dirty: 2,
                max_queue_size: 1024,
            })
            .build()
            .unwrap();
        let dead = Flag::new();
        for _ in 0..5 {
            let _ = ch.take(AltHandler::new(dead.clone(), |_| {})).unwrap();
        }
        dead.lower();
        assert_eq!(ch.pending_takes(), 5);
        // The third live take pushes the dirty counter past max_dirty and
        // sweeps the five dead handlers before parking.
        for _ in 0..3 {
            let _ = ch.take(noop()).unwrap();
        }
        assert_eq!(ch.pending_takes(), 3);

        // An inactive taker is passed over by a put.
        let ch = unbuffered::<i32>();
        let flag = Flag::new();
        let _ = ch.take(AltHandler::new(flag.clone(), |_| {})).unwrap();
        flag.lower();
        assert!(ch.put(5, FnHandler::non_blocking()).unwrap().is_pending());
    }

    #[test]
    fn inactive_puts_are_skipped_and_swept() {
        let rt = rt();
        let _g = rt.enter();
        let ch = Chan::<i32>::builder()
            .limits(Limits {
                max_dirty: 2,
                max_queue_size: 1024,
            })
            .build()
            .unwrap();
        let dead = Flag::new();
        for v in 0..5 {
            let _ = ch.put(v, AltHandler::new(dead.clone(), |_| {})).unwrap();
        }
        dead.lower();
        assert_eq!(ch.pending_puts(), 5);
        for v in 10..13 {
            let _ = ch.put(v, noop()).unwrap();
        }
        assert_eq!(ch.pending_puts(), 3);
        assert_eq!(ch.take(noop()).unwrap(), Outcome::Ready(Some(10)));

        // An inactive putter is passed over by a take.
        let ch = unbuffered::<i32>();
        let flag = Flag::new();
        let _ = ch.put(1, AltHandler::new(flag.clone(), |_| {})).unwrap();
        flag.lower();
        assert!(ch.take(FnHandler::non_blocking()).unwrap().is_pending());
        assert_eq!(ch.pending_puts(), 0);
    }

    #[test]
    fn inactive_handler_is_a_noop() {
        let rt = rt();
        let _g = rt.enter();
        let ch = buffered::<i32>(1).unwrap();
        let flag = Flag::new();
        flag.lower();
        assert!(ch.put(1, AltHandler::new(flag, |_| {})).unwrap().is_pending());
        assert_eq!(ch.count(), 0);
    }

    #[test]
    fn identity_survives_clone() {
        let a = unbuffered::<i32>();
        let b = a.clone();
        let c = unbuffered::<i32>();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.id(), b.id());
        assert!(format!("{:?}", a).contains("Chan"));
    }
}
