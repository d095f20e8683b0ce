// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Processes: coroutines driven by channel events.
//!
//! A process wraps a local future. Each step polls it once. Awaiting one of
//! the suspension futures ([`take`], [`put`], [`sleep`], [`alts`]) hands an
//! [`Instruction`] to the engine and parks the process. The continuation
//! stores the result and reschedules the process on the dispatcher; the
//! next poll picks the result up.
//!
//! A future that returns `Pending` without issuing an instruction (for
//! example [`yield_now`]) is simply rescheduled.
//!
//! Wakers are not used. Everything is single-threaded and resumption is
//! always explicit, so processes are polled with a no-op waker.

use std::cell::{Cell, RefCell};
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};
use std::time::Duration;

use crate::buffers::FixedBuffer;
use crate::channel::{Chan, Outcome};
use crate::dispatch;
use crate::error::Error;
use crate::handler::FnHandler;
use crate::instruction::{Instruction, Resumed};
use crate::runtime::queue_delay;
use crate::select::{do_alts, AltOp, AltResult, AltsOptions};

/// Process lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Created,
    Running,
    /// Parked on an instruction or waiting to be rescheduled.
    Suspended,
    Finished,
}

pub(crate) type LocalBoxFuture<R> = Pin<Box<dyn Future<Output = R>>>;

pub(crate) trait Resumable {
    /// Queue another step on the dispatcher.
    fn resume(self: Rc<Self>);
    /// Record that the current step parked on an instruction.
    fn mark_suspended(&self);
}

thread_local! {
    static ACTIVE: RefCell<Vec<Rc<dyn Resumable>>> = const { RefCell::new(Vec::new()) };
}

/// Keeps a process on the active stack for the duration of one poll.
struct ActiveGuard;

impl ActiveGuard {
    fn enter(process: Rc<dyn Resumable>) -> Self {
        ACTIVE.with(|active| active.borrow_mut().push(process));
        ActiveGuard
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        ACTIVE.with(|active| {
            active.borrow_mut().pop();
        });
    }
}

fn active_process() -> Option<Rc<dyn Resumable>> {
    ACTIVE.with(|active| active.borrow().last().cloned())
}

struct NoopWaker;

impl Wake for NoopWaker {
    fn wake(self: Arc<Self>) {}
}

fn noop_waker() -> Waker {
    Waker::from(Arc::new(NoopWaker))
}

/// A coroutine plus the callback that receives its result.
pub struct Process<R: 'static> {
    coroutine: RefCell<Option<LocalBoxFuture<R>>>,
    on_finish: RefCell<Option<Box<dyn FnOnce(R)>>>,
    state: Cell<ProcessState>,
    parked: Cell<bool>,
}

impl<R: 'static> Process<R> {
    pub fn new<F, C>(coroutine: F, on_finish: C) -> Rc<Self>
    where
        F: Future<Output = R> + 'static,
        C: FnOnce(R) + 'static,
    {
        Rc::new(Self {
            coroutine: RefCell::new(Some(Box::pin(coroutine))),
            on_finish: RefCell::new(Some(Box::new(on_finish))),
            state: Cell::new(ProcessState::Created),
            parked: Cell::new(false),
        })
    }

    pub fn state(&self) -> ProcessState {
        self.state.get()
    }

    pub fn is_finished(&self) -> bool {
        self.state.get() == ProcessState::Finished
    }

    /// Run one step: poll the coroutine until it parks or finishes.
    pub fn run(self: &Rc<Self>) {
        if self.is_finished() {
            return;
        }
        self.state.set(ProcessState::Running);
        self.parked.set(false);

        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        let poll = {
            let _active = ActiveGuard::enter(self.clone());
            let mut slot = self.coroutine.borrow_mut();
            let Some(coroutine) = slot.as_mut() else {
                return;
            };
            coroutine.as_mut().poll(&mut cx)
        };

        match poll {
            Poll::Ready(value) => self.finish(value),
            Poll::Pending => {
                self.state.set(ProcessState::Suspended);
                if !self.parked.get() {
                    self.clone().resume();
                }
            }
        }
    }

    fn finish(&self, value: R) {
        self.state.set(ProcessState::Finished);
        tracing::trace!("process finished");
        let coroutine = self.coroutine.borrow_mut().take();
        drop(coroutine);
        let on_finish = self.on_finish.borrow_mut().take();
        if let Some(on_finish) = on_finish {
            on_finish(value);
        }
    }
}

impl<R: 'static> Resumable for Process<R> {
    fn resume(self: Rc<Self>) {
        dispatch::run(move || self.run());
    }

    fn mark_suspended(&self) {
        self.parked.set(true);
    }
}

impl<R: 'static> std::fmt::Debug for Process<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Process").field("state", &self.state.get()).finish()
    }
}

/// Carry out `instruction`, calling `resume` with its result. `resume` may
/// run before this returns.
pub(crate) fn perform<T: 'static>(
    instruction: Instruction<T>,
    resume: Box<dyn FnOnce(Resumed<T>)>,
) -> Result<(), Error> {
    match instruction {
        Instruction::Take(ch) => take_async(&ch, move |value| resume(Resumed::Taken(value))),
        Instruction::Put(ch, value) => {
            put_async(&ch, value, move |delivered| resume(Resumed::Put(delivered)))
        }
        Instruction::Sleep(delay) => {
            queue_delay(delay, move || resume(Resumed::Slept));
            Ok(())
        }
        Instruction::Alts(ops, options) => {
            do_alts(ops, move |result| resume(Resumed::Alts(result)), options)
        }
    }
}

/// Future that issues one instruction and resolves with its result.
///
/// Only meaningful inside a process; polling it anywhere else panics.
#[must_use = "futures do nothing unless awaited"]
pub struct Suspend<T: 'static, O> {
    instruction: Option<Instruction<T>>,
    slot: Rc<RefCell<Option<Resumed<T>>>>,
    extract: fn(Resumed<T>) -> O,
}

// Never pin-projected.
impl<T: 'static, O> Unpin for Suspend<T, O> {}

impl<T: 'static, O> Suspend<T, O> {
    fn new(instruction: Instruction<T>, extract: fn(Resumed<T>) -> O) -> Self {
        Self {
            instruction: Some(instruction),
            slot: Rc::new(RefCell::new(None)),
            extract,
        }
    }
}

impl<T: 'static, O> Future for Suspend<T, O> {
    type Output = O;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<O> {
        let this = &mut *self;
        let resumed = this.slot.borrow_mut().take();
        if let Some(resumed) = resumed {
            return Poll::Ready((this.extract)(resumed));
        }
        let Some(process) = active_process() else {
            panic!("channel instructions can only be awaited inside a process");
        };
        process.mark_suspended();
        if let Some(instruction) = this.instruction.take() {
            tracing::trace!(instruction = instruction.kind(), "process parked");
            let slot = this.slot.clone();
            let resume = Box::new(move |resumed| {
                *slot.borrow_mut() = Some(resumed);
                process.resume();
            });
            if let Err(err) = perform(instruction, resume) {
                panic!("{err}");
            }
        }
        Poll::Pending
    }
}

impl<T: 'static, O> std::fmt::Debug for Suspend<T, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Suspend")
            .field("instruction", &self.instruction)
            .field("resumed", &self.slot.borrow().is_some())
            .finish()
    }
}

fn expect_taken<T>(resumed: Resumed<T>) -> Option<T> {
    match resumed {
        Resumed::Taken(value) => value,
        other => unreachable!("take resumed with a {} result", other.kind()),
    }
}

fn expect_put<T>(resumed: Resumed<T>) -> bool {
    match resumed {
        Resumed::Put(delivered) => delivered,
        other => unreachable!("put resumed with a {} result", other.kind()),
    }
}

fn expect_slept(resumed: Resumed<()>) {
    match resumed {
        Resumed::Slept => {}
        other => unreachable!("sleep resumed with a {} result", other.kind()),
    }
}

fn expect_alts<T>(resumed: Resumed<T>) -> AltResult<T> {
    match resumed {
        Resumed::Alts(result) => result,
        other => unreachable!("alts resumed with a {} result", other.kind()),
    }
}

pub type TakeFuture<T> = Suspend<T, Option<T>>;
pub type PutFuture<T> = Suspend<T, bool>;
pub type SleepFuture = Suspend<(), ()>;
pub type AltsFuture<T> = Suspend<T, AltResult<T>>;

/// Take from `ch`. Resolves to `None` once the channel is closed and drained.
pub fn take<T: 'static>(ch: &Chan<T>) -> TakeFuture<T> {
    Suspend::new(Instruction::Take(ch.clone()), expect_taken)
}

/// Put into `ch`. Resolves to `false` if the channel was closed.
pub fn put<T: 'static>(ch: &Chan<T>, value: T) -> PutFuture<T> {
    Suspend::new(Instruction::Put(ch.clone(), value), expect_put)
}

pub fn sleep(delay: Duration) -> SleepFuture {
    Suspend::new(Instruction::Sleep(delay), expect_slept)
}

/// Wait for the first of `ops` to complete.
///
/// # Panics
///
/// Panics when awaited with an empty `ops`.
pub fn alts<T: 'static>(ops: Vec<AltOp<T>>, options: AltsOptions<T>) -> AltsFuture<T> {
    Suspend::new(Instruction::Alts(ops, options), expect_alts)
}

impl<T: 'static> IntoFuture for &Chan<T> {
    type Output = Option<T>;
    type IntoFuture = TakeFuture<T>;

    fn into_future(self) -> TakeFuture<T> {
        take(self)
    }
}

/// Resolves after being polled twice, giving other work a turn in between.
#[derive(Debug)]
#[must_use = "futures do nothing unless awaited"]
pub struct YieldNow {
    yielded: bool,
}

pub fn yield_now() -> YieldNow {
    YieldNow { yielded: false }
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            Poll::Ready(())
        } else {
            self.yielded = true;
            Poll::Pending
        }
    }
}

/// Start a process. Its first step runs before this returns.
///
/// The returned channel yields the process's value once and then closes.
/// `None` closes it without a value.
pub fn spawn<R, F>(coroutine: F) -> Chan<R>
where
    R: 'static,
    F: Future<Output = Option<R>> + 'static,
{
    let out: Chan<R> = Chan::with_buffer(FixedBuffer::with_capacity(std::num::NonZeroUsize::MIN));
    let result = out.clone();
    let process = Process::new(coroutine, move |value: Option<R>| match value {
        None => result.close(),
        Some(value) => {
            let closer = result.clone();
            if let Err(err) = put_async(&result, value, move |_| closer.close()) {
                tracing::error!(error = %err, "failed to deliver process result");
                result.close();
            }
        }
    });
    process.run();
    out
}

/// [`spawn`] for coroutines that always produce a value.
pub fn go<R, F>(coroutine: F) -> Chan<R>
where
    R: 'static,
    F: Future<Output = R> + 'static,
{
    spawn(async move { Some(coroutine.await) })
}

/// Put with a callback. An immediate result invokes `on_done` before
/// returning; otherwise it runs later through the dispatcher.
pub fn put_async<T, F>(ch: &Chan<T>, value: T, on_done: F) -> Result<(), Error>
where
    T: 'static,
    F: FnOnce(bool) + 'static,
{
    let callback = Rc::new(Cell::new(Some(on_done)));
    let parked = callback.clone();
    let outcome = ch.put(
        value,
        FnHandler::new(move |delivered| {
            if let Some(f) = parked.take() {
                f(delivered);
            }
        }),
    )?;
    if let Outcome::Ready(delivered) = outcome {
        if let Some(f) = callback.take() {
            f(delivered);
        }
    }
    Ok(())
}

/// Take with a callback. Same timing rules as [`put_async`].
pub fn take_async<T, F>(ch: &Chan<T>, on_done: F) -> Result<(), Error>
where
    T: 'static,
    F: FnOnce(Option<T>) + 'static,
{
    let callback = Rc::new(Cell::new(Some(on_done)));
    let parked = callback.clone();
    let outcome = ch.take(FnHandler::new(move |value| {
        if let Some(f) = parked.take() {
            f(value);
        }
    }))?;
    if let Outcome::Ready(value) = outcome {
        if let Some(f) = callback.take() {
            f(value);
        }
    }
    Ok(())
}

/// Take only if a value is available right now. A closed channel yields
/// `None` even if values remain buffered.
pub fn poll<T: 'static>(ch: &Chan<T>) -> Option<T> {
    if ch.is_closed() {
        return None;
    }
    match ch.take(FnHandler::non_blocking()) {
        Ok(Outcome::Ready(value)) => value,
        _ => None,
    }
}

/// Put only if it can complete right now. `true` means delivered.
pub fn offer<T: 'static>(ch: &Chan<T>, value: T) -> bool {
    matches!(
        ch.put(value, FnHandler::non_blocking()),
        Ok(Outcome::Ready(true))
    )
}
