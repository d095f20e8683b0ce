// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Per-value transforms applied as items enter a channel's buffer.
//!
//! A transform sees every put before any taker does. `step` decides what
//! (if anything) lands in the buffer and may ask the channel to close by
//! returning [`Step::Reduced`]. `complete` runs once when the channel closes.
//!
//! Failures are routed to the channel's [`ExceptionHook`], which may supply
//! a substitute value. They never close the channel on their own.

use std::error::Error as StdError;
use std::rc::Rc;

use thiserror::Error;

use crate::buffers::Buffer;

/// Outcome of one transform step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    /// Early termination: the channel closes once the step returns.
    Reduced,
}

/// Failure inside a transform.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct TransformError {
    message: String,
    #[source]
    source: Option<Box<dyn StdError + 'static>>,
}

impl TransformError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source<E: StdError + 'static>(message: impl Into<String>, source: E) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

pub trait Transform<T> {
    fn step(&mut self, buf: &mut dyn Buffer<T>, input: T) -> Result<Step, TransformError>;

    fn complete(&mut self, _buf: &mut dyn Buffer<T>) -> Result<(), TransformError> {
        Ok(())
    }
}

impl<T, F> Transform<T> for F
where
    F: FnMut(&mut dyn Buffer<T>, T) -> Result<Step, TransformError>,
{
    fn step(&mut self, buf: &mut dyn Buffer<T>, input: T) -> Result<Step, TransformError> {
        self(buf, input)
    }
}

/// Recovery hook: `Some(v)` admits `v` into the buffer, `None` swallows
/// the error.
pub type ExceptionHook<T> = Rc<dyn Fn(&TransformError) -> Option<T>>;

/// Logs the failure and admits nothing.
pub fn default_exception_hook<T>(err: &TransformError) -> Option<T> {
    tracing::error!(error = %err, "error in channel transform");
    None
}

pub struct Map<F>(F);

pub fn map<F>(f: F) -> Map<F> {
    Map(f)
}

impl<T, F: FnMut(T) -> T> Transform<T> for Map<F> {
    fn step(&mut self, buf: &mut dyn Buffer<T>, input: T) -> Result<Step, TransformError> {
        buf.add((self.0)(input));
        Ok(Step::Continue)
    }
}

pub struct Filter<P>(P);

pub fn filter<P>(pred: P) -> Filter<P> {
    Filter(pred)
}

impl<T, P: FnMut(&T) -> bool> Transform<T> for Filter<P> {
    fn step(&mut self, buf: &mut dyn Buffer<T>, input: T) -> Result<Step, TransformError> {
        if (self.0)(&input) {
            buf.add(input);
        }
        Ok(Step::Continue)
    }
}

/// Admits the first `n` values, then reduces.
pub struct TakeN {
    remaining: usize,
}

pub fn take_n(n: usize) -> TakeN {
    TakeN { remaining: n }
}

impl<T> Transform<T> for TakeN {
    fn step(&mut self, buf: &mut dyn Buffer<T>, input: T) -> Result<Step, TransformError> {
        if self.remaining == 0 {
            return Ok(Step::Reduced);
        }
        buf.add(input);
        self.remaining -= 1;
        if self.remaining == 0 {
            Ok(Step::Reduced)
        } else {
            Ok(Step::Continue)
        }
    }
}

pub struct TryMap<F>(F);

/// Fallible map. An `Err` goes to the channel's exception hook.
pub fn try_map<F>(f: F) -> TryMap<F> {
    TryMap(f)
}

impl<T, F: FnMut(T) -> Result<T, TransformError>> Transform<T> for TryMap<F> {
    fn step(&mut self, buf: &mut dyn Buffer<T>, input: T) -> Result<Step, TransformError> {
        buf.add((self.0)(input)?);
        Ok(Step::Continue)
    }
}
