// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Choice over several channel operations.
//!
//! `do_alts` registers one handler per operation, all sharing a [`Flag`].
//! Whichever channel commits first lowers the flag; the rest find their
//! handler inactive and skip or sweep it. Operations are tried in random
//! order unless `priority` is set, so no channel is systematically favoured.

use std::cell::RefCell;
use std::rc::Rc;

use rand::seq::SliceRandom;

use crate::channel::{Chan, ChannelId};
use crate::error::Error;
use crate::handler::{AltHandler, Flag};
use crate::runtime::Handle;

/// One candidate operation.
pub enum AltOp<T: 'static> {
    Take(Chan<T>),
    Put(Chan<T>, T),
}

impl<T: 'static> AltOp<T> {
    pub fn take(ch: &Chan<T>) -> Self {
        AltOp::Take(ch.clone())
    }

    pub fn put(ch: &Chan<T>, value: T) -> Self {
        AltOp::Put(ch.clone(), value)
    }

    pub fn channel(&self) -> &Chan<T> {
        match self {
            AltOp::Take(ch) | AltOp::Put(ch, _) => ch,
        }
    }
}

pub struct AltsOptions<T> {
    /// Try operations in the order given.
    pub priority: bool,
    /// Returned immediately if nothing is ready.
    pub default: Option<T>,
}

impl<T> AltsOptions<T> {
    pub fn new() -> Self {
        Self {
            priority: false,
            default: None,
        }
    }

    pub fn priority(mut self) -> Self {
        self.priority = true;
        self
    }

    pub fn with_default(mut self, value: T) -> Self {
        self.default = Some(value);
        self
    }
}

impl<T> Default for AltsOptions<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Which operation won, and its result.
#[derive(Debug, Clone, PartialEq)]
pub enum AltResult<T> {
    Take { channel: ChannelId, value: Option<T> },
    Put { channel: ChannelId, delivered: bool },
    /// Nothing was ready and a default was supplied.
    Default(T),
}

impl<T> AltResult<T> {
    /// `None` for [`AltResult::Default`].
    pub fn channel(&self) -> Option<ChannelId> {
        match self {
            AltResult::Take { channel, .. } | AltResult::Put { channel, .. } => Some(*channel),
            AltResult::Default(_) => None,
        }
    }

    pub fn is_from(&self, ch: &Chan<T>) -> bool
    where
        T: 'static,
    {
        self.channel() == Some(ch.id())
    }

    pub fn is_default(&self) -> bool {
        matches!(self, AltResult::Default(_))
    }
}

type SharedCallback<T> = Rc<RefCell<Option<Box<dyn FnOnce(AltResult<T>)>>>>;

fn fire<T>(callback: &SharedCallback<T>, result: AltResult<T>) {
    let f = callback.borrow_mut().take();
    if let Some(f) = f {
        f(result);
    }
}

fn shuffle(order: &mut [usize]) {
    match Handle::try_current() {
        Ok(handle) => handle.shuffle(order),
        Err(_) => order.shuffle(&mut rand::thread_rng()),
    }
}

/// Attempt every operation; `callback` runs exactly once with the winner.
///
/// If some operation completes immediately the callback runs before this
/// returns. Otherwise it runs later through the dispatcher, or with
/// [`AltResult::Default`] right away when `options.default` is set.
pub fn do_alts<T, F>(
    operations: Vec<AltOp<T>>,
    callback: F,
    options: AltsOptions<T>,
) -> Result<(), Error>
where
    T: 'static,
    F: FnOnce(AltResult<T>) + 'static,
{
    if operations.is_empty() {
        return Err(Error::EmptyAlts);
    }
    let flag = Flag::new();
    let callback: SharedCallback<T> = Rc::new(RefCell::new(Some(Box::new(callback))));

    let mut order: Vec<usize> = (0..operations.len()).collect();
    if !options.priority {
        shuffle(&mut order);
    }
    let mut slots: Vec<Option<AltOp<T>>> = operations.into_iter().map(Some).collect();

    for index in order {
        let Some(op) = slots[index].take() else {
            continue;
        };
        let immediate = match op {
            AltOp::Take(ch) => {
                let channel = ch.id();
                let cb = callback.clone();
                let handler = AltHandler::new(flag.clone(), move |value| {
                    fire(&cb, AltResult::Take { channel, value })
                });
                ch.take(handler)?
                    .ready()
                    .map(|value| AltResult::Take { channel, value })
            }
            AltOp::Put(ch, value) => {
                let channel = ch.id();
                let cb = callback.clone();
                let handler = AltHandler::new(flag.clone(), move |delivered| {
                    fire(&cb, AltResult::Put { channel, delivered })
                });
                ch.put(value, handler)?
                    .ready()
                    .map(|delivered| AltResult::Put { channel, delivered })
            }
        };
        if let Some(result) = immediate {
            fire(&callback, result);
            return Ok(());
        }
    }

    if let Some(value) = options.default {
        if flag.is_raised() {
            flag.lower();
            fire(&callback, AltResult::Default(value));
        }
    }
    Ok(())
}
