// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! What a suspended process is waiting for, and what it wakes up with.

use std::fmt;
use std::time::Duration;

use crate::channel::Chan;
use crate::select::{AltOp, AltResult, AltsOptions};

/// A request a process yields to the scheduler.
pub enum Instruction<T: 'static> {
    Take(Chan<T>),
    Put(Chan<T>, T),
    Sleep(Duration),
    Alts(Vec<AltOp<T>>, AltsOptions<T>),
}

impl<T: 'static> Instruction<T> {
    pub fn kind(&self) -> &'static str {
        match self {
            Instruction::Take(_) => "take",
            Instruction::Put(..) => "put",
            Instruction::Sleep(_) => "sleep",
            Instruction::Alts(..) => "alts",
        }
    }
}

impl<T: 'static> fmt::Debug for Instruction<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Take(ch) => f.debug_tuple("Take").field(&ch.id()).finish(),
            Instruction::Put(ch, _) => f.debug_tuple("Put").field(&ch.id()).finish(),
            Instruction::Sleep(d) => f.debug_tuple("Sleep").field(d).finish(),
            Instruction::Alts(ops, opts) => f
                .debug_struct("Alts")
                .field("ops", &ops.len())
                .field("priority", &opts.priority)
                .field("has_default", &opts.default.is_some())
                .finish(),
        }
    }
}

/// The value an [`Instruction`] resolves to.
#[derive(Debug, Clone, PartialEq)]
pub enum Resumed<T> {
    Taken(Option<T>),
    Put(bool),
    Slept,
    Alts(AltResult<T>),
}

impl<T> Resumed<T> {
    pub fn kind(&self) -> &'static str {
        match self {
            Resumed::Taken(_) => "take",
            Resumed::Put(_) => "put",
            Resumed::Slept => "sleep",
            Resumed::Alts(_) => "alts",
        }
    }
}
