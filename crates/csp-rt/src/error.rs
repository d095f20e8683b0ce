// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Engine error types.
//!
//! Every variant here is a usage error: the caller asked for something the
//! engine refuses to do. Transform failures are separate (see
//! [`crate::transform::TransformError`]) because they are recoverable.

use std::fmt;

use thiserror::Error;

use crate::channel::ChannelId;

/// Which pending-operation queue of a channel an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Puts,
    Takes,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Puts => write!(f, "puts"),
            Side::Takes => write!(f, "takes"),
        }
    }
}

/// A usage error raised synchronously at the offending call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A ring or buffer was requested with capacity 0.
    #[error("can't create a ring buffer of size 0")]
    ZeroCapacity,

    /// A transform was supplied for a channel without a buffer.
    #[error("only buffered channels can use transforms")]
    TransformWithoutBuffer,

    /// Too many operations are parked on one side of a channel.
    #[error("no more than {limit} pending {side} are allowed on a single channel")]
    QueueOverflow { side: Side, limit: usize },

    /// `alts` was called with no operations.
    #[error("empty alt list")]
    EmptyAlts,

    /// Work was scheduled with no runtime entered on this thread.
    #[error("no csp runtime is active on this thread")]
    NoRuntime,

    /// A channel operation was issued from that channel's own transform or
    /// exception hook.
    #[error("{0} is busy running its transform or exception hook")]
    Reentrant(ChannelId),

    /// The runtime ran out of work before the process it was driving finished.
    #[error("runtime went idle before the process finished")]
    Stalled,
}

impl Error {
    pub fn overflow(side: Side, limit: usize) -> Self {
        Error::QueueOverflow { side, limit }
    }
}
