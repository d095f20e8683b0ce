// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! CSP channels, `alts`, and a cooperative process scheduler.
//!
//! Single-threaded throughout. A [`Runtime`] is the host event loop:
//! it owns the dispatcher that runs channel continuations and the timers
//! behind `sleep` and [`timeout`]. Processes are plain `async` blocks that
//! await channel instructions:
//!
//! ```
//! use csp_rt::{go, put, take, unbuffered, Runtime};
//!
//! let rt = Runtime::new();
//! let sum = rt.block_on(async {
//!     let ch = unbuffered::<u32>();
//!     let tx = ch.clone();
//!     go(async move {
//!         for n in 1..=3 {
//!             put(&tx, n).await;
//!         }
//!         tx.close();
//!     });
//!     let mut sum = 0;
//!     while let Some(n) = take(&ch).await {
//!         sum += n;
//!     }
//!     sum
//! });
//! assert_eq!(sum, Ok(6));
//! ```
//!
//! Components:
//! - ring/buffers: storage and buffering policies
//! - channel: put/take/close protocol, transforms
//! - dispatch/runtime: continuation trampoline and host loop
//! - process/instruction: coroutine driver
//! - select/timeout: choice and timers

pub mod buffers;
pub mod channel;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod instruction;
pub mod process;
pub mod ring;
pub mod runtime;
pub mod select;
pub mod timeout;
pub mod transform;

/// Parks allowed between sweeps of inactive handlers.
pub const MAX_DIRTY: usize = 64;
/// Parked operations allowed per side of a channel.
pub const MAX_QUEUE_SIZE: usize = 1024;
/// Initial capacity of channel queues and the dispatcher.
pub const DEFAULT_RING_CAPACITY: usize = 32;
/// Dispatcher tasks run per host tick.
pub const TASK_BATCH_SIZE: usize = 1024;

pub use buffers::{dropping, fixed, promise, sliding, Buffer};
pub use channel::{
    buffered, promise_chan, unbuffered, Chan, ChanBuilder, ChannelId, Limits, Outcome,
};
pub use error::{Error, Side};
pub use handler::{AltHandler, Flag, FnHandler, Handler};
pub use instruction::{Instruction, Resumed};
pub use process::{
    alts, go, offer, poll, put, put_async, sleep, spawn, take, take_async, yield_now, Process,
    ProcessState,
};
pub use runtime::{queue_delay, Handle, Runtime, RuntimeConfig};
pub use select::{do_alts, AltOp, AltResult, AltsOptions};
pub use timeout::timeout;
pub use transform::{Step, Transform, TransformError};
