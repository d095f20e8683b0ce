// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Timeout channels.
//!
//! A timeout channel never carries a value. It closes once the delay has
//! elapsed, so a take (or an `alts` arm) on it resolves to `None`.

use std::time::Duration;

use crate::channel::{unbuffered, Chan};
use crate::runtime::queue_delay;

/// Channel that closes after `delay`.
///
/// # Panics
///
/// Panics if no runtime has been entered on this thread.
pub fn timeout<T: 'static>(delay: Duration) -> Chan<T> {
    let ch = unbuffered();
    let closer = ch.clone();
    queue_delay(delay, move || {
        tracing::trace!(channel = %closer.id(), ?delay, "timeout elapsed");
        closer.close();
    });
    ch
}
