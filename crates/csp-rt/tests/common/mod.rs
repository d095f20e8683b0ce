// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::sync::Once;

use csp_rt::{Runtime, RuntimeConfig};

static INIT_LOGGING: Once = Once::new();

/// Route `tracing` output through the test harness. First call wins.
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_test_writer()
            .with_target(true)
            .with_ansi(false)
            .try_init();
    });
}

pub const TEST_SEED: u64 = 0x5eed_c5b0;

/// Runtime with a virtual clock and a fixed shuffle seed.
pub fn test_runtime() -> Runtime {
    init_test_logging();
    Runtime::with_config(RuntimeConfig::new().virtual_time(true).seed(TEST_SEED))
}
