//! Production environment over the tokio clock.
//!
//! Uses `tokio::time::Instant` rather than the std clock so that tests running
//! under `#[tokio::test(start_paused = true)]` drive the same code with
//! virtual time.

use std::time::Duration;

use courier_core::Environment;

/// Production environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    type Instant = tokio::time::Instant;

    fn now(&self) -> Self::Instant {
        tokio::time::Instant::now()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }
}
