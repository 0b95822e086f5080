//! Environment abstraction for deterministic testing.
//!
//! Decouples the chat state machines from the system clock. Production code
//! runs on the tokio clock, tests run on tokio's paused clock or on hand-built
//! instants, and the state machines themselves never read time on their own:
//! every method that needs it takes `now` as an argument.

use std::{
    fmt::Debug,
    ops::{Add, Sub},
    time::Duration,
};

/// Monotonic instant usable by the state machines.
///
/// Implemented for every type with the right arithmetic, which covers both
/// `std::time::Instant` and `tokio::time::Instant`.
pub trait TimePoint:
    Copy + Ord + Debug + Send + Sync + Sub<Output = Duration> + Add<Duration, Output = Self>
{
}

impl<T> TimePoint for T where
    T: Copy + Ord + Debug + Send + Sync + Sub<Output = Duration> + Add<Duration, Output = Self>
{
}

/// Abstract environment providing time and async sleeping.
///
/// # Invariants
///
/// - `now()` never goes backwards within a single execution context.
pub trait Environment: Clone + Send + Sync + 'static {
    /// The specific instant type used by this environment.
    type Instant: TimePoint + 'static;

    /// Current time (monotonic).
    fn now(&self) -> Self::Instant;

    /// Sleeps for the specified duration.
    ///
    /// Only runtime code awaits this; the state machines never sleep.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;
}
