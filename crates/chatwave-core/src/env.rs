//! Environment abstraction for deterministic testing.
//!
//! Decouples session logic from the wall clock. Production drivers use real
//! time; the simulation harness uses a virtual clock that only moves when a
//! test advances it, so reconnect and typing timers can be exercised without
//! sleeping.

use std::{
    fmt::Debug,
    ops::{Add, Sub},
    time::Duration,
};

/// Point on a monotonic clock.
///
/// Blanket-implemented for any type with the right arithmetic, which covers
/// `std::time::Instant`, `tokio::time::Instant`, and virtual instants.
pub trait Moment:
    Copy + Ord + Send + Sync + Debug + Sub<Output = Duration> + Add<Duration, Output = Self>
{
}

impl<T> Moment for T where
    T: Copy + Ord + Send + Sync + Debug + Sub<Output = Duration> + Add<Duration, Output = T>
{
}

/// Abstract environment providing time and async sleeping.
///
/// # Invariants
///
/// Implementations MUST guarantee that `now()` never goes backwards.
pub trait Environment: Clone + Send + Sync + 'static {
    /// The specific instant type used by this environment.
    ///
    /// Production environments use `std::time::Instant`, while simulation
    /// environments use a virtual instant.
    type Instant: Moment;

    /// Current time (monotonic).
    fn now(&self) -> Self::Instant;

    /// Sleeps for the specified duration.
    ///
    /// Only driver code sleeps. State machines take `now` as a parameter and
    /// report their next deadline instead.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;
}
