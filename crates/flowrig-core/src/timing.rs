//! Wait primitive and cooperative cancellation
//!
//! Every real-time wait in the crate goes through a [`Clock`], so sequences
//! can run against [`ManualClock`] in tests without sleeping.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Source of time and blocking waits
pub trait Clock: Send + Sync {
    /// Block for `duration`
    fn sleep(&self, duration: Duration);

    /// Time since the clock was created
    fn elapsed(&self) -> Duration;
}

/// Wall clock backed by `std::thread::sleep`
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// New clock starting now
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }

    fn elapsed(&self) -> Duration {
        self.origin.elapsed()
    }
}

#[derive(Debug, Default)]
struct ManualState {
    elapsed: Duration,
    sleeps: Vec<Duration>,
    cancel_at: Option<(Duration, CancelToken)>,
}

/// Clock that advances only when slept on
///
/// Each `sleep` returns immediately, adds to the virtual elapsed time and is
/// recorded for later inspection.
#[derive(Debug, Default)]
pub struct ManualClock {
    state: Mutex<ManualState>,
}

impl ManualClock {
    /// New clock at t = 0
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel `token` once virtual time reaches `at`
    pub fn cancel_at(&self, at: Duration, token: CancelToken) {
        self.lock().cancel_at = Some((at, token));
    }

    /// Every wait requested so far, in order
    pub fn sleeps(&self) -> Vec<Duration> {
        self.lock().sleeps.clone()
    }

    /// Sum of all waits
    pub fn total_slept(&self) -> Duration {
        self.lock().elapsed
    }

    fn lock(&self) -> MutexGuard<'_, ManualState> {
        // A panic while holding the lock only happens in a failing test
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Clock for ManualClock {
    fn sleep(&self, duration: Duration) {
        let mut state = self.lock();
        state.elapsed += duration;
        state.sleeps.push(duration);
        if let Some((at, token)) = &state.cancel_at {
            if state.elapsed >= *at {
                token.cancel();
            }
        }
    }

    fn elapsed(&self) -> Duration {
        self.lock().elapsed
    }
}

/// Shared cancellation flag
///
/// Cloning yields a handle to the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// New, uncancelled token
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Wait for `duration` in slices of at most `slice`, returning early with
/// `false` if `cancel` fires.
pub fn wait_cancellable(
    clock: &dyn Clock,
    duration: Duration,
    slice: Duration,
    cancel: &CancelToken,
) -> bool {
    let slice = if slice.is_zero() { duration } else { slice };
    let mut remaining = duration;
    while !remaining.is_zero() {
        if cancel.is_cancelled() {
            return false;
        }
        let step = remaining.min(slice);
        clock.sleep(step);
        remaining -= step;
    }
    !cancel.is_cancelled()
}
