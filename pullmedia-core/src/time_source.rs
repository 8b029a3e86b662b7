//! Monotonic time sources with pause, resume and rebase
//!
//! A [`Clock`] provides raw monotonic microseconds; [`SyncTimeSource`] layers
//! pause accounting and epoch shifts on top of one. Tests inject
//! [`ManualClock`] to make timing deterministic.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Raw monotonic clock in microseconds
pub trait Clock: Send + Sync {
    /// Microseconds since an arbitrary fixed origin; never decreases
    fn now_us(&self) -> i64;
}

/// Wall-independent clock backed by [`Instant`]
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// Clock whose origin is now
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_us(&self) -> i64 {
        i64::try_from(self.origin.elapsed().as_micros()).unwrap_or(i64::MAX)
    }
}

/// Manually advanced clock; clones share the same time
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    /// Clock starting at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward by `delta_us`
    pub fn advance_us(&self, delta_us: i64) {
        self.now.fetch_add(delta_us, Ordering::SeqCst);
    }

    /// Move time forward by `delta_ms` milliseconds
    pub fn advance_ms(&self, delta_ms: i64) {
        self.advance_us(delta_ms * 1_000);
    }
}

impl Clock for ManualClock {
    fn now_us(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Source of presentation/capture time
pub trait TimeSource: Send + Sync {
    /// Current time in microseconds
    fn real_time_us(&self) -> i64;
}

/// Plain monotonic time since construction
pub struct SystemTimeSource {
    clock: Arc<dyn Clock>,
    start_us: i64,
}

impl SystemTimeSource {
    /// Time source on the system monotonic clock
    pub fn new() -> Self {
        Self::with_clock(Arc::new(MonotonicClock::new()))
    }

    /// Time source on an injected clock
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let start_us = clock.now_us();
        Self { clock, start_us }
    }
}

impl Default for SystemTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for SystemTimeSource {
    fn real_time_us(&self) -> i64 {
        self.clock.now_us() - self.start_us
    }
}

#[derive(Debug, Default)]
struct SyncState {
    start_us: i64,
    paused_at_us: Option<i64>,
    paused_total_us: i64,
}

/// Time source that can be paused, resumed, reset and rebased
///
/// Reports monotonic time since construction minus the accumulated paused
/// duration. Every mutator and the getter serialize on one lock.
pub struct SyncTimeSource {
    clock: Arc<dyn Clock>,
    state: Mutex<SyncState>,
}

impl SyncTimeSource {
    /// Time source on the system monotonic clock
    pub fn new() -> Self {
        Self::with_clock(Arc::new(MonotonicClock::new()))
    }

    /// Time source on an injected clock
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let start_us = clock.now_us();
        Self {
            clock,
            state: Mutex::new(SyncState {
                start_us,
                ..SyncState::default()
            }),
        }
    }

    /// Stop the reported time from advancing; no-op when already paused
    pub fn pause(&self) {
        let mut state = self.state.lock();
        if state.paused_at_us.is_none() {
            state.paused_at_us = Some(self.clock.now_us());
        }
    }

    /// Let the reported time advance again; no-op when not paused
    pub fn resume(&self) {
        let mut state = self.state.lock();
        if let Some(paused_at) = state.paused_at_us.take() {
            state.paused_total_us += self.clock.now_us() - paused_at;
        }
    }

    /// Whether the source is paused
    pub fn is_paused(&self) -> bool {
        self.state.lock().paused_at_us.is_some()
    }

    /// Restart from zero and clear pause state
    pub fn reset(&self) {
        let mut state = self.state.lock();
        *state = SyncState {
            start_us: self.clock.now_us(),
            ..SyncState::default()
        };
    }

    /// Shift reported time by `delta_us` (negative moves it back)
    pub fn increase_real_time_us(&self, delta_us: i64) {
        self.state.lock().start_us -= delta_us;
    }
}

impl Default for SyncTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for SyncTimeSource {
    fn real_time_us(&self) -> i64 {
        let state = self.state.lock();
        let now = state.paused_at_us.unwrap_or_else(|| self.clock.now_us());
        now - state.start_us - state.paused_total_us
    }
}
