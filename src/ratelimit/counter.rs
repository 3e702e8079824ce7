//! Sliding window counter implementation.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::error::{Result, TurnstileError};

/// Longest accepted window.
pub const MAX_WINDOW: Duration = Duration::from_secs(366 * 24 * 60 * 60);

/// Admission quota: at most `max_requests` within any `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowLimit {
    max_requests: usize,
    window: Duration,
}

impl WindowLimit {
    /// Create a limit, rejecting a zero quota, an empty window or one longer
    /// than [`MAX_WINDOW`].
    pub fn new(max_requests: usize, window: Duration) -> Result<Self> {
        if max_requests == 0 {
            return Err(TurnstileError::Config(
                "requests per window must be positive".to_string(),
            ));
        }
        if window.is_zero() {
            return Err(TurnstileError::Config(
                "window size must be positive".to_string(),
            ));
        }
        if window > MAX_WINDOW {
            return Err(TurnstileError::Config(format!(
                "window size must not exceed {} seconds",
                MAX_WINDOW.as_secs()
            )));
        }
        Ok(Self {
            max_requests,
            window,
        })
    }

    /// Maximum admissions per window.
    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    /// Length of the sliding window.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Instant at or before which a timestamp no longer counts.
    ///
    /// `None` when `now` is closer to the clock origin than one window, in
    /// which case nothing can have expired yet.
    fn cutoff(&self, now: Instant) -> Option<Instant> {
        now.checked_sub(self.window)
    }

    /// Window length in whole seconds, rounded up.
    fn window_secs_ceil(&self) -> u64 {
        ceil_secs(self.window)
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The request was counted and may proceed.
    Allowed,
    /// The window is full; nothing was recorded.
    Denied {
        /// Whole seconds until a slot frees up, never less than 1.
        retry_after_secs: u64,
    },
}

impl Decision {
    /// Whether the request may proceed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }

    /// Seconds to wait before retrying; `0` for allowed requests.
    pub fn retry_after_secs(&self) -> u64 {
        match self {
            Decision::Allowed => 0,
            Decision::Denied { retry_after_secs } => *retry_after_secs,
        }
    }
}

struct WindowState {
    /// Admitted request instants, oldest first.
    timestamps: VecDeque<Instant>,
    /// Set once the registry has evicted this counter.
    retired: bool,
}

/// Per-client sliding window of admitted request timestamps.
///
/// Each counter carries its own lock, so checks for different clients never
/// contend with each other. Requests from the same client are linearized.
pub struct SlidingWindowCounter {
    limit: WindowLimit,
    state: Mutex<WindowState>,
}

impl SlidingWindowCounter {
    /// Create an empty counter.
    pub fn new(limit: WindowLimit) -> Self {
        Self {
            limit,
            state: Mutex::new(WindowState {
                timestamps: VecDeque::new(),
                retired: false,
            }),
        }
    }

    /// Get the limit this counter enforces.
    pub fn limit(&self) -> WindowLimit {
        self.limit
    }

    /// Decide whether a request arriving at `now` is admitted.
    ///
    /// Expired timestamps are pruned first. A denied request does not consume
    /// a slot. A `now` earlier than the newest recorded timestamp is treated
    /// as that timestamp, so the window stays in chronological order.
    pub fn try_admit(&self, now: Instant) -> Decision {
        let mut state = self.state.lock();
        self.admit_locked(&mut state, now)
    }

    /// Decide whether a request arriving right now is admitted.
    ///
    /// The clock is read while holding the lock, so decisions for this client
    /// follow the order in which requests acquired it.
    pub fn try_admit_now(&self) -> Decision {
        let mut state = self.state.lock();
        self.admit_locked(&mut state, Instant::now())
    }

    /// Like [`try_admit`](Self::try_admit), but returns `None` if the counter
    /// was evicted from its registry, in which case the caller must look the
    /// client up again.
    pub(crate) fn try_admit_live(&self, now: Instant) -> Option<Decision> {
        let mut state = self.state.lock();
        if state.retired {
            return None;
        }
        Some(self.admit_locked(&mut state, now))
    }

    /// Clock-reading variant of [`try_admit_live`](Self::try_admit_live).
    pub(crate) fn try_admit_live_now(&self) -> Option<Decision> {
        let mut state = self.state.lock();
        if state.retired {
            return None;
        }
        Some(self.admit_locked(&mut state, Instant::now()))
    }

    fn admit_locked(&self, state: &mut WindowState, now: Instant) -> Decision {
        let now = match state.timestamps.back() {
            Some(newest) if *newest > now => *newest,
            _ => now,
        };
        prune(&mut state.timestamps, self.limit.cutoff(now));

        if state.timestamps.len() >= self.limit.max_requests {
            let retry_after_secs = state
                .timestamps
                .front()
                .map(|oldest| self.retry_after(*oldest, now))
                .unwrap_or(1);
            return Decision::Denied { retry_after_secs };
        }

        state.timestamps.push_back(now);
        Decision::Allowed
    }

    /// Seconds until `oldest` leaves the window, clamped to `1..=window`.
    fn retry_after(&self, oldest: Instant, now: Instant) -> u64 {
        let ceiling = self.limit.window_secs_ceil();
        match oldest.checked_add(self.limit.window) {
            Some(expires_at) => {
                ceil_secs(expires_at.saturating_duration_since(now)).clamp(1, ceiling)
            }
            None => ceiling,
        }
    }

    /// Number of timestamps that still count at `now`.
    pub fn in_window(&self, now: Instant) -> usize {
        let cutoff = self.limit.cutoff(now);
        let state = self.state.lock();
        match cutoff {
            Some(cutoff) => state.timestamps.iter().filter(|t| **t > cutoff).count(),
            None => state.timestamps.len(),
        }
    }

    /// Whether every recorded timestamp has expired (or none exist).
    pub fn is_stale(&self, now: Instant) -> bool {
        is_stale(&self.state.lock(), self.limit.cutoff(now))
    }

    /// Mark the counter retired if it is stale at `now`.
    ///
    /// Must only be called by the registry while removing the entry, so a
    /// concurrent admission cannot record into a detached counter.
    pub(crate) fn retire_if_stale(&self, now: Instant) -> bool {
        let mut state = self.state.lock();
        if is_stale(&state, self.limit.cutoff(now)) {
            state.retired = true;
            true
        } else {
            false
        }
    }
}

impl std::fmt::Debug for SlidingWindowCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SlidingWindowCounter")
            .field("limit", &self.limit)
            .field("recorded", &state.timestamps.len())
            .field("retired", &state.retired)
            .finish()
    }
}

/// Drop the chronological prefix of timestamps at or before `cutoff`.
fn prune(timestamps: &mut VecDeque<Instant>, cutoff: Option<Instant>) {
    let Some(cutoff) = cutoff else { return };
    while timestamps.front().is_some_and(|t| *t <= cutoff) {
        timestamps.pop_front();
    }
}

fn is_stale(state: &WindowState, cutoff: Option<Instant>) -> bool {
    match (state.timestamps.back(), cutoff) {
        (None, _) => true,
        (Some(newest), Some(cutoff)) => *newest <= cutoff,
        (Some(_), None) => false,
    }
}

fn ceil_secs(duration: Duration) -> u64 {
    duration.as_secs() + u64::from(duration.subsec_nanos() > 0)
}
