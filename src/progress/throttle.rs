//! Throttling of per-transfer progress callbacks.
//!
//! Object stores may report progress for every received chunk. Forwarding
//! each of those to the aggregator would contend on its lock for nothing,
//! so updates pass only when they advance far enough or enough time passed.

use std::sync::Mutex;
use std::time::{Duration, Instant};

const MIN_STEP_BYTES: u64 = 64 * 1024;
const MAX_QUIET: Duration = Duration::from_millis(500);

/// Decides which cumulative byte counts are worth forwarding.
pub struct ProgressThrottle {
    file_size: u64,
    step: u64,
    max_quiet: Duration,
    state: Mutex<ThrottleState>,
}

struct ThrottleState {
    last_bytes: u64,
    last_at: Instant,
}

impl ProgressThrottle {
    /// Throttle for an object of `file_size` bytes: forward every
    /// `max(file_size / 1000, 64 KiB)` bytes or every 500 ms.
    pub fn new(file_size: u64) -> Self {
        Self::with_limits(file_size, (file_size / 1000).max(MIN_STEP_BYTES), MAX_QUIET)
    }

    pub fn with_limits(file_size: u64, step: u64, max_quiet: Duration) -> Self {
        Self {
            file_size,
            step,
            max_quiet,
            state: Mutex::new(ThrottleState {
                last_bytes: 0,
                last_at: Instant::now(),
            }),
        }
    }

    /// Returns true if `cumulative` should be forwarded. The final count
    /// (reaching the object size) always passes.
    pub fn should_emit(&self, cumulative: u64) -> bool {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };

        let is_final = self.file_size > 0 && cumulative >= self.file_size;
        let advanced = cumulative.saturating_sub(state.last_bytes) >= self.step;
        let quiet_too_long = state.last_at.elapsed() >= self.max_quiet;

        if is_final || advanced || (quiet_too_long && cumulative != state.last_bytes) {
            state.last_bytes = cumulative;
            state.last_at = Instant::now();
            true
        } else {
            false
        }
    }
}
