use std::time::{Duration, Instant};

use once_cell::sync::OnceCell;

/// Per-call time-to-first-output marker.
///
/// The start instant is captured when the call is issued. The first call to
/// [`CallTimer::mark_first_output`] records the elapsed time; later calls
/// return that same value.
#[derive(Debug)]
pub struct CallTimer {
    started: Instant,
    first_output: OnceCell<Duration>,
}

impl CallTimer {
    /// Captures the issuance instant.
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
            first_output: OnceCell::new(),
        }
    }

    /// Records time-to-first-output once and returns the recorded value.
    pub fn mark_first_output(&self) -> Duration {
        *self
            .first_output
            .get_or_init(|| Instant::now().saturating_duration_since(self.started))
    }

    /// Returns the recorded time-to-first-output without marking.
    pub fn first_output(&self) -> Option<Duration> {
        self.first_output.get().copied()
    }

    /// Time elapsed since issuance.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Shorthand for [`CallTimer::start`].
pub fn mark_start() -> CallTimer {
    CallTimer::start()
}
