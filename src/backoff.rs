//! Backoff delay computation for re-issued operations.
//!
//! Every retry waits for the delay used by the previous retry (or the
//! initial delay for the first one), multiplied by a random factor
//! in `[1.5, 2.5)` to avoid retry spikes of concurrent operations.
//!
//! The factor is only applied when the multiplied delay stays below the
//! configured maximum. When it would not, the delay of that step is left
//! as-is: it is not clamped to the maximum.

use crate::rng::{HasherRng, Rng};
use parking_lot::Mutex;
use std::time::Duration;

/// Lower bound of the random factor applied to the delay.
pub const MIN_JITTER_FACTOR: f64 = 1.5;

/// A jittered, self-compounding backoff.
///
/// See the [module docs](self) for the exact semantics.
#[derive(Debug)]
pub struct RetryBackoff<R = HasherRng> {
    initial: Duration,
    max: Duration,
    jitter: bool,
    rng: Mutex<R>,
}

impl<R> RetryBackoff<R> {
    /// Create a new [`RetryBackoff`].
    pub fn new(initial: Duration, max: Duration, jitter: bool, rng: R) -> Self {
        Self {
            initial,
            max,
            jitter,
            rng: Mutex::new(rng),
        }
    }

    /// Delay used for the first retry.
    pub fn initial(&self) -> Duration {
        self.initial
    }

    /// Delay ceiling above which no jitter is applied.
    pub fn max(&self) -> Duration {
        self.max
    }

    /// Returns true if jitter is applied to the delay.
    pub fn jitter(&self) -> bool {
        self.jitter
    }
}

impl<R: Rng> RetryBackoff<R> {
    /// Compute the delay for the next retry, given the delay
    /// used for the previous one (if any).
    pub fn next_delay(&self, previous: Option<Duration>) -> Duration {
        let base = previous.unwrap_or(self.initial);
        if !self.jitter {
            return base;
        }

        let factor = MIN_JITTER_FACTOR + self.rng.lock().next_f64();
        // float to int casts saturate, an overflowing delay ends up above `max`
        let delay = Duration::from_nanos((base.as_nanos() as f64 * factor) as u64);
        if delay < self.max { delay } else { base }
    }
}
