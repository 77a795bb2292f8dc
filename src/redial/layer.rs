use super::{Redial, RedialConfig, RedialConfigError, RedialPolicy};
use crate::{
    backoff::RetryBackoff,
    debug::{DebugSink, TracingDebugSink},
    exchange::Layer,
    matcher::RuleSet,
    rng::{HasherRng, Rng},
};
use std::{fmt, sync::Arc, time::Duration};

/// Applies the [`Redial`] middleware to a forward exchange.
///
/// The configuration is validated and its success rules compiled
/// once, when the layer is created.
pub struct RedialLayer<D = TracingDebugSink, R = HasherRng> {
    rules: RuleSet,
    initial_delay: Duration,
    max_delay: Duration,
    random_delay: bool,
    max_attempts: u32,
    debug: D,
    rng: R,
}

impl<D: fmt::Debug, R: fmt::Debug> fmt::Debug for RedialLayer<D, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedialLayer")
            .field("rules", &self.rules)
            .field("initial_delay", &self.initial_delay)
            .field("max_delay", &self.max_delay)
            .field("random_delay", &self.random_delay)
            .field("max_attempts", &self.max_attempts)
            .field("debug", &self.debug)
            .field("rng", &self.rng)
            .finish()
    }
}

impl<D: Clone, R: Clone> Clone for RedialLayer<D, R> {
    fn clone(&self) -> Self {
        Self {
            rules: self.rules.clone(),
            initial_delay: self.initial_delay,
            max_delay: self.max_delay,
            random_delay: self.random_delay,
            max_attempts: self.max_attempts,
            debug: self.debug.clone(),
            rng: self.rng.clone(),
        }
    }
}

impl RedialLayer {
    /// Create a new [`RedialLayer`] from the given config.
    ///
    /// # Errors
    ///
    /// Fails if a delay or the maximum number of attempts is zero,
    /// or if a success rule path does not start with the `$.` root selector.
    pub fn try_new(config: &RedialConfig) -> Result<Self, RedialConfigError> {
        config.validate()?;
        let rules = RuleSet::try_new(&config.retry_until_pattern_succeeds)?;
        Ok(Self {
            rules,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            random_delay: config.random_delay,
            max_attempts: config.max_number_attempts,
            debug: TracingDebugSink::new(),
            rng: HasherRng::new(),
        })
    }
}

impl TryFrom<RedialConfig> for RedialLayer {
    type Error = RedialConfigError;

    fn try_from(config: RedialConfig) -> Result<Self, Self::Error> {
        Self::try_new(&config)
    }
}

impl<D, R> RedialLayer<D, R> {
    /// Dispatch diagnostic events to the given sink
    /// instead of the default [`TracingDebugSink`].
    pub fn with_debug_sink<D2>(self, debug: D2) -> RedialLayer<D2, R> {
        RedialLayer {
            rules: self.rules,
            initial_delay: self.initial_delay,
            max_delay: self.max_delay,
            random_delay: self.random_delay,
            max_attempts: self.max_attempts,
            debug,
            rng: self.rng,
        }
    }

    /// Use the given [`Rng`] for the delay jitter.
    pub fn with_rng<R2>(self, rng: R2) -> RedialLayer<D, R2> {
        RedialLayer {
            rules: self.rules,
            initial_delay: self.initial_delay,
            max_delay: self.max_delay,
            random_delay: self.random_delay,
            max_attempts: self.max_attempts,
            debug: self.debug,
            rng,
        }
    }
}

impl<E, D, R> Layer<E> for RedialLayer<D, R>
where
    D: DebugSink + Clone,
    R: Rng + Clone,
{
    type Exchange = Redial<E, D, R>;

    fn layer(&self, forward: E) -> Self::Exchange {
        let backoff = RetryBackoff::new(
            self.initial_delay,
            self.max_delay,
            self.random_delay,
            self.rng.clone(),
        );
        let policy = RedialPolicy::new(
            self.rules.clone(),
            backoff,
            self.max_attempts,
            self.debug.clone(),
        );
        Redial::new(forward, Arc::new(policy))
    }
}
