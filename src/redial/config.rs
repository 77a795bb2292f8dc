use crate::matcher::{MissingRootSelector, RulePaths};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};

/// Configuration of a [`RedialLayer`].
///
/// Can be deserialized from its camelCase representation:
///
/// ```
/// use rama_redial::RedialConfig;
///
/// let config: RedialConfig = serde_json::from_str(r#"{
///     "initialDelayMs": 50,
///     "maxNumberAttempts": 10,
///     "retryUntilPatternSucceeds": {
///         "author": "$.author.id",
///         "complex": ["$.complex.path.to.match", "$.with.multiple.results"]
///     }
/// }"#).unwrap();
///
/// assert_eq!(config.initial_delay_ms, 50);
/// assert_eq!(config.max_delay_ms, 15_000);
/// ```
///
/// [`RedialLayer`]: super::RedialLayer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RedialConfig {
    /// Delay before the first retry, prior to jitter.
    pub initial_delay_ms: u64,
    /// Delay ceiling above which no more jitter is applied.
    pub max_delay_ms: u64,
    /// Apply a random factor to every delay.
    pub random_delay: bool,
    /// Total number of deliveries allowed per operation, the first one included.
    pub max_number_attempts: u32,
    /// Success rule paths per query name.
    pub retry_until_pattern_succeeds: IndexMap<String, RulePaths>,
}

impl Default for RedialConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1000,
            max_delay_ms: 15_000,
            random_delay: true,
            max_number_attempts: 100,
            retry_until_pattern_succeeds: IndexMap::new(),
        }
    }
}

impl RedialConfig {
    /// Create a new [`RedialConfig`] with default values and no rules.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the delay before the first retry, prior to jitter.
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay_ms = duration_as_millis(delay);
        self
    }

    /// Set the delay ceiling above which no more jitter is applied.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay_ms = duration_as_millis(delay);
        self
    }

    /// Enable or disable the random delay factor.
    #[must_use]
    pub fn with_random_delay(mut self, random_delay: bool) -> Self {
        self.random_delay = random_delay;
        self
    }

    /// Set the total number of deliveries allowed per operation.
    #[must_use]
    pub fn with_max_number_attempts(mut self, attempts: u32) -> Self {
        self.max_number_attempts = attempts;
        self
    }

    /// Register the success rule of the given query,
    /// replacing any previously registered rule.
    #[must_use]
    pub fn with_rule(mut self, query: impl Into<String>, paths: impl Into<RulePaths>) -> Self {
        self.retry_until_pattern_succeeds
            .insert(query.into(), paths.into());
        self
    }

    pub(super) fn validate(&self) -> Result<(), RedialConfigError> {
        if self.initial_delay_ms == 0 {
            return Err(RedialConfigError::new(ErrorKind::InvalidInitialDelay));
        }
        if self.max_delay_ms == 0 {
            return Err(RedialConfigError::new(ErrorKind::InvalidMaxDelay));
        }
        if self.max_number_attempts == 0 {
            return Err(RedialConfigError::new(ErrorKind::InvalidMaxAttempts));
        }
        Ok(())
    }
}

fn duration_as_millis(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}

/// Error returned when a [`RedialConfig`] can not be turned into a [`RedialLayer`].
///
/// [`RedialLayer`]: super::RedialLayer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedialConfigError {
    kind: ErrorKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ErrorKind {
    InvalidInitialDelay,
    InvalidMaxDelay,
    InvalidMaxAttempts,
    Rule(MissingRootSelector),
}

impl RedialConfigError {
    const fn new(kind: ErrorKind) -> Self {
        Self { kind }
    }

    /// The invalid rule, if this error was caused by one.
    #[must_use]
    pub fn rule(&self) -> Option<&MissingRootSelector> {
        match &self.kind {
            ErrorKind::Rule(err) => Some(err),
            ErrorKind::InvalidInitialDelay
            | ErrorKind::InvalidMaxDelay
            | ErrorKind::InvalidMaxAttempts => None,
        }
    }
}

impl From<MissingRootSelector> for RedialConfigError {
    fn from(err: MissingRootSelector) -> Self {
        Self::new(ErrorKind::Rule(err))
    }
}

impl fmt::Display for RedialConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ErrorKind::InvalidInitialDelay => {
                write!(f, "invalid redial config: initial delay must be non-zero")
            }
            ErrorKind::InvalidMaxDelay => {
                write!(f, "invalid redial config: max delay must be non-zero")
            }
            ErrorKind::InvalidMaxAttempts => {
                write!(f, "invalid redial config: at least one attempt is required")
            }
            ErrorKind::Rule(err) => write!(f, "invalid redial config: {err}"),
        }
    }
}

impl std::error::Error for RedialConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            ErrorKind::Rule(err) => Some(err),
            ErrorKind::InvalidInitialDelay
            | ErrorKind::InvalidMaxDelay
            | ErrorKind::InvalidMaxAttempts => None,
        }
    }
}
