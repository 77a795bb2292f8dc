//! Diagnostic events emitted by the [`Redial`] stage.
//!
//! These events are meant for observability only: nothing in the
//! pipeline consumes them to make decisions.
//!
//! [`Redial`]: crate::Redial

use crate::operation::Operation;
use std::{fmt, sync::Arc};
use tokio::sync::mpsc::UnboundedSender;

/// The kind of a [`DebugEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugEventKind {
    /// A result did not satisfy its success rule and a retry was scheduled.
    RetryAttempt {
        /// Retry count of the scheduled operation.
        retry_count: u32,
        /// Configured maximum number of attempts.
        max_attempts: u32,
    },
    /// The maximum number of attempts was reached without success.
    RetryExhausted,
}

impl DebugEventKind {
    /// The event type tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RetryAttempt { .. } => "retryAttempt",
            Self::RetryExhausted => "retryExhausted",
        }
    }
}

impl fmt::Display for DebugEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A diagnostic event, dispatched to a [`DebugSink`].
#[derive(Debug, Clone)]
pub struct DebugEvent {
    /// Kind of event.
    pub kind: DebugEventKind,
    /// Human readable description.
    pub message: String,
    /// The operation the event is about.
    pub operation: Operation,
}

impl DebugEvent {
    pub(crate) fn retry_attempt(operation: Operation, retry_count: u32, max_attempts: u32) -> Self {
        Self {
            kind: DebugEventKind::RetryAttempt {
                retry_count,
                max_attempts,
            },
            message: format!(
                "the operation did not satisfy its success rule, retry triggered ({retry_count} / {max_attempts})"
            ),
            operation,
        }
    }

    pub(crate) fn retry_exhausted(operation: Operation) -> Self {
        Self {
            kind: DebugEventKind::RetryExhausted,
            message: "maximum number of attempts reached, no further retries will be performed"
                .to_owned(),
            operation,
        }
    }
}

/// Receiver of [`DebugEvent`]s.
pub trait DebugSink: Send + Sync + 'static {
    /// Dispatch a single event.
    fn dispatch(&self, event: DebugEvent);
}

impl<F> DebugSink for F
where
    F: Fn(DebugEvent) + Send + Sync + 'static,
{
    fn dispatch(&self, event: DebugEvent) {
        self(event)
    }
}

impl<D: DebugSink> DebugSink for Arc<D> {
    fn dispatch(&self, event: DebugEvent) {
        self.as_ref().dispatch(event)
    }
}

impl DebugSink for UnboundedSender<DebugEvent> {
    fn dispatch(&self, event: DebugEvent) {
        if let Err(err) = self.send(event) {
            tracing::trace!(kind = %err.0.kind, "debug event receiver dropped");
        }
    }
}

/// Default [`DebugSink`], logging every event using [`tracing`].
#[derive(Debug, Clone, Default)]
#[non_exhaustive]
pub struct TracingDebugSink;

impl TracingDebugSink {
    /// Create a new [`TracingDebugSink`].
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl DebugSink for TracingDebugSink {
    fn dispatch(&self, event: DebugEvent) {
        tracing::debug!(
            kind = %event.kind,
            key = %event.operation.key(),
            "{}",
            event.message,
        );
    }
}
