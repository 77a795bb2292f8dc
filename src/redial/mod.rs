//! Middleware re-issuing query operations until their result "succeeds".
//!
//! What success means is configured per query name, as one or more dotted
//! paths that all have to resolve to a truthy value in the result data
//! (see [`matcher`]). A result which does not satisfy the rule of its query is
//! held back from the caller, and the operation is re-issued after a jittered
//! backoff delay instead, until either the rule is satisfied or the maximum
//! number of attempts is reached.
//!
//! Results carrying an error, and results of queries without a registered rule,
//! are never retried.
//!
//! [`matcher`]: crate::matcher

use crate::{
    backoff::RetryBackoff,
    debug::{DebugEvent, DebugSink, TracingDebugSink},
    exchange::{Exchange, OperationStream, ResultStream},
    matcher::RuleSet,
    operation::{Operation, OperationResult},
    rng::{HasherRng, Rng},
};
use futures::{StreamExt as _, future};
use std::{fmt, sync::Arc};
use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};

mod config;
#[doc(inline)]
pub use config::{RedialConfig, RedialConfigError};

mod layer;
#[doc(inline)]
pub use layer::RedialLayer;

mod scheduler;
use scheduler::{InFlight, RetryOperations, ScheduledRetry};

/// Re-issues operations whose results do not yet satisfy their success rule.
///
/// Created by means of a [`RedialLayer`].
pub struct Redial<E, D = TracingDebugSink, R = HasherRng> {
    inner: E,
    policy: Arc<RedialPolicy<D, R>>,
}

impl<E: fmt::Debug, D: fmt::Debug, R: fmt::Debug> fmt::Debug for Redial<E, D, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Redial")
            .field("inner", &self.inner)
            .field("policy", &self.policy)
            .finish()
    }
}

impl<E: Clone, D, R> Clone for Redial<E, D, R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            policy: self.policy.clone(),
        }
    }
}

impl<E, D, R> Redial<E, D, R> {
    pub(crate) fn new(inner: E, policy: Arc<RedialPolicy<D, R>>) -> Self {
        Self { inner, policy }
    }

    /// Gets a reference to the forward exchange.
    pub fn get_ref(&self) -> &E {
        &self.inner
    }

    /// Consumes `self`, returning the forward exchange.
    pub fn into_inner(self) -> E {
        self.inner
    }
}

impl<E, D, R> Exchange for Redial<E, D, R>
where
    E: Exchange,
    D: DebugSink,
    R: Rng,
{
    fn exchange(&self, operations: OperationStream) -> ResultStream {
        let (scheduled_tx, scheduled_rx) = unbounded_channel();
        let in_flight = Arc::new(InFlight::new(self.policy.rules.clone()));
        let operations = RetryOperations::new(operations, scheduled_rx, in_flight.clone());

        let policy = self.policy.clone();
        self.inner
            .exchange(operations.boxed())
            .filter_map(move |result| {
                let key = result.operation.key();
                let result = policy.filter(result, &scheduled_tx);
                in_flight.settle(key);
                future::ready(result)
            })
            .boxed()
    }
}

/// Outcome of evaluating a single result.
#[derive(Debug)]
enum Verdict {
    /// Forward the result to the caller.
    Terminal(OperationResult),
    /// Hold the result back and re-issue its operation.
    Retry(OperationResult),
}

pub(crate) struct RedialPolicy<D, R> {
    rules: RuleSet,
    backoff: RetryBackoff<R>,
    max_attempts: u32,
    debug: D,
}

impl<D: fmt::Debug, R: fmt::Debug> fmt::Debug for RedialPolicy<D, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedialPolicy")
            .field("rules", &self.rules)
            .field("backoff", &self.backoff)
            .field("max_attempts", &self.max_attempts)
            .field("debug", &self.debug)
            .finish()
    }
}

impl<D, R> RedialPolicy<D, R>
where
    D: DebugSink,
    R: Rng,
{
    pub(crate) fn new(rules: RuleSet, backoff: RetryBackoff<R>, max_attempts: u32, debug: D) -> Self {
        Self {
            rules,
            backoff,
            max_attempts,
            debug,
        }
    }

    /// Returns the result if it is terminal, scheduling a retry otherwise.
    fn filter(
        &self,
        result: OperationResult,
        scheduled: &UnboundedSender<ScheduledRetry>,
    ) -> Option<OperationResult> {
        let result = match self.evaluate(result) {
            Verdict::Terminal(result) => return Some(result),
            Verdict::Retry(result) => result,
        };

        let retry = self.schedule(&result.operation);
        let retry_count = retry.operation.context().retry_count();
        if scheduled.send(retry).is_err() {
            tracing::debug!(
                key = %result.operation.key(),
                "operation stream ended, forwarding unsatisfied result instead of retrying"
            );
            return Some(result);
        }

        self.debug.dispatch(DebugEvent::retry_attempt(
            result.operation,
            retry_count,
            self.max_attempts,
        ));
        None
    }

    fn evaluate(&self, result: OperationResult) -> Verdict {
        if result.error.is_some() {
            return Verdict::Terminal(result);
        }
        let Some(rule) = result
            .operation
            .document()
            .operation_name()
            .and_then(|name| self.rules.get(name))
        else {
            return Verdict::Terminal(result);
        };

        if rule.is_satisfied(result.data.as_ref()) {
            return Verdict::Terminal(result);
        }

        let attempts = result.operation.context().retry_count();
        if attempts >= self.max_attempts.saturating_sub(1) {
            tracing::debug!(
                key = %result.operation.key(),
                attempts = attempts + 1,
                "success rule still unsatisfied after last attempt"
            );
            self.debug
                .dispatch(DebugEvent::retry_exhausted(result.operation.clone()));
            return Verdict::Terminal(result);
        }

        Verdict::Retry(result)
    }

    fn schedule(&self, operation: &Operation) -> ScheduledRetry {
        let context = operation.context();
        let retry_count = context.retry_count() + 1;
        let delay = self.backoff.next_delay(context.retry_delay());

        tracing::trace!(
            key = %operation.key(),
            retry_count,
            ?delay,
            "success rule unsatisfied, scheduling retry"
        );

        ScheduledRetry {
            operation: operation.reissue(context.with_retry(retry_count, delay)),
            delay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        debug::DebugEventKind,
        exchange::{Layer, exchange_fn},
        matcher::RulePaths,
        operation::{OperationError, QueryDocument},
    };
    use futures::StreamExt;
    use indexmap::IndexMap;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::time::Duration;

    #[derive(Debug, Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<DebugEventKind>>>);

    impl DebugSink for Recorder {
        fn dispatch(&self, event: DebugEvent) {
            self.0.lock().push(event.kind);
        }
    }

    fn policy(max_attempts: u32) -> (RedialPolicy<Recorder, HasherRng>, Recorder) {
        let rules: IndexMap<String, RulePaths> =
            [("author".to_owned(), RulePaths::from("$.author.id"))].into();
        let recorder = Recorder::default();
        let policy = RedialPolicy::new(
            RuleSet::try_new(&rules).unwrap(),
            RetryBackoff::new(
                Duration::from_millis(50),
                Duration::from_millis(500),
                false,
                HasherRng::default(),
            ),
            max_attempts,
            recorder.clone(),
        );
        (policy, recorder)
    }

    fn author(retry_count: u32) -> Operation {
        let op = Operation::query(1, QueryDocument::named("author"));
        op.reissue(
            op.context()
                .with_retry(retry_count, Duration::from_millis(50)),
        )
    }

    #[test]
    fn errors_are_terminal() {
        let (policy, recorder) = policy(10);
        let result = OperationResult::from_error(author(0), OperationError::new("scary error"));
        assert!(matches!(policy.evaluate(result), Verdict::Terminal(_)));
        assert!(recorder.0.lock().is_empty());
    }

    #[test]
    fn unknown_or_anonymous_queries_are_terminal() {
        let (policy, _) = policy(10);
        let unknown = Operation::query(2, QueryDocument::named("films"));
        let anonymous = Operation::query(3, QueryDocument::anonymous());
        for op in [unknown, anonymous] {
            let result = OperationResult::from_data(op, json!({ "films": null }));
            assert!(matches!(policy.evaluate(result), Verdict::Terminal(_)));
        }
    }

    #[test]
    fn unsatisfied_result_is_retried_until_exhausted() {
        let (policy, recorder) = policy(3);

        for retry_count in 0..2 {
            let result = OperationResult::from_data(author(retry_count), json!({ "author": null }));
            assert!(matches!(policy.evaluate(result), Verdict::Retry(_)));
        }
        assert!(recorder.0.lock().is_empty());

        let result = OperationResult::from_data(author(2), json!({ "author": null }));
        assert!(matches!(policy.evaluate(result), Verdict::Terminal(_)));
        assert_eq!(*recorder.0.lock(), [DebugEventKind::RetryExhausted]);
    }

    #[test]
    fn satisfied_last_attempt_is_not_exhausted() {
        let (policy, recorder) = policy(1);
        let result = OperationResult::from_data(author(0), json!({ "author": { "id": "123" } }));
        assert!(matches!(policy.evaluate(result), Verdict::Terminal(_)));
        assert!(recorder.0.lock().is_empty());
    }

    #[test]
    fn schedule_increments_retry_count() {
        let (policy, recorder) = policy(10);
        let op = Operation::query(1, QueryDocument::named("author"));

        let retry = policy.schedule(&op);
        assert_eq!(retry.delay, Duration::from_millis(50));
        assert_eq!(retry.operation.context().retry_count(), 1);
        assert_eq!(
            retry.operation.context().retry_delay(),
            Some(Duration::from_millis(50))
        );
        assert_eq!(op.context().retry_count(), 0);
        assert!(recorder.0.lock().is_empty());
    }

    #[test]
    fn filter_queues_retry_and_reports_attempt() {
        let (policy, recorder) = policy(10);
        let (tx, mut rx) = unbounded_channel();

        let result = OperationResult::from_data(author(0), json!({ "author": null }));
        assert!(policy.filter(result, &tx).is_none());

        let retry = rx.try_recv().unwrap();
        assert_eq!(retry.operation.context().retry_count(), 1);
        assert_eq!(
            *recorder.0.lock(),
            [DebugEventKind::RetryAttempt {
                retry_count: 1,
                max_attempts: 10
            }]
        );
    }

    #[test]
    fn closed_scheduler_forwards_result() {
        let (policy, recorder) = policy(10);
        let (tx, rx) = unbounded_channel();
        drop(rx);

        let result = OperationResult::from_data(author(0), json!({ "author": null }));
        let forwarded = policy.filter(result, &tx).unwrap();
        assert_eq!(forwarded.operation.context().retry_count(), 0);
        // no attempt is reported for a retry that never happens
        assert!(recorder.0.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    #[tracing_test::traced_test]
    async fn default_sink_logs_retry_lifecycle() {
        let config = RedialConfig::new()
            .with_initial_delay(Duration::from_millis(10))
            .with_max_number_attempts(2)
            .with_rule("author", "$.author.id");
        let redial = RedialLayer::try_new(&config)
            .unwrap()
            .layer(exchange_fn(|ops| {
                ops.map(|op| OperationResult::from_data(op, json!({ "author": null })))
                    .boxed()
            }));

        let op = Operation::query(1, QueryDocument::named("author"));
        let results: Vec<_> = redial
            .exchange(futures::stream::iter([op]).boxed())
            .collect()
            .await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].operation.context().retry_count(), 1);
        assert!(logs_contain("retryAttempt"));
        assert!(logs_contain("retryExhausted"));
    }
}
