//! Operation side of the [`Redial`] exchange.
//!
//! [`Redial`]: super::Redial

use crate::{
    matcher::RuleSet,
    operation::{Operation, OperationKey, OperationKind},
};
use futures::{
    Stream,
    future::BoxFuture,
    stream::{Fuse, FuturesUnordered, StreamExt as _},
    task::AtomicWaker,
};
use parking_lot::Mutex;
use pin_project_lite::pin_project;
use std::{
    collections::{HashMap, hash_map::Entry},
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

/// A re-issued operation waiting for its delay to elapse.
#[derive(Debug)]
pub(super) struct ScheduledRetry {
    pub(super) operation: Operation,
    pub(super) delay: Duration,
}

/// Deliveries sent downstream whose result was not observed yet.
///
/// Only operations covered by a success rule are tracked,
/// as only their results can schedule a retry.
#[derive(Debug)]
pub(super) struct InFlight {
    rules: RuleSet,
    deliveries: Mutex<HashMap<OperationKey, usize>>,
    waker: AtomicWaker,
}

impl InFlight {
    pub(super) fn new(rules: RuleSet) -> Self {
        Self {
            rules,
            deliveries: Mutex::new(HashMap::new()),
            waker: AtomicWaker::new(),
        }
    }

    fn track(&self, operation: &Operation) {
        if self.rules.covers(operation) {
            *self.deliveries.lock().entry(operation.key()).or_default() += 1;
        }
    }

    /// Mark a result for the given key as observed.
    ///
    /// Must be called after a retry, if any, was scheduled for that result.
    pub(super) fn settle(&self, key: OperationKey) {
        let idle = {
            let mut deliveries = self.deliveries.lock();
            if let Entry::Occupied(mut entry) = deliveries.entry(key) {
                *entry.get_mut() -= 1;
                if *entry.get() == 0 {
                    entry.remove();
                }
            }
            deliveries.is_empty()
        };
        if idle {
            self.waker.wake();
        }
    }

    /// No result is expected anymore for a torn down key.
    fn forget(&self, key: OperationKey) {
        self.deliveries.lock().remove(&key);
    }

    fn poll_idle(&self, cx: &mut Context<'_>) -> bool {
        self.waker.register(cx.waker());
        self.deliveries.lock().is_empty()
    }
}

#[derive(Debug)]
struct PendingRetry {
    kind: OperationKind,
    generation: u64,
    token: CancellationToken,
}

struct FiredRetry {
    key: OperationKey,
    generation: u64,
    operation: Option<Operation>,
}

pin_project! {
    /// Merges the caller's operations with the retries scheduled by the result side.
    ///
    /// Every scheduled retry gets its own timer, guarded by a [`CancellationToken`]
    /// registered under the operation key. A caller operation of the same kind,
    /// or a teardown, for that key cancels the token before the retry is injected.
    ///
    /// The stream ends once upstream ended, no timer is running and
    /// no result that could still schedule a retry is outstanding.
    pub(super) struct RetryOperations<S> {
        #[pin]
        upstream: Fuse<S>,
        scheduled: UnboundedReceiver<ScheduledRetry>,
        scheduled_closed: bool,
        pending: HashMap<OperationKey, PendingRetry>,
        timers: FuturesUnordered<BoxFuture<'static, FiredRetry>>,
        generation: u64,
        in_flight: Arc<InFlight>,
    }
}

impl<S> RetryOperations<S>
where
    S: Stream<Item = Operation>,
{
    pub(super) fn new(
        upstream: S,
        scheduled: UnboundedReceiver<ScheduledRetry>,
        in_flight: Arc<InFlight>,
    ) -> Self {
        Self {
            upstream: upstream.fuse(),
            scheduled,
            scheduled_closed: false,
            pending: HashMap::new(),
            timers: FuturesUnordered::new(),
            generation: 0,
            in_flight,
        }
    }
}

impl<S> Stream for RetryOperations<S>
where
    S: Stream<Item = Operation>,
{
    type Item = Operation;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            while !*this.scheduled_closed {
                match this.scheduled.poll_recv(cx) {
                    Poll::Ready(Some(ScheduledRetry { operation, delay })) => {
                        *this.generation += 1;
                        let generation = *this.generation;
                        let key = operation.key();
                        let token = CancellationToken::new();

                        if let Some(previous) = this.pending.insert(
                            key,
                            PendingRetry {
                                kind: operation.kind(),
                                generation,
                                token: token.clone(),
                            },
                        ) {
                            previous.token.cancel();
                        }

                        tracing::trace!(%key, ?delay, "retry timer started");
                        this.timers.push(Box::pin(async move {
                            let operation = tokio::select! {
                                biased;
                                _ = token.cancelled() => None,
                                _ = tokio::time::sleep(delay) => Some(operation),
                            };
                            FiredRetry {
                                key,
                                generation,
                                operation,
                            }
                        }));
                    }
                    Poll::Ready(None) => *this.scheduled_closed = true,
                    Poll::Pending => break,
                }
            }

            if let Poll::Ready(Some(operation)) = this.upstream.as_mut().poll_next(cx) {
                let key = operation.key();
                let supersedes = this.pending.get(&key).is_some_and(|pending| {
                    operation.kind() == OperationKind::Teardown || operation.kind() == pending.kind
                });
                if supersedes && let Some(pending) = this.pending.remove(&key) {
                    pending.token.cancel();
                    tracing::debug!(
                        %key,
                        kind = %operation.kind(),
                        "scheduled retry canceled by incoming operation"
                    );
                }
                if operation.kind() == OperationKind::Teardown {
                    this.in_flight.forget(key);
                } else {
                    this.in_flight.track(&operation);
                }
                return Poll::Ready(Some(operation));
            }

            while let Poll::Ready(Some(fired)) = this.timers.poll_next_unpin(cx) {
                let Some(operation) = fired.operation else {
                    continue;
                };
                if this
                    .pending
                    .get(&fired.key)
                    .is_some_and(|pending| pending.generation == fired.generation)
                {
                    this.pending.remove(&fired.key);
                }
                tracing::trace!(key = %fired.key, "retry timer fired, re-issuing operation");
                this.in_flight.track(&operation);
                return Poll::Ready(Some(operation));
            }

            // a result still on its way downstream might need a retry
            if !this.upstream.is_done()
                || !this.timers.is_empty()
                || !this.in_flight.poll_idle(cx)
            {
                return Poll::Pending;
            }
            if *this.scheduled_closed {
                return Poll::Ready(None);
            }

            // Nothing left to wait for: refuse new retries,
            // but still drain the ones that made it in before closing.
            tracing::trace!(
                "upstream ended and no retry or result pending, closing retry scheduler"
            );
            this.scheduled.close();
        }
    }
}
