use futures::StreamExt;
use parking_lot::Mutex;
use rama_redial::{
    Layer, Operation, OperationError, OperationKey, OperationKind, OperationResult, QueryDocument,
    RedialConfig, RedialLayer,
    debug::{DebugEvent, DebugEventKind},
    exchange::{Exchange, ExchangeFn, OperationStream, ResultStream, exchange_fn},
};
use serde_json::{Value, json};
use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

fn config() -> RedialConfig {
    RedialConfig::new()
        .with_initial_delay(Duration::from_millis(50))
        .with_max_delay(Duration::from_millis(500))
        .with_random_delay(true)
        .with_max_number_attempts(10)
        .with_rule("author", "$.author.id")
        .with_rule(
            "complex",
            ["$.complex.path.to.match", "$.with.multiple.results"],
        )
}

fn author_query(key: u64) -> Operation {
    Operation::query(key, QueryDocument::named("author"))
}

fn author_data() -> Value {
    json!({
        "__typename": "Query",
        "author": { "__typename": "Author", "id": "123", "name": "Author" },
    })
}

fn author_empty() -> Value {
    json!({ "__typename": "Query", "author": null })
}

struct Harness {
    operations: mpsc::UnboundedSender<Operation>,
    results: ResultStream,
    deliveries: Arc<Mutex<Vec<Operation>>>,
    events: Arc<Mutex<Vec<DebugEvent>>>,
}

impl Harness {
    fn new<F>(config: &RedialConfig, respond: F) -> Self
    where
        F: Fn(&Operation) -> OperationResult + Send + Sync + 'static,
    {
        let deliveries = Arc::new(Mutex::new(Vec::new()));
        let events = Arc::new(Mutex::new(Vec::new()));

        let respond = Arc::new(respond);
        let forward = {
            let deliveries = deliveries.clone();
            exchange_fn(move |ops| {
                let deliveries = deliveries.clone();
                let respond = respond.clone();
                ops.filter(|op| futures::future::ready(op.kind() != OperationKind::Teardown))
                    .map(move |op| {
                        deliveries.lock().push(op.clone());
                        respond(&op)
                    })
                    .boxed()
            })
        };

        let sink = {
            let events = events.clone();
            move |event: DebugEvent| events.lock().push(event)
        };
        let redial = RedialLayer::try_new(config)
            .unwrap()
            .with_debug_sink(Arc::new(sink))
            .layer(forward);

        let (tx, rx) = mpsc::unbounded_channel();
        let results = redial.exchange(UnboundedReceiverStream::new(rx).boxed());

        Self {
            operations: tx,
            results,
            deliveries,
            events,
        }
    }

    fn send(&self, operation: Operation) {
        self.operations.send(operation).unwrap();
    }

    /// Close the caller side and collect every remaining result.
    async fn finish(self) -> (Vec<OperationResult>, Vec<Operation>, Vec<DebugEvent>) {
        let Self {
            operations,
            results,
            deliveries,
            events,
        } = self;
        drop(operations);
        let results = results.collect().await;
        let deliveries = deliveries.lock().clone();
        let events = events.lock().clone();
        (results, deliveries, events)
    }
}

fn exhausted_count(events: &[DebugEvent]) -> usize {
    events
        .iter()
        .filter(|event| event.kind == DebugEventKind::RetryExhausted)
        .count()
}

#[tokio::test(start_paused = true)]
async fn retries_result_without_data_until_exhausted() {
    let harness = Harness::new(&config(), |op| {
        OperationResult::from_data(op.clone(), author_empty())
    });
    harness.send(author_query(1));

    let (results, deliveries, events) = harness.finish().await;

    assert_eq!(deliveries.len(), 10);
    assert!(deliveries.iter().all(|op| op.key() == OperationKey::new(1)));
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].operation.context().retry_count(), 9);
    assert_eq!(results[0].data, Some(author_empty()));
    assert_eq!(exhausted_count(&events), 1);
    assert_eq!(events.len(), 10);
}

#[tokio::test(start_paused = true)]
async fn does_not_retry_on_errors() {
    let harness = Harness::new(&config(), |op| {
        OperationResult::from_error(op.clone(), OperationError::new("scary error"))
    });
    harness.send(author_query(1));

    let (results, deliveries, events) = harness.finish().await;

    assert_eq!(deliveries.len(), 1);
    assert_eq!(results.len(), 1);
    assert_eq!(
        results[0].error.as_ref().map(OperationError::message),
        Some("scary error")
    );
    assert!(events.is_empty());
}

#[tokio::test(start_paused = true)]
async fn does_not_retry_unknown_queries() {
    let harness = Harness::new(&config(), |op| {
        OperationResult::from_data(op.clone(), json!({ "films": null }))
    });
    harness.send(Operation::query(2, QueryDocument::named("NOT_EXISTENT_NAME")));

    let (results, deliveries, _) = harness.finish().await;

    assert_eq!(deliveries.len(), 1);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].data, Some(json!({ "films": null })));
}

#[tokio::test(start_paused = true)]
async fn retries_until_successful_result() {
    const RETRIES_BEFORE_SUCCESS: u32 = 3;

    let harness = Harness::new(&config(), |op| {
        let data = if op.context().retry_count() >= RETRIES_BEFORE_SUCCESS {
            author_data()
        } else {
            author_empty()
        };
        OperationResult::from_data(op.clone(), data)
    });
    harness.send(author_query(1));

    let (results, deliveries, events) = harness.finish().await;

    assert_eq!(deliveries.len(), 1 + RETRIES_BEFORE_SUCCESS as usize);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].data, Some(author_data()));
    assert_eq!(
        results[0].operation.context().retry_count(),
        RETRIES_BEFORE_SUCCESS
    );
    assert_eq!(exhausted_count(&events), 0);

    let counts: Vec<_> = deliveries
        .iter()
        .map(|op| op.context().retry_count())
        .collect();
    assert_eq!(counts, [0, 1, 2, 3]);
}

#[tokio::test(start_paused = true)]
async fn retries_until_all_paths_match() {
    let half = json!({ "complex": { "path": { "to": { "match": "true" } } } });
    let full = json!({
        "complex": { "path": { "to": { "match": "true" } } },
        "with": { "multiple": { "results": [] } },
    });

    let harness = {
        let (half, full) = (half.clone(), full.clone());
        Harness::new(&config(), move |op| {
            let data = if op.context().retry_count() >= 1 {
                full.clone()
            } else {
                half.clone()
            };
            OperationResult::from_data(op.clone(), data)
        })
    };
    harness.send(Operation::query(2, QueryDocument::named("complex")));

    let (results, deliveries, _) = harness.finish().await;

    assert_eq!(deliveries.len(), 2);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].data, Some(full));
}

#[tokio::test(start_paused = true)]
async fn single_attempt_never_retries() {
    let harness = Harness::new(&config().with_max_number_attempts(1), |op| {
        OperationResult::from_data(op.clone(), author_empty())
    });
    harness.send(author_query(1));

    let (results, deliveries, events) = harness.finish().await;

    assert_eq!(deliveries.len(), 1);
    assert_eq!(results.len(), 1);
    assert_eq!(exhausted_count(&events), 1);
}

#[tokio::test(start_paused = true)]
async fn retries_are_delayed_with_jitter() {
    let start = tokio::time::Instant::now();
    let timestamps = Arc::new(Mutex::new(Vec::new()));

    let harness = {
        let timestamps = timestamps.clone();
        Harness::new(&config().with_max_number_attempts(3), move |op| {
            timestamps.lock().push(start.elapsed());
            OperationResult::from_data(op.clone(), author_empty())
        })
    };
    harness.send(author_query(1));

    let (_, deliveries, _) = harness.finish().await;
    let timestamps = timestamps.lock().clone();

    assert_eq!(timestamps.len(), 3);
    let first_delay = timestamps[1] - timestamps[0];
    assert!(first_delay >= Duration::from_millis(75), "{first_delay:?}");
    // timers have a millisecond resolution
    assert!(first_delay <= Duration::from_millis(126), "{first_delay:?}");

    let recorded = deliveries[1].context().retry_delay().unwrap();
    let second_delay = timestamps[2] - timestamps[1];
    assert!(second_delay >= recorded, "{second_delay:?} < {recorded:?}");
    assert_eq!(deliveries[2].context().retry_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn fixed_delay_without_random_delay() {
    let start = tokio::time::Instant::now();
    let timestamps = Arc::new(Mutex::new(Vec::new()));

    let harness = {
        let timestamps = timestamps.clone();
        Harness::new(
            &config()
                .with_random_delay(false)
                .with_max_number_attempts(3),
            move |op| {
                timestamps.lock().push(start.elapsed());
                OperationResult::from_data(op.clone(), author_empty())
            },
        )
    };
    harness.send(author_query(1));

    let (_, deliveries, _) = harness.finish().await;
    let timestamps = timestamps.lock().clone();

    assert_eq!(timestamps.len(), 3);
    for pair in timestamps.windows(2) {
        let delay = pair[1] - pair[0];
        assert!(delay >= Duration::from_millis(50), "{delay:?}");
        assert!(delay <= Duration::from_millis(51), "{delay:?}");
    }
    assert!(
        deliveries[1..]
            .iter()
            .all(|op| op.context().retry_delay() == Some(Duration::from_millis(50)))
    );
}

#[tokio::test(start_paused = true)]
async fn teardown_cancels_scheduled_retry() {
    let mut harness = Harness::new(&config(), |op| {
        OperationResult::from_data(op.clone(), author_empty())
    });
    let op = author_query(1);
    harness.send(op.clone());

    // the first (unsatisfied) result is held back and a retry scheduled
    let next = tokio::time::timeout(Duration::from_millis(10), harness.results.next()).await;
    assert!(next.is_err());
    assert_eq!(harness.deliveries.lock().len(), 1);

    harness.send(op.teardown());
    let (results, deliveries, _) = harness.finish().await;

    assert!(results.is_empty());
    assert_eq!(deliveries.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn fresh_operation_supersedes_scheduled_retry() {
    let mut harness = Harness::new(&config(), |op| {
        let data = if op.context().get("fresh").is_some() {
            author_data()
        } else {
            author_empty()
        };
        OperationResult::from_data(op.clone(), data)
    });
    harness.send(author_query(1));

    let next = tokio::time::timeout(Duration::from_millis(10), harness.results.next()).await;
    assert!(next.is_err());

    let mut fresh = author_query(1);
    fresh.context_mut().insert("fresh", true);
    harness.send(fresh);

    let (results, deliveries, _) = harness.finish().await;

    assert_eq!(deliveries.len(), 2);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].operation.context().retry_count(), 0);
    assert_eq!(results[0].data, Some(author_data()));
}

#[tokio::test(start_paused = true)]
async fn concurrent_operations_retry_independently() {
    let harness = Harness::new(&config(), |op| {
        let needed = op.key().as_u64() as u32;
        let data = if op.context().retry_count() >= needed {
            author_data()
        } else {
            author_empty()
        };
        OperationResult::from_data(op.clone(), data)
    });
    for key in 1..=3 {
        harness.send(author_query(key));
    }

    let (results, deliveries, _) = harness.finish().await;

    assert_eq!(results.len(), 3);
    for key in 1..=3_u64 {
        let result = results
            .iter()
            .find(|result| result.operation.key() == OperationKey::new(key))
            .unwrap();
        assert_eq!(result.operation.context().retry_count(), key as u32);

        let count = deliveries
            .iter()
            .filter(|op| op.key() == OperationKey::new(key))
            .count();
        assert_eq!(count, key as usize + 1);
    }
}

#[tokio::test(start_paused = true)]
async fn composes_with_other_layers() {
    struct CountLayer(Arc<AtomicUsize>);

    impl<E: Exchange> Layer<E> for CountLayer {
        type Exchange = ExchangeFn<Box<dyn Fn(OperationStream) -> ResultStream + Send + Sync>>;

        fn layer(&self, forward: E) -> Self::Exchange {
            let counter = self.0.clone();
            let f: Box<dyn Fn(OperationStream) -> ResultStream + Send + Sync> =
                Box::new(move |ops: OperationStream| {
                    let counter = counter.clone();
                    forward
                        .exchange(ops)
                        .inspect(move |_| {
                            counter.fetch_add(1, Ordering::SeqCst);
                        })
                        .boxed()
                });
            exchange_fn(f)
        }
    }

    let outer = Arc::new(AtomicUsize::new(0));
    let inner = Arc::new(AtomicUsize::new(0));
    let fetch = exchange_fn(|ops| {
        ops.map(|op: Operation| {
            let data = if op.context().retry_count() > 0 {
                author_data()
            } else {
                author_empty()
            };
            OperationResult::from_data(op, data)
        })
        .boxed()
    });

    let pipeline = (
        CountLayer(outer.clone()),
        RedialLayer::try_new(&config()).unwrap(),
        CountLayer(inner.clone()),
    )
        .layer(fetch);

    let results: Vec<_> = pipeline
        .exchange(futures::stream::iter([author_query(1)]).boxed())
        .collect()
        .await;

    assert_eq!(results.len(), 1);
    assert_eq!(inner.load(Ordering::SeqCst), 2);
    assert_eq!(outer.load(Ordering::SeqCst), 1);
}

/// A forward stage answering up to four deliveries concurrently,
/// each after a short round trip.
fn concurrent_forward(deliveries: Arc<AtomicUsize>, succeed_after: Option<u32>) -> impl Exchange {
    exchange_fn(move |ops| {
        let deliveries = deliveries.clone();
        ops.map(move |op: Operation| {
            deliveries.fetch_add(1, Ordering::SeqCst);
            async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                let satisfied =
                    succeed_after.is_some_and(|after| op.context().retry_count() >= after);
                let data = if satisfied {
                    author_data()
                } else {
                    author_empty()
                };
                OperationResult::from_data(op, data)
            }
        })
        .buffered(4)
        .boxed()
    })
}

#[tokio::test(start_paused = true)]
async fn concurrent_forward_retries_until_exhausted() {
    let deliveries = Arc::new(AtomicUsize::new(0));
    let pipeline = RedialLayer::try_new(&config().with_max_number_attempts(5))
        .unwrap()
        .layer(concurrent_forward(deliveries.clone(), None));

    let results: Vec<_> = pipeline
        .exchange(futures::stream::iter([author_query(1)]).boxed())
        .collect()
        .await;

    assert_eq!(deliveries.load(Ordering::SeqCst), 5);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].operation.context().retry_count(), 4);
    assert_eq!(results[0].data, Some(author_empty()));
}

#[tokio::test(start_paused = true)]
async fn concurrent_forward_retries_until_successful_result() {
    let deliveries = Arc::new(AtomicUsize::new(0));
    let pipeline = RedialLayer::try_new(&config())
        .unwrap()
        .layer(concurrent_forward(deliveries.clone(), Some(2)));

    let results: Vec<_> = pipeline
        .exchange(futures::stream::iter([author_query(1), author_query(2)]).boxed())
        .collect()
        .await;

    assert_eq!(deliveries.load(Ordering::SeqCst), 6);
    assert_eq!(results.len(), 2);
    for result in &results {
        assert_eq!(result.operation.context().retry_count(), 2);
        assert_eq!(result.data, Some(author_data()));
    }
}
