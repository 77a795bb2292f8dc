//! Retry-until-satisfied stage for query operation pipelines.
//!
//! `rama-redial` provides [`Redial`], an [`Exchange`] middleware which sits
//! in an operation pipeline and re-issues query operations whose results do not
//! yet satisfy an application defined success rule. Retries are delayed using a
//! jittered backoff and bounded by a maximum number of attempts, while the caller
//! observes exactly one result per operation.
//!
//! ```
//! use futures::StreamExt;
//! use rama_redial::{
//!     Layer, Operation, OperationResult, QueryDocument, RedialConfig, RedialLayer,
//!     exchange::{Exchange, exchange_fn},
//! };
//! use serde_json::json;
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let config = RedialConfig::new()
//!     .with_initial_delay(Duration::from_millis(1))
//!     .with_rule("author", "$.author.id");
//!
//! let pipeline = RedialLayer::try_new(&config).unwrap().layer(exchange_fn(|ops| {
//!     ops.map(|op: Operation| {
//!         let id = op.context().retry_count() * 100;
//!         let data = if id > 0 { json!({ "author": { "id": id } }) } else { json!({ "author": null }) };
//!         OperationResult::from_data(op, data)
//!     })
//!     .boxed()
//! }));
//!
//! let op = Operation::query(1, QueryDocument::named("author"));
//! let results: Vec<_> = pipeline.exchange(futures::stream::iter([op]).boxed()).collect().await;
//!
//! assert_eq!(results.len(), 1);
//! assert_eq!(results[0].operation.context().retry_count(), 1);
//! assert_eq!(results[0].data, Some(json!({ "author": { "id": 100 } })));
//! # }
//! ```
//!
//! # Rama
//!
//! Learn more about `rama`:
//!
//! - Github: <https://github.com/plabayo/rama>
//! - Book: <https://ramaproxy.org/book/>

#![doc(
    html_favicon_url = "https://raw.githubusercontent.com/plabayo/rama/main/docs/img/old_logo.png"
)]
#![doc(html_logo_url = "https://raw.githubusercontent.com/plabayo/rama/main/docs/img/old_logo.png")]
#![cfg_attr(docsrs, feature(doc_auto_cfg, doc_cfg))]
#![cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::float_cmp)
)]

pub mod backoff;
pub mod debug;
pub mod exchange;
pub mod matcher;
pub mod operation;
pub mod redial;
pub mod rng;

#[doc(inline)]
pub use exchange::{Exchange, Layer};
#[doc(inline)]
pub use operation::{
    Operation, OperationContext, OperationError, OperationKey, OperationKind, OperationResult,
    QueryDocument,
};
#[doc(inline)]
pub use redial::{Redial, RedialConfig, RedialConfigError, RedialLayer};
