//! The exchange contract: `Stream<Operation> -> Stream<OperationResult>`.
//!
//! An [`Exchange`] is one stage of a pipeline. It receives the stream of
//! operations coming from the caller and returns the stream of results
//! flowing back. Middleware such as [`Redial`] wraps another exchange
//! (its "forward" stage) and exposes the exact same shape, so stages compose
//! transparently by means of a [`Layer`].
//!
//! [`Redial`]: crate::Redial

use crate::operation::{Operation, OperationResult};
use futures::stream::BoxStream;
use std::sync::Arc;

mod layer;
#[doc(inline)]
pub use layer::Layer;

/// Stream of operations flowing towards the downstream stages.
pub type OperationStream = BoxStream<'static, Operation>;

/// Stream of results flowing back towards the caller.
pub type ResultStream = BoxStream<'static, OperationResult>;

/// A single stage of an operation pipeline.
pub trait Exchange: Send + Sync + 'static {
    /// Turn the given operation stream into a result stream.
    fn exchange(&self, operations: OperationStream) -> ResultStream;
}

impl<E> Exchange for Arc<E>
where
    E: Exchange,
{
    #[inline]
    fn exchange(&self, operations: OperationStream) -> ResultStream {
        self.as_ref().exchange(operations)
    }
}

impl<E> Exchange for Box<E>
where
    E: Exchange,
{
    #[inline]
    fn exchange(&self, operations: OperationStream) -> ResultStream {
        self.as_ref().exchange(operations)
    }
}

/// Create an [`Exchange`] from a function.
pub fn exchange_fn<F>(f: F) -> ExchangeFn<F>
where
    F: Fn(OperationStream) -> ResultStream + Send + Sync + 'static,
{
    ExchangeFn { f }
}

/// An [`Exchange`] implemented by a function.
///
/// Created using [`exchange_fn`].
#[derive(Clone)]
pub struct ExchangeFn<F> {
    f: F,
}

impl<F> std::fmt::Debug for ExchangeFn<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeFn")
            .field("f", &std::any::type_name::<F>())
            .finish()
    }
}

impl<F> Exchange for ExchangeFn<F>
where
    F: Fn(OperationStream) -> ResultStream + Send + Sync + 'static,
{
    fn exchange(&self, operations: OperationStream) -> ResultStream {
        (self.f)(operations)
    }
}
