//! Operations and their results, as they flow through an exchange pipeline.
//!
//! An [`Operation`] is one logical request. It is identified by a stable
//! [`OperationKey`], which is kept as-is whenever the operation is re-issued
//! (e.g. by the [`Redial`] stage). Everything that is allowed to change between
//! deliveries of the same request lives in its [`OperationContext`].
//!
//! [`Redial`]: crate::Redial

use serde_json::{Map, Value};
use std::{fmt, sync::Arc, time::Duration};

/// Stable identity of a logical request, shared by all its (re)deliveries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationKey(u64);

impl OperationKey {
    /// Create a new [`OperationKey`].
    #[must_use]
    pub const fn new(key: u64) -> Self {
        Self(key)
    }

    /// Return the raw key value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for OperationKey {
    fn from(key: u64) -> Self {
        Self(key)
    }
}

impl fmt::Display for OperationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The kind of an [`Operation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// A read-only query.
    Query,
    /// A mutation.
    Mutation,
    /// A long-lived subscription.
    Subscription,
    /// Signal that the caller is no longer interested in the
    /// operation identified by the same key.
    Teardown,
}

impl OperationKind {
    /// Return the kind as its lowercase tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Mutation => "mutation",
            Self::Subscription => "subscription",
            Self::Teardown => "teardown",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single top-level definition of a [`QueryDocument`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Definition {
    /// An operation definition, optionally named.
    Operation {
        /// Name declared on the operation, if any.
        name: Option<String>,
    },
    /// A fragment definition.
    Fragment {
        /// Name of the fragment.
        name: String,
    },
}

/// Pre-parsed structural descriptor of a query document.
///
/// Only the shape required to find the top-level operation name is kept,
/// parsing the actual query text is the responsibility of whoever
/// creates the [`Operation`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryDocument {
    definitions: Vec<Definition>,
}

impl QueryDocument {
    /// Create a new [`QueryDocument`] from its definitions, in document order.
    #[must_use]
    pub fn new(definitions: Vec<Definition>) -> Self {
        Self { definitions }
    }

    /// Create a [`QueryDocument`] containing a single named operation definition.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self::new(vec![Definition::Operation {
            name: Some(name.into()),
        }])
    }

    /// Create a [`QueryDocument`] containing a single anonymous operation definition.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::new(vec![Definition::Operation { name: None }])
    }

    /// The definitions of this document, in document order.
    #[must_use]
    pub fn definitions(&self) -> &[Definition] {
        &self.definitions
    }

    /// Name of the top-level operation.
    ///
    /// Only the first definition is considered, and only when it is
    /// an operation definition which declares a name.
    #[must_use]
    pub fn operation_name(&self) -> Option<&str> {
        match self.definitions.first()? {
            Definition::Operation { name } => name.as_deref(),
            Definition::Fragment { .. } => None,
        }
    }
}

/// Context bag exclusively owned by an [`Operation`].
///
/// The retry bookkeeping (attempt counter and last used delay) is stored
/// as typed entries, all other values are kept in an open map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperationContext {
    retry_count: Option<u32>,
    retry_delay: Option<Duration>,
    values: Map<String, Value>,
}

impl OperationContext {
    /// Create a new empty [`OperationContext`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of retries that preceded the delivery carrying this context.
    ///
    /// Defaults to `0` for an operation that was never retried.
    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.retry_count.unwrap_or_default()
    }

    /// Delay that was waited before the delivery carrying this context,
    /// absent for an operation that was never retried.
    #[must_use]
    pub fn retry_delay(&self) -> Option<Duration> {
        self.retry_delay
    }

    /// Return a copy of this context with the retry entries overwritten.
    #[must_use]
    pub fn with_retry(&self, retry_count: u32, retry_delay: Duration) -> Self {
        Self {
            retry_count: Some(retry_count),
            retry_delay: Some(retry_delay),
            values: self.values.clone(),
        }
    }

    /// Get an open context value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Insert an open context value, returning the previous one if any.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.values.insert(key.into(), value.into())
    }

    /// Remove an open context value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }
}

/// One logical request flowing through an exchange pipeline.
///
/// Cloning is cheap: the query document is shared.
#[derive(Debug, Clone)]
pub struct Operation {
    key: OperationKey,
    kind: OperationKind,
    query: Arc<QueryDocument>,
    context: OperationContext,
}

impl Operation {
    /// Create a new [`Operation`] with an empty context.
    pub fn new(
        key: impl Into<OperationKey>,
        kind: OperationKind,
        query: impl Into<Arc<QueryDocument>>,
    ) -> Self {
        Self {
            key: key.into(),
            kind,
            query: query.into(),
            context: OperationContext::default(),
        }
    }

    /// Create a new [`Operation`] of kind [`OperationKind::Query`].
    pub fn query(key: impl Into<OperationKey>, query: impl Into<Arc<QueryDocument>>) -> Self {
        Self::new(key, OperationKind::Query, query)
    }

    /// Attach the given context to this [`Operation`].
    #[must_use]
    pub fn with_context(mut self, context: OperationContext) -> Self {
        self.context = context;
        self
    }

    /// Key of this operation, stable across retries.
    #[must_use]
    pub fn key(&self) -> OperationKey {
        self.key
    }

    /// Kind of this operation.
    #[must_use]
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Query document descriptor of this operation.
    #[must_use]
    pub fn document(&self) -> &QueryDocument {
        &self.query
    }

    /// Context of this operation.
    #[must_use]
    pub fn context(&self) -> &OperationContext {
        &self.context
    }

    /// Mutable access to the context of this operation.
    pub fn context_mut(&mut self) -> &mut OperationContext {
        &mut self.context
    }

    /// Create a new operation for the same request with the given context.
    ///
    /// Key, kind and query are carried over, `self` is left untouched.
    #[must_use]
    pub fn reissue(&self, context: OperationContext) -> Self {
        Self {
            key: self.key,
            kind: self.kind,
            query: self.query.clone(),
            context,
        }
    }

    /// Create the teardown signal for this operation.
    #[must_use]
    pub fn teardown(&self) -> Self {
        Self {
            key: self.key,
            kind: OperationKind::Teardown,
            query: self.query.clone(),
            context: self.context.clone(),
        }
    }
}

/// Error reported by a downstream stage for a single delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationError {
    message: String,
}

impl OperationError {
    /// Create a new [`OperationError`].
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Message of this error.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for OperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "operation failed: {}", self.message)
    }
}

impl std::error::Error for OperationError {}

/// Result produced by a downstream stage for one delivery of an [`Operation`].
#[derive(Debug, Clone)]
pub struct OperationResult {
    /// The (possibly re-issued) operation this result answers.
    pub operation: Operation,
    /// Data returned for the operation, if any.
    pub data: Option<Value>,
    /// Failure reported by the downstream stage, if any.
    pub error: Option<OperationError>,
}

impl OperationResult {
    /// Create a result carrying data.
    #[must_use]
    pub fn from_data(operation: Operation, data: Value) -> Self {
        Self {
            operation,
            data: Some(data),
            error: None,
        }
    }

    /// Create a result carrying an error.
    #[must_use]
    pub fn from_error(operation: Operation, error: OperationError) -> Self {
        Self {
            operation,
            data: None,
            error: Some(error),
        }
    }

    /// Create a result carrying neither data nor error.
    #[must_use]
    pub fn empty(operation: Operation) -> Self {
        Self {
            operation,
            data: None,
            error: None,
        }
    }
}
