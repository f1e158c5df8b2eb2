//! Endpoint router (C3).
//!
//! A router is an ordered name -> endpoint registry. Duplicate registration
//! within a single router is rejected; a public API facade (C7) composes
//! several routers with first-match-wins lookup.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use serde_json::Value;

use crate::error::RpcError;

/// Whether an endpoint is invoked once per call or yields a sequence of
/// results. Unlike a dynamically typed implementation, which can detect this
/// by inspecting whether a handler is a generator function, Rust endpoints
/// declare their kind at registration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    /// Invoked once, returns a single result.
    Unary,
    /// Invoked once, yields zero or more results followed by completion.
    Stream,
}

/// A unary handler: takes the call's (already-deserialized, if
/// `transform_args`) arguments and asynchronously produces a result value.
pub type UnaryHandler =
    Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, Result<Value, RpcError>> + Send + Sync>;

/// A synchronous unary handler: runs to completion without yielding to the
/// executor. The dispatcher runs these on [`crate::server::WorkerPool`]
/// rather than the event loop, with the ambient dispatch context copied onto
/// the worker thread.
pub type SyncHandler = Arc<dyn Fn(Vec<Value>) -> Result<Value, RpcError> + Send + Sync>;

/// A streaming handler: takes arguments and produces a lazy sequence of
/// results, each of which is serialized and emitted as it is yielded.
pub type StreamHandler =
    Arc<dyn Fn(Vec<Value>) -> BoxStream<'static, Result<Value, RpcError>> + Send + Sync>;

/// The handler half of an [`Endpoint`]: asynchronous unary, synchronous
/// unary, or streaming.
#[derive(Clone)]
pub enum Handler {
    /// See [`UnaryHandler`].
    Unary(UnaryHandler),
    /// See [`SyncHandler`].
    SyncUnary(SyncHandler),
    /// See [`StreamHandler`].
    Stream(StreamHandler),
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unary(_) => f.write_str("Handler::Unary(..)"),
            Self::SyncUnary(_) => f.write_str("Handler::SyncUnary(..)"),
            Self::Stream(_) => f.write_str("Handler::Stream(..)"),
        }
    }
}

/// A registered endpoint: its handler, kind, and whether the transform
/// pipeline runs over its arguments and result.
#[derive(Debug, Clone)]
pub struct Endpoint {
    handler: Handler,
    kind: EndpointKind,
    transform_args: bool,
}

impl Endpoint {
    /// The endpoint's kind (unary or streaming).
    #[must_use]
    pub const fn kind(&self) -> EndpointKind { self.kind }

    /// Whether calls to this endpoint run through the transform pipeline.
    #[must_use]
    pub const fn transform_args(&self) -> bool { self.transform_args }

    /// The endpoint's handler.
    #[must_use]
    pub const fn handler(&self) -> &Handler { &self.handler }
}

/// An ordered name -> endpoint registry.
#[derive(Debug, Default)]
pub struct Router {
    endpoints: HashMap<String, Endpoint>,
    order: Vec<String>,
}

impl Router {
    /// Create an empty router.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Register a unary endpoint under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::DuplicateEndpoint`] if `name` is already
    /// registered on this router.
    pub fn add_unary(
        &mut self,
        name: impl Into<String>,
        transform_args: bool,
        handler: UnaryHandler,
    ) -> Result<(), RpcError> {
        self.insert(
            name.into(),
            Endpoint {
                handler: Handler::Unary(handler),
                kind: EndpointKind::Unary,
                transform_args,
            },
        )
    }

    /// Register a synchronous unary endpoint under `name`. Its handler runs
    /// on the worker pool rather than the event loop; see [`SyncHandler`].
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::DuplicateEndpoint`] if `name` is already
    /// registered on this router.
    pub fn add_sync_unary(
        &mut self,
        name: impl Into<String>,
        transform_args: bool,
        handler: SyncHandler,
    ) -> Result<(), RpcError> {
        self.insert(
            name.into(),
            Endpoint {
                handler: Handler::SyncUnary(handler),
                kind: EndpointKind::Unary,
                transform_args,
            },
        )
    }

    /// Register a streaming endpoint under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::DuplicateEndpoint`] if `name` is already
    /// registered on this router.
    pub fn add_stream(
        &mut self,
        name: impl Into<String>,
        transform_args: bool,
        handler: StreamHandler,
    ) -> Result<(), RpcError> {
        self.insert(
            name.into(),
            Endpoint {
                handler: Handler::Stream(handler),
                kind: EndpointKind::Stream,
                transform_args,
            },
        )
    }

    fn insert(&mut self, name: String, endpoint: Endpoint) -> Result<(), RpcError> {
        if self.endpoints.contains_key(&name) {
            return Err(RpcError::DuplicateEndpoint(name));
        }
        self.order.push(name.clone());
        self.endpoints.insert(name, endpoint);
        Ok(())
    }

    /// Look up an endpoint by public name.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<&Endpoint> { self.endpoints.get(name) }

    /// Iterate registered public names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> { self.order.iter().map(String::as_str) }
}

#[cfg(test)]
mod tests {
    use futures_util::{FutureExt, StreamExt};
    use serde_json::json;

    use super::*;

    fn echo_handler() -> UnaryHandler {
        Arc::new(|mut args: Vec<Value>| {
            async move { Ok(args.pop().unwrap_or(Value::Null)) }.boxed()
        })
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let mut router = Router::new();
        router.add_unary("add", true, echo_handler()).expect("first registration");
        let err = router
            .add_unary("add", true, echo_handler())
            .expect_err("duplicate must fail");
        assert!(matches!(err, RpcError::DuplicateEndpoint(name) if name == "add"));
    }

    #[test]
    fn lookup_returns_registered_endpoint() {
        let mut router = Router::new();
        router.add_unary("add", true, echo_handler()).expect("register");
        let endpoint = router.lookup("add").expect("present");
        assert_eq!(endpoint.kind(), EndpointKind::Unary);
        assert!(endpoint.transform_args());
    }

    #[test]
    fn lookup_missing_name_returns_none() {
        let router = Router::new();
        assert!(router.lookup("ghost").is_none());
    }

    #[test]
    fn names_preserve_insertion_order() {
        let mut router = Router::new();
        router.add_unary("b", true, echo_handler()).expect("b");
        router.add_unary("a", true, echo_handler()).expect("a");
        assert_eq!(router.names().collect::<Vec<_>>(), vec!["b", "a"]);
    }

    #[tokio::test]
    async fn zero_argument_call_succeeds() {
        let mut router = Router::new();
        router
            .add_unary(
                "ping",
                true,
                Arc::new(|_args: Vec<Value>| async { Ok(json!("pong")) }.boxed()),
            )
            .expect("register");
        let Handler::Unary(handler) = router.lookup("ping").expect("present").handler() else {
            panic!("expected unary handler");
        };
        assert_eq!(handler(vec![]).await.expect("call ok"), json!("pong"));
    }

    #[test]
    fn sync_unary_endpoint_registers_as_unary_kind() {
        let mut router = Router::new();
        router
            .add_sync_unary("blocking-add", true, Arc::new(|args: Vec<Value>| {
                let sum: i64 = args.iter().filter_map(Value::as_i64).sum();
                Ok(json!(sum))
            }))
            .expect("register");
        let endpoint = router.lookup("blocking-add").expect("present");
        assert_eq!(endpoint.kind(), EndpointKind::Unary);
        let Handler::SyncUnary(handler) = endpoint.handler() else {
            panic!("expected sync unary handler");
        };
        assert_eq!(handler(vec![json!(2), json!(3)]).expect("call ok"), json!(5));
    }

    #[tokio::test]
    async fn stream_endpoint_yields_in_order() {
        let mut router = Router::new();
        router
            .add_stream(
                "progress",
                true,
                Arc::new(|_args: Vec<Value>| {
                    futures_util::stream::iter(vec![Ok(json!(1)), Ok(json!(2)), Ok(json!(3))])
                        .boxed()
                }),
            )
            .expect("register");
        let Handler::Stream(handler) = router.lookup("progress").expect("present").handler()
        else {
            panic!("expected stream handler");
        };
        let items: Vec<_> = handler(vec![]).collect().await;
        assert_eq!(
            items.into_iter().map(Result::unwrap).collect::<Vec<_>>(),
            vec![json!(1), json!(2), json!(3)]
        );
    }
}
