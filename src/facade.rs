//! Public API facade (C7).
//!
//! `RpcApi` is the single entry point applications build against: register
//! endpoints with `expose_unary`/`expose_stream`, or assemble several
//! [`Router`]s independently and fold them in with [`RpcApi::add_router`].
//! Invocation goes through [`RpcApi::invoke_rpc`]/[`RpcApi::invoke_stream`],
//! which resolve the name against every router (first match wins, default
//! router checked first) and run the transform pipeline around the call when
//! the endpoint was registered with `transform_args`.

use futures_util::StreamExt;
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use serde_json::Value;

use crate::error::RpcError;
use crate::router::{Endpoint, EndpointKind, Handler, Router, StreamHandler, SyncHandler, UnaryHandler};
use crate::transform::{Transformer, transform_value, transform_values};

/// The two ways a resolved unary call can be carried out, returned by
/// [`RpcApi::dispatch_unary`] once endpoint lookup and argument transform
/// have already run.
///
/// A caller with no worker pool of its own (the facade's own
/// [`RpcApi::invoke_rpc`], or tests) can run either variant inline; a
/// dispatcher that owns a worker pool routes `Sync` through it instead.
pub enum Dispatch {
    /// Await on the calling task, same as any other async handler.
    Async(BoxFuture<'static, Result<Value, RpcError>>),
    /// Run to completion off the event loop — on a worker pool, or inline if
    /// the caller has none.
    Sync(Box<dyn FnOnce() -> Result<Value, RpcError> + Send>),
}

/// The assembled set of endpoints and transform pipelines an application
/// exposes over the RPC boundary.
#[derive(Default)]
pub struct RpcApi {
    default_router: Router,
    routers: Vec<Router>,
    deserializers: Vec<Transformer>,
    serializers: Vec<Transformer>,
}

impl RpcApi {
    /// Create an `RpcApi` with no endpoints and no transform steps.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Set the transform steps run over inbound call arguments before a
    /// `transform_args` endpoint's handler sees them.
    #[must_use]
    pub fn with_deserializers(mut self, deserializers: Vec<Transformer>) -> Self {
        self.deserializers = deserializers;
        self
    }

    /// Set the transform steps run over a `transform_args` endpoint's return
    /// value before it is placed on the wire.
    #[must_use]
    pub fn with_serializers(mut self, serializers: Vec<Transformer>) -> Self {
        self.serializers = serializers;
        self
    }

    /// Register a unary endpoint directly on this API's default router.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::DuplicateEndpoint`] if `name` is already
    /// registered on the default router.
    pub fn expose_unary(
        &mut self,
        name: impl Into<String>,
        transform_args: bool,
        handler: UnaryHandler,
    ) -> Result<(), RpcError> {
        self.default_router.add_unary(name, transform_args, handler)
    }

    /// Register a synchronous unary endpoint directly on this API's default
    /// router. Its handler runs on a worker pool rather than the event loop
    /// when dispatched through [`crate::server::Switchboard`].
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::DuplicateEndpoint`] if `name` is already
    /// registered on the default router.
    pub fn expose_sync_unary(
        &mut self,
        name: impl Into<String>,
        transform_args: bool,
        handler: SyncHandler,
    ) -> Result<(), RpcError> {
        self.default_router.add_sync_unary(name, transform_args, handler)
    }

    /// Register a streaming endpoint directly on this API's default router.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::DuplicateEndpoint`] if `name` is already
    /// registered on the default router.
    pub fn expose_stream(
        &mut self,
        name: impl Into<String>,
        transform_args: bool,
        handler: StreamHandler,
    ) -> Result<(), RpcError> {
        self.default_router.add_stream(name, transform_args, handler)
    }

    /// Fold an independently assembled router into this API. Names already
    /// present on a router registered earlier (or on the default router)
    /// take precedence; `router`'s endpoints are only reachable where they
    /// don't collide.
    pub fn add_router(&mut self, router: Router) { self.routers.push(router); }

    fn lookup(&self, name: &str) -> Option<&Endpoint> {
        self.default_router
            .lookup(name)
            .or_else(|| self.routers.iter().find_map(|r| r.lookup(name)))
    }

    /// Resolve a unary call into a runnable [`Dispatch`]: endpoint lookup,
    /// argument transform, and result transform are all settled here, so the
    /// caller only has to run (await or call) what comes back.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::EndpointNotFound`] if no router has `name`
    /// registered as a unary endpoint (synchronous or asynchronous).
    pub fn dispatch_unary(&self, name: &str, args: Vec<Value>) -> Result<Dispatch, RpcError> {
        let endpoint = self.lookup(name).ok_or_else(|| RpcError::EndpointNotFound(name.to_owned()))?;
        let transform_args = endpoint.transform_args();
        let args = if transform_args { transform_values(args, &self.deserializers) } else { args };
        let serializers = self.serializers.clone();
        let finish = move |result: Value| {
            if transform_args { transform_value(result, &serializers) } else { result }
        };
        match endpoint.handler() {
            Handler::Unary(handler) => {
                let fut = handler(args);
                Ok(Dispatch::Async(Box::pin(async move { Ok(finish(fut.await?)) })))
            }
            Handler::SyncUnary(handler) => {
                let handler = handler.clone();
                Ok(Dispatch::Sync(Box::new(move || Ok(finish(handler(args)?)))))
            }
            Handler::Stream(_) => Err(RpcError::EndpointNotFound(name.to_owned())),
        }
    }

    /// Invoke a registered unary endpoint by name, running it inline
    /// regardless of whether it is synchronous or asynchronous.
    ///
    /// A caller that owns a worker pool (e.g.
    /// [`crate::server::Switchboard`]) should use [`RpcApi::dispatch_unary`]
    /// directly instead, so synchronous handlers run off the event loop.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::EndpointNotFound`] if no router has `name`
    /// registered as a unary endpoint, or whatever the handler itself
    /// returns.
    pub async fn invoke_rpc(&self, name: &str, args: Vec<Value>) -> Result<Value, RpcError> {
        match self.dispatch_unary(name, args)? {
            Dispatch::Async(fut) => fut.await,
            Dispatch::Sync(run) => run(),
        }
    }

    /// Invoke a registered streaming endpoint by name, returning the
    /// (serializer-transformed, if applicable) item stream.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::EndpointNotFound`] if no router has `name`
    /// registered as a streaming endpoint.
    pub fn invoke_stream(
        &self,
        name: &str,
        args: Vec<Value>,
    ) -> Result<BoxStream<'static, Result<Value, RpcError>>, RpcError> {
        let endpoint = self.lookup(name).ok_or_else(|| RpcError::EndpointNotFound(name.to_owned()))?;
        let Handler::Stream(handler) = endpoint.handler() else {
            return Err(RpcError::EndpointNotFound(name.to_owned()));
        };
        let transform_args = endpoint.transform_args();
        let args = if transform_args { transform_values(args, &self.deserializers) } else { args };
        let serializers = self.serializers.clone();
        let stream = handler(args).map(move |item| {
            item.map(|value| {
                if transform_args { transform_value(value, &serializers) } else { value }
            })
        });
        Ok(stream.boxed())
    }

    /// `kind` of a registered endpoint, if present — used by the dispatcher
    /// to reject an `rpc:call` aimed at a streaming endpoint or vice versa.
    #[must_use]
    pub fn endpoint_kind(&self, name: &str) -> Option<EndpointKind> {
        self.lookup(name).map(Endpoint::kind)
    }
}
