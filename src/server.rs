//! RPC server core (C6).
//!
//! [`Switchboard`] owns everything the dispatcher needs across connections:
//! the registered [`RpcApi`], the session registry, the room table mapping a
//! `clientId` to its live connections, the table of pending server-to-client
//! calls awaiting a reply, and the worker pool synchronous handlers run on.
//!
//! A `Switchboard` is meant to be shared behind an `Arc` and driven by one
//! [`reap_pending`] background task plus one task per transport connection
//! (spawned by `transport`).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::{Semaphore, mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::chunk::Frame;
use crate::context;
use crate::error::RpcError;
use crate::facade::{Dispatch, RpcApi};
use crate::router::EndpointKind;
use crate::session::SessionRegistry;
use crate::wire::{RpcCall, RpcResult, StreamResult};

/// Lock a `Switchboard` mutex, panicking on poison.
///
/// # Panics
/// Panics if a prior holder panicked while holding the lock: there is no
/// sane recovery from a dispatcher mutex left in an unknown state.
#[expect(clippy::expect_used, reason = "poisoned dispatcher state cannot be recovered from")]
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> { mutex.lock().expect("mutex poisoned") }

/// Tunables that would otherwise be magic numbers scattered through the
/// dispatcher; populated from [`crate::config::AppConfig`] at startup.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// How long a server-to-client call may wait for a reply before
    /// [`reap_pending`] rejects it with [`RpcError::FutureTimeout`].
    pub future_timeout: Duration,
    /// Concurrent synchronous-handler slots in the worker pool.
    pub worker_pool_size: usize,
    /// Chunking boundary passed to `chunk::encode_frames` by the transport
    /// layer; stored here so `Switchboard` can report it to callers that
    /// need to size an outgoing packet.
    pub chunk_size: usize,
    /// Ceiling passed to the transport's `WebSocketUpgrade::max_message_size`
    /// (and, in turn, `max_frame_size`) when a connection is upgraded.
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            future_timeout: Duration::from_secs(300),
            worker_pool_size: 4,
            chunk_size: 1024 * 1024,
            max_message_size: 1024 * 1024,
        }
    }
}

/// Opaque handle identifying one live transport connection within a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

struct Connection {
    client_id: String,
    outbound: mpsc::UnboundedSender<Frame>,
}

struct PendingCall {
    reply: oneshot::Sender<Result<Value, RpcError>>,
    created_at: Instant,
}

/// Limits how many synchronous handlers run at once, each on its own
/// blocking thread via `spawn_blocking`.
pub struct WorkerPool {
    permits: Semaphore,
}

impl WorkerPool {
    fn new(size: usize) -> Self { Self { permits: Semaphore::new(size.max(1)) } }

    /// Run a synchronous closure on a blocking thread with the ambient
    /// dispatch context re-entered, once a pool slot is free.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::HandlerException`] if the closure panics.
    pub async fn run<F, R>(&self, client_id: String, server: Arc<Switchboard>, f: F) -> Result<R, RpcError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let _permit = self.permits.acquire().await.expect("worker pool semaphore closed");
        tokio::task::spawn_blocking(move || context::sync_scope(client_id, server, f))
            .await
            .map_err(|e| RpcError::HandlerException(format!("worker pool task panicked: {e}")))
    }
}

/// The shared RPC dispatch core: routers, sessions, rooms, and pending
/// server-to-client calls.
pub struct Switchboard {
    api: RpcApi,
    sessions: SessionRegistry,
    rooms: Mutex<HashMap<String, Vec<ConnectionId>>>,
    connections: Mutex<HashMap<ConnectionId, Connection>>,
    pending: Mutex<HashMap<String, PendingCall>>,
    worker_pool: WorkerPool,
    next_connection_id: AtomicU64,
    config: ServerConfig,
}

impl Switchboard {
    /// Build a `Switchboard` around a finished [`RpcApi`] and its tunables.
    #[must_use]
    pub fn new(api: RpcApi, config: ServerConfig) -> Self {
        Self {
            api,
            sessions: SessionRegistry::new(),
            rooms: Mutex::new(HashMap::new()),
            connections: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            worker_pool: WorkerPool::new(config.worker_pool_size),
            next_connection_id: AtomicU64::new(0),
            config,
        }
    }

    /// The endpoint registry this server dispatches against.
    #[must_use]
    pub fn api(&self) -> &RpcApi { &self.api }

    /// The per-client session registry.
    #[must_use]
    pub fn sessions(&self) -> &SessionRegistry { &self.sessions }

    /// Handler concurrency limiter, shared by every connection.
    #[must_use]
    pub fn worker_pool(&self) -> &WorkerPool { &self.worker_pool }

    /// This server's tunables.
    #[must_use]
    pub fn config(&self) -> &ServerConfig { &self.config }

    /// Register a newly connected transport session for `client_id`,
    /// returning the `ConnectionId` the transport must pass to
    /// [`Switchboard::disconnect`] when the socket closes.
    pub fn connect(&self, client_id: &str, outbound: mpsc::UnboundedSender<Frame>) -> ConnectionId {
        let id = ConnectionId(self.next_connection_id.fetch_add(1, Ordering::SeqCst));
        lock(&self.connections).insert(id, Connection { client_id: client_id.to_owned(), outbound });
        lock(&self.rooms).entry(client_id.to_owned()).or_default().push(id);
        info!(client_id, connection = id.0, "client connected");
        id
    }

    /// Tear down a closed transport connection. Sessions are left intact:
    /// a reconnecting client must see the state it left behind.
    pub fn disconnect(&self, id: ConnectionId) {
        let Some(conn) = lock(&self.connections).remove(&id) else {
            return;
        };
        let mut rooms = lock(&self.rooms);
        if let Some(members) = rooms.get_mut(&conn.client_id) {
            members.retain(|member| *member != id);
            if members.is_empty() {
                rooms.remove(&conn.client_id);
            }
        }
        info!(client_id = conn.client_id, connection = id.0, "client disconnected");
    }

    /// Reject every in-flight server-to-client call and disconnect every live
    /// transport session; called when the process is shutting down.
    pub fn teardown(&self) {
        let pending: Vec<_> = lock(&self.pending).drain().collect();
        for (rpc_id, call) in pending {
            debug!(rpc_id, "rejecting pending call on server teardown");
            let _ = call.reply.send(Err(RpcError::Protocol("server is shutting down".to_owned())));
        }

        let connections: Vec<_> = lock(&self.connections).drain().collect();
        lock(&self.rooms).clear();
        for (id, conn) in connections {
            debug!(client_id = conn.client_id, connection = id.0, "closing connection on server teardown");
            // Dropping the sender closes the channel; the connection's
            // writer task sees the stream end and closes the socket.
            drop(conn.outbound);
        }
    }

    /// Handle one inbound `rpc:call` event, returning the result to place on
    /// the wire as `rpc:result`.
    ///
    /// Endpoint lookup and argument/result transform run under
    /// [`context::sync_scope`] so a transform step can also read ambient
    /// context. An asynchronous handler then runs on the event loop inside
    /// [`context::scope`]; a synchronous handler runs on [`Self::worker_pool`]
    /// instead, off the event loop, with the same context copied onto its
    /// worker thread.
    pub async fn dispatch_rpc_call(self: Arc<Self>, client_id: String, call: RpcCall) -> RpcResult {
        if self.api.endpoint_kind(&call.name) == Some(EndpointKind::Stream) {
            return RpcResult::err(call.rpc_id, format!("{} is a streaming endpoint", call.name));
        }
        let rpc_id = call.rpc_id.clone();
        let name = call.name.clone();
        let dispatch = {
            let client_id = client_id.clone();
            let server = Arc::clone(&self);
            context::sync_scope(client_id, server, || self.api.dispatch_unary(&name, call.args))
        };
        let outcome = match dispatch {
            Ok(Dispatch::Async(fut)) => context::scope(client_id, Arc::clone(&self), fut).await,
            Ok(Dispatch::Sync(run)) => {
                self.worker_pool.run(client_id, Arc::clone(&self), run).await.and_then(|r| r)
            }
            Err(err) => Err(err),
        };
        match outcome {
            Ok(data) => RpcResult::ok(rpc_id, data),
            Err(err) => {
                warn!(rpc_id, name = %name, error = %err, "rpc call failed");
                RpcResult::err(rpc_id, err.wire_message())
            }
        }
    }

    /// Handle one inbound `stream:call` event, returning the sequence of
    /// `stream:result` frames to emit in order (the caller is responsible
    /// for placing each one on the wire as it becomes available).
    pub fn dispatch_stream_call(
        self: Arc<Self>,
        client_id: String,
        call: RpcCall,
    ) -> futures_util::stream::BoxStream<'static, StreamResult> {
        use futures_util::StreamExt;

        let rpc_id = call.rpc_id.clone();
        if self.api.endpoint_kind(&call.name) == Some(EndpointKind::Unary) {
            let message = format!("{} is not a streaming endpoint", call.name);
            return futures_util::stream::once(async move { StreamResult::err(rpc_id, message) }).boxed();
        }

        let server = Arc::clone(&self);
        let name = call.name.clone();
        let args = call.args;
        let items = {
            let client_id = client_id.clone();
            let server = Arc::clone(&server);
            context::sync_scope(client_id, server, || self.api.invoke_stream(&name, args))
        };
        let items = match items {
            Ok(items) => items,
            Err(err) => {
                return futures_util::stream::once(async move { StreamResult::err(rpc_id, err.wire_message()) })
                    .boxed();
            }
        };

        // The terminal `done: true` frame is appended by the transport layer
        // once this stream is exhausted, not here: a handler that itself
        // fails partway through must still be able to emit an error item as
        // its last element.
        //
        // Every `poll_next` on `items` runs inside `context::scope`, not just
        // the mapping of an already-produced item: a handler that reads
        // `current_client_id()`/`current_server()` while generating a value
        // must see the same ambient context a unary handler gets.
        let state = (items, client_id, server, name, rpc_id);
        futures_util::stream::unfold(state, |(mut items, client_id, server, name, rpc_id)| async move {
            let next = context::scope(client_id.clone(), Arc::clone(&server), items.next()).await;
            let result = match next? {
                Ok(data) => StreamResult::item(rpc_id.clone(), data),
                Err(err) => {
                    warn!(rpc_id, name = %name, error = %err, "stream item failed");
                    StreamResult::err(rpc_id.clone(), err.wire_message())
                }
            };
            Some((result, (items, client_id, server, name, rpc_id)))
        })
        .boxed()
    }

    /// Resolve a pending server-to-client call from an inbound `rpc:result`.
    /// Unknown or already-resolved `rpcId`s are logged and dropped: the
    /// originating call has presumably already been reaped.
    pub fn handle_rpc_result(&self, result: RpcResult) {
        let mut pending = lock(&self.pending);
        let Some(call) = pending.remove(result.rpc_id()) else {
            warn!(rpc_id = result.rpc_id(), "rpc:result for unknown or already-resolved call");
            return;
        };
        drop(pending);
        let outcome = match result {
            RpcResult::Ok { data, .. } => Ok(data),
            RpcResult::Err { error, .. } => Err(RpcError::HandlerException(error)),
        };
        let _ = call.reply.send(outcome);
    }

    /// Issue a server-to-client call: `name`/`args` become an `rpc:call`
    /// event sent to the named client's room (or the ambient current client
    /// when `client_id` is `None`), and the returned future resolves when
    /// the matching `rpc:result` arrives or [`reap_pending`] times it out.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::ConnectionRefused`] if the target client has no
    /// live connection, or [`RpcError::FutureTimeout`] if no reply arrives
    /// within the configured timeout.
    pub async fn call_client(
        &self,
        name: &str,
        args: Vec<Value>,
        client_id: Option<String>,
    ) -> Result<Value, RpcError> {
        let client_id = client_id.unwrap_or_else(context::current_client_id);
        let rpc_id = Uuid::new_v4().to_string();
        let call = RpcCall { rpc_id: rpc_id.clone(), name: name.to_owned(), args };
        let frame = Frame::Text(
            serde_json::to_string(&crate::wire::Event::RpcCall(call))
                .expect("rpc call event always serializes"),
        );

        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(rpc_id.clone(), PendingCall { reply: tx, created_at: Instant::now() });

        if !self.emit_to_client(&client_id, frame) {
            lock(&self.pending).remove(&rpc_id);
            return Err(RpcError::ConnectionRefused("target client has no live connection"));
        }

        rx.await.unwrap_or(Err(RpcError::FutureTimeout))
    }

    /// Send one frame to every live connection for `client_id`.
    ///
    /// Returns `false` if the client has no live connection (the room is
    /// empty or absent).
    pub fn emit_to_client(&self, client_id: &str, frame: Frame) -> bool {
        let rooms = lock(&self.rooms);
        let Some(members) = rooms.get(client_id) else { return false };
        if members.is_empty() {
            return false;
        }
        let connections = lock(&self.connections);
        let mut sent_any = false;
        for id in members {
            if let Some(conn) = connections.get(id) {
                sent_any |= conn.outbound.send(frame.clone()).is_ok();
            }
        }
        sent_any
    }

    /// Number of pending server-to-client calls awaiting a reply; exposed
    /// for the reaper loop and tests.
    #[must_use]
    pub fn pending_count(&self) -> usize { lock(&self.pending).len() }

    /// Reject every pending call older than `self.config().future_timeout`,
    /// returning how many were reaped.
    pub fn reap_once(&self) -> usize {
        let now = Instant::now();
        let timeout = self.config.future_timeout;
        let stale: Vec<String> = lock(&self.pending)
            .iter()
            .filter(|(_, call)| now.duration_since(call.created_at) >= timeout)
            .map(|(rpc_id, _)| rpc_id.clone())
            .collect();

        let mut pending = lock(&self.pending);
        for rpc_id in &stale {
            if let Some(call) = pending.remove(rpc_id) {
                let _ = call.reply.send(Err(RpcError::FutureTimeout));
            }
        }
        stale.len()
    }
}

/// Background loop: periodically sweep `server`'s pending calls, rejecting
/// any older than its configured timeout. Intended to be spawned once per
/// `Switchboard` alongside the transport listener.
pub async fn reap_pending(server: Arc<Switchboard>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let reaped = server.reap_once();
        if reaped > 0 {
            debug!(reaped, "reaped stale pending server-to-client calls");
        }
    }
}
