//! Ambient dispatch context.
//!
//! The reference implementation sources `current_server`/`current_client_id`
//! from Python `contextvars`, readable by any code running in the same
//! logical call. `tokio::task_local!` is the idiomatic equivalent for async
//! Rust: it is scoped to one task and, unlike a plain thread-local, survives
//! the task being polled on a different worker thread. Synchronous handlers
//! run on a blocking thread via [`crate::server::WorkerPool`]; since that is
//! not a tokio task, the context is re-entered there with
//! [`tokio::task::LocalKey::sync_scope`], mirroring the reference
//! implementation's `copy_context().run(...)`.

use std::future::Future;
use std::sync::Arc;

use crate::server::Switchboard;

tokio::task_local! {
    static CURRENT_CLIENT_ID: String;
    static CURRENT_SERVER: Arc<Switchboard>;
}

/// Run `fut` with the ambient client id and server set for its duration.
pub async fn scope<F, R>(client_id: String, server: Arc<Switchboard>, fut: F) -> R
where
    F: Future<Output = R>,
{
    CURRENT_CLIENT_ID
        .scope(client_id, CURRENT_SERVER.scope(server, fut))
        .await
}

/// Run the synchronous closure `f` with the ambient client id and server
/// set, from a blocking (non-tokio-task) thread.
pub fn sync_scope<F, R>(client_id: String, server: Arc<Switchboard>, f: F) -> R
where
    F: FnOnce() -> R,
{
    CURRENT_CLIENT_ID.sync_scope(client_id, || CURRENT_SERVER.sync_scope(server, f))
}

/// The `clientId` of the call currently being dispatched.
///
/// # Panics
///
/// Panics if called outside of a handler invocation.
#[must_use]
pub fn current_client_id() -> String { CURRENT_CLIENT_ID.with(Clone::clone) }

/// The server handling the call currently being dispatched.
///
/// # Panics
///
/// Panics if called outside of a handler invocation.
#[must_use]
pub fn current_server() -> Arc<Switchboard> { CURRENT_SERVER.with(Arc::clone) }

/// Returns `true` if called from within an active dispatch scope.
#[must_use]
pub fn has_context() -> bool { CURRENT_CLIENT_ID.try_with(|_| ()).is_ok() }
