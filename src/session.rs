//! Session registry (C4).
//!
//! Each `clientId` owns an opaque session value, created lazily by a
//! caller-supplied factory on first access and torn down only when the
//! whole registry is dropped — reconnecting tabs must still see their
//! previous state, so sessions are *not* evicted on disconnect.
//!
//! The reference implementation stores a single dynamically-typed object
//! per client; Rust has no runtime object model, so each client slot is a
//! small type map (`TypeId -> Box<dyn Any>`), letting independent endpoints
//! each keep their own session type without needing a single shared struct.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

type AnyBox = Box<dyn Any + Send>;

/// Lock the client table, panicking on poison.
///
/// # Panics
/// Panics if a prior holder panicked while holding the lock.
#[expect(clippy::expect_used, reason = "poisoned session state cannot be recovered from")]
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().expect("session registry mutex poisoned")
}

#[derive(Default)]
struct ClientSlot {
    values: HashMap<TypeId, AnyBox>,
}

/// Per-client session storage, shared by every connection for a given
/// `clientId`.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    clients: Arc<Mutex<HashMap<String, ClientSlot>>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Return the session value of type `T` for `client_id`, constructing it
    /// with `factory` if this is the first access for that client and type.
    ///
    /// # Panics
    ///
    /// Panics if the session mutex is poisoned by a prior panic while held.
    pub fn get_or_create<T, F>(&self, client_id: &str, factory: F) -> Arc<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> T,
    {
        let mut clients = lock(&self.clients);
        let slot = clients.entry(client_id.to_owned()).or_default();
        let type_id = TypeId::of::<Arc<T>>();
        if let Some(existing) = slot.values.get(&type_id) {
            return existing
                .downcast_ref::<Arc<T>>()
                .expect("type map key matches stored type")
                .clone();
        }
        let value = Arc::new(factory());
        slot.values.insert(type_id, Box::new(value.clone()));
        value
    }

    /// Return the session value of type `T` for `client_id` if it has
    /// already been created, without constructing one.
    ///
    /// # Panics
    ///
    /// Panics if the session mutex is poisoned by a prior panic while held.
    #[must_use]
    pub fn get<T>(&self, client_id: &str) -> Option<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        let clients = lock(&self.clients);
        let slot = clients.get(client_id)?;
        slot.values
            .get(&TypeId::of::<Arc<T>>())
            .map(|boxed| boxed.downcast_ref::<Arc<T>>().expect("type map key matches stored type").clone())
    }

    /// Remove every session value stored for `client_id`. Not called on
    /// disconnect by the dispatcher — exposed for applications that choose
    /// to implement their own eviction policy.
    pub fn evict(&self, client_id: &str) {
        lock(&self.clients).remove(client_id);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn factory_runs_once_per_client_and_type() {
        let registry = SessionRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let make = || {
            calls.fetch_add(1, Ordering::SeqCst);
            42_i32
        };
        let first = registry.get_or_create("alice", make);
        let second = registry.get_or_create("alice", || unreachable!("factory must not rerun"));
        assert_eq!(*first, 42);
        assert_eq!(*second, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn sessions_are_independent_per_client() {
        let registry = SessionRegistry::new();
        registry.get_or_create("alice", || 1_i32);
        registry.get_or_create("bob", || 2_i32);
        assert_eq!(*registry.get::<i32>("alice").expect("alice session"), 1);
        assert_eq!(*registry.get::<i32>("bob").expect("bob session"), 2);
    }

    #[test]
    fn distinct_types_share_a_client_slot_independently() {
        let registry = SessionRegistry::new();
        registry.get_or_create("alice", || 1_i32);
        registry.get_or_create("alice", || "session-string".to_owned());
        assert_eq!(*registry.get::<i32>("alice").expect("int session"), 1);
        assert_eq!(
            *registry.get::<String>("alice").expect("string session"),
            "session-string"
        );
    }

    #[test]
    fn get_without_factory_returns_none_when_absent() {
        let registry = SessionRegistry::new();
        assert!(registry.get::<i32>("ghost").is_none());
    }

    #[test]
    fn eviction_removes_the_client_slot() {
        let registry = SessionRegistry::new();
        registry.get_or_create("alice", || 1_i32);
        registry.evict("alice");
        assert!(registry.get::<i32>("alice").is_none());
    }
}
