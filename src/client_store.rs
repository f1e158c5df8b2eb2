//! Client-store proxy (C5).
//!
//! Lets handler code write `store.prop("images").prop("getName").call(args)`
//! to invoke a method, or `.await` a property path directly, to read or
//! invoke a named client-side store from inside a server handler. Chaining
//! is allocation-only, and a client round trip is issued only when the
//! final descriptor is awaited, via [`IntoFuture`].

use std::future::IntoFuture;

use futures_util::future::BoxFuture;
use serde_json::{Value, json};

use crate::context::{current_client_id, current_server};
use crate::error::RpcError;

const RPC_GET_VALUE: &str = "getStoreProperty";
const RPC_CALL_METHOD: &str = "callStoreMethod";

/// A single segment of a property chain: `["images", "active", 0]`-style
/// paths mix string and integer keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropKey {
    /// A named property or method.
    Name(String),
    /// An indexed element.
    Index(i64),
}

impl From<&str> for PropKey {
    fn from(value: &str) -> Self { Self::Name(value.to_owned()) }
}

impl From<String> for PropKey {
    fn from(value: String) -> Self { Self::Name(value) }
}

impl From<i64> for PropKey {
    fn from(value: i64) -> Self { Self::Index(value) }
}

impl From<&PropKey> for Value {
    fn from(key: &PropKey) -> Self {
        match key {
            PropKey::Name(s) => json!(s),
            PropKey::Index(i) => json!(i),
        }
    }
}

/// A named client-side store, the root of a property path chain.
#[derive(Debug, Clone)]
pub struct ClientStore {
    store_id: String,
}

impl ClientStore {
    /// Name the client-side store to address.
    #[must_use]
    pub fn new(store_id: impl Into<String>) -> Self { Self { store_id: store_id.into() } }

    /// Start a property chain rooted at this store.
    #[must_use]
    pub fn prop(&self, key: impl Into<PropKey>) -> PropertyPath {
        PropertyPath {
            store_id: self.store_id.clone(),
            chain: vec![key.into()],
        }
    }
}

/// A lazy, chainable property path on a [`ClientStore`]. Materialises into a
/// `getStoreProperty` round trip only when awaited.
#[derive(Debug, Clone)]
pub struct PropertyPath {
    store_id: String,
    chain: Vec<PropKey>,
}

impl PropertyPath {
    /// Append another segment to the chain.
    #[must_use]
    pub fn prop(&self, key: impl Into<PropKey>) -> Self {
        let mut chain = self.chain.clone();
        chain.push(key.into());
        Self { store_id: self.store_id.clone(), chain }
    }

    /// Turn this path into a method call with the given arguments.
    #[must_use]
    pub fn call(&self, args: Vec<Value>) -> MethodCall {
        MethodCall { store_id: self.store_id.clone(), chain: self.chain.clone(), args }
    }

    fn chain_value(&self) -> Value { Value::Array(self.chain.iter().map(Value::from).collect()) }
}

impl IntoFuture for PropertyPath {
    type Output = Result<Value, RpcError>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move {
            let args = vec![json!(self.store_id), self.chain_value()];
            current_server()
                .call_client(RPC_GET_VALUE, args, Some(current_client_id()))
                .await
        })
    }
}

/// A materialised method call on a [`ClientStore`] property path.
#[derive(Debug, Clone)]
pub struct MethodCall {
    store_id: String,
    chain: Vec<PropKey>,
    args: Vec<Value>,
}

impl IntoFuture for MethodCall {
    type Output = Result<Value, RpcError>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move {
            let chain = Value::Array(self.chain.iter().map(Value::from).collect());
            let args = vec![json!(self.store_id), chain, Value::Array(self.args)];
            current_server()
                .call_client(RPC_CALL_METHOD, args, Some(current_client_id()))
                .await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chaining_is_allocation_only_and_preserves_order() {
        let store = ClientStore::new("images");
        let path = store.prop("active").prop(0_i64).prop("getName");
        assert_eq!(
            path.chain,
            vec![
                PropKey::Name("active".to_owned()),
                PropKey::Index(0),
                PropKey::Name("getName".to_owned()),
            ]
        );
    }

    #[test]
    fn call_captures_arguments_without_materialising() {
        let store = ClientStore::new("images");
        let call = store.prop("getName").call(vec![json!("img-1")]);
        assert_eq!(call.store_id, "images");
        assert_eq!(call.args, vec![json!("img-1")]);
    }
}
