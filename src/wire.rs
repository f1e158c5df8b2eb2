//! Wire-level event payloads.
//!
//! These are the four logical events that ride the transport: `rpc:call`
//! and `rpc:result` travel in both directions (server-initiated calls reuse
//! the same shapes), `stream:call` is client-to-server only, and
//! `stream:result` is server-to-client only.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `{"rpcId": "...", "name": "...", "args": [...]}` — rides as either
/// `rpc:call` or `stream:call`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcCall {
    /// Correlation token for the matching result.
    pub rpc_id: String,
    /// The public endpoint name being invoked.
    pub name: String,
    /// Positional arguments.
    #[serde(default)]
    pub args: Vec<Value>,
}

/// A unary `rpc:result` payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum RpcResult {
    /// `{"rpcId", "ok": true, "data"}`
    Ok {
        /// Correlation token matching the originating call.
        #[serde(rename = "rpcId")]
        rpc_id: String,
        /// Always `true` for this variant.
        ok: bool,
        /// The handler's return value.
        data: Value,
    },
    /// `{"rpcId", "ok": false, "error"}`
    Err {
        /// Correlation token matching the originating call.
        #[serde(rename = "rpcId")]
        rpc_id: String,
        /// Always `false` for this variant.
        ok: bool,
        /// A human-readable error message.
        error: String,
    },
}

impl RpcResult {
    /// Build a success result.
    #[must_use]
    pub fn ok(rpc_id: impl Into<String>, data: Value) -> Self {
        Self::Ok { rpc_id: rpc_id.into(), ok: true, data }
    }

    /// Build an error result.
    #[must_use]
    pub fn err(rpc_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self::Err { rpc_id: rpc_id.into(), ok: false, error: error.into() }
    }

    /// The `rpcId` this result correlates to.
    #[must_use]
    pub fn rpc_id(&self) -> &str {
        match self {
            Self::Ok { rpc_id, .. } | Self::Err { rpc_id, .. } => rpc_id,
        }
    }
}

/// A `stream:result` payload: either an intermediate item, the terminal
/// success marker, or a terminal error.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum StreamResult {
    /// `{"rpcId", "ok": true, "data", "done": false|true}`
    Ok {
        /// Correlation token matching the originating call.
        #[serde(rename = "rpcId")]
        rpc_id: String,
        /// Always `true` for this variant.
        ok: bool,
        /// The yielded item, or `null` on the terminal frame.
        data: Value,
        /// `false` for intermediate items, `true` for the terminal frame.
        done: bool,
    },
    /// `{"rpcId", "ok": false, "error"}`
    Err {
        /// Correlation token matching the originating call.
        #[serde(rename = "rpcId")]
        rpc_id: String,
        /// Always `false` for this variant.
        ok: bool,
        /// A human-readable error message.
        error: String,
    },
}

impl StreamResult {
    /// Build an intermediate `done: false` item.
    #[must_use]
    pub fn item(rpc_id: impl Into<String>, data: Value) -> Self {
        Self::Ok { rpc_id: rpc_id.into(), ok: true, data, done: false }
    }

    /// Build the terminal success frame.
    #[must_use]
    pub fn done(rpc_id: impl Into<String>) -> Self {
        Self::Ok { rpc_id: rpc_id.into(), ok: true, data: Value::Null, done: true }
    }

    /// Build the terminal error frame.
    #[must_use]
    pub fn err(rpc_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self::Err { rpc_id: rpc_id.into(), ok: false, error: error.into() }
    }
}

/// The named event envelope a single JSON text frame carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum Event {
    /// `rpc:call`
    #[serde(rename = "rpc:call")]
    RpcCall(RpcCall),
    /// `rpc:result`
    #[serde(rename = "rpc:result")]
    RpcResult(RpcResult),
    /// `stream:call`
    #[serde(rename = "stream:call")]
    StreamCall(RpcCall),
    /// `stream:result`
    #[serde(rename = "stream:result")]
    StreamResult(StreamResult),
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn rpc_call_round_trips_through_json() {
        let call = RpcCall { rpc_id: "r1".to_owned(), name: "add".to_owned(), args: vec![json!(2), json!(3)] };
        let text = serde_json::to_string(&call).expect("serialize");
        let back: RpcCall = serde_json::from_str(&text).expect("deserialize");
        assert_eq!(back, call);
    }

    #[test]
    fn unary_success_matches_bit_exact_schema() {
        let result = RpcResult::ok("r1", json!(5));
        let value: Value = serde_json::to_value(&result).expect("serialize");
        assert_eq!(value, json!({"rpcId": "r1", "ok": true, "data": 5}));
    }

    #[test]
    fn unary_error_matches_bit_exact_schema() {
        let result = RpcResult::err("r2", "ghost is not a registered RPC");
        let value: Value = serde_json::to_value(&result).expect("serialize");
        assert_eq!(
            value,
            json!({"rpcId": "r2", "ok": false, "error": "ghost is not a registered RPC"})
        );
    }

    #[test]
    fn stream_terminal_ok_matches_bit_exact_schema() {
        let value: Value = serde_json::to_value(&StreamResult::done("r3")).expect("serialize");
        assert_eq!(value, json!({"rpcId": "r3", "ok": true, "data": null, "done": true}));
    }

    #[test]
    fn args_defaults_to_empty_when_absent() {
        let call: RpcCall = serde_json::from_value(json!({"rpcId": "r1", "name": "ping"}))
            .expect("deserialize without args");
        assert_eq!(call.args, Vec::<Value>::new());
    }
}
