//! WebSocket transport binding (§1 of the expanded spec).
//!
//! Binds the RPC core to a concrete `GET /rpc?clientId=<id>` WebSocket
//! upgrade. Each connection gets a reader task (inbound frames: feed the
//! chunk reassembler, parse the reassembled JSON event, dispatch into the
//! [`Switchboard`]) and a writer task (outbound frames: re-chunk per the
//! configured chunk size, write to the socket). The two run concurrently so
//! a slow handler on one connection never blocks another connection's I/O.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::chunk::{Decoded, Frame, Reassembler, encode_frames};
use crate::server::Switchboard;
use crate::wire::Event;

/// Build the axum `Router` serving the `/rpc` upgrade endpoint over
/// `server`.
#[must_use]
pub fn router(server: Arc<Switchboard>) -> axum::Router {
    axum::Router::new().route("/rpc", get(upgrade)).with_state(server)
}

async fn upgrade(
    ws: WebSocketUpgrade,
    State(server): State<Arc<Switchboard>>,
    Query(params): Query<HashMap<String, String>>,
) -> axum::response::Response {
    let client_id = params.get("clientId").filter(|id| !id.is_empty()).cloned();
    let Some(client_id) = client_id else {
        warn!("websocket upgrade refused: no clientId provided");
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "No clientId provided"})))
            .into_response();
    };
    let max_message_size = server.config().max_message_size;
    ws.max_message_size(max_message_size)
        .max_frame_size(max_message_size)
        .on_upgrade(move |socket| handle_connection(socket, server, client_id))
}

async fn handle_connection(socket: WebSocket, server: Arc<Switchboard>, client_id: String) {
    let (mut sink, mut stream) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Frame>();
    let connection_id = server.connect(&client_id, outbound_tx.clone());

    let chunk_size = server.config().chunk_size;
    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            for piece in encode_frames(std::slice::from_ref(&frame), chunk_size) {
                let message = match piece {
                    Frame::Text(text) => Message::Text(text.into()),
                    Frame::Binary(bytes) => Message::Binary(bytes.into()),
                };
                if sink.send(message).await.is_err() {
                    return;
                }
            }
        }
    });

    let mut reassembler = Reassembler::new();
    while let Some(message) = stream.next().await {
        let message = match message {
            Ok(message) => message,
            Err(err) => {
                warn!(client_id, error = %err, "websocket read error, closing connection");
                break;
            }
        };
        let frame = match message {
            Message::Text(text) => Frame::Text(text.to_string()),
            Message::Binary(bytes) => Frame::Binary(bytes.to_vec()),
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => continue,
        };

        match reassembler.feed(frame) {
            Ok(Decoded::Passthrough(frame) | Decoded::Complete(frame)) => {
                dispatch_inbound_frame(&server, &client_id, &outbound_tx, frame).await;
            }
            Ok(Decoded::ControlConsumed | Decoded::Buffering) => {}
            Err(err) => {
                warn!(client_id, error = %err, "chunk reassembly failed, closing connection");
                break;
            }
        }
    }

    server.disconnect(connection_id);
    writer.abort();
}

async fn dispatch_inbound_frame(
    server: &Arc<Switchboard>,
    client_id: &str,
    outbound: &mpsc::UnboundedSender<Frame>,
    frame: Frame,
) {
    let Frame::Text(text) = frame else {
        warn!(client_id, "dropping stray top-level binary frame with no preceding rpc:call");
        return;
    };
    let event: Event = match serde_json::from_str(&text) {
        Ok(event) => event,
        Err(err) => {
            warn!(client_id, error = %err, "dropping malformed event frame");
            return;
        }
    };

    match event {
        Event::RpcCall(call) => {
            let server = Arc::clone(server);
            let client_id = client_id.to_owned();
            let outbound = outbound.clone();
            tokio::spawn(async move {
                let result = server.dispatch_rpc_call(client_id, call).await;
                send_event(&outbound, &Event::RpcResult(result));
            });
        }
        Event::StreamCall(call) => {
            let server = Arc::clone(server);
            let client_id = client_id.to_owned();
            let outbound = outbound.clone();
            tokio::spawn(async move {
                let rpc_id = call.rpc_id.clone();
                let mut items = server.dispatch_stream_call(client_id, call);
                while let Some(item) = items.next().await {
                    send_event(&outbound, &Event::StreamResult(item));
                }
                send_event(&outbound, &Event::StreamResult(crate::wire::StreamResult::done(rpc_id)));
            });
        }
        Event::RpcResult(result) => server.handle_rpc_result(result),
        Event::StreamResult(_) => {
            warn!(client_id, "ignoring unexpected stream:result from client");
        }
    }
}

fn send_event(outbound: &mpsc::UnboundedSender<Frame>, event: &Event) {
    match serde_json::to_string(event) {
        Ok(text) => {
            if outbound.send(Frame::Text(text)).is_err() {
                error!("dropped outbound event: connection writer already gone");
            }
        }
        Err(err) => error!(error = %err, "failed to serialize outbound event"),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::facade::RpcApi;
    use crate::server::ServerConfig;
    use crate::wire::RpcCall;

    #[tokio::test]
    async fn rpc_call_event_dispatches_and_replies_on_outbound_channel() {
        let mut api = RpcApi::new();
        api.expose_unary("ping", false, std::sync::Arc::new(|_| Box::pin(async { Ok(json!("pong")) })))
            .expect("register");
        let server = Arc::new(Switchboard::new(api, ServerConfig::default()));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let call = RpcCall { rpc_id: "r1".to_owned(), name: "ping".to_owned(), args: vec![] };
        dispatch_inbound_frame(
            &server,
            "alice",
            &tx,
            Frame::Text(serde_json::to_string(&Event::RpcCall(call)).expect("serialize")),
        )
        .await;

        // rpc:call dispatch is spawned; wait for the reply frame.
        let frame = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .expect("did not time out")
            .expect("reply frame sent");
        let Frame::Text(text) = frame else { panic!("expected text frame") };
        let event: Event = serde_json::from_str(&text).expect("parses as event");
        let Event::RpcResult(result) = event else { panic!("expected rpc:result") };
        assert_eq!(result.rpc_id(), "r1");
    }

    #[test]
    fn malformed_frame_is_dropped_without_panicking() {
        let frame = Frame::Text("not-json".to_owned());
        let Frame::Text(text) = frame else { unreachable!() };
        let parsed: Result<Event, _> = serde_json::from_str(&text);
        assert!(parsed.is_err());
    }
}
