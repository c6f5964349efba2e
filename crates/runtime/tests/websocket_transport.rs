//! Drives a [`Connection`] over a real WebSocket against a scripted local peer.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use livechat_runtime::transport::WebSocketTransport;
use livechat_runtime::{Connection, Error};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

/// Accepts one client and answers each request with `{"echo": <method>}`,
/// emitting an event before the first answer. Closes after `replies` answers.
async fn spawn_peer(replies: usize) -> String {
	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();
	tokio::spawn(async move {
		let (stream, _) = listener.accept().await.unwrap();
		let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
		let mut answered = 0;
		while let Some(Ok(frame)) = ws.next().await {
			let Message::Text(text) = frame else { continue };
			let request: Value = serde_json::from_str(&text).unwrap();
			if answered == 0 {
				let event = json!({"method": "Target.targetCreated", "params": {"targetInfo": {"targetId": "T1", "type": "page"}}});
				ws.send(Message::Text(event.to_string())).await.unwrap();
			}
			let mut response = json!({"id": request["id"], "result": {"echo": request["method"]}});
			if let Some(session) = request.get("sessionId") {
				response["sessionId"] = session.clone();
			}
			ws.send(Message::Text(response.to_string())).await.unwrap();
			answered += 1;
			if answered == replies {
				let _ = ws.close(None).await;
				break;
			}
		}
	});
	format!("ws://{addr}")
}

async fn connect(url: &str) -> Arc<Connection> {
	let (transport, message_rx) = WebSocketTransport::connect(url).await.unwrap();
	let connection = Arc::new(Connection::new(transport.into_transport_parts(message_rx)));
	let runner = Arc::clone(&connection);
	tokio::spawn(async move { runner.run().await });
	connection
}

#[tokio::test]
async fn responses_are_correlated_over_websocket() {
	let url = spawn_peer(2).await;
	let connection = connect(&url).await;
	let mut events = connection.subscribe();

	let first = connection.send_message("Target.getTargets", json!({}), None).await.unwrap();
	assert_eq!(first["echo"], "Target.getTargets");

	let event = events.recv().await.unwrap();
	assert_eq!(event.method, "Target.targetCreated");

	let second = connection.send_message("Runtime.evaluate", json!({"expression": "1"}), Some("S1")).await.unwrap();
	assert_eq!(second["echo"], "Runtime.evaluate");
}

#[tokio::test]
async fn peer_close_flips_closed_watch() {
	let url = spawn_peer(1).await;
	let connection = connect(&url).await;
	let mut closed = connection.closed();

	connection.send_message("Browser.getVersion", json!({}), None).await.unwrap();
	closed.wait_for(|closed| *closed).await.unwrap();

	assert!(matches!(connection.send_message("Browser.getVersion", json!({}), None).await, Err(Error::ChannelClosed)));
}

#[tokio::test]
async fn unreachable_endpoint_is_a_transport_error() {
	let port = livechat_runtime::process::free_port().unwrap();
	let result = WebSocketTransport::connect(&format!("ws://127.0.0.1:{port}")).await;
	assert!(matches!(result, Err(Error::Transport(_))));
}
