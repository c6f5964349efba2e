//! In-memory transport for unit testing command correlation and events.
//!
//! # Example
//!
//! ```ignore
//! let (parts, controller) = FakeTransportBuilder::new().build();
//! let connection = Arc::new(Connection::new(parts));
//!
//! tokio::spawn({
//!     let conn = Arc::clone(&connection);
//!     async move { conn.run().await }
//! });
//!
//! let fut = connection.send_message("Runtime.evaluate", json!({}), Some("S1"));
//! controller.inject_response(0, json!({"result": {"value": 1}}));
//! let result = fut.await?;
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{Mutex, mpsc};

use crate::error::{Error, Result};
use crate::transport::{Transport, TransportParts, TransportReceiver};

/// Builder for fake transport instances.
#[derive(Default)]
pub struct FakeTransportBuilder {}

impl FakeTransportBuilder {
	pub fn new() -> Self {
		Self {}
	}

	/// Returns transport parts for a [`crate::Connection`] and a controller
	/// for injecting inbound traffic and inspecting what was sent.
	pub fn build(self) -> (TransportParts, FakeTransportController) {
		let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
		let (message_tx, message_rx) = mpsc::unbounded_channel();
		let sent = Arc::new(Mutex::new(Vec::new()));

		let parts = TransportParts {
			sender: Box::new(FakeTransportSender { sent: Arc::clone(&sent) }),
			receiver: Box::new(FakeTransportReceiver { inbound_rx, message_tx }),
			message_rx,
		};

		(parts, FakeTransportController { inbound_tx: Some(inbound_tx), sent })
	}
}

/// Handle used by tests to play the browser's side of the connection.
pub struct FakeTransportController {
	inbound_tx: Option<mpsc::UnboundedSender<Value>>,
	sent: Arc<Mutex<Vec<Value>>>,
}

impl FakeTransportController {
	/// Injects a raw inbound message.
	pub fn inject(&self, message: Value) {
		if let Some(tx) = &self.inbound_tx {
			let _ = tx.send(message);
		}
	}

	pub fn inject_response(&self, id: u64, result: Value) {
		self.inject(serde_json::json!({ "id": id, "result": result }));
	}

	pub fn inject_error(&self, id: u64, code: i64, message: &str) {
		self.inject(serde_json::json!({
			"id": id,
			"error": { "code": code, "message": message }
		}));
	}

	pub fn inject_event(&self, method: &str, params: Value, session_id: Option<&str>) {
		let mut event = serde_json::json!({ "method": method, "params": params });
		if let Some(session_id) = session_id {
			event["sessionId"] = Value::String(session_id.to_string());
		}
		self.inject(event);
	}

	/// Simulates the browser dropping the socket.
	pub fn close(&mut self) {
		self.inbound_tx = None;
	}

	/// Takes every message sent so far.
	pub async fn take_sent(&self) -> Vec<Value> {
		std::mem::take(&mut *self.sent.lock().await)
	}
}

struct FakeTransportSender {
	sent: Arc<Mutex<Vec<Value>>>,
}

impl Transport for FakeTransportSender {
	fn send(&mut self, message: Value) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
		let sent = Arc::clone(&self.sent);
		Box::pin(async move {
			sent.lock().await.push(message);
			Ok(())
		})
	}
}

struct FakeTransportReceiver {
	inbound_rx: mpsc::UnboundedReceiver<Value>,
	message_tx: mpsc::UnboundedSender<Value>,
}

impl TransportReceiver for FakeTransportReceiver {
	fn run(self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> {
		Box::pin(async move {
			let FakeTransportReceiver { mut inbound_rx, message_tx } = *self;
			while let Some(message) = inbound_rx.recv().await {
				if message_tx.send(message).is_err() {
					break;
				}
			}
			Err(Error::ChannelClosed)
		})
	}
}
