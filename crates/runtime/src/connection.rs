//! DevTools JSON-RPC connection.
//!
//! Implements request/response correlation on top of a [`transport`]:
//! - Generating unique request IDs
//! - Correlating responses with pending requests
//! - Distinguishing events from responses
//! - Broadcasting events to subscribers
//!
//! # Message Flow
//!
//! 1. Caller invokes `send_message()` with method, params and optional session
//! 2. Connection allocates an ID and parks a oneshot sender under it
//! 3. Request is serialized and written through the transport
//! 4. The `run()` loop receives the response and completes the oneshot
//! 5. Events (no `id`) are fanned out on a broadcast channel
//!
//! When the transport ends every pending request fails with
//! [`Error::ChannelClosed`] and the `closed` watch flips to `true`.
//!
//! [`transport`]: crate::transport

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use livechat_protocol::{ErrorPayload, Event, Message, Request};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{broadcast, oneshot, watch};
use tracing::{debug, error, trace};

use crate::error::{Error, Result};
use crate::transport::{Transport, TransportParts, TransportReceiver};

const EVENT_CAPACITY: usize = 256;

type Callbacks = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value>>>>>;

/// Connection to a browser's DevTools endpoint.
///
/// Shared across tasks behind an `Arc`; concurrent commands are supported.
pub struct Connection {
	last_id: AtomicU64,
	callbacks: Callbacks,
	sender: tokio::sync::Mutex<Box<dyn Transport>>,
	receiver: Mutex<Option<Box<dyn TransportReceiver>>>,
	message_rx: Mutex<Option<tokio::sync::mpsc::UnboundedReceiver<Value>>>,
	events: broadcast::Sender<Event>,
	closed: watch::Sender<bool>,
}

impl Connection {
	pub fn new(parts: TransportParts) -> Self {
		let (events, _) = broadcast::channel(EVENT_CAPACITY);
		let (closed, _) = watch::channel(false);
		Self {
			last_id: AtomicU64::new(0),
			callbacks: Arc::new(Mutex::new(HashMap::new())),
			sender: tokio::sync::Mutex::new(parts.sender),
			receiver: Mutex::new(Some(parts.receiver)),
			message_rx: Mutex::new(Some(parts.message_rx)),
			events,
			closed,
		}
	}

	/// Sends a command and awaits its response.
	///
	/// `session_id` addresses a page attached in flat mode; `None` targets the
	/// browser itself.
	pub async fn send_message(&self, method: &str, params: Value, session_id: Option<&str>) -> Result<Value> {
		if self.is_closed() {
			return Err(Error::ChannelClosed);
		}

		let id = self.last_id.fetch_add(1, Ordering::SeqCst);
		let (tx, rx) = oneshot::channel();
		self.callbacks.lock().insert(id, tx);

		// The run loop may have drained callbacks between the check above and the insert.
		if self.is_closed() {
			self.callbacks.lock().remove(&id);
			return Err(Error::ChannelClosed);
		}

		let request = Request {
			id,
			method: method.to_string(),
			params,
			session_id: session_id.map(str::to_string),
		};
		trace!(target = "livechat.cdp", id, method, "send");
		let value = serde_json::to_value(&request)?;
		if let Err(e) = self.sender.lock().await.send(value).await {
			self.callbacks.lock().remove(&id);
			return Err(e);
		}

		rx.await.map_err(|_| Error::ChannelClosed).and_then(|result| result)
	}

	/// Like [`send_message`](Self::send_message) but bounded by `timeout`.
	pub async fn send_with_timeout(&self, method: &str, params: Value, session_id: Option<&str>, timeout: Duration) -> Result<Value> {
		match tokio::time::timeout(timeout, self.send_message(method, params, session_id)).await {
			Ok(result) => result,
			Err(_) => Err(Error::Timeout(format!("{method} did not answer within {}ms", timeout.as_millis()))),
		}
	}

	/// Subscribes to browser events.
	pub fn subscribe(&self) -> broadcast::Receiver<Event> {
		self.events.subscribe()
	}

	/// Watch that turns `true` once the transport has ended.
	pub fn closed(&self) -> watch::Receiver<bool> {
		self.closed.subscribe()
	}

	pub fn is_closed(&self) -> bool {
		*self.closed.borrow()
	}

	/// Runs the dispatch loop until the transport ends. Call once, from a spawned task.
	pub async fn run(&self) {
		let receiver = self.receiver.lock().take();
		let message_rx = self.message_rx.lock().take();
		let (Some(receiver), Some(mut message_rx)) = (receiver, message_rx) else {
			error!(target = "livechat.cdp", "connection run loop started twice");
			return;
		};

		let transport_handle = tokio::spawn(async move {
			if let Err(e) = receiver.run().await {
				debug!(target = "livechat.cdp", error = %e, "transport ended");
			}
		});

		while let Some(value) = message_rx.recv().await {
			match serde_json::from_value::<Message>(value) {
				Ok(message) => {
					if let Err(e) = self.dispatch(message) {
						debug!(target = "livechat.cdp", error = %e, "dispatch failed");
					}
				}
				Err(e) => error!(target = "livechat.cdp", error = %e, "failed to parse message"),
			}
		}

		debug!(target = "livechat.cdp", "message loop ended (transport closed)");
		self.closed.send_replace(true);
		let pending: Vec<_> = self.callbacks.lock().drain().collect();
		for (_, callback) in pending {
			let _ = callback.send(Err(Error::ChannelClosed));
		}
		let _ = transport_handle.await;
	}

	fn dispatch(&self, message: Message) -> Result<()> {
		match message {
			Message::Response(response) => {
				let callback = self
					.callbacks
					.lock()
					.remove(&response.id)
					.ok_or_else(|| Error::ProtocolError(format!("Cannot find request to respond: id={}", response.id)))?;

				let result = match response.error {
					Some(error) => Err(parse_protocol_error(error)),
					None => Ok(response.result.unwrap_or(Value::Null)),
				};
				let _ = callback.send(result);
				Ok(())
			}
			Message::Event(event) => {
				trace!(target = "livechat.cdp", method = %event.method, "event");
				// No subscribers is fine.
				let _ = self.events.send(event);
				Ok(())
			}
		}
	}
}

/// Maps a browser error body to a runtime error.
fn parse_protocol_error(error: ErrorPayload) -> Error {
	const CLOSED_MARKERS: [&str; 6] = [
		"Target closed",
		"Session with given id not found",
		"No target with given id",
		"Cannot find context with specified id",
		"Execution context was destroyed",
		"Inspected target navigated or closed",
	];
	if CLOSED_MARKERS.iter().any(|marker| error.message.contains(marker)) {
		Error::TargetClosed(error.message)
	} else {
		match error.data {
			Some(data) => Error::ProtocolError(format!("{} ({data})", error.message)),
			None => Error::ProtocolError(error.message),
		}
	}
}

#[cfg(test)]
mod tests {
	use livechat_protocol::Response;

	use super::*;
	use crate::fake_transport::FakeTransportBuilder;

	fn create_test_connection() -> (Arc<Connection>, crate::fake_transport::FakeTransportController) {
		let (parts, controller) = FakeTransportBuilder::new().build();
		(Arc::new(Connection::new(parts)), controller)
	}

	#[tokio::test]
	async fn dispatch_response_success() {
		let (connection, _controller) = create_test_connection();
		let id = connection.last_id.fetch_add(1, Ordering::SeqCst);
		let (tx, rx) = oneshot::channel();
		connection.callbacks.lock().insert(id, tx);

		connection
			.dispatch(Message::Response(Response {
				id,
				result: Some(serde_json::json!({"status": "ok"})),
				error: None,
				session_id: None,
			}))
			.unwrap();

		let result = rx.await.unwrap().unwrap();
		assert_eq!(result["status"], "ok");
	}

	#[tokio::test]
	async fn dispatch_invalid_id_is_reported() {
		let (connection, _controller) = create_test_connection();
		let result = connection.dispatch(Message::Response(Response {
			id: 999,
			result: Some(Value::Null),
			error: None,
			session_id: None,
		}));
		match result {
			Err(Error::ProtocolError(msg)) => assert!(msg.contains("Cannot find request")),
			other => panic!("expected ProtocolError, got {other:?}"),
		}
	}

	#[tokio::test]
	async fn round_trip_through_fake_transport() {
		let (connection, controller) = create_test_connection();
		let runner = Arc::clone(&connection);
		tokio::spawn(async move { runner.run().await });

		let conn = Arc::clone(&connection);
		let pending = tokio::spawn(async move { conn.send_message("Runtime.evaluate", serde_json::json!({"expression": "1"}), Some("S1")).await });

		// Wait for the request to be written before answering it.
		let sent = loop {
			let sent = controller.take_sent().await;
			if !sent.is_empty() {
				break sent;
			}
			tokio::task::yield_now().await;
		};
		assert_eq!(sent[0]["method"], "Runtime.evaluate");
		assert_eq!(sent[0]["sessionId"], "S1");

		controller.inject_response(0, serde_json::json!({"result": {"value": 1}}));
		let result = pending.await.unwrap().unwrap();
		assert_eq!(result["result"]["value"], 1);
	}

	#[tokio::test]
	async fn closing_transport_fails_pending_requests() {
		let (connection, mut controller) = create_test_connection();
		let runner = Arc::clone(&connection);
		let run_handle = tokio::spawn(async move { runner.run().await });

		let conn = Arc::clone(&connection);
		let pending = tokio::spawn(async move { conn.send_message("Page.navigate", serde_json::json!({}), None).await });
		while controller.take_sent().await.is_empty() {
			tokio::task::yield_now().await;
		}

		controller.close();
		run_handle.await.unwrap();

		assert!(matches!(pending.await.unwrap(), Err(Error::ChannelClosed)));
		assert!(connection.is_closed());
		assert!(matches!(
			connection.send_message("Browser.getVersion", Value::Null, None).await,
			Err(Error::ChannelClosed)
		));
	}

	#[tokio::test]
	async fn events_reach_subscribers() {
		let (connection, controller) = create_test_connection();
		let mut events = connection.subscribe();
		let runner = Arc::clone(&connection);
		tokio::spawn(async move { runner.run().await });

		controller.inject_event("Target.targetDestroyed", serde_json::json!({"targetId": "T1"}), None);
		let event = events.recv().await.unwrap();
		assert_eq!(event.method, "Target.targetDestroyed");
		assert_eq!(event.params["targetId"], "T1");
	}

	#[test]
	fn closed_target_errors_are_classified() {
		let error = parse_protocol_error(ErrorPayload {
			code: -32000,
			message: "Execution context was destroyed.".into(),
			data: None,
		});
		assert!(error.is_target_closed());

		let error = parse_protocol_error(ErrorPayload {
			code: -32601,
			message: "'Foo.bar' wasn't found".into(),
			data: None,
		});
		assert!(matches!(error, Error::ProtocolError(_)));
	}

	#[tokio::test]
	async fn send_with_timeout_expires() {
		let (connection, _controller) = create_test_connection();
		let runner = Arc::clone(&connection);
		tokio::spawn(async move { runner.run().await });
		let result = connection
			.send_with_timeout("Runtime.evaluate", Value::Null, None, Duration::from_millis(20))
			.await;
		assert!(matches!(result, Err(Error::Timeout(_))));
	}
}
