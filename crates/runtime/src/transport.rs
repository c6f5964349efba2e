//! Message transports for the DevTools connection.
//!
//! A transport is split into a sending half, used by [`Connection`] to write
//! requests, and a receiving half whose `run` loop forwards every inbound JSON
//! message into an unbounded channel.
//!
//! [`Connection`]: crate::Connection

use std::future::Future;
use std::pin::Pin;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Sending half of a transport.
pub trait Transport: Send {
	fn send(&mut self, message: Value) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Receiving half of a transport.
pub trait TransportReceiver: Send {
	/// Reads until the peer closes, forwarding each message.
	fn run(self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<()>> + Send>>;
}

/// Both transport halves plus the channel the receiver feeds.
pub struct TransportParts {
	pub sender: Box<dyn Transport>,
	pub receiver: Box<dyn TransportReceiver>,
	pub message_rx: mpsc::UnboundedReceiver<Value>,
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport to a browser's DevTools endpoint.
pub struct WebSocketTransport {
	sink: SplitSink<WsStream, Message>,
	stream: SplitStream<WsStream>,
	message_tx: mpsc::UnboundedSender<Value>,
}

impl WebSocketTransport {
	/// Connects to `url` (`ws://127.0.0.1:<port>/devtools/browser/<id>`).
	pub async fn connect(url: &str) -> Result<(Self, mpsc::UnboundedReceiver<Value>)> {
		let (ws, _response) = tokio_tungstenite::connect_async(url)
			.await
			.map_err(|e| Error::Transport(format!("Failed to connect to {url}: {e}")))?;
		let (sink, stream) = ws.split();
		let (message_tx, message_rx) = mpsc::unbounded_channel();
		debug!(target = "livechat.cdp", %url, "websocket connected");
		Ok((Self { sink, stream, message_tx }, message_rx))
	}

	/// Splits into the parts consumed by [`crate::Connection::new`].
	pub fn into_transport_parts(self, message_rx: mpsc::UnboundedReceiver<Value>) -> TransportParts {
		TransportParts {
			sender: Box::new(WebSocketSender { sink: self.sink }),
			receiver: Box::new(WebSocketReceiver {
				stream: self.stream,
				message_tx: self.message_tx,
			}),
			message_rx,
		}
	}
}

struct WebSocketSender {
	sink: SplitSink<WsStream, Message>,
}

impl Transport for WebSocketSender {
	fn send(&mut self, message: Value) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
		Box::pin(async move {
			let text = serde_json::to_string(&message)?;
			self.sink
				.send(Message::Text(text))
				.await
				.map_err(|e| Error::Transport(e.to_string()))
		})
	}
}

struct WebSocketReceiver {
	stream: SplitStream<WsStream>,
	message_tx: mpsc::UnboundedSender<Value>,
}

impl TransportReceiver for WebSocketReceiver {
	fn run(self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> {
		Box::pin(async move {
			let WebSocketReceiver { mut stream, message_tx } = *self;
			while let Some(frame) = stream.next().await {
				let frame = frame.map_err(|e| Error::Transport(e.to_string()))?;
				let value: Value = match frame {
					Message::Text(text) => match serde_json::from_str(text.as_ref()) {
						Ok(value) => value,
						Err(e) => {
							warn!(target = "livechat.cdp", error = %e, "dropping unparseable frame");
							continue;
						}
					},
					Message::Binary(bytes) => match serde_json::from_slice(bytes.as_ref()) {
						Ok(value) => value,
						Err(_) => continue,
					},
					Message::Close(_) => break,
					_ => continue,
				};
				if message_tx.send(value).is_err() {
					break;
				}
			}
			Err(Error::ChannelClosed)
		})
	}
}
