//! Runtime error type.

use thiserror::Error;

/// Errors raised by the browser runtime and DevTools connection.
#[derive(Debug, Error)]
pub enum Error {
	/// A command or probe did not complete in time.
	#[error("Timeout: {0}")]
	Timeout(String),

	/// The page, session or execution context the command targeted is gone.
	#[error("Target closed: {0}")]
	TargetClosed(String),

	/// The browser answered with an error.
	#[error("Protocol error: {0}")]
	ProtocolError(String),

	/// The connection ended before a response arrived.
	#[error("Connection closed")]
	ChannelClosed,

	#[error("Transport error: {0}")]
	Transport(String),

	#[error("Browser launch failed: {0}")]
	Launch(String),

	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	Json(#[from] serde_json::Error),
}

impl Error {
	/// Returns `true` when the error means the addressed page no longer exists.
	pub fn is_target_closed(&self) -> bool {
		matches!(self, Error::TargetClosed(_) | Error::ChannelClosed)
	}
}

/// Result alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;
