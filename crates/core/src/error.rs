//! Error types for the session client.

use thiserror::Error;

use crate::state::{Actor, SessionState};

/// How a failure is handled once it leaves the component that raised it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
	/// Retried locally with bounded attempts and a fixed delay.
	Transient,
	/// Routed to the recovery controller.
	SessionFatal,
	/// Surfaced to the caller immediately and never retried.
	AuthFatal,
	/// Logged only.
	BestEffort,
	/// Misuse of the client API or a violated invariant.
	Caller,
}

/// Errors raised by the session client.
#[derive(Debug, Error)]
pub enum ClientError {
	#[error("Navigation to {url} failed after {attempts} attempts: {message}")]
	Navigation { url: String, attempts: u32, message: String },

	#[error("Timeout: {0}")]
	Timeout(String),

	/// A page script threw or returned an unexpected shape.
	#[error("Page script failed: {0}")]
	Script(String),

	#[error("Surface closed")]
	SurfaceClosed,

	#[error("Browser container is gone")]
	ContainerGone,

	#[error("Identity {0} is not present in the roster")]
	PresenceNotVerified(String),

	#[error("Authentication failed: {0}")]
	AuthFailed(String),

	#[error("Identity {0} is already connected from another session")]
	DuplicateSession(String),

	#[error("Verification failed: {0}")]
	Unverified(String),

	#[error("Illegal transition {from:?} -> {to:?} requested by {actor:?}")]
	IllegalTransition { from: SessionState, to: SessionState, actor: Actor },

	#[error("Not connected")]
	NotConnected,

	#[error("Invalid configuration: {0}")]
	Config(String),

	#[error("{by} may not replace the session's {slot} while {state:?}")]
	Ownership { by: &'static str, slot: &'static str, state: SessionState },

	#[error("Browser runtime error: {0}")]
	Runtime(livechat_runtime::Error),

	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	Json(#[from] serde_json::Error),
}

impl From<livechat_runtime::Error> for ClientError {
	fn from(err: livechat_runtime::Error) -> Self {
		match err {
			e if e.is_target_closed() => ClientError::SurfaceClosed,
			livechat_runtime::Error::Timeout(msg) => ClientError::Timeout(msg),
			other => ClientError::Runtime(other),
		}
	}
}

impl ClientError {
	pub fn class(&self) -> ErrorClass {
		match self {
			ClientError::Navigation { .. } | ClientError::Timeout(_) | ClientError::Script(_) | ClientError::Runtime(_) => ErrorClass::Transient,
			ClientError::SurfaceClosed | ClientError::ContainerGone | ClientError::PresenceNotVerified(_) => ErrorClass::SessionFatal,
			ClientError::AuthFailed(_) | ClientError::DuplicateSession(_) => ErrorClass::AuthFatal,
			ClientError::Unverified(_) => ErrorClass::BestEffort,
			ClientError::IllegalTransition { .. }
			| ClientError::Ownership { .. }
			| ClientError::NotConnected
			| ClientError::Config(_)
			| ClientError::Io(_)
			| ClientError::Json(_) => ErrorClass::Caller,
		}
	}

	/// Returns `true` when the surface the operation targeted no longer exists.
	pub fn is_surface_closed(&self) -> bool {
		matches!(self, ClientError::SurfaceClosed | ClientError::ContainerGone)
	}

	/// Returns `true` when the failure must be handed to recovery.
	pub fn is_session_fatal(&self) -> bool {
		self.class() == ErrorClass::SessionFatal
	}

	/// Returns `true` when a bounded local retry may succeed.
	pub fn is_transient(&self) -> bool {
		self.class() == ErrorClass::Transient
	}
}

/// Result alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn closed_targets_become_surface_closed() {
		let err: ClientError = livechat_runtime::Error::TargetClosed("Target closed".into()).into();
		assert!(err.is_surface_closed());
		assert_eq!(err.class(), ErrorClass::SessionFatal);

		let err: ClientError = livechat_runtime::Error::ChannelClosed.into();
		assert!(matches!(err, ClientError::SurfaceClosed));
	}

	#[test]
	fn runtime_timeouts_are_transient() {
		let err: ClientError = livechat_runtime::Error::Timeout("Runtime.evaluate".into()).into();
		assert!(matches!(err, ClientError::Timeout(_)));
		assert_eq!(err.class(), ErrorClass::Transient);
	}

	#[test]
	fn lost_surfaces_go_to_recovery_and_page_hiccups_are_retried() {
		assert!(ClientError::SurfaceClosed.is_session_fatal());
		assert!(ClientError::ContainerGone.is_session_fatal());
		assert!(!ClientError::SurfaceClosed.is_transient());
		assert!(ClientError::Script("boom".into()).is_transient());
		assert!(ClientError::Timeout("evaluate".into()).is_transient());
		assert!(!ClientError::Config("captureIntervalMs must be greater than zero".into()).is_transient());
	}

	#[test]
	fn auth_failures_are_never_retried() {
		assert_eq!(ClientError::DuplicateSession("courier".into()).class(), ErrorClass::AuthFatal);
		assert_eq!(ClientError::AuthFailed("bad password".into()).class(), ErrorClass::AuthFatal);
	}
}
