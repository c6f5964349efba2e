//! Events emitted to collaborators.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Everything the client reports to its consumers.
///
/// Serialized with an `event` tag so a JSON line reads
/// `{"event":"chat","username":"ada","text":"hi","timestamp":1700000000000}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ClientEvent {
	Connected,
	Disconnected {
		reason: String,
	},
	Chat {
		username: String,
		text: String,
		timestamp: u64,
	},
	/// A line the client itself posted, as the room rendered it.
	#[serde(rename = "self-reflection", rename_all = "camelCase")]
	SelfReflection {
		actual_text: String,
		timestamp: u64,
	},
	UserJoin {
		username: String,
	},
	UserLeave {
		username: String,
	},
	#[serde(rename_all = "camelCase")]
	Heartbeat {
		timestamp: u64,
		connected: bool,
		chat_ready: bool,
	},
	Error {
		message: String,
	},
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
	SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or_default()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn wire_names_match_event_vocabulary() {
		let json = serde_json::to_value(ClientEvent::SelfReflection {
			actual_text: "yo whats up".into(),
			timestamp: 1,
		})
		.unwrap();
		assert_eq!(json["event"], "self-reflection");
		assert_eq!(json["actualText"], "yo whats up");

		let json = serde_json::to_value(ClientEvent::Heartbeat {
			timestamp: 2,
			connected: true,
			chat_ready: false,
		})
		.unwrap();
		assert_eq!(json["event"], "heartbeat");
		assert_eq!(json["chatReady"], false);

		let json = serde_json::to_value(ClientEvent::UserJoin { username: "ada".into() }).unwrap();
		assert_eq!(json["event"], "userJoin");
	}
}
