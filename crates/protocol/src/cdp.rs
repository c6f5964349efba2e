//! DevTools protocol envelopes.
//!
//! Requests carry a numeric `id` that the browser echoes in the matching
//! response. Messages without an `id` are events. Commands addressed to a
//! page attached in flat mode carry the page's `sessionId`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request sent to the browser.
///
/// ```json
/// { "id": 7, "method": "Runtime.evaluate", "params": { "expression": "1" }, "sessionId": "A1B2" }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
	pub id: u64,
	pub method: String,
	#[serde(default)]
	pub params: Value,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub session_id: Option<String>,
}

/// Response correlated to a [`Request`] by `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
	pub id: u64,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub result: Option<Value>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<ErrorPayload>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub session_id: Option<String>,
}

/// Error body of a failed command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
	pub code: i64,
	pub message: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub data: Option<String>,
}

/// Unsolicited notification, e.g. `Target.targetDestroyed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
	pub method: String,
	#[serde(default)]
	pub params: Value,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub session_id: Option<String>,
}

/// Inbound message; responses are recognized by the presence of `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
	Response(Response),
	Event(Event),
}

/// `/json/version` response subset.
#[derive(Debug, Clone, Deserialize)]
pub struct VersionInfo {
	#[serde(rename = "webSocketDebuggerUrl")]
	pub web_socket_debugger_url: String,
	#[serde(rename = "Browser")]
	pub browser: Option<String>,
}

/// Entry of `Target.getTargets` / `Target.targetCreated`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetInfo {
	pub target_id: String,
	#[serde(rename = "type")]
	pub kind: String,
	#[serde(default)]
	pub url: String,
	#[serde(default)]
	pub attached: bool,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn response_and_event_are_distinguished_by_id() {
		let response: Message = serde_json::from_str(r#"{"id": 3, "result": {"ok": true}}"#).unwrap();
		assert!(matches!(response, Message::Response(Response { id: 3, .. })));

		let event: Message = serde_json::from_str(r#"{"method": "Target.targetDestroyed", "params": {"targetId": "T1"}}"#).unwrap();
		match event {
			Message::Event(event) => {
				assert_eq!(event.method, "Target.targetDestroyed");
				assert_eq!(event.params["targetId"], "T1");
			}
			other => panic!("expected event, got {other:?}"),
		}
	}

	#[test]
	fn request_omits_absent_session_id() {
		let request = Request {
			id: 1,
			method: "Browser.getVersion".into(),
			params: Value::Null,
			session_id: None,
		};
		let json = serde_json::to_value(&request).unwrap();
		assert!(json.get("sessionId").is_none());
	}

	#[test]
	fn target_info_reads_type_field() {
		let info: TargetInfo = serde_json::from_str(r#"{"targetId": "T9", "type": "page", "url": "https://chat.example/r/lobby", "attached": false}"#).unwrap();
		assert_eq!(info.kind, "page");
		assert_eq!(info.target_id, "T9");
	}
}
