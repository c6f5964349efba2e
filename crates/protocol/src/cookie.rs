//! Cookie and persisted auth-state shapes.

use serde::{Deserialize, Serialize};

/// Browser cookie as reported by `Network.getAllCookies`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cookie {
	pub name: String,
	pub value: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub domain: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub path: Option<String>,
	/// Seconds since epoch; negative or absent for session cookies.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub expires: Option<f64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub http_only: Option<bool>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub secure: Option<bool>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub same_site: Option<String>,
}

impl Cookie {
	/// Returns `true` for cookies that end with the browser session.
	pub fn is_session(&self) -> bool {
		self.expires.is_none_or(|ts| ts < 0.0)
	}
}

/// On-disk authentication snapshot written after a successful login.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSnapshot {
	pub schema: u32,
	/// Identity the snapshot was captured for.
	#[serde(default)]
	pub identity: Option<String>,
	/// Milliseconds since epoch.
	#[serde(default)]
	pub saved_at: u64,
	#[serde(default)]
	pub cookies: Vec<Cookie>,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn snapshot_accepts_minimal_cookie_entries() {
		let snapshot: AuthSnapshot = serde_json::from_str(
			r#"{
  "schema": 1,
  "identity": "courier",
  "savedAt": 1700000000,
  "cookies": [
    { "name": "auth", "value": "token", "domain": ".chat.example", "path": "/", "expires": -1.0, "httpOnly": true }
  ]
}"#,
		)
		.unwrap();
		assert_eq!(snapshot.cookies.len(), 1);
		assert!(snapshot.cookies[0].is_session());
		assert_eq!(snapshot.identity.as_deref(), Some("courier"));
	}

	#[test]
	fn persistent_cookie_is_not_session() {
		let cookie = Cookie {
			name: "auth".into(),
			value: "v".into(),
			domain: None,
			path: None,
			expires: Some(1_900_000_000.0),
			http_only: None,
			secure: None,
			same_site: None,
		};
		assert!(!cookie.is_session());
	}
}
