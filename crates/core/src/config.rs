//! Client configuration.
//!
//! Loaded from a JSON file with camelCase keys; every field has a default so a
//! file only needs the values it changes:
//!
//! ```json
//! {
//!   "channelIdentity": "lounge",
//!   "identity": "courier",
//!   "loginEnabled": true,
//!   "credentialSecret": "hunter2",
//!   "timings": { "captureIntervalMs": 3000 }
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ClientError, Result};

const STATE_DIR: &str = "livechat";

/// Top-level client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
	/// Origin of the chat platform, without a trailing slash.
	pub base_url: String,
	/// Room to join; appended to `base_url` as `/r/<channel>`.
	pub channel_identity: String,
	/// Authenticate with `credential_secret` instead of claiming a guest name.
	pub login_enabled: bool,
	pub identity: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub credential_secret: Option<String>,
	pub headless: bool,
	/// Ignore and delete the persisted auth snapshot on connect.
	pub force_fresh_session: bool,
	/// Auth snapshot location. Defaults to `<data dir>/livechat/auth-<identity>.json`.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub auth_state_path: Option<PathBuf>,
	/// Browser profile directory. Defaults to `<data dir>/livechat/profile`.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub user_data_dir: Option<PathBuf>,
	/// DevTools port. A free port is picked when unset.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub remote_debugging_port: Option<u16>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub browser_executable: Option<PathBuf>,
	pub timings: Timings,
}

impl Default for ClientConfig {
	fn default() -> Self {
		Self {
			base_url: "https://coolhole.org".to_string(),
			channel_identity: String::new(),
			login_enabled: false,
			identity: String::new(),
			credential_secret: None,
			headless: true,
			force_fresh_session: false,
			auth_state_path: None,
			user_data_dir: None,
			remote_debugging_port: None,
			browser_executable: None,
			timings: Timings::default(),
		}
	}
}

impl ClientConfig {
	/// Reads a config file.
	pub fn from_file(path: &Path) -> Result<Self> {
		let content = std::fs::read_to_string(path)?;
		Ok(serde_json::from_str(&content)?)
	}

	/// Rejects settings the client cannot run with.
	pub fn validate(&self) -> Result<()> {
		if self.identity.trim().is_empty() {
			return Err(ClientError::Config("identity must not be empty".to_string()));
		}
		if self.login_enabled && self.credential_secret.as_deref().is_none_or(str::is_empty) {
			return Err(ClientError::Config("loginEnabled requires a credentialSecret".to_string()));
		}
		self.timings.validate()
	}

	/// Page that hosts the room.
	pub fn channel_url(&self) -> String {
		let base = self.base_url.trim_end_matches('/');
		if self.channel_identity.is_empty() {
			base.to_string()
		} else {
			format!("{base}/r/{}", self.channel_identity)
		}
	}

	/// Dedicated authentication view.
	pub fn auth_url(&self) -> String {
		format!("{}/login", self.base_url.trim_end_matches('/'))
	}

	pub fn logout_url(&self) -> String {
		format!("{}/logout", self.base_url.trim_end_matches('/'))
	}

	pub fn resolved_auth_state_path(&self) -> Option<PathBuf> {
		self.auth_state_path
			.clone()
			.or_else(|| state_dir().map(|dir| dir.join(format!("auth-{}.json", sanitize(&self.identity)))))
	}

	pub fn resolved_user_data_dir(&self) -> Option<PathBuf> {
		self.user_data_dir.clone().or_else(|| state_dir().map(|dir| dir.join("profile")))
	}
}

fn state_dir() -> Option<PathBuf> {
	dirs::data_local_dir().map(|dir| dir.join(STATE_DIR))
}

fn sanitize(identity: &str) -> String {
	let cleaned: String = identity
		.chars()
		.map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
		.collect();
	if cleaned.is_empty() { "guest".to_string() } else { cleaned }
}

/// Intervals, timeouts and bounds used by every component.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Timings {
	pub capture_interval_ms: u64,
	pub heartbeat_interval_ms: u64,
	pub liveness_interval_ms: u64,
	pub probe_timeout_ms: u64,
	pub submit_timeout_ms: u64,
	pub navigation_timeout_ms: u64,
	pub navigation_retry_delay_ms: u64,
	pub navigation_attempts: u32,
	/// Minimum gap between the last successful send and the next submission.
	pub min_send_delay_ms: u64,
	/// Pause between submission attempts.
	pub retry_delay_ms: u64,
	pub send_attempts: u32,
	pub verify_window_ms: u64,
	/// Width of the timestamp bucket folded into dedupe keys.
	pub dedupe_window_ms: u64,
	/// Trailing transcript lines inspected per capture tick.
	pub scan_window: usize,
	/// Wait after submitting a login or consent form before re-reading the page.
	pub auth_settle_ms: u64,
	/// Emit the lines already on screen when capture starts instead of priming past them.
	pub emit_backlog: bool,
}

impl Default for Timings {
	fn default() -> Self {
		Self {
			capture_interval_ms: 5_000,
			heartbeat_interval_ms: 30_000,
			liveness_interval_ms: 120_000,
			probe_timeout_ms: 5_000,
			submit_timeout_ms: 3_000,
			navigation_timeout_ms: 30_000,
			navigation_retry_delay_ms: 5_000,
			navigation_attempts: 3,
			min_send_delay_ms: 800,
			retry_delay_ms: 500,
			send_attempts: 3,
			verify_window_ms: 500,
			dedupe_window_ms: 60_000,
			scan_window: 50,
			auth_settle_ms: 2_000,
			emit_backlog: false,
		}
	}
}

impl Timings {
	/// Every interval, timeout and bound must be non-zero.
	pub fn validate(&self) -> Result<()> {
		let required = [
			("captureIntervalMs", self.capture_interval_ms),
			("heartbeatIntervalMs", self.heartbeat_interval_ms),
			("livenessIntervalMs", self.liveness_interval_ms),
			("probeTimeoutMs", self.probe_timeout_ms),
			("submitTimeoutMs", self.submit_timeout_ms),
			("navigationTimeoutMs", self.navigation_timeout_ms),
			("navigationAttempts", u64::from(self.navigation_attempts)),
			("sendAttempts", u64::from(self.send_attempts)),
			("scanWindow", self.scan_window as u64),
		];
		match required.iter().find(|(_, value)| *value == 0) {
			Some((name, _)) => Err(ClientError::Config(format!("{name} must be greater than zero"))),
			None => Ok(()),
		}
	}

	pub fn capture_interval(&self) -> Duration {
		Duration::from_millis(self.capture_interval_ms)
	}

	pub fn heartbeat_interval(&self) -> Duration {
		Duration::from_millis(self.heartbeat_interval_ms)
	}

	pub fn liveness_interval(&self) -> Duration {
		Duration::from_millis(self.liveness_interval_ms)
	}

	pub fn probe_timeout(&self) -> Duration {
		Duration::from_millis(self.probe_timeout_ms)
	}

	pub fn submit_timeout(&self) -> Duration {
		Duration::from_millis(self.submit_timeout_ms)
	}

	pub fn navigation_timeout(&self) -> Duration {
		Duration::from_millis(self.navigation_timeout_ms)
	}

	pub fn navigation_retry_delay(&self) -> Duration {
		Duration::from_millis(self.navigation_retry_delay_ms)
	}

	pub fn min_send_delay(&self) -> Duration {
		Duration::from_millis(self.min_send_delay_ms)
	}

	pub fn retry_delay(&self) -> Duration {
		Duration::from_millis(self.retry_delay_ms)
	}

	pub fn verify_window(&self) -> Duration {
		Duration::from_millis(self.verify_window_ms)
	}

	pub fn auth_settle(&self) -> Duration {
		Duration::from_millis(self.auth_settle_ms)
	}
}
