#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use livechat::fake::{FakeLauncher, FakePage};
use livechat::{ChatClient, ClientConfig, ClientEvent, NoopImageVerifier, Timings};
use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;

pub const IDENTITY: &str = "courier";
pub const SECRET: &str = "correct horse";

pub fn config(login_enabled: bool, dir: &TempDir) -> ClientConfig {
	ClientConfig {
		channel_identity: "lounge".into(),
		login_enabled,
		identity: IDENTITY.into(),
		credential_secret: login_enabled.then(|| SECRET.to_string()),
		auth_state_path: Some(dir.path().join("auth.json")),
		user_data_dir: Some(dir.path().join("profile")),
		timings: Timings {
			auth_settle_ms: 200,
			navigation_retry_delay_ms: 100,
			..Timings::default()
		},
		..ClientConfig::default()
	}
}

/// A client wired to an in-memory room.
pub struct Harness {
	pub client: ChatClient,
	pub launcher: Arc<FakeLauncher>,
	pub events: broadcast::Receiver<ClientEvent>,
	pub dir: TempDir,
}

impl Harness {
	pub fn new(login_enabled: bool) -> Self {
		Self::with_page(login_enabled, |_| {})
	}

	pub fn with_page(login_enabled: bool, script: impl FnOnce(&mut FakePage)) -> Self {
		Self::with_config(login_enabled, |_| {}, script)
	}

	pub fn with_config(login_enabled: bool, tweak: impl FnOnce(&mut ClientConfig), script: impl FnOnce(&mut FakePage)) -> Self {
		let dir = TempDir::new().unwrap();
		let mut config = config(login_enabled, &dir);
		tweak(&mut config);
		let mut page = FakePage::new(IDENTITY);
		script(&mut page);
		let launcher = Arc::new(FakeLauncher::new(page));
		let client = ChatClient::with_parts(config, launcher.clone(), Arc::new(NoopImageVerifier));
		let events = client.subscribe();
		Self {
			client,
			launcher,
			events,
			dir,
		}
	}

	pub async fn connected(login_enabled: bool) -> Self {
		let harness = Self::new(login_enabled);
		harness.client.connect().await.unwrap();
		harness
	}

	/// Every event emitted since the last call.
	pub fn drain(&mut self) -> Vec<ClientEvent> {
		let mut events = Vec::new();
		loop {
			match self.events.try_recv() {
				Ok(event) => events.push(event),
				Err(TryRecvError::Lagged(_)) => continue,
				Err(TryRecvError::Empty | TryRecvError::Closed) => return events,
			}
		}
	}

	pub fn chats(&mut self) -> Vec<(String, String)> {
		self.drain()
			.into_iter()
			.filter_map(|event| match event {
				ClientEvent::Chat { username, text, .. } => Some((username, text)),
				_ => None,
			})
			.collect()
	}
}

/// Lets timers fire on the paused test clock.
pub async fn advance(secs: u64) {
	tokio::time::sleep(Duration::from_secs(secs)).await;
}
