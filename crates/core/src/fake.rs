//! In-memory browser seams for tests.
//!
//! A [`FakeLauncher`] hands out [`FakeContainer`]s whose [`FakeSurface`]s all
//! render one shared [`FakePage`], the room as the server sees it. Tests
//! script the page, crash surfaces or containers, and inspect the actions
//! the client performed.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use livechat_protocol::Cookie;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::watch;

use crate::config::ClientConfig;
use crate::dom::{AuthFormState, ChatInputState, ConsentPromptState, DomAction, DomQuery, RawLine, RosterEntry};
use crate::error::{ClientError, Result};
use crate::surface::{Container, Launcher, Surface};
use crate::video::{CurrentVideo, QueuedVideo};

/// What the room does with submitted credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginBehavior {
	/// Lists the identity as registered and shows it as logged in.
	Accept,
	/// Shows the given error banner.
	Reject(String),
	/// Leaves the roster untouched.
	Ignore,
}

/// Scriptable room state.
#[derive(Debug, Clone)]
pub struct FakePage {
	/// Name the room renders submitted chat lines under.
	pub speaker: String,
	/// `None` when the transcript container is missing.
	pub transcript: Option<Vec<RawLine>>,
	pub roster: Vec<RosterEntry>,
	pub consent: ConsentPromptState,
	/// Accepting consent closes the surface it was accepted on.
	pub consent_closes_surface: bool,
	pub auth_form: AuthFormState,
	pub login: LoginBehavior,
	pub chat_input: ChatInputState,
	/// Submitted chat lines show up in the transcript.
	pub echo_chat: bool,
	/// Renders the next echoed line with this text instead of the submitted one.
	pub echo_as: Option<String>,
	/// Commit key presses that fail before one succeeds.
	pub failing_submits: u32,
	/// The next commit key press closes the surface.
	pub close_on_submit: bool,
	/// Navigations that time out before one succeeds.
	pub failing_navigations: u32,
	pub responsive: bool,
	/// Open modal popups; each dismissal closes one.
	pub popups: usize,
	pub motd_suppressed: bool,
	pub queue: Vec<QueuedVideo>,
	pub now_playing: Option<CurrentVideo>,
	pub cookies: Vec<Cookie>,
	pub applied_cookies: Vec<Cookie>,
	pub actions: Vec<DomAction>,
	pub navigations: Vec<String>,
	pending_chat: Option<String>,
	clock: u32,
}

impl FakePage {
	/// A room with a single-field login form that accepts any credentials.
	pub fn new(speaker: &str) -> Self {
		Self {
			speaker: speaker.to_string(),
			transcript: Some(Vec::new()),
			roster: Vec::new(),
			consent: ConsentPromptState::default(),
			consent_closes_surface: false,
			auth_form: AuthFormState {
				name_fields: 1,
				password_fields: 1,
				guest_field: true,
				..AuthFormState::default()
			},
			login: LoginBehavior::Accept,
			chat_input: ChatInputState {
				present: true,
				visible: true,
				enabled: true,
			},
			echo_chat: true,
			echo_as: None,
			failing_submits: 0,
			close_on_submit: false,
			failing_navigations: 0,
			responsive: true,
			popups: 0,
			motd_suppressed: false,
			queue: Vec::new(),
			now_playing: None,
			cookies: Vec::new(),
			applied_cookies: Vec::new(),
			actions: Vec::new(),
			navigations: Vec::new(),
			pending_chat: None,
			clock: 12 * 3600,
		}
	}

	fn stamp(&mut self) -> String {
		self.clock += 1;
		format!("[{:02}:{:02}:{:02}]", self.clock / 3600 % 24, self.clock / 60 % 60, self.clock % 60)
	}

	/// Appends a stamped chat line from `user`.
	pub fn say(&mut self, user: &str, text: &str) {
		let stamp = self.stamp();
		self.push_line(format!("chat-msg-{user}"), format!("{stamp} {user}: {text}"));
	}

	/// Appends a server notice such as `ada joined`.
	pub fn notice(&mut self, text: &str) {
		let stamp = self.stamp();
		self.push_line("server-whisper".to_string(), format!("{stamp} {text}"));
	}

	fn push_line(&mut self, classes: String, text: String) {
		self.transcript.get_or_insert_with(Vec::new).push(RawLine { classes, text });
	}

	/// Lists `name` in the roster.
	pub fn join(&mut self, name: &str, guest: bool) {
		self.roster.push(RosterEntry {
			name: name.to_string(),
			guest,
		});
	}

	/// Removes every roster entry whose name starts with `prefix`, ignoring case.
	pub fn evict(&mut self, prefix: &str) {
		let prefix = prefix.to_ascii_lowercase();
		self.roster.retain(|entry| !entry.name.to_ascii_lowercase().starts_with(&prefix));
	}

	pub fn count_actions(&self, predicate: impl Fn(&DomAction) -> bool) -> usize {
		self.actions.iter().filter(|action| predicate(action)).count()
	}

	pub fn credential_submissions(&self) -> usize {
		self.count_actions(|action| matches!(action, DomAction::FillCredentials { .. }))
	}

	pub fn chat_submissions(&self) -> usize {
		self.count_actions(|action| matches!(action, DomAction::PressEnter))
	}

	fn answer(&self, query: &DomQuery) -> Value {
		match query {
			DomQuery::Transcript { limit } => match &self.transcript {
				Some(lines) => {
					let start = lines.len().saturating_sub(*limit);
					Value::Array(lines[start..].iter().map(|line| json!({"classes": line.classes, "text": line.text})).collect())
				}
				None => Value::Null,
			},
			DomQuery::TranscriptPresent => Value::Bool(self.transcript.is_some()),
			DomQuery::Roster => Value::Array(self.roster.iter().map(|entry| json!({"name": entry.name, "guest": entry.guest})).collect()),
			DomQuery::ConsentPrompt => json!({
				"present": self.consent.present,
				"visible": self.consent.visible,
				"remember": self.consent.remember,
			}),
			DomQuery::AuthForm => json!({
				"nameFields": self.auth_form.name_fields,
				"passwordFields": self.auth_form.password_fields,
				"guestField": self.auth_form.guest_field,
				"errorBanner": self.auth_form.error_banner,
				"duplicateNotice": self.auth_form.duplicate_notice,
				"loggedInAs": self.auth_form.logged_in_as,
			}),
			DomQuery::ChatInput => json!({
				"present": self.chat_input.present,
				"visible": self.chat_input.visible,
				"enabled": self.chat_input.enabled,
			}),
			DomQuery::VideoQueue => serde_json::to_value(&self.queue).unwrap_or(Value::Null),
			DomQuery::CurrentVideo => serde_json::to_value(&self.now_playing).unwrap_or(Value::Null),
			DomQuery::BlockingPopups => json!(self.popups),
		}
	}
}

/// Outcome of an action applied to the page.
enum Applied {
	Done,
	CloseSurface,
}

impl FakePage {
	fn apply(&mut self, action: &DomAction) -> Result<Applied> {
		self.actions.push(action.clone());
		match action {
			DomAction::CheckRemember => self.consent.remember = false,
			DomAction::AcceptConsent => {
				if !self.consent.present {
					return Err(ClientError::Script("consent control missing".into()));
				}
				self.consent.present = false;
				self.consent.visible = false;
				if self.consent_closes_surface {
					return Ok(Applied::CloseSurface);
				}
			}
			DomAction::FillCredentials { identity, .. } => match self.login.clone() {
				LoginBehavior::Accept => {
					self.evict(identity);
					self.join(identity, false);
					self.auth_form.logged_in_as = Some(identity.clone());
					self.auth_form.error_banner = None;
				}
				LoginBehavior::Reject(banner) => self.auth_form.error_banner = Some(banner),
				LoginBehavior::Ignore => {}
			},
			DomAction::GuestLogin { name } => {
				if !self.auth_form.guest_field {
					return Err(ClientError::Script("guest field missing".into()));
				}
				self.join(name, true);
			}
			DomAction::FillChat { text } => {
				if !self.chat_input.present || !self.chat_input.enabled {
					return Err(ClientError::Script("chat input unavailable".into()));
				}
				self.pending_chat = Some(text.clone());
			}
			DomAction::PressEnter => {
				if self.close_on_submit {
					self.close_on_submit = false;
					return Ok(Applied::CloseSurface);
				}
				if self.failing_submits > 0 {
					self.failing_submits -= 1;
					return Err(ClientError::Script("submit swallowed".into()));
				}
				if let Some(text) = self.pending_chat.take() {
					if self.echo_chat {
						let rendered = self.echo_as.take().unwrap_or(text);
						let speaker = self.speaker.clone();
						self.say(&speaker, &rendered);
					}
				}
			}
			DomAction::Logout => {
				if let Some(name) = self.auth_form.logged_in_as.take() {
					self.evict(&name);
				}
			}
			DomAction::DismissPopup => {
				if self.popups == 0 {
					return Err(ClientError::Script("no popup control".into()));
				}
				self.popups -= 1;
			}
			DomAction::SuppressMotd => self.motd_suppressed = true,
		}
		Ok(Applied::Done)
	}
}

/// Shared handle to the room every fake surface renders.
pub type SharedPage = Arc<Mutex<FakePage>>;

/// One scripted tab.
pub struct FakeSurface {
	id: String,
	page: SharedPage,
	closed: watch::Sender<bool>,
}

impl FakeSurface {
	pub fn new(id: impl Into<String>, page: SharedPage) -> Self {
		let (closed, _) = watch::channel(false);
		Self {
			id: id.into(),
			page,
			closed,
		}
	}

	/// Simulates the tab going away underneath the client.
	pub fn crash(&self) {
		self.closed.send_replace(true);
	}

	fn check_open(&self) -> Result<()> {
		if *self.closed.borrow() {
			return Err(ClientError::SurfaceClosed);
		}
		Ok(())
	}
}

#[async_trait]
impl Surface for FakeSurface {
	fn id(&self) -> &str {
		&self.id
	}

	async fn navigate(&self, url: &str, timeout: Duration) -> Result<()> {
		self.check_open()?;
		let mut page = self.page.lock();
		page.navigations.push(url.to_string());
		if page.failing_navigations > 0 {
			page.failing_navigations -= 1;
			return Err(ClientError::Timeout(format!("navigation exceeded {}ms", timeout.as_millis())));
		}
		Ok(())
	}

	async fn query(&self, query: &DomQuery) -> Result<Value> {
		self.check_open()?;
		Ok(self.page.lock().answer(query))
	}

	async fn act(&self, action: &DomAction) -> Result<()> {
		self.check_open()?;
		let applied = self.page.lock().apply(action)?;
		match applied {
			Applied::Done => Ok(()),
			Applied::CloseSurface => {
				self.crash();
				if matches!(action, DomAction::AcceptConsent) {
					Ok(())
				} else {
					Err(ClientError::SurfaceClosed)
				}
			}
		}
	}

	async fn ping(&self, timeout: Duration) -> Result<()> {
		self.check_open()?;
		if self.page.lock().responsive {
			Ok(())
		} else {
			Err(ClientError::Timeout(format!("probe exceeded {}ms", timeout.as_millis())))
		}
	}

	async fn screenshot(&self) -> Result<Vec<u8>> {
		self.check_open()?;
		Ok(Vec::new())
	}

	async fn cookies(&self) -> Result<Vec<Cookie>> {
		self.check_open()?;
		Ok(self.page.lock().cookies.clone())
	}

	async fn set_cookies(&self, cookies: &[Cookie]) -> Result<()> {
		self.check_open()?;
		self.page.lock().applied_cookies.extend_from_slice(cookies);
		Ok(())
	}

	fn closed(&self) -> watch::Receiver<bool> {
		self.closed.subscribe()
	}

	async fn close(&self) -> Result<()> {
		self.crash();
		Ok(())
	}
}

/// One scripted browser process.
pub struct FakeContainer {
	name: String,
	page: SharedPage,
	alive: AtomicBool,
	opened: AtomicU32,
	surfaces: Mutex<Vec<Arc<FakeSurface>>>,
}

impl FakeContainer {
	pub fn new(name: impl Into<String>, page: SharedPage) -> Self {
		Self {
			name: name.into(),
			page,
			alive: AtomicBool::new(true),
			opened: AtomicU32::new(0),
			surfaces: Mutex::new(Vec::new()),
		}
	}

	pub fn surfaces(&self) -> Vec<Arc<FakeSurface>> {
		self.surfaces.lock().clone()
	}

	/// Most recently opened surface that is still open.
	pub fn current_surface(&self) -> Option<Arc<FakeSurface>> {
		self.surfaces.lock().iter().rev().find(|surface| !surface.is_closed()).cloned()
	}

	/// Simulates the browser process dying with every tab in it.
	pub fn crash(&self) {
		self.alive.store(false, Ordering::SeqCst);
		for surface in self.surfaces.lock().iter() {
			surface.crash();
		}
	}
}

#[async_trait]
impl Container for FakeContainer {
	async fn open_surface(&self) -> Result<Arc<dyn Surface>> {
		if !self.is_alive() {
			return Err(ClientError::ContainerGone);
		}
		let n = self.opened.fetch_add(1, Ordering::SeqCst) + 1;
		let surface = Arc::new(FakeSurface::new(format!("{}-tab-{n}", self.name), Arc::clone(&self.page)));
		self.surfaces.lock().push(Arc::clone(&surface));
		Ok(surface)
	}

	async fn replacement_for(&self, old: &str, _timeout: Duration) -> Result<Arc<dyn Surface>> {
		let existing = self.surfaces.lock().iter().find(|surface| surface.id() == old).cloned();
		match existing {
			Some(surface) if !surface.is_closed() => Ok(surface),
			_ => self.open_surface().await,
		}
	}

	fn is_alive(&self) -> bool {
		self.alive.load(Ordering::SeqCst)
	}

	async fn shutdown(&self) {
		self.crash();
	}
}

/// Hands out fake containers over one shared room.
pub struct FakeLauncher {
	page: SharedPage,
	launches: AtomicUsize,
	failing_launches: AtomicU32,
	containers: Mutex<Vec<Arc<FakeContainer>>>,
}

impl FakeLauncher {
	pub fn new(page: FakePage) -> Self {
		Self {
			page: Arc::new(Mutex::new(page)),
			launches: AtomicUsize::new(0),
			failing_launches: AtomicU32::new(0),
			containers: Mutex::new(Vec::new()),
		}
	}

	/// Runs `f` against the shared room.
	pub fn page<R>(&self, f: impl FnOnce(&mut FakePage) -> R) -> R {
		f(&mut self.page.lock())
	}

	pub fn launches(&self) -> usize {
		self.launches.load(Ordering::SeqCst)
	}

	/// The next `n` launches fail.
	pub fn fail_launches(&self, n: u32) {
		self.failing_launches.store(n, Ordering::SeqCst);
	}

	pub fn latest_container(&self) -> Option<Arc<FakeContainer>> {
		self.containers.lock().last().cloned()
	}

	pub fn current_surface(&self) -> Option<Arc<FakeSurface>> {
		self.latest_container().and_then(|container| container.current_surface())
	}
}

#[async_trait]
impl Launcher for FakeLauncher {
	async fn launch(&self, _config: &ClientConfig) -> Result<Arc<dyn Container>> {
		let n = self.launches.fetch_add(1, Ordering::SeqCst) + 1;
		if self
			.failing_launches
			.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
			.is_ok()
		{
			return Err(ClientError::Runtime(livechat_runtime::Error::Launch(format!("launch {n} refused"))));
		}
		let container = Arc::new(FakeContainer::new(format!("browser-{n}"), Arc::clone(&self.page)));
		self.containers.lock().push(Arc::clone(&container));
		Ok(container)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::dom;

	#[tokio::test]
	async fn echoed_chat_uses_the_speaker_name() {
		let page = Arc::new(Mutex::new(FakePage::new("courier")));
		let surface = FakeSurface::new("tab", Arc::clone(&page));
		surface.act(&DomAction::FillChat { text: "hello".into() }).await.unwrap();
		surface.act(&DomAction::PressEnter).await.unwrap();

		let lines = dom::transcript(&surface, 10).await.unwrap().unwrap();
		assert_eq!(lines.len(), 1);
		assert_eq!(lines[0].classes, "chat-msg-courier");
		assert!(lines[0].text.ends_with("courier: hello"));
	}

	#[tokio::test]
	async fn crashed_surface_rejects_queries() {
		let surface = FakeSurface::new("tab", Arc::new(Mutex::new(FakePage::new("courier"))));
		surface.crash();
		assert!(surface.is_closed());
		let err = dom::roster(&surface).await.unwrap_err();
		assert!(err.is_surface_closed());
	}
}
