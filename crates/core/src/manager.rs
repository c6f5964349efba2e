//! Session lifecycle orchestration.
//!
//! [`ChatClient`] composes the components into
//! `connect -> authenticate -> active -> degraded/recover -> active | dead`.
//! The connect pipeline (navigation, consent, authentication, presence) is
//! shared with recovery so a recreated or relaunched surface goes through
//! exactly the same checks as the first one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::auth::{self, AuthenticationFlow, LoginOutcome, MAX_LOGIN_ATTEMPTS};
use crate::auth_store::AuthStateStore;
use crate::browser::CdpLauncher;
use crate::config::ClientConfig;
use crate::dom::{self, DomAction};
use crate::error::{ClientError, Result};
use crate::events::ClientEvent;
use crate::health::{HealthMonitor, HealthSignal, HeartbeatAction, LivenessAction};
use crate::inbound::InboundCapture;
use crate::outbound::{EchoStats, OutboundCommand, OutboundDelivery, QueuePosition, SendReport};
use crate::permission::{PermissionHandler, PermissionOutcome};
use crate::recovery::{FatalSignal, RecoveryController, RecoveryHost, RecoveryStats};
use crate::session::{Installer, Session};
use crate::state::{Actor, SessionState};
use crate::surface::{Container, Launcher, Surface};
use crate::verify::{ImageVerifier, NoopImageVerifier, TesseractVerifier};
use crate::video::{CurrentVideo, QueuedVideo};

/// Consent prompts followed per establish; a second replacement in a row is not chased.
const MAX_SURFACE_REPLACEMENTS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EstablishMode {
	Connect,
	Recover,
}

/// Handle to a live-chat session.
///
/// Cheap to share behind an `Arc`; every operation takes `&self`.
pub struct ChatClient {
	core: Arc<ClientCore>,
}

impl ChatClient {
	/// Creates a client driving a locally launched Chromium-family browser.
	///
	/// Post-send image verification uses `tesseract` when it is on `PATH`.
	pub fn new(config: ClientConfig) -> Self {
		let verifier: Arc<dyn ImageVerifier> = match TesseractVerifier::discover() {
			Some(tesseract) => Arc::new(tesseract),
			None => Arc::new(NoopImageVerifier),
		};
		Self::with_parts(config, Arc::new(CdpLauncher::new()), verifier)
	}

	/// Creates a client over custom browser and verification seams.
	pub fn with_parts(config: ClientConfig, launcher: Arc<dyn Launcher>, verifier: Arc<dyn ImageVerifier>) -> Self {
		let (fatal_tx, fatal_rx) = mpsc::unbounded_channel();
		let core = Arc::new_cyclic(|me| ClientCore {
			me: me.clone(),
			session: Session::new(config.identity.clone(), config.login_enabled),
			auth_store: AuthStateStore::new(config.resolved_auth_state_path()),
			inbound: InboundCapture::new(&config.timings),
			outbound: OutboundDelivery::new(&config.timings, verifier, fatal_tx.clone()),
			permission: PermissionHandler::new(),
			health: HealthMonitor::new(),
			recovery: RecoveryController::new(),
			launcher,
			timers: Mutex::new(Vec::new()),
			watcher: Mutex::new(None),
			supervisor: Mutex::new(None),
			fatal_tx,
			fatal_rx: Mutex::new(Some(fatal_rx)),
			stopping: AtomicBool::new(false),
			lifecycle: tokio::sync::Mutex::new(()),
			config,
		});
		Self { core }
	}

	/// Establishes the session end to end and resolves once it is `Active`.
	///
	/// On failure everything opened so far is released, a `disconnected`
	/// event carries the reason and the error is returned.
	pub async fn connect(&self) -> Result<()> {
		self.core.connect().await
	}

	/// Stops every timer, closes the surface and shuts the browser down.
	pub async fn disconnect(&self) -> Result<()> {
		self.core.disconnect("client disconnect").await
	}

	/// Logs out of the platform, forgets the persisted auth state and disconnects.
	pub async fn logout(&self) -> Result<()> {
		self.core.logout().await
	}

	/// Sends a chat line. `false` when it could not be submitted.
	pub async fn send_chat(&self, text: &str) -> bool {
		self.send_chat_report(text).await.delivered
	}

	/// Sends a chat line and reports attempts and verification.
	pub async fn send_chat_report(&self, text: &str) -> SendReport {
		self.core.send(OutboundCommand::Chat(text.to_string())).await
	}

	/// Sends a private message to `identity`.
	pub async fn send_pm(&self, identity: &str, text: &str) -> bool {
		self.core
			.send(OutboundCommand::PrivateMessage {
				identity: identity.to_string(),
				text: text.to_string(),
			})
			.await
			.delivered
	}

	/// Adds a video to the room's playlist.
	pub async fn queue_video(&self, input: &str, position: QueuePosition) -> bool {
		self.core
			.send(OutboundCommand::QueueVideo {
				input: input.to_string(),
				position,
			})
			.await
			.delivered
	}

	pub async fn get_video_queue(&self) -> Result<Vec<QueuedVideo>> {
		let surface = self.core.live_surface()?;
		dom::video_queue(surface.as_ref()).await
	}

	pub async fn get_current_video(&self) -> Result<Option<CurrentVideo>> {
		let surface = self.core.live_surface()?;
		dom::current_video(surface.as_ref()).await
	}

	pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
		self.core.session.subscribe()
	}

	pub fn state(&self) -> SessionState {
		self.core.session.state()
	}

	pub fn identity(&self) -> &str {
		self.core.session.identity()
	}

	pub fn config(&self) -> &ClientConfig {
		&self.core.config
	}

	/// Milliseconds since the epoch when the current session became active.
	pub fn connected_at(&self) -> Option<u64> {
		self.core.session.connected_at()
	}

	pub fn last_activity_at(&self) -> u64 {
		self.core.session.last_activity_at()
	}

	pub fn last_health_signal(&self) -> Option<HealthSignal> {
		self.core.health.last_signal()
	}

	pub fn recovery_stats(&self) -> RecoveryStats {
		self.core.recovery.stats()
	}

	/// Unconfirmed sends still awaiting their echo, and how those resolved.
	pub fn echo_stats(&self) -> EchoStats {
		self.core.session.echoes().stats()
	}
}

impl Drop for ChatClient {
	fn drop(&mut self) {
		self.core.stop_timers();
		if let Some(handle) = self.core.supervisor.lock().take() {
			handle.abort();
		}
	}
}

struct ClientCore {
	me: Weak<ClientCore>,
	config: ClientConfig,
	session: Session,
	launcher: Arc<dyn Launcher>,
	auth_store: AuthStateStore,
	permission: PermissionHandler,
	inbound: InboundCapture,
	outbound: OutboundDelivery,
	health: HealthMonitor,
	recovery: RecoveryController,
	timers: Mutex<Vec<JoinHandle<()>>>,
	watcher: Mutex<Option<JoinHandle<()>>>,
	supervisor: Mutex<Option<JoinHandle<()>>>,
	fatal_tx: mpsc::UnboundedSender<FatalSignal>,
	fatal_rx: Mutex<Option<mpsc::UnboundedReceiver<FatalSignal>>>,
	stopping: AtomicBool,
	lifecycle: tokio::sync::Mutex<()>,
}

impl ClientCore {
	async fn connect(&self) -> Result<()> {
		let _lifecycle = self.lifecycle.lock().await;
		if let Err(e) = self.config.validate() {
			warn!(target = "livechat.session", error = %e, "refusing to connect");
			self.session.emit(ClientEvent::Disconnected { reason: e.to_string() });
			return Err(e);
		}
		self.start_supervisor();
		self.recovery.wait_idle().await;

		match self.session.state() {
			SessionState::Active | SessionState::Degraded => return Ok(()),
			SessionState::Dead => {
				self.teardown(Installer::Recovery).await;
				self.recovery.release_dead(&self.session)?;
			}
			_ => {}
		}
		self.session.transition(SessionState::Connecting, Actor::SessionManager)?;
		self.stopping.store(false, Ordering::SeqCst);
		self.session.reset_presence();
		self.session.clear_seen();
		self.health.reset();

		if self.config.force_fresh_session {
			match self.auth_store.clear() {
				Ok(true) => info!(target = "livechat.session", "discarded persisted auth state"),
				Ok(false) => {}
				Err(e) => warn!(target = "livechat.session", error = %e, "could not discard persisted auth state"),
			}
		}

		info!(target = "livechat.session", channel = %self.config.channel_url(), identity = %self.config.identity, login = self.config.login_enabled, "connecting");
		match self.open_session().await {
			Ok(()) => {
				self.session.mark_connected();
				self.arm_timers();
				self.session.emit(ClientEvent::Connected);
				info!(target = "livechat.session", "connected");
				Ok(())
			}
			Err(e) => {
				warn!(target = "livechat.session", error = %e, "connect failed");
				self.teardown(Installer::SessionManager).await;
				let _ = self.session.transition(SessionState::Disconnected, Actor::SessionManager);
				self.session.emit(ClientEvent::Disconnected { reason: e.to_string() });
				Err(e)
			}
		}
	}

	async fn open_session(&self) -> Result<()> {
		let container = self.launcher.launch(&self.config).await?;
		self.session.install_container(Installer::SessionManager, Arc::clone(&container))?;
		let surface = container.open_surface().await?;
		self.adopt_surface(Installer::SessionManager, Arc::clone(&surface))?;
		self.establish(&container, surface, EstablishMode::Connect, Installer::SessionManager).await
	}

	/// Navigation, consent, authentication and presence verification on `surface`.
	async fn establish(&self, container: &Arc<dyn Container>, mut surface: Arc<dyn Surface>, mode: EstablishMode, installer: Installer) -> Result<()> {
		let identity = self.config.identity.as_str();

		if !self.config.force_fresh_session {
			match self.auth_store.load_for(identity) {
				Ok(cookies) if !cookies.is_empty() => match surface.set_cookies(&cookies).await {
					Ok(()) => debug!(target = "livechat.session", cookies = cookies.len(), "applied persisted auth state"),
					Err(e) => warn!(target = "livechat.session", error = %e, "could not apply persisted auth state"),
				},
				Ok(_) => {}
				Err(e) => warn!(target = "livechat.session", error = %e, "could not read persisted auth state"),
			}
		}

		self.navigate_with_retry(surface.as_ref()).await?;

		for _ in 0..MAX_SURFACE_REPLACEMENTS {
			match self.permission.resolve_permission_prompt(surface.as_ref(), self.config.timings.auth_settle()).await? {
				PermissionOutcome::Absent | PermissionOutcome::Accepted => break,
				PermissionOutcome::SurfaceReplacing => {
					let old_id = surface.id().to_string();
					let replacement = container.replacement_for(&old_id, self.config.timings.navigation_timeout()).await?;
					info!(target = "livechat.session", old = %old_id, new = replacement.id(), "adopting replacement surface");
					self.adopt_surface(installer, Arc::clone(&replacement))?;
					if replacement.id() != old_id {
						self.permission.forget(&old_id);
						self.navigate_with_retry(replacement.as_ref()).await?;
					}
					surface = replacement;
				}
			}
		}

		self.permission.clear_obstructions(surface.as_ref()).await?;

		if mode == EstablishMode::Connect {
			self.session.transition(SessionState::Authenticating, Actor::SessionManager)?;
		}

		let flow = AuthenticationFlow::new(&self.config);
		let outcome = if self.config.login_enabled {
			let Some(secret) = self.config.credential_secret.as_deref() else {
				return Err(ClientError::AuthFailed("login enabled without a credential secret".to_string()));
			};
			flow.login_outcome(surface.as_ref(), identity, secret, MAX_LOGIN_ATTEMPTS).await?
		} else {
			flow.claim_guest(surface.as_ref(), identity).await?
		};
		match outcome {
			LoginOutcome::Authenticated => {}
			LoginOutcome::DuplicateSession => return Err(ClientError::DuplicateSession(identity.to_string())),
			LoginOutcome::Rejected(reason) => return Err(ClientError::AuthFailed(reason)),
			LoginOutcome::Exhausted => return Err(ClientError::PresenceNotVerified(identity.to_string())),
		}

		let presence = auth::roster_match(surface.as_ref(), identity).await?;
		if !presence.satisfies(self.config.login_enabled) {
			return Err(ClientError::PresenceNotVerified(identity.to_string()));
		}
		self.session.mark_presence_verified();
		debug!(target = "livechat.session", ?presence, "presence verified");

		if self.config.login_enabled {
			match surface.cookies().await {
				Ok(cookies) => {
					if let Err(e) = self.auth_store.save(identity, cookies) {
						warn!(target = "livechat.session", error = %e, "could not persist auth state");
					}
				}
				Err(e) => warn!(target = "livechat.session", error = %e, "could not read cookies"),
			}
		}

		if mode == EstablishMode::Connect {
			self.session.transition(SessionState::Active, Actor::Authentication)?;
		}
		Ok(())
	}

	async fn navigate_with_retry(&self, surface: &dyn Surface) -> Result<()> {
		let url = self.config.channel_url();
		let timings = &self.config.timings;
		let attempts = timings.navigation_attempts.max(1);
		let mut last_error = String::new();
		for attempt in 1..=attempts {
			match surface.navigate(&url, timings.navigation_timeout()).await {
				Ok(()) => {
					debug!(target = "livechat.session", %url, attempt, "navigated");
					return Ok(());
				}
				Err(e) if e.is_transient() => {
					warn!(target = "livechat.session", %url, attempt, error = %e, "navigation failed");
					last_error = e.to_string();
				}
				Err(e) => return Err(e),
			}
			if attempt < attempts {
				tokio::time::sleep(timings.navigation_retry_delay()).await;
			}
		}
		Err(ClientError::Navigation {
			url,
			attempts,
			message: last_error,
		})
	}

	async fn disconnect(&self, reason: &str) -> Result<()> {
		let _lifecycle = self.lifecycle.lock().await;
		self.stopping.store(true, Ordering::SeqCst);
		self.stop_timers();
		self.recovery.wait_idle().await;

		match self.session.state() {
			SessionState::Disconnected => return Ok(()),
			SessionState::Dead => {
				self.teardown(Installer::Recovery).await;
				self.recovery.release_dead(&self.session)?;
			}
			_ => {
				self.teardown(Installer::SessionManager).await;
				self.session.transition(SessionState::Disconnected, Actor::SessionManager)?;
			}
		}
		self.session.reset_presence();
		self.session.emit(ClientEvent::Disconnected { reason: reason.to_string() });
		info!(target = "livechat.session", reason, "disconnected");
		Ok(())
	}

	async fn logout(&self) -> Result<()> {
		if let Some(surface) = self.session.surface() {
			if let Err(e) = surface.act(&DomAction::Logout).await {
				debug!(target = "livechat.session", error = %e, "logout control failed, using logout url");
				if let Err(e) = surface.navigate(&self.config.logout_url(), self.config.timings.navigation_timeout()).await {
					warn!(target = "livechat.session", error = %e, "platform logout failed");
				}
			}
		}
		if self.auth_store.clear()? {
			info!(target = "livechat.session", "persisted auth state removed");
		}
		self.disconnect("logged out").await
	}

	async fn send(&self, command: OutboundCommand) -> SendReport {
		let report = self.outbound.deliver(&self.session, &command).await;
		if !report.delivered && report.attempts > 0 {
			self.session.emit(ClientEvent::Error {
				message: format!("send failed after {} attempts", report.attempts),
			});
		}
		report
	}

	fn live_surface(&self) -> Result<Arc<dyn Surface>> {
		if !self.session.state().is_live() {
			return Err(ClientError::NotConnected);
		}
		self.session.surface().ok_or(ClientError::NotConnected)
	}

	/// Closes the surface and shuts the container down.
	async fn teardown(&self, by: Installer) {
		self.stop_timers();
		match self.session.take_surface(by) {
			Ok(Some(surface)) => {
				self.permission.forget(surface.id());
				if let Err(e) = surface.close().await {
					debug!(target = "livechat.session", error = %e, "surface close failed");
				}
			}
			Ok(None) => {}
			Err(e) => warn!(target = "livechat.session", error = %e, "surface left in place"),
		}
		match self.session.take_container(by) {
			Ok(Some(container)) => container.shutdown().await,
			Ok(None) => {}
			Err(e) => warn!(target = "livechat.session", error = %e, "container left in place"),
		}
	}

	/// Installs `surface` and watches it for an unexpected close.
	fn adopt_surface(&self, by: Installer, surface: Arc<dyn Surface>) -> Result<()> {
		if let Some(old) = self.session.install_surface(by, Arc::clone(&surface))? {
			if old.id() != surface.id() {
				self.permission.forget(old.id());
			}
		}
		self.watch_surface(surface);
		Ok(())
	}

	fn watch_surface(&self, surface: Arc<dyn Surface>) {
		let fatal = self.fatal_tx.clone();
		let mut closed = surface.closed();
		let id = surface.id().to_string();
		let handle = tokio::spawn(async move {
			let gone = closed.wait_for(|closed| *closed).await.is_ok();
			if gone {
				warn!(target = "livechat.session", surface = %id, "surface closed unexpectedly");
				let _ = fatal.send(FatalSignal::new(Some(&id), "surface closed"));
			}
		});
		if let Some(previous) = self.watcher.lock().replace(handle) {
			previous.abort();
		}
	}

	fn start_supervisor(&self) {
		let Some(mut rx) = self.fatal_rx.lock().take() else {
			return;
		};
		let me = self.me.clone();
		let handle = tokio::spawn(async move {
			while let Some(signal) = rx.recv().await {
				let Some(core) = me.upgrade() else {
					break;
				};
				if core.stopping.load(Ordering::SeqCst) {
					debug!(target = "livechat.recovery", reason = %signal.reason, "ignoring fatal signal while stopping");
					continue;
				}
				let current = core.session.surface().map(|surface| surface.id().to_string());
				if signal.surface_id.is_some() && signal.surface_id != current && !core.recovery.is_recovering() {
					debug!(target = "livechat.recovery", reason = %signal.reason, surface = ?signal.surface_id, "ignoring fatal signal for a replaced surface");
					continue;
				}
				tokio::spawn(async move {
					if !core.stopping.load(Ordering::SeqCst) {
						core.recovery.recover(core.as_ref(), &signal.reason).await;
					}
				});
			}
		});
		*self.supervisor.lock() = Some(handle);
	}

	fn signal_fatal(&self, surface: &dyn Surface, reason: impl Into<String>) {
		let _ = self.fatal_tx.send(FatalSignal::new(Some(surface.id()), reason));
	}

	async fn capture_tick(&self) {
		let Some(surface) = self.session.surface() else {
			return;
		};
		match self.inbound.tick(&self.session, &self.health).await {
			Ok(_) => {}
			Err(e) if e.is_session_fatal() => self.signal_fatal(surface.as_ref(), format!("capture failed: {e}")),
			Err(e) => debug!(target = "livechat.inbound", error = %e, "capture tick failed"),
		}
	}

	async fn heartbeat_tick(&self) {
		if !self.session.state().is_live() {
			return;
		}
		let Some(surface) = self.session.surface() else {
			return;
		};
		let identity = self.session.identity();
		let presence = auth::roster_match(surface.as_ref(), identity).await;
		let (signal, action) = self.health.assess_heartbeat(&presence, self.session.login_enabled());

		match action {
			HeartbeatAction::Healthy => {
				if self.session.state() == SessionState::Degraded && !self.health.liveness_degraded() {
					let _ = self.session.transition(SessionState::Active, Actor::HealthMonitor);
				}
			}
			HeartbeatAction::Degraded => {
				let _ = self.session.transition(SessionState::Degraded, Actor::HealthMonitor);
			}
			HeartbeatAction::Inconclusive => {}
			HeartbeatAction::Reauthenticate => {
				let _ = self.session.transition(SessionState::Degraded, Actor::HealthMonitor);
				self.reauthenticate(surface.as_ref()).await;
			}
			HeartbeatAction::Fatal(reason) => {
				self.signal_fatal(surface.as_ref(), reason);
				return;
			}
		}

		let chat_ready = dom::chat_input(surface.as_ref()).await.is_ok_and(|input| input.is_usable());
		self.session.emit(ClientEvent::Heartbeat {
			timestamp: signal.timestamp,
			connected: self.session.state().is_live(),
			chat_ready,
		});
	}

	async fn reauthenticate(&self, surface: &dyn Surface) {
		let Some(secret) = self.config.credential_secret.as_deref() else {
			warn!(target = "livechat.auth", "guest variant detected but no credential secret configured");
			return;
		};
		info!(target = "livechat.auth", "re-authenticating after guest fallback");
		match AuthenticationFlow::new(&self.config).reauthenticate(surface, self.session.identity(), secret).await {
			Ok(LoginOutcome::Authenticated) => {
				self.health.end_guest_episode();
				self.session.mark_presence_verified();
				let _ = self.session.transition(SessionState::Active, Actor::HealthMonitor);
				info!(target = "livechat.auth", "re-authentication verified");
			}
			Ok(outcome) => {
				warn!(target = "livechat.auth", ?outcome, "re-authentication did not restore presence");
				self.session.emit(ClientEvent::Error {
					message: format!("re-authentication failed: {outcome:?}"),
				});
			}
			Err(e) if e.is_session_fatal() => self.signal_fatal(surface, format!("re-authentication failed: {e}")),
			Err(e) => warn!(target = "livechat.auth", error = %e, "re-authentication errored"),
		}
	}

	async fn liveness_tick(&self) {
		if !self.session.state().is_live() {
			return;
		}
		let Some(surface) = self.session.surface() else {
			return;
		};
		let timeout = self.config.timings.probe_timeout();
		let probe = match tokio::time::timeout(timeout, surface.ping(timeout)).await {
			Ok(result) => result,
			Err(_) => Err(ClientError::Timeout(format!("liveness probe exceeded {}ms", timeout.as_millis()))),
		};
		if let Err(e) = &probe {
			if e.is_session_fatal() {
				self.signal_fatal(surface.as_ref(), e.to_string());
				return;
			}
			warn!(target = "livechat.health", error = %e, "liveness probe failed");
		}
		let container_present = if probe.is_ok() {
			dom::transcript_present(surface.as_ref()).await.ok()
		} else {
			None
		};

		match self.health.assess_liveness(probe.is_ok(), container_present).1 {
			LivenessAction::Healthy => {
				if self.session.state() == SessionState::Degraded && !self.health.in_guest_episode() {
					let _ = self.session.transition(SessionState::Active, Actor::HealthMonitor);
				}
			}
			LivenessAction::Degraded => {
				let _ = self.session.transition(SessionState::Degraded, Actor::HealthMonitor);
			}
			LivenessAction::Fatal(reason) => self.signal_fatal(surface.as_ref(), reason),
		}
	}
}

macro_rules! spawn_ticker {
	($me:expr, $period:expr, $skip_first:expr, $tick:ident) => {{
		let me: Weak<ClientCore> = $me;
		let period = $period;
		tokio::spawn(async move {
			let start = if $skip_first {
				tokio::time::Instant::now() + period
			} else {
				tokio::time::Instant::now()
			};
			let mut interval = tokio::time::interval_at(start, period);
			interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
			loop {
				interval.tick().await;
				let Some(core) = me.upgrade() else {
					break;
				};
				core.$tick().await;
			}
		})
	}};
}

#[async_trait]
impl RecoveryHost for ClientCore {
	fn session(&self) -> &Session {
		&self.session
	}

	fn stop_timers(&self) {
		for handle in self.timers.lock().drain(..) {
			handle.abort();
		}
		if let Some(handle) = self.watcher.lock().take() {
			handle.abort();
		}
	}

	fn arm_timers(&self) {
		let timings = &self.config.timings;
		let handles = vec![
			spawn_ticker!(self.me.clone(), timings.capture_interval(), false, capture_tick),
			spawn_ticker!(self.me.clone(), timings.heartbeat_interval(), true, heartbeat_tick),
			spawn_ticker!(self.me.clone(), timings.liveness_interval(), true, liveness_tick),
		];
		let previous: Vec<_> = std::mem::replace(&mut *self.timers.lock(), handles);
		for handle in previous {
			handle.abort();
		}
		if let Some(surface) = self.session.surface() {
			self.watch_surface(surface);
		}
		debug!(target = "livechat.session", "timers armed");
	}

	async fn recreate_surface(&self) -> Result<()> {
		let container = self.session.container().ok_or(ClientError::ContainerGone)?;
		if !container.is_alive() {
			return Err(ClientError::ContainerGone);
		}
		if let Some(old) = self.session.take_surface(Installer::Recovery)? {
			self.permission.forget(old.id());
			let _ = old.close().await;
		}
		let surface = container.open_surface().await?;
		self.adopt_surface(Installer::Recovery, Arc::clone(&surface))?;
		self.health.reset();
		self.establish(&container, surface, EstablishMode::Recover, Installer::Recovery).await
	}

	async fn relaunch(&self) -> Result<()> {
		if let Some(old) = self.session.take_surface(Installer::Recovery)? {
			self.permission.forget(old.id());
			let _ = old.close().await;
		}
		if let Some(container) = self.session.take_container(Installer::Recovery)? {
			container.shutdown().await;
		}
		self.session.clear_seen();
		self.health.reset();

		let container = self.launcher.launch(&self.config).await?;
		self.session.install_container(Installer::Recovery, Arc::clone(&container))?;
		let surface = container.open_surface().await?;
		self.adopt_surface(Installer::Recovery, Arc::clone(&surface))?;
		self.establish(&container, surface, EstablishMode::Recover, Installer::Recovery).await
	}
}
