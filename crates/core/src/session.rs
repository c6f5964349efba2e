//! Session state shared by every component.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::dedupe::{DedupeKey, SeenMessageSet};
use crate::error::{ClientError, Result};
use crate::events::{ClientEvent, now_ms};
use crate::outbound::EchoTracker;
use crate::state::{Actor, SessionState, is_allowed, requires_presence};
use crate::surface::{Container, Surface};

const EVENT_CAPACITY: usize = 512;

/// Components allowed to put a surface or container in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Installer {
	SessionManager,
	Recovery,
}

impl Installer {
	fn name(self) -> &'static str {
		match self {
			Installer::SessionManager => "session manager",
			Installer::Recovery => "recovery",
		}
	}

	/// The connect pipeline installs while connecting; recovery only while recovering.
	fn may_install(self, state: SessionState) -> bool {
		match self {
			Installer::SessionManager => matches!(state, SessionState::Connecting | SessionState::Authenticating),
			Installer::Recovery => state == SessionState::Recovering,
		}
	}

	/// Recovery owns the slots once the session is recovering or dead.
	fn may_release(self, state: SessionState) -> bool {
		match self {
			Installer::SessionManager => !matches!(state, SessionState::Recovering | SessionState::Dead),
			Installer::Recovery => matches!(state, SessionState::Recovering | SessionState::Dead),
		}
	}
}

/// The single live session.
///
/// Capture and health hold only shared read handles obtained from
/// [`Session::surface`]; installing one is limited to [`Installer`]s.
pub(crate) struct Session {
	identity: String,
	login_enabled: bool,
	state: RwLock<SessionState>,
	presence_verified: AtomicBool,
	surface: RwLock<Option<Arc<dyn Surface>>>,
	container: RwLock<Option<Arc<dyn Container>>>,
	connected_at: Mutex<Option<u64>>,
	last_activity_at: AtomicU64,
	seen: Mutex<SeenMessageSet>,
	/// Lines the client posted itself; lives for the whole connection and is not capped.
	self_seen: Mutex<HashSet<DedupeKey>>,
	primed: AtomicBool,
	echoes: EchoTracker,
	events: broadcast::Sender<ClientEvent>,
}

impl Session {
	pub(crate) fn new(identity: String, login_enabled: bool) -> Self {
		let (events, _) = broadcast::channel(EVENT_CAPACITY);
		Self {
			identity,
			login_enabled,
			state: RwLock::new(SessionState::Disconnected),
			presence_verified: AtomicBool::new(false),
			surface: RwLock::new(None),
			container: RwLock::new(None),
			connected_at: Mutex::new(None),
			last_activity_at: AtomicU64::new(0),
			seen: Mutex::new(SeenMessageSet::default()),
			self_seen: Mutex::new(HashSet::new()),
			primed: AtomicBool::new(false),
			echoes: EchoTracker::default(),
			events,
		}
	}

	pub(crate) fn identity(&self) -> &str {
		&self.identity
	}

	pub(crate) fn login_enabled(&self) -> bool {
		self.login_enabled
	}

	pub(crate) fn state(&self) -> SessionState {
		*self.state.read()
	}

	/// Moves to `to` if the table allows `actor` to, rejecting and logging anything else.
	pub(crate) fn transition(&self, to: SessionState, actor: Actor) -> Result<()> {
		let mut state = self.state.write();
		let from = *state;
		if from == to {
			return Ok(());
		}
		if !is_allowed(from, to, actor) || (requires_presence(to) && !self.presence_verified()) {
			error!(target = "livechat.session", ?from, ?to, ?actor, presence = self.presence_verified(), "illegal state transition rejected");
			return Err(ClientError::IllegalTransition { from, to, actor });
		}
		*state = to;
		info!(target = "livechat.session", ?from, ?to, ?actor, "state transition");
		Ok(())
	}

	pub(crate) fn presence_verified(&self) -> bool {
		self.presence_verified.load(Ordering::SeqCst)
	}

	pub(crate) fn mark_presence_verified(&self) {
		self.presence_verified.store(true, Ordering::SeqCst);
	}

	/// Presence must be re-proven by every connect and recovery.
	pub(crate) fn reset_presence(&self) {
		self.presence_verified.store(false, Ordering::SeqCst);
	}

	pub(crate) fn surface(&self) -> Option<Arc<dyn Surface>> {
		self.surface.read().clone()
	}

	fn authorize(&self, by: Installer, slot: &'static str, allowed: fn(Installer, SessionState) -> bool) -> Result<()> {
		let state = self.state();
		if allowed(by, state) {
			return Ok(());
		}
		error!(target = "livechat.session", ?by, slot, ?state, "slot ownership violation rejected");
		Err(ClientError::Ownership { by: by.name(), slot, state })
	}

	/// Puts `surface` in place, returning the one it replaces.
	pub(crate) fn install_surface(&self, by: Installer, surface: Arc<dyn Surface>) -> Result<Option<Arc<dyn Surface>>> {
		self.authorize(by, "surface", Installer::may_install)?;
		info!(target = "livechat.session", surface = surface.id(), ?by, "surface installed");
		Ok(self.surface.write().replace(surface))
	}

	pub(crate) fn take_surface(&self, by: Installer) -> Result<Option<Arc<dyn Surface>>> {
		self.authorize(by, "surface", Installer::may_release)?;
		Ok(self.surface.write().take())
	}

	pub(crate) fn container(&self) -> Option<Arc<dyn Container>> {
		self.container.read().clone()
	}

	pub(crate) fn install_container(&self, by: Installer, container: Arc<dyn Container>) -> Result<Option<Arc<dyn Container>>> {
		self.authorize(by, "container", Installer::may_install)?;
		Ok(self.container.write().replace(container))
	}

	pub(crate) fn take_container(&self, by: Installer) -> Result<Option<Arc<dyn Container>>> {
		self.authorize(by, "container", Installer::may_release)?;
		Ok(self.container.write().take())
	}

	pub(crate) fn mark_connected(&self) {
		*self.connected_at.lock() = Some(now_ms());
		self.record_activity();
	}

	pub(crate) fn connected_at(&self) -> Option<u64> {
		*self.connected_at.lock()
	}

	pub(crate) fn record_activity(&self) {
		self.last_activity_at.store(now_ms(), Ordering::SeqCst);
	}

	pub(crate) fn last_activity_at(&self) -> u64 {
		self.last_activity_at.load(Ordering::SeqCst)
	}

	/// Returns `true` if `key` was not seen before.
	pub(crate) fn remember(&self, key: DedupeKey) -> bool {
		self.seen.lock().insert(key)
	}

	/// Returns `true` if the self-emitted `key` was not seen before.
	pub(crate) fn remember_own(&self, key: DedupeKey) -> bool {
		self.self_seen.lock().insert(key)
	}

	pub(crate) fn seen_len(&self) -> usize {
		self.seen.lock().len()
	}

	/// Forgets every seen line and re-arms backlog priming. Used by full reconnects.
	pub(crate) fn clear_seen(&self) {
		self.seen.lock().clear();
		self.self_seen.lock().clear();
		self.echoes.clear();
		self.primed.store(false, Ordering::SeqCst);
	}

	/// Sends that went out unconfirmed and may still show up in a capture.
	pub(crate) fn echoes(&self) -> &EchoTracker {
		&self.echoes
	}

	/// Returns `true` exactly once per connection: the tick that should prime instead of emit.
	pub(crate) fn take_priming_tick(&self) -> bool {
		!self.primed.swap(true, Ordering::SeqCst)
	}

	pub(crate) fn emit(&self, event: ClientEvent) {
		// No subscribers is fine.
		let _ = self.events.send(event);
	}

	pub(crate) fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
		self.events.subscribe()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::fake::{FakePage, FakeSurface};

	fn session() -> Session {
		Session::new("courier".into(), true)
	}

	#[test]
	fn active_requires_verified_presence() {
		let session = session();
		session.transition(SessionState::Connecting, Actor::SessionManager).unwrap();
		session.transition(SessionState::Authenticating, Actor::SessionManager).unwrap();

		let err = session.transition(SessionState::Active, Actor::Authentication).unwrap_err();
		assert!(matches!(err, ClientError::IllegalTransition { .. }));
		assert_eq!(session.state(), SessionState::Authenticating);

		session.mark_presence_verified();
		session.transition(SessionState::Active, Actor::Authentication).unwrap();
		assert_eq!(session.state(), SessionState::Active);
	}

	#[test]
	fn slots_belong_to_the_phase_that_owns_them() {
		let session = session();
		let page = Arc::new(parking_lot::Mutex::new(FakePage::new("courier")));
		let surface = || -> Arc<dyn Surface> { Arc::new(FakeSurface::new("tab-1", Arc::clone(&page))) };

		let refused = session.install_surface(Installer::SessionManager, surface());
		assert!(matches!(refused, Err(ClientError::Ownership { .. })));

		session.transition(SessionState::Connecting, Actor::SessionManager).unwrap();
		assert!(session.install_surface(Installer::Recovery, surface()).is_err());
		session.install_surface(Installer::SessionManager, surface()).unwrap();
		assert!(session.surface().is_some());

		assert!(session.take_surface(Installer::Recovery).is_err());
		assert!(session.take_surface(Installer::SessionManager).unwrap().is_some());
	}

	#[test]
	fn wrong_actor_is_rejected() {
		let session = session();
		assert!(session.transition(SessionState::Connecting, Actor::HealthMonitor).is_err());
		assert_eq!(session.state(), SessionState::Disconnected);
	}

	#[test]
	fn priming_tick_is_taken_once_per_connection() {
		let session = session();
		assert!(session.take_priming_tick());
		assert!(!session.take_priming_tick());
		session.clear_seen();
		assert!(session.take_priming_tick());
	}

	#[test]
	fn own_lines_do_not_consume_seen_capacity() {
		let session = session();
		for n in 0..150 {
			assert!(session.remember_own(DedupeKey::new("courier", &format!("line {n}"), None, 60_000)));
		}
		assert_eq!(session.seen_len(), 0);
		assert!(!session.remember_own(DedupeKey::new("courier", "line 0", None, 60_000)));
	}
}
