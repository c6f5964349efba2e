//! Single-flight recovery.
//!
//! `Idle -> Recovering -> {Recreated, Relaunched, Failed}`. A fresh surface
//! inside the live container is tried first; a dead container or a failed
//! recreation escalates to a full relaunch. Fatal signals that arrive while a
//! sequence is in flight are counted and dropped.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::events::ClientEvent;
use crate::session::Session;
use crate::state::{Actor, SessionState};

/// Request to recover, raised by health checks, sends and surface watchers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FatalSignal {
	/// Surface the failure was observed on; stale signals for replaced surfaces are ignored.
	pub surface_id: Option<String>,
	pub reason: String,
}

impl FatalSignal {
	pub fn new(surface_id: Option<&str>, reason: impl Into<String>) -> Self {
		Self {
			surface_id: surface_id.map(str::to_string),
			reason: reason.into(),
		}
	}
}

/// How a recovery request ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
	/// A new surface in the existing container.
	Recreated,
	/// A new container and surface.
	Relaunched,
	/// Session is dead.
	Failed(String),
	/// Folded into the sequence already in flight.
	Coalesced,
	/// The session was not live; nothing to recover.
	Skipped,
}

/// Counters exposed for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryStats {
	pub sequences: u64,
	pub coalesced: u64,
	pub recreated: u64,
	pub relaunched: u64,
	pub failed: u64,
}

/// The operations recovery drives on the session manager.
#[async_trait]
pub(crate) trait RecoveryHost: Send + Sync {
	fn session(&self) -> &Session;

	fn stop_timers(&self);

	fn arm_timers(&self);

	/// Opens, establishes and installs a new surface in the current container.
	async fn recreate_surface(&self) -> Result<()>;

	/// Tears down the container and runs the full connect pipeline in a new one.
	async fn relaunch(&self) -> Result<()>;
}

/// Single-flight guard and counters.
#[derive(Debug, Default)]
pub struct RecoveryController {
	in_flight: AtomicBool,
	idle: Notify,
	sequences: AtomicU64,
	coalesced: AtomicU64,
	recreated: AtomicU64,
	relaunched: AtomicU64,
	failed: AtomicU64,
}

/// Clears the in-flight flag when dropped.
pub struct RecoveryGuard<'a> {
	controller: &'a RecoveryController,
}

impl Drop for RecoveryGuard<'_> {
	fn drop(&mut self) {
		self.controller.in_flight.store(false, Ordering::SeqCst);
		self.controller.idle.notify_waiters();
	}
}

impl RecoveryController {
	pub fn new() -> Self {
		Self::default()
	}

	/// Claims the single recovery slot.
	pub fn try_begin(&self) -> Option<RecoveryGuard<'_>> {
		self.in_flight
			.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
			.ok()
			.map(|_| RecoveryGuard { controller: self })
	}

	pub fn is_recovering(&self) -> bool {
		self.in_flight.load(Ordering::SeqCst)
	}

	/// Resolves once no sequence is in flight.
	pub async fn wait_idle(&self) {
		loop {
			let notified = self.idle.notified();
			if !self.is_recovering() {
				return;
			}
			notified.await;
		}
	}

	pub fn stats(&self) -> RecoveryStats {
		RecoveryStats {
			sequences: self.sequences.load(Ordering::SeqCst),
			coalesced: self.coalesced.load(Ordering::SeqCst),
			recreated: self.recreated.load(Ordering::SeqCst),
			relaunched: self.relaunched.load(Ordering::SeqCst),
			failed: self.failed.load(Ordering::SeqCst),
		}
	}

	/// Runs one recovery sequence unless one is already in flight.
	pub(crate) async fn recover(&self, host: &dyn RecoveryHost, reason: &str) -> RecoveryOutcome {
		let Some(_guard) = self.try_begin() else {
			let total = self.coalesced.fetch_add(1, Ordering::SeqCst) + 1;
			info!(target = "livechat.recovery", reason, coalesced = total, "recovery already in flight");
			return RecoveryOutcome::Coalesced;
		};

		let session = host.session();
		if !session.state().is_live() {
			debug!(target = "livechat.recovery", state = ?session.state(), reason, "session not live, skipping recovery");
			return RecoveryOutcome::Skipped;
		}
		if session.transition(SessionState::Recovering, Actor::Recovery).is_err() {
			return RecoveryOutcome::Skipped;
		}
		let sequence = self.sequences.fetch_add(1, Ordering::SeqCst) + 1;
		warn!(target = "livechat.recovery", sequence, reason, "recovery started");

		host.stop_timers();
		session.reset_presence();

		let container_alive = session.container().is_some_and(|container| container.is_alive());
		let mut outcome = None;
		if container_alive {
			match host.recreate_surface().await {
				Ok(()) => outcome = Some(RecoveryOutcome::Recreated),
				Err(e) => warn!(target = "livechat.recovery", error = %e, "surface recreation failed, escalating to relaunch"),
			}
		} else {
			info!(target = "livechat.recovery", "container gone, relaunching");
		}
		let outcome = match outcome {
			Some(outcome) => outcome,
			None => match host.relaunch().await {
				Ok(()) => RecoveryOutcome::Relaunched,
				Err(e) => RecoveryOutcome::Failed(e.to_string()),
			},
		};

		let outcome = match outcome {
			RecoveryOutcome::Failed(message) => RecoveryOutcome::Failed(message),
			success => match session.transition(SessionState::Active, Actor::Recovery) {
				Ok(()) => success,
				Err(e) => RecoveryOutcome::Failed(e.to_string()),
			},
		};

		match &outcome {
			RecoveryOutcome::Recreated => {
				self.recreated.fetch_add(1, Ordering::SeqCst);
			}
			RecoveryOutcome::Relaunched => {
				self.relaunched.fetch_add(1, Ordering::SeqCst);
			}
			RecoveryOutcome::Failed(message) => {
				self.failed.fetch_add(1, Ordering::SeqCst);
				error!(target = "livechat.recovery", sequence, error = %message, "recovery failed, session dead");
				let _ = session.transition(SessionState::Dead, Actor::Recovery);
				session.emit(ClientEvent::Disconnected {
					reason: format!("recovery failed: {message}"),
				});
				return outcome;
			}
			RecoveryOutcome::Coalesced | RecoveryOutcome::Skipped => {}
		}

		host.arm_timers();
		info!(target = "livechat.recovery", sequence, outcome = ?outcome, "recovery complete");
		outcome
	}

	/// Moves a dead session back to `Disconnected` so it can connect again.
	pub(crate) fn release_dead(&self, session: &Session) -> Result<()> {
		if session.state() == SessionState::Dead {
			session.transition(SessionState::Disconnected, Actor::Recovery)?;
		}
		Ok(())
	}
}
