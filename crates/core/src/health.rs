//! Heartbeat and liveness assessment.
//!
//! The monitor only judges; the session manager's timer tasks gather the
//! page evidence, apply the verdicts and route fatal ones to recovery.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::auth::RosterMatch;
use crate::error::ClientError;
use crate::events::now_ms;

/// Consecutive unresponsive probes that make the surface dead.
pub const MAX_PROBE_FAILURES: u32 = 2;

/// Consecutive liveness ticks without a transcript container that make the surface dead.
pub const MAX_MISSING_CONTAINER: u32 = 2;

/// Snapshot produced by every health tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSignal {
	pub heartbeat_ok: bool,
	pub surface_accessible: bool,
	pub presence_verified: bool,
	pub timestamp: u64,
}

/// What a heartbeat asks the session to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatAction {
	Healthy,
	/// The roster lists a guest variant while logged in; try credentials once.
	Reauthenticate,
	/// Still a guest variant after this episode's re-authentication.
	Degraded,
	/// The roster could not be read; the current state stands.
	Inconclusive,
	Fatal(String),
}

/// What a liveness tick asks the session to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LivenessAction {
	Healthy,
	Degraded,
	Fatal(String),
}

/// Tracks consecutive failures across ticks.
#[derive(Debug, Default)]
pub struct HealthMonitor {
	probe_failures: AtomicU32,
	missing_container: AtomicU32,
	guest_episode: AtomicBool,
	last_signal: Mutex<Option<HealthSignal>>,
}

impl HealthMonitor {
	pub fn new() -> Self {
		Self::default()
	}

	/// Fresh counters for a newly established surface.
	pub fn reset(&self) {
		self.probe_failures.store(0, Ordering::SeqCst);
		self.missing_container.store(0, Ordering::SeqCst);
		self.guest_episode.store(false, Ordering::SeqCst);
	}

	/// Captured traffic proves the page is alive.
	pub fn note_activity(&self) {
		if self.probe_failures.swap(0, Ordering::SeqCst) > 0 {
			debug!(target = "livechat.health", "activity reset unresponsive counter");
		}
	}

	/// The guest-variant episode ended with verified authentication.
	pub fn end_guest_episode(&self) {
		self.guest_episode.store(false, Ordering::SeqCst);
	}

	pub fn in_guest_episode(&self) -> bool {
		self.guest_episode.load(Ordering::SeqCst)
	}

	/// Any unresponsive probe or missing container since the last healthy tick.
	pub fn liveness_degraded(&self) -> bool {
		self.probe_failures.load(Ordering::SeqCst) > 0 || self.missing_container.load(Ordering::SeqCst) > 0
	}

	pub fn probe_failures(&self) -> u32 {
		self.probe_failures.load(Ordering::SeqCst)
	}

	pub fn last_signal(&self) -> Option<HealthSignal> {
		*self.last_signal.lock()
	}

	fn record(&self, signal: HealthSignal) -> HealthSignal {
		*self.last_signal.lock() = Some(signal);
		signal
	}

	/// Judges a heartbeat roster check.
	pub fn assess_heartbeat(&self, presence: &Result<RosterMatch, ClientError>, login_enabled: bool) -> (HealthSignal, HeartbeatAction) {
		let (accessible, verified, action) = match presence {
			Err(e) if e.is_session_fatal() => (false, false, HeartbeatAction::Fatal(e.to_string())),
			Err(e) => {
				warn!(target = "livechat.health", error = %e, "heartbeat roster check failed");
				(true, false, HeartbeatAction::Inconclusive)
			}
			Ok(RosterMatch::Absent) => {
				warn!(target = "livechat.health", "identity missing from presence roster");
				(true, false, HeartbeatAction::Fatal("evicted from presence roster".to_string()))
			}
			Ok(RosterMatch::GuestVariant) if login_enabled => {
				if self.guest_episode.swap(true, Ordering::SeqCst) {
					(true, false, HeartbeatAction::Degraded)
				} else {
					warn!(target = "livechat.health", "roster lists a guest variant of the identity");
					(true, false, HeartbeatAction::Reauthenticate)
				}
			}
			Ok(_) => {
				self.guest_episode.store(false, Ordering::SeqCst);
				(true, true, HeartbeatAction::Healthy)
			}
		};
		let signal = self.record(HealthSignal {
			heartbeat_ok: matches!(action, HeartbeatAction::Healthy) && verified,
			surface_accessible: accessible,
			presence_verified: verified,
			timestamp: now_ms(),
		});
		(signal, action)
	}

	/// Judges a liveness probe. `container_present` is `None` when it could not be checked.
	pub fn assess_liveness(&self, probe_ok: bool, container_present: Option<bool>) -> (HealthSignal, LivenessAction) {
		let failures = if probe_ok {
			self.probe_failures.store(0, Ordering::SeqCst);
			0
		} else {
			self.probe_failures.fetch_add(1, Ordering::SeqCst) + 1
		};

		let missing = match container_present {
			Some(false) => self.missing_container.fetch_add(1, Ordering::SeqCst) + 1,
			Some(true) => {
				self.missing_container.store(0, Ordering::SeqCst);
				0
			}
			None => self.missing_container.load(Ordering::SeqCst),
		};

		let action = if failures >= MAX_PROBE_FAILURES {
			LivenessAction::Fatal(format!("surface unresponsive for {failures} consecutive probes"))
		} else if missing >= MAX_MISSING_CONTAINER {
			LivenessAction::Fatal(format!("transcript container missing for {missing} consecutive checks"))
		} else if failures > 0 || missing > 0 {
			warn!(target = "livechat.health", failures, missing, "liveness degraded");
			LivenessAction::Degraded
		} else {
			LivenessAction::Healthy
		};

		let signal = self.record(HealthSignal {
			heartbeat_ok: probe_ok,
			surface_accessible: probe_ok && container_present != Some(false),
			presence_verified: false,
			timestamp: now_ms(),
		});
		(signal, action)
	}
}
