//! Session lifecycle states and the transition table.
//!
//! Each legal edge names the single component allowed to take it. Anything
//! else is rejected by the session and logged as a defect.

use serde::Serialize;

/// Lifecycle state of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
	Disconnected,
	Connecting,
	Authenticating,
	Active,
	Degraded,
	Recovering,
	Dead,
}

impl SessionState {
	/// States in which the surface is expected to be usable.
	pub fn is_live(self) -> bool {
		matches!(self, SessionState::Active | SessionState::Degraded)
	}
}

/// Component requesting a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Actor {
	SessionManager,
	Authentication,
	HealthMonitor,
	Recovery,
}

/// Returns the actor authorized to move from `from` to `to`, if the edge exists.
pub fn authorized_actor(from: SessionState, to: SessionState) -> Option<Actor> {
	use Actor::*;
	use SessionState::*;

	let actor = match (from, to) {
		(Disconnected, Connecting) => SessionManager,
		(Connecting, Authenticating) => SessionManager,
		(Connecting, Disconnected) | (Authenticating, Disconnected) => SessionManager,
		(Authenticating, Active) => Authentication,
		(Active, Degraded) | (Degraded, Active) => HealthMonitor,
		(Active, Disconnected) | (Degraded, Disconnected) => SessionManager,
		(Active, Recovering) | (Degraded, Recovering) => Recovery,
		(Recovering, Active) | (Recovering, Dead) => Recovery,
		(Dead, Disconnected) => Recovery,
		_ => return None,
	};
	Some(actor)
}

/// Returns `true` when `actor` may move the session from `from` to `to`.
pub fn is_allowed(from: SessionState, to: SessionState, actor: Actor) -> bool {
	authorized_actor(from, to) == Some(actor)
}

/// Transitions into `Active` additionally require a verified roster presence.
pub fn requires_presence(to: SessionState) -> bool {
	to == SessionState::Active
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn connect_path_is_owned_by_manager_and_auth() {
		assert!(is_allowed(SessionState::Disconnected, SessionState::Connecting, Actor::SessionManager));
		assert!(is_allowed(SessionState::Connecting, SessionState::Authenticating, Actor::SessionManager));
		assert!(is_allowed(SessionState::Authenticating, SessionState::Active, Actor::Authentication));
		assert!(!is_allowed(SessionState::Authenticating, SessionState::Active, Actor::SessionManager));
	}

	#[test]
	fn only_recovery_leaves_recovering_or_dead() {
		let everyone = [Actor::SessionManager, Actor::Authentication, Actor::HealthMonitor, Actor::Recovery];
		let all_states = [
			SessionState::Disconnected,
			SessionState::Connecting,
			SessionState::Authenticating,
			SessionState::Active,
			SessionState::Degraded,
			SessionState::Recovering,
			SessionState::Dead,
		];
		for from in [SessionState::Recovering, SessionState::Dead] {
			for to in all_states {
				for actor in everyone {
					if is_allowed(from, to, actor) {
						assert_eq!(actor, Actor::Recovery, "{from:?} -> {to:?} by {actor:?}");
					}
				}
			}
		}
	}

	#[test]
	fn unknown_edges_are_rejected() {
		assert!(authorized_actor(SessionState::Disconnected, SessionState::Active).is_none());
		assert!(authorized_actor(SessionState::Dead, SessionState::Active).is_none());
		assert!(!is_allowed(SessionState::Active, SessionState::Recovering, Actor::HealthMonitor));
	}

	#[test]
	fn health_monitor_alone_restores_active_from_degraded() {
		assert_eq!(authorized_actor(SessionState::Degraded, SessionState::Active), Some(Actor::HealthMonitor));
		assert!(!is_allowed(SessionState::Degraded, SessionState::Active, Actor::Authentication));
	}
}
