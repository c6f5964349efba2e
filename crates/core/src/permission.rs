//! One-time automation-consent prompts and other page obstructions.
//!
//! Accepting the prompt commonly reloads or replaces the tab. That is
//! reported as [`PermissionOutcome::SurfaceReplacing`] so the caller adopts
//! the replacement instead of treating the lost page as a failure.
//!
//! Once consent is settled, modal popups are dismissed in a bounded number
//! of passes and the message of the day is hidden.

use std::collections::HashSet;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::dom::{self, DomAction};
use crate::error::{ClientError, Result};
use crate::surface::Surface;

/// Popup dismissals attempted per surface before giving up.
pub const MAX_POPUP_PASSES: usize = 5;

const POPUP_SETTLE: Duration = Duration::from_millis(500);

/// Result of resolving a consent prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionOutcome {
	/// Nothing to accept, or already accepted on this surface.
	Absent,
	Accepted,
	/// The surface reloaded or closed as a result of accepting.
	SurfaceReplacing,
}

/// Accepts consent prompts at most once per surface.
#[derive(Debug, Default)]
pub struct PermissionHandler {
	accepted: Mutex<HashSet<String>>,
	motd_hidden: Mutex<HashSet<String>>,
}

impl PermissionHandler {
	pub fn new() -> Self {
		Self::default()
	}

	/// Looks for a visible consent control, ticks "remember" when offered and accepts.
	pub async fn resolve_permission_prompt(&self, surface: &dyn Surface, settle: Duration) -> Result<PermissionOutcome> {
		if self.accepted.lock().contains(surface.id()) {
			debug!(target = "livechat.auth", surface = surface.id(), "consent already accepted on this surface");
			return Ok(PermissionOutcome::Absent);
		}

		let prompt = match dom::consent_prompt(surface).await {
			Ok(prompt) => prompt,
			Err(e) if replaced(&e) => return Ok(PermissionOutcome::SurfaceReplacing),
			Err(e) => return Err(e),
		};
		if !prompt.present || !prompt.visible {
			return Ok(PermissionOutcome::Absent);
		}

		if prompt.remember {
			if let Err(e) = surface.act(&DomAction::CheckRemember).await {
				warn!(target = "livechat.auth", error = %e, "could not tick remember-choice control");
			}
		}

		self.accepted.lock().insert(surface.id().to_string());
		match surface.act(&DomAction::AcceptConsent).await {
			Ok(()) => {}
			Err(e) if replaced(&e) => {
				info!(target = "livechat.auth", surface = surface.id(), "consent accepted, surface replacing");
				return Ok(PermissionOutcome::SurfaceReplacing);
			}
			Err(e) => return Err(e),
		}

		tokio::time::sleep(settle).await;
		if surface.is_closed() {
			info!(target = "livechat.auth", surface = surface.id(), "consent accepted, surface closed");
			return Ok(PermissionOutcome::SurfaceReplacing);
		}
		// A reload destroys the execution context; any cheap query notices.
		match dom::transcript_present(surface).await {
			Err(e) if replaced(&e) => Ok(PermissionOutcome::SurfaceReplacing),
			_ => {
				info!(target = "livechat.auth", surface = surface.id(), "consent accepted");
				Ok(PermissionOutcome::Accepted)
			}
		}
	}

	/// Hides the message of the day once per surface and dismisses popups; returns how many were dismissed.
	pub async fn clear_obstructions(&self, surface: &dyn Surface) -> Result<usize> {
		if !self.motd_hidden.lock().contains(surface.id()) {
			match surface.act(&DomAction::SuppressMotd).await {
				Ok(()) => {
					self.motd_hidden.lock().insert(surface.id().to_string());
				}
				Err(e) if e.is_session_fatal() => return Err(e),
				Err(e) => debug!(target = "livechat.auth", error = %e, "could not hide the message of the day"),
			}
		}

		let mut dismissed = 0;
		for pass in 1..=MAX_POPUP_PASSES {
			let open = match dom::blocking_popups(surface).await {
				Ok(open) => open,
				Err(e) if e.is_session_fatal() => return Err(e),
				Err(e) => {
					debug!(target = "livechat.auth", error = %e, "could not look for popups");
					break;
				}
			};
			if open == 0 {
				break;
			}
			match surface.act(&DomAction::DismissPopup).await {
				Ok(()) => dismissed += 1,
				Err(e) if e.is_session_fatal() => return Err(e),
				Err(e) => {
					debug!(target = "livechat.auth", error = %e, pass, "popup dismissal failed");
					break;
				}
			}
			tokio::time::sleep(POPUP_SETTLE).await;
		}
		if dismissed == MAX_POPUP_PASSES {
			warn!(target = "livechat.auth", surface = surface.id(), "popups still open after the last dismissal pass");
		} else if dismissed > 0 {
			info!(target = "livechat.auth", surface = surface.id(), dismissed, "dismissed blocking popups");
		}
		Ok(dismissed)
	}

	/// Forgets a surface once it is gone.
	pub fn forget(&self, surface_id: &str) {
		self.accepted.lock().remove(surface_id);
		self.motd_hidden.lock().remove(surface_id);
	}
}

fn replaced(err: &ClientError) -> bool {
	err.is_surface_closed()
}
