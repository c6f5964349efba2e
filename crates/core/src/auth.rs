//! Authentication and presence verification.
//!
//! Success is judged by the presence roster, never by a redirect or a form
//! disappearing: the platform silently falls back to guest mode on some
//! failures, which only the roster reveals.

use std::time::Duration;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::dom::{self, DomAction, RosterEntry};
use crate::error::Result;
use crate::surface::Surface;

/// Credential submissions allowed per connect.
pub const MAX_LOGIN_ATTEMPTS: u32 = 3;

/// How the configured identity appears in the presence roster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RosterMatch {
	/// Listed under its own name as a registered user.
	Authenticated,
	/// Listed as a guest, or under a numbered variant of the name.
	GuestVariant,
	Absent,
}

impl RosterMatch {
	/// Whether this counts as verified presence for the session's mode.
	pub fn satisfies(self, login_enabled: bool) -> bool {
		match self {
			RosterMatch::Authenticated => true,
			RosterMatch::GuestVariant => !login_enabled,
			RosterMatch::Absent => false,
		}
	}
}

/// Result of a login or guest claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
	Authenticated,
	/// The platform showed an explicit error.
	Rejected(String),
	/// The identity is already connected elsewhere.
	DuplicateSession,
	/// Attempts ran out without verified presence.
	Exhausted,
}

impl LoginOutcome {
	pub fn succeeded(&self) -> bool {
		matches!(self, LoginOutcome::Authenticated)
	}
}

/// Classifies roster entries against `identity`.
pub fn classify_roster(entries: &[RosterEntry], identity: &str) -> RosterMatch {
	let variant = Regex::new(&format!(r"(?i)^{}[_-]?\d+$", regex::escape(identity))).ok();
	let mut result = RosterMatch::Absent;
	for entry in entries {
		let exact = entry.name.eq_ignore_ascii_case(identity);
		if exact && !entry.guest {
			return RosterMatch::Authenticated;
		}
		if exact || variant.as_ref().is_some_and(|re| re.is_match(&entry.name)) {
			result = RosterMatch::GuestVariant;
		}
	}
	result
}

/// Reads the roster and classifies it.
pub async fn roster_match(surface: &dyn Surface, identity: &str) -> Result<RosterMatch> {
	let entries = dom::roster(surface).await?;
	Ok(classify_roster(&entries, identity))
}

/// Login, guest claim and re-authentication against one surface.
pub struct AuthenticationFlow<'a> {
	config: &'a ClientConfig,
}

impl<'a> AuthenticationFlow<'a> {
	pub fn new(config: &'a ClientConfig) -> Self {
		Self { config }
	}

	fn settle(&self) -> Duration {
		self.config.timings.auth_settle()
	}

	/// Submits credentials and verifies the identity in the roster.
	///
	/// Returns `false` on any failure; see [`login_outcome`](Self::login_outcome) for why.
	pub async fn login(&self, surface: &dyn Surface, identity: &str, secret: &str) -> Result<bool> {
		Ok(self.login_outcome(surface, identity, secret, MAX_LOGIN_ATTEMPTS).await?.succeeded())
	}

	/// Like [`login`](Self::login) with an explicit attempt budget.
	pub async fn login_outcome(&self, surface: &dyn Surface, identity: &str, secret: &str, max_attempts: u32) -> Result<LoginOutcome> {
		let mut attempts = 0;
		let mut on_auth_view = false;
		let mut rediscovered = false;

		while attempts < max_attempts {
			let form = dom::auth_form(surface).await?;
			if form.duplicate_notice {
				warn!(target = "livechat.auth", identity, "duplicate-session notice shown");
				return Ok(LoginOutcome::DuplicateSession);
			}

			if !on_auth_view {
				let presence = roster_match(surface, identity).await?;
				let logged_in_here = form.logged_in_as.as_deref().is_some_and(|name| name.eq_ignore_ascii_case(identity));
				match (presence, logged_in_here) {
					(RosterMatch::Authenticated, true) => {
						info!(target = "livechat.auth", identity, "already authenticated, skipping login");
						return Ok(LoginOutcome::Authenticated);
					}
					(RosterMatch::Authenticated, false) => {
						warn!(target = "livechat.auth", identity, "identity already present in roster from another session");
						return Ok(LoginOutcome::DuplicateSession);
					}
					_ => {}
				}
			}

			if form.is_ambiguous() || !form.has_credential_fields() {
				if rediscovered {
					if form.is_ambiguous() {
						return Ok(LoginOutcome::Rejected("ambiguous login form".to_string()));
					}
					attempts += 1;
					debug!(target = "livechat.auth", attempts, "login fields not found yet");
					tokio::time::sleep(self.config.timings.retry_delay()).await;
					continue;
				}
				rediscovered = true;
				on_auth_view = true;
				debug!(target = "livechat.auth", url = %self.config.auth_url(), ambiguous = form.is_ambiguous(), "retrying field discovery on the authentication view");
				surface.navigate(&self.config.auth_url(), self.config.timings.navigation_timeout()).await?;
				continue;
			}

			attempts += 1;
			info!(target = "livechat.auth", identity, attempt = attempts, "submitting credentials");
			if let Err(e) = surface
				.act(&DomAction::FillCredentials {
					identity: identity.to_string(),
					secret: secret.to_string(),
				})
				.await
			{
				if !e.is_transient() {
					return Err(e);
				}
				warn!(target = "livechat.auth", error = %e, attempt = attempts, "credential submission failed");
				continue;
			}
			tokio::time::sleep(self.settle()).await;

			let after = dom::auth_form(surface).await?;
			if after.duplicate_notice {
				warn!(target = "livechat.auth", identity, "duplicate-session notice after submit");
				return Ok(LoginOutcome::DuplicateSession);
			}
			if let Some(banner) = after.error_banner {
				warn!(target = "livechat.auth", identity, %banner, "login rejected");
				return Ok(LoginOutcome::Rejected(banner));
			}

			if on_auth_view {
				surface.navigate(&self.config.channel_url(), self.config.timings.navigation_timeout()).await?;
				on_auth_view = false;
			}
			match roster_match(surface, identity).await? {
				RosterMatch::Authenticated => {
					info!(target = "livechat.auth", identity, attempt = attempts, "login verified by roster");
					return Ok(LoginOutcome::Authenticated);
				}
				other => warn!(target = "livechat.auth", identity, presence = ?other, attempt = attempts, "login not reflected in roster"),
			}
		}

		warn!(target = "livechat.auth", identity, attempts, "login attempts exhausted");
		Ok(LoginOutcome::Exhausted)
	}

	/// One credential round used when the heartbeat finds a guest variant.
	pub async fn reauthenticate(&self, surface: &dyn Surface, identity: &str, secret: &str) -> Result<LoginOutcome> {
		self.login_outcome(surface, identity, secret, 1).await
	}

	/// Claims `identity` as a guest name and waits for it to show in the roster.
	pub async fn claim_guest(&self, surface: &dyn Surface, identity: &str) -> Result<LoginOutcome> {
		for attempt in 1..=MAX_LOGIN_ATTEMPTS {
			if roster_match(surface, identity).await?.satisfies(false) {
				info!(target = "livechat.auth", identity, attempt, "guest presence verified");
				return Ok(LoginOutcome::Authenticated);
			}

			let form = dom::auth_form(surface).await?;
			if form.duplicate_notice {
				warn!(target = "livechat.auth", identity, "guest name already in use");
				return Ok(LoginOutcome::DuplicateSession);
			}
			if let Some(banner) = form.error_banner {
				return Ok(LoginOutcome::Rejected(banner));
			}

			if form.guest_field {
				debug!(target = "livechat.auth", identity, attempt, "claiming guest name");
				if let Err(e) = surface.act(&DomAction::GuestLogin { name: identity.to_string() }).await {
					if !e.is_transient() {
						return Err(e);
					}
					warn!(target = "livechat.auth", error = %e, "guest claim failed");
				}
			}
			tokio::time::sleep(self.settle()).await;
		}

		if roster_match(surface, identity).await?.satisfies(false) {
			return Ok(LoginOutcome::Authenticated);
		}
		Ok(LoginOutcome::Exhausted)
	}
}
