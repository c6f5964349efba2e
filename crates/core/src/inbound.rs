//! Transcript capture.
//!
//! Each tick reads the trailing window of the transcript, classifies every
//! line once and emits the ones whose dedupe key is new. Lines written by the
//! client itself come back as self-reflection events and are tracked apart
//! from the bounded seen set; they also settle sends that went out
//! unconfirmed.

use std::sync::LazyLock;

use regex::Regex;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::config::Timings;
use crate::dedupe::DedupeKey;
use crate::dom::{self, RawLine};
use crate::error::Result;
use crate::events::{ClientEvent, now_ms};
use crate::health::HealthMonitor;
use crate::session::Session;

static STAMP: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"^\[(\d{1,2}):(\d{2}):(\d{2})\]\s*(.*)$").expect("stamp regex should compile"));
static CHAT_BODY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^([^:\s][^:]{0,39}):\s*(.+)$").expect("chat regex should compile"));
static JOIN: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"(?i)^(\S+)\s+(?:has\s+)?(?:joined|connected)\b").expect("join regex should compile"));
static LEAVE: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"(?i)^(\S+)\s+(?:has\s+)?(?:left|disconnected)\b").expect("leave regex should compile"));

/// Kind of a transcript line, resolved once during classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundKind {
	Chat,
	SelfReflection,
	UserJoin,
	UserLeave,
}

/// One classified transcript line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
	pub kind: InboundKind,
	pub username: String,
	pub text: String,
	pub timestamp_ms: u64,
	pub dedupe_key: DedupeKey,
}

impl InboundMessage {
	pub fn into_event(self) -> ClientEvent {
		match self.kind {
			InboundKind::Chat => ClientEvent::Chat {
				username: self.username,
				text: self.text,
				timestamp: self.timestamp_ms,
			},
			InboundKind::SelfReflection => ClientEvent::SelfReflection {
				actual_text: self.text,
				timestamp: self.timestamp_ms,
			},
			InboundKind::UserJoin => ClientEvent::UserJoin { username: self.username },
			InboundKind::UserLeave => ClientEvent::UserLeave { username: self.username },
		}
	}
}

fn is_server_line(classes: &str) -> bool {
	classes.split_whitespace().any(|class| class == "server-whisper" || class == "chat-msg-$server$" || class == "server-msg")
}

/// Classifies a rendered line; `None` for lines that carry no chat semantics.
pub fn classify(line: &RawLine, identity: &str, dedupe_window_ms: u64) -> Option<InboundMessage> {
	let text = line.text.trim();
	let (stamp_secs, body) = match STAMP.captures(text) {
		Some(caps) => {
			let part = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u64>().ok()).unwrap_or(0);
			let secs = part(1) * 3600 + part(2) * 60 + part(3);
			(Some(secs), caps.get(4).map_or("", |m| m.as_str()).trim())
		}
		None => (None, text),
	};
	if body.is_empty() {
		return None;
	}

	let chat = if is_server_line(&line.classes) { None } else { CHAT_BODY.captures(body) };
	let (kind, username, message) = match chat {
		Some(caps) => {
			let username = caps[1].trim().to_string();
			let message = caps[2].trim().to_string();
			let kind = if username.eq_ignore_ascii_case(identity) {
				InboundKind::SelfReflection
			} else {
				InboundKind::Chat
			};
			(kind, username, message)
		}
		None => {
			if let Some(caps) = JOIN.captures(body) {
				(InboundKind::UserJoin, caps[1].to_string(), body.to_string())
			} else if let Some(caps) = LEAVE.captures(body) {
				(InboundKind::UserLeave, caps[1].to_string(), body.to_string())
			} else {
				return None;
			}
		}
	};

	let dedupe_key = DedupeKey::new(&username, &message, stamp_secs, dedupe_window_ms);
	Some(InboundMessage {
		kind,
		username,
		text: message,
		timestamp_ms: now_ms(),
		dedupe_key,
	})
}

/// Periodic transcript scanner.
#[derive(Debug, Clone)]
pub struct InboundCapture {
	scan_window: usize,
	dedupe_window_ms: u64,
	emit_backlog: bool,
}

impl InboundCapture {
	pub fn new(timings: &Timings) -> Self {
		Self {
			scan_window: timings.scan_window,
			dedupe_window_ms: timings.dedupe_window_ms,
			emit_backlog: timings.emit_backlog,
		}
	}

	/// Runs one scan and returns how many events were emitted.
	pub(crate) async fn tick(&self, session: &Session, health: &HealthMonitor) -> Result<usize> {
		let Some(surface) = session.surface() else {
			return Ok(0);
		};
		let Some(lines) = dom::transcript(surface.as_ref(), self.scan_window).await? else {
			debug!(target = "livechat.inbound", "transcript container missing");
			return Ok(0);
		};

		let priming = session.take_priming_tick() && !self.emit_backlog;
		let mut emitted = 0;
		for line in &lines {
			let Some(message) = classify(line, session.identity(), self.dedupe_window_ms) else {
				continue;
			};
			let fresh = match message.kind {
				InboundKind::SelfReflection => session.remember_own(message.dedupe_key.clone()),
				_ => session.remember(message.dedupe_key.clone()),
			};
			if !fresh || priming {
				continue;
			}
			if message.kind == InboundKind::SelfReflection {
				session.echoes().confirm(&line.text, &message.text);
			}
			trace!(target = "livechat.inbound", kind = ?message.kind, username = %message.username, "new line");
			session.emit(message.into_event());
			emitted += 1;
		}

		session.echoes().expire(Instant::now());

		if priming {
			debug!(target = "livechat.inbound", lines = lines.len(), "primed past transcript backlog");
		} else if emitted > 0 {
			debug!(target = "livechat.inbound", emitted, "captured");
			session.record_activity();
			health.note_activity();
		}
		Ok(emitted)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn line(classes: &str, text: &str) -> RawLine {
		RawLine {
			classes: classes.into(),
			text: text.into(),
		}
	}

	#[test]
	fn stamped_chat_line() {
		let msg = classify(&line("chat-msg-ada", "[12:00:05] ada: hello there"), "courier", 60_000).unwrap();
		assert_eq!(msg.kind, InboundKind::Chat);
		assert_eq!(msg.username, "ada");
		assert_eq!(msg.text, "hello there");
	}

	#[test]
	fn own_lines_are_self_reflection() {
		let msg = classify(&line("chat-msg-Courier", "[12:00:05] Courier: yo whats up"), "courier", 60_000).unwrap();
		assert_eq!(msg.kind, InboundKind::SelfReflection);
		match msg.into_event() {
			ClientEvent::SelfReflection { actual_text, .. } => assert_eq!(actual_text, "yo whats up"),
			other => panic!("unexpected event {other:?}"),
		}
	}

	#[test]
	fn join_and_leave_notices() {
		let join = classify(&line("server-whisper", "[12:00:05] ada joined"), "courier", 60_000).unwrap();
		assert_eq!(join.kind, InboundKind::UserJoin);
		assert_eq!(join.username, "ada");

		let leave = classify(&line("", "bob has left the room"), "courier", 60_000).unwrap();
		assert_eq!(leave.kind, InboundKind::UserLeave);
		assert_eq!(leave.username, "bob");
	}

	#[test]
	fn noise_is_ignored() {
		assert!(classify(&line("", "[12:00:05]"), "courier", 60_000).is_none());
		assert!(classify(&line("server-whisper", "Playlist shuffled"), "courier", 60_000).is_none());
	}

	#[test]
	fn identical_stamped_lines_share_a_key() {
		let a = classify(&line("", "[12:00:05] ada: hi"), "courier", 60_000).unwrap();
		let b = classify(&line("", "[12:00:30] ada: hi"), "courier", 60_000).unwrap();
		assert_eq!(a.dedupe_key, b.dedupe_key);
	}
}
