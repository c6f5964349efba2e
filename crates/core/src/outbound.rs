//! Rate-limited message submission with retry and post-send verification.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::Timings;
use crate::dom::{self, DomAction, RawLine};
use crate::inbound::{InboundKind, classify};
use crate::recovery::FatalSignal;
use crate::session::Session;
use crate::surface::Surface;
use crate::text::{TRANSCRIPT_MATCH_THRESHOLD, matches};
use crate::verify::ImageVerifier;

const VERIFY_POLL: Duration = Duration::from_millis(100);

/// Where a queued video lands in the playlist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueuePosition {
	Next,
	End,
}

impl fmt::Display for QueuePosition {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			QueuePosition::Next => "next",
			QueuePosition::End => "end",
		})
	}
}

/// Something typed into the chat input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundCommand {
	Chat(String),
	PrivateMessage { identity: String, text: String },
	QueueVideo { input: String, position: QueuePosition },
}

impl OutboundCommand {
	/// Text submitted to the input.
	pub fn render(&self) -> String {
		match self {
			OutboundCommand::Chat(text) => text.clone(),
			OutboundCommand::PrivateMessage { identity, text } => format!("/pm {identity} {text}"),
			OutboundCommand::QueueVideo { input, position } => format!("/queue {position} {input}"),
		}
	}

	/// Commands never echo verbatim into the transcript.
	fn verifies(&self) -> bool {
		matches!(self, OutboundCommand::Chat(_))
	}
}

/// How a delivered message was confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Verification {
	Transcript,
	Image,
	Unconfirmed,
	/// Not attempted: the send failed or the command is not echoed.
	Skipped,
}

impl Verification {
	pub fn verified(self) -> bool {
		matches!(self, Verification::Transcript | Verification::Image)
	}
}

/// Result of one outbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendReport {
	pub delivered: bool,
	pub attempts: u32,
	pub verification: Verification,
}

impl SendReport {
	fn failed(attempts: u32) -> Self {
		Self {
			delivered: false,
			attempts,
			verification: Verification::Skipped,
		}
	}
}

#[derive(Debug, Default)]
struct GateState {
	last_success: Option<Instant>,
	/// Slots handed to callers that have not finished their send yet.
	in_flight: Vec<Instant>,
}

/// Spaces submissions at least `min_delay` after the last successful one.
///
/// Each caller reserves the next free slot and sleeps until it, so early
/// arrivals wait instead of contending on a lock. A turn that ends without
/// [`SendTurn::succeeded`] gives its slot back.
#[derive(Debug)]
pub struct RateGate {
	min_delay: Duration,
	state: Mutex<GateState>,
}

impl RateGate {
	pub fn new(min_delay: Duration) -> Self {
		Self {
			min_delay,
			state: Mutex::new(GateState::default()),
		}
	}

	/// Waits for this caller's slot.
	pub async fn wait_turn(&self) -> SendTurn<'_> {
		let slot = {
			let mut state = self.state.lock();
			let now = Instant::now();
			let after_success = state.last_success.map(|at| at + self.min_delay);
			let after_queued = state.in_flight.iter().max().map(|&at| at + self.min_delay);
			let slot = [Some(now), after_success, after_queued].into_iter().flatten().max().unwrap_or(now);
			state.in_flight.push(slot);
			slot
		};
		let turn = SendTurn { gate: self, slot };
		tokio::time::sleep_until(slot).await;

		// A send ahead of us may have succeeded later than its slot.
		loop {
			let ready = self.state.lock().last_success.map(|at| at + self.min_delay);
			match ready {
				Some(ready) if ready > Instant::now() => tokio::time::sleep_until(ready).await,
				_ => break,
			}
		}
		turn
	}
}

/// One caller's reserved slot in the [`RateGate`].
#[derive(Debug)]
pub struct SendTurn<'a> {
	gate: &'a RateGate,
	slot: Instant,
}

impl SendTurn<'_> {
	/// Starts the next spacing window now.
	pub fn succeeded(&self) {
		self.gate.state.lock().last_success = Some(Instant::now());
	}
}

impl Drop for SendTurn<'_> {
	fn drop(&mut self) {
		let mut state = self.gate.state.lock();
		if let Some(index) = state.in_flight.iter().position(|&at| at == self.slot) {
			state.in_flight.swap_remove(index);
		}
	}
}

/// Late-echo bookkeeping, as seen through [`ChatClient::echo_stats`](crate::ChatClient::echo_stats).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EchoStats {
	/// Unconfirmed sends still waiting for their line.
	pub pending: usize,
	/// Unconfirmed sends whose line showed up in a later capture.
	pub late_verified: u64,
	/// Unconfirmed sends whose line never showed up.
	pub expired: u64,
}

#[derive(Debug)]
struct PendingEcho {
	text: String,
	deadline: Instant,
	/// Raw lines already on screen when the send was judged unconfirmed.
	on_screen: HashSet<String>,
}

/// Unconfirmed sends that inbound capture may still confirm.
#[derive(Debug, Default)]
pub(crate) struct EchoTracker {
	pending: Mutex<Vec<PendingEcho>>,
	late_verified: AtomicU64,
	expired: AtomicU64,
}

impl EchoTracker {
	pub(crate) fn expect(&self, text: &str, deadline: Instant, on_screen: &[RawLine]) {
		let on_screen = on_screen.iter().map(|line| line.text.clone()).collect();
		self.pending.lock().push(PendingEcho {
			text: text.to_string(),
			deadline,
			on_screen,
		});
	}

	/// Resolves the oldest pending send that the captured own line `raw` echoes as `echoed`.
	pub(crate) fn confirm(&self, raw: &str, echoed: &str) -> bool {
		let now = Instant::now();
		let confirmed = {
			let mut pending = self.pending.lock();
			let found = pending
				.iter()
				.position(|echo| echo.deadline >= now && !echo.on_screen.contains(raw) && matches(&echo.text, echoed, TRANSCRIPT_MATCH_THRESHOLD));
			found.map(|index| pending.remove(index))
		};
		let Some(echo) = confirmed else {
			return false;
		};
		let total = self.late_verified.fetch_add(1, Ordering::SeqCst) + 1;
		info!(target = "livechat.outbound", chars = echo.text.chars().count(), late_verified = total, "send verified late in transcript");
		true
	}

	/// Drops pending sends whose grace period ended before `now`.
	pub(crate) fn expire(&self, now: Instant) {
		let mut expired = 0;
		self.pending.lock().retain(|echo| {
			let live = echo.deadline >= now;
			if !live {
				expired += 1;
			}
			live
		});
		if expired > 0 {
			let total = self.expired.fetch_add(expired, Ordering::SeqCst) + expired;
			warn!(target = "livechat.outbound", expired, total, "unconfirmed sends never appeared in the transcript");
		}
	}

	pub(crate) fn clear(&self) {
		self.pending.lock().clear();
	}

	pub(crate) fn stats(&self) -> EchoStats {
		EchoStats {
			pending: self.pending.lock().len(),
			late_verified: self.late_verified.load(Ordering::SeqCst),
			expired: self.expired.load(Ordering::SeqCst),
		}
	}
}

/// Lines after the last occurrence of `tail`; everything when `tail` scrolled out or was absent.
fn appended<'a>(lines: &'a [RawLine], tail: Option<&RawLine>) -> &'a [RawLine] {
	match tail.and_then(|tail| lines.iter().rposition(|line| line == tail)) {
		Some(index) => &lines[index + 1..],
		None => lines,
	}
}

/// Submits outbound commands through the chat input.
pub struct OutboundDelivery {
	gate: RateGate,
	verifier: Arc<dyn ImageVerifier>,
	fatal: mpsc::UnboundedSender<FatalSignal>,
	submit_timeout: Duration,
	retry_delay: Duration,
	max_attempts: u32,
	verify_window: Duration,
	echo_grace: Duration,
	scan_window: usize,
	dedupe_window_ms: u64,
}

impl OutboundDelivery {
	pub(crate) fn new(timings: &Timings, verifier: Arc<dyn ImageVerifier>, fatal: mpsc::UnboundedSender<FatalSignal>) -> Self {
		Self {
			gate: RateGate::new(timings.min_send_delay()),
			verifier,
			fatal,
			submit_timeout: timings.submit_timeout(),
			retry_delay: timings.retry_delay(),
			max_attempts: timings.send_attempts.max(1),
			verify_window: timings.verify_window(),
			echo_grace: timings.capture_interval() * 2,
			scan_window: timings.scan_window,
			dedupe_window_ms: timings.dedupe_window_ms,
		}
	}

	fn report_closed(&self, surface: &dyn Surface) {
		let _ = self.fatal.send(FatalSignal::new(Some(surface.id()), "surface closed during send"));
	}

	/// Locates the input, submits with bounded retries and verifies chat lines.
	pub(crate) async fn deliver(&self, session: &Session, command: &OutboundCommand) -> SendReport {
		let text = command.render();
		if text.trim().is_empty() {
			return SendReport::failed(0);
		}

		if !session.state().is_live() {
			debug!(target = "livechat.outbound", state = ?session.state(), "send refused while not live");
			return SendReport::failed(0);
		}

		let turn = self.gate.wait_turn().await;

		if !session.state().is_live() {
			debug!(target = "livechat.outbound", state = ?session.state(), "send refused while not live");
			return SendReport::failed(0);
		}
		let Some(surface) = session.surface() else {
			return SendReport::failed(0);
		};

		match dom::chat_input(surface.as_ref()).await {
			Ok(input) if input.is_usable() => {}
			Ok(input) => {
				warn!(target = "livechat.outbound", ?input, "chat input unavailable");
				return SendReport::failed(0);
			}
			Err(e) => {
				if e.is_session_fatal() {
					self.report_closed(surface.as_ref());
				}
				warn!(target = "livechat.outbound", error = %e, "could not inspect chat input");
				return SendReport::failed(0);
			}
		}

		let baseline = if command.verifies() {
			match dom::transcript(surface.as_ref(), self.scan_window).await {
				Ok(Some(lines)) => lines.last().cloned(),
				_ => None,
			}
		} else {
			None
		};

		let mut attempts = 0;
		let mut delivered = false;
		while attempts < self.max_attempts {
			attempts += 1;
			let submit = async {
				surface.act(&DomAction::FillChat { text: text.clone() }).await?;
				surface.act(&DomAction::PressEnter).await
			};
			match tokio::time::timeout(self.submit_timeout, submit).await {
				Ok(Ok(())) => {
					delivered = true;
					break;
				}
				Ok(Err(e)) if e.is_session_fatal() => {
					warn!(target = "livechat.outbound", attempt = attempts, "surface closed during send");
					self.report_closed(surface.as_ref());
					return SendReport::failed(attempts);
				}
				Ok(Err(e)) => warn!(target = "livechat.outbound", attempt = attempts, error = %e, "submission failed"),
				Err(_) => warn!(target = "livechat.outbound", attempt = attempts, timeout_ms = self.submit_timeout.as_millis() as u64, "submission timed out"),
			}
			if attempts < self.max_attempts {
				tokio::time::sleep(self.retry_delay).await;
			}
		}

		if !delivered {
			warn!(target = "livechat.outbound", attempts, "giving up on send");
			return SendReport::failed(attempts);
		}
		turn.succeeded();
		drop(turn);
		info!(target = "livechat.outbound", attempts, chars = text.chars().count(), "sent");

		let verification = if command.verifies() {
			let (verification, on_screen) = self.verify(session, surface.as_ref(), &text, baseline.as_ref()).await;
			if verification == Verification::Unconfirmed {
				session.echoes().expect(&text, Instant::now() + self.echo_grace, &on_screen);
			}
			verification
		} else {
			Verification::Skipped
		};
		SendReport {
			delivered,
			attempts,
			verification,
		}
	}

	/// Looks for the sent text among lines appended after `baseline`, then in a screenshot.
	///
	/// Also returns the last transcript window read, for late confirmation.
	async fn verify(&self, session: &Session, surface: &dyn Surface, text: &str, baseline: Option<&RawLine>) -> (Verification, Vec<RawLine>) {
		let deadline = Instant::now() + self.verify_window;
		let mut on_screen = Vec::new();
		loop {
			if let Ok(Some(lines)) = dom::transcript(surface, self.scan_window).await {
				let echoed = appended(&lines, baseline).iter().rev().any(|line| {
					classify(line, session.identity(), self.dedupe_window_ms)
						.is_some_and(|msg| msg.kind == InboundKind::SelfReflection && matches(text, &msg.text, TRANSCRIPT_MATCH_THRESHOLD))
				});
				if echoed {
					debug!(target = "livechat.outbound", "send verified in transcript");
					return (Verification::Transcript, lines);
				}
				on_screen = lines;
			}
			let now = Instant::now();
			if now >= deadline {
				break;
			}
			tokio::time::sleep(VERIFY_POLL.min(deadline - now)).await;
		}

		if self.verifier.verify_by_image(surface, text).await {
			debug!(target = "livechat.outbound", "send verified by image");
			return (Verification::Image, on_screen);
		}
		warn!(target = "livechat.outbound", "sent message not found in transcript or screenshot, watching later captures");
		(Verification::Unconfirmed, on_screen)
	}
}
