//! Page queries and interactions against the chat room's DOM.
//!
//! Every query is a self-contained script returning plain JSON; parsing and
//! classification happen on the Rust side so that in-memory surfaces can
//! script the same shapes.

use serde::Deserialize;
use serde_json::Value;

use crate::error::{ClientError, Result};
use crate::surface::Surface;
use crate::video::{CurrentVideo, QueuedVideo};

const TRANSCRIPT: &str = "#messagebuffer";
const ROSTER_ITEM: &str = "#userlist .userlist_item";
const CHAT_INPUT: &str = "#chatline";
const CONSENT_ALLOW: &str = r#"button[data-test-id="allow"], button[data-test="allow"]"#;
const CONSENT_REMEMBER: &str = r#"input[type="checkbox"][name*="remember" i], input[type="checkbox"][id*="remember" i]"#;
const NAME_FIELDS: &str = r#"input[name="name"], input[name="username"], input#username"#;
const PASSWORD_FIELDS: &str = r#"input[type="password"]"#;
const ERROR_BANNER: &str = ".alert-danger, #loginerror, .login-error";
const GUEST_NAME: &str = "#guestname";
const POPUP_CONTROLS: &str = r#"button, [data-dismiss="modal"], .modal-close, .close"#;
const POPUP_LABELS: &str = "^(×|x|close|accept|i accept|agree|ok|yes)$";
const MOTD_STYLE_ID: &str = "livechat-motd-suppress";
const MOTD_CSS: &str = "#motdwrap, #motd, .message-of-the-day { display: none !important; height: 0 !important; transition: none !important; }";

/// Read-only page queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomQuery {
	/// Trailing `limit` transcript lines, or `null` when the container is missing.
	Transcript { limit: usize },
	TranscriptPresent,
	Roster,
	ConsentPrompt,
	AuthForm,
	ChatInput,
	VideoQueue,
	CurrentVideo,
	/// Number of visible close or accept controls on modal popups.
	BlockingPopups,
}

/// Page interactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomAction {
	CheckRemember,
	AcceptConsent,
	FillCredentials { identity: String, secret: String },
	GuestLogin { name: String },
	FillChat { text: String },
	/// Presses the commit key in the focused input.
	PressEnter,
	Logout,
	/// Clicks the first visible popup close or accept control.
	DismissPopup,
	/// Hides the message of the day so it cannot shift the layout.
	SuppressMotd,
}

fn popup_controls_fn() -> String {
	format!(
		"const controls = () => Array.from(document.querySelectorAll({controls})).filter((el) => visible(el) && \
		 (el.matches('[data-dismiss=\"modal\"], .modal-close, .close') || new RegExp({labels}, 'i').test((el.textContent || '').trim())) && \
		 !el.closest('#chatwrap, #userlist, #queue'));",
		controls = js(POPUP_CONTROLS),
		labels = js(POPUP_LABELS),
	)
}

fn visible_fn() -> &'static str {
	"const visible = (el) => !!el && !!(el.offsetWidth || el.offsetHeight || el.getClientRects().length) && getComputedStyle(el).visibility !== 'hidden';"
}

fn js(value: &str) -> String {
	// A JSON string literal is a valid JS string literal.
	serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

impl DomQuery {
	pub fn script(&self) -> String {
		let visible = visible_fn();
		match self {
			DomQuery::Transcript { limit } => format!(
				"(() => {{ const buf = document.querySelector({buf}); if (!buf) return null; \
				 return Array.from(buf.children).slice(-{limit}).map((n) => ({{ classes: String(n.className || ''), text: (n.textContent || '').trim() }})); }})()",
				buf = js(TRANSCRIPT),
			),
			DomQuery::TranscriptPresent => format!("!!document.querySelector({})", js(TRANSCRIPT)),
			DomQuery::Roster => format!(
				"(() => Array.from(document.querySelectorAll({items})).map((item) => {{ \
				 const spans = item.querySelectorAll('span'); const label = spans.length ? spans[spans.length - 1] : item; \
				 return {{ name: (label.textContent || '').trim(), guest: item.classList.contains('userlist_guest') || !!item.querySelector('.userlist_guest') }}; }}))()",
				items = js(ROSTER_ITEM),
			),
			DomQuery::ConsentPrompt => format!(
				"(() => {{ {visible} const allow = document.querySelector({allow}); const remember = document.querySelector({remember}); \
				 return {{ present: !!allow, visible: visible(allow), remember: !!remember && !remember.checked }}; }})()",
				allow = js(CONSENT_ALLOW),
				remember = js(CONSENT_REMEMBER),
			),
			DomQuery::AuthForm => format!(
				"(() => {{ {visible} const count = (sel) => Array.from(document.querySelectorAll(sel)).filter(visible).length; \
				 const banner = Array.from(document.querySelectorAll({banner})).find(visible); \
				 const body = (document.body && document.body.innerText) || ''; \
				 const welcome = ((document.querySelector('#welcome') || {{}}).textContent || '').match(/Welcome,\\s*(.+)/); \
				 return {{ nameFields: count({names}), passwordFields: count({passwords}), guestField: visible(document.querySelector({guest})), \
				 errorBanner: banner ? banner.textContent.trim() : null, \
				 duplicateNotice: /already (logged in|connected|in use)|duplicate login|logged in from another/i.test(body), \
				 loggedInAs: welcome ? welcome[1].trim() : null }}; }})()",
				banner = js(ERROR_BANNER),
				names = js(NAME_FIELDS),
				passwords = js(PASSWORD_FIELDS),
				guest = js(GUEST_NAME),
			),
			DomQuery::ChatInput => format!(
				"(() => {{ {visible} const el = document.querySelector({input}); \
				 return {{ present: !!el, visible: visible(el), enabled: !!el && !el.disabled && !el.readOnly }}; }})()",
				input = js(CHAT_INPUT),
			),
			DomQuery::VideoQueue => "(() => Array.from(document.querySelectorAll('#queue .queue_entry')).map((entry, i) => ({ \
				 position: i + 1, title: ((entry.querySelector('.qe_title') || {}).textContent || '').trim(), \
				 queuedBy: ((entry.getAttribute('title') || '').match(/Added by:\\s*(.+)/) || [])[1] || null, \
				 duration: ((entry.querySelector('.qe_time') || {}).textContent || '').trim() || null })))()"
				.to_string(),
			DomQuery::CurrentVideo => "(() => { const title = ((document.querySelector('#currenttitle') || {}).textContent || '').replace(/^Currently Playing:\\s*/, '').trim(); \
				 if (!title) return null; const video = document.querySelector('#videowrap video'); \
				 return { title, currentTime: video ? video.currentTime : null, duration: video && isFinite(video.duration) ? video.duration : null, paused: video ? video.paused : true }; })()"
				.to_string(),
			DomQuery::BlockingPopups => format!("(() => {{ {visible} {controls} return controls().length; }})()", controls = popup_controls_fn()),
		}
	}
}

impl DomAction {
	/// Script performing the action, or `None` for input-level actions.
	pub fn script(&self) -> Option<String> {
		let script = match self {
			DomAction::CheckRemember => format!(
				"(() => {{ const box = document.querySelector({remember}); if (box && !box.checked) box.click(); return true; }})()",
				remember = js(CONSENT_REMEMBER),
			),
			DomAction::AcceptConsent => format!(
				"(() => {{ const allow = document.querySelector({allow}); if (!allow) throw new Error('consent control missing'); allow.click(); return true; }})()",
				allow = js(CONSENT_ALLOW),
			),
			DomAction::FillCredentials { identity, secret } => format!(
				"(() => {{ const pw = document.querySelector({passwords}); if (!pw) throw new Error('password field missing'); \
				 const form = pw.form || document; const name = form.querySelector({names}) || document.querySelector({names}); \
				 if (!name) throw new Error('name field missing'); \
				 const set = (el, v) => {{ el.focus(); el.value = v; el.dispatchEvent(new Event('input', {{ bubbles: true }})); el.dispatchEvent(new Event('change', {{ bubbles: true }})); }}; \
				 set(name, {identity}); set(pw, {secret}); \
				 const submit = form.querySelector('#login, button[type=\"submit\"], input[type=\"submit\"]'); \
				 if (submit) submit.click(); else if (pw.form) pw.form.submit(); return true; }})()",
				passwords = js(PASSWORD_FIELDS),
				names = js(NAME_FIELDS),
				identity = js(identity),
				secret = js(secret),
			),
			DomAction::GuestLogin { name } => format!(
				"(() => {{ const field = document.querySelector({guest}); if (!field) throw new Error('guest field missing'); \
				 field.focus(); field.value = {name}; field.dispatchEvent(new Event('input', {{ bubbles: true }})); \
				 const button = document.querySelector('#guestlogin button'); \
				 if (button) button.click(); else field.dispatchEvent(new KeyboardEvent('keydown', {{ key: 'Enter', keyCode: 13, which: 13, bubbles: true }})); return true; }})()",
				guest = js(GUEST_NAME),
				name = js(name),
			),
			DomAction::FillChat { text } => format!(
				"(() => {{ const el = document.querySelector({input}); if (!el || el.disabled) throw new Error('chat input unavailable'); \
				 el.focus(); el.value = {text}; el.dispatchEvent(new Event('input', {{ bubbles: true }})); return true; }})()",
				input = js(CHAT_INPUT),
				text = js(text),
			),
			DomAction::PressEnter => return None,
			DomAction::Logout => "(() => { const link = document.querySelector('a[href*=\"logout\"]'); if (link) { link.click(); return true; } return false; })()".to_string(),
			DomAction::DismissPopup => format!(
				"(() => {{ {visible} {controls} const first = controls()[0]; if (!first) throw new Error('no popup control'); first.click(); return true; }})()",
				visible = visible_fn(),
				controls = popup_controls_fn(),
			),
			DomAction::SuppressMotd => format!(
				"(() => {{ if (document.getElementById({id})) return true; const style = document.createElement('style'); \
				 style.id = {id}; style.textContent = {css}; (document.head || document.documentElement).appendChild(style); return true; }})()",
				id = js(MOTD_STYLE_ID),
				css = js(MOTD_CSS),
			),
		};
		Some(script)
	}
}

/// One transcript line as rendered.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RawLine {
	#[serde(default)]
	pub classes: String,
	pub text: String,
}

/// One presence roster entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RosterEntry {
	pub name: String,
	#[serde(default)]
	pub guest: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ConsentPromptState {
	pub present: bool,
	pub visible: bool,
	/// A "remember this choice" control is offered and unticked.
	#[serde(default)]
	pub remember: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthFormState {
	pub name_fields: usize,
	pub password_fields: usize,
	pub guest_field: bool,
	pub error_banner: Option<String>,
	pub duplicate_notice: bool,
	pub logged_in_as: Option<String>,
}

impl AuthFormState {
	/// More than one candidate field means the shared page is ambiguous.
	pub fn is_ambiguous(&self) -> bool {
		self.name_fields > 1 || self.password_fields > 1
	}

	pub fn has_credential_fields(&self) -> bool {
		self.name_fields > 0 && self.password_fields > 0
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ChatInputState {
	pub present: bool,
	pub visible: bool,
	pub enabled: bool,
}

impl ChatInputState {
	pub fn is_usable(&self) -> bool {
		self.present && self.visible && self.enabled
	}
}

fn decode<T: serde::de::DeserializeOwned>(query: &DomQuery, value: Value) -> Result<T> {
	serde_json::from_value(value).map_err(|e| ClientError::Script(format!("unexpected result for {query:?}: {e}")))
}

async fn run<T: serde::de::DeserializeOwned>(surface: &dyn Surface, query: DomQuery) -> Result<T> {
	let value = surface.query(&query).await?;
	decode(&query, value)
}

/// Trailing transcript lines; `None` when the transcript container is missing.
pub async fn transcript(surface: &dyn Surface, limit: usize) -> Result<Option<Vec<RawLine>>> {
	run(surface, DomQuery::Transcript { limit }).await
}

pub async fn transcript_present(surface: &dyn Surface) -> Result<bool> {
	run(surface, DomQuery::TranscriptPresent).await
}

pub async fn roster(surface: &dyn Surface) -> Result<Vec<RosterEntry>> {
	run(surface, DomQuery::Roster).await
}

pub async fn consent_prompt(surface: &dyn Surface) -> Result<ConsentPromptState> {
	run(surface, DomQuery::ConsentPrompt).await
}

pub async fn auth_form(surface: &dyn Surface) -> Result<AuthFormState> {
	run(surface, DomQuery::AuthForm).await
}

pub async fn chat_input(surface: &dyn Surface) -> Result<ChatInputState> {
	run(surface, DomQuery::ChatInput).await
}

pub async fn video_queue(surface: &dyn Surface) -> Result<Vec<QueuedVideo>> {
	run(surface, DomQuery::VideoQueue).await
}

pub async fn current_video(surface: &dyn Surface) -> Result<Option<CurrentVideo>> {
	run(surface, DomQuery::CurrentVideo).await
}

pub async fn blocking_popups(surface: &dyn Surface) -> Result<usize> {
	run(surface, DomQuery::BlockingPopups).await
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn user_text_is_embedded_as_string_literal() {
		let script = DomAction::FillChat {
			text: "it's \"quoted\" </script>".into(),
		}
		.script()
		.unwrap();
		assert!(script.contains(r#"el.value = "it's \"quoted\" </script>""#));
	}

	#[test]
	fn popup_scripts_skip_the_chat_controls() {
		let query = DomQuery::BlockingPopups.script();
		let dismiss = DomAction::DismissPopup.script().unwrap();
		for script in [&query, &dismiss] {
			assert!(script.contains("data-dismiss"));
			assert!(script.contains("#chatwrap"));
		}
		assert!(DomAction::SuppressMotd.script().unwrap().contains("#motdwrap"));
	}

	#[test]
	fn enter_is_not_a_script() {
		assert!(DomAction::PressEnter.script().is_none());
	}

	#[test]
	fn transcript_script_honours_limit() {
		assert!(DomQuery::Transcript { limit: 50 }.script().contains(".slice(-50)"));
	}

	#[test]
	fn auth_form_state_decodes_camel_case() {
		let state: AuthFormState = decode(
			&DomQuery::AuthForm,
			serde_json::json!({"nameFields": 2, "passwordFields": 1, "errorBanner": null, "duplicateNotice": false, "loggedInAs": "courier"}),
		)
		.unwrap();
		assert!(state.is_ambiguous());
		assert_eq!(state.logged_in_as.as_deref(), Some("courier"));
		assert!(!state.guest_field);
	}

	#[test]
	fn shape_mismatch_is_a_script_error() {
		let err = decode::<ChatInputState>(&DomQuery::ChatInput, serde_json::json!("nope")).unwrap_err();
		assert!(matches!(err, ClientError::Script(_)));
	}
}
