//! DevTools-backed implementations of the browser seams.
//!
//! One [`CdpContainer`] owns a launched browser and a single browser-level
//! [`Connection`]; every [`CdpSurface`] is a page target attached in flat
//! mode and addressed by its session id on that connection.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use livechat_protocol::Cookie;
use livechat_runtime::process::free_port;
use livechat_runtime::transport::WebSocketTransport;
use livechat_runtime::{BrowserProcess, Connection, Event, LaunchOptions};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::config::ClientConfig;
use crate::dom::{DomAction, DomQuery};
use crate::error::{ClientError, Result};
use crate::surface::{Container, Launcher, Surface};

const EVAL_TIMEOUT: Duration = Duration::from_secs(10);
const READY_POLL_INTERVAL: Duration = Duration::from_millis(250);
const TARGET_POLL_INTERVAL: Duration = Duration::from_millis(250);
const BROWSER_CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Installed before any page script runs so the room sees an ordinary browser.
const AUTOMATION_MASK: &str = r#"(() => {
	Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
	Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3, 4, 5] });
	window.chrome = window.chrome || { runtime: {} };
	const query = window.navigator.permissions && window.navigator.permissions.query;
	if (query) {
		window.navigator.permissions.query = (parameters) =>
			parameters && parameters.name === 'notifications'
				? Promise.resolve({ state: Notification.permission })
				: query.call(window.navigator.permissions, parameters);
	}
})();"#;

/// Launches a local Chromium-family browser per container.
#[derive(Debug, Default, Clone)]
pub struct CdpLauncher;

impl CdpLauncher {
	pub fn new() -> Self {
		Self
	}
}

#[async_trait]
impl Launcher for CdpLauncher {
	async fn launch(&self, config: &ClientConfig) -> Result<Arc<dyn Container>> {
		let port = match config.remote_debugging_port {
			Some(port) => port,
			None => free_port()?,
		};
		let options = LaunchOptions {
			executable: config.browser_executable.clone(),
			port,
			user_data_dir: config.resolved_user_data_dir(),
			headless: config.headless,
			..LaunchOptions::default()
		};
		let process = BrowserProcess::launch(&options).await?;

		let (transport, message_rx) = WebSocketTransport::connect(process.ws_endpoint()).await?;
		let connection = Arc::new(Connection::new(transport.into_transport_parts(message_rx)));
		let runner = Arc::clone(&connection);
		tokio::spawn(async move { runner.run().await });

		let container = CdpContainer::start(Some(process), connection).await?;
		Ok(Arc::new(container))
	}
}

type Registry = Arc<Mutex<HashMap<String, Arc<CdpSurface>>>>;

/// A browser process and the page targets the client attached to.
pub struct CdpContainer {
	process: Option<BrowserProcess>,
	connection: Arc<Connection>,
	surfaces: Registry,
	listener: JoinHandle<()>,
}

impl CdpContainer {
	/// Wraps an established browser connection. `process` is `None` for browsers
	/// the client did not spawn.
	pub async fn start(process: Option<BrowserProcess>, connection: Arc<Connection>) -> Result<Self> {
		let surfaces: Registry = Arc::new(Mutex::new(HashMap::new()));
		let listener = tokio::spawn(track_targets(connection.subscribe(), connection.closed(), Arc::clone(&surfaces)));
		connection.send_message("Target.setDiscoverTargets", json!({ "discover": true }), None).await?;
		Ok(Self {
			process,
			connection,
			surfaces,
			listener,
		})
	}

	async fn attach(&self, target_id: &str) -> Result<Arc<dyn Surface>> {
		let attached = self
			.connection
			.send_message("Target.attachToTarget", json!({ "targetId": target_id, "flatten": true }), None)
			.await?;
		let session_id = attached
			.get("sessionId")
			.and_then(Value::as_str)
			.ok_or_else(|| ClientError::Script("attachToTarget returned no sessionId".into()))?;

		let surface = Arc::new(CdpSurface::new(target_id, session_id, Arc::clone(&self.connection)));
		surface.prepare().await?;
		self.surfaces.lock().insert(target_id.to_string(), Arc::clone(&surface));
		debug!(target = "livechat.cdp", target_id, session_id, "attached to page target");
		Ok(surface)
	}

	fn open_surface_ids(&self) -> Vec<String> {
		self.surfaces.lock().keys().cloned().collect()
	}
}

/// Marks surfaces closed as the browser reports their targets gone.
async fn track_targets(mut events: broadcast::Receiver<Event>, mut closed: watch::Receiver<bool>, surfaces: Registry) {
	loop {
		tokio::select! {
			event = events.recv() => match event {
				Ok(event) => handle_target_event(&event, &surfaces),
				Err(broadcast::error::RecvError::Lagged(skipped)) => warn!(target = "livechat.cdp", skipped, "target event listener lagged"),
				Err(broadcast::error::RecvError::Closed) => break,
			},
			changed = closed.changed() => {
				if changed.is_err() || *closed.borrow() {
					break;
				}
			}
		}
	}
	for (_, surface) in surfaces.lock().drain() {
		surface.mark_closed();
	}
	debug!(target = "livechat.cdp", "browser connection ended");
}

fn handle_target_event(event: &Event, surfaces: &Registry) {
	let gone = match event.method.as_str() {
		"Target.targetDestroyed" | "Target.targetCrashed" | "Target.detachedFromTarget" => event.params.get("targetId").and_then(Value::as_str).map(str::to_string),
		"Inspector.detached" => {
			let session = event.session_id.as_deref();
			surfaces.lock().values().find(|surface| Some(surface.session_id.as_str()) == session).map(|surface| surface.target_id.clone())
		}
		_ => None,
	};
	if let Some(target_id) = gone {
		if let Some(surface) = surfaces.lock().remove(&target_id) {
			info!(target = "livechat.cdp", target_id = %target_id, reason = %event.method, "surface gone");
			surface.mark_closed();
		}
	}
}

#[async_trait]
impl Container for CdpContainer {
	async fn open_surface(&self) -> Result<Arc<dyn Surface>> {
		let created = self.connection.send_message("Target.createTarget", json!({ "url": "about:blank" }), None).await?;
		let target_id = created
			.get("targetId")
			.and_then(Value::as_str)
			.ok_or_else(|| ClientError::Script("createTarget returned no targetId".into()))?
			.to_string();
		self.attach(&target_id).await
	}

	async fn replacement_for(&self, old: &str, timeout: Duration) -> Result<Arc<dyn Surface>> {
		let survivor = self.surfaces.lock().get(old).filter(|surface| !surface.is_closed()).cloned();
		if let Some(surface) = survivor {
			return Ok(surface);
		}

		let deadline = Instant::now() + timeout;
		while Instant::now() < deadline {
			let targets = self.connection.send_message("Target.getTargets", json!({}), None).await?;
			let known = self.open_surface_ids();
			let fresh = targets
				.get("targetInfos")
				.and_then(Value::as_array)
				.into_iter()
				.flatten()
				.filter(|info| info.get("type").and_then(Value::as_str) == Some("page"))
				.filter_map(|info| info.get("targetId").and_then(Value::as_str))
				.find(|id| *id != old && !known.iter().any(|k| k == id))
				.map(str::to_string);
			if let Some(target_id) = fresh {
				info!(target = "livechat.cdp", old, new = %target_id, "found replacement page target");
				return self.attach(&target_id).await;
			}
			tokio::time::sleep(TARGET_POLL_INTERVAL).await;
		}

		debug!(target = "livechat.cdp", old, "no replacement target appeared, opening a new one");
		self.open_surface().await
	}

	fn is_alive(&self) -> bool {
		let running = self.process.as_ref().is_none_or(|process| process.is_running());
		running && !self.connection.is_closed()
	}

	async fn shutdown(&self) {
		if !self.connection.is_closed() {
			if let Err(e) = self.connection.send_with_timeout("Browser.close", json!({}), None, BROWSER_CLOSE_TIMEOUT).await {
				debug!(target = "livechat.cdp", error = %e, "Browser.close failed");
			}
		}
		if let Some(process) = &self.process {
			process.kill();
		}
		for (_, surface) in self.surfaces.lock().drain() {
			surface.mark_closed();
		}
	}
}

impl Drop for CdpContainer {
	fn drop(&mut self) {
		self.listener.abort();
	}
}

/// A page target attached over the browser connection.
pub struct CdpSurface {
	target_id: String,
	session_id: String,
	connection: Arc<Connection>,
	closed: watch::Sender<bool>,
}

impl CdpSurface {
	fn new(target_id: &str, session_id: &str, connection: Arc<Connection>) -> Self {
		let (closed, _) = watch::channel(false);
		Self {
			target_id: target_id.to_string(),
			session_id: session_id.to_string(),
			connection,
			closed,
		}
	}

	fn mark_closed(&self) {
		self.closed.send_replace(true);
	}

	fn ensure_open(&self) -> Result<()> {
		if *self.closed.borrow() || self.connection.is_closed() {
			return Err(ClientError::SurfaceClosed);
		}
		Ok(())
	}

	async fn call(&self, method: &str, params: Value) -> Result<Value> {
		self.ensure_open()?;
		Ok(self.connection.send_message(method, params, Some(&self.session_id)).await?)
	}

	/// Enables the domains the client listens on and masks automation markers for every future document.
	async fn prepare(&self) -> Result<()> {
		self.call("Page.enable", json!({})).await?;
		self.call("Runtime.enable", json!({})).await?;
		self.call("Page.addScriptToEvaluateOnNewDocument", json!({ "source": AUTOMATION_MASK })).await?;
		Ok(())
	}

	async fn evaluate(&self, expression: &str, timeout: Duration) -> Result<Value> {
		self.ensure_open()?;
		let result = self
			.connection
			.send_with_timeout(
				"Runtime.evaluate",
				json!({ "expression": expression, "returnByValue": true, "awaitPromise": true }),
				Some(&self.session_id),
				timeout,
			)
			.await?;
		if let Some(details) = result.get("exceptionDetails") {
			let message = details
				.pointer("/exception/description")
				.or_else(|| details.get("text"))
				.and_then(Value::as_str)
				.unwrap_or("script threw");
			return Err(ClientError::Script(message.to_string()));
		}
		Ok(result.pointer("/result/value").cloned().unwrap_or(Value::Null))
	}

	async fn press_enter(&self) -> Result<()> {
		for kind in ["keyDown", "keyUp"] {
			let mut params = json!({
				"type": kind,
				"key": "Enter",
				"code": "Enter",
				"windowsVirtualKeyCode": 13,
				"nativeVirtualKeyCode": 13,
			});
			if kind == "keyDown" {
				params["text"] = json!("\r");
			}
			self.call("Input.dispatchKeyEvent", params).await?;
		}
		Ok(())
	}
}

#[async_trait]
impl Surface for CdpSurface {
	fn id(&self) -> &str {
		&self.target_id
	}

	async fn navigate(&self, url: &str, timeout: Duration) -> Result<()> {
		self.ensure_open()?;
		let deadline = Instant::now() + timeout;
		let navigated = self
			.connection
			.send_with_timeout("Page.navigate", json!({ "url": url }), Some(&self.session_id), timeout)
			.await?;
		if let Some(error) = navigated.get("errorText").and_then(Value::as_str).filter(|text| !text.is_empty()) {
			return Err(ClientError::Navigation {
				url: url.to_string(),
				attempts: 1,
				message: error.to_string(),
			});
		}

		loop {
			let remaining = deadline.saturating_duration_since(Instant::now());
			if remaining.is_zero() {
				return Err(ClientError::Timeout(format!("{url} did not finish loading within {}ms", timeout.as_millis())));
			}
			match self.evaluate("document.readyState", remaining.min(EVAL_TIMEOUT)).await {
				Ok(Value::String(state)) if state == "complete" => {
					trace!(target = "livechat.cdp", url, "document complete");
					return Ok(());
				}
				Err(e) if e.is_surface_closed() => return Err(e),
				// The old document's context disappears mid-navigation.
				_ => {}
			}
			tokio::time::sleep(READY_POLL_INTERVAL.min(remaining)).await;
		}
	}

	async fn query(&self, query: &DomQuery) -> Result<Value> {
		self.evaluate(&query.script(), EVAL_TIMEOUT).await
	}

	async fn act(&self, action: &DomAction) -> Result<()> {
		let Some(script) = action.script() else {
			return self.press_enter().await;
		};
		let value = self.evaluate(&script, EVAL_TIMEOUT).await?;
		if value == Value::Bool(false) {
			return Err(ClientError::Script(format!("{action:?} found nothing to act on")));
		}
		Ok(())
	}

	async fn ping(&self, timeout: Duration) -> Result<()> {
		self.evaluate("1", timeout).await.map(|_| ())
	}

	async fn screenshot(&self) -> Result<Vec<u8>> {
		let shot = self.call("Page.captureScreenshot", json!({ "format": "png" })).await?;
		let data = shot
			.get("data")
			.and_then(Value::as_str)
			.ok_or_else(|| ClientError::Script("captureScreenshot returned no data".into()))?;
		base64::engine::general_purpose::STANDARD
			.decode(data)
			.map_err(|e| ClientError::Script(format!("screenshot is not base64: {e}")))
	}

	async fn cookies(&self) -> Result<Vec<Cookie>> {
		self.ensure_open()?;
		let result = self.connection.send_message("Storage.getCookies", json!({}), None).await?;
		let cookies = result.get("cookies").cloned().unwrap_or_else(|| json!([]));
		Ok(serde_json::from_value(cookies)?)
	}

	async fn set_cookies(&self, cookies: &[Cookie]) -> Result<()> {
		self.ensure_open()?;
		self.connection.send_message("Storage.setCookies", json!({ "cookies": cookies }), None).await?;
		Ok(())
	}

	fn closed(&self) -> watch::Receiver<bool> {
		self.closed.subscribe()
	}

	async fn close(&self) -> Result<()> {
		if *self.closed.borrow() {
			return Ok(());
		}
		self.mark_closed();
		if self.connection.is_closed() {
			return Ok(());
		}
		self.connection.send_message("Target.closeTarget", json!({ "targetId": self.target_id }), None).await?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use livechat_runtime::fake_transport::FakeTransportBuilder;

	use super::*;

	async fn connected() -> (Arc<Connection>, livechat_runtime::fake_transport::FakeTransportController) {
		let (parts, controller) = FakeTransportBuilder::new().build();
		let connection = Arc::new(Connection::new(parts));
		let runner = Arc::clone(&connection);
		tokio::spawn(async move { runner.run().await });
		(connection, controller)
	}

	#[tokio::test]
	async fn evaluate_surfaces_exceptions_as_script_errors() {
		let (connection, controller) = connected().await;
		let surface = CdpSurface::new("T1", "S1", connection);

		let pending = tokio::spawn(async move { surface.query(&DomQuery::TranscriptPresent).await });
		let sent = loop {
			let sent = controller.take_sent().await;
			if !sent.is_empty() {
				break sent;
			}
			tokio::task::yield_now().await;
		};
		assert_eq!(sent[0]["method"], "Runtime.evaluate");
		assert_eq!(sent[0]["sessionId"], "S1");
		controller.inject_response(
			sent[0]["id"].as_u64().unwrap(),
			json!({ "result": { "type": "object" }, "exceptionDetails": { "text": "Uncaught", "exception": { "description": "ReferenceError: x" } } }),
		);

		let err = pending.await.unwrap().unwrap_err();
		assert!(matches!(err, ClientError::Script(ref msg) if msg.contains("ReferenceError")));
	}

	#[tokio::test]
	async fn prepared_surface_masks_automation_on_new_documents() {
		let (connection, controller) = connected().await;
		let surface = CdpSurface::new("T1", "S1", connection);
		let pending = tokio::spawn(async move { surface.prepare().await });

		let mut methods = Vec::new();
		while methods.len() < 3 {
			for message in controller.take_sent().await {
				controller.inject_response(message["id"].as_u64().unwrap(), json!({}));
				if message["method"] == "Page.addScriptToEvaluateOnNewDocument" {
					let source = message["params"]["source"].as_str().unwrap();
					assert!(source.contains("webdriver"));
					assert!(source.contains("window.chrome"));
				}
				methods.push(message["method"].as_str().unwrap().to_string());
			}
			tokio::task::yield_now().await;
		}

		pending.await.unwrap().unwrap();
		assert_eq!(methods, ["Page.enable", "Runtime.enable", "Page.addScriptToEvaluateOnNewDocument"]);
	}

	#[tokio::test]
	async fn destroyed_target_closes_the_surface() {
		let (connection, controller) = connected().await;
		let surfaces: Registry = Arc::new(Mutex::new(HashMap::new()));
		let surface = Arc::new(CdpSurface::new("T1", "S1", Arc::clone(&connection)));
		surfaces.lock().insert("T1".into(), Arc::clone(&surface));
		let listener = tokio::spawn(track_targets(connection.subscribe(), connection.closed(), Arc::clone(&surfaces)));

		let mut closed = surface.closed();
		controller.inject_event("Target.targetDestroyed", json!({ "targetId": "T1" }), None);
		tokio::time::timeout(Duration::from_secs(1), closed.wait_for(|c| *c)).await.unwrap().unwrap();
		assert!(surface.is_closed());
		assert!(surfaces.lock().is_empty());
		listener.abort();
	}

	#[tokio::test]
	async fn closed_surface_refuses_commands() {
		let (connection, _controller) = connected().await;
		let surface = CdpSurface::new("T1", "S1", connection);
		surface.mark_closed();
		assert!(matches!(surface.ping(Duration::from_millis(50)).await, Err(ClientError::SurfaceClosed)));
	}
}
