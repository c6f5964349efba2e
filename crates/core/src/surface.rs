//! The controlled-browser seams.
//!
//! A [`Surface`] is one browser tab, a [`Container`] is the browser process
//! and profile hosting tabs, and a [`Launcher`] produces containers. The
//! DevTools-backed implementations live in [`crate::browser`]; tests script
//! the page through in-memory ones.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use livechat_protocol::Cookie;
use serde_json::Value;
use tokio::sync::watch;

use crate::config::ClientConfig;
use crate::dom::{DomAction, DomQuery};
use crate::error::Result;

/// One controlled browser tab.
#[async_trait]
pub trait Surface: Send + Sync {
	/// Stable identifier, unique within its container.
	fn id(&self) -> &str;

	/// Navigates and waits for the document to finish loading.
	async fn navigate(&self, url: &str, timeout: Duration) -> Result<()>;

	/// Evaluates a read-only page query and returns its JSON result.
	async fn query(&self, query: &DomQuery) -> Result<Value>;

	/// Performs a page interaction.
	async fn act(&self, action: &DomAction) -> Result<()>;

	/// Bounded round trip proving the page still executes script.
	async fn ping(&self, timeout: Duration) -> Result<()>;

	/// PNG screenshot of the viewport.
	async fn screenshot(&self) -> Result<Vec<u8>>;

	async fn cookies(&self) -> Result<Vec<Cookie>>;

	async fn set_cookies(&self, cookies: &[Cookie]) -> Result<()>;

	/// Watch that turns `true` once the browser reports the tab gone.
	fn closed(&self) -> watch::Receiver<bool>;

	fn is_closed(&self) -> bool {
		*self.closed().borrow()
	}

	async fn close(&self) -> Result<()>;
}

/// Browser process and profile hosting surfaces.
#[async_trait]
pub trait Container: Send + Sync {
	/// Opens a fresh blank surface.
	async fn open_surface(&self) -> Result<Arc<dyn Surface>>;

	/// Resolves the surface that took over after `old` reloaded or replaced itself.
	///
	/// Returns the same tab when it survived a reload, otherwise the newly
	/// created one.
	async fn replacement_for(&self, old: &str, timeout: Duration) -> Result<Arc<dyn Surface>>;

	fn is_alive(&self) -> bool;

	async fn shutdown(&self);
}

/// Starts browser containers.
#[async_trait]
pub trait Launcher: Send + Sync {
	async fn launch(&self, config: &ClientConfig) -> Result<Arc<dyn Container>>;
}
