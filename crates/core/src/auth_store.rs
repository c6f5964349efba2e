//! Persisted authentication snapshot.

use std::path::{Path, PathBuf};

use livechat_protocol::{AuthSnapshot, Cookie};
use tracing::{debug, info};

use crate::error::Result;
use crate::events::now_ms;

/// Current snapshot schema.
pub const AUTH_SNAPSHOT_SCHEMA: u32 = 1;

/// Load/save/clear facade for the on-disk cookie snapshot.
#[derive(Debug, Clone, Default)]
pub struct AuthStateStore {
	path: Option<PathBuf>,
}

impl AuthStateStore {
	/// Creates a store; `None` disables persistence.
	pub fn new(path: Option<PathBuf>) -> Self {
		Self { path }
	}

	pub fn path(&self) -> Option<&Path> {
		self.path.as_deref()
	}

	/// Loads the snapshot if present and written by a compatible schema.
	pub fn load(&self) -> Result<Option<AuthSnapshot>> {
		let Some(path) = self.path() else {
			return Ok(None);
		};
		let content = match std::fs::read_to_string(path) {
			Ok(content) => content,
			Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
			Err(err) => return Err(err.into()),
		};
		let snapshot: AuthSnapshot = serde_json::from_str(&content)?;
		if snapshot.schema != AUTH_SNAPSHOT_SCHEMA {
			debug!(target = "livechat.auth", path = %path.display(), schema = snapshot.schema, "ignoring auth snapshot with foreign schema");
			return Ok(None);
		}
		Ok(Some(snapshot))
	}

	/// Loads cookies saved for `identity`, skipping snapshots of other identities.
	pub fn load_for(&self, identity: &str) -> Result<Vec<Cookie>> {
		Ok(self
			.load()?
			.filter(|snapshot| snapshot.identity.as_deref().is_none_or(|saved| saved.eq_ignore_ascii_case(identity)))
			.map(|snapshot| snapshot.cookies)
			.unwrap_or_default())
	}

	/// Writes a snapshot of `cookies` for `identity`.
	pub fn save(&self, identity: &str, cookies: Vec<Cookie>) -> Result<()> {
		let Some(path) = self.path() else {
			return Ok(());
		};
		if let Some(parent) = path.parent() {
			std::fs::create_dir_all(parent)?;
		}
		let snapshot = AuthSnapshot {
			schema: AUTH_SNAPSHOT_SCHEMA,
			identity: Some(identity.to_string()),
			saved_at: now_ms(),
			cookies,
		};
		std::fs::write(path, serde_json::to_string_pretty(&snapshot)?)?;
		info!(target = "livechat.auth", path = %path.display(), cookies = snapshot.cookies.len(), "auth state saved");
		Ok(())
	}

	/// Removes the snapshot if present.
	pub fn clear(&self) -> Result<bool> {
		let Some(path) = self.path() else {
			return Ok(false);
		};
		match std::fs::remove_file(path) {
			Ok(()) => Ok(true),
			Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
			Err(err) => Err(err.into()),
		}
	}
}

#[cfg(test)]
mod tests {
	use tempfile::TempDir;

	use super::*;

	fn cookie(name: &str) -> Cookie {
		Cookie {
			name: name.into(),
			value: "token".into(),
			domain: Some(".chat.example".into()),
			path: Some("/".into()),
			expires: None,
			http_only: Some(true),
			secure: Some(true),
			same_site: Some("Lax".into()),
		}
	}

	#[test]
	fn save_load_clear() {
		let temp = TempDir::new().unwrap();
		let store = AuthStateStore::new(Some(temp.path().join("nested/auth.json")));

		assert!(store.load().unwrap().is_none());
		store.save("courier", vec![cookie("auth")]).unwrap();

		let snapshot = store.load().unwrap().unwrap();
		assert_eq!(snapshot.identity.as_deref(), Some("courier"));
		assert_eq!(snapshot.cookies.len(), 1);

		assert!(store.clear().unwrap());
		assert!(!store.clear().unwrap());
		assert!(store.load().unwrap().is_none());
	}

	#[test]
	fn cookies_of_another_identity_are_not_applied() {
		let temp = TempDir::new().unwrap();
		let store = AuthStateStore::new(Some(temp.path().join("auth.json")));
		store.save("someone-else", vec![cookie("auth")]).unwrap();
		assert!(store.load_for("courier").unwrap().is_empty());
		assert_eq!(store.load_for("SOMEONE-ELSE").unwrap().len(), 1);
	}

	#[test]
	fn disabled_store_is_inert() {
		let store = AuthStateStore::new(None);
		store.save("courier", vec![cookie("auth")]).unwrap();
		assert!(store.load().unwrap().is_none());
		assert!(!store.clear().unwrap());
	}
}
