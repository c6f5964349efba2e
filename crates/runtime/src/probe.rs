//! DevTools endpoint probing.

use std::time::Duration;

use livechat_protocol::{TargetInfo, VersionInfo};

use crate::error::{Error, Result};

const PROBE_TIMEOUT: Duration = Duration::from_millis(400);

fn http_client() -> Result<reqwest::Client> {
	reqwest::Client::builder()
		.timeout(PROBE_TIMEOUT)
		.build()
		.map_err(|e| Error::Transport(format!("Failed to create HTTP client: {e}")))
}

/// Resolves `/json/version` on `port`, trying IPv4, `localhost` and IPv6 in turn.
pub async fn fetch_version(port: u16) -> Result<VersionInfo> {
	let client = http_client()?;
	let mut last_error = "no response".to_string();

	for url in [
		format!("http://127.0.0.1:{port}/json/version"),
		format!("http://localhost:{port}/json/version"),
		format!("http://[::1]:{port}/json/version"),
	] {
		let response = match client.get(&url).send().await {
			Ok(r) => r,
			Err(e) => {
				last_error = e.to_string();
				continue;
			}
		};

		if !response.status().is_success() {
			last_error = format!("unexpected status {}", response.status());
			continue;
		}

		return response
			.json::<VersionInfo>()
			.await
			.map_err(|e| Error::Transport(format!("Failed to parse DevTools version: {e}")));
	}

	Err(Error::Transport(format!("Failed to connect to port {port}: {last_error}")))
}

/// Lists page targets via `/json/list`.
pub async fn list_targets(port: u16) -> Result<Vec<TargetInfo>> {
	let client = http_client()?;
	let response = client
		.get(format!("http://127.0.0.1:{port}/json/list"))
		.send()
		.await
		.map_err(|e| Error::Transport(e.to_string()))?;

	#[derive(serde::Deserialize)]
	struct ListEntry {
		id: String,
		#[serde(rename = "type")]
		kind: String,
		#[serde(default)]
		url: String,
	}

	let entries: Vec<ListEntry> = response.json().await.map_err(|e| Error::Transport(e.to_string()))?;
	Ok(entries
		.into_iter()
		.map(|entry| TargetInfo {
			target_id: entry.id,
			kind: entry.kind,
			url: entry.url,
			attached: false,
		})
		.collect())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn closed_port_reports_transport_error() {
		let port = crate::process::free_port().unwrap();
		match fetch_version(port).await {
			Err(Error::Transport(msg)) => assert!(msg.contains(&port.to_string())),
			other => panic!("expected transport error, got {other:?}"),
		}
	}
}
