//! Browser process launch.

use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use livechat_protocol::VersionInfo;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::finder::find_browser_executable;
use crate::probe::fetch_version;

const ENDPOINT_POLL_INTERVAL: Duration = Duration::from_millis(200);
const ENDPOINT_POLL_ATTEMPTS: usize = 25;

/// Options for launching a controlled browser.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
	/// Browser binary; discovered when `None`.
	pub executable: Option<PathBuf>,
	pub port: u16,
	/// Profile directory. Reusing it keeps cookies and site data across runs.
	pub user_data_dir: Option<PathBuf>,
	pub headless: bool,
	pub window_size: (u32, u32),
	pub extra_args: Vec<String>,
}

impl Default for LaunchOptions {
	fn default() -> Self {
		Self {
			executable: None,
			port: 9222,
			user_data_dir: None,
			headless: true,
			window_size: (800, 600),
			extra_args: Vec::new(),
		}
	}
}

impl LaunchOptions {
	/// Command-line flags passed to the browser.
	pub fn args(&self) -> Vec<String> {
		let mut args = vec![
			format!("--remote-debugging-port={}", self.port),
			"--no-first-run".to_string(),
			"--no-default-browser-check".to_string(),
			format!("--window-size={},{}", self.window_size.0, self.window_size.1),
			"--disable-blink-features=AutomationControlled".to_string(),
			// Hidden windows must keep running timers or the chat stream stalls.
			"--disable-background-timer-throttling".to_string(),
			"--disable-backgrounding-occluded-windows".to_string(),
			"--disable-renderer-backgrounding".to_string(),
			"--disable-dev-shm-usage".to_string(),
		];
		if let Some(dir) = &self.user_data_dir {
			args.push(format!("--user-data-dir={}", dir.display()));
		}
		if self.headless {
			args.push("--headless=new".to_string());
		}
		args.extend(self.extra_args.iter().cloned());
		args
	}
}

/// A launched browser with a reachable DevTools endpoint.
#[derive(Debug)]
pub struct BrowserProcess {
	child: Mutex<Child>,
	port: u16,
	version: VersionInfo,
}

impl BrowserProcess {
	/// Spawns the browser and waits for its DevTools endpoint.
	pub async fn launch(options: &LaunchOptions) -> Result<Self> {
		let executable = find_browser_executable(options.executable.as_deref()).ok_or_else(|| {
			Error::Launch(
				"Could not find a Chrome/Chromium executable. \
				 Install one or set `browserExecutable` in the config."
					.into(),
			)
		})?;

		if let Some(dir) = &options.user_data_dir {
			std::fs::create_dir_all(dir)?;
		}

		let mut cmd = Command::new(&executable);
		cmd.args(options.args()).stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::null());

		#[cfg(unix)]
		std::os::unix::process::CommandExt::process_group(&mut cmd, 0);

		let mut child = cmd
			.spawn()
			.map_err(|e| Error::Launch(format!("Failed to launch browser at {}: {e}", executable.display())))?;
		debug!(target = "livechat.cdp", pid = child.id(), executable = %executable.display(), port = options.port, "browser spawned");

		let mut last_error = "endpoint not reachable".to_string();
		for _ in 0..ENDPOINT_POLL_ATTEMPTS {
			tokio::time::sleep(ENDPOINT_POLL_INTERVAL).await;

			if let Ok(Some(status)) = child.try_wait() {
				return Err(Error::Launch(format!(
					"Browser exited before the debugging endpoint became available (status: {status})"
				)));
			}

			match fetch_version(options.port).await {
				Ok(version) => {
					info!(target = "livechat.cdp", port = options.port, browser = ?version.browser, "browser ready");
					return Ok(Self {
						child: Mutex::new(child),
						port: options.port,
						version,
					});
				}
				Err(e) => last_error = e.to_string(),
			}
		}

		let _ = child.kill();
		let _ = child.wait();
		Err(Error::Launch(format!(
			"Browser launched but debugging endpoint not available on port {}. Last error: {last_error}",
			options.port
		)))
	}

	pub fn pid(&self) -> u32 {
		self.child.lock().id()
	}

	pub fn port(&self) -> u16 {
		self.port
	}

	/// Browser-level WebSocket endpoint.
	pub fn ws_endpoint(&self) -> &str {
		&self.version.web_socket_debugger_url
	}

	pub fn version(&self) -> &VersionInfo {
		&self.version
	}

	/// Returns `false` once the process has exited.
	pub fn is_running(&self) -> bool {
		matches!(self.child.lock().try_wait(), Ok(None))
	}

	/// Terminates the process and reaps it.
	pub fn kill(&self) {
		let mut child = self.child.lock();
		if let Ok(None) = child.try_wait() {
			if let Err(e) = child.kill() {
				warn!(target = "livechat.cdp", error = %e, "failed to kill browser");
			}
			let _ = child.wait();
		}
	}
}

impl Drop for BrowserProcess {
	fn drop(&mut self) {
		self.kill();
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn headless_launch_args() {
		let options = LaunchOptions {
			port: 9333,
			user_data_dir: Some(PathBuf::from("/tmp/profile")),
			..LaunchOptions::default()
		};
		let args = options.args();
		assert!(args.contains(&"--remote-debugging-port=9333".to_string()));
		assert!(args.contains(&"--user-data-dir=/tmp/profile".to_string()));
		assert!(args.contains(&"--headless=new".to_string()));
		assert!(args.contains(&"--window-size=800,600".to_string()));
		assert!(args.contains(&"--disable-background-timer-throttling".to_string()));
	}

	#[test]
	fn headed_launch_omits_headless_flag() {
		let options = LaunchOptions {
			headless: false,
			extra_args: vec!["--mute-audio".into()],
			..LaunchOptions::default()
		};
		let args = options.args();
		assert!(!args.iter().any(|arg| arg.starts_with("--headless")));
		assert_eq!(args.last().map(String::as_str), Some("--mute-audio"));
	}

	#[tokio::test]
	async fn missing_executable_fails_fast() {
		let options = LaunchOptions {
			executable: Some(PathBuf::from("/definitely/not/a/browser-binary")),
			..LaunchOptions::default()
		};
		assert!(matches!(BrowserProcess::launch(&options).await, Err(Error::Launch(_))));
	}
}
