//! Browser executable discovery.

use std::path::{Path, PathBuf};

/// Resolves the browser to launch.
///
/// An explicit path wins when it exists; otherwise well-known install
/// locations and `PATH` commands are tried in order.
pub fn find_browser_executable(explicit: Option<&Path>) -> Option<PathBuf> {
	if let Some(path) = explicit {
		return path.exists().then(|| path.to_path_buf()).or_else(|| which::which(path).ok());
	}

	for candidate in browser_candidates() {
		if candidate.starts_with('/') || candidate.contains('\\') || candidate.contains(':') {
			if Path::new(&candidate).exists() {
				return Some(PathBuf::from(candidate));
			}
		} else if let Ok(path) = which::which(&candidate) {
			return Some(path);
		}
	}

	None
}

fn browser_candidates() -> Vec<String> {
	if cfg!(target_os = "macos") {
		[
			"/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
			"/Applications/Chromium.app/Contents/MacOS/Chromium",
			"/Applications/Brave Browser.app/Contents/MacOS/Brave Browser",
			"/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge",
		]
		.into_iter()
		.map(str::to_string)
		.collect()
	} else if cfg!(target_os = "windows") {
		windows_browser_candidates()
	} else {
		[
			"google-chrome-stable",
			"google-chrome",
			"chromium-browser",
			"chromium",
			"brave-browser",
			"microsoft-edge",
			"/usr/bin/google-chrome-stable",
			"/usr/bin/chromium-browser",
			"/usr/bin/chromium",
			"/snap/bin/chromium",
		]
		.into_iter()
		.map(str::to_string)
		.collect()
	}
}

fn windows_browser_candidates() -> Vec<String> {
	let mut roots: Vec<PathBuf> = ["PROGRAMFILES", "PROGRAMFILES(X86)", "LOCALAPPDATA"]
		.into_iter()
		.filter_map(|key| std::env::var(key).ok().map(PathBuf::from))
		.collect();
	if roots.is_empty() {
		roots.push(PathBuf::from(r"C:\Program Files"));
		roots.push(PathBuf::from(r"C:\Program Files (x86)"));
	}

	let suffixes: &[&[&str]] = &[
		&["Google", "Chrome", "Application", "chrome.exe"],
		&["Microsoft", "Edge", "Application", "msedge.exe"],
		&["Chromium", "Application", "chrome.exe"],
	];

	let mut candidates = Vec::new();
	for root in roots {
		for suffix in suffixes {
			let path: PathBuf = suffix.iter().fold(root.clone(), |path, component| path.join(component));
			candidates.push(path.to_string_lossy().to_string());
		}
	}
	candidates.extend(["chrome.exe", "msedge.exe", "chromium.exe"].map(str::to_string));
	candidates
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn windows_candidates_include_common_commands() {
		let candidates = windows_browser_candidates();
		assert!(candidates.contains(&"chrome.exe".to_string()));
		assert!(candidates.contains(&"msedge.exe".to_string()));
	}

	#[test]
	fn explicit_existing_path_is_used() {
		let file = tempfile::NamedTempFile::new().unwrap();
		assert_eq!(find_browser_executable(Some(file.path())), Some(file.path().to_path_buf()));
	}

	#[test]
	fn explicit_missing_path_is_rejected() {
		assert_eq!(find_browser_executable(Some(Path::new("/definitely/not/a/browser-binary"))), None);
	}
}
