//! Image-based fallback for post-send verification.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::{ClientError, Result};
use crate::surface::Surface;
use crate::text::{IMAGE_MATCH_THRESHOLD, matches};

/// Confirms that `text` is visible on the surface by looking at pixels.
#[async_trait]
pub trait ImageVerifier: Send + Sync {
	async fn verify_by_image(&self, surface: &dyn Surface, text: &str) -> bool;
}

/// Never confirms anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopImageVerifier;

#[async_trait]
impl ImageVerifier for NoopImageVerifier {
	async fn verify_by_image(&self, _surface: &dyn Surface, _text: &str) -> bool {
		false
	}
}

/// Runs the `tesseract` CLI over a viewport screenshot.
#[derive(Debug, Clone)]
pub struct TesseractVerifier {
	binary: PathBuf,
}

impl TesseractVerifier {
	/// Locates `tesseract` on `PATH`.
	pub fn discover() -> Option<Self> {
		which::which("tesseract").ok().map(Self::with_binary)
	}

	pub fn with_binary(binary: PathBuf) -> Self {
		Self { binary }
	}

	async fn recognize(&self, png: &[u8]) -> Result<String> {
		let mut child = tokio::process::Command::new(&self.binary)
			.args(["stdin", "stdout"])
			.stdin(Stdio::piped())
			.stdout(Stdio::piped())
			.stderr(Stdio::null())
			.spawn()?;
		if let Some(mut stdin) = child.stdin.take() {
			stdin.write_all(png).await?;
		}
		let output = child.wait_with_output().await?;
		if !output.status.success() {
			return Err(ClientError::Unverified(format!("tesseract exited with {}", output.status)));
		}
		Ok(String::from_utf8_lossy(&output.stdout).into_owned())
	}
}

#[async_trait]
impl ImageVerifier for TesseractVerifier {
	async fn verify_by_image(&self, surface: &dyn Surface, text: &str) -> bool {
		let png = match surface.screenshot().await {
			Ok(png) => png,
			Err(e) => {
				warn!(target = "livechat.outbound", error = %e, "screenshot for verification failed");
				return false;
			}
		};
		match self.recognize(&png).await {
			Ok(recognized) => {
				let found = matches(text, &recognized, IMAGE_MATCH_THRESHOLD);
				debug!(target = "livechat.outbound", found, chars = recognized.len(), "image verification");
				found
			}
			Err(e) => {
				warn!(target = "livechat.outbound", error = %e, "image recognition failed");
				false
			}
		}
	}
}
