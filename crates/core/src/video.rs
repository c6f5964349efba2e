//! Shared-playlist and player state read from the room.

use serde::{Deserialize, Serialize};

/// One playlist entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedVideo {
	/// 1-based position in the playlist.
	pub position: u32,
	pub title: String,
	#[serde(default)]
	pub queued_by: Option<String>,
	/// Display duration as rendered, e.g. `"03:21"`.
	#[serde(default)]
	pub duration: Option<String>,
}

/// What the room's player is showing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentVideo {
	pub title: String,
	/// Seconds into the video.
	#[serde(default)]
	pub current_time: Option<f64>,
	/// Total seconds; absent for live streams.
	#[serde(default)]
	pub duration: Option<f64>,
	#[serde(default)]
	pub paused: bool,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn queue_entry_without_metadata() {
		let entry: QueuedVideo = serde_json::from_value(serde_json::json!({"position": 2, "title": "Intermission", "queuedBy": null})).unwrap();
		assert_eq!(entry.position, 2);
		assert_eq!(entry.queued_by, None);
		assert_eq!(entry.duration, None);
	}

	#[test]
	fn current_video_round_trips_camel_case() {
		let video = CurrentVideo {
			title: "Night Drive".into(),
			current_time: Some(12.5),
			duration: Some(300.0),
			paused: false,
		};
		let json = serde_json::to_value(&video).unwrap();
		assert_eq!(json["currentTime"], 12.5);
	}
}
