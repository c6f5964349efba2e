mod support;

use livechat::dom::DomAction;
use std::time::Duration;

use livechat::{ClientEvent, CurrentVideo, EchoStats, QueuePosition, QueuedVideo, SessionState, Surface, Verification};
use support::{Harness, IDENTITY, advance};

fn filled(harness: &Harness) -> Vec<String> {
	harness.launcher.page(|page| {
		page.actions
			.iter()
			.filter_map(|action| match action {
				DomAction::FillChat { text } => Some(text.clone()),
				_ => None,
			})
			.collect()
	})
}

#[tokio::test(start_paused = true)]
async fn sends_are_refused_before_connect() {
	let harness = Harness::new(true);
	assert!(!harness.client.send_chat("too early").await);
	assert_eq!(harness.launcher.launches(), 0);
}

#[tokio::test(start_paused = true)]
async fn delivered_chat_is_verified_in_the_transcript() {
	let harness = Harness::connected(true).await;

	let report = harness.client.send_chat_report("good evening").await;

	assert!(report.delivered);
	assert_eq!(report.attempts, 1);
	assert_eq!(report.verification, Verification::Transcript);
	assert_eq!(filled(&harness), vec!["good evening".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn paraphrased_echo_still_verifies() {
	let harness = Harness::connected(true).await;
	harness.launcher.page(|page| page.echo_as = Some("yo whats up".into()));

	let report = harness.client.send_chat_report("yo what's up").await;

	assert!(report.delivered);
	assert_eq!(report.verification, Verification::Transcript);
}

#[tokio::test(start_paused = true)]
async fn missing_echo_is_unconfirmed_but_delivered() {
	let harness = Harness::connected(true).await;
	harness.launcher.page(|page| page.echo_chat = false);

	let report = harness.client.send_chat_report("into the void").await;

	assert!(report.delivered);
	assert_eq!(report.verification, Verification::Unconfirmed);
}

#[tokio::test(start_paused = true)]
async fn echo_arriving_after_the_verify_window_is_confirmed_by_capture() {
	let harness = Harness::connected(true).await;
	harness.launcher.page(|page| page.echo_chat = false);

	let report = harness.client.send_chat_report("yo what's up").await;
	assert_eq!(report.verification, Verification::Unconfirmed);
	assert_eq!(harness.client.echo_stats().pending, 1);

	tokio::time::sleep(Duration::from_millis(1500)).await;
	harness.launcher.page(|page| page.say(IDENTITY, "yo whats up"));
	advance(10).await;

	assert_eq!(
		harness.client.echo_stats(),
		EchoStats {
			pending: 0,
			late_verified: 1,
			expired: 0
		}
	);
}

#[tokio::test(start_paused = true)]
async fn repeated_text_is_not_confirmed_by_the_earlier_line() {
	let harness = Harness::connected(true).await;

	let first = harness.client.send_chat_report("hello there friend").await;
	assert_eq!(first.verification, Verification::Transcript);

	harness.launcher.page(|page| page.echo_chat = false);
	let second = harness.client.send_chat_report("hello there friend").await;
	assert!(second.delivered);
	assert_eq!(second.verification, Verification::Unconfirmed);

	advance(16).await;
	let stats = harness.client.echo_stats();
	assert_eq!(stats.late_verified, 0);
	assert_eq!(stats.expired, 1);
	assert_eq!(stats.pending, 0);
}

#[tokio::test(start_paused = true)]
async fn swallowed_submissions_are_retried() {
	let harness = Harness::connected(true).await;
	harness.launcher.page(|page| page.failing_submits = 2);

	let report = harness.client.send_chat_report("third time lucky").await;

	assert!(report.delivered);
	assert_eq!(report.attempts, 3);
	harness.launcher.page(|page| assert_eq!(page.chat_submissions(), 3));
}

#[tokio::test(start_paused = true)]
async fn delivery_gives_up_after_three_attempts() {
	let mut harness = Harness::connected(true).await;
	harness.drain();
	harness.launcher.page(|page| page.failing_submits = 10);

	let start = tokio::time::Instant::now();
	let report = harness.client.send_chat_report("never lands").await;

	assert!(!report.delivered);
	assert_eq!(report.attempts, 3);
	let retry_delay = Duration::from_millis(harness.client.config().timings.retry_delay_ms);
	assert!(start.elapsed() >= retry_delay * 2);
	assert_eq!(report.verification, Verification::Skipped);
	harness.launcher.page(|page| assert_eq!(page.chat_submissions(), 3));
	assert!(harness.drain().iter().any(|event| matches!(event, ClientEvent::Error { .. })));
	assert_eq!(harness.client.state(), SessionState::Active);
}

#[tokio::test(start_paused = true)]
async fn failed_send_does_not_delay_the_next_one() {
	let harness = Harness::connected(true).await;
	advance(1).await;
	harness.launcher.page(|page| page.failing_submits = 3);
	assert!(!harness.client.send_chat("lost").await);

	let start = tokio::time::Instant::now();
	assert!(harness.client.send_chat("found").await);
	let min_send_delay = Duration::from_millis(harness.client.config().timings.min_send_delay_ms);
	assert!(start.elapsed() < min_send_delay);
}

#[tokio::test(start_paused = true)]
async fn unusable_input_fails_without_side_effects() {
	let harness = Harness::connected(true).await;
	harness.launcher.page(|page| page.chat_input.enabled = false);

	assert!(!harness.client.send_chat("muted").await);

	assert!(filled(&harness).is_empty());
	harness.launcher.page(|page| assert_eq!(page.chat_submissions(), 0));
}

#[tokio::test(start_paused = true)]
async fn commands_are_typed_into_the_chat_input() {
	let harness = Harness::connected(true).await;

	assert!(harness.client.send_pm("ada", "psst").await);
	assert!(harness.client.queue_video("https://youtu.be/dQw4w9WgXcQ", QueuePosition::Next).await);
	assert!(harness.client.queue_video("https://youtu.be/9bZkp7q19f0", QueuePosition::End).await);

	assert_eq!(
		filled(&harness),
		vec![
			"/pm ada psst".to_string(),
			"/queue next https://youtu.be/dQw4w9WgXcQ".to_string(),
			"/queue end https://youtu.be/9bZkp7q19f0".to_string(),
		]
	);
}

#[tokio::test(start_paused = true)]
async fn playlist_reads_return_page_state() {
	let harness = Harness::with_page(true, |page| {
		page.queue = vec![QueuedVideo {
			position: 1,
			title: "Lo-fi beats".into(),
			queued_by: Some("ada".into()),
			duration: Some("1:02:03".into()),
		}];
		page.now_playing = Some(CurrentVideo {
			title: "Opening act".into(),
			current_time: Some(42.5),
			duration: Some(180.0),
			paused: false,
		});
	});
	harness.client.connect().await.unwrap();

	let queue = harness.client.get_video_queue().await.unwrap();
	assert_eq!(queue.len(), 1);
	assert_eq!(queue[0].queued_by.as_deref(), Some("ada"));
	let current = harness.client.get_current_video().await.unwrap().unwrap();
	assert_eq!(current.title, "Opening act");
	assert!(!current.paused);
}

#[tokio::test(start_paused = true)]
async fn surface_closing_mid_send_recovers_once_and_capture_resumes() {
	let mut harness = Harness::connected(true).await;
	advance(1).await;
	harness.drain();
	harness.launcher.page(|page| page.close_on_submit = true);

	assert!(!harness.client.send_chat("are you there").await);
	advance(2).await;

	let stats = harness.client.recovery_stats();
	assert_eq!(stats.sequences, 1);
	assert_eq!(stats.recreated, 1);
	assert_eq!(harness.client.state(), SessionState::Active);
	assert_eq!(harness.launcher.launches(), 1);
	let surfaces = harness.launcher.latest_container().unwrap().surfaces();
	assert_eq!(surfaces.len(), 2);
	assert!(surfaces[0].is_closed());

	harness.drain();
	harness.launcher.page(|page| page.say("ada", "welcome back"));
	advance(6).await;
	assert_eq!(harness.chats(), vec![("ada".to_string(), "welcome back".to_string())]);
	assert!(harness.client.send_chat("still here").await);
}
