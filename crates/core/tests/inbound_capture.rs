mod support;

use livechat::ClientEvent;
use support::{Harness, IDENTITY, advance};

#[tokio::test(start_paused = true)]
async fn backlog_is_primed_and_new_lines_emit_once() {
	let mut harness = Harness::with_page(true, |page| {
		page.say("ada", "this was here before");
		page.say("bob", "so was this");
	});
	harness.client.connect().await.unwrap();
	advance(1).await;
	assert!(harness.chats().is_empty());

	harness.launcher.page(|page| page.say("ada", "fresh off the press"));
	advance(6).await;
	assert_eq!(harness.chats(), vec![("ada".to_string(), "fresh off the press".to_string())]);

	advance(12).await;
	assert!(harness.chats().is_empty());
}

#[tokio::test(start_paused = true)]
async fn own_lines_come_back_as_self_reflection() {
	let mut harness = Harness::connected(true).await;
	advance(1).await;
	harness.drain();

	assert!(harness.client.send_chat("hello room").await);
	advance(6).await;

	let events = harness.drain();
	let reflections: Vec<_> = events
		.iter()
		.filter_map(|event| match event {
			ClientEvent::SelfReflection { actual_text, .. } => Some(actual_text.as_str()),
			_ => None,
		})
		.collect();
	assert_eq!(reflections, vec!["hello room"]);
	assert!(!events.iter().any(|event| matches!(event, ClientEvent::Chat { username, .. } if username == IDENTITY)));

	advance(12).await;
	assert!(!harness.drain().iter().any(|event| matches!(event, ClientEvent::SelfReflection { .. })));
}

#[tokio::test(start_paused = true)]
async fn presence_notices_become_join_and_leave_events() {
	let mut harness = Harness::connected(true).await;
	advance(1).await;
	harness.drain();

	harness.launcher.page(|page| {
		page.notice("ada joined");
		page.notice("bob left");
	});
	advance(6).await;

	let events = harness.drain();
	assert!(events.contains(&ClientEvent::UserJoin { username: "ada".into() }));
	assert!(events.contains(&ClientEvent::UserLeave { username: "bob".into() }));
	assert!(!events.iter().any(|event| matches!(event, ClientEvent::Chat { .. })));
}

#[tokio::test(start_paused = true)]
async fn repeats_collapse_within_a_window_but_not_across_windows() {
	let mut harness = Harness::connected(true).await;
	advance(1).await;
	harness.drain();

	harness.launcher.page(|page| {
		page.say("ada", "again");
		page.say("ada", "again");
	});
	advance(6).await;
	assert_eq!(harness.chats().len(), 1);

	// Ninety seconds of notices push the next stamp into a later bucket.
	harness.launcher.page(|page| {
		for _ in 0..90 {
			page.notice("tick");
		}
		page.say("ada", "again");
	});
	advance(6).await;
	assert_eq!(harness.chats(), vec![("ada".to_string(), "again".to_string())]);
}

#[tokio::test(start_paused = true)]
async fn missing_transcript_emits_nothing() {
	let mut harness = Harness::connected(true).await;
	advance(1).await;
	harness.drain();

	harness.launcher.page(|page| page.transcript = None);
	advance(11).await;
	assert!(harness.chats().is_empty());
	assert!(harness.client.state().is_live());
}
