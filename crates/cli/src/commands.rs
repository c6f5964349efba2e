use anyhow::{Result, bail};
use livechat::{ChatClient, ClientEvent, QueuePosition, SessionState};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};

use crate::cli::{Cli, Command, Input};

pub async fn dispatch(cli: Cli) -> Result<()> {
	let config = cli.client_config()?;
	let client = ChatClient::new(config);
	let events = client.subscribe();

	client.connect().await?;
	let outcome = execute(&client, cli.command, events).await;
	if let Err(e) = client.disconnect().await {
		warn!(target = "lcc", error = %e, "disconnect failed");
	}
	outcome
}

async fn execute(client: &ChatClient, command: Command, events: broadcast::Receiver<ClientEvent>) -> Result<()> {
	match command {
		Command::Run => run(client, events).await?,
		Command::Send { text } => {
			let report = client.send_chat_report(&text).await;
			print_json(&report)?;
			if !report.delivered {
				bail!("message was not delivered");
			}
		}
		Command::Pm { identity, text } => {
			if !client.send_pm(&identity, &text).await {
				bail!("private message was not delivered");
			}
		}
		Command::Add { input, next } => {
			let position = if next { QueuePosition::Next } else { QueuePosition::End };
			if !client.queue_video(&input, position).await {
				bail!("could not queue {input}");
			}
		}
		Command::Queue => print_json(&client.get_video_queue().await?)?,
		Command::NowPlaying => print_json(&client.get_current_video().await?)?,
		Command::Logout => {
			client.logout().await?;
			info!(target = "lcc", "logged out");
		}
	}
	Ok(())
}

/// Streams events to stdout until stdin sends `/quit`, Ctrl-C or the session dies.
async fn run(client: &ChatClient, mut events: broadcast::Receiver<ClientEvent>) -> Result<()> {
	let mut lines = BufReader::new(tokio::io::stdin()).lines();
	let mut stdin_open = true;

	loop {
		tokio::select! {
			event = events.recv() => match event {
				Ok(event) => {
					print_json(&event)?;
					if matches!(event, ClientEvent::Disconnected { .. }) && client.state() == SessionState::Dead {
						warn!(target = "lcc", "session could not be recovered");
						break;
					}
				}
				Err(RecvError::Lagged(skipped)) => warn!(target = "lcc", skipped, "event stream lagged"),
				Err(RecvError::Closed) => break,
			},
			line = lines.next_line(), if stdin_open => match line? {
				Some(line) => match Input::parse(&line) {
					Input::Empty => {}
					Input::Quit => break,
					Input::Chat(text) => {
						client.send_chat(&text).await;
					}
					Input::Pm { identity, text } => {
						client.send_pm(&identity, &text).await;
					}
					Input::Queue { input, position } => {
						client.queue_video(&input, position).await;
					}
				},
				// Keep streaming events when stdin is not interactive.
				None => stdin_open = false,
			},
			_ = tokio::signal::ctrl_c() => {
				info!(target = "lcc", "interrupted");
				break;
			}
		}
	}
	Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
	println!("{}", serde_json::to_string(value)?);
	Ok(())
}
