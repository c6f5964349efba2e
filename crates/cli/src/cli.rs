use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use livechat::{ClientConfig, QueuePosition};

#[derive(Parser, Debug)]
#[command(name = "lcc")]
#[command(about = "Live chat client - keep an identity present in a browser-only chat room")]
#[command(version)]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// JSON config file; flags override its values
	#[arg(short, long, global = true, value_name = "FILE")]
	pub config: Option<PathBuf>,

	/// Room to join
	#[arg(long, global = true)]
	pub channel: Option<String>,

	/// Name to appear as in the room
	#[arg(short, long, global = true)]
	pub identity: Option<String>,

	/// Log in with the account password instead of joining as a guest
	#[arg(long, global = true)]
	pub login: bool,

	/// Account password
	#[arg(long, global = true, env = "LIVECHAT_SECRET", hide_env_values = true)]
	pub secret: Option<String>,

	/// Show the browser window
	#[arg(long, global = true)]
	pub headed: bool,

	/// Ignore and discard saved login state
	#[arg(long, global = true)]
	pub fresh: bool,

	/// Browser binary to launch
	#[arg(long, global = true, value_name = "PATH")]
	pub browser: Option<PathBuf>,

	#[command(subcommand)]
	pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
	/// Stay connected, print events as JSON lines and send stdin lines as chat
	Run,

	/// Send one chat line and print the delivery report
	Send { text: String },

	/// Send a private message
	Pm { identity: String, text: String },

	/// Add a video to the playlist
	Add {
		input: String,
		/// Play it next instead of at the end
		#[arg(long)]
		next: bool,
	},

	/// Print the playlist
	Queue,

	/// Print what the player is showing
	NowPlaying,

	/// Log out and forget saved login state
	Logout,
}

impl Cli {
	/// Config file values with command-line overrides applied.
	pub fn client_config(&self) -> Result<ClientConfig> {
		let mut config = match &self.config {
			Some(path) => ClientConfig::from_file(path).with_context(|| format!("reading config {}", path.display()))?,
			None => ClientConfig::default(),
		};
		if let Some(channel) = &self.channel {
			config.channel_identity = channel.clone();
		}
		if let Some(identity) = &self.identity {
			config.identity = identity.clone();
		}
		if let Some(secret) = &self.secret {
			config.credential_secret = Some(secret.clone());
		}
		if let Some(browser) = &self.browser {
			config.browser_executable = Some(browser.clone());
		}
		config.login_enabled |= self.login;
		config.force_fresh_session |= self.fresh;
		if self.headed {
			config.headless = false;
		}

		if config.channel_identity.is_empty() {
			bail!("no channel given; pass --channel or set channelIdentity in the config");
		}
		if config.identity.is_empty() {
			bail!("no identity given; pass --identity or set identity in the config");
		}
		if config.login_enabled && config.credential_secret.is_none() {
			bail!("login needs a password; set LIVECHAT_SECRET or credentialSecret in the config");
		}
		config.validate().context("invalid configuration")?;
		Ok(config)
	}
}

/// One line typed into `run`.
#[derive(Debug, PartialEq, Eq)]
pub enum Input {
	Chat(String),
	Pm { identity: String, text: String },
	Queue { input: String, position: QueuePosition },
	Quit,
	Empty,
}

impl Input {
	pub fn parse(line: &str) -> Input {
		let line = line.trim();
		if line.is_empty() {
			return Input::Empty;
		}
		if line == "/quit" {
			return Input::Quit;
		}
		if let Some(rest) = line.strip_prefix("/pm ") {
			if let Some((identity, text)) = rest.trim().split_once(' ') {
				return Input::Pm {
					identity: identity.to_string(),
					text: text.trim().to_string(),
				};
			}
		}
		if let Some(rest) = line.strip_prefix("/queue ") {
			let rest = rest.trim();
			return match rest.strip_prefix("next ") {
				Some(input) => Input::Queue {
					input: input.trim().to_string(),
					position: QueuePosition::Next,
				},
				None => Input::Queue {
					input: rest.to_string(),
					position: QueuePosition::End,
				},
			};
		}
		Input::Chat(line.to_string())
	}
}

#[cfg(test)]
mod tests {
	use std::io::Write;

	use super::*;

	fn parse(args: &[&str]) -> Cli {
		Cli::try_parse_from(std::iter::once("lcc").chain(args.iter().copied())).unwrap()
	}

	#[test]
	fn flags_build_a_guest_config() {
		let cli = parse(&["--channel", "lounge", "-i", "courier", "run"]);
		let config = cli.client_config().unwrap();
		assert_eq!(config.channel_url(), "https://coolhole.org/r/lounge");
		assert!(!config.login_enabled);
		assert!(config.headless);
	}

	#[test]
	fn login_without_secret_is_rejected() {
		let mut cli = parse(&["--channel", "lounge", "-i", "courier", "--login", "run"]);
		cli.secret = None;
		assert!(cli.client_config().is_err());

		cli.secret = Some("hunter2".into());
		assert!(cli.client_config().unwrap().login_enabled);
	}

	#[test]
	fn flags_override_the_config_file() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		write!(file, r#"{{"channelIdentity": "lounge", "identity": "courier", "headless": true, "timings": {{"heartbeatIntervalMs": 1000}}}}"#).unwrap();
		let path = file.path().to_str().unwrap().to_string();

		let cli = parse(&["--config", &path, "--identity", "relay", "--headed", "queue"]);
		let config = cli.client_config().unwrap();
		assert_eq!(config.identity, "relay");
		assert_eq!(config.channel_identity, "lounge");
		assert!(!config.headless);
		assert_eq!(config.timings.heartbeat_interval_ms, 1000);
	}

	#[test]
	fn zero_intervals_in_the_config_file_are_rejected() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		write!(file, r#"{{"channelIdentity": "lounge", "identity": "courier", "timings": {{"captureIntervalMs": 0}}}}"#).unwrap();
		let path = file.path().to_str().unwrap().to_string();

		let err = parse(&["--config", &path, "run"]).client_config().unwrap_err();
		assert!(format!("{err:#}").contains("captureIntervalMs"), "{err:#}");
	}

	#[test]
	fn stdin_lines_map_to_commands() {
		assert_eq!(Input::parse("  hello  "), Input::Chat("hello".into()));
		assert_eq!(
			Input::parse("/pm ada see you soon"),
			Input::Pm {
				identity: "ada".into(),
				text: "see you soon".into()
			}
		);
		assert_eq!(
			Input::parse("/queue next https://youtu.be/x"),
			Input::Queue {
				input: "https://youtu.be/x".into(),
				position: QueuePosition::Next
			}
		);
		assert_eq!(
			Input::parse("/queue https://youtu.be/x"),
			Input::Queue {
				input: "https://youtu.be/x".into(),
				position: QueuePosition::End
			}
		);
		assert_eq!(Input::parse("/pm lonely"), Input::Chat("/pm lonely".into()));
		assert_eq!(Input::parse(""), Input::Empty);
		assert_eq!(Input::parse("/quit"), Input::Quit);
	}
}
