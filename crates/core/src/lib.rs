//! Resilient session client for browser-only live chat rooms.
//!
//! The client drives a real browser tab through the DevTools protocol, keeps
//! the configured identity present in the room, turns the on-screen transcript
//! into structured [`ClientEvent`]s and submits outbound messages the way a
//! person at the keyboard would.
//!
//! # Components
//!
//! | Module | Role |
//! |--------|------|
//! | [`permission`] | One-time automation-consent prompts |
//! | [`auth`] | Credential and guest login, presence roster checks |
//! | [`inbound`] | Periodic transcript scan, classification, dedupe |
//! | [`outbound`] | Rate-limited submission with retry and verification |
//! | [`health`] | Heartbeat and liveness assessment |
//! | [`recovery`] | Single-flight surface recreation or full relaunch |
//! | [`manager`] | The [`ChatClient`] lifecycle tying everything together |
//!
//! # Example
//!
//! ```ignore
//! use livechat::{ChatClient, ClientConfig, ClientEvent};
//!
//! let config = ClientConfig {
//!     channel_identity: "lounge".into(),
//!     identity: "courier".into(),
//!     ..ClientConfig::default()
//! };
//! let client = ChatClient::new(config);
//! let mut events = client.subscribe();
//! client.connect().await?;
//!
//! while let Ok(event) = events.recv().await {
//!     if let ClientEvent::Chat { username, text, .. } = event {
//!         client.send_chat(&format!("{username}: {text}")).await;
//!     }
//! }
//! ```

pub mod auth;
pub mod auth_store;
pub mod browser;
pub mod config;
pub mod dedupe;
pub mod dom;
pub mod error;
pub mod events;
pub mod fake;
pub mod health;
pub mod inbound;
pub mod manager;
pub mod outbound;
pub mod permission;
pub mod recovery;
mod session;
pub mod state;
pub mod surface;
pub mod text;
pub mod verify;
pub mod video;

pub use auth::{LoginOutcome, RosterMatch};
pub use config::{ClientConfig, Timings};
pub use error::{ClientError, ErrorClass, Result};
pub use events::ClientEvent;
pub use health::HealthSignal;
pub use manager::ChatClient;
pub use outbound::{EchoStats, QueuePosition, SendReport, Verification};
pub use recovery::{RecoveryOutcome, RecoveryStats};
pub use state::{Actor, SessionState};
pub use surface::{Container, Launcher, Surface};
pub use verify::{ImageVerifier, NoopImageVerifier, TesseractVerifier};
pub use video::{CurrentVideo, QueuedVideo};
