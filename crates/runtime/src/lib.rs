//! Controlled-browser runtime for the live-chat client.
//!
//! Owns everything below the chat semantics: finding and launching a
//! Chromium-family browser with remote debugging enabled, probing its
//! DevTools endpoint, and the JSON-RPC [`Connection`] that correlates
//! commands with responses over a WebSocket [`transport`].

pub mod connection;
pub mod error;
pub mod fake_transport;
pub mod finder;
pub mod launcher;
pub mod probe;
pub mod process;
pub mod transport;

pub use connection::Connection;
pub use error::{Error, Result};
pub use launcher::{BrowserProcess, LaunchOptions};
pub use livechat_protocol::{Event, VersionInfo};
