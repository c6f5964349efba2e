//! Wire types for the live-chat session client.
//!
//! This crate contains the serde-serializable shapes that cross a process or
//! disk boundary: DevTools protocol envelopes exchanged with the controlled
//! browser, and the cookie snapshot persisted between runs.
//!
//! # Design Philosophy
//!
//! Types in this crate are:
//! * Pure data: No behavior beyond serialization/deserialization
//! * 1:1 with the wire: Field names match what the browser sends
//! * Stable: Changes only when the wire or file format changes
//!
//! Higher-level APIs are built on top of these types in `livechat-runtime`
//! and `livechat`.

pub mod cdp;
pub mod cookie;

pub use cdp::*;
pub use cookie::*;
