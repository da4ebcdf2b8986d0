//! Rust client for live video streams processed by a remote computer-vision
//! backend.
//!
//! The crate is organized by transport surface:
//! - `stream`: websocket transport, wire protocol, and the session state
//!   machine that reconciles inbound frames into an observable snapshot.

/// Realtime stream client, protocol types, and session state helpers.
pub mod stream;
