//! Realtime stream modules.
//!
//! - `client`: websocket transport worker and outbound command sender.
//! - `config`: session parameters and their allowed values.
//! - `metadata`: presentation helpers over frames and CV annotations.
//! - `proto`: protocol messages shared with the processing backend.
//! - `session`: connection lifecycle state machine and observable snapshot.

/// Websocket connection and command sender.
pub mod client;
/// Session configuration and query-string helpers.
pub mod config;
/// Frame payload and CV metadata helpers.
pub mod metadata;
/// Stream protocol messages.
pub mod proto;
/// Session state machine over a single transport.
pub mod session;
