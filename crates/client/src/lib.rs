//! Detection backend client library.
//!
//! Provides the REST API wrapper, the streaming WebSocket connection,
//! typed wire messages with a single payload-normalization step,
//! reconnection backoff, and the [`TransportClient`](transport::TransportClient)
//! state machine that arbitrates between streaming and one-shot calls.

pub mod api;
pub mod client;
pub mod events;
pub mod messages;
pub mod reconnect;
pub mod transport;
