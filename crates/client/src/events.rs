//! Events produced by the transport's background tasks.
//!
//! Connection, session and backoff tasks never touch transport state
//! directly. They report what happened on an unbounded channel, and the
//! owner feeds each event back through
//! [`TransportClient::handle`](crate::transport::TransportClient::handle).

use crate::messages::ServerMessage;

/// An event from a background task, tagged with the connection generation
/// it belongs to. Events from superseded generations are ignored.
#[derive(Debug, Clone)]
pub struct TransportEvent {
    pub generation: u64,
    pub kind: TransportEventKind,
}

#[derive(Debug, Clone)]
pub enum TransportEventKind {
    /// The health check failed or timed out.
    HealthCheckFailed,
    /// The socket opened.
    Opened,
    /// The opening handshake exceeded the connect timeout.
    ConnectTimedOut,
    /// The opening handshake failed.
    ConnectFailed(String),
    /// A parsed message from the backend.
    Message(ServerMessage),
    /// The socket closed. `code` is `None` when no close frame arrived.
    Closed { code: Option<u16> },
    /// A scheduled reconnect delay elapsed.
    ReconnectDue,
}
