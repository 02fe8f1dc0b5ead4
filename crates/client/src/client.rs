//! WebSocket client for the detection backend's streaming endpoint.
//!
//! [`DetectorClient`] holds the endpoint configuration.  Call
//! [`DetectorClient::connect`] to establish a live [`DetectorConnection`].

use std::time::Duration;

use reqwest::Url;
use tokio_tungstenite::{connect_async, MaybeTlsStream};

/// Path of the streaming detection endpoint, relative to the host root.
pub const STREAM_PATH: &str = "/ws/detect";

pub type WsStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Configuration handle for the streaming endpoint.
#[derive(Debug, Clone)]
pub struct DetectorClient {
    ws_url: String,
    connect_timeout: Duration,
}

/// A live WebSocket connection to the detection backend.
pub struct DetectorConnection {
    pub ws_url: String,
    /// The raw WebSocket stream for reading/writing frames.
    pub ws_stream: WsStream,
}

impl DetectorClient {
    /// * `ws_url`          - full endpoint URL, e.g. `ws://host:5000/ws/detect`.
    /// * `connect_timeout` - bound on the opening handshake.
    pub fn new(ws_url: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            ws_url: ws_url.into(),
            connect_timeout,
        }
    }

    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// Connect to the streaming endpoint.
    ///
    /// Fails with [`DetectorClientError::Timeout`] when the handshake does
    /// not finish within the configured timeout.
    pub async fn connect(&self) -> Result<DetectorConnection, DetectorClientError> {
        let attempt = connect_async(self.ws_url.as_str());
        let (ws_stream, _response) = tokio::time::timeout(self.connect_timeout, attempt)
            .await
            .map_err(|_| DetectorClientError::Timeout(self.connect_timeout))?
            .map_err(|e| {
                DetectorClientError::Connection(format!(
                    "Failed to connect to detector at {}: {e}",
                    self.ws_url
                ))
            })?;

        tracing::info!(url = %self.ws_url, "Connected to detection stream");

        Ok(DetectorConnection {
            ws_url: self.ws_url.clone(),
            ws_stream,
        })
    }
}

/// Derive the streaming URL from the REST base URL: same host and port,
/// `ws`/`wss` scheme, path [`STREAM_PATH`], no query or fragment.
pub fn derive_ws_url(api_url: &str) -> Result<String, DetectorClientError> {
    let mut url = Url::parse(api_url)
        .map_err(|e| DetectorClientError::Connection(format!("Invalid API URL {api_url}: {e}")))?;
    let ws_scheme = match url.scheme() {
        "http" => "ws",
        "https" => "wss",
        other => {
            return Err(DetectorClientError::Connection(format!(
                "Unsupported URL scheme: {other}"
            )))
        }
    };
    if url.host_str().map_or(true, str::is_empty) {
        return Err(DetectorClientError::Connection(format!(
            "API URL has no host: {api_url}"
        )));
    }

    url.set_scheme(ws_scheme).map_err(|()| {
        DetectorClientError::Connection(format!("Cannot use {ws_scheme} for {api_url}"))
    })?;
    url.set_path(STREAM_PATH);
    url.set_query(None);
    url.set_fragment(None);
    Ok(url.to_string())
}

/// Errors that can occur when working with the WebSocket client.
#[derive(Debug, thiserror::Error)]
pub enum DetectorClientError {
    /// Failed to establish the initial WebSocket connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The opening handshake did not finish in time.
    #[error("Connection timed out after {0:?}")]
    Timeout(Duration),

    /// A protocol-level error on an already-established connection.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_ws_url_from_http() {
        assert_eq!(
            derive_ws_url("http://localhost:5000/api").unwrap(),
            "ws://localhost:5000/ws/detect"
        );
    }

    #[test]
    fn derive_wss_url_from_https() {
        assert_eq!(
            derive_ws_url("https://eyesis.example.com/api/").unwrap(),
            "wss://eyesis.example.com/ws/detect"
        );
    }

    #[test]
    fn derive_rejects_bad_urls() {
        assert!(derive_ws_url("localhost:5000").is_err());
        assert!(derive_ws_url("ftp://host/api").is_err());
        assert!(derive_ws_url("http://").is_err());
        assert!(derive_ws_url("not a url").is_err());
    }

    #[test]
    fn derive_drops_query_and_fragment() {
        assert_eq!(
            derive_ws_url("http://localhost:5000?key=1").unwrap(),
            "ws://localhost:5000/ws/detect"
        );
        assert_eq!(
            derive_ws_url("https://eyesis.example.com:8443/api?token=abc#top").unwrap(),
            "wss://eyesis.example.com:8443/ws/detect"
        );
    }

    #[test]
    fn derive_accepts_upper_case_scheme() {
        assert_eq!(
            derive_ws_url("HTTP://localhost:5000/api").unwrap(),
            "ws://localhost:5000/ws/detect"
        );
        assert_eq!(
            derive_ws_url("Https://Eyesis.Example.com/api").unwrap(),
            "wss://eyesis.example.com/ws/detect"
        );
    }

    #[tokio::test]
    async fn connect_refused_is_connection_error() {
        let client = DetectorClient::new("ws://127.0.0.1:9/ws/detect", Duration::from_secs(5));
        let err = client.connect().await.err().unwrap();
        assert!(matches!(err, DetectorClientError::Connection(_)));
    }
}
