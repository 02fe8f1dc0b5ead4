//! Integration tests for [`TransportClient`] against an in-process fake
//! detection backend: an axum router for the REST endpoints and a raw
//! tokio-tungstenite accept loop for the streaming endpoint.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use axum::routing::{get, post};
use axum::{Json, Router};
use eyesis_client::events::TransportEvent;
use eyesis_client::reconnect::ReconnectConfig;
use eyesis_client::transport::{
    ConnectionState, ReconnectGate, TransportClient, TransportConfig, TransportMode,
    TransportOutcome,
};
use eyesis_core::detection::{Classification, DetectionRequest};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_tungstenite::tungstenite::Message;

const ACTIVE: ReconnectGate = ReconnectGate {
    detection_active: true,
    video_ended: false,
};

// ---------------------------------------------------------------------------
// Fake backend
// ---------------------------------------------------------------------------

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "active_connections": 0, "websocket_endpoint": "/ws/detect" }))
}

async fn detect(Json(body): Json<Value>) -> Json<Value> {
    let id = body["suspect_ids"][0].as_str().unwrap_or("nobody").to_string();
    Json(json!({
        "success": true,
        "alert": false,
        "metadata": {},
        "detections": [{
            "bbox": [10, 10, 50, 60],
            "status": "normal",
            "name": "이지선",
            "person_id": id,
            "confidence": 88.5,
            "angle_type": "front"
        }]
    }))
}

/// Serve the REST endpoints; returns the `/api` base URL and the address.
async fn spawn_rest() -> (String, SocketAddr) {
    let app = Router::new()
        .route("/api/health", get(health))
        .route("/api/detect", post(detect));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/api"), addr)
}

#[derive(Default)]
struct StreamStats {
    connections: AtomicUsize,
    pings: AtomicUsize,
}

/// Serve the streaming endpoint. With `drop_first`, the first connection
/// is torn down without a close frame right after its config ack.
async fn spawn_stream(drop_first: bool) -> (String, Arc<StreamStats>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let stats = Arc::new(StreamStats::default());
    let server_stats = Arc::clone(&stats);

    tokio::spawn(async move {
        while let Ok((tcp, _)) = listener.accept().await {
            let n = server_stats.connections.fetch_add(1, Ordering::SeqCst) + 1;
            let drop_after_config = drop_first && n == 1;
            let stats = Arc::clone(&server_stats);
            tokio::spawn(async move {
                let Ok(mut ws) = tokio_tungstenite::accept_async(tcp).await else {
                    return;
                };
                while let Some(Ok(msg)) = ws.next().await {
                    let Message::Text(text) = msg else { continue };
                    let value: Value = serde_json::from_str(&text).unwrap();
                    let kind = value["type"].as_str().unwrap_or_default().to_string();
                    let reply = match kind.as_str() {
                        "config" => json!({ "type": "config_updated", "suspect_ids": value["suspect_ids"] }),
                        "frame" => {
                            let data = &value["data"];
                            json!({
                                "type": "detection",
                                "data": {
                                    "frame_id": data["frame_id"],
                                    "video_timestamp": data["video_time"],
                                    "alert": true,
                                    "snapshot_base64": "data:image/jpeg;base64,AAAA",
                                    "detections": [{
                                        "bbox": [0, 0, 20, 20],
                                        "status": "criminal",
                                        "name": "황윤하",
                                        "person_id": data["suspect_ids"][0],
                                        "confidence": 97.1
                                    }]
                                }
                            })
                        }
                        "ping" => {
                            stats.pings.fetch_add(1, Ordering::SeqCst);
                            json!({ "type": "pong" })
                        }
                        _ => json!({ "type": "error", "message": "Unknown message type" }),
                    };
                    if ws.send(Message::Text(reply.to_string())).await.is_err() {
                        return;
                    }
                    if drop_after_config && kind == "config" {
                        return;
                    }
                }
            });
        }
    });

    (format!("ws://{addr}/ws/detect"), stats)
}

fn fast_config(api_url: String, ws_url: String) -> TransportConfig {
    TransportConfig {
        reconnect: ReconnectConfig {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
            ..Default::default()
        },
        ..TransportConfig::new(api_url, ws_url)
    }
}

/// Feed background events into the client until one yields an outcome.
async fn next_outcome(
    client: &mut TransportClient,
    events: &mut UnboundedReceiver<TransportEvent>,
) -> TransportOutcome {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(10), events.recv())
            .await
            .expect("timed out waiting for a transport event")
            .expect("event channel closed");
        if let Some(outcome) = client.handle(event, ACTIVE) {
            return outcome;
        }
    }
}

fn request(seq: u64, video_time: f64) -> DetectionRequest {
    DetectionRequest {
        frame_encoding: "data:image/jpeg;base64,/9j/AA==".into(),
        watched_person_ids: vec!["yh".into()],
        sequence_number: seq,
        video_time_seconds: video_time,
    }
}

// ---------------------------------------------------------------------------
// Streaming
// ---------------------------------------------------------------------------

/// Check health, connect, configure, and stream one frame end to end.
#[tokio::test]
async fn streams_frames_once_config_acknowledged() {
    let (api_url, _) = spawn_rest().await;
    let (ws_url, _) = spawn_stream(false).await;
    let (mut client, mut events) = TransportClient::new(fast_config(api_url, ws_url));

    client.configure(vec!["yh".into()]);
    client.connect();
    assert_eq!(next_outcome(&mut client, &mut events).await, TransportOutcome::Ready);
    assert_eq!(client.state(), ConnectionState::ConnectedReady);

    assert!(client.submit_frame(&request(1, 1.5)));
    let outcome = next_outcome(&mut client, &mut events).await;
    assert_matches!(outcome, TransportOutcome::Detection(result) => {
        assert_eq!(result.frame_id, Some(1));
        assert_eq!(result.video_timestamp_seconds, 1.5);
        assert!(result.alert_snapshot.is_some());
        assert_eq!(result.detections[0].person_id, "yh");
        assert_eq!(result.detections[0].classification, Classification::Criminal);
    });
}

/// A dropped stream reconnects and re-sends its config.
#[tokio::test]
async fn abnormal_drop_reconnects_and_reconfigures() {
    let (api_url, _) = spawn_rest().await;
    let (ws_url, stats) = spawn_stream(true).await;
    let (mut client, mut events) = TransportClient::new(fast_config(api_url, ws_url));

    client.configure(vec!["yh".into()]);
    client.connect();
    assert_eq!(next_outcome(&mut client, &mut events).await, TransportOutcome::Ready);
    assert_eq!(next_outcome(&mut client, &mut events).await, TransportOutcome::Disconnected);
    assert_eq!(client.attempts(), 1);

    assert_eq!(next_outcome(&mut client, &mut events).await, TransportOutcome::Ready);
    assert_eq!(client.attempts(), 0);
    assert_eq!(stats.connections.load(Ordering::SeqCst), 2);
}

/// Keep-alive pings flow while the stream is idle.
#[tokio::test]
async fn keepalive_pings_are_sent() {
    let (api_url, _) = spawn_rest().await;
    let (ws_url, stats) = spawn_stream(false).await;
    let config = TransportConfig {
        keepalive_interval: Duration::from_millis(50),
        ..fast_config(api_url, ws_url)
    };
    let (mut client, mut events) = TransportClient::new(config);

    client.configure(vec!["yh".into()]);
    client.connect();
    assert_eq!(next_outcome(&mut client, &mut events).await, TransportOutcome::Ready);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(stats.pings.load(Ordering::SeqCst) >= 1);
}

// ---------------------------------------------------------------------------
// Fallback
// ---------------------------------------------------------------------------

/// A backend that only serves REST: the stream never becomes ready, two
/// reconnects are tried, then every frame goes through `POST /detect`.
#[tokio::test]
async fn discrete_fallback_after_two_attempts() {
    let (api_url, rest_addr) = spawn_rest().await;
    let ws_url = format!("ws://{rest_addr}/ws/detect");
    let (mut client, mut events) = TransportClient::new(fast_config(api_url, ws_url));

    client.configure(vec!["yh".into()]);
    client.connect();

    let mut outcomes = Vec::new();
    loop {
        let outcome = next_outcome(&mut client, &mut events).await;
        outcomes.push(outcome.clone());
        if outcome == TransportOutcome::Degraded {
            break;
        }
        // Detection keeps running on one-shot calls meanwhile.
        assert!(!client.submit_frame(&request(outcomes.len() as u64, 0.0)));
    }

    assert_eq!(
        outcomes,
        vec![
            TransportOutcome::Disconnected,
            TransportOutcome::Disconnected,
            TransportOutcome::Degraded,
        ]
    );
    assert_eq!(client.mode(), TransportMode::Discrete);
    assert!(!client.submit_frame(&request(10, 3.0)));

    let result = client
        .submit_frame_discrete(&request(11, 3.0))
        .await
        .expect("one-shot detection");
    assert_eq!(result.video_timestamp_seconds, 3.0);
    assert_eq!(result.frame_id, Some(11));
    assert_eq!(result.detections[0].person_id, "yh");
    assert_eq!(result.detections[0].classification, Classification::Missing);
}

/// An unreachable health endpoint short-circuits to one-shot mode.
#[tokio::test]
async fn failed_health_check_degrades_immediately() {
    let (ws_url, stats) = spawn_stream(false).await;
    let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_api = format!("http://{}/api", closed.local_addr().unwrap());
    drop(closed);

    let (mut client, mut events) = TransportClient::new(fast_config(dead_api, ws_url));
    client.connect();

    assert_eq!(next_outcome(&mut client, &mut events).await, TransportOutcome::Degraded);
    assert_eq!(client.mode(), TransportMode::Discrete);
    assert_eq!(stats.connections.load(Ordering::SeqCst), 0);
}
