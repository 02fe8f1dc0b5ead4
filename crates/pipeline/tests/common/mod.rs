//! Shared fixtures: a scripted frame source and a fake detection backend.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use eyesis_client::reconnect::ReconnectConfig;
use eyesis_client::transport::TransportConfig;
use eyesis_core::frame::{CapturedFrame, FrameSource};
use eyesis_core::person::{SelectedPerson, Selection};
use eyesis_pipeline::events::PipelineEvent;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;

// ---------------------------------------------------------------------------
// Frames
// ---------------------------------------------------------------------------

/// A player that advances `step` seconds per capture and ends after
/// `total` frames.
pub struct ScriptedFrames {
    ready: AtomicBool,
    paused: AtomicBool,
    captures: AtomicUsize,
    produced: AtomicUsize,
    total: usize,
    step: f64,
    time: Mutex<f64>,
}

impl ScriptedFrames {
    pub fn new(total: usize, step: f64) -> Arc<Self> {
        Arc::new(Self {
            ready: AtomicBool::new(true),
            paused: AtomicBool::new(false),
            captures: AtomicUsize::new(0),
            produced: AtomicUsize::new(0),
            total,
            step,
            time: Mutex::new(0.0),
        })
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// A paused player is ready but yields no frames.
    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    /// Capture attempts, including those that produced nothing.
    pub fn captures(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }
}

impl FrameSource for ScriptedFrames {
    fn capture(&self) -> Option<CapturedFrame> {
        self.captures.fetch_add(1, Ordering::SeqCst);
        if self.paused.load(Ordering::SeqCst) || self.has_ended() {
            return None;
        }
        let n = self.produced.fetch_add(1, Ordering::SeqCst);
        let mut time = self.time.lock().unwrap();
        let video_time = n as f64 * self.step;
        *time = video_time;
        Some(CapturedFrame {
            encoding: "data:image/jpeg;base64,/9j/AA==".into(),
            video_time,
        })
    }

    fn current_time(&self) -> f64 {
        *self.time.lock().unwrap()
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn has_ended(&self) -> bool {
        self.produced.load(Ordering::SeqCst) >= self.total
    }
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct BackendStats {
    pub detect_calls: AtomicUsize,
    pub streamed_frames: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl BackendStats {
    pub fn detect_calls(&self) -> usize {
        self.detect_calls.load(Ordering::SeqCst)
    }

    pub fn streamed_frames(&self) -> usize {
        self.streamed_frames.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

pub struct Backend {
    pub api_url: String,
    pub ws_url: String,
    pub stats: Arc<BackendStats>,
}

impl Backend {
    /// Transport settings with quick reconnects so the fallback settles fast.
    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            reconnect: ReconnectConfig {
                initial_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(40),
                ..Default::default()
            },
            ..TransportConfig::new(self.api_url.clone(), self.ws_url.clone())
        }
    }
}

#[derive(Clone)]
struct Shared {
    stats: Arc<BackendStats>,
    delay: Duration,
}

/// The backend reports every requested person as seen, with a snapshot
/// image attached. Persons whose id starts with `c` are criminals.
fn detection_body(suspect_ids: &Value, frame_id: &Value, video_time: &Value) -> Value {
    let detections: Vec<Value> = suspect_ids
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .map(|id| {
            let status = if id.starts_with('c') { "criminal" } else { "normal" };
            json!({
                "bbox": [10, 10, 60, 80],
                "status": status,
                "name": format!("name-{id}"),
                "person_id": id,
                "confidence": 90.0
            })
        })
        .collect();
    json!({
        "success": true,
        "alert": false,
        "metadata": {},
        "snapshot_base64": "data:image/jpeg;base64,AAAA",
        "frame_id": frame_id,
        "video_timestamp": video_time,
        "detections": detections
    })
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "active_connections": 0 }))
}

async fn detect(State(shared): State<Shared>, Json(body): Json<Value>) -> Json<Value> {
    let stats = &shared.stats;
    stats.detect_calls.fetch_add(1, Ordering::SeqCst);
    let now = stats.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    stats.max_in_flight.fetch_max(now, Ordering::SeqCst);

    tokio::time::sleep(shared.delay).await;

    stats.in_flight.fetch_sub(1, Ordering::SeqCst);
    Json(detection_body(&body["suspect_ids"], &Value::Null, &Value::Null))
}

async fn spawn_rest(shared: Shared) -> SocketAddr {
    let app = Router::new()
        .route("/api/health", get(health))
        .route("/api/detect", post(detect))
        .with_state(shared);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn spawn_stream(stats: Arc<BackendStats>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((tcp, _)) = listener.accept().await {
            let stats = Arc::clone(&stats);
            tokio::spawn(async move {
                let Ok(mut ws) = tokio_tungstenite::accept_async(tcp).await else {
                    return;
                };
                while let Some(Ok(msg)) = ws.next().await {
                    let Message::Text(text) = msg else { continue };
                    let value: Value = serde_json::from_str(&text).unwrap();
                    let reply = match value["type"].as_str() {
                        Some("config") => {
                            json!({ "type": "config_updated", "suspect_ids": value["suspect_ids"] })
                        }
                        Some("frame") => {
                            stats.streamed_frames.fetch_add(1, Ordering::SeqCst);
                            let data = &value["data"];
                            json!({
                                "type": "detection",
                                "data": detection_body(&data["suspect_ids"], &data["frame_id"], &data["video_time"])
                            })
                        }
                        Some("ping") => json!({ "type": "pong" }),
                        _ => json!({ "type": "error", "message": "Unknown message type" }),
                    };
                    if ws.send(Message::Text(reply.to_string())).await.is_err() {
                        return;
                    }
                }
            });
        }
    });
    addr
}

/// A backend with REST only: its streaming URL answers 404, so the
/// transport settles on one-shot calls.
pub async fn discrete_backend(delay: Duration) -> Backend {
    let stats = Arc::new(BackendStats::default());
    let addr = spawn_rest(Shared {
        stats: Arc::clone(&stats),
        delay,
    })
    .await;
    Backend {
        api_url: format!("http://{addr}/api"),
        ws_url: format!("ws://{addr}/ws/detect"),
        stats,
    }
}

/// A backend serving both REST and the streaming endpoint.
pub async fn streaming_backend(delay: Duration) -> Backend {
    let stats = Arc::new(BackendStats::default());
    let rest = spawn_rest(Shared {
        stats: Arc::clone(&stats),
        delay,
    })
    .await;
    let stream = spawn_stream(Arc::clone(&stats)).await;
    Backend {
        api_url: format!("http://{rest}/api"),
        ws_url: format!("ws://{stream}/ws/detect"),
        stats,
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub fn selection(ids: &[&str]) -> Selection {
    Selection::new(
        ids.iter()
            .map(|id| SelectedPerson::new(*id, format!("name-{id}"), id.starts_with('c')))
            .collect(),
    )
}

/// Wait for the first event matching `pred`, skipping others.
pub async fn wait_for(
    events: &mut broadcast::Receiver<PipelineEvent>,
    mut pred: impl FnMut(&PipelineEvent) -> bool,
) -> PipelineEvent {
    let wait = async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(10), wait)
        .await
        .expect("timed out waiting for pipeline event")
}
