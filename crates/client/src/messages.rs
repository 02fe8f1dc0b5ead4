//! Detection backend wire messages and payload normalization.
//!
//! The streaming endpoint speaks JSON messages tagged by a `"type"` field.
//! Detection payloads (streamed or returned by `POST /detect`) have had
//! several shapes over time; [`normalize`] is the one place that maps any
//! of them into the canonical [`DetectionResult`].

use eyesis_core::detection::{
    BoundingBox, Classification, Detection, DetectionRequest, DetectionResult, FaceAngle,
    UNKNOWN_NAME,
};
use eyesis_core::types::{PersonId, VideoSeconds};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Client -> server
// ---------------------------------------------------------------------------

/// Messages sent over the streaming connection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Set the watched persons for this connection.
    Config { suspect_ids: Vec<PersonId> },
    /// Submit one frame for detection.
    Frame { data: FrameData },
    /// Keep-alive.
    Ping,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameData {
    pub image: String,
    pub suspect_ids: Vec<PersonId>,
    pub frame_id: u64,
    /// Playback position at capture, echoed back as `video_timestamp`.
    pub video_time: VideoSeconds,
}

impl ClientMessage {
    pub fn frame(request: &DetectionRequest) -> Self {
        Self::Frame {
            data: FrameData {
                image: request.frame_encoding.clone(),
                suspect_ids: request.watched_person_ids.clone(),
                frame_id: request.sequence_number,
                video_time: request.video_time_seconds,
            },
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("ClientMessage is always serialisable")
    }
}

/// JSON body for `POST /detect`.
#[derive(Debug, Clone, Serialize)]
pub struct DetectBody {
    pub image: String,
    pub suspect_ids: Vec<PersonId>,
}

impl From<&DetectionRequest> for DetectBody {
    fn from(request: &DetectionRequest) -> Self {
        Self {
            image: request.frame_encoding.clone(),
            suspect_ids: request.watched_person_ids.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Server -> client
// ---------------------------------------------------------------------------

/// Messages received over the streaming connection.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Acknowledges a `config` message.
    ConfigUpdated {
        #[serde(default)]
        suspect_ids: Vec<PersonId>,
    },
    /// Result for one submitted frame.
    Detection { data: DetectionPayload },
    /// The backend could not process a message.
    Error {
        #[serde(default)]
        message: String,
    },
    /// Keep-alive acknowledgement.
    Pong,
}

/// Detection response body, shared by the streaming and one-shot paths.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DetectionPayload {
    /// Present on `POST /detect` responses only.
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub detections: Vec<RawDetection>,
    #[serde(default)]
    pub alert: bool,
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(default)]
    pub snapshot_base64: Option<String>,
    #[serde(default)]
    pub video_timestamp: Option<f64>,
    #[serde(default)]
    pub frame_id: Option<u64>,
}

/// A detection as the backend sends it. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawDetection {
    #[serde(default)]
    pub bbox: Option<Vec<f64>>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub person_type: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub person_id: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub angle_type: Option<String>,
    #[serde(default)]
    pub metadata: Option<RawDetectionMetadata>,
}

/// Older payloads nest identity fields under `metadata`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawDetectionMetadata {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub person_id: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Parse a streaming text message into a typed enum.
///
/// Returns `Err` for malformed JSON or unknown `type` values.
/// Callers should log unknown types and continue.
pub fn parse_message(text: &str) -> Result<ServerMessage, serde_json::Error> {
    serde_json::from_str(text)
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

fn non_empty(value: Option<&String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty()).cloned()
}

/// Map one backend detection into the canonical shape.
///
/// Top-level fields win over `metadata`. The person id falls back to the
/// display name; missing fields become `Unknown`, zero confidence and no
/// box.
pub fn normalize_detection(raw: &RawDetection) -> Detection {
    let meta = raw.metadata.clone().unwrap_or_default();

    let display_name = non_empty(raw.name.as_ref())
        .or_else(|| non_empty(meta.name.as_ref()))
        .unwrap_or_else(|| UNKNOWN_NAME.to_string());
    let explicit_id = non_empty(raw.person_id.as_ref()).or_else(|| non_empty(meta.person_id.as_ref()));
    let confidence = raw
        .confidence
        .or(meta.confidence)
        .filter(|c| c.is_finite())
        .unwrap_or(0.0)
        .clamp(0.0, 100.0);
    let status = raw.status.as_deref().or(meta.status.as_deref());

    let classification = if display_name == UNKNOWN_NAME {
        Classification::Unknown
    } else {
        match status {
            Some("criminal") => Classification::Criminal,
            Some("unknown") => Classification::Unknown,
            Some(_) => Classification::Missing,
            None if explicit_id.is_none() => Classification::Unknown,
            None => Classification::from_criminal_flag(raw.person_type.as_deref() == Some("criminal")),
        }
    };

    let bounding_box = raw
        .bbox
        .as_deref()
        .and_then(|b| <[f64; 4]>::try_from(b).ok())
        .map(BoundingBox::from_corners);

    Detection {
        person_id: explicit_id.unwrap_or_else(|| display_name.clone()),
        display_name,
        confidence_percent: confidence,
        bounding_box,
        classification,
        face_angle: raw.angle_type.as_deref().and_then(FaceAngle::parse),
    }
}

/// Map a backend payload into a [`DetectionResult`].
///
/// `capture_time` is the playback position the frame was taken at; it is
/// used when the payload carries no usable `video_timestamp`.
pub fn normalize(payload: &DetectionPayload, capture_time: VideoSeconds) -> DetectionResult {
    DetectionResult {
        detections: payload.detections.iter().map(normalize_detection).collect(),
        alert_snapshot: non_empty(payload.snapshot_base64.as_ref()),
        video_timestamp_seconds: payload
            .video_timestamp
            .filter(|t| t.is_finite())
            .unwrap_or(capture_time),
        alert: payload.alert,
        frame_id: payload.frame_id,
    }
}
