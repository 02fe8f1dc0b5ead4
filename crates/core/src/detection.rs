//! Canonical detection types shared by the transport and the aggregator.
//!
//! Backend payloads are normalized into these shapes at the transport
//! boundary; nothing downstream ever sees the raw wire format.

use serde::{Deserialize, Serialize};

use crate::types::{PersonId, VideoSeconds};

/// Display name the backend uses for faces that matched nobody.
pub const UNKNOWN_NAME: &str = "Unknown";

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// What kind of person of interest a detection refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Criminal,
    Missing,
    Unknown,
}

impl Classification {
    /// Classification implied by a directory record's criminal flag.
    pub fn from_criminal_flag(is_criminal: bool) -> Self {
        if is_criminal {
            Self::Criminal
        } else {
            Self::Missing
        }
    }

    /// Wire / storage name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Criminal => "criminal",
            Self::Missing => "missing",
            Self::Unknown => "unknown",
        }
    }

    /// Category text used in exported logs.
    pub fn label(self) -> &'static str {
        match self {
            Self::Criminal => "범죄자",
            Self::Missing => "실종자",
            Self::Unknown => "미확인",
        }
    }
}

// ---------------------------------------------------------------------------
// FaceAngle
// ---------------------------------------------------------------------------

/// Head pose reported by the backend's angle estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaceAngle {
    Front,
    Left,
    Right,
    LeftProfile,
    RightProfile,
}

impl FaceAngle {
    /// Parse the backend's `angle_type` string. `"unknown"` and any
    /// unrecognised value yield `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "front" => Some(Self::Front),
            "left" => Some(Self::Left),
            "right" => Some(Self::Right),
            "left_profile" => Some(Self::LeftProfile),
            "right_profile" => Some(Self::RightProfile),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Front => "정면",
            Self::Left => "왼쪽",
            Self::Right => "오른쪽",
            Self::LeftProfile => "왼쪽 프로필",
            Self::RightProfile => "오른쪽 프로필",
        }
    }
}

// ---------------------------------------------------------------------------
// BoundingBox
// ---------------------------------------------------------------------------

/// Face box in source-video pixel space, `(x1, y1)` top-left and
/// `(x2, y2)` bottom-right.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BoundingBox {
    pub fn from_corners([x1, y1, x2, y2]: [f64; 4]) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f64 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f64 {
        (self.y2 - self.y1).max(0.0)
    }

    /// Face area in square pixels; degenerate boxes have zero area.
    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }
}

// ---------------------------------------------------------------------------
// Detection / DetectionResult / DetectionRequest
// ---------------------------------------------------------------------------

/// One face found in one frame. Lives only for the render cycle of the
/// response that carried it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Explicit backend id when present, otherwise the display name.
    pub person_id: PersonId,
    pub display_name: String,
    /// Match confidence in `[0, 100]`.
    pub confidence_percent: f64,
    pub bounding_box: Option<BoundingBox>,
    pub classification: Classification,
    pub face_angle: Option<FaceAngle>,
}

impl Detection {
    /// Faces the backend could not match to any enrolled person.
    pub fn is_unknown(&self) -> bool {
        self.classification == Classification::Unknown || self.display_name == UNKNOWN_NAME
    }
}

/// The outcome of one request/response cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub detections: Vec<Detection>,
    /// Still image the backend attached when it raised an alert.
    pub alert_snapshot: Option<String>,
    /// Video time the result belongs to. Authoritative for record
    /// placement; responses may arrive out of capture order.
    pub video_timestamp_seconds: VideoSeconds,
    /// Backend-side alert flag (a criminal was matched).
    pub alert: bool,
    /// Correlation id echoed by the streaming endpoint.
    pub frame_id: Option<u64>,
}

impl DetectionResult {
    /// A result carrying no detections at the given video time.
    pub fn empty(video_timestamp_seconds: VideoSeconds) -> Self {
        Self {
            detections: Vec::new(),
            alert_snapshot: None,
            video_timestamp_seconds,
            alert: false,
            frame_id: None,
        }
    }
}

/// A frame submitted for detection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionRequest {
    /// Still-image encoding (a JPEG data URL).
    pub frame_encoding: String,
    pub watched_person_ids: Vec<PersonId>,
    /// Diagnostic correlation only; never used for ordering.
    pub sequence_number: u64,
    /// Playback position at capture time.
    pub video_time_seconds: VideoSeconds,
}
