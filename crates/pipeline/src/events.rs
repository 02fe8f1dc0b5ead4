//! Events broadcast by the detection loop.
//!
//! These are what presentation collaborators render: overlays, new
//! records, and lifecycle changes. Subscribe through
//! [`LoopHandle::subscribe`](crate::detection_loop::LoopHandle::subscribe).

use std::collections::BTreeMap;

use eyesis_core::clip::Clip;
use eyesis_core::detection::Detection;
use eyesis_core::detection_log::LogEntry;
use eyesis_core::snapshot::Snapshot;
use eyesis_core::timeline::TimelineInterval;
use eyesis_core::types::PersonId;
use serde::Serialize;
use uuid::Uuid;

/// Why detection went inactive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    User,
    VideoEnded,
    Shutdown,
}

#[derive(Debug, Clone, Serialize)]
pub enum PipelineEvent {
    DetectionStarted { epoch: u64 },

    DetectionStopped { epoch: u64, reason: StopReason },

    /// Detection is on but the video cannot produce frames yet.
    WaitingForVideo,

    /// Boxes to draw for the latest result.
    Overlay {
        detections: Vec<Detection>,
        /// At least one watched criminal is on screen.
        alert: bool,
    },

    /// Remove any drawn boxes.
    OverlayCleared,

    SnapshotAdded(Snapshot),

    ClipOpened(Clip),

    ClipClosed(Clip),

    LogAppended(LogEntry),

    /// The log is empty and the last result had no faces.
    LogIdle,

    /// Merged timeline per watched person, after a debounced recompute.
    TimelineUpdated(BTreeMap<PersonId, Vec<TimelineInterval>>),

    /// The stream acknowledged its config and carries frames now.
    StreamReady,

    /// Streaming was abandoned for this session.
    StreamDegraded,

    /// All records were discarded and a new session began.
    SessionReset { session_id: Uuid },
}
