//! Per-video session state.
//!
//! One `SessionContext` owns every record the pipeline produces for a video
//! and a person selection. It is built fresh for each session and replaced
//! wholesale on reset.

use std::collections::BTreeMap;

use uuid::Uuid;

use crate::aggregator::{self, AggregateOutcome};
use crate::clip::{Clip, ClipTracker};
use crate::detection::DetectionResult;
use crate::detection_log::DetectionLog;
use crate::frame::FrameSource;
use crate::person::Selection;
use crate::snapshot::SnapshotArchive;
use crate::timeline::{self, TimelineInterval};
use crate::types::{PersonId, Timestamp, VideoSeconds};

#[derive(Debug, Clone)]
pub struct SessionContext {
    pub(crate) session_id: Uuid,
    pub(crate) selection: Selection,
    pub(crate) snapshots: SnapshotArchive,
    pub(crate) clips: ClipTracker,
    pub(crate) log: DetectionLog,
    pub(crate) alert: bool,
    next_sequence: u64,
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new(Selection::default())
    }
}

impl SessionContext {
    pub fn new(selection: Selection) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            selection,
            snapshots: SnapshotArchive::default(),
            clips: ClipTracker::default(),
            log: DetectionLog::default(),
            alert: false,
            next_sequence: 0,
        }
    }

    /// Start a new session for `selection`, discarding every record.
    /// Request sequence numbers keep counting, so replies to the old
    /// session's requests never match a new one.
    pub fn select(&mut self, selection: Selection) {
        let next_sequence = self.next_sequence;
        *self = Self::new(selection);
        self.next_sequence = next_sequence;
    }

    /// Start a new session with the same selection.
    pub fn reset(&mut self) {
        let selection = std::mem::take(&mut self.selection);
        self.select(selection);
    }

    pub fn apply(
        &mut self,
        result: &DetectionResult,
        frames: &dyn FrameSource,
        now: Timestamp,
    ) -> AggregateOutcome {
        aggregator::apply(self, result, frames, now)
    }

    /// Close every open clip at `end_time`, for detection stop and video end.
    pub fn close_open_clips(&mut self, end_time: VideoSeconds) -> Vec<Clip> {
        self.alert = false;
        self.clips.close_all(end_time)
    }

    /// Sequence number for the next outgoing request.
    pub fn next_sequence(&mut self) -> u64 {
        self.next_sequence += 1;
        self.next_sequence
    }

    pub fn timeline(&self, threshold: VideoSeconds) -> BTreeMap<PersonId, Vec<TimelineInterval>> {
        timeline::intervals_by_person(self.snapshots.all(), threshold)
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn snapshots(&self) -> &SnapshotArchive {
        &self.snapshots
    }

    pub fn clips(&self) -> &ClipTracker {
        &self.clips
    }

    pub fn log(&self) -> &DetectionLog {
        &self.log
    }

    pub fn alert(&self) -> bool {
        self.alert
    }
}
