//! Applies one detection response to the session's durable records.

use std::collections::HashSet;

use crate::clip::{Clip, ClipChange};
use crate::detection::{Classification, Detection, DetectionResult};
use crate::detection_log::{LogCandidate, LogOutcome};
use crate::frame::FrameSource;
use crate::person::SelectedPerson;
use crate::session::SessionContext;
use crate::snapshot::{NewSnapshot, Snapshot};
use crate::types::{PersonId, Timestamp};

/// A detection matched to a watched person.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchedDetection {
    pub person: SelectedPerson,
    pub detection: Detection,
}

impl WatchedDetection {
    /// The selected person's classification, or the detection's own when
    /// the selection does not know it.
    pub fn classification(&self) -> Classification {
        self.person
            .classification()
            .unwrap_or(self.detection.classification)
    }
}

/// Everything one `apply` call changed.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateOutcome {
    pub watched: Vec<WatchedDetection>,
    pub snapshots: Vec<Snapshot>,
    pub opened_clips: Vec<u64>,
    pub closed_clips: Vec<Clip>,
    pub log: LogOutcome,
    pub alert: bool,
}

/// Match detections against the selection.
///
/// The detection's person id is authoritative; the display name is tried
/// when the id matches nobody. Unknown faces never match. A person seen
/// twice in one frame counts once (first occurrence).
pub fn watched_detections(
    session: &SessionContext,
    detections: &[Detection],
) -> Vec<WatchedDetection> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut watched = Vec::new();

    for detection in detections.iter().filter(|d| !d.is_unknown()) {
        let person = session
            .selection
            .get(&detection.person_id)
            .or_else(|| session.selection.get(&detection.display_name))
            .or_else(|| session.selection.find_by_name(&detection.display_name));
        let Some(person) = person else { continue };
        if !seen.insert(person.id.as_str()) {
            continue;
        }
        watched.push(WatchedDetection {
            person: person.clone(),
            detection: detection.clone(),
        });
    }
    watched
}

pub fn apply(
    session: &mut SessionContext,
    result: &DetectionResult,
    frames: &dyn FrameSource,
    now: Timestamp,
) -> AggregateOutcome {
    let video_time = result.video_timestamp_seconds;
    let watched = watched_detections(session, &result.detections);
    let selected_ids = session.selection.ids();

    if watched.is_empty() {
        let closed_clips = session
            .clips
            .close_absent(&selected_ids, &HashSet::new(), video_time);
        session.alert = false;

        // Someone unwatched on screen still reaches the log, which drops it
        // as unknown.
        let candidate = result.detections.first().map(|d| LogCandidate {
            person_id: d.person_id.clone(),
            person_name: d.display_name.clone(),
            classification: Classification::Unknown,
            confidence_percent: d.confidence_percent,
            video_time_seconds: video_time,
            image_encoding: None,
            bounding_box: d.bounding_box,
        });
        let log = session.log.append(candidate, now);

        return AggregateOutcome {
            watched,
            snapshots: Vec::new(),
            opened_clips: Vec::new(),
            closed_clips,
            log,
            alert: false,
        };
    }

    // One image serves every person detected in this response.
    let image = result
        .alert_snapshot
        .clone()
        .or_else(|| frames.capture().map(|frame| frame.encoding));

    let mut snapshots = Vec::new();
    let mut opened_clips = Vec::new();
    let mut present: HashSet<PersonId> = HashSet::new();

    for w in &watched {
        let classification = w.classification();
        let confidence = w.detection.confidence_percent;
        present.insert(w.person.id.clone());

        if let Some(image) = &image {
            let snapshot = session.snapshots.record(NewSnapshot {
                created_at: now,
                video_time_seconds: video_time,
                person_id: w.person.id.clone(),
                person_name: w.person.display_name.clone(),
                classification,
                confidence_percent: confidence,
                image_encoding: image.clone(),
            });
            snapshots.push(snapshot.clone());
        }

        let change = session.clips.observe(
            &w.person.id,
            &w.person.display_name,
            classification,
            confidence,
            video_time,
        );
        if let ClipChange::Opened(id) = change {
            opened_clips.push(id);
        }
    }

    let closed_clips = session
        .clips
        .close_absent(&selected_ids, &present, video_time);

    let representative = &watched[0];
    let log = session.log.append(
        Some(LogCandidate {
            person_id: representative.person.id.clone(),
            person_name: representative.person.display_name.clone(),
            classification: representative.classification(),
            confidence_percent: representative.detection.confidence_percent,
            video_time_seconds: video_time,
            image_encoding: image,
            bounding_box: representative.detection.bounding_box,
        }),
        now,
    );

    let alert = watched
        .iter()
        .any(|w| w.classification() == Classification::Criminal);
    session.alert = alert;

    AggregateOutcome {
        watched,
        snapshots,
        opened_clips,
        closed_clips,
        log,
        alert,
    }
}
