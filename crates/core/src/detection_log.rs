//! Deduplicated, capped alert log.
//!
//! Entries are kept newest first. A person gets at most one entry per
//! [`LOG_COOLDOWN_SECONDS`] of video time, unknown faces never get one, and
//! once [`LOG_CAPACITY`] is reached the oldest insertion is evicted.

use std::collections::{HashMap, VecDeque};

use serde::Serialize;

use crate::detection::{BoundingBox, Classification, UNKNOWN_NAME};
use crate::types::{PersonId, Timestamp, VideoSeconds};

pub const LOG_COOLDOWN_SECONDS: VideoSeconds = 5.0;
pub const LOG_CAPACITY: usize = 200;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    /// `{person_id}_{video_time}_{created_at millis}`.
    pub id: String,
    pub person_name: String,
    pub person_id: PersonId,
    pub classification: Classification,
    pub confidence_percent: f64,
    pub video_time_seconds: VideoSeconds,
    #[serde(skip_serializing)]
    pub image_encoding: Option<String>,
    pub face_area_pixels: Option<f64>,
    pub created_at: Timestamp,
}

/// A log append attempt for one response cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct LogCandidate {
    pub person_id: PersonId,
    pub person_name: String,
    pub classification: Classification,
    pub confidence_percent: f64,
    pub video_time_seconds: VideoSeconds,
    pub image_encoding: Option<String>,
    pub bounding_box: Option<BoundingBox>,
}

impl LogCandidate {
    fn is_unknown(&self) -> bool {
        self.classification == Classification::Unknown || self.person_name == UNKNOWN_NAME
    }
}

/// Result of [`DetectionLog::append`].
#[derive(Debug, Clone, PartialEq)]
pub enum LogOutcome {
    Appended {
        entry: LogEntry,
        evicted: Option<LogEntry>,
    },
    /// Null payload on an empty log: show the idle placeholder.
    Idle,
    /// Null payload on a non-empty log: nothing changes.
    Unchanged,
    SuppressedUnknown,
    /// Video time is not a number.
    InvalidTime,
    CoolingDown {
        last_accepted: VideoSeconds,
    },
}

#[derive(Debug, Clone, Default)]
pub struct DetectionLog {
    entries: VecDeque<LogEntry>,
    last_accepted: HashMap<PersonId, VideoSeconds>,
}

impl DetectionLog {
    pub fn append(&mut self, candidate: Option<LogCandidate>, now: Timestamp) -> LogOutcome {
        let Some(candidate) = candidate else {
            return if self.entries.is_empty() {
                LogOutcome::Idle
            } else {
                LogOutcome::Unchanged
            };
        };

        if candidate.is_unknown() {
            return LogOutcome::SuppressedUnknown;
        }
        let video_time = candidate.video_time_seconds;
        if video_time.is_nan() {
            return LogOutcome::InvalidTime;
        }
        if let Some(&last) = self.last_accepted.get(&candidate.person_id) {
            // Earlier times count as inside the window, so accepted times
            // only ever move forward.
            if video_time - last < LOG_COOLDOWN_SECONDS {
                return LogOutcome::CoolingDown {
                    last_accepted: last,
                };
            }
        }

        let entry = LogEntry {
            id: format!(
                "{}_{}_{}",
                candidate.person_id,
                video_time,
                now.timestamp_millis()
            ),
            person_name: candidate.person_name,
            person_id: candidate.person_id,
            classification: candidate.classification,
            confidence_percent: candidate.confidence_percent,
            video_time_seconds: video_time,
            image_encoding: candidate.image_encoding,
            face_area_pixels: candidate.bounding_box.map(|b| b.area()),
            created_at: now,
        };

        self.last_accepted.insert(entry.person_id.clone(), video_time);
        self.entries.push_front(entry.clone());
        let evicted = if self.entries.len() > LOG_CAPACITY {
            self.entries.pop_back()
        } else {
            None
        };

        LogOutcome::Appended { entry, evicted }
    }

    /// Newest first.
    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
