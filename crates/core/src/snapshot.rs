//! Append-only archive of detection stills.

use serde::Serialize;

use crate::detection::Classification;
use crate::types::{PersonId, Timestamp, VideoSeconds};

/// A still image recorded when a watched person was detected.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub id: u64,
    pub created_at: Timestamp,
    pub video_time_seconds: VideoSeconds,
    pub person_id: PersonId,
    pub person_name: String,
    pub classification: Classification,
    pub confidence_percent: f64,
    #[serde(skip_serializing)]
    pub image_encoding: String,
}

/// Fields of a snapshot before the archive assigns its id.
#[derive(Debug, Clone)]
pub struct NewSnapshot {
    pub created_at: Timestamp,
    pub video_time_seconds: VideoSeconds,
    pub person_id: PersonId,
    pub person_name: String,
    pub classification: Classification,
    pub confidence_percent: f64,
    pub image_encoding: String,
}

/// Snapshots in insertion order. Ids start at 1 and are never reused
/// within a session.
#[derive(Debug, Clone)]
pub struct SnapshotArchive {
    snapshots: Vec<Snapshot>,
    next_id: u64,
}

impl Default for SnapshotArchive {
    fn default() -> Self {
        Self {
            snapshots: Vec::new(),
            next_id: 1,
        }
    }
}

impl SnapshotArchive {
    pub fn record(&mut self, new: NewSnapshot) -> &Snapshot {
        let id = self.next_id;
        self.next_id += 1;
        self.snapshots.push(Snapshot {
            id,
            created_at: new.created_at,
            video_time_seconds: new.video_time_seconds,
            person_id: new.person_id,
            person_name: new.person_name,
            classification: new.classification,
            confidence_percent: new.confidence_percent,
            image_encoding: new.image_encoding,
        });
        &self.snapshots[self.snapshots.len() - 1]
    }

    pub fn all(&self) -> &[Snapshot] {
        &self.snapshots
    }

    pub fn get(&self, id: u64) -> Option<&Snapshot> {
        self.snapshots.iter().find(|s| s.id == id)
    }

    pub fn for_person<'a>(&'a self, person_id: &'a str) -> impl Iterator<Item = &'a Snapshot> + 'a {
        self.snapshots.iter().filter(move |s| s.person_id == person_id)
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}
