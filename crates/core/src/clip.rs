//! Continuous-presence intervals per watched person.
//!
//! A person has an open clip exactly while they keep appearing in
//! consecutive processed responses. The first response without them closes
//! the clip at that response's video time.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::detection::Classification;
use crate::types::{PersonId, VideoSeconds};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Clip {
    pub id: u64,
    pub person_id: PersonId,
    pub person_name: String,
    pub classification: Classification,
    /// Highest confidence seen while the clip was open.
    pub confidence_percent: f64,
    pub start_time_seconds: VideoSeconds,
    /// `None` while the clip is open.
    pub end_time_seconds: Option<VideoSeconds>,
}

impl Clip {
    pub fn is_open(&self) -> bool {
        self.end_time_seconds.is_none()
    }

    pub fn duration_seconds(&self) -> Option<VideoSeconds> {
        self.end_time_seconds.map(|end| end - self.start_time_seconds)
    }
}

/// What `ClipTracker::observe` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipChange {
    Opened(u64),
    Extended(u64),
}

#[derive(Debug, Clone)]
pub struct ClipTracker {
    active: HashMap<PersonId, Clip>,
    closed: Vec<Clip>,
    next_id: u64,
}

impl Default for ClipTracker {
    fn default() -> Self {
        Self {
            active: HashMap::new(),
            closed: Vec::new(),
            next_id: 1,
        }
    }
}

impl ClipTracker {
    /// Record a sighting. Opens a clip at `video_time` if the person has
    /// none, otherwise raises the open clip's confidence maximum.
    pub fn observe(
        &mut self,
        person_id: &str,
        person_name: &str,
        classification: Classification,
        confidence_percent: f64,
        video_time: VideoSeconds,
    ) -> ClipChange {
        if let Some(clip) = self.active.get_mut(person_id) {
            clip.confidence_percent = clip.confidence_percent.max(confidence_percent);
            return ClipChange::Extended(clip.id);
        }

        let id = self.next_id;
        self.next_id += 1;
        self.active.insert(
            person_id.to_string(),
            Clip {
                id,
                person_id: person_id.to_string(),
                person_name: person_name.to_string(),
                classification,
                confidence_percent,
                start_time_seconds: video_time,
                end_time_seconds: None,
            },
        );
        ClipChange::Opened(id)
    }

    /// Close the person's open clip, if any. An end earlier than the start
    /// (out-of-order responses) is clamped to the start.
    pub fn close(&mut self, person_id: &str, end_time: VideoSeconds) -> Option<&Clip> {
        let mut clip = self.active.remove(person_id)?;
        let end = if end_time.is_nan() {
            clip.start_time_seconds
        } else {
            end_time.max(clip.start_time_seconds)
        };
        clip.end_time_seconds = Some(end);
        self.closed.push(clip);
        self.closed.last()
    }

    /// Close open clips of every id in `selected` that is not in `present`.
    /// Clips of persons outside `selected` are left alone.
    pub fn close_absent(
        &mut self,
        selected: &[PersonId],
        present: &HashSet<PersonId>,
        end_time: VideoSeconds,
    ) -> Vec<Clip> {
        let mut closed = Vec::new();
        for id in selected {
            if present.contains(id) {
                continue;
            }
            if let Some(clip) = self.close(id, end_time) {
                closed.push(clip.clone());
            }
        }
        closed
    }

    /// Close every open clip, oldest first.
    pub fn close_all(&mut self, end_time: VideoSeconds) -> Vec<Clip> {
        let mut open: Vec<(u64, PersonId)> = self
            .active
            .values()
            .map(|clip| (clip.id, clip.person_id.clone()))
            .collect();
        open.sort_by_key(|(id, _)| *id);

        open.into_iter()
            .filter_map(|(_, person_id)| self.close(&person_id, end_time).cloned())
            .collect()
    }

    pub fn active(&self, person_id: &str) -> Option<&Clip> {
        self.active.get(person_id)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn closed(&self) -> &[Clip] {
        &self.closed
    }

    /// Every clip, open and closed, sorted by id.
    pub fn all(&self) -> Vec<Clip> {
        let mut clips: Vec<Clip> = self
            .closed
            .iter()
            .chain(self.active.values())
            .cloned()
            .collect();
        clips.sort_by_key(|clip| clip.id);
        clips
    }
}
