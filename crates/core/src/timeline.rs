//! Collapses point-in-time snapshots into displayable intervals.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::snapshot::Snapshot;
use crate::types::{PersonId, VideoSeconds};

/// Gap (seconds) under which two sightings belong to the same interval.
pub const DEFAULT_MERGE_THRESHOLD: VideoSeconds = 2.0;

/// Synthetic width given to a snapshot so it can take part in the merge.
pub const SNAPSHOT_SPAN_SECONDS: VideoSeconds = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimelineInterval {
    pub start_time_seconds: VideoSeconds,
    pub end_time_seconds: VideoSeconds,
    pub max_confidence: f64,
    /// Snapshot the interval started from; seek target for the UI.
    pub source_snapshot_id: u64,
}

impl TimelineInterval {
    /// The micro-interval for a single snapshot.
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        Self {
            start_time_seconds: snapshot.video_time_seconds,
            end_time_seconds: snapshot.video_time_seconds + SNAPSHOT_SPAN_SECONDS,
            max_confidence: snapshot.confidence_percent,
            source_snapshot_id: snapshot.id,
        }
    }
}

/// Greedy interval merge.
///
/// Sorts `events` by start and folds each one into the running interval
/// when it starts within `threshold` of that interval's end. Confidence
/// reduces by max. Non-empty input always yields at least one interval.
pub fn merge(mut events: Vec<TimelineInterval>, threshold: VideoSeconds) -> Vec<TimelineInterval> {
    events.retain(|e| !e.start_time_seconds.is_nan());
    events.sort_by(|a, b| a.start_time_seconds.total_cmp(&b.start_time_seconds));

    let mut events = events.into_iter();
    let Some(mut current) = events.next() else {
        return Vec::new();
    };

    let mut merged = Vec::new();
    for next in events {
        if next.start_time_seconds - current.end_time_seconds <= threshold {
            current.end_time_seconds = current.end_time_seconds.max(next.end_time_seconds);
            current.max_confidence = current.max_confidence.max(next.max_confidence);
        } else {
            merged.push(current);
            current = next;
        }
    }
    merged.push(current);
    merged
}

/// Merged intervals for one person's snapshots.
pub fn intervals_for<'a>(
    snapshots: impl IntoIterator<Item = &'a Snapshot>,
    threshold: VideoSeconds,
) -> Vec<TimelineInterval> {
    merge(
        snapshots.into_iter().map(TimelineInterval::from_snapshot).collect(),
        threshold,
    )
}

/// Merged intervals per person, keyed by person id.
pub fn intervals_by_person(
    snapshots: &[Snapshot],
    threshold: VideoSeconds,
) -> BTreeMap<PersonId, Vec<TimelineInterval>> {
    let mut grouped: BTreeMap<PersonId, Vec<&Snapshot>> = BTreeMap::new();
    for snapshot in snapshots {
        grouped
            .entry(snapshot.person_id.clone())
            .or_default()
            .push(snapshot);
    }
    grouped
        .into_iter()
        .map(|(person_id, snaps)| (person_id, intervals_for(snaps, threshold)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::Classification;
    use chrono::Utc;

    fn snapshot(id: u64, person_id: &str, video_time: f64, confidence: f64) -> Snapshot {
        Snapshot {
            id,
            created_at: Utc::now(),
            video_time_seconds: video_time,
            person_id: person_id.into(),
            person_name: person_id.into(),
            classification: Classification::Criminal,
            confidence_percent: confidence,
            image_encoding: String::new(),
        }
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn alice_scenario_merges_into_two_intervals() {
        let snaps = vec![
            snapshot(1, "alice", 10.0, 80.0),
            snapshot(2, "alice", 11.5, 95.0),
            snapshot(3, "alice", 20.0, 60.0),
        ];
        let intervals = intervals_for(&snaps, DEFAULT_MERGE_THRESHOLD);

        assert_eq!(intervals.len(), 2);
        assert!(approx(intervals[0].start_time_seconds, 10.0));
        assert!(approx(intervals[0].end_time_seconds, 11.6));
        assert_eq!(intervals[0].max_confidence, 95.0);
        assert_eq!(intervals[0].source_snapshot_id, 1);
        assert!(approx(intervals[1].start_time_seconds, 20.0));
        assert!(approx(intervals[1].end_time_seconds, 20.1));
        assert_eq!(intervals[1].max_confidence, 60.0);
    }

    #[test]
    fn unsorted_input_is_sorted_first() {
        let snaps = vec![
            snapshot(1, "a", 20.0, 60.0),
            snapshot(2, "a", 10.0, 80.0),
            snapshot(3, "a", 11.5, 95.0),
        ];
        let intervals = intervals_for(&snaps, DEFAULT_MERGE_THRESHOLD);
        assert_eq!(intervals.len(), 2);
        assert_eq!(intervals[0].source_snapshot_id, 2);
    }

    #[test]
    fn gap_equal_to_threshold_merges() {
        let events = vec![
            TimelineInterval {
                start_time_seconds: 0.0,
                end_time_seconds: 1.0,
                max_confidence: 1.0,
                source_snapshot_id: 1,
            },
            TimelineInterval {
                start_time_seconds: 3.0,
                end_time_seconds: 3.5,
                max_confidence: 2.0,
                source_snapshot_id: 2,
            },
        ];
        let merged = merge(events, 2.0);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].end_time_seconds, 3.5);
    }

    #[test]
    fn empty_input_yields_nothing() {
        assert!(merge(Vec::new(), DEFAULT_MERGE_THRESHOLD).is_empty());
    }

    #[test]
    fn totality_bounds() {
        let times = [0.0, 0.5, 3.0, 7.0, 7.1, 15.0, 30.0, 31.0];
        for n in 1..=times.len() {
            let snaps: Vec<Snapshot> = times[..n]
                .iter()
                .enumerate()
                .map(|(i, t)| snapshot(i as u64 + 1, "a", *t, 50.0))
                .collect();
            let intervals = intervals_for(&snaps, DEFAULT_MERGE_THRESHOLD);
            assert!(!intervals.is_empty());
            assert!(intervals.len() <= n);
        }
    }

    #[test]
    fn merge_is_idempotent() {
        let snaps: Vec<Snapshot> = [0.0, 1.0, 2.5, 9.0, 10.0, 25.0]
            .iter()
            .enumerate()
            .map(|(i, t)| snapshot(i as u64 + 1, "a", *t, 10.0 * (i as f64 + 1.0)))
            .collect();
        let once = intervals_for(&snaps, DEFAULT_MERGE_THRESHOLD);
        let twice = merge(once.clone(), DEFAULT_MERGE_THRESHOLD);
        assert_eq!(once, twice);
    }

    #[test]
    fn grouped_by_person() {
        let snaps = vec![
            snapshot(1, "a", 1.0, 50.0),
            snapshot(2, "b", 1.0, 60.0),
            snapshot(3, "a", 30.0, 70.0),
        ];
        let by_person = intervals_by_person(&snaps, DEFAULT_MERGE_THRESHOLD);
        assert_eq!(by_person["a"].len(), 2);
        assert_eq!(by_person["b"].len(), 1);
    }
}
