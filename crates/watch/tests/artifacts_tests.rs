//! Artifact files written for a finished session.

use chrono::Utc;
use eyesis_core::detection::{BoundingBox, Classification, Detection, DetectionResult};
use eyesis_core::export::jpeg_data_url;
use eyesis_core::frame::{CapturedFrame, FrameSource};
use eyesis_core::person::{SelectedPerson, Selection};
use eyesis_core::session::SessionContext;
use eyesis_watch::artifacts::{ArtifactWriter, CLIP_MANIFEST};
use serde_json::Value;

/// A player with nothing to capture: snapshot images come from the
/// backend's alert still.
struct NoFrames;

impl FrameSource for NoFrames {
    fn capture(&self) -> Option<CapturedFrame> {
        None
    }
    fn current_time(&self) -> f64 {
        0.0
    }
    fn is_ready(&self) -> bool {
        true
    }
    fn has_ended(&self) -> bool {
        false
    }
}

fn session() -> SessionContext {
    SessionContext::new(Selection::new(vec![SelectedPerson::new("yh", "황윤하", true)]))
}

fn sighting(video_time: f64, image: Option<String>) -> DetectionResult {
    DetectionResult {
        detections: vec![Detection {
            person_id: "yh".into(),
            display_name: "황윤하".into(),
            confidence_percent: 91.5,
            bounding_box: Some(BoundingBox::from_corners([0.0, 0.0, 20.0, 30.0])),
            classification: Classification::Criminal,
            face_angle: None,
        }],
        alert_snapshot: image,
        video_timestamp_seconds: video_time,
        alert: true,
        frame_id: None,
    }
}

// ---------------------------------------------------------------------------
// Session export
// ---------------------------------------------------------------------------

#[test]
fn writes_snapshots_log_and_manifest() {
    let out = tempfile::tempdir().unwrap();
    let mut session = session();
    session.apply(&sighting(75.0, Some(jpeg_data_url(b"jpeg-bytes"))), &NoFrames, Utc::now());
    session.apply(&DetectionResult::empty(76.0), &NoFrames, Utc::now());

    let writer = ArtifactWriter::new(out.path().join("run")).unwrap();
    let summary = writer.write_session(&session).unwrap();

    assert_eq!(summary.snapshots.len(), 1);
    let snapshot = &summary.snapshots[0];
    assert_eq!(snapshot.file_name().unwrap(), "1_criminal_황윤하_1-15.jpg");
    assert_eq!(std::fs::read(snapshot).unwrap(), b"jpeg-bytes");

    let log = summary.log.unwrap();
    let name = log.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("detection_log_") && name.ends_with(".csv"));
    let csv = std::fs::read_to_string(&log).unwrap();
    assert!(csv.starts_with('\u{feff}'));
    assert!(csv.contains("황윤하"));

    let manifest: Value =
        serde_json::from_slice(&std::fs::read(out.path().join("run").join(CLIP_MANIFEST)).unwrap()).unwrap();
    let clips = manifest.as_array().unwrap();
    assert_eq!(clips.len(), 1);
    assert_eq!(clips[0]["person_id"], "yh");
    assert_eq!(clips[0]["start_time_seconds"], 75.0);
    assert_eq!(clips[0]["end_time_seconds"], 76.0);
}

#[test]
fn unreadable_snapshot_image_skipped() {
    let out = tempfile::tempdir().unwrap();
    let mut session = session();
    session.apply(&sighting(1.0, Some("data:image/jpeg;base64,@@@".into())), &NoFrames, Utc::now());
    session.apply(&sighting(9.0, Some(jpeg_data_url(b"ok"))), &NoFrames, Utc::now());
    assert_eq!(session.snapshots().len(), 2);

    let writer = ArtifactWriter::new(out.path()).unwrap();
    let written = writer.write_snapshots(&session).unwrap();

    assert_eq!(written.len(), 1);
    assert_eq!(written[0].file_name().unwrap(), "2_criminal_황윤하_0-09.jpg");
}

#[test]
fn names_with_path_separators_stay_in_output_dir() {
    let out = tempfile::tempdir().unwrap();
    let mut session =
        SessionContext::new(Selection::new(vec![SelectedPerson::new("acdc", "AC/DC", true)]));
    let mut result = sighting(1.0, Some(jpeg_data_url(b"still")));
    result.detections[0].person_id = "acdc".into();
    result.detections[0].display_name = "AC/DC".into();
    session.apply(&result, &NoFrames, Utc::now());
    session.apply(&DetectionResult::empty(2.0), &NoFrames, Utc::now());

    let writer = ArtifactWriter::new(out.path()).unwrap();
    let summary = writer.write_session(&session).unwrap();

    assert_eq!(summary.snapshots.len(), 1);
    assert_eq!(summary.snapshots[0].parent().unwrap(), out.path());
    assert_eq!(summary.snapshots[0].file_name().unwrap(), "1_criminal_AC_DC_0-01.jpg");
    assert!(summary.log.is_some());
    assert!(out.path().join(CLIP_MANIFEST).is_file());
}

#[test]
fn unwritable_snapshot_does_not_block_log_and_manifest() {
    let out = tempfile::tempdir().unwrap();
    let mut session = session();
    session.apply(&sighting(75.0, Some(jpeg_data_url(b"jpeg-bytes"))), &NoFrames, Utc::now());

    let writer = ArtifactWriter::new(out.path()).unwrap();
    // A directory already sits where the snapshot file would go.
    std::fs::create_dir(out.path().join("1_criminal_황윤하_1-15.jpg")).unwrap();
    let summary = writer.write_session(&session).unwrap();

    assert!(summary.snapshots.is_empty());
    assert!(summary.log.is_some());
    assert!(summary.manifest.unwrap().is_file());
}

#[test]
fn empty_session_writes_manifest_only() {
    let out = tempfile::tempdir().unwrap();
    let writer = ArtifactWriter::new(out.path()).unwrap();
    let summary = writer.write_session(&session()).unwrap();

    assert!(summary.snapshots.is_empty());
    assert!(summary.log.is_none());

    let manifest = std::fs::read_to_string(summary.manifest.unwrap()).unwrap();
    assert_eq!(manifest.trim(), "[]");
}

#[test]
fn open_clips_listed_without_end() {
    let out = tempfile::tempdir().unwrap();
    let mut session = session();
    session.apply(&sighting(3.0, None), &NoFrames, Utc::now());

    let writer = ArtifactWriter::new(out.path()).unwrap();
    let path = writer.write_clip_manifest(&session.clips().all()).unwrap();
    let manifest: Value = serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();

    assert_eq!(manifest[0]["start_time_seconds"], 3.0);
    assert!(manifest[0]["end_time_seconds"].is_null());
}
