//! Artifact formats consumed by download/export collaborators.

use std::io::Write;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::NaiveDateTime;

use crate::clip::Clip;
use crate::detection_log::LogEntry;
use crate::error::CoreError;
use crate::snapshot::Snapshot;
use crate::types::VideoSeconds;

const UTF8_BOM: &str = "\u{feff}";
pub const LOG_CSV_HEADER: [&str; 4] = ["시간", "이름", "구분", "정확도(%)"];

// ---------------------------------------------------------------------------
// Time formatting
// ---------------------------------------------------------------------------

/// `HH:MM:SS`, truncating fractional seconds.
pub fn format_clock(seconds: VideoSeconds) -> String {
    let total = whole_seconds(seconds);
    format!("{:02}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

/// `M:SS`, minutes unpadded.
pub fn format_minutes(seconds: VideoSeconds) -> String {
    let total = whole_seconds(seconds);
    format!("{}:{:02}", total / 60, total % 60)
}

fn whole_seconds(seconds: VideoSeconds) -> u64 {
    if seconds.is_finite() && seconds > 0.0 {
        seconds.floor() as u64
    } else {
        0
    }
}

// ---------------------------------------------------------------------------
// CSV
// ---------------------------------------------------------------------------

fn escape_csv(cell: &str) -> String {
    if cell.contains([',', '"', '\n']) {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}

fn csv_row(cells: &[&str]) -> String {
    cells
        .iter()
        .map(|c| escape_csv(c))
        .collect::<Vec<_>>()
        .join(",")
}

/// The log as CSV text: BOM, header, then one row per entry in ascending
/// video time.
pub fn log_csv<'a>(entries: impl IntoIterator<Item = &'a LogEntry>) -> String {
    let mut sorted: Vec<&LogEntry> = entries.into_iter().collect();
    sorted.sort_by(|a, b| a.video_time_seconds.total_cmp(&b.video_time_seconds));

    let mut rows = vec![csv_row(&LOG_CSV_HEADER)];
    for entry in sorted {
        let time = format_clock(entry.video_time_seconds);
        let confidence = format!("{:.1}", entry.confidence_percent);
        rows.push(csv_row(&[
            time.as_str(),
            entry.person_name.as_str(),
            entry.classification.label(),
            confidence.as_str(),
        ]));
    }

    format!("{UTF8_BOM}{}", rows.join("\n"))
}

pub fn write_log_csv<'a, W: Write>(
    mut writer: W,
    entries: impl IntoIterator<Item = &'a LogEntry>,
) -> Result<(), CoreError> {
    writer.write_all(log_csv(entries).as_bytes())?;
    writer.flush()?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Filenames
// ---------------------------------------------------------------------------

/// `detection_log_YYYYMMDD_HHMM.csv` for the local export time.
pub fn log_filename(at: NaiveDateTime) -> String {
    format!("detection_log_{}.csv", at.format("%Y%m%d_%H%M"))
}

/// `{index}_criminal_{name}_{m-ss}.jpg`, `position` being zero-based.
pub fn snapshot_filename(position: usize, snapshot: &Snapshot) -> String {
    format!(
        "{}_criminal_{}_{}.jpg",
        position + 1,
        file_safe_name(&snapshot.person_name),
        format_minutes(snapshot.video_time_seconds).replacen(':', "-", 1)
    )
}

/// `clip_{name}_{start}s-{end}s.mp4`. Open clips have no filename yet.
pub fn clip_filename(clip: &Clip) -> Result<String, CoreError> {
    let end = clip.end_time_seconds.ok_or(CoreError::ClipOpen(clip.id))?;
    Ok(format!(
        "clip_{}_{:.1}s-{:.1}s.mp4",
        file_safe_name(&clip.person_name),
        clip.start_time_seconds,
        end
    ))
}

/// A person name usable inside a single filename component. Path
/// separators, characters Windows rejects, control characters and `..`
/// become `_`.
pub fn file_safe_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.replace("..", "_");
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

// ---------------------------------------------------------------------------
// Images
// ---------------------------------------------------------------------------

/// Decode a base64 image, with or without a `data:...;base64,` prefix.
pub fn decode_data_url(encoding: &str) -> Result<Vec<u8>, CoreError> {
    let payload = match encoding.strip_prefix("data:") {
        Some(rest) => {
            let (meta, data) = rest
                .split_once(',')
                .ok_or_else(|| CoreError::InvalidImage("data URL has no payload".into()))?;
            if !meta.ends_with(";base64") {
                return Err(CoreError::InvalidImage(format!(
                    "unsupported data URL encoding: {meta}"
                )));
            }
            data
        }
        None => encoding,
    };

    STANDARD
        .decode(payload.trim())
        .map_err(|e| CoreError::InvalidImage(e.to_string()))
}

/// Wrap raw image bytes as a base64 data URL of the given MIME type.
pub fn image_data_url(mime: &str, bytes: &[u8]) -> String {
    format!("data:{mime};base64,{}", STANDARD.encode(bytes))
}

pub fn jpeg_data_url(bytes: &[u8]) -> String {
    image_data_url("image/jpeg", bytes)
}
