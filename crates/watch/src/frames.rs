//! Replays a directory of extracted frames as a video player.
//!
//! Files are ordered by name and mapped to video time at a fixed frame
//! rate. Playback runs on the wall clock from [`DirectoryFrameSource::play`];
//! each capture returns the frame under the current position.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

use eyesis_core::error::CoreError;
use eyesis_core::export::image_data_url;
use eyesis_core::frame::{CapturedFrame, FrameSource};
use eyesis_core::types::VideoSeconds;

#[derive(Debug)]
pub struct DirectoryFrameSource {
    frames: Vec<PathBuf>,
    fps: f64,
    started: OnceLock<Instant>,
    /// Video time of the last captured frame, as `f64` bits.
    last_capture: AtomicU64,
}

impl DirectoryFrameSource {
    /// Index the JPEG and PNG files in `dir`. Other files are ignored.
    pub fn open(dir: &Path, fps: f64) -> Result<Self, CoreError> {
        if !(fps.is_finite() && fps > 0.0) {
            return Err(CoreError::Validation(format!("invalid frame rate: {fps}")));
        }

        let mut frames: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && mime_type(path).is_some())
            .collect();
        frames.sort();

        if frames.is_empty() {
            return Err(CoreError::Validation(format!(
                "no JPEG or PNG frames in {}",
                dir.display()
            )));
        }

        tracing::info!(dir = %dir.display(), frames = frames.len(), fps, "Frame directory indexed");
        Ok(Self {
            frames,
            fps,
            started: OnceLock::new(),
            last_capture: AtomicU64::new(0f64.to_bits()),
        })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn duration(&self) -> VideoSeconds {
        self.frames.len() as f64 / self.fps
    }

    /// Start playback. Later calls have no effect.
    pub fn play(&self) {
        let _ = self.started.set(Instant::now());
    }

    /// Video time of the most recent successful capture.
    pub fn last_capture_time(&self) -> VideoSeconds {
        f64::from_bits(self.last_capture.load(Ordering::SeqCst))
    }

    fn position(&self) -> Option<VideoSeconds> {
        self.started
            .get()
            .map(|start| start.elapsed().as_secs_f64().min(self.duration()))
    }
}

impl FrameSource for DirectoryFrameSource {
    fn capture(&self) -> Option<CapturedFrame> {
        let position = self.position()?;
        let index = (position * self.fps).floor() as usize;
        let path = self.frames.get(index)?;
        let mime = mime_type(path)?;

        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to read frame");
                return None;
            }
        };

        let video_time = index as f64 / self.fps;
        self.last_capture.store(video_time.to_bits(), Ordering::SeqCst);
        Some(CapturedFrame {
            encoding: image_data_url(mime, &bytes),
            video_time,
        })
    }

    fn current_time(&self) -> VideoSeconds {
        self.position().unwrap_or(0.0)
    }

    fn is_ready(&self) -> bool {
        self.started.get().is_some()
    }

    fn has_ended(&self) -> bool {
        self.position().is_some_and(|p| p >= self.duration())
    }
}

fn mime_type(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        _ => None,
    }
}
