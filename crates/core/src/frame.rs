//! The capture capability of the video player.

use crate::types::VideoSeconds;

/// A still frame grabbed from the player.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedFrame {
    /// JPEG data URL (`data:image/jpeg;base64,...`).
    pub encoding: String,
    /// Playback position the frame was taken at.
    pub video_time: VideoSeconds,
}

/// Produces still images of the current playback position on demand.
///
/// Implemented by whatever plays the video. Capture is cheap and
/// synchronous; `None` means "no frame this cycle" (paused, not loaded,
/// zero dimensions) and is never an error.
pub trait FrameSource: Send + Sync {
    fn capture(&self) -> Option<CapturedFrame>;

    /// Last known playback position.
    fn current_time(&self) -> VideoSeconds;

    /// Whether the player can produce frames yet.
    fn is_ready(&self) -> bool;

    fn has_ended(&self) -> bool;
}
