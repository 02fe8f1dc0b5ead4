use std::time::Duration;

use eyesis_core::timeline::DEFAULT_MERGE_THRESHOLD;
use eyesis_core::types::VideoSeconds;

/// Timing knobs of the detection loop.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Delay before retrying a capture that produced no frame.
    pub idle_retry: Duration,
    /// Window in which timeline recompute triggers coalesce.
    pub timeline_debounce: Duration,
    /// How long the previous overlay survives a failed one-shot call.
    pub overlay_grace: Duration,
    /// Gap under which snapshots merge into one timeline interval.
    pub merge_threshold: VideoSeconds,
    /// Capacity of the command queue behind [`LoopHandle`](crate::detection_loop::LoopHandle).
    pub command_capacity: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            idle_retry: Duration::from_millis(100),
            timeline_debounce: Duration::from_millis(100),
            overlay_grace: Duration::from_millis(500),
            merge_threshold: DEFAULT_MERGE_THRESHOLD,
            command_capacity: 32,
        }
    }
}
