//! What stays on screen when a one-shot call fails.

use std::time::Duration;

use eyesis_core::detection::Detection;
use tokio::time::Instant;

use crate::events::PipelineEvent;

/// Remembers the last drawn overlay so a failed cycle can re-publish it
/// while it is still fresh.
#[derive(Debug, Clone)]
pub struct OverlayMemory {
    grace: Duration,
    last: Option<Drawn>,
}

#[derive(Debug, Clone)]
struct Drawn {
    at: Instant,
    detections: Vec<Detection>,
    alert: bool,
}

impl OverlayMemory {
    pub fn new(grace: Duration) -> Self {
        Self { grace, last: None }
    }

    /// Record a successful result and return the overlay to draw.
    pub fn show(&mut self, now: Instant, detections: Vec<Detection>, alert: bool) -> PipelineEvent {
        self.last = Some(Drawn {
            at: now,
            detections: detections.clone(),
            alert,
        });
        PipelineEvent::Overlay { detections, alert }
    }

    /// The overlay after a cycle that produced no result: the previous
    /// one while younger than the grace window, otherwise a clear.
    pub fn on_failure(&mut self, now: Instant) -> PipelineEvent {
        match &self.last {
            Some(drawn) if now.saturating_duration_since(drawn.at) < self.grace => {
                PipelineEvent::Overlay {
                    detections: drawn.detections.clone(),
                    alert: drawn.alert,
                }
            }
            _ => {
                self.last = None;
                PipelineEvent::OverlayCleared
            }
        }
    }

    pub fn clear(&mut self) {
        self.last = None;
    }
}
