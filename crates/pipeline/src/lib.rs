//! Detection scheduling on top of the transport.
//!
//! [`DetectionLoop`](detection_loop::DetectionLoop) runs one detection cycle
//! at a time while detection is active, applies every result to the session
//! and broadcasts [`PipelineEvent`](events::PipelineEvent)s for presentation
//! collaborators. It is driven through a cloneable
//! [`LoopHandle`](detection_loop::LoopHandle).

pub mod config;
pub mod debounce;
pub mod detection_loop;
pub mod error;
pub mod events;
pub mod overlay;
