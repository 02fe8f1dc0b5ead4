/// Errors returned by [`LoopHandle`](crate::detection_loop::LoopHandle).
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The loop task has exited; no further commands are accepted.
    #[error("Detection loop has shut down")]
    LoopClosed,
}
