#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Clip {0} is still open")]
    ClipOpen(u64),

    #[error("Invalid image data: {0}")]
    InvalidImage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
