use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed control frame: {0}")]
    MalformedFrame(#[from] serde_json::Error),
    #[error("guidance scale must be a finite number, got {0}")]
    InvalidGuidanceScale(f64),
}
