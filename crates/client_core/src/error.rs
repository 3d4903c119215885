use thiserror::Error;

use crate::session::SessionState;

#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("invalid server url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("server url must use http or https, got {0}")]
    UnsupportedScheme(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("failed to connect control channel {url}: {reason}")]
    Connect { url: String, reason: String },
}

/// Ways a session can fail. A coordinator `timeout` is not a failure and never lands here.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("a session is already {0}")]
    AlreadyRunning(SessionState),
    #[error("{0}")]
    Connect(String),
    #[error("control channel failed: {0}")]
    Transport(String),
    #[error("{0}")]
    Rejected(String),
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("no active session to capture")]
    NotActive,
    #[error("stream request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("stream ended before a complete frame arrived")]
    StreamEnded,
    #[error("frame is not a JPEG image")]
    NotJpeg,
    #[error("frame exceeds {limit} bytes without completing")]
    FrameTooLarge { limit: usize },
    #[error("failed to encode snapshot metadata: {0}")]
    Metadata(#[from] serde_json::Error),
    #[error("failed to write snapshot: {0}")]
    Io(#[from] std::io::Error),
}
