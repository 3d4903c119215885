use std::time::Duration;

use shared::domain::SessionId;
use url::Url;

use crate::error::{ConfigError, EndpointError};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(200);
pub const DEFAULT_QUEUE_POLL_PERIOD: Duration = Duration::from_millis(5000);
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_url: Url,
    /// Quiescence window applied to parameter edits before an update is sent.
    pub debounce: Duration,
    pub queue_poll_period: Duration,
    pub http_timeout: Duration,
}

impl ClientConfig {
    pub fn new(server_url: &str) -> Result<Self, EndpointError> {
        let server_url = Url::parse(server_url.trim())?;
        Endpoints::new(&server_url)?;
        Ok(Self {
            server_url,
            debounce: DEFAULT_DEBOUNCE,
            queue_poll_period: DEFAULT_QUEUE_POLL_PERIOD,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
        })
    }

    /// Rejects zero-length windows, periods and timeouts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("debounce", self.debounce),
            ("queue_poll_period", self.queue_poll_period),
            ("http_timeout", self.http_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::ZeroDuration(name));
            }
        }
        Ok(())
    }
}

/// Addresses derived from the coordinator's base URL.
#[derive(Debug, Clone)]
pub struct Endpoints {
    base: Url,
    control: Url,
}

impl Endpoints {
    pub fn new(server_url: &Url) -> Result<Self, EndpointError> {
        let control_scheme = match server_url.scheme() {
            "https" => "wss",
            "http" => "ws",
            other => return Err(EndpointError::UnsupportedScheme(other.to_string())),
        };
        let base = server_url.clone();
        let mut control = join_segments(&base, &["ws"]);
        control
            .set_scheme(control_scheme)
            .map_err(|()| EndpointError::UnsupportedScheme(control_scheme.to_string()))?;
        Ok(Self { base, control })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Control channel address; secure iff the base URL is secure.
    pub fn control(&self) -> &Url {
        &self.control
    }

    pub fn stream(&self, session_id: &SessionId) -> Url {
        join_segments(&self.base, &["stream", session_id.as_str()])
    }

    pub fn queue_size(&self) -> Url {
        join_segments(&self.base, &["queue_size"])
    }
}

fn join_segments(base: &Url, segments: &[&str]) -> Url {
    let mut url = base.clone();
    url.set_query(None);
    url.set_fragment(None);
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url
}
