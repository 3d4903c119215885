use std::sync::Arc;

use parking_lot::Mutex;
use shared::domain::SessionId;
use tracing::{debug, info};
use url::Url;

use crate::config::Endpoints;

/// Where the session's image stream is shown. Fetching and decoding the stream is the
/// surface's business; the binder only assigns its address.
pub trait DisplaySurface: Send + Sync {
    fn set_source(&self, source: Option<&Url>);
}

pub struct MediaStreamBinder {
    endpoints: Endpoints,
    surface: Arc<dyn DisplaySurface>,
    bound: Mutex<Option<Url>>,
}

impl MediaStreamBinder {
    pub fn new(endpoints: Endpoints, surface: Arc<dyn DisplaySurface>) -> Self {
        Self {
            endpoints,
            surface,
            bound: Mutex::new(None),
        }
    }

    pub fn bind(&self, session_id: &SessionId) -> Url {
        let url = self.endpoints.stream(session_id);
        info!(session_id = %session_id, url = %url, "media: binding stream");
        self.surface.set_source(Some(&url));
        *self.bound.lock() = Some(url.clone());
        url
    }

    /// Resets the surface. No-op when nothing is bound.
    pub fn unbind(&self) {
        if let Some(url) = self.bound.lock().take() {
            debug!(url = %url, "media: unbinding stream");
            self.surface.set_source(None);
        }
    }

    pub fn current(&self) -> Option<Url> {
        self.bound.lock().clone()
    }
}
