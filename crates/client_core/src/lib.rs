use std::{
    path::Path,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use reqwest::Client;
use shared::{
    domain::{ParameterEdit, SessionId, SessionParameters},
    error::ProtocolError,
};
use tokio::{
    sync::broadcast,
    task::{JoinError, JoinHandle},
};
use tracing::{debug, info, warn};
use url::Url;

pub mod aggregator;
pub mod channel;
pub mod config;
pub mod error;
pub mod media;
pub mod poller;
pub mod session;
pub mod snapshot;
pub mod transport;

pub use aggregator::ParameterStore;
pub use config::{ClientConfig, Endpoints};
pub use error::{ChannelError, ConfigError, EndpointError, SessionError, SnapshotError};
pub use media::DisplaySurface;
pub use session::{Controls, Session, SessionOutcome, SessionState};
pub use snapshot::SavedSnapshot;
pub use transport::{ControlTransport, WebSocketTransport};

use media::MediaStreamBinder;
use poller::{HttpQueueStatus, QueuePoller};
use session::SessionContext;

/// Everything the presentation layer needs to render, in emission order.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    StateChanged(SessionState),
    SessionStarted {
        session_id: SessionId,
        stream_url: Url,
    },
    SessionEnded(Result<SessionOutcome, SessionError>),
    QueueSize(u32),
}

/// A running session and the task that resolves with its outcome.
pub struct SessionTask {
    session: Arc<Session>,
    handle: JoinHandle<Result<SessionOutcome, SessionError>>,
}

impl SessionTask {
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub async fn outcome(self) -> Result<SessionOutcome, SessionError> {
        self.handle.await.unwrap_or_else(|err: JoinError| {
            Err(SessionError::Transport(format!("session task aborted: {err}")))
        })
    }
}

/// Owns the client-side state that outlives a single session: parameters, the display
/// binding, the transport and the one current session.
pub struct LiveClient {
    config: ClientConfig,
    endpoints: Endpoints,
    http: Client,
    transport: Arc<dyn ControlTransport>,
    binder: Arc<MediaStreamBinder>,
    params: ParameterStore,
    current: Mutex<Option<Arc<Session>>>,
    next_seq: AtomicU64,
    events: broadcast::Sender<ClientEvent>,
}

impl LiveClient {
    pub fn new(
        config: ClientConfig,
        initial: SessionParameters,
        surface: Arc<dyn DisplaySurface>,
    ) -> Result<Arc<Self>> {
        Self::new_with_transport(config, initial, surface, Arc::new(WebSocketTransport))
    }

    pub fn new_with_transport(
        config: ClientConfig,
        initial: SessionParameters,
        surface: Arc<dyn DisplaySurface>,
        transport: Arc<dyn ControlTransport>,
    ) -> Result<Arc<Self>> {
        config.validate().context("invalid client configuration")?;
        let endpoints = Endpoints::new(&config.server_url)
            .with_context(|| format!("unusable server url: {}", config.server_url))?;
        let http = Client::builder()
            .build()
            .context("failed to build http client")?;
        let (events, _) = broadcast::channel(256);
        Ok(Arc::new(Self {
            binder: Arc::new(MediaStreamBinder::new(endpoints.clone(), surface)),
            config,
            endpoints,
            http,
            transport,
            params: ParameterStore::new(initial),
            current: Mutex::new(None),
            next_seq: AtomicU64::new(1),
            events,
        }))
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub fn parameters(&self) -> &ParameterStore {
        &self.params
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub fn current_session(&self) -> Option<Arc<Session>> {
        self.current.lock().clone()
    }

    /// State of the current session, `Idle` before the first start.
    pub fn state(&self) -> SessionState {
        self.current_session()
            .map(|session| session.state())
            .unwrap_or(SessionState::Idle)
    }

    /// Start action. Refused while another session is connecting or active.
    pub fn start(&self) -> Result<SessionTask, SessionError> {
        let mut current = self.current.lock();
        if let Some(existing) = current.as_ref() {
            let state = existing.state();
            if state.is_running() {
                debug!(session = existing.seq(), state = %state, "session: start refused");
                return Err(SessionError::AlreadyRunning(state));
            }
        }

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let session = Session::new(
            seq,
            SessionContext {
                transport: Arc::clone(&self.transport),
                endpoints: self.endpoints.clone(),
                binder: Arc::clone(&self.binder),
                params: self.params.clone(),
                debounce: self.config.debounce,
                events: self.events.clone(),
            },
        );
        session.begin();
        *current = Some(Arc::clone(&session));

        let task_session = Arc::clone(&session);
        let events = self.events.clone();
        let handle = tokio::spawn(async move {
            let outcome = task_session.run().await;
            match &outcome {
                Ok(outcome) => {
                    info!(session = task_session.seq(), outcome = %outcome, "session: ended")
                }
                Err(err) => {
                    warn!(session = task_session.seq(), error = %err, "session: failed")
                }
            }
            let _ = events.send(ClientEvent::SessionEnded(outcome.clone()));
            outcome
        });

        Ok(SessionTask { session, handle })
    }

    /// Stop action. Resolves once the current session has fully torn down; a no-op when
    /// nothing is running.
    pub async fn stop(&self) {
        let Some(session) = self.current_session() else {
            debug!("session: stop ignored, no session");
            return;
        };
        session.stop();
        let mut state = session.subscribe_state();
        let _ = state.wait_for(|state| !state.is_running()).await;
    }

    /// Applies a control edit and, while a session is active, schedules a debounced update.
    pub fn edit(&self, edit: ParameterEdit) -> Result<SessionParameters, ProtocolError> {
        let params = self.params.apply(edit)?;
        if let Some(session) = self.current_session() {
            session.input_changed();
        }
        Ok(params)
    }

    pub fn spawn_queue_poller(&self) -> Result<JoinHandle<()>, ConfigError> {
        let source = HttpQueueStatus::new(
            self.http.clone(),
            self.endpoints.queue_size(),
            self.config.http_timeout,
        );
        Ok(QueuePoller::new(Arc::new(source), self.config.queue_poll_period)?
            .spawn(self.events.clone()))
    }

    /// Captures the frame currently streaming for the active session into `dir`.
    pub async fn snapshot(&self, dir: &Path) -> Result<SavedSnapshot, SnapshotError> {
        let session_id = self
            .current_session()
            .filter(|session| session.state() == SessionState::Active)
            .and_then(|session| session.session_id())
            .ok_or(SnapshotError::NotActive)?;
        let stream_url = self.endpoints.stream(&session_id);
        let snapshot = snapshot::capture(
            &self.http,
            &stream_url,
            session_id,
            self.params.snapshot(),
            self.config.http_timeout,
        )
        .await?;
        snapshot.write_to(dir).await
    }
}

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
