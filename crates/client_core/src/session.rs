//! Session lifecycle: one control channel, one admitted run, one outcome.

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use futures::StreamExt;
use parking_lot::Mutex;
use shared::{domain::SessionId, protocol::ControlMessage};
use tokio::sync::{broadcast, watch, Notify};
use tracing::{debug, info, warn};

use crate::{
    aggregator::{InputAggregator, ParameterStore},
    channel::{ChannelEvent, ControlChannel, ControlLink},
    config::Endpoints,
    error::SessionError,
    media::MediaStreamBinder,
    transport::ControlTransport,
    ClientEvent,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    AwaitingStart,
    Active,
    Terminating,
    Ended,
}

impl SessionState {
    pub fn can_transition_to(self, next: Self) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Connecting)
                | (Connecting, AwaitingStart)
                | (AwaitingStart, Active)
                | (Connecting | AwaitingStart | Active, Terminating)
                | (Terminating, Ended)
        )
    }

    /// True while a session holds (or is acquiring) the control channel.
    pub fn is_running(self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::AwaitingStart | Self::Active | Self::Terminating
        )
    }

    pub fn controls(self) -> Controls {
        match self {
            Self::Idle | Self::Ended => Controls {
                start: true,
                stop: false,
                snapshot: false,
            },
            Self::Connecting | Self::AwaitingStart => Controls {
                start: false,
                stop: true,
                snapshot: false,
            },
            Self::Active => Controls {
                start: false,
                stop: true,
                snapshot: true,
            },
            Self::Terminating => Controls {
                start: false,
                stop: false,
                snapshot: false,
            },
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::AwaitingStart => "awaiting-start",
            Self::Active => "active",
            Self::Terminating => "terminating",
            Self::Ended => "ended",
        })
    }
}

/// Which user-facing actions are enabled in a given state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Controls {
    pub start: bool,
    pub stop: bool,
    pub snapshot: bool,
}

/// Expected ways for a session to end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The coordinator ended the session.
    Timeout { message: Option<String> },
    /// The channel closed without a terminal message.
    Disconnected,
    /// The user stopped the session.
    Stopped,
}

impl fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout { .. } => f.write_str("timeout"),
            Self::Disconnected => f.write_str("disconnected"),
            Self::Stopped => f.write_str("stopped"),
        }
    }
}

pub(crate) struct SessionContext {
    pub transport: Arc<dyn ControlTransport>,
    pub endpoints: Endpoints,
    pub binder: Arc<MediaStreamBinder>,
    pub params: ParameterStore,
    pub debounce: Duration,
    pub events: broadcast::Sender<ClientEvent>,
}

pub struct Session {
    seq: u64,
    ctx: SessionContext,
    state: watch::Sender<SessionState>,
    session_id: Mutex<Option<SessionId>>,
    aggregator: Mutex<Option<InputAggregator>>,
    channel: Mutex<Option<Arc<ControlChannel>>>,
    stopping: AtomicBool,
    stop: Notify,
}

impl Session {
    pub(crate) fn new(seq: u64, ctx: SessionContext) -> Arc<Self> {
        let (state, _) = watch::channel(SessionState::Idle);
        Arc::new(Self {
            seq,
            ctx,
            state,
            session_id: Mutex::new(None),
            aggregator: Mutex::new(None),
            channel: Mutex::new(None),
            stopping: AtomicBool::new(false),
            stop: Notify::new(),
        })
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Coordinator-assigned id; `None` until `start` arrives.
    pub fn session_id(&self) -> Option<SessionId> {
        self.session_id.lock().clone()
    }

    /// Stop action. No-op unless the session is connecting, awaiting start or active.
    ///
    /// The pending update is cancelled and the channel closed before this returns; the run
    /// task finishes the teardown.
    pub fn stop(&self) {
        let state = self.state();
        if !matches!(
            state,
            SessionState::Connecting | SessionState::AwaitingStart | SessionState::Active
        ) {
            debug!(session = self.seq, state = %state, "session: stop ignored");
            return;
        }
        info!(session = self.seq, state = %state, "session: stop requested");
        self.stopping.store(true, Ordering::SeqCst);
        if let Some(aggregator) = self.aggregator.lock().take() {
            aggregator.detach();
        }
        if let Some(channel) = self.channel.lock().as_ref() {
            channel.close();
        }
        self.stop.notify_one();
    }

    /// Forwards a parameter change to the aggregator while the session is active.
    pub(crate) fn input_changed(&self) {
        if let Some(aggregator) = self.aggregator.lock().as_ref() {
            aggregator.submit();
        }
    }

    pub(crate) fn has_pending_update(&self) -> bool {
        self.aggregator
            .lock()
            .as_ref()
            .is_some_and(InputAggregator::has_pending)
    }

    /// Start action: claims the session for connecting.
    pub(crate) fn begin(&self) -> bool {
        self.transition(SessionState::Connecting)
    }

    /// Drives the session to completion. Resolves with how the session ended; every path
    /// leaves the session `Ended` with the aggregator detached and the channel closed.
    pub(crate) async fn run(&self) -> Result<SessionOutcome, SessionError> {
        if self.state() != SessionState::Connecting {
            return Err(SessionError::AlreadyRunning(self.state()));
        }
        let control_url = self.ctx.endpoints.control().clone();
        info!(session = self.seq, url = %control_url, "session: connecting");

        let link = tokio::select! {
            biased;
            _ = self.stop.notified() => {
                info!(session = self.seq, "session: stopped before channel opened");
                self.teardown();
                return Ok(SessionOutcome::Stopped);
            }
            result = self.ctx.transport.connect(&control_url) => match result {
                Ok(link) => link,
                Err(err) => {
                    warn!(
                        session = self.seq,
                        error = %err,
                        "session: control channel failed to open"
                    );
                    self.teardown();
                    return Err(SessionError::Connect(err.to_string()));
                }
            },
        };

        let ControlLink {
            outbound,
            mut events,
        } = link;
        let channel = Arc::new(ControlChannel::new(outbound));
        *self.channel.lock() = Some(Arc::clone(&channel));
        self.transition(SessionState::AwaitingStart);

        let result = loop {
            let event = tokio::select! {
                biased;
                _ = self.stop.notified() => break Ok(SessionOutcome::Stopped),
                event = events.next() => event,
            };
            match event {
                Some(ChannelEvent::Message(message)) => {
                    if let Some(result) = self.dispatch(message, &channel) {
                        break result;
                    }
                }
                Some(ChannelEvent::Malformed { raw, reason }) => {
                    warn!(
                        session = self.seq,
                        raw = %raw,
                        reason = %reason,
                        "session: ignoring malformed control message"
                    );
                }
                Some(ChannelEvent::Closed { reason }) => {
                    info!(
                        session = self.seq,
                        reason = reason.as_deref().unwrap_or(""),
                        "session: control channel closed by coordinator"
                    );
                    break Ok(SessionOutcome::Disconnected);
                }
                None => {
                    info!(session = self.seq, "session: control channel ended");
                    break Ok(SessionOutcome::Disconnected);
                }
                Some(ChannelEvent::Failed(reason)) => {
                    warn!(session = self.seq, reason = %reason, "session: control channel error");
                    break Err(SessionError::Transport(reason));
                }
            }
        };

        self.teardown();
        result
    }

    fn dispatch(
        &self,
        message: ControlMessage,
        channel: &Arc<ControlChannel>,
    ) -> Option<Result<SessionOutcome, SessionError>> {
        match message {
            ControlMessage::Success { user_id, message } => {
                debug!(
                    session = self.seq,
                    user_id = user_id.as_deref().unwrap_or(""),
                    message = message.as_deref().unwrap_or(""),
                    "session: coordinator acknowledged"
                );
                None
            }
            ControlMessage::Start { session_id, .. } => {
                if self.state() != SessionState::AwaitingStart {
                    warn!(
                        session = self.seq,
                        session_id = %session_id,
                        state = %self.state(),
                        "session: ignoring unexpected start"
                    );
                    return None;
                }
                self.activate(session_id, channel);
                None
            }
            ControlMessage::Timeout { message } => {
                info!(
                    session = self.seq,
                    message = message.as_deref().unwrap_or(""),
                    "session: coordinator ended session"
                );
                Some(Ok(SessionOutcome::Timeout { message }))
            }
            ControlMessage::Error { message } => {
                let message =
                    message.unwrap_or_else(|| "session rejected by coordinator".to_string());
                warn!(session = self.seq, message = %message, "session: coordinator error");
                Some(Err(SessionError::Rejected(message)))
            }
        }
    }

    fn activate(&self, session_id: SessionId, channel: &Arc<ControlChannel>) {
        let stream_url = {
            // Held across the check so a concurrent stop either sees the aggregator or
            // prevents it from being installed.
            let mut aggregator = self.aggregator.lock();
            if self.stopping.load(Ordering::SeqCst) {
                debug!(session = self.seq, session_id = %session_id, "session: start after stop");
                return;
            }
            *self.session_id.lock() = Some(session_id.clone());
            let stream_url = self.ctx.binder.bind(&session_id);
            *aggregator = Some(InputAggregator::new(
                self.ctx.debounce,
                self.ctx.params.clone(),
                channel.clone(),
            ));
            stream_url
        };
        self.transition(SessionState::Active);
        info!(session = self.seq, session_id = %session_id, "session: active");
        let _ = self.ctx.events.send(ClientEvent::SessionStarted {
            session_id,
            stream_url,
        });
    }

    fn teardown(&self) {
        self.transition(SessionState::Terminating);
        if let Some(aggregator) = self.aggregator.lock().take() {
            aggregator.detach();
        }
        if self.session_id.lock().is_some() {
            self.ctx.binder.unbind();
        }
        if let Some(channel) = self.channel.lock().take() {
            channel.close();
        }
        self.transition(SessionState::Ended);
    }

    fn transition(&self, next: SessionState) -> bool {
        let mut previous = None;
        let applied = self.state.send_if_modified(|state| {
            if state.can_transition_to(next) {
                previous = Some(*state);
                *state = next;
                true
            } else {
                false
            }
        });
        if applied {
            debug!(
                session = self.seq,
                from = %previous.unwrap_or(next),
                to = %next,
                "session: state changed"
            );
            let _ = self.ctx.events.send(ClientEvent::StateChanged(next));
        } else {
            warn!(
                session = self.seq,
                from = %self.state(),
                to = %next,
                "session: rejected invalid transition"
            );
        }
        applied
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
