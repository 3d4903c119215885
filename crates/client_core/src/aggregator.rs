//! Debounced parameter aggregation.
//!
//! Raw edits land in the [`ParameterStore`] immediately; the [`InputAggregator`] turns the
//! stream of "something changed" signals into at most one [`ParameterUpdate`] per quiescence
//! window, always carrying the latest snapshot.

use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use shared::{
    domain::{ParameterEdit, SessionParameters},
    error::ProtocolError,
    protocol::ParameterUpdate,
};
use tokio::{sync::watch, task::JoinHandle};
use tracing::debug;

/// Receives the debounced parameter snapshots.
pub trait UpdateSink: Send + Sync {
    fn deliver(&self, update: ParameterUpdate);
}

/// Client-owned parameter values, shared between the controls and the active session.
#[derive(Clone)]
pub struct ParameterStore {
    tx: Arc<watch::Sender<SessionParameters>>,
}

impl ParameterStore {
    pub fn new(initial: SessionParameters) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    pub fn snapshot(&self) -> SessionParameters {
        self.tx.borrow().clone()
    }

    pub fn apply(&self, edit: ParameterEdit) -> Result<SessionParameters, ProtocolError> {
        let mut outcome = Ok(());
        self.tx.send_if_modified(|params| match params.apply(edit) {
            Ok(()) => true,
            Err(err) => {
                outcome = Err(err);
                false
            }
        });
        outcome.map(|()| self.snapshot())
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionParameters> {
        self.tx.subscribe()
    }
}

impl Default for ParameterStore {
    fn default() -> Self {
        Self::new(SessionParameters::default())
    }
}

pub struct InputAggregator {
    inner: Arc<AggregatorInner>,
}

struct AggregatorInner {
    window: Duration,
    params: ParameterStore,
    sink: Arc<dyn UpdateSink>,
    pending: Mutex<PendingTimer>,
}

#[derive(Default)]
struct PendingTimer {
    generation: u64,
    handle: Option<JoinHandle<()>>,
    detached: bool,
}

impl InputAggregator {
    pub fn new(window: Duration, params: ParameterStore, sink: Arc<dyn UpdateSink>) -> Self {
        Self {
            inner: Arc::new(AggregatorInner {
                window,
                params,
                sink,
                pending: Mutex::new(PendingTimer::default()),
            }),
        }
    }

    /// Records that a watched control changed. Cancels the pending delivery, if any, and
    /// schedules a fresh one a full window from now. Must be called inside a tokio runtime.
    pub fn submit(&self) {
        let mut pending = self.inner.pending.lock();
        if pending.detached {
            debug!("aggregator: ignoring input after detach");
            return;
        }
        if let Some(handle) = pending.handle.take() {
            handle.abort();
        }
        pending.generation = pending.generation.wrapping_add(1);
        let generation = pending.generation;
        let inner = Arc::clone(&self.inner);
        pending.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(inner.window).await;
            inner.fire(generation);
        }));
    }

    /// Cancels any pending delivery. Later submissions are ignored.
    pub fn detach(&self) {
        let mut pending = self.inner.pending.lock();
        pending.detached = true;
        if let Some(handle) = pending.handle.take() {
            handle.abort();
            debug!("aggregator: cancelled pending update");
        }
    }

    pub fn has_pending(&self) -> bool {
        self.inner.pending.lock().handle.is_some()
    }
}

impl Drop for InputAggregator {
    fn drop(&mut self) {
        self.detach();
    }
}

impl AggregatorInner {
    fn fire(&self, generation: u64) {
        // Delivery happens under the lock so a concurrent detach either wins outright or
        // observes the update as already sent.
        let mut pending = self.pending.lock();
        if pending.detached || pending.generation != generation {
            return;
        }
        pending.handle = None;
        let update = ParameterUpdate::from(&self.params.snapshot());
        debug!(prompt = %update.prompt, seed = update.seed, "aggregator: delivering update");
        self.sink.deliver(update);
    }
}
