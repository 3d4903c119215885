use futures::stream::BoxStream;
use futures::StreamExt;
use parking_lot::Mutex;
use shared::protocol::{ControlMessage, ParameterUpdate};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

use crate::aggregator::UpdateSink;

/// Typed transport events, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Message(ControlMessage),
    Malformed { raw: String, reason: String },
    Closed { reason: Option<String> },
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    Update(ParameterUpdate),
    Close,
}

/// An open connection as handed out by a transport: an outbound frame queue plus the
/// inbound event stream.
pub struct ControlLink {
    pub outbound: mpsc::UnboundedSender<OutboundFrame>,
    pub events: BoxStream<'static, ChannelEvent>,
}

impl ControlLink {
    pub fn from_channels(
        outbound: mpsc::UnboundedSender<OutboundFrame>,
        events: mpsc::UnboundedReceiver<ChannelEvent>,
    ) -> Self {
        Self {
            outbound,
            events: UnboundedReceiverStream::new(events).boxed(),
        }
    }
}

/// Sending half of the control channel owned by a session.
pub struct ControlChannel {
    outbound: Mutex<Option<mpsc::UnboundedSender<OutboundFrame>>>,
}

impl ControlChannel {
    pub fn new(outbound: mpsc::UnboundedSender<OutboundFrame>) -> Self {
        Self {
            outbound: Mutex::new(Some(outbound)),
        }
    }

    /// Queues a parameter snapshot. Dropped silently once the channel is closed.
    pub fn send(&self, update: ParameterUpdate) {
        let outbound = self.outbound.lock();
        let Some(tx) = outbound.as_ref() else {
            debug!("control: dropping update on closed channel");
            return;
        };
        if tx.send(OutboundFrame::Update(update)).is_err() {
            debug!("control: dropping update, writer has stopped");
        }
    }

    pub fn close(&self) {
        if let Some(tx) = self.outbound.lock().take() {
            let _ = tx.send(OutboundFrame::Close);
            debug!("control: close requested");
        }
    }

    pub fn is_open(&self) -> bool {
        self.outbound
            .lock()
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }
}

impl UpdateSink for ControlChannel {
    fn deliver(&self, update: ParameterUpdate) {
        self.send(update);
    }
}
