use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use url::Url;

use crate::{
    channel::{ChannelEvent, ControlLink, OutboundFrame},
    error::ChannelError,
    media::DisplaySurface,
    transport::ControlTransport,
};

pub enum Script {
    Link(Mutex<Option<ControlLink>>),
    Fail(String),
    Hang,
}

/// Transport whose connections are driven by the test.
pub struct ScriptedTransport {
    script: Script,
    pub connects: Mutex<Vec<Url>>,
}

impl ScriptedTransport {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            connects: Mutex::new(Vec::new()),
        })
    }

    /// A transport handing out one link, plus the coordinator's ends of it.
    pub fn linked() -> (
        Arc<Self>,
        mpsc::UnboundedSender<ChannelEvent>,
        mpsc::UnboundedReceiver<OutboundFrame>,
    ) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (coordinator, events_rx) = mpsc::unbounded_channel();
        let link = ControlLink::from_channels(outbound_tx, events_rx);
        (
            Self::new(Script::Link(Mutex::new(Some(link)))),
            coordinator,
            outbound_rx,
        )
    }
}

#[async_trait]
impl ControlTransport for ScriptedTransport {
    async fn connect(&self, url: &Url) -> Result<ControlLink, ChannelError> {
        self.connects.lock().push(url.clone());
        match &self.script {
            Script::Link(link) => link.lock().take().ok_or_else(|| ChannelError::Connect {
                url: url.to_string(),
                reason: "scripted link already used".to_string(),
            }),
            Script::Fail(reason) => Err(ChannelError::Connect {
                url: url.to_string(),
                reason: reason.clone(),
            }),
            Script::Hang => std::future::pending().await,
        }
    }
}

#[derive(Default)]
pub struct RecordingSurface {
    pub sources: Mutex<Vec<Option<String>>>,
}

impl RecordingSurface {
    pub fn sources(&self) -> Vec<Option<String>> {
        self.sources.lock().clone()
    }
}

impl DisplaySurface for RecordingSurface {
    fn set_source(&self, source: Option<&Url>) {
        self.sources.lock().push(source.map(Url::to_string));
    }
}

pub fn drain<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> Vec<T> {
    let mut items = Vec::new();
    while let Ok(item) = rx.try_recv() {
        items.push(item);
    }
    items
}
