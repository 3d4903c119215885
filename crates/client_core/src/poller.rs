use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use shared::domain::QueueStatus;
use tokio::{
    sync::broadcast,
    task::{JoinHandle, JoinSet},
    time::MissedTickBehavior,
};
use tracing::{debug, warn};
use url::Url;

use crate::{error::ConfigError, ClientEvent};

#[async_trait]
pub trait QueueStatusSource: Send + Sync {
    async fn fetch(&self) -> Result<QueueStatus>;
}

pub struct HttpQueueStatus {
    http: Client,
    url: Url,
    timeout: Duration,
}

impl HttpQueueStatus {
    pub fn new(http: Client, url: Url, timeout: Duration) -> Self {
        Self { http, url, timeout }
    }
}

#[async_trait]
impl QueueStatusSource for HttpQueueStatus {
    async fn fetch(&self) -> Result<QueueStatus> {
        let status = self
            .http
            .get(self.url.clone())
            .timeout(self.timeout)
            .send()
            .await
            .with_context(|| format!("failed to query {}", self.url))?
            .error_for_status()?
            .json::<QueueStatus>()
            .await
            .context("invalid queue status body")?;
        Ok(status)
    }
}

/// Fixed-rate queue size polling, independent of any session.
pub struct QueuePoller {
    source: Arc<dyn QueueStatusSource>,
    period: Duration,
}

impl QueuePoller {
    pub fn new(
        source: Arc<dyn QueueStatusSource>,
        period: Duration,
    ) -> Result<Self, ConfigError> {
        if period.is_zero() {
            return Err(ConfigError::ZeroDuration("queue_poll_period"));
        }
        Ok(Self { source, period })
    }

    /// Polls immediately, then once per period until the handle is aborted. Each poll runs
    /// as its own task, so a slow or failing request never shifts the schedule. Aborting
    /// the handle cancels in-flight polls.
    pub fn spawn(self, events: broadcast::Sender<ClientEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut in_flight = JoinSet::new();
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let source = Arc::clone(&self.source);
                        let events = events.clone();
                        in_flight.spawn(async move { poll_once(source.as_ref(), &events).await });
                    }
                    Some(_) = in_flight.join_next() => {}
                }
            }
        })
    }
}

async fn poll_once(source: &dyn QueueStatusSource, events: &broadcast::Sender<ClientEvent>) {
    match source.fetch().await {
        Ok(status) => {
            debug!(queue_size = status.queue_size, "queue: polled");
            let _ = events.send(ClientEvent::QueueSize(status.queue_size));
        }
        Err(err) => warn!(error = %err, "queue: poll failed"),
    }
}
