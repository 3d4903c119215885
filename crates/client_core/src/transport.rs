use async_trait::async_trait;
use futures::{stream, SinkExt, StreamExt};
use shared::protocol::ControlMessage;
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{self, Message},
};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    channel::{ChannelEvent, ControlLink, OutboundFrame},
    error::ChannelError,
};

/// Opens control channels. Resolving `connect` is the transport's on-open event.
#[async_trait]
pub trait ControlTransport: Send + Sync {
    async fn connect(&self, url: &Url) -> Result<ControlLink, ChannelError>;
}

/// Control channel over a websocket, one JSON text frame per message.
pub struct WebSocketTransport;

#[async_trait]
impl ControlTransport for WebSocketTransport {
    async fn connect(&self, url: &Url) -> Result<ControlLink, ChannelError> {
        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|err| ChannelError::Connect {
                url: url.to_string(),
                reason: err.to_string(),
            })?;
        info!(url = %url, "control: websocket open");
        let (mut ws_writer, ws_reader) = ws_stream.split();

        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<OutboundFrame>();
        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                let update = match frame {
                    OutboundFrame::Update(update) => update,
                    OutboundFrame::Close => break,
                };
                let text = match update.encode() {
                    Ok(text) => text,
                    Err(err) => {
                        warn!(error = %err, "control: failed to encode parameter update");
                        continue;
                    }
                };
                if let Err(err) = ws_writer.send(Message::Text(text)).await {
                    debug!(error = %err, "control: websocket send failed");
                    break;
                }
            }
            if let Err(err) = ws_writer.close().await {
                debug!(error = %err, "control: websocket close handshake failed");
            }
        });

        let events = ws_reader
            .filter_map(|msg| async move { inbound_event(msg) })
            .chain(stream::once(async { ChannelEvent::Closed { reason: None } }))
            .boxed();

        Ok(ControlLink { outbound, events })
    }
}

fn inbound_event(msg: Result<Message, tungstenite::Error>) -> Option<ChannelEvent> {
    match msg {
        Ok(Message::Text(text)) => Some(match ControlMessage::decode(&text) {
            Ok(message) => ChannelEvent::Message(message),
            Err(err) => ChannelEvent::Malformed {
                raw: text,
                reason: err.to_string(),
            },
        }),
        Ok(Message::Binary(bytes)) => Some(ChannelEvent::Malformed {
            raw: format!("<{} binary bytes>", bytes.len()),
            reason: "unexpected binary frame".to_string(),
        }),
        Ok(Message::Close(frame)) => Some(ChannelEvent::Closed {
            reason: frame
                .map(|frame| frame.reason.to_string())
                .filter(|reason| !reason.is_empty()),
        }),
        Ok(_) => None,
        Err(tungstenite::Error::ConnectionClosed) => Some(ChannelEvent::Closed { reason: None }),
        Err(err) => Some(ChannelEvent::Failed(err.to_string())),
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
