use super::*;
use axum::{
    extract::{
        ws::{CloseFrame, Message as WsMessage, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use shared::protocol::ParameterUpdate;
use std::{borrow::Cow, time::Duration};
use tokio::net::TcpListener;

/// What the mock coordinator does once the socket is up.
#[derive(Clone, Copy)]
enum Behaviour {
    Greet,
    SendGarbage,
    CloseWithReason,
}

#[derive(Clone)]
struct MockState {
    behaviour: Behaviour,
    received: mpsc::UnboundedSender<String>,
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<MockState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_socket(socket, state))
}

async fn serve_socket(mut socket: WebSocket, state: MockState) {
    let outgoing: Vec<WsMessage> = match state.behaviour {
        Behaviour::Greet => vec![
            WsMessage::Text(r#"{"status":"success","message":"Connected","userId":"u1"}"#.into()),
            WsMessage::Text(
                r#"{"status":"start","message":"Start Streaming","userId":"u1"}"#.into(),
            ),
        ],
        Behaviour::SendGarbage => vec![
            WsMessage::Text("not json".into()),
            WsMessage::Text(r#"{"status":"paused"}"#.into()),
            WsMessage::Binary(vec![1, 2, 3]),
            WsMessage::Text(r#"{"status":"timeout"}"#.into()),
        ],
        Behaviour::CloseWithReason => vec![WsMessage::Close(Some(CloseFrame {
            code: 1000,
            reason: Cow::from("Your session has ended"),
        }))],
    };
    for message in outgoing {
        if socket.send(message).await.is_err() {
            return;
        }
    }
    while let Some(Ok(message)) = socket.recv().await {
        match message {
            WsMessage::Text(text) => {
                let _ = state.received.send(text);
            }
            WsMessage::Close(_) => {
                let _ = state.received.send("<close>".to_string());
                break;
            }
            _ => {}
        }
    }
}

async fn spawn_mock(behaviour: Behaviour) -> (Url, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (received, rx) = mpsc::unbounded_channel();
    let app = Router::new()
        .route("/ws", get(ws_handler))
        .with_state(MockState {
            behaviour,
            received,
        });
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (Url::parse(&format!("ws://{addr}/ws")).expect("url"), rx)
}

async fn next_event(link: &mut ControlLink) -> ChannelEvent {
    tokio::time::timeout(Duration::from_secs(5), link.events.next())
        .await
        .expect("event in time")
        .expect("stream open")
}

#[tokio::test]
async fn delivers_coordinator_messages_in_order_and_sends_updates() {
    let (url, mut received) = spawn_mock(Behaviour::Greet).await;
    let mut link = WebSocketTransport.connect(&url).await.expect("connect");

    assert!(matches!(
        next_event(&mut link).await,
        ChannelEvent::Message(ControlMessage::Success { .. })
    ));
    match next_event(&mut link).await {
        ChannelEvent::Message(ControlMessage::Start { session_id, .. }) => {
            assert_eq!(session_id.as_str(), "u1")
        }
        other => panic!("expected start, got {other:?}"),
    }

    link.outbound
        .send(OutboundFrame::Update(ParameterUpdate {
            prompt: "cat".into(),
            seed: 7,
            guidance_scale: 2.5,
        }))
        .expect("queue update");
    let text = tokio::time::timeout(Duration::from_secs(5), received.recv())
        .await
        .expect("update in time")
        .expect("update");
    let value: serde_json::Value = serde_json::from_str(&text).expect("json");
    assert_eq!(
        value,
        serde_json::json!({ "prompt": "cat", "seed": 7, "guidance_scale": 2.5 })
    );

    link.outbound.send(OutboundFrame::Close).expect("queue close");
    let closed = tokio::time::timeout(Duration::from_secs(5), received.recv())
        .await
        .expect("close in time");
    assert_eq!(closed.as_deref(), Some("<close>"));
}

#[tokio::test]
async fn undecodable_frames_surface_as_malformed() {
    let (url, _received) = spawn_mock(Behaviour::SendGarbage).await;
    let mut link = WebSocketTransport.connect(&url).await.expect("connect");

    for _ in 0..3 {
        assert!(matches!(
            next_event(&mut link).await,
            ChannelEvent::Malformed { .. }
        ));
    }
    assert_eq!(
        next_event(&mut link).await,
        ChannelEvent::Message(ControlMessage::Timeout { message: None })
    );
}

#[tokio::test]
async fn server_close_is_reported_with_reason() {
    let (url, _received) = spawn_mock(Behaviour::CloseWithReason).await;
    let mut link = WebSocketTransport.connect(&url).await.expect("connect");

    assert_eq!(
        next_event(&mut link).await,
        ChannelEvent::Closed {
            reason: Some("Your session has ended".into())
        }
    );
}

#[tokio::test]
async fn refused_connection_is_a_connect_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let url = Url::parse(&format!("ws://{addr}/ws")).expect("url");
    match WebSocketTransport.connect(&url).await {
        Err(ChannelError::Connect { url: failed, .. }) => assert_eq!(failed, url.to_string()),
        Ok(_) => panic!("connect should fail"),
    }
}

#[test]
fn inbound_mapping_ignores_control_frames() {
    assert_eq!(inbound_event(Ok(Message::Ping(vec![1]))), None);
    assert_eq!(
        inbound_event(Err(tungstenite::Error::ConnectionClosed)),
        Some(ChannelEvent::Closed { reason: None })
    );
    assert!(matches!(
        inbound_event(Err(tungstenite::Error::AlreadyClosed)),
        Some(ChannelEvent::Failed(_))
    ));
}
