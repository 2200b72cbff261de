//! WebSocket endpoints for dashboards.
//!
//! Server -> client frames are `RelayEvent`s: `{"event": "new_call", "data": {...}}`.
//!
//! Client -> server frames:
//! ```json
//! {"event": "join_call", "data": {"callId": "call_9"}}
//! {"event": "leave_call", "data": {"callId": "call_9"}}
//! {"event": "live_message", "data": {"callId": "call_9", "message": "Speak slower"}}
//! ```

use crate::error::{handle_error, AppError};
use crate::relay::{Channel, EventRelay, RelayEvent};
use crate::types::{AppState, LiveMessage};
use crate::utils::unix_now;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{sink::SinkExt, stream::StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Deserialize, Debug, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
enum ClientMessage {
    JoinCall {
        #[serde(rename = "callId")]
        call_id: String,
    },
    LeaveCall {
        #[serde(rename = "callId")]
        call_id: String,
    },
    LiveMessage {
        #[serde(rename = "callId")]
        call_id: String,
        message: String,
    },
}

pub async fn teacher_ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| socket_handler(socket, Channel::Teacher, app_state))
}

pub async fn student_ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| socket_handler(socket, Channel::Student, app_state))
}

async fn socket_handler(socket: WebSocket, channel: Channel, app_state: Arc<AppState>) {
    let (mut sink, mut stream) = socket.split();
    let relay = app_state.relay.clone();
    let mut subscription = relay.subscribe(channel);
    let client_id = subscription.id;
    info!(
        %client_id,
        ?channel,
        subscribers = relay.subscriber_count(),
        "dashboard connected"
    );

    // Subscribe before snapshotting so nothing published in between is missed.
    if channel == Channel::Teacher {
        relay.send_to(
            client_id,
            RelayEvent::ActiveCalls(app_state.registry.snapshot()),
        );
    }

    let forward = tokio::spawn(async move {
        while let Some(event) = subscription.rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    handle_error(e).await;
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(message) => handle_client_message(&relay, client_id, channel, message),
                Err(e) => warn!(%client_id, error = %e, "invalid websocket message"),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => (),
            Err(e) => {
                handle_error(e).await;
                break;
            }
        }
    }

    relay.unsubscribe(client_id);
    forward.abort();
    info!(%client_id, "dashboard disconnected");
}

fn handle_client_message(
    relay: &EventRelay,
    client_id: Uuid,
    channel: Channel,
    message: ClientMessage,
) {
    match message {
        ClientMessage::JoinCall { call_id } => {
            debug!(%client_id, call_id, "joined call room");
            relay.join(client_id, &call_id);
        }
        ClientMessage::LeaveCall { call_id } => {
            relay.leave(client_id, &call_id);
        }
        ClientMessage::LiveMessage { call_id, message } => {
            let ack = match relay_live_message(relay, channel, &call_id, &message) {
                Ok(delivered) => json!({ "success": true, "delivered": delivered }),
                Err(e) => json!({ "error": e.to_string() }),
            };
            relay.send_to(client_id, RelayEvent::Ack(ack));
        }
    }
}

/// Relay a live message to everyone in the call's room, and to teachers when a student sent it.
fn relay_live_message(
    relay: &EventRelay,
    from: Channel,
    call_id: &str,
    message: &str,
) -> Result<usize, AppError> {
    let message = message.trim();
    if message.is_empty() {
        return Err(AppError::Validation("No message content".into()));
    }
    let event = RelayEvent::LiveMessage(LiveMessage {
        call_id: call_id.to_string(),
        message: message.to_string(),
        timestamp: unix_now(),
    });
    let delivered = match from {
        Channel::Student => {
            relay.publish_to_room_or_channel(call_id, Channel::Teacher, event)
        }
        Channel::Teacher => relay.publish_to_room(call_id, event),
    };
    Ok(delivered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::CallRegistry;
    use crate::types::ActiveCall;
    use serde_json::Value;
    use tokio_tungstenite::{connect_async, tungstenite};

    #[test]
    fn client_messages_parse() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"event":"join_call","data":{"callId":"call_9"}}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::JoinCall {
                call_id: "call_9".into()
            }
        );
        let msg: ClientMessage = serde_json::from_str(
            r#"{"event":"live_message","data":{"callId":"call_9","message":"hi"}}"#,
        )
        .unwrap();
        assert!(matches!(msg, ClientMessage::LiveMessage { .. }));
    }

    #[tokio::test]
    async fn live_message_reaches_room_and_is_acknowledged() {
        let relay = EventRelay::new();
        let mut teacher = relay.subscribe(Channel::Teacher);
        let mut student = relay.subscribe(Channel::Student);
        relay.join(student.id, "call_9");

        handle_client_message(
            &relay,
            teacher.id,
            Channel::Teacher,
            ClientMessage::LiveMessage {
                call_id: "call_9".into(),
                message: "  Try again, slower  ".into(),
            },
        );

        match student.rx.recv().await.unwrap() {
            RelayEvent::LiveMessage(m) => assert_eq!(m.message, "Try again, slower"),
            other => panic!("unexpected {other:?}"),
        }
        match teacher.rx.recv().await.unwrap() {
            RelayEvent::Ack(ack) => assert_eq!(ack["success"], true),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn student_message_reaches_each_teacher_once() {
        let relay = EventRelay::new();
        let mut watching = relay.subscribe(Channel::Teacher);
        let mut elsewhere = relay.subscribe(Channel::Teacher);
        let mut student = relay.subscribe(Channel::Student);
        relay.join(watching.id, "call_9");
        relay.join(student.id, "call_9");

        handle_client_message(
            &relay,
            student.id,
            Channel::Student,
            ClientMessage::LiveMessage {
                call_id: "call_9".into(),
                message: "Can you repeat?".into(),
            },
        );

        let names = |sub: &mut crate::relay::Subscription| {
            let mut names = vec![];
            while let Ok(e) = sub.rx.try_recv() {
                names.push(e.name());
            }
            names
        };
        assert_eq!(names(&mut watching), ["live_message"]);
        assert_eq!(names(&mut elsewhere), ["live_message"]);
        assert_eq!(names(&mut student), ["live_message", "ack"]);
    }

    #[tokio::test]
    async fn empty_live_message_is_rejected_in_ack() {
        let relay = EventRelay::new();
        let mut teacher = relay.subscribe(Channel::Teacher);
        handle_client_message(
            &relay,
            teacher.id,
            Channel::Teacher,
            ClientMessage::LiveMessage {
                call_id: "call_9".into(),
                message: "   ".into(),
            },
        );
        match teacher.rx.recv().await.unwrap() {
            RelayEvent::Ack(ack) => assert_eq!(ack["error"], "No message content"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn teacher_receives_snapshot_on_connect() {
        let registry = CallRegistry::new();
        registry.insert(ActiveCall::new(
            "call_9".into(),
            "asst_1".into(),
            "Ana".into(),
            "wss://listen/9".into(),
            1.0,
        ));
        let state = crate::handlers::tests::test_state_with("http://unused.invalid", registry);
        let app = crate::build_router(state.clone());

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::Server::from_tcp(listener)
                .unwrap()
                .serve(app.into_make_service())
                .await
                .unwrap();
        });

        let (mut ws, _) = connect_async(format!("ws://{addr}/teacher")).await.unwrap();
        let frame = ws.next().await.unwrap().unwrap();
        let tungstenite::Message::Text(text) = frame else {
            panic!("expected a text frame, got {frame:?}");
        };
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["event"], "active_calls");
        assert_eq!(value["data"][0]["callId"], "call_9");
        assert_eq!(value["data"][0]["student"], "Ana");

        state.relay.publish(
            Channel::Teacher,
            RelayEvent::CallEnded(state.registry.mark_ended("call_9", 5.0).unwrap()),
        );
        let frame = ws.next().await.unwrap().unwrap();
        let value: Value = serde_json::from_str(frame.to_text().unwrap()).unwrap();
        assert_eq!(value["event"], "call_ended");
        assert_eq!(value["data"]["duration"], 4.0);
    }
}
