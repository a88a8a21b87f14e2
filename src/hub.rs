//! Realtime fan-out: one broadcast channel per room, WebSocket handling.
//!
//! ## Design
//! - `Hub` owns `room id → broadcast::Sender<Value>`; channels are created
//!   lazily on first subscribe or publish and never removed (rooms are few).
//! - Events are JSON objects tagged by `"type"` and carry the changed row, so
//!   a client applies them directly instead of refetching the room.
//! - A WebSocket client subscribes to exactly one room. It first receives a
//!   `welcome` snapshot, then every event published to that room.
//! - Slow receivers that lag behind the channel skip the missed events.

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, warn};

use crate::presence;
use crate::store::{ConversationStatus, Message, Store, User};

/// Per-room channel capacity.
pub const CHANNEL_CAPACITY: usize = 256;

/// Messages included in the `welcome` snapshot.
pub const WELCOME_HISTORY: usize = 50;

#[derive(Clone, Default)]
pub struct Hub {
    rooms: Arc<Mutex<HashMap<String, broadcast::Sender<Value>>>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, room_id: &str) -> Option<broadcast::Sender<Value>> {
        let mut guard = self.rooms.lock().ok()?;
        let tx = guard
            .entry(room_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        Some(tx.clone())
    }

    /// Receiver for every event published to `room_id` from now on.
    pub fn subscribe(&self, room_id: &str) -> Option<broadcast::Receiver<Value>> {
        self.sender(room_id).map(|tx| tx.subscribe())
    }

    /// Send `event` to the room's subscribers; returns how many got it.
    pub fn publish(&self, room_id: &str, event: Value) -> usize {
        self.sender(room_id)
            .and_then(|tx| tx.send(event).ok())
            .unwrap_or(0)
    }

    /// Send `event` to every room that has a channel.
    pub fn publish_all(&self, event: Value) -> usize {
        let senders: Vec<broadcast::Sender<Value>> = match self.rooms.lock() {
            Ok(guard) => guard.values().cloned().collect(),
            Err(_) => return 0,
        };
        senders
            .iter()
            .map(|tx| tx.send(event.clone()).unwrap_or(0))
            .sum()
    }

    pub fn publish_message(&self, message: &Message) -> usize {
        self.publish(&message.room_id, message_event(message))
    }
}

// ---------------------------------------------------------------------------
// Event builders
// ---------------------------------------------------------------------------

pub fn message_event(message: &Message) -> Value {
    json!({ "type": "message", "message": message })
}

pub fn cleared_event(room_id: &str, removed: usize) -> Value {
    json!({ "type": "messages_cleared", "room_id": room_id, "removed": removed })
}

pub fn presence_event(user: &User, online: bool) -> Value {
    json!({
        "type": "presence",
        "user": user,
        "online": online,
        "notice": presence::notice(&user.username, online),
    })
}

pub fn status_event(status: &ConversationStatus) -> Value {
    json!({ "type": "status", "status": status })
}

fn welcome_event(store: &Store, room_id: &str) -> crate::error::Result<Value> {
    let room = store.room(room_id)?;
    let messages = store.messages(room_id, Some(WELCOME_HISTORY))?;
    let online = store.online_users()?;
    Ok(json!({
        "type": "welcome",
        "room": room,
        "messages": messages,
        "online": online,
    }))
}

// ---------------------------------------------------------------------------
// WebSocket handler
// ---------------------------------------------------------------------------

/// Serve one WebSocket client subscribed to `room_id`.
///
/// Clients may send `{"type":"ping"}` and `{"type":"heartbeat","userId":..}`;
/// chat messages go through the HTTP API.
pub async fn handle_ws(
    ws_stream: tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
    hub: Hub,
    store: Arc<Store>,
    room_id: String,
) {
    let (mut ws_sink, mut ws_stream) = ws_stream.split();

    // Subscribe before the snapshot so nothing published in between is lost.
    let mut room_rx = match hub.subscribe(&room_id) {
        Some(rx) => rx,
        None => return,
    };

    let welcome = match welcome_event(&store, &room_id) {
        Ok(v) => v,
        Err(err) => {
            let msg = json!({ "type": "error", "message": err.to_string() });
            let _ = ws_sink.send(WsMessage::Text(msg.to_string())).await;
            return;
        }
    };
    if ws_sink.send(WsMessage::Text(welcome.to_string())).await.is_err() {
        return;
    }
    debug!(room = %room_id, "ws client joined");

    loop {
        tokio::select! {
            msg = ws_stream.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        let parsed: Value = match serde_json::from_str(&text) {
                            Ok(v) => v,
                            Err(_) => continue,
                        };
                        match parsed.get("type").and_then(|v| v.as_str()).unwrap_or("") {
                            "ping" => {
                                let pong = json!({ "type": "pong" }).to_string();
                                if ws_sink.send(WsMessage::Text(pong)).await.is_err() {
                                    break;
                                }
                            }
                            "heartbeat" => {
                                if let Some(user_id) = parsed.get("userId").and_then(|v| v.as_str()) {
                                    if let Err(err) = store.heartbeat(user_id) {
                                        debug!(%err, "ws heartbeat ignored");
                                    }
                                }
                            }
                            _ => {}
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }

            event = room_rx.recv() => {
                match event {
                    Ok(event) => {
                        if ws_sink.send(WsMessage::Text(event.to_string())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(room = %room_id, skipped, "ws client lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
    debug!(room = %room_id, "ws client left");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MessageKind;

    fn message(room: &str) -> Message {
        Message {
            seq: 1,
            id: "m1".into(),
            room_id: room.into(),
            user_id: "u1".into(),
            username: "ana".into(),
            avatar_color: "#00ff00".into(),
            body: "hola".into(),
            kind: MessageKind::User,
            created_at_ms: 1,
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_room_subscribers_only() {
        let hub = Hub::new();
        let mut a = hub.subscribe("a").unwrap();
        let mut b = hub.subscribe("b").unwrap();
        assert_eq!(hub.publish_message(&message("a")), 1);
        let got = a.recv().await.unwrap();
        assert_eq!(got["type"], "message");
        assert_eq!(got["message"]["body"], "hola");
        assert!(b.try_recv().is_err());
    }

    #[test]
    fn test_publish_without_subscribers_is_zero() {
        let hub = Hub::new();
        assert_eq!(hub.publish("empty", json!({"type": "x"})), 0);
    }

    #[tokio::test]
    async fn test_publish_all_fans_out() {
        let hub = Hub::new();
        let mut a = hub.subscribe("a").unwrap();
        let mut b = hub.subscribe("b").unwrap();
        assert_eq!(hub.publish_all(json!({"type": "presence"})), 2);
        assert_eq!(a.recv().await.unwrap()["type"], "presence");
        assert_eq!(b.recv().await.unwrap()["type"], "presence");
    }

    #[test]
    fn test_hub_clones_share_channels() {
        let hub = Hub::new();
        let other = hub.clone();
        let mut rx = hub.subscribe("r").unwrap();
        other.publish("r", json!({"type": "status"}));
        assert_eq!(rx.try_recv().unwrap()["type"], "status");
    }

    #[test]
    fn test_cleared_event_shape() {
        let e = cleared_event("r1", 3);
        assert_eq!(e["type"], "messages_cleared");
        assert_eq!(e["room_id"], "r1");
        assert_eq!(e["removed"], 3);
    }

    #[test]
    fn test_welcome_snapshot() {
        let store = Store::open_in_memory().unwrap();
        let room = store.general_room().unwrap();
        let u = store.login("ana").unwrap();
        store.insert_message(&room.id, &u.id, "hola", MessageKind::User).unwrap();
        let w = welcome_event(&store, &room.id).unwrap();
        assert_eq!(w["type"], "welcome");
        assert_eq!(w["room"]["name"], "General");
        assert_eq!(w["messages"].as_array().unwrap().len(), 1);
        assert!(w["online"].as_array().unwrap().len() >= 7);
        assert!(welcome_event(&store, "nope").is_err());
    }
}
