use crate::types::{ActiveCall, CallReport, LiveMessage};

use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, trace};
use uuid::Uuid;

/// Events pushed to dashboard clients, serialized as `{"event": ..., "data": ...}`.
#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum RelayEvent {
    NewCall(ActiveCall),
    CallEnded(ActiveCall),
    CallReport(CallReport),
    ActiveCalls(Vec<ActiveCall>),
    LiveMessage(LiveMessage),
    Ack(Value),
}

impl RelayEvent {
    pub fn name(&self) -> &'static str {
        match self {
            RelayEvent::NewCall(_) => "new_call",
            RelayEvent::CallEnded(_) => "call_ended",
            RelayEvent::CallReport(_) => "call_report",
            RelayEvent::ActiveCalls(_) => "active_calls",
            RelayEvent::LiveMessage(_) => "live_message",
            RelayEvent::Ack(_) => "ack",
        }
    }
}

/// Logical channel a client subscribed to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Channel {
    Teacher,
    Student,
}

struct Subscriber {
    channel: Channel,
    rooms: HashSet<String>,
    tx: mpsc::UnboundedSender<RelayEvent>,
}

pub struct Subscription {
    pub id: Uuid,
    pub rx: mpsc::UnboundedReceiver<RelayEvent>,
}

/// Fan-out of events to connected WebSocket clients.
#[derive(Clone, Default)]
pub struct EventRelay {
    subscribers: Arc<Mutex<HashMap<Uuid, Subscriber>>>,
}

impl EventRelay {
    pub fn new() -> Self {
        Self::default()
    }

    fn subscribers(&self) -> MutexGuard<'_, HashMap<Uuid, Subscriber>> {
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn subscribe(&self, channel: Channel) -> Subscription {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers().insert(
            id,
            Subscriber {
                channel,
                rooms: HashSet::new(),
                tx,
            },
        );
        debug!(%id, ?channel, "client subscribed");
        Subscription { id, rx }
    }

    pub fn unsubscribe(&self, id: Uuid) {
        if self.subscribers().remove(&id).is_some() {
            debug!(%id, "client unsubscribed");
        }
    }

    pub fn join(&self, id: Uuid, room: &str) -> bool {
        match self.subscribers().get_mut(&id) {
            Some(sub) => {
                sub.rooms.insert(room.to_string());
                true
            }
            None => false,
        }
    }

    pub fn leave(&self, id: Uuid, room: &str) {
        if let Some(sub) = self.subscribers().get_mut(&id) {
            sub.rooms.remove(room);
        }
    }

    /// Send to a single client.
    pub fn send_to(&self, id: Uuid, event: RelayEvent) -> bool {
        self.deliver(|sid, _| *sid == id, event) > 0
    }

    /// Send to every client on `channel`. Returns how many clients received it.
    pub fn publish(&self, channel: Channel, event: RelayEvent) -> usize {
        self.deliver(|_, sub| sub.channel == channel, event)
    }

    /// Send to every client that joined `room`, whatever its channel.
    pub fn publish_to_room(&self, room: &str, event: RelayEvent) -> usize {
        self.deliver(|_, sub| sub.rooms.contains(room), event)
    }

    /// Send once to every client that joined `room` or listens on `channel`.
    pub fn publish_to_room_or_channel(
        &self,
        room: &str,
        channel: Channel,
        event: RelayEvent,
    ) -> usize {
        self.deliver(
            |_, sub| sub.rooms.contains(room) || sub.channel == channel,
            event,
        )
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers().len()
    }

    fn deliver(&self, filter: impl Fn(&Uuid, &Subscriber) -> bool, event: RelayEvent) -> usize {
        let name = event.name();
        let mut subscribers = self.subscribers();
        let mut delivered = 0;
        let mut closed = Vec::new();
        for (id, sub) in subscribers.iter().filter(|(id, sub)| filter(id, sub)) {
            if sub.tx.send(event.clone()).is_ok() {
                delivered += 1;
            } else {
                closed.push(*id);
            }
        }
        for id in closed {
            subscribers.remove(&id);
        }
        trace!(event = name, delivered, "relayed event");
        delivered
    }
}
