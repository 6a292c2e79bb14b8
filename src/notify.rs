use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// A notification as delivered to listeners: the item channel plus the
/// triggering event rendered as a JSON payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub item_id: Ulid,
    pub payload: String,
}

#[derive(Serialize)]
struct Payload<'a> {
    kind: &'static str,
    #[serde(flatten)]
    event: &'a Event,
}

fn event_kind(event: &Event) -> &'static str {
    match event {
        Event::UserCreated { .. } => "user_created",
        Event::UserUpdated { .. } => "user_updated",
        Event::UserRemoved { .. } => "user_removed",
        Event::ItemCreated { .. } => "item_created",
        Event::ItemUpdated { .. } => "item_updated",
        Event::BookingRequested { .. } => "booking_requested",
        Event::BookingDecided { .. } => "booking_decided",
        Event::CommentAdded { .. } => "comment_added",
    }
}

/// Broadcast hub for LISTEN/NOTIFY per item.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Notification>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to notifications for an item. Creates the channel if needed.
    pub fn subscribe(&self, item_id: Ulid) -> broadcast::Receiver<Notification> {
        let sender = self
            .channels
            .entry(item_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, item_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&item_id) {
            let payload = serde_json::to_string(&Payload {
                kind: event_kind(event),
                event,
            })
            .unwrap_or_else(|_| format!("{{\"kind\":\"{}\"}}", event_kind(event)));
            let _ = sender.send(Notification { item_id, payload });
        }
    }

    /// Remove a channel (e.g. when an item goes away).
    #[allow(dead_code)]
    pub fn remove(&self, item_id: &Ulid) {
        self.channels.remove(item_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Span;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let item_id = Ulid::new();
        let mut rx = hub.subscribe(item_id);

        let event = Event::BookingRequested {
            id: Ulid::new(),
            item_id,
            booker_id: Ulid::new(),
            span: Span::new(1000, 2000),
        };
        hub.send(item_id, &event);

        let received = rx.recv().await.unwrap();
        assert_eq!(received.item_id, item_id);
        assert!(received.payload.contains("booking_requested"));
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        let item_id = Ulid::new();
        // No subscriber — should not panic
        hub.send(
            item_id,
            &Event::ItemUpdated {
                id: item_id,
                name: None,
                description: None,
                available: Some(false),
            },
        );
    }
}
