//! In-app realtime events, addressed to a room (a user id).
//!
//! Emission is best-effort: no subscriber, a full buffer or a disabled
//! channel all silently drop the event.

use serde::Serialize;
use std::sync::Mutex;
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RealtimeEvent {
    pub room: String,
    pub event: String,
    pub payload: serde_json::Value,
}

pub trait RealtimeChannel: Send + Sync {
    fn emit(&self, room: &str, event: &str, payload: serde_json::Value);

    /// A live feed of every emitted event, when the channel supports one.
    fn subscribe(&self) -> Option<broadcast::Receiver<RealtimeEvent>> {
        None
    }
}

#[derive(Debug, Default)]
pub struct NoopRealtime;

impl RealtimeChannel for NoopRealtime {
    fn emit(&self, room: &str, event: &str, _payload: serde_json::Value) {
        tracing::trace!(room = %room, event = %event, "Realtime disabled, event dropped");
    }
}

/// Process-local fan-out over a tokio broadcast channel.
pub struct BroadcastRealtime {
    sender: broadcast::Sender<RealtimeEvent>,
}

impl BroadcastRealtime {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }
}

impl RealtimeChannel for BroadcastRealtime {
    fn emit(&self, room: &str, event: &str, payload: serde_json::Value) {
        let delivered = self
            .sender
            .send(RealtimeEvent {
                room: room.to_string(),
                event: event.to_string(),
                payload,
            })
            .unwrap_or(0);
        tracing::debug!(room = %room, event = %event, receivers = delivered, "Realtime event emitted");
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<RealtimeEvent>> {
        Some(self.sender.subscribe())
    }
}

#[derive(Debug, Default)]
pub struct RecordingRealtime {
    events: Mutex<Vec<RealtimeEvent>>,
}

impl RecordingRealtime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RealtimeEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl RealtimeChannel for RecordingRealtime {
    fn emit(&self, room: &str, event: &str, payload: serde_json::Value) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(RealtimeEvent {
                room: room.to_string(),
                event: event.to_string(),
                payload,
            });
    }
}
