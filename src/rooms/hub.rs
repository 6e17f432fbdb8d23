//! Per-room event fan-out to connected clients.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, RwLock, mpsc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::rooms::events::Outbound;

pub const DEFAULT_OUTBOX_CAPACITY: usize = 64;

type Group = HashMap<Uuid, mpsc::Sender<Arc<String>>>;

/// Broadcast groups keyed by room. Each group carries its own lock, so
/// traffic in one room never contends with another.
pub struct Hub {
    outbox_capacity: usize,
    rooms: RwLock<HashMap<Uuid, Arc<Mutex<Group>>>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::with_outbox_capacity(DEFAULT_OUTBOX_CAPACITY)
    }

    pub fn with_outbox_capacity(outbox_capacity: usize) -> Self {
        Self {
            outbox_capacity,
            rooms: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a connection under a room and hands back the receiving end
    /// of its bounded outbound queue. The hub keeps the only sender, so a
    /// connection dropped from the group sees its queue close.
    pub async fn subscribe(&self, room_id: Uuid, conn_id: Uuid) -> mpsc::Receiver<Arc<String>> {
        let (tx, rx) = mpsc::channel(self.outbox_capacity);
        let mut rooms = self.rooms.write().await;
        let group = rooms
            .entry(room_id)
            .or_insert_with(|| Arc::new(Mutex::new(Group::new())))
            .clone();
        group.lock().await.insert(conn_id, tx);
        rx
    }

    /// Removes a connection; absent rooms and connections are a no-op, so
    /// disconnect cleanup is safe even when subscribe never ran. Empty
    /// groups are dropped here.
    pub async fn unsubscribe(&self, room_id: Uuid, conn_id: Uuid) {
        let mut rooms = self.rooms.write().await;
        let Some(group) = rooms.get(&room_id).cloned() else {
            return;
        };
        let mut group = group.lock().await;
        group.remove(&conn_id);
        if group.is_empty() {
            rooms.remove(&room_id);
        }
    }

    /// Serializes the event once and queues it on every connection in the
    /// room. A connection with a full or closed queue is dropped from the
    /// group instead of holding up the rest.
    pub async fn broadcast(&self, room_id: Uuid, event: &Outbound) {
        let Some(json) = serialize(room_id, event) else {
            return;
        };
        let Some(group) = self.rooms.read().await.get(&room_id).cloned() else {
            debug!(%room_id, "broadcast to a room with no subscribers");
            return;
        };
        let mut group = group.lock().await;
        group.retain(|conn_id, tx| match tx.try_send(json.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(%room_id, %conn_id, "outbound queue full, dropping slow consumer");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(%room_id, %conn_id, "dropping closed connection");
                false
            }
        });
    }

    /// Queues an event for one connection only.
    pub async fn send_to(&self, room_id: Uuid, conn_id: Uuid, event: &Outbound) {
        let Some(json) = serialize(room_id, event) else {
            return;
        };
        let Some(group) = self.rooms.read().await.get(&room_id).cloned() else {
            return;
        };
        let mut group = group.lock().await;
        let Some(tx) = group.get(&conn_id) else {
            return;
        };
        if let Err(err) = tx.try_send(json) {
            match err {
                TrySendError::Full(_) => {
                    warn!(%room_id, %conn_id, "outbound queue full, dropping slow consumer");
                }
                TrySendError::Closed(_) => {
                    debug!(%room_id, %conn_id, "dropping closed connection");
                }
            }
            group.remove(&conn_id);
        }
    }

    /// Live connections subscribed to the room.
    pub async fn room_size(&self, room_id: Uuid) -> usize {
        let Some(group) = self.rooms.read().await.get(&room_id).cloned() else {
            return 0;
        };
        let group = group.lock().await;
        group.len()
    }

    /// Rooms with at least one subscriber.
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

fn serialize(room_id: Uuid, event: &Outbound) -> Option<Arc<String>> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Arc::new(json)),
        Err(err) => {
            warn!(%room_id, error = %err, "failed to serialize event");
            None
        }
    }
}
