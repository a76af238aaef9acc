use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::store::Entity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Created => "CREATED",
            ChangeKind::Updated => "UPDATED",
            ChangeKind::Deleted => "DELETED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeEvent {
    pub name: String,
    pub kind: ChangeKind,
    pub entity_kind: &'static str,
    pub id: u64,
    /// Row after the change; `Null` for deletions.
    pub payload: serde_json::Value,
}

/// Event name subscribers register for, e.g. `FLOW_NODE_INSTANCE/UPDATED`.
pub fn event_name(entity_kind: &str, kind: ChangeKind) -> String {
    format!("{}/{}", entity_kind.to_uppercase(), kind.as_str())
}

/// Insert/update/delete notifications, one broadcast channel per event name.
///
/// Publishing is lazy: the event is only built when the name has a live subscriber.
#[derive(Clone)]
pub struct ChangeNotifier {
    channels: Arc<DashMap<String, broadcast::Sender<ChangeEvent>>>,
    capacity: usize,
}

impl ChangeNotifier {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Channels whose subscribers are all gone are dropped here and on the next `notify`.
    pub fn subscribe(&self, name: &str) -> broadcast::Receiver<ChangeEvent> {
        self.channels.retain(|_, tx| tx.receiver_count() > 0);
        self.channels
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    pub fn has_subscribers(&self, name: &str) -> bool {
        self.channels
            .get(name)
            .map(|tx| tx.receiver_count() > 0)
            .unwrap_or(false)
    }

    /// Returns the number of subscribers that received the event.
    pub fn notify<E: Entity>(&self, kind: ChangeKind, entity: &E) -> usize {
        let name = event_name(E::KIND, kind);
        let Some(tx) = self.channels.get(&name).map(|tx| tx.value().clone()) else {
            return 0;
        };
        if tx.receiver_count() == 0 {
            self.channels
                .remove_if(&name, |_, tx| tx.receiver_count() == 0);
            return 0;
        }
        let payload = match kind {
            ChangeKind::Deleted => serde_json::Value::Null,
            _ => serde_json::to_value(entity).unwrap_or(serde_json::Value::Null),
        };
        let event = ChangeEvent {
            name: name.clone(),
            kind,
            entity_kind: E::KIND,
            id: entity.id(),
            payload,
        };
        tx.send(event).unwrap_or(0)
    }
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new(100)
    }
}
