//! Connection registry: the authoritative set of live connections
//!
//! The set is mutated through exactly one path — short critical sections
//! around insert/remove under a single lock, never held during I/O — so a
//! broadcast iterating a snapshot can never race an insertion or removal.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::protocol::Message;

use super::connection::Connection;

/// Lifecycle notifications published by the registry
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    Connected(String),
    Disconnected(String),
}

/// Registry owning every live [`Connection`]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, Arc<Connection>>>,
    events: broadcast::Sender<RegistryEvent>,
}

impl ConnectionRegistry {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            connections: RwLock::new(HashMap::new()),
            events,
        })
    }

    /// Insert a connection and publish the connect notification.
    pub fn register(&self, conn: Arc<Connection>) {
        let id = conn.id().to_string();
        self.connections.write().insert(id.clone(), conn);
        tracing::info!("client connected: {}", id);
        let _ = self.events.send(RegistryEvent::Connected(id));
    }

    /// Remove a connection; publishes the disconnect notification when the
    /// connection was actually present.
    pub fn unregister(&self, id: &str) {
        let removed = self.connections.write().remove(id).is_some();
        if removed {
            tracing::info!("client disconnected: {}", id);
            let _ = self.events.send(RegistryEvent::Disconnected(id.to_string()));
        }
    }

    /// Deliver to every live connection. Partial failure (a full queue on
    /// one connection) never blocks or aborts delivery to the others.
    pub fn broadcast(&self, msg: &Message) {
        for conn in self.snapshot() {
            if let Err(e) = conn.send(msg) {
                tracing::error!("broadcast to {} failed: {}", conn.id(), e);
            }
        }
    }

    /// Snapshot of the current connection set.
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections.read().values().cloned().collect()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    /// Subscribe to connect/disconnect notifications.
    pub fn subscribe_events(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }
}
