use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;
use tracing::{debug, info};

use crate::error::WebSocketError;
use crate::websocket::ServerMessage;

/// Server-assigned identifier of one live transport session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for ConnectionId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

pub type ClientSender = mpsc::UnboundedSender<ServerMessage>;

/// Live connections by id. Holds only the outbound half of each session's
/// queue, so dropping a session never depends on the registry.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: Arc<RwLock<HashMap<ConnectionId, ClientSender>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, id: ConnectionId, sender: ClientSender) {
        self.connections.write().await.insert(id, sender);
        info!(connection = %id, "Added connection to registry");
    }

    pub async fn remove(&self, id: &ConnectionId) -> bool {
        let removed = self.connections.write().await.remove(id).is_some();
        if removed {
            info!(connection = %id, "Removed connection from registry");
        }
        removed
    }

    /// A connection is live while it is registered and its session still
    /// drains the outbound queue.
    pub async fn is_live(&self, id: &ConnectionId) -> bool {
        self.connections
            .read()
            .await
            .get(id)
            .map(|sender| !sender.is_closed())
            .unwrap_or(false)
    }

    pub async fn send_to(&self, id: &ConnectionId, msg: ServerMessage) -> Result<(), WebSocketError> {
        let connections = self.connections.read().await;
        let sender = connections.get(id).ok_or(WebSocketError::ConnectionNotFound)?;
        sender.send(msg).map_err(|e| {
            debug!(connection = %id, "Outbound queue closed");
            WebSocketError::SendError(e.to_string())
        })
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }
}
