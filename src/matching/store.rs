use async_trait::async_trait;
use serde::Serialize;

use crate::error::StoreError;
use crate::websocket::ConnectionId;

/// Counts reported by `/health`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub waiting: usize,
    pub paired: usize,
}

/// One atomic unit of work against the waiting pool and partner directory.
///
/// While a transaction is open no other transaction on the same store can
/// observe or change either collection. Dropping it without `commit` discards
/// whatever it wrote, where the backend supports that.
#[async_trait]
pub trait PairingTxn: Send {
    /// Removes and returns an arbitrary waiting connection.
    async fn pop_waiting(&mut self) -> Result<Option<ConnectionId>, StoreError>;

    async fn push_waiting(&mut self, id: ConnectionId) -> Result<(), StoreError>;

    /// Returns whether `id` was waiting.
    async fn remove_waiting(&mut self, id: ConnectionId) -> Result<bool, StoreError>;

    async fn partner_of(&mut self, id: ConnectionId) -> Result<Option<ConnectionId>, StoreError>;

    /// Writes both directory entries.
    async fn set_pair(&mut self, a: ConnectionId, b: ConnectionId) -> Result<(), StoreError>;

    /// Removes `id`'s entry and returns the partner it pointed to.
    async fn take_partner(&mut self, id: ConnectionId) -> Result<Option<ConnectionId>, StoreError>;

    /// Removes `id`'s entry only while it still points at `expected`.
    async fn remove_partner_if(&mut self, id: ConnectionId, expected: ConnectionId) -> Result<bool, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

/// Shared pairing state: the waiting pool plus the partner directory.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PairingStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn PairingTxn>, StoreError>;

    async fn partner_of(&self, id: ConnectionId) -> Result<Option<ConnectionId>, StoreError>;

    async fn is_waiting(&self, id: ConnectionId) -> Result<bool, StoreError>;

    async fn stats(&self) -> Result<PoolStats, StoreError>;

    /// Releases backend resources on shutdown.
    async fn close(&self) {}
}
