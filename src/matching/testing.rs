use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use async_trait::async_trait;

use crate::error::StoreError;
use crate::matching::{MemoryStore, PairingStore, PairingTxn, PoolStats};
use crate::websocket::ConnectionId;

/// In-memory store whose commits can be switched to fail, as a database
/// commit would after the connection drops mid-transaction.
#[derive(Clone, Default)]
pub struct FlakyCommitStore {
    inner: MemoryStore,
    fail_commits: Arc<AtomicBool>,
}

impl FlakyCommitStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl PairingStore for FlakyCommitStore {
    async fn begin(&self) -> Result<Box<dyn PairingTxn>, StoreError> {
        Ok(Box::new(FlakyCommitTxn {
            inner: self.inner.begin().await?,
            fail: self.fail_commits.load(Ordering::SeqCst),
        }))
    }

    async fn partner_of(&self, id: ConnectionId) -> Result<Option<ConnectionId>, StoreError> {
        self.inner.partner_of(id).await
    }

    async fn is_waiting(&self, id: ConnectionId) -> Result<bool, StoreError> {
        self.inner.is_waiting(id).await
    }

    async fn stats(&self) -> Result<PoolStats, StoreError> {
        self.inner.stats().await
    }
}

struct FlakyCommitTxn {
    inner: Box<dyn PairingTxn>,
    fail: bool,
}

#[async_trait]
impl PairingTxn for FlakyCommitTxn {
    async fn pop_waiting(&mut self) -> Result<Option<ConnectionId>, StoreError> {
        self.inner.pop_waiting().await
    }

    async fn push_waiting(&mut self, id: ConnectionId) -> Result<(), StoreError> {
        self.inner.push_waiting(id).await
    }

    async fn remove_waiting(&mut self, id: ConnectionId) -> Result<bool, StoreError> {
        self.inner.remove_waiting(id).await
    }

    async fn partner_of(&mut self, id: ConnectionId) -> Result<Option<ConnectionId>, StoreError> {
        self.inner.partner_of(id).await
    }

    async fn set_pair(&mut self, a: ConnectionId, b: ConnectionId) -> Result<(), StoreError> {
        self.inner.set_pair(a, b).await
    }

    async fn take_partner(&mut self, id: ConnectionId) -> Result<Option<ConnectionId>, StoreError> {
        self.inner.take_partner(id).await
    }

    async fn remove_partner_if(&mut self, id: ConnectionId, expected: ConnectionId) -> Result<bool, StoreError> {
        self.inner.remove_partner_if(id, expected).await
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        if self.fail {
            return Err(StoreError::Unavailable("connection reset during commit".to_string()));
        }
        self.inner.commit().await
    }
}
