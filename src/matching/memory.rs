use std::collections::HashMap;
use std::sync::Arc;
use async_trait::async_trait;
use rand::Rng;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::StoreError;
use crate::matching::{PairingStore, PairingTxn, PoolStats};
use crate::websocket::ConnectionId;

/// Unordered set with O(1) insert, remove and random pop.
#[derive(Debug, Default)]
struct WaitingPool {
    ids: Vec<ConnectionId>,
    positions: HashMap<ConnectionId, usize>,
}

impl WaitingPool {
    fn insert(&mut self, id: ConnectionId) -> bool {
        if self.positions.contains_key(&id) {
            return false;
        }
        self.positions.insert(id, self.ids.len());
        self.ids.push(id);
        true
    }

    fn remove(&mut self, id: &ConnectionId) -> bool {
        match self.positions.remove(id) {
            Some(pos) => {
                self.ids.swap_remove(pos);
                if let Some(moved) = self.ids.get(pos) {
                    self.positions.insert(*moved, pos);
                }
                true
            }
            None => false,
        }
    }

    fn pop_random(&mut self) -> Option<ConnectionId> {
        if self.ids.is_empty() {
            return None;
        }
        let id = self.ids[rand::thread_rng().gen_range(0..self.ids.len())];
        self.remove(&id);
        Some(id)
    }

    fn contains(&self, id: &ConnectionId) -> bool {
        self.positions.contains_key(id)
    }

    fn len(&self) -> usize {
        self.ids.len()
    }
}

#[derive(Debug, Default)]
struct PoolState {
    waiting: WaitingPool,
    partners: HashMap<ConnectionId, ConnectionId>,
}

/// Point-in-time copy of the in-memory store, for invariant checks.
#[derive(Debug, Clone, Default)]
pub struct PoolSnapshot {
    pub waiting: Vec<ConnectionId>,
    pub partners: HashMap<ConnectionId, ConnectionId>,
}

impl PoolSnapshot {
    pub fn is_waiting(&self, id: &ConnectionId) -> bool {
        self.waiting.contains(id)
    }

    /// Ids present in both the pool and the directory.
    pub fn overlapping(&self) -> Vec<ConnectionId> {
        self.waiting
            .iter()
            .filter(|id| self.partners.contains_key(*id))
            .copied()
            .collect()
    }

    /// Directory entries whose partner does not point back.
    pub fn asymmetric(&self) -> Vec<ConnectionId> {
        self.partners
            .iter()
            .filter(|(id, partner)| self.partners.get(*partner) != Some(*id))
            .map(|(id, _)| *id)
            .collect()
    }
}

/// Single-process store. One mutex guards both collections, so a
/// transaction is simply the held lock.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<PoolState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> PoolSnapshot {
        let state = self.state.lock().await;
        PoolSnapshot {
            waiting: state.waiting.ids.clone(),
            partners: state.partners.clone(),
        }
    }
}

#[async_trait]
impl PairingStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn PairingTxn>, StoreError> {
        let guard = self.state.clone().lock_owned().await;
        Ok(Box::new(MemoryTxn { state: guard }))
    }

    async fn partner_of(&self, id: ConnectionId) -> Result<Option<ConnectionId>, StoreError> {
        Ok(self.state.lock().await.partners.get(&id).copied())
    }

    async fn is_waiting(&self, id: ConnectionId) -> Result<bool, StoreError> {
        Ok(self.state.lock().await.waiting.contains(&id))
    }

    async fn stats(&self) -> Result<PoolStats, StoreError> {
        let state = self.state.lock().await;
        Ok(PoolStats {
            waiting: state.waiting.len(),
            paired: state.partners.len() / 2,
        })
    }
}

/// Writes apply in place; there is no rollback.
struct MemoryTxn {
    state: OwnedMutexGuard<PoolState>,
}

#[async_trait]
impl PairingTxn for MemoryTxn {
    async fn pop_waiting(&mut self) -> Result<Option<ConnectionId>, StoreError> {
        Ok(self.state.waiting.pop_random())
    }

    async fn push_waiting(&mut self, id: ConnectionId) -> Result<(), StoreError> {
        self.state.waiting.insert(id);
        Ok(())
    }

    async fn remove_waiting(&mut self, id: ConnectionId) -> Result<bool, StoreError> {
        Ok(self.state.waiting.remove(&id))
    }

    async fn partner_of(&mut self, id: ConnectionId) -> Result<Option<ConnectionId>, StoreError> {
        Ok(self.state.partners.get(&id).copied())
    }

    async fn set_pair(&mut self, a: ConnectionId, b: ConnectionId) -> Result<(), StoreError> {
        self.state.partners.insert(a, b);
        self.state.partners.insert(b, a);
        Ok(())
    }

    async fn take_partner(&mut self, id: ConnectionId) -> Result<Option<ConnectionId>, StoreError> {
        Ok(self.state.partners.remove(&id))
    }

    async fn remove_partner_if(&mut self, id: ConnectionId, expected: ConnectionId) -> Result<bool, StoreError> {
        if self.state.partners.get(&id) == Some(&expected) {
            self.state.partners.remove(&id);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_waiting_pool_set_semantics() {
        let mut pool = WaitingPool::default();
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        let c = ConnectionId::new();

        assert!(pool.insert(a));
        assert!(!pool.insert(a));
        assert!(pool.insert(b));
        assert!(pool.insert(c));
        assert_eq!(pool.len(), 3);

        // Removing from the middle keeps the position index consistent.
        assert!(pool.remove(&a));
        assert!(!pool.remove(&a));
        assert!(pool.contains(&b) && pool.contains(&c));

        let mut popped = vec![pool.pop_random().unwrap(), pool.pop_random().unwrap()];
        popped.sort();
        let mut expected = vec![b, c];
        expected.sort();
        assert_eq!(popped, expected);
        assert_eq!(pool.pop_random(), None);
    }

    #[tokio::test]
    async fn test_transaction_pairs_and_unpairs() {
        let store = MemoryStore::new();
        let a = ConnectionId::new();
        let b = ConnectionId::new();

        let mut txn = store.begin().await.unwrap();
        txn.push_waiting(a).await.unwrap();
        assert_eq!(txn.pop_waiting().await.unwrap(), Some(a));
        txn.set_pair(a, b).await.unwrap();
        txn.commit().await.unwrap();

        assert_eq!(store.partner_of(a).await.unwrap(), Some(b));
        assert_eq!(store.partner_of(b).await.unwrap(), Some(a));
        assert_eq!(store.stats().await.unwrap(), PoolStats { waiting: 0, paired: 1 });

        let mut txn = store.begin().await.unwrap();
        assert_eq!(txn.take_partner(a).await.unwrap(), Some(b));
        assert!(!txn.remove_partner_if(b, ConnectionId::new()).await.unwrap());
        assert!(txn.remove_partner_if(b, a).await.unwrap());
        txn.commit().await.unwrap();

        let snapshot = store.snapshot().await;
        assert!(snapshot.partners.is_empty());
        assert!(snapshot.waiting.is_empty());
    }

    #[test]
    fn test_snapshot_detects_broken_invariants() {
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        let mut snapshot = PoolSnapshot::default();
        snapshot.partners.insert(a, b);
        snapshot.waiting.push(a);

        assert_eq!(snapshot.overlapping(), vec![a]);
        assert_eq!(snapshot.asymmetric(), vec![a]);
    }
}
