use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::matching::{PairingStore, PairingTxn};
use crate::websocket::{ConnectionId, ConnectionRegistry, ServerMessage};

/// Result of one match attempt for one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    Paired { partner: ConnectionId, initiator: bool },
    Waiting,
    /// The connection closed before it could be matched; nothing was written.
    Gone,
}

/// What `next` did: the old partner (if any) and both new outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rematch {
    pub own: MatchOutcome,
    pub former_partner: Option<ConnectionId>,
    pub former_partner_outcome: Option<MatchOutcome>,
}

type Outbox = Vec<(ConnectionId, ServerMessage)>;

/// Held from the start of a pairing transaction until its notifications
/// are delivered, and by the relay around each partner lookup and send.
/// Both sides of a pairing are always local to one process, so this keeps
/// every connection's events in commit order.
pub type Sequencer = Arc<Mutex<()>>;

/// Pairs connections through the waiting pool and partner directory.
///
/// Each public operation is one store transaction. Notifications are staged
/// while it runs and delivered only once it has committed; a failed commit
/// notifies nobody.
pub struct Matchmaker {
    store: Arc<dyn PairingStore>,
    registry: Arc<ConnectionRegistry>,
    sequencer: Sequencer,
}

impl Matchmaker {
    pub fn new(store: Arc<dyn PairingStore>, registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            store,
            registry,
            sequencer: Sequencer::default(),
        }
    }

    pub fn store(&self) -> &Arc<dyn PairingStore> {
        &self.store
    }

    pub fn sequencer(&self) -> Sequencer {
        self.sequencer.clone()
    }

    /// Pairs `requester` with some live waiting connection, or enqueues it.
    /// Emits exactly one of `matched` (to both sides) or `waiting`.
    pub async fn request_match(&self, requester: ConnectionId) -> Result<MatchOutcome, StoreError> {
        let _turn = self.sequencer.lock().await;
        let mut txn = self.store.begin().await?;
        let mut outbox = Outbox::new();

        let outcome = self.draw(txn.as_mut(), requester, None, &mut outbox).await?;

        txn.commit().await?;
        self.deliver(outbox).await;
        Ok(outcome)
    }

    /// Abandons the current pairing (if any) and matches both sides again.
    /// Neither side can draw the other in this round.
    pub async fn next(&self, id: ConnectionId) -> Result<Rematch, StoreError> {
        let _turn = self.sequencer.lock().await;
        let mut txn = self.store.begin().await?;
        let mut outbox = Outbox::new();

        let former_partner = self.unpair(txn.as_mut(), id).await?;
        if let Some(partner) = former_partner {
            outbox.push((partner, ServerMessage::PartnerDisconnected));
        }

        let own = self.draw(txn.as_mut(), id, former_partner, &mut outbox).await?;
        let former_partner_outcome = match former_partner {
            Some(partner) => Some(self.draw(txn.as_mut(), partner, Some(id), &mut outbox).await?),
            None => None,
        };

        txn.commit().await?;
        self.deliver(outbox).await;

        info!(connection = %id, former_partner = ?former_partner, outcome = ?own, "Connection moved to next partner");
        Ok(Rematch {
            own,
            former_partner,
            former_partner_outcome,
        })
    }

    /// Removes `id` from the pool and directory for good. The surviving
    /// partner is told and matched again. Safe to call on a connection that
    /// holds no state.
    pub async fn release(&self, id: ConnectionId) -> Result<Option<ConnectionId>, StoreError> {
        let _turn = self.sequencer.lock().await;
        let mut txn = self.store.begin().await?;
        let mut outbox = Outbox::new();

        let former_partner = self.unpair(txn.as_mut(), id).await?;
        if let Some(partner) = former_partner {
            outbox.push((partner, ServerMessage::PartnerDisconnected));
            self.draw(txn.as_mut(), partner, Some(id), &mut outbox).await?;
        }

        txn.commit().await?;
        self.deliver(outbox).await;

        if let Some(partner) = former_partner {
            info!(connection = %id, partner = %partner, "Released pairing");
        }
        Ok(former_partner)
    }

    /// Draws candidates until a live one is found or the pool runs dry.
    async fn draw(
        &self,
        txn: &mut dyn PairingTxn,
        requester: ConnectionId,
        exclude: Option<ConnectionId>,
        outbox: &mut Outbox,
    ) -> Result<MatchOutcome, StoreError> {
        if !self.registry.is_live(&requester).await {
            debug!(connection = %requester, "Skipping match for closed connection");
            return Ok(MatchOutcome::Gone);
        }

        if let Some(partner) = txn.partner_of(requester).await? {
            // Paired concurrently; repeat the signal instead of pairing twice.
            txn.remove_waiting(requester).await?;
            outbox.push((requester, ServerMessage::Matched { partner_id: partner, initiator: false }));
            return Ok(MatchOutcome::Paired { partner, initiator: false });
        }
        txn.remove_waiting(requester).await?;

        let mut set_aside = Vec::new();
        let mut found = None;
        while let Some(candidate) = txn.pop_waiting().await? {
            if candidate == requester {
                warn!(connection = %requester, "Drew requester from its own waiting entry");
                continue;
            }
            if Some(candidate) == exclude {
                set_aside.push(candidate);
                continue;
            }
            if !self.registry.is_live(&candidate).await {
                warn!(connection = %requester, candidate = %candidate, "Discarding stale waiting entry");
                continue;
            }
            if txn.partner_of(candidate).await?.is_some() {
                warn!(candidate = %candidate, "Discarding waiting entry of a paired connection");
                continue;
            }

            found = Some(candidate);
            break;
        }

        for id in set_aside {
            txn.push_waiting(id).await?;
        }

        match found {
            Some(partner) => {
                txn.set_pair(requester, partner).await?;
                outbox.push((requester, ServerMessage::Matched { partner_id: partner, initiator: true }));
                outbox.push((partner, ServerMessage::Matched { partner_id: requester, initiator: false }));
                info!(connection = %requester, partner = %partner, "Paired connections");
                Ok(MatchOutcome::Paired { partner, initiator: true })
            }
            None => {
                txn.push_waiting(requester).await?;
                outbox.push((requester, ServerMessage::Waiting));
                info!(connection = %requester, "Connection added to waiting pool");
                Ok(MatchOutcome::Waiting)
            }
        }
    }

    /// Drops `id` from the pool and both halves of its pairing.
    async fn unpair(&self, txn: &mut dyn PairingTxn, id: ConnectionId) -> Result<Option<ConnectionId>, StoreError> {
        txn.remove_waiting(id).await?;

        let partner = txn.take_partner(id).await?;
        if let Some(partner) = partner {
            if !txn.remove_partner_if(partner, id).await? {
                warn!(connection = %id, partner = %partner, "Partner entry did not point back");
            }
        }
        Ok(partner)
    }

    async fn deliver(&self, outbox: Outbox) {
        for (id, msg) in outbox {
            if let Err(e) = self.registry.send_to(&id, msg).await {
                debug!(connection = %id, "Dropped notification: {}", e);
            }
        }
    }
}
