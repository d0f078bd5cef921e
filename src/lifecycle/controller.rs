use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::RelayConfig;
use crate::matching::{Matchmaker, PairingStore};
use crate::relay::{DropReason, Relay, RelayOutcome};
use crate::websocket::{ClientMessage, ClientSender, ConnectionId, ConnectionRegistry, ServerMessage};

const INVALID_MESSAGE_NOTICE: &str = "Invalid message format or length.";
const RATE_LIMITED_NOTICE: &str = "You are sending messages too quickly.";

/// Drives every connection through connect → match → relay →
/// next/disconnect.
///
/// Each connection's events are handled one at a time by `run`, so its
/// `matched`/`waiting` notice always precedes any relay it sends, and its
/// disconnect always follows whatever match request was in flight.
pub struct SessionController {
    registry: Arc<ConnectionRegistry>,
    matchmaker: Matchmaker,
    relay: Relay,
    notify_sender: bool,
}

impl SessionController {
    pub fn new(registry: Arc<ConnectionRegistry>, store: Arc<dyn PairingStore>, relay: &RelayConfig) -> Self {
        let matchmaker = Matchmaker::new(store.clone(), registry.clone());
        Self {
            relay: Relay::new(store, registry.clone(), matchmaker.sequencer(), relay),
            matchmaker,
            registry,
            notify_sender: relay.notify_sender,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn PairingStore> {
        self.matchmaker.store()
    }

    /// Runs one connection until its inbound queue closes.
    pub async fn run(
        self: Arc<Self>,
        id: ConnectionId,
        sender: ClientSender,
        mut inbound: mpsc::UnboundedReceiver<ClientMessage>,
    ) {
        self.connect(id, sender).await;
        while let Some(msg) = inbound.recv().await {
            self.handle(id, msg).await;
        }
        self.disconnect(id).await;
    }

    pub async fn connect(&self, id: ConnectionId, sender: ClientSender) {
        info!(connection = %id, "User connected");
        self.registry.add(id, sender).await;
        self.find_partner(id).await;
    }

    /// Applies one inbound event against the connection's state at the time
    /// it is handled. A `next` sent just before the partner left lands after
    /// the survivor re-match and moves the connection on from its new
    /// partner; events carry no pairing identity to tell the two apart.
    pub async fn handle(&self, id: ConnectionId, msg: ClientMessage) {
        match msg {
            ClientMessage::Message { text } => {
                let outcome = self.relay.relay_chat(id, &text).await;
                self.notify_drop(id, outcome).await;
            }
            ClientMessage::Reaction { emoji } => {
                let outcome = self.relay.relay_reaction(id, &emoji).await;
                self.notify_drop(id, outcome).await;
            }
            ClientMessage::Signal(kind, envelope) => {
                self.relay.relay_signal(id, kind, envelope).await;
            }
            ClientMessage::Next => {
                info!(connection = %id, "User requested next");
                if let Err(e) = self.matchmaker.next(id).await {
                    error!(connection = %id, "Next failed, falling back to solo waiting: {}", e);
                    self.send(id, ServerMessage::Waiting).await;
                }
            }
            ClientMessage::Ready => self.ready(id).await,
            ClientMessage::Ping => self.send(id, ServerMessage::Pong).await,
        }
    }

    /// Tears down whatever the connection still holds. Idempotent.
    pub async fn disconnect(&self, id: ConnectionId) {
        info!(connection = %id, "User disconnected");
        // Unregister first so no concurrent match can pick this id again.
        self.registry.remove(&id).await;
        if let Err(e) = self.matchmaker.release(id).await {
            error!(connection = %id, "Failed to release pairing state: {}", e);
        }
        self.relay.forget(&id).await;
    }

    async fn find_partner(&self, id: ConnectionId) {
        if let Err(e) = self.matchmaker.request_match(id).await {
            error!(connection = %id, "Matchmaking unavailable, falling back to solo waiting: {}", e);
            self.send(id, ServerMessage::Waiting).await;
        }
    }

    /// Re-enters matchmaking only when the connection holds no pool or
    /// directory entry, i.e. after a degraded match attempt.
    async fn ready(&self, id: ConnectionId) {
        let store = self.matchmaker.store();
        let state = match store.partner_of(id).await {
            Ok(Some(_)) => Ok(true),
            Ok(None) => store.is_waiting(id).await,
            Err(e) => Err(e),
        };

        match state {
            Ok(true) => debug!(connection = %id, "Ignoring ready from connection already in matchmaking"),
            Ok(false) => self.find_partner(id).await,
            Err(e) => {
                warn!(connection = %id, "Store unavailable on ready: {}", e);
                self.send(id, ServerMessage::Waiting).await;
            }
        }
    }

    async fn notify_drop(&self, id: ConnectionId, outcome: RelayOutcome) {
        if !self.notify_sender {
            return;
        }
        let notice = match outcome {
            RelayOutcome::Dropped(DropReason::Invalid) => INVALID_MESSAGE_NOTICE,
            RelayOutcome::Dropped(DropReason::RateLimited) => RATE_LIMITED_NOTICE,
            _ => return,
        };
        self.send(id, ServerMessage::system_error(notice)).await;
    }

    async fn send(&self, id: ConnectionId, msg: ServerMessage) {
        if let Err(e) = self.registry.send_to(&id, msg).await {
            debug!(connection = %id, "Failed to notify connection: {}", e);
        }
    }
}
