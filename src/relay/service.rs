use std::sync::Arc;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::RelayConfig;
use crate::matching::{PairingStore, Sequencer};
use crate::relay::{RateLimitConfig, RateLimiter};
use crate::websocket::{ConnectionId, ConnectionRegistry, ServerMessage, SignalEnvelope, SignalKind};

const MAX_EMOJI_CHARS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Empty, oversized or non-string content.
    Invalid,
    RateLimited,
    /// Sender has no partner.
    Unpaired,
    /// Signal addressed to someone other than the current partner.
    WrongTarget,
    /// Partner is paired but no longer reachable.
    PartnerGone,
    StoreUnavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    Delivered { partner: ConnectionId },
    Dropped(DropReason),
}

/// Forwards payloads from a connection to its current partner. Never
/// mutates the partner directory.
pub struct Relay {
    store: Arc<dyn PairingStore>,
    registry: Arc<ConnectionRegistry>,
    limiter: RateLimiter,
    sequencer: Sequencer,
    max_message_chars: usize,
}

impl Relay {
    /// `sequencer` must be the matchmaker's, so a relayed payload never
    /// overtakes the `matched` it depends on.
    pub fn new(
        store: Arc<dyn PairingStore>,
        registry: Arc<ConnectionRegistry>,
        sequencer: Sequencer,
        config: &RelayConfig,
    ) -> Self {
        let limiter = RateLimiter::new(RateLimitConfig {
            window_size: config.rate_limit_window(),
            max_messages: config.rate_limit_messages,
        });
        Self {
            store,
            registry,
            limiter,
            sequencer,
            max_message_chars: config.max_message_chars,
        }
    }

    pub async fn relay_chat(&self, sender: ConnectionId, text: &Value) -> RelayOutcome {
        let Some(text) = bounded_text(text, self.max_message_chars) else {
            warn!(connection = %sender, "Invalid chat message");
            return RelayOutcome::Dropped(DropReason::Invalid);
        };

        if !self.limiter.check_rate_limit(sender).await {
            warn!(connection = %sender, "Rate limit exceeded for messages");
            return RelayOutcome::Dropped(DropReason::RateLimited);
        }

        let msg = ServerMessage::Message { text: text.to_string() };
        self.forward(sender, None, msg).await
    }

    /// Reactions share the chat budget.
    pub async fn relay_reaction(&self, sender: ConnectionId, emoji: &Value) -> RelayOutcome {
        let Some(emoji) = bounded_text(emoji, MAX_EMOJI_CHARS) else {
            warn!(connection = %sender, "Invalid reaction");
            return RelayOutcome::Dropped(DropReason::Invalid);
        };

        if !self.limiter.check_rate_limit(sender).await {
            warn!(connection = %sender, "Rate limit exceeded for reactions");
            return RelayOutcome::Dropped(DropReason::RateLimited);
        }

        let msg = ServerMessage::Reaction { emoji: emoji.to_string() };
        self.forward(sender, None, msg).await
    }

    /// Signaling payloads are forwarded verbatim, unlimited and unchecked.
    pub async fn relay_signal(&self, sender: ConnectionId, kind: SignalKind, envelope: SignalEnvelope) -> RelayOutcome {
        let msg = ServerMessage::signal(kind, envelope.data, sender);
        let outcome = self.forward(sender, envelope.to, msg).await;
        debug!(connection = %sender, signal = kind.as_str(), outcome = ?outcome, "Relayed signal");
        outcome
    }

    /// Drops the sender's rate-limit window.
    pub async fn forget(&self, id: &ConnectionId) {
        self.limiter.forget(id).await;
    }

    async fn forward(&self, sender: ConnectionId, target: Option<ConnectionId>, msg: ServerMessage) -> RelayOutcome {
        let _turn = self.sequencer.lock().await;
        let partner = match self.store.partner_of(sender).await {
            Ok(Some(partner)) => partner,
            Ok(None) => {
                debug!(connection = %sender, "Dropping payload from unpaired connection");
                return RelayOutcome::Dropped(DropReason::Unpaired);
            }
            Err(e) => {
                warn!(connection = %sender, "Partner lookup failed: {}", e);
                return RelayOutcome::Dropped(DropReason::StoreUnavailable);
            }
        };

        if let Some(target) = target {
            if target != partner {
                debug!(connection = %sender, target = %target, "Dropping payload addressed to a non-partner");
                return RelayOutcome::Dropped(DropReason::WrongTarget);
            }
        }

        match self.registry.send_to(&partner, msg).await {
            Ok(()) => RelayOutcome::Delivered { partner },
            Err(e) => {
                debug!(connection = %sender, partner = %partner, "Partner unreachable: {}", e);
                RelayOutcome::Dropped(DropReason::PartnerGone)
            }
        }
    }
}

/// Non-empty string of at most `max_chars` characters.
fn bounded_text(value: &Value, max_chars: usize) -> Option<&str> {
    let text = value.as_str()?;
    if text.is_empty() || text.chars().count() > max_chars {
        return None;
    }
    Some(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::{Matchmaker, MemoryStore};
    use serde_json::json;
    use tokio::sync::mpsc;

    struct Harness {
        store: MemoryStore,
        registry: Arc<ConnectionRegistry>,
        matchmaker: Matchmaker,
        relay: Relay,
    }

    impl Harness {
        fn new() -> Self {
            let store = MemoryStore::new();
            let registry = Arc::new(ConnectionRegistry::new());
            let shared: Arc<dyn PairingStore> = Arc::new(store.clone());
            let matchmaker = Matchmaker::new(shared.clone(), registry.clone());
            let relay = Relay::new(shared, registry.clone(), matchmaker.sequencer(), &RelayConfig::default());
            Self { store, registry, matchmaker, relay }
        }

        async fn connect(&self) -> (ConnectionId, mpsc::UnboundedReceiver<ServerMessage>) {
            let id = ConnectionId::new();
            let (tx, rx) = mpsc::unbounded_channel();
            self.registry.add(id, tx).await;
            self.matchmaker.request_match(id).await.unwrap();
            (id, rx)
        }

        /// Two connections paired with each other, notifications drained.
        async fn pair(&self) -> (ConnectionId, mpsc::UnboundedReceiver<ServerMessage>, ConnectionId, mpsc::UnboundedReceiver<ServerMessage>) {
            let (a, mut rx_a) = self.connect().await;
            let (b, mut rx_b) = self.connect().await;
            while rx_a.try_recv().is_ok() {}
            while rx_b.try_recv().is_ok() {}
            (a, rx_a, b, rx_b)
        }
    }

    #[tokio::test]
    async fn test_chat_reaches_partner() {
        let h = Harness::new();
        let (a, _rx_a, b, mut rx_b) = h.pair().await;

        assert_eq!(h.relay.relay_chat(a, &json!("hello")).await, RelayOutcome::Delivered { partner: b });
        assert_eq!(rx_b.try_recv().ok(), Some(ServerMessage::Message { text: "hello".to_string() }));
    }

    #[tokio::test]
    async fn test_unpaired_message_is_never_delivered() {
        let h = Harness::new();
        let (a, mut rx_a) = h.connect().await;
        let lurker = ConnectionId::new();
        let (tx_lurker, mut rx_lurker) = mpsc::unbounded_channel();
        h.registry.add(lurker, tx_lurker).await;
        while rx_a.try_recv().is_ok() {}

        assert_eq!(h.relay.relay_chat(a, &json!("anyone?")).await, RelayOutcome::Dropped(DropReason::Unpaired));
        assert!(rx_a.try_recv().is_err());
        assert!(rx_lurker.try_recv().is_err());
        assert!(h.store.snapshot().await.partners.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_chat_is_dropped() {
        let h = Harness::new();
        let (a, _rx_a, _b, mut rx_b) = h.pair().await;

        let too_long = "x".repeat(501);
        for payload in [json!(""), json!(too_long), json!(42), json!({"text": "nested"})] {
            assert_eq!(h.relay.relay_chat(a, &payload).await, RelayOutcome::Dropped(DropReason::Invalid));
        }
        assert!(rx_b.try_recv().is_err());

        // Exactly at the limit, counted in characters rather than bytes.
        let at_limit = "é".repeat(500);
        assert!(matches!(h.relay.relay_chat(a, &json!(at_limit)).await, RelayOutcome::Delivered { .. }));
    }

    #[tokio::test]
    async fn test_eleventh_message_in_window_is_dropped() {
        let h = Harness::new();
        let (a, _rx_a, _b, mut rx_b) = h.pair().await;

        let mut delivered = 0;
        for i in 0..11 {
            if let RelayOutcome::Delivered { .. } = h.relay.relay_chat(a, &json!(format!("msg {}", i))).await {
                delivered += 1;
            }
        }
        assert_eq!(delivered, 10);

        let mut received = 0;
        while rx_b.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 10);
    }

    #[tokio::test]
    async fn test_signals_bypass_rate_limit() {
        let h = Harness::new();
        let (a, _rx_a, b, mut rx_b) = h.pair().await;

        for _ in 0..10 {
            h.relay.relay_chat(a, &json!("spam")).await;
        }
        assert_eq!(h.relay.relay_chat(a, &json!("spam")).await, RelayOutcome::Dropped(DropReason::RateLimited));

        let big_sdp = json!({ "type": "offer", "sdp": "v=0\r\n".repeat(400) });
        for _ in 0..20 {
            let envelope = SignalEnvelope { data: big_sdp.clone(), to: None };
            assert_eq!(h.relay.relay_signal(a, SignalKind::Offer, envelope).await, RelayOutcome::Delivered { partner: b });
        }

        let mut offers = 0;
        while let Ok(msg) = rx_b.try_recv() {
            if let ServerMessage::Offer(signal) = msg {
                assert_eq!(signal.from, a);
                assert_eq!(signal.data, big_sdp);
                offers += 1;
            }
        }
        assert_eq!(offers, 20);
    }

    #[tokio::test]
    async fn test_signal_to_non_partner_is_dropped() {
        let h = Harness::new();
        let (a, _rx_a, _b, mut rx_b) = h.pair().await;

        let envelope = SignalEnvelope { data: json!({"candidate": "c"}), to: Some(ConnectionId::new()) };
        assert_eq!(
            h.relay.relay_signal(a, SignalKind::Candidate, envelope).await,
            RelayOutcome::Dropped(DropReason::WrongTarget)
        );
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_gone_partner_is_not_unpaired() {
        let h = Harness::new();
        let (a, _rx_a, b, rx_b) = h.pair().await;
        drop(rx_b);

        assert_eq!(h.relay.relay_chat(a, &json!("still there?")).await, RelayOutcome::Dropped(DropReason::PartnerGone));
        let snapshot = h.store.snapshot().await;
        assert_eq!(snapshot.partners.get(&a), Some(&b));
        assert_eq!(snapshot.partners.get(&b), Some(&a));
    }

    #[tokio::test]
    async fn test_reaction_is_relayed() {
        let h = Harness::new();
        let (a, _rx_a, _b, mut rx_b) = h.pair().await;

        assert!(matches!(h.relay.relay_reaction(a, &json!("❤️")).await, RelayOutcome::Delivered { .. }));
        assert_eq!(rx_b.try_recv().ok(), Some(ServerMessage::Reaction { emoji: "❤️".to_string() }));
        assert_eq!(h.relay.relay_reaction(a, &json!("")).await, RelayOutcome::Dropped(DropReason::Invalid));
    }
}
