//! Matching module
//!
//! The waiting pool, the partner directory behind the `PairingStore`
//! abstraction, and the matchmaker that pairs connections through them.

mod matchmaker;
mod memory;
mod store;
#[cfg(test)]
pub(crate) mod testing;

pub use matchmaker::{Matchmaker, MatchOutcome, Rematch, Sequencer};
pub use memory::{MemoryStore, PoolSnapshot};
pub use store::{PairingStore, PairingTxn, PoolStats};

#[cfg(test)]
pub use store::MockPairingStore;
