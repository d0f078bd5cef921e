//! Database module
//!
//! Postgres implementation of the pairing store, for deployments that keep
//! the waiting pool and partner directory outside the process.

mod store;

pub use store::PgPairingStore;
