//! Session lifecycle module
//!
//! Orchestrates each connection from connect to disconnect, routing its
//! events to the matchmaker and the relay.

mod controller;

pub use controller::SessionController;
