//! Relay module
//!
//! Forwards chat, reactions and WebRTC signaling from a connection to its
//! current partner, with per-connection rate limiting for chat.

mod rate_limit;
mod service;

pub use rate_limit::{RateLimiter, RateLimitConfig};
pub use service::{DropReason, Relay, RelayOutcome};
