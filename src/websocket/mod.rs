//! WebSocket module
//!
//! The wire protocol, the registry of live connections, and the actor that
//! bridges one WebSocket to the session controller.

mod protocol;
mod registry;
mod server;
mod session;

pub use protocol::{ClientMessage, RelayedSignal, ServerMessage, SignalEnvelope, SignalKind};
pub use registry::{ClientSender, ConnectionId, ConnectionRegistry};
pub use server::websocket_route;
pub use session::WebSocketSession;
