use std::sync::Arc;
use std::time::Instant;
use actix::prelude::*;
use actix_web_actors::ws;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::HeartbeatConfig;
use crate::lifecycle::SessionController;
use crate::websocket::{ClientMessage, ConnectionId, ServerMessage};

/// WebSocket actor for one client. It owns the transport only: inbound
/// frames are parsed and queued for the controller, and whatever the
/// controller pushes to this connection is written back out.
pub struct WebSocketSession {
    id: ConnectionId,
    peer_addr: String,
    controller: Arc<SessionController>,
    inbound: Option<mpsc::UnboundedSender<ClientMessage>>,
    last_heartbeat: Instant,
    heartbeat: HeartbeatConfig,
}

impl WebSocketSession {
    pub fn new(controller: Arc<SessionController>, peer_addr: String, heartbeat: HeartbeatConfig) -> Self {
        Self {
            id: ConnectionId::new(),
            peer_addr,
            controller,
            inbound: None,
            last_heartbeat: Instant::now(),
            heartbeat,
        }
    }

    fn handle_websocket_message(&mut self, text: &str, ctx: &mut <Self as Actor>::Context) {
        match ClientMessage::parse(text) {
            Ok(msg) => {
                let queued = self
                    .inbound
                    .as_ref()
                    .map(|inbound| inbound.send(msg).is_ok())
                    .unwrap_or(false);
                if !queued {
                    error!(connection = %self.id, "Session driver is gone, closing connection");
                    ctx.stop();
                }
            }
            Err(e) => {
                warn!(connection = %self.id, "Failed to parse message from {}: {}", self.peer_addr, e);
                self.send_server_message(ctx, ServerMessage::system_error(e.to_string()));
            }
        }
    }

    fn send_server_message(&self, ctx: &mut <Self as Actor>::Context, msg: ServerMessage) {
        match serde_json::to_string(&msg) {
            Ok(json_str) => ctx.text(json_str),
            Err(e) => error!("Failed to serialize server message: {}", e),
        }
    }

    fn start_heartbeat(&self, ctx: &mut <Self as Actor>::Context) {
        ctx.run_interval(self.heartbeat.interval(), |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > act.heartbeat.timeout() {
                warn!(connection = %act.id, "Heartbeat timeout for {}", act.peer_addr);
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }
}

impl Actor for WebSocketSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(connection = %self.id, "WebSocket connection established with {}", self.peer_addr);

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<ServerMessage>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        self.inbound = Some(inbound_tx);

        ctx.add_stream(futures::stream::unfold(outbound_rx, |mut rx| async move {
            rx.recv().await.map(|msg| (msg, rx))
        }));
        actix::spawn(self.controller.clone().run(self.id, outbound_tx, inbound_rx));

        self.start_heartbeat(ctx);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        // Closing the inbound queue lets the driver run the disconnect path.
        self.inbound.take();
        info!(connection = %self.id, "WebSocket connection closed with {}", self.peer_addr);
    }
}

/// Events the controller pushes to this connection.
impl StreamHandler<ServerMessage> for WebSocketSession {
    fn handle(&mut self, msg: ServerMessage, ctx: &mut Self::Context) {
        self.send_server_message(ctx, msg);
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WebSocketSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                self.last_heartbeat = Instant::now();
                self.handle_websocket_message(&text, ctx);
            }
            Ok(ws::Message::Binary(bin)) => {
                info!(connection = %self.id, "Received binary message of {} bytes", bin.len());
                self.send_server_message(ctx, ServerMessage::system_error("Binary messages are not supported"));
            }
            Ok(ws::Message::Close(reason)) => {
                info!(connection = %self.id, "WebSocket closed from {}: {:?}", self.peer_addr, reason);
                ctx.close(reason);
                ctx.stop();
            }
            Ok(_) => {}
            Err(e) => {
                error!(connection = %self.id, "Error handling WebSocket message from {}: {}", self.peer_addr, e);
                ctx.stop();
            }
        }
    }
}
