use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use tracing::info;

use crate::websocket::WebSocketSession;
use crate::AppState;

/// Upgrades the HTTP connection to a WebSocket session.
pub async fn websocket_route(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let peer_addr = req
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|| "unknown".to_string());

    info!("New WebSocket connection request from: {}", peer_addr);

    ws::start(
        WebSocketSession::new(state.controller.clone(), peer_addr, state.config.heartbeat.clone()),
        &req,
        stream,
    )
}
