pub mod models;
pub mod websocket;

use axum::routing::get;
use axum::Router;

use crate::server::ServerState;

/// API 라우터 생성
pub fn create_api_router() -> Router<ServerState> {
    Router::new().route("/ws", get(websocket::websocket_handler))
}
