pub mod events;
pub mod hub;
pub mod membership;
pub mod msg;
pub mod registry;
pub mod ws;

use axum::{Router, routing::get};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/{room_id}/ws", get(ws::room_ws))
}
