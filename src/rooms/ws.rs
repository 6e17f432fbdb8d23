//! Per-connection session gateway: resolve identity, ask for admission,
//! then pump frames until the socket dies and unwind in one place.

use std::sync::Arc;

use axum::debug_handler;
use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket, close_code};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::response::Response;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use sqlx::SqlitePool;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::AppResult;
use crate::auth::{self, Identity, User};
use crate::rooms::events::{Inbound, Outbound};
use crate::rooms::hub::Hub;
use crate::rooms::membership::{self, Admission};
use crate::rooms::msg::{self, SaveMessageError};

pub const CLOSE_UNAUTHENTICATED: u16 = 4401;
pub const CLOSE_ACCESS_DENIED: u16 = 4403;

#[derive(Deserialize)]
pub(crate) struct WsQuery {
    token: Option<String>,
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn room_ws(
    Path(room_id): Path<Uuid>,
    Query(query): Query<WsQuery>,
    State(db_pool): State<SqlitePool>,
    State(hub): State<Arc<Hub>>,
    ws: WebSocketUpgrade,
) -> AppResult<Response> {
    // Identity is settled before the upgrade; resolver trouble is an HTTP
    // error, not a half-open socket.
    let identity = auth::resolve_token(&db_pool, query.token.as_deref()).await?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, db_pool, hub, identity, room_id)))
}

async fn handle_socket(
    mut socket: WebSocket,
    db_pool: SqlitePool,
    hub: Arc<Hub>,
    identity: Identity,
    room_id: Uuid,
) {
    let user = match identity {
        Identity::User(user) => user,
        Identity::Anonymous => {
            close(socket, CLOSE_UNAUTHENTICATED, "unauthenticated").await;
            return;
        }
    };

    let admission = match membership::request_join(&db_pool, user.id, room_id).await {
        Ok(admission) => admission,
        Err(err) => {
            // Fail closed when admission cannot be evaluated.
            error!(%room_id, user_id = %user.id, error = %err, "admission check failed");
            close(socket, close_code::ERROR, "admission check failed").await;
            return;
        }
    };
    let newly_added = match admission {
        Admission::Granted { newly_added } => newly_added,
        Admission::Denied(reason) => {
            if let Ok(json) = serde_json::to_string(&Outbound::join_denied(reason)) {
                let _ = socket.send(WsMessage::Text(json.into())).await;
            }
            close(socket, CLOSE_ACCESS_DENIED, reason.as_str()).await;
            return;
        }
    };

    let conn_id = Uuid::now_v7();
    info!(%room_id, %conn_id, user_id = %user.id, username = %user.username, "connection active");

    // Subscribe before announcing, so this connection sees its own join.
    let outbox = hub.subscribe(room_id, conn_id).await;
    let (sink, stream) = socket.split();
    let writer = tokio::spawn(write_outbound(sink, outbox));

    hub.broadcast(room_id, &Outbound::joined(room_id, &user, newly_added))
        .await;

    read_inbound(stream, &db_pool, &hub, &user, room_id, conn_id).await;

    // The connection is gone whatever happens below; every step runs.
    match membership::request_leave(&db_pool, user.id, room_id).await {
        Ok(true) => {}
        Ok(false) => debug!(%room_id, user_id = %user.id, "leave was a no-op"),
        Err(err) => error!(%room_id, user_id = %user.id, error = %err, "leave failed during cleanup"),
    }
    hub.unsubscribe(room_id, conn_id).await;
    hub.broadcast(room_id, &Outbound::left(room_id, &user)).await;
    writer.abort();
    info!(%room_id, %conn_id, user_id = %user.id, "connection closed");
}

async fn read_inbound(
    mut stream: SplitStream<WebSocket>,
    db_pool: &SqlitePool,
    hub: &Hub,
    user: &User,
    room_id: Uuid,
    conn_id: Uuid,
) {
    while let Some(Ok(frame)) = stream.next().await {
        let WsMessage::Text(text) = frame else {
            continue;
        };
        let Ok(inbound) = serde_json::from_str::<Inbound>(&text) else {
            debug!(%room_id, %conn_id, "ignoring malformed frame");
            continue;
        };

        match inbound {
            Inbound::SendChat { payload } => {
                let content = payload.message.trim();
                if content.is_empty() {
                    // Accidental empty sends are swallowed, not answered.
                    continue;
                }
                match msg::save_message(db_pool, user, room_id, content, payload.message_type)
                    .await
                {
                    Ok(message) => {
                        hub.broadcast(room_id, &Outbound::chat_received(message)).await;
                    }
                    Err(SaveMessageError::Denied(reason)) => {
                        warn!(%room_id, user_id = %user.id, reason = reason.as_str(), "chat rejected");
                        hub.send_to(room_id, conn_id, &Outbound::chat_denied(reason)).await;
                    }
                    Err(SaveMessageError::Db(err)) => {
                        error!(%room_id, user_id = %user.id, error = %err, "failed to persist message");
                    }
                }
            }
            Inbound::Typing => {}
        }
    }
}

/// Drains the connection's outbound queue into the socket. The hub holds
/// the queue's only sender, so `None` means this connection was dropped
/// from its group; the close frame tells a still-live client why.
async fn write_outbound(
    mut sink: SplitSink<WebSocket, WsMessage>,
    mut outbox: mpsc::Receiver<Arc<String>>,
) {
    while let Some(json) = outbox.recv().await {
        if sink.send(WsMessage::Text(json.as_str().into())).await.is_err() {
            break;
        }
    }
    let frame = CloseFrame {
        code: close_code::AGAIN,
        reason: "slow consumer".into(),
    };
    let _ = sink.send(WsMessage::Close(Some(frame))).await;
}

async fn close(mut socket: WebSocket, code: u16, reason: &'static str) {
    let frame = CloseFrame {
        code,
        reason: reason.into(),
    };
    let _ = socket.send(WsMessage::Close(Some(frame))).await;
}
