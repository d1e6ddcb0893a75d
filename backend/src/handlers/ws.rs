//! Real-time channel. Connections authenticate with an access token in the
//! query string, receive the events their company entitles them to, and
//! answer two client commands: `get_active_timers` and `ping`.

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use chrono::Utc;
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use crate::error::AppError;
use crate::middleware::auth::{resolve_caller, AuthedUser};
use crate::services::broadcast::{CloseReason, OutboundFrame};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    #[serde(default)]
    pub token: Option<String>,
}

fn close_code(reason: CloseReason) -> u16 {
    match reason {
        CloseReason::Unauthenticated => 4401,
        CloseReason::Revoked => 4403,
        CloseReason::SlowConsumer => 4408,
        CloseReason::IdleTimeout => 4409,
    }
}

/// `GET /ws?token=…` — token verification happens before the upgrade; a bad
/// token is rejected with 401 and no socket is opened.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, AppError> {
    let token = query
        .token
        .filter(|token| !token.is_empty())
        .ok_or_else(|| AppError::Unauthenticated("Missing token".to_string()))?;
    let authed = resolve_caller(&state, &token).await?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, authed)))
}

async fn handle_socket(socket: WebSocket, state: AppState, authed: AuthedUser) {
    let registration = state.broadcaster.register(
        authed.user.id,
        authed.user.company_id,
        authed.user.role,
        authed.claims.jti.clone(),
    );
    let connection_id = registration.id;
    tracing::debug!(connection_id, user_id = %authed.user.id, "websocket attached");

    let (sink, stream) = socket.split();
    let mut writer = tokio::spawn(write_loop(sink, registration.frames, registration.closed));
    let mut reader = tokio::spawn(read_loop(
        stream,
        state.clone(),
        authed,
        registration.sender,
        registration.last_seen,
    ));

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }
    state.broadcaster.unregister(connection_id);
    tracing::debug!(connection_id, "websocket detached");
}

/// Drains the outbound queue onto the socket. The close signal latches once;
/// the writer forwards it as a close frame and ends the connection.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut frames: mpsc::Receiver<OutboundFrame>,
    mut closed: watch::Receiver<Option<CloseReason>>,
) {
    loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Some(OutboundFrame::Text(payload)) => {
                    if sink.send(Message::Text(payload.into())).await.is_err() {
                        break;
                    }
                }
                Some(OutboundFrame::Ping) => {
                    if sink.send(Message::Ping(Default::default())).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            changed = closed.changed() => {
                if changed.is_err() {
                    break;
                }
                let reason = *closed.borrow_and_update();
                if let Some(reason) = reason {
                    let _ = sink
                        .send(Message::Close(Some(CloseFrame {
                            code: close_code(reason),
                            reason: reason.as_str().into(),
                        })))
                        .await;
                    break;
                }
            }
        }
    }
}

async fn read_loop(
    mut stream: SplitStream<WebSocket>,
    state: AppState,
    authed: AuthedUser,
    sender: mpsc::Sender<OutboundFrame>,
    last_seen: Arc<AtomicI64>,
) {
    while let Some(Ok(message)) = stream.next().await {
        last_seen.store(Utc::now().timestamp(), Ordering::Relaxed);
        match message {
            Message::Text(text) => {
                handle_client_command(&state, &authed, &sender, text.as_str());
            }
            Message::Close(_) => break,
            // Pings are answered by the protocol layer; pongs only refresh
            // the activity stamp above.
            Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => {}
        }
    }
}

fn handle_client_command(
    state: &AppState,
    authed: &AuthedUser,
    sender: &mpsc::Sender<OutboundFrame>,
    raw: &str,
) {
    let command = serde_json::from_str::<serde_json::Value>(raw)
        .ok()
        .and_then(|v| v["type"].as_str().map(|s| s.to_string()));

    let reply = match command.as_deref() {
        Some("get_active_timers") => {
            let timers = state.presence.snapshot(authed.scope, None);
            json!({ "type": "active_timers", "seq": state.presence.seq(), "timers": timers })
        }
        Some("ping") => {
            json!({ "type": "pong", "server_time": Utc::now().to_rfc3339() })
        }
        _ => json!({ "type": "error", "message": "unknown command" }),
    };

    // Reply competes with broadcast events for queue space on purpose: a
    // client that cannot absorb its own replies is a slow consumer.
    if let Ok(payload) = serde_json::to_string(&reply) {
        let _ = sender.try_send(OutboundFrame::Text(payload));
    }
}
