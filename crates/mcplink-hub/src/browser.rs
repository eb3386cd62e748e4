//! Browser session: WebSocket upgrade handler and per-connection loop.

use std::collections::HashMap;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use mcplink_core::ports::TokenAudience;
use mcplink_core::rpc::RpcFrame;
use mcplink_core::util::LogThrottle;

use crate::router::{RouterMsg, SESSION_BUFFER};
use crate::state::HubState;

/// WebSocket close code for rejected authentication.
pub(crate) const CLOSE_UNAUTHORIZED: u16 = 4401;

/// Browser WebSocket upgrade endpoint.
pub async fn upgrade(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<HubState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, params))
}

async fn handle_socket(socket: WebSocket, state: HubState, params: HashMap<String, String>) {
    let verdict = state
        .validator
        .validate_token(params.get("token").map(String::as_str), TokenAudience::Browser)
        .await;
    if !verdict.valid {
        warn!(reason = ?verdict.reason, "browser connection rejected");
        reject(socket, verdict.reason).await;
        return;
    }

    let id = state.router.allocate_session_id();
    let (tx, mut rx) = mpsc::channel::<String>(SESSION_BUFFER);
    state
        .router
        .send(RouterMsg::BrowserConnected { id, tx })
        .await;

    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut throttle = LogThrottle::per_minute();

    loop {
        tokio::select! {
            outbound = rx.recv() => match outbound {
                Some(text) => {
                    if ws_tx.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            inbound = ws_rx.next() => match inbound {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                Some(Ok(Message::Text(text))) => match RpcFrame::parse(&text) {
                    Ok(frame) => {
                        state.router.send(RouterMsg::BrowserFrame { id, frame }).await;
                    }
                    Err(e) => {
                        if throttle.allow() {
                            warn!(browser = id, error = %e, "dropping malformed browser frame");
                        }
                    }
                },
                Some(Ok(Message::Binary(_))) => {
                    if throttle.allow() {
                        warn!(browser = id, "dropping binary browser frame");
                    }
                }
                Some(Ok(_)) => {} // ping/pong handled by the websocket layer
            },
        }
    }

    debug!(browser = id, "browser socket closed");
    state.router.send(RouterMsg::BrowserClosed { id }).await;
}

/// Close the socket with the 4401 policy code before any frame is
/// delivered.
pub(crate) async fn reject(mut socket: WebSocket, reason: Option<String>) {
    let close = CloseFrame {
        code: CLOSE_UNAUTHORIZED,
        reason: reason.unwrap_or_else(|| "invalid token".to_string()).into(),
    };
    let _ = socket.send(Message::Close(Some(close))).await;
}
