//! Tool-server session: an inbound WebSocket treated as one tool server.
//!
//! The peer is usually a remote bridge identifying itself via the
//! `?server=` query parameter. The router drives the initialize and
//! tools/list exchange once the session registers; this loop only moves
//! frames.

use std::collections::HashMap;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use mcplink_core::ports::TokenAudience;
use mcplink_core::rpc::RpcFrame;
use mcplink_core::util::LogThrottle;

use crate::browser::reject;
use crate::router::{RouterMsg, SESSION_BUFFER};
use crate::state::HubState;

/// Tool-pipe WebSocket upgrade endpoint.
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
        .validate_token(
            params.get("token").map(String::as_str),
            TokenAudience::ToolPipe,
        )
        .await;
    let query_name = params.get("server").cloned();
    if !verdict.valid {
        warn!(server = ?query_name, reason = ?verdict.reason, "tool-pipe connection rejected");
        reject(socket, verdict.reason).await;
        return;
    }

    let id = state.router.allocate_session_id();
    let (tx, mut rx) = mpsc::channel::<String>(SESSION_BUFFER);
    state
        .router
        .send(RouterMsg::ToolConnected { id, query_name, tx })
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
                        state.router.send(RouterMsg::ToolFrame { id, frame }).await;
                    }
                    Err(e) => {
                        // Tool pipes may leak diagnostic text; drop it
                        // without disturbing the session.
                        if throttle.allow() {
                            warn!(session = id, error = %e, "dropping malformed tool frame");
                        }
                    }
                },
                Some(Ok(Message::Binary(_))) => {
                    if throttle.allow() {
                        warn!(session = id, "dropping binary tool frame");
                    }
                }
                Some(Ok(_)) => {}
            },
        }
    }

    debug!(session = id, "tool socket closed");
    state.router.send(RouterMsg::ToolClosed { id }).await;
}
