//! End-to-end session tests against an in-process WebSocket hub and a
//! real `cat` child: frames spliced in both directions, dial decoration,
//! and reconnection after the hub drops the connection.

#![cfg(unix)]

use std::collections::BTreeMap;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};

use mcplink_bridge::{DiscoveredTools, SessionConfig, spawn_session};
use mcplink_core::domain::{ServerDefinition, ServerKind};

fn session_config(port: u16) -> SessionConfig {
    SessionConfig {
        endpoint_id: None,
        endpoint_name: "test-hub".to_string(),
        endpoint_url: format!("ws://127.0.0.1:{port}/mcp"),
        server: ServerDefinition {
            name: "echo".to_string(),
            kind: ServerKind::Stdio,
            command: Some("cat".to_string()),
            args: Vec::new(),
            env: BTreeMap::new(),
            url: None,
            headers: BTreeMap::new(),
            disabled: false,
        },
        ws_token: Some("pipe-token".to_string()),
        dial_timeout: Duration::from_secs(5),
        backoff_max: Duration::from_secs(60),
        subprocess_grace: Duration::from_secs(2),
        discovery_id: 1_000_000_042,
    }
}

/// Accept one WebSocket connection, capturing the request URI.
async fn accept_one(listener: &TcpListener) -> (tokio_tungstenite::WebSocketStream<TcpStream>, String) {
    let (stream, _) = timeout(Duration::from_secs(10), listener.accept())
        .await
        .expect("connection within 10s")
        .expect("accept");

    let mut uri = String::new();
    let ws = tokio_tungstenite::accept_hdr_async(stream, |request: &Request, response: Response| {
        uri = request.uri().to_string();
        Ok(response)
    })
    .await
    .expect("websocket handshake");
    (ws, uri)
}

#[tokio::test]
async fn splices_frames_and_reconnects_after_close() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let (discovery_tx, mut discovery_rx) = mpsc::channel::<DiscoveredTools>(8);
    let handle = spawn_session(session_config(port), None, discovery_tx);

    // First connection: the dial URL carries the identification params.
    let (mut hub, uri) = accept_one(&listener).await;
    assert!(uri.contains("/mcp"), "uri was {uri}");
    assert!(uri.contains("server=echo"), "uri was {uri}");
    assert!(uri.contains("token=pipe-token"), "uri was {uri}");

    // Hub -> child -> hub: cat echoes the frame byte for byte.
    let frame = r#"{"jsonrpc":"2.0","id":9,"method":"initialize","params":{"capabilities":{}}}"#;
    hub.send(Message::Text(frame.into())).await.unwrap();

    let echoed = timeout(Duration::from_secs(5), async {
        loop {
            match hub.next().await {
                Some(Ok(Message::Text(text))) => break text,
                Some(Ok(_)) => continue,
                other => panic!("unexpected websocket event: {other:?}"),
            }
        }
    })
    .await
    .expect("echo within 5s");
    assert_eq!(echoed.as_str(), frame);

    // The injected discovery tools/list is echoed by cat with the reserved
    // id and captured (not forwarded), reported as an empty discovery.
    let discovered = timeout(Duration::from_secs(5), discovery_rx.recv())
        .await
        .expect("discovery within 5s")
        .expect("channel open");
    assert_eq!(discovered.server_name, "echo");
    assert!(discovered.tools.is_empty());

    // Drop the connection: the session must dial again after backoff.
    drop(hub);
    let (hub2, uri2) = accept_one(&listener).await;
    assert!(uri2.contains("server=echo"));
    drop(hub2);

    handle.stop().await;
}

#[tokio::test]
async fn invalid_frames_from_the_hub_are_dropped_not_forwarded() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let (discovery_tx, _discovery_rx) = mpsc::channel::<DiscoveredTools>(8);
    let handle = spawn_session(session_config(port), None, discovery_tx);

    let (mut hub, _) = accept_one(&listener).await;

    // Empty frame, garbage, and a frame with an embedded newline, then a
    // valid one. Only the valid frame reaches the child and comes back.
    hub.send(Message::Text("".into())).await.unwrap();
    hub.send(Message::Text("not json at all".into())).await.unwrap();
    hub.send(Message::Text("{\n\"jsonrpc\": \"2.0\", \"method\": \"x\"}".into()))
        .await
        .unwrap();
    let frame = r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#;
    hub.send(Message::Text(frame.into())).await.unwrap();

    let echoed = timeout(Duration::from_secs(5), async {
        loop {
            match hub.next().await {
                Some(Ok(Message::Text(text))) => break text,
                Some(Ok(_)) => continue,
                other => panic!("unexpected websocket event: {other:?}"),
            }
        }
    })
    .await
    .expect("echo within 5s");
    assert_eq!(echoed.as_str(), frame);

    handle.stop().await;
}
