//! End-to-end hub tests over a real listener: a tokio-tungstenite client
//! plays the tool server (as the bridge would), another plays the browser.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use mcplink_core::domain::ToolOverride;
use mcplink_core::ports::ToolOverrideRepository;
use mcplink_core::settings::HubSettings;
use mcplink_db::{SqliteOverrideRepository, setup_test_database};
use mcplink_hub::{StaticTokenValidator, start_hub};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const BROWSER_TOKEN: &str = "browser-tok";
const PIPE_TOKEN: &str = "pipe-tok";

async fn start_test_hub(
    overrides: Option<Arc<dyn ToolOverrideRepository>>,
) -> (SocketAddr, CancellationToken) {
    let settings = HubSettings {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        browser_path: "/".to_string(),
        tool_path: "/mcp".to_string(),
        browser_token: Some(BROWSER_TOKEN.to_string()),
        tool_token: Some(PIPE_TOKEN.to_string()),
        db_path: "unused.db".into(),
    };
    let validator = Arc::new(StaticTokenValidator::new(
        settings.browser_token.clone(),
        settings.tool_token.clone(),
    ));
    let cancel = CancellationToken::new();
    let (addr, _join) = start_hub(settings, overrides, validator, cancel.clone())
        .await
        .expect("hub starts");
    (addr, cancel)
}

async fn connect(url: &str) -> Client {
    let (client, _) = timeout(Duration::from_secs(5), tokio_tungstenite::connect_async(url))
        .await
        .expect("connect within 5s")
        .expect("websocket handshake");
    client
}

async fn recv_json(client: &mut Client) -> Value {
    timeout(Duration::from_secs(5), async {
        loop {
            match client.next().await {
                Some(Ok(Message::Text(text))) => {
                    break serde_json::from_str(&text).expect("valid JSON");
                }
                Some(Ok(_)) => continue,
                other => panic!("websocket ended: {other:?}"),
            }
        }
    })
    .await
    .expect("frame within 5s")
}

async fn send_json(client: &mut Client, value: &Value) {
    client
        .send(Message::Text(value.to_string().into()))
        .await
        .expect("send");
}

/// Drive the tool-server side of the registration handshake the way the
/// bridge pipe would: answer initialize, swallow the initialized
/// notification, answer tools/list.
async fn register_tool_server(addr: SocketAddr, name: &str, tools: Value) -> Client {
    let mut client = connect(&format!("ws://{addr}/mcp?server={name}&token={PIPE_TOKEN}")).await;

    let init = recv_json(&mut client).await;
    assert_eq!(init["method"], "initialize");
    send_json(
        &mut client,
        &json!({
            "jsonrpc": "2.0",
            "id": init["id"],
            "result": {
                "protocolVersion": "2024-11-05",
                "capabilities": {"tools": {}},
                "serverInfo": {"name": name, "version": "0.1.0"},
            },
        }),
    )
    .await;

    let initialized = recv_json(&mut client).await;
    assert_eq!(initialized["method"], "notifications/initialized");

    let list = recv_json(&mut client).await;
    assert_eq!(list["method"], "tools/list");
    send_json(
        &mut client,
        &json!({
            "jsonrpc": "2.0",
            "id": list["id"],
            "result": {"tools": tools},
        }),
    )
    .await;

    client
}

#[tokio::test]
async fn browser_call_round_trips_through_the_tool_server() {
    let (addr, cancel) = start_test_hub(None).await;

    let mut tool = register_tool_server(
        addr,
        "echo",
        json!([{"name": "echo", "description": "echoes input", "inputSchema": {"type": "object"}}]),
    )
    .await;

    let mut browser = connect(&format!("ws://{addr}/?token={BROWSER_TOKEN}")).await;
    let status = recv_json(&mut browser).await;
    assert_eq!(status["type"], "status");
    assert_eq!(status["mcp_connected"], true);
    assert_eq!(status["mcp_servers"], json!(["echo"]));

    send_json(
        &mut browser,
        &json!({
            "jsonrpc": "2.0",
            "id": 7,
            "method": "tools/call",
            "params": {"name": "echo", "arguments": {"x": 1}},
        }),
    )
    .await;

    let forwarded = recv_json(&mut tool).await;
    assert_eq!(forwarded["method"], "tools/call");
    assert!(forwarded["id"].as_i64().unwrap() >= 2_000_000_000);
    send_json(
        &mut tool,
        &json!({
            "jsonrpc": "2.0",
            "id": forwarded["id"],
            "result": {"echoed": forwarded["params"]["arguments"]},
        }),
    )
    .await;

    let response = recv_json(&mut browser).await;
    assert_eq!(response, json!({"jsonrpc": "2.0", "id": 7, "result": {"echoed": {"x": 1}}}));

    cancel.cancel();
}

#[tokio::test]
async fn tools_list_aggregates_and_browser_sees_disconnects() {
    let (addr, cancel) = start_test_hub(None).await;

    let tool = register_tool_server(
        addr,
        "calc",
        json!([{"name": "add", "description": "adds", "inputSchema": {"type": "object"}}]),
    )
    .await;

    let mut browser = connect(&format!("ws://{addr}/?token={BROWSER_TOKEN}")).await;
    let _status = recv_json(&mut browser).await;

    send_json(&mut browser, &json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"})).await;
    let listed = recv_json(&mut browser).await;
    assert_eq!(listed["result"]["tools"][0]["name"], "add");

    // Dropping the tool socket must reach the browser as a status change.
    drop(tool);
    let status = recv_json(&mut browser).await;
    assert_eq!(status["type"], "status");
    assert_eq!(status["mcp_connected"], false);

    cancel.cancel();
}

#[tokio::test]
async fn missing_browser_token_closes_with_4401() {
    let (addr, cancel) = start_test_hub(None).await;

    let mut client = connect(&format!("ws://{addr}/")).await;
    let close = timeout(Duration::from_secs(5), client.next())
        .await
        .expect("event within 5s")
        .expect("stream open")
        .expect("no transport error");
    match close {
        Message::Close(Some(frame)) => {
            assert_eq!(u16::from(frame.code), 4401);
        }
        other => panic!("expected close frame, got {other:?}"),
    }

    cancel.cancel();
}

#[tokio::test]
async fn disabled_override_is_invisible_to_browsers() {
    let pool = setup_test_database().await.unwrap();
    let overrides = Arc::new(SqliteOverrideRepository::new(pool));
    overrides
        .upsert(&ToolOverride::disabled("echo", "echo"))
        .await
        .unwrap();

    let (addr, cancel) = start_test_hub(Some(overrides)).await;

    let _tool = register_tool_server(
        addr,
        "echo",
        json!([{"name": "echo", "description": "echoes", "inputSchema": {"type": "object"}}]),
    )
    .await;

    let mut browser = connect(&format!("ws://{addr}/?token={BROWSER_TOKEN}")).await;
    let _status = recv_json(&mut browser).await;

    send_json(&mut browser, &json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"})).await;
    let listed = recv_json(&mut browser).await;
    assert_eq!(listed["result"]["tools"], json!([]));

    send_json(
        &mut browser,
        &json!({
            "jsonrpc": "2.0",
            "id": 2,
            "method": "tools/call",
            "params": {"name": "echo", "arguments": {}},
        }),
    )
    .await;
    let response = recv_json(&mut browser).await;
    assert_eq!(response["error"]["code"], -32601);
    assert_eq!(response["error"]["message"], "Method not found");

    cancel.cancel();
}
