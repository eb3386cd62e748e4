//! Endpoint session: one supervised WebSocket dial per endpoint-server
//! pair, splicing frames between the socket and the owned subprocess.
//!
//! State machine:
//!
//! ```text
//! Disconnected --dial--> Connecting --success--> Open
//! Connecting --failure--> Disconnected (schedule backoff)
//! Open --socket close | subprocess exit--> Disconnected (schedule backoff)
//! Open --stop--> Closing --> Disconnected (cancel backoff)
//! ```
//!
//! While `Open`, frames are not interpreted beyond preserving framing
//! boundaries; the only exception is catalog discovery, which injects one
//! reserved-id `tools/list` into the child and captures its response.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use mcplink_core::domain::{ConnectionStatus, ServerDefinition, ToolDescriptor};
use mcplink_core::ports::EndpointRepository;
use mcplink_core::rpc::{METHOD_TOOLS_LIST, RpcFrame, RpcId};
use mcplink_core::util::LogThrottle;

use crate::backoff::Backoff;
use crate::subprocess::SubprocessAdapter;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Interval between idle pings while `Open`.
const IDLE_PING: Duration = Duration::from_secs(30);

/// How long a blocked write side may stall the splice before the session
/// closes with a transport-overrun error.
const OVERRUN_WINDOW: Duration = Duration::from_secs(30);

/// Delay after `Open` before the discovery `tools/list` is injected; gives
/// the remote hub's initialize exchange time to complete first.
const DISCOVERY_DELAY: Duration = Duration::from_secs(2);

/// Configuration for one endpoint-server session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Endpoint row id for status write-back; `None` disables it.
    pub endpoint_id: Option<i64>,
    pub endpoint_name: String,
    pub endpoint_url: String,
    pub server: ServerDefinition,
    /// Appended to the dial URL as `token=` when set.
    pub ws_token: Option<String>,
    pub dial_timeout: Duration,
    pub backoff_max: Duration,
    pub subprocess_grace: Duration,
    /// Reserved request id for catalog discovery.
    pub discovery_id: i64,
}

/// Tools captured from one server, reported to the supervisor.
#[derive(Debug, Clone)]
pub struct DiscoveredTools {
    pub server_name: String,
    pub tools: Vec<ToolDescriptor>,
}

/// Handle to a running session task.
pub struct SessionHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl SessionHandle {
    /// Cooperative stop: cancel and wait for the task to release its
    /// socket and child.
    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.join.await;
    }

    /// True when the task has exited (it only does so after `stop`, or on
    /// panic).
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

/// Spawn the session task for one endpoint-server pair.
pub fn spawn_session(
    config: SessionConfig,
    endpoints: Option<Arc<dyn EndpointRepository>>,
    discovery_tx: mpsc::Sender<DiscoveredTools>,
) -> SessionHandle {
    let cancel = CancellationToken::new();
    let task_cancel = cancel.clone();
    let join = tokio::spawn(async move {
        run_session(config, endpoints, discovery_tx, task_cancel).await;
    });
    SessionHandle { cancel, join }
}

/// Why the splice loop ended.
#[derive(Debug)]
enum SpliceEnd {
    Cancelled,
    SocketClosed,
    SocketError(String),
    SubprocessExited,
    Overrun(&'static str),
}

async fn run_session(
    config: SessionConfig,
    endpoints: Option<Arc<dyn EndpointRepository>>,
    discovery_tx: mpsc::Sender<DiscoveredTools>,
    cancel: CancellationToken,
) {
    let label = format!("{}:{}", config.endpoint_name, config.server.name);
    let dial_url = decorate_url(&config);
    let mut backoff = Backoff::new(config.backoff_max);
    let mut attempt: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            break;
        }

        report_status(&endpoints, &config, ConnectionStatus::Connecting, None).await;
        info!(session = %label, url = %config.endpoint_url, "connecting to remote hub");

        match timeout(
            config.dial_timeout,
            tokio_tungstenite::connect_async(dial_url.as_str()),
        )
        .await
        {
            Err(_) => {
                attempt += 1;
                let reason = format!("dial timed out after {:?}", config.dial_timeout);
                warn!(session = %label, attempt, "{reason}");
                report_status(&endpoints, &config, ConnectionStatus::Error, Some(&reason)).await;
            }
            Ok(Err(e)) => {
                attempt += 1;
                let reason = e.to_string();
                warn!(session = %label, attempt, error = %reason, "connection failed");
                report_status(&endpoints, &config, ConnectionStatus::Error, Some(&reason)).await;
            }
            Ok(Ok((ws, _response))) => {
                info!(session = %label, "connected to remote hub");

                match SubprocessAdapter::spawn(&config.server) {
                    Err(e) => {
                        attempt += 1;
                        let reason = e.to_string();
                        error!(session = %label, error = %reason, "failed to start server process");
                        report_status(&endpoints, &config, ConnectionStatus::Error, Some(&reason))
                            .await;
                    }
                    Ok(adapter) => {
                        report_status(&endpoints, &config, ConnectionStatus::Connected, None).await;
                        let opened_at = Instant::now();

                        let end =
                            splice(ws, adapter, &config, &discovery_tx, &cancel, &label).await;

                        if opened_at.elapsed() >= Backoff::RESET_AFTER {
                            backoff.reset();
                            attempt = 0;
                        }

                        match end {
                            SpliceEnd::Cancelled => {
                                report_status(
                                    &endpoints,
                                    &config,
                                    ConnectionStatus::Disconnected,
                                    None,
                                )
                                .await;
                                break;
                            }
                            SpliceEnd::SocketClosed => {
                                attempt += 1;
                                warn!(session = %label, "remote hub closed the connection");
                                report_status(
                                    &endpoints,
                                    &config,
                                    ConnectionStatus::Disconnected,
                                    None,
                                )
                                .await;
                            }
                            SpliceEnd::SocketError(reason) => {
                                attempt += 1;
                                warn!(session = %label, error = %reason, "websocket error");
                                report_status(
                                    &endpoints,
                                    &config,
                                    ConnectionStatus::Error,
                                    Some(&reason),
                                )
                                .await;
                            }
                            SpliceEnd::SubprocessExited => {
                                attempt += 1;
                                warn!(session = %label, "server process exited while open");
                                report_status(
                                    &endpoints,
                                    &config,
                                    ConnectionStatus::Error,
                                    Some("server process exited"),
                                )
                                .await;
                            }
                            SpliceEnd::Overrun(direction) => {
                                attempt += 1;
                                let reason = format!("transport overrun on {direction}");
                                warn!(session = %label, "{reason}");
                                report_status(
                                    &endpoints,
                                    &config,
                                    ConnectionStatus::Error,
                                    Some(&reason),
                                )
                                .await;
                            }
                        }
                    }
                }
            }
        }

        // Backoff before the next attempt; stop() cancels the sleep.
        let delay = backoff.next_delay();
        info!(session = %label, attempt, delay = ?delay, "waiting before reconnect");
        report_status(&endpoints, &config, ConnectionStatus::Disconnected, None).await;
        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }
    }

    report_status(&endpoints, &config, ConnectionStatus::Disconnected, None).await;
    debug!(session = %label, "session task finished");
}

/// Pipe frames in both directions until something ends the connection.
/// The subprocess is stopped (best-effort) before returning.
async fn splice(
    ws: WsStream,
    mut adapter: SubprocessAdapter,
    config: &SessionConfig,
    discovery_tx: &mpsc::Sender<DiscoveredTools>,
    cancel: &CancellationToken,
    label: &str,
) -> SpliceEnd {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let writer = adapter.writer();
    let mut exit = adapter.exit_watch();
    let mut throttle = LogThrottle::per_minute();

    let mut ping = tokio::time::interval_at(Instant::now() + IDLE_PING, IDLE_PING);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let discovery_timer = tokio::time::sleep(DISCOVERY_DELAY);
    tokio::pin!(discovery_timer);
    let mut discovery_sent = false;

    let end = loop {
        tokio::select! {
            () = cancel.cancelled() => break SpliceEnd::Cancelled,

            () = &mut discovery_timer, if !discovery_sent => {
                discovery_sent = true;
                inject_discovery(&writer, config, label).await;
            }

            message = ws_rx.next() => match message {
                None => break SpliceEnd::SocketClosed,
                Some(Err(e)) => break SpliceEnd::SocketError(e.to_string()),
                Some(Ok(Message::Close(_))) => break SpliceEnd::SocketClosed,
                Some(Ok(Message::Text(text))) => {
                    if text.is_empty() {
                        if throttle.allow() {
                            warn!(session = %label, "dropping empty websocket frame");
                        }
                        continue;
                    }
                    if serde_json::from_str::<Value>(&text).is_err() {
                        if throttle.allow() {
                            warn!(session = %label, "dropping non-JSON websocket frame");
                        }
                        continue;
                    }
                    // A raw newline between tokens is legal JSON but would
                    // split the frame on the child's stdin.
                    if text.contains('\n') {
                        if throttle.allow() {
                            warn!(session = %label, "dropping frame with embedded newline");
                        }
                        continue;
                    }
                    debug!(session = %label, "hub -> server: {}", preview(&text));
                    match timeout(OVERRUN_WINDOW, writer.send(text.to_string())).await {
                        Err(_) => break SpliceEnd::Overrun("stdin"),
                        Ok(Err(_)) => break SpliceEnd::SubprocessExited,
                        Ok(Ok(())) => {}
                    }
                }
                // Binary frames are not part of the protocol; pings and
                // pongs are handled by the websocket layer.
                Some(Ok(Message::Binary(_))) => {
                    if throttle.allow() {
                        warn!(session = %label, "dropping binary websocket frame");
                    }
                }
                Some(Ok(_)) => {}
            },

            frame = adapter.next_frame() => match frame {
                None => break SpliceEnd::SubprocessExited,
                Some(out) => {
                    if !discovery_sent {
                        // First child output means the hub-side initialize
                        // exchange is underway; discover now.
                        discovery_sent = true;
                        inject_discovery(&writer, config, label).await;
                    }
                    if capture_discovery(&out.value, config, discovery_tx, label) {
                        continue;
                    }
                    snoop_tools_response(&out.value, config, discovery_tx);
                    debug!(session = %label, "server -> hub: {}", preview(&out.text));
                    match timeout(OVERRUN_WINDOW, ws_tx.send(Message::Text(out.text.into()))).await {
                        Err(_) => break SpliceEnd::Overrun("socket"),
                        Ok(Err(e)) => break SpliceEnd::SocketError(e.to_string()),
                        Ok(Ok(())) => {}
                    }
                }
            },

            result = exit.changed() => {
                if result.is_err() || exit.borrow().is_some() {
                    break SpliceEnd::SubprocessExited;
                }
            }

            _ = ping.tick() => {
                if let Err(e) = ws_tx.send(Message::Ping(Vec::new().into())).await {
                    break SpliceEnd::SocketError(e.to_string());
                }
            }
        }
    };

    adapter.shutdown(config.subprocess_grace).await;
    end
}

/// Inject the reserved-id `tools/list` toward the child.
async fn inject_discovery(writer: &mpsc::Sender<String>, config: &SessionConfig, label: &str) {
    let request = RpcFrame::request(RpcId::Num(config.discovery_id), METHOD_TOOLS_LIST, None);
    if writer.try_send(request.encode()).is_err() {
        debug!(session = %label, "discovery request not sent (stdin busy)");
    }
}

/// Capture the response to the injected discovery request. Returns true
/// when the frame was consumed and must not be forwarded.
fn capture_discovery(
    value: &Value,
    config: &SessionConfig,
    discovery_tx: &mpsc::Sender<DiscoveredTools>,
    label: &str,
) -> bool {
    if value.get("id").and_then(Value::as_i64) != Some(config.discovery_id) {
        return false;
    }
    match parse_tools(value) {
        Some(tools) => {
            info!(session = %label, count = tools.len(), "discovered tools");
            let _ = discovery_tx.try_send(DiscoveredTools {
                server_name: config.server.name.clone(),
                tools,
            });
        }
        None => {
            debug!(session = %label, "discovery response carried no tools");
            let _ = discovery_tx.try_send(DiscoveredTools {
                server_name: config.server.name.clone(),
                tools: Vec::new(),
            });
        }
    }
    true
}

/// Refresh the catalog from `tools/list` responses passing through toward
/// the hub. The frame itself is forwarded untouched.
fn snoop_tools_response(
    value: &Value,
    config: &SessionConfig,
    discovery_tx: &mpsc::Sender<DiscoveredTools>,
) {
    if let Some(tools) = parse_tools(value) {
        let _ = discovery_tx.try_send(DiscoveredTools {
            server_name: config.server.name.clone(),
            tools,
        });
    }
}

fn parse_tools(value: &Value) -> Option<Vec<ToolDescriptor>> {
    let entries = value.get("result")?.get("tools")?.as_array()?;
    Some(entries.iter().filter_map(ToolDescriptor::from_value).collect())
}

/// Build the dial URL: auto-fix a missing `/mcp` path and append the
/// `server=` (and `token=`) identification parameters the remote hub
/// expects. Configured query parameters are preserved as-is.
fn decorate_url(config: &SessionConfig) -> String {
    let Ok(mut url) = url::Url::parse(&config.endpoint_url) else {
        // CRUD validation should have caught this; dial with it raw and
        // let the connect error surface.
        return config.endpoint_url.clone();
    };

    if url.path().is_empty() || url.path() == "/" {
        warn!(
            endpoint = %config.endpoint_name,
            "endpoint URL has no path; appending /mcp"
        );
        url.set_path("/mcp");
    }

    url.query_pairs_mut()
        .append_pair("server", &config.server.name);
    if let Some(token) = &config.ws_token {
        url.query_pairs_mut().append_pair("token", token);
    }
    url.to_string()
}

async fn report_status(
    endpoints: &Option<Arc<dyn EndpointRepository>>,
    config: &SessionConfig,
    status: ConnectionStatus,
    error: Option<&str>,
) {
    let (Some(repo), Some(id)) = (endpoints, config.endpoint_id) else {
        return;
    };
    if let Err(e) = repo.update_status(id, status, error).await {
        debug!(endpoint = %config.endpoint_name, error = %e, "status write failed");
    }
}

fn preview(text: &str) -> &str {
    let mut end = text.len().min(120);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
