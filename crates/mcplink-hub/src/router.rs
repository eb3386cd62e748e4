//! Hub router: the single serializing task that owns all routing state.
//!
//! Sessions are opaque integer ids into router-owned tables; a session
//! holds nothing but a send channel to its socket. Every mutation arrives
//! as a [`RouterMsg`] on the inbox, giving a total order over dispatch and
//! response events.
//!
//! Responsibilities:
//! - answer `initialize` and `tools/list` directly (the latter from the
//!   aggregated, override-filtered catalog);
//! - forward `tools/call` to the owning tool-server session under a
//!   router-assigned id from a reserved space, and correlate the response
//!   back to the originating browser with its original id restored;
//! - time out pending requests (−32001) and fail them when their target
//!   session closes (−32002);
//! - broadcast status to browsers whenever the tool-server set changes.
//!
//! The router never retries anything; reconnection is the bridge's job.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use mcplink_core::domain::{ToolDescriptor, ToolOverride, project_tools};
use mcplink_core::ports::ToolOverrideRepository;
use mcplink_core::rpc::{
    CODE_BACKEND_CLOSED, CODE_METHOD_NOT_FOUND, CODE_NOT_CONNECTED, CODE_REQUEST_TIMEOUT,
    METHOD_INITIALIZE, METHOD_INITIALIZED, METHOD_TOOLS_CALL, METHOD_TOOLS_LIST, RpcFrame, RpcId,
};

/// Base of the reserved id space used for rewritten browser requests, so
/// ids never collide across browsers.
pub const ROUTER_ID_BASE: i64 = 2_000_000_000;

/// Deadline for a forwarded `tools/call`.
pub const TOOLS_CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Deadline for router-initiated `initialize` / `tools/list` exchanges.
pub const TOOLS_LIST_TIMEOUT: Duration = Duration::from_secs(30);

/// How often the pending table is swept for expired deadlines.
const SWEEP_INTERVAL: Duration = Duration::from_millis(500);

/// Outbound frames buffered per session before broadcasts are dropped.
pub const SESSION_BUFFER: usize = 64;

/// Opaque handle to one connected session (browser or tool server).
pub type SessionId = u64;

/// Everything that can happen to the router.
#[derive(Debug)]
pub enum RouterMsg {
    BrowserConnected {
        id: SessionId,
        tx: mpsc::Sender<String>,
    },
    BrowserClosed {
        id: SessionId,
    },
    BrowserFrame {
        id: SessionId,
        frame: RpcFrame,
    },
    ToolConnected {
        id: SessionId,
        /// Name from the `?server=` query parameter, when the peer sent one.
        query_name: Option<String>,
        tx: mpsc::Sender<String>,
    },
    ToolClosed {
        id: SessionId,
    },
    ToolFrame {
        id: SessionId,
        frame: RpcFrame,
    },
}

/// Cloneable handle for sessions to reach the router.
#[derive(Clone)]
pub struct RouterHandle {
    tx: mpsc::Sender<RouterMsg>,
    next_session_id: Arc<AtomicU64>,
}

impl RouterHandle {
    /// Allocate a fresh session id before registering.
    #[must_use]
    pub fn allocate_session_id(&self) -> SessionId {
        self.next_session_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Deliver a message to the router; silently dropped once the router
    /// has shut down.
    pub async fn send(&self, msg: RouterMsg) {
        if self.tx.send(msg).await.is_err() {
            debug!("router is gone; message dropped");
        }
    }
}

/// Spawn the router task and return its handle.
pub fn spawn_router(
    overrides: Option<Arc<dyn ToolOverrideRepository>>,
    cancel: CancellationToken,
) -> RouterHandle {
    let (tx, rx) = mpsc::channel(256);
    let router = HubRouter::new(overrides);
    tokio::spawn(router.run(rx, cancel));
    RouterHandle {
        tx,
        next_session_id: Arc::new(AtomicU64::new(1)),
    }
}

struct BrowserPeer {
    tx: mpsc::Sender<String>,
}

struct ToolPeer {
    tx: mpsc::Sender<String>,
    query_name: Option<String>,
    /// Final registered name, set once the initialize exchange completes.
    name: Option<String>,
    tools: Vec<ToolDescriptor>,
    /// Registration order; later registrants win tool-name ties.
    seq: u64,
}

enum PendingOrigin {
    Browser {
        browser: SessionId,
        original_id: RpcId,
    },
    HubInit {
        session: SessionId,
    },
    HubToolsList {
        session: SessionId,
    },
}

struct Pending {
    origin: PendingOrigin,
    target: SessionId,
    deadline: Instant,
}

struct HubRouter {
    browsers: HashMap<SessionId, BrowserPeer>,
    tools: HashMap<SessionId, ToolPeer>,
    /// Registered server name → session.
    by_name: HashMap<String, SessionId>,
    /// Advertised tool name → owning session (latest registrant wins).
    dispatch: HashMap<String, SessionId>,
    pending: HashMap<RpcId, Pending>,
    next_rewrite_id: i64,
    next_seq: u64,
    overrides: Option<Arc<dyn ToolOverrideRepository>>,
}

impl HubRouter {
    fn new(overrides: Option<Arc<dyn ToolOverrideRepository>>) -> Self {
        Self {
            browsers: HashMap::new(),
            tools: HashMap::new(),
            by_name: HashMap::new(),
            dispatch: HashMap::new(),
            pending: HashMap::new(),
            next_rewrite_id: ROUTER_ID_BASE,
            next_seq: 0,
            overrides,
        }
    }

    async fn run(mut self, mut inbox: mpsc::Receiver<RouterMsg>, cancel: CancellationToken) {
        let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                message = inbox.recv() => match message {
                    Some(message) => self.handle(message).await,
                    None => break,
                },
                _ = sweep.tick() => self.expire_pending(),
            }
        }
        info!("hub router stopped");
    }

    async fn handle(&mut self, message: RouterMsg) {
        match message {
            RouterMsg::BrowserConnected { id, tx } => {
                info!(browser = id, total = self.browsers.len() + 1, "browser connected");
                let status = self.status_frame();
                let peer = BrowserPeer { tx };
                let _ = peer.tx.try_send(status);
                self.browsers.insert(id, peer);
            }
            RouterMsg::BrowserClosed { id } => {
                self.browsers.remove(&id);
                info!(browser = id, total = self.browsers.len(), "browser disconnected");
                // Responses for this browser's in-flight calls are dropped
                // silently when they arrive.
                self.pending.retain(|_, p| {
                    !matches!(p.origin, PendingOrigin::Browser { browser, .. } if browser == id)
                });
            }
            RouterMsg::BrowserFrame { id, frame } => self.handle_browser_frame(id, frame).await,
            RouterMsg::ToolConnected { id, query_name, tx } => {
                self.next_seq += 1;
                let peer = ToolPeer {
                    tx,
                    query_name: query_name.clone(),
                    name: None,
                    tools: Vec::new(),
                    seq: self.next_seq,
                };
                info!(session = id, name = ?query_name, "tool server connected");

                let init_id = RpcId::Str(format!("hub-init-{id}"));
                let request = RpcFrame::request(
                    init_id.clone(),
                    METHOD_INITIALIZE,
                    Some(json!({
                        "protocolVersion": "2024-11-05",
                        "capabilities": {},
                        "clientInfo": {
                            "name": "mcplink-hub",
                            "version": env!("CARGO_PKG_VERSION"),
                        },
                    })),
                );
                let _ = peer.tx.try_send(request.encode());
                self.tools.insert(id, peer);
                self.pending.insert(
                    init_id,
                    Pending {
                        origin: PendingOrigin::HubInit { session: id },
                        target: id,
                        deadline: Instant::now() + TOOLS_LIST_TIMEOUT,
                    },
                );
            }
            RouterMsg::ToolClosed { id } => self.on_tool_closed(id),
            RouterMsg::ToolFrame { id, frame } => self.handle_tool_frame(id, frame),
        }
    }

    // ── Browser traffic ─────────────────────────────────────────────────

    async fn handle_browser_frame(&mut self, browser: SessionId, frame: RpcFrame) {
        if frame.is_response() {
            debug!(browser, "ignoring response frame from browser");
            return;
        }
        let Some(method) = frame.method().map(str::to_string) else {
            return;
        };
        let Some(request_id) = frame.id().cloned() else {
            // Keep-alives and the initialized acknowledgment end here.
            debug!(browser, method = %method, "notification absorbed");
            return;
        };

        match method.as_str() {
            METHOD_INITIALIZE => {
                // Answered with hub identity; the backing servers were
                // initialized when they registered.
                let response = RpcFrame::response(
                    request_id,
                    json!({
                        "protocolVersion": "2024-11-05",
                        "capabilities": {},
                        "serverInfo": {
                            "name": "mcplink-hub",
                            "version": env!("CARGO_PKG_VERSION"),
                        },
                    }),
                );
                self.send_to_browser(browser, response.encode());
            }
            METHOD_TOOLS_LIST => {
                let tools = self.project_catalog().await;
                let response = RpcFrame::response(request_id, json!({ "tools": tools }));
                self.send_to_browser(browser, response.encode());
            }
            METHOD_TOOLS_CALL => self.dispatch_call(browser, request_id, frame).await,
            other => {
                debug!(browser, method = other, "method not on the hub surface");
                let response =
                    RpcFrame::error_response(request_id, CODE_METHOD_NOT_FOUND, "Method not found");
                self.send_to_browser(browser, response.encode());
            }
        }
    }

    async fn dispatch_call(&mut self, browser: SessionId, original_id: RpcId, frame: RpcFrame) {
        let requested = frame
            .params()
            .and_then(|p| p.get("name"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let Some(requested) = requested else {
            let response = RpcFrame::error_response(
                original_id,
                CODE_METHOD_NOT_FOUND,
                "Method not found",
            );
            self.send_to_browser(browser, response.encode());
            return;
        };

        match self.resolve_tool(&requested).await {
            ToolResolution::Disabled => {
                let response = RpcFrame::error_response(
                    original_id,
                    CODE_METHOD_NOT_FOUND,
                    "Method not found",
                );
                self.send_to_browser(browser, response.encode());
            }
            ToolResolution::Unknown => {
                let response = if self.by_name.is_empty() {
                    RpcFrame::error_response(
                        original_id,
                        CODE_NOT_CONNECTED,
                        "MCP tool not connected",
                    )
                } else {
                    RpcFrame::error_response(
                        original_id,
                        CODE_METHOD_NOT_FOUND,
                        &format!("Tool '{requested}' not found"),
                    )
                };
                self.send_to_browser(browser, response.encode());
            }
            ToolResolution::Found { session, real_name } => {
                self.next_rewrite_id += 1;
                let rewritten_id = RpcId::Num(self.next_rewrite_id);

                let mut forwarded = frame;
                if real_name != requested {
                    // Called by its custom display name: the server only
                    // knows the real one.
                    forwarded = rewrite_call_name(forwarded, &real_name);
                }
                let forwarded = forwarded.with_id(rewritten_id.clone());

                self.pending.insert(
                    rewritten_id.clone(),
                    Pending {
                        origin: PendingOrigin::Browser {
                            browser,
                            original_id: original_id.clone(),
                        },
                        target: session,
                        deadline: Instant::now() + TOOLS_CALL_TIMEOUT,
                    },
                );

                debug!(browser, tool = %real_name, session, id = %rewritten_id, "routing tools/call");
                if !self.send_to_tool(session, forwarded.encode()) {
                    self.pending.remove(&rewritten_id);
                    let response = RpcFrame::error_response(
                        original_id,
                        CODE_BACKEND_CLOSED,
                        "Backend closed",
                    );
                    self.send_to_browser(browser, response.encode());
                }
            }
        }
    }

    /// Resolve a requested tool name to its owning session, honoring
    /// overrides: disabled tools are unreachable, custom names resolve to
    /// the real tool.
    async fn resolve_tool(&self, requested: &str) -> ToolResolution {
        if let Some(&session) = self.dispatch.get(requested) {
            if let Some(server_name) = self.tools.get(&session).and_then(|p| p.name.as_deref()) {
                let overrides = self.load_overrides(server_name).await;
                if overrides
                    .iter()
                    .any(|o| o.tool_name == requested && o.disabled)
                {
                    return ToolResolution::Disabled;
                }
            }
            return ToolResolution::Found {
                session,
                real_name: requested.to_string(),
            };
        }

        // Maybe it was called by a custom display name.
        if let Some(repo) = &self.overrides {
            match repo.list().await {
                Ok(all) => {
                    for ov in all {
                        if ov.custom_name.as_deref() == Some(requested) && !ov.disabled {
                            if let Some(&session) = self.dispatch.get(&ov.tool_name) {
                                let owner =
                                    self.tools.get(&session).and_then(|p| p.name.as_deref());
                                if owner == Some(ov.server_name.as_str()) {
                                    return ToolResolution::Found {
                                        session,
                                        real_name: ov.tool_name,
                                    };
                                }
                            }
                        }
                    }
                }
                Err(e) => warn!(error = %e, "override lookup failed"),
            }
        }

        ToolResolution::Unknown
    }

    // ── Tool-server traffic ─────────────────────────────────────────────

    fn handle_tool_frame(&mut self, session: SessionId, frame: RpcFrame) {
        let RpcFrame::Response { id, .. } = &frame else {
            // Server-pushed requests and notifications are not part of the
            // hub surface.
            debug!(session, method = ?frame.method(), "ignoring non-response from tool server");
            return;
        };

        let Some(pending) = self.pending.remove(id) else {
            warn!(session, id = %id, "dropping response with no pending request");
            return;
        };

        match pending.origin {
            PendingOrigin::Browser {
                browser,
                original_id,
            } => {
                let restored = frame.with_id(original_id);
                self.send_to_browser(browser, restored.encode());
            }
            PendingOrigin::HubInit { session } => self.on_init_response(session, &frame),
            PendingOrigin::HubToolsList { session } => self.on_tools_response(session, &frame),
        }
    }

    fn on_init_response(&mut self, session: SessionId, frame: &RpcFrame) {
        let Some(peer) = self.tools.get_mut(&session) else {
            error!(session, "initialize response for unknown session");
            return;
        };

        // The query name wins; otherwise take serverInfo.name from the
        // initialize result.
        let name = peer
            .query_name
            .clone()
            .or_else(|| {
                frame
                    .result()
                    .and_then(|r| r.get("serverInfo"))
                    .and_then(|i| i.get("name"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or_else(|| format!("server-{session}"));

        peer.name = Some(name.clone());
        let tx = peer.tx.clone();

        if let Some(previous) = self.by_name.insert(name.clone(), session) {
            if previous != session {
                warn!(name = %name, previous, session, "tool server name reused; latest wins");
                self.dispatch.retain(|_, owner| *owner != previous);
            }
        }
        info!(session, name = %name, "tool server registered");

        let _ = tx.try_send(RpcFrame::notification(METHOD_INITIALIZED, None).encode());

        let list_id = RpcId::Str(format!("hub-tools-{session}"));
        let _ = tx.try_send(RpcFrame::request(list_id.clone(), METHOD_TOOLS_LIST, None).encode());
        self.pending.insert(
            list_id,
            Pending {
                origin: PendingOrigin::HubToolsList { session },
                target: session,
                deadline: Instant::now() + TOOLS_LIST_TIMEOUT,
            },
        );

        self.broadcast_status();
    }

    fn on_tools_response(&mut self, session: SessionId, frame: &RpcFrame) {
        let tools: Vec<ToolDescriptor> = frame
            .result()
            .and_then(|r| r.get("tools"))
            .and_then(Value::as_array)
            .map(|entries| entries.iter().filter_map(ToolDescriptor::from_value).collect())
            .unwrap_or_default();

        let Some(peer) = self.tools.get(&session) else {
            return;
        };
        let server_name = peer.name.clone().unwrap_or_default();
        info!(session, server = %server_name, count = tools.len(), "cached tool list");

        for tool in &tools {
            if let Some(&previous) = self.dispatch.get(&tool.name) {
                if previous != session {
                    let shadowed = self
                        .tools
                        .get(&previous)
                        .and_then(|p| p.name.clone())
                        .unwrap_or_else(|| format!("session-{previous}"));
                    warn!(
                        tool = %tool.name,
                        winner = %server_name,
                        shadowed = %shadowed,
                        "duplicate tool name; latest registrant wins"
                    );
                }
            }
            self.dispatch.insert(tool.name.clone(), session);
        }
        if let Some(peer) = self.tools.get_mut(&session) {
            peer.tools = tools;
        }
    }

    fn on_tool_closed(&mut self, session: SessionId) {
        let Some(peer) = self.tools.remove(&session) else {
            return;
        };
        if let Some(name) = &peer.name {
            if self.by_name.get(name) == Some(&session) {
                self.by_name.remove(name);
            }
            info!(session, name = %name, "tool server disconnected");
        } else {
            info!(session, "tool server disconnected before registering");
        }
        self.dispatch.retain(|_, owner| *owner != session);

        // Fail every in-flight request that targeted this session.
        let orphaned: Vec<RpcId> = self
            .pending
            .iter()
            .filter(|(_, p)| p.target == session)
            .map(|(id, _)| id.clone())
            .collect();
        for id in orphaned {
            if let Some(pending) = self.pending.remove(&id) {
                if let PendingOrigin::Browser {
                    browser,
                    original_id,
                } = pending.origin
                {
                    let response = RpcFrame::error_response(
                        original_id,
                        CODE_BACKEND_CLOSED,
                        "Backend closed",
                    );
                    self.send_to_browser(browser, response.encode());
                }
            }
        }

        self.broadcast_status();
    }

    // ── Deadlines, status, projection ───────────────────────────────────

    fn expire_pending(&mut self) {
        let now = Instant::now();
        let expired: Vec<RpcId> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();

        for id in expired {
            let Some(pending) = self.pending.remove(&id) else {
                continue;
            };
            match pending.origin {
                PendingOrigin::Browser {
                    browser,
                    original_id,
                } => {
                    warn!(browser, id = %id, "pending request timed out");
                    let response = RpcFrame::error_response(
                        original_id,
                        CODE_REQUEST_TIMEOUT,
                        "Request timeout",
                    );
                    self.send_to_browser(browser, response.encode());
                }
                PendingOrigin::HubInit { session } => {
                    warn!(session, "tool server never answered initialize");
                }
                PendingOrigin::HubToolsList { session } => {
                    warn!(session, "tool server never answered tools/list");
                }
            }
        }
    }

    fn status_frame(&self) -> String {
        let mut servers: Vec<&String> = self.by_name.keys().collect();
        servers.sort();
        json!({
            "type": "status",
            "mcp_connected": !self.by_name.is_empty(),
            "mcp_servers": servers,
        })
        .to_string()
    }

    /// Fire-and-forget status to every browser; a slow browser misses the
    /// broadcast rather than stalling the router.
    fn broadcast_status(&self) {
        let status = self.status_frame();
        for peer in self.browsers.values() {
            let _ = peer.tx.try_send(status.clone());
        }
    }

    /// The catalog browsers see: union of every registered session's
    /// tools, overrides applied, duplicate names resolved to the latest
    /// registrant.
    async fn project_catalog(&self) -> Vec<ToolDescriptor> {
        let mut peers: Vec<&ToolPeer> = self.tools.values().filter(|p| p.name.is_some()).collect();
        peers.sort_by_key(|p| p.seq);

        let mut merged: Vec<ToolDescriptor> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        for peer in peers {
            let server_name = peer.name.as_deref().unwrap_or_default();
            let overrides = self.load_overrides(server_name).await;
            for tool in project_tools(&peer.tools, &overrides) {
                match index.get(&tool.name) {
                    Some(&slot) => merged[slot] = tool,
                    None => {
                        index.insert(tool.name.clone(), merged.len());
                        merged.push(tool);
                    }
                }
            }
        }
        merged
    }

    async fn load_overrides(&self, server_name: &str) -> Vec<ToolOverride> {
        let Some(repo) = &self.overrides else {
            return Vec::new();
        };
        match repo.for_server(server_name).await {
            Ok(overrides) => overrides,
            Err(e) => {
                warn!(server = server_name, error = %e, "override lookup failed");
                Vec::new()
            }
        }
    }

    fn send_to_browser(&self, browser: SessionId, text: String) {
        let Some(peer) = self.browsers.get(&browser) else {
            // Browser left; its responses are dropped silently.
            debug!(browser, "dropping frame for closed browser session");
            return;
        };
        if peer.tx.try_send(text).is_err() {
            warn!(browser, "browser send buffer full; frame dropped");
        }
    }

    fn send_to_tool(&self, session: SessionId, text: String) -> bool {
        match self.tools.get(&session) {
            Some(peer) => peer.tx.try_send(text).is_ok(),
            None => false,
        }
    }
}

enum ToolResolution {
    Found { session: SessionId, real_name: String },
    Disabled,
    Unknown,
}

/// Rewrite `params.name` for a call made through a custom display name.
fn rewrite_call_name(frame: RpcFrame, real_name: &str) -> RpcFrame {
    match frame {
        RpcFrame::Request {
            id,
            method,
            mut raw,
        } => {
            if let Some(params) = raw.get_mut("params").and_then(Value::as_object_mut) {
                params.insert("name".to_string(), Value::from(real_name));
            }
            RpcFrame::Request { id, method, raw }
        }
        other => other,
    }
}
