//! Bridge supervisor: owns the desired endpoint × server session set.
//!
//! A single serializing task reads the config store, computes the desired
//! set (enabled endpoints × enabled server definitions), and launches one
//! session per pair. Change events are diff-applied as they arrive; a poll
//! timer re-reads the store and the servers file as a catch-all resync, so
//! a lost event stream degrades to eventual consistency instead of
//! divergence. Discovery reports from sessions are merged into the catalog
//! snapshot and written atomically.
//!
//! The supervisor is stateless across restarts; it rebuilds everything
//! from the store.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use mcplink_core::domain::{Endpoint, ServerDefinition};
use mcplink_core::events::{ConfigEvent, ConfigEventKind, ConfigEventReceiver, EndpointSummary};
use mcplink_core::ports::EndpointRepository;
use mcplink_core::settings::BridgeSettings;

use crate::catalog::CatalogSnapshot;
use crate::servers_file::{ServersFile, file_mtime, load_servers_file};
use crate::session::{DiscoveredTools, SessionConfig, SessionHandle, spawn_session};

/// Base of the reserved id range used for discovery requests.
const DISCOVERY_ID_BASE: i64 = 1_000_000_000;

/// Buffered discovery reports before sessions drop them.
const DISCOVERY_BUFFER: usize = 32;

type SessionKey = (String, String);

/// What one session should look like, derived from the config store.
#[derive(Debug, Clone, PartialEq)]
struct SessionSpec {
    endpoint_id: i64,
    url: String,
    server: ServerDefinition,
}

impl SessionSpec {
    /// Change detection for resync: a session whose spec fingerprint
    /// differs is torn down and respawned.
    fn fingerprint(&self) -> String {
        format!(
            "{}|{}",
            self.url,
            serde_json::to_string(&self.server).unwrap_or_default()
        )
    }
}

struct SessionEntry {
    handle: SessionHandle,
    fingerprint: String,
    generation: u64,
}

/// The bridge supervisor task state.
pub struct BridgeSupervisor {
    settings: BridgeSettings,
    endpoints: Arc<dyn EndpointRepository>,
    sessions: HashMap<SessionKey, SessionEntry>,
    servers: ServersFile,
    catalog: CatalogSnapshot,
    discovery_tx: mpsc::Sender<DiscoveredTools>,
    discovery_rx: Option<mpsc::Receiver<DiscoveredTools>>,
    next_discovery_id: i64,
    next_generation: u64,
}

impl BridgeSupervisor {
    pub fn new(settings: BridgeSettings, endpoints: Arc<dyn EndpointRepository>) -> Self {
        let (discovery_tx, discovery_rx) = mpsc::channel(DISCOVERY_BUFFER);
        Self {
            settings,
            endpoints,
            sessions: HashMap::new(),
            servers: ServersFile::default(),
            catalog: CatalogSnapshot::new(),
            discovery_tx,
            discovery_rx: Some(discovery_rx),
            next_discovery_id: 0,
            next_generation: 0,
        }
    }

    /// Run until cancelled. Consumes the supervisor; all sessions are
    /// stopped before returning.
    pub async fn run(mut self, mut events: ConfigEventReceiver, cancel: CancellationToken) {
        self.reload_servers(true);
        self.resync().await;

        let mut discovery_rx = self.discovery_rx.take().expect("run called once");
        let mut poll = tokio::time::interval(self.settings.poll_interval);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        poll.tick().await; // arm the timer; the initial resync already ran
        let mut events_open = true;

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,

                event = events.recv(), if events_open => match event {
                    Ok(event) => self.apply_event(event).await,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "config event stream lagged; resyncing");
                        self.resync().await;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        warn!("config event stream closed; falling back to polling");
                        events_open = false;
                    }
                },

                _ = poll.tick() => {
                    self.reload_servers(false);
                    self.resync().await;
                }

                Some(discovered) = discovery_rx.recv() => {
                    self.record_discovery(discovered);
                }
            }
        }

        self.shutdown_all().await;
    }

    /// Apply one change event. Events for the same endpoint arrive in
    /// publish order on the broadcast channel; processing here is fully
    /// serialized.
    async fn apply_event(&mut self, event: ConfigEvent) {
        debug!(?event, "applying config event");
        match (event.kind, event.endpoint) {
            (ConfigEventKind::Connect, Some(endpoint)) => {
                self.start_endpoint_sessions(&endpoint);
            }
            (ConfigEventKind::Disconnect, Some(endpoint)) => {
                self.stop_endpoint_sessions(&endpoint.name).await;
            }
            (ConfigEventKind::Update, Some(endpoint)) => {
                // Teardown first: the old child must not outlive the URL
                // change.
                self.stop_endpoint_sessions(&endpoint.name).await;
                self.start_endpoint_sessions(&endpoint);
            }
            (ConfigEventKind::Reload, _) => {
                self.reload_servers(false);
                self.resync().await;
            }
            (kind, None) => {
                warn!(?kind, "config event without endpoint payload; resyncing");
                self.resync().await;
            }
        }
    }

    /// Recompute the desired set from the store and diff-apply it.
    /// Idempotent: running it twice without config changes is a no-op on
    /// the live session set.
    async fn resync(&mut self) {
        let endpoints = match self.endpoints.list_enabled().await {
            Ok(endpoints) => endpoints,
            Err(e) => {
                warn!(error = %e, "config store read failed; keeping current sessions");
                return;
            }
        };

        let desired = desired_sessions(&endpoints, &self.servers);

        let stale: Vec<SessionKey> = self
            .sessions
            .iter()
            .filter(|&(key, entry)| {
                entry.handle.is_finished()
                    || desired
                        .get(key)
                        .is_none_or(|spec| spec.fingerprint() != entry.fingerprint)
            })
            .map(|(key, _)| key.clone())
            .collect();

        for key in stale {
            if let Some(entry) = self.sessions.remove(&key) {
                info!(endpoint = %key.0, server = %key.1, "stopping session");
                entry.handle.stop().await;
            }
        }

        for (key, spec) in desired {
            if !self.sessions.contains_key(&key) {
                self.start_session(key, spec);
            }
        }
    }

    fn start_endpoint_sessions(&mut self, endpoint: &EndpointSummary) {
        for server in self.servers.enabled().into_iter().cloned().collect::<Vec<_>>() {
            let key = (endpoint.name.clone(), server.name.clone());
            if self.sessions.contains_key(&key) {
                continue;
            }
            let spec = SessionSpec {
                endpoint_id: endpoint.id,
                url: endpoint.url.clone(),
                server,
            };
            self.start_session(key, spec);
        }
    }

    async fn stop_endpoint_sessions(&mut self, endpoint_name: &str) {
        let keys: Vec<SessionKey> = self
            .sessions
            .keys()
            .filter(|(name, _)| name == endpoint_name)
            .cloned()
            .collect();
        for key in keys {
            if let Some(entry) = self.sessions.remove(&key) {
                info!(endpoint = %key.0, server = %key.1, "stopping session");
                entry.handle.stop().await;
            }
        }
    }

    fn start_session(&mut self, key: SessionKey, spec: SessionSpec) {
        info!(endpoint = %key.0, server = %key.1, url = %spec.url, "starting session");
        self.next_discovery_id += 1;
        self.next_generation += 1;

        let fingerprint = spec.fingerprint();
        let config = SessionConfig {
            endpoint_id: Some(spec.endpoint_id),
            endpoint_name: key.0.clone(),
            endpoint_url: spec.url,
            server: spec.server,
            ws_token: self.settings.ws_token.clone(),
            dial_timeout: self.settings.dial_timeout,
            backoff_max: self.settings.backoff_max,
            subprocess_grace: self.settings.subprocess_grace,
            discovery_id: DISCOVERY_ID_BASE + self.next_discovery_id,
        };
        let handle = spawn_session(
            config,
            Some(self.endpoints.clone()),
            self.discovery_tx.clone(),
        );
        self.sessions.insert(
            key,
            SessionEntry {
                handle,
                fingerprint,
                generation: self.next_generation,
            },
        );
    }

    /// Re-read the servers file when its mtime changed (or on `force`).
    /// Servers that disappeared or became disabled are dropped from the
    /// catalog snapshot.
    fn reload_servers(&mut self, force: bool) {
        let current_mtime = file_mtime(&self.settings.servers_file);
        if !force && current_mtime == self.servers.mtime {
            return;
        }

        match load_servers_file(&self.settings.servers_file) {
            Ok(loaded) => {
                let before: Vec<String> = self
                    .servers
                    .enabled()
                    .iter()
                    .map(|s| s.name.clone())
                    .collect();
                let after: Vec<&str> =
                    loaded.enabled().iter().map(|s| s.name.as_str()).collect();

                let mut snapshot_changed = false;
                for gone in before.iter().filter(|name| !after.contains(&name.as_str())) {
                    if self.catalog.remove_server(gone) {
                        info!(server = %gone, "removed tools from catalog snapshot");
                        snapshot_changed = true;
                    }
                }
                if snapshot_changed {
                    self.write_snapshot();
                }

                if !loaded.disabled_names().is_empty() {
                    info!(disabled = ?loaded.disabled_names(), "skipping disabled servers");
                }
                self.servers = loaded;
            }
            Err(e) => {
                warn!(error = %e, "servers file reload failed; keeping previous definitions");
                // Remember the mtime so a broken file is not re-parsed
                // every tick.
                self.servers.mtime = current_mtime;
            }
        }
    }

    fn record_discovery(&mut self, discovered: DiscoveredTools) {
        let previous = self
            .catalog
            .servers
            .insert(discovered.server_name.clone(), discovered.tools);
        if previous.as_deref() != self.catalog.servers.get(&discovered.server_name).map(Vec::as_slice)
        {
            debug!(server = %discovered.server_name, "catalog snapshot updated");
            self.write_snapshot();
        }
    }

    fn write_snapshot(&self) {
        if let Err(e) = self.catalog.write_atomic(&self.settings.catalog_path) {
            warn!(error = %e, path = ?self.settings.catalog_path, "snapshot write failed");
        }
    }

    /// Bottom-up shutdown: sessions first (each stops its own adapter),
    /// then the discovery channel dies with us.
    async fn shutdown_all(&mut self) {
        info!(count = self.sessions.len(), "stopping all sessions");
        for (key, entry) in self.sessions.drain() {
            debug!(endpoint = %key.0, server = %key.1, "stopping session");
            entry.handle.stop().await;
        }
    }

    #[cfg(test)]
    fn session_state(&self) -> BTreeMap<SessionKey, u64> {
        self.sessions
            .iter()
            .map(|(key, entry)| (key.clone(), entry.generation))
            .collect()
    }
}

/// Desired set: one session per enabled endpoint × enabled server.
fn desired_sessions(
    endpoints: &[Endpoint],
    servers: &ServersFile,
) -> BTreeMap<SessionKey, SessionSpec> {
    let mut desired = BTreeMap::new();
    for endpoint in endpoints {
        for server in servers.enabled() {
            desired.insert(
                (endpoint.name.clone(), server.name.clone()),
                SessionSpec {
                    endpoint_id: endpoint.id,
                    url: endpoint.url.clone(),
                    server: server.clone(),
                },
            );
        }
    }
    desired
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::BTreeMap as Map;
    use std::io::Write;
    use std::sync::Mutex;
    use std::time::Duration;

    use mcplink_core::domain::{
        ConnectionStatus, NewEndpoint, ServerKind, UpdateEndpoint,
    };
    use mcplink_core::ports::RepositoryError;

    struct FakeEndpointRepository {
        endpoints: Mutex<Vec<Endpoint>>,
    }

    impl FakeEndpointRepository {
        fn with(endpoints: Vec<Endpoint>) -> Arc<Self> {
            Arc::new(Self {
                endpoints: Mutex::new(endpoints),
            })
        }

        fn set_enabled_sync(&self, name: &str, enabled: bool) {
            let mut endpoints = self.endpoints.lock().unwrap();
            if let Some(ep) = endpoints.iter_mut().find(|e| e.name == name) {
                ep.enabled = enabled;
            }
        }
    }

    #[async_trait]
    impl EndpointRepository for FakeEndpointRepository {
        async fn insert(&self, _endpoint: NewEndpoint) -> Result<Endpoint, RepositoryError> {
            unimplemented!("not used by the supervisor")
        }

        async fn get_by_id(&self, id: i64) -> Result<Endpoint, RepositoryError> {
            self.endpoints
                .lock()
                .unwrap()
                .iter()
                .find(|e| e.id == id)
                .cloned()
                .ok_or_else(|| RepositoryError::NotFound(id.to_string()))
        }

        async fn get_by_name(&self, name: &str) -> Result<Endpoint, RepositoryError> {
            self.endpoints
                .lock()
                .unwrap()
                .iter()
                .find(|e| e.name == name)
                .cloned()
                .ok_or_else(|| RepositoryError::NotFound(name.to_string()))
        }

        async fn list(&self) -> Result<Vec<Endpoint>, RepositoryError> {
            Ok(self.endpoints.lock().unwrap().clone())
        }

        async fn list_enabled(&self) -> Result<Vec<Endpoint>, RepositoryError> {
            Ok(self
                .endpoints
                .lock()
                .unwrap()
                .iter()
                .filter(|e| e.enabled)
                .cloned()
                .collect())
        }

        async fn update(
            &self,
            _id: i64,
            _update: UpdateEndpoint,
        ) -> Result<Endpoint, RepositoryError> {
            unimplemented!("not used by the supervisor")
        }

        async fn set_enabled(&self, _id: i64, _enabled: bool) -> Result<Endpoint, RepositoryError> {
            unimplemented!("not used by the supervisor")
        }

        async fn update_status(
            &self,
            _id: i64,
            _status: ConnectionStatus,
            _error: Option<&str>,
        ) -> Result<(), RepositoryError> {
            Ok(())
        }

        async fn delete(&self, _id: i64) -> Result<(), RepositoryError> {
            Ok(())
        }
    }

    fn endpoint(id: i64, name: &str, enabled: bool) -> Endpoint {
        Endpoint {
            id,
            name: name.to_string(),
            url: format!("ws://127.0.0.1:1/{name}"),
            enabled,
            connection_status: ConnectionStatus::Disconnected,
            last_connected_at: None,
            last_error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn server(name: &str, disabled: bool) -> ServerDefinition {
        ServerDefinition {
            name: name.to_string(),
            kind: ServerKind::Stdio,
            command: Some("/bin/cat".to_string()),
            args: Vec::new(),
            env: Map::new(),
            url: None,
            headers: Map::new(),
            disabled,
        }
    }

    fn settings(dir: &tempfile::TempDir) -> BridgeSettings {
        BridgeSettings {
            db_path: dir.path().join("db.sqlite"),
            servers_file: dir.path().join("mcp_config.json"),
            catalog_path: dir.path().join("tools_cache.json"),
            backoff_max: Duration::from_secs(60),
            subprocess_grace: Duration::from_secs(1),
            ws_token: None,
            poll_interval: Duration::from_secs(5),
            dial_timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn desired_set_is_the_enabled_cross_product() {
        let endpoints = vec![endpoint(1, "prod", true), endpoint(2, "lab", true)];
        let servers = ServersFile {
            servers: vec![server("calc", false), server("news", true)],
            mtime: None,
        };
        let desired = desired_sessions(&endpoints, &servers);
        let keys: Vec<SessionKey> = desired.keys().cloned().collect();
        assert_eq!(
            keys,
            vec![
                ("lab".to_string(), "calc".to_string()),
                ("prod".to_string(), "calc".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn resync_starts_and_stops_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FakeEndpointRepository::with(vec![endpoint(1, "prod", true)]);
        let mut supervisor = BridgeSupervisor::new(settings(&dir), repo.clone());
        supervisor.servers = ServersFile {
            servers: vec![server("calc", false)],
            mtime: None,
        };

        supervisor.resync().await;
        assert_eq!(supervisor.session_state().len(), 1);

        repo.set_enabled_sync("prod", false);
        supervisor.resync().await;
        assert!(supervisor.session_state().is_empty());

        supervisor.shutdown_all().await;
    }

    #[tokio::test]
    async fn resync_twice_is_a_no_op_on_the_session_set() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FakeEndpointRepository::with(vec![endpoint(1, "prod", true)]);
        let mut supervisor = BridgeSupervisor::new(settings(&dir), repo);
        supervisor.servers = ServersFile {
            servers: vec![server("calc", false), server("news", false)],
            mtime: None,
        };

        supervisor.resync().await;
        let first = supervisor.session_state();
        assert_eq!(first.len(), 2);

        supervisor.resync().await;
        // Same keys, same generations: nothing was restarted.
        assert_eq!(supervisor.session_state(), first);

        supervisor.shutdown_all().await;
    }

    #[tokio::test]
    async fn update_event_replaces_the_session() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FakeEndpointRepository::with(vec![endpoint(1, "prod", true)]);
        let mut supervisor = BridgeSupervisor::new(settings(&dir), repo);
        supervisor.servers = ServersFile {
            servers: vec![server("calc", false)],
            mtime: None,
        };

        supervisor.resync().await;
        let before = supervisor.session_state();

        supervisor
            .apply_event(ConfigEvent::update(EndpointSummary {
                id: 1,
                name: "prod".to_string(),
                url: "ws://127.0.0.1:1/new".to_string(),
            }))
            .await;

        let after = supervisor.session_state();
        assert_eq!(after.len(), 1);
        assert_ne!(
            before.values().next(),
            after.values().next(),
            "session was not respawned"
        );

        supervisor.shutdown_all().await;
    }

    #[tokio::test]
    async fn disconnect_event_stops_only_that_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FakeEndpointRepository::with(vec![
            endpoint(1, "prod", true),
            endpoint(2, "lab", true),
        ]);
        let mut supervisor = BridgeSupervisor::new(settings(&dir), repo);
        supervisor.servers = ServersFile {
            servers: vec![server("calc", false)],
            mtime: None,
        };

        supervisor.resync().await;
        assert_eq!(supervisor.session_state().len(), 2);

        supervisor
            .apply_event(ConfigEvent::disconnect(EndpointSummary {
                id: 1,
                name: "prod".to_string(),
                url: "ws://127.0.0.1:1/prod".to_string(),
            }))
            .await;

        let keys: Vec<SessionKey> = supervisor.session_state().into_keys().collect();
        assert_eq!(keys, vec![("lab".to_string(), "calc".to_string())]);

        supervisor.shutdown_all().await;
    }

    #[tokio::test]
    async fn servers_file_reload_prunes_the_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = settings(&dir);
        let repo = FakeEndpointRepository::with(vec![]);
        let mut supervisor = BridgeSupervisor::new(cfg.clone(), repo);
        supervisor.servers = ServersFile {
            servers: vec![server("calc", false)],
            mtime: None,
        };
        supervisor.catalog.insert_server("calc", Vec::new());

        // New servers file without calc.
        let mut file = std::fs::File::create(&cfg.servers_file).unwrap();
        write!(file, r#"{{ "mcpServers": {{ "news": {{ "command": "/bin/cat" }} }} }}"#).unwrap();
        drop(file);

        supervisor.reload_servers(true);
        assert!(!supervisor.catalog.servers.contains_key("calc"));
        assert!(cfg.catalog_path.exists(), "snapshot was not rewritten");
    }
}
