//! CLI entry point - the composition root.
//!
//! This is the only place where infrastructure is wired together: the
//! SQLite store, the config service with its event channel, the bridge
//! supervisor, and the hub listener. Admin subcommands (`endpoint`,
//! `override`) stand in for an external CMS; separate processes converge
//! through the supervisor's poll resync.

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;

use mcplink_bridge::{BridgeSupervisor, CatalogSnapshot};
use mcplink_core::domain::{NewEndpoint, ToolOverride};
use mcplink_core::events::config_event_channel;
use mcplink_core::ports::ToolOverrideRepository;
use mcplink_core::services::ConfigService;
use mcplink_core::settings::{BridgeSettings, HubSettings};
use mcplink_db::{SqliteEndpointRepository, SqliteOverrideRepository, setup_database};
use mcplink_hub::{StaticTokenValidator, start_hub};

#[derive(Parser)]
#[command(name = "mcplink", version, about = "Bridge local MCP tool servers to remote hubs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bridge: one session per enabled endpoint and server.
    Bridge,
    /// Run the local hub listener.
    Hub,
    /// Run bridge and hub together in one process.
    Run,
    /// Manage remote hub endpoints.
    Endpoint {
        #[command(subcommand)]
        command: EndpointCommands,
    },
    /// Manage per-tool overrides.
    Override {
        #[command(subcommand)]
        command: OverrideCommands,
    },
    /// Print the discovered tool catalog snapshot.
    Catalog,
}

#[derive(Subcommand)]
enum EndpointCommands {
    /// Add an endpoint.
    Add {
        name: String,
        url: String,
        /// Create it disabled.
        #[arg(long)]
        disabled: bool,
    },
    /// List all endpoints.
    List,
    /// Remove an endpoint.
    Remove { name: String },
    /// Enable an endpoint.
    Enable { name: String },
    /// Disable an endpoint (its sessions stop).
    Disable { name: String },
    /// Change an endpoint's URL (its sessions are rewired).
    SetUrl { name: String, url: String },
}

#[derive(Subcommand)]
enum OverrideCommands {
    /// Set an override for one tool.
    Set {
        server: String,
        tool: String,
        /// Hide the tool from browsers.
        #[arg(long)]
        disable: bool,
        /// Display name shown to browsers.
        #[arg(long)]
        name: Option<String>,
        /// Description shown to browsers.
        #[arg(long)]
        description: Option<String>,
    },
    /// Remove the override for one tool.
    Clear { server: String, tool: String },
    /// List all overrides.
    List,
}

struct AppContext {
    endpoints: Arc<SqliteEndpointRepository>,
    overrides: Arc<SqliteOverrideRepository>,
    service: ConfigService,
    events: mcplink_core::events::ConfigEventSender,
}

async fn bootstrap(settings: &BridgeSettings) -> Result<AppContext> {
    let pool = setup_database(&settings.db_path).await?;
    let endpoints = Arc::new(SqliteEndpointRepository::new(pool.clone()));
    let overrides = Arc::new(SqliteOverrideRepository::new(pool));
    let events = config_event_channel(64);
    let service = ConfigService::new(endpoints.clone(), overrides.clone(), events.clone());
    Ok(AppContext {
        endpoints,
        overrides,
        service,
        events,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let bridge_settings = BridgeSettings::from_env()?;
    let ctx = bootstrap(&bridge_settings).await?;

    match cli.command {
        Commands::Bridge => run_bridge(bridge_settings, ctx).await,
        Commands::Hub => run_hub(ctx).await,
        Commands::Run => run_both(bridge_settings, ctx).await,
        Commands::Endpoint { command } => handle_endpoint(command, &ctx).await,
        Commands::Override { command } => handle_override(command, &ctx).await,
        Commands::Catalog => {
            let snapshot = CatalogSnapshot::read(&bridge_settings.catalog_path)?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            Ok(())
        }
    }
}

async fn run_bridge(settings: BridgeSettings, ctx: AppContext) -> Result<()> {
    let cancel = CancellationToken::new();
    let supervisor = BridgeSupervisor::new(settings, ctx.endpoints.clone());
    let events = ctx.events.subscribe();

    let supervisor_cancel = cancel.clone();
    let supervisor_task = tokio::spawn(supervisor.run(events, supervisor_cancel));

    wait_for_shutdown().await;
    info!("shutting down bridge");
    cancel.cancel();
    let _ = supervisor_task.await;
    Ok(())
}

async fn run_hub(ctx: AppContext) -> Result<()> {
    let hub_settings = HubSettings::from_env()?;
    let cancel = CancellationToken::new();
    let validator = Arc::new(StaticTokenValidator::new(
        hub_settings.browser_token.clone(),
        hub_settings.tool_token.clone(),
    ));
    let overrides = ctx.overrides.clone() as Arc<dyn ToolOverrideRepository>;
    let (_addr, hub_task) = start_hub(hub_settings, Some(overrides), validator, cancel.clone()).await?;

    wait_for_shutdown().await;
    info!("shutting down hub");
    cancel.cancel();
    let _ = hub_task.await;
    Ok(())
}

async fn run_both(settings: BridgeSettings, ctx: AppContext) -> Result<()> {
    let hub_settings = HubSettings::from_env()?;
    let cancel = CancellationToken::new();

    let validator = Arc::new(StaticTokenValidator::new(
        hub_settings.browser_token.clone(),
        hub_settings.tool_token.clone(),
    ));
    let overrides = ctx.overrides.clone() as Arc<dyn ToolOverrideRepository>;
    let (_addr, hub_task) = start_hub(hub_settings, Some(overrides), validator, cancel.clone()).await?;

    let supervisor = BridgeSupervisor::new(settings, ctx.endpoints.clone());
    let supervisor_task = tokio::spawn(supervisor.run(ctx.events.subscribe(), cancel.clone()));

    wait_for_shutdown().await;
    info!("shutting down");
    cancel.cancel();
    let _ = supervisor_task.await;
    let _ = hub_task.await;
    Ok(())
}

async fn wait_for_shutdown() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
}

async fn handle_endpoint(command: EndpointCommands, ctx: &AppContext) -> Result<()> {
    match command {
        EndpointCommands::Add {
            name,
            url,
            disabled,
        } => {
            let mut endpoint = NewEndpoint::new(name, url);
            endpoint.enabled = !disabled;
            let created = ctx.service.create_endpoint(endpoint).await?;
            println!("added endpoint '{}' (id {})", created.name, created.id);
        }
        EndpointCommands::List => {
            let endpoints = ctx.service.list_endpoints().await?;
            if endpoints.is_empty() {
                println!("no endpoints configured");
            }
            for ep in endpoints {
                println!(
                    "{:4}  {:24}  {:12}  {:12}  {}",
                    ep.id,
                    ep.name,
                    if ep.enabled { "enabled" } else { "disabled" },
                    ep.connection_status,
                    ep.url,
                );
                if let Some(err) = ep.last_error {
                    println!("      last error: {err}");
                }
            }
        }
        EndpointCommands::Remove { name } => {
            ctx.service.delete_endpoint(&name).await?;
            println!("removed endpoint '{name}'");
        }
        EndpointCommands::Enable { name } => {
            ctx.service.set_endpoint_enabled(&name, true).await?;
            println!("enabled endpoint '{name}'");
        }
        EndpointCommands::Disable { name } => {
            ctx.service.set_endpoint_enabled(&name, false).await?;
            println!("disabled endpoint '{name}'");
        }
        EndpointCommands::SetUrl { name, url } => {
            ctx.service.set_endpoint_url(&name, &url).await?;
            println!("updated endpoint '{name}'");
        }
    }
    Ok(())
}

async fn handle_override(command: OverrideCommands, ctx: &AppContext) -> Result<()> {
    match command {
        OverrideCommands::Set {
            server,
            tool,
            disable,
            name,
            description,
        } => {
            let mut ov = ToolOverride::disabled(&server, &tool);
            ov.disabled = disable;
            ov.custom_name = name;
            ov.custom_description = description;
            ctx.service.set_override(&ov).await?;
            println!("override set for {server}/{tool}");
        }
        OverrideCommands::Clear { server, tool } => {
            ctx.service.clear_override(&server, &tool).await?;
            println!("override cleared for {server}/{tool}");
        }
        OverrideCommands::List => {
            let overrides = ctx.service.list_overrides().await?;
            if overrides.is_empty() {
                println!("no overrides configured");
            }
            for ov in overrides {
                let mut flags = Vec::new();
                if ov.disabled {
                    flags.push("disabled".to_string());
                }
                if let Some(name) = &ov.custom_name {
                    flags.push(format!("name={name}"));
                }
                if let Some(desc) = &ov.custom_description {
                    flags.push(format!("description={desc}"));
                }
                println!("{}/{}: {}", ov.server_name, ov.tool_name, flags.join(", "));
            }
        }
    }
    Ok(())
}
