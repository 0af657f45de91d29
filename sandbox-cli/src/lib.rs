#![deny(clippy::print_stdout, clippy::print_stderr)]

//! Demo bootstrap: parses CLI args and a TOML config, wires an in-memory
//! resource registry, and drives a [`sandbox_core::Supervisor`] from
//! newline-delimited JSON read off stdin. Stands in for the real
//! messaging transport, the way `mcp-server`'s stdio loop stands in for a
//! real MCP client during manual testing.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use rlimit_launcher::RlimitLauncher;
use sandbox_core::config::ResourceKind;
use sandbox_core::resources::http::HttpResource;
use sandbox_core::resources::js_init::JsInitResource;
use sandbox_core::resources::kv::InMemoryKvStore;
use sandbox_core::resources::kv::KvResource;
use sandbox_core::resources::log::LoggingResource;
use sandbox_core::resources::outbound::OutboundResource;
use sandbox_core::resources::outbound::OutboundSink;
use sandbox_core::AppConfig;
use sandbox_core::CliOverrides;
use sandbox_core::ResourceRegistry;
use sandbox_core::Supervisor;
use serde_json::Value;
use tokio::io::AsyncBufReadExt;
use tokio::io::BufReader;

#[derive(Debug, Parser)]
#[command(name = "sandbox-cli", about = "Runs sandboxed children against a demo stdin transport")]
struct Cli {
    /// Path to the TOML configuration file.
    config: PathBuf,

    /// Overrides `AppConfig::executable`.
    #[arg(long)]
    executable: Option<String>,

    /// Overrides `AppConfig::timeout_secs`.
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Overrides `AppConfig::recv_limit_bytes`.
    #[arg(long)]
    recv_limit_bytes: Option<usize>,

    /// `tracing_subscriber` env-filter directive, e.g. `sandbox_core=debug`.
    #[arg(long)]
    log_filter: Option<String>,
}

/// Parses arguments, loads configuration, wires the registry, and drives
/// the demo stdin loop until EOF.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_filter.as_deref());

    let overrides = CliOverrides {
        executable: cli.executable.clone(),
        timeout_secs: cli.timeout_secs,
        recv_limit_bytes: cli.recv_limit_bytes,
    };
    let config = Arc::new(AppConfig::load(&cli.config, overrides)?);

    let registry = Arc::new(build_registry(&config)?);
    registry.setup().await?;

    let launcher = Arc::new(RlimitLauncher::from_current_exe()?);
    let supervisor = Supervisor::new(registry.clone(), config, launcher);

    let result = drive_stdin(&supervisor).await;

    registry.teardown().await?;
    result
}

fn init_tracing(filter: Option<&str>) {
    let directive = filter.unwrap_or("info");
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(directive));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Instantiates one concrete resource per configured `sandbox` entry.
/// The key/value store and outbound sink are in-process stand-ins; a real
/// deployment points `KvResource`/`OutboundResource` at its own backends
/// instead.
fn build_registry(config: &AppConfig) -> sandbox_core::Result<ResourceRegistry> {
    let mut registry = ResourceRegistry::new();
    for (name, entry) in &config.sandbox {
        match entry.cls {
            ResourceKind::Kv => {
                let keys_per_user = entry
                    .options
                    .get("keys_per_user")
                    .and_then(toml::Value::as_integer)
                    .unwrap_or(100) as u64;
                registry.register(name, Arc::new(KvResource::new(Arc::new(InMemoryKvStore::new()), keys_per_user)));
            }
            ResourceKind::Outbound => {
                registry.register(name, Arc::new(OutboundResource::new(Arc::new(LoggingOutboundSink))));
            }
            ResourceKind::Http => {
                registry.register(name, Arc::new(HttpResource::new()));
            }
            ResourceKind::Log => {
                registry.register(name, Arc::new(LoggingResource::new()));
            }
            ResourceKind::JsInit => {
                if let Some(javascript) = config.javascript_source()? {
                    registry.register(name, Arc::new(JsInitResource::new(javascript, config.app_context.clone())));
                }
            }
        }
    }
    Ok(registry)
}

/// Logs every outbound call instead of submitting it anywhere -- the demo
/// stand-in for the out-of-scope outbound transport.
struct LoggingOutboundSink;

#[async_trait]
impl OutboundSink for LoggingOutboundSink {
    async fn reply_to(&self, _original: &Value, content: &Value, continue_session: bool) -> sandbox_core::Result<()> {
        tracing::info!(?content, continue_session, "outbound reply_to");
        Ok(())
    }

    async fn reply_to_group(&self, _original: &Value, content: &Value, continue_session: bool) -> sandbox_core::Result<()> {
        tracing::info!(?content, continue_session, "outbound reply_to_group");
        Ok(())
    }

    async fn send_to(&self, to_addr: &str, content: &Value, endpoint: &str) -> sandbox_core::Result<()> {
        tracing::info!(to_addr, endpoint, ?content, "outbound send_to");
        Ok(())
    }
}

/// Reads one JSON object per line from stdin, treating each as an
/// inbound user message; `sandbox_id` comes from a top-level field,
/// defaulting to `"default"`.
async fn drive_stdin(supervisor: &Supervisor) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let payload: Value = match serde_json::from_str(&line) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!(error = %e, "invalid inbound message line; skipping");
                continue;
            }
        };
        let sandbox_id = payload
            .get("sandbox_id")
            .and_then(Value::as_str)
            .unwrap_or("default")
            .to_string();
        match supervisor.consume_user_message(sandbox_id, payload).await {
            Ok(outcome) => tracing::info!(killed = ?outcome.killed, exit = ?outcome.exit_status, "sandbox run complete"),
            Err(e) => tracing::error!(error = %e, "sandbox run failed to start"),
        }
    }
    Ok(())
}
