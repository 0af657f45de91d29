//! The entry point external callers use: given an inbound message or a
//! delivery event, spin up one sandbox run end to end and report how it
//! finished. Grounded on the source's `Sandbox.dispatch_to_sandbox`
//! sequence (spawn, wait for start, init, deliver, wait for completion).

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::Instrument;

use crate::api::SandboxApi;
use crate::command::Command;
use crate::config::AppConfig;
use crate::error::Result;
use crate::protocol::KillReason;
use crate::protocol::RunOutcome;
use crate::protocol::SandboxProtocol;
use crate::registry::ResourceRegistry;

enum Delivery {
    Message,
    Event,
}

/// Runs one child process per inbound message or event, sharing the
/// resource registry and configuration across every run.
pub struct Supervisor {
    registry: Arc<ResourceRegistry>,
    config: Arc<AppConfig>,
    launcher: Arc<rlimit_launcher::RlimitLauncher>,
}

impl Supervisor {
    pub fn new(registry: Arc<ResourceRegistry>, config: Arc<AppConfig>, launcher: Arc<rlimit_launcher::RlimitLauncher>) -> Self {
        Self {
            registry,
            config,
            launcher,
        }
    }

    /// Runs a fresh sandbox against an inbound user message.
    pub async fn consume_user_message(&self, sandbox_id: impl Into<String>, message: Value) -> Result<RunOutcome> {
        self.run(sandbox_id.into(), Delivery::Message, message).await
    }

    /// Closing a session is delivered on the same path as any other user
    /// message; the child decides from the payload whether the session
    /// has ended.
    pub async fn close_session(&self, sandbox_id: impl Into<String>, message: Value) -> Result<RunOutcome> {
        self.consume_user_message(sandbox_id, message).await
    }

    pub async fn consume_ack(&self, sandbox_id: impl Into<String>, event: Value) -> Result<RunOutcome> {
        self.run(sandbox_id.into(), Delivery::Event, event).await
    }

    pub async fn consume_nack(&self, sandbox_id: impl Into<String>, event: Value) -> Result<RunOutcome> {
        self.run(sandbox_id.into(), Delivery::Event, event).await
    }

    pub async fn consume_delivery_report(&self, sandbox_id: impl Into<String>, event: Value) -> Result<RunOutcome> {
        self.run(sandbox_id.into(), Delivery::Event, event).await
    }

    async fn run(&self, sandbox_id: String, delivery: Delivery, payload: Value) -> Result<RunOutcome> {
        let span = tracing::info_span!("sandbox_run", sandbox_id = %sandbox_id);
        self.run_inner(sandbox_id, delivery, payload).instrument(span).await
    }

    async fn run_inner(&self, sandbox_id: String, delivery: Delivery, payload: Value) -> Result<RunOutcome> {
        let api = Arc::new(SandboxApi::new(sandbox_id.clone(), self.registry.clone(), self.config.clone()));
        let protocol = SandboxProtocol::new(
            api.clone(),
            self.launcher.clone(),
            self.config.recv_limit_bytes,
            Duration::from_secs(self.config.timeout_secs),
        );

        protocol.spawn().await?;
        protocol.started().await;

        if let Err(e) = api.sandbox_init().await {
            tracing::error!(sandbox_id = %sandbox_id, error = %e, "sandbox_init failed");
            api.log(&format!("sandbox_init failed: {e}"), crate::api::LogLevel::Error).await;
            protocol.kill(KillReason::ProtocolError);
        }

        let command = match delivery {
            Delivery::Message => {
                if let Some(id) = payload.get("message_id").and_then(Value::as_str) {
                    api.cache_inbound_message(id.to_string(), payload.clone()).await;
                }
                Command::new("inbound-message").with_field("msg", payload)
            }
            Delivery::Event => Command::new("inbound-event").with_field("msg", payload),
        };
        protocol.send(command).await;

        Ok(protocol.done().await)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::error::SandboxError;
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn config() -> Arc<AppConfig> {
        Arc::new(AppConfig {
            sandbox: HashMap::new(),
            executable: "/bin/true".to_string(),
            args: Vec::new(),
            path: None,
            env: HashMap::new(),
            timeout_secs: 5,
            recv_limit_bytes: 1024,
            rlimits: HashMap::new(),
            logging_resource: None,
            javascript: None,
            javascript_file: None,
            app_context: None,
        })
    }

    #[tokio::test]
    async fn spawn_failure_surfaces_as_an_error_not_a_panic() {
        let supervisor = Supervisor::new(
            Arc::new(ResourceRegistry::new()),
            config(),
            Arc::new(rlimit_launcher::RlimitLauncher::new(PathBuf::from("/nonexistent/trampoline"))),
        );
        let outcome = supervisor
            .consume_user_message("sandbox-1", serde_json::json!({"message_id": "m1"}))
            .await;
        assert!(matches!(outcome, Err(SandboxError::Launch(_))));
    }
}
