//! `SandboxApi` is the per-run facade resources dispatch through: it owns
//! the inbound-message cache, knows the sandbox's identity, and holds a
//! weak back-reference to the running [`crate::protocol::SandboxProtocol`]
//! so a resource can send commands or request a kill without owning the
//! protocol itself.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::Weak;

use serde_json::Value;
use tokio::sync::Mutex;

use crate::command::Command;
use crate::config::AppConfig;
use crate::error::Result;
use crate::error::SandboxError;
use crate::protocol::SandboxProtocol;
use crate::registry::ResourceRegistry;

pub type SandboxId = String;

/// Severity passed to [`SandboxApi::log`], mirroring the levels the
/// logging resource and the plain `tracing` fallback both understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    /// The bare operation name a logging resource dispatches on.
    fn operation(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
            LogLevel::Critical => "critical",
        }
    }

    /// Emits directly through `tracing`, bypassing any configured logging
    /// resource. This is the system-logging fallback, and also what the
    /// logging resource itself calls -- it must not call back into
    /// [`SandboxApi::log`], which would delegate right back to it.
    pub(crate) fn emit(self, sandbox_id: &str, message: &str) {
        match self {
            LogLevel::Debug => tracing::debug!(sandbox_id = %sandbox_id, "{message}"),
            LogLevel::Info => tracing::info!(sandbox_id = %sandbox_id, "{message}"),
            LogLevel::Warning => tracing::warn!(sandbox_id = %sandbox_id, "{message}"),
            LogLevel::Error => tracing::error!(sandbox_id = %sandbox_id, "{message}"),
            LogLevel::Critical => tracing::error!(sandbox_id = %sandbox_id, critical = true, "{message}"),
        }
    }
}

pub struct SandboxApi {
    sandbox_id: SandboxId,
    registry: Arc<ResourceRegistry>,
    config: Arc<AppConfig>,
    inbound_messages: Mutex<HashMap<String, Value>>,
    protocol: OnceLock<Weak<SandboxProtocol>>,
}

impl SandboxApi {
    pub fn new(sandbox_id: impl Into<String>, registry: Arc<ResourceRegistry>, config: Arc<AppConfig>) -> Self {
        Self {
            sandbox_id: sandbox_id.into(),
            registry,
            config,
            inbound_messages: Mutex::new(HashMap::new()),
            protocol: OnceLock::new(),
        }
    }

    pub fn sandbox_id(&self) -> &str {
        &self.sandbox_id
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    /// Binds this API to its running protocol. Called exactly once, right
    /// after the protocol is constructed; a second call means two
    /// protocols tried to share one API.
    pub fn bind(&self, protocol: &Arc<SandboxProtocol>) -> Result<()> {
        self.protocol
            .set(Arc::downgrade(protocol))
            .map_err(|_| SandboxError::SandboxAlreadyBound)
    }

    fn protocol(&self) -> Option<Arc<SandboxProtocol>> {
        self.protocol.get().and_then(Weak::upgrade)
    }

    /// Sends a command to the child over stdin. A no-op if the protocol
    /// has already torn down.
    pub async fn sandbox_send(&self, command: Command) {
        if let Some(protocol) = self.protocol() {
            protocol.send(command).await;
        }
    }

    /// Requests that the child be killed. Idempotent.
    pub fn sandbox_kill(&self) {
        if let Some(protocol) = self.protocol() {
            protocol.kill(crate::protocol::KillReason::ProtocolError);
        }
    }

    /// Remembers a message handed to the sandbox for later reply
    /// correlation (`reply_to`/`reply_to_group`).
    pub async fn cache_inbound_message(&self, id: String, payload: Value) {
        self.inbound_messages.lock().await.insert(id, payload);
    }

    pub async fn get_inbound_message(&self, id: &str) -> Option<Value> {
        self.inbound_messages.lock().await.get(id).cloned()
    }

    /// Calls `sandbox_init` on every registered resource, in registration
    /// order, stopping at the first failure.
    pub async fn sandbox_init(&self) -> Result<()> {
        for resource in self.registry.iter() {
            resource.sandbox_init(self).await?;
        }
        Ok(())
    }

    /// Dispatches one parsed command to its resolved resource, sending
    /// back whatever reply (if any) the resource produces. Handler errors
    /// never propagate to the caller: they become a synthetic failure
    /// reply plus a logged error, exactly like an `unknown_request`.
    pub async fn dispatch_request(&self, mut command: Command) {
        let (resource_name, operation) = {
            let (resource, op) = command.split_name();
            (resource.map(str::to_string), op.to_string())
        };
        let dotted = command.cmd.clone();
        command.cmd = operation;

        let resource = self.registry.resolve(resource_name.as_deref());
        let reply = match resource.dispatch(self, command.clone()).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!(
                    sandbox_id = %self.sandbox_id,
                    cmd = %dotted,
                    error = %e,
                    "resource handler failed"
                );
                self.log(&format!("{dotted} failed: {e}"), LogLevel::Error).await;
                Some(Command::failure_reply(&command.cmd, &command.cmd_id, e.to_string()))
            }
        };

        if let Some(mut reply) = reply {
            reply.cmd = dotted;
            self.sandbox_send(reply).await;
        }
    }

    /// Delegates to the configured logging resource if one is named and
    /// registered; falls back to plain `tracing` otherwise, or if the
    /// resource itself fails. Mirrors the source's `SandboxApi.log` falling
    /// back to the Twisted log when no logging resource is configured or
    /// it errors.
    pub async fn log(&self, message: &str, level: LogLevel) {
        if let Some(name) = &self.config.logging_resource {
            match self.registry.get(name) {
                Some(resource) => {
                    let command = Command::new(level.operation()).with_field("msg", message.to_string());
                    match resource.dispatch(self, command).await {
                        Ok(_) => return,
                        Err(e) => tracing::warn!(
                            sandbox_id = %self.sandbox_id,
                            logging_resource = %name,
                            error = %e,
                            "configured logging resource failed; falling back to system logging"
                        ),
                    }
                }
                None => tracing::warn!(
                    sandbox_id = %self.sandbox_id,
                    logging_resource = %name,
                    "configured logging resource is not registered; falling back to system logging"
                ),
            }
        }
        level.emit(&self.sandbox_id, message);
    }
}
