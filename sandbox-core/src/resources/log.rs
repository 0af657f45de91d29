//! Structured logging callable from the sandboxed child, and the resource
//! `SandboxApi::log` delegates to when one is configured. Mirrors the
//! source's `LoggingResource`, which maps `log.{debug,info,warning,error,
//! critical}` onto the matching Twisted log level.

use async_trait::async_trait;
use serde_json::Value;

use crate::api::LogLevel;
use crate::api::SandboxApi;
use crate::command::Command;
use crate::error::Result;
use crate::registry::Resource;

pub struct LoggingResource;

impl LoggingResource {
    pub fn new() -> Self {
        Self
    }

    async fn handle(&self, api: &SandboxApi, command: Command, level: LogLevel) -> Result<Option<Command>> {
        let Some(msg) = command.get_str("msg") else {
            return Ok(Some(Command::failure_reply(
                &command.cmd,
                &command.cmd_id,
                "Value expected for msg",
            )));
        };
        // Emits directly rather than through `SandboxApi::log`, which would
        // delegate right back here when this resource is the configured one.
        level.emit(api.sandbox_id(), msg);
        Ok(Some(command.reply_with([("success".to_string(), Value::Bool(true))])))
    }
}

impl Default for LoggingResource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Resource for LoggingResource {
    fn name(&self) -> &str {
        "log"
    }

    async fn dispatch(&self, api: &SandboxApi, command: Command) -> Result<Option<Command>> {
        match command.cmd.as_str() {
            "log" => self.handle(api, command, LogLevel::Info).await,
            "debug" => self.handle(api, command, LogLevel::Debug).await,
            "info" => self.handle(api, command, LogLevel::Info).await,
            "warning" => self.handle(api, command, LogLevel::Warning).await,
            "error" => self.handle(api, command, LogLevel::Error).await,
            "critical" => self.handle(api, command, LogLevel::Critical).await,
            _ => {
                super::unknown_operation(api, "log", &command).await;
                Ok(None)
            }
        }
    }
}
