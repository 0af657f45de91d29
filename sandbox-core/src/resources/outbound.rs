//! Outbound messaging: replying to (or addressing a fresh message to) the
//! transport the sandboxed application is attached to. Grounded on the
//! source's `OutboundResource`, which looks the original inbound message
//! up by id and asks the transport to build a reply from it.
//!
//! None of these operations produce a reply to the child -- matching the
//! source, which always returns `None` from `handle_reply_to` et al.

use async_trait::async_trait;
use serde_json::Value;

use crate::api::SandboxApi;
use crate::command::Command;
use crate::error::Result;
use crate::registry::Resource;

/// The transport a sandboxed application is wired to. A real deployment
/// implements this against its message broker; the demo CLI logs instead.
#[async_trait]
pub trait OutboundSink: Send + Sync {
    async fn reply_to(&self, original: &Value, content: &Value, continue_session: bool) -> Result<()>;
    async fn reply_to_group(&self, original: &Value, content: &Value, continue_session: bool) -> Result<()>;
    async fn send_to(&self, to_addr: &str, content: &Value, endpoint: &str) -> Result<()>;
}

pub struct OutboundResource {
    sink: std::sync::Arc<dyn OutboundSink>,
}

impl OutboundResource {
    pub fn new(sink: std::sync::Arc<dyn OutboundSink>) -> Self {
        Self { sink }
    }

    async fn original_message(&self, api: &SandboxApi, command: &Command) -> Option<Value> {
        let id = command.get_str("in_reply_to")?;
        api.get_inbound_message(id).await
    }
}

#[async_trait]
impl Resource for OutboundResource {
    fn name(&self) -> &str {
        "outbound"
    }

    async fn dispatch(&self, api: &SandboxApi, command: Command) -> Result<Option<Command>> {
        match command.cmd.as_str() {
            "reply_to" => {
                let Some(original) = self.original_message(api, &command).await else {
                    return Ok(None);
                };
                let content = command.get("content").cloned().unwrap_or(Value::Null);
                let continue_session = command.get_bool("continue_session", true);
                self.sink.reply_to(&original, &content, continue_session).await?;
                Ok(None)
            }
            "reply_to_group" => {
                let Some(original) = self.original_message(api, &command).await else {
                    return Ok(None);
                };
                let content = command.get("content").cloned().unwrap_or(Value::Null);
                let continue_session = command.get_bool("continue_session", true);
                self.sink.reply_to_group(&original, &content, continue_session).await?;
                Ok(None)
            }
            "send_to" => {
                let Some(to_addr) = command.get_str("to_addr") else {
                    return Ok(None);
                };
                let content = command.get("content").cloned().unwrap_or(Value::Null);
                let endpoint = command.get_str("endpoint").unwrap_or("default");
                self.sink.send_to(to_addr, &content, endpoint).await?;
                Ok(None)
            }
            _ => {
                super::unknown_operation(api, "outbound", &command).await;
                Ok(None)
            }
        }
    }
}
