//! The resource the registry hands back when a command's dotted prefix
//! doesn't match any configured resource. Mirrors the source's
//! `SandboxResources.__getitem__` raising straight into `unknown_request`.

use async_trait::async_trait;

use crate::api::SandboxApi;
use crate::command::Command;
use crate::error::Result;
use crate::registry::Resource;

pub struct FallbackResource;

impl FallbackResource {
    pub fn new() -> Self {
        Self
    }
}

impl Default for FallbackResource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Resource for FallbackResource {
    fn name(&self) -> &str {
        "fallback"
    }

    async fn dispatch(&self, api: &SandboxApi, command: Command) -> Result<Option<Command>> {
        super::unknown_operation(api, "fallback", &command).await;
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::config::AppConfig;
    use crate::registry::ResourceRegistry;
    use std::collections::HashMap;
    use std::sync::Arc;

    #[tokio::test]
    async fn dispatch_never_returns_a_reply() {
        let config = AppConfig {
            sandbox: HashMap::new(),
            executable: "/bin/true".to_string(),
            args: Vec::new(),
            path: None,
            env: HashMap::new(),
            timeout_secs: 60,
            recv_limit_bytes: 1024,
            rlimits: HashMap::new(),
            logging_resource: None,
            javascript: None,
            javascript_file: None,
            app_context: None,
        };
        let api = SandboxApi::new("s1", Arc::new(ResourceRegistry::new()), Arc::new(config));
        let fallback = FallbackResource::new();
        let reply = fallback.dispatch(&api, Command::new("whatever")).await.unwrap();
        assert!(reply.is_none());
    }
}
