//! Bootstraps a JavaScript sandboxed application: on `sandbox_init`, sends
//! an `initialize` command carrying the JS source (and optional extra
//! context expression) the child's runtime should `eval`. Mirrors the
//! source's `JsSandboxResource.sandbox_init`.

use async_trait::async_trait;

use crate::api::SandboxApi;
use crate::command::Command;
use crate::error::Result;
use crate::registry::Resource;

pub struct JsInitResource {
    javascript: String,
    app_context: Option<String>,
}

impl JsInitResource {
    pub fn new(javascript: String, app_context: Option<String>) -> Self {
        Self { javascript, app_context }
    }
}

#[async_trait]
impl Resource for JsInitResource {
    fn name(&self) -> &str {
        "js"
    }

    async fn sandbox_init(&self, api: &SandboxApi) -> Result<()> {
        let mut init = Command::new("initialize").with_field("javascript", self.javascript.clone());
        if let Some(app_context) = &self.app_context {
            init = init.with_field("app_context", app_context.clone());
        }
        api.sandbox_send(init).await;
        Ok(())
    }

    async fn dispatch(&self, api: &SandboxApi, command: Command) -> Result<Option<Command>> {
        super::unknown_operation(api, "js", &command).await;
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
    async fn sandbox_init_is_a_no_op_without_a_bound_protocol() {
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
        let api = SandboxApi::new("sandbox-1", Arc::new(ResourceRegistry::new()), Arc::new(config));
        let js = JsInitResource::new("api.done();".to_string(), None);
        js.sandbox_init(&api).await.unwrap();
    }
}
