//! The resource registry: a name -> `Resource` mapping shared by every
//! concurrent sandbox run within one worker. Per-sandbox state never lives
//! here -- it lives on the per-run [`crate::api::SandboxApi`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::api::SandboxApi;
use crate::command::Command;
use crate::error::Result;
use crate::resources::fallback::FallbackResource;

/// A capability exposed to the child over the RPC, keyed by a command
/// prefix (`<name>.<operation>`).
#[async_trait]
pub trait Resource: Send + Sync {
    fn name(&self) -> &str;

    /// Sequentially awaited once, before any sandbox run begins.
    async fn setup(&self) -> Result<()> {
        Ok(())
    }

    /// Sequentially awaited once, at worker shutdown.
    async fn teardown(&self) -> Result<()> {
        Ok(())
    }

    /// Invoked once per sandbox run, during `SandboxApi::sandbox_init`.
    async fn sandbox_init(&self, api: &SandboxApi) -> Result<()> {
        let _ = api;
        Ok(())
    }

    /// Handles one command whose resource prefix resolved to this
    /// instance. `command.cmd` has already had the resource prefix
    /// stripped, so resources match on the bare operation name.
    ///
    /// `Ok(None)` suppresses the reply (fire-and-forget commands);
    /// `Ok(Some(reply))` is sent back to the child with the dotted name
    /// and original `cmd_id` restored by the caller.
    async fn dispatch(&self, api: &SandboxApi, command: Command) -> Result<Option<Command>>;
}

/// Holds every configured resource plus the fallback resource used for
/// unrecognized command prefixes.
pub struct ResourceRegistry {
    resources: HashMap<String, Arc<dyn Resource>>,
    fallback: Arc<FallbackResource>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self {
            resources: HashMap::new(),
            fallback: Arc::new(FallbackResource::new()),
        }
    }

    /// Registers `resource` under `name`. Should only be called before
    /// [`setup`](Self::setup).
    pub fn register(&mut self, name: impl Into<String>, resource: Arc<dyn Resource>) {
        self.resources.insert(name.into(), resource);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resources.contains_key(name)
    }

    /// Looks up a resource by its exact configured name, with no fallback.
    /// Used where "is this specific resource configured and registered?"
    /// matters, as opposed to [`resolve`](Self::resolve)'s dotted-command
    /// prefix lookup.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Resource>> {
        self.resources.get(name).cloned()
    }

    /// Sequentially initializes every registered resource.
    pub async fn setup(&self) -> Result<()> {
        for resource in self.resources.values() {
            resource.setup().await?;
        }
        Ok(())
    }

    /// Sequentially tears down every registered resource.
    pub async fn teardown(&self) -> Result<()> {
        for resource in self.resources.values() {
            resource.teardown().await?;
        }
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Resource>> {
        self.resources.values()
    }

    /// Resolves a dotted command's resource prefix to its handler, falling
    /// back to the fallback resource (log-and-kill) when `name` is absent
    /// or unregistered.
    pub fn resolve(&self, name: Option<&str>) -> Arc<dyn Resource> {
        match name.and_then(|n| self.resources.get(n)) {
            Some(resource) => resource.clone(),
            None => self.fallback.clone(),
        }
    }
}

impl Default for ResourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
