//! Per-tenant key/value storage with a quota on distinct keys per sandbox.
//! Grounded on the source's `RedisResource`: keys are namespaced
//! `sandboxes#sandbox_id#user_key`, and a quota is enforced by tracking a
//! per-tenant key count rather than by iterating the store.

use async_trait::async_trait;
use serde_json::Value;

use crate::api::SandboxApi;
use crate::command::Command;
use crate::error::Result;
use crate::error::SandboxError;
use crate::registry::Resource;

/// Storage backend a `KvResource` delegates to. Kept as a trait so a real
/// deployment can back it with redis, sqlite, or whatever else, while
/// tests use an in-process map.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    /// Returns whether the key previously existed.
    async fn delete(&self, key: &str) -> Result<bool>;
    async fn exists(&self, key: &str) -> Result<bool>;
    /// Atomically adds `amount` to the integer stored at `key` (treating a
    /// missing key as zero) and returns the new value.
    async fn incr(&self, key: &str, amount: i64) -> Result<i64>;
}

/// A single-process, in-memory `KvStore`. Useful for tests and for the
/// demo CLI; a production deployment would point `KvResource` at a real
/// shared store instead.
#[derive(Default)]
pub struct InMemoryKvStore {
    data: tokio::sync::Mutex<std::collections::HashMap<String, String>>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.data.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.data.lock().await.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.data.lock().await.remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.data.lock().await.contains_key(key))
    }

    async fn incr(&self, key: &str, amount: i64) -> Result<i64> {
        let mut data = self.data.lock().await;
        let current = data
            .get(key)
            .map(|v| v.parse::<i64>().unwrap_or(0))
            .unwrap_or(0);
        let updated = current + amount;
        data.insert(key.to_string(), updated.to_string());
        Ok(updated)
    }
}

fn sandboxed_key(sandbox_id: &str, user_key: &str) -> String {
    format!("sandboxes#{sandbox_id}#{user_key}")
}

fn count_key(sandbox_id: &str) -> String {
    format!("count#{sandbox_id}")
}

pub struct KvResource {
    store: std::sync::Arc<dyn KvStore>,
    keys_per_user: u64,
}

impl KvResource {
    pub fn new(store: std::sync::Arc<dyn KvStore>, keys_per_user: u64) -> Self {
        Self { store, keys_per_user }
    }

    /// Reserves room for `key` under the per-tenant quota. A key that
    /// already exists is always writable (it doesn't grow the count); a
    /// brand new key increments the tenant's count and is rejected -- with
    /// the increment rolled back -- if that would exceed `keys_per_user`.
    async fn check_keys(&self, sandbox_id: &str, key: &str) -> Result<bool> {
        if self.store.exists(key).await? {
            return Ok(true);
        }
        let count_key = count_key(sandbox_id);
        let new_count = self.store.incr(&count_key, 1).await?;
        if new_count as u64 > self.keys_per_user {
            self.store.incr(&count_key, -1).await?;
            return Ok(false);
        }
        Ok(true)
    }

    async fn handle_set(&self, api: &SandboxApi, command: Command) -> Result<Option<Command>> {
        let Some(user_key) = command.get_str("key").map(str::to_string) else {
            return Ok(Some(Command::failure_reply(
                &command.cmd,
                &command.cmd_id,
                "Value expected for key",
            )));
        };
        let key = sandboxed_key(api.sandbox_id(), &user_key);
        if !self.check_keys(api.sandbox_id(), &key).await? {
            return Ok(Some(command.reply_with([
                ("success".to_string(), Value::Bool(false)),
                ("reason".to_string(), Value::String("Too many keys".to_string())),
            ])));
        }
        let value = command.get("value").cloned().unwrap_or(Value::Null);
        self.store.set(&key, &value.to_string()).await?;
        Ok(Some(command.reply_with([("success".to_string(), Value::Bool(true))])))
    }

    async fn handle_get(&self, api: &SandboxApi, command: Command) -> Result<Option<Command>> {
        let Some(user_key) = command.get_str("key") else {
            return Ok(Some(Command::failure_reply(
                &command.cmd,
                &command.cmd_id,
                "Value expected for key",
            )));
        };
        let key = sandboxed_key(api.sandbox_id(), user_key);
        let raw = self.store.get(&key).await?;
        let value = match raw {
            Some(text) => serde_json::from_str(&text).unwrap_or(Value::String(text)),
            None => Value::Null,
        };
        Ok(Some(command.reply_with([
            ("success".to_string(), Value::Bool(true)),
            ("value".to_string(), value),
        ])))
    }

    async fn handle_delete(&self, api: &SandboxApi, command: Command) -> Result<Option<Command>> {
        let Some(user_key) = command.get_str("key") else {
            return Ok(Some(Command::failure_reply(
                &command.cmd,
                &command.cmd_id,
                "Value expected for key",
            )));
        };
        let key = sandboxed_key(api.sandbox_id(), user_key);
        let existed = self.store.delete(&key).await?;
        if existed {
            self.store.incr(&count_key(api.sandbox_id()), -1).await?;
        }
        Ok(Some(command.reply_with([
            ("success".to_string(), Value::Bool(true)),
            ("existed".to_string(), Value::Bool(existed)),
        ])))
    }

    async fn handle_incr(&self, api: &SandboxApi, command: Command) -> Result<Option<Command>> {
        let Some(user_key) = command.get_str("key").map(str::to_string) else {
            return Ok(Some(Command::failure_reply(
                &command.cmd,
                &command.cmd_id,
                "Value expected for key",
            )));
        };
        let key = sandboxed_key(api.sandbox_id(), &user_key);
        if !self.check_keys(api.sandbox_id(), &key).await? {
            return Ok(Some(command.reply_with([
                ("success".to_string(), Value::Bool(false)),
                ("reason".to_string(), Value::String("Too many keys".to_string())),
            ])));
        }
        let amount = command.get("amount").and_then(Value::as_i64).unwrap_or(1);
        let value = self.store.incr(&key, amount).await?;
        Ok(Some(command.reply_with([
            ("success".to_string(), Value::Bool(true)),
            ("value".to_string(), Value::Number(value.into())),
        ])))
    }
}

#[async_trait]
impl Resource for KvResource {
    fn name(&self) -> &str {
        "kv"
    }

    async fn dispatch(&self, api: &SandboxApi, command: Command) -> Result<Option<Command>> {
        match command.cmd.as_str() {
            "set" => self.handle_set(api, command).await,
            "get" => self.handle_get(api, command).await,
            "delete" => self.handle_delete(api, command).await,
            "incr" => self.handle_incr(api, command).await,
            _ => {
                super::unknown_operation(api, "kv", &command).await;
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::config::AppConfig;
    use crate::registry::ResourceRegistry;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn api() -> SandboxApi {
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
        SandboxApi::new("sandbox-1", Arc::new(ResourceRegistry::new()), Arc::new(config))
    }

    #[tokio::test]
    async fn set_then_get_round_trips_the_value() {
        let api = api();
        let kv = KvResource::new(Arc::new(InMemoryKvStore::new()), 10);
        kv.dispatch(&api, Command::new("set").with_field("key", "a").with_field("value", "hi"))
            .await
            .unwrap();
        let reply = kv
            .dispatch(&api, Command::new("get").with_field("key", "a"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.get_str("value"), Some("hi"));
    }

    #[tokio::test]
    async fn get_of_missing_key_returns_null_value() {
        let api = api();
        let kv = KvResource::new(Arc::new(InMemoryKvStore::new()), 10);
        let reply = kv
            .dispatch(&api, Command::new("get").with_field("key", "missing"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.get("value"), Some(&Value::Null));
    }

    #[tokio::test]
    async fn quota_rejects_the_key_beyond_the_limit() {
        let api = api();
        let kv = KvResource::new(Arc::new(InMemoryKvStore::new()), 1);
        let first = kv
            .dispatch(&api, Command::new("set").with_field("key", "a").with_field("value", 1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.get("success"), Some(&Value::Bool(true)));

        let second = kv
            .dispatch(&api, Command::new("set").with_field("key", "b").with_field("value", 1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.get("success"), Some(&Value::Bool(false)));
    }

    #[tokio::test]
    async fn overwriting_an_existing_key_does_not_consume_quota() {
        let api = api();
        let kv = KvResource::new(Arc::new(InMemoryKvStore::new()), 1);
        kv.dispatch(&api, Command::new("set").with_field("key", "a").with_field("value", 1))
            .await
            .unwrap();
        let reply = kv
            .dispatch(&api, Command::new("set").with_field("key", "a").with_field("value", 2))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.get("success"), Some(&Value::Bool(true)));
    }

    #[tokio::test]
    async fn delete_frees_up_the_quota_slot() {
        let api = api();
        let kv = KvResource::new(Arc::new(InMemoryKvStore::new()), 1);
        kv.dispatch(&api, Command::new("set").with_field("key", "a").with_field("value", 1))
            .await
            .unwrap();
        let deleted = kv
            .dispatch(&api, Command::new("delete").with_field("key", "a"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(deleted.get("existed"), Some(&Value::Bool(true)));

        let reply = kv
            .dispatch(&api, Command::new("set").with_field("key", "b").with_field("value", 1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.get("success"), Some(&Value::Bool(true)));
    }

    #[tokio::test]
    async fn incr_defaults_to_one() {
        let api = api();
        let kv = KvResource::new(Arc::new(InMemoryKvStore::new()), 10);
        let reply = kv
            .dispatch(&api, Command::new("incr").with_field("key", "counter"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.get("value"), Some(&Value::Number(1.into())));
        let reply = kv
            .dispatch(&api, Command::new("incr").with_field("key", "counter").with_field("amount", 4))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.get("value"), Some(&Value::Number(5.into())));
    }
}
