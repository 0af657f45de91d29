//! Configuration surface: resource registry wiring, process bootstrap
//! parameters, and rlimit overrides. Loaded from TOML, the same two-stage
//! "base config + CLI overrides" pattern `codex-core::config::Config` uses.

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;

use rlimit_launcher::RlimitPair;
use rlimit_launcher::Rlimits;
use serde::Deserialize;

use crate::error::Result;
use crate::error::SandboxError;

fn default_timeout_secs() -> u64 {
    60
}

fn default_recv_limit_bytes() -> usize {
    1024 * 1024
}

/// Which concrete resource a named slot in `AppConfig::sandbox` is backed
/// by. The source looked these up dynamically by Python classpath string;
/// here the set of resource kinds is closed, so an unrecognized `cls`
/// fails to deserialize instead of silently doing nothing at dispatch time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Kv,
    Outbound,
    Http,
    Log,
    JsInit,
}

/// One entry of the `sandbox` resource table: which kind of resource, plus
/// free-form options consumed by that resource's `setup()`.
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceConfig {
    pub cls: ResourceKind,
    #[serde(flatten)]
    pub options: toml::value::Table,
}

/// Command-line overrides layered on top of a parsed `AppConfig`, mirroring
/// how `codex-cli` layers `clap` flags on top of `config.toml`.
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    pub executable: Option<String>,
    pub timeout_secs: Option<u64>,
    pub recv_limit_bytes: Option<usize>,
}

/// The full configuration surface for one sandbox worker.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Resources to expose to the child, keyed by the name seen on the wire.
    #[serde(default)]
    pub sandbox: HashMap<String, ResourceConfig>,

    /// Full path to the executable to run in the sandbox. May be left
    /// empty for the JS variant, which searches well-known `node` paths.
    #[serde(default)]
    pub executable: String,

    #[serde(default)]
    pub args: Vec<String>,

    pub path: Option<PathBuf>,

    #[serde(default)]
    pub env: HashMap<String, String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_recv_limit_bytes")]
    pub recv_limit_bytes: usize,

    /// Partial overrides of `rlimit_launcher::default_rlimits()`.
    #[serde(default)]
    pub rlimits: HashMap<String, RlimitPair>,

    /// Name of the resource to route internal logs through; `None` falls
    /// back to `tracing`.
    #[serde(default)]
    pub logging_resource: Option<String>,

    /// JavaScript sandbox variant: inline source.
    #[serde(default)]
    pub javascript: Option<String>,

    /// JavaScript sandbox variant: path to a file containing the source.
    #[serde(default)]
    pub javascript_file: Option<PathBuf>,

    /// JavaScript sandbox variant: optional extra context expression.
    #[serde(default)]
    pub app_context: Option<String>,
}

const POSSIBLE_NODEJS_EXECUTABLES: &[&str] = &[
    "/usr/local/bin/node",
    "/usr/local/bin/nodejs",
    "/usr/bin/node",
    "/usr/bin/nodejs",
];

impl AppConfig {
    /// Loads `config_path` (TOML) and applies `overrides` on top.
    pub fn load(config_path: &Path, overrides: CliOverrides) -> Result<Self> {
        let text = std::fs::read_to_string(config_path)?;
        let mut config: AppConfig =
            toml::from_str(&text).map_err(|e| SandboxError::Config(e.to_string()))?;

        if let Some(executable) = overrides.executable {
            config.executable = executable;
        }
        if let Some(timeout_secs) = overrides.timeout_secs {
            config.timeout_secs = timeout_secs;
        }
        if let Some(recv_limit_bytes) = overrides.recv_limit_bytes {
            config.recv_limit_bytes = recv_limit_bytes;
        }
        config.apply_js_defaults();
        Ok(config)
    }

    /// Resolves the rlimit overrides against the restrictive defaults.
    /// Fatal at worker startup if an override names an unknown limit.
    pub fn resolved_rlimits(&self) -> Result<Rlimits> {
        Ok(rlimit_launcher::merge_overrides(&self.rlimits)?)
    }

    /// Is this a JS-variant sandbox (`javascript` or `javascript_file` set)?
    pub fn is_js_variant(&self) -> bool {
        self.javascript.is_some() || self.javascript_file.is_some()
    }

    /// Reads the JS source, from the inline field or the file, as the
    /// original `javascript_for_api` hook does for the two JS sandbox
    /// flavors.
    pub fn javascript_source(&self) -> Result<Option<String>> {
        if let Some(src) = &self.javascript {
            return Ok(Some(src.clone()));
        }
        if let Some(path) = &self.javascript_file {
            return Ok(Some(std::fs::read_to_string(path)?));
        }
        Ok(None)
    }

    /// For the JS variant: auto-registers `js` and `log` resources if
    /// absent, defaults `logging_resource` to `log`, and searches for a
    /// `node`/`nodejs` executable if `executable` was left blank. Mirrors
    /// `JsSandbox::validate_config` / `JsSandbox::get_executable_and_args`.
    fn apply_js_defaults(&mut self) {
        if !self.is_js_variant() {
            return;
        }
        self.sandbox.entry("js".to_string()).or_insert(ResourceConfig {
            cls: ResourceKind::JsInit,
            options: toml::value::Table::new(),
        });
        self.sandbox.entry("log".to_string()).or_insert(ResourceConfig {
            cls: ResourceKind::Log,
            options: toml::value::Table::new(),
        });
        if self.logging_resource.is_none() {
            self.logging_resource = Some("log".to_string());
        }
        if self.executable.is_empty() {
            if let Some(found) = find_nodejs() {
                self.executable = found;
            }
        }
    }
}

fn find_nodejs() -> Option<String> {
    POSSIBLE_NODEJS_EXECUTABLES
        .iter()
        .find(|path| Path::new(path).is_file())
        .map(|path| path.to_string())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn resolved_rlimits_rejects_unknown_limit_name() {
        let mut config = bare_config();
        config
            .rlimits
            .insert("not_a_real_limit".to_string(), RlimitPair::fixed(1));
        assert!(config.resolved_rlimits().is_err());
    }

    #[test]
    fn resolved_rlimits_merges_overrides_over_defaults() {
        let mut config = bare_config();
        config.rlimits.insert("cpu".to_string(), RlimitPair::fixed(5));
        let rlimits = config.resolved_rlimits().unwrap();
        assert_eq!(
            rlimits[&rlimit_launcher::RlimitName::Cpu],
            RlimitPair::fixed(5)
        );
    }

    #[test]
    fn js_variant_auto_registers_js_and_log_resources() {
        let mut config = bare_config();
        config.javascript = Some("api.done();".to_string());
        config.apply_js_defaults();
        assert!(config.sandbox.contains_key("js"));
        assert!(config.sandbox.contains_key("log"));
        assert_eq!(config.logging_resource.as_deref(), Some("log"));
    }

    #[test]
    fn non_js_variant_leaves_sandbox_table_untouched() {
        let mut config = bare_config();
        config.apply_js_defaults();
        assert!(config.sandbox.is_empty());
        assert!(config.logging_resource.is_none());
    }

    #[test]
    fn load_parses_toml_and_applies_cli_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("sandbox.toml");
        std::fs::write(
            &config_path,
            r#"
            executable = "/bin/true"
            timeout_secs = 5

            [sandbox.store]
            cls = "kv"
            keys_per_user = 50
            "#,
        )
        .unwrap();

        let overrides = CliOverrides {
            executable: Some("/bin/false".to_string()),
            timeout_secs: None,
            recv_limit_bytes: Some(2048),
        };
        let config = AppConfig::load(&config_path, overrides).unwrap();

        assert_eq!(config.executable, "/bin/false");
        assert_eq!(config.timeout_secs, 5);
        assert_eq!(config.recv_limit_bytes, 2048);
        assert_eq!(config.sandbox["store"].cls, ResourceKind::Kv);
    }

    fn bare_config() -> AppConfig {
        AppConfig {
            sandbox: HashMap::new(),
            executable: "/bin/true".to_string(),
            args: Vec::new(),
            path: None,
            env: HashMap::new(),
            timeout_secs: default_timeout_secs(),
            recv_limit_bytes: default_recv_limit_bytes(),
            rlimits: HashMap::new(),
            logging_resource: None,
            javascript: None,
            javascript_file: None,
            app_context: None,
        }
    }
}
