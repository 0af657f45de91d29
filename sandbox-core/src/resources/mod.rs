//! Concrete resources. Each module owns one entry of the wire protocol's
//! resource namespace (`kv.*`, `outbound.*`, `http.*`, `log.*`, `js.*`) plus
//! the fallback resource used for anything that matches none of them.

pub mod fallback;
pub mod http;
pub mod js_init;
pub mod kv;
pub mod log;
pub mod outbound;

use crate::api::SandboxApi;
use crate::command::Command;

/// Logs and kills, for a command whose resource prefix or operation name
/// this process has no handler for. Shared by the registry's fallback
/// resource and by every concrete resource's own unmatched-operation arm.
pub(crate) async fn unknown_operation(api: &SandboxApi, resource_name: &str, command: &Command) {
    tracing::error!(
        sandbox_id = %api.sandbox_id(),
        resource = resource_name,
        cmd = %command.cmd,
        cmd_id = %command.cmd_id,
        "unknown command; killing sandbox"
    );
    api.log(
        &format!("Resource {resource_name} received unrecognized command {}", command.cmd),
        crate::api::LogLevel::Error,
    )
    .await;
    api.sandbox_kill();
}
