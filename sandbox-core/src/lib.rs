#![deny(clippy::print_stdout, clippy::print_stderr)]

//! Core of a messaging-application sandbox: a supervisor that spawns
//! short-lived child processes under hard OS resource limits and mediates
//! every side effect through a newline-delimited JSON RPC over the
//! child's standard streams.

pub mod api;
pub mod command;
pub mod config;
pub mod error;
pub mod promise;
pub mod protocol;
pub mod registry;
pub mod resources;
pub mod supervisor;

pub use api::LogLevel;
pub use api::SandboxApi;
pub use api::SandboxId;
pub use command::Command;
pub use config::AppConfig;
pub use config::CliOverrides;
pub use config::ResourceConfig;
pub use config::ResourceKind;
pub use error::Result;
pub use error::SandboxError;
pub use promise::PromiseSet;
pub use protocol::KillReason;
pub use protocol::RunOutcome;
pub use protocol::SandboxProtocol;
pub use registry::Resource;
pub use registry::ResourceRegistry;
pub use supervisor::Supervisor;
