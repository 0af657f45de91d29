pub type Result<T> = std::result::Result<T, SandboxError>;

#[derive(thiserror::Error, Debug)]
pub enum SandboxError {
    /// `spawn()` was called a second time on the same `SandboxProtocol`.
    #[error("sandbox protocol already spawned")]
    AlreadySpawned,

    /// `SandboxApi::bind` was called after the API was already bound to a
    /// running protocol.
    #[error("sandbox api already bound to a running protocol")]
    SandboxAlreadyBound,

    /// Failure to launch the child under rlimits.
    #[error("failed to launch sandboxed child: {0}")]
    Launch(#[from] rlimit_launcher::LaunchError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode command as json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}
