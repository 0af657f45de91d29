pub type Result<T> = std::result::Result<T, LaunchError>;

#[derive(thiserror::Error, Debug)]
pub enum LaunchError {
    #[error("io error spawning rlimit trampoline: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode rlimits: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown resource limit name: {0:?}")]
    UnknownLimit(String),

    #[cfg(unix)]
    #[error("setrlimit({0:?}) failed: {1}")]
    SetRlimit(RlimitNameOwned, std::io::Error),
}

#[cfg(unix)]
pub type RlimitNameOwned = String;
