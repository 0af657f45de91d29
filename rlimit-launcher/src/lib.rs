//! Spawns a child process with OS resource limits installed before the
//! target executable's own code runs.
//!
//! `setrlimit(2)` only constrains the calling process; calling it from the
//! supervisor would constrain the supervisor itself, not the sandboxed
//! child. [`RlimitLauncher`] instead spawns a tiny trampoline process whose
//! first action is to install the requested limits on itself and then
//! `exec` the real target, replacing its own image. The limits are already
//! in force by the time the target executable's allocator or interpreter
//! starts up.

mod error;
pub mod rlimits;
#[cfg(unix)]
mod trampoline;

pub use error::LaunchError;
pub use error::Result;
pub use rlimits::RlimitName;
pub use rlimits::RlimitPair;
pub use rlimits::Rlimits;
#[cfg(unix)]
pub use trampoline::run_trampoline_main;

use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::Path;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Child;
use tokio::process::Command;

/// Name of the alias/hard-link under which a binary is recognized as the
/// rlimit trampoline by [`run_with_rlimits`].
pub const TRAMPOLINE_EXE_NAME: &str = "rlimit-trampoline";

/// Spawns processes under a fixed set of `Rlimits` via the trampoline
/// helper binary.
#[derive(Debug, Clone)]
pub struct RlimitLauncher {
    trampoline_exe: PathBuf,
}

impl RlimitLauncher {
    /// `trampoline_exe` is the path to a binary that behaves like this
    /// crate's `rlimit-trampoline` binary (or a process that dispatches to
    /// [`run_trampoline_main`] via [`run_with_rlimits`]).
    pub fn new(trampoline_exe: PathBuf) -> Self {
        Self { trampoline_exe }
    }

    /// Locates the trampoline next to the current executable, the way
    /// `codex-linux-sandbox` is located relative to the `codex` binary.
    pub fn from_current_exe() -> Result<Self> {
        let current = std::env::current_exe().map_err(LaunchError::Io)?;
        let sibling = current
            .parent()
            .map(|dir| dir.join(TRAMPOLINE_EXE_NAME))
            .unwrap_or_else(|| PathBuf::from(TRAMPOLINE_EXE_NAME));
        Ok(Self::new(sibling))
    }

    /// Spawns `executable` with `argv`/`env`/`cwd`, under `rlimits`,
    /// returning the `tokio::process::Child` for the *trampoline* process
    /// (which, once it execs, becomes `executable` from the OS's point of
    /// view -- same pid, new image).
    pub fn spawn(
        &self,
        executable: &str,
        argv: &[String],
        env: &HashMap<String, String>,
        cwd: impl AsRef<Path>,
        rlimits: &Rlimits,
    ) -> Result<Child> {
        let rlimits_json = serde_json::to_string(rlimits).map_err(LaunchError::Json)?;

        let mut cmd = Command::new(&self.trampoline_exe);
        cmd.arg("--rlimits").arg(rlimits_json).arg("--");
        cmd.arg(executable);
        cmd.args(argv.iter().map(OsStr::new));
        cmd.current_dir(cwd);
        cmd.env_clear();
        cmd.envs(env);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        cmd.spawn().map_err(LaunchError::Io)
    }
}

/// Boilerplate shared by any binary that wants to double as the rlimit
/// trampoline when invoked through the `rlimit-trampoline` alias, and run
/// its normal async entry point otherwise. Mirrors
/// `codex_linux_sandbox::run_with_sandbox`.
#[cfg(unix)]
pub fn run_with_rlimits<F, Fut>(main_fn: F) -> anyhow::Result<()>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<()>>,
{
    let argv0 = std::env::args().next().unwrap_or_default();
    let exe_name = Path::new(&argv0)
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("");

    if exe_name == TRAMPOLINE_EXE_NAME {
        // Safety: `run_trampoline_main` never returns on the success path;
        // on failure it exits the process directly.
        run_trampoline_main();
    }

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(main_fn())
}
