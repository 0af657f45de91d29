//! The running child process: stdin/stdout/stderr plumbing, the byte
//! budget on stdout, and the kill/timeout/exit lifecycle. Grounded on the
//! source's `SandboxProtocol` (`outReceived`/`errReceived`/`processEnded`/
//! `check_recv`) for the accounting rules, and on
//! `core/src/exec.rs::consume_truncated_output` for the
//! timeout-vs-kill-signal `tokio::select!` shape.

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use rlimit_launcher::RlimitLauncher;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::process::Child;
use tokio::process::ChildStderr;
use tokio::process::ChildStdin;
use tokio::process::ChildStdout;
use tokio::sync::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::api::SandboxApi;
use crate::command::Command;
use crate::error::Result;
use crate::error::SandboxError;
use crate::promise::PromiseSet;

/// Why a sandbox run was killed. `None` in a [`RunOutcome`] means the
/// child exited (or was reaped) on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillReason {
    /// Cumulative stdout bytes crossed `recv_limit_bytes`.
    RecvLimitExceeded,
    /// The run exceeded its configured wall-clock timeout.
    Timeout,
    /// A resource handler or `sandbox_init` failed unrecoverably.
    ProtocolError,
    /// An external caller asked for the sandbox to be torn down.
    Requested,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub exit_status: Option<std::process::ExitStatus>,
    pub killed: Option<KillReason>,
}

/// Owns one spawned child's lifetime: writing commands to its stdin,
/// reading and budget-accounting its stdout, draining its stderr to the
/// log, and resolving once the process has gone away.
pub struct SandboxProtocol {
    api: Arc<SandboxApi>,
    launcher: Arc<RlimitLauncher>,
    spawned: AtomicBool,
    stdin: Mutex<Option<ChildStdin>>,
    recv_bytes: AtomicUsize,
    recv_limit: usize,
    timeout: Duration,
    /// Set once a kill is requested; `pump_stdout` stops parsing further
    /// lines into commands but keeps reading them so the child's stdout
    /// pipe never fills up and blocks the child.
    doomed: AtomicBool,
    kill_reason: StdMutex<Option<KillReason>>,
    kill_notify: Notify,
    started: PromiseSet<u32>,
    done: PromiseSet<RunOutcome>,
    in_flight: Mutex<Vec<JoinHandle<()>>>,
}

impl SandboxProtocol {
    pub fn new(api: Arc<SandboxApi>, launcher: Arc<RlimitLauncher>, recv_limit: usize, timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            api,
            launcher,
            spawned: AtomicBool::new(false),
            stdin: Mutex::new(None),
            recv_bytes: AtomicUsize::new(0),
            recv_limit,
            timeout,
            doomed: AtomicBool::new(false),
            kill_reason: StdMutex::new(None),
            kill_notify: Notify::new(),
            started: PromiseSet::new(),
            done: PromiseSet::new(),
            in_flight: Mutex::new(Vec::new()),
        })
    }

    /// Launches the configured executable under rlimits, wires up the
    /// stdio pumps, and spawns the supervising task. Returns once the
    /// child is running; callers await [`Self::started`] before running
    /// `sandbox_init` and delivering the first command, and
    /// [`Self::done`] for completion.
    pub async fn spawn(self: &Arc<Self>) -> Result<()> {
        if self.spawned.swap(true, Ordering::SeqCst) {
            return Err(SandboxError::AlreadySpawned);
        }
        self.api.bind(self)?;

        let config = self.api.config();
        let rlimits = config.resolved_rlimits()?;
        let cwd = config.path.clone().unwrap_or_else(|| PathBuf::from("."));
        let mut child = self
            .launcher
            .spawn(&config.executable, &config.args, &config.env, cwd, &rlimits)?;

        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "missing stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "missing stderr"))?;
        *self.stdin.lock().await = stdin;

        tokio::spawn(self.clone().pump_stdout(stdout));
        tokio::spawn(self.clone().pump_stderr(stderr));

        let pid = child.id().unwrap_or_default();
        self.started.fire(pid).await;

        tokio::spawn(self.clone().supervise(child));
        Ok(())
    }

    /// Writes one command to the child's stdin. A no-op if the child has
    /// already exited and closed its stdin.
    pub async fn send(&self, command: Command) {
        let line = match command.to_line() {
            Ok(line) => line,
            Err(e) => {
                tracing::error!(sandbox_id = %self.api.sandbox_id(), error = %e, "failed to encode outgoing command");
                return;
            }
        };
        let mut guard = self.stdin.lock().await;
        if let Some(stdin) = guard.as_mut() {
            if let Err(e) = stdin.write_all(line.as_bytes()).await {
                tracing::error!(sandbox_id = %self.api.sandbox_id(), error = %e, "failed writing to sandboxed child");
            }
        }
    }

    /// Requests the child be killed for `reason`. The first reason wins
    /// and is recorded on the eventual `RunOutcome`; idempotent.
    pub fn kill(&self, reason: KillReason) {
        let mut guard = self.kill_reason.lock().unwrap_or_else(|poison| poison.into_inner());
        if guard.is_none() {
            *guard = Some(reason);
        }
        drop(guard);
        self.doomed.store(true, Ordering::SeqCst);
        self.kill_notify.notify_one();
    }

    pub async fn started(&self) -> u32 {
        self.started.get().await
    }

    pub async fn done(&self) -> RunOutcome {
        self.done.get().await
    }

    /// Reads raw chunks off `reader`, charging each chunk's length to the
    /// combined stdout+stderr byte budget as it arrives -- not once a line
    /// completes -- so a child that never emits a newline still gets
    /// budget-checked. Complete lines are split out of a carry buffer; a
    /// trailing partial line is returned once at EOF.
    async fn read_chunked_line<R: AsyncRead + Unpin>(
        &self,
        reader: &mut R,
        carry: &mut Vec<u8>,
    ) -> std::io::Result<Option<String>> {
        loop {
            if let Some(pos) = carry.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = carry.drain(..=pos).collect();
                return Ok(Some(String::from_utf8_lossy(&line[..line.len() - 1]).into_owned()));
            }
            let mut buf = [0u8; 4096];
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                if carry.is_empty() {
                    return Ok(None);
                }
                let line = String::from_utf8_lossy(carry).into_owned();
                carry.clear();
                return Ok(Some(line));
            }
            self.charge_recv_bytes(n);
            carry.extend_from_slice(&buf[..n]);
        }
    }

    fn charge_recv_bytes(&self, n: usize) {
        let total = self.recv_bytes.fetch_add(n, Ordering::SeqCst) + n;
        if total > self.recv_limit {
            tracing::error!(
                sandbox_id = %self.api.sandbox_id(),
                recv_bytes = total,
                recv_limit = self.recv_limit,
                "sandboxed child exceeded its receive limit"
            );
            self.kill(KillReason::RecvLimitExceeded);
        }
    }

    async fn pump_stdout(self: Arc<Self>, mut stdout: ChildStdout) {
        let mut carry = Vec::new();
        loop {
            let line = match self.read_chunked_line(&mut stdout, &mut carry).await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(sandbox_id = %self.api.sandbox_id(), error = %e, "error reading sandboxed child stdout");
                    break;
                }
            };

            if self.doomed.load(Ordering::SeqCst) {
                continue;
            }

            let command = Command::from_line(&line);
            let api = self.api.clone();
            let handle = tokio::spawn(async move { api.dispatch_request(command).await });
            self.in_flight.lock().await.push(handle);
        }
    }

    async fn pump_stderr(self: Arc<Self>, mut stderr: ChildStderr) {
        let mut carry = Vec::new();
        loop {
            match self.read_chunked_line(&mut stderr, &mut carry).await {
                Ok(Some(line)) => tracing::warn!(sandbox_id = %self.api.sandbox_id(), "{line}"),
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(sandbox_id = %self.api.sandbox_id(), error = %e, "error reading sandboxed child stderr");
                    break;
                }
            }
        }
    }

    async fn supervise(self: Arc<Self>, mut child: Child) {
        let exit_status = tokio::select! {
            result = tokio::time::timeout(self.timeout, child.wait()) => match result {
                Ok(status) => status,
                Err(_) => {
                    self.kill(KillReason::Timeout);
                    child.wait().await
                }
            },
            _ = self.kill_notify.notified() => {
                let _ = child.start_kill();
                child.wait().await
            }
        };

        let handles = std::mem::take(&mut *self.in_flight.lock().await);
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(sandbox_id = %self.api.sandbox_id(), error = %e, "dispatch task did not complete cleanly");
            }
        }

        let killed = *self.kill_reason.lock().unwrap_or_else(|poison| poison.into_inner());
        self.done
            .fire(RunOutcome {
                exit_status: exit_status.ok(),
                killed,
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::config::AppConfig;
    use crate::registry::ResourceRegistry;
    use std::collections::HashMap;

    fn app_config(executable: &str, args: Vec<String>) -> AppConfig {
        AppConfig {
            sandbox: HashMap::new(),
            executable: executable.to_string(),
            args,
            path: None,
            env: HashMap::new(),
            timeout_secs: 5,
            recv_limit_bytes: 64,
            rlimits: HashMap::new(),
            logging_resource: None,
            javascript: None,
            javascript_file: None,
            app_context: None,
        }
    }

    fn launcher() -> Arc<RlimitLauncher> {
        // The trampoline binary doesn't exist in the test environment; the
        // launcher fails fast at `spawn()` time, which these tests exercise
        // instead of a full child lifecycle (that needs process-exec
        // integration coverage elsewhere).
        Arc::new(RlimitLauncher::new(PathBuf::from("/nonexistent/rlimit-trampoline")))
    }

    #[tokio::test]
    async fn spawn_twice_returns_already_spawned() {
        let config = Arc::new(app_config("/bin/true", vec![]));
        let api = Arc::new(SandboxApi::new("s1", Arc::new(ResourceRegistry::new()), config));
        let protocol = SandboxProtocol::new(api, launcher(), 64, Duration::from_secs(5));
        let _ = protocol.spawn().await;
        let second = protocol.spawn().await;
        assert!(matches!(second, Err(SandboxError::AlreadySpawned)));
    }

    #[tokio::test]
    async fn recv_budget_is_charged_per_chunk_before_a_line_completes() {
        let config = Arc::new(app_config("/bin/true", vec![]));
        let api = Arc::new(SandboxApi::new("s1", Arc::new(ResourceRegistry::new()), config));
        let protocol = SandboxProtocol::new(api, launcher(), 3, Duration::from_secs(5));

        let (mut tx, mut rx) = tokio::io::duplex(64);
        tx.write_all(b"hello").await.unwrap();

        let reading = protocol.clone();
        let read_task = tokio::spawn(async move {
            let mut carry = Vec::new();
            let _ = reading.read_chunked_line(&mut rx, &mut carry).await;
        });

        // No newline has arrived, so the line is still incomplete, but the
        // raw 5-byte chunk must already have been charged against the
        // 3-byte budget.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(protocol.recv_bytes.load(Ordering::SeqCst), 5);
        assert_eq!(
            *protocol.kill_reason.lock().unwrap_or_else(|poison| poison.into_inner()),
            Some(KillReason::RecvLimitExceeded)
        );

        read_task.abort();
    }

    #[tokio::test]
    async fn kill_records_the_first_reason_only() {
        let config = Arc::new(app_config("/bin/true", vec![]));
        let api = Arc::new(SandboxApi::new("s1", Arc::new(ResourceRegistry::new()), config));
        let protocol = SandboxProtocol::new(api, launcher(), 64, Duration::from_secs(5));
        protocol.kill(KillReason::Timeout);
        protocol.kill(KillReason::RecvLimitExceeded);
        assert_eq!(*protocol.kill_reason.lock().unwrap(), Some(KillReason::Timeout));
    }
}
