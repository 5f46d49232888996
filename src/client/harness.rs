//! Process harness: launches one service as a child process with all three
//! stdio streams piped, and reclaims it afterwards.
//!
//! Key design decisions:
//! - Uses raw `tokio::process::Command` so the session owns the byte streams
//!   directly (no transport layer in between).
//! - `ManagedProcess::shutdown` consumes the process, so close/kill/reap runs
//!   exactly once. `kill_on_drop(true)` covers the panic path where
//!   `shutdown` is never reached.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};

use crate::config::ServiceDescriptor;
use crate::error::AuditError;

/// The three byte streams of a running service.
pub struct ServicePipes {
    /// Request stream (child stdin).
    pub requests: ChildStdin,
    /// Response stream (child stdout).
    pub responses: ChildStdout,
    /// Diagnostic stream (child stderr).
    pub diagnostics: ChildStderr,
}

/// A started service process. Call [`ManagedProcess::shutdown`] on every exit path.
pub struct ManagedProcess {
    name: String,
    child: Child,
    pipes: Option<ServicePipes>,
}

/// Namespace for process start-up.
pub struct ProcessHarness;

impl ProcessHarness {
    /// Launch the descriptor's command in its working directory.
    ///
    /// A missing working directory or an unusable executable is an
    /// `AuditError::Start`; nothing is spawned in the first case.
    pub fn start(descriptor: &ServiceDescriptor) -> crate::Result<ManagedProcess> {
        let name = descriptor.name.clone();

        if !descriptor.work_dir.is_dir() {
            return Err(AuditError::Start(
                name,
                format!(
                    "server directory does not exist: {}",
                    descriptor.work_dir.display()
                ),
            ));
        }

        let (program, args) = descriptor.command.split_first().ok_or_else(|| {
            AuditError::Start(name.clone(), "command is empty".to_string())
        })?;

        let mut cmd = Command::new(program);
        cmd.args(args);
        cmd.current_dir(&descriptor.work_dir);

        for (key, value) in descriptor.language.runtime_env() {
            cmd.env(key, value);
        }
        if !descriptor.env.is_empty() {
            cmd.envs(&descriptor.env);
        }

        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| AuditError::Start(name.clone(), format!("'{}': {}", program, e)))?;

        let requests = child.stdin.take().ok_or_else(|| {
            AuditError::Start(name.clone(), "failed to open stdin pipe".to_string())
        })?;
        let responses = child.stdout.take().ok_or_else(|| {
            AuditError::Start(name.clone(), "failed to open stdout pipe".to_string())
        })?;
        let diagnostics = child.stderr.take().ok_or_else(|| {
            AuditError::Start(name.clone(), "failed to open stderr pipe".to_string())
        })?;

        tracing::debug!(
            server = %name,
            pid = ?child.id(),
            program = %program,
            "service process started"
        );

        Ok(ManagedProcess {
            name,
            child,
            pipes: Some(ServicePipes {
                requests,
                responses,
                diagnostics,
            }),
        })
    }
}

impl ManagedProcess {
    /// OS process id, `None` once the process has been reaped.
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Hand the pipes to the protocol exchange. Returns `None` if already taken.
    pub fn take_pipes(&mut self) -> Option<ServicePipes> {
        self.pipes.take()
    }

    /// Wait out the warm-up delay, failing as soon as the process exits.
    pub async fn warm_up(&mut self, delay: Duration) -> crate::Result<()> {
        tokio::select! {
            status = self.child.wait() => {
                let detail = match status {
                    Ok(status) => describe_status(status),
                    Err(e) => format!("wait error: {}", e),
                };
                Err(AuditError::ExitedEarly(self.name.clone(), detail))
            }
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    /// Close the request stream, kill the process, and reap it.
    ///
    /// Returns the exit status if the process had already exited on its own
    /// before the kill.
    pub async fn shutdown(mut self) -> Option<ExitStatus> {
        // Dropping the pipes closes the child's stdin
        drop(self.pipes.take());

        let exited = match self.child.try_wait() {
            Ok(Some(status)) => Some(status),
            Ok(None) => {
                if let Err(e) = self.child.kill().await {
                    tracing::debug!(server = %self.name, error = %e, "kill failed");
                }
                None
            }
            Err(e) => {
                tracing::debug!(server = %self.name, error = %e, "try_wait failed");
                if let Err(e) = self.child.kill().await {
                    tracing::debug!(server = %self.name, error = %e, "kill failed");
                }
                None
            }
        };

        if let Some(status) = exited {
            if !status.success() {
                tracing::warn!(
                    server = %self.name,
                    status = %describe_status(status),
                    "service process had already exited"
                );
            }
        }

        tracing::debug!(server = %self.name, "service process reclaimed");
        exited
    }
}

fn describe_status(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exit code {}", code),
        None => status.to_string(),
    }
}
