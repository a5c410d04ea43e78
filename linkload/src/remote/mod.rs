/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Remote command execution on experiment nodes.
//!
//! The orchestrator only needs "run this shell command on that node and give
//! me exit code, stdout and stderr".  [`NodeController`] is that seam;
//! [`SshController`] implements it by driving the system `ssh` client in
//! batch mode, so host keys, agents and `~/.ssh/config` behave exactly as they
//! do for an operator at a shell.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, trace};

use crate::config::{NodeEndpoint, SshSettings};

// ── Types ─────────────────────────────────────────────────────────────────────

/// Captured result of one remote command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    /// Remote exit status; `-1` if the process was terminated by a signal.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Debug, Error)]
pub enum RemoteError {
    /// The local transport process could not be started.
    #[error("failed to launch command for {node}: {source}")]
    Spawn {
        node: String,
        #[source]
        source: std::io::Error,
    },

    /// The command did not finish in time; the transport process is killed.
    #[error("command on {node} timed out after {timeout:?}")]
    Timeout { node: String, timeout: Duration },
}

/// Runs shell commands on experiment nodes.
#[async_trait]
pub trait NodeController: Send + Sync {
    async fn run(
        &self,
        node: &NodeEndpoint,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, RemoteError>;
}

// ── SshController ─────────────────────────────────────────────────────────────

/// [`NodeController`] backed by the OpenSSH client binary.
#[derive(Debug, Clone)]
pub struct SshController {
    user: String,
    key_path: PathBuf,
    connect_timeout_secs: u64,
    program: String,
}

impl SshController {
    pub fn new(settings: &SshSettings) -> Self {
        Self {
            user: settings.user.clone(),
            key_path: settings.key_path.clone(),
            connect_timeout_secs: settings.connect_timeout_secs,
            program: "ssh".to_string(),
        }
    }

    /// Use a different client binary (e.g. a wrapper script).
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Arguments passed to the client, command last.
    fn build_args(&self, node: &NodeEndpoint, command: &str) -> Vec<String> {
        vec![
            "-i".to_string(),
            self.key_path.display().to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout_secs),
            format!("{}@{}", self.user, node.host),
            "--".to_string(),
            command.to_string(),
        ]
    }
}

#[async_trait]
impl NodeController for SshController {
    async fn run(
        &self,
        node: &NodeEndpoint,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, RemoteError> {
        debug!(node = %node.name, host = %node.host, command, "remote exec");

        let child = Command::new(&self.program)
            .args(self.build_args(node, command))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RemoteError::Spawn {
                node: node.name.clone(),
                source,
            })?;

        // Dropping the future on timeout drops the child, which kills it.
        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| RemoteError::Timeout {
                node: node.name.clone(),
                timeout,
            })?
            .map_err(|source| RemoteError::Spawn {
                node: node.name.clone(),
                source,
            })?;

        let result = CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        trace!(
            node = %node.name,
            exit_code = result.exit_code,
            stdout = %result.stdout.trim(),
            stderr = %result.stderr.trim(),
            "remote exec finished"
        );
        Ok(result)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> SshSettings {
        SshSettings {
            user: "pi".into(),
            key_path: PathBuf::from("/keys/id_ed25519"),
            command_timeout_secs: 15,
            connect_timeout_secs: 7,
        }
    }

    fn node() -> NodeEndpoint {
        NodeEndpoint {
            name: "node01".into(),
            host: "10.64.44.101".into(),
            interface: "wlan0".into(),
        }
    }

    #[test]
    fn args_target_user_at_host_with_batch_options() {
        let ctl = SshController::new(&settings());
        let args = ctl.build_args(&node(), "hostname");

        assert_eq!(&args[..2], ["-i", "/keys/id_ed25519"]);
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert!(args.contains(&"ConnectTimeout=7".to_string()));
        assert_eq!(args[args.len() - 3], "pi@10.64.44.101");
        assert_eq!(args[args.len() - 2], "--");
        assert_eq!(args.last().unwrap(), "hostname");
    }

    /// Write an executable stand-in for the ssh client.
    #[cfg(unix)]
    fn fake_ssh(dir: &tempfile::TempDir, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.path().join("fake-ssh");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.display().to_string()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn captures_exit_code_and_streams() {
        let dir = tempfile::tempdir().unwrap();
        // The last two arguments are the "--" separator and the remote command.
        let program = fake_ssh(
            &dir,
            r#"for a; do prev="$last"; last="$a"; done
echo "$prev" >&2
echo "$last"
exit 3"#,
        );
        let ctl = SshController::new(&settings()).with_program(program);

        let out = ctl
            .run(&node(), "iperf -s -u", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out.exit_code, 3);
        assert_eq!(out.stdout.trim(), "iperf -s -u");
        assert_eq!(out.stderr.trim(), "--");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_command_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let program = fake_ssh(&dir, "sleep 5");
        let ctl = SshController::new(&settings()).with_program(program);

        let err = ctl
            .run(&node(), "true", Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Timeout { .. }), "{err:?}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let ctl = SshController::new(&settings()).with_program("/nonexistent/ssh-binary");
        let err = ctl
            .run(&node(), "true", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Spawn { .. }));
    }

    #[test]
    fn success_means_zero_exit() {
        assert!(CommandOutput::default().success());
        let failed = CommandOutput {
            exit_code: 1,
            ..Default::default()
        };
        assert!(!failed.success());
    }
}
