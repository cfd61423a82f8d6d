use std::process::Stdio;
use std::time::{Duration, Instant};

use chrono::Utc;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::process::Command;
use tracing::{debug, warn};

use nanoclaw_types::{ActionResult, ActionStatus, SshTarget};

use crate::{truncate_tail, SshConfig, STDERR_CAP, STDOUT_CAP};

/// Run one allowlisted command on a named host over outbound ssh: batch
/// mode, no pty, no stdin, keepalives on, wall-clock timeout enforced
/// SIGTERM then SIGKILL.
pub(crate) async fn execute(
    config: &SshConfig,
    target: SshTarget,
    command: &str,
    action_id: String,
) -> ActionResult {
    let Some(host) = config.hosts.get(target.as_str()) else {
        return ActionResult::failed(
            action_id,
            format!("no address configured for ssh target `{}`", target.as_str()),
            0,
        );
    };
    let destination = match &config.user {
        Some(user) => format!("{user}@{host}"),
        None => host.clone(),
    };

    let mut cmd = Command::new(&config.program);
    cmd.arg("-o")
        .arg("BatchMode=yes")
        .arg("-o")
        .arg(format!(
            "ConnectTimeout={}",
            config.connect_timeout.as_secs()
        ))
        .arg("-o")
        .arg(format!(
            "ServerAliveInterval={}",
            config.keepalive_interval.as_secs()
        ))
        .arg("-o")
        .arg(format!(
            "StrictHostKeyChecking={}",
            config.strict_host_key_checking
        ))
        .arg("-T")
        .arg(&destination)
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!(target = target.as_str(), %command, "ssh exec");
    let started = Instant::now();
    let child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            return ActionResult::failed(action_id, format!("failed to spawn ssh: {e}"), 0);
        }
    };
    let pid = child.id();

    match tokio::time::timeout(config.command_timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => {
            let duration_ms = started.elapsed().as_millis() as u64;
            let exit_code = output.status.code().unwrap_or(-1);
            let stdout = truncate_tail(&String::from_utf8_lossy(&output.stdout), STDOUT_CAP);
            let stderr = truncate_tail(&String::from_utf8_lossy(&output.stderr), STDERR_CAP);
            ActionResult {
                action_id,
                status: if exit_code == 0 {
                    ActionStatus::Ok
                } else {
                    ActionStatus::Failed
                },
                stdout,
                stderr,
                exit_code,
                executed_at: Utc::now(),
                duration_ms,
            }
        }
        Ok(Err(e)) => ActionResult::failed(
            action_id,
            format!("ssh wait failed: {e}"),
            started.elapsed().as_millis() as u64,
        ),
        Err(_) => {
            warn!(target = target.as_str(), "ssh command timed out");
            terminate_then_kill(pid).await;
            ActionResult::failed(
                action_id,
                format!(
                    "ssh command timed out after {}s",
                    config.command_timeout.as_secs()
                ),
                started.elapsed().as_millis() as u64,
            )
        }
    }
}

/// Give the remote command a chance to exit cleanly, then force it.
async fn terminate_then_kill(pid: Option<u32>) {
    let Some(pid) = pid else { return };
    let pid = Pid::from_raw(pid as i32);
    let _ = signal::kill(pid, Signal::SIGTERM);
    tokio::time::sleep(Duration::from_secs(2)).await;
    let _ = signal::kill(pid, Signal::SIGKILL);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::os::unix::fs::PermissionsExt;

    fn config_with_program(program: &str, timeout: Duration) -> SshConfig {
        let mut hosts = HashMap::new();
        hosts.insert("william".to_string(), "203.0.113.10".to_string());
        SshConfig {
            hosts,
            program: program.to_string(),
            command_timeout: timeout,
            ..SshConfig::default()
        }
    }

    fn script(dir: &std::path::Path, name: &str, body: &str) -> String {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path.to_string_lossy().to_string()
    }

    #[tokio::test]
    async fn unconfigured_target_fails_without_spawning() {
        let config = SshConfig::default();
        let result = execute(&config, SshTarget::William, "uptime", "a0".into()).await;
        assert_eq!(result.status, ActionStatus::Failed);
        assert!(result.stderr.contains("no address configured"));
    }

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let program = script(&dir.path(), "fake-ssh", "echo remote-ok");
        let config = config_with_program(&program, Duration::from_secs(10));
        let result = execute(&config, SshTarget::William, "uptime", "a0".into()).await;
        assert_eq!(result.status, ActionStatus::Ok);
        assert_eq!(result.exit_code, 0);
        assert!(result.stdout.contains("remote-ok"));
    }

    #[tokio::test]
    async fn nonzero_exit_is_failed() {
        let dir = tempfile::tempdir().unwrap();
        let program = script(&dir.path(), "fake-ssh", "echo oops >&2; exit 3");
        let config = config_with_program(&program, Duration::from_secs(10));
        let result = execute(&config, SshTarget::William, "uptime", "a0".into()).await;
        assert_eq!(result.status, ActionStatus::Failed);
        assert_eq!(result.exit_code, 3);
        assert!(result.stderr.contains("oops"));
    }

    #[tokio::test]
    async fn wall_clock_timeout_kills_the_command() {
        let dir = tempfile::tempdir().unwrap();
        let program = script(&dir.path(), "fake-ssh", "sleep 30");
        let config = config_with_program(&program, Duration::from_millis(300));
        let started = Instant::now();
        let result = execute(&config, SshTarget::William, "uptime", "a0".into()).await;
        assert_eq!(result.status, ActionStatus::Failed);
        assert!(result.stderr.contains("timed out"));
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
