//! Spawning and killing external processes.
//!
//! Every child is placed in its own process group and marked kill-on-drop, so
//! dropping a handle (on any exit path) also takes down the engine's worker
//! processes.

use std::collections::BTreeMap;

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tracing::{debug, info};

use crate::config::CommandConfig;
use crate::error::{OrchestratorError, Result};

/// A fully rendered external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    /// Short name used in logs, e.g. `producer:8100`.
    pub label: String,
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl LaunchCommand {
    pub fn from_config(label: impl Into<String>, command: &CommandConfig) -> Self {
        Self {
            label: label.into(),
            program: command.program.clone(),
            args: command.args.clone(),
            env: BTreeMap::new(),
        }
    }

    pub fn arg(mut self, arg: impl ToString) -> Self {
        self.args.push(arg.to_string());
        self
    }

    /// Append `--key value`.
    pub fn opt(self, key: &str, value: impl ToString) -> Self {
        self.arg(format!("--{key}")).arg(value)
    }
}

impl std::fmt::Display for LaunchCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (k, v) in &self.env {
            write!(f, "{k}={v} ")?;
        }
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Starts long-lived processes without waiting on them.
pub trait Spawner: Send + Sync {
    fn spawn(&self, command: &LaunchCommand) -> Result<Child>;
}

/// Spawns real OS processes with tokio.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSpawner;

impl Spawner for SystemSpawner {
    fn spawn(&self, command: &LaunchCommand) -> Result<Child> {
        let child = Command::new(&command.program)
            .args(&command.args)
            .envs(&command.env)
            .stdin(std::process::Stdio::null())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| OrchestratorError::Spawn {
                program: command.program.clone(),
                source,
            })?;

        info!(label = %command.label, pid = ?child.id(), "Spawned process");
        debug!(command = %command, "Spawn command");
        Ok(child)
    }
}

/// Kill a child and its process group, then reap it.
pub async fn kill_child(child: &mut Child) {
    if let Some(pid) = child.id() {
        if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            debug!(pid, error = %e, "killpg failed");
        }
    }
    if let Err(e) = child.kill().await {
        debug!(error = %e, "kill failed");
    }
}

/// Non-blocking exit check; `Some` carries a printable status.
pub fn exit_status(child: &mut Child) -> Option<String> {
    match child.try_wait() {
        Ok(Some(status)) => Some(status.to_string()),
        Ok(None) => None,
        Err(e) => Some(format!("unknown ({e})")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let mut cmd = LaunchCommand::from_config("x", &CommandConfig::new("python3", &["a.py"]))
            .opt("port", 8000)
            .arg("--save-result");
        cmd.env.insert("A".to_string(), "1".to_string());
        assert_eq!(cmd.to_string(), "A=1 python3 a.py --port 8000 --save-result");
    }

    #[tokio::test]
    async fn test_spawn_and_kill() {
        let cmd = LaunchCommand::from_config("sleeper", &CommandConfig::new("sleep", &["30"]));
        let mut child = SystemSpawner.spawn(&cmd).unwrap();
        assert!(exit_status(&mut child).is_none());

        kill_child(&mut child).await;
        assert!(exit_status(&mut child).is_some());
    }

    #[test]
    fn test_spawn_missing_program() {
        let cmd = LaunchCommand::from_config(
            "missing",
            &CommandConfig::new("/nonexistent/pd-bench-engine", &[]),
        );
        let rt = tokio::runtime::Runtime::new().unwrap();
        let err = rt.block_on(async { SystemSpawner.spawn(&cmd) }).unwrap_err();
        assert!(matches!(err, OrchestratorError::Spawn { .. }));
    }
}
