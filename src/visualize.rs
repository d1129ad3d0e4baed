//! Hand-off to the external plotting step.

use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::info;

use crate::config::CommandConfig;
use crate::error::{OrchestratorError, Result};

#[async_trait]
pub trait Visualizer: Send + Sync {
    /// Render whatever artifacts exist under `results_dir`.
    async fn render(&self, results_dir: &Path) -> Result<()>;
}

/// Argument placeholder replaced with the results directory.
pub const RESULTS_DIR_PLACEHOLDER: &str = "{results_dir}";

/// Runs the configured plotting script and waits for it.
pub struct CommandVisualizer {
    command: CommandConfig,
}

impl CommandVisualizer {
    pub fn new(command: CommandConfig) -> Self {
        Self { command }
    }

    /// Configured arguments with the results directory filled in. Without a
    /// placeholder the directory is appended as the last argument.
    pub fn args(&self, results_dir: &Path) -> Vec<String> {
        let dir = results_dir.display().to_string();
        let mut args: Vec<String> = self
            .command
            .args
            .iter()
            .map(|a| a.replace(RESULTS_DIR_PLACEHOLDER, &dir))
            .collect();
        if !self
            .command
            .args
            .iter()
            .any(|a| a.contains(RESULTS_DIR_PLACEHOLDER))
        {
            args.push(dir);
        }
        args
    }
}

#[async_trait]
impl Visualizer for CommandVisualizer {
    async fn render(&self, results_dir: &Path) -> Result<()> {
        info!(program = %self.command.program, results = %results_dir.display(), "Rendering results");
        let status = Command::new(&self.command.program)
            .args(self.args(results_dir))
            .stdin(std::process::Stdio::null())
            .status()
            .await
            .map_err(|e| OrchestratorError::Visualization(format!("{}: {e}", self.command.program)))?;

        if status.success() {
            Ok(())
        } else {
            Err(OrchestratorError::Visualization(format!("exited with {status}")))
        }
    }
}
