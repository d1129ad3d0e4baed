//! External benchmark client.
//!
//! The client issues requests against the proxy and writes one JSON result
//! file per invocation. Latency and throughput metrics are its business.

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::bench::BenchmarkRun;
use crate::config::BenchmarkConfig;
use crate::error::{OrchestratorError, Result};
use crate::server::spawn::LaunchCommand;

#[async_trait]
pub trait BenchmarkClient: Send + Sync {
    /// Run one benchmark to completion against `port`.
    async fn run(&self, run: &BenchmarkRun, port: u16, model: &str) -> Result<()>;
}

/// Runs the configured benchmark script as a child process.
pub struct CommandBenchmarkClient {
    config: BenchmarkConfig,
}

impl CommandBenchmarkClient {
    pub fn new(config: BenchmarkConfig) -> Self {
        Self { config }
    }

    pub fn command(&self, run: &BenchmarkRun, port: u16, model: &str) -> LaunchCommand {
        let result_dir = run
            .result_file_path
            .parent()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| ".".to_string());
        let result_file = run
            .result_file_path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default();

        LaunchCommand::from_config(format!("bench:{}", run.tag), &self.config.command)
            .opt("backend", &self.config.backend)
            .opt("model", model)
            .opt("dataset-name", &self.config.dataset_name)
            .opt("dataset-path", self.config.dataset_path.display())
            .opt("sonnet-input-len", self.config.input_len)
            .opt("sonnet-output-len", run.output_len)
            .opt("sonnet-prefix-len", self.config.prefix_len)
            .opt("num-prompts", self.config.num_prompts)
            .opt("port", port)
            .arg("--save-result")
            .opt("result-dir", result_dir)
            .opt("result-filename", result_file)
            .opt("request-rate", run.qps)
    }
}

#[async_trait]
impl BenchmarkClient for CommandBenchmarkClient {
    async fn run(&self, run: &BenchmarkRun, port: u16, model: &str) -> Result<()> {
        let command = self.command(run, port, model);
        info!(tag = %run.tag, qps = run.qps, "Running benchmark client");
        debug!(command = %command, "Benchmark command");

        let status = Command::new(&command.program)
            .args(&command.args)
            .stdin(std::process::Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| OrchestratorError::BenchmarkClientFailure {
                qps: run.qps,
                reason: format!("failed to start {}: {e}", command.program),
            })?;

        if !status.success() {
            return Err(OrchestratorError::BenchmarkClientFailure {
                qps: run.qps,
                reason: format!("client exited with {status}"),
            });
        }
        Ok(())
    }
}
