//! QPS sweep driver.
//!
//! Levels run strictly one after another against the same proxy. A failed
//! level is recorded and the sweep moves on.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::bench::{BenchmarkClient, BenchmarkRun};
use crate::error::OrchestratorError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum LevelStatus {
    Completed,
    Failed(String),
}

/// Result of one QPS level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelOutcome {
    pub run: BenchmarkRun,
    pub status: LevelStatus,
}

impl LevelOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == LevelStatus::Completed
    }
}

pub struct SweepDriver {
    client: Arc<dyn BenchmarkClient>,
    results_dir: PathBuf,
    model: String,
    pause: Duration,
}

impl SweepDriver {
    pub fn new(
        client: Arc<dyn BenchmarkClient>,
        results_dir: PathBuf,
        model: String,
        pause: Duration,
    ) -> Self {
        Self {
            client,
            results_dir,
            model,
            pause,
        }
    }

    /// Run the client once per level, in order, against `port`.
    pub async fn run_sweep(
        &self,
        tag: &str,
        qps_levels: &[f64],
        output_len: u32,
        port: u16,
    ) -> Vec<LevelOutcome> {
        let mut outcomes = Vec::with_capacity(qps_levels.len());

        for (i, &qps) in qps_levels.iter().enumerate() {
            let run = BenchmarkRun::new(&self.results_dir, tag, qps, output_len);

            let status = match self.run_level(&run, port).await {
                Ok(()) => {
                    info!(tag, qps, artifact = %run.result_file_path.display(), "Level complete");
                    LevelStatus::Completed
                }
                Err(e) => {
                    error!(tag, qps, error = %e, "Level failed, continuing sweep");
                    LevelStatus::Failed(e.to_string())
                }
            };
            outcomes.push(LevelOutcome { run, status });

            if i + 1 < qps_levels.len() {
                tokio::time::sleep(self.pause).await;
            }
        }

        outcomes
    }

    async fn run_level(&self, run: &BenchmarkRun, port: u16) -> Result<(), OrchestratorError> {
        self.client.run(run, port, &self.model).await?;

        if !run.result_file_path.exists() {
            return Err(OrchestratorError::BenchmarkClientFailure {
                qps: run.qps,
                reason: format!(
                    "client succeeded but wrote no {}",
                    run.result_file_path.display()
                ),
            });
        }
        Ok(())
    }
}
