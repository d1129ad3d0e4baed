//! Run summary: what each topology produced.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::bench::{LevelOutcome, LevelStatus};
use crate::error::Result;
use crate::gpu::Partition;
use crate::server::CleanupReport;
use crate::topology::TopologyKind;

/// File name of the persisted summary inside the results directory.
pub const SUMMARY_FILE: &str = "run-summary.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum LaunchStatus {
    Healthy,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologyReport {
    pub kind: TopologyKind,
    pub launch: LaunchStatus,

    /// Device assignment the topology ran on; `None` if it never came up.
    pub partition: Option<Partition>,
    pub levels: Vec<LevelOutcome>,
    pub cleanup: CleanupReport,
}

impl TopologyReport {
    pub fn launched(&self) -> bool {
        self.launch == LaunchStatus::Healthy
    }

    pub fn completed_qps(&self) -> Vec<f64> {
        self.levels
            .iter()
            .filter(|l| l.succeeded())
            .map(|l| l.run.qps)
            .collect()
    }

    pub fn failed_qps(&self) -> Vec<f64> {
        self.levels
            .iter()
            .filter(|l| !l.succeeded())
            .map(|l| l.run.qps)
            .collect()
    }

    pub fn artifacts(&self) -> Vec<PathBuf> {
        self.levels
            .iter()
            .filter(|l| l.succeeded())
            .map(|l| l.run.result_file_path.clone())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub pool_size: usize,
    pub topologies: Vec<TopologyReport>,

    /// Error from the visualization step, if it ran and failed.
    pub visualization_error: Option<String>,
}

impl RunSummary {
    /// Whether any topology failed to come up; drives the exit status.
    pub fn any_launch_failed(&self) -> bool {
        self.topologies.iter().any(|t| !t.launched())
    }

    pub fn report(&self, kind: TopologyKind) -> Option<&TopologyReport> {
        self.topologies.iter().find(|t| t.kind == kind)
    }

    /// Log one line per topology plus one per failed level.
    pub fn log(&self) {
        for t in &self.topologies {
            match &t.launch {
                LaunchStatus::Healthy => info!(
                    run_id = %self.run_id,
                    topology = %t.kind,
                    completed = ?t.completed_qps(),
                    failed = ?t.failed_qps(),
                    clean_teardown = t.cleanup.is_clean(),
                    "Topology summary"
                ),
                LaunchStatus::Failed(reason) => error!(
                    run_id = %self.run_id,
                    topology = %t.kind,
                    reason = %reason,
                    clean_teardown = t.cleanup.is_clean(),
                    "Topology failed to launch"
                ),
            }
            for level in &t.levels {
                if let LevelStatus::Failed(reason) = &level.status {
                    warn!(topology = %t.kind, qps = level.run.qps, reason = %reason, "Missing artifact");
                }
            }
        }
    }

    /// Persist as pretty JSON into `dir`.
    pub async fn write(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(SUMMARY_FILE);
        let json = serde_json::to_vec_pretty(self).map_err(std::io::Error::from)?;
        tokio::fs::write(&path, json).await?;
        Ok(path)
    }
}
