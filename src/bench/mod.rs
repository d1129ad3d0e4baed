//! Benchmark workload.
//!
//! - [`corpus`]: shared prompt corpus preparation
//! - [`client`]: external benchmark client invocation
//! - [`sweep`]: sequential QPS sweep against a running topology

pub mod client;
pub mod corpus;
pub mod sweep;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use client::{BenchmarkClient, CommandBenchmarkClient};
pub use sweep::{LevelOutcome, LevelStatus, SweepDriver};

/// One client invocation at one load level. Produces exactly one artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkRun {
    pub qps: f64,
    pub output_len: u32,
    pub tag: String,
    pub result_file_path: PathBuf,
}

impl BenchmarkRun {
    pub fn new(results_dir: &Path, tag: &str, qps: f64, output_len: u32) -> Self {
        Self {
            qps,
            output_len,
            tag: tag.to_string(),
            result_file_path: results_dir.join(artifact_name(tag, qps)),
        }
    }
}

/// `<tag>-qps-<qps>.json`; integral rates print without a fraction.
pub fn artifact_name(tag: &str, qps: f64) -> String {
    format!("{tag}-qps-{qps}.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_name() {
        assert_eq!(artifact_name("disagg_prefill", 2.0), "disagg_prefill-qps-2.json");
        assert_eq!(artifact_name("chunked_prefill", 2.5), "chunked_prefill-qps-2.5.json");
    }

    #[test]
    fn test_run_path() {
        let run = BenchmarkRun::new(Path::new("results"), "chunked_prefill", 8.0, 6);
        assert_eq!(
            run.result_file_path,
            PathBuf::from("results/chunked_prefill-qps-8.json")
        );
    }
}
