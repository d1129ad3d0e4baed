//! Runtime configuration for pd-bench.
//!
//! Configuration is loaded from a JSON file; every field has a default so a
//! partial file (or none at all) is valid. A few knobs can be overridden from
//! the command line.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "pd-bench",
    about = "Benchmark chunked-prefill against disaggregated-prefill serving"
)]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "pd-bench.json")]
    pub config: PathBuf,

    /// Model identifier served by both topologies.
    #[arg(long)]
    pub model: Option<String>,

    /// Number of GPUs in the pool (skips nvidia-smi discovery).
    #[arg(long)]
    pub gpus: Option<usize>,

    /// Comma-separated QPS levels to sweep.
    #[arg(long, value_delimiter = ',')]
    pub qps: Option<Vec<f64>>,

    /// Output length (tokens) per benchmark request.
    #[arg(long)]
    pub output_len: Option<u32>,

    /// Directory receiving benchmark artifacts.
    #[arg(long)]
    pub results_dir: Option<PathBuf>,

    /// Print the partition and server commands without launching anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long)]
    pub json_logs: bool,
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Model identifier passed to the engine and the benchmark client.
    pub model: String,

    /// GPU pool size; `None` means detect with nvidia-smi.
    pub gpu_count: Option<usize>,

    /// Results directory, reset at the start of every run.
    pub results_dir: PathBuf,

    pub engine: EngineConfig,
    pub topology: TopologyConfig,
    pub health: HealthConfig,
    pub cleanup: CleanupConfig,
    pub benchmark: BenchmarkConfig,
    pub corpus: CorpusConfig,
    pub visualization: VisualizationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: "meta-llama/Meta-Llama-3.1-8B-Instruct".to_string(),
            gpu_count: None,
            results_dir: PathBuf::from("results"),
            engine: EngineConfig::default(),
            topology: TopologyConfig::default(),
            health: HealthConfig::default(),
            cleanup: CleanupConfig::default(),
            benchmark: BenchmarkConfig::default(),
            corpus: CorpusConfig::default(),
            visualization: VisualizationConfig::default(),
        }
    }
}

/// An external program and its fixed arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandConfig {
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }
}

/// Serving-engine launch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine entry point; server options are appended to `args`.
    pub command: CommandConfig,

    /// Host used to reach engines and the proxy.
    pub host: String,

    /// Maximum context length (`--max-model-len`).
    pub max_model_len: u32,

    /// Extra environment applied to every engine process.
    pub env: BTreeMap<String, String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command: CommandConfig::new("python3", &["-m", "vllm.entrypoints.openai.api_server"]),
            host: "localhost".to_string(),
            max_model_len: 10000,
            env: BTreeMap::new(),
        }
    }
}

/// Ports, per-role tuning and proxy commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologyConfig {
    /// Public port of the proxy; the benchmark client targets it.
    pub proxy_port: u16,

    /// Port of the server on the primary GPU set.
    pub primary_port: u16,

    /// Port of the server on the secondary GPU set.
    pub secondary_port: u16,

    /// Rendezvous port shared by the KV producer and consumer.
    pub kv_port: u16,

    /// Address the producer and consumer advertise; detected when unset.
    pub host_ip: Option<String>,

    /// Memory fraction for chunked-prefill replicas.
    pub replica_gpu_memory_utilization: f64,

    /// Memory fraction for the producer and consumer.
    pub disagg_gpu_memory_utilization: f64,

    /// Tensor-parallel degree of the producer and consumer.
    pub disagg_tensor_parallel: usize,

    /// Round-robin proxy fronting chunked-prefill replicas.
    pub round_robin_proxy: CommandConfig,

    /// Prefill/decode proxy fronting the producer and consumer.
    pub disagg_proxy: CommandConfig,

    /// Delay after spawning the proxy before it is considered up.
    pub proxy_settle_ms: u64,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            proxy_port: 8000,
            primary_port: 8100,
            secondary_port: 8200,
            kv_port: 12345,
            host_ip: None,
            replica_gpu_memory_utilization: 0.8,
            disagg_gpu_memory_utilization: 0.6,
            disagg_tensor_parallel: 4,
            round_robin_proxy: CommandConfig::new("python3", &["round_robin_proxy.py"]),
            disagg_proxy: CommandConfig::new("python3", &["disagg_prefill_proxy_server.py"]),
            proxy_settle_ms: 1000,
        }
    }
}

impl TopologyConfig {
    pub fn proxy_settle(&self) -> Duration {
        Duration::from_millis(self.proxy_settle_ms)
    }
}

/// Liveness polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Give up on a server after this many seconds.
    pub startup_timeout_secs: u64,

    /// Delay between probes.
    pub poll_interval_ms: u64,

    /// Endpoint probed on each server.
    pub path: String,

    /// Timeout of a single probe request.
    pub request_timeout_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            startup_timeout_secs: 1200,
            poll_interval_ms: 1000,
            path: "/v1/completions".to_string(),
            request_timeout_ms: 5000,
        }
    }
}

impl HealthConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Process and port cleanup between topologies.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    /// Substrings matched against process names and command lines.
    pub process_patterns: Vec<String>,

    /// Ports whose listeners are killed.
    pub ports: Vec<u16>,

    /// Wait after signalling before re-checking.
    pub settle_ms: u64,

    /// Clear leftovers from earlier runs before the first topology.
    pub before_run: bool,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            process_patterns: vec![
                "pt_main_thread".to_string(),
                "vllm.entrypoints.openai.api_server".to_string(),
                "round_robin_proxy.py".to_string(),
                "disagg_prefill_proxy_server.py".to_string(),
            ],
            ports: vec![8000, 8100, 8200],
            settle_ms: 1000,
            before_run: true,
        }
    }
}

impl CleanupConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

/// Benchmark client invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchmarkConfig {
    /// Client entry point; per-run options are appended to `args`.
    pub command: CommandConfig,
    pub backend: String,
    pub dataset_name: String,
    pub dataset_path: PathBuf,
    pub input_len: u32,
    pub prefix_len: u32,
    pub output_len: u32,
    pub num_prompts: u32,

    /// Offered load levels, swept in order.
    pub qps_levels: Vec<f64>,

    /// Pause between levels so connections drain.
    pub pause_ms: u64,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            command: CommandConfig::new("python3", &["../benchmark_serving.py"]),
            backend: "vllm".to_string(),
            dataset_name: "sonnet".to_string(),
            dataset_path: PathBuf::from("../sonnet_4x.txt"),
            input_len: 1024,
            prefix_len: 50,
            output_len: 6,
            num_prompts: 200,
            qps_levels: vec![2.0, 4.0, 6.0, 8.0],
            pause_ms: 2000,
        }
    }
}

impl BenchmarkConfig {
    pub fn pause(&self) -> Duration {
        Duration::from_millis(self.pause_ms)
    }
}

/// Shared prompt corpus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorpusConfig {
    pub source: PathBuf,
    pub output: PathBuf,

    /// How many copies of `source` go into `output`.
    pub repeat: usize,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            source: PathBuf::from("../sonnet.txt"),
            output: PathBuf::from("../sonnet_4x.txt"),
            repeat: 4,
        }
    }
}

/// Hand-off to the plotting step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualizationConfig {
    pub enabled: bool,

    /// Plotting program. `{results_dir}` in an argument is replaced with the
    /// results directory; otherwise the directory is passed last.
    pub command: CommandConfig,
}

impl Default for VisualizationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: CommandConfig::new("python3", &["visualize_benchmark_results.py"]),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&data)?;
            Ok(config)
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(Config::default())
        }
    }

    /// Apply command-line overrides.
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(model) = &cli.model {
            self.model = model.clone();
        }
        if let Some(gpus) = cli.gpus {
            self.gpu_count = Some(gpus);
        }
        if let Some(qps) = &cli.qps {
            self.benchmark.qps_levels = qps.clone();
        }
        if let Some(output_len) = cli.output_len {
            self.benchmark.output_len = output_len;
        }
        if let Some(dir) = &cli.results_dir {
            self.results_dir = dir.clone();
        }
    }

    /// Every port a topology may bind: proxy and both servers.
    pub fn topology_ports(&self) -> [u16; 3] {
        [
            self.topology.proxy_port,
            self.topology.primary_port,
            self.topology.secondary_port,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.topology_ports(), [8000, 8100, 8200]);
        assert_eq!(cfg.cleanup.ports, vec![8000, 8100, 8200]);
        assert_eq!(cfg.health.startup_timeout(), Duration::from_secs(1200));
        assert_eq!(cfg.health.poll_interval(), Duration::from_secs(1));
        assert_eq!(cfg.benchmark.qps_levels, vec![2.0, 4.0, 6.0, 8.0]);
        assert_eq!(cfg.topology.disagg_tensor_parallel, 4);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let cfg: Config = serde_json::from_str(
            r#"{"gpu_count": 8, "benchmark": {"qps_levels": [1, 2.5]}}"#,
        )
        .unwrap();
        assert_eq!(cfg.gpu_count, Some(8));
        assert_eq!(cfg.benchmark.qps_levels, vec![1.0, 2.5]);
        assert_eq!(cfg.benchmark.num_prompts, 200);
        assert_eq!(cfg.topology.kv_port, 12345);
    }

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::parse_from([
            "pd-bench",
            "--gpus",
            "4",
            "--qps",
            "1,3",
            "--output-len",
            "12",
            "--model",
            "tiny",
        ]);
        let mut cfg = Config::default();
        cfg.apply_cli(&cli);
        assert_eq!(cfg.gpu_count, Some(4));
        assert_eq!(cfg.benchmark.qps_levels, vec![1.0, 3.0]);
        assert_eq!(cfg.benchmark.output_len, 12);
        assert_eq!(cfg.model, "tiny");
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let cfg = Config::load(std::path::Path::new("/nonexistent/pd-bench.json")).unwrap();
        assert_eq!(cfg.results_dir, PathBuf::from("results"));
    }
}
