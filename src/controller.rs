//! Run controller: the top-level benchmark sequence.
//!
//! ```text
//! corpus -> reset results -> [launch -> sweep -> terminate_all] x topology -> visualize
//! ```
//!
//! Topologies run strictly one after another and every topology ends with a
//! host-wide teardown, whether it launched or not, so no two topologies ever
//! hold the GPU pool at once.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::bench::{corpus, BenchmarkClient, CommandBenchmarkClient, SweepDriver};
use crate::config::Config;
use crate::error::{OrchestratorError, Result};
use crate::gpu::partition;
use crate::proxy::{CommandProxy, ProxyLauncher};
use crate::report::{LaunchStatus, RunSummary, TopologyReport};
use crate::server::{
    HealthProbe, HttpProbe, LifecycleManager, Reaper, Spawner, SystemReaper, SystemSpawner,
};
use crate::topology::{TopologyKind, TopologyLauncher};
use crate::visualize::{CommandVisualizer, Visualizer};

/// External capabilities the controller drives.
#[derive(Clone)]
pub struct Collaborators {
    pub spawner: Arc<dyn Spawner>,
    pub probe: Arc<dyn HealthProbe>,
    pub reaper: Arc<dyn Reaper>,
    pub proxies: Arc<dyn ProxyLauncher>,
    pub client: Arc<dyn BenchmarkClient>,
    pub visualizer: Arc<dyn Visualizer>,
}

impl Collaborators {
    /// Real processes, HTTP probes and procfs cleanup.
    pub fn system(config: &Config) -> Self {
        let spawner: Arc<dyn Spawner> = Arc::new(SystemSpawner);
        let probe: Arc<dyn HealthProbe> = Arc::new(HttpProbe::new(
            config.engine.host.clone(),
            config.health.path.clone(),
            config.health.request_timeout(),
        ));

        Self {
            proxies: Arc::new(CommandProxy::new(
                spawner.clone(),
                probe.clone(),
                config.topology.clone(),
            )),
            spawner,
            probe,
            reaper: Arc::new(SystemReaper),
            client: Arc::new(CommandBenchmarkClient::new(config.benchmark.clone())),
            visualizer: Arc::new(CommandVisualizer::new(config.visualization.command.clone())),
        }
    }
}

pub struct RunController {
    config: Config,
    run_id: Uuid,
    pool_size: usize,
    lifecycle: Arc<LifecycleManager>,
    launcher: TopologyLauncher,
    sweep: SweepDriver,
    visualizer: Arc<dyn Visualizer>,
}

impl RunController {
    pub fn new(config: Config, pool_size: usize, collaborators: Collaborators) -> Self {
        let lifecycle = Arc::new(LifecycleManager::new(
            &config,
            collaborators.spawner,
            collaborators.probe,
            collaborators.reaper,
        ));
        let launcher = TopologyLauncher::new(
            &config,
            pool_size,
            lifecycle.clone(),
            collaborators.proxies,
        );
        let sweep = SweepDriver::new(
            collaborators.client,
            config.results_dir.clone(),
            config.model.clone(),
            config.benchmark.pause(),
        );

        Self {
            config,
            run_id: Uuid::new_v4(),
            pool_size,
            lifecycle,
            launcher,
            sweep,
            visualizer: collaborators.visualizer,
        }
    }

    pub fn launcher(&self) -> &TopologyLauncher {
        &self.launcher
    }

    /// Run both topologies and hand results to the visualizer.
    ///
    /// Errors only for run-wide problems (too few GPUs, missing corpus,
    /// unusable results directory). Per-topology failures land in the summary.
    pub async fn run(&self) -> Result<RunSummary> {
        let partition = partition(self.pool_size)?;
        info!(
            run_id = %self.run_id,
            pool_size = self.pool_size,
            primary = %partition.primary.visible_devices(),
            secondary = %partition.secondary.visible_devices(),
            "Starting benchmark run"
        );

        corpus::prepare(&self.config.corpus).await?;
        let protected = [&self.config.corpus.source, &self.config.corpus.output];
        reset_results_dir(&self.config.results_dir, &protected).await?;

        if self.config.cleanup.before_run {
            self.lifecycle.terminate_all().await;
        }

        let mut topologies = Vec::with_capacity(TopologyKind::ALL.len());
        for kind in TopologyKind::ALL {
            topologies.push(self.run_topology(kind).await);
        }

        let visualization_error = if self.config.visualization.enabled {
            match self.visualizer.render(&self.config.results_dir).await {
                Ok(()) => None,
                Err(e) => {
                    warn!(error = %e, "Visualization failed");
                    Some(e.to_string())
                }
            }
        } else {
            None
        };

        let summary = RunSummary {
            run_id: self.run_id,
            pool_size: self.pool_size,
            topologies,
            visualization_error,
        };
        summary.log();
        match summary.write(&self.config.results_dir).await {
            Ok(path) => info!(path = %path.display(), "Summary written"),
            Err(e) => warn!(error = %e, "Could not write summary"),
        }

        Ok(summary)
    }

    /// Launch, sweep, and always tear down.
    async fn run_topology(&self, kind: TopologyKind) -> TopologyReport {
        let bench = &self.config.benchmark;

        let (launch, partition, levels) = match self.launcher.launch(kind).await {
            Ok(topology) => {
                let partition = topology.partition().clone();
                let levels = self
                    .sweep
                    .run_sweep(kind.tag(), &bench.qps_levels, bench.output_len, topology.proxy_port())
                    .await;
                topology.shutdown(self.launcher.proxies().as_ref()).await;
                (LaunchStatus::Healthy, Some(partition), levels)
            }
            Err(e) => {
                error!(topology = %kind, error = %e, "Skipping sweep");
                (LaunchStatus::Failed(e.to_string()), None, Vec::new())
            }
        };

        let cleanup = self.lifecycle.terminate_all().await;

        TopologyReport {
            kind,
            launch,
            partition,
            levels,
            cleanup,
        }
    }
}

/// Remove then recreate, so each run starts from an empty artifact set.
///
/// Refuses a directory that contains the working directory or any of the
/// `protected` files.
async fn reset_results_dir(dir: &Path, protected: &[&PathBuf]) -> Result<()> {
    if dir.exists() {
        let canonical = tokio::fs::canonicalize(dir).await?;
        let cwd = tokio::fs::canonicalize(std::env::current_dir()?).await?;
        let mut keep = Vec::with_capacity(protected.len());
        for path in protected {
            if let Ok(path) = tokio::fs::canonicalize(path).await {
                keep.push(path);
            }
        }
        check_results_dir(&canonical, &cwd, &keep).map_err(|reason| {
            OrchestratorError::UnsafeResultsDir {
                path: dir.to_path_buf(),
                reason,
            }
        })?;
        tokio::fs::remove_dir_all(dir).await?;
    }
    tokio::fs::create_dir_all(dir).await?;
    info!(dir = %dir.display(), "Results directory reset");
    Ok(())
}

/// All paths are expected in canonical form.
fn check_results_dir(dir: &Path, cwd: &Path, protected: &[PathBuf]) -> std::result::Result<(), String> {
    if cwd.starts_with(dir) {
        return Err(format!("it contains the working directory {}", cwd.display()));
    }
    if let Some(path) = protected.iter().find(|p| p.starts_with(dir)) {
        return Err(format!("it contains {}", path.display()));
    }
    Ok(())
}
