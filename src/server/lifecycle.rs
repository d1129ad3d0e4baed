//! Server lifecycle manager: start, health-wait, teardown.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, error, info};

use crate::config::{CleanupConfig, Config, EngineConfig};
use crate::error::{OrchestratorError, Result};
use crate::server::health::HealthProbe;
use crate::server::process::{ServerProcess, ServerState};
use crate::server::reaper::{CleanupReport, Reaper};
use crate::server::spawn::Spawner;
use crate::server::spec::ServerSpec;

/// Log a progress line every this many unsuccessful probes.
const PROGRESS_EVERY: u64 = 30;

pub struct LifecycleManager {
    spawner: Arc<dyn Spawner>,
    probe: Arc<dyn HealthProbe>,
    reaper: Arc<dyn Reaper>,
    engine: EngineConfig,
    model: String,
    poll_interval: Duration,
    cleanup: CleanupConfig,
}

impl LifecycleManager {
    pub fn new(
        config: &Config,
        spawner: Arc<dyn Spawner>,
        probe: Arc<dyn HealthProbe>,
        reaper: Arc<dyn Reaper>,
    ) -> Self {
        let mut cleanup = config.cleanup.clone();
        for port in config.topology_ports() {
            if !cleanup.ports.contains(&port) {
                cleanup.ports.push(port);
            }
        }

        Self {
            spawner,
            probe,
            reaper,
            engine: config.engine.clone(),
            model: config.model.clone(),
            poll_interval: config.health.poll_interval(),
            cleanup,
        }
    }

    /// Launch the engine for `spec`. Returns immediately in `Starting`.
    pub fn start(&self, spec: ServerSpec) -> Result<ServerProcess> {
        let command = spec.command(&self.engine, &self.model);
        info!(
            role = %spec.role,
            port = spec.port,
            tp = spec.tensor_parallel,
            gpu_set = %spec.gpu_set.name(),
            gpus = %spec.gpu_set.visible_devices(),
            "Starting server"
        );

        let mut process = ServerProcess::new(spec);
        let child = self.spawner.spawn(&command)?;
        process.attach(child)?;
        Ok(process)
    }

    /// Poll the server until it answers or `timeout` elapses.
    ///
    /// Fails no earlier than `timeout` unless the process exits first. A
    /// process already in a terminal state is not probed.
    pub async fn await_healthy(&self, process: &mut ServerProcess, timeout: Duration) -> Result<()> {
        match process.state() {
            ServerState::Healthy => return Ok(()),
            ServerState::Starting => {}
            from => {
                return Err(OrchestratorError::InvalidTransition {
                    from,
                    to: ServerState::Healthy,
                })
            }
        }

        let role = process.role();
        let port = process.port();
        let start = Instant::now();
        let mut polls: u64 = 0;

        loop {
            if let Some(status) = process.exit_status() {
                process.transition(ServerState::Failed)?;
                error!(%role, port, %status, "Server exited before becoming healthy");
                return Err(OrchestratorError::ServerExited { role, port, status });
            }

            polls += 1;
            if self.probe.is_live(port).await {
                process.transition(ServerState::Healthy)?;
                info!(%role, port, polls, elapsed = ?start.elapsed(), "Server healthy");
                return Ok(());
            }

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                process.transition(ServerState::Failed)?;
                error!(%role, port, waited = ?elapsed, "Server startup timed out");
                return Err(OrchestratorError::ServerStartupTimeout {
                    role,
                    port,
                    waited: elapsed,
                });
            }
            if polls % PROGRESS_EVERY == 0 {
                info!(%role, port, elapsed = ?elapsed, "Waiting for server");
            } else {
                debug!(%role, port, polls, "Server not answering yet");
            }

            sleep(self.poll_interval.min(timeout - elapsed)).await;
        }
    }

    /// Kill every engine-like process and every listener on the known ports.
    ///
    /// Safe to call when nothing is running. Lingering processes are logged
    /// and reported, never returned as an error.
    pub async fn terminate_all(&self) -> CleanupReport {
        info!(ports = ?self.cleanup.ports, "Terminating all serving processes");
        let report = self
            .reaper
            .reap(
                &self.cleanup.process_patterns,
                &self.cleanup.ports,
                self.cleanup.settle(),
            )
            .await;
        if let Some(failure) = report.failure() {
            error!(error = %failure, "Cleanup incomplete; next topology may see busy GPUs or ports");
        }
        report
    }
}
