//! Topology launch template.
//!
//! Both topologies follow the same steps:
//! 1. Partition the GPU pool
//! 2. Build one server spec per half
//! 3. Start both servers and wait until both answer
//! 4. Start the proxy in front of them
//!
//! A failure at step 3 or 4 kills whatever was started and propagates.

use std::net::UdpSocket;
use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::gpu::{partition, Partition};
use crate::proxy::ProxyLauncher;
use crate::server::spec::{HOST_IP_ENV, KV_PORT_ENV, KV_ROLE_ENV};
use crate::server::{LifecycleManager, Role, ServerProcess, ServerSpec};
use crate::topology::{Topology, TopologyKind};

pub struct TopologyLauncher {
    lifecycle: Arc<LifecycleManager>,
    proxies: Arc<dyn ProxyLauncher>,
    config: Config,
    pool_size: usize,
    host_ip: String,
}

impl TopologyLauncher {
    pub fn new(
        config: &Config,
        pool_size: usize,
        lifecycle: Arc<LifecycleManager>,
        proxies: Arc<dyn ProxyLauncher>,
    ) -> Self {
        let host_ip = config
            .topology
            .host_ip
            .clone()
            .unwrap_or_else(detect_host_ip);

        Self {
            lifecycle,
            proxies,
            config: config.clone(),
            pool_size,
            host_ip,
        }
    }

    pub fn proxies(&self) -> &Arc<dyn ProxyLauncher> {
        &self.proxies
    }

    pub fn startup_timeout(&self) -> Duration {
        self.config.health.startup_timeout()
    }

    /// Partition the pool and build both server specs without launching.
    pub fn plan(&self, kind: TopologyKind) -> Result<(Partition, Vec<ServerSpec>)> {
        let partition = partition(self.pool_size)?;
        let topo = &self.config.topology;
        let max_model_len = self.config.engine.max_model_len;

        let halves = [
            (partition.primary.clone(), topo.primary_port),
            (partition.secondary.clone(), topo.secondary_port),
        ];

        let specs: Vec<ServerSpec> = match kind {
            TopologyKind::ChunkedPrefill => halves
                .into_iter()
                .map(|(gpus, port)| {
                    ServerSpec::new(Role::Replica, port, partition.half_size, gpus)
                        .option("max-model-len", max_model_len)
                        .option("gpu-memory-utilization", topo.replica_gpu_memory_utilization)
                        .flag("enable-chunked-prefill")
                        .flag("disable-log-stats")
                        .flag("disable-log-requests")
                })
                .collect(),
            TopologyKind::DisaggPrefill => [Role::Producer, Role::Consumer]
                .into_iter()
                .zip(halves)
                .map(|(role, (gpus, port))| {
                    if topo.disagg_tensor_parallel > gpus.devices().len() {
                        warn!(
                            %role,
                            tp = topo.disagg_tensor_parallel,
                            gpus = gpus.devices().len(),
                            "Tensor-parallel degree exceeds the device set"
                        );
                    }
                    let mut spec = ServerSpec::new(role, port, topo.disagg_tensor_parallel, gpus)
                        .option("max-model-len", max_model_len)
                        .option("gpu-memory-utilization", topo.disagg_gpu_memory_utilization)
                        .env(KV_PORT_ENV, topo.kv_port)
                        .env(HOST_IP_ENV, &self.host_ip);
                    if let Some(kv_role) = role.kv_role() {
                        spec = spec.env(KV_ROLE_ENV, kv_role);
                    }
                    spec
                })
                .collect(),
        };

        Ok((partition, specs))
    }

    /// Bring the topology up. Returns only once the proxy has been started.
    pub async fn launch(&self, kind: TopologyKind) -> Result<Topology> {
        let (partition, specs) = self.plan(kind)?;
        info!(topology = %kind, half_size = partition.half_size, "Launching topology");

        let mut servers: Vec<ServerProcess> = Vec::with_capacity(specs.len());
        for spec in specs {
            match self.lifecycle.start(spec) {
                Ok(process) => servers.push(process),
                Err(e) => {
                    abort(&mut servers).await;
                    return Err(e);
                }
            }
        }

        let timeout = self.startup_timeout();
        let waits = servers
            .iter_mut()
            .map(|server| self.lifecycle.await_healthy(server, timeout));
        let healthy = try_join_all(waits).await;
        if let Err(e) = healthy {
            warn!(topology = %kind, error = %e, "Launch aborted, stopping started servers");
            abort(&mut servers).await;
            return Err(e);
        }

        let ports: Vec<u16> = servers.iter().map(|s| s.port()).collect();
        let proxy = match self.proxies.start(kind.policy(), &ports).await {
            Ok(proxy) => proxy,
            Err(e) => {
                abort(&mut servers).await;
                return Err(e);
            }
        };

        info!(topology = %kind, port = proxy.port, "Topology up");
        Ok(Topology::new(kind, partition, servers, proxy))
    }
}

async fn abort(servers: &mut [ServerProcess]) {
    for server in servers {
        server.kill().await;
    }
}

/// First non-loopback address of this host, as peers would reach it.
///
/// Connecting a UDP socket sends nothing; it only selects a route.
fn detect_host_ip() -> String {
    UdpSocket::bind("0.0.0.0:0")
        .and_then(|sock| {
            sock.connect("8.8.8.8:80")?;
            sock.local_addr()
        })
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|_| "127.0.0.1".to_string())
}
