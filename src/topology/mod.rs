//! Serving topologies under comparison.
//!
//! - [`launcher`]: builds the server specs for a topology and brings it up
//!
//! A [`Topology`] owns every process it started. Dropping it kills them, and
//! [`Topology::shutdown`] does the same explicitly.

pub mod launcher;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::gpu::Partition;
use crate::proxy::{ProxyHandle, ProxyLauncher, RoutingPolicy};
use crate::server::ServerProcess;

pub use launcher::TopologyLauncher;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopologyKind {
    /// Two identical replicas behind a round-robin proxy.
    ChunkedPrefill,
    /// Prefill producer plus decode consumer behind a KV-handoff proxy.
    DisaggPrefill,
}

impl TopologyKind {
    /// Run order of a full benchmark.
    pub const ALL: [TopologyKind; 2] = [TopologyKind::ChunkedPrefill, TopologyKind::DisaggPrefill];

    /// Tag used in artifact names.
    pub fn tag(&self) -> &'static str {
        match self {
            TopologyKind::ChunkedPrefill => "chunked_prefill",
            TopologyKind::DisaggPrefill => "disagg_prefill",
        }
    }

    pub fn policy(&self) -> RoutingPolicy {
        match self {
            TopologyKind::ChunkedPrefill => RoutingPolicy::RoundRobin,
            TopologyKind::DisaggPrefill => RoutingPolicy::PrefillDecode,
        }
    }
}

impl std::fmt::Display for TopologyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// A launched topology: two healthy servers and the proxy in front of them.
#[derive(Debug)]
pub struct Topology {
    kind: TopologyKind,
    partition: Partition,
    servers: Vec<ServerProcess>,
    proxy: ProxyHandle,
}

impl Topology {
    pub fn new(
        kind: TopologyKind,
        partition: Partition,
        servers: Vec<ServerProcess>,
        proxy: ProxyHandle,
    ) -> Self {
        Self {
            kind,
            partition,
            servers,
            proxy,
        }
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    /// Public port the benchmark client targets.
    pub fn proxy_port(&self) -> u16 {
        self.proxy.port
    }

    /// Stop the proxy, then every server.
    pub async fn shutdown(mut self, proxies: &dyn ProxyLauncher) {
        proxies.stop(&mut self.proxy).await;
        for server in &mut self.servers {
            server.kill().await;
        }
        info!(topology = %self.kind, "Topology stopped");
    }
}
