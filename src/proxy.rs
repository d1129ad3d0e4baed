//! Proxy processes fronting a topology's two servers.
//!
//! The routing itself (round-robin, or prefill on the producer then decode on
//! the consumer) lives in external programs. The orchestrator only starts
//! them, checks the public port, and stops them, through [`ProxyLauncher`] so
//! other policies can be plugged in.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Child;
use tracing::{info, warn};

use crate::config::{CommandConfig, TopologyConfig};
use crate::error::{OrchestratorError, Result};
use crate::server::health::HealthProbe;
use crate::server::spawn::{exit_status, kill_child, LaunchCommand, Spawner};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingPolicy {
    /// Alternate requests between two identical replicas.
    RoundRobin,
    /// Prefill on the producer, then decode on the consumer.
    PrefillDecode,
}

impl std::fmt::Display for RoutingPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoutingPolicy::RoundRobin => write!(f, "round-robin"),
            RoutingPolicy::PrefillDecode => write!(f, "prefill-decode"),
        }
    }
}

/// A running proxy. Dropping it kills the process.
#[derive(Debug)]
pub struct ProxyHandle {
    pub policy: RoutingPolicy,
    pub port: u16,
    pub backends: Vec<u16>,
    child: Option<Child>,
}

impl ProxyHandle {
    pub fn new(policy: RoutingPolicy, port: u16, backends: Vec<u16>, child: Option<Child>) -> Self {
        Self {
            policy,
            port,
            backends,
            child,
        }
    }

    pub fn is_running(&self) -> bool {
        self.child.is_some()
    }
}

#[async_trait]
pub trait ProxyLauncher: Send + Sync {
    async fn start(&self, policy: RoutingPolicy, backends: &[u16]) -> Result<ProxyHandle>;
    async fn is_healthy(&self, handle: &ProxyHandle) -> bool;
    async fn stop(&self, handle: &mut ProxyHandle);
}

/// Runs the configured proxy program for each policy.
pub struct CommandProxy {
    spawner: Arc<dyn Spawner>,
    probe: Arc<dyn HealthProbe>,
    config: TopologyConfig,
}

impl CommandProxy {
    pub fn new(spawner: Arc<dyn Spawner>, probe: Arc<dyn HealthProbe>, config: TopologyConfig) -> Self {
        Self {
            spawner,
            probe,
            config,
        }
    }

    pub fn command_for(&self, policy: RoutingPolicy) -> LaunchCommand {
        let command: &CommandConfig = match policy {
            RoutingPolicy::RoundRobin => &self.config.round_robin_proxy,
            RoutingPolicy::PrefillDecode => &self.config.disagg_proxy,
        };
        LaunchCommand::from_config(format!("proxy:{}", self.config.proxy_port), command)
    }
}

#[async_trait]
impl ProxyLauncher for CommandProxy {
    async fn start(&self, policy: RoutingPolicy, backends: &[u16]) -> Result<ProxyHandle> {
        let port = self.config.proxy_port;
        info!(%policy, port, ?backends, "Starting proxy");

        let mut child = self.spawner.spawn(&self.command_for(policy))?;
        tokio::time::sleep(self.config.proxy_settle()).await;

        if let Some(status) = exit_status(&mut child) {
            return Err(OrchestratorError::ProxyStartup {
                port,
                reason: format!("exited ({status})"),
            });
        }

        let handle = ProxyHandle::new(policy, port, backends.to_vec(), Some(child));
        if !self.is_healthy(&handle).await {
            warn!(port, "Proxy not answering after settle delay, continuing");
        }
        Ok(handle)
    }

    async fn is_healthy(&self, handle: &ProxyHandle) -> bool {
        handle.is_running() && self.probe.is_live(handle.port).await
    }

    async fn stop(&self, handle: &mut ProxyHandle) {
        if let Some(mut child) = handle.child.take() {
            kill_child(&mut child).await;
            info!(port = handle.port, policy = %handle.policy, backends = ?handle.backends, "Proxy stopped");
        }
    }
}
