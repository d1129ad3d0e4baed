//! Server launch specifications.
//!
//! A [`ServerSpec`] is everything needed to start one serving-engine process:
//! its role, port, device set and startup options. Specs are built by the
//! topology launchers and rendered into a [`LaunchCommand`] here.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::gpu::GpuSet;
use crate::server::spawn::LaunchCommand;

/// Environment variable restricting device visibility.
pub const VISIBLE_DEVICES_ENV: &str = "CUDA_VISIBLE_DEVICES";
/// Environment variable naming the distributed KV role.
pub const KV_ROLE_ENV: &str = "VLLM_DISTRIBUTED_KV_ROLE";
/// Environment variable carrying the producer/consumer rendezvous port.
pub const KV_PORT_ENV: &str = "VLLM_PORT";
/// Environment variable carrying the address producer and consumer advertise.
pub const HOST_IP_ENV: &str = "VLLM_HOST_IP";

/// What a server does within its topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Independent full replica (chunked prefill).
    Replica,
    /// Runs prefill and hands the KV cache off.
    Producer,
    /// Receives the KV cache and decodes.
    Consumer,
}

impl Role {
    /// Value of the distributed KV role, for disaggregated roles only.
    pub fn kv_role(&self) -> Option<&'static str> {
        match self {
            Role::Replica => None,
            Role::Producer => Some("producer"),
            Role::Consumer => Some("consumer"),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Replica => write!(f, "replica"),
            Role::Producer => write!(f, "producer"),
            Role::Consumer => write!(f, "consumer"),
        }
    }
}

/// Launch parameters for one engine process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSpec {
    pub role: Role,
    pub port: u16,
    pub tensor_parallel: usize,
    pub gpu_set: GpuSet,

    /// Engine options without leading dashes; `None` renders a bare flag.
    pub options: BTreeMap<String, Option<String>>,

    /// Environment-scoped values (KV role, rendezvous port, ...).
    pub env: BTreeMap<String, String>,
}

impl ServerSpec {
    pub fn new(role: Role, port: u16, tensor_parallel: usize, gpu_set: GpuSet) -> Self {
        Self {
            role,
            port,
            tensor_parallel,
            gpu_set,
            options: BTreeMap::new(),
            env: BTreeMap::new(),
        }
    }

    /// Add a `--key value` option.
    pub fn option(mut self, key: &str, value: impl ToString) -> Self {
        self.options.insert(key.to_string(), Some(value.to_string()));
        self
    }

    /// Add a bare `--key` flag.
    pub fn flag(mut self, key: &str) -> Self {
        self.options.insert(key.to_string(), None);
        self
    }

    pub fn env(mut self, key: &str, value: impl ToString) -> Self {
        self.env.insert(key.to_string(), value.to_string());
        self
    }

    /// Render the engine command line and environment for this spec.
    pub fn command(&self, engine: &EngineConfig, model: &str) -> LaunchCommand {
        let mut args = engine.command.args.clone();
        args.extend([
            "--model".to_string(),
            model.to_string(),
            "--port".to_string(),
            self.port.to_string(),
            "--tensor-parallel-size".to_string(),
            self.tensor_parallel.to_string(),
        ]);
        for (key, value) in &self.options {
            args.push(format!("--{key}"));
            if let Some(value) = value {
                args.push(value.clone());
            }
        }

        let mut env = engine.env.clone();
        env.extend(self.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        env.insert(VISIBLE_DEVICES_ENV.to_string(), self.gpu_set.visible_devices());

        LaunchCommand {
            label: format!("{}:{}", self.role, self.port),
            program: engine.command.program.clone(),
            args,
            env,
        }
    }
}
