//! Error types for the benchmark orchestrator.
//!
//! Failures below the topology boundary (a single QPS level, a lingering
//! process after cleanup) are contained by their callers; failures at the
//! topology boundary abort only that topology. Only [`OrchestratorError::InsufficientResources`]
//! and prerequisite errors abort the whole run.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::server::process::ServerState;
use crate::server::spec::Role;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("insufficient GPUs: need at least 2 devices, found {pool_size}")]
    InsufficientResources { pool_size: usize },

    #[error("{role} server on port {port} not healthy after {waited:?}")]
    ServerStartupTimeout {
        role: Role,
        port: u16,
        waited: Duration,
    },

    #[error("{role} server on port {port} exited during startup ({status})")]
    ServerExited {
        role: Role,
        port: u16,
        status: String,
    },

    #[error("benchmark client failed at qps {qps}: {reason}")]
    BenchmarkClientFailure { qps: f64, reason: String },

    #[error("cleanup could not release: {0}")]
    CleanupFailure(String),

    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid server state transition {from:?} -> {to:?}")]
    InvalidTransition { from: ServerState, to: ServerState },

    #[error("proxy failed to start on port {port}: {reason}")]
    ProxyStartup { port: u16, reason: String },

    #[error("refusing to reset results directory {path}: {reason}")]
    UnsafeResultsDir { path: PathBuf, reason: String },

    #[error("corpus source {0} not found")]
    Corpus(PathBuf),

    #[error("visualization step failed: {0}")]
    Visualization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl OrchestratorError {
    /// Whether this error means a server never became healthy.
    pub fn is_startup_failure(&self) -> bool {
        matches!(
            self,
            OrchestratorError::ServerStartupTimeout { .. }
                | OrchestratorError::ServerExited { .. }
                | OrchestratorError::ProxyStartup { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
