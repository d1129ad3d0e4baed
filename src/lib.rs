//! pd-bench: compare chunked-prefill and disaggregated-prefill LLM serving.
//!
//! Splits the host's GPUs into two halves, brings up one serving topology at
//! a time (two engine processes plus a proxy), sweeps a benchmark client over
//! a list of QPS levels, tears everything down, and moves on to the next
//! topology. Result artifacts land in one directory for a plotting step.

pub mod bench;
pub mod config;
pub mod controller;
pub mod error;
pub mod gpu;
pub mod proxy;
pub mod report;
pub mod server;
pub mod topology;
pub mod visualize;

pub use controller::{Collaborators, RunController};
pub use error::{OrchestratorError, Result};
