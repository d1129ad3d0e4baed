//! GPU pool discovery and partitioning.
//!
//! - [`device`]: discover how many GPUs the host exposes
//! - [`partition`]: split the pool into two disjoint device sets

pub mod device;
pub mod partition;

pub use partition::{partition, GpuSet, GpuSetName, Partition};
