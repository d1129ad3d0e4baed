//! Deterministic split of a GPU pool into two contiguous device sets.
//!
//! Both topologies under test consume the whole pool, one half per server.
//! Repeated runs must see the same assignment, so the split depends only on
//! the pool size.

use serde::{Deserialize, Serialize};

use crate::error::{OrchestratorError, Result};

/// Which half of the pool a set covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpuSetName {
    Primary,
    Secondary,
}

impl std::fmt::Display for GpuSetName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GpuSetName::Primary => write!(f, "primary"),
            GpuSetName::Secondary => write!(f, "secondary"),
        }
    }
}

/// An ordered, immutable set of device indices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuSet {
    name: GpuSetName,
    devices: Vec<usize>,
}

impl GpuSet {
    fn new(name: GpuSetName, devices: Vec<usize>) -> Self {
        Self { name, devices }
    }

    pub fn name(&self) -> GpuSetName {
        self.name
    }

    pub fn devices(&self) -> &[usize] {
        &self.devices
    }

    /// Render as a device-visibility list, e.g. `"0,1,2,3"`.
    pub fn visible_devices(&self) -> String {
        self.devices
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Result of splitting a pool of `N` devices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    /// `floor(N / 2)`.
    pub half_size: usize,
    pub primary: GpuSet,
    pub secondary: GpuSet,
}

/// Split `0..pool_size` into `[0, half)` and `[half, pool_size)`.
///
/// An odd pool gives the secondary set the extra device.
pub fn partition(pool_size: usize) -> Result<Partition> {
    if pool_size < 2 {
        return Err(OrchestratorError::InsufficientResources { pool_size });
    }

    let half_size = pool_size / 2;
    Ok(Partition {
        half_size,
        primary: GpuSet::new(GpuSetName::Primary, (0..half_size).collect()),
        secondary: GpuSet::new(GpuSetName::Secondary, (half_size..pool_size).collect()),
    })
}
