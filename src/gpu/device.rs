//! GPU device discovery.
//!
//! Queries `nvidia-smi` for the devices visible to this host. The pool size
//! can be pinned in the configuration instead, which skips discovery.

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Information about a single GPU device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuDeviceInfo {
    /// Device index.
    pub id: usize,

    /// Device name (e.g., "NVIDIA H100 80GB HBM3").
    pub name: String,

    /// Total memory in MiB, if reported.
    pub total_memory_mib: Option<u64>,
}

/// Parse `nvidia-smi --query-gpu=index,name,memory.total --format=csv,noheader,nounits`.
pub fn parse_device_list(output: &str) -> Vec<GpuDeviceInfo> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split(',').map(str::trim);
            let id = fields.next()?.parse().ok()?;
            let name = fields.next().unwrap_or_default().to_string();
            let total_memory_mib = fields.next().and_then(|m| m.parse().ok());
            Some(GpuDeviceInfo {
                id,
                name,
                total_memory_mib,
            })
        })
        .collect()
}

/// Detect all available GPU devices.
///
/// Returns an empty list when `nvidia-smi` is missing or fails, which the
/// partitioner then rejects as an insufficient pool.
pub async fn detect_devices() -> Vec<GpuDeviceInfo> {
    let output = Command::new("nvidia-smi")
        .args([
            "--query-gpu=index,name,memory.total",
            "--format=csv,noheader,nounits",
        ])
        .output()
        .await;

    match output {
        Ok(out) if out.status.success() => {
            let devices = parse_device_list(&String::from_utf8_lossy(&out.stdout));
            for dev in &devices {
                debug!(id = dev.id, name = %dev.name, memory_mib = ?dev.total_memory_mib, "GPU");
            }
            info!(count = devices.len(), "Detected GPUs");
            devices
        }
        Ok(out) => {
            warn!(status = %out.status, "nvidia-smi failed, assuming no GPUs");
            Vec::new()
        }
        Err(e) => {
            warn!(error = %e, "nvidia-smi not available, assuming no GPUs");
            Vec::new()
        }
    }
}

/// Resolve the pool size: the configured override wins over discovery.
pub async fn pool_size(configured: Option<usize>) -> usize {
    match configured {
        Some(n) => {
            info!(count = n, "Using configured GPU count");
            n
        }
        None => detect_devices().await.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_device_list() {
        let out = "0, NVIDIA H100 80GB HBM3, 81559\n1, NVIDIA H100 80GB HBM3, 81559\n\n";
        let devices = parse_device_list(out);
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[1].id, 1);
        assert_eq!(devices[0].name, "NVIDIA H100 80GB HBM3");
        assert_eq!(devices[0].total_memory_mib, Some(81559));
    }

    #[test]
    fn test_parse_skips_garbage() {
        let out = "No devices were found\n";
        assert!(parse_device_list(out).is_empty());
    }

    #[tokio::test]
    async fn test_configured_pool_size_wins() {
        assert_eq!(pool_size(Some(8)).await, 8);
    }
}
