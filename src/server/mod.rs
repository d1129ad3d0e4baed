//! Serving-engine process management.
//!
//! - [`spec`]: ServerSpec, Role and command rendering
//! - [`spawn`]: spawning and killing child processes
//! - [`process`]: per-server state machine
//! - [`health`]: liveness probes
//! - [`reaper`]: host-wide process/port cleanup
//! - [`lifecycle`]: start / await_healthy / terminate_all

pub mod health;
pub mod lifecycle;
pub mod process;
pub mod reaper;
pub mod spawn;
pub mod spec;

pub use health::{HealthProbe, HttpProbe};
pub use lifecycle::LifecycleManager;
pub use process::{ServerProcess, ServerState};
pub use reaper::{CleanupReport, Reaper, SystemReaper};
pub use spawn::{LaunchCommand, Spawner, SystemSpawner};
pub use spec::{Role, ServerSpec};
