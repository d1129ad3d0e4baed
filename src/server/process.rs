//! Per-server state machine.
//!
//! ```text
//! Unstarted -> Starting -> Healthy -> Terminated
//!                  |                      ^
//!                  +-> Failed ------------+
//! ```
//!
//! A [`ServerProcess`] owns its child process. Dropping it kills the child.

use serde::{Deserialize, Serialize};
use tokio::process::Child;
use tracing::info;

use crate::error::{OrchestratorError, Result};
use crate::server::spawn::{exit_status, kill_child};
use crate::server::spec::{Role, ServerSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerState {
    Unstarted,
    Starting,
    Healthy,
    Failed,
    Terminated,
}

impl ServerState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ServerState::Failed | ServerState::Terminated)
    }

    fn can_transition(self, to: ServerState) -> bool {
        use ServerState::*;
        matches!(
            (self, to),
            (Unstarted, Starting)
                | (Starting, Healthy)
                | (Starting, Failed)
                | (Unstarted | Starting | Healthy | Failed, Terminated)
        )
    }
}

/// Runtime handle bound to one [`ServerSpec`].
#[derive(Debug)]
pub struct ServerProcess {
    spec: ServerSpec,
    state: ServerState,
    child: Option<Child>,
    pid: Option<u32>,
}

impl ServerProcess {
    pub fn new(spec: ServerSpec) -> Self {
        Self {
            spec,
            state: ServerState::Unstarted,
            child: None,
            pid: None,
        }
    }

    /// Take ownership of a freshly spawned child and enter `Starting`.
    pub fn attach(&mut self, child: Child) -> Result<()> {
        self.transition(ServerState::Starting)?;
        self.pid = child.id();
        self.child = Some(child);
        Ok(())
    }

    pub fn transition(&mut self, to: ServerState) -> Result<()> {
        if !self.state.can_transition(to) {
            return Err(OrchestratorError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    pub fn spec(&self) -> &ServerSpec {
        &self.spec
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn role(&self) -> Role {
        self.spec.role
    }

    pub fn port(&self) -> u16 {
        self.spec.port
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// `Some(status)` once the child has exited.
    pub fn exit_status(&mut self) -> Option<String> {
        self.child.as_mut().and_then(exit_status)
    }

    /// Kill the child (and its process group) and enter `Terminated`.
    pub async fn kill(&mut self) {
        if self.state == ServerState::Terminated {
            return;
        }
        if let Some(mut child) = self.child.take() {
            kill_child(&mut child).await;
            info!(role = %self.spec.role, port = self.spec.port, pid = ?self.pid, "Server stopped");
        }
        self.state = ServerState::Terminated;
    }
}
