//! Power control capability
//!
//! The agent requests a restart after a successfully installed bundle when
//! configured to. The operation sits behind a trait so hosting programs and
//! tests can substitute their own handling.

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::errors::AgentError;

/// Host power operations requested after a successful update.
#[async_trait]
pub trait PowerControl: Send + Sync {
    /// Flush filesystem buffers.
    async fn sync_disks(&self);

    /// Request an immediate system restart.
    async fn reboot(&self) -> Result<(), AgentError>;
}

/// Shells out to the host `sync` and `reboot` binaries.
pub struct SystemPower;

#[async_trait]
impl PowerControl for SystemPower {
    async fn sync_disks(&self) {
        if let Err(e) = Command::new("sync").status().await {
            debug!("sync failed: {}", e);
        }
    }

    async fn reboot(&self) -> Result<(), AgentError> {
        let status = Command::new("reboot").status().await?;
        if !status.success() {
            return Err(AgentError::Internal(format!(
                "reboot exited with {}",
                status
            )));
        }
        Ok(())
    }
}
