//! Installer boundary
//!
//! The agent downloads and verifies a bundle; installing it is the hosting
//! program's job. The host registers an [`Installer`] at init and receives
//! an [`InstallRequest`] once a bundle is on disk with a verified checksum.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Outcome reported by the installer once it has finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    Success,
    Failure,
}

/// Messages flowing from the installer back to the agent main loop.
#[derive(Debug)]
pub enum InstallerEvent {
    /// Free-form progress line forwarded to the server
    Progress(String),

    /// The installation finished
    Complete(InstallOutcome),
}

/// Handle forwarding installer progress lines to the server.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    tx: mpsc::UnboundedSender<InstallerEvent>,
}

impl ProgressReporter {
    pub fn report(&self, message: impl Into<String>) {
        let _ = self.tx.send(InstallerEvent::Progress(message.into()));
    }
}

/// One-shot handle the installer uses to report its final outcome.
#[derive(Debug)]
pub struct CompletionHandle {
    tx: mpsc::UnboundedSender<InstallerEvent>,
}

impl CompletionHandle {
    pub fn complete(self, outcome: InstallOutcome) {
        let _ = self.tx.send(InstallerEvent::Complete(outcome));
    }
}

/// Everything the installer needs to take over a verified bundle.
#[derive(Debug)]
pub struct InstallRequest {
    /// Path of the downloaded, checksum-verified bundle
    pub bundle: PathBuf,

    pub progress: ProgressReporter,

    pub completion: CompletionHandle,
}

impl InstallRequest {
    pub(crate) fn new(bundle: PathBuf, tx: &mpsc::UnboundedSender<InstallerEvent>) -> Self {
        Self {
            bundle,
            progress: ProgressReporter { tx: tx.clone() },
            completion: CompletionHandle { tx: tx.clone() },
        }
    }
}

/// Scheduler for bundle installations, registered by the hosting program.
#[async_trait]
pub trait Installer: Send + Sync {
    /// Called once a verified bundle is ready at `request.bundle`.
    async fn bundle_ready(&self, request: InstallRequest);
}

/// Reference installer: hands the bundle path to a configured command and
/// maps its exit status to the install outcome.
pub struct ExecInstaller {
    command: String,
}

impl ExecInstaller {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl Installer for ExecInstaller {
    async fn bundle_ready(&self, request: InstallRequest) {
        let mut parts = self.command.split_whitespace();
        let Some(program) = parts.next() else {
            debug!("No install command configured");
            request.completion.complete(InstallOutcome::Failure);
            return;
        };

        info!(
            "Installing {} via `{}`",
            request.bundle.display(),
            self.command
        );
        request
            .progress
            .report(format!("Installing {}.", request.bundle.display()));

        let status = Command::new(program)
            .args(parts)
            .arg(&request.bundle)
            .status()
            .await;

        match status {
            Ok(status) if status.success() => {
                request.completion.complete(InstallOutcome::Success);
            }
            Ok(status) => {
                debug!("Installer exited with {}", status);
                request.completion.complete(InstallOutcome::Failure);
            }
            Err(e) => {
                debug!("Failed to spawn installer: {}", e);
                request.completion.complete(InstallOutcome::Failure);
            }
        }
    }
}
