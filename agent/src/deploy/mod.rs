//! Deployment workflow
//!
//! Turns a poll response advertising a `deploymentBase` link into a running
//! download, verifies the artifact and hands it to the installer.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::app::state::AgentState;
use crate::ddi::feedback::{Feedback, Finished};
use crate::ddi::models::{DeploymentResource, PollResponse};
use crate::errors::AgentError;
use crate::installer::{InstallOutcome, InstallRequest, InstallerEvent};
use crate::system::disk;

const PARSE_FAILURE: &str = "Failed to parse deployment resource.";
const BASE_PARSE_FAILURE: &str = "Failed to parse deployment base response.";

/// One downloadable software artifact, as advertised by the server.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub name: String,
    pub version: String,
    pub size: u64,
    pub sha1: String,
    pub download_url: String,
    pub feedback_url: String,
}

/// Process a poll response carrying a deployment link.
///
/// Validates the deployment, checks disk space and starts the download
/// worker. Control returns to the poll loop right after the spawn.
pub async fn process_deployment(
    state: &Arc<AgentState>,
    poll: &PollResponse,
) -> Result<(), AgentError> {
    if let Some(current) = state.current_action() {
        return Err(AgentError::AlreadyInProgress(current));
    }

    let href = poll
        .links
        .deployment_base
        .as_ref()
        .map(|link| link.href.as_str())
        .ok_or_else(|| AgentError::ResponseParse(BASE_PARSE_FAILURE.to_string()))?;

    let resource = state.client.get_deployment(href).await?;

    let action_id = resource
        .id
        .clone()
        .ok_or_else(|| AgentError::ResponseParse(BASE_PARSE_FAILURE.to_string()))?;
    state.begin_action(&action_id)?;

    let feedback_url = state.client.feedback_url(&action_id);

    let artifact = match select_artifact(&resource, feedback_url.clone()) {
        Ok(artifact) => artifact,
        Err(err) => {
            report_failure(state, &feedback_url, &action_id, PARSE_FAILURE).await;
            teardown(state).await;
            return Err(err);
        }
    };

    info!(
        "New software ready for download. (Name: {}, Version: {}, Size: {}, URL: {})",
        artifact.name, artifact.version, artifact.size, artifact.download_url
    );

    let available = match disk::free_bytes(&state.settings.bundle_download_location) {
        Ok(available) => available,
        Err(err) => {
            report_failure(state, &feedback_url, &action_id, &err.to_string()).await;
            teardown(state).await;
            return Err(err);
        }
    };

    if available < artifact.size {
        let err = AgentError::NoSpace {
            needed: artifact.size,
            available,
        };
        debug!("{}", err);
        report_failure(state, &feedback_url, &action_id, &err.to_string()).await;
        teardown(state).await;
        return Err(err);
    }

    // At most one download worker exists; join a finished predecessor before
    // spawning the next one.
    if let Some(previous) = state.take_worker() {
        let _ = previous.await;
    }

    let worker_state = state.clone();
    let handle = tokio::spawn(async move {
        download_worker(worker_state, artifact).await;
    });
    state.stash_worker(handle);

    Ok(())
}

fn select_artifact(
    resource: &DeploymentResource,
    feedback_url: String,
) -> Result<Artifact, AgentError> {
    let chunks = &resource.deployment.chunks;
    let chunk = chunks
        .first()
        .ok_or_else(|| AgentError::ResponseParse(PARSE_FAILURE.to_string()))?;
    if chunks.len() > 1 {
        warn!(
            "Deployment has {} chunks; only the first is processed.",
            chunks.len()
        );
    }

    let artifacts = &chunk.artifacts;
    let artifact = artifacts
        .first()
        .ok_or_else(|| AgentError::ResponseParse(PARSE_FAILURE.to_string()))?;
    if artifacts.len() > 1 {
        warn!(
            "Chunk has {} artifacts; only the first is processed.",
            artifacts.len()
        );
    }

    let size = artifact
        .size
        .ok_or_else(|| AgentError::ResponseParse(PARSE_FAILURE.to_string()))?;
    let sha1 = artifact
        .hashes
        .sha1
        .clone()
        .ok_or_else(|| AgentError::ResponseParse(PARSE_FAILURE.to_string()))?;
    let download_url = artifact
        .links
        .preferred()
        .map(str::to_string)
        .ok_or_else(|| AgentError::ResponseParse(PARSE_FAILURE.to_string()))?;

    Ok(Artifact {
        name: chunk.name.clone().unwrap_or_else(|| "unknown".to_string()),
        version: chunk
            .version
            .clone()
            .unwrap_or_else(|| "unknown".to_string()),
        size,
        sha1,
        download_url,
        feedback_url,
    })
}

/// Background download worker. Exactly one runs at a time.
async fn download_worker(state: Arc<AgentState>, artifact: Artifact) {
    let Some(action_id) = state.current_action() else {
        return;
    };
    let bundle = state.settings.bundle_download_location.clone();

    info!("Start downloading: {}", artifact.download_url);

    let outcome = match state
        .client
        .download(&artifact.download_url, &bundle, artifact.size)
        .await
    {
        Ok(outcome) => outcome,
        Err(err) => {
            let msg = format!("Download failed: {}", err);
            error!("{}", msg);
            report_failure(&state, &artifact.feedback_url, &action_id, &msg).await;
            teardown(&state).await;
            return;
        }
    };

    let msg = format!(
        "Download complete. {:.2} MB/s",
        outcome.bytes_per_sec / (1024.0 * 1024.0)
    );
    report_progress(&state, &artifact.feedback_url, &action_id, &msg).await;
    info!("{}", msg);

    if outcome.sha1_hex != artifact.sha1 {
        let err = AgentError::Checksum {
            computed: outcome.sha1_hex,
            expected: artifact.sha1,
        };
        let msg = format!("Software: {} V{}. {}", artifact.name, artifact.version, err);
        report_failure(&state, &artifact.feedback_url, &action_id, &msg).await;
        error!("{}", msg);
        teardown(&state).await;
        return;
    }

    info!("File checksum OK.");
    report_progress(&state, &artifact.feedback_url, &action_id, "File checksum OK.").await;

    let request = InstallRequest::new(bundle, state.events());
    state.installer.bundle_ready(request).await;
}

/// Route an installer event arriving on the main loop.
pub async fn handle_installer_event(state: &Arc<AgentState>, event: InstallerEvent) {
    match event {
        InstallerEvent::Progress(message) => {
            if let Some(action_id) = state.current_action() {
                let url = state.client.feedback_url(&action_id);
                report_progress(state, &url, &action_id, &message).await;
            }
        }
        InstallerEvent::Complete(outcome) => install_complete(state, outcome).await,
    }
}

/// Terminal handling for an installation result.
pub async fn install_complete(state: &Arc<AgentState>, outcome: InstallOutcome) {
    let Some(action_id) = state.current_action() else {
        debug!("Install completion without a live deployment, ignoring");
        return;
    };
    let url = state.client.feedback_url(&action_id);

    match outcome {
        InstallOutcome::Success => {
            info!("Software bundle installed successful.");
            let feedback = Feedback::terminal(
                &action_id,
                Finished::Success,
                "Software bundle installed successful.",
            );
            if let Err(err) = state.client.post_feedback(&url, &feedback).await {
                warn!("{}", err);
            }
            teardown(state).await;

            if state.settings.post_update_reboot {
                state.power.sync_disks().await;
                if let Err(err) = state.power.reboot().await {
                    error!("Failed to reboot: {}", err);
                }
            }
        }
        InstallOutcome::Failure => {
            error!("Failed to install software bundle.");
            let feedback = Feedback::terminal(
                &action_id,
                Finished::Failure,
                "Failed to install software bundle.",
            );
            if let Err(err) = state.client.post_feedback(&url, &feedback).await {
                warn!("{}", err);
            }
            teardown(state).await;
        }
    }
}

async fn report_progress(state: &AgentState, url: &str, action_id: &str, detail: &str) {
    let feedback = Feedback::progress(action_id, detail);
    if let Err(err) = state.client.post_feedback(url, &feedback).await {
        warn!("{}", err);
    }
}

async fn report_failure(state: &AgentState, url: &str, action_id: &str, detail: &str) {
    let feedback = Feedback::terminal(action_id, Finished::Failure, detail);
    if let Err(err) = state.client.post_feedback(url, &feedback).await {
        warn!("{}", err);
    }
}

/// Clear the live deployment and delete the bundle file if present.
async fn teardown(state: &AgentState) {
    state.clear_action();

    let bundle = &state.settings.bundle_download_location;
    match tokio::fs::remove_file(bundle).await {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => debug!("Failed to delete file: {}: {}", bundle.display(), err),
    }
}
