//! Polling worker driving the DDI state machine

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::app::state::AgentState;
use crate::ddi::feedback::Feedback;
use crate::deploy;
use crate::errors::AgentError;
use crate::installer::InstallerEvent;

/// Poller worker options
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Quit after the first poll cycle
    pub run_once: bool,
}

/// Run the poller: a one second tick that hits the controller base resource
/// every `interval` seconds and routes the response. Installer events are
/// drained on the same loop, which keeps terminal reporting on the main
/// thread of control.
pub async fn run(
    state: Arc<AgentState>,
    options: &Options,
    mut events: mpsc::UnboundedReceiver<InstallerEvent>,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) -> Result<(), AgentError> {
    info!("Poller worker starting...");

    let retry_wait = state.settings.retry_wait_secs;
    let mut interval_secs = retry_wait;
    // Start saturated so the first tick polls immediately.
    let mut last_run_secs = retry_wait;

    let mut tick = tokio::time::interval(Duration::from_secs(1));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Poller worker shutting down...");
                return Ok(());
            }
            Some(event) = events.recv() => {
                deploy::handle_installer_event(&state, event).await;
            }
            _ = tick.tick() => {
                last_run_secs += 1;
                if last_run_secs < interval_secs {
                    continue;
                }
                last_run_secs = 0;

                let result = poll_cycle(&state, &mut interval_secs).await;
                if options.run_once {
                    return result;
                }
            }
        }
    }
}

/// One scheduled interaction with the controller base resource.
///
/// Failures never terminate the long-running agent; they reset the cadence
/// to the configured retry wait. The result reflects the base poll only.
pub async fn poll_cycle(
    state: &Arc<AgentState>,
    interval_secs: &mut u64,
) -> Result<(), AgentError> {
    let settings = &state.settings;

    info!("Checking for new software...");
    let response = match state.client.poll_base().await {
        Ok(response) => response,
        Err(err) => {
            if err.http_status() == Some(401) {
                if settings.auth_token.is_some() {
                    warn!("Failed to authenticate. Check if auth_token is correct?");
                }
                if settings.gateway_token.is_some() {
                    warn!("Failed to authenticate. Check if gateway_token is correct?");
                }
            } else {
                warn!("Scheduled check for new software failed: {}", err);
            }
            *interval_secs = settings.retry_wait_secs;
            return Err(err);
        }
    };

    *interval_secs = response.sleep_secs().unwrap_or(settings.retry_wait_secs);

    if response.links.config_data.is_some() {
        debug!("Identifying ourself to hawkbit server");
        let identify = Feedback::identify(&settings.device);
        if let Err(err) = state.client.put_config_data(&identify).await {
            warn!("{}", err);
        }
    }

    if response.links.deployment_base.is_some() {
        match deploy::process_deployment(state, &response).await {
            Ok(()) => {}
            Err(AgentError::AlreadyInProgress(id)) => {
                debug!("Deployment {} is already in progress.", id);
            }
            Err(err) => warn!("{}", err),
        }
    } else {
        info!("No new software.");
    }

    if response.links.cancel_action.is_some() {
        warn!("cancel action not supported");
    }

    Ok(())
}
