//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info};

use crate::app::state::AgentState;
use crate::errors::AgentError;
use crate::http::client::DdiClient;
use crate::installer::Installer;
use crate::settings::Settings;
use crate::system::power::PowerControl;
use crate::workers::poller;

/// Run-mode options
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Quit after the first poll cycle instead of polling forever
    pub run_once: bool,
}

/// Run the agent until `shutdown_signal` resolves, or, in one-shot mode,
/// until the first poll cycle finishes.
pub async fn run(
    settings: Settings,
    installer: Arc<dyn Installer>,
    power: Arc<dyn PowerControl>,
    options: RunOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), AgentError> {
    info!("Initializing hawkBit agent...");

    let settings = Arc::new(settings);
    let client = Arc::new(DdiClient::new(&settings)?);
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let state = Arc::new(AgentState::new(
        settings, client, installer, power, events_tx,
    ));

    let poller_options = poller::Options {
        run_once: options.run_once,
    };
    let poller_state = state.clone();
    let poller_handle = tokio::spawn(async move {
        poller::run(
            poller_state,
            &poller_options,
            events_rx,
            Box::pin(shutdown_signal),
        )
        .await
    });

    let result = match poller_handle.await {
        Ok(result) => result,
        Err(e) => Err(AgentError::Internal(format!("poller task failed: {}", e))),
    };

    // The download worker is joined before the process leaves.
    if let Some(worker) = state.take_worker() {
        info!("Waiting for the download worker to finish...");
        if let Err(e) = worker.await {
            error!("Download worker failed: {}", e);
        }
    }

    info!("Shutdown complete");
    result
}
