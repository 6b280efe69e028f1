//! Shared agent state

use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::errors::AgentError;
use crate::http::client::DdiClient;
use crate::installer::{Installer, InstallerEvent};
use crate::settings::Settings;
use crate::system::power::PowerControl;

/// Process-wide state shared between the poll loop and the download worker.
///
/// The action slot follows a publish-then-clear protocol: the poll loop
/// publishes an id when a deployment is accepted, the terminal handling
/// clears it, and concurrent readers observe either the previous value or
/// none.
pub struct AgentState {
    pub settings: Arc<Settings>,
    pub client: Arc<DdiClient>,
    pub installer: Arc<dyn Installer>,
    pub power: Arc<dyn PowerControl>,
    events: mpsc::UnboundedSender<InstallerEvent>,
    action: RwLock<Option<String>>,
    download_worker: Mutex<Option<JoinHandle<()>>>,
}

impl AgentState {
    pub fn new(
        settings: Arc<Settings>,
        client: Arc<DdiClient>,
        installer: Arc<dyn Installer>,
        power: Arc<dyn PowerControl>,
        events: mpsc::UnboundedSender<InstallerEvent>,
    ) -> Self {
        Self {
            settings,
            client,
            installer,
            power,
            events,
            action: RwLock::new(None),
            download_worker: Mutex::new(None),
        }
    }

    /// Action id of the deployment currently in flight, if any.
    pub fn current_action(&self) -> Option<String> {
        self.action.read().unwrap().clone()
    }

    /// Publish `id` as the live deployment. Refuses to clobber an existing
    /// one.
    pub fn begin_action(&self, id: &str) -> Result<(), AgentError> {
        let mut slot = self.action.write().unwrap();
        if let Some(current) = slot.as_ref() {
            return Err(AgentError::AlreadyInProgress(current.clone()));
        }
        *slot = Some(id.to_string());
        Ok(())
    }

    /// Clear the live deployment, returning the id that was set.
    pub fn clear_action(&self) -> Option<String> {
        self.action.write().unwrap().take()
    }

    /// Park the download worker handle; at most one exists.
    pub fn stash_worker(&self, handle: JoinHandle<()>) {
        *self.download_worker.lock().unwrap() = Some(handle);
    }

    /// Take the download worker handle for joining.
    pub fn take_worker(&self) -> Option<JoinHandle<()>> {
        self.download_worker.lock().unwrap().take()
    }

    /// Sender feeding installer events back to the main loop.
    pub fn events(&self) -> &mpsc::UnboundedSender<InstallerEvent> {
        &self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::installer::ExecInstaller;
    use crate::system::power::SystemPower;

    fn state() -> AgentState {
        let settings: Arc<Settings> = Arc::new(
            serde_json::from_value(serde_json::json!({
                "hawkbit_server": "localhost",
                "controller_id": "device1",
                "bundle_download_location": "/tmp/bundle.raucb",
            }))
            .unwrap(),
        );
        let client = Arc::new(DdiClient::new(&settings).unwrap());
        let (tx, _rx) = mpsc::unbounded_channel();
        AgentState::new(
            settings,
            client,
            Arc::new(ExecInstaller::new("true")),
            Arc::new(SystemPower),
            tx,
        )
    }

    #[test]
    fn second_action_is_rejected_without_clobbering() {
        let state = state();
        state.begin_action("42").unwrap();

        let err = state.begin_action("43").unwrap_err();
        assert!(matches!(err, AgentError::AlreadyInProgress(id) if id == "42"));
        assert_eq!(state.current_action().as_deref(), Some("42"));
    }

    #[test]
    fn clear_returns_the_published_id() {
        let state = state();
        assert_eq!(state.clear_action(), None);

        state.begin_action("42").unwrap();
        assert_eq!(state.clear_action().as_deref(), Some("42"));
        assert_eq!(state.current_action(), None);
    }
}
