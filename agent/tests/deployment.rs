//! End-to-end deployment workflow scenarios against a mock DDI server

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sha1::{Digest, Sha1};
use tokio::sync::mpsc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use hawkagent::app::state::AgentState;
use hawkagent::ddi::models::PollResponse;
use hawkagent::deploy;
use hawkagent::errors::AgentError;
use hawkagent::http::client::DdiClient;
use hawkagent::installer::{InstallOutcome, InstallRequest, Installer, InstallerEvent};
use hawkagent::settings::Settings;
use hawkagent::system::power::PowerControl;

#[derive(Default)]
struct RecordingInstaller {
    bundles: Mutex<Vec<PathBuf>>,
}

#[async_trait]
impl Installer for RecordingInstaller {
    async fn bundle_ready(&self, request: InstallRequest) {
        self.bundles.lock().unwrap().push(request.bundle.clone());
    }
}

#[derive(Default)]
struct RecordingPower {
    synced: AtomicBool,
    rebooted: AtomicBool,
}

#[async_trait]
impl PowerControl for RecordingPower {
    async fn sync_disks(&self) {
        self.synced.store(true, Ordering::SeqCst);
    }

    async fn reboot(&self) -> Result<(), AgentError> {
        self.rebooted.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct Harness {
    state: Arc<AgentState>,
    installer: Arc<RecordingInstaller>,
    power: Arc<RecordingPower>,
    _events: mpsc::UnboundedReceiver<InstallerEvent>,
}

fn make_settings(server_uri: &str, bundle: &Path, post_update_reboot: bool) -> Settings {
    let host = server_uri.strip_prefix("http://").unwrap();
    serde_json::from_value(serde_json::json!({
        "hawkbit_server": host,
        "tenant_id": "DEFAULT",
        "controller_id": "device1",
        "ssl": false,
        "auth_token": "secret",
        "bundle_download_location": bundle.to_str().unwrap(),
        "post_update_reboot": post_update_reboot,
    }))
    .unwrap()
}

fn make_harness(settings: Settings) -> Harness {
    let installer = Arc::new(RecordingInstaller::default());
    let power = Arc::new(RecordingPower::default());
    let settings = Arc::new(settings);
    let client = Arc::new(DdiClient::new(&settings).unwrap());
    let (tx, rx) = mpsc::unbounded_channel();
    let state = Arc::new(AgentState::new(
        settings,
        client,
        installer.clone(),
        power.clone(),
        tx,
    ));
    Harness {
        state,
        installer,
        power,
        _events: rx,
    }
}

fn deployment_poll(server: &MockServer, deployment_path: &str) -> PollResponse {
    serde_json::from_value(serde_json::json!({
        "_links": {"deploymentBase": {"href": format!("{}{}", server.uri(), deployment_path)}}
    }))
    .unwrap()
}

async fn mount_deployment(server: &MockServer, size: u64, sha1: &str) {
    Mock::given(method("GET"))
        .and(path("/deployment/42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "42",
            "deployment": {"chunks": [{
                "name": "foo",
                "version": "1.2",
                "artifacts": [{
                    "size": size,
                    "hashes": {"sha1": sha1},
                    "_links": {
                        "download": {"href": format!("{}/download", server.uri())},
                        "download-http": {"href": "http://unused/download"}
                    }
                }]
            }]}
        })))
        .mount(server)
        .await;
}

async fn mount_feedback(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/DEFAULT/controller/v1/device1/deploymentBase/42/feedback"))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;
}

async fn feedback_bodies(server: &MockServer) -> Vec<serde_json::Value> {
    server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|request| request.url.path().ends_with("/feedback"))
        .map(|request| serde_json::from_slice(&request.body).unwrap())
        .collect()
}

#[tokio::test]
async fn deployment_happy_path_installs_and_cleans_up() {
    let server = MockServer::start().await;
    let tmp = tempfile::tempdir().unwrap();
    let bundle = tmp.path().join("bundle.raucb");

    let content = b"abcdefg";
    let sha = hex::encode(Sha1::digest(content));

    mount_deployment(&server, content.len() as u64, &sha).await;
    mount_feedback(&server).await;
    Mock::given(method("GET"))
        .and(path("/download"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(content.to_vec()))
        .mount(&server)
        .await;

    let harness = make_harness(make_settings(&server.uri(), &bundle, false));
    let poll = deployment_poll(&server, "/deployment/42");

    deploy::process_deployment(&harness.state, &poll).await.unwrap();
    assert_eq!(harness.state.current_action().as_deref(), Some("42"));

    harness.state.take_worker().unwrap().await.unwrap();

    // installer saw the verified bundle, still on disk
    assert_eq!(
        harness.installer.bundles.lock().unwrap().clone(),
        vec![bundle.clone()]
    );
    assert_eq!(std::fs::read(&bundle).unwrap(), content);

    let feedbacks = feedback_bodies(&server).await;
    assert_eq!(feedbacks.len(), 2);
    assert_eq!(feedbacks[0]["status"]["execution"], "proceeding");
    assert_eq!(feedbacks[0]["status"]["result"]["finished"], "none");
    assert!(feedbacks[0]["status"]["details"][0]
        .as_str()
        .unwrap()
        .starts_with("Download complete."));
    assert_eq!(feedbacks[1]["status"]["details"][0], "File checksum OK.");

    deploy::install_complete(&harness.state, InstallOutcome::Success).await;

    assert_eq!(harness.state.current_action(), None);
    assert!(!bundle.exists());

    let feedbacks = feedback_bodies(&server).await;
    let last = feedbacks.last().unwrap();
    assert_eq!(last["id"], "42");
    assert_eq!(last["status"]["execution"], "closed");
    assert_eq!(last["status"]["result"]["finished"], "success");
    assert_eq!(
        last["status"]["details"][0],
        "Software bundle installed successful."
    );
}

#[tokio::test]
async fn checksum_mismatch_fails_and_removes_bundle() {
    let server = MockServer::start().await;
    let tmp = tempfile::tempdir().unwrap();
    let bundle = tmp.path().join("bundle.raucb");

    let expected = hex::encode(Sha1::digest(b"abcdefg"));
    let served = b"zzzzzzz";
    let computed = hex::encode(Sha1::digest(served));

    mount_deployment(&server, served.len() as u64, &expected).await;
    mount_feedback(&server).await;
    Mock::given(method("GET"))
        .and(path("/download"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(served.to_vec()))
        .mount(&server)
        .await;

    let harness = make_harness(make_settings(&server.uri(), &bundle, false));
    let poll = deployment_poll(&server, "/deployment/42");

    deploy::process_deployment(&harness.state, &poll).await.unwrap();
    harness.state.take_worker().unwrap().await.unwrap();

    // no installer hand-off, no bundle, no live action
    assert!(harness.installer.bundles.lock().unwrap().is_empty());
    assert!(!bundle.exists());
    assert_eq!(harness.state.current_action(), None);

    let feedbacks = feedback_bodies(&server).await;
    assert_eq!(feedbacks.len(), 2);
    let terminal = &feedbacks[1];
    assert_eq!(terminal["status"]["execution"], "closed");
    assert_eq!(terminal["status"]["result"]["finished"], "failure");
    let detail = terminal["status"]["details"][0].as_str().unwrap();
    assert!(detail.contains(&computed));
    assert!(detail.contains(&expected));
}

#[tokio::test]
async fn insufficient_space_reports_failure_without_worker() {
    let server = MockServer::start().await;
    let tmp = tempfile::tempdir().unwrap();
    let bundle = tmp.path().join("bundle.raucb");

    mount_deployment(&server, u64::MAX, "2fb5e13419fc89246865e7a324f476ec624e8740").await;
    mount_feedback(&server).await;

    let harness = make_harness(make_settings(&server.uri(), &bundle, false));
    let poll = deployment_poll(&server, "/deployment/42");

    let err = deploy::process_deployment(&harness.state, &poll)
        .await
        .unwrap_err();
    // the disk lookup itself may fail on minimal filesystems; the deployment
    // is refused either way
    assert!(matches!(err, AgentError::NoSpace { .. } | AgentError::Io(_)));

    assert!(harness.state.take_worker().is_none());
    assert_eq!(harness.state.current_action(), None);
    assert!(!bundle.exists());

    let feedbacks = feedback_bodies(&server).await;
    assert_eq!(feedbacks.len(), 1);
    assert_eq!(feedbacks[0]["status"]["execution"], "closed");
    assert_eq!(feedbacks[0]["status"]["result"]["finished"], "failure");
}

#[tokio::test]
async fn second_deployment_is_rejected_while_one_is_live() {
    let server = MockServer::start().await;
    let tmp = tempfile::tempdir().unwrap();
    let bundle = tmp.path().join("bundle.raucb");

    Mock::given(method("GET"))
        .and(path("/deployment/new"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let harness = make_harness(make_settings(&server.uri(), &bundle, false));
    harness.state.begin_action("7").unwrap();

    let poll = deployment_poll(&server, "/deployment/new");
    let err = deploy::process_deployment(&harness.state, &poll)
        .await
        .unwrap_err();

    assert!(matches!(err, AgentError::AlreadyInProgress(id) if id == "7"));
    assert_eq!(harness.state.current_action().as_deref(), Some("7"));
}

#[tokio::test]
async fn success_with_post_update_reboot_requests_restart() {
    let server = MockServer::start().await;
    let tmp = tempfile::tempdir().unwrap();
    let bundle = tmp.path().join("bundle.raucb");
    std::fs::write(&bundle, b"installed bundle").unwrap();

    Mock::given(method("POST"))
        .and(path("/DEFAULT/controller/v1/device1/deploymentBase/9/feedback"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let harness = make_harness(make_settings(&server.uri(), &bundle, true));
    harness.state.begin_action("9").unwrap();

    deploy::install_complete(&harness.state, InstallOutcome::Success).await;

    assert!(harness.power.synced.load(Ordering::SeqCst));
    assert!(harness.power.rebooted.load(Ordering::SeqCst));
    assert_eq!(harness.state.current_action(), None);
    assert!(!bundle.exists());
}

#[tokio::test]
async fn install_failure_reports_and_cleans_up_without_reboot() {
    let server = MockServer::start().await;
    let tmp = tempfile::tempdir().unwrap();
    let bundle = tmp.path().join("bundle.raucb");
    std::fs::write(&bundle, b"installed bundle").unwrap();

    Mock::given(method("POST"))
        .and(path("/DEFAULT/controller/v1/device1/deploymentBase/9/feedback"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let harness = make_harness(make_settings(&server.uri(), &bundle, true));
    harness.state.begin_action("9").unwrap();

    deploy::install_complete(&harness.state, InstallOutcome::Failure).await;

    assert!(!harness.power.rebooted.load(Ordering::SeqCst));
    assert_eq!(harness.state.current_action(), None);
    assert!(!bundle.exists());

    let feedbacks = feedback_bodies(&server).await;
    assert_eq!(feedbacks.len(), 1);
    assert_eq!(feedbacks[0]["status"]["result"]["finished"], "failure");
    assert_eq!(
        feedbacks[0]["status"]["details"][0],
        "Failed to install software bundle."
    );
}

#[tokio::test]
async fn stale_install_completion_is_ignored() {
    let server = MockServer::start().await;
    let tmp = tempfile::tempdir().unwrap();
    let bundle = tmp.path().join("bundle.raucb");

    let harness = make_harness(make_settings(&server.uri(), &bundle, true));

    deploy::install_complete(&harness.state, InstallOutcome::Success).await;

    assert!(!harness.power.rebooted.load(Ordering::SeqCst));
    assert!(feedback_bodies(&server).await.is_empty());
}

#[tokio::test]
async fn installer_progress_is_forwarded_as_proceeding() {
    let server = MockServer::start().await;
    let tmp = tempfile::tempdir().unwrap();
    let bundle = tmp.path().join("bundle.raucb");

    Mock::given(method("POST"))
        .and(path("/DEFAULT/controller/v1/device1/deploymentBase/5/feedback"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let harness = make_harness(make_settings(&server.uri(), &bundle, false));
    harness.state.begin_action("5").unwrap();

    deploy::handle_installer_event(
        &harness.state,
        InstallerEvent::Progress("Installing slot rootfs.0".to_string()),
    )
    .await;

    let feedbacks = feedback_bodies(&server).await;
    assert_eq!(feedbacks.len(), 1);
    assert_eq!(feedbacks[0]["id"], "5");
    assert_eq!(feedbacks[0]["status"]["execution"], "proceeding");
    assert_eq!(feedbacks[0]["status"]["result"]["finished"], "none");
    assert_eq!(
        feedbacks[0]["status"]["details"][0],
        "Installing slot rootfs.0"
    );
}
