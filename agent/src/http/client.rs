//! DDI REST client

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{redirect, Client, ClientBuilder, Method, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::ddi::feedback::Feedback;
use crate::ddi::models::{DeploymentResource, PollResponse};
use crate::errors::AgentError;
use crate::settings::Settings;

/// Product string sent on every request.
pub const USER_AGENT: &str = concat!("hawkagent/", env!("CARGO_PKG_VERSION"));

const ACCEPT_JSON: &str = "application/json;charset=UTF-8";
const CONTENT_TYPE_JSON: &str = "application/json;charset=UTF-8";

/// Redirect bound applied to bundle downloads.
const DOWNLOAD_MAX_REDIRECTS: usize = 8;

/// REST client for the hawkBit DDI API.
///
/// Carries two `reqwest` clients: one for the JSON resources with the
/// configured overall timeout, and one for bundle downloads with a bounded
/// redirect chain and no overall timeout.
pub struct DdiClient {
    client: Client,
    download_client: Client,
    base_url: String,
}

impl DdiClient {
    pub fn new(settings: &Settings) -> Result<Self, AgentError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_JSON));
        if let Some(auth) = settings.auth_header() {
            let mut value = HeaderValue::from_str(&auth)
                .map_err(|e| AgentError::Config(format!("invalid token: {}", e)))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = tls_options(Client::builder(), settings)
            .user_agent(USER_AGENT)
            .default_headers(headers.clone())
            .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;

        let download_client = tls_options(Client::builder(), settings)
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
            .redirect(redirect::Policy::limited(DOWNLOAD_MAX_REDIRECTS))
            .build()?;

        let scheme = if settings.ssl { "https" } else { "http" };
        let base_url = format!(
            "{}://{}/{}/controller/v1/{}",
            scheme, settings.hawkbit_server, settings.tenant_id, settings.controller_id
        );

        Ok(Self {
            client,
            download_client,
            base_url,
        })
    }

    /// Controller base URL, or a resource below it.
    pub fn api_url(&self, sub_path: Option<&str>) -> String {
        match sub_path {
            Some(path) => format!("{}/{}", self.base_url, path),
            None => self.base_url.clone(),
        }
    }

    /// Feedback resource of a deployment action.
    pub fn feedback_url(&self, action_id: &str) -> String {
        self.api_url(Some(&format!("deploymentBase/{}/feedback", action_id)))
    }

    pub(crate) fn download_client(&self) -> &Client {
        &self.download_client
    }

    /// `GET <base>`, the controller base poll resource.
    pub async fn poll_base(&self) -> Result<PollResponse, AgentError> {
        self.request_json(Method::GET, &self.api_url(None), None).await
    }

    /// Fetch a deployment resource by its advertised href.
    pub async fn get_deployment(&self, href: &str) -> Result<DeploymentResource, AgentError> {
        self.request_json(Method::GET, href, None).await
    }

    /// `PUT <base>/configData`, identifying the device towards the server.
    pub async fn put_config_data(&self, feedback: &Feedback) -> Result<(), AgentError> {
        self.request_ack(Method::PUT, &self.api_url(Some("configData")), Some(feedback))
            .await
    }

    /// `POST` a status document to a feedback resource.
    pub async fn post_feedback(&self, url: &str, feedback: &Feedback) -> Result<(), AgentError> {
        self.request_ack(Method::POST, url, Some(feedback)).await
    }

    /// Issue a request and parse the JSON response body.
    async fn request_json<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        body: Option<&Feedback>,
    ) -> Result<T, AgentError> {
        let response = self.request(method, url, body).await?;
        let raw = response.text().await.map_err(AgentError::Transport)?;
        debug!("Response body: {}", raw);
        Ok(serde_json::from_str(&raw)?)
    }

    /// Issue a request, discarding any response body.
    async fn request_ack(
        &self,
        method: Method,
        url: &str,
        body: Option<&Feedback>,
    ) -> Result<(), AgentError> {
        self.request(method, url, body).await?;
        Ok(())
    }

    async fn request(
        &self,
        method: Method,
        url: &str,
        body: Option<&Feedback>,
    ) -> Result<reqwest::Response, AgentError> {
        debug!("{} {}", method, url);

        let mut request = self.client.request(method, url);
        if let Some(body) = body {
            let payload = serde_json::to_vec(body)?;
            debug!("Request body: {}", String::from_utf8_lossy(&payload));
            request = request
                .header(CONTENT_TYPE, CONTENT_TYPE_JSON)
                .body(payload);
        }

        let response = request.send().await?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::Http {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response)
    }
}

fn tls_options(builder: ClientBuilder, settings: &Settings) -> ClientBuilder {
    if settings.ssl_verify {
        builder
    } else {
        builder
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
    }
}
