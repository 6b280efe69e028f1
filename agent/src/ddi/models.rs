//! Resources served by the DDI poll and deployment endpoints

use chrono::{NaiveTime, Timelike};
use serde::Deserialize;

/// Response of `GET <base>`, the controller base resource.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PollResponse {
    #[serde(default)]
    pub config: PollConfig,

    #[serde(rename = "_links", default)]
    pub links: PollLinks,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PollConfig {
    #[serde(default)]
    pub polling: Polling,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Polling {
    /// Suggested poll cadence as `HH:MM:SS`
    #[serde(default)]
    pub sleep: Option<String>,
}

/// Follow-up resources the server advertises on the base resource.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PollLinks {
    #[serde(rename = "configData")]
    pub config_data: Option<Link>,

    #[serde(rename = "deploymentBase")]
    pub deployment_base: Option<Link>,

    #[serde(rename = "cancelAction")]
    pub cancel_action: Option<Link>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Link {
    pub href: String,
}

impl PollResponse {
    /// Server-suggested poll cadence in seconds, if present and well-formed.
    pub fn sleep_secs(&self) -> Option<u64> {
        self.config.polling.sleep.as_deref().and_then(parse_sleep)
    }
}

/// Parse the DDI `HH:MM:SS` polling cadence into seconds.
pub fn parse_sleep(value: &str) -> Option<u64> {
    let time = NaiveTime::parse_from_str(value, "%H:%M:%S").ok()?;
    Some(u64::from(time.num_seconds_from_midnight()))
}

/// Response of `GET <deploymentBase href>`.
#[derive(Debug, Clone, Deserialize)]
pub struct DeploymentResource {
    /// Server-assigned action id
    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub deployment: DeploymentDetail,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeploymentDetail {
    #[serde(default)]
    pub chunks: Vec<Chunk>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chunk {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub version: Option<String>,

    #[serde(default)]
    pub artifacts: Vec<ArtifactResource>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactResource {
    #[serde(default)]
    pub filename: Option<String>,

    #[serde(default)]
    pub size: Option<u64>,

    #[serde(default)]
    pub hashes: Hashes,

    #[serde(rename = "_links", default)]
    pub links: ArtifactLinks,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Hashes {
    #[serde(default)]
    pub sha1: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArtifactLinks {
    pub download: Option<Link>,

    #[serde(rename = "download-http")]
    pub download_http: Option<Link>,
}

impl ArtifactLinks {
    /// Download URL, favouring the HTTPS link.
    pub fn preferred(&self) -> Option<&str> {
        self.download
            .as_ref()
            .or(self.download_http.as_ref())
            .map(|link| link.href.as_str())
    }
}
