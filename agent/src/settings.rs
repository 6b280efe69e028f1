//! Settings file management

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::AgentError;
use crate::logs::LogLevel;

/// Agent settings, read from a JSON file at startup and immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// hawkBit server, host or host:port
    pub hawkbit_server: String,

    /// Tenant the controller belongs to
    #[serde(default = "default_tenant")]
    pub tenant_id: String,

    /// Controller (device) identity
    pub controller_id: String,

    /// Talk HTTPS to the server
    #[serde(default = "default_true")]
    pub ssl: bool,

    /// Verify the server certificate and hostname
    #[serde(default = "default_true")]
    pub ssl_verify: bool,

    /// Target security token
    #[serde(default)]
    pub auth_token: Option<String>,

    /// Gateway security token
    #[serde(default)]
    pub gateway_token: Option<String>,

    /// Connection establishment timeout
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Overall REST request timeout
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Poll cadence used until the server suggests one, and after failures
    #[serde(default = "default_retry_wait")]
    pub retry_wait_secs: u64,

    /// Where the downloaded software bundle is written
    pub bundle_download_location: PathBuf,

    /// Reboot the device after a successfully installed bundle
    #[serde(default)]
    pub post_update_reboot: bool,

    /// Device attributes sent when the server asks us to identify
    #[serde(default)]
    pub device: BTreeMap<String, String>,

    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Command handed the bundle path once it is downloaded and verified
    #[serde(default = "default_install_command")]
    pub install_command: String,
}

fn default_true() -> bool {
    true
}

fn default_tenant() -> String {
    "DEFAULT".to_string()
}

fn default_connect_timeout() -> u64 {
    20
}

fn default_timeout() -> u64 {
    60
}

fn default_retry_wait() -> u64 {
    300
}

fn default_install_command() -> String {
    "rauc install".to_string()
}

impl Settings {
    /// Read settings from a JSON file.
    pub async fn load(path: &Path) -> Result<Self, AgentError> {
        let raw = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Authorization header value. The target token wins when both tokens
    /// are configured.
    pub fn auth_header(&self) -> Option<String> {
        if let Some(token) = &self.auth_token {
            Some(format!("TargetToken {}", token))
        } else {
            self.gateway_token
                .as_ref()
                .map(|token| format!("GatewayToken {}", token))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> Settings {
        serde_json::from_value(serde_json::json!({
            "hawkbit_server": "hawkbit.example.com",
            "controller_id": "device1",
            "bundle_download_location": "/tmp/bundle.raucb",
        }))
        .unwrap()
    }

    #[test]
    fn defaults() {
        let settings = minimal();
        assert_eq!(settings.tenant_id, "DEFAULT");
        assert!(settings.ssl);
        assert!(settings.ssl_verify);
        assert_eq!(settings.connect_timeout_secs, 20);
        assert_eq!(settings.timeout_secs, 60);
        assert_eq!(settings.retry_wait_secs, 300);
        assert!(!settings.post_update_reboot);
        assert!(settings.device.is_empty());
        assert_eq!(settings.log_level, LogLevel::Info);
    }

    #[test]
    fn target_token_wins_over_gateway_token() {
        let mut settings = minimal();
        settings.auth_token = Some("tt".to_string());
        settings.gateway_token = Some("gw".to_string());
        assert_eq!(settings.auth_header().unwrap(), "TargetToken tt");
    }

    #[test]
    fn gateway_token_used_when_no_target_token() {
        let mut settings = minimal();
        settings.gateway_token = Some("gw".to_string());
        assert_eq!(settings.auth_header().unwrap(), "GatewayToken gw");
    }

    #[test]
    fn no_tokens_means_no_header() {
        assert!(minimal().auth_header().is_none());
    }
}
