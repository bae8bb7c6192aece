//! Connection settings for the hosted backend.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use url::Url;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

/// Names of the remote procedures exposed under `/functions/v1/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionNames {
    pub pairing_code: String,
    pub delete_master: String,
    pub device_state: String,
    pub peer_state: String,
    pub rotate_device_key: String,
}

impl Default for FunctionNames {
    fn default() -> Self {
        Self {
            pairing_code: "pairing-code".into(),
            delete_master: "delete-master".into(),
            device_state: "device-state".into(),
            peer_state: "peer-state".into(),
            rotate_device_key: "rotate-device-key".into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Project base URL, e.g. `https://xyz.example.co`.
    pub url: String,
    /// Public anon key sent as `apikey` on every request.
    pub anon_key: String,
    pub request_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub functions: FunctionNames,
}

impl BackendConfig {
    pub fn new(url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            url: url.into().trim().trim_end_matches('/').to_string(),
            anon_key: anon_key.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            functions: FunctionNames::default(),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_functions(mut self, functions: FunctionNames) -> Self {
        self.functions = functions;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            return Err(anyhow!("backend url must start with http:// or https://"));
        }
        Url::parse(&self.url).with_context(|| format!("invalid backend url: {}", self.url))?;
        if self.anon_key.trim().is_empty() {
            return Err(anyhow!("backend anon key must not be empty"));
        }
        Ok(())
    }

    pub fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.url)
    }

    pub fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{path}", self.url)
    }

    pub fn function_url(&self, name: &str) -> String {
        format!("{}/functions/v1/{name}", self.url)
    }
}
