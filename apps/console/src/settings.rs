//! Console settings loaded from an optional TOML file and `RELAY__*`
//! environment variables.

use std::{path::Path, time::Duration};

use client_core::BackendConfig;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

const ENV_PREFIX: &str = "RELAY";
const DEFAULT_CONFIG_FILE: &str = "console";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub backend: BackendSettings,
    #[serde(default)]
    pub auth: AuthSettings,
    #[serde(default)]
    pub console: ConsoleSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendSettings {
    pub url: String,
    pub anon_key: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthSettings {
    pub email: Option<String>,
    pub password: Option<String>,
    /// Full redirect URL from an OAuth sign-in, used instead of a password.
    pub redirect_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConsoleSettings {
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    #[serde(default = "default_pulse_ms")]
    pub pulse_ms: u64,
    #[serde(default = "default_recent_commands")]
    pub recent_commands: usize,
}

impl Default for ConsoleSettings {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            pulse_ms: default_pulse_ms(),
            recent_commands: default_recent_commands(),
        }
    }
}

fn default_request_timeout_secs() -> u64 {
    15
}

fn default_heartbeat_secs() -> u64 {
    25
}

fn default_tick_ms() -> u64 {
    1_000
}

fn default_pulse_ms() -> u64 {
    500
}

fn default_recent_commands() -> usize {
    10
}

/// How the console signs in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    Password { email: String, password: String },
    Redirect(String),
}

impl Settings {
    /// Loads, in order of precedence:
    /// 1. `RELAY__*` environment variables (`RELAY__BACKEND__URL`, ...)
    /// 2. `path` when given, otherwise `console.toml` if present
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };
        let settings: Self = Config::builder()
            .add_source(file)
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    #[cfg(test)]
    pub fn from_toml(raw: &str, overrides: &[(&str, &str)]) -> Result<Self, ConfigError> {
        let mut builder = Config::builder().add_source(File::from_str(raw, config::FileFormat::Toml));
        for (key, value) in overrides {
            builder = builder.set_override(*key, *value)?;
        }
        let settings: Self = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.backend.url.trim().is_empty() {
            return Err(ConfigError::Message("backend.url is required".into()));
        }
        if self.backend.anon_key.trim().is_empty() {
            return Err(ConfigError::Message("backend.anon_key is required".into()));
        }
        if self.backend.request_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "backend.request_timeout_secs must be positive".into(),
            ));
        }
        if self.console.tick_ms == 0 {
            return Err(ConfigError::Message("console.tick_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn backend_config(&self) -> BackendConfig {
        BackendConfig::new(&self.backend.url, &self.backend.anon_key)
            .with_request_timeout(Duration::from_secs(self.backend.request_timeout_secs))
            .with_heartbeat_interval(Duration::from_secs(self.backend.heartbeat_secs.max(1)))
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.console.tick_ms)
    }

    /// Redirect sign-in wins over a password when both are configured.
    pub fn credentials(&self) -> Option<Credentials> {
        if let Some(url) = self
            .auth
            .redirect_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
        {
            return Some(Credentials::Redirect(url.trim().to_string()));
        }
        match (&self.auth.email, &self.auth.password) {
            (Some(email), Some(password)) if !email.trim().is_empty() => {
                Some(Credentials::Password {
                    email: email.trim().to_string(),
                    password: password.clone(),
                })
            }
            _ => None,
        }
    }
}
