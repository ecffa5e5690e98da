//! Environment-sourced SDK settings.
//!
//! Values are read from `XRVOYAGE_`-prefixed environment variables (after an
//! optional `.env` file is loaded) plus the unprefixed `LOGLEVEL`. Use
//! [`Settings::global`] to resolve them once for the lifetime of the process,
//! or [`Settings::from_source`] to build them from an explicit map.

use std::collections::HashMap;

use once_cell::sync::OnceCell;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;

/// Prefix shared by every SDK environment variable.
pub const ENV_PREFIX: &str = "XRVOYAGE";
/// Unprefixed variable holding the log level.
pub const LOG_LEVEL_ENV: &str = "LOGLEVEL";
/// Production websocket base URL.
pub const DEFAULT_WEBSOCKETS_BASE_URL: &str = "wss://ws.xr.voyage";
/// Production REST API base URL.
pub const DEFAULT_API_BASE_URL: &str = "https://apiv2.xr.voyage";
pub const DEFAULT_LOG_LEVEL: &str = "debug";

static GLOBAL_SETTINGS: OnceCell<Settings> = OnceCell::new();

/// Errors produced while loading settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration loading failed: {0}")]
    Load(#[from] config::ConfigError),
}

/// Resolved SDK settings.
#[derive(Clone, Debug, Deserialize)]
pub struct Settings {
    /// Base URL of the websocket event bus, without trailing slash.
    pub websockets_base_url: String,
    /// Base URL of the REST API, without trailing slash.
    pub api_base_url: String,
    /// Access key id for the key-pair login flow.
    #[serde(default)]
    pub access_key_id: Option<SecretString>,
    /// Secret access key for the key-pair login flow.
    #[serde(default)]
    pub secret_access_key: Option<SecretString>,
    /// Long-lived session token; mutually exclusive with the key pair.
    #[serde(default)]
    pub session_token: Option<SecretString>,
    /// Ship connected to when no ship is given explicitly.
    #[serde(default)]
    pub current_ship: Option<String>,
    #[serde(default)]
    pub current_plugin: Option<String>,
    /// Project guid stamped on egress events.
    #[serde(default)]
    pub project_guid: Option<String>,
    pub log_level: String,
}

impl Settings {
    /// Loads settings from `.env` and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::build(None, std::env::var(LOG_LEVEL_ENV).ok())
    }

    /// Builds settings from an explicit variable map instead of the process
    /// environment. Keys use the same names as the environment variables.
    pub fn from_source(vars: HashMap<String, String>) -> Result<Self, ConfigError> {
        let log_level = vars.get(LOG_LEVEL_ENV).cloned();
        Self::build(Some(vars), log_level)
    }

    /// Returns the process-wide settings, loading them on first use.
    pub fn global() -> Result<&'static Settings, ConfigError> {
        GLOBAL_SETTINGS.get_or_try_init(Self::load)
    }

    fn build(
        source: Option<HashMap<String, String>>,
        log_level: Option<String>,
    ) -> Result<Self, ConfigError> {
        let settings: Settings = config::Config::builder()
            .set_default("websockets_base_url", DEFAULT_WEBSOCKETS_BASE_URL)?
            .set_default("api_base_url", DEFAULT_API_BASE_URL)?
            .set_default("log_level", DEFAULT_LOG_LEVEL)?
            .add_source(config::Environment::with_prefix(ENV_PREFIX).source(source))
            .set_override_option("log_level", log_level)?
            .build()?
            .try_deserialize()?;

        Ok(settings.normalized())
    }

    fn normalized(mut self) -> Self {
        self.websockets_base_url = trim_base_url(&self.websockets_base_url);
        self.api_base_url = trim_base_url(&self.api_base_url);
        self.access_key_id = non_empty_secret(self.access_key_id);
        self.secret_access_key = non_empty_secret(self.secret_access_key);
        self.session_token = non_empty_secret(self.session_token);
        self.current_ship = non_empty(self.current_ship);
        self.current_plugin = non_empty(self.current_plugin);
        self.project_guid = non_empty(self.project_guid);
        self.log_level = self.log_level.trim().to_ascii_lowercase();
        self
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            websockets_base_url: DEFAULT_WEBSOCKETS_BASE_URL.to_string(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            access_key_id: None,
            secret_access_key: None,
            session_token: None,
            current_ship: None,
            current_plugin: None,
            project_guid: None,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

pub(crate) fn trim_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

fn non_empty_secret(value: Option<SecretString>) -> Option<SecretString> {
    value.filter(|secret| !secret.expose_secret().trim().is_empty())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::{Settings, DEFAULT_API_BASE_URL, DEFAULT_WEBSOCKETS_BASE_URL};

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let settings = Settings::from_source(HashMap::new()).expect("load settings");
        assert_eq!(settings.websockets_base_url, DEFAULT_WEBSOCKETS_BASE_URL);
        assert_eq!(settings.api_base_url, DEFAULT_API_BASE_URL);
        assert!(settings.session_token.is_none());
        assert!(settings.access_key_id.is_none());
        assert_eq!(settings.log_level, "debug");
    }

    #[test]
    fn prefixed_variables_are_read_and_trailing_slash_is_stripped() {
        let settings = Settings::from_source(vars(&[
            ("XRVOYAGE_API_BASE_URL", "http://localhost:9000/"),
            ("XRVOYAGE_WEBSOCKETS_BASE_URL", "ws://localhost:9001"),
            ("XRVOYAGE_ACCESS_KEY_ID", "AKID"),
            ("XRVOYAGE_SECRET_ACCESS_KEY", "shh"),
            ("XRVOYAGE_CURRENT_SHIP", "C9EECCC7826249E386B45B78D8A14B19"),
            ("XRVOYAGE_PROJECT_GUID", "A895570833F0429A98940C079555AE51"),
            ("LOGLEVEL", "INFO"),
        ]))
        .expect("load settings");

        assert_eq!(settings.api_base_url, "http://localhost:9000");
        assert_eq!(settings.websockets_base_url, "ws://localhost:9001");
        assert_eq!(
            settings.access_key_id.as_ref().map(|s| s.expose_secret().as_str()),
            Some("AKID")
        );
        assert_eq!(
            settings.current_ship.as_deref(),
            Some("C9EECCC7826249E386B45B78D8A14B19")
        );
        assert_eq!(
            settings.project_guid.as_deref(),
            Some("A895570833F0429A98940C079555AE51")
        );
        assert_eq!(settings.log_level, "info");
    }

    #[test]
    fn empty_secrets_are_treated_as_unset() {
        let settings = Settings::from_source(vars(&[("XRVOYAGE_SESSION_TOKEN", "  ")]))
            .expect("load settings");
        assert!(settings.session_token.is_none());
    }
}
