//! Provider configuration
//!
//! Applications describe their OAuth2 providers in a TOML file; secrets can
//! be supplied directly or named indirectly through environment variables
//! (the `*_env` fields), with the environment winning when both are set.

use std::env;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::Error;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GatekitSettings {
    #[serde(default)]
    pub providers: Vec<ProviderSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub name: String,
    pub display_name: Option<String>,
    pub authorization_endpoint: Option<String>,
    pub token_endpoint: Option<String>,
    pub userinfo_endpoint: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    pub scope_separator: Option<String>,
    pub callback_url: Option<String>,

    // Direct values (overridden by environment variables when set)
    pub client_id: Option<String>,
    pub client_secret: Option<String>,

    // Environment variable names for overrides
    pub client_id_env: Option<String>,
    pub client_secret_env: Option<String>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl GatekitSettings {
    /// Load settings from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the file cannot be read or parsed.
    pub fn from_toml_file(path: &Path) -> Result<Self, Error> {
        let contents = fs::read_to_string(path).map_err(|err| {
            Error::Config(format!(
                "failed to read settings file {}: {err}",
                path.display()
            ))
        })?;
        basic_toml::from_str(&contents)
            .map_err(|err| Error::Config(format!("failed to parse settings file: {err}")))
    }

    #[must_use]
    pub fn provider(&self, name: &str) -> Option<&ProviderSettings> {
        self.providers.iter().find(|provider| provider.name == name)
    }

    #[must_use]
    pub fn enabled_providers(&self) -> Vec<&ProviderSettings> {
        self.providers
            .iter()
            .filter(|provider| provider.enabled)
            .collect()
    }
}

impl ProviderSettings {
    /// The client id, preferring the named environment variable when set
    /// and non-empty.
    #[must_use]
    pub fn resolved_client_id(&self) -> Option<String> {
        resolve(self.client_id_env.as_deref(), self.client_id.as_deref())
    }

    /// The client secret, preferring the named environment variable.
    #[must_use]
    pub fn resolved_client_secret(&self) -> Option<String> {
        resolve(
            self.client_secret_env.as_deref(),
            self.client_secret.as_deref(),
        )
    }
}

fn resolve(env_name: Option<&str>, direct: Option<&str>) -> Option<String> {
    if let Some(name) = env_name {
        if let Ok(value) = env::var(name) {
            if !value.is_empty() {
                return Some(value);
            }
        }
    }
    direct.map(str::to_string)
}
