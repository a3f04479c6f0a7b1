//! Configuration loading and management.

use std::fmt;
use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized};
use serde::{Deserialize, Serialize};

/// Application configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the database file.
    pub database_path: PathBuf,

    /// Remote sink endpoint. Sync is disabled without it.
    #[serde(
        rename = "SHEETS_WEBAPP_URL",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sheets_webapp_url: Option<String>,

    /// Enables natural-language parsing.
    #[serde(
        rename = "OPENAI_API_KEY",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub openai_api_key: Option<String>,

    /// Chat model used for parsing.
    pub openai_model: String,

    /// How long to wait for a location fix.
    pub location_timeout_secs: u64,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_path", &self.database_path)
            .field("sheets_webapp_url", &self.sheets_webapp_url)
            .field(
                "openai_api_key",
                &self.openai_api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("openai_model", &self.openai_model)
            .field("location_timeout_secs", &self.location_timeout_secs)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs_data_path().unwrap_or_else(|| PathBuf::from("."));
        Self {
            database_path: data_dir.join("tl.db"),
            sheets_webapp_url: None,
            openai_api_key: None,
            openai_model: tl_llm::DEFAULT_MODEL.to_string(),
            location_timeout_secs: 10,
        }
    }
}

impl Config {
    /// Loads configuration from the default locations, then `config_path`.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        // Load from default config location
        if let Some(config_dir) = dirs_config_path() {
            figment = figment.merge(Json::file(config_dir.join("config.json")));
        }

        // Load from specified config file
        if let Some(path) = config_path {
            figment = figment.merge(Json::file(path));
        }

        // Credentials keep their conventional upper-case names
        figment = figment.merge(
            Env::raw()
                .only(&["SHEETS_WEBAPP_URL", "OPENAI_API_KEY"])
                .lowercase(false),
        );

        // Load from environment variables (TL_*)
        figment = figment.merge(Env::prefixed("TL_"));

        let mut config: Self = figment.extract()?;
        config.sheets_webapp_url = non_blank(config.sheets_webapp_url);
        config.openai_api_key = non_blank(config.openai_api_key);
        Ok(config)
    }
}

/// Treats empty values as absent so a blank key disables its feature.
fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Returns the platform-specific config directory for tl.
fn dirs_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("tl"))
}

/// Returns the platform-specific data directory for tl.
///
/// On Linux: `~/.local/share/tl`
pub fn dirs_data_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("tl"))
}
