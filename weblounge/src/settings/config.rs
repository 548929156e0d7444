use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use weblounge_core::security::SecurityOptions;

#[derive(Debug, Deserialize, Clone)]
#[readonly::make]
pub struct SitesSettings {
    /// Folder holding one sub folder per site
    pub root_folder: String,
}

impl Default for SitesSettings {
    fn default() -> Self {
        Self {
            root_folder: "sites".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub debug: bool,
    pub telemetry: Option<String>,
    #[serde(default)]
    pub sites: SitesSettings,
    /// Defaults for every site; a site's `security.yaml` may override them
    #[serde(default)]
    pub security: SecurityOptions,
}

impl Settings {
    pub fn get_environment() -> Environment {
        Environment::default()
            .prefix("WEBLOUNGE")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
    }

    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = env::var("WEBLOUNGE_RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("sites.root_folder", "sites")?
            .set_default("security.rule_matching", "strict")?
            .set_default("security.require_evaluation_order", true)?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(Self::get_environment());

        let mut settings: Settings = builder.build()?.try_deserialize()?;
        settings.telemetry = settings.check_if_optional(&settings.telemetry);
        settings.sites.root_folder = std::fs::canonicalize(&settings.sites.root_folder)
            .map_err(|e| {
                ConfigError::Message(format!("Failed to get realpath of sites.root_folder: {e}"))
            })?
            .to_str()
            .ok_or_else(|| {
                ConfigError::Message(
                    "Failed to convert realpath of sites.root_folder to string".into(),
                )
            })?
            .to_string();
        Ok(settings)
    }

    fn check_if_optional(&self, s: &Option<String>) -> Option<String> {
        match s {
            None => None,
            Some(s) => match s.to_lowercase().as_str() {
                "no" | "false" | "0" => None,
                _ => Some(s.to_string()),
            },
        }
    }
}
