use anyhow::{Context, Result};
use std::path::Path;
use tracing::warn;

use super::types::DirectoryConfig;

/// Loading and saving of site directory files
pub struct ConfigManager;

impl ConfigManager {
    /// Load a directory file. A missing file yields the default directory.
    pub async fn load_config(path: &Path) -> Result<DirectoryConfig> {
        if !path.exists() {
            warn!(
                "Site directory not found at {}, using defaults",
                path.display()
            );
            return Ok(Self::default_config());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read site directory {}", path.display()))?;

        serde_norway::from_str(&content)
            .with_context(|| format!("Failed to parse site directory {}", path.display()))
    }

    pub async fn save_config(config: &DirectoryConfig, path: &Path) -> Result<()> {
        let yaml = serde_norway::to_string(config)?;
        tokio::fs::write(path, yaml)
            .await
            .with_context(|| format!("Failed to save site directory {}", path.display()))?;
        Ok(())
    }

    /// A directory holding nothing but the system roles
    pub fn default_config() -> DirectoryConfig {
        DirectoryConfig::default()
    }
}
