use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::services::SecurityService;
use crate::settings::config::Settings;

#[derive(Debug, Clone)]
pub struct AppState {
    pub settings: Settings,
    pub security: SecurityService,
}

pub type SharedAppState = Arc<AppState>;

impl AppState {
    /// Load every site below `sites.root_folder`
    pub async fn new(settings: Settings) -> anyhow::Result<SharedAppState> {
        let security = SecurityService::new();
        security
            .load_sites(Path::new(&settings.sites.root_folder), &settings.security)
            .await?;

        let sites = security.sites().await;
        info!(
            "{} sites loaded, {} enabled",
            sites.len(),
            sites
                .iter()
                .filter(|site| site.state == crate::site::SiteState::Enabled)
                .count()
        );

        Ok(Arc::new(AppState { settings, security }))
    }

    pub async fn new_for_config_only() -> anyhow::Result<SharedAppState> {
        let settings = Settings::new()?;
        Ok(Arc::new(AppState {
            settings,
            security: SecurityService::new(),
        }))
    }
}
