use anyhow::{anyhow, Context, Result};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};
use weblounge_core::dispatch::{ActionInstance, Lease};
use weblounge_core::security::{
    ClaimSet, Directory, Group, GroupId, Member, Permission, PermissionSet, RoleId, SecurityContext,
    SecurityOptions,
};

use crate::site::{Site, SiteStatus};

/// Site-scoped authorization.
///
/// Every site carries its own directory and secured objects. Sites that failed
/// to load are remembered as disabled and refuse every request.
#[derive(Debug, Clone, Default)]
pub struct SecurityService {
    sites: Arc<RwLock<BTreeMap<String, Arc<Site>>>>,
    disabled: Arc<RwLock<BTreeMap<String, String>>>,
}

impl SecurityService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every site folder below `root_folder`. A site that fails to load
    /// is disabled, the others keep working.
    pub async fn load_sites(&self, root_folder: &Path, defaults: &SecurityOptions) -> Result<()> {
        let mut entries = tokio::fs::read_dir(root_folder)
            .await
            .with_context(|| format!("Failed to read sites folder {}", root_folder.display()))?;

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let path = entry.path();
            let identifier = entry.file_name().to_string_lossy().to_string();
            match Site::load(&path, defaults).await {
                Ok(site) => self.add_site(site).await,
                Err(e) => {
                    error!("Failed to load site '{}': {:#}", identifier, e);
                    self.disable_site(&identifier, format!("{e:#}")).await;
                }
            }
        }
        Ok(())
    }

    pub async fn add_site(&self, site: Site) {
        let identifier = site.identifier().to_string();
        self.disabled.write().await.remove(&identifier);
        self.sites.write().await.insert(identifier, Arc::new(site));
    }

    pub async fn disable_site(&self, identifier: &str, reason: impl Into<String>) {
        let reason = reason.into();
        warn!("Site '{}' disabled: {}", identifier, reason);
        self.sites.write().await.remove(identifier);
        self.disabled
            .write()
            .await
            .insert(identifier.to_string(), reason);
    }

    pub async fn site(&self, identifier: &str) -> Option<Arc<Site>> {
        self.sites.read().await.get(identifier).cloned()
    }

    /// Enabled and disabled sites, ordered by identifier
    pub async fn sites(&self) -> Vec<SiteStatus> {
        let sites: Vec<Arc<Site>> = self.sites.read().await.values().cloned().collect();
        let mut statuses = Vec::with_capacity(sites.len());
        for site in sites {
            statuses.push(site.status().await);
        }
        for (identifier, reason) in self.disabled.read().await.iter() {
            statuses.push(SiteStatus::disabled(identifier, reason));
        }
        statuses.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        statuses
    }

    async fn enabled_site(&self, identifier: &str) -> Result<Arc<Site>> {
        if let Some(reason) = self.disabled.read().await.get(identifier) {
            return Err(anyhow!("Site '{}' is disabled: {}", identifier, reason));
        }
        self.site(identifier)
            .await
            .ok_or_else(|| anyhow!("Unknown site '{}'", identifier))
    }

    /// Whether `login` holds `permission` on `object` of `site`. Unknown
    /// sites, objects and users are refused.
    #[instrument(skip(self))]
    pub async fn check_permission(
        &self,
        site: &str,
        object: &str,
        login: &str,
        permission: &Permission,
    ) -> bool {
        self.check(site, object, login, |context, claims| {
            context.check_claims(permission, claims)
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn check_permission_set(
        &self,
        site: &str,
        object: &str,
        login: &str,
        permissions: &PermissionSet,
    ) -> bool {
        self.check(site, object, login, |context, claims| {
            context.check_set(permissions, claims)
        })
        .await
    }

    async fn check(
        &self,
        site: &str,
        object: &str,
        login: &str,
        decide: impl FnOnce(&dyn SecurityContext, &ClaimSet) -> bool,
    ) -> bool {
        let site = match self.enabled_site(site).await {
            Ok(site) => site,
            Err(e) => {
                warn!("Permission denied: {:#}", e);
                return false;
            }
        };
        let Some(context) = site.context(object) else {
            warn!("Permission denied: '{}' is not a secured object", object);
            return false;
        };

        // Expansion and evaluation see the same directory state
        let directory = site.directory().read().await;
        let claims = match directory.claims(login) {
            Ok(claims) => claims,
            Err(e) => {
                warn!("Permission denied: {}", e);
                return false;
            }
        };
        let granted = decide(context.as_ref(), &claims);
        drop(directory);

        if granted {
            debug!("Permission granted to '{}' on '{}'", login, object);
        } else {
            debug!("Permission denied to '{}' on '{}'", login, object);
        }
        granted
    }

    pub async fn has_role(&self, site: &str, login: &str, role: &RoleId) -> Result<bool> {
        let site = self.enabled_site(site).await?;
        let directory = site.directory().read().await;
        Ok(directory.has_role(login, role)?)
    }

    pub async fn user_claims(&self, site: &str, login: &str) -> Result<ClaimSet> {
        self.enabled_site(site).await?.claims(login).await
    }

    pub async fn list_roles(&self, site: &str) -> Result<Vec<RoleId>> {
        let site = self.enabled_site(site).await?;
        let directory = site.directory().read().await;
        Ok(directory.roles().map(|role| role.id().clone()).collect())
    }

    pub async fn list_groups(&self, site: &str) -> Result<Vec<Group>> {
        let site = self.enabled_site(site).await?;
        let directory = site.directory().read().await;
        Ok(directory.groups().cloned().collect())
    }

    /// Give `login` the role `role` and save the site directory.
    /// Returns whether the user did not hold the role before.
    pub async fn assign_user_role(&self, site: &str, login: &str, role: &RoleId) -> Result<bool> {
        let added = self
            .change_directory(site, |directory| Ok(directory.assign_user_role(login, role)?))
            .await?;
        if added {
            info!("Assigned role '{}' to '{}'", role, login);
        }
        Ok(added)
    }

    pub async fn add_member(&self, site: &str, group: &GroupId, member: Member) -> Result<bool> {
        let description = member.to_string();
        let added = self
            .change_directory(site, |directory| Ok(directory.add_member(group, member)?))
            .await?;
        if added {
            info!("Added {} to group '{}'", description, group);
        }
        Ok(added)
    }

    pub async fn remove_member(&self, site: &str, group: &GroupId, member: &Member) -> Result<bool> {
        let removed = self
            .change_directory(site, |directory| Ok(directory.remove_member(group, member)))
            .await?;
        if removed {
            info!("Removed {} from group '{}'", member, group);
        }
        Ok(removed)
    }

    /// Apply `change` to a copy of the site directory. The copy is saved and
    /// only then replaces the live directory, so a failed save changes nothing.
    async fn change_directory(
        &self,
        site: &str,
        change: impl FnOnce(&mut Directory) -> Result<bool>,
    ) -> Result<bool> {
        let site = self.enabled_site(site).await?;
        let mut directory = site.directory().write().await;
        let mut updated = directory.clone();
        if !change(&mut updated)? {
            return Ok(false);
        }
        site.save(&updated)
            .await
            .with_context(|| format!("Failed to save directory of site '{}'", site.identifier()))?;
        *directory = updated;
        Ok(true)
    }

    /// Lease an instance of `module`'s action for `method` on behalf of `login`
    pub async fn lease_action(
        &self,
        site: &str,
        module: &str,
        action: &str,
        method: &str,
        login: &str,
    ) -> Result<Lease<ActionInstance>> {
        let site = self.enabled_site(site).await?;
        let claims = site.claims(login).await?;
        site.registry()
            .lease_action(module, action, method, &claims)
            .with_context(|| format!("Cannot serve {module}/{action} as {method}"))
    }
}
