use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use walkdir::WalkDir;
use weblounge_core::dispatch::SiteRegistry;
use weblounge_core::security::{
    context_from_xml, ClaimSet, Directory, SecurityContext, SecurityOptions,
};

use crate::services::security::config::ConfigManager;
use crate::services::security::types::DirectoryConfig;

/// Users, groups and roles of a site
pub const DIRECTORY_FILE: &str = "security.yaml";
/// Security definitions of the site's objects, one XML file each
pub const CONTEXTS_FOLDER: &str = "contexts";

/// A loaded site.
///
/// The directory sits behind a reader-writer lock: permission checks expand
/// the caller and evaluate under one read guard, changes take the write guard.
#[derive(Debug)]
pub struct Site {
    identifier: String,
    root: PathBuf,
    options: SecurityOptions,
    config: DirectoryConfig,
    directory: RwLock<Directory>,
    contexts: BTreeMap<String, Arc<dyn SecurityContext>>,
    registry: SiteRegistry,
}

impl Site {
    /// Load the site in folder `root`: its `security.yaml` and every XML file
    /// below `contexts/`, keyed by path without extension (`pages/home`)
    pub async fn load(root: &Path, defaults: &SecurityOptions) -> Result<Site> {
        let identifier = root
            .file_name()
            .and_then(|name| name.to_str())
            .context("Site folder has no usable name")?
            .to_string();
        debug!("Loading site '{}' from {}", identifier, root.display());

        let config = ConfigManager::load_config(&root.join(DIRECTORY_FILE)).await?;
        let options = config.options.clone().unwrap_or_else(|| defaults.clone());
        let directory = config
            .build()
            .with_context(|| format!("Invalid directory for site '{identifier}'"))?;
        let contexts = load_contexts(&root.join(CONTEXTS_FOLDER), &options).await?;

        info!(
            "Site '{}' loaded with {} users and {} secured objects",
            identifier,
            directory.users().count(),
            contexts.len()
        );
        Ok(Site {
            identifier,
            root: root.to_path_buf(),
            options,
            config,
            directory: RwLock::new(directory),
            contexts,
            registry: SiteRegistry::new(),
        })
    }

    /// A site that lives in memory only and is never saved
    pub fn new(identifier: impl Into<String>, options: SecurityOptions, directory: Directory) -> Self {
        Self {
            identifier: identifier.into(),
            root: PathBuf::new(),
            options,
            config: DirectoryConfig::default(),
            directory: RwLock::new(directory),
            contexts: BTreeMap::new(),
            registry: SiteRegistry::new(),
        }
    }

    pub fn with_context(mut self, object: impl Into<String>, context: Arc<dyn SecurityContext>) -> Self {
        self.contexts.insert(object.into(), context);
        self
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn options(&self) -> &SecurityOptions {
        &self.options
    }

    pub fn directory(&self) -> &RwLock<Directory> {
        &self.directory
    }

    pub fn context(&self, object: &str) -> Option<Arc<dyn SecurityContext>> {
        self.contexts.get(object).cloned()
    }

    pub fn objects(&self) -> impl Iterator<Item = &str> {
        self.contexts.keys().map(String::as_str)
    }

    pub fn registry(&self) -> &SiteRegistry {
        &self.registry
    }

    pub async fn claims(&self, login: &str) -> Result<ClaimSet> {
        let directory = self.directory.read().await;
        Ok(directory.claims(login)?)
    }

    /// Write the directory back to the site's `security.yaml`. In-memory
    /// sites are not saved.
    pub async fn save(&self, directory: &Directory) -> Result<()> {
        if self.root.as_os_str().is_empty() {
            return Ok(());
        }
        let config = DirectoryConfig::from_directory(directory, &self.config);
        ConfigManager::save_config(&config, &self.root.join(DIRECTORY_FILE)).await
    }

    pub async fn status(&self) -> SiteStatus {
        let directory = self.directory.read().await;
        SiteStatus {
            identifier: self.identifier.clone(),
            state: SiteState::Enabled,
            users: directory.users().count(),
            groups: directory.groups().count(),
            objects: self.contexts.len(),
            modules: self.registry.modules(),
        }
    }
}

async fn load_contexts(
    folder: &Path,
    options: &SecurityOptions,
) -> Result<BTreeMap<String, Arc<dyn SecurityContext>>> {
    let mut contexts = BTreeMap::new();
    if !folder.is_dir() {
        return Ok(contexts);
    }

    for entry in WalkDir::new(folder).sort_by_file_name() {
        let entry = entry.context("Failed to list security definitions")?;
        let path = entry.path();
        if !entry.file_type().is_file() || path.extension().is_none_or(|ext| ext != "xml") {
            continue;
        }

        let object = path
            .strip_prefix(folder)
            .unwrap_or(path)
            .with_extension("")
            .components()
            .filter_map(|c| c.as_os_str().to_str())
            .collect::<Vec<_>>()
            .join("/");
        let xml = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let context = context_from_xml(&xml, options)
            .with_context(|| format!("Invalid security definition {}", path.display()))?;
        debug!("Loaded security definition of '{}'", object);
        contexts.insert(object, Arc::from(context));
    }
    Ok(contexts)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum SiteState {
    Enabled,
    Disabled { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct SiteStatus {
    pub identifier: String,
    #[serde(flatten)]
    pub state: SiteState,
    pub users: usize,
    pub groups: usize,
    pub objects: usize,
    pub modules: Vec<String>,
}

impl SiteStatus {
    pub fn disabled(identifier: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            state: SiteState::Disabled {
                reason: reason.into(),
            },
            users: 0,
            groups: 0,
            objects: 0,
            modules: Vec::new(),
        }
    }
}
