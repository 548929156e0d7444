use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info};

use super::action::{ActionHandlerBundle, ActionInstance};
use super::pool::Lease;
use super::{DispatchError, Result};
use crate::security::ClaimSet;

/// A unit of site functionality: actions plus the names of the renderers,
/// jobs and image styles it provides.
#[derive(Debug)]
pub struct Module {
    identifier: String,
    enabled: bool,
    running: bool,
    actions: BTreeMap<String, Arc<ActionHandlerBundle>>,
    renderers: BTreeSet<String>,
    jobs: BTreeSet<String>,
    image_styles: BTreeSet<String>,
    options: BTreeMap<String, Vec<String>>,
}

impl Module {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            enabled: true,
            running: false,
            actions: BTreeMap::new(),
            renderers: BTreeSet::new(),
            jobs: BTreeSet::new(),
            image_styles: BTreeSet::new(),
            options: BTreeMap::new(),
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn add_action(&mut self, bundle: ActionHandlerBundle) {
        self.actions
            .insert(bundle.identifier().to_string(), Arc::new(bundle));
    }

    pub fn action(&self, identifier: &str) -> Option<&Arc<ActionHandlerBundle>> {
        self.actions.get(identifier)
    }

    pub fn actions(&self) -> impl Iterator<Item = &Arc<ActionHandlerBundle>> {
        self.actions.values()
    }

    pub fn add_renderer(&mut self, identifier: impl Into<String>) {
        self.renderers.insert(identifier.into());
    }

    pub fn add_job(&mut self, identifier: impl Into<String>) {
        self.jobs.insert(identifier.into());
    }

    pub fn add_image_style(&mut self, identifier: impl Into<String>) {
        self.image_styles.insert(identifier.into());
    }

    pub fn set_option(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.options
            .entry(name.into())
            .or_default()
            .push(value.into());
    }

    /// First value of option `name`
    pub fn option(&self, name: &str) -> Option<&str> {
        self.options
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    pub fn option_values(&self, name: &str) -> &[String] {
        self.options.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    /// Register everything this module provides with `registry`. Pools
    /// closed by an earlier [`stop`](Module::stop) accept leases again.
    pub fn start(&mut self, registry: &SiteRegistry) -> Result<()> {
        debug!("Starting module '{}'", self.identifier);
        if self.running {
            return Err(self.state_error("is already running"));
        }
        if !self.enabled {
            return Err(self.state_error("is disabled and cannot be started"));
        }
        registry.register(self)?;
        self.actions.values().for_each(|bundle| bundle.reopen());
        self.running = true;
        info!("Module '{}' started", self.identifier);
        Ok(())
    }

    /// Unregister this module and close its action pools
    pub fn stop(&mut self, registry: &SiteRegistry) -> Result<()> {
        debug!("Stopping module '{}'", self.identifier);
        if !self.running {
            return Err(self.state_error("is not running"));
        }
        registry.unregister(&self.identifier);
        self.actions.values().for_each(|bundle| bundle.close());
        self.running = false;
        info!("Module '{}' stopped", self.identifier);
        Ok(())
    }

    fn state_error(&self, reason: &'static str) -> DispatchError {
        DispatchError::ModuleState {
            module: self.identifier.clone(),
            reason,
        }
    }
}

#[derive(Debug, Default)]
struct Registered {
    actions: BTreeMap<String, Arc<ActionHandlerBundle>>,
    renderers: BTreeSet<String>,
    jobs: BTreeSet<String>,
    image_styles: BTreeSet<String>,
}

/// Everything the running modules of one site provide
#[derive(Debug, Default)]
pub struct SiteRegistry {
    modules: RwLock<BTreeMap<String, Registered>>,
}

impl SiteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, module: &Module) -> Result<()> {
        let mut modules = self.modules.write();
        if modules.contains_key(module.identifier()) {
            return Err(DispatchError::AlreadyRegistered {
                kind: "Module",
                id: module.identifier().to_string(),
            });
        }
        modules.insert(
            module.identifier().to_string(),
            Registered {
                actions: module.actions.clone(),
                renderers: module.renderers.clone(),
                jobs: module.jobs.clone(),
                image_styles: module.image_styles.clone(),
            },
        );
        Ok(())
    }

    fn unregister(&self, module: &str) {
        self.modules.write().remove(module);
    }

    pub fn modules(&self) -> Vec<String> {
        self.modules.read().keys().cloned().collect()
    }

    pub fn action(&self, module: &str, action: &str) -> Option<Arc<ActionHandlerBundle>> {
        self.modules
            .read()
            .get(module)
            .and_then(|m| m.actions.get(action))
            .cloned()
    }

    /// Lease action `action` of `module` for `method` on behalf of `claims`
    pub fn lease_action(
        &self,
        module: &str,
        action: &str,
        method: &str,
        claims: &ClaimSet,
    ) -> Result<Lease<ActionInstance>> {
        let bundle = self
            .action(module, action)
            .ok_or_else(|| DispatchError::UnknownAction {
                module: module.to_string(),
                action: action.to_string(),
            })?;
        bundle.lease_authorized(method, claims)
    }

    /// Qualified `module/renderer` names
    pub fn renderers(&self) -> Vec<String> {
        self.qualified(|m| &m.renderers)
    }

    pub fn jobs(&self) -> Vec<String> {
        self.qualified(|m| &m.jobs)
    }

    pub fn image_styles(&self) -> Vec<String> {
        self.qualified(|m| &m.image_styles)
    }

    fn qualified(&self, names: impl Fn(&Registered) -> &BTreeSet<String>) -> Vec<String> {
        self.modules
            .read()
            .iter()
            .flat_map(|(module, registered)| {
                names(registered)
                    .iter()
                    .map(move |name| format!("{module}/{name}"))
            })
            .collect()
    }
}
