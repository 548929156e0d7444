use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use super::pool::{Lease, Pool};
use super::{DispatchError, Result};
use crate::security::{ClaimSet, PermissionSet, SecurityContext};

/// A security context together with the permissions needed to use the
/// object it protects
#[derive(Debug, Clone)]
pub struct SecuredObject {
    context: Arc<dyn SecurityContext>,
    required: PermissionSet,
}

impl SecuredObject {
    pub fn new(context: Arc<dyn SecurityContext>, required: PermissionSet) -> Self {
        Self { context, required }
    }

    pub fn context(&self) -> &dyn SecurityContext {
        self.context.as_ref()
    }

    pub fn required(&self) -> &PermissionSet {
        &self.required
    }

    pub fn check(&self, claims: &ClaimSet) -> bool {
        self.context.check_set(&self.required, claims)
    }
}

/// A request handler contributed by a module.
///
/// Instances are pooled: [`activate`](Action::activate) runs when an instance
/// is leased for a request and [`passivate`](Action::passivate) when it goes
/// back to the pool.
pub trait Action: Send {
    fn identifier(&self) -> &str;

    /// Security attached to the action. Actions without one are public.
    fn secured_object(&self) -> Option<&SecuredObject> {
        None
    }

    fn check(&self, claims: &ClaimSet) -> bool {
        match self.secured_object() {
            Some(secured) => secured.check(claims),
            None => true,
        }
    }

    fn activate(&mut self) {}

    fn passivate(&mut self) {}
}

pub type ActionInstance = Box<dyn Action>;

/// One action and a pool of instances for every output method it serves
/// (`html`, `json`, `pdf`, ...)
pub struct ActionHandlerBundle {
    identifier: String,
    handlers: BTreeMap<String, Pool<ActionInstance>>,
}

impl ActionHandlerBundle {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            handlers: BTreeMap::new(),
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Serve `method` with instances created by `factory`
    pub fn with_handler(
        mut self,
        method: &str,
        factory: impl Fn() -> ActionInstance + Send + Sync + 'static,
    ) -> Self {
        let method = method.to_lowercase();
        let pool = Pool::new(format!("{}/{}", self.identifier, method), factory)
            .with_reset(|action: &mut ActionInstance| action.passivate());
        self.handlers.insert(method, pool);
        self
    }

    /// Serve `method` from an existing pool
    pub fn add_handler(&mut self, method: &str, pool: Pool<ActionInstance>) {
        self.handlers.insert(method.to_lowercase(), pool);
    }

    pub fn methods(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    pub fn supports(&self, method: &str) -> bool {
        self.handlers.contains_key(&method.to_lowercase())
    }

    pub fn handler(&self, method: &str) -> Option<&Pool<ActionInstance>> {
        self.handlers.get(&method.to_lowercase())
    }

    /// Lease an activated instance serving `method`
    pub fn lease(&self, method: &str) -> Result<Lease<ActionInstance>> {
        let pool = self
            .handler(method)
            .ok_or_else(|| DispatchError::UnsupportedMethod {
                action: self.identifier.clone(),
                method: method.to_string(),
            })?;
        let mut action = pool.lease()?;
        action.activate();
        Ok(action)
    }

    /// Lease an instance for `method` and make sure `claims` may use it.
    /// A refused lease goes straight back to the pool.
    pub fn lease_authorized(
        &self,
        method: &str,
        claims: &ClaimSet,
    ) -> Result<Lease<ActionInstance>> {
        let action = self.lease(method)?;
        if !action.check(claims) {
            debug!("Access to action '{}' denied", self.identifier);
            return Err(DispatchError::AccessDenied(self.identifier.clone()));
        }
        Ok(action)
    }

    pub fn close(&self) {
        self.handlers.values().for_each(Pool::close);
    }

    pub fn reopen(&self) {
        self.handlers.values().for_each(Pool::reopen);
    }
}

impl fmt::Debug for ActionHandlerBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionHandlerBundle")
            .field("identifier", &self.identifier)
            .field("methods", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}
