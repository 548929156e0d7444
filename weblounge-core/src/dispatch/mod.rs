//! Pooled action dispatch
//!
//! Modules contribute actions, renderers, jobs and image styles to a site.
//! Actions are stateful and not shareable between requests, so every output
//! method of an action is backed by a [`Pool`] of instances that are leased
//! for the duration of one request.

pub mod action;
pub mod module;
pub mod pool;

use crate::security::SecurityError;

pub use action::{Action, ActionHandlerBundle, ActionInstance, SecuredObject};
pub use module::{Module, SiteRegistry};
pub use pool::{Lease, Pool};

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Pool '{0}' has been closed")]
    PoolClosed(String),

    #[error("Pool '{pool}' is exhausted ({max} instances leased)")]
    PoolExhausted { pool: String, max: usize },

    #[error("Action '{action}' does not handle method '{method}'")]
    UnsupportedMethod { action: String, method: String },

    #[error("No action '{action}' registered by module '{module}'")]
    UnknownAction { module: String, action: String },

    #[error("Module '{module}' {reason}")]
    ModuleState { module: String, reason: &'static str },

    #[error("{kind} '{id}' is already registered")]
    AlreadyRegistered { kind: &'static str, id: String },

    #[error("Access to action '{0}' denied")]
    AccessDenied(String),

    #[error(transparent)]
    Security(#[from] SecurityError),
}

pub type Result<T, E = DispatchError> = std::result::Result<T, E>;
