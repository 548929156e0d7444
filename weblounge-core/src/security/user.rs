use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

use super::authority::Authority;
use super::directory::Directory;
use super::error::{Result, SecurityError};
use super::role::{Role, RoleId};

/// A site user and the roles assigned to it directly.
///
/// Group memberships live in the site's
/// [`MembershipGraph`](super::MembershipGraph); the privilege check that
/// combines both is [`Directory::has_role`].
#[derive(Debug, Clone)]
pub struct User {
    login: String,
    profile: Profile,
    enabled: bool,
    roles: BTreeSet<Arc<Role>>,
}

/// Descriptive user attributes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub initials: Option<String>,
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl User {
    pub fn new(login: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            profile: Profile::default(),
            enabled: true,
            roles: BTreeSet::new(),
        }
    }

    pub fn with_profile(mut self, profile: Profile) -> Self {
        self.profile = profile;
        self
    }

    pub fn login(&self) -> &str {
        &self.login
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub fn authority(&self) -> Authority {
        Authority::user(self.login.clone())
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Returns `false` if the role was already assigned
    pub fn assign_role(&mut self, role: Arc<Role>) -> bool {
        self.roles.insert(role)
    }

    /// Returns `false` if the role was not assigned
    pub fn unassign_role(&mut self, role: &RoleId) -> bool {
        let before = self.roles.len();
        self.roles.retain(|r| r.id() != role);
        self.roles.len() != before
    }

    /// Roles assigned directly to this user
    pub fn roles(&self) -> impl Iterator<Item = &Arc<Role>> {
        self.roles.iter()
    }

    /// "First Last", falling back to whichever part exists, then the login
    pub fn name(&self) -> String {
        match (
            non_blank(&self.profile.first_name),
            non_blank(&self.profile.last_name),
        ) {
            (Some(first), Some(last)) => format!("{first} {last}"),
            (Some(first), None) => first.to_string(),
            (None, Some(last)) => last.to_string(),
            (None, None) => self.login.clone(),
        }
    }

    /// "Last, First", with the same fallbacks as [`User::name`]
    pub fn name_reversed(&self) -> String {
        match (
            non_blank(&self.profile.first_name),
            non_blank(&self.profile.last_name),
        ) {
            (Some(first), Some(last)) => format!("{last}, {first}"),
            (Some(first), None) => first.to_string(),
            (None, Some(last)) => last.to_string(),
            (None, None) => self.login.clone(),
        }
    }

    /// Explicit initials, or the first letters of first and last name
    pub fn initials(&self) -> Option<String> {
        if let Some(initials) = non_blank(&self.profile.initials) {
            return Some(initials.to_string());
        }
        let first = non_blank(&self.profile.first_name)?.chars().next()?;
        let last = non_blank(&self.profile.last_name)?.chars().next()?;
        Some(format!("{first}{last}"))
    }
}

impl PartialEq for User {
    fn eq(&self, other: &Self) -> bool {
        self.login == other.login
    }
}

impl Eq for User {}

/// A reference to a user that starts out as a bare login and is resolved
/// against a [`Directory`] when the full record is needed.
#[derive(Debug, Clone)]
pub enum UserRef {
    Unresolved(String),
    Resolved(Arc<User>),
}

impl UserRef {
    pub fn new(login: impl Into<String>) -> Self {
        UserRef::Unresolved(login.into())
    }

    pub fn login(&self) -> &str {
        match self {
            UserRef::Unresolved(login) => login,
            UserRef::Resolved(user) => user.login(),
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, UserRef::Resolved(_))
    }

    /// Resolve the reference, caching the result. An unknown login is an
    /// error and leaves the reference unresolved.
    pub fn resolve(&mut self, directory: &Directory) -> Result<Arc<User>> {
        if let UserRef::Resolved(user) = self {
            return Ok(Arc::clone(user));
        }
        let user = directory
            .user(self.login())
            .ok_or_else(|| SecurityError::UnknownUser(self.login().to_string()))?;
        *self = UserRef::Resolved(Arc::clone(&user));
        Ok(user)
    }
}

impl From<Arc<User>> for UserRef {
    fn from(user: Arc<User>) -> Self {
        UserRef::Resolved(user)
    }
}
