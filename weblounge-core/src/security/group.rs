use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use super::authority::{Authority, GROUP_TYPE};
use super::error::{Result, SecurityError};
use super::permission::split_qualified;
use super::role::{Role, RoleId};

/// Identifier of a group, `context:identifier` (`site:editors`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId {
    context: String,
    identifier: String,
}

impl GroupId {
    pub fn new(context: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            identifier: identifier.into(),
        }
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn authority(&self) -> Authority {
        Authority::new(GROUP_TYPE, self.to_string())
    }
}

impl FromStr for GroupId {
    type Err = SecurityError;

    fn from_str(s: &str) -> Result<Self> {
        let (context, identifier) = split_qualified(s.trim())?;
        Ok(Self::new(context, identifier))
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.context, self.identifier)
    }
}

impl Serialize for GroupId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for GroupId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A named authority owning roles.
///
/// Who belongs to a group is not stored here but in the
/// [`MembershipGraph`](super::MembershipGraph), which keeps both directions of
/// every membership edge in one place.
#[derive(Debug, Clone)]
pub struct Group {
    id: GroupId,
    description: String,
    roles: BTreeSet<Arc<Role>>,
}

impl Group {
    pub fn new(id: GroupId, description: impl Into<String>) -> Self {
        Self {
            id,
            description: description.into(),
            roles: BTreeSet::new(),
        }
    }

    pub fn id(&self) -> &GroupId {
        &self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn authority(&self) -> Authority {
        self.id.authority()
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

    pub fn roles(&self) -> impl Iterator<Item = &Arc<Role>> {
        self.roles.iter()
    }

    /// Whether this group owns `role` itself or a role extending it.
    /// Roles inherited through parent groups are resolved by the
    /// [`Directory`](super::Directory).
    pub fn owns_role(&self, role: &Arc<Role>) -> bool {
        self.roles.contains(role) || self.roles.iter().any(|r| r.is_extension_of(role))
    }
}

impl PartialEq for Group {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Group {}
