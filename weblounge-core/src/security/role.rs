use parking_lot::RwLock;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::Arc;

use super::authority::{Authority, ROLE_TYPE};
use super::error::{Result, SecurityError};
use super::permission::split_qualified;

/// Identifier of a role, `context:identifier` (`system:editor`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoleId {
    context: String,
    identifier: String,
}

impl RoleId {
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
        Authority::new(ROLE_TYPE, self.to_string())
    }
}

impl FromStr for RoleId {
    type Err = SecurityError;

    fn from_str(s: &str) -> Result<Self> {
        let (context, identifier) = split_qualified(s.trim())?;
        Ok(Self::new(context, identifier))
    }
}

impl fmt::Display for RoleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.context, self.identifier)
    }
}

impl Serialize for RoleId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RoleId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A named authority that may extend other roles.
///
/// A role extending `system:editor` is granted everything an editor is
/// granted. Extension edges are added while a site is configured; the only
/// mutation at request time is the shortcut cache written by
/// [`Role::is_extension_of`]. Shortcuts are kept apart from the declared
/// edges and never show up in [`Role::ancestors`].
pub struct Role {
    id: RoleId,
    ancestors: RwLock<Vec<Arc<Role>>>,
    shortcuts: RwLock<Vec<Arc<Role>>>,
}

impl Role {
    pub fn new(context: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self::with_id(RoleId::new(context, identifier))
    }

    pub fn with_id(id: RoleId) -> Self {
        Self {
            id,
            ancestors: RwLock::new(Vec::new()),
            shortcuts: RwLock::new(Vec::new()),
        }
    }

    pub fn id(&self) -> &RoleId {
        &self.id
    }

    pub fn context(&self) -> &str {
        self.id.context()
    }

    pub fn identifier(&self) -> &str {
        self.id.identifier()
    }

    pub fn authority(&self) -> Authority {
        self.id.authority()
    }

    /// Make this role an extension of `ancestor`.
    ///
    /// Fails if `ancestor` is this role or already extends this role, so a
    /// role hierarchy built through this method never contains a cycle.
    pub fn extend(&self, ancestor: &Arc<Role>) -> Result<()> {
        if ancestor.id == self.id || ancestor.reaches(&self.id) {
            return Err(SecurityError::CyclicRoleHierarchy {
                role: self.id.to_string(),
                ancestor: ancestor.id.to_string(),
            });
        }
        self.attach(ancestor);
        Ok(())
    }

    /// Add a direct ancestor edge without the cycle check
    pub(crate) fn attach(&self, ancestor: &Arc<Role>) {
        let mut ancestors = self.ancestors.write();
        if !ancestors.iter().any(|a| a.id == ancestor.id) {
            ancestors.push(Arc::clone(ancestor));
        }
    }

    /// Whether this role extends `ancestor`, directly or transitively.
    ///
    /// A transitive hit is recorded as a shortcut on every role along the
    /// search path, so the next query is answered without a search.
    pub fn is_extension_of(&self, ancestor: &Arc<Role>) -> bool {
        let mut visited = HashSet::new();
        self.search(ancestor, &mut visited)
    }

    fn search(&self, target: &Arc<Role>, visited: &mut HashSet<RoleId>) -> bool {
        if !visited.insert(self.id.clone()) {
            return false;
        }
        if self.shortcuts.read().iter().any(|a| a.id == target.id) {
            return true;
        }
        let direct = self.ancestors.read().clone();
        if direct.iter().any(|a| a.id == target.id) {
            return true;
        }
        for a in &direct {
            if a.search(target, visited) {
                self.remember(target);
                return true;
            }
        }
        false
    }

    fn remember(&self, ancestor: &Arc<Role>) {
        let mut shortcuts = self.shortcuts.write();
        if !shortcuts.iter().any(|a| a.id == ancestor.id) {
            shortcuts.push(Arc::clone(ancestor));
        }
    }

    /// Whether `id` is reachable through the ancestor edges, without caching
    fn reaches(&self, id: &RoleId) -> bool {
        self.closure().iter().any(|r| &r.id == id)
    }

    /// The declared direct ancestors
    pub fn ancestors(&self) -> Vec<Arc<Role>> {
        self.ancestors.read().clone()
    }

    /// Every role this role extends, transitively. The role itself is not part
    /// of the result.
    pub fn closure(&self) -> Vec<Arc<Role>> {
        let mut seen = HashSet::from([self.id.clone()]);
        let mut queue: VecDeque<Arc<Role>> = self.ancestors().into();
        let mut result = Vec::new();
        while let Some(role) = queue.pop_front() {
            if !seen.insert(role.id.clone()) {
                continue;
            }
            queue.extend(role.ancestors());
            result.push(role);
        }
        result
    }
}

impl PartialEq for Role {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Role {}

impl Hash for Role {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl PartialOrd for Role {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Role {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl fmt::Debug for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ancestors: Vec<String> = self
            .ancestors
            .read()
            .iter()
            .map(|a| a.id.to_string())
            .collect();
        f.debug_struct("Role")
            .field("id", &self.id.to_string())
            .field("ancestors", &ancestors)
            .finish()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.id.fmt(f)
    }
}
