use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Authority type of users
pub const USER_TYPE: &str = "weblounge.security.user";
/// Authority type of roles
pub const ROLE_TYPE: &str = "weblounge.security.role";
/// Authority type of groups
pub const GROUP_TYPE: &str = "weblounge.security.group";

/// An identity claim: a type and an identifier within that type.
///
/// Two authorities are equal if and only if both the type and the identifier
/// are equal. Closure-aware matching (a user claiming the roles it owns, a
/// role claiming its ancestors) is handled by expanding a principal into a
/// [`ClaimSet`], never by loosening equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Authority {
    #[serde(rename = "type")]
    kind: String,
    id: String,
}

impl Authority {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }

    pub fn user(login: impl Into<String>) -> Self {
        Self::new(USER_TYPE, login)
    }

    /// Role authority for a `context:identifier` role id
    pub fn role(id: impl Into<String>) -> Self {
        Self::new(ROLE_TYPE, id)
    }

    /// Group authority for a `context:identifier` group id
    pub fn group(id: impl Into<String>) -> Self {
        Self::new(GROUP_TYPE, id)
    }

    pub fn authority_type(&self) -> &str {
        &self.kind
    }

    pub fn authority_id(&self) -> &str {
        &self.id
    }

    pub fn is_user(&self) -> bool {
        self.kind == USER_TYPE
    }

    pub fn is_role(&self) -> bool {
        self.kind == ROLE_TYPE
    }

    pub fn is_group(&self) -> bool {
        self.kind == GROUP_TYPE
    }
}

impl fmt::Display for Authority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.id, self.kind)
    }
}

/// Translation table between the short type tokens used in security
/// definitions (`user`, `role`, `group`) and fully qualified authority types.
///
/// Every site carries its own table inside its
/// [`SecurityOptions`](super::SecurityOptions); nothing here is global.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthorityTypes {
    shortcuts: BTreeMap<String, String>,
}

impl Default for AuthorityTypes {
    fn default() -> Self {
        let mut types = Self {
            shortcuts: BTreeMap::new(),
        };
        types.register("user", USER_TYPE);
        types.register("role", ROLE_TYPE);
        types.register("group", GROUP_TYPE);
        types
    }
}

impl AuthorityTypes {
    /// Register (or replace) a shortcut
    pub fn register(&mut self, shortcut: impl Into<String>, authority_type: impl Into<String>) {
        self.shortcuts
            .insert(shortcut.into().to_lowercase(), authority_type.into());
    }

    /// Fully qualified type for `shortcut`. Unknown tokens are taken to be
    /// fully qualified already and are returned unchanged.
    pub fn resolve(&self, shortcut: &str) -> String {
        let shortcut = shortcut.trim();
        self.shortcuts
            .get(&shortcut.to_lowercase())
            .cloned()
            .unwrap_or_else(|| shortcut.to_string())
    }

    /// Shortcut for `authority_type`, or the type itself if none is registered
    pub fn shortcut_for(&self, authority_type: &str) -> String {
        self.shortcuts
            .iter()
            .find(|(_, t)| t.as_str() == authority_type)
            .map(|(s, _)| s.clone())
            .unwrap_or_else(|| authority_type.to_string())
    }

    pub fn len(&self) -> usize {
        self.shortcuts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shortcuts.is_empty()
    }
}

/// How an allow or deny rule is compared against a claimed authority.
///
/// This is the only place that answers "does authority A match rule R";
/// every rule evaluation in the engine goes through [`RuleMatching::matches`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleMatching {
    /// Type and identifier must both match
    #[default]
    Strict,
    /// A rule matches if the type OR the identifier matches. This reproduces
    /// the behaviour of older weblounge releases and is known to over-grant:
    /// a rule for role `system:editor` matches every role. Only enable it to
    /// keep legacy site definitions working.
    Legacy,
}

impl RuleMatching {
    pub fn matches(self, rule: &Authority, candidate: &Authority) -> bool {
        match self {
            RuleMatching::Strict => rule.kind == candidate.kind && rule.id == candidate.id,
            RuleMatching::Legacy => rule.kind == candidate.kind || rule.id == candidate.id,
        }
    }
}

/// The authorities presented by a caller in one request.
///
/// A plain authority claims only itself. A user resolved through a
/// [`Directory`](super::Directory) claims its own user authority, every group
/// in its group closure and every role in its role closure, ancestors
/// included.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClaimSet {
    authorities: BTreeSet<Authority>,
}

impl ClaimSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, authority: Authority) -> bool {
        self.authorities.insert(authority)
    }

    pub fn contains(&self, authority: &Authority) -> bool {
        self.authorities.contains(authority)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Authority> {
        self.authorities.iter()
    }

    pub fn len(&self) -> usize {
        self.authorities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.authorities.is_empty()
    }

    /// Whether any claimed authority matches any of `rules`
    pub fn matches_any<'a>(
        &self,
        rules: impl IntoIterator<Item = &'a Authority>,
        matching: RuleMatching,
    ) -> bool {
        rules
            .into_iter()
            .any(|rule| self.authorities.iter().any(|a| matching.matches(rule, a)))
    }
}

impl From<Authority> for ClaimSet {
    fn from(authority: Authority) -> Self {
        Self {
            authorities: BTreeSet::from([authority]),
        }
    }
}

impl FromIterator<Authority> for ClaimSet {
    fn from_iter<I: IntoIterator<Item = Authority>>(iter: I) -> Self {
        Self {
            authorities: iter.into_iter().collect(),
        }
    }
}

impl Extend<Authority> for ClaimSet {
    fn extend<I: IntoIterator<Item = Authority>>(&mut self, iter: I) {
        self.authorities.extend(iter);
    }
}
