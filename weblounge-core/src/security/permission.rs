use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use super::error::{Result, SecurityError};

/// Split a `context:identifier` string at its first colon.
///
/// Both parts must be non-empty, so the colon may be neither the first nor
/// the last character.
pub(crate) fn split_qualified(value: &str) -> Result<(&str, &str)> {
    let invalid = |reason| SecurityError::InvalidPermission {
        value: value.to_string(),
        reason,
    };
    match value.find(':') {
        None => Err(invalid("missing ':' separator")),
        Some(0) => Err(invalid("context must not be empty")),
        Some(pos) if pos == value.len() - 1 => Err(invalid("identifier must not be empty")),
        Some(pos) => Ok((&value[..pos], &value[pos + 1..])),
    }
}

/// A named capability, identified by context and identifier
/// (`system:write`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Permission {
    context: String,
    identifier: String,
}

impl Permission {
    pub fn new(context: impl Into<String>, identifier: impl Into<String>) -> Result<Self> {
        let context = context.into();
        let identifier = identifier.into();
        if context.is_empty() || identifier.is_empty() {
            return Err(SecurityError::InvalidPermission {
                value: format!("{context}:{identifier}"),
                reason: "context and identifier must not be empty",
            });
        }
        Ok(Self {
            context,
            identifier,
        })
    }

    /// For identifiers known to be non-empty
    pub(crate) fn from_parts(context: &str, identifier: &str) -> Self {
        Self {
            context: context.to_string(),
            identifier: identifier.to_string(),
        }
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }
}

impl FromStr for Permission {
    type Err = SecurityError;

    fn from_str(s: &str) -> Result<Self> {
        let (context, identifier) = split_qualified(s.trim())?;
        Ok(Self {
            context: context.to_string(),
            identifier: identifier.to_string(),
        })
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.context, self.identifier)
    }
}

impl Serialize for Permission {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Permission {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Where a permission is filed inside a [`PermissionSet`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchType {
    /// Required in every case
    #[default]
    All,
    /// One of the alternatives
    One,
}

/// A composite requirement: every permission of `all_of` and at least one
/// permission of `one_of`.
///
/// An empty `one_of` is satisfied by anybody ("one of zero options").
/// Security definitions written for weblounge rely on this, so it is kept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSet {
    #[serde(default)]
    all_of: BTreeSet<Permission>,
    #[serde(default)]
    one_of: BTreeSet<Permission>,
}

impl PermissionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, permission: Permission, match_type: MatchType) {
        match match_type {
            MatchType::All => self.all_of.insert(permission),
            MatchType::One => self.one_of.insert(permission),
        };
    }

    /// Builder flavour of [`PermissionSet::add`] with [`MatchType::All`]
    pub fn require(mut self, permission: Permission) -> Self {
        self.add(permission, MatchType::All);
        self
    }

    /// Builder flavour of [`PermissionSet::add`] with [`MatchType::One`]
    pub fn alternatively(mut self, permission: Permission) -> Self {
        self.add(permission, MatchType::One);
        self
    }

    /// The permissions that are all required
    pub fn all(&self) -> impl Iterator<Item = &Permission> {
        self.all_of.iter()
    }

    /// The alternatives of which one is required
    pub fn some(&self) -> impl Iterator<Item = &Permission> {
        self.one_of.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.all_of.is_empty() && self.one_of.is_empty()
    }

    /// True if `check` grants every permission of `all_of`
    pub fn check_all_of(&self, mut check: impl FnMut(&Permission) -> bool) -> bool {
        self.all_of.iter().all(|p| check(p))
    }

    /// True if `check` grants one permission of `one_of`, or `one_of` is empty
    pub fn check_one_of(&self, mut check: impl FnMut(&Permission) -> bool) -> bool {
        self.one_of.is_empty() || self.one_of.iter().any(|p| check(p))
    }

    /// `check_one_of && check_all_of`
    pub fn is_satisfied_by(&self, mut check: impl FnMut(&Permission) -> bool) -> bool {
        self.check_one_of(&mut check) && self.check_all_of(&mut check)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> Permission {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_permission() {
        let permission = p("system:write");
        assert_eq!(permission.context(), "system");
        assert_eq!(permission.identifier(), "write");
        assert_eq!(permission.to_string(), "system:write");
    }

    #[test]
    fn test_parse_splits_at_first_colon() {
        let permission = p("site:pages:edit");
        assert_eq!(permission.context(), "site");
        assert_eq!(permission.identifier(), "pages:edit");
    }

    #[test]
    fn test_parse_rejects_malformed_permissions() {
        for value in ["system", ":write", "system:", "", ":"] {
            let result = value.parse::<Permission>();
            assert!(
                matches!(result, Err(SecurityError::InvalidPermission { .. })),
                "'{value}' should be rejected"
            );
        }
    }

    #[test]
    fn test_new_rejects_empty_parts() {
        assert!(Permission::new("", "write").is_err());
        assert!(Permission::new("system", "").is_err());
        assert_eq!(Permission::new("system", "write").unwrap(), p("system:write"));
    }

    #[test]
    fn test_permission_serde_uses_string_form() {
        let json = serde_json::to_string(&p("system:read")).unwrap();
        assert_eq!(json, "\"system:read\"");
        let back: Permission = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p("system:read"));
        assert!(serde_json::from_str::<Permission>("\"system\"").is_err());
    }

    #[test]
    fn test_empty_one_of_is_vacuously_satisfied() {
        let set = PermissionSet::new().require(p("system:read"));
        assert!(set.check_one_of(|_| false));
        assert!(set.is_satisfied_by(|_| true));
        assert!(!set.is_satisfied_by(|_| false));
    }

    #[test]
    fn test_all_of_requires_every_permission() {
        let set = PermissionSet::new()
            .require(p("system:read"))
            .require(p("system:write"));
        assert!(!set.check_all_of(|perm| perm.identifier() == "read"));
        assert!(set.check_all_of(|_| true));
        assert!(PermissionSet::new().check_all_of(|_| false));
    }

    #[test]
    fn test_one_of_requires_a_single_alternative() {
        let set = PermissionSet::new()
            .require(p("system:read"))
            .alternatively(p("system:write"))
            .alternatively(p("system:publish"));

        assert!(set.is_satisfied_by(|perm| perm.identifier() != "write"));
        assert!(!set.is_satisfied_by(|perm| perm.identifier() == "read"));
        assert!(!set.is_satisfied_by(|perm| perm.identifier() == "publish"));
    }

    #[test]
    fn test_add_files_by_match_type() {
        let mut set = PermissionSet::new();
        set.add(p("system:read"), MatchType::default());
        set.add(p("system:write"), MatchType::One);
        assert_eq!(set.all().count(), 1);
        assert_eq!(set.some().collect::<Vec<_>>(), vec![&p("system:write")]);
    }
}
