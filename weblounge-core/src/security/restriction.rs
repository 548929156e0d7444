use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use super::authority::{Authority, ClaimSet, RuleMatching};
use super::error::SecurityError;
use super::permission::Permission;

/// Which rule list wins when a caller is named in both or in neither
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EvaluationOrder {
    /// Granted if allowed, or else if not denied
    #[default]
    AllowDeny,
    /// Granted only if allowed and not denied
    DenyAllow,
}

impl EvaluationOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            EvaluationOrder::AllowDeny => "allow,deny",
            EvaluationOrder::DenyAllow => "deny,allow",
        }
    }
}

impl fmt::Display for EvaluationOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EvaluationOrder {
    type Err = SecurityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_lowercase();
        match normalized.as_str() {
            "allow,deny" => Ok(EvaluationOrder::AllowDeny),
            "deny,allow" => Ok(EvaluationOrder::DenyAllow),
            _ => Err(SecurityError::configuration(format!(
                "Unknown evaluation order '{s}', expected 'allow,deny' or 'deny,allow'"
            ))),
        }
    }
}

impl Serialize for EvaluationOrder {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EvaluationOrder {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// The authorities an allow or deny list applies to.
///
/// `All` matches every caller. `Only` with an empty set matches nobody; the
/// two are different states and are never collapsed into one another.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RuleSet {
    #[default]
    All,
    Only(BTreeSet<Authority>),
}

impl RuleSet {
    pub fn none() -> Self {
        RuleSet::Only(BTreeSet::new())
    }

    pub fn is_all(&self) -> bool {
        matches!(self, RuleSet::All)
    }

    /// Add `authority`. A wildcard becomes an explicit list holding only it.
    pub fn insert(&mut self, authority: Authority) {
        match self {
            RuleSet::All => *self = RuleSet::Only(BTreeSet::from([authority])),
            RuleSet::Only(set) => {
                set.insert(authority);
            }
        }
    }

    pub fn matches(&self, claims: &ClaimSet, matching: RuleMatching) -> bool {
        match self {
            RuleSet::All => true,
            RuleSet::Only(rules) => claims.matches_any(rules, matching),
        }
    }

    /// The explicitly listed authorities; empty for the wildcard
    pub fn authorities(&self) -> impl Iterator<Item = &Authority> {
        let set = match self {
            RuleSet::All => None,
            RuleSet::Only(set) => Some(set),
        };
        set.into_iter().flatten()
    }

    pub fn of_type<'a>(&'a self, authority_type: &'a str) -> impl Iterator<Item = &'a Authority> {
        self.authorities()
            .filter(move |a| a.authority_type() == authority_type)
    }
}

/// Allow and deny rules for one permission, evaluated in a fixed order.
///
/// A fresh restriction allows and denies everybody; under
/// [`EvaluationOrder::AllowDeny`] that grants the permission to all callers,
/// under [`EvaluationOrder::DenyAllow`] to none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Restriction {
    permission: Permission,
    order: EvaluationOrder,
    allow: RuleSet,
    deny: RuleSet,
    matching: RuleMatching,
}

impl Restriction {
    pub fn new(permission: Permission, order: EvaluationOrder) -> Self {
        Self {
            permission,
            order,
            allow: RuleSet::All,
            deny: RuleSet::All,
            matching: RuleMatching::default(),
        }
    }

    pub fn with_rule_matching(mut self, matching: RuleMatching) -> Self {
        self.matching = matching;
        self
    }

    pub fn permission(&self) -> &Permission {
        &self.permission
    }

    pub fn order(&self) -> EvaluationOrder {
        self.order
    }

    pub fn set_order(&mut self, order: EvaluationOrder) {
        self.order = order;
    }

    pub fn rule_matching(&self) -> RuleMatching {
        self.matching
    }

    pub fn set_rule_matching(&mut self, matching: RuleMatching) {
        self.matching = matching;
    }

    pub fn allow(&mut self, authority: Authority) {
        self.allow.insert(authority);
    }

    pub fn allow_all(&mut self) {
        self.allow = RuleSet::All;
    }

    /// Allow nobody explicitly
    pub fn allow_none(&mut self) {
        self.allow = RuleSet::none();
    }

    pub fn deny(&mut self, authority: Authority) {
        self.deny.insert(authority);
    }

    pub fn deny_all(&mut self) {
        self.deny = RuleSet::All;
    }

    /// Deny nobody explicitly
    pub fn deny_none(&mut self) {
        self.deny = RuleSet::none();
    }

    pub fn is_allowed(&self, claims: &ClaimSet) -> bool {
        self.allow.matches(claims, self.matching)
    }

    pub fn is_denied(&self, claims: &ClaimSet) -> bool {
        self.deny.matches(claims, self.matching)
    }

    pub fn check(&self, claims: &ClaimSet) -> bool {
        match self.order {
            EvaluationOrder::AllowDeny => self.is_allowed(claims) || !self.is_denied(claims),
            EvaluationOrder::DenyAllow => !self.is_denied(claims) && self.is_allowed(claims),
        }
    }

    pub fn allowed(&self) -> &RuleSet {
        &self.allow
    }

    pub fn denied(&self) -> &RuleSet {
        &self.deny
    }

    pub fn allowed_of_type<'a>(&'a self, authority_type: &'a str) -> Vec<&'a Authority> {
        self.allow.of_type(authority_type).collect()
    }

    pub fn denied_of_type<'a>(&'a self, authority_type: &'a str) -> Vec<&'a Authority> {
        self.deny.of_type(authority_type).collect()
    }

    /// Authority types named by any explicit rule
    pub fn types(&self) -> BTreeSet<&str> {
        self.allow
            .authorities()
            .chain(self.deny.authorities())
            .map(Authority::authority_type)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::authority::{GROUP_TYPE, ROLE_TYPE, USER_TYPE};

    fn x() -> Authority {
        Authority::user("x")
    }

    fn y() -> Authority {
        Authority::user("y")
    }

    fn z() -> Authority {
        Authority::user("z")
    }

    fn restriction(
        order: EvaluationOrder,
        allow: Option<Vec<Authority>>,
        deny: Option<Vec<Authority>>,
    ) -> Restriction {
        let mut r = Restriction::new("system:read".parse().unwrap(), order);
        if let Some(allow) = allow {
            r.allow_none();
            allow.into_iter().for_each(|a| r.allow(a));
        }
        if let Some(deny) = deny {
            r.deny_none();
            deny.into_iter().for_each(|a| r.deny(a));
        }
        r
    }

    #[test]
    fn test_evaluation_order_matrix() {
        use EvaluationOrder::{AllowDeny, DenyAllow};
        let claims = ClaimSet::from(x());
        // (allow, deny, allow-deny outcome, deny-allow outcome), None = wildcard
        let cases = vec![
            (None, None, true, false),
            (None, Some(vec![x()]), true, false),
            (None, Some(vec![y()]), true, true),
            (Some(vec![x()]), None, true, false),
            (Some(vec![y()]), None, false, false),
            (Some(vec![x()]), Some(vec![x()]), true, false),
            (Some(vec![y()]), Some(vec![x()]), false, false),
            (Some(vec![y()]), Some(vec![y()]), true, false),
            (Some(vec![x()]), Some(vec![y()]), true, true),
            (Some(vec![y()]), Some(vec![z()]), true, false),
            (Some(vec![]), Some(vec![]), true, false),
            (Some(vec![x()]), Some(vec![]), true, true),
        ];

        for (i, (allow, deny, allow_deny, deny_allow)) in cases.into_iter().enumerate() {
            let r = restriction(AllowDeny, allow.clone(), deny.clone());
            assert_eq!(r.check(&claims), allow_deny, "case {i} with allow,deny");
            let r = restriction(DenyAllow, allow, deny);
            assert_eq!(r.check(&claims), deny_allow, "case {i} with deny,allow");
        }
    }

    #[test]
    fn test_wildcard_and_empty_list_differ() {
        let claims = ClaimSet::from(x());
        let mut r = Restriction::new("system:read".parse().unwrap(), EvaluationOrder::DenyAllow);
        r.deny_none();
        assert!(r.check(&claims));
        r.allow_none();
        assert!(!r.check(&claims));
        r.allow_all();
        assert!(r.check(&claims));
    }

    #[test]
    fn test_any_claim_may_match() {
        let editor = Authority::new(ROLE_TYPE, "system:editor");
        let mut r = restriction(EvaluationOrder::DenyAllow, Some(vec![editor.clone()]), Some(vec![]));
        assert!(!r.check(&ClaimSet::from(x())));
        assert!(r.check(&ClaimSet::from_iter([x(), editor])));

        r.deny(Authority::new(GROUP_TYPE, "site:blocked"));
        let claims = ClaimSet::from_iter([
            Authority::new(ROLE_TYPE, "system:editor"),
            Authority::new(GROUP_TYPE, "site:blocked"),
        ]);
        assert!(!r.check(&claims));
    }

    #[test]
    fn test_legacy_matching_is_opt_in() {
        let rule = Authority::new(ROLE_TYPE, "system:editor");
        let other_role = ClaimSet::from(Authority::new(ROLE_TYPE, "system:guest"));

        let strict = restriction(EvaluationOrder::DenyAllow, Some(vec![rule.clone()]), Some(vec![]));
        assert!(!strict.check(&other_role));

        let legacy = strict.with_rule_matching(RuleMatching::Legacy);
        assert!(legacy.check(&other_role));
    }

    #[test]
    fn test_introspection() {
        let r = restriction(
            EvaluationOrder::AllowDeny,
            Some(vec![x(), Authority::new(ROLE_TYPE, "system:editor")]),
            None,
        );
        assert_eq!(r.types(), BTreeSet::from([USER_TYPE, ROLE_TYPE]));
        assert_eq!(r.allowed_of_type(USER_TYPE), vec![&x()]);
        assert!(r.denied().is_all());
        assert!(r.denied_of_type(USER_TYPE).is_empty());
    }

    #[test]
    fn test_parse_evaluation_order() {
        assert_eq!(
            "allow,deny".parse::<EvaluationOrder>().unwrap(),
            EvaluationOrder::AllowDeny
        );
        assert_eq!(
            " Deny, Allow ".parse::<EvaluationOrder>().unwrap(),
            EvaluationOrder::DenyAllow
        );
        assert!("allow".parse::<EvaluationOrder>().is_err());
        assert_eq!(EvaluationOrder::DenyAllow.to_string(), "deny,allow");
    }
}
