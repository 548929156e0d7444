use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use super::authority::{Authority, ClaimSet};
use super::context::{
    authority_type_from_element, owner_element, owner_from_element, permission_from_element,
    SecurityContext, SecurityOptions,
};
use super::error::{Result, SecurityError};
use super::permission::Permission;
use super::restriction::RuleSet;
use super::xml::{split_ids, Element};

type Grants = BTreeMap<Permission, BTreeSet<Authority>>;

/// A security context made of plain grants.
///
/// Explicit grants are persisted with the secured object. Default grants are
/// supplied by the site at runtime, are never written out, and apply only
/// until the first explicit grant for the same permission replaces them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionSecurityContext {
    owner: Option<String>,
    explicit: Grants,
    defaults: Grants,
}

fn revoke(grants: &mut Grants, permission: &Permission, authority: &Authority) {
    if let Some(authorities) = grants.get_mut(permission) {
        authorities.remove(authority);
        if authorities.is_empty() {
            grants.remove(permission);
        }
    }
}

impl PermissionSecurityContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_owner(&mut self, owner: Option<String>) {
        self.owner = owner;
    }

    /// Grant `permission` to `authority` explicitly. All default grants of
    /// `permission` are dropped.
    pub fn allow(&mut self, permission: Permission, authority: Authority) {
        self.defaults.remove(&permission);
        self.explicit.entry(permission).or_default().insert(authority);
    }

    pub fn allow_default(&mut self, permission: Permission, authority: Authority) {
        self.defaults.entry(permission).or_default().insert(authority);
    }

    /// Withdraw `permission` from `authority`, explicit and default alike
    pub fn deny(&mut self, permission: &Permission, authority: &Authority) {
        revoke(&mut self.explicit, permission, authority);
        revoke(&mut self.defaults, permission, authority);
    }

    pub fn deny_all_for(&mut self, permission: &Permission) {
        self.explicit.remove(permission);
        self.defaults.remove(permission);
    }

    pub fn deny_all(&mut self) {
        self.explicit.clear();
        self.defaults.clear();
    }

    /// Explicit grants of `permission` only
    pub fn explicitly_allowed(&self, permission: &Permission) -> BTreeSet<Authority> {
        self.explicit.get(permission).cloned().unwrap_or_default()
    }

    pub fn from_element(element: &Element, options: &SecurityOptions) -> Result<Self> {
        let mut context = Self::new();
        context.owner = owner_from_element(element);

        for entry in element.children_named("permission") {
            let permission = permission_from_element(entry)?;
            let ids: Vec<&str> = split_ids(entry.text()).collect();
            if ids.is_empty() {
                continue;
            }
            let authority_type = authority_type_from_element(entry, options).map_err(|e| {
                SecurityError::configuration_caused_by(
                    format!("Malformed grant of permission '{permission}'"),
                    e,
                )
            })?;
            for id in ids {
                context.allow(
                    permission.clone(),
                    Authority::new(authority_type.clone(), id),
                );
            }
        }
        Ok(context)
    }

    pub fn from_xml(xml: &str, options: &SecurityOptions) -> Result<Self> {
        let element = Element::parse(xml).map_err(|e| {
            SecurityError::configuration_caused_by("Unreadable security definition", e)
        })?;
        Self::from_element(&element, options)
    }
}

impl SecurityContext for PermissionSecurityContext {
    fn check_claims(&self, permission: &Permission, claims: &ClaimSet) -> bool {
        let granted_by = |grants: &Grants| {
            grants
                .get(permission)
                .is_some_and(|authorities| claims.iter().any(|a| authorities.contains(a)))
        };
        let granted = granted_by(&self.defaults) || granted_by(&self.explicit);
        debug!(
            "Permission '{}' {} for {} claimed authorities",
            permission,
            if granted { "granted" } else { "not granted" },
            claims.len()
        );
        granted
    }

    fn permissions(&self) -> BTreeSet<Permission> {
        self.explicit
            .keys()
            .chain(self.defaults.keys())
            .cloned()
            .collect()
    }

    fn allowed(&self, permission: &Permission) -> RuleSet {
        let mut authorities = self.explicitly_allowed(permission);
        if let Some(defaults) = self.defaults.get(permission) {
            authorities.extend(defaults.iter().cloned());
        }
        RuleSet::Only(authorities)
    }

    fn denied(&self, _permission: &Permission) -> RuleSet {
        RuleSet::none()
    }

    fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    fn to_element(&self, options: &SecurityOptions) -> Element {
        let mut root = Element::new("security");
        if let Some(owner) = owner_element(self.owner()) {
            root.push_child(owner);
        }
        for (permission, authorities) in &self.explicit {
            let mut by_type: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
            for authority in authorities {
                by_type
                    .entry(authority.authority_type())
                    .or_default()
                    .push(authority.authority_id());
            }
            for (authority_type, ids) in by_type {
                root.push_child(
                    Element::new("permission")
                        .with_attribute("id", permission.to_string())
                        .with_attribute("type", options.types.shortcut_for(authority_type))
                        .with_text(ids.join(",")),
                );
            }
        }
        root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreeset;
    use crate::security::authority::{GROUP_TYPE, ROLE_TYPE};

    fn p(s: &str) -> Permission {
        s.parse().unwrap()
    }

    #[test]
    fn test_explicit_grant_replaces_defaults() {
        let mut context = PermissionSecurityContext::new();
        let a = Authority::new(ROLE_TYPE, "system:guest");
        let b = Authority::new(ROLE_TYPE, "system:editor");

        context.allow_default(p("system:read"), a.clone());
        assert!(context.check(&p("system:read"), &a));

        context.allow(p("system:read"), b.clone());
        assert!(!context.check(&p("system:read"), &a));
        assert!(context.check(&p("system:read"), &b));
    }

    #[test]
    fn test_defaults_of_other_permissions_survive() {
        let mut context = PermissionSecurityContext::new();
        let guest = Authority::new(ROLE_TYPE, "system:guest");
        context.allow_default(p("system:read"), guest.clone());
        context.allow(p("system:write"), Authority::user("jane"));
        assert!(context.check(&p("system:read"), &guest));
        assert_eq!(
            context.permissions(),
            btreeset! {p("system:read"), p("system:write")}
        );
    }

    #[test]
    fn test_deny_removes_from_both_maps() {
        let mut context = PermissionSecurityContext::new();
        let jane = Authority::user("jane");
        context.allow_default(p("system:read"), jane.clone());
        context.allow(p("system:write"), jane.clone());

        context.deny(&p("system:read"), &jane);
        context.deny(&p("system:write"), &jane);
        assert!(!context.check(&p("system:read"), &jane));
        assert!(!context.check(&p("system:write"), &jane));
        assert!(context.permissions().is_empty());
    }

    #[test]
    fn test_deny_all() {
        let mut context = PermissionSecurityContext::new();
        let jane = Authority::user("jane");
        context.allow(p("system:read"), jane.clone());
        context.allow(p("system:write"), jane.clone());

        context.deny_all_for(&p("system:read"));
        assert!(!context.check(&p("system:read"), &jane));
        assert!(context.check(&p("system:write"), &jane));

        context.deny_all();
        assert!(context.permissions().is_empty());
    }

    #[test]
    fn test_allowed_is_union_and_denied_is_empty() {
        let mut context = PermissionSecurityContext::new();
        context.allow_default(p("system:read"), Authority::user("jane"));
        context.allow_default(p("system:write"), Authority::user("jane"));
        context.allow(p("system:write"), Authority::user("joe"));

        assert_eq!(
            context.allowed(&p("system:read")),
            RuleSet::Only(btreeset! {Authority::user("jane")})
        );
        assert_eq!(
            context.allowed(&p("system:write")),
            RuleSet::Only(btreeset! {Authority::user("joe")})
        );
        assert_eq!(context.denied(&p("system:write")), RuleSet::none());
    }

    #[test]
    fn test_xml_persists_explicit_grants_only() {
        let options = SecurityOptions::default();
        let mut context = PermissionSecurityContext::new();
        context.set_owner(Some("jane".to_string()));
        context.allow(p("system:read"), Authority::new(ROLE_TYPE, "system:guest"));
        context.allow(p("system:read"), Authority::new(ROLE_TYPE, "system:editor"));
        context.allow(p("system:read"), Authority::new(GROUP_TYPE, "site:staff"));
        context.allow_default(p("system:write"), Authority::user("joe"));

        let xml = context.to_xml(&options);
        assert!(xml.contains("<owner>jane</owner>"));
        assert!(xml.contains(
            "<permission id=\"system:read\" type=\"role\">system:editor,system:guest</permission>"
        ));
        assert!(xml.contains("<permission id=\"system:read\" type=\"group\">site:staff</permission>"));
        assert!(!xml.contains("system:write"));

        let parsed = PermissionSecurityContext::from_xml(&xml, &options).unwrap();
        assert_eq!(parsed.owner(), Some("jane"));
        assert!(parsed.check(&p("system:read"), &Authority::new(GROUP_TYPE, "site:staff")));
        assert!(!parsed.check(&p("system:write"), &Authority::user("joe")));
    }

    #[test]
    fn test_parse_splits_id_lists() {
        let xml = r#"<security>
              <permission id="system:write" type="user">jane; joe ,  max</permission>
            </security>"#;
        let context =
            PermissionSecurityContext::from_xml(xml, &SecurityOptions::default()).unwrap();
        assert_eq!(context.explicitly_allowed(&p("system:write")).len(), 3);
        assert!(context.check(&p("system:write"), &Authority::user("max")));
    }

    #[test]
    fn test_parse_rejects_broken_entries() {
        let options = SecurityOptions::default();
        for xml in [
            r#"<security><permission type="user">jane</permission></security>"#,
            r#"<security><permission id="write" type="user">jane</permission></security>"#,
            r#"<security><permission id="system:write">jane</permission></security>"#,
        ] {
            let err = PermissionSecurityContext::from_xml(xml, &options).unwrap_err();
            assert!(err.is_configuration_error(), "{xml}");
        }
    }
}
