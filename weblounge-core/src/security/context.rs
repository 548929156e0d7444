use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::authority::{Authority, AuthorityTypes, ClaimSet, RuleMatching};
use super::error::{Result, SecurityError};
use super::permission::{Permission, PermissionSet};
use super::permission_context::PermissionSecurityContext;
use super::restriction::RuleSet;
use super::restriction_context::RestrictionSecurityContext;
use super::xml::Element;

/// Per-site settings for reading, writing and evaluating security contexts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityOptions {
    #[serde(default, rename = "type_shortcuts")]
    pub types: AuthorityTypes,
    #[serde(default)]
    pub rule_matching: RuleMatching,
    /// Reject restrictions without an explicit `evaluate` attribute instead of
    /// falling back to `allow,deny`
    #[serde(default = "default_require_evaluation_order")]
    pub require_evaluation_order: bool,
}

fn default_require_evaluation_order() -> bool {
    true
}

impl Default for SecurityOptions {
    fn default() -> Self {
        Self {
            types: AuthorityTypes::default(),
            rule_matching: RuleMatching::default(),
            require_evaluation_order: default_require_evaluation_order(),
        }
    }
}

/// Access rules attached to a secured object.
///
/// The `check_*` helpers are all defined in terms of
/// [`check_claims`](SecurityContext::check_claims).
pub trait SecurityContext: Send + Sync + std::fmt::Debug {
    /// Whether any of `claims` is granted `permission`
    fn check_claims(&self, permission: &Permission, claims: &ClaimSet) -> bool;

    fn check(&self, permission: &Permission, authority: &Authority) -> bool {
        self.check_claims(permission, &ClaimSet::from(authority.clone()))
    }

    /// Whether `claims` satisfy the composite requirement `set`
    fn check_set(&self, set: &PermissionSet, claims: &ClaimSet) -> bool {
        set.is_satisfied_by(|p| self.check_claims(p, claims))
    }

    /// Whether at least one of `authorities` is granted `permission`.
    /// No authorities means no grant.
    fn check_one(&self, permission: &Permission, authorities: &[Authority]) -> bool {
        authorities.iter().any(|a| self.check(permission, a))
    }

    /// Whether every one of `authorities` is granted `permission`.
    /// No authorities means no grant.
    fn check_all(&self, permission: &Permission, authorities: &[Authority]) -> bool {
        !authorities.is_empty() && authorities.iter().all(|a| self.check(permission, a))
    }

    /// Every permission this context has rules for
    fn permissions(&self) -> BTreeSet<Permission>;

    fn allowed(&self, permission: &Permission) -> RuleSet;

    fn denied(&self, permission: &Permission) -> RuleSet;

    /// Login of the user owning the secured object
    fn owner(&self) -> Option<&str>;

    fn to_element(&self, options: &SecurityOptions) -> Element;

    fn to_xml(&self, options: &SecurityOptions) -> String {
        self.to_element(options).to_xml()
    }
}

/// Read a `<security>` element into whichever kind of context it describes.
/// Documents with `<restriction>` children become a
/// [`RestrictionSecurityContext`], all others a [`PermissionSecurityContext`].
pub fn context_from_element(
    element: &Element,
    options: &SecurityOptions,
) -> Result<Box<dyn SecurityContext>> {
    let has_restrictions = element.children_named("restriction").next().is_some();
    let has_permissions = element.children_named("permission").next().is_some();
    match (has_restrictions, has_permissions) {
        (true, true) => Err(SecurityError::configuration(
            "A security definition cannot mix <permission> and <restriction> entries",
        )),
        (true, false) => Ok(Box::new(RestrictionSecurityContext::from_element(
            element, options,
        )?)),
        (false, _) => Ok(Box::new(PermissionSecurityContext::from_element(
            element, options,
        )?)),
    }
}

pub fn context_from_xml(xml: &str, options: &SecurityOptions) -> Result<Box<dyn SecurityContext>> {
    let element = Element::parse(xml)
        .map_err(|e| SecurityError::configuration_caused_by("Unreadable security definition", e))?;
    context_from_element(&element, options)
}

/// Read the optional `<owner>` child
pub(crate) fn owner_from_element(element: &Element) -> Option<String> {
    element
        .child("owner")
        .map(Element::text)
        .filter(|login| !login.is_empty())
        .map(str::to_string)
}

/// Read the mandatory `id` attribute of a `<permission>` or `<restriction>`
pub(crate) fn permission_from_element(element: &Element) -> Result<Permission> {
    let id = element.attribute("id").ok_or_else(|| {
        SecurityError::configuration(format!("<{}> without an 'id' attribute", element.name()))
    })?;
    id.parse().map_err(|e| {
        SecurityError::configuration_caused_by(format!("Invalid permission '{id}'"), e)
    })
}

/// Resolve the mandatory `type` attribute through the site's shortcuts
pub(crate) fn authority_type_from_element(
    element: &Element,
    options: &SecurityOptions,
) -> Result<String> {
    element
        .attribute("type")
        .map(|t| options.types.resolve(t))
        .filter(|t| !t.is_empty())
        .ok_or_else(|| {
            SecurityError::configuration(format!(
                "<{}> lists authorities without a 'type' attribute",
                element.name()
            ))
        })
}

pub(crate) fn owner_element(owner: Option<&str>) -> Option<Element> {
    owner.map(|login| Element::new("owner").with_text(login))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::authority::ROLE_TYPE;

    fn p(s: &str) -> Permission {
        s.parse().unwrap()
    }

    #[test]
    fn test_check_one_and_all_fail_closed_on_empty_input() {
        let mut context = PermissionSecurityContext::new();
        context.allow(p("system:read"), Authority::user("jane"));

        assert!(!context.check_one(&p("system:read"), &[]));
        assert!(!context.check_all(&p("system:read"), &[]));

        let both = [Authority::user("jane"), Authority::user("joe")];
        assert!(context.check_one(&p("system:read"), &both));
        assert!(!context.check_all(&p("system:read"), &both));
        context.allow(p("system:read"), Authority::user("joe"));
        assert!(context.check_all(&p("system:read"), &both));
    }

    #[test]
    fn test_check_set_combines_permissions() {
        let mut context = PermissionSecurityContext::new();
        let editor = Authority::new(ROLE_TYPE, "system:editor");
        context.allow(p("system:read"), editor.clone());
        context.allow(p("system:write"), editor.clone());

        let claims = ClaimSet::from(editor);
        let set = PermissionSet::new()
            .require(p("system:read"))
            .alternatively(p("system:write"))
            .alternatively(p("system:publish"));
        assert!(context.check_set(&set, &claims));

        let set = set.require(p("system:manage"));
        assert!(!context.check_set(&set, &claims));
    }

    #[test]
    fn test_context_kind_follows_document() {
        let options = SecurityOptions::default();
        let restrictions = r#"<security>
              <restriction id="system:read" evaluate="allow,deny"><allow>all</allow></restriction>
            </security>"#;
        let context = context_from_xml(restrictions, &options).unwrap();
        assert!(context.check(&p("system:read"), &Authority::user("anyone")));

        let permissions = r#"<security>
              <permission id="system:read" type="user">jane</permission>
            </security>"#;
        let context = context_from_xml(permissions, &options).unwrap();
        assert!(context.check(&p("system:read"), &Authority::user("jane")));
        assert!(!context.check(&p("system:read"), &Authority::user("anyone")));

        let mixed = r#"<security>
              <permission id="system:read" type="user">jane</permission>
              <restriction id="system:write" evaluate="allow,deny"/>
            </security>"#;
        let err = context_from_xml(mixed, &options).unwrap_err();
        assert!(err.is_configuration_error());
    }

    #[test]
    fn test_options_deserialize_with_defaults() {
        let options: SecurityOptions = serde_norway::from_str("rule_matching: legacy\n").unwrap();
        assert_eq!(options.rule_matching, RuleMatching::Legacy);
        assert!(options.require_evaluation_order);
        assert_eq!(options.types.resolve("role"), ROLE_TYPE);

        let options: SecurityOptions = serde_norway::from_str(
            "type_shortcuts:\n  member: weblounge.security.member\nrequire_evaluation_order: false\n",
        )
        .unwrap();
        assert!(!options.require_evaluation_order);
        assert_eq!(options.types.resolve("member"), "weblounge.security.member");
        // A custom table replaces the defaults
        assert_eq!(options.types.resolve("role"), "role");
    }
}
