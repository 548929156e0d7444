use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

use super::authority::{Authority, ClaimSet, RuleMatching};
use super::context::{
    authority_type_from_element, owner_element, owner_from_element, permission_from_element,
    SecurityContext, SecurityOptions,
};
use super::error::{Result, SecurityError};
use super::permission::Permission;
use super::restriction::{EvaluationOrder, Restriction, RuleSet};
use super::xml::{is_wildcard, split_ids, Element};

/// A security context holding one [`Restriction`] per permission.
///
/// Permissions without a restriction are denied to everybody.
///
/// When a restriction is created implicitly, its evaluation order is taken
/// from the call that created it: [`allow`](Self::allow) and
/// [`allow_all`](Self::allow_all) create `allow,deny` restrictions,
/// [`deny`](Self::deny) and [`deny_all_for`](Self::deny_all_for) create
/// `deny,allow` ones. Use [`restrict`](Self::restrict) to set the order
/// explicitly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestrictionSecurityContext {
    owner: Option<String>,
    restrictions: BTreeMap<Permission, Restriction>,
    matching: RuleMatching,
}

impl RestrictionSecurityContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rule_matching(mut self, matching: RuleMatching) -> Self {
        self.matching = matching;
        for restriction in self.restrictions.values_mut() {
            restriction.set_rule_matching(matching);
        }
        self
    }

    pub fn set_owner(&mut self, owner: Option<String>) {
        self.owner = owner;
    }

    fn restriction_mut(&mut self, permission: Permission, order: EvaluationOrder) -> &mut Restriction {
        let matching = self.matching;
        self.restrictions
            .entry(permission.clone())
            .or_insert_with(|| Restriction::new(permission, order).with_rule_matching(matching))
    }

    /// Create the restriction for `permission` with `order`, or change the
    /// order of an existing one
    pub fn restrict(&mut self, permission: Permission, order: EvaluationOrder) -> &mut Restriction {
        let restriction = self.restriction_mut(permission, order);
        restriction.set_order(order);
        restriction
    }

    pub fn restriction(&self, permission: &Permission) -> Option<&Restriction> {
        self.restrictions.get(permission)
    }

    pub fn allow(&mut self, permission: Permission, authority: Authority) {
        self.restriction_mut(permission, EvaluationOrder::AllowDeny)
            .allow(authority);
    }

    pub fn allow_all(&mut self, permission: Permission) {
        self.restriction_mut(permission, EvaluationOrder::AllowDeny)
            .allow_all();
    }

    pub fn deny(&mut self, permission: Permission, authority: Authority) {
        self.restriction_mut(permission, EvaluationOrder::DenyAllow)
            .deny(authority);
    }

    pub fn deny_all_for(&mut self, permission: Permission) {
        self.restriction_mut(permission, EvaluationOrder::DenyAllow)
            .deny_all();
    }

    pub fn from_element(element: &Element, options: &SecurityOptions) -> Result<Self> {
        let mut context = Self::new().with_rule_matching(options.rule_matching);
        context.owner = owner_from_element(element);

        for entry in element.children_named("restriction") {
            let restriction = restriction_from_element(entry, options)?;
            context
                .restrictions
                .insert(restriction.permission().clone(), restriction);
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

fn restriction_from_element(element: &Element, options: &SecurityOptions) -> Result<Restriction> {
    let permission = permission_from_element(element)?;
    let malformed = |e: SecurityError| {
        SecurityError::configuration_caused_by(
            format!("Malformed restriction of permission '{permission}'"),
            e,
        )
    };

    // Older definitions spell the attribute `evaluation`
    let order = match element
        .attribute("evaluate")
        .or_else(|| element.attribute("evaluation"))
    {
        Some(order) => order.parse().map_err(malformed)?,
        None if options.require_evaluation_order => {
            return Err(SecurityError::configuration(format!(
                "Restriction of permission '{permission}' has no 'evaluate' attribute"
            )))
        }
        None => EvaluationOrder::AllowDeny,
    };

    let mut restriction =
        Restriction::new(permission.clone(), order).with_rule_matching(options.rule_matching);
    let allow = rules_from_elements(element.children_named("allow"), options).map_err(malformed)?;
    let deny = rules_from_elements(element.children_named("deny"), options).map_err(malformed)?;
    apply_rules(allow, &mut restriction, Restriction::allow_none, Restriction::allow);
    apply_rules(deny, &mut restriction, Restriction::deny_none, Restriction::deny);
    Ok(restriction)
}

/// Fold every `<allow>` (or `<deny>`) element into one rule set. No element
/// at all, or any untyped wildcard body, yields [`RuleSet::All`]. A typed
/// body is always a list of ids, so `<allow type="user">all</allow>` names
/// the login `all`.
fn rules_from_elements<'a>(
    elements: impl Iterator<Item = &'a Element>,
    options: &SecurityOptions,
) -> Result<RuleSet> {
    let mut rules: Option<RuleSet> = None;
    for element in elements {
        if element.attribute("type").is_none() && is_wildcard(element.text()) {
            return Ok(RuleSet::All);
        }
        let set = rules.get_or_insert_with(RuleSet::none);
        let ids: Vec<&str> = split_ids(element.text()).collect();
        if ids.is_empty() {
            continue;
        }
        let authority_type = authority_type_from_element(element, options)?;
        for id in ids {
            set.insert(Authority::new(authority_type.clone(), id));
        }
    }
    Ok(rules.unwrap_or(RuleSet::All))
}

fn apply_rules(
    rules: RuleSet,
    restriction: &mut Restriction,
    clear: fn(&mut Restriction),
    add: fn(&mut Restriction, Authority),
) {
    if let RuleSet::Only(authorities) = rules {
        clear(restriction);
        for authority in authorities {
            add(restriction, authority);
        }
    }
}

fn rules_to_elements(name: &str, rules: &RuleSet, options: &SecurityOptions) -> Vec<Element> {
    match rules {
        RuleSet::All => vec![Element::new(name).with_text("all")],
        RuleSet::Only(authorities) if authorities.is_empty() => vec![Element::new(name)],
        RuleSet::Only(authorities) => {
            let mut by_type: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
            for authority in authorities {
                by_type
                    .entry(authority.authority_type())
                    .or_default()
                    .push(authority.authority_id());
            }
            by_type
                .into_iter()
                .map(|(authority_type, ids)| {
                    Element::new(name)
                        .with_attribute("type", options.types.shortcut_for(authority_type))
                        .with_text(ids.join(","))
                })
                .collect()
        }
    }
}

impl SecurityContext for RestrictionSecurityContext {
    fn check_claims(&self, permission: &Permission, claims: &ClaimSet) -> bool {
        let Some(restriction) = self.restrictions.get(permission) else {
            warn!(
                "No restriction defined for permission '{}', denying access",
                permission
            );
            return false;
        };
        let granted = restriction.check(claims);
        debug!(
            "Permission '{}' {} by {} restriction",
            permission,
            if granted { "granted" } else { "denied" },
            restriction.order()
        );
        granted
    }

    fn permissions(&self) -> BTreeSet<Permission> {
        self.restrictions.keys().cloned().collect()
    }

    /// Unrestricted permissions allow nobody
    fn allowed(&self, permission: &Permission) -> RuleSet {
        self.restrictions
            .get(permission)
            .map(|r| r.allowed().clone())
            .unwrap_or_else(RuleSet::none)
    }

    fn denied(&self, permission: &Permission) -> RuleSet {
        self.restrictions
            .get(permission)
            .map(|r| r.denied().clone())
            .unwrap_or(RuleSet::All)
    }

    fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    fn to_element(&self, options: &SecurityOptions) -> Element {
        let mut root = Element::new("security");
        if let Some(owner) = owner_element(self.owner()) {
            root.push_child(owner);
        }
        for (permission, restriction) in &self.restrictions {
            let mut entry = Element::new("restriction")
                .with_attribute("id", permission.to_string())
                .with_attribute("evaluate", restriction.order().as_str());
            for child in rules_to_elements("allow", restriction.allowed(), options)
                .into_iter()
                .chain(rules_to_elements("deny", restriction.denied(), options))
            {
                entry.push_child(child);
            }
            root.push_child(entry);
        }
        root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::authority::{GROUP_TYPE, ROLE_TYPE, USER_TYPE};

    fn p(s: &str) -> Permission {
        s.parse().unwrap()
    }

    fn role(id: &str) -> Authority {
        Authority::new(ROLE_TYPE, id)
    }

    #[test]
    fn test_unrestricted_permission_is_denied() {
        let mut context = RestrictionSecurityContext::new();
        context.allow_all(p("system:read"));

        assert!(!context.check(&p("system:write"), &Authority::user("jane")));
        assert!(!context.check(&p("system:write"), &role("system:systemadmin")));
        assert!(context.check(&p("system:read"), &Authority::user("jane")));
        assert_eq!(context.allowed(&p("system:write")), RuleSet::none());
    }

    #[test]
    fn test_first_call_picks_evaluation_order() {
        let mut context = RestrictionSecurityContext::new();
        context.allow(p("system:read"), role("system:guest"));
        context.deny(p("system:write"), role("system:guest"));
        context.deny(p("system:read"), Authority::user("mallory"));

        assert_eq!(
            context.restriction(&p("system:read")).unwrap().order(),
            EvaluationOrder::AllowDeny
        );
        assert_eq!(
            context.restriction(&p("system:write")).unwrap().order(),
            EvaluationOrder::DenyAllow
        );

        // allow,deny: not on the allow list, but on the deny list
        assert!(!context.check(&p("system:read"), &Authority::user("mallory")));
        // deny,allow: allow stays a wildcard, the guest role is denied
        assert!(!context.check(&p("system:write"), &role("system:guest")));
        assert!(context.check(&p("system:write"), &role("system:editor")));
    }

    #[test]
    fn test_restrict_sets_order_explicitly() {
        let mut context = RestrictionSecurityContext::new();
        context.allow(p("system:read"), role("system:guest"));
        context.restrict(p("system:read"), EvaluationOrder::DenyAllow);
        assert_eq!(
            context.restriction(&p("system:read")).unwrap().order(),
            EvaluationOrder::DenyAllow
        );

        context
            .restrict(p("system:write"), EvaluationOrder::AllowDeny)
            .deny_none();
        assert!(context.check(&p("system:write"), &Authority::user("anyone")));
    }

    #[test]
    fn test_round_trip_keeps_decisions() {
        let options = SecurityOptions::default();
        let mut context = RestrictionSecurityContext::new();
        context.set_owner(Some("jane".to_string()));
        context
            .restrict(p("system:read"), EvaluationOrder::AllowDeny)
            .allow(role("system:guest"));
        context.deny(p("system:read"), Authority::user("mallory"));
        context.deny(p("system:read"), Authority::new(GROUP_TYPE, "site:banned"));

        context
            .restrict(p("system:write"), EvaluationOrder::DenyAllow)
            .allow(role("system:editor"));
        context.allow(p("system:write"), Authority::user("joe"));
        context.deny(p("system:write"), Authority::user("mallory"));

        let xml = context.to_xml(&options);
        let parsed = RestrictionSecurityContext::from_xml(&xml, &options).unwrap();
        assert_eq!(parsed, context);
        assert_eq!(parsed.owner(), Some("jane"));

        let callers = [
            Authority::user("jane"),
            Authority::user("joe"),
            Authority::user("mallory"),
            role("system:guest"),
            role("system:editor"),
            Authority::new(GROUP_TYPE, "site:banned"),
            Authority::new(GROUP_TYPE, "site:staff"),
        ];
        for permission in [p("system:read"), p("system:write"), p("system:publish")] {
            for caller in &callers {
                assert_eq!(
                    parsed.check(&permission, caller),
                    context.check(&permission, caller),
                    "{permission} for {caller}"
                );
            }
        }
    }

    #[test]
    fn test_wildcard_and_empty_rules_survive_round_trip() {
        let options = SecurityOptions::default();
        let mut context = RestrictionSecurityContext::new();
        context
            .restrict(p("system:read"), EvaluationOrder::DenyAllow)
            .deny_none();
        context
            .restrict(p("system:write"), EvaluationOrder::DenyAllow)
            .allow_none();

        let xml = context.to_xml(&options);
        assert!(xml.contains("<allow>all</allow>"));
        assert!(xml.contains("<deny/>"));
        assert!(xml.contains("<allow/>"));

        let parsed = RestrictionSecurityContext::from_xml(&xml, &options).unwrap();
        assert_eq!(parsed, context);
        assert!(parsed.check(&p("system:read"), &Authority::user("anyone")));
        assert!(!parsed.check(&p("system:write"), &Authority::user("anyone")));
    }

    #[test]
    fn test_login_named_all_is_not_a_wildcard() {
        let options = SecurityOptions::default();
        let mut context = RestrictionSecurityContext::new();
        let restriction = context.restrict(p("system:write"), EvaluationOrder::DenyAllow);
        restriction.allow(Authority::user("all"));
        restriction.deny_none();
        assert!(!context.check(&p("system:write"), &Authority::user("mallory")));

        let xml = context.to_xml(&options);
        assert!(xml.contains(r#"<allow type="user">all</allow>"#));

        let parsed = RestrictionSecurityContext::from_xml(&xml, &options).unwrap();
        assert_eq!(parsed, context);
        assert!(parsed.check(&p("system:write"), &Authority::user("all")));
        assert!(!parsed.check(&p("system:write"), &Authority::user("mallory")));
        assert!(!parsed.allowed(&p("system:write")).is_all());

        let typed_any = r#"<security>
              <restriction id="system:read" evaluate="allow,deny">
                <allow type="role">any</allow>
              </restriction>
            </security>"#;
        let parsed = RestrictionSecurityContext::from_xml(typed_any, &options).unwrap();
        assert!(parsed.check(&p("system:read"), &role("any")));
        assert!(!parsed.check(&p("system:read"), &Authority::user("jane")));
    }

    #[test]
    fn test_parse_restriction_document() {
        let xml = r#"<security>
              <owner>jane</owner>
              <restriction id="system:publish" evaluate="deny,allow">
                <allow type="role">system:publisher;system:siteadmin</allow>
                <allow type="user">jane</allow>
                <deny type="user">mallory</deny>
              </restriction>
              <restriction id="system:read" evaluation="allow,deny">
                <deny>any</deny>
              </restriction>
            </security>"#;
        let context =
            RestrictionSecurityContext::from_xml(xml, &SecurityOptions::default()).unwrap();

        let publish = context.restriction(&p("system:publish")).unwrap();
        assert_eq!(publish.allowed_of_type(ROLE_TYPE).len(), 2);
        assert_eq!(publish.allowed_of_type(USER_TYPE).len(), 1);
        assert!(context.check(&p("system:publish"), &Authority::user("jane")));
        assert!(!context.check(&p("system:publish"), &Authority::user("mallory")));
        assert!(!context.check(&p("system:publish"), &role("system:editor")));

        // no allow element means everybody is allowed
        assert!(context.restriction(&p("system:read")).unwrap().allowed().is_all());
        assert!(context.check(&p("system:read"), &Authority::user("anyone")));
    }

    #[test]
    fn test_missing_evaluation_order() {
        let xml = r#"<security>
              <restriction id="system:read"><allow type="user">jane</allow></restriction>
            </security>"#;
        let strict = SecurityOptions::default();
        let err = RestrictionSecurityContext::from_xml(xml, &strict).unwrap_err();
        assert!(err.to_string().contains("evaluate"));

        let lenient = SecurityOptions {
            require_evaluation_order: false,
            ..Default::default()
        };
        let context = RestrictionSecurityContext::from_xml(xml, &lenient).unwrap();
        assert_eq!(
            context.restriction(&p("system:read")).unwrap().order(),
            EvaluationOrder::AllowDeny
        );
    }

    #[test]
    fn test_parse_rejects_broken_restrictions() {
        let options = SecurityOptions::default();
        for xml in [
            r#"<security><restriction evaluate="allow,deny"/></security>"#,
            r#"<security><restriction id="read" evaluate="allow,deny"/></security>"#,
            r#"<security><restriction id="system:read" evaluate="first"/></security>"#,
            r#"<security><restriction id="system:read" evaluate="allow,deny"><allow>jane</allow></restriction></security>"#,
        ] {
            let err = RestrictionSecurityContext::from_xml(xml, &options).unwrap_err();
            assert!(err.is_configuration_error(), "{xml}");
        }
    }

    #[test]
    fn test_legacy_matching_from_options() {
        let options = SecurityOptions {
            rule_matching: RuleMatching::Legacy,
            ..Default::default()
        };
        let xml = r#"<security>
              <restriction id="system:write" evaluate="deny,allow">
                <allow type="role">system:editor</allow>
                <deny/>
              </restriction>
            </security>"#;
        let context = RestrictionSecurityContext::from_xml(xml, &options).unwrap();
        assert!(context.check(&p("system:write"), &role("system:guest")));

        let strict = RestrictionSecurityContext::from_xml(xml, &SecurityOptions::default()).unwrap();
        assert!(!strict.check(&p("system:write"), &role("system:guest")));
    }
}
