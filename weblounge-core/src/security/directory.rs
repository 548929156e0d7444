use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

use super::authority::ClaimSet;
use super::error::{Result, SecurityError};
use super::group::{Group, GroupId};
use super::membership::{Member, MembershipGraph};
use super::role::{Role, RoleId};
use super::system::SystemRoles;
use super::user::User;

/// The roles, groups, users and group memberships of one site.
///
/// A directory is built while a site starts and is read-only while the site
/// serves requests. Callers that change it at runtime hold it behind a
/// reader-writer lock and compute closures under the read lock, so a closure
/// never observes a half-applied change.
#[derive(Debug, Clone, Default)]
pub struct Directory {
    roles: BTreeMap<RoleId, Arc<Role>>,
    groups: BTreeMap<GroupId, Group>,
    users: BTreeMap<String, Arc<User>>,
    membership: MembershipGraph,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    /// A directory knowing the built-in system roles. The roles are created
    /// for this directory alone.
    pub fn with_system_roles() -> Self {
        let mut directory = Self::new();
        for role in SystemRoles::new().all() {
            directory.register_role(Arc::clone(role));
        }
        directory
    }

    /// Register `role`. If a role with the same identifier is known already,
    /// the known instance is kept and returned.
    pub fn register_role(&mut self, role: Arc<Role>) -> Arc<Role> {
        Arc::clone(self.roles.entry(role.id().clone()).or_insert(role))
    }

    pub fn role(&self, id: &RoleId) -> Option<Arc<Role>> {
        self.roles.get(id).cloned()
    }

    pub fn roles(&self) -> impl Iterator<Item = &Arc<Role>> {
        self.roles.values()
    }

    fn known_role(&self, id: &RoleId) -> Result<Arc<Role>> {
        self.role(id)
            .ok_or_else(|| SecurityError::UnknownRole(id.to_string()))
    }

    /// Make `role` an extension of `ancestor`; both must be registered
    pub fn extend_role(&mut self, role: &RoleId, ancestor: &RoleId) -> Result<()> {
        let role = self.known_role(role)?;
        let ancestor = self.known_role(ancestor)?;
        role.extend(&ancestor)
    }

    pub fn add_group(&mut self, group: Group) -> Result<()> {
        if self.groups.contains_key(group.id()) {
            return Err(SecurityError::configuration(format!(
                "Group '{}' already exists",
                group.id()
            )));
        }
        self.groups.insert(group.id().clone(), group);
        Ok(())
    }

    pub fn group(&self, id: &GroupId) -> Option<&Group> {
        self.groups.get(id)
    }

    pub fn groups(&self) -> impl Iterator<Item = &Group> {
        self.groups.values()
    }

    /// Remove a group together with all of its membership edges
    pub fn remove_group(&mut self, id: &GroupId) -> Option<Group> {
        let group = self.groups.remove(id)?;
        self.membership.remove_node(&Member::Group(id.clone()));
        Some(group)
    }

    pub fn assign_group_role(&mut self, group: &GroupId, role: &RoleId) -> Result<bool> {
        let role = self.known_role(role)?;
        let group = self
            .groups
            .get_mut(group)
            .ok_or_else(|| SecurityError::UnknownGroup(group.to_string()))?;
        Ok(group.assign_role(role))
    }

    pub fn unassign_group_role(&mut self, group: &GroupId, role: &RoleId) -> Result<bool> {
        let group = self
            .groups
            .get_mut(group)
            .ok_or_else(|| SecurityError::UnknownGroup(group.to_string()))?;
        Ok(group.unassign_role(role))
    }

    pub fn add_user(&mut self, user: User) -> Result<()> {
        if self.users.contains_key(user.login()) {
            return Err(SecurityError::configuration(format!(
                "User '{}' already exists",
                user.login()
            )));
        }
        self.users.insert(user.login().to_string(), Arc::new(user));
        Ok(())
    }

    pub fn user(&self, login: &str) -> Option<Arc<User>> {
        self.users.get(login).cloned()
    }

    pub fn users(&self) -> impl Iterator<Item = &Arc<User>> {
        self.users.values()
    }

    /// Remove a user together with all of its group memberships
    pub fn remove_user(&mut self, login: &str) -> Option<Arc<User>> {
        let user = self.users.remove(login)?;
        self.membership.remove_node(&Member::user(login));
        Some(user)
    }

    fn user_mut(&mut self, login: &str) -> Result<&mut User> {
        self.users
            .get_mut(login)
            .map(Arc::make_mut)
            .ok_or_else(|| SecurityError::UnknownUser(login.to_string()))
    }

    pub fn assign_user_role(&mut self, login: &str, role: &RoleId) -> Result<bool> {
        let role = self.known_role(role)?;
        Ok(self.user_mut(login)?.assign_role(role))
    }

    pub fn unassign_user_role(&mut self, login: &str, role: &RoleId) -> Result<bool> {
        Ok(self.user_mut(login)?.unassign_role(role))
    }

    pub fn set_user_enabled(&mut self, login: &str, enabled: bool) -> Result<()> {
        self.user_mut(login)?.set_enabled(enabled);
        Ok(())
    }

    /// Add `member` to `group`; both must be known to this directory
    pub fn add_member(&mut self, group: &GroupId, member: Member) -> Result<bool> {
        if !self.groups.contains_key(group) {
            return Err(SecurityError::UnknownGroup(group.to_string()));
        }
        match &member {
            Member::User(login) if !self.users.contains_key(login) => {
                return Err(SecurityError::UnknownUser(login.clone()));
            }
            Member::Group(id) if !self.groups.contains_key(id) => {
                return Err(SecurityError::UnknownGroup(id.to_string()));
            }
            _ => {}
        }
        self.membership.add_member(group, member)
    }

    pub fn remove_member(&mut self, group: &GroupId, member: &Member) -> bool {
        self.membership.remove_member(group, member)
    }

    pub fn membership(&self) -> &MembershipGraph {
        &self.membership
    }

    /// Every group `member` belongs to, directly or transitively
    pub fn group_closure(&self, member: &Member) -> BTreeSet<GroupId> {
        self.membership.group_closure(member)
    }

    /// Every role `login` holds: its own roles, the roles of every group in
    /// its group closure, and all roles those roles extend.
    pub fn role_closure(&self, login: &str) -> Result<BTreeSet<RoleId>> {
        let user = self
            .user(login)
            .ok_or_else(|| SecurityError::UnknownUser(login.to_string()))?;

        let mut held: Vec<Arc<Role>> = user.roles().cloned().collect();
        for group in self.group_closure(&Member::user(login)) {
            if let Some(group) = self.groups.get(&group) {
                held.extend(group.roles().cloned());
            }
        }

        let mut closure = BTreeSet::new();
        for role in held {
            closure.extend(role.closure().iter().map(|r| r.id().clone()));
            closure.insert(role.id().clone());
        }
        Ok(closure)
    }

    /// Whether `login` holds `role`.
    ///
    /// The check runs in three tiers and stops at the first hit:
    /// 1. the user owns `role` directly,
    /// 2. the user owns a role that extends `role`,
    /// 3. a group the user belongs to, directly or through other groups,
    ///    owns `role` or a role extending it.
    pub fn has_role(&self, login: &str, role: &RoleId) -> Result<bool> {
        let user = self
            .user(login)
            .ok_or_else(|| SecurityError::UnknownUser(login.to_string()))?;
        let target = self
            .role(role)
            .unwrap_or_else(|| Arc::new(Role::with_id(role.clone())));

        if user.roles().any(|r| r.id() == role) {
            return Ok(true);
        }

        if user.roles().any(|r| r.is_extension_of(&target)) {
            return Ok(true);
        }

        let held_by_group = self
            .group_closure(&Member::user(login))
            .iter()
            .filter_map(|id| self.groups.get(id))
            .any(|group| group.owns_role(&target));
        Ok(held_by_group)
    }

    /// Everything `login` can claim: its user authority, every group in its
    /// group closure and every role in its role closure.
    ///
    /// A disabled user claims nothing.
    pub fn claims(&self, login: &str) -> Result<ClaimSet> {
        let user = self
            .user(login)
            .ok_or_else(|| SecurityError::UnknownUser(login.to_string()))?;
        if !user.is_enabled() {
            debug!("User '{}' is disabled and claims no authority", login);
            return Ok(ClaimSet::new());
        }

        let mut claims = ClaimSet::from(user.authority());
        claims.extend(
            self.group_closure(&Member::user(login))
                .iter()
                .map(GroupId::authority),
        );
        claims.extend(self.role_closure(login)?.iter().map(RoleId::authority));
        Ok(claims)
    }

    /// What a role claims when it acts as a principal itself: the role and
    /// every role it extends.
    pub fn role_claims(&self, role: &RoleId) -> Result<ClaimSet> {
        let role = self.known_role(role)?;
        let mut claims = ClaimSet::from(role.authority());
        claims.extend(role.closure().iter().map(|r| r.authority()));
        Ok(claims)
    }
}
