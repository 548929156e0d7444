use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use weblounge_core::security::{
    Directory, Group, GroupId, Member, Profile, Role, RoleId, SecurityError, SecurityOptions,
    User, SYSTEM_CONTEXT,
};

/// The users, groups and roles of one site, as stored in `security.yaml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// Overrides of the server wide security settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<SecurityOptions>,
    /// Site roles; the system roles are always present and not listed
    #[serde(default)]
    pub roles: BTreeMap<RoleId, RoleConfig>,
    #[serde(default)]
    pub groups: BTreeMap<GroupId, GroupConfig>,
    #[serde(default)]
    pub users: BTreeMap<String, UserConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoleConfig {
    #[serde(default)]
    pub description: String,
    /// Roles this role extends
    #[serde(default)]
    pub extends: Vec<RoleId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupConfig {
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub roles: Vec<RoleId>,
    /// Logins of member users
    #[serde(default)]
    pub users: Vec<String>,
    /// Nested member groups
    #[serde(default)]
    pub groups: Vec<GroupId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserConfig {
    #[serde(flatten)]
    pub profile: Profile,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub roles: Vec<RoleId>,
}

fn default_enabled() -> bool {
    true
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            profile: Profile::default(),
            enabled: true,
            roles: Vec::new(),
        }
    }
}

impl DirectoryConfig {
    /// Build the site directory. Roles are registered first so that groups and
    /// users can refer to them regardless of their order in the file.
    pub fn build(&self) -> Result<Directory, SecurityError> {
        let mut directory = Directory::with_system_roles();

        for id in self.roles.keys() {
            directory.register_role(Arc::new(Role::with_id(id.clone())));
        }
        for (id, role) in &self.roles {
            for ancestor in &role.extends {
                directory.extend_role(id, ancestor)?;
            }
        }

        for (id, group) in &self.groups {
            directory.add_group(Group::new(id.clone(), group.description.clone()))?;
            for role in &group.roles {
                directory.assign_group_role(id, role)?;
            }
        }

        for (login, config) in &self.users {
            let mut user = User::new(login.clone()).with_profile(config.profile.clone());
            user.set_enabled(config.enabled);
            directory.add_user(user)?;
            for role in &config.roles {
                directory.assign_user_role(login, role)?;
            }
        }

        for (id, group) in &self.groups {
            for login in &group.users {
                directory.add_member(id, Member::user(login.clone()))?;
            }
            for nested in &group.groups {
                directory.add_member(id, Member::Group(nested.clone()))?;
            }
        }
        Ok(directory)
    }

    /// Snapshot of `directory` for saving. Group creation times are taken
    /// from `previous` where known.
    pub fn from_directory(directory: &Directory, previous: &DirectoryConfig) -> Self {
        let roles = directory
            .roles()
            .filter(|role| role.context() != SYSTEM_CONTEXT)
            .map(|role| {
                let extends: BTreeSet<RoleId> =
                    role.ancestors().iter().map(|a| a.id().clone()).collect();
                let description = previous
                    .roles
                    .get(role.id())
                    .map(|r| r.description.clone())
                    .unwrap_or_default();
                (
                    role.id().clone(),
                    RoleConfig {
                        description,
                        extends: extends.into_iter().collect(),
                    },
                )
            })
            .collect();

        let membership = directory.membership();
        let groups = directory
            .groups()
            .map(|group| {
                let mut users = Vec::new();
                let mut groups = Vec::new();
                for member in membership.members(group.id()) {
                    match member {
                        Member::User(login) => users.push(login),
                        Member::Group(id) => groups.push(id),
                    }
                }
                let created_at = previous
                    .groups
                    .get(group.id())
                    .and_then(|g| g.created_at)
                    .or_else(|| Some(Utc::now()));
                (
                    group.id().clone(),
                    GroupConfig {
                        description: group.description().to_string(),
                        created_at,
                        roles: group.roles().map(|r| r.id().clone()).collect(),
                        users,
                        groups,
                    },
                )
            })
            .collect();

        let users = directory
            .users()
            .map(|user| {
                (
                    user.login().to_string(),
                    UserConfig {
                        profile: user.profile().clone(),
                        enabled: user.is_enabled(),
                        roles: user.roles().map(|r| r.id().clone()).collect(),
                    },
                )
            })
            .collect();

        Self {
            options: previous.options.clone(),
            roles,
            groups,
            users,
        }
    }
}
