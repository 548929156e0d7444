//! Built-in roles and permissions of the `system` context.
//!
//! The system roles form a single chain, each one extending the next:
//! `system_admin` > `site_admin` > `publisher` > `editor` > `translator` >
//! `guest`. Every site directory builds its own chain, so a site extending a
//! system role changes nothing outside that site.

use std::sync::Arc;

use super::permission::Permission;
use super::role::Role;

/// Context of the built-in roles and permissions
pub const SYSTEM_CONTEXT: &str = "system";

/// The built-in roles of one directory
#[derive(Debug)]
pub struct SystemRoles {
    pub guest: Arc<Role>,
    pub translator: Arc<Role>,
    pub editor: Arc<Role>,
    pub publisher: Arc<Role>,
    pub site_admin: Arc<Role>,
    pub system_admin: Arc<Role>,
}

impl SystemRoles {
    pub fn new() -> Self {
        let role = |id: &str| Arc::new(Role::new(SYSTEM_CONTEXT, id));
        let roles = SystemRoles {
            guest: role("guest"),
            translator: role("translator"),
            editor: role("editor"),
            publisher: role("publisher"),
            site_admin: role("siteadmin"),
            system_admin: role("systemadmin"),
        };
        // Fresh roles linked from the top down cannot form a cycle
        roles.translator.attach(&roles.guest);
        roles.editor.attach(&roles.translator);
        roles.publisher.attach(&roles.editor);
        roles.site_admin.attach(&roles.publisher);
        roles.system_admin.attach(&roles.site_admin);
        roles
    }

    /// All system roles, lowest privilege first
    pub fn all(&self) -> [&Arc<Role>; 6] {
        [
            &self.guest,
            &self.translator,
            &self.editor,
            &self.publisher,
            &self.site_admin,
            &self.system_admin,
        ]
    }
}

impl Default for SystemRoles {
    fn default() -> Self {
        Self::new()
    }
}

/// The built-in permissions
pub struct SystemPermission;

impl SystemPermission {
    fn permission(id: &str) -> Permission {
        Permission::from_parts(SYSTEM_CONTEXT, id)
    }

    pub fn read() -> Permission {
        Self::permission("read")
    }

    pub fn write() -> Permission {
        Self::permission("write")
    }

    pub fn translate() -> Permission {
        Self::permission("translate")
    }

    pub fn publish() -> Permission {
        Self::permission("publish")
    }

    pub fn manage() -> Permission {
        Self::permission("manage")
    }

    pub fn all() -> Vec<Permission> {
        vec![
            Self::read(),
            Self::write(),
            Self::translate(),
            Self::publish(),
            Self::manage(),
        ]
    }
}
