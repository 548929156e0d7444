//! Authorization engine for weblounge sites
//!
//! Users, groups and roles live in a per-site [`Directory`]. Secured objects
//! carry a [`SecurityContext`], either a list of plain grants
//! ([`PermissionSecurityContext`]) or one allow/deny [`Restriction`] per
//! permission ([`RestrictionSecurityContext`]). A request is authorized by
//! expanding the caller into a [`ClaimSet`] and asking the context.

pub mod authority;
pub mod context;
pub mod directory;
pub mod error;
pub mod group;
pub mod membership;
pub mod permission;
pub mod permission_context;
pub mod restriction;
pub mod restriction_context;
pub mod role;
pub mod system;
pub mod user;
pub mod xml;

pub use authority::{
    Authority, AuthorityTypes, ClaimSet, RuleMatching, GROUP_TYPE, ROLE_TYPE, USER_TYPE,
};
pub use context::{context_from_element, context_from_xml, SecurityContext, SecurityOptions};
pub use directory::Directory;
pub use error::{Result, SecurityError};
pub use group::{Group, GroupId};
pub use membership::{Member, MembershipGraph};
pub use permission::{MatchType, Permission, PermissionSet};
pub use permission_context::PermissionSecurityContext;
pub use restriction::{EvaluationOrder, Restriction, RuleSet};
pub use restriction_context::RestrictionSecurityContext;
pub use role::{Role, RoleId};
pub use system::{SystemPermission, SystemRoles, SYSTEM_CONTEXT};
pub use user::{Profile, User, UserRef};
pub use xml::Element;
