//! Error types of the security engine.
//!
//! Programmer errors (malformed identifiers, cyclic hierarchies) are reported
//! when the offending value is constructed or the offending edge is added, so
//! a misconfigured site fails while it is being loaded rather than while it is
//! serving requests.
//!
//! # Examples
//!
//! ```
//! use weblounge_core::security::{Permission, SecurityError};
//!
//! let err = "system".parse::<Permission>().unwrap_err();
//! assert!(matches!(err, SecurityError::InvalidPermission { .. }));
//! assert!(err.is_configuration_error());
//! ```

use std::error::Error as StdError;

type BoxedSource = Box<dyn StdError + Send + Sync + 'static>;

/// Errors raised while building or evaluating security configuration
#[derive(Debug, thiserror::Error)]
pub enum SecurityError {
    /// Permission or role identifier not of the form `context:identifier`
    #[error("Invalid identifier '{value}': {reason}")]
    InvalidPermission { value: String, reason: &'static str },

    /// Adding the edge would make a role extend itself
    #[error("Role '{role}' cannot extend '{ancestor}': the hierarchy would contain a cycle")]
    CyclicRoleHierarchy { role: String, ancestor: String },

    /// Adding the member would make a group contain itself
    #[error("Group '{group}' cannot contain '{member}': the membership graph would contain a cycle")]
    CyclicGroupMembership { group: String, member: String },

    #[error("Unknown role '{0}'")]
    UnknownRole(String),

    #[error("Unknown group '{0}'")]
    UnknownGroup(String),

    #[error("Unknown user '{0}'")]
    UnknownUser(String),

    /// Malformed security definition, with the underlying cause attached
    #[error("{message}")]
    Configuration {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    /// The document could not be read as XML
    #[error("Malformed XML: {0}")]
    Xml(#[from] quick_xml::Error),
}

impl SecurityError {
    /// Create a configuration error without an underlying cause
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            source: None,
        }
    }

    /// Wrap `source` into a configuration error carrying `message`
    pub fn configuration_caused_by(
        message: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::Configuration {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Whether this error stems from a broken site configuration, as opposed
    /// to a lookup of something that simply does not exist.
    pub fn is_configuration_error(&self) -> bool {
        !matches!(
            self,
            Self::UnknownRole(_) | Self::UnknownGroup(_) | Self::UnknownUser(_)
        )
    }
}

pub type Result<T, E = SecurityError> = std::result::Result<T, E>;
