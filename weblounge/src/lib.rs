//! weblounge site security
//!
//! Loads the sites below the configured root folder, each with its own user
//! directory and secured objects, and answers permission checks against them.

pub mod app_state;
pub mod init_telemetry;
pub mod services;
pub mod settings;
pub mod site;

pub use app_state::AppState;
pub use services::SecurityService;
pub use site::{Site, SiteState, SiteStatus};
