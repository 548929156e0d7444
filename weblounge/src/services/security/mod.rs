//! Site security service
//!
//! Wraps the per-site directories and secured objects behind async locks and
//! persists directory changes to each site's `security.yaml`.

pub mod config;
pub mod service;
pub mod types;


pub use config::ConfigManager;
pub use service::SecurityService;
pub use types::DirectoryConfig;
