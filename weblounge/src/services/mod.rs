pub mod security;

pub use security::SecurityService;
