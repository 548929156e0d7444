pub mod dispatch;
pub mod security;
