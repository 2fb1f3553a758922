pub mod auth;
pub mod ip;

pub use auth::require_key_auth;
pub use ip::{client_ip, ip_guard};
