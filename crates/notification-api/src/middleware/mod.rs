//! 中间件

mod auth;
mod security;

pub use auth::{WEBHOOK_TOKEN_HEADER, api_key_auth};
pub use security::security_headers;
