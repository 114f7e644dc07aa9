pub mod auth;

pub use auth::{AuthUser, TokenOwner, require_auth};
