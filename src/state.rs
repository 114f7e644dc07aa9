//! Shared handler state, built once at startup.

use crate::services::{identity_service::IdentityProvider, tree_service::TreeService};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub tree: TreeService,
    pub identity: Arc<dyn IdentityProvider>,

    /// When set, `/files` routes require a bearer token and the token's user
    /// is the only accepted `ownerId`.
    pub enforce_token_owner: bool,
}
