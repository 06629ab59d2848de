//! Request handlers for the client-facing HTTP routes.

pub mod client;
pub mod health;
pub mod images;
pub mod tasks;

use easel_core::error::CoreError;
use easel_core::types::UserId;

use crate::auth;
use crate::error::ApiError;
use crate::state::AppState;

/// Check the client token and resolve it to a user id.
///
/// A missing token is checked as the empty string, so the enforcement-off
/// mode still mints a stable anonymous user.
pub(crate) fn authorize(state: &AppState, token: Option<&str>) -> Result<UserId, ApiError> {
    let token = token.unwrap_or_default();
    if !auth::verify(token, &state.config.auth) {
        return Err(CoreError::Unauthorized("operation is not permitted".to_string()).into());
    }
    Ok(state.users.user_for_token(token))
}
