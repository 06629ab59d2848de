//! Token-to-user mapping.

use std::collections::HashMap;
use std::sync::RwLock;

use easel_core::types::UserId;

/// Mints a stable [`UserId`] per API token.
///
/// Tokens are opaque here; whether a token is acceptable at all is the auth
/// layer's call. The registry only guarantees that the same token always
/// maps to the same user.
#[derive(Default)]
pub struct UserRegistry {
    inner: RwLock<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    by_token: HashMap<String, UserId>,
    next_id: UserId,
}

impl UserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The user behind a token, minted on first sight.
    pub fn user_for_token(&self, token: &str) -> UserId {
        if let Some(user) = self
            .inner
            .read()
            .expect("lock poisoned")
            .by_token
            .get(token)
        {
            return *user;
        }

        let mut inner = self.inner.write().expect("lock poisoned");
        // Re-check: another thread may have minted between the locks.
        if let Some(user) = inner.by_token.get(token) {
            return *user;
        }
        let user = inner.next_id;
        inner.next_id += 1;
        inner.by_token.insert(token.to_string(), user);
        tracing::debug!(user, "new user registered");
        user
    }

    pub fn user_count(&self) -> usize {
        self.inner.read().expect("lock poisoned").by_token.len()
    }
}
