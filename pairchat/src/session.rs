//! The authenticated session the chat surface runs under.
//!
//! A [`Session`] is supplied by the authentication collaborator, constructed
//! once, and handed to [`ChatSurface`](crate::chat::ChatSurface) explicitly.
//! It never changes while the surface is alive; when the collaborator
//! invalidates it, the surface is torn down through
//! [`ChatSurface::invalidate_session`](crate::chat::ChatSurface::invalidate_session).

use std::fmt;

use pairchat_proto::user::UserId;

/// Signed-in user identity plus the bearer token used for every request.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    user_id: UserId,
    auth_token: String,
}

impl Session {
    /// Creates a session for `user_id` authenticated with `auth_token`.
    pub fn new(user_id: UserId, auth_token: impl Into<String>) -> Self {
        Self {
            user_id,
            auth_token: auth_token.into(),
        }
    }

    /// The signed-in user.
    #[must_use]
    pub const fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Bearer token for the channel handshake and request API.
    #[must_use]
    pub fn auth_token(&self) -> &str {
        &self.auth_token
    }

    /// Whether `user` is the signed-in user.
    #[must_use]
    pub fn is_me(&self, user: &UserId) -> bool {
        &self.user_id == user
    }
}

// The token is a credential; keep it out of logs.
impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .field("auth_token", &"<redacted>")
            .finish()
    }
}
