//! User identity types.
//!
//! The server is not consistent about how it refers to a user: some payloads
//! carry a bare id string, others embed a populated profile object. Both
//! shapes deserialize into [`UserRef`], and [`UserRef::id`] is the one place
//! where an identifier is extracted from either shape.

use serde::{Deserialize, Serialize};

/// Server-assigned user identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Creates a user identifier from its string form.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the string form of this identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A populated user record as returned by search and conversation payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// The user's identifier.
    #[serde(rename = "_id")]
    pub id: UserId,
    /// Display name.
    #[serde(default)]
    pub username: String,
    /// Stored profile image file name, if the user uploaded one.
    #[serde(
        rename = "profileImage",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub profile_image: Option<String>,
}

impl UserProfile {
    /// Creates a profile with no image.
    pub fn new(id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            id: UserId::new(id),
            username: username.into(),
            profile_image: None,
        }
    }
}

/// A reference to a user in either of the shapes the server emits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserRef {
    /// Bare identifier string.
    Id(UserId),
    /// Embedded profile object.
    Profile(UserProfile),
}

impl UserRef {
    /// Extracts the user identifier regardless of shape.
    #[must_use]
    pub const fn id(&self) -> &UserId {
        match self {
            Self::Id(id) => id,
            Self::Profile(profile) => &profile.id,
        }
    }

    /// Returns the display name when the reference carries one.
    #[must_use]
    pub fn username(&self) -> Option<&str> {
        match self {
            Self::Id(_) => None,
            Self::Profile(profile) if profile.username.is_empty() => None,
            Self::Profile(profile) => Some(&profile.username),
        }
    }
}

impl From<UserId> for UserRef {
    fn from(id: UserId) -> Self {
        Self::Id(id)
    }
}

impl From<UserProfile> for UserRef {
    fn from(profile: UserProfile) -> Self {
        Self::Profile(profile)
    }
}
