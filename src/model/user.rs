use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

use super::UserId;

/// Base user information, visible wherever the user appears.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// The user's ID
    pub id: UserId,

    /// The user's username, not unique across the platform.
    #[serde(rename = "username")]
    pub name: String,

    /// Per-guild or global display name, when set.
    #[serde(default)]
    pub global_name: Option<String>,

    /// The user's avatar hash
    #[serde(default)]
    pub avatar: Option<String>,

    /// Whether the user belongs to an OAuth2 application
    #[serde(default)]
    pub bot: bool,
}

impl User {
    /// The name to render for this user: display name if set, username otherwise.
    pub fn display_name(&self) -> &str {
        self.global_name.as_deref().unwrap_or(&self.name)
    }
}

/// The logged-in user, as delivered by READY and `users/@me`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentUser {
    pub id: UserId,
    #[serde(rename = "username")]
    pub name: String,
    #[serde(default)]
    pub global_name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    /// Subscription tier; unlocks cross-guild emojis and stickers.
    #[serde(default)]
    pub premium_type: PremiumTier,
}

impl CurrentUser {
    /// Whether the account has any paid subscription tier.
    pub fn premium(&self) -> bool {
        !matches!(self.premium_type, PremiumTier::None)
    }
}

/// Paid subscription tiers.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum PremiumTier {
    #[default]
    None = 0,
    Classic = 1,
    Full = 2,
    Basic = 3,
}

/// A relationship between the logged-in user and another user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub id: UserId,
    #[serde(rename = "type")]
    pub kind: RelationshipType,
    #[serde(default)]
    pub user: Option<User>,
}

/// The nature of a relationship entry.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum RelationshipType {
    None = 0,
    Friend = 1,
    Blocked = 2,
    IncomingRequest = 3,
    OutgoingRequest = 4,
    Ignored = 5,
}
