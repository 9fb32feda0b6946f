//! Struct and enum definitions of values in the chat service's data model.

use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

mod channel;
pub use channel::*;

mod command;
pub use command::*;

mod event;
pub use event::*;

mod guild;
pub use guild::*;

mod message;
pub use message::*;

mod user;
pub use user::*;

/// First second of the service's snowflake epoch (2015-01-01T00:00:00Z).
pub const SNOWFLAKE_EPOCH: u64 = 1_420_070_400;

macro_rules! snowflake {
    ($(#[$attr:meta] $name:ident;)*) => {
        $(
            #[$attr]
            ///
            /// Identifiers are snowflakes: ordering by value is ordering by
            /// creation time. They are debug-printed with the `{:?}`
            /// specifier and their raw value printed with `{}`.
            #[derive(Copy, Clone, Hash, Eq, PartialEq, Debug, Ord, PartialOrd, Default)]
            #[derive(Serialize, Deserialize)]
            pub struct $name(#[serde(deserialize_with = "crate::serial::deserialize_id")] pub u64);

            impl $name {
                /// Get the creation date of the object referred to by this ID.
                pub fn creation_date(&self) -> DateTime<Utc> {
                    Utc.timestamp_opt((SNOWFLAKE_EPOCH + (self.0 >> 22) / 1000) as i64, 0)
                        .single()
                        .unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap())
                }
            }

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                    write!(f, "{}", self.0)
                }
            }
        )*
    }
}

snowflake! {
    /// An identifier for an application (bot or embedded app)
    ApplicationId;
    /// An identifier for an application command
    CommandId;
    /// An identifier for a user
    UserId;
    /// An identifier for a guild
    GuildId;
    /// An identifier for a channel, DM or thread
    ChannelId;
    /// An identifier for a message
    MessageId;
    /// An identifier for a role
    RoleId;
    /// An identifier for a custom emoji
    EmojiId;
    /// An identifier for a sticker
    StickerId;
}

impl UserId {
    /// Render a mention token for this user.
    pub fn mention(&self) -> String {
        format!("<@{}>", self.0)
    }
}

impl RoleId {
    /// Render a mention token for this role.
    pub fn mention(&self) -> String {
        format!("<@&{}>", self.0)
    }
}

impl ChannelId {
    /// Render a mention token for this channel.
    pub fn mention(&self) -> String {
        format!("<#{}>", self.0)
    }
}

impl GuildId {
    /// The `@everyone` role shares the guild's ID.
    pub fn everyone_role(&self) -> RoleId {
        RoleId(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snowflake_ordering_is_temporal() {
        // higher timestamp bits compare greater
        let older = MessageId(175_928_847_299_117_063);
        let newer = MessageId(175_928_847_299_117_063 + (1 << 22));
        assert!(newer > older);
        assert!(newer.creation_date() >= older.creation_date());
    }

    #[test]
    fn ids_deserialize_from_strings() {
        let id: ChannelId = serde_json::from_str(r#""81384788765712384""#).unwrap();
        assert_eq!(id, ChannelId(81384788765712384));
    }
}
