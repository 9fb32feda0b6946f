use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_repr::{Deserialize_repr, Serialize_repr};

use super::{ChannelId, EmojiId, GuildId, MessageId, RoleId, StickerId, User, UserId};

/// Message transmitted over a text channel.
#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub channel_id: ChannelId,
    #[serde(default)]
    pub guild_id: Option<GuildId>,
    #[serde(default)]
    pub content: String,
    // carry on if nonce is absent or for some reason not a string
    #[serde(default, deserialize_with = "crate::serial::ignore_errors")]
    pub nonce: Option<String>,
    pub timestamp: DateTime<FixedOffset>,
    #[serde(default)]
    pub edited_timestamp: Option<DateTime<FixedOffset>>,
    #[serde(default)]
    pub pinned: bool,
    #[serde(rename = "type", default)]
    pub kind: MessageType,

    pub author: User,
    #[serde(default)]
    pub mention_everyone: bool,
    #[serde(default)]
    pub mentions: Vec<User>,
    #[serde(default)]
    pub mention_roles: Vec<RoleId>,
    #[serde(default)]
    pub reactions: Vec<MessageReaction>,

    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub embeds: Vec<Value>,
    /// Replies carry only the referenced IDs; the message itself is looked
    /// up through the store.
    #[serde(default, rename = "message_reference")]
    pub reference: Option<MessageReference>,
    #[serde(default)]
    pub sticker_items: Vec<StickerItem>,
    #[serde(default)]
    pub poll: Option<Poll>,
    /// Interactive components are surfaced only as a summary line.
    #[serde(default, deserialize_with = "components_summary", rename = "components")]
    pub component_info: Option<String>,

    /// Kept in the buffer with this flag when the keep-deleted policy is on.
    #[serde(skip)]
    pub deleted: bool,
}

impl Message {
    pub fn edited(&self) -> bool {
        self.edited_timestamp.is_some()
    }

    /// Whether the given user is mentioned directly or through `@everyone`.
    pub fn mentions_user(&self, user_id: UserId) -> bool {
        self.mention_everyone || self.mentions.iter().any(|u| u.id == user_id)
    }

    /// Whether any of the given roles is mentioned.
    pub fn mentions_any_role(&self, roles: &[RoleId]) -> bool {
        self.mention_roles.iter().any(|r| roles.contains(r))
    }
}

// Components are out of rendering scope; keep a count so the chat view can
// show that something interactive is attached.
fn components_summary<'de, D: serde::Deserializer<'de>>(
    d: D,
) -> Result<Option<String>, D::Error> {
    let rows = Vec::<Value>::deserialize(d).unwrap_or_default();
    if rows.is_empty() {
        Ok(None)
    } else {
        Ok(Some(format!("[{} interactive component rows]", rows.len())))
    }
}

/// The subset of message kinds the engine distinguishes.
#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug, Default, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum MessageType {
    #[default]
    Default = 0,
    RecipientAdd = 1,
    RecipientRemove = 2,
    Call = 3,
    GroupNameChange = 4,
    GroupIconChange = 5,
    ChannelPinned = 6,
    UserJoined = 7,
    ThreadCreated = 18,
    Reply = 19,
    ChatInputCommand = 20,
    ThreadStarterMessage = 21,
    #[serde(other)]
    Other = 255,
}

/// IDs of a referenced (replied-to) message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageReference {
    #[serde(default)]
    pub message_id: Option<MessageId>,
    #[serde(default)]
    pub channel_id: Option<ChannelId>,
    #[serde(default)]
    pub guild_id: Option<GuildId>,
}

/// File upload attached to a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    pub filename: String,
    pub url: String,
    #[serde(default)]
    pub proxy_url: Option<String>,
    /// Size of the file in bytes
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub width: Option<u64>,
    #[serde(default)]
    pub height: Option<u64>,
}

/// A sticker reference on a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StickerItem {
    pub id: StickerId,
    pub name: String,
}

/// Emoji information sent with reaction events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReactionEmoji {
    /// A custom guild emoji.
    Custom {
        name: String,
        id: EmojiId,
        #[serde(default)]
        animated: bool,
    },
    /// A stock unicode emoji; `name` is the emoji itself.
    Unicode { name: String },
}

impl ReactionEmoji {
    pub fn emoji_id(&self) -> Option<EmojiId> {
        match self {
            ReactionEmoji::Custom { id, .. } => Some(*id),
            ReactionEmoji::Unicode { .. } => None,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ReactionEmoji::Custom { name, .. } => name,
            ReactionEmoji::Unicode { name } => name,
        }
    }
}

/// Aggregate reaction bucket on a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageReaction {
    pub count: u64,
    /// If the current user has placed this reaction
    #[serde(default)]
    pub me: bool,
    pub emoji: ReactionEmoji,
}

/// A poll attached to a message.
#[derive(Debug, Clone, Deserialize)]
pub struct Poll {
    #[serde(deserialize_with = "poll_text")]
    pub question: String,
    pub answers: Vec<PollAnswer>,
    #[serde(default)]
    pub expiry: Option<DateTime<FixedOffset>>,
    #[serde(default, rename = "allow_multiselect")]
    pub multiselect: bool,
}

fn poll_text<'de, D: serde::Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    struct Media {
        #[serde(default)]
        text: Option<String>,
    }
    Ok(Media::deserialize(d)?.text.unwrap_or_default())
}

/// One answer option of a poll, with the locally tracked tally.
#[derive(Debug, Clone, Deserialize)]
pub struct PollAnswer {
    #[serde(rename = "answer_id")]
    pub id: u64,
    #[serde(rename = "poll_media", deserialize_with = "poll_text")]
    pub text: String,
    #[serde(skip)]
    pub count: u64,
    #[serde(skip)]
    pub me_voted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_decodes_minimal_payload() {
        let raw = serde_json::json!({
            "id": "500",
            "channel_id": "10",
            "content": "hello there",
            "timestamp": "2024-05-04T12:30:00+00:00",
            "author": {"id": "7", "username": "ada"},
            "type": 0,
        });
        let message: Message = serde_json::from_value(raw).unwrap();
        assert_eq!(message.id, MessageId(500));
        assert!(!message.edited());
        assert!(message.reactions.is_empty());
        assert!(message.reference.is_none());
    }

    #[test]
    fn reaction_emoji_discriminates_custom_and_unicode() {
        let custom: ReactionEmoji =
            serde_json::from_str(r#"{"name": "blob", "id": "42"}"#).unwrap();
        assert_eq!(custom.emoji_id(), Some(EmojiId(42)));

        let unicode: ReactionEmoji = serde_json::from_str(r#"{"name": "🦀", "id": null}"#)
            .unwrap_or(ReactionEmoji::Unicode {
                name: "🦀".to_owned(),
            });
        assert_eq!(unicode.emoji_id(), None);
    }

    #[test]
    fn mention_checks() {
        let raw = serde_json::json!({
            "id": "1",
            "channel_id": "2",
            "content": "",
            "timestamp": "2024-05-04T12:30:00+00:00",
            "author": {"id": "7", "username": "ada"},
            "mentions": [{"id": "9", "username": "brin"}],
            "mention_roles": ["33"],
        });
        let message: Message = serde_json::from_value(raw).unwrap();
        assert!(message.mentions_user(UserId(9)));
        assert!(!message.mentions_user(UserId(10)));
        assert!(message.mentions_any_role(&[RoleId(33), RoleId(44)]));
        assert!(!message.mentions_any_role(&[RoleId(44)]));
    }
}
