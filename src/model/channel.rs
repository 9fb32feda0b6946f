use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_repr::{Deserialize_repr, Serialize_repr};

use super::{ChannelId, GuildId, MessageId, NotificationLevel, Permissions, User, UserId};

/// The kind of a channel, shared between guild channels, DMs and threads.
#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum ChannelType {
    Text = 0,
    Dm = 1,
    Voice = 2,
    GroupDm = 3,
    Category = 4,
    Announce = 5,
    PublicThread = 11,
    PrivateThread = 12,
    Stage = 13,
    Directory = 14,
    Forum = 15,
    Media = 16,
}

impl ChannelType {
    /// Channel kinds that participate in the guild tree and therefore
    /// default to hidden in community guilds without an explicit opt-in.
    pub fn default_hidden(&self) -> bool {
        matches!(
            self,
            ChannelType::Text
                | ChannelType::Voice
                | ChannelType::Category
                | ChannelType::Announce
                | ChannelType::Forum
        )
    }

    pub fn is_thread(&self) -> bool {
        matches!(self, ChannelType::PublicThread | ChannelType::PrivateThread)
    }
}

/// A per-channel permission adjustment applied on top of role permissions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionOverwrite {
    /// Role ID or user ID, depending on `kind`.
    #[serde(deserialize_with = "crate::serial::deserialize_id")]
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: OverwriteType,
    pub allow: Permissions,
    pub deny: Permissions,
}

/// Whether an overwrite addresses a role or a single member.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum OverwriteType {
    Role = 0,
    Member = 1,
}

/// Permission booleans the controller consults constantly, cached per
/// channel after each permissions recomputation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComputedPerms {
    pub bits: Permissions,
    pub permitted: bool,
    pub allow_write: bool,
    pub allow_attach: bool,
    pub allow_manage: bool,
}

impl ComputedPerms {
    pub fn from_bits(bits: Permissions) -> ComputedPerms {
        ComputedPerms {
            bits,
            permitted: bits.contains(Permissions::VIEW_CHANNEL),
            allow_write: bits.contains(Permissions::SEND_MESSAGES),
            allow_attach: bits.contains(Permissions::ATTACH_FILES),
            allow_manage: bits.contains(Permissions::MANAGE_MESSAGES),
        }
    }

    pub fn all() -> ComputedPerms {
        ComputedPerms {
            bits: Permissions::all(),
            permitted: true,
            allow_write: true,
            allow_attach: true,
            allow_manage: true,
        }
    }
}

/// A guild channel as mirrored by the engine.
#[derive(Debug, Clone, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    #[serde(rename = "type")]
    pub kind: ChannelType,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub parent_id: Option<ChannelId>,
    #[serde(default)]
    pub position: i64,
    #[serde(default)]
    pub permission_overwrites: Vec<PermissionOverwrite>,
    /// Slow-mode interval in seconds, when enabled.
    #[serde(default)]
    pub rate_limit_per_user: Option<u64>,
    #[serde(default, deserialize_with = "crate::serial::ignore_errors")]
    pub last_message_id: Option<MessageId>,

    /// Present on channel events, absent inside READY guild payloads
    /// (filled in during guild ingestion).
    #[serde(default)]
    pub guild_id: Option<GuildId>,

    // Client-side state, never on the wire.
    #[serde(skip)]
    pub hidden: bool,
    #[serde(skip)]
    pub muted: bool,
    #[serde(skip)]
    pub collapsed: bool,
    #[serde(skip)]
    pub notifications: NotificationLevel,
    #[serde(skip)]
    pub perms: Option<ComputedPerms>,
}

impl Channel {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("unknown-channel")
    }

    /// Whether the channel can hold a message buffer.
    pub fn is_textual(&self) -> bool {
        matches!(
            self.kind,
            ChannelType::Text | ChannelType::Announce | ChannelType::Voice
        ) || self.kind.is_thread()
    }
}

/// A direct-message or group channel.
#[derive(Debug, Clone, Deserialize)]
pub struct DmChannel {
    pub id: ChannelId,
    #[serde(rename = "type")]
    pub kind: ChannelType,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub recipients: Vec<User>,
    #[serde(default)]
    pub recipient_ids: Vec<UserId>,
    #[serde(default)]
    pub owner_id: Option<UserId>,
    #[serde(default, deserialize_with = "crate::serial::ignore_errors")]
    pub last_message_id: Option<MessageId>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub is_spam: Option<bool>,
    #[serde(default, rename = "is_message_request")]
    pub is_request: Option<bool>,

    #[serde(skip)]
    pub muted: bool,
    #[serde(skip)]
    pub notifications: NotificationLevel,
}

impl DmChannel {
    /// The name the tree renders for this DM.
    ///
    /// Group DMs without an explicit name derive one from the owner and the
    /// remaining recipients; 1:1 DMs use the other party's display name.
    pub fn derived_name(&self) -> String {
        if let Some(name) = self.name.as_deref().filter(|n| !n.is_empty()) {
            return name.to_owned();
        }
        if let Some(owner_id) = self.owner_id {
            let owner = self
                .recipients
                .iter()
                .find(|r| r.id == owner_id)
                .map(|r| r.display_name())
                .unwrap_or("Unknown");
            let others: Vec<&str> = self
                .recipients
                .iter()
                .filter(|r| r.id != owner_id)
                .map(|r| r.display_name())
                .collect();
            if others.is_empty() {
                return format!("{}'s Group", owner);
            }
            return format!("{}; {}", owner, others.join(", "));
        }
        self.recipients
            .first()
            .map(|r| r.display_name().to_owned())
            .unwrap_or_else(|| "Unknown DM".to_owned())
    }

    pub fn is_group(&self) -> bool {
        self.kind == ChannelType::GroupDm
    }
}

/// Sort DMs by most recent activity, channels with no messages last.
pub fn sort_dms(dms: &mut [DmChannel]) {
    dms.sort_by(|a, b| {
        let a_last = a.last_message_id.map(|m| m.0).unwrap_or(0);
        let b_last = b.last_message_id.map(|m| m.0).unwrap_or(0);
        (a_last == 0).cmp(&(b_last == 0)).then(b_last.cmp(&a_last))
    });
}

/// A thread hanging off a text or forum channel.
#[derive(Debug, Clone)]
pub struct Thread {
    pub id: ChannelId,
    pub kind: ChannelType,
    pub parent_id: ChannelId,
    pub name: String,
    pub owner_id: Option<UserId>,
    pub locked: bool,
    pub message_count: u64,
    pub last_message_id: Option<MessageId>,
    /// Membership is toggled client-side with a REST call.
    pub joined: bool,
    pub muted: bool,
    pub notifications: NotificationLevel,
}

impl Thread {
    /// Decode a thread payload, tolerating the several shapes the gateway
    /// uses (READY guild threads, THREAD_CREATE, thread-list chunks).
    pub fn from_payload(value: &Value) -> Option<Thread> {
        let id = value.get("id").and_then(id_from_value)?;
        let parent_id = value.get("parent_id").and_then(id_from_value)?;
        let kind = match value.get("type").and_then(Value::as_u64) {
            Some(12) => ChannelType::PrivateThread,
            _ => ChannelType::PublicThread,
        };
        let member = value.get("member");
        let member_flags = member
            .and_then(|m| m.get("flags"))
            .and_then(Value::as_u64);
        let notifications = match member_flags {
            Some(3) => NotificationLevel::All,
            Some(5) => NotificationLevel::Mentions,
            Some(_) => NotificationLevel::Nothing,
            None => NotificationLevel::Inherit,
        };
        Some(Thread {
            id: ChannelId(id),
            kind,
            parent_id: ChannelId(parent_id),
            name: value
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or("unnamed-thread")
                .to_owned(),
            owner_id: value.get("owner_id").and_then(id_from_value).map(UserId),
            locked: value
                .get("thread_metadata")
                .and_then(|m| m.get("locked"))
                .and_then(Value::as_bool)
                .unwrap_or(false),
            message_count: value
                .get("message_count")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            last_message_id: value
                .get("last_message_id")
                .and_then(id_from_value)
                .map(MessageId),
            joined: member.is_some(),
            muted: member
                .and_then(|m| m.get("muted"))
                .and_then(Value::as_bool)
                .unwrap_or(false),
            notifications,
        })
    }
}

fn id_from_value(value: &Value) -> Option<u64> {
    match value {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_u64(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: u64, name: &str) -> User {
        User {
            id: UserId(id),
            name: name.to_owned(),
            global_name: None,
            avatar: None,
            bot: false,
        }
    }

    #[test]
    fn unnamed_group_dm_derives_name_from_owner_and_members() {
        let dm = DmChannel {
            id: ChannelId(1),
            kind: ChannelType::GroupDm,
            name: None,
            recipients: vec![user(1, "ada"), user(2, "brin"), user(3, "cleo")],
            recipient_ids: vec![],
            owner_id: Some(UserId(2)),
            last_message_id: None,
            avatar: None,
            is_spam: None,
            is_request: None,
            muted: false,
            notifications: NotificationLevel::Inherit,
        };
        assert_eq!(dm.derived_name(), "brin; ada, cleo");
    }

    #[test]
    fn dms_sort_by_last_message_desc_with_empty_last() {
        let dm = |id: u64, last: Option<u64>| DmChannel {
            id: ChannelId(id),
            kind: ChannelType::Dm,
            name: None,
            recipients: vec![],
            recipient_ids: vec![],
            owner_id: None,
            last_message_id: last.map(MessageId),
            avatar: None,
            is_spam: None,
            is_request: None,
            muted: false,
            notifications: NotificationLevel::Inherit,
        };
        let mut dms = vec![dm(1, Some(5)), dm(2, None), dm(3, Some(9))];
        sort_dms(&mut dms);
        let order: Vec<u64> = dms.iter().map(|d| d.id.0).collect();
        assert_eq!(order, vec![3, 1, 2]);
    }

    #[test]
    fn thread_payload_decodes_membership() {
        let value = serde_json::json!({
            "id": "900",
            "parent_id": "800",
            "type": 11,
            "name": "release planning",
            "owner_id": "7",
            "thread_metadata": {"locked": false},
            "message_count": 14,
            "member": {"flags": 3, "muted": false},
        });
        let thread = Thread::from_payload(&value).unwrap();
        assert!(thread.joined);
        assert_eq!(thread.notifications, NotificationLevel::All);
        assert_eq!(thread.message_count, 14);
    }
}
