use std::fmt;

use bitflags::bitflags;
use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Channel, ChannelId, EmojiId, GuildId, RoleId, StickerId, Thread, User, UserId};

bitflags! {
    /// Permission bits carried by roles and channel overwrites.
    pub struct Permissions: u64 {
        const CREATE_INVITE = 1;
        const KICK_MEMBERS = 1 << 1;
        const BAN_MEMBERS = 1 << 2;
        /// Implies all permissions and bypasses channel overwrites
        const ADMINISTRATOR = 1 << 3;
        const MANAGE_CHANNELS = 1 << 4;
        const MANAGE_GUILD = 1 << 5;
        const ADD_REACTIONS = 1 << 6;
        const VIEW_CHANNEL = 1 << 10;
        const SEND_MESSAGES = 1 << 11;
        /// Delete and pin other members' messages
        const MANAGE_MESSAGES = 1 << 13;
        const EMBED_LINKS = 1 << 14;
        const ATTACH_FILES = 1 << 15;
        const READ_HISTORY = 1 << 16;
        const MENTION_EVERYONE = 1 << 17;
        const EXTERNAL_EMOJIS = 1 << 18;
        const VOICE_CONNECT = 1 << 20;
        const VOICE_SPEAK = 1 << 21;
        const VOICE_MUTE_MEMBERS = 1 << 22;
        const VOICE_DEAFEN_MEMBERS = 1 << 23;
        const VOICE_MOVE_MEMBERS = 1 << 24;
        const CHANGE_NICKNAMES = 1 << 26;
        const MANAGE_NICKNAMES = 1 << 27;
        const MANAGE_ROLES = 1 << 28;
        const MANAGE_WEBHOOKS = 1 << 29;
        const MANAGE_EMOJIS = 1 << 30;
        const USE_APPLICATION_COMMANDS = 1 << 31;
        const MANAGE_THREADS = 1 << 34;
        const CREATE_PUBLIC_THREADS = 1 << 35;
        const CREATE_PRIVATE_THREADS = 1 << 36;
        const EXTERNAL_STICKERS = 1 << 37;
        const SEND_MESSAGES_IN_THREADS = 1 << 38;
    }
}

// The wire carries permission sets as decimal strings.
impl Serialize for Permissions {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(&self.bits())
    }
}

impl<'de> Deserialize<'de> for Permissions {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let bits = crate::serial::deserialize_id(d)?;
        Ok(Permissions::from_bits_truncate(bits))
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.bits())
    }
}

/// A role grantable to guild members.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
    /// 24-bit RGB color; zero means uncolored.
    pub color: u32,
    /// Sort key within the guild, higher first.
    pub position: i64,
    /// Whether members holding this role are listed separately.
    #[serde(default)]
    pub hoist: bool,
    pub permissions: Permissions,
}

/// Sort roles the way the member list renders them: colored roles first,
/// then by position descending.
pub fn sort_roles(roles: &mut [Role]) {
    roles.sort_by(|a, b| {
        (a.color == 0)
            .cmp(&(b.color == 0))
            .then(b.position.cmp(&a.position))
    });
}

/// A custom emoji belonging to a guild.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Emoji {
    pub id: EmojiId,
    pub name: String,
    #[serde(default)]
    pub animated: bool,
    /// Unusable emojis (e.g. lost boost tier) are filtered out on ingest.
    #[serde(default = "default_true")]
    pub available: bool,
}

/// A sticker belonging to a guild.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sticker {
    pub id: StickerId,
    pub name: String,
    #[serde(default = "default_true")]
    pub available: bool,
}

fn default_true() -> bool {
    true
}

/// A member as known to the engine: identity plus granted roles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    #[serde(default)]
    pub user: Option<User>,
    #[serde(default)]
    pub nick: Option<String>,
    #[serde(default)]
    pub roles: Vec<RoleId>,
}

impl Member {
    pub fn user_id(&self) -> Option<UserId> {
        self.user.as_ref().map(|u| u.id)
    }

    /// Nickname if present, then display name, then username.
    pub fn display_name(&self) -> Option<&str> {
        if let Some(nick) = self.nick.as_deref() {
            Some(nick)
        } else {
            self.user.as_ref().map(|u| u.display_name())
        }
    }
}

/// A user's online presence status.
#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub enum OnlineStatus {
    #[serde(rename = "dnd")]
    DoNotDisturb,
    #[serde(rename = "invisible")]
    Invisible,
    #[serde(rename = "offline")]
    Offline,
    #[serde(rename = "online")]
    Online,
    #[serde(rename = "idle")]
    Idle,
}

/// A member's presence: status plus current activities.
#[derive(Debug, Clone, Deserialize)]
pub struct Presence {
    #[serde(deserialize_with = "presence_user_id", rename = "user")]
    pub user_id: UserId,
    pub status: OnlineStatus,
    #[serde(default)]
    pub activities: Vec<Activity>,
}

// Presence events carry either a full user object or just `{"id": ...}`.
fn presence_user_id<'de, D: Deserializer<'de>>(d: D) -> Result<UserId, D::Error> {
    #[derive(Deserialize)]
    struct Partial {
        id: UserId,
    }
    Ok(Partial::deserialize(d)?.id)
}

/// A user activity attached to a presence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: u8,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
}

/// Notification levels for a guild, category, channel or DM.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum NotificationLevel {
    All,
    Mentions,
    Nothing,
    #[default]
    Inherit,
}

impl From<u8> for NotificationLevel {
    fn from(v: u8) -> Self {
        match v {
            0 => NotificationLevel::All,
            1 => NotificationLevel::Mentions,
            2 => NotificationLevel::Nothing,
            _ => NotificationLevel::Inherit,
        }
    }
}

impl From<NotificationLevel> for u8 {
    fn from(v: NotificationLevel) -> u8 {
        match v {
            NotificationLevel::All => 0,
            NotificationLevel::Mentions => 1,
            NotificationLevel::Nothing => 2,
            NotificationLevel::Inherit => 3,
        }
    }
}

/// A guild as mirrored by the engine.
///
/// Built from the READY / GUILD_CREATE payload; the notification and
/// visibility fields are filled in later from user guild settings.
#[derive(Debug, Clone)]
pub struct Guild {
    pub id: GuildId,
    pub name: String,
    pub description: Option<String>,
    pub owner_id: UserId,
    pub owned: bool,
    /// `@everyone` role permissions, the base of every computation.
    pub base_permissions: Permissions,
    pub community: bool,
    pub premium_tier: u8,
    pub features: Vec<String>,
    pub member_count: Option<u64>,
    pub channels: Vec<Channel>,
    pub roles: Vec<Role>,
    pub emojis: Vec<Emoji>,
    pub stickers: Vec<Sticker>,
    pub threads: Vec<Thread>,

    // from user guild settings
    pub muted: bool,
    pub suppress_everyone: bool,
    pub suppress_roles: bool,
    pub notifications: NotificationLevel,
    /// All channels visible without explicit opt-in.
    pub opt_in_channels: bool,

    /// Set when permissions were computed and the user is an administrator.
    pub admin: bool,
}

/// Wire shape of a guild in READY / GUILD_CREATE.
///
/// User-account payloads nest the static fields under `properties`; bot
/// payloads carry them at the top level.
#[derive(Debug, Clone, Deserialize)]
pub struct GuildPayload {
    pub id: GuildId,
    #[serde(default)]
    pub unavailable: bool,
    #[serde(default)]
    pub properties: Option<GuildProperties>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub owner_id: Option<UserId>,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub premium_tier: u8,
    #[serde(default)]
    pub member_count: Option<u64>,
    #[serde(default)]
    pub channels: Vec<Channel>,
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub threads: Vec<Value>,
    #[serde(default)]
    pub emojis: Vec<Emoji>,
    #[serde(default)]
    pub stickers: Vec<Sticker>,
}

/// The `properties` object of a user-account guild payload.
#[derive(Debug, Clone, Deserialize)]
pub struct GuildProperties {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub owner_id: UserId,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub premium_tier: u8,
}

impl Guild {
    /// Build the engine mirror of a guild payload.
    ///
    /// Channels of community-capable types default to hidden for non-bot
    /// accounts until user settings opt them in.
    pub fn from_payload(payload: GuildPayload, my_id: UserId, bot: bool) -> Guild {
        let (name, description, owner_id, features, premium_tier) = match payload.properties {
            Some(p) => (p.name, p.description, p.owner_id, p.features, p.premium_tier),
            None => (
                payload.name.unwrap_or_default(),
                payload.description,
                payload.owner_id.unwrap_or_default(),
                payload.features,
                payload.premium_tier,
            ),
        };

        let community = features
            .iter()
            .any(|f| f == "COMMUNITY" || f == "COMMUNITY_CANARY");

        let mut channels = payload.channels;
        for channel in &mut channels {
            channel.hidden = !bot && channel.kind.default_hidden();
            channel.guild_id = Some(payload.id);
        }
        channels.sort_by_key(|c| c.position);

        let mut roles = payload.roles;
        let base_permissions = roles
            .iter()
            .find(|r| r.id == payload.id.everyone_role())
            .map(|r| r.permissions)
            .unwrap_or_else(Permissions::empty);
        sort_roles(&mut roles);

        let mut threads: Vec<Thread> = payload
            .threads
            .into_iter()
            .filter_map(|t| Thread::from_payload(&t))
            .collect();
        threads.sort_by(|a, b| b.id.cmp(&a.id));

        Guild {
            id: payload.id,
            name,
            description,
            owned: owner_id == my_id,
            owner_id,
            base_permissions,
            community,
            premium_tier,
            features,
            member_count: payload.member_count,
            channels,
            roles,
            emojis: payload.emojis.into_iter().filter(|e| e.available).collect(),
            stickers: payload
                .stickers
                .into_iter()
                .filter(|s| s.available)
                .collect(),
            threads,
            muted: false,
            suppress_everyone: false,
            suppress_roles: false,
            notifications: NotificationLevel::Inherit,
            opt_in_channels: true,
            admin: false,
        }
    }

    pub fn channel(&self, id: ChannelId) -> Option<&Channel> {
        self.channels.iter().find(|c| c.id == id)
    }

    pub fn channel_mut(&mut self, id: ChannelId) -> Option<&mut Channel> {
        self.channels.iter_mut().find(|c| c.id == id)
    }

    pub fn role(&self, id: RoleId) -> Option<&Role> {
        self.roles.iter().find(|r| r.id == id)
    }
}

/// One operation of a GUILD_MEMBER_LIST_UPDATE batch.
#[derive(Debug, Clone, Deserialize)]
pub struct MemberListOp {
    pub op: String,
    #[serde(default)]
    pub range: Option<(usize, usize)>,
    #[serde(default)]
    pub index: Option<usize>,
    #[serde(default)]
    pub item: Option<MemberListItem>,
    #[serde(default)]
    pub items: Vec<MemberListItem>,
}

/// A member-list row: either a real member or a group separator.
#[derive(Debug, Clone, Deserialize)]
pub struct MemberListItem {
    #[serde(default)]
    pub member: Option<MemberListEntry>,
    #[serde(default)]
    pub group: Option<Value>,
}

/// The member payload inside a member-list row.
#[derive(Debug, Clone, Deserialize)]
pub struct MemberListEntry {
    pub user: User,
    #[serde(default)]
    pub roles: Vec<RoleId>,
    #[serde(default)]
    pub presence: Option<Presence>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permissions_round_trip_as_strings() {
        let perms = Permissions::VIEW_CHANNEL | Permissions::SEND_MESSAGES;
        let encoded = serde_json::to_string(&perms).unwrap();
        assert_eq!(encoded, r#""3072""#);
        let decoded: Permissions = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, perms);
    }

    #[test]
    fn roles_sort_colored_first_then_position() {
        let role = |id: u64, color: u32, position: i64| Role {
            id: RoleId(id),
            name: String::new(),
            color,
            position,
            hoist: false,
            permissions: Permissions::empty(),
        };
        let mut roles = vec![role(1, 0, 10), role(2, 0xFF0000, 1), role(3, 0x00FF00, 5)];
        sort_roles(&mut roles);
        let order: Vec<u64> = roles.iter().map(|r| r.id.0).collect();
        assert_eq!(order, vec![3, 2, 1]);
    }
}
