//! Payloads exchanged with the main and voice gateways.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::serial::Opcode;

use super::{
    Channel, ChannelId, CurrentUser, DmChannel, GuildId, GuildPayload, Member, MemberListOp,
    MessageId, Message, Presence, ReactionEmoji, Relationship, Role, RoleId, User, UserId,
};

/// A JSON payload message sent to the main gateway.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum GatewayCommand {
    /// Triggers the initial handshake with the gateway.
    Identify {
        #[doc(hidden)]
        op: Opcode<2>,
        #[serde(rename = "d")]
        payload: IdentifyPayload,
    },

    /// Replays missed events when a disconnected client resumes.
    Resume {
        #[doc(hidden)]
        op: Opcode<6>,
        #[serde(rename = "d")]
        payload: ResumePayload,
    },

    /// Keeps the session alive; `d` is the last received sequence number.
    Heartbeat {
        #[doc(hidden)]
        op: Opcode<1>,
        #[serde(rename = "d")]
        last_sequence: Option<u64>,
    },

    /// Declares the client's presence.
    UpdatePresence {
        #[doc(hidden)]
        op: Opcode<3>,
        #[serde(rename = "d")]
        payload: Value,
    },

    /// Joins, moves within, or leaves voice.
    UpdateVoiceState {
        #[doc(hidden)]
        op: Opcode<4>,
        #[serde(rename = "d")]
        payload: VoiceStateCommand,
    },

    /// Requests member chunks for a guild, correlated by `nonce`.
    RequestMembers {
        #[doc(hidden)]
        op: Opcode<8>,
        #[serde(rename = "d")]
        payload: RequestMembersPayload,
    },

    /// Requests call state for a DM channel.
    CallConnect {
        #[doc(hidden)]
        op: Opcode<13>,
        #[serde(rename = "d")]
        payload: CallConnectPayload,
    },

    /// Declares the channels and members the client wants live updates for.
    Subscribe {
        #[doc(hidden)]
        op: Opcode<37>,
        #[serde(rename = "d")]
        payload: Value,
    },

    /// Periodic session-duration telemetry.
    TimeSpent {
        #[doc(hidden)]
        op: Opcode<41>,
        #[serde(rename = "d")]
        payload: TimeSpentPayload,
    },
}

/// The payload sent along with `Identify` (opcode 2).
#[derive(Debug, Clone, Serialize)]
pub struct IdentifyPayload {
    pub token: String,
    pub capabilities: u64,
    pub properties: IdentifyProperties,
    pub compress: bool,
}

/// Client fingerprint information sent with identify.
#[derive(Debug, Clone, Serialize)]
pub struct IdentifyProperties {
    pub os: String,
    pub browser: String,
    pub device: String,
}

/// The payload sent along with `Resume` (opcode 6).
#[derive(Debug, Clone, Serialize)]
pub struct ResumePayload {
    pub token: String,
    pub session_id: String,
    #[serde(rename = "seq")]
    pub last_sequence: u64,
}

/// The payload sent along with `RequestMembers` (opcode 8).
#[derive(Debug, Clone, Serialize)]
pub struct RequestMembersPayload {
    pub guild_id: GuildId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_ids: Option<Vec<UserId>>,
    pub limit: u32,
    pub presences: bool,
    /// Correlates the GUILD_MEMBERS_CHUNK responses with this request.
    pub nonce: String,
}

/// The payload sent along with `UpdateVoiceState` (opcode 4).
#[derive(Debug, Clone, Serialize)]
pub struct VoiceStateCommand {
    pub guild_id: Option<GuildId>,
    pub channel_id: Option<ChannelId>,
    pub self_mute: bool,
    pub self_deaf: bool,
    pub self_video: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub preferred_regions: Vec<String>,
}

/// The payload sent along with `CallConnect` (opcode 13).
#[derive(Debug, Clone, Serialize)]
pub struct CallConnectPayload {
    pub channel_id: ChannelId,
}

/// The payload sent along with `TimeSpent` (opcode 41).
#[derive(Debug, Clone, Serialize)]
pub struct TimeSpentPayload {
    pub session_duration: u64,
}

/// A JSON payload received over the main gateway, of any purpose.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum GatewayMessage {
    /// An event was dispatched.
    Dispatch {
        #[doc(hidden)]
        op: Opcode<0>,
        #[serde(flatten)]
        dispatch: DispatchPayload,
    },

    /// The gateway requests an immediate heartbeat.
    HeartbeatRequest {
        #[doc(hidden)]
        op: Opcode<1>,
    },

    /// The gateway asks the client to reconnect (and resume).
    Reconnect {
        #[doc(hidden)]
        op: Opcode<7>,
    },

    /// The current gateway session is invalid; identify afresh.
    InvalidSession {
        #[doc(hidden)]
        op: Opcode<9>,
        #[serde(rename = "d", default)]
        resumable: bool,
    },

    /// The first message on a connection, carrying the heartbeat interval.
    Hello {
        #[doc(hidden)]
        op: Opcode<10>,
        #[serde(rename = "d")]
        payload: HelloPayload,
    },

    /// Acknowledges a heartbeat.
    HeartbeatAck {
        #[doc(hidden)]
        op: Opcode<11>,
    },
}

/// The data field of a `Hello` message.
#[derive(Debug, Clone, Deserialize)]
pub struct HelloPayload {
    /// Interval (in milliseconds) the client should heartbeat with.
    pub heartbeat_interval: u64,
}

/// A dispatch (opcode 0) received from the gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchPayload {
    #[serde(flatten)]
    pub event: Event,
    /// The sequence number of the event.
    #[serde(rename = "s")]
    pub sequence: u64,
}

/// Event received over the main gateway connection.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(tag = "t", content = "d")]
pub enum Event {
    /// The first event in a connection, containing the initial state.
    Ready(Box<ReadyEvent>),
    /// Late hydration: merged presences and extra guild data.
    ReadySupplemental(Value),
    /// The connection resumed after a disconnect; no rehydration needed.
    Resumed(Value),

    MessageCreate(Box<Message>),
    MessageUpdate(Box<MessageUpdate>),
    MessageDelete {
        id: MessageId,
        channel_id: ChannelId,
        #[serde(default)]
        guild_id: Option<GuildId>,
    },
    MessageReactionAdd(ReactionEvent),
    MessageReactionRemove(ReactionEvent),
    MessagePollVoteAdd(PollVoteEvent),
    MessagePollVoteRemove(PollVoteEvent),
    /// Another logged-in device acknowledged messages in a channel.
    MessageAck {
        channel_id: ChannelId,
        #[serde(default)]
        message_id: Option<MessageId>,
        #[serde(default)]
        manual: bool,
    },

    TypingStart {
        channel_id: ChannelId,
        user_id: UserId,
        #[serde(default)]
        timestamp: Option<u64>,
    },

    ConversationSummaryUpdate(SummaryUpdate),

    ThreadCreate(Value),
    ThreadUpdate(Value),
    ThreadDelete {
        id: ChannelId,
        #[serde(default)]
        parent_id: Option<ChannelId>,
        #[serde(default)]
        guild_id: Option<GuildId>,
    },

    GuildCreate(Box<GuildPayload>),
    GuildUpdate(Box<GuildPayload>),
    GuildDelete {
        id: GuildId,
        #[serde(default)]
        unavailable: bool,
    },

    ChannelCreate(Box<Channel>),
    ChannelUpdate(Box<Channel>),
    ChannelDelete(Box<Channel>),

    GuildRoleCreate {
        guild_id: GuildId,
        role: Role,
    },
    GuildRoleUpdate {
        guild_id: GuildId,
        role: Role,
    },
    GuildRoleDelete {
        guild_id: GuildId,
        role_id: RoleId,
    },

    GuildEmojisUpdate {
        guild_id: GuildId,
        emojis: Vec<super::Emoji>,
    },

    GuildMembersChunk(MembersChunk),
    GuildMemberListUpdate(MemberListUpdate),

    PresenceUpdate(Box<PresenceUpdateEvent>),

    /// Update to the logged-in user's information; may rotate the token.
    UserUpdate(Box<CurrentUser>),
    UserGuildSettingsUpdate(Box<UserGuildSettings>),
    /// The settings-protobuf mirror changed.
    UserSettingsProtoUpdate(SettingsProtoUpdate),

    RelationshipAdd(Box<Relationship>),
    RelationshipRemove(Box<Relationship>),

    VoiceStateUpdate(Box<VoiceStateEvent>),
    VoiceServerUpdate(VoiceServerUpdate),

    CallCreate(Box<CallEvent>),
    CallUpdate(Box<CallEvent>),
    CallDelete {
        channel_id: ChannelId,
    },

    /// Autocomplete choices for an in-flight command interaction.
    ApplicationCommandAutocompleteResponse(AutocompleteResponse),

    /// An event type not covered by the above.
    #[serde(other)]
    Unknown,
}

/// The READY event, carrying initial state.
#[derive(Debug, Clone, Deserialize)]
pub struct ReadyEvent {
    #[serde(rename = "v", default)]
    pub version: u64,
    pub user: CurrentUser,
    /// The ID of the current session, used for resuming.
    pub session_id: String,
    /// Gateway host to use for resume attempts.
    #[serde(default)]
    pub resume_gateway_url: Option<String>,
    /// Rotated token, delivered occasionally on READY.
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default)]
    pub guilds: Vec<GuildPayload>,
    #[serde(default)]
    pub private_channels: Vec<DmChannel>,
    /// Referenced by `recipient_ids` in private channels.
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub read_state: ReadStateEntries,
    #[serde(default)]
    pub user_guild_settings: UserGuildSettingsEntries,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
    /// Base64 settings-protobuf mirror.
    #[serde(default)]
    pub user_settings_proto: Option<String>,
    #[serde(default)]
    pub sessions: Vec<Value>,
}

/// The versioned `read_state` collection on READY.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReadStateEntries {
    #[serde(default)]
    pub entries: Vec<ReadStateEntry>,
}

/// One channel's read state as reported by READY.
///
/// `last_message_id` here is the last *acked* message, not the channel's
/// newest; the newest comes from the channel object itself.
#[derive(Debug, Clone, Deserialize)]
pub struct ReadStateEntry {
    pub id: ChannelId,
    #[serde(default, deserialize_with = "crate::serial::ignore_errors")]
    pub last_message_id: Option<MessageId>,
    #[serde(default)]
    pub mention_count: u64,
}

/// The versioned `user_guild_settings` collection on READY.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserGuildSettingsEntries {
    #[serde(default)]
    pub entries: Vec<UserGuildSettings>,
}

/// Per-guild (or per-DM when `guild_id` is null) notification settings.
#[derive(Debug, Clone, Deserialize)]
pub struct UserGuildSettings {
    #[serde(default)]
    pub guild_id: Option<GuildId>,
    #[serde(default)]
    pub muted: bool,
    #[serde(default)]
    pub suppress_everyone: bool,
    #[serde(default)]
    pub suppress_roles: bool,
    #[serde(default)]
    pub message_notifications: u8,
    #[serde(default)]
    pub flags: u64,
    #[serde(default)]
    pub channel_overrides: Vec<ChannelOverride>,
}

impl UserGuildSettings {
    /// Bit 14 opts the guild into per-channel visibility; bit 13 shows
    /// everything regardless. Clear 14 or set 13 means all channels shown.
    pub fn opt_in_channels(&self) -> bool {
        self.flags & (1 << 14) == 0 || self.flags & (1 << 13) != 0
    }
}

/// Per-channel override inside user guild settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelOverride {
    pub channel_id: ChannelId,
    #[serde(default)]
    pub muted: bool,
    #[serde(default)]
    pub message_notifications: u8,
    #[serde(default)]
    pub collapsed: bool,
    #[serde(default)]
    pub flags: u64,
}

impl ChannelOverride {
    /// Bit 12 marks a channel the user manually un-hid.
    pub fn manually_shown(&self) -> bool {
        self.flags & (1 << 12) != 0
    }
}

/// Partial message fields delivered by MESSAGE_UPDATE.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageUpdate {
    pub id: MessageId,
    pub channel_id: ChannelId,
    #[serde(default)]
    pub guild_id: Option<GuildId>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub edited_timestamp: Option<DateTime<FixedOffset>>,
    #[serde(default)]
    pub mention_everyone: Option<bool>,
    #[serde(default)]
    pub mentions: Option<Vec<User>>,
    #[serde(default)]
    pub mention_roles: Option<Vec<RoleId>>,
    #[serde(default)]
    pub embeds: Option<Vec<Value>>,
    #[serde(default)]
    pub pinned: Option<bool>,
}

/// A reaction added to or removed from a message.
#[derive(Debug, Clone, Deserialize)]
pub struct ReactionEvent {
    pub channel_id: ChannelId,
    pub message_id: MessageId,
    pub user_id: UserId,
    #[serde(default)]
    pub guild_id: Option<GuildId>,
    pub emoji: ReactionEmoji,
}

/// A poll vote added or removed.
#[derive(Debug, Clone, Deserialize)]
pub struct PollVoteEvent {
    pub channel_id: ChannelId,
    pub message_id: MessageId,
    pub user_id: UserId,
    pub answer_id: u64,
}

/// Topic summaries generated for a channel.
#[derive(Debug, Clone, Deserialize)]
pub struct SummaryUpdate {
    pub channel_id: ChannelId,
    #[serde(default)]
    pub guild_id: Option<GuildId>,
    #[serde(default)]
    pub summaries: Vec<Summary>,
}

/// One topic digest inside a summary update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    #[serde(default)]
    pub topic: String,
    #[serde(default, rename = "summ_short")]
    pub description: Option<String>,
    #[serde(default)]
    pub message_ids: Vec<MessageId>,
}

/// A member-chunk response to a `RequestMembers` command.
#[derive(Debug, Clone, Deserialize)]
pub struct MembersChunk {
    pub guild_id: GuildId,
    #[serde(default)]
    pub members: Vec<Member>,
    #[serde(default)]
    pub presences: Vec<Presence>,
    #[serde(default)]
    pub nonce: Option<String>,
}

/// A batch of member-list operations for a guild's activity slice.
#[derive(Debug, Clone, Deserialize)]
pub struct MemberListUpdate {
    pub guild_id: GuildId,
    #[serde(default)]
    pub ops: Vec<MemberListOp>,
    #[serde(default)]
    pub online_count: u64,
    #[serde(default)]
    pub member_count: u64,
}

/// A presence update scoped to one guild (or to a DM when absent).
#[derive(Debug, Clone, Deserialize)]
pub struct PresenceUpdateEvent {
    #[serde(flatten)]
    pub presence: Presence,
    #[serde(default)]
    pub guild_id: Option<GuildId>,
    #[serde(default)]
    pub roles: Option<Vec<RoleId>>,
}

/// The settings-protobuf mirror changed; payload is base64.
#[derive(Debug, Clone, Deserialize)]
pub struct SettingsProtoUpdate {
    #[serde(default)]
    pub settings: ProtoSettings,
    #[serde(default)]
    pub partial: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProtoSettings {
    #[serde(default)]
    pub proto: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: u64,
}

/// A member's voice state changed.
#[derive(Debug, Clone, Deserialize)]
pub struct VoiceStateEvent {
    pub user_id: UserId,
    #[serde(default)]
    pub guild_id: Option<GuildId>,
    #[serde(default)]
    pub channel_id: Option<ChannelId>,
    pub session_id: String,
    #[serde(default)]
    pub self_mute: bool,
    #[serde(default)]
    pub self_deaf: bool,
    #[serde(default)]
    pub self_video: bool,
}

/// Voice server assignment for a pending voice connection.
#[derive(Debug, Clone, Deserialize)]
pub struct VoiceServerUpdate {
    pub token: String,
    #[serde(default)]
    pub guild_id: Option<GuildId>,
    #[serde(default)]
    pub channel_id: Option<ChannelId>,
    #[serde(default)]
    pub endpoint: Option<String>,
}

/// A group or DM call was created or changed.
#[derive(Debug, Clone, Deserialize)]
pub struct CallEvent {
    pub channel_id: ChannelId,
    #[serde(default)]
    pub message_id: Option<MessageId>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub ringing: Vec<UserId>,
    #[serde(default)]
    pub voice_states: Vec<VoiceStateEvent>,
}

/// Autocomplete choices surfaced for an option being typed.
#[derive(Debug, Clone, Deserialize)]
pub struct AutocompleteResponse {
    #[serde(default)]
    pub nonce: Option<String>,
    #[serde(default)]
    pub choices: Vec<super::CommandChoice>,
}

// Voice gateway

/// A JSON payload received over the voice gateway.
#[derive(Debug, Clone)]
pub enum VoiceEvent {
    Hello {
        // 8
        heartbeat_interval: u64,
    },
    Ready {
        // 2
        ssrc: u32,
        ip: String,
        port: u16,
        modes: Vec<String>,
    },
    SessionDescription {
        // 4
        mode: String,
        secret_key: Vec<u8>,
        audio_codec: Option<String>,
        video_codec: Option<String>,
        media_session_id: Option<String>,
    },
    SessionUpdate {
        // 14
        media_session_id: Option<String>,
    },
    Speaking {
        // 5
        user_id: UserId,
        speaking: bool,
    },
    ClientConnect {
        // 11
        user_ids: Vec<UserId>,
    },
    ClientDisconnect {
        // 13
        user_id: UserId,
    },
    HeartbeatRequest, // 3
    HeartbeatAck,     // 6
    Unknown(u64, Value),
}

impl VoiceEvent {
    /// Decode one voice gateway message, also yielding its `seq` when present.
    pub fn decode(value: Value) -> crate::Result<(VoiceEvent, Option<u64>)> {
        let op = value
            .get("op")
            .and_then(Value::as_u64)
            .ok_or(crate::Error::Protocol("voice message without opcode"))?;
        let seq = value.get("seq").and_then(Value::as_u64);
        let d = value.get("d").cloned().unwrap_or(Value::Null);

        let event = match op {
            3 => VoiceEvent::HeartbeatRequest,
            6 => VoiceEvent::HeartbeatAck,
            8 => VoiceEvent::Hello {
                heartbeat_interval: d
                    .get("heartbeat_interval")
                    .and_then(Value::as_u64)
                    .ok_or(crate::Error::Protocol("voice hello without interval"))?,
            },
            2 => {
                #[derive(Deserialize)]
                struct Ready {
                    ssrc: u32,
                    ip: String,
                    port: u16,
                    #[serde(default)]
                    modes: Vec<String>,
                }
                let ready: Ready = serde_json::from_value(d)?;
                VoiceEvent::Ready {
                    ssrc: ready.ssrc,
                    ip: ready.ip,
                    port: ready.port,
                    modes: ready.modes,
                }
            }
            4 => {
                #[derive(Deserialize)]
                struct Description {
                    mode: String,
                    secret_key: Vec<u8>,
                    #[serde(default)]
                    audio_codec: Option<String>,
                    #[serde(default)]
                    video_codec: Option<String>,
                    #[serde(default)]
                    media_session_id: Option<String>,
                }
                let desc: Description = serde_json::from_value(d)?;
                VoiceEvent::SessionDescription {
                    mode: desc.mode,
                    secret_key: desc.secret_key,
                    audio_codec: desc.audio_codec,
                    video_codec: desc.video_codec,
                    media_session_id: desc.media_session_id,
                }
            }
            14 => VoiceEvent::SessionUpdate {
                media_session_id: d
                    .get("media_session_id")
                    .and_then(Value::as_str)
                    .map(str::to_owned),
            },
            5 => {
                #[derive(Deserialize)]
                struct Speaking {
                    user_id: UserId,
                    #[serde(default)]
                    speaking: u64,
                }
                let speaking: Speaking = serde_json::from_value(d)?;
                VoiceEvent::Speaking {
                    user_id: speaking.user_id,
                    speaking: speaking.speaking != 0,
                }
            }
            11 => {
                #[derive(Deserialize)]
                struct Connect {
                    #[serde(default)]
                    user_ids: Vec<UserId>,
                }
                let connect: Connect = serde_json::from_value(d)?;
                VoiceEvent::ClientConnect {
                    user_ids: connect.user_ids,
                }
            }
            13 => {
                #[derive(Deserialize)]
                struct Disconnect {
                    user_id: UserId,
                }
                let disconnect: Disconnect = serde_json::from_value(d)?;
                VoiceEvent::ClientDisconnect {
                    user_id: disconnect.user_id,
                }
            }
            other => VoiceEvent::Unknown(other, d),
        };
        Ok((event, seq))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_decodes_message_create() {
        let raw = serde_json::json!({
            "op": 0,
            "s": 12,
            "t": "MESSAGE_CREATE",
            "d": {
                "id": "500",
                "channel_id": "10",
                "content": "hi",
                "timestamp": "2024-05-04T12:30:00+00:00",
                "author": {"id": "7", "username": "ada"},
            }
        });
        match serde_json::from_value::<GatewayMessage>(raw).unwrap() {
            GatewayMessage::Dispatch { dispatch, .. } => {
                assert_eq!(dispatch.sequence, 12);
                match dispatch.event {
                    Event::MessageCreate(message) => assert_eq!(message.id, MessageId(500)),
                    other => panic!("wrong event: {:?}", other),
                }
            }
            other => panic!("wrong message: {:?}", other),
        }
    }

    #[test]
    fn hello_and_ack_decode() {
        let hello: GatewayMessage =
            serde_json::from_value(serde_json::json!({"op": 10, "d": {"heartbeat_interval": 41250}}))
                .unwrap();
        assert!(matches!(
            hello,
            GatewayMessage::Hello { payload: HelloPayload { heartbeat_interval: 41250 }, .. }
        ));

        let ack: GatewayMessage =
            serde_json::from_value(serde_json::json!({"op": 11, "d": null})).unwrap();
        assert!(matches!(ack, GatewayMessage::HeartbeatAck { .. }));
    }

    #[test]
    fn unknown_dispatch_is_tolerated() {
        let raw = serde_json::json!({
            "op": 0,
            "s": 3,
            "t": "SOME_FUTURE_EVENT",
            "d": {"whatever": true},
        });
        match serde_json::from_value::<GatewayMessage>(raw).unwrap() {
            GatewayMessage::Dispatch { dispatch, .. } => {
                assert!(matches!(dispatch.event, Event::Unknown));
            }
            other => panic!("wrong message: {:?}", other),
        }
    }

    #[test]
    fn identify_serializes_with_opcode() {
        let identify = GatewayCommand::Identify {
            op: Opcode,
            payload: IdentifyPayload {
                token: "tok".into(),
                capabilities: 16381,
                properties: IdentifyProperties {
                    os: "linux".into(),
                    browser: "backchat".into(),
                    device: "backchat".into(),
                },
                compress: false,
            },
        };
        let value = serde_json::to_value(&identify).unwrap();
        assert_eq!(value["op"], 2);
        assert_eq!(value["d"]["token"], "tok");
    }

    #[test]
    fn voice_ready_decodes() {
        let raw = serde_json::json!({
            "op": 2,
            "d": {
                "ssrc": 55,
                "ip": "198.51.100.9",
                "port": 4011,
                "modes": ["aead_xchacha20_poly1305_rtpsize"],
            }
        });
        let (event, seq) = VoiceEvent::decode(raw).unwrap();
        assert!(seq.is_none());
        match event {
            VoiceEvent::Ready { ssrc, ip, port, modes } => {
                assert_eq!((ssrc, port), (55, 4011));
                assert_eq!(ip, "198.51.100.9");
                assert_eq!(modes.len(), 1);
            }
            other => panic!("wrong event: {:?}", other),
        }
    }

    #[test]
    fn opt_in_channel_flags() {
        let mut settings = UserGuildSettings {
            guild_id: None,
            muted: false,
            suppress_everyone: false,
            suppress_roles: false,
            message_notifications: 0,
            flags: 0,
            channel_overrides: vec![],
        };
        assert!(settings.opt_in_channels());
        settings.flags = 1 << 14;
        assert!(!settings.opt_in_channels());
        settings.flags = (1 << 14) | (1 << 13);
        assert!(settings.opt_in_channels());
    }
}
