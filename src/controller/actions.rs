//! The seams between the engine and its external collaborators: abstract
//! user actions in, view updates and notifications out.

use crate::model::{ChannelId, GuildId, MessageId, ReactionEmoji, UserId};
use crate::parser::ClientCommand;

/// An abstract user intent, produced by the input decoder.
#[derive(Debug, Clone)]
pub enum Action {
    /// Open a channel, DM or thread.
    SwitchChannel {
        guild_id: Option<GuildId>,
        channel_id: ChannelId,
    },
    /// The chat selection moved; index counts from the newest message.
    SelectMessage { index: usize },
    /// Jump to a specific message, fetching around it when absent.
    GoToMessage { message_id: MessageId },
    /// The user reached the bottom of the chat view.
    ReachedBottom,

    SendMessage {
        content: String,
        reply_to: Option<MessageId>,
        reply_ping: bool,
    },
    EditMessage {
        message_id: MessageId,
        content: String,
    },
    DeleteMessage { message_id: MessageId },
    React {
        message_id: MessageId,
        emoji: ReactionEmoji,
        remove: bool,
    },
    Vote {
        message_id: MessageId,
        answer_ids: Vec<u64>,
        clear: bool,
    },

    /// The composer gained or lost pending input (typing indicator).
    Composing(bool),

    /// Queue a file for the next send.
    AttachFile { path: String },
    CancelAttachments,

    MarkAsRead { channel_id: ChannelId },
    MarkAsUnread { message_id: MessageId },

    /// Toggle thread membership.
    ToggleThread { thread_id: ChannelId },

    StartCall { channel_id: ChannelId },
    AcceptCall { channel_id: ChannelId },
    LeaveCall,
    ToggleCallMute,

    /// Assist request from the editor's prefix capture.
    Assist {
        kind: AssistKind,
        query: String,
        /// Full editor line, needed for app-command context.
        line: String,
    },
    /// A built-in client command was submitted.
    Command(ClientCommand),

    /// Terminal resized.
    Resize { width: u16, height: u16 },

    Quit,
}

/// What the assist list should complete, derived from the captured prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AssistKind {
    Channels = 1,
    Usernames = 2,
    Emojis = 3,
    Stickers = 4,
    ClientCommands = 5,
    AppCommands = 6,
    Paths = 7,
}

/// A view refresh pushed to the renderer. The renderer reads state through
/// the store's accessors; these events only say what went stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewEvent {
    /// Guild/channel tree changed (unreads, mutes, ordering).
    Tree,
    /// The active channel's chat content changed.
    Chat,
    /// Move the chat selection to this index (after a switch or go-to).
    SelectIndex(usize),
    /// Status line bindings (e.g. `%slowmode`) need re-evaluation.
    StatusLine,
    /// A transient message for the extra line, with an optional timeout.
    ExtraLine {
        text: String,
        timeout_secs: Option<u64>,
    },
    /// Assist results to display, already ranked.
    AssistResults(Vec<AssistEntry>),
    /// Call popup state: ringing or in-call.
    CallPopup(bool),
    /// The engine is shutting down.
    Shutdown,
}

/// One ranked assist row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssistEntry {
    pub label: String,
    /// The text to insert when the row is accepted.
    pub insert: String,
    pub score: u64,
}

/// Desktop notification sink, implemented by the platform shim.
pub trait Notifier: Send {
    /// Show a notification; the handle allows later retraction.
    fn notify(&mut self, channel_id: ChannelId, title: &str, body: &str) -> u64;
    /// Retract an outstanding notification (ghost ping, channel read).
    fn retract(&mut self, handle: u64);
}

/// Decoder for the settings-protobuf mirror, implemented externally.
pub trait SettingsDecoder: Send {
    /// Decode the raw settings blob into a JSON-like map.
    fn decode(&self, raw: &[u8]) -> Option<serde_json::Value>;
}

/// A notifier that drops everything, for headless runs and tests.
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&mut self, _channel_id: ChannelId, _title: &str, _body: &str) -> u64 {
        0
    }
    fn retract(&mut self, _handle: u64) {}
}

/// A settings decoder that ignores the blob.
pub struct NullSettingsDecoder;

impl SettingsDecoder for NullSettingsDecoder {
    fn decode(&self, _raw: &[u8]) -> Option<serde_json::Value> {
        None
    }
}

/// Who is typing in the active channel, with the observation time.
#[derive(Debug, Clone)]
pub struct TypingUser {
    pub user_id: UserId,
    pub seen_at: std::time::Instant,
}
