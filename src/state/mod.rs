//! The authoritative local mirror of the user's view of the service.
//!
//! The controller is the sole mutator: gateway and REST products are
//! funneled through its tick, which calls the `apply_*` handlers here.
//! Everything else reads through the accessor methods.

use std::collections::HashMap;

use serde_json::Value;
use tracing::{debug, warn};

use crate::model::{
    AppCommand, CallEvent, Channel, ChannelId, ChannelType, CurrentUser, DmChannel, Emoji, Event,
    Guild, GuildId, GuildPayload, MemberListOp, MessageId, Message, MessageUpdate, OnlineStatus,
    Presence, ReactionEvent, ReadyEvent, Relationship, Role, RoleId, Summary, Thread, UserGuildSettings,
    UserId, sort_dms, sort_roles,
};
use crate::perms::AppPermissionIndex;

mod caches;
pub use caches::{ChannelCache, DeletedCache, MemberRoleCache, MemberRoles, MEMBER_ROLE_CAP};

mod messages;
pub use messages::MessageBuffer;

mod read_state;
pub use read_state::{ReadState, ReadStateMap};

/// Cap on the per-guild member-list activity slice.
pub const MEMBER_LIST_CAP: usize = 100;

/// Where a MESSAGE_CREATE landed, deciding re-render and notification work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageArrival {
    /// Appended to the active channel's buffer.
    Active,
    /// The channel is cached or background only.
    Background,
}

/// The open channel and its loaded message window.
#[derive(Debug, Default)]
pub struct ActiveChannel {
    pub channel_id: Option<ChannelId>,
    pub guild_id: Option<GuildId>,
    pub buffer: MessageBuffer,
}

/// One row of the bounded member-list activity slice.
#[derive(Debug, Clone)]
pub struct MemberListRow {
    pub user_id: Option<UserId>,
    pub name: String,
    pub status: Option<OnlineStatus>,
}

/// The state store. See the module docs for the ownership rules.
pub struct Store {
    pub me: Option<CurrentUser>,
    pub guilds: Vec<Guild>,
    pub dms: Vec<DmChannel>,
    pub relationships: Vec<Relationship>,
    pub read_state: ReadStateMap,
    pub active: ActiveChannel,

    pub member_roles: MemberRoleCache,
    pub tabs: ChannelCache,
    pub deleted: DeletedCache,
    pub presences: HashMap<UserId, Presence>,
    pub member_list: HashMap<GuildId, Vec<MemberListRow>>,
    pub summaries: HashMap<ChannelId, Vec<Summary>>,

    /// Latest decoded settings-protobuf mirror.
    pub settings_proto: Option<Value>,
    proto_changed: bool,

    pub my_commands: Vec<AppCommand>,
    pub guild_commands: Vec<AppCommand>,
    pub command_permissions: HashMap<GuildId, AppPermissionIndex>,

    /// Participants of the ongoing DM/group call, if any.
    pub call: Option<CallEvent>,

    keep_deleted: bool,
    chat_buffer_cap: usize,
}

impl Store {
    pub fn new(keep_deleted: bool, chat_buffer_cap: usize, tab_limit: usize) -> Store {
        Store {
            me: None,
            guilds: Vec::new(),
            dms: Vec::new(),
            relationships: Vec::new(),
            read_state: ReadStateMap::default(),
            active: ActiveChannel::default(),
            member_roles: MemberRoleCache::default(),
            tabs: ChannelCache::new(tab_limit),
            deleted: DeletedCache::new(50),
            presences: HashMap::new(),
            member_list: HashMap::new(),
            summaries: HashMap::new(),
            settings_proto: None,
            proto_changed: false,
            my_commands: Vec::new(),
            guild_commands: Vec::new(),
            command_permissions: HashMap::new(),
            call: None,
            keep_deleted,
            chat_buffer_cap,
        }
    }

    pub fn my_id(&self) -> Option<UserId> {
        self.me.as_ref().map(|u| u.id)
    }

    pub fn premium(&self) -> bool {
        self.me.as_ref().map(|u| u.premium()).unwrap_or(false)
    }

    // Lookups

    pub fn guild(&self, guild_id: GuildId) -> Option<&Guild> {
        self.guilds.iter().find(|g| g.id == guild_id)
    }

    pub fn guild_mut(&mut self, guild_id: GuildId) -> Option<&mut Guild> {
        self.guilds.iter_mut().find(|g| g.id == guild_id)
    }

    pub fn dm(&self, channel_id: ChannelId) -> Option<&DmChannel> {
        self.dms.iter().find(|d| d.id == channel_id)
    }

    pub fn is_dm(&self, channel_id: ChannelId) -> bool {
        self.dm(channel_id).is_some()
    }

    /// Find a guild channel anywhere in the tree.
    pub fn find_channel(&self, channel_id: ChannelId) -> Option<(&Guild, &Channel)> {
        self.guilds.iter().find_map(|g| {
            g.channels
                .iter()
                .find(|c| c.id == channel_id)
                .map(|c| (g, c))
        })
    }

    pub fn find_thread(&self, thread_id: ChannelId) -> Option<(&Guild, &Thread)> {
        self.guilds.iter().find_map(|g| {
            g.threads
                .iter()
                .find(|t| t.id == thread_id)
                .map(|t| (g, t))
        })
    }

    /// Whether a channel (or its guild, category or DM entry) is muted or
    /// locally hidden, suppressing its notifications.
    pub fn effectively_muted(&self, channel_id: ChannelId) -> bool {
        if let Some(dm) = self.dm(channel_id) {
            return dm.muted;
        }
        if let Some((guild, channel)) = self.find_channel(channel_id) {
            if guild.muted || channel.muted || channel.hidden {
                return true;
            }
            if let Some(parent_id) = channel.parent_id {
                if let Some(parent) = guild.channel(parent_id) {
                    return parent.muted;
                }
            }
            return false;
        }
        if let Some((guild, thread)) = self.find_thread(channel_id) {
            return guild.muted || thread.muted;
        }
        false
    }

    /// The roles the logged-in user holds in a guild, from the role cache.
    pub fn my_roles(&self, guild_id: GuildId) -> Vec<RoleId> {
        self.my_id()
            .and_then(|id| self.member_roles.get(guild_id, id))
            .map(|entry| entry.roles.clone())
            .unwrap_or_default()
    }

    // READY ingestion

    /// Rebuild the mirror from a READY event. Returns the raw base64
    /// settings blob for the settings decoder seam, if present.
    pub fn ingest_ready(&mut self, ready: ReadyEvent) -> Option<String> {
        self.me = Some(ready.user);
        let my_id = self.my_id().unwrap_or_default();
        self.relationships = ready.relationships;

        self.guilds.clear();
        // (channel, newest message) pairs collected for read-state seeding
        let mut last_messages: Vec<(ChannelId, Option<MessageId>)> = Vec::new();
        for payload in ready.guilds {
            if payload.unavailable {
                debug!(guild = %payload.id, "guild unavailable on ready");
                continue;
            }
            let guild = Guild::from_payload(payload, my_id, false);
            for channel in &guild.channels {
                if channel.kind != ChannelType::Forum {
                    last_messages.push((channel.id, channel.last_message_id));
                }
            }
            for thread in &guild.threads {
                last_messages.push((thread.id, thread.last_message_id));
            }
            self.guilds.push(guild);
        }

        // DM channels: resolve recipient ids against the user directory
        self.dms = ready.private_channels;
        let directory = ready.users;
        for dm in &mut self.dms {
            if dm.recipients.is_empty() && !dm.recipient_ids.is_empty() {
                dm.recipients = dm
                    .recipient_ids
                    .iter()
                    .filter_map(|id| directory.iter().find(|u| u.id == *id).cloned())
                    .collect();
            }
            last_messages.push((dm.id, dm.last_message_id));
        }
        sort_dms(&mut self.dms);

        // read state: join the acked boundary against the newest message
        for entry in ready.read_state.entries {
            let Some((_, last_message_id)) = last_messages
                .iter()
                .find(|(channel_id, _)| *channel_id == entry.id)
            else {
                continue;
            };
            self.read_state.seed(
                entry.id,
                *last_message_id,
                entry.last_message_id,
                entry.mention_count > 0,
            );
        }

        for settings in ready.user_guild_settings.entries {
            self.apply_user_guild_settings(&settings);
        }

        ready.user_settings_proto
    }

    // Guild lifecycle

    pub fn apply_guild_create(&mut self, payload: GuildPayload) {
        let my_id = self.my_id().unwrap_or_default();
        if payload.unavailable {
            return;
        }
        let guild = Guild::from_payload(payload, my_id, false);
        match self.guilds.iter_mut().find(|g| g.id == guild.id) {
            Some(existing) => *existing = guild,
            None => self.guilds.push(guild),
        }
    }

    pub fn apply_guild_update(&mut self, payload: GuildPayload) {
        let my_id = self.my_id().unwrap_or_default();
        let Some(guild) = self.guild_mut(payload.id) else {
            return self.apply_guild_create(payload);
        };
        // keep client-side fields, refresh the rest
        let muted = guild.muted;
        let suppress_everyone = guild.suppress_everyone;
        let suppress_roles = guild.suppress_roles;
        let notifications = guild.notifications;
        let opt_in = guild.opt_in_channels;
        let mut rebuilt = Guild::from_payload(payload, my_id, false);
        rebuilt.muted = muted;
        rebuilt.suppress_everyone = suppress_everyone;
        rebuilt.suppress_roles = suppress_roles;
        rebuilt.notifications = notifications;
        rebuilt.opt_in_channels = opt_in;
        *guild = rebuilt;
    }

    pub fn apply_guild_delete(&mut self, guild_id: GuildId) {
        self.guilds.retain(|g| g.id != guild_id);
        self.member_list.remove(&guild_id);
        self.command_permissions.remove(&guild_id);
        if self.active.guild_id == Some(guild_id) {
            self.active = ActiveChannel::default();
        }
    }

    // Channel lifecycle

    pub fn apply_channel_create(&mut self, mut channel: Channel) {
        let Some(guild_id) = channel.guild_id else {
            warn!(channel = %channel.id, "channel event without guild");
            return;
        };
        let Some(guild) = self.guild_mut(guild_id) else {
            return;
        };
        channel.hidden = channel.kind.default_hidden() && guild.community && !guild.opt_in_channels;
        channel.perms = None;
        match guild.channels.iter_mut().find(|c| c.id == channel.id) {
            Some(existing) => *existing = channel,
            None => guild.channels.push(channel),
        }
        guild.channels.sort_by_key(|c| c.position);
        Self::invalidate_perms(guild);
    }

    pub fn apply_channel_update(&mut self, mut channel: Channel) {
        let Some(guild_id) = channel
            .guild_id
            .or_else(|| self.find_channel(channel.id).map(|(g, _)| g.id))
        else {
            return;
        };
        channel.guild_id = Some(guild_id);
        let Some(guild) = self.guild_mut(guild_id) else {
            return;
        };
        if let Some(existing) = guild.channels.iter_mut().find(|c| c.id == channel.id) {
            // preserve user settings, refresh the wire fields
            channel.hidden = existing.hidden;
            channel.muted = existing.muted;
            channel.collapsed = existing.collapsed;
            channel.notifications = existing.notifications;
            *existing = channel;
            guild.channels.sort_by_key(|c| c.position);
            Self::invalidate_perms(guild);
        }
    }

    pub fn apply_channel_delete(&mut self, channel_id: ChannelId, guild_id: Option<GuildId>) {
        let guild_id = guild_id.or_else(|| self.find_channel(channel_id).map(|(g, _)| g.id));
        if let Some(guild) = guild_id.and_then(|id| self.guild_mut(id)) {
            guild.channels.retain(|c| c.id != channel_id);
        }
        self.dms.retain(|d| d.id != channel_id);
        if self.active.channel_id == Some(channel_id) {
            self.active = ActiveChannel::default();
        }
    }

    // Roles

    pub fn apply_role_upsert(&mut self, guild_id: GuildId, role: Role) {
        let Some(guild) = self.guild_mut(guild_id) else {
            return;
        };
        if role.id == guild_id.everyone_role() {
            guild.base_permissions = role.permissions;
        }
        match guild.roles.iter_mut().find(|r| r.id == role.id) {
            Some(existing) => *existing = role,
            None => guild.roles.push(role),
        }
        sort_roles(&mut guild.roles);
        Self::invalidate_perms(guild);
    }

    pub fn apply_role_delete(&mut self, guild_id: GuildId, role_id: RoleId) {
        let Some(guild) = self.guild_mut(guild_id) else {
            return;
        };
        guild.roles.retain(|r| r.id != role_id);
        Self::invalidate_perms(guild);
    }

    pub fn apply_emojis_update(&mut self, guild_id: GuildId, emojis: Vec<Emoji>) {
        if let Some(guild) = self.guild_mut(guild_id) {
            guild.emojis = emojis.into_iter().filter(|e| e.available).collect();
        }
    }

    /// Computed permissions are only valid until the next role or
    /// overwrite change; drop them so the controller recomputes.
    fn invalidate_perms(guild: &mut Guild) {
        for channel in &mut guild.channels {
            channel.perms = None;
        }
    }

    // User guild settings

    /// Recompute mute/hidden/notification state for a guild (or, when
    /// `guild_id` is null, for DM channels) and resort.
    pub fn apply_user_guild_settings(&mut self, settings: &UserGuildSettings) {
        match settings.guild_id {
            Some(guild_id) => {
                let Some(guild) = self.guild_mut(guild_id) else {
                    return;
                };
                guild.muted = settings.muted;
                guild.suppress_everyone = settings.suppress_everyone;
                guild.suppress_roles = settings.suppress_roles;
                guild.notifications = settings.message_notifications.into();
                guild.opt_in_channels = settings.opt_in_channels();

                let community = guild.community;
                let opt_in = guild.opt_in_channels;
                for channel in &mut guild.channels {
                    channel.hidden = channel.kind.default_hidden() && community && !opt_in;
                }
                for override_ in &settings.channel_overrides {
                    if let Some(channel) = guild
                        .channels
                        .iter_mut()
                        .find(|c| c.id == override_.channel_id)
                    {
                        channel.muted = override_.muted;
                        channel.collapsed = override_.collapsed;
                        channel.notifications = override_.message_notifications.into();
                        if channel.kind.default_hidden() {
                            channel.hidden = !override_.manually_shown()
                                && community
                                && !opt_in;
                        } else {
                            channel.hidden = false;
                        }
                    }
                    if let Some(thread) = guild
                        .threads
                        .iter_mut()
                        .find(|t| t.id == override_.channel_id)
                    {
                        thread.muted = override_.muted;
                        thread.notifications = override_.message_notifications.into();
                    }
                }
                // category visibility propagates to children without an
                // explicit override
                let categories: Vec<(ChannelId, bool)> = guild
                    .channels
                    .iter()
                    .filter(|c| c.kind == ChannelType::Category)
                    .map(|c| (c.id, c.hidden))
                    .collect();
                for channel in &mut guild.channels {
                    if let Some(parent_id) = channel.parent_id {
                        let overridden = settings
                            .channel_overrides
                            .iter()
                            .any(|o| o.channel_id == channel.id);
                        if !overridden {
                            if let Some((_, parent_hidden)) =
                                categories.iter().find(|(id, _)| *id == parent_id)
                            {
                                channel.hidden = channel.hidden || *parent_hidden;
                            }
                        }
                    }
                }
            }
            None => {
                for override_ in &settings.channel_overrides {
                    if let Some(dm) = self
                        .dms
                        .iter_mut()
                        .find(|d| d.id == override_.channel_id)
                    {
                        dm.muted = override_.muted;
                        dm.notifications = override_.message_notifications.into();
                    }
                }
            }
        }
    }

    // Threads

    /// Replace or upsert threads for a guild, keeping the id-desc order.
    pub fn apply_thread_upsert(&mut self, guild_id: GuildId, thread: Thread) {
        let Some(guild) = self.guild_mut(guild_id) else {
            return;
        };
        match guild.threads.iter_mut().find(|t| t.id == thread.id) {
            Some(existing) => *existing = thread,
            None => guild.threads.push(thread),
        }
        guild.threads.sort_by(|a, b| b.id.cmp(&a.id));
    }

    pub fn apply_thread_delete(&mut self, thread_id: ChannelId, guild_id: Option<GuildId>) {
        let guild_id = guild_id.or_else(|| self.find_thread(thread_id).map(|(g, _)| g.id));
        if let Some(guild) = guild_id.and_then(|id| self.guild_mut(id)) {
            guild.threads.retain(|t| t.id != thread_id);
        }
        if self.active.channel_id == Some(thread_id) {
            self.active = ActiveChannel::default();
        }
    }

    pub fn set_thread_joined(&mut self, thread_id: ChannelId, joined: bool) {
        for guild in &mut self.guilds {
            if let Some(thread) = guild.threads.iter_mut().find(|t| t.id == thread_id) {
                thread.joined = joined;
            }
        }
    }

    // Messages

    /// Apply a MESSAGE_CREATE. Read-state always advances; the active
    /// buffer is prepended only when its window is at the channel's newest
    /// message, and any cached tab is kept in sync.
    pub fn apply_message_create(&mut self, message: Message) -> MessageArrival {
        let channel_id = message.channel_id;
        let was_newest = self
            .read_state
            .get(channel_id)
            .and_then(|s| s.last_message_id);
        self.read_state.advance_last(channel_id, message.id);

        // keep per-channel newest pointers fresh for the tree
        if let Some(dm) = self.dms.iter_mut().find(|d| d.id == channel_id) {
            dm.last_message_id = Some(message.id);
            sort_dms(&mut self.dms);
        } else if let Some(guild_id) = message.guild_id {
            if let Some(guild) = self.guild_mut(guild_id) {
                if let Some(channel) = guild.channel_mut(channel_id) {
                    channel.last_message_id = Some(message.id);
                } else if let Some(thread) = guild.threads.iter_mut().find(|t| t.id == channel_id)
                {
                    thread.last_message_id = Some(message.id);
                    thread.message_count += 1;
                }
            }
        }

        if self.active.channel_id == Some(channel_id) {
            let at_bottom = self.active.buffer.newest_id().is_none()
                || self.active.buffer.newest_id() == was_newest;
            if at_bottom {
                self.active
                    .buffer
                    .prepend_new(message.clone(), self.chat_buffer_cap);
            }
            self.tabs.with_messages(channel_id, |messages| {
                if messages.iter().all(|m| m.id != message.id) {
                    messages.insert(0, message.clone());
                }
            });
            return MessageArrival::Active;
        }

        let cap = self.chat_buffer_cap;
        self.tabs.with_messages(channel_id, |messages| {
            if messages.iter().all(|m| m.id != message.id) {
                messages.insert(0, message);
                if messages.len() > cap {
                    messages.truncate(cap);
                }
            }
        });
        MessageArrival::Background
    }

    pub fn apply_message_update(&mut self, update: &MessageUpdate) {
        if self.active.channel_id == Some(update.channel_id) {
            self.active.buffer.apply_update(update);
        }
        self.tabs.with_messages(update.channel_id, |messages| {
            let mut buffer = MessageBuffer::from_page(std::mem::take(messages));
            buffer.apply_update(update);
            *messages = buffer.into_messages();
        });
    }

    /// Apply a MESSAGE_DELETE. Returns true when the deleted message was an
    /// outstanding mention (a ghost ping whose notification must go).
    pub fn apply_message_delete(&mut self, channel_id: ChannelId, id: MessageId) -> bool {
        let keep = self.keep_deleted;
        if self.active.channel_id == Some(channel_id) {
            if let Some(removed) = self.active.buffer.apply_delete(id, keep) {
                if keep {
                    self.deleted.push(channel_id, removed);
                }
            }
        }
        self.tabs.with_messages(channel_id, |messages| {
            let mut buffer = MessageBuffer::from_page(std::mem::take(messages));
            buffer.apply_delete(id, keep);
            *messages = buffer.into_messages();
        });

        // roll back the newest pointer when the newest message went away
        if let Some(state) = self.read_state.get(channel_id) {
            if state.last_message_id == Some(id) {
                let new_last = if self.active.channel_id == Some(channel_id) {
                    self.active
                        .buffer
                        .messages()
                        .iter()
                        .find(|m| !m.deleted && m.id != id)
                        .map(|m| m.id)
                } else {
                    None
                };
                self.read_state.retreat_last(channel_id, new_last);
            }
        }

        self.read_state.remove_mention(channel_id, id)
    }

    pub fn apply_reaction(&mut self, event: &ReactionEvent, add: bool) {
        let me = Some(event.user_id) == self.my_id();
        if self.active.channel_id == Some(event.channel_id) {
            self.active
                .buffer
                .apply_reaction(event.message_id, &event.emoji, add, me);
        }
        self.tabs.with_messages(event.channel_id, |messages| {
            let mut buffer = MessageBuffer::from_page(std::mem::take(messages));
            buffer.apply_reaction(event.message_id, &event.emoji, add, me);
            *messages = buffer.into_messages();
        });
    }

    pub fn apply_poll_vote(
        &mut self,
        channel_id: ChannelId,
        message_id: MessageId,
        answer_id: u64,
        user_id: UserId,
        add: bool,
    ) {
        let me = Some(user_id) == self.my_id();
        if self.active.channel_id == Some(channel_id) {
            self.active
                .buffer
                .apply_poll_vote(message_id, answer_id, add, me);
        }
        self.tabs.with_messages(channel_id, |messages| {
            let mut buffer = MessageBuffer::from_page(std::mem::take(messages));
            buffer.apply_poll_vote(message_id, answer_id, add, me);
            *messages = buffer.into_messages();
        });
    }

    // Presence, member list, summaries

    pub fn apply_presence(&mut self, presence: Presence) {
        self.presences.insert(presence.user_id, presence);
    }

    /// Apply SYNC/INSERT/UPDATE/DELETE ops to the bounded activity slice.
    pub fn apply_member_list_update(&mut self, guild_id: GuildId, ops: &[MemberListOp]) {
        let rows = self.member_list.entry(guild_id).or_default();
        for op in ops {
            match op.op.as_str() {
                "SYNC" => {
                    let start = op.range.map(|(s, _)| s).unwrap_or(0);
                    if start >= MEMBER_LIST_CAP {
                        continue;
                    }
                    let new_rows: Vec<MemberListRow> =
                        op.items.iter().filter_map(row_from_item).collect();
                    rows.truncate(start);
                    rows.extend(new_rows);
                }
                "INSERT" => {
                    if let (Some(index), Some(item)) = (op.index, op.item.as_ref()) {
                        if let Some(row) = row_from_item(item) {
                            let index = index.min(rows.len());
                            rows.insert(index, row);
                        }
                    }
                }
                "UPDATE" => {
                    if let (Some(index), Some(item)) = (op.index, op.item.as_ref()) {
                        if let (Some(row), Some(new_row)) =
                            (rows.get_mut(index), row_from_item(item))
                        {
                            *row = new_row;
                        }
                    }
                }
                "DELETE" => {
                    if let Some(index) = op.index {
                        if index < rows.len() {
                            rows.remove(index);
                        }
                    }
                }
                other => debug!(op = other, "unknown member list op"),
            }
        }
        rows.truncate(MEMBER_LIST_CAP);
    }

    pub fn apply_summaries(&mut self, channel_id: ChannelId, summaries: Vec<Summary>) {
        let entry = self.summaries.entry(channel_id).or_default();
        for summary in summaries {
            if entry.iter().all(|s| s.topic != summary.topic) {
                entry.push(summary);
            }
        }
    }

    // Settings proto mirror

    pub fn set_settings_proto(&mut self, decoded: Value) {
        self.settings_proto = Some(decoded);
        self.proto_changed = true;
    }

    /// Take the dirty flag; the controller re-derives folder names and
    /// custom status when this returns true.
    pub fn take_settings_changed(&mut self) -> bool {
        std::mem::replace(&mut self.proto_changed, false)
    }

    // Calls

    pub fn apply_call_event(&mut self, event: Option<CallEvent>) {
        self.call = event;
    }
}

fn row_from_item(item: &crate::model::MemberListItem) -> Option<MemberListRow> {
    if let Some(member) = &item.member {
        return Some(MemberListRow {
            user_id: Some(member.user.id),
            name: member.user.display_name().to_owned(),
            status: member.presence.as_ref().map(|p| p.status),
        });
    }
    // group separators stay in the slice so indices line up with the wire
    item.group.as_ref().map(|group| MemberListRow {
        user_id: None,
        name: group
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or("group")
            .to_owned(),
        status: None,
    })
}

/// Route one gateway event into the store. Events the engine handles
/// outside the store (acks, typing, voice) are ignored here.
pub fn apply_event(store: &mut Store, event: Event) -> Option<MessageArrival> {
    match event {
        Event::MessageCreate(message) => Some(store.apply_message_create(*message)),
        Event::MessageUpdate(update) => {
            store.apply_message_update(&update);
            None
        }
        Event::MessageDelete { id, channel_id, .. } => {
            store.apply_message_delete(channel_id, id);
            None
        }
        Event::MessageReactionAdd(event) => {
            store.apply_reaction(&event, true);
            None
        }
        Event::MessageReactionRemove(event) => {
            store.apply_reaction(&event, false);
            None
        }
        Event::MessagePollVoteAdd(event) => {
            store.apply_poll_vote(
                event.channel_id,
                event.message_id,
                event.answer_id,
                event.user_id,
                true,
            );
            None
        }
        Event::MessagePollVoteRemove(event) => {
            store.apply_poll_vote(
                event.channel_id,
                event.message_id,
                event.answer_id,
                event.user_id,
                false,
            );
            None
        }
        Event::GuildCreate(payload) => {
            store.apply_guild_create(*payload);
            None
        }
        Event::GuildUpdate(payload) => {
            store.apply_guild_update(*payload);
            None
        }
        Event::GuildDelete { id, .. } => {
            store.apply_guild_delete(id);
            None
        }
        Event::ChannelCreate(channel) => {
            store.apply_channel_create(*channel);
            None
        }
        Event::ChannelUpdate(channel) => {
            store.apply_channel_update(*channel);
            None
        }
        Event::ChannelDelete(channel) => {
            store.apply_channel_delete(channel.id, channel.guild_id);
            None
        }
        Event::GuildRoleCreate { guild_id, role } | Event::GuildRoleUpdate { guild_id, role } => {
            store.apply_role_upsert(guild_id, role);
            None
        }
        Event::GuildRoleDelete { guild_id, role_id } => {
            store.apply_role_delete(guild_id, role_id);
            None
        }
        Event::GuildEmojisUpdate { guild_id, emojis } => {
            store.apply_emojis_update(guild_id, emojis);
            None
        }
        Event::UserGuildSettingsUpdate(settings) => {
            store.apply_user_guild_settings(&settings);
            None
        }
        Event::ThreadCreate(payload) | Event::ThreadUpdate(payload) => {
            if let Some(thread) = Thread::from_payload(&payload) {
                let guild_id = payload
                    .get("guild_id")
                    .and_then(Value::as_str)
                    .and_then(|s| s.parse().ok())
                    .map(GuildId)
                    .or_else(|| store.find_channel(thread.parent_id).map(|(g, _)| g.id));
                if let Some(guild_id) = guild_id {
                    store.apply_thread_upsert(guild_id, thread);
                }
            }
            None
        }
        Event::ThreadDelete { id, guild_id, .. } => {
            store.apply_thread_delete(id, guild_id);
            None
        }
        Event::GuildMemberListUpdate(update) => {
            store.apply_member_list_update(update.guild_id, &update.ops);
            None
        }
        Event::PresenceUpdate(event) => {
            store.apply_presence(event.presence);
            None
        }
        Event::ConversationSummaryUpdate(update) => {
            store.apply_summaries(update.channel_id, update.summaries);
            None
        }
        Event::UserUpdate(user) => {
            store.me = Some(*user);
            None
        }
        Event::RelationshipAdd(relationship) => {
            let id = relationship.id;
            store.relationships.retain(|r| r.id != id);
            store.relationships.push(*relationship);
            None
        }
        Event::RelationshipRemove(relationship) => {
            store.relationships.retain(|r| r.id != relationship.id);
            None
        }
        Event::CallCreate(event) | Event::CallUpdate(event) => {
            store.apply_call_event(Some(*event));
            None
        }
        Event::CallDelete { .. } => {
            store.apply_call_event(None);
            None
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use crate::state::messages::test_message;

    use super::*;

    fn ready_fixture() -> ReadyEvent {
        serde_json::from_value(serde_json::json!({
            "v": 9,
            "session_id": "abc",
            "resume_gateway_url": "wss://resume.example",
            "user": {"id": "1", "username": "me", "premium_type": 0},
            "guilds": [{
                "id": "100",
                "properties": {
                    "name": "testers",
                    "owner_id": "2",
                    "features": [],
                    "premium_tier": 0,
                },
                "member_count": 3,
                "channels": [
                    {"id": "200", "type": 0, "name": "general", "position": 0,
                     "permission_overwrites": [], "last_message_id": "900"},
                ],
                "roles": [
                    {"id": "100", "name": "@everyone", "color": 0, "position": 0,
                     "permissions": "3072"},
                ],
                "threads": [],
                "emojis": [],
                "stickers": [],
            }],
            "private_channels": [
                {"id": "300", "type": 1, "last_message_id": "100",
                 "recipient_ids": ["5"]},
            ],
            "users": [{"id": "5", "username": "friend"}],
            "read_state": {"entries": [
                {"id": "300", "last_message_id": "80", "mention_count": 0},
                {"id": "200", "last_message_id": "900", "mention_count": 0},
            ]},
            "user_guild_settings": {"entries": []},
            "relationships": [],
        }))
        .unwrap()
    }

    #[test]
    fn ready_builds_mirror_and_read_state() {
        let mut store = Store::new(true, 100, 4);
        store.ingest_ready(ready_fixture());

        assert_eq!(store.guilds.len(), 1);
        assert_eq!(store.dms.len(), 1);
        assert_eq!(store.dms[0].recipients[0].name, "friend");

        // DM d1: last=100, acked=80 -> unread with a line anchor
        let dm_state = store.read_state.get(ChannelId(300)).unwrap();
        assert!(dm_state.unread());
        assert_eq!(dm_state.last_acked_unreads_line, Some(MessageId(80)));

        // fully acked channel
        let chan_state = store.read_state.get(ChannelId(200)).unwrap();
        assert!(!chan_state.unread());
    }

    #[test]
    fn cold_start_dm_unread_scenario() {
        // ack after reaching bottom clears the unread marker
        let mut store = Store::new(true, 100, 4);
        store.ingest_ready(ready_fixture());

        store.active.channel_id = Some(ChannelId(300));
        store.active.buffer = MessageBuffer::from_page(vec![
            test_message(100, 300, 5, "newest"),
            test_message(80, 300, 5, "acked here"),
            test_message(60, 300, 5, "older"),
        ]);
        let anchor = store.active.buffer.anchor_index(
            store
                .read_state
                .get(ChannelId(300))
                .unwrap()
                .last_acked_message_id,
        );
        assert_eq!(store.active.buffer.messages()[anchor].id, MessageId(80));

        store.read_state.apply_ack(ChannelId(300), MessageId(100));
        assert!(!store.read_state.get(ChannelId(300)).unwrap().unread());
    }

    #[test]
    fn message_create_prepends_only_at_bottom() {
        let mut store = Store::new(true, 100, 4);
        store.ingest_ready(ready_fixture());
        store.active.channel_id = Some(ChannelId(200));
        store.active.guild_id = Some(GuildId(100));
        store.active.buffer = MessageBuffer::from_page(vec![test_message(900, 200, 5, "old")]);

        let arrival = store.apply_message_create(test_message(950, 200, 5, "new"));
        assert_eq!(arrival, MessageArrival::Active);
        assert_eq!(store.active.buffer.newest_id(), Some(MessageId(950)));

        // scrolled-away window (buffer newest != channel newest) stays put
        store.active.buffer = MessageBuffer::from_page(vec![test_message(900, 200, 5, "old")]);
        store.apply_message_create(test_message(960, 200, 5, "newer"));
        assert_eq!(store.active.buffer.newest_id(), Some(MessageId(900)));
    }

    #[test]
    fn ghost_ping_is_reported_by_delete() {
        let mut store = Store::new(true, 100, 4);
        store.ingest_ready(ready_fixture());

        let mut message = test_message(500, 200, 5, "hey you");
        message.guild_id = Some(GuildId(100));
        store.apply_message_create(message);
        store.read_state.add_mention(ChannelId(200), MessageId(500));

        let was_ghost = store.apply_message_delete(ChannelId(200), MessageId(500));
        assert!(was_ghost);
        assert!(!store
            .read_state
            .get(ChannelId(200))
            .unwrap()
            .has_mentions());
        // read-state invariant survives the retreat
        assert!(store.read_state.invariant_holds());
    }

    #[test]
    fn replay_matches_reference_model() {
        // apply a create/update/delete stream and compare against a simple
        // reference projection of the same events
        let mut store = Store::new(false, 100, 4);
        store.ingest_ready(ready_fixture());
        store.active.channel_id = Some(ChannelId(200));
        store.active.guild_id = Some(GuildId(100));

        #[derive(Clone)]
        enum Op {
            Create(u64, &'static str),
            Edit(u64, &'static str),
            Delete(u64),
        }
        let script = vec![
            Op::Create(901, "a"),
            Op::Create(902, "b"),
            Op::Edit(901, "a-edited"),
            Op::Create(903, "c"),
            Op::Delete(902),
            Op::Edit(903, "c-edited"),
        ];

        let mut reference: Vec<(u64, String)> = Vec::new();
        for op in &script {
            match op {
                Op::Create(id, content) => {
                    store.apply_message_create(test_message(*id, 200, 5, content));
                    reference.insert(0, (*id, content.to_string()));
                }
                Op::Edit(id, content) => {
                    let update: MessageUpdate = serde_json::from_value(serde_json::json!({
                        "id": id.to_string(),
                        "channel_id": "200",
                        "content": content,
                    }))
                    .unwrap();
                    store.apply_message_update(&update);
                    if let Some(entry) = reference.iter_mut().find(|(i, _)| i == id) {
                        entry.1 = content.to_string();
                    }
                }
                Op::Delete(id) => {
                    store.apply_message_delete(ChannelId(200), MessageId(*id));
                    reference.retain(|(i, _)| i != id);
                }
            }
        }

        let final_state: Vec<(u64, String)> = store
            .active
            .buffer
            .messages()
            .iter()
            .map(|m| (m.id.0, m.content.clone()))
            .collect();
        assert_eq!(final_state, reference);
    }

    #[test]
    fn member_list_ops_stay_bounded() {
        let mut store = Store::new(false, 100, 4);
        let items: Vec<crate::model::MemberListItem> = (0..150)
            .map(|i| {
                serde_json::from_value(serde_json::json!({
                    "member": {"user": {"id": i.to_string(), "username": format!("u{}", i)}}
                }))
                .unwrap()
            })
            .collect();
        let sync = MemberListOp {
            op: "SYNC".into(),
            range: Some((0, 99)),
            index: None,
            item: None,
            items,
        };
        store.apply_member_list_update(GuildId(1), &[sync]);
        assert_eq!(store.member_list[&GuildId(1)].len(), MEMBER_LIST_CAP);

        let delete = MemberListOp {
            op: "DELETE".into(),
            range: None,
            index: Some(0),
            item: None,
            items: vec![],
        };
        store.apply_member_list_update(GuildId(1), &[delete]);
        assert_eq!(store.member_list[&GuildId(1)].len(), MEMBER_LIST_CAP - 1);
    }

    #[test]
    fn role_change_invalidates_computed_perms() {
        let mut store = Store::new(false, 100, 4);
        store.ingest_ready(ready_fixture());
        let guild_id = GuildId(100);
        {
            let guild = store.guild_mut(guild_id).unwrap();
            for channel in &mut guild.channels {
                channel.perms = Some(crate::model::ComputedPerms::all());
            }
        }
        store.apply_role_upsert(
            guild_id,
            Role {
                id: RoleId(101),
                name: "new".into(),
                color: 0,
                position: 5,
                hoist: false,
                permissions: crate::model::Permissions::empty(),
            },
        );
        let guild = store.guild(guild_id).unwrap();
        assert!(guild.channels.iter().all(|c| c.perms.is_none()));
    }
}
