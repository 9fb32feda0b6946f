//! The controller: single owner of the state store, single dispatcher of
//! user intents, orchestrator across gateway, REST and voice.

use std::time::{Duration, Instant};

use base64::Engine;
use rand::Rng;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::gateway::{EventQueues, Gateway, SessionState};
use crate::model::{
    ChannelId, ChannelType, Event, GuildId, Member, MessageId, UserId,
};
use crate::parser::{self, ClientCommand};
use crate::perms;
use crate::profile::ProfileStore;
use crate::rest::{
    AttachmentState, ChannelExt, GetMessages, InteractionExt, InteractionType, MessageExt,
    ReplyTo, RestClient, RestError, SentAttachment, UploadSlot,
};
use crate::state::{MessageArrival, MessageBuffer, MemberRoles, Store};
use crate::voice::{CallUpdate, VoiceConfig, VoiceSession};
use crate::{Error, Result};

mod actions;
pub use actions::{
    Action, AssistEntry, AssistKind, Notifier, NullNotifier, NullSettingsDecoder,
    SettingsDecoder, TypingUser, ViewEvent,
};

mod assist;
use assist::AutocompleteThrottle;

mod notify;
use notify::{AckFlush, AckThrottler, NotificationMap};

/// Tick back-off: the loop yields for this long after each pass.
const TICK_DELAY: Duration = Duration::from_millis(100);

/// Typing indicator refresh window.
const TYPING_WINDOW: Duration = Duration::from_secs(7);

/// Typing list entries expire after this long without a refresh.
const TYPING_EXPIRY: Duration = Duration::from_secs(10);

/// How close to the buffer edge the selection may get before paging.
const PAGE_MARGIN: usize = 2;

/// One queued outgoing attachment.
struct PendingAttachment {
    id: u64,
    filename: String,
    state: AttachmentState,
    slot: Option<UploadSlot>,
}

/// Result of a background upload task.
enum UploadOutcome {
    Ready { id: u64, slot: UploadSlot },
    Failed { id: u64, state: AttachmentState },
}

/// The engine controller. Owns the store; everything else reaches it
/// through channels.
pub struct Controller {
    store: Store,
    rest: RestClient,
    gateway: Gateway,
    queues: EventQueues,
    config: Config,

    actions: mpsc::UnboundedReceiver<Action>,
    views: mpsc::UnboundedSender<ViewEvent>,
    notifier: Box<dyn Notifier>,
    settings_decoder: Box<dyn SettingsDecoder>,
    profile: Option<ProfileStore>,

    acks: AckThrottler,
    notifications: NotificationMap,
    autocomplete: AutocompleteThrottle,

    composing: bool,
    last_typing_sent: Option<Instant>,
    typing_users: Vec<TypingUser>,
    slowmode: std::collections::HashMap<ChannelId, Instant>,
    last_slowmode_refresh: Instant,

    member_query_results: Vec<Member>,
    outstanding_chunk_nonce: Option<String>,

    voice: Option<VoiceSession>,
    voice_updates: Option<mpsc::Receiver<CallUpdate>>,
    voice_mute: bool,

    attachments: Vec<PendingAttachment>,
    next_attachment_id: u64,
    upload_outcomes_tx: mpsc::UnboundedSender<UploadOutcome>,
    upload_outcomes: mpsc::UnboundedReceiver<UploadOutcome>,

    quit: bool,
}

impl Controller {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        rest: RestClient,
        gateway: Gateway,
        queues: EventQueues,
        actions: mpsc::UnboundedReceiver<Action>,
        views: mpsc::UnboundedSender<ViewEvent>,
        notifier: Box<dyn Notifier>,
        settings_decoder: Box<dyn SettingsDecoder>,
        profile: Option<ProfileStore>,
    ) -> Controller {
        let store = Store::new(
            config.keep_deleted,
            config.limit_chat_buffer,
            config.tab_limit,
        );
        let acks = AckThrottler::new(Duration::from_secs(config.ack_throttling_secs));
        let autocomplete =
            AutocompleteThrottle::new(Duration::from_secs(config.interaction_throttling_secs));
        let notifications = NotificationMap::new(config.remove_previous_notifications);
        let (upload_outcomes_tx, upload_outcomes) = mpsc::unbounded_channel();

        Controller {
            store,
            rest,
            gateway,
            queues,
            config,
            actions,
            views,
            notifier,
            settings_decoder,
            profile,
            acks,
            notifications,
            autocomplete,
            composing: false,
            last_typing_sent: None,
            typing_users: Vec::new(),
            slowmode: std::collections::HashMap::new(),
            last_slowmode_refresh: Instant::now(),
            member_query_results: Vec::new(),
            outstanding_chunk_nonce: None,
            voice: None,
            voice_updates: None,
            voice_mute: false,
            attachments: Vec::new(),
            next_attachment_id: 1,
            upload_outcomes_tx,
            upload_outcomes,
            quit: false,
        }
    }

    /// Run until quit or a fatal gateway error.
    pub async fn run(mut self) -> Result<()> {
        loop {
            if let Some(message) = self.gateway.fatal_error() {
                let _ = self.views.send(ViewEvent::Shutdown);
                return Err(Error::Closed(None, message));
            }
            self.tick().await;
            if self.quit {
                self.persist_on_exit();
                let _ = self.views.send(ViewEvent::Shutdown);
                return Ok(());
            }
            tokio::time::sleep(TICK_DELAY).await;
        }
    }

    /// One controller tick: drain every queue in the fixed order, handle
    /// user actions, then the periodic work.
    pub async fn tick(&mut self) {
        self.drain_ready().await;
        self.drain_messages().await;
        self.drain_typing();
        self.drain_simple_queues();
        self.drain_members();
        self.drain_proto();
        self.drain_autocomplete();

        while let Ok(action) = self.actions.try_recv() {
            self.handle_action(action).await;
        }
        while let Ok(outcome) = self.upload_outcomes.try_recv() {
            self.handle_upload_outcome(outcome);
        }

        self.flush_acks().await;
        self.typing_heartbeat().await;
        self.refresh_slowmode();
        self.poll_autocomplete_trailing_edge().await;
        self.poll_voice().await;
    }

    // Queue draining

    async fn drain_ready(&mut self) {
        while let Ok(event) = self.queues.ready.try_recv() {
            match event {
                Event::Ready(ready) => {
                    let proto = self.store.ingest_ready(*ready);
                    if let Some(token) = self.gateway.take_token_update() {
                        debug!("token rotated on ready: {} chars", token.len());
                    }
                    if let Some(blob) = proto {
                        self.decode_settings_blob(&blob);
                    }
                    // hydrate the personal command catalog
                    match self.rest.get_my_commands().await {
                        Ok(commands) => self.store.my_commands = commands,
                        Err(err) => debug!(%err, "command catalog fetch failed"),
                    }
                    self.send_view(ViewEvent::Tree);
                }
                Event::ReadySupplemental(_) => self.send_view(ViewEvent::Tree),
                _ => {}
            }
        }
    }

    async fn drain_messages(&mut self) {
        while let Ok(event) = self.queues.messages.try_recv() {
            match event {
                Event::MessageCreate(message) => {
                    let message = *message;
                    let channel_id = message.channel_id;
                    let ping_check = message.clone();
                    let arrival = self.store.apply_message_create(message);
                    // sender is no longer typing
                    self.typing_users
                        .retain(|t| t.user_id != ping_check.author.id);
                    match arrival {
                        MessageArrival::Active => {
                            // seen live at the bottom: ack it
                            self.acks.push(channel_id, ping_check.id);
                            self.send_view(ViewEvent::Chat);
                        }
                        MessageArrival::Background => {
                            if let Some(reason) =
                                notify::evaluate_ping(&self.store, &ping_check)
                            {
                                debug!(?reason, channel = %channel_id, "ping");
                                self.store.read_state.add_mention(channel_id, ping_check.id);
                                let title = self.channel_title(channel_id);
                                self.notifications.notify(
                                    self.notifier.as_mut(),
                                    channel_id,
                                    &title,
                                    &ping_check.content,
                                );
                            }
                            self.send_view(ViewEvent::Tree);
                        }
                    }
                }
                Event::MessageDelete { id, channel_id, .. } => {
                    let was_ghost = self.store.apply_message_delete(channel_id, id);
                    if was_ghost {
                        self.notifications
                            .retract_channel(self.notifier.as_mut(), channel_id);
                    }
                    self.send_view(ViewEvent::Chat);
                    self.send_view(ViewEvent::Tree);
                }
                other => {
                    let affected_active = match &other {
                        Event::MessageUpdate(update) => {
                            Some(update.channel_id) == self.store.active.channel_id
                        }
                        Event::MessageReactionAdd(event)
                        | Event::MessageReactionRemove(event) => {
                            Some(event.channel_id) == self.store.active.channel_id
                        }
                        Event::MessagePollVoteAdd(event)
                        | Event::MessagePollVoteRemove(event) => {
                            Some(event.channel_id) == self.store.active.channel_id
                        }
                        _ => false,
                    };
                    crate::state::apply_event(&mut self.store, other);
                    if affected_active {
                        self.send_view(ViewEvent::Chat);
                    }
                }
            }
        }
    }

    fn drain_typing(&mut self) {
        let mut changed = false;
        while let Ok(event) = self.queues.typing.try_recv() {
            if let Event::TypingStart {
                channel_id,
                user_id,
                ..
            } = event
            {
                if Some(channel_id) == self.store.active.channel_id
                    && Some(user_id) != self.store.my_id()
                {
                    match self.typing_users.iter_mut().find(|t| t.user_id == user_id) {
                        Some(entry) => entry.seen_at = Instant::now(),
                        None => self.typing_users.push(TypingUser {
                            user_id,
                            seen_at: Instant::now(),
                        }),
                    }
                    changed = true;
                }
            }
        }
        let before = self.typing_users.len();
        let now = Instant::now();
        self.typing_users
            .retain(|t| now.duration_since(t.seen_at) < TYPING_EXPIRY);
        if changed || self.typing_users.len() != before {
            self.send_view(ViewEvent::StatusLine);
        }
    }

    fn drain_simple_queues(&mut self) {
        while let Ok(event) = self.queues.summaries.try_recv() {
            crate::state::apply_event(&mut self.store, event);
        }
        while let Ok(event) = self.queues.acks.try_recv() {
            if let Event::MessageAck {
                channel_id,
                message_id: Some(message_id),
                ..
            } = event
            {
                // another device read the channel
                self.store.read_state.apply_ack(channel_id, message_id);
                self.notifications
                    .retract_channel(self.notifier.as_mut(), channel_id);
                self.send_view(ViewEvent::Tree);
            }
        }
        while let Ok(event) = self.queues.threads.try_recv() {
            crate::state::apply_event(&mut self.store, event);
            self.send_view(ViewEvent::Tree);
        }
        while let Ok(event) = self.queues.calls.try_recv() {
            let ringing = matches!(&event, Event::CallCreate(call)
                if self.store.my_id().map(|me| call.ringing.contains(&me)).unwrap_or(false));
            let ended = matches!(&event, Event::CallDelete { .. });
            crate::state::apply_event(&mut self.store, event);
            if ringing {
                self.send_view(ViewEvent::CallPopup(true));
            }
            if ended {
                self.send_view(ViewEvent::CallPopup(false));
            }
        }
        while let Ok(_event) = self.queues.voice.try_recv() {
            // session-level latching happened in the gateway task; the
            // store has nothing to mirror for foreign voice states yet
        }
        while let Ok(event) = self.queues.presence.try_recv() {
            crate::state::apply_event(&mut self.store, event);
        }
        while let Ok(event) = self.queues.user.try_recv() {
            crate::state::apply_event(&mut self.store, event);
            self.send_view(ViewEvent::Tree);
        }
    }

    fn drain_members(&mut self) {
        while let Ok(event) = self.queues.members.try_recv() {
            match event {
                Event::GuildMembersChunk(chunk) => {
                    let guild_colors: Vec<(crate::model::RoleId, u32)> = self
                        .store
                        .guild(chunk.guild_id)
                        .map(|g| g.roles.iter().map(|r| (r.id, r.color)).collect())
                        .unwrap_or_default();
                    for member in &chunk.members {
                        let Some(user_id) = member.user_id() else {
                            continue;
                        };
                        let primary_role_color = member
                            .roles
                            .iter()
                            .filter_map(|role| {
                                guild_colors
                                    .iter()
                                    .find(|(id, color)| id == role && *color != 0)
                                    .map(|(_, color)| *color)
                            })
                            .next();
                        self.store.member_roles.insert(
                            chunk.guild_id,
                            MemberRoles {
                                user_id,
                                roles: member.roles.clone(),
                                primary_role_color,
                            },
                        );
                    }
                    let ours = chunk.nonce.is_some()
                        && chunk.nonce == self.outstanding_chunk_nonce;
                    if ours {
                        self.outstanding_chunk_nonce = None;
                        self.send_view(ViewEvent::Chat);
                    } else if chunk.nonce.is_some() {
                        // a member-query for the assist list
                        self.member_query_results = chunk.members;
                    }
                }
                Event::GuildMemberListUpdate(update) => {
                    self.store
                        .apply_member_list_update(update.guild_id, &update.ops);
                }
                _ => {}
            }
        }
    }

    fn drain_proto(&mut self) {
        while let Ok(event) = self.queues.proto.try_recv() {
            if let Event::UserSettingsProtoUpdate(update) = event {
                if let Some(blob) = update.settings.proto {
                    self.decode_settings_blob(&blob);
                }
            }
        }
        if self.store.take_settings_changed() {
            self.send_view(ViewEvent::Tree);
        }
    }

    fn drain_autocomplete(&mut self) {
        while let Ok(event) = self.queues.autocomplete.try_recv() {
            if let Event::ApplicationCommandAutocompleteResponse(response) = event {
                let entries: Vec<AssistEntry> = response
                    .choices
                    .iter()
                    .map(|choice| AssistEntry {
                        label: choice.name.clone(),
                        insert: match &choice.value {
                            serde_json::Value::String(s) => s.clone(),
                            other => other.to_string(),
                        },
                        score: 0,
                    })
                    .collect();
                self.send_view(ViewEvent::AssistResults(entries));
            }
        }
    }

    fn decode_settings_blob(&mut self, blob: &str) {
        let Ok(raw) = base64::engine::general_purpose::STANDARD.decode(blob) else {
            debug!("settings blob is not valid base64");
            return;
        };
        if let Some(decoded) = self.settings_decoder.decode(&raw) {
            self.store.set_settings_proto(decoded);
        }
    }

    // Periodic work

    async fn flush_acks(&mut self) {
        match self.acks.flush(Instant::now()) {
            Some(AckFlush::Single(channel_id, message_id)) => {
                self.store.read_state.apply_ack(channel_id, message_id);
                if let Err(err) = self.rest.send_ack(channel_id, message_id, false).await {
                    self.report_rest_error(&err);
                }
                self.send_view(ViewEvent::Tree);
            }
            Some(AckFlush::Bulk(pairs)) => {
                for (channel_id, message_id) in &pairs {
                    self.store.read_state.apply_ack(*channel_id, *message_id);
                }
                if let Err(err) = self.rest.send_ack_bulk(&pairs).await {
                    self.report_rest_error(&err);
                }
                self.send_view(ViewEvent::Tree);
            }
            None => {}
        }
    }

    async fn typing_heartbeat(&mut self) {
        if !self.composing {
            return;
        }
        let Some(channel_id) = self.store.active.channel_id else {
            return;
        };
        if self.slowmode_remaining(channel_id).is_some() {
            return;
        }
        let due = self
            .last_typing_sent
            .map(|last| last.elapsed() >= TYPING_WINDOW)
            .unwrap_or(true);
        if !due {
            return;
        }
        self.last_typing_sent = Some(Instant::now());
        match self.rest.send_typing(channel_id).await {
            Ok(Some(cooldown_secs)) => self.set_slowmode(channel_id, cooldown_secs),
            Ok(None) => {}
            // typing failures are dropped silently
            Err(err) => debug!(%err, "typing heartbeat failed"),
        }
    }

    fn refresh_slowmode(&mut self) {
        if self.slowmode.is_empty() {
            return;
        }
        if self.last_slowmode_refresh.elapsed() < Duration::from_secs(1) {
            return;
        }
        self.last_slowmode_refresh = Instant::now();
        let now = Instant::now();
        self.slowmode.retain(|_, until| *until > now);
        // status-line bindings referencing %slowmode re-render each second
        self.send_view(ViewEvent::StatusLine);
    }

    fn set_slowmode(&mut self, channel_id: ChannelId, seconds: u64) {
        if seconds == 0 {
            return;
        }
        self.slowmode
            .insert(channel_id, Instant::now() + Duration::from_secs(seconds));
        self.send_view(ViewEvent::StatusLine);
    }

    /// Remaining slow-mode seconds for a channel, if counting.
    pub fn slowmode_remaining(&self, channel_id: ChannelId) -> Option<u64> {
        self.slowmode.get(&channel_id).and_then(|until| {
            let now = Instant::now();
            (*until > now).then(|| (*until - now).as_secs().max(1))
        })
    }

    async fn poll_autocomplete_trailing_edge(&mut self) {
        if let Some(line) = self.autocomplete.poll(Instant::now()) {
            self.send_autocomplete_interaction(&line).await;
        }
    }

    async fn poll_voice(&mut self) {
        // open the voice gateway once both handshake halves arrived
        if let Some((session_id, server)) = self.gateway.take_voice_handshake() {
            let endpoint = server.endpoint.unwrap_or_default();
            if endpoint.is_empty() {
                warn!("voice server update without endpoint");
            } else if let (Some(channel_id), Some(user_id)) =
                (server.channel_id, self.store.my_id())
            {
                let (session, updates) = VoiceSession::connect(VoiceConfig {
                    endpoint,
                    token: server.token,
                    session_id,
                    guild_id: server.guild_id,
                    channel_id,
                    user_id,
                    mute: self.voice_mute,
                });
                self.voice = Some(session);
                self.voice_updates = Some(updates);
                self.send_view(ViewEvent::CallPopup(true));
            }
        }

        let mut pending = Vec::new();
        if let Some(updates) = &mut self.voice_updates {
            while let Ok(update) = updates.try_recv() {
                pending.push(update);
            }
        }
        let mut call_ended = false;
        for update in pending {
            match update {
                CallUpdate::Ended => call_ended = true,
                CallUpdate::UserJoined(user_id) => {
                    debug!(%user_id, "joined call");
                    self.send_view(ViewEvent::StatusLine);
                }
                CallUpdate::UserLeft(user_id) => {
                    debug!(%user_id, "left call");
                    self.send_view(ViewEvent::StatusLine);
                }
                CallUpdate::Speaking(_, _) => {
                    self.send_view(ViewEvent::StatusLine);
                }
            }
        }
        if call_ended {
            self.voice = None;
            self.voice_updates = None;
            self.send_view(ViewEvent::CallPopup(false));
        }
    }

    // Actions

    async fn handle_action(&mut self, action: Action) {
        match action {
            Action::SwitchChannel {
                guild_id,
                channel_id,
            } => self.switch_channel(guild_id, channel_id).await,
            Action::SelectMessage { index } => self.maybe_page(index).await,
            Action::GoToMessage { message_id } => self.go_to_message(message_id).await,
            Action::ReachedBottom => self.reached_bottom(),

            Action::SendMessage {
                content,
                reply_to,
                reply_ping,
            } => self.send_message(content, reply_to, reply_ping).await,
            Action::EditMessage {
                message_id,
                content,
            } => self.edit_message(message_id, content).await,
            Action::DeleteMessage { message_id } => {
                if let Some(channel_id) = self.store.active.channel_id {
                    if let Err(err) = self.rest.delete_message(channel_id, message_id).await {
                        self.report_rest_error(&err);
                    }
                }
            }
            Action::React {
                message_id,
                emoji,
                remove,
            } => {
                if let Some(channel_id) = self.store.active.channel_id {
                    let result = if remove {
                        self.rest
                            .remove_reaction(channel_id, message_id, &emoji)
                            .await
                    } else {
                        self.rest.add_reaction(channel_id, message_id, &emoji).await
                    };
                    if let Err(err) = result {
                        self.report_rest_error(&err);
                    }
                }
            }
            Action::Vote {
                message_id,
                answer_ids,
                clear,
            } => {
                if let Some(channel_id) = self.store.active.channel_id {
                    if let Err(err) = self
                        .rest
                        .send_vote(channel_id, message_id, &answer_ids, clear)
                        .await
                    {
                        self.report_rest_error(&err);
                    }
                }
            }

            Action::Composing(composing) => {
                self.composing = composing;
                if !composing {
                    self.last_typing_sent = None;
                }
            }

            Action::AttachFile { path } => self.attach_file(path).await,
            Action::CancelAttachments => self.cancel_attachments().await,

            Action::MarkAsRead { channel_id } => {
                if let Some(state) = self.store.read_state.get(channel_id) {
                    if let Some(last) = state.last_message_id {
                        self.acks.push(channel_id, last);
                    }
                }
            }
            Action::MarkAsUnread { message_id } => {
                if let Some(channel_id) = self.store.active.channel_id {
                    self.store
                        .read_state
                        .mark_unread_before(channel_id, message_id);
                    if let Err(err) = self.rest.send_ack(channel_id, message_id, true).await {
                        self.report_rest_error(&err);
                    }
                    self.send_view(ViewEvent::Tree);
                }
            }

            Action::ToggleThread { thread_id } => self.toggle_thread(thread_id).await,

            Action::StartCall { channel_id } => {
                if let Err(err) = self.rest.send_ring(channel_id, &[]).await {
                    self.report_rest_error(&err);
                }
                self.join_call(channel_id);
            }
            Action::AcceptCall { channel_id } => self.join_call(channel_id),
            Action::LeaveCall => self.leave_call().await,
            Action::ToggleCallMute => self.toggle_call_mute(),

            Action::Assist { kind, query, line } => self.run_assist(kind, &query, &line).await,
            Action::Command(command) => self.run_client_command(command).await,

            Action::Resize { width, height } => {
                debug!(width, height, "terminal resized");
                self.send_view(ViewEvent::Tree);
                self.send_view(ViewEvent::Chat);
                self.send_view(ViewEvent::StatusLine);
            }

            Action::Quit => self.quit = true,
        }
    }

    // Channel switching (the ordered steps of the switch contract)

    async fn switch_channel(&mut self, guild_id: Option<GuildId>, channel_id: ChannelId) {
        // permission gate first: a non-permitted channel cannot be active
        if let Some((_, channel)) = self.store.find_channel(channel_id) {
            if let Some(perms) = &channel.perms {
                if !perms.permitted {
                    self.extra_line("You cannot view this channel", Some(5));
                    return;
                }
            }
        }

        // 1. snapshot the prior channel into the tab cache
        let prior = self.store.active.channel_id;
        if let Some(prior_id) = prior {
            let is_forum = self
                .store
                .find_channel(prior_id)
                .map(|(_, c)| c.kind == ChannelType::Forum)
                .unwrap_or(false);
            if !is_forum && !self.store.active.buffer.is_empty() {
                let messages = self.store.active.buffer.messages().to_vec();
                self.store.tabs.store(prior_id, messages);
            }
            // 2. settle the prior channel's unreads line
            let fully_seen = self
                .store
                .read_state
                .get(prior_id)
                .map(|s| !s.unread())
                .unwrap_or(false);
            if fully_seen {
                self.store.read_state.clear_unreads_line(prior_id);
            }
        }

        // 3. activate the target
        self.store.active.channel_id = Some(channel_id);
        self.store.active.guild_id = guild_id;
        self.store.active.buffer = MessageBuffer::new();

        // 4. load content: forums get a thread chunk, text channels a page
        let is_forum = self
            .store
            .find_channel(channel_id)
            .map(|(_, c)| c.kind == ChannelType::Forum)
            .unwrap_or(false);
        if is_forum {
            match self.rest.get_threads(channel_id, 25, 0).await {
                Ok(page) => {
                    if let Some(guild_id) = guild_id {
                        for raw in &page.threads {
                            if let Some(thread) = crate::model::Thread::from_payload(raw) {
                                self.store.apply_thread_upsert(guild_id, thread);
                            }
                        }
                    }
                }
                Err(err) => {
                    self.report_rest_error(&err);
                    return;
                }
            }
        } else {
            let cached = self.store.tabs.take(channel_id);
            let page = match cached {
                Some(page) if !page.is_empty() => page,
                _ => match self
                    .rest
                    .get_messages(channel_id, GetMessages::MostRecent, self.config.msg_num)
                    .await
                {
                    Ok(mut page) => {
                        if self.config.keep_deleted {
                            self.store.deleted.restore_into(channel_id, &mut page);
                        }
                        page
                    }
                    Err(err) => {
                        // offline or failed: abort with a visible message
                        self.store.active.channel_id = prior;
                        self.report_rest_error(&err);
                        return;
                    }
                },
            };
            self.store.active.buffer = MessageBuffer::from_page(page);
        }

        // 5. scroll anchor: nearest message at or below the acked boundary
        let anchor = self.store.active.buffer.anchor_index(
            self.store
                .read_state
                .get(channel_id)
                .and_then(|s| s.last_acked_message_id),
        );

        // 6. roles and permissions for the new context
        if let Some(guild_id) = guild_id {
            let my_roles = self.store.my_roles(guild_id);
            let my_id = self.store.my_id().unwrap_or_default();
            if let Some(guild) = self.store.guild_mut(guild_id) {
                if guild.channels.iter().any(|c| c.perms.is_none()) {
                    perms::compute_guild_permissions(guild, &my_roles, my_id);
                }
            }
            self.request_missing_member_roles(guild_id);
            self.hydrate_guild_commands(guild_id).await;
        }
        self.typing_users.clear();

        // 7. subscribe and push the updated set
        match guild_id {
            Some(guild_id) => {
                let _ = self.gateway.subscribe(guild_id, channel_id);
            }
            None => {
                let _ = self.gateway.subscribe_dm(channel_id);
            }
        }

        // 8. persist the last location, except for threads and forums
        let is_thread = self.store.find_thread(channel_id).is_some();
        if !is_thread && !is_forum {
            if let Some(profile) = &self.profile {
                let mut state = profile.load_state();
                state.last_guild_id = guild_id;
                state.last_channel_id = Some(channel_id);
                if let Err(err) = profile.save_state(&state) {
                    debug!(?err, "could not persist last channel");
                }
            }
        }

        // 9. views
        self.send_view(ViewEvent::Chat);
        self.send_view(ViewEvent::Tree);
        self.send_view(ViewEvent::SelectIndex(anchor));
    }

    /// Fetch the guild's command catalog and permission overrides, once
    /// per guild.
    async fn hydrate_guild_commands(&mut self, guild_id: GuildId) {
        let already = self
            .store
            .guild_commands
            .iter()
            .any(|c| c.guild_id == Some(guild_id));
        if already {
            return;
        }
        match self.rest.get_guild_commands(guild_id).await {
            Ok(commands) => self.store.guild_commands = commands,
            Err(err) => {
                debug!(%err, "guild command catalog fetch failed");
                return;
            }
        }
        match self.rest.get_command_permissions(guild_id).await {
            Ok(entries) => {
                let mut index = perms::AppPermissionIndex::default();
                for entry in entries {
                    // entries keyed by a command ID override that command;
                    // the rest are application-wide
                    if self
                        .store
                        .guild_commands
                        .iter()
                        .any(|c| c.id.0 == entry.id)
                    {
                        index.commands.push(entry);
                    } else {
                        index.applications.push(entry);
                    }
                }
                self.store.command_permissions.insert(guild_id, index);
            }
            Err(err) => debug!(%err, "command permissions fetch failed"),
        }
    }

    /// The per-command permitted mask for the active channel.
    fn permitted_commands(
        &self,
        commands: &[crate::model::AppCommand],
        channel_id: ChannelId,
    ) -> Vec<bool> {
        let Some(guild_id) = self.store.active.guild_id else {
            // DMs: visibility is governed by dm_permission alone
            return vec![true; commands.len()];
        };
        let Some(guild) = self.store.guild(guild_id) else {
            return vec![true; commands.len()];
        };
        let empty = perms::AppPermissionIndex::default();
        let index = self
            .store
            .command_permissions
            .get(&guild_id)
            .unwrap_or(&empty);
        let channel_perms = guild
            .channel(channel_id)
            .and_then(|c| c.perms.as_ref())
            .map(|p| p.bits)
            .unwrap_or_else(crate::model::Permissions::empty);
        perms::compute_command_permissions(
            commands,
            index,
            channel_id,
            guild_id,
            &self.store.my_roles(guild_id),
            self.store.my_id().unwrap_or_default(),
            guild.admin,
            channel_perms,
        )
    }

    /// Ask the gateway for roles of authors visible in the page but absent
    /// from the member-role cache.
    fn request_missing_member_roles(&mut self, guild_id: GuildId) {
        let authors: Vec<UserId> = self
            .store
            .active
            .buffer
            .messages()
            .iter()
            .map(|m| m.author.id)
            .collect();
        let missing = self
            .store
            .member_roles
            .missing(guild_id, authors.iter());
        if missing.is_empty() {
            return;
        }
        let nonce = format!("{:016x}", rand::thread_rng().gen::<u64>());
        self.outstanding_chunk_nonce = Some(nonce.clone());
        let _ = self.gateway.request_members(guild_id, missing, nonce);
    }

    // Paging

    /// Fetch older or newer pages when the selection nears the buffer edge.
    async fn maybe_page(&mut self, index: usize) {
        let Some(channel_id) = self.store.active.channel_id else {
            return;
        };
        let len = self.store.active.buffer.len();
        if len == 0 {
            return;
        }

        // near the top (oldest end, high indices): page backwards
        if index + PAGE_MARGIN >= len.saturating_sub(1) {
            if let Some(oldest) = self.store.active.buffer.oldest_id() {
                match self
                    .rest
                    .get_messages(channel_id, GetMessages::Before(oldest), self.config.msg_num)
                    .await
                {
                    Ok(page) => {
                        self.store
                            .active
                            .buffer
                            .extend_older(page, self.config.limit_chat_buffer);
                        self.send_view(ViewEvent::Chat);
                    }
                    Err(err) => self.report_rest_error(&err),
                }
            }
            return;
        }

        // near the bottom (newest end): page forward unless already there
        if index <= PAGE_MARGIN {
            let newest_loaded = self.store.active.buffer.newest_id();
            let channel_newest = self
                .store
                .read_state
                .get(channel_id)
                .and_then(|s| s.last_message_id);
            if newest_loaded.is_some() && newest_loaded == channel_newest {
                return;
            }
            if let Some(newest) = newest_loaded {
                match self
                    .rest
                    .get_messages(channel_id, GetMessages::After(newest), self.config.msg_num)
                    .await
                {
                    Ok(page) => {
                        self.store
                            .active
                            .buffer
                            .extend_newer(page, self.config.limit_chat_buffer);
                        self.send_view(ViewEvent::Chat);
                    }
                    Err(err) => self.report_rest_error(&err),
                }
            }
        }
    }

    async fn go_to_message(&mut self, message_id: MessageId) {
        let Some(channel_id) = self.store.active.channel_id else {
            return;
        };
        if let Some(index) = self.store.active.buffer.index_of(message_id) {
            self.send_view(ViewEvent::SelectIndex(index));
            return;
        }
        match self
            .rest
            .get_messages(
                channel_id,
                GetMessages::Around(message_id),
                self.config.msg_num,
            )
            .await
        {
            Ok(page) => {
                self.store.active.buffer = MessageBuffer::from_page(page);
                let index = self
                    .store
                    .active
                    .buffer
                    .index_of(message_id)
                    .unwrap_or(0);
                self.send_view(ViewEvent::Chat);
                self.send_view(ViewEvent::SelectIndex(index));
            }
            Err(err) => self.report_rest_error(&err),
        }
    }

    /// The user is at the bottom of the active channel: ack the newest
    /// message and clear the unreads line.
    fn reached_bottom(&mut self) {
        let Some(channel_id) = self.store.active.channel_id else {
            return;
        };
        if let Some(last) = self
            .store
            .read_state
            .get(channel_id)
            .and_then(|s| s.last_message_id)
        {
            self.acks.push(channel_id, last);
        }
        self.store.read_state.clear_unreads_line(channel_id);
        self.notifications
            .retract_channel(self.notifier.as_mut(), channel_id);
        self.send_view(ViewEvent::Tree);
    }

    // Message intents

    async fn send_message(
        &mut self,
        content: String,
        reply_to: Option<MessageId>,
        reply_ping: bool,
    ) {
        let Some(channel_id) = self.store.active.channel_id else {
            return;
        };

        // local preconditions: permission, slow mode, forum rules, length
        if let Some((_, channel)) = self.store.find_channel(channel_id) {
            if channel.kind == ChannelType::Forum {
                self.extra_line("Cannot send messages directly to a forum", Some(5));
                return;
            }
            if let Some(perms) = &channel.perms {
                if !perms.allow_write {
                    self.extra_line("You cannot send messages here", Some(5));
                    return;
                }
                if !perms.allow_attach && self.has_ready_attachments() {
                    self.extra_line("You cannot attach files here", Some(5));
                    return;
                }
            }
        }
        if let Some(remaining) = self.slowmode_remaining(channel_id) {
            self.extra_line(&format!("Slow mode: wait {}s", remaining), Some(3));
            return;
        }
        if content.chars().count() > 2000 {
            self.extra_line("Message is too long", Some(5));
            return;
        }

        let content = self.demojize(&content);
        let reply = reply_to.map(|message_id| ReplyTo {
            message_id,
            channel_id,
            guild_id: self.store.active.guild_id,
            ping: reply_ping,
        });
        let attachments = self.take_ready_attachments();

        match self
            .rest
            .send_message(channel_id, &content, reply.as_ref(), &attachments, &[])
            .await
        {
            // the gateway echo inserts the message; nothing optimistic here
            Ok(_) => {
                self.composing = false;
                self.last_typing_sent = None;
                let cooldown = self
                    .store
                    .find_channel(channel_id)
                    .and_then(|(_, c)| c.rate_limit_per_user);
                if let Some(seconds) = cooldown {
                    self.set_slowmode(channel_id, seconds);
                }
            }
            Err(RestError::RateLimited(retry_after)) => {
                if let Some(seconds) = retry_after {
                    self.set_slowmode(channel_id, seconds);
                }
                self.extra_line("Rate limited", Some(3));
            }
            Err(err) => {
                // the upload is lost with the message; drop its handle
                for attachment in attachments {
                    let _ = self
                        .rest
                        .delete_attachment(&attachment.uploaded_filename)
                        .await;
                }
                self.report_rest_error(&err);
            }
        }
    }

    async fn edit_message(&mut self, message_id: MessageId, content: String) {
        let Some(channel_id) = self.store.active.channel_id else {
            return;
        };
        let own = self
            .store
            .active
            .buffer
            .get(message_id)
            .map(|m| Some(m.author.id) == self.store.my_id())
            .unwrap_or(false);
        if !own {
            self.extra_line("Can only edit own messages", Some(5));
            return;
        }
        let content = self.demojize(&content);
        match self.rest.edit_message(channel_id, message_id, &content).await {
            Ok(_) => {
                // editing a thread's starter message implies membership
                if self.store.find_thread(channel_id).is_some() && message_id.0 == channel_id.0 {
                    self.store.set_thread_joined(channel_id, true);
                }
            }
            Err(err) => self.report_rest_error(&err),
        }
    }

    async fn toggle_thread(&mut self, thread_id: ChannelId) {
        let joined = self
            .store
            .find_thread(thread_id)
            .map(|(_, t)| t.joined)
            .unwrap_or(false);
        let result = if joined {
            self.rest.leave_thread(thread_id).await
        } else {
            self.rest.join_thread(thread_id).await
        };
        match result {
            Ok(()) => {
                self.store.set_thread_joined(thread_id, !joined);
                self.send_view(ViewEvent::Tree);
            }
            Err(err) => self.report_rest_error(&err),
        }
    }

    fn join_call(&mut self, channel_id: ChannelId) {
        self.voice_mute = false;
        let _ = self.gateway.request_voice(
            None,
            Some(channel_id),
            false,
            false,
            self.config.preferred_voice_regions.clone(),
        );
    }

    fn toggle_call_mute(&mut self) {
        if let Some(voice) = &self.voice {
            let mute = !voice.muted();
            voice.set_mute(mute);
            self.voice_mute = mute;
            // re-announce the voice state with the new flag
            if let Some(call) = &self.store.call {
                let _ = self.gateway.request_voice(
                    None,
                    Some(call.channel_id),
                    mute,
                    false,
                    self.config.preferred_voice_regions.clone(),
                );
            }
            self.send_view(ViewEvent::StatusLine);
        }
    }

    async fn leave_call(&mut self) {
        if let Some(voice) = &self.voice {
            voice.disconnect();
        }
        let _ = self
            .gateway
            .request_voice(None, None, false, false, Vec::new());
        self.send_view(ViewEvent::CallPopup(false));
    }

    // Attachments

    async fn attach_file(&mut self, path: String) {
        let Some(channel_id) = self.store.active.channel_id else {
            return;
        };
        let filename = std::path::Path::new(&path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.clone());
        let id = self.next_attachment_id;
        self.next_attachment_id += 1;
        self.attachments.push(PendingAttachment {
            id,
            filename: filename.clone(),
            state: AttachmentState::Queued,
            slot: None,
        });

        // one task per transfer; the outcome comes back through a channel
        let rest = self.rest.clone();
        let outcomes = self.upload_outcomes_tx.clone();
        tokio::spawn(async move {
            let outcome = async {
                let size = tokio::fs::metadata(&path)
                    .await
                    .map(|m| m.len())
                    .map_err(|_| RestError::Other(None))?;
                if size > crate::rest::ATTACHMENT_MAX_BYTES {
                    return Err(RestError::TooLarge);
                }
                let bytes = tokio::fs::read(&path)
                    .await
                    .map_err(|_| RestError::Other(None))?;
                let slot = rest
                    .request_attachment_slot(channel_id, &filename, size, id, false)
                    .await?;
                rest.upload_attachment(&slot, bytes).await?;
                Ok::<UploadSlot, RestError>(slot)
            }
            .await;
            let _ = outcomes.send(match outcome {
                Ok(slot) => UploadOutcome::Ready { id, slot },
                Err(RestError::TooLarge) => UploadOutcome::Failed {
                    id,
                    state: AttachmentState::TooLarge,
                },
                Err(_) => UploadOutcome::Failed {
                    id,
                    state: AttachmentState::Failed,
                },
            });
        });
    }

    fn handle_upload_outcome(&mut self, outcome: UploadOutcome) {
        match outcome {
            UploadOutcome::Ready { id, slot } => {
                if let Some(pending) = self.attachments.iter_mut().find(|a| a.id == id) {
                    pending.state = AttachmentState::Uploaded;
                    pending.slot = Some(slot);
                    self.extra_line("Attachment ready", Some(3));
                }
            }
            UploadOutcome::Failed { id, state } => {
                if let Some(pending) = self.attachments.iter_mut().find(|a| a.id == id) {
                    pending.state = state;
                    let text = match state {
                        AttachmentState::TooLarge => "File is too large (max 200 MB)",
                        _ => "Attachment upload failed",
                    };
                    self.extra_line(text, Some(5));
                }
            }
        }
    }

    fn has_ready_attachments(&self) -> bool {
        self.attachments
            .iter()
            .any(|a| a.state == AttachmentState::Uploaded)
    }

    fn take_ready_attachments(&mut self) -> Vec<SentAttachment> {
        let mut ready = Vec::new();
        self.attachments.retain(|a| {
            if a.state == AttachmentState::Uploaded {
                if let Some(slot) = &a.slot {
                    ready.push(SentAttachment {
                        id: a.id,
                        filename: a.filename.clone(),
                        uploaded_filename: slot.upload_filename.clone(),
                    });
                }
                false
            } else {
                a.state == AttachmentState::Queued
            }
        });
        ready
    }

    async fn cancel_attachments(&mut self) {
        self.rest.cancel_uploading(None);
        let uploaded: Vec<String> = self
            .attachments
            .iter()
            .filter(|a| a.state == AttachmentState::Uploaded)
            .filter_map(|a| a.slot.as_ref().map(|s| s.upload_filename.clone()))
            .collect();
        self.attachments.clear();
        for filename in uploaded {
            let _ = self.rest.delete_attachment(&filename).await;
        }
        self.extra_line("Attachments cancelled", Some(3));
    }

    // Assist

    async fn run_assist(&mut self, kind: AssistKind, query: &str, line: &str) {
        let limit = self.config.assist_limit;
        let guild_id = self.store.active.guild_id;
        let entries = match kind {
            AssistKind::Channels => {
                assist::assist_channels(&self.store, guild_id, query, false, limit)
            }
            AssistKind::Usernames => {
                // kick off the asynchronous member query for this prefix
                if let Some(guild_id) = guild_id {
                    if !query.is_empty() {
                        let nonce = format!("{:016x}", rand::thread_rng().gen::<u64>());
                        let _ = self
                            .gateway
                            .query_members(guild_id, query.to_owned(), nonce);
                    }
                }
                assist::assist_usernames(
                    &self.store,
                    guild_id,
                    query,
                    &self.member_query_results,
                    limit,
                )
            }
            AssistKind::Emojis => assist::assist_emojis(&self.store, guild_id, query, limit),
            AssistKind::Stickers => assist::assist_stickers(&self.store, guild_id, query, limit),
            AssistKind::ClientCommands => assist::assist_client_commands(query, limit),
            AssistKind::AppCommands => {
                let result = assist::assist_app_commands(&self.store, line, limit);
                if result.wants_autocomplete {
                    let now = Instant::now();
                    if let Some(line) = self.autocomplete.request(line.to_owned(), now) {
                        self.send_autocomplete_interaction(&line).await;
                    }
                }
                result.entries
            }
            AssistKind::Paths => assist::assist_paths(query, limit),
        };
        self.send_view(ViewEvent::AssistResults(entries));
    }

    async fn send_autocomplete_interaction(&mut self, line: &str) {
        let guild_id = self.store.active.guild_id;
        let Some(channel_id) = self.store.active.channel_id else {
            return;
        };
        let Some(session_id) = self.gateway.session_id() else {
            return;
        };
        let roles: Vec<crate::model::Role> = guild_id
            .and_then(|id| self.store.guild(id))
            .map(|g| g.roles.clone())
            .unwrap_or_default();
        let channels: Vec<crate::model::Channel> = guild_id
            .and_then(|id| self.store.guild(id))
            .map(|g| g.channels.clone())
            .unwrap_or_default();
        let commands: Vec<crate::model::AppCommand> = self
            .store
            .my_commands
            .iter()
            .chain(self.store.guild_commands.iter())
            .cloned()
            .collect();
        let permitted = self.permitted_commands(&commands, channel_id);

        let Some(parsed) = parser::parse_app_command(
            line,
            &commands,
            &permitted,
            &roles,
            &channels,
            guild_id.is_none(),
            true,
        ) else {
            return;
        };
        let nonce = format!("{}", rand::thread_rng().gen::<u64>());
        if let Err(err) = self
            .rest
            .send_interaction(
                InteractionType::Autocomplete,
                parsed.application_id,
                guild_id,
                channel_id,
                &session_id,
                &nonce,
                parsed.data,
            )
            .await
        {
            debug!(%err, "autocomplete interaction failed");
        }
    }

    // Client commands

    async fn run_client_command(&mut self, command: ClientCommand) {
        match command {
            ClientCommand::Quit => self.quit = true,
            ClientCommand::Bottom => {
                self.send_view(ViewEvent::SelectIndex(0));
                self.reached_bottom();
            }
            ClientCommand::MarkAsRead => {
                if let Some(channel_id) = self.store.active.channel_id {
                    if let Some(last) = self
                        .store
                        .read_state
                        .get(channel_id)
                        .and_then(|s| s.last_message_id)
                    {
                        self.acks.push(channel_id, last);
                    }
                }
            }
            ClientCommand::Status { status } => {
                let _ = self.gateway.update_presence(&status, None);
            }
            ClientCommand::ToggleMute => {
                if let Some(channel_id) = self.store.active.channel_id {
                    self.toggle_mute(channel_id).await;
                }
            }
            ClientCommand::ToggleThread => {
                if let Some(channel_id) = self.store.active.channel_id {
                    if self.store.find_thread(channel_id).is_some() {
                        self.toggle_thread(channel_id).await;
                    }
                }
            }
            ClientCommand::Search { query } => {
                let parsed = parser::parse_search(&query);
                if let Some(channel_id) = self.store.active.channel_id {
                    match self
                        .rest
                        .search(self.store.active.guild_id, channel_id, &parsed, 0)
                        .await
                    {
                        Ok(page) => self.extra_line(
                            &format!("Search: {} results", page.total_results),
                            Some(5),
                        ),
                        Err(err) => self.report_rest_error(&err),
                    }
                }
            }
            ClientCommand::ShowPinned => {
                if let Some(channel_id) = self.store.active.channel_id {
                    match self.rest.get_pinned(channel_id).await {
                        Ok(pinned) => {
                            self.extra_line(&format!("{} pinned messages", pinned.len()), Some(5))
                        }
                        Err(err) => self.report_rest_error(&err),
                    }
                }
            }
            ClientCommand::GenerateInvite => {
                if let Some(channel_id) = self.store.active.channel_id {
                    match self.rest.create_invite(channel_id, 86400, 0).await {
                        Ok(url) => self.extra_line(&url, None),
                        Err(err) => self.report_rest_error(&err),
                    }
                }
            }
            ClientCommand::Block { user } => {
                if let Ok(id) = user.trim_start_matches(['<', '@', '>']).parse::<u64>() {
                    if let Err(err) = self.rest.block_user(UserId(id)).await {
                        self.report_rest_error(&err);
                    }
                }
            }
            ClientCommand::Unblock { user } => {
                if let Ok(id) = user.trim_start_matches(['<', '@', '>']).parse::<u64>() {
                    if let Err(err) = self.rest.unblock_user(UserId(id)).await {
                        self.report_rest_error(&err);
                    }
                }
            }
            ClientCommand::StartCall => {
                if let Some(channel_id) = self.store.active.channel_id {
                    if self.store.is_dm(channel_id) {
                        if let Err(err) = self.rest.send_ring(channel_id, &[]).await {
                            self.report_rest_error(&err);
                        }
                        self.join_call(channel_id);
                    }
                }
            }
            ClientCommand::LeaveCall => self.leave_call().await,
            ClientCommand::ToggleCallMute => self.toggle_call_mute(),
            ClientCommand::MarkAsUnread => {
                // marks from the current selection; the renderer passes the
                // message through Action::MarkAsUnread instead
            }
            other => debug!(?other, "client command handled by the frontend"),
        }
    }

    async fn toggle_mute(&mut self, channel_id: ChannelId) {
        if self.store.is_dm(channel_id) {
            let muted = self.store.dm(channel_id).map(|d| d.muted).unwrap_or(false);
            if self.rest.set_dm_muted(channel_id, !muted).await.is_ok() {
                if let Some(dm) = self.store.dms.iter_mut().find(|d| d.id == channel_id) {
                    dm.muted = !muted;
                }
                self.send_view(ViewEvent::Tree);
            }
        } else if let Some((guild, channel)) = self.store.find_channel(channel_id) {
            let guild_id = guild.id;
            let muted = channel.muted;
            if self
                .rest
                .set_channel_muted(guild_id, channel_id, !muted)
                .await
                .is_ok()
            {
                if let Some(guild) = self.store.guild_mut(guild_id) {
                    if let Some(channel) = guild.channel_mut(channel_id) {
                        channel.muted = !muted;
                    }
                }
                self.send_view(ViewEvent::Tree);
            }
        }
    }

    // Helpers

    /// Replace `:name:` tokens with guild or standard emojis.
    fn demojize(&self, content: &str) -> String {
        let mut result = content.to_owned();
        if let Some(guild) = self.store.active.guild_id.and_then(|id| self.store.guild(id)) {
            for emoji in &guild.emojis {
                let token = format!(":{}:", emoji.name);
                if result.contains(&token) {
                    result = result.replace(&token, &format!("<:{}:{}>", emoji.name, emoji.id));
                }
            }
        }
        result
    }

    fn channel_title(&self, channel_id: ChannelId) -> String {
        if let Some(dm) = self.store.dm(channel_id) {
            return dm.derived_name();
        }
        if let Some((guild, channel)) = self.store.find_channel(channel_id) {
            return format!("#{} ({})", channel.display_name(), guild.name);
        }
        if let Some((_, thread)) = self.store.find_thread(channel_id) {
            return thread.name.clone();
        }
        "Unknown channel".to_owned()
    }

    fn report_rest_error(&mut self, err: &RestError) {
        match err {
            RestError::Network => {
                if self.gateway.state() != SessionState::Ready {
                    self.extra_line("Network error: offline", None);
                } else {
                    self.extra_line("Network error", Some(5));
                }
            }
            RestError::Unauthorized => self.extra_line("Unauthorized", None),
            other => self.extra_line(&other.to_string(), Some(5)),
        }
    }

    fn extra_line(&mut self, text: &str, timeout_secs: Option<u64>) {
        info!(text, "extra line");
        self.send_view(ViewEvent::ExtraLine {
            text: text.to_owned(),
            timeout_secs,
        });
    }

    fn persist_on_exit(&self) {
        let Some(profile) = &self.profile else {
            return;
        };
        let summaries: Vec<(ChannelId, Vec<crate::model::Summary>)> = self
            .store
            .summaries
            .iter()
            .map(|(channel_id, summaries)| (*channel_id, summaries.clone()))
            .collect();
        if let Err(err) = profile.save_summaries(&summaries) {
            debug!(?err, "could not persist summaries");
        }
        let hidden: Vec<ChannelId> = self
            .store
            .guilds
            .iter()
            .flat_map(|g| g.channels.iter())
            .filter(|c| c.hidden)
            .map(|c| c.id)
            .collect();
        if let Err(err) = profile.save_hidden_channels(&hidden) {
            debug!(?err, "could not persist hidden channels");
        }
    }

    fn send_view(&self, event: ViewEvent) {
        let _ = self.views.send(event);
    }

    /// Read-only access for the renderer side.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Who is typing in the active channel right now.
    pub fn typing_users(&self) -> &[TypingUser] {
        &self.typing_users
    }
}
