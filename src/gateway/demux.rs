//! Demultiplexes dispatch events into typed, bounded queues drained by the
//! controller tick.
//!
//! Producers never block on a full queue for more than a short grace; a
//! queue that stays full signals a stalled consumer, and the session is
//! marked resumable to force rehydration instead of unbounded buffering.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::warn;

use crate::model::Event;

/// How long a producer may wait on a full queue before declaring overflow.
const ENQUEUE_GRACE: Duration = Duration::from_millis(100);

/// Capacity for the busiest queue (messages); the rest scale down.
const MESSAGE_QUEUE_CAP: usize = 512;
const SIDE_QUEUE_CAP: usize = 128;

/// The drain side, held by the controller. Field order documents the
/// required drain order.
pub struct EventQueues {
    pub ready: mpsc::Receiver<Event>,
    pub messages: mpsc::Receiver<Event>,
    pub typing: mpsc::Receiver<Event>,
    pub summaries: mpsc::Receiver<Event>,
    pub acks: mpsc::Receiver<Event>,
    pub threads: mpsc::Receiver<Event>,
    pub calls: mpsc::Receiver<Event>,
    pub voice: mpsc::Receiver<Event>,
    pub presence: mpsc::Receiver<Event>,
    pub user: mpsc::Receiver<Event>,
    pub guild: mpsc::Receiver<Event>,
    pub members: mpsc::Receiver<Event>,
    pub proto: mpsc::Receiver<Event>,
    pub autocomplete: mpsc::Receiver<Event>,
}

/// The enqueue side, held by the gateway receiver.
pub struct EventRouter {
    ready: mpsc::Sender<Event>,
    messages: mpsc::Sender<Event>,
    typing: mpsc::Sender<Event>,
    summaries: mpsc::Sender<Event>,
    acks: mpsc::Sender<Event>,
    threads: mpsc::Sender<Event>,
    calls: mpsc::Sender<Event>,
    voice: mpsc::Sender<Event>,
    presence: mpsc::Sender<Event>,
    user: mpsc::Sender<Event>,
    guild: mpsc::Sender<Event>,
    members: mpsc::Sender<Event>,
    proto: mpsc::Sender<Event>,
    autocomplete: mpsc::Sender<Event>,
}

/// Create the queue pair.
pub fn queues() -> (EventRouter, EventQueues) {
    let (ready_tx, ready_rx) = mpsc::channel(4);
    let (messages_tx, messages_rx) = mpsc::channel(MESSAGE_QUEUE_CAP);
    let (typing_tx, typing_rx) = mpsc::channel(SIDE_QUEUE_CAP);
    let (summaries_tx, summaries_rx) = mpsc::channel(SIDE_QUEUE_CAP);
    let (acks_tx, acks_rx) = mpsc::channel(SIDE_QUEUE_CAP);
    let (threads_tx, threads_rx) = mpsc::channel(SIDE_QUEUE_CAP);
    let (calls_tx, calls_rx) = mpsc::channel(SIDE_QUEUE_CAP);
    let (voice_tx, voice_rx) = mpsc::channel(SIDE_QUEUE_CAP);
    let (presence_tx, presence_rx) = mpsc::channel(MESSAGE_QUEUE_CAP);
    let (user_tx, user_rx) = mpsc::channel(SIDE_QUEUE_CAP);
    let (guild_tx, guild_rx) = mpsc::channel(SIDE_QUEUE_CAP);
    let (members_tx, members_rx) = mpsc::channel(SIDE_QUEUE_CAP);
    let (proto_tx, proto_rx) = mpsc::channel(SIDE_QUEUE_CAP);
    let (autocomplete_tx, autocomplete_rx) = mpsc::channel(SIDE_QUEUE_CAP);

    (
        EventRouter {
            ready: ready_tx,
            messages: messages_tx,
            typing: typing_tx,
            summaries: summaries_tx,
            acks: acks_tx,
            threads: threads_tx,
            calls: calls_tx,
            voice: voice_tx,
            presence: presence_tx,
            user: user_tx,
            guild: guild_tx,
            members: members_tx,
            proto: proto_tx,
            autocomplete: autocomplete_tx,
        },
        EventQueues {
            ready: ready_rx,
            messages: messages_rx,
            typing: typing_rx,
            summaries: summaries_rx,
            acks: acks_rx,
            threads: threads_rx,
            calls: calls_rx,
            voice: voice_rx,
            presence: presence_rx,
            user: user_rx,
            guild: guild_rx,
            members: members_rx,
            proto: proto_rx,
            autocomplete: autocomplete_rx,
        },
    )
}

impl EventRouter {
    fn queue_for(&self, event: &Event) -> Option<&mpsc::Sender<Event>> {
        Some(match event {
            Event::Ready(_) | Event::ReadySupplemental(_) => &self.ready,

            Event::MessageCreate(_)
            | Event::MessageUpdate(_)
            | Event::MessageDelete { .. }
            | Event::MessageReactionAdd(_)
            | Event::MessageReactionRemove(_)
            | Event::MessagePollVoteAdd(_)
            | Event::MessagePollVoteRemove(_) => &self.messages,

            Event::TypingStart { .. } => &self.typing,
            Event::ConversationSummaryUpdate(_) => &self.summaries,
            Event::MessageAck { .. } => &self.acks,

            Event::ThreadCreate(_) | Event::ThreadUpdate(_) | Event::ThreadDelete { .. } => {
                &self.threads
            }

            Event::CallCreate(_) | Event::CallUpdate(_) | Event::CallDelete { .. } => &self.calls,

            Event::VoiceStateUpdate(_) | Event::VoiceServerUpdate(_) => &self.voice,

            Event::PresenceUpdate(_) => &self.presence,

            Event::UserUpdate(_)
            | Event::UserGuildSettingsUpdate(_)
            | Event::RelationshipAdd(_)
            | Event::RelationshipRemove(_) => &self.user,

            Event::GuildCreate(_)
            | Event::GuildUpdate(_)
            | Event::GuildDelete { .. }
            | Event::ChannelCreate(_)
            | Event::ChannelUpdate(_)
            | Event::ChannelDelete(_)
            | Event::GuildRoleCreate { .. }
            | Event::GuildRoleUpdate { .. }
            | Event::GuildRoleDelete { .. }
            | Event::GuildEmojisUpdate { .. } => &self.guild,

            Event::GuildMembersChunk(_) | Event::GuildMemberListUpdate(_) => &self.members,

            Event::UserSettingsProtoUpdate(_) => &self.proto,

            Event::ApplicationCommandAutocompleteResponse(_) => &self.autocomplete,

            Event::Resumed(_) | Event::Unknown => return None,
        })
    }

    /// Route an event into its queue. Returns false on overflow, meaning
    /// the session should be marked resumable.
    pub async fn route(&self, event: Event) -> bool {
        let Some(queue) = self.queue_for(&event) else {
            return true;
        };
        match queue.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => false,
            Err(mpsc::error::TrySendError::Full(event)) => {
                match tokio::time::timeout(ENQUEUE_GRACE, queue.send(event)).await {
                    Ok(Ok(())) => true,
                    _ => {
                        warn!("event queue overflow, forcing rehydration");
                        false
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn typing_event() -> Event {
        serde_json::from_value(serde_json::json!({
            "t": "TYPING_START",
            "d": {"channel_id": "1", "user_id": "2", "timestamp": 3},
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn routes_by_category() {
        let (router, mut queues) = queues();
        assert!(router.route(typing_event()).await);
        assert!(matches!(
            queues.typing.try_recv().unwrap(),
            Event::TypingStart { .. }
        ));
        assert!(queues.messages.try_recv().is_err());
    }

    #[tokio::test]
    async fn unknown_events_are_dropped_quietly() {
        let (router, mut queues) = queues();
        assert!(router.route(Event::Unknown).await);
        assert!(queues.typing.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn overflow_reports_after_grace() {
        let (router, queues) = queues();
        // fill the typing queue and never drain it
        for _ in 0..SIDE_QUEUE_CAP {
            assert!(router.route(typing_event()).await);
        }
        let overflowed = router.route(typing_event());
        tokio::pin!(overflowed);
        // auto-advancing test clock passes the grace period
        assert!(!overflowed.await);
        drop(queues);
    }
}
