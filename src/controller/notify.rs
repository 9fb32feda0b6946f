//! Unread/ping evaluation, desktop notification bookkeeping, and the ack
//! throttler.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::model::{ChannelId, Message, MessageId};
use crate::state::Store;

use super::actions::Notifier;

/// Why a message pings the user, if it does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingReason {
    Everyone,
    Role,
    Direct,
    DirectMessage,
}

/// Evaluate the ping conditions for a message that arrived outside the
/// active channel. Mutes (guild, category, channel, DM) and local hiding
/// suppress everything.
pub fn evaluate_ping(store: &Store, message: &Message) -> Option<PingReason> {
    let channel_id = message.channel_id;
    if store.effectively_muted(channel_id) {
        return None;
    }
    let Some(my_id) = store.my_id() else {
        return None;
    };
    if message.author.id == my_id {
        return None;
    }

    if store.is_dm(channel_id) {
        return Some(PingReason::DirectMessage);
    }

    if message.mentions.iter().any(|u| u.id == my_id) {
        return Some(PingReason::Direct);
    }

    let guild = message.guild_id.and_then(|id| store.guild(id));
    if let Some(guild) = guild {
        if message.mention_everyone && !guild.suppress_everyone {
            return Some(PingReason::Everyone);
        }
        if !guild.suppress_roles {
            let my_roles = store.my_roles(guild.id);
            if message.mentions_any_role(&my_roles) {
                return Some(PingReason::Role);
            }
        }
    }
    None
}

/// Outstanding desktop notifications, deduplicated per channel.
#[derive(Default)]
pub struct NotificationMap {
    /// One handle per channel when remove-previous is enabled, several
    /// otherwise.
    outstanding: HashMap<ChannelId, Vec<u64>>,
    remove_previous: bool,
}

impl NotificationMap {
    pub fn new(remove_previous: bool) -> NotificationMap {
        NotificationMap {
            outstanding: HashMap::new(),
            remove_previous,
        }
    }

    /// Show a notification for a message, retracting the channel's
    /// previous one when deduplication is on.
    pub fn notify(
        &mut self,
        notifier: &mut dyn Notifier,
        channel_id: ChannelId,
        title: &str,
        body: &str,
    ) {
        if self.remove_previous {
            if let Some(handles) = self.outstanding.remove(&channel_id) {
                for handle in handles {
                    notifier.retract(handle);
                }
            }
        }
        let handle = notifier.notify(channel_id, title, body);
        self.outstanding.entry(channel_id).or_default().push(handle);
    }

    /// Retract everything outstanding for a channel (ghost ping, channel
    /// opened).
    pub fn retract_channel(&mut self, notifier: &mut dyn Notifier, channel_id: ChannelId) {
        if let Some(handles) = self.outstanding.remove(&channel_id) {
            for handle in handles {
                notifier.retract(handle);
            }
        }
    }
}

/// Pending acks, coalesced and flushed on a throttle interval.
pub struct AckThrottler {
    pending: Vec<(ChannelId, MessageId)>,
    interval: Duration,
    last_flush: Option<Instant>,
}

/// What the throttler wants sent, decided at flush time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckFlush {
    Single(ChannelId, MessageId),
    Bulk(Vec<(ChannelId, MessageId)>),
}

impl AckThrottler {
    /// `interval` is clamped to at least 3 seconds.
    pub fn new(interval: Duration) -> AckThrottler {
        AckThrottler {
            pending: Vec::new(),
            interval: interval.max(Duration::from_secs(3)),
            last_flush: None,
        }
    }

    /// Queue an ack. A newer ack for the same channel replaces the old one
    /// in place, preserving insertion order.
    pub fn push(&mut self, channel_id: ChannelId, message_id: MessageId) {
        match self.pending.iter_mut().find(|(c, _)| *c == channel_id) {
            Some(entry) => {
                if entry.1 < message_id {
                    entry.1 = message_id;
                }
            }
            None => self.pending.push((channel_id, message_id)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Take the pending set when the throttle window has elapsed.
    pub fn flush(&mut self, now: Instant) -> Option<AckFlush> {
        if self.pending.is_empty() {
            return None;
        }
        if let Some(last) = self.last_flush {
            if now.duration_since(last) < self.interval {
                return None;
            }
        }
        self.last_flush = Some(now);
        let pending = std::mem::take(&mut self.pending);
        if pending.len() == 1 {
            let (channel_id, message_id) = pending[0];
            Some(AckFlush::Single(channel_id, message_id))
        } else {
            Some(AckFlush::Bulk(pending))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingNotifier {
        shown: Vec<(ChannelId, u64)>,
        retracted: Vec<u64>,
        next: u64,
    }

    impl Notifier for RecordingNotifier {
        fn notify(&mut self, channel_id: ChannelId, _title: &str, _body: &str) -> u64 {
            self.next += 1;
            self.shown.push((channel_id, self.next));
            self.next
        }
        fn retract(&mut self, handle: u64) {
            self.retracted.push(handle);
        }
    }

    #[test]
    fn remove_previous_dedups_per_channel() {
        let mut notifier = RecordingNotifier {
            shown: vec![],
            retracted: vec![],
            next: 0,
        };
        let mut map = NotificationMap::new(true);
        map.notify(&mut notifier, ChannelId(1), "a", "b");
        map.notify(&mut notifier, ChannelId(1), "c", "d");
        assert_eq!(notifier.retracted, vec![1]);

        map.retract_channel(&mut notifier, ChannelId(1));
        assert_eq!(notifier.retracted, vec![1, 2]);
        // nothing left to retract
        map.retract_channel(&mut notifier, ChannelId(1));
        assert_eq!(notifier.retracted.len(), 2);
    }

    #[test]
    fn ack_throttler_coalesces_and_respects_window() {
        let mut throttler = AckThrottler::new(Duration::from_secs(3));
        let start = Instant::now();

        throttler.push(ChannelId(1), MessageId(10));
        // first flush is immediate (window long expired)
        assert_eq!(
            throttler.flush(start),
            Some(AckFlush::Single(ChannelId(1), MessageId(10)))
        );

        throttler.push(ChannelId(1), MessageId(20));
        throttler.push(ChannelId(2), MessageId(30));
        throttler.push(ChannelId(1), MessageId(25));
        // inside the window: held back
        assert_eq!(throttler.flush(start + Duration::from_secs(1)), None);
        // after the window: one bulk with the newest per channel
        assert_eq!(
            throttler.flush(start + Duration::from_secs(4)),
            Some(AckFlush::Bulk(vec![
                (ChannelId(1), MessageId(25)),
                (ChannelId(2), MessageId(30)),
            ]))
        );
        assert!(throttler.is_empty());
    }

    #[test]
    fn ack_interval_clamps_to_three_seconds() {
        let throttler = AckThrottler::new(Duration::from_millis(100));
        assert_eq!(throttler.interval, Duration::from_secs(3));
    }

    fn store_with_dm() -> Store {
        let mut store = Store::new(false, 100, 4);
        store.ingest_ready(
            serde_json::from_value(serde_json::json!({
                "v": 9,
                "session_id": "s",
                "user": {"id": "1", "username": "me"},
                "guilds": [],
                "private_channels": [
                    {"id": "300", "type": 1, "recipients": [{"id": "5", "username": "f"}]},
                ],
                "users": [],
                "read_state": {"entries": []},
                "user_guild_settings": {"entries": []},
                "relationships": [],
            }))
            .unwrap(),
        );
        store
    }

    fn dm_message(id: u64, author: u64) -> Message {
        serde_json::from_value(serde_json::json!({
            "id": id.to_string(),
            "channel_id": "300",
            "content": "hi",
            "timestamp": "2024-05-04T12:30:00+00:00",
            "author": {"id": author.to_string(), "username": "f"},
        }))
        .unwrap()
    }

    #[test]
    fn dms_always_ping_unless_muted() {
        let mut store = store_with_dm();
        let message = dm_message(10, 5);
        assert_eq!(
            evaluate_ping(&store, &message),
            Some(PingReason::DirectMessage)
        );

        // own messages never ping
        assert_eq!(evaluate_ping(&store, &dm_message(11, 1)), None);

        store.dms[0].muted = true;
        assert_eq!(evaluate_ping(&store, &message), None);
    }
}
