//! Per-channel read state: what the user has seen, and where the unreads
//! line sits.

use std::collections::HashMap;

use crate::model::{ChannelId, MessageId};

/// Read bookkeeping for one channel.
///
/// Invariant: `last_acked_message_id <= last_message_id`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadState {
    pub last_message_id: Option<MessageId>,
    pub last_acked_message_id: Option<MessageId>,
    /// Message IDs that mentioned the user and are not yet seen.
    pub mentions: Vec<MessageId>,
    /// Boundary above which messages count as already seen, kept stable
    /// while the user catches up; cleared once they reach the bottom.
    pub last_acked_unreads_line: Option<MessageId>,
}

impl ReadState {
    pub fn unread(&self) -> bool {
        match (self.last_acked_message_id, self.last_message_id) {
            (_, None) => false,
            (None, Some(_)) => true,
            (Some(acked), Some(last)) => acked < last,
        }
    }

    pub fn has_mentions(&self) -> bool {
        !self.mentions.is_empty()
    }
}

/// The read-state map for every known channel.
#[derive(Debug, Default)]
pub struct ReadStateMap {
    channels: HashMap<ChannelId, ReadState>,
}

impl ReadStateMap {
    pub fn get(&self, channel_id: ChannelId) -> Option<&ReadState> {
        self.channels.get(&channel_id)
    }

    pub fn entry(&mut self, channel_id: ChannelId) -> &mut ReadState {
        self.channels.entry(channel_id).or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ChannelId, &ReadState)> {
        self.channels.iter()
    }

    /// Seed one channel from READY data. The unreads line anchors at the
    /// acked boundary when the channel has newer messages.
    pub fn seed(
        &mut self,
        channel_id: ChannelId,
        last_message_id: Option<MessageId>,
        last_acked: Option<MessageId>,
        mentioned: bool,
    ) {
        let mut state = ReadState {
            last_message_id,
            last_acked_message_id: last_acked,
            mentions: if mentioned {
                // READY reports only a count; the concrete IDs arrive live
                vec![MessageId(u64::MAX)]
            } else {
                Vec::new()
            },
            last_acked_unreads_line: None,
        };
        if state.unread() {
            state.last_acked_unreads_line = state.last_acked_message_id;
        }
        self.channels.insert(channel_id, state);
    }

    /// A new message arrived in the channel.
    pub fn advance_last(&mut self, channel_id: ChannelId, message_id: MessageId) {
        let state = self.entry(channel_id);
        if state.last_message_id.map(|m| m < message_id).unwrap_or(true) {
            state.last_message_id = Some(message_id);
        }
    }

    /// The user (here or on another device) acked up to `message_id`.
    pub fn apply_ack(&mut self, channel_id: ChannelId, message_id: MessageId) {
        let state = self.entry(channel_id);
        // never ack past the newest known message
        let acked = match state.last_message_id {
            Some(last) if message_id > last => last,
            _ => message_id,
        };
        if state.last_acked_message_id.map(|m| m < acked).unwrap_or(true) {
            state.last_acked_message_id = Some(acked);
        }
        if state.last_message_id.map(|l| acked >= l).unwrap_or(false) {
            // fully read, including the sentinel mention from READY
            state.mentions.clear();
        } else {
            state.mentions.retain(|m| *m > acked);
        }
    }

    /// Record a mention for the unread marker and notification logic.
    pub fn add_mention(&mut self, channel_id: ChannelId, message_id: MessageId) {
        let state = self.entry(channel_id);
        if !state.mentions.contains(&message_id) {
            state.mentions.push(message_id);
        }
    }

    /// Drop a mention whose message was deleted. Returns true when the
    /// channel had that mention outstanding (a ghost ping).
    pub fn remove_mention(&mut self, channel_id: ChannelId, message_id: MessageId) -> bool {
        let state = self.entry(channel_id);
        let had = state.mentions.contains(&message_id);
        state.mentions.retain(|m| *m != message_id);
        had
    }

    /// Roll the message counter back after a delete of the newest message.
    pub fn retreat_last(&mut self, channel_id: ChannelId, new_last: Option<MessageId>) {
        let state = self.entry(channel_id);
        state.last_message_id = new_last;
        if let (Some(acked), Some(last)) = (state.last_acked_message_id, new_last) {
            if acked > last {
                state.last_acked_message_id = Some(last);
            }
        }
    }

    /// Force a channel unread from a manual mark-as-unread.
    pub fn mark_unread_before(&mut self, channel_id: ChannelId, message_id: MessageId) {
        let state = self.entry(channel_id);
        state.last_acked_message_id = Some(MessageId(message_id.0.saturating_sub(1)));
        state.last_acked_unreads_line = state.last_acked_message_id;
    }

    /// Clear the unreads line once the user reaches the bottom.
    pub fn clear_unreads_line(&mut self, channel_id: ChannelId) {
        self.entry(channel_id).last_acked_unreads_line = None;
    }

    /// Check the `acked <= last` invariant across all channels.
    #[cfg(test)]
    pub fn invariant_holds(&self) -> bool {
        self.channels.values().all(|s| {
            match (s.last_acked_message_id, s.last_message_id) {
                (Some(acked), Some(last)) => acked <= last,
                (Some(_), None) => false,
                _ => true,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unread_iff_acked_below_last() {
        let mut map = ReadStateMap::default();
        map.seed(ChannelId(1), Some(MessageId(100)), Some(MessageId(80)), false);
        assert!(map.get(ChannelId(1)).unwrap().unread());
        assert_eq!(
            map.get(ChannelId(1)).unwrap().last_acked_unreads_line,
            Some(MessageId(80))
        );

        map.apply_ack(ChannelId(1), MessageId(100));
        assert!(!map.get(ChannelId(1)).unwrap().unread());
        assert!(map.invariant_holds());
    }

    #[test]
    fn ack_never_exceeds_last_message() {
        let mut map = ReadStateMap::default();
        map.seed(ChannelId(1), Some(MessageId(100)), None, false);
        map.apply_ack(ChannelId(1), MessageId(500));
        let state = map.get(ChannelId(1)).unwrap();
        assert_eq!(state.last_acked_message_id, Some(MessageId(100)));
        assert!(map.invariant_holds());
    }

    #[test]
    fn mentions_clear_on_ack_and_delete() {
        let mut map = ReadStateMap::default();
        map.advance_last(ChannelId(1), MessageId(500));
        map.add_mention(ChannelId(1), MessageId(500));
        assert!(map.get(ChannelId(1)).unwrap().has_mentions());

        // ghost ping removal
        assert!(map.remove_mention(ChannelId(1), MessageId(500)));
        assert!(!map.get(ChannelId(1)).unwrap().has_mentions());
        assert!(!map.remove_mention(ChannelId(1), MessageId(500)));

        map.advance_last(ChannelId(1), MessageId(600));
        map.add_mention(ChannelId(1), MessageId(600));
        map.apply_ack(ChannelId(1), MessageId(600));
        assert!(!map.get(ChannelId(1)).unwrap().has_mentions());
    }

    #[test]
    fn manual_mark_unread() {
        let mut map = ReadStateMap::default();
        map.seed(ChannelId(1), Some(MessageId(100)), Some(MessageId(100)), false);
        map.mark_unread_before(ChannelId(1), MessageId(100));
        assert!(map.get(ChannelId(1)).unwrap().unread());
        assert!(map.invariant_holds());
    }
}
