//! Per-channel message buffers.
//!
//! Messages are held newest-first. The buffer is capped; paging fetches
//! extend it at either end and live events prepend at the front.

use crate::model::{Message, MessageId, MessageUpdate, ReactionEmoji};

/// The window of loaded messages for one channel, newest first.
#[derive(Debug, Clone, Default)]
pub struct MessageBuffer {
    messages: Vec<Message>,
}

impl MessageBuffer {
    pub fn new() -> Self {
        MessageBuffer::default()
    }

    pub fn from_page(page: Vec<Message>) -> Self {
        MessageBuffer { messages: page }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn newest_id(&self) -> Option<MessageId> {
        self.messages.first().map(|m| m.id)
    }

    pub fn oldest_id(&self) -> Option<MessageId> {
        self.messages.last().map(|m| m.id)
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn index_of(&self, id: MessageId) -> Option<usize> {
        self.messages.iter().position(|m| m.id == id)
    }

    /// Index to land the selection on when entering the channel: the first
    /// message at or below the acked boundary, or the bottom.
    pub fn anchor_index(&self, last_acked: Option<MessageId>) -> usize {
        match last_acked {
            Some(acked) => self
                .messages
                .iter()
                .position(|m| m.id.0 <= acked.0)
                .unwrap_or(0),
            None => 0,
        }
    }

    /// Prepend a freshly created message, dropping the oldest entries once
    /// over `cap`. A message already present by ID is ignored; the gateway
    /// echo of an own send may race a paging fetch.
    pub fn prepend_new(&mut self, message: Message, cap: usize) {
        if self.messages.iter().any(|m| m.id == message.id) {
            return;
        }
        self.messages.insert(0, message);
        if self.messages.len() > cap {
            self.messages.truncate(cap);
        }
    }

    /// Append an older page fetched with `before=oldest_id`.
    pub fn extend_older(&mut self, page: Vec<Message>, cap: usize) {
        for message in page {
            if self.messages.iter().all(|m| m.id != message.id) {
                self.messages.push(message);
            }
        }
        if self.messages.len() > cap {
            // drop from the newest end; the user is paging backwards
            self.messages.drain(..self.messages.len() - cap);
        }
    }

    /// Prepend a newer page fetched with `after=newest_id`.
    pub fn extend_newer(&mut self, page: Vec<Message>, cap: usize) {
        // the page arrives newest-first as well
        for message in page.into_iter().rev() {
            if self.messages.iter().all(|m| m.id != message.id) {
                self.messages.insert(0, message);
            }
        }
        if self.messages.len() > cap {
            self.messages.truncate(cap);
        }
    }

    /// Apply a partial edit; returns true when the message was present.
    pub fn apply_update(&mut self, update: &MessageUpdate) -> bool {
        let Some(message) = self.messages.iter_mut().find(|m| m.id == update.id) else {
            return false;
        };
        if let Some(content) = &update.content {
            message.content = content.clone();
        }
        if update.edited_timestamp.is_some() {
            message.edited_timestamp = update.edited_timestamp;
        }
        if let Some(mention_everyone) = update.mention_everyone {
            message.mention_everyone = mention_everyone;
        }
        if let Some(mentions) = &update.mentions {
            message.mentions = mentions.clone();
        }
        if let Some(mention_roles) = &update.mention_roles {
            message.mention_roles = mention_roles.clone();
        }
        if let Some(embeds) = &update.embeds {
            message.embeds = embeds.clone();
        }
        if let Some(pinned) = update.pinned {
            message.pinned = pinned;
        }
        true
    }

    /// Remove a message, or flag it when the keep-deleted policy is on.
    /// Returns the removed copy for the deleted-message cache.
    pub fn apply_delete(&mut self, id: MessageId, keep_deleted: bool) -> Option<Message> {
        let index = self.index_of(id)?;
        if keep_deleted {
            self.messages[index].deleted = true;
            Some(self.messages[index].clone())
        } else {
            Some(self.messages.remove(index))
        }
    }

    /// Adjust a reaction bucket. `add` increments, otherwise decrements and
    /// drops the bucket at zero. `me` tracks the logged-in user's reaction.
    pub fn apply_reaction(&mut self, id: MessageId, emoji: &ReactionEmoji, add: bool, me: bool) {
        let Some(message) = self.messages.iter_mut().find(|m| m.id == id) else {
            return;
        };
        let existing = message.reactions.iter_mut().find(|r| &r.emoji == emoji);
        match (existing, add) {
            (Some(reaction), true) => {
                reaction.count += 1;
                reaction.me |= me;
            }
            (Some(reaction), false) => {
                reaction.count = reaction.count.saturating_sub(1);
                if me {
                    reaction.me = false;
                }
                if reaction.count == 0 {
                    message.reactions.retain(|r| &r.emoji != emoji);
                }
            }
            (None, true) => message.reactions.push(crate::model::MessageReaction {
                count: 1,
                me,
                emoji: emoji.clone(),
            }),
            (None, false) => {}
        }
    }

    /// Adjust a poll answer tally.
    pub fn apply_poll_vote(&mut self, id: MessageId, answer_id: u64, add: bool, me: bool) {
        let Some(poll) = self
            .messages
            .iter_mut()
            .find(|m| m.id == id)
            .and_then(|m| m.poll.as_mut())
        else {
            return;
        };
        if let Some(answer) = poll.answers.iter_mut().find(|a| a.id == answer_id) {
            if add {
                answer.count += 1;
                answer.me_voted |= me;
            } else {
                answer.count = answer.count.saturating_sub(1);
                if me {
                    answer.me_voted = false;
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) fn test_message(id: u64, channel: u64, author: u64, content: &str) -> Message {
    serde_json::from_value(serde_json::json!({
        "id": id.to_string(),
        "channel_id": channel.to_string(),
        "content": content,
        "timestamp": "2024-05-04T12:30:00+00:00",
        "author": {"id": author.to_string(), "username": format!("user{}", author)},
    }))
    .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepend_caps_and_dedups() {
        let mut buffer = MessageBuffer::new();
        for id in 1..=5 {
            buffer.prepend_new(test_message(id, 1, 1, "m"), 3);
        }
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.newest_id(), Some(MessageId(5)));
        assert_eq!(buffer.oldest_id(), Some(MessageId(3)));

        // duplicate echo is suppressed
        buffer.prepend_new(test_message(5, 1, 1, "again"), 3);
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.messages()[0].content, "m");
    }

    #[test]
    fn paging_keeps_buffer_contiguous() {
        let mut buffer =
            MessageBuffer::from_page(vec![test_message(30, 1, 1, ""), test_message(20, 1, 1, "")]);
        buffer.extend_older(vec![test_message(10, 1, 1, ""), test_message(5, 1, 1, "")], 10);
        assert_eq!(buffer.oldest_id(), Some(MessageId(5)));

        buffer.extend_newer(vec![test_message(50, 1, 1, ""), test_message(40, 1, 1, "")], 10);
        assert_eq!(buffer.newest_id(), Some(MessageId(50)));
        let ids: Vec<u64> = buffer.messages().iter().map(|m| m.id.0).collect();
        assert_eq!(ids, vec![50, 40, 30, 20, 10, 5]);
    }

    #[test]
    fn update_and_delete() {
        let mut buffer = MessageBuffer::from_page(vec![test_message(10, 1, 1, "original")]);
        let update: MessageUpdate = serde_json::from_value(serde_json::json!({
            "id": "10",
            "channel_id": "1",
            "content": "edited",
            "edited_timestamp": "2024-05-04T13:00:00+00:00",
        }))
        .unwrap();
        assert!(buffer.apply_update(&update));
        assert_eq!(buffer.messages()[0].content, "edited");
        assert!(buffer.messages()[0].edited());

        // flagged, not dropped, under keep-deleted
        buffer.apply_delete(MessageId(10), true);
        assert_eq!(buffer.len(), 1);
        assert!(buffer.messages()[0].deleted);

        // dropped without keep-deleted
        buffer.apply_delete(MessageId(10), false);
        assert!(buffer.is_empty());
    }

    #[test]
    fn reactions_lifecycle() {
        let mut buffer = MessageBuffer::from_page(vec![test_message(10, 1, 1, "")]);
        let emoji = ReactionEmoji::Unicode { name: "🦀".into() };
        buffer.apply_reaction(MessageId(10), &emoji, true, false);
        buffer.apply_reaction(MessageId(10), &emoji, true, true);
        let reaction = &buffer.messages()[0].reactions[0];
        assert_eq!(reaction.count, 2);
        assert!(reaction.me);

        buffer.apply_reaction(MessageId(10), &emoji, false, true);
        let reaction = &buffer.messages()[0].reactions[0];
        assert_eq!(reaction.count, 1);
        assert!(!reaction.me);

        buffer.apply_reaction(MessageId(10), &emoji, false, false);
        assert!(buffer.messages()[0].reactions.is_empty());
    }

    #[test]
    fn anchor_lands_on_last_acked() {
        let buffer = MessageBuffer::from_page(vec![
            test_message(100, 1, 1, ""),
            test_message(90, 1, 1, ""),
            test_message(80, 1, 1, ""),
            test_message(70, 1, 1, ""),
        ]);
        assert_eq!(buffer.anchor_index(Some(MessageId(80))), 2);
        assert_eq!(buffer.anchor_index(Some(MessageId(85))), 2);
        assert_eq!(buffer.anchor_index(None), 0);
        assert_eq!(buffer.anchor_index(Some(MessageId(60))), 0);
    }
}
