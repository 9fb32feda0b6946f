//! Bounded client-side caches: member roles, channel tabs, deleted messages.

use std::collections::{HashMap, VecDeque};

use crate::model::{ChannelId, GuildId, Message, MessageId, RoleId, UserId};

/// Per-guild cap on cached member role sets.
pub const MEMBER_ROLE_CAP: usize = 50;

/// Cached role information for one member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRoles {
    pub user_id: UserId,
    pub roles: Vec<RoleId>,
    /// Color of the member's highest colored role, for rendering.
    pub primary_role_color: Option<u32>,
}

/// FIFO-bounded cache of member role sets, keyed by guild.
#[derive(Debug, Default)]
pub struct MemberRoleCache {
    guilds: HashMap<GuildId, VecDeque<MemberRoles>>,
}

impl MemberRoleCache {
    pub fn get(&self, guild_id: GuildId, user_id: UserId) -> Option<&MemberRoles> {
        self.guilds
            .get(&guild_id)?
            .iter()
            .find(|m| m.user_id == user_id)
    }

    pub fn contains(&self, guild_id: GuildId, user_id: UserId) -> bool {
        self.get(guild_id, user_id).is_some()
    }

    /// Insert or refresh an entry, evicting the oldest once over the cap.
    pub fn insert(&mut self, guild_id: GuildId, entry: MemberRoles) {
        let entries = self.guilds.entry(guild_id).or_default();
        if let Some(position) = entries.iter().position(|m| m.user_id == entry.user_id) {
            entries[position] = entry;
            return;
        }
        entries.push_back(entry);
        while entries.len() > MEMBER_ROLE_CAP {
            entries.pop_front();
        }
    }

    pub fn len(&self, guild_id: GuildId) -> usize {
        self.guilds.get(&guild_id).map(VecDeque::len).unwrap_or(0)
    }

    /// Members of a page whose roles are not cached yet.
    pub fn missing<'a>(
        &self,
        guild_id: GuildId,
        user_ids: impl Iterator<Item = &'a UserId>,
    ) -> Vec<UserId> {
        let mut missing: Vec<UserId> = user_ids
            .filter(|id| !self.contains(guild_id, **id))
            .copied()
            .collect();
        missing.sort_unstable();
        missing.dedup();
        missing
    }
}

/// One cached channel tab: its message window and pin status.
#[derive(Debug, Clone)]
pub struct TabEntry {
    pub channel_id: ChannelId,
    pub messages: Vec<Message>,
    pub pinned: bool,
}

/// Recently visited channels with their loaded message windows.
///
/// Pinned entries are never evicted except by explicit unpin.
#[derive(Debug, Default)]
pub struct ChannelCache {
    entries: Vec<TabEntry>,
    limit: usize,
}

impl ChannelCache {
    pub fn new(limit: usize) -> Self {
        ChannelCache {
            entries: Vec::new(),
            limit,
        }
    }

    pub fn entries(&self) -> &[TabEntry] {
        &self.entries
    }

    pub fn get(&self, channel_id: ChannelId) -> Option<&TabEntry> {
        self.entries.iter().find(|e| e.channel_id == channel_id)
    }

    pub fn get_mut(&mut self, channel_id: ChannelId) -> Option<&mut TabEntry> {
        self.entries.iter_mut().find(|e| e.channel_id == channel_id)
    }

    /// Store a channel's window, replacing any previous entry. Returns
    /// false when the cache is full of pinned entries and cannot take it.
    pub fn store(&mut self, channel_id: ChannelId, messages: Vec<Message>) -> bool {
        if let Some(entry) = self.get_mut(channel_id) {
            entry.messages = messages;
            return true;
        }
        if self.entries.len() >= self.limit {
            // evict the oldest unpinned entry
            match self.entries.iter().position(|e| !e.pinned) {
                Some(position) => {
                    self.entries.remove(position);
                }
                None => return false,
            }
        }
        self.entries.push(TabEntry {
            channel_id,
            messages,
            pinned: false,
        });
        true
    }

    /// Remove and return a cached window for reuse.
    pub fn take(&mut self, channel_id: ChannelId) -> Option<Vec<Message>> {
        // pinned tabs keep their place; hand out a copy
        let position = self.entries.iter().position(|e| e.channel_id == channel_id)?;
        if self.entries[position].pinned {
            Some(self.entries[position].messages.clone())
        } else {
            Some(self.entries.remove(position).messages)
        }
    }

    pub fn set_pinned(&mut self, channel_id: ChannelId, pinned: bool) -> bool {
        match self.get_mut(channel_id) {
            Some(entry) => {
                entry.pinned = pinned;
                true
            }
            None => false,
        }
    }

    /// Update the cached copy when a live event touches a cached channel.
    pub fn with_messages<F: FnOnce(&mut Vec<Message>)>(
        &mut self,
        channel_id: ChannelId,
        f: F,
    ) -> bool {
        match self.get_mut(channel_id) {
            Some(entry) => {
                f(&mut entry.messages);
                true
            }
            None => false,
        }
    }
}

/// Per-channel bounded cache of deleted messages.
#[derive(Debug, Default)]
pub struct DeletedCache {
    channels: HashMap<ChannelId, VecDeque<Message>>,
    cap: usize,
}

impl DeletedCache {
    pub fn new(cap: usize) -> Self {
        DeletedCache {
            channels: HashMap::new(),
            cap,
        }
    }

    pub fn push(&mut self, channel_id: ChannelId, mut message: Message) {
        message.deleted = true;
        let entries = self.channels.entry(channel_id).or_default();
        if entries.iter().any(|m| m.id == message.id) {
            return;
        }
        entries.push_back(message);
        while entries.len() > self.cap {
            entries.pop_front();
        }
    }

    pub fn for_channel(&self, channel_id: ChannelId) -> impl Iterator<Item = &Message> + '_ {
        self.channels.get(&channel_id).into_iter().flatten()
    }

    /// Merge cached deletions into a freshly loaded page, newest-first,
    /// restoring them at their snowflake position.
    pub fn restore_into(&self, channel_id: ChannelId, page: &mut Vec<Message>) {
        let Some(deleted) = self.channels.get(&channel_id) else {
            return;
        };
        let oldest_loaded = page.last().map(|m| m.id).unwrap_or(MessageId(0));
        for message in deleted {
            if page.iter().any(|m| m.id == message.id) || message.id < oldest_loaded {
                continue;
            }
            let position = page
                .iter()
                .position(|m| m.id < message.id)
                .unwrap_or(page.len());
            page.insert(position, message.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::state::messages::test_message;

    use super::*;

    #[test]
    fn member_role_cache_is_fifo_bounded() {
        let mut cache = MemberRoleCache::default();
        let guild = GuildId(1);
        for id in 0..60u64 {
            cache.insert(
                guild,
                MemberRoles {
                    user_id: UserId(id),
                    roles: vec![],
                    primary_role_color: None,
                },
            );
        }
        assert_eq!(cache.len(guild), MEMBER_ROLE_CAP);
        // the ten oldest fell out
        assert!(!cache.contains(guild, UserId(0)));
        assert!(!cache.contains(guild, UserId(9)));
        assert!(cache.contains(guild, UserId(10)));
        assert!(cache.contains(guild, UserId(59)));
    }

    #[test]
    fn member_role_refresh_does_not_duplicate() {
        let mut cache = MemberRoleCache::default();
        let guild = GuildId(1);
        for _ in 0..3 {
            cache.insert(
                guild,
                MemberRoles {
                    user_id: UserId(7),
                    roles: vec![RoleId(1)],
                    primary_role_color: Some(0xFF0000),
                },
            );
        }
        assert_eq!(cache.len(guild), 1);
    }

    #[test]
    fn tab_cache_pinned_entries_survive_eviction() {
        let mut tabs = ChannelCache::new(2);
        assert!(tabs.store(ChannelId(1), vec![test_message(1, 1, 1, "one")]));
        assert!(tabs.set_pinned(ChannelId(1), true));
        assert!(tabs.store(ChannelId(2), vec![]));
        assert!(tabs.store(ChannelId(3), vec![]));
        // channel 2 was evicted, pinned channel 1 survived
        assert!(tabs.get(ChannelId(1)).is_some());
        assert!(tabs.get(ChannelId(2)).is_none());
        assert!(tabs.get(ChannelId(3)).is_some());

        // a cache full of pinned entries refuses new tabs
        tabs.set_pinned(ChannelId(3), true);
        assert!(!tabs.store(ChannelId(4), vec![]));
    }

    #[test]
    fn pinned_tab_take_leaves_copy_intact() {
        let mut tabs = ChannelCache::new(2);
        tabs.store(ChannelId(1), vec![test_message(5, 1, 1, "kept")]);
        tabs.set_pinned(ChannelId(1), true);

        let before: Vec<u64> = tabs.get(ChannelId(1)).unwrap().messages.iter().map(|m| m.id.0).collect();
        let taken = tabs.take(ChannelId(1)).unwrap();
        let after: Vec<u64> = tabs.get(ChannelId(1)).unwrap().messages.iter().map(|m| m.id.0).collect();
        assert_eq!(before, after);
        assert_eq!(taken.len(), 1);
    }

    #[test]
    fn deleted_cache_restores_in_order() {
        let mut deleted = DeletedCache::new(10);
        deleted.push(ChannelId(1), test_message(25, 1, 1, "gone"));

        let mut page = vec![
            test_message(30, 1, 1, ""),
            test_message(20, 1, 1, ""),
            test_message(10, 1, 1, ""),
        ];
        deleted.restore_into(ChannelId(1), &mut page);
        let ids: Vec<u64> = page.iter().map(|m| m.id.0).collect();
        assert_eq!(ids, vec![30, 25, 20, 10]);
        assert!(page[1].deleted);
    }

    #[test]
    fn deleted_cache_is_bounded() {
        let mut deleted = DeletedCache::new(3);
        for id in 1..=5 {
            deleted.push(ChannelId(1), test_message(id, 1, 1, ""));
        }
        assert_eq!(deleted.for_channel(ChannelId(1)).count(), 3);
    }
}
