//! Per-guild subscription sets: which channels and members the client
//! wants typing, thread and presence traffic for.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{json, Value};

use crate::model::{ChannelId, GuildId, UserId};

/// The subscription state for one guild.
#[derive(Debug, Default, Clone)]
struct GuildSubscription {
    channels: BTreeSet<ChannelId>,
    members: BTreeSet<UserId>,
}

/// Tracks subscriptions; mutations yield the full payload for the guild,
/// since the gateway expects the complete set on every change.
#[derive(Debug, Default)]
pub struct SubscriptionManager {
    guilds: BTreeMap<GuildId, GuildSubscription>,
    dms: BTreeSet<ChannelId>,
}

impl SubscriptionManager {
    /// Subscribe a guild channel. Returns the op 37 payload to send, or
    /// `None` when the subscription is already in place (idempotence).
    pub fn subscribe_channel(&mut self, guild_id: GuildId, channel_id: ChannelId) -> Option<Value> {
        let guild = self.guilds.entry(guild_id).or_default();
        if !guild.channels.insert(channel_id) {
            return None;
        }
        Some(self.guild_payload(guild_id))
    }

    /// Subscribe to member updates (roles, presence) for specific users.
    pub fn subscribe_members(
        &mut self,
        guild_id: GuildId,
        member_ids: impl IntoIterator<Item = UserId>,
    ) -> Option<Value> {
        let guild = self.guilds.entry(guild_id).or_default();
        let before = guild.members.len();
        guild.members.extend(member_ids);
        if guild.members.len() == before {
            return None;
        }
        Some(self.guild_payload(guild_id))
    }

    /// Replace the focused-channel set wholesale (channel switch).
    pub fn set_channels(
        &mut self,
        guild_id: GuildId,
        channels: impl IntoIterator<Item = ChannelId>,
    ) -> Value {
        let guild = self.guilds.entry(guild_id).or_default();
        guild.channels = channels.into_iter().collect();
        self.guild_payload(guild_id)
    }

    /// Subscribe a DM channel; these use the call-connect opcode instead.
    /// Returns the op 13 payload, or `None` when already subscribed.
    pub fn subscribe_dm(&mut self, channel_id: ChannelId) -> Option<Value> {
        if !self.dms.insert(channel_id) {
            return None;
        }
        Some(json!({
            "op": 13,
            "d": {"channel_id": channel_id},
        }))
    }

    pub fn subscribed_channels(&self, guild_id: GuildId) -> Vec<ChannelId> {
        self.guilds
            .get(&guild_id)
            .map(|g| g.channels.iter().copied().collect())
            .unwrap_or_default()
    }

    /// The complete op 37 subscription payload for one guild.
    fn guild_payload(&self, guild_id: GuildId) -> Value {
        let guild = self.guilds.get(&guild_id).cloned().unwrap_or_default();
        let mut channels = json!({});
        for channel in &guild.channels {
            // request the head of the member list alongside the channel
            channels[channel.to_string()] = json!([[0, 99]]);
        }
        let mut subscriptions = json!({});
        subscriptions[guild_id.to_string()] = json!({
            "typing": true,
            "threads": true,
            "activities": true,
            "members": guild.members.iter().collect::<Vec<_>>(),
            "channels": channels,
            "thread_member_lists": [],
        });
        json!({
            "op": 37,
            "d": {"subscriptions": subscriptions},
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resubscribing_is_idempotent() {
        let mut manager = SubscriptionManager::default();
        assert!(manager
            .subscribe_channel(GuildId(1), ChannelId(10))
            .is_some());
        assert!(manager
            .subscribe_channel(GuildId(1), ChannelId(10))
            .is_none());
        assert!(manager.subscribe_dm(ChannelId(99)).is_some());
        assert!(manager.subscribe_dm(ChannelId(99)).is_none());
    }

    #[test]
    fn payload_carries_complete_guild_set() {
        let mut manager = SubscriptionManager::default();
        manager.subscribe_channel(GuildId(1), ChannelId(10));
        let payload = manager
            .subscribe_channel(GuildId(1), ChannelId(11))
            .unwrap();
        let subs = &payload["d"]["subscriptions"]["1"];
        assert_eq!(subs["typing"], true);
        assert!(subs["channels"].get("10").is_some());
        assert!(subs["channels"].get("11").is_some());

        let with_members = manager
            .subscribe_members(GuildId(1), [UserId(5), UserId(6)])
            .unwrap();
        let members = with_members["d"]["subscriptions"]["1"]["members"]
            .as_array()
            .unwrap();
        assert_eq!(members.len(), 2);
    }

    #[test]
    fn channel_switch_replaces_set() {
        let mut manager = SubscriptionManager::default();
        manager.subscribe_channel(GuildId(1), ChannelId(10));
        let payload = manager.set_channels(GuildId(1), [ChannelId(20)]);
        let channels = &payload["d"]["subscriptions"]["1"]["channels"];
        assert!(channels.get("10").is_none());
        assert!(channels.get("20").is_some());
    }
}
