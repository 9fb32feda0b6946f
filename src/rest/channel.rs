//! Channel, thread, pin, mute and search endpoints.

use reqwest::Method;
use serde_json::{json, Value};

use crate::model::{Channel, ChannelId, DmChannel, GuildId, Message, UserId};
use crate::parser::SearchQuery;

use super::{RestClient, RestError, RestResult};

fn channel_override_body(channel: ChannelId, settings: Value) -> Value {
    let mut body = json!({"channel_overrides": {}});
    body["channel_overrides"][channel.to_string()] = settings;
    body
}

/// A page of threads for a channel or forum.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ThreadPage {
    #[serde(default)]
    pub threads: Vec<Value>,
    #[serde(default)]
    pub has_more: bool,
}

/// A message-search result page.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct SearchPage {
    #[serde(default)]
    pub total_results: u64,
    #[serde(default)]
    pub messages: Vec<Vec<Message>>,
}

/// REST methods over channels, DMs and threads.
pub trait ChannelExt {
    async fn get_dms(&self) -> RestResult<Vec<DmChannel>>;

    async fn get_channels(&self, guild: GuildId) -> RestResult<Vec<Channel>>;

    /// Fetch a chunk of a channel's threads, paged by offset.
    async fn get_threads(
        &self,
        channel: ChannelId,
        limit: u64,
        offset: u64,
    ) -> RestResult<ThreadPage>;

    async fn join_thread(&self, thread: ChannelId) -> RestResult<()>;

    async fn leave_thread(&self, thread: ChannelId) -> RestResult<()>;

    async fn get_pinned(&self, channel: ChannelId) -> RestResult<Vec<Message>>;

    async fn pin_message(&self, channel: ChannelId, message: crate::model::MessageId)
        -> RestResult<()>;

    /// Mute or unmute a guild.
    async fn set_guild_muted(&self, guild: GuildId, muted: bool) -> RestResult<()>;

    /// Mute or unmute a guild channel.
    async fn set_channel_muted(
        &self,
        guild: GuildId,
        channel: ChannelId,
        muted: bool,
    ) -> RestResult<()>;

    /// Mute or unmute a DM.
    async fn set_dm_muted(&self, dm: ChannelId, muted: bool) -> RestResult<()>;

    /// Set the notification level (0 all, 1 mentions, 2 nothing) for a
    /// guild channel.
    async fn set_channel_notifications(
        &self,
        guild: GuildId,
        channel: ChannelId,
        level: u8,
    ) -> RestResult<()>;

    /// Run a message search in a guild or DM scope.
    async fn search(
        &self,
        guild: Option<GuildId>,
        channel: ChannelId,
        query: &SearchQuery,
        offset: u64,
    ) -> RestResult<SearchPage>;

    async fn block_user(&self, user: UserId) -> RestResult<()>;

    async fn unblock_user(&self, user: UserId) -> RestResult<()>;

    /// Create an invite for a channel.
    async fn create_invite(
        &self,
        channel: ChannelId,
        max_age_seconds: u64,
        max_uses: u64,
    ) -> RestResult<String>;

    /// Start or check a ring for a DM call.
    async fn send_ring(&self, channel: ChannelId, recipients: &[UserId]) -> RestResult<()>;

    /// Stop ringing (decline) for a DM call.
    async fn stop_ringing(&self, channel: ChannelId) -> RestResult<()>;
}

impl ChannelExt for RestClient {
    async fn get_dms(&self) -> RestResult<Vec<DmChannel>> {
        self.get_json("/users/@me/channels").await
    }

    async fn get_channels(&self, guild: GuildId) -> RestResult<Vec<Channel>> {
        self.get_json(&format!("/guilds/{}/channels", guild)).await
    }

    async fn get_threads(
        &self,
        channel: ChannelId,
        limit: u64,
        offset: u64,
    ) -> RestResult<ThreadPage> {
        self.get_json(&format!(
            "/channels/{}/threads/search?sort_by=last_message_time&sort_order=desc&limit={}&offset={}",
            channel, limit, offset
        ))
        .await
    }

    async fn join_thread(&self, thread: ChannelId) -> RestResult<()> {
        self.request(
            Method::PUT,
            &format!("/channels/{}/thread-members/@me", thread),
            |req| req,
        )
        .await
        .map(|_| ())
    }

    async fn leave_thread(&self, thread: ChannelId) -> RestResult<()> {
        self.request(
            Method::DELETE,
            &format!("/channels/{}/thread-members/@me", thread),
            |req| req,
        )
        .await
        .map(|_| ())
    }

    async fn get_pinned(&self, channel: ChannelId) -> RestResult<Vec<Message>> {
        self.get_json(&format!("/channels/{}/pins", channel)).await
    }

    async fn pin_message(
        &self,
        channel: ChannelId,
        message: crate::model::MessageId,
    ) -> RestResult<()> {
        self.request(
            Method::PUT,
            &format!("/channels/{}/pins/{}", channel, message),
            |req| req,
        )
        .await
        .map(|_| ())
    }

    async fn set_guild_muted(&self, guild: GuildId, muted: bool) -> RestResult<()> {
        self.request(
            Method::PATCH,
            &format!("/users/@me/guilds/{}/settings", guild),
            move |req| req.json(&json!({"muted": muted})),
        )
        .await
        .map(|_| ())
    }

    async fn set_channel_muted(
        &self,
        guild: GuildId,
        channel: ChannelId,
        muted: bool,
    ) -> RestResult<()> {
        let body = channel_override_body(channel, json!({"muted": muted}));
        self.request(
            Method::PATCH,
            &format!("/users/@me/guilds/{}/settings", guild),
            move |req| req.json(&body),
        )
        .await
        .map(|_| ())
    }

    async fn set_dm_muted(&self, dm: ChannelId, muted: bool) -> RestResult<()> {
        let body = channel_override_body(dm, json!({"muted": muted}));
        self.request(Method::PATCH, "/users/@me/guilds/%40me/settings", move |req| {
            req.json(&body)
        })
        .await
        .map(|_| ())
    }

    async fn set_channel_notifications(
        &self,
        guild: GuildId,
        channel: ChannelId,
        level: u8,
    ) -> RestResult<()> {
        let body = channel_override_body(channel, json!({"message_notifications": level}));
        self.request(
            Method::PATCH,
            &format!("/users/@me/guilds/{}/settings", guild),
            move |req| req.json(&body),
        )
        .await
        .map(|_| ())
    }

    async fn search(
        &self,
        guild: Option<GuildId>,
        channel: ChannelId,
        query: &SearchQuery,
        offset: u64,
    ) -> RestResult<SearchPage> {
        let mut params: Vec<String> = Vec::new();
        if !query.content.is_empty() {
            params.push(format!(
                "content={}",
                url::form_urlencoded::byte_serialize(query.content.as_bytes())
                    .collect::<String>()
            ));
        }
        for id in &query.author_ids {
            params.push(format!("author_id={}", id));
        }
        for id in &query.mentions {
            params.push(format!("mentions={}", id));
        }
        for has in &query.has {
            params.push(format!("has={}", has));
        }
        if let Some(max_id) = query.max_id {
            params.push(format!("max_id={}", max_id));
        }
        if let Some(min_id) = query.min_id {
            params.push(format!("min_id={}", min_id));
        }
        if let Some(pinned) = query.pinned {
            params.push(format!("pinned={}", pinned));
        }
        if offset > 0 {
            params.push(format!("offset={}", offset));
        }

        let path = match guild {
            Some(guild) => {
                for id in &query.channel_ids {
                    params.push(format!("channel_id={}", id));
                }
                format!("/guilds/{}/messages/search?{}", guild, params.join("&"))
            }
            None => format!("/channels/{}/messages/search?{}", channel, params.join("&")),
        };
        self.get_json(&path).await
    }

    async fn block_user(&self, user: UserId) -> RestResult<()> {
        self.request(
            Method::PUT,
            &format!("/users/@me/relationships/{}", user),
            |req| req.json(&json!({"type": 2})),
        )
        .await
        .map(|_| ())
    }

    async fn unblock_user(&self, user: UserId) -> RestResult<()> {
        self.request(
            Method::DELETE,
            &format!("/users/@me/relationships/{}", user),
            |req| req,
        )
        .await
        .map(|_| ())
    }

    async fn create_invite(
        &self,
        channel: ChannelId,
        max_age_seconds: u64,
        max_uses: u64,
    ) -> RestResult<String> {
        let response = self
            .post_json(
                &format!("/channels/{}/invites", channel),
                json!({"max_age": max_age_seconds, "max_uses": max_uses}),
            )
            .await?;
        let value: Value = response.json().await.map_err(|_| RestError::Other(None))?;
        value
            .get("code")
            .and_then(Value::as_str)
            .map(|code| format!("https://discord.gg/{}", code))
            .ok_or(RestError::Other(None))
    }

    async fn send_ring(&self, channel: ChannelId, recipients: &[UserId]) -> RestResult<()> {
        self.post_json(
            &format!("/channels/{}/call/ring", channel),
            json!({"recipients": recipients}),
        )
        .await
        .map(|_| ())
    }

    async fn stop_ringing(&self, channel: ChannelId) -> RestResult<()> {
        self.post_json(&format!("/channels/{}/call/stop-ringing", channel), json!({}))
            .await
            .map(|_| ())
    }
}
