//! Message endpoints: pages, sends, edits, reactions, acks, typing, votes.

use chrono::Utc;
use reqwest::Method;
use serde_json::{json, Value};

use crate::model::{ChannelId, Message, MessageId, ReactionEmoji, SNOWFLAKE_EPOCH};

use super::{RestClient, RestError, RestResult};

/// Messages are fetched in pages of this size range.
pub const FETCH_MIN: u64 = 20;
pub const FETCH_MAX: u64 = 100;

/// Which page of a channel's history to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GetMessages {
    /// The newest messages.
    MostRecent,
    /// Messages older than the given ID.
    Before(MessageId),
    /// Messages newer than the given ID.
    After(MessageId),
    /// Messages surrounding the given ID.
    Around(MessageId),
}

/// A reply reference attached to an outgoing message.
#[derive(Debug, Clone)]
pub struct ReplyTo {
    pub message_id: MessageId,
    pub channel_id: ChannelId,
    pub guild_id: Option<crate::model::GuildId>,
    /// Whether the replied-to author gets pinged.
    pub ping: bool,
}

/// An uploaded attachment reference included in a send.
#[derive(Debug, Clone)]
pub struct SentAttachment {
    pub id: u64,
    pub filename: String,
    pub uploaded_filename: String,
}

fn encode_emoji(emoji: &ReactionEmoji) -> String {
    let raw = match emoji {
        ReactionEmoji::Custom { name, id, .. } => format!("{}:{}", name, id),
        ReactionEmoji::Unicode { name } => name.clone(),
    };
    url::form_urlencoded::byte_serialize(raw.as_bytes()).collect()
}

/// REST methods for reading and writing messages.
pub trait MessageExt {
    /// Fetch a page of messages, newest first. `num` clamps to [20, 100].
    async fn get_messages(
        &self,
        channel: ChannelId,
        what: GetMessages,
        num: u64,
    ) -> RestResult<Vec<Message>>;

    /// Send a message; the gateway echo is the authoritative insert.
    async fn send_message(
        &self,
        channel: ChannelId,
        content: &str,
        reply: Option<&ReplyTo>,
        attachments: &[SentAttachment],
        sticker_ids: &[crate::model::StickerId],
    ) -> RestResult<Message>;

    async fn edit_message(
        &self,
        channel: ChannelId,
        message: MessageId,
        content: &str,
    ) -> RestResult<Message>;

    async fn delete_message(&self, channel: ChannelId, message: MessageId) -> RestResult<()>;

    async fn add_reaction(
        &self,
        channel: ChannelId,
        message: MessageId,
        emoji: &ReactionEmoji,
    ) -> RestResult<()>;

    async fn remove_reaction(
        &self,
        channel: ChannelId,
        message: MessageId,
        emoji: &ReactionEmoji,
    ) -> RestResult<()>;

    /// Acknowledge one channel up to a message. `manual` marks a
    /// user-driven mark-as-unread instead of a view.
    async fn send_ack(
        &self,
        channel: ChannelId,
        message: MessageId,
        manual: bool,
    ) -> RestResult<()>;

    /// Fold several pending acks into one bulk request.
    async fn send_ack_bulk(&self, pairs: &[(ChannelId, MessageId)]) -> RestResult<()>;

    /// Report the user as typing. A 200 response carries the channel's
    /// slow-mode cooldown in seconds.
    async fn send_typing(&self, channel: ChannelId) -> RestResult<Option<u64>>;

    /// Cast or clear poll votes.
    async fn send_vote(
        &self,
        channel: ChannelId,
        message: MessageId,
        answer_ids: &[u64],
        clear: bool,
    ) -> RestResult<()>;
}

impl MessageExt for RestClient {
    async fn get_messages(
        &self,
        channel: ChannelId,
        what: GetMessages,
        num: u64,
    ) -> RestResult<Vec<Message>> {
        let num = num.clamp(FETCH_MIN, FETCH_MAX);
        let mut path = format!("/channels/{}/messages?limit={}", channel, num);
        match what {
            GetMessages::MostRecent => {}
            GetMessages::Before(id) => path.push_str(&format!("&before={}", id)),
            GetMessages::After(id) => path.push_str(&format!("&after={}", id)),
            GetMessages::Around(id) => path.push_str(&format!("&around={}", id)),
        }
        self.get_json(&path).await
    }

    async fn send_message(
        &self,
        channel: ChannelId,
        content: &str,
        reply: Option<&ReplyTo>,
        attachments: &[SentAttachment],
        sticker_ids: &[crate::model::StickerId],
    ) -> RestResult<Message> {
        let mut body = json!({
            "content": content,
            "tts": false,
        });
        if let Some(reply) = reply {
            body["message_reference"] = json!({
                "message_id": reply.message_id,
                "channel_id": reply.channel_id,
                "guild_id": reply.guild_id,
            });
            if !reply.ping {
                body["allowed_mentions"] = json!({"replied_user": false});
            }
        }
        if !attachments.is_empty() {
            body["attachments"] = Value::Array(
                attachments
                    .iter()
                    .map(|a| {
                        json!({
                            "id": a.id,
                            "filename": a.filename,
                            "uploaded_filename": a.uploaded_filename,
                        })
                    })
                    .collect(),
            );
        }
        if !sticker_ids.is_empty() {
            body["sticker_ids"] = json!(sticker_ids);
        }

        self.post_json(&format!("/channels/{}/messages", channel), body)
            .await?
            .json()
            .await
            .map_err(|_| RestError::Other(None))
    }

    async fn edit_message(
        &self,
        channel: ChannelId,
        message: MessageId,
        content: &str,
    ) -> RestResult<Message> {
        self.request(
            Method::PATCH,
            &format!("/channels/{}/messages/{}", channel, message),
            |req| req.json(&json!({"content": content})),
        )
        .await?
        .json()
        .await
        .map_err(|_| RestError::Other(None))
    }

    async fn delete_message(&self, channel: ChannelId, message: MessageId) -> RestResult<()> {
        self.request(
            Method::DELETE,
            &format!("/channels/{}/messages/{}", channel, message),
            |req| req,
        )
        .await
        .map(|_| ())
    }

    async fn add_reaction(
        &self,
        channel: ChannelId,
        message: MessageId,
        emoji: &ReactionEmoji,
    ) -> RestResult<()> {
        self.request(
            Method::PUT,
            &format!(
                "/channels/{}/messages/{}/reactions/{}/@me",
                channel,
                message,
                encode_emoji(emoji)
            ),
            |req| req,
        )
        .await
        .map(|_| ())
    }

    async fn remove_reaction(
        &self,
        channel: ChannelId,
        message: MessageId,
        emoji: &ReactionEmoji,
    ) -> RestResult<()> {
        self.request(
            Method::DELETE,
            &format!(
                "/channels/{}/messages/{}/reactions/{}/@me",
                channel,
                message,
                encode_emoji(emoji)
            ),
            |req| req,
        )
        .await
        .map(|_| ())
    }

    async fn send_ack(
        &self,
        channel: ChannelId,
        message: MessageId,
        manual: bool,
    ) -> RestResult<()> {
        let body = if manual {
            json!({"manual": true})
        } else {
            // days since the service epoch
            let last_viewed =
                (Utc::now().timestamp() as u64).saturating_sub(SNOWFLAKE_EPOCH) / 86_400 + 1;
            json!({"last_viewed": last_viewed, "token": null})
        };
        self.post_json(
            &format!("/channels/{}/messages/{}/ack", channel, message),
            body,
        )
        .await
        .map(|_| ())
    }

    async fn send_ack_bulk(&self, pairs: &[(ChannelId, MessageId)]) -> RestResult<()> {
        let read_states: Vec<Value> = pairs
            .iter()
            .map(|(channel_id, message_id)| {
                json!({
                    "channel_id": channel_id,
                    "message_id": message_id,
                    "read_state_type": 0,
                })
            })
            .collect();
        self.post_json("/read-states/ack-bulk", json!({"read_states": read_states}))
            .await
            .map(|_| ())
    }

    async fn send_typing(&self, channel: ChannelId) -> RestResult<Option<u64>> {
        let response = self
            .request(Method::POST, &format!("/channels/{}/typing", channel), |req| req)
            .await?;
        if response.status() == reqwest::StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let cooldown = response
            .json::<Value>()
            .await
            .ok()
            .and_then(|v| v.get("message_send_cooldown_ms").and_then(Value::as_u64))
            .map(|ms| ms / 1000);
        Ok(cooldown)
    }

    async fn send_vote(
        &self,
        channel: ChannelId,
        message: MessageId,
        answer_ids: &[u64],
        clear: bool,
    ) -> RestResult<()> {
        let body = if clear {
            json!({"answer_ids": []})
        } else {
            json!({"answer_ids": answer_ids.iter().map(|id| id.to_string()).collect::<Vec<_>>()})
        };
        self.request(
            Method::PUT,
            &format!("/channels/{}/polls/{}/answers/@me", channel, message),
            move |req| req.json(&body),
        )
        .await
        .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emoji_reaction_paths_are_urlencoded() {
        let unicode = ReactionEmoji::Unicode { name: "🦀".into() };
        assert_eq!(encode_emoji(&unicode), "%F0%9F%A6%80");

        let custom = ReactionEmoji::Custom {
            name: "blob".into(),
            id: crate::model::EmojiId(42),
            animated: false,
        };
        assert_eq!(encode_emoji(&custom), "blob%3A42");
    }

    #[test]
    fn fetch_size_clamps() {
        assert_eq!(5u64.clamp(FETCH_MIN, FETCH_MAX), 20);
        assert_eq!(250u64.clamp(FETCH_MIN, FETCH_MAX), 100);
        assert_eq!(50u64.clamp(FETCH_MIN, FETCH_MAX), 50);
    }
}
