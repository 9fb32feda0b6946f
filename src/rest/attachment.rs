//! The two-phase attachment upload protocol, plus attachment URL expiry
//! handling.
//!
//! 1. POST a single-file manifest to the channel's attachments endpoint,
//!    receiving an `upload_url` and `upload_filename`.
//! 2. PUT the file bytes to `upload_url`; the in-flight request is
//!    registered so `cancel_uploading` can abort it mid-transfer.
//! 3. Reference `upload_filename` in the message send, or DELETE it when
//!    the message is abandoned.

use chrono::Utc;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::model::ChannelId;

use super::{RestClient, RestError, RestResult};

/// Uploads above this size are rejected before the manifest POST.
pub const ATTACHMENT_MAX_BYTES: u64 = 200 * 1024 * 1024;

/// Lifecycle of one pending attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AttachmentState {
    Queued = 0,
    Uploaded = 1,
    TooLarge = 2,
    Failed = 4,
}

/// The server-assigned upload slot for one file.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct UploadSlot {
    pub upload_url: String,
    pub upload_filename: String,
    #[serde(default)]
    pub id: Option<Value>,
}

impl RestClient {
    /// Phase one: request an upload slot. Files over the size cap are
    /// rejected locally.
    pub async fn request_attachment_slot(
        &self,
        channel: ChannelId,
        filename: &str,
        file_size: u64,
        attachment_id: u64,
        is_clip: bool,
    ) -> RestResult<UploadSlot> {
        if file_size > ATTACHMENT_MAX_BYTES {
            return Err(RestError::TooLarge);
        }
        let body = json!({
            "files": [{
                "file_size": file_size,
                "filename": filename,
                "id": attachment_id,
                "is_clip": is_clip,
            }],
        });
        let response = self
            .post_json(&format!("/channels/{}/attachments", channel), body)
            .await?;
        #[derive(serde::Deserialize)]
        struct Slots {
            attachments: Vec<UploadSlot>,
        }
        let mut slots: Slots = response.json().await.map_err(|_| RestError::Other(None))?;
        if slots.attachments.is_empty() {
            return Err(RestError::Other(None));
        }
        Ok(slots.attachments.remove(0))
    }

    /// Phase two: PUT the bytes to the assigned URL. Registered in the
    /// cancel table for the duration; a cancellation surfaces as `Network`.
    pub async fn upload_attachment(&self, slot: &UploadSlot, bytes: Vec<u8>) -> RestResult<()> {
        let cancel = self.register_upload(&slot.upload_url);
        let request = self
            .http
            .put(&slot.upload_url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .header(reqwest::header::USER_AGENT, self.user_agent.clone())
            .body(bytes)
            .send();

        let result = tokio::select! {
            result = request => result.map_err(|_| RestError::Network),
            _ = cancel.notified() => {
                debug!(url = %slot.upload_url, "upload cancelled");
                Err(RestError::Network)
            }
        };
        self.unregister_upload(&slot.upload_url);

        let response = result?;
        if response.status().is_success() {
            Ok(())
        } else {
            warn!(status = %response.status(), "attachment upload failed");
            Err(RestError::Other(Some(response.status())))
        }
    }

    /// Delete an uploaded-but-unsent attachment. The service routinely
    /// answers 429 here and the original client never retries; neither do
    /// we.
    pub async fn delete_attachment(&self, upload_filename: &str) -> RestResult<()> {
        let encoded: String =
            url::form_urlencoded::byte_serialize(upload_filename.as_bytes()).collect();
        match self
            .request(Method::DELETE, &format!("/attachments/{}", encoded), |req| req)
            .await
        {
            Ok(_) => Ok(()),
            Err(RestError::RateLimited(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Refresh an expired attachment URL.
    pub async fn refresh_attachment_url(&self, stale: &str) -> RestResult<String> {
        let response = self
            .post_json("/attachments/refresh-urls", json!({"attachment_urls": [stale]}))
            .await?;
        let value: Value = response.json().await.map_err(|_| RestError::Other(None))?;
        value
            .get("refreshed_urls")
            .and_then(Value::as_array)
            .and_then(|urls| urls.first())
            .and_then(|entry| entry.get("refreshed"))
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or(RestError::Other(None))
    }

    /// Whether a CDN attachment URL's `ex` expiry stamp is in the past.
    /// Returns `None` for URLs without an expiry (not attachment URLs).
    pub fn attachment_url_expired(&self, url: &str) -> Option<bool> {
        let parsed = url::Url::parse(url).ok()?;
        if parsed.host_str() != Some(self.cdn_host()) {
            return None;
        }
        let expiry_hex = parsed
            .query_pairs()
            .find(|(key, _)| key == "ex")
            .map(|(_, value)| value.into_owned())?;
        let expiry = i64::from_str_radix(&expiry_hex, 16).ok()?;
        Some(expiry <= Utc::now().timestamp())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use super::*;

    fn client() -> RestClient {
        RestClient {
            http: reqwest::Client::new(),
            token: "t".into(),
            host: "discord.com".into(),
            cdn_host: "cdn.discord.com".into(),
            user_agent: "ua".into(),
            super_properties: None,
            uploads: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    #[tokio::test]
    async fn oversize_upload_rejected_before_manifest() {
        let result = client()
            .request_attachment_slot(
                ChannelId(1),
                "big.bin",
                ATTACHMENT_MAX_BYTES + 1,
                1,
                false,
            )
            .await;
        assert_eq!(result.unwrap_err(), RestError::TooLarge);
    }

    #[test]
    fn expiry_parses_hex_stamp() {
        let client = client();
        // long expired
        let expired = client
            .attachment_url_expired("https://cdn.discord.com/attachments/1/2/f.png?ex=65000000")
            .unwrap();
        assert!(expired);
        // far future (year ~2242)
        let fresh = client
            .attachment_url_expired("https://cdn.discord.com/attachments/1/2/f.png?ex=200000000")
            .unwrap();
        assert!(!fresh);
        // not an attachment URL
        assert!(client
            .attachment_url_expired("https://elsewhere.example/f.png?ex=65000000")
            .is_none());
        assert!(client
            .attachment_url_expired("https://cdn.discord.com/attachments/1/2/f.png")
            .is_none());
    }
}
