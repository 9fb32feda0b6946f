//! Typed client for the service's REST API.
//!
//! Every operation reports through [`RestResult`]: the error kinds separate
//! "go offline" transport failures from authorization, size and rate-limit
//! failures so the controller can decide what to surface. Rate limits are
//! never retried internally; the retry-after hint is handed to the caller.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::{header, Method, Proxy, StatusCode};
use serde_json::Value;
use tokio::sync::Notify;
use tracing::{debug, error, warn};

use crate::model::UserId;

mod attachment;
pub use attachment::{AttachmentState, UploadSlot, ATTACHMENT_MAX_BYTES};

mod channel;
pub use channel::{ChannelExt, SearchPage, ThreadPage};

mod interaction;
pub use interaction::{InteractionExt, InteractionType};

mod message;
pub use message::{GetMessages, MessageExt, ReplyTo, SentAttachment, FETCH_MAX, FETCH_MIN};

/// REST operation `Result` alias.
pub type RestResult<T> = ::std::result::Result<T, RestError>;

/// The failure classes REST callers dispatch on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestError {
    /// Transport failure; the engine should go offline and reconnect.
    Network,
    /// The token was rejected; fatal during bootstrap.
    Unauthorized,
    /// Upload larger than the service accepts.
    TooLarge,
    /// Rate limited, with the server's retry-after in seconds if known.
    RateLimited(Option<u64>),
    /// Any other non-success response.
    Other(Option<StatusCode>),
}

impl std::fmt::Display for RestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RestError::Network => f.write_str("network error"),
            RestError::Unauthorized => f.write_str("unauthorized"),
            RestError::TooLarge => f.write_str("file too large"),
            RestError::RateLimited(Some(secs)) => write!(f, "rate limited for {}s", secs),
            RestError::RateLimited(None) => f.write_str("rate limited"),
            RestError::Other(Some(status)) => write!(f, "request failed ({})", status),
            RestError::Other(None) => f.write_str("request failed"),
        }
    }
}

impl std::error::Error for RestError {}

/// Connection settings for the REST client.
#[derive(Debug, Clone, Default)]
pub struct RestConfig {
    /// API host override; the production host when empty.
    pub host: Option<String>,
    /// `http://`, `https://` or `socks5://` proxy URL.
    pub proxy: Option<String>,
    pub user_agent: String,
    /// Base64 client fingerprint sent as `X-Super-Properties`.
    pub super_properties: Option<String>,
}

const DEFAULT_HOST: &str = "discord.com";
const API_PREFIX: &str = "/api/v9";

/// Client for the REST API. Cheap to clone; the upload cancel registry is
/// shared between clones.
#[derive(Clone)]
pub struct RestClient {
    http: reqwest::Client,
    token: String,
    host: String,
    cdn_host: String,
    user_agent: String,
    super_properties: Option<String>,
    /// In-flight uploads keyed by upload URL, for `cancel_uploading`.
    uploads: Arc<Mutex<HashMap<String, Arc<Notify>>>>,
}

impl RestClient {
    /// Build a client and verify the token by fetching the account's ID.
    ///
    /// `Unauthorized` here is fatal: the caller is expected to exit.
    pub async fn new(token: String, config: RestConfig) -> RestResult<(RestClient, UserId)> {
        let host = config
            .host
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| DEFAULT_HOST.to_owned());
        let cdn_host = format!("cdn.{}", host.trim_start_matches("api."));

        let mut builder = reqwest::Client::builder()
            .https_only(true)
            .timeout(Duration::from_secs(15));
        if let Some(proxy) = &config.proxy {
            builder = builder.proxy(Proxy::all(proxy).map_err(|_| RestError::Other(None))?);
        }
        let http = builder.build().map_err(|_| RestError::Other(None))?;

        let client = RestClient {
            http,
            token,
            host,
            cdn_host,
            user_agent: config.user_agent,
            super_properties: config.super_properties,
            uploads: Arc::new(Mutex::new(HashMap::new())),
        };
        let my_id = client.get_my_id().await?;
        Ok((client, my_id))
    }

    pub fn cdn_host(&self) -> &str {
        &self.cdn_host
    }

    fn api_url(&self, path: &str) -> String {
        format!(
            "https://{}{}{}{}",
            self.host,
            API_PREFIX,
            if path.starts_with('/') { "" } else { "/" },
            path
        )
    }

    fn apply_headers(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let mut builder = builder
            .header(header::AUTHORIZATION, self.token.clone())
            .header(header::USER_AGENT, self.user_agent.clone())
            .header(header::ACCEPT, "*/*");
        if let Some(props) = &self.super_properties {
            builder = builder.header("X-Super-Properties", props.clone());
        }
        builder
    }

    /// Issue a request, retrying once when the connection was aborted
    /// because it had been idle.
    pub(crate) async fn request<F>(
        &self,
        method: Method,
        path: &str,
        f: F,
    ) -> RestResult<reqwest::Response>
    where
        F: Fn(reqwest::RequestBuilder) -> reqwest::RequestBuilder,
    {
        let url = self.api_url(path);
        let build = || self.apply_headers(f(self.http.request(method.clone(), &url)));

        let response = match build().send().await {
            Err(err) if err.is_connect() => build().send().await,
            other => other,
        };

        let response = response.map_err(|err| {
            if err.is_timeout() || err.is_connect() || err.is_request() {
                RestError::Network
            } else {
                RestError::Other(None)
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::BAD_REQUEST if path == "/users/@me" => {
                Err(RestError::Unauthorized)
            }
            StatusCode::UNAUTHORIZED => Err(RestError::Unauthorized),
            StatusCode::PAYLOAD_TOO_LARGE => Err(RestError::TooLarge),
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .json::<Value>()
                    .await
                    .ok()
                    .and_then(|v| v.get("retry_after").and_then(Value::as_f64))
                    .map(|secs| secs.ceil() as u64);
                warn!(path, ?retry_after, "rate limited");
                Err(RestError::RateLimited(retry_after))
            }
            other => {
                error!(path, status = %other, "request failed");
                Err(RestError::Other(Some(other)))
            }
        }
    }

    pub(crate) async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
    ) -> RestResult<T> {
        self.request(Method::GET, path, |req| req)
            .await?
            .json()
            .await
            .map_err(|_| RestError::Other(None))
    }

    pub(crate) async fn post_json(&self, path: &str, body: Value) -> RestResult<reqwest::Response> {
        self.request(Method::POST, path, move |req| req.json(&body))
            .await
    }

    /// Fetch the logged-in account's ID; the identity bootstrap.
    pub async fn get_my_id(&self) -> RestResult<UserId> {
        #[derive(serde::Deserialize)]
        struct Me {
            id: UserId,
        }
        let me: Me = self.get_json("/users/@me").await?;
        debug!(id = %me.id, "identity bootstrap ok");
        Ok(me.id)
    }

    // Upload cancel registry

    pub(crate) fn register_upload(&self, upload_url: &str) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        self.uploads
            .lock()
            .expect("upload registry poisoned")
            .insert(upload_url.to_owned(), notify.clone());
        notify
    }

    pub(crate) fn unregister_upload(&self, upload_url: &str) {
        self.uploads
            .lock()
            .expect("upload registry poisoned")
            .remove(upload_url);
    }

    /// Abort one in-flight upload, or all of them.
    pub fn cancel_uploading(&self, upload_url: Option<&str>) {
        let registry = self.uploads.lock().expect("upload registry poisoned");
        match upload_url {
            Some(url) => {
                if let Some(notify) = registry.get(url) {
                    notify.notify_waiters();
                }
            }
            None => {
                for notify in registry.values() {
                    notify.notify_waiters();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_url_joins_paths() {
        let client = RestClient {
            http: reqwest::Client::new(),
            token: "t".into(),
            host: "discord.com".into(),
            cdn_host: "cdn.discord.com".into(),
            user_agent: "ua".into(),
            super_properties: None,
            uploads: Arc::new(Mutex::new(HashMap::new())),
        };
        assert_eq!(
            client.api_url("/channels/1/messages"),
            "https://discord.com/api/v9/channels/1/messages"
        );
        assert_eq!(
            client.api_url("gateway"),
            "https://discord.com/api/v9/gateway"
        );
    }

    #[test]
    fn cancel_unknown_upload_is_noop() {
        let client = RestClient {
            http: reqwest::Client::new(),
            token: "t".into(),
            host: "h".into(),
            cdn_host: "cdn.h".into(),
            user_agent: "ua".into(),
            super_properties: None,
            uploads: Arc::new(Mutex::new(HashMap::new())),
        };
        client.cancel_uploading(Some("https://nowhere"));
        client.cancel_uploading(None);
    }
}
