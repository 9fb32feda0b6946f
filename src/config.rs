//! Engine configuration, assembled once at startup into an immutable
//! handle passed through constructors.

use serde::{Deserialize, Serialize};

/// Tunable engine limits and connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Cap on loaded messages per channel; clamps to [50, 1000].
    pub limit_chat_buffer: usize,
    /// Messages per history fetch; clamps to [20, 100].
    pub msg_num: u64,
    /// Number of cached channel tabs.
    pub tab_limit: usize,
    /// Keep deleted messages flagged in the buffer instead of dropping.
    pub keep_deleted: bool,
    /// Minimum seconds between ack flushes; at least 3.
    pub ack_throttling_secs: u64,
    /// Minimum seconds between autocomplete interactions.
    pub interaction_throttling_secs: u64,
    /// Retract a channel's previous desktop notification on a new one.
    pub remove_previous_notifications: bool,
    /// Cap on assist result rows.
    pub assist_limit: usize,
    /// Preferred voice regions, most preferred first.
    pub preferred_voice_regions: Vec<String>,
    /// External media player binary, when overridden.
    pub media_player: Option<String>,

    /// REST host override (self-hosted instances).
    pub host: Option<String>,
    /// Gateway host.
    pub gateway_host: String,
    /// Optional `http://` / `socks5://` proxy for all connections.
    pub proxy: Option<String>,
    pub user_agent: String,
    /// Base64 client fingerprint for the `X-Super-Properties` header.
    pub super_properties: Option<String>,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            limit_chat_buffer: 500,
            msg_num: 50,
            tab_limit: 8,
            keep_deleted: false,
            ack_throttling_secs: 5,
            interaction_throttling_secs: 2,
            remove_previous_notifications: true,
            assist_limit: 50,
            preferred_voice_regions: Vec::new(),
            media_player: None,
            host: None,
            gateway_host: "gateway.discord.gg".to_owned(),
            proxy: None,
            user_agent: concat!("backchat/", env!("CARGO_PKG_VERSION")).to_owned(),
            super_properties: None,
        }
    }
}

impl Config {
    /// Apply the documented clamps; called once after loading.
    pub fn clamped(mut self) -> Config {
        self.limit_chat_buffer = self.limit_chat_buffer.clamp(50, 1000);
        self.msg_num = self.msg_num.clamp(20, 100);
        self.ack_throttling_secs = self.ack_throttling_secs.max(3);
        self.tab_limit = self.tab_limit.max(1);
        self.assist_limit = self.assist_limit.clamp(1, 50);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_apply() {
        let config = Config {
            limit_chat_buffer: 5,
            msg_num: 1000,
            ack_throttling_secs: 0,
            ..Config::default()
        }
        .clamped();
        assert_eq!(config.limit_chat_buffer, 50);
        assert_eq!(config.msg_num, 100);
        assert_eq!(config.ack_throttling_secs, 3);

        let config = Config {
            limit_chat_buffer: 5000,
            msg_num: 1,
            ..Config::default()
        }
        .clamped();
        assert_eq!(config.limit_chat_buffer, 1000);
        assert_eq!(config.msg_num, 20);
    }

    #[test]
    fn defaults_deserialize_from_empty_document() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.msg_num, 50);
        assert!(!config.keep_deleted);
    }
}
