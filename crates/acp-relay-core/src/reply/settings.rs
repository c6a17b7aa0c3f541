//! Stream settings for the block pipeline

use crate::config::{AcpStreamConfig, GatewayConfig};
use std::time::Duration;

pub const DEFAULT_COALESCE_IDLE_MS: u64 = 350;
pub const MAX_COALESCE_IDLE_MS: u64 = 5_000;
pub const DEFAULT_MAX_CHUNK_CHARS: usize = 1_800;
pub const MIN_MAX_CHUNK_CHARS: usize = 50;
pub const MAX_MAX_CHUNK_CHARS: usize = 4_000;

/// How long a single delivery may take before the pipeline moves on
pub const BLOCK_DELIVERY_TIMEOUT: Duration = Duration::from_millis(15_000);

/// Resolved, clamped settings for one turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyStreamSettings {
    pub coalesce_idle_ms: u64,
    pub max_chunk_chars: usize,
}

impl Default for ReplyStreamSettings {
    fn default() -> Self {
        Self {
            coalesce_idle_ms: DEFAULT_COALESCE_IDLE_MS,
            max_chunk_chars: DEFAULT_MAX_CHUNK_CHARS,
        }
    }
}

impl ReplyStreamSettings {
    pub fn new(coalesce_idle_ms: u64, max_chunk_chars: usize) -> Self {
        Self {
            coalesce_idle_ms: coalesce_idle_ms.min(MAX_COALESCE_IDLE_MS),
            max_chunk_chars: max_chunk_chars.clamp(MIN_MAX_CHUNK_CHARS, MAX_MAX_CHUNK_CHARS),
        }
    }

    /// Resolve for a channel/account: account > channel > global > default.
    pub fn resolve(config: &GatewayConfig, channel: Option<&str>, account: Option<&str>) -> Self {
        let channel_config = channel.and_then(|c| config.channel(c));
        let account_stream = channel_config
            .zip(account)
            .and_then(|(c, a)| c.accounts.get(a))
            .and_then(|a| a.acp_stream);
        let channel_stream = channel_config.and_then(|c| c.acp_stream);
        let layers: [Option<AcpStreamConfig>; 3] =
            [account_stream, channel_stream, Some(config.acp.stream)];

        let coalesce_idle_ms = layers
            .iter()
            .flatten()
            .find_map(|s| s.coalesce_idle_ms)
            .unwrap_or(DEFAULT_COALESCE_IDLE_MS);
        let max_chunk_chars = layers
            .iter()
            .flatten()
            .find_map(|s| s.max_chunk_chars)
            .unwrap_or(DEFAULT_MAX_CHUNK_CHARS);
        Self::new(coalesce_idle_ms, max_chunk_chars)
    }

    pub fn coalesce_idle(&self) -> Duration {
        Duration::from_millis(self.coalesce_idle_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(raw: &str) -> GatewayConfig {
        GatewayConfig::from_json_str(raw).unwrap()
    }

    #[test]
    fn test_defaults() {
        let settings = ReplyStreamSettings::resolve(&GatewayConfig::default(), None, None);
        assert_eq!(settings, ReplyStreamSettings::default());
        assert_eq!(settings.coalesce_idle(), Duration::from_millis(350));
    }

    #[test]
    fn test_clamping() {
        let settings = ReplyStreamSettings::new(60_000, 10);
        assert_eq!(settings.coalesce_idle_ms, 5_000);
        assert_eq!(settings.max_chunk_chars, 50);

        let settings = ReplyStreamSettings::new(0, 100_000);
        assert_eq!(settings.coalesce_idle_ms, 0);
        assert_eq!(settings.max_chunk_chars, 4_000);
    }

    #[test]
    fn test_layer_precedence() {
        let cfg = config(
            r#"{
                "acp": { "stream": { "coalesceIdleMs": 500, "maxChunkChars": 1000 } },
                "channels": {
                    "discord": {
                        "acpStream": { "maxChunkChars": 1500 },
                        "accounts": { "bot2": { "acpStream": { "coalesceIdleMs": 50 } } }
                    }
                }
            }"#,
        );

        let global = ReplyStreamSettings::resolve(&cfg, Some("slack"), None);
        assert_eq!(global, ReplyStreamSettings::new(500, 1000));

        let channel = ReplyStreamSettings::resolve(&cfg, Some("discord"), Some("bot1"));
        assert_eq!(channel, ReplyStreamSettings::new(500, 1500));

        let account = ReplyStreamSettings::resolve(&cfg, Some("discord"), Some("bot2"));
        assert_eq!(account, ReplyStreamSettings::new(50, 1500));
    }
}
