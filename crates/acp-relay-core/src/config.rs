//! Gateway configuration
//!
//! JSON with camelCase keys. Every field has a default so a partial file is
//! valid.

use crate::acp::ProcessBackendConfig;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewayConfig {
    pub acp: AcpConfig,
    pub channels: HashMap<String, ChannelConfig>,
    pub tts: TtsConfig,
}

impl GatewayConfig {
    pub fn from_json_str(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| Error::Config(format!("invalid config: {}", e)))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&raw)
    }

    pub fn channel(&self, channel: &str) -> Option<&ChannelConfig> {
        self.channels.get(channel)
    }
}

/// `acp` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AcpConfig {
    pub enabled: bool,
    pub dispatch: AcpDispatchConfig,
    /// Default backend id for new sessions
    pub backend: String,
    pub default_agent: String,
    /// Empty means every agent is allowed
    pub allowed_agents: Vec<String>,
    pub stream: AcpStreamConfig,
    pub backends: Vec<ProcessBackendConfig>,
}

impl Default for AcpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dispatch: AcpDispatchConfig::default(),
            backend: "scripted".to_string(),
            default_agent: "codex".to_string(),
            allowed_agents: Vec::new(),
            stream: AcpStreamConfig::default(),
            backends: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AcpDispatchConfig {
    pub enabled: bool,
}

impl Default for AcpDispatchConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Stream overrides; unset fields fall through to the next layer
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct AcpStreamConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coalesce_idle_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_chunk_chars: Option<usize>,
}

/// `channels.<name>` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ChannelConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acp_stream: Option<AcpStreamConfig>,
    pub accounts: HashMap<String, AccountConfig>,
}

/// `channels.<name>.accounts.<id>` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct AccountConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acp_stream: Option<AcpStreamConfig>,
}

/// Which payloads go through speech synthesis
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TtsMode {
    #[default]
    Final,
    All,
}

/// When speech synthesis is applied at all
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TtsAutoMode {
    #[default]
    Off,
    Always,
    /// Only when the inbound message was audio
    Inbound,
    /// Only when the session is tagged for voice replies
    Tagged,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct TtsConfig {
    pub mode: TtsMode,
    pub auto: TtsAutoMode,
}

impl TtsConfig {
    /// Whether synthesis runs for this message.
    ///
    /// `tagged` depends on session tags this layer does not see, so it only
    /// applies when the caller marks the message as voice-tagged.
    pub fn applies_to(&self, inbound_audio: bool, voice_tagged: bool) -> bool {
        match self.auto {
            TtsAutoMode::Off => false,
            TtsAutoMode::Always => true,
            TtsAutoMode::Inbound => inbound_audio,
            TtsAutoMode::Tagged => voice_tagged,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = GatewayConfig::from_json_str("{}").unwrap();
        assert!(config.acp.enabled);
        assert!(config.acp.dispatch.enabled);
        assert_eq!(config.acp.backend, "scripted");
        assert!(config.acp.allowed_agents.is_empty());
        assert_eq!(config.tts.mode, TtsMode::Final);
        assert_eq!(config.tts.auto, TtsAutoMode::Off);
    }

    #[test]
    fn test_partial_config() {
        let config = GatewayConfig::from_json_str(
            r#"{
                "acp": {
                    "dispatch": { "enabled": false },
                    "allowedAgents": ["codex"],
                    "stream": { "maxChunkChars": 400 },
                    "backends": [{ "id": "acpx", "command": "acpx" }]
                },
                "channels": {
                    "discord": {
                        "acpStream": { "coalesceIdleMs": 100 },
                        "accounts": { "main": { "acpStream": { "maxChunkChars": 900 } } }
                    }
                },
                "tts": { "mode": "all", "auto": "inbound" }
            }"#,
        )
        .unwrap();

        assert!(config.acp.enabled);
        assert!(!config.acp.dispatch.enabled);
        assert_eq!(config.acp.stream.max_chunk_chars, Some(400));
        assert_eq!(config.acp.backends[0].id, "acpx");

        let discord = config.channel("discord").unwrap();
        assert_eq!(discord.acp_stream.unwrap().coalesce_idle_ms, Some(100));
        assert_eq!(
            discord.accounts["main"].acp_stream.unwrap().max_chunk_chars,
            Some(900)
        );
        assert!(config.tts.applies_to(true, false));
        assert!(!config.tts.applies_to(false, false));
    }

    #[test]
    fn test_invalid_config_is_config_error() {
        let err = GatewayConfig::from_json_str(r#"{"acp": {"enabled": "yes"}}"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.json");
        std::fs::write(&path, r#"{"acp": {"defaultAgent": "claude"}}"#).unwrap();

        let config = GatewayConfig::load(&path).unwrap();
        assert_eq!(config.acp.default_agent, "claude");

        assert!(GatewayConfig::load(dir.path().join("missing.json")).is_err());
    }
}
