//! Dispatch and agent policy gates

use crate::acp::identity::normalize_agent_id;
use crate::config::{AcpConfig, GatewayConfig};
use crate::error::{AcpErrorCode, AcpRuntimeError};

/// Decides whether ACP may run at all, and for which agents.
///
/// A returned error aborts the turn before any backend call.
#[cfg_attr(test, mockall::automock)]
pub trait AcpPolicy: Send + Sync {
    fn dispatch_policy_error(&self) -> Option<AcpRuntimeError>;

    fn agent_policy_error(&self, agent: &str) -> Option<AcpRuntimeError>;
}

/// Policy read from the `acp` config section
#[derive(Debug, Clone)]
pub struct ConfigAcpPolicy {
    config: AcpConfig,
}

impl ConfigAcpPolicy {
    pub fn new(config: &GatewayConfig) -> Self {
        Self {
            config: config.acp.clone(),
        }
    }
}

impl AcpPolicy for ConfigAcpPolicy {
    fn dispatch_policy_error(&self) -> Option<AcpRuntimeError> {
        let message = if !self.config.enabled {
            "ACP is disabled by policy (acp.enabled=false)."
        } else if !self.config.dispatch.enabled {
            "ACP dispatch is disabled by policy (acp.dispatch.enabled=false)."
        } else {
            return None;
        };
        Some(AcpRuntimeError::new(AcpErrorCode::DispatchDisabled, message).with_retryable(false))
    }

    fn agent_policy_error(&self, agent: &str) -> Option<AcpRuntimeError> {
        if self.config.allowed_agents.is_empty() {
            return None;
        }
        let agent_id = normalize_agent_id(agent);
        let allowed = self
            .config
            .allowed_agents
            .iter()
            .any(|allowed| normalize_agent_id(allowed) == agent_id);
        if allowed {
            return None;
        }
        Some(
            AcpRuntimeError::new(
                AcpErrorCode::DispatchDisabled,
                format!(
                    "ACP agent \"{}\" is not allowed by policy (acp.allowedAgents).",
                    agent_id
                ),
            )
            .with_retryable(false),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(raw: &str) -> ConfigAcpPolicy {
        ConfigAcpPolicy::new(&GatewayConfig::from_json_str(raw).unwrap())
    }

    #[test]
    fn test_defaults_allow_everything() {
        let policy = policy("{}");
        assert!(policy.dispatch_policy_error().is_none());
        assert!(policy.agent_policy_error("anything").is_none());
    }

    #[test]
    fn test_disabled_dispatch() {
        let error = policy(r#"{"acp": {"dispatch": {"enabled": false}}}"#)
            .dispatch_policy_error()
            .unwrap();
        assert_eq!(error.code, AcpErrorCode::DispatchDisabled);
        assert!(error.message.contains("acp.dispatch.enabled"));

        let error = policy(r#"{"acp": {"enabled": false}}"#)
            .dispatch_policy_error()
            .unwrap();
        assert!(error.message.contains("acp.enabled"));
    }

    #[test]
    fn test_agent_allow_list() {
        let policy = policy(r#"{"acp": {"allowedAgents": ["Codex", "claude"]}}"#);
        assert!(policy.agent_policy_error("codex").is_none());
        assert!(policy.agent_policy_error("claude-code").is_none());

        let error = policy.agent_policy_error("gemini").unwrap();
        assert_eq!(error.code, AcpErrorCode::DispatchDisabled);
        assert!(error.message.contains("\"gemini\""));
    }
}
