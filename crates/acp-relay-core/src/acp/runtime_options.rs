//! Per-session runtime options
//!
//! Options are layered: persisted values are merged with command patches, then
//! normalized before they are compared or applied to a backend. User input is
//! validated here and rejected with `ACP_INVALID_RUNTIME_OPTION`; those
//! messages are shown to the user verbatim.

use super::traits::RuntimeResult;
use crate::error::AcpRuntimeError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

pub const MAX_TIMEOUT_SECONDS: u64 = 86_400;
const MAX_TEXT_OPTION_CHARS: usize = 200;
const MAX_CONFIG_KEY_CHARS: usize = 64;
const MAX_CONFIG_VALUE_CHARS: usize = 512;

/// Config keys the well-known options map to on the backend side
pub const MODEL_CONFIG_KEY: &str = "model";
pub const PERMISSION_CONFIG_KEY: &str = "approval_policy";
pub const TIMEOUT_CONFIG_KEY: &str = "timeout";

/// Mutable per-session runtime settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission_profile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub backend_extras: BTreeMap<String, String>,
}

impl RuntimeOptions {
    pub fn is_empty(&self) -> bool {
        self.runtime_mode.is_none()
            && self.model.is_none()
            && self.cwd.is_none()
            && self.permission_profile.is_none()
            && self.timeout_seconds.is_none()
            && self.backend_extras.is_empty()
    }

    /// Layer `patch` over `self`; fields set in the patch win, extras merge key by key.
    pub fn merge(&self, patch: &RuntimeOptions) -> RuntimeOptions {
        let mut backend_extras = self.backend_extras.clone();
        for (key, value) in &patch.backend_extras {
            backend_extras.insert(key.clone(), value.clone());
        }
        RuntimeOptions {
            runtime_mode: patch.runtime_mode.clone().or_else(|| self.runtime_mode.clone()),
            model: patch.model.clone().or_else(|| self.model.clone()),
            cwd: patch.cwd.clone().or_else(|| self.cwd.clone()),
            permission_profile: patch
                .permission_profile
                .clone()
                .or_else(|| self.permission_profile.clone()),
            timeout_seconds: patch.timeout_seconds.or(self.timeout_seconds),
            backend_extras,
        }
        .normalize()
    }

    /// Trim text values and drop empty ones.
    pub fn normalize(self) -> RuntimeOptions {
        fn clean(value: Option<String>) -> Option<String> {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        }

        RuntimeOptions {
            runtime_mode: clean(self.runtime_mode),
            model: clean(self.model),
            cwd: clean(self.cwd),
            permission_profile: clean(self.permission_profile),
            timeout_seconds: self.timeout_seconds.filter(|t| *t > 0),
            backend_extras: self
                .backend_extras
                .into_iter()
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                .filter(|(k, v)| !k.is_empty() && !v.is_empty())
                .collect(),
        }
    }

    /// Options rendered as backend config pairs.
    ///
    /// `runtime_mode` goes through `set_mode` and `cwd` through session
    /// establishment, so neither appears here.
    pub fn config_option_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        if let Some(model) = &self.model {
            pairs.push((MODEL_CONFIG_KEY.to_string(), model.clone()));
        }
        if let Some(profile) = &self.permission_profile {
            pairs.push((PERMISSION_CONFIG_KEY.to_string(), profile.clone()));
        }
        if let Some(timeout) = self.timeout_seconds {
            pairs.push((TIMEOUT_CONFIG_KEY.to_string(), timeout.to_string()));
        }
        for (key, value) in &self.backend_extras {
            pairs.push((key.clone(), value.clone()));
        }
        pairs
    }

    /// Typed patch equivalent to setting config `key` to `value`.
    ///
    /// Well-known keys go through the same validation as their dedicated
    /// commands.
    pub fn patch_from_config_option(key: &str, value: &str) -> RuntimeResult<RuntimeOptions> {
        let mut patch = RuntimeOptions::default();
        match key.trim().to_ascii_lowercase().as_str() {
            "model" => patch.model = Some(value.to_string()),
            "approval_policy" | "permission_profile" | "permissions" => {
                patch.permission_profile = Some(value.to_string())
            }
            "timeout" | "timeout_seconds" => {
                patch.timeout_seconds = Some(parse_timeout_seconds(value)?)
            }
            "mode" | "runtime_mode" => patch.runtime_mode = Some(value.to_string()),
            "cwd" => patch.cwd = Some(value.to_string()),
            _ => {
                patch
                    .backend_extras
                    .insert(key.trim().to_string(), value.to_string());
            }
        }
        Ok(patch.normalize())
    }

    /// Stable signature of the options a backend has to be told about.
    pub fn control_signature(&self) -> String {
        let normalized = self.clone().normalize();
        let mut parts = Vec::new();
        if let Some(mode) = &normalized.runtime_mode {
            parts.push(format!("mode={}", mode));
        }
        for (key, value) in normalized.config_option_pairs() {
            parts.push(format!("{}={}", key, value));
        }
        parts.join("\n")
    }

    /// Human-readable lines for status output
    pub fn describe_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if let Some(mode) = &self.runtime_mode {
            lines.push(format!("runtime mode: {}", mode));
        }
        if let Some(model) = &self.model {
            lines.push(format!("model: {}", model));
        }
        if let Some(cwd) = &self.cwd {
            lines.push(format!("cwd: {}", cwd));
        }
        if let Some(profile) = &self.permission_profile {
            lines.push(format!("permissions: {}", profile));
        }
        if let Some(timeout) = self.timeout_seconds {
            lines.push(format!("timeout: {}s", timeout));
        }
        for (key, value) in &self.backend_extras {
            lines.push(format!("{}: {}", key, value));
        }
        lines
    }
}

fn validate_text_option(label: &str, raw: &str) -> RuntimeResult<String> {
    let value = raw.trim();
    if value.is_empty() {
        return Err(AcpRuntimeError::invalid_option(format!(
            "{} must not be empty.",
            label
        )));
    }
    if value.chars().count() > MAX_TEXT_OPTION_CHARS {
        return Err(AcpRuntimeError::invalid_option(format!(
            "{} must be at most {} characters.",
            label, MAX_TEXT_OPTION_CHARS
        )));
    }
    if value.chars().any(char::is_control) {
        return Err(AcpRuntimeError::invalid_option(format!(
            "{} must not contain control characters.",
            label
        )));
    }
    Ok(value.to_string())
}

pub fn validate_runtime_mode_input(raw: &str) -> RuntimeResult<String> {
    validate_text_option("Runtime mode", raw)
}

pub fn validate_model_input(raw: &str) -> RuntimeResult<String> {
    validate_text_option("Model id", raw)
}

pub fn validate_permission_profile_input(raw: &str) -> RuntimeResult<String> {
    validate_text_option("Permission profile", raw)
}

pub fn validate_cwd_input(raw: &str) -> RuntimeResult<String> {
    let value = validate_text_option("Working directory", raw)?;
    if !Path::new(&value).is_absolute() {
        return Err(AcpRuntimeError::invalid_option(format!(
            "Working directory must be an absolute path (got \"{}\").",
            value
        )));
    }
    Ok(value)
}

/// Parse a timeout in whole seconds, e.g. `"300"`.
pub fn parse_timeout_seconds(raw: &str) -> RuntimeResult<u64> {
    let value = raw.trim();
    let seconds: u64 = value.parse().map_err(|_| {
        AcpRuntimeError::invalid_option(format!(
            "Timeout must be a positive whole number of seconds (got \"{}\").",
            value
        ))
    })?;
    if seconds == 0 || seconds > MAX_TIMEOUT_SECONDS {
        return Err(AcpRuntimeError::invalid_option(format!(
            "Timeout must be between 1 and {} seconds.",
            MAX_TIMEOUT_SECONDS
        )));
    }
    Ok(seconds)
}

pub fn validate_config_option_input(key: &str, value: &str) -> RuntimeResult<(String, String)> {
    let key = key.trim();
    let key_ok = !key.is_empty()
        && key.chars().count() <= MAX_CONFIG_KEY_CHARS
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if !key_ok {
        return Err(AcpRuntimeError::invalid_option(format!(
            "Config key \"{}\" is invalid; use letters, digits, '.', '_' or '-' (max {}).",
            key, MAX_CONFIG_KEY_CHARS
        )));
    }

    let value = value.trim();
    if value.is_empty() {
        return Err(AcpRuntimeError::invalid_option(format!(
            "Config value for \"{}\" must not be empty.",
            key
        )));
    }
    if value.chars().count() > MAX_CONFIG_VALUE_CHARS {
        return Err(AcpRuntimeError::invalid_option(format!(
            "Config value for \"{}\" must be at most {} characters.",
            key, MAX_CONFIG_VALUE_CHARS
        )));
    }
    Ok((key.to_string(), value.to_string()))
}
