//! Session identity model
//!
//! A session's backend/agent identifiers start out `pending` and become
//! `resolved` once the control plane confirms them after a successful turn or
//! status probe. Resolution is monotonic: nothing moves a resolved identity
//! back to pending.

use crate::types::{
    IdentitySource, IdentityState, RuntimeHandle, RuntimeStatus, SessionAcpMeta, SessionIdentity,
};
use chrono::{DateTime, Utc};

/// Where identifier lines are rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierLineMode {
    /// `/acp status` output
    Status,
    /// Inline in a running conversation thread
    Thread,
}

pub const PENDING_IDENTITY_LINE: &str = "session ids: pending (available after the first reply)";

/// Resume commands keyed on normalized agent id; `{id}` is the agent session id.
const RESUME_HINTS: &[(&str, &str)] = &[
    ("codex", "resume in Codex CLI: `codex resume {id}`"),
    ("claude", "resume in Claude Code: `claude --resume {id}`"),
    ("gemini", "resume in Gemini CLI: `gemini --resume {id}`"),
    ("opencode", "resume in OpenCode: `opencode --session {id}`"),
    ("pi", "resume in Pi: `pi --session {id}`"),
];

pub fn is_identity_pending(identity: Option<&SessionIdentity>) -> bool {
    match identity {
        None => true,
        Some(identity) => identity.state == IdentityState::Pending,
    }
}

fn clean_id(value: Option<&String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn normalize_identity(identity: &SessionIdentity) -> SessionIdentity {
    let mut normalized = SessionIdentity {
        state: identity.state,
        source: identity.source,
        last_updated_at: identity.last_updated_at,
        acp_record_id: clean_id(identity.acp_record_id.as_ref()),
        backend_session_id: clean_id(identity.backend_session_id.as_ref()),
        agent_session_id: clean_id(identity.agent_session_id.as_ref()),
    };
    // Resolved without any identifier is not a meaningful state.
    if !normalized.has_identifier() {
        normalized.state = IdentityState::Pending;
    }
    normalized
}

/// Project the identity out of persisted session metadata.
pub fn resolve_identity_from_meta(meta: Option<&SessionAcpMeta>) -> Option<SessionIdentity> {
    meta.and_then(|m| m.identity.as_ref()).map(normalize_identity)
}

/// Pending identity carrying whatever ids the adapter put on the handle.
pub fn identity_from_handle(handle: &RuntimeHandle, now: DateTime<Utc>) -> SessionIdentity {
    normalize_identity(&SessionIdentity {
        state: IdentityState::Pending,
        source: IdentitySource::Ensure,
        last_updated_at: now,
        acp_record_id: handle.acp_record_id.clone(),
        backend_session_id: handle.backend_session_id.clone(),
        agent_session_id: handle.agent_session_id.clone(),
    })
}

/// Identity reported by a status probe, marked resolved when it carries ids.
pub fn identity_from_status(status: &RuntimeStatus, now: DateTime<Utc>) -> Option<SessionIdentity> {
    let identity = normalize_identity(&SessionIdentity {
        state: IdentityState::Resolved,
        source: IdentitySource::Status,
        last_updated_at: now,
        acp_record_id: status.acp_record_id.clone(),
        backend_session_id: status.backend_session_id.clone(),
        agent_session_id: status.agent_session_id.clone(),
    });
    identity.has_identifier().then_some(identity)
}

/// Merge an identity update into the current identity.
///
/// A resolved identity stays resolved. While resolved, a pending update can
/// only fill in ids that are still missing; a resolved update may replace them.
pub fn merge_session_identity(
    current: Option<&SessionIdentity>,
    incoming: Option<&SessionIdentity>,
    now: DateTime<Utc>,
) -> Option<SessionIdentity> {
    let current = current.map(normalize_identity);
    let incoming = incoming.map(normalize_identity);

    let (current, incoming) = match (current, incoming) {
        (None, None) => return None,
        (Some(current), None) => return Some(current),
        (None, Some(incoming)) => return Some(incoming),
        (Some(current), Some(incoming)) => (current, incoming),
    };

    let current_resolved = current.state == IdentityState::Resolved;
    let incoming_resolved = incoming.state == IdentityState::Resolved;
    let pick = |cur: &Option<String>, inc: &Option<String>| -> Option<String> {
        if current_resolved && !incoming_resolved {
            cur.clone().or_else(|| inc.clone())
        } else {
            inc.clone().or_else(|| cur.clone())
        }
    };

    let mut merged = SessionIdentity {
        state: if current_resolved || incoming_resolved {
            IdentityState::Resolved
        } else {
            IdentityState::Pending
        },
        source: incoming.source,
        last_updated_at: now,
        acp_record_id: pick(&current.acp_record_id, &incoming.acp_record_id),
        backend_session_id: pick(&current.backend_session_id, &incoming.backend_session_id),
        agent_session_id: pick(&current.agent_session_id, &incoming.agent_session_id),
    };
    if !merged.has_identifier() {
        merged.state = IdentityState::Pending;
    }
    Some(merged)
}

/// Reduce an agent id to the key used by the resume-hint table.
pub fn normalize_agent_id(agent: &str) -> String {
    let mut id = agent.trim().to_ascii_lowercase();
    for suffix in ["-acp", "-cli", "-code"] {
        if let Some(stripped) = id.strip_suffix(suffix) {
            id = stripped.to_string();
        }
    }
    id
}

fn resume_hint(agent: &str, agent_session_id: &str) -> Option<String> {
    let key = normalize_agent_id(agent);
    RESUME_HINTS
        .iter()
        .find(|(id, _)| *id == key)
        .map(|(_, template)| template.replace("{id}", agent_session_id))
}

/// Human-readable identifier lines for status output or a thread notice.
///
/// A pending identity that already carries an id renders one placeholder
/// line in status mode and nothing in thread mode; one without ids renders
/// nothing at all. Resolved identities render agent id, backend session id
/// and backend record id (whichever are present), then a resume hint when
/// the agent has one.
pub fn resolve_identifier_lines(
    backend: &str,
    agent: &str,
    identity: Option<&SessionIdentity>,
    mode: IdentifierLineMode,
) -> Vec<String> {
    let identity = identity.map(normalize_identity);

    if is_identity_pending(identity.as_ref()) {
        let has_id = identity.as_ref().is_some_and(SessionIdentity::has_identifier);
        return match mode {
            IdentifierLineMode::Status if has_id => vec![PENDING_IDENTITY_LINE.to_string()],
            _ => Vec::new(),
        };
    }

    // Not pending, so present.
    let Some(identity) = identity else {
        return Vec::new();
    };

    let backend = if backend.trim().is_empty() {
        "backend"
    } else {
        backend.trim()
    };
    let mut lines = Vec::new();
    if let Some(id) = &identity.agent_session_id {
        lines.push(format!("agent session id: {}", id));
    }
    if let Some(id) = &identity.backend_session_id {
        lines.push(format!("{} session id: {}", backend, id));
    }
    if let Some(id) = &identity.acp_record_id {
        lines.push(format!("{} record id: {}", backend, id));
    }
    if let Some(hint) = identity
        .agent_session_id
        .as_deref()
        .and_then(|id| resume_hint(agent, id))
    {
        lines.push(hint);
    }
    lines
}
