//! Inbound message context

/// Explicit channel/target pair for cross-channel replies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginatingTarget {
    pub channel: String,
    pub to: String,
}

/// What the routing layer knows about one inbound message
#[derive(Debug, Clone, Default)]
pub struct InboundContext {
    pub session_key: String,
    pub channel: Option<String>,
    pub account_id: Option<String>,
    pub body: Option<String>,
    pub raw_body: Option<String>,
    pub command_body: Option<String>,
    pub body_for_commands: Option<String>,
    pub body_for_agent: Option<String>,
    /// Set for thread-bound or otherwise durably addressed conversations
    pub thread_id: Option<String>,
    pub inbound_audio: bool,
    pub voice_tagged: bool,
    /// Already claimed by a local command handler
    pub handled_as_command: bool,
    pub originating: Option<OriginatingTarget>,
}

impl InboundContext {
    pub fn new(session_key: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            session_key: session_key.into(),
            body: Some(body.into()),
            ..Self::default()
        }
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn with_account(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = Some(account_id.into());
        self
    }

    pub fn with_thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn with_body_for_agent(mut self, text: impl Into<String>) -> Self {
        self.body_for_agent = Some(text.into());
        self
    }

    pub fn with_originating(mut self, channel: impl Into<String>, to: impl Into<String>) -> Self {
        self.originating = Some(OriginatingTarget {
            channel: channel.into(),
            to: to.into(),
        });
        self
    }

    /// Prompt text for the agent: the first non-blank of the agent body,
    /// command body variants, raw body and body, trimmed.
    pub fn resolve_prompt_text(&self) -> String {
        [
            &self.body_for_agent,
            &self.body_for_commands,
            &self.command_body,
            &self.raw_body,
            &self.body,
        ]
        .into_iter()
        .flatten()
        .map(|text| text.trim())
        .find(|text| !text.is_empty())
        .unwrap_or_default()
        .to_string()
    }

    pub fn is_thread_bound(&self) -> bool {
        self.thread_id
            .as_deref()
            .is_some_and(|id| !id.trim().is_empty())
    }
}
