//! Reply payloads handed to the channel dispatcher

use serde::{Deserialize, Serialize};

/// Unit of delivery back to a channel
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ReplyPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub audio_as_voice: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl ReplyPayload {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            is_error: true,
            ..Self::default()
        }
    }

    pub fn voice(media_url: impl Into<String>) -> Self {
        Self {
            media_url: Some(media_url.into()),
            audio_as_voice: true,
            ..Self::default()
        }
    }

    pub fn text_str(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }
}

/// Delivery lane of a payload
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryKind {
    Tool,
    Block,
    Final,
}

impl DeliveryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tool => "tool",
            Self::Block => "block",
            Self::Final => "final",
        }
    }

    fn index(&self) -> usize {
        match self {
            Self::Tool => 0,
            Self::Block => 1,
            Self::Final => 2,
        }
    }
}

/// Successful hand-offs per delivery lane
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DeliveryCounts {
    counts: [usize; 3],
}

impl DeliveryCounts {
    pub fn get(&self, kind: DeliveryKind) -> usize {
        self.counts[kind.index()]
    }

    pub fn increment(&mut self, kind: DeliveryKind) {
        self.counts[kind.index()] += 1;
    }

    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_serialization_skips_defaults() {
        let json = serde_json::to_value(ReplyPayload::text("hi")).unwrap();
        assert_eq!(json, serde_json::json!({ "text": "hi" }));

        let json = serde_json::to_value(ReplyPayload::error("boom")).unwrap();
        assert_eq!(json, serde_json::json!({ "text": "boom", "isError": true }));
    }

    #[test]
    fn test_delivery_counts() {
        let mut counts = DeliveryCounts::default();
        counts.increment(DeliveryKind::Block);
        counts.increment(DeliveryKind::Block);
        counts.increment(DeliveryKind::Final);

        assert_eq!(counts.get(DeliveryKind::Block), 2);
        assert_eq!(counts.get(DeliveryKind::Tool), 0);
        assert_eq!(counts.total(), 3);
    }
}
