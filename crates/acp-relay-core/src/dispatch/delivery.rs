//! Payload delivery: speech transform, routing and counting

use super::context::OriginatingTarget;
use crate::config::{TtsConfig, TtsMode};
use crate::error::Result;
use crate::reply::ReplyDispatcher;
use crate::types::{DeliveryCounts, DeliveryKind, ReplyPayload};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::warn;

/// Text-to-speech collaborator
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `text`, returning a media URL for the audio.
    async fn synthesize(&self, text: &str) -> Result<String>;
}

/// Sends payloads to an explicit channel/target instead of the inbound channel
#[async_trait]
pub trait OriginatingRouter: Send + Sync {
    async fn route(
        &self,
        target: &OriginatingTarget,
        kind: DeliveryKind,
        payload: ReplyPayload,
    ) -> bool;
}

/// Speech settings resolved for one message
#[derive(Clone)]
pub(crate) struct SpeechPlan {
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub mode: TtsMode,
}

impl SpeechPlan {
    pub fn resolve(
        tts: &TtsConfig,
        synthesizer: Option<&Arc<dyn SpeechSynthesizer>>,
        inbound_audio: bool,
        voice_tagged: bool,
    ) -> Option<Self> {
        let synthesizer = synthesizer?;
        tts.applies_to(inbound_audio, voice_tagged).then(|| Self {
            synthesizer: synthesizer.clone(),
            mode: tts.mode,
        })
    }
}

/// Delivery sink for one dispatched message
pub struct DeliveryCoordinator {
    channel: Arc<dyn ReplyDispatcher>,
    route: Option<(Arc<dyn OriginatingRouter>, OriginatingTarget)>,
    speech: Option<SpeechPlan>,
    counts: Mutex<DeliveryCounts>,
}

impl DeliveryCoordinator {
    pub fn new(channel: Arc<dyn ReplyDispatcher>) -> Self {
        Self {
            channel,
            route: None,
            speech: None,
            counts: Mutex::new(DeliveryCounts::default()),
        }
    }

    pub fn with_route(mut self, router: Arc<dyn OriginatingRouter>, target: OriginatingTarget) -> Self {
        self.route = Some((router, target));
        self
    }

    pub(crate) fn with_speech(mut self, speech: Option<SpeechPlan>) -> Self {
        self.speech = speech;
        self
    }

    pub fn counts(&self) -> DeliveryCounts {
        *self.counts.lock()
    }

    /// One synthesized-audio final built from the turn's delivered text.
    ///
    /// Only in `final` speech mode. Synthesis failures are logged.
    pub async fn accumulated_speech_payload(&self, delivered_text: &str) -> Option<ReplyPayload> {
        let speech = self.speech.as_ref().filter(|s| s.mode == TtsMode::Final)?;
        if delivered_text.trim().is_empty() {
            return None;
        }
        match speech.synthesizer.synthesize(delivered_text).await {
            Ok(url) => Some(ReplyPayload::voice(url)),
            Err(e) => {
                warn!("ACP speech synthesis failed: {}", e);
                None
            }
        }
    }

    async fn transform(&self, kind: DeliveryKind, mut payload: ReplyPayload) -> ReplyPayload {
        let Some(speech) = self.speech.as_ref().filter(|s| s.mode == TtsMode::All) else {
            return payload;
        };
        if kind == DeliveryKind::Tool || payload.is_error || payload.media_url.is_some() {
            return payload;
        }
        let text = payload.text_str().trim().to_string();
        if text.is_empty() {
            return payload;
        }
        match speech.synthesizer.synthesize(&text).await {
            Ok(url) => {
                payload.media_url = Some(url);
                payload.audio_as_voice = true;
            }
            Err(e) => warn!("ACP speech synthesis failed for {} payload: {}", kind.as_str(), e),
        }
        payload
    }
}

#[async_trait]
impl ReplyDispatcher for DeliveryCoordinator {
    async fn deliver(&self, kind: DeliveryKind, payload: ReplyPayload) -> bool {
        let payload = self.transform(kind, payload).await;
        let delivered = match &self.route {
            Some((router, target)) => router.route(target, kind, payload).await,
            None => self.channel.deliver(kind, payload).await,
        };
        if delivered {
            self.counts.lock().increment(kind);
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TtsAutoMode;
    use crate::error::Error;
    use pretty_assertions::assert_eq;

    #[derive(Default)]
    struct Sink {
        seen: Mutex<Vec<(DeliveryKind, ReplyPayload)>>,
    }

    #[async_trait]
    impl ReplyDispatcher for Sink {
        async fn deliver(&self, kind: DeliveryKind, payload: ReplyPayload) -> bool {
            self.seen.lock().push((kind, payload));
            true
        }
    }

    #[async_trait]
    impl OriginatingRouter for Sink {
        async fn route(
            &self,
            target: &OriginatingTarget,
            kind: DeliveryKind,
            mut payload: ReplyPayload,
        ) -> bool {
            payload.text = Some(format!("{}:{} {}", target.channel, target.to, payload.text_str()));
            self.seen.lock().push((kind, payload));
            true
        }
    }

    struct Speech {
        fail: bool,
    }

    #[async_trait]
    impl SpeechSynthesizer for Speech {
        async fn synthesize(&self, text: &str) -> Result<String> {
            if self.fail {
                return Err(Error::Internal("tts down".into()));
            }
            Ok(format!("tts://{}", text.len()))
        }
    }

    fn plan(mode: TtsMode, fail: bool) -> Option<SpeechPlan> {
        let tts = TtsConfig {
            mode,
            auto: TtsAutoMode::Always,
        };
        let synth: Arc<dyn SpeechSynthesizer> = Arc::new(Speech { fail });
        SpeechPlan::resolve(&tts, Some(&synth), false, false)
    }

    #[tokio::test]
    async fn test_counts_successful_deliveries() {
        let sink = Arc::new(Sink::default());
        let coordinator = DeliveryCoordinator::new(sink.clone());

        assert!(coordinator.deliver(DeliveryKind::Block, ReplyPayload::text("a")).await);
        assert!(coordinator.deliver(DeliveryKind::Final, ReplyPayload::text("b")).await);

        let counts = coordinator.counts();
        assert_eq!(counts.get(DeliveryKind::Block), 1);
        assert_eq!(counts.get(DeliveryKind::Final), 1);
        assert_eq!(sink.seen.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_routes_to_originating_target() {
        let channel = Arc::new(Sink::default());
        let router = Arc::new(Sink::default());
        let coordinator = DeliveryCoordinator::new(channel.clone()).with_route(
            router.clone(),
            OriginatingTarget {
                channel: "slack".into(),
                to: "C42".into(),
            },
        );

        coordinator.deliver(DeliveryKind::Block, ReplyPayload::text("hi")).await;

        assert!(channel.seen.lock().is_empty());
        assert_eq!(router.seen.lock()[0].1.text_str(), "slack:C42 hi");
    }

    #[tokio::test]
    async fn test_all_mode_transforms_blocks_not_tools_or_errors() {
        let sink = Arc::new(Sink::default());
        let coordinator = DeliveryCoordinator::new(sink.clone()).with_speech(plan(TtsMode::All, false));

        coordinator.deliver(DeliveryKind::Tool, ReplyPayload::text("tool")).await;
        coordinator.deliver(DeliveryKind::Block, ReplyPayload::text("spoken")).await;
        coordinator.deliver(DeliveryKind::Final, ReplyPayload::error("bad")).await;

        let seen = sink.seen.lock();
        assert_eq!(seen[0].1.media_url, None);
        assert_eq!(seen[1].1.media_url.as_deref(), Some("tts://6"));
        assert!(seen[1].1.audio_as_voice);
        assert_eq!(seen[2].1.media_url, None);
    }

    #[tokio::test]
    async fn test_final_mode_builds_one_accumulated_payload() {
        let sink = Arc::new(Sink::default());
        let coordinator = DeliveryCoordinator::new(sink.clone()).with_speech(plan(TtsMode::Final, false));

        coordinator.deliver(DeliveryKind::Block, ReplyPayload::text("one")).await;
        assert_eq!(sink.seen.lock()[0].1.media_url, None);

        let payload = coordinator.accumulated_speech_payload("one\ntwo").await.unwrap();
        assert_eq!(payload.media_url.as_deref(), Some("tts://7"));
        assert!(coordinator.accumulated_speech_payload("  ").await.is_none());
    }

    #[tokio::test]
    async fn test_speech_failure_is_not_fatal() {
        let sink = Arc::new(Sink::default());
        let coordinator = DeliveryCoordinator::new(sink.clone()).with_speech(plan(TtsMode::All, true));

        assert!(coordinator.deliver(DeliveryKind::Block, ReplyPayload::text("x")).await);
        assert_eq!(sink.seen.lock()[0].1, ReplyPayload::text("x"));

        let coordinator = DeliveryCoordinator::new(sink).with_speech(plan(TtsMode::Final, true));
        assert!(coordinator.accumulated_speech_payload("text").await.is_none());
    }

    #[test]
    fn test_speech_plan_requires_synthesizer_and_auto() {
        let tts = TtsConfig::default();
        let synth: Arc<dyn SpeechSynthesizer> = Arc::new(Speech { fail: false });
        assert!(SpeechPlan::resolve(&tts, Some(&synth), true, true).is_none());

        let tts = TtsConfig {
            mode: TtsMode::Final,
            auto: TtsAutoMode::Inbound,
        };
        assert!(SpeechPlan::resolve(&tts, None, true, false).is_none());
        assert!(SpeechPlan::resolve(&tts, Some(&synth), false, false).is_none());
        assert!(SpeechPlan::resolve(&tts, Some(&synth), true, false).is_some());
    }
}
