//! Usage events reported by the conversation and voice pipelines.
//!
//! The billing engine never measures usage itself: token counts come from
//! the provider's completion report, audio duration from the captured
//! recording, character counts from the text actually synthesized.

use serde::{Deserialize, Serialize};

/// One billable invocation's metered quantities.
///
/// Every quantity field is optional; an absent field contributes nothing to
/// the cost and produces no breakdown entry. Which fields a model actually
/// reads is decided by its pricing rule. For the synthesis family,
/// `output_tokens` carries the synthesized-audio token count (the upstream
/// pipeline has always reported it under that name).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageEvent {
    /// The model that was invoked.
    pub model: String,

    /// Prompt tokens, for token-priced and realtime models.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,

    /// Completion tokens; audio tokens for the synthesis family.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,

    /// Captured audio length in seconds, for duration-priced models.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_duration_seconds: Option<f64>,

    /// Characters submitted for synthesis.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character_count: Option<u64>,

    /// Realtime input audio tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_input_tokens: Option<u64>,

    /// Realtime output audio tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_output_tokens: Option<u64>,
}

impl UsageEvent {
    /// An event with a model id and no quantities.
    #[must_use]
    pub fn empty(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            input_tokens: None,
            output_tokens: None,
            audio_duration_seconds: None,
            character_count: None,
            audio_input_tokens: None,
            audio_output_tokens: None,
        }
    }

    /// A text chat turn.
    #[must_use]
    pub fn text(model: impl Into<String>, input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens: Some(input_tokens),
            output_tokens: Some(output_tokens),
            ..Self::empty(model)
        }
    }

    /// A transcription of `seconds` of captured audio.
    #[must_use]
    pub fn transcription(model: impl Into<String>, seconds: f64) -> Self {
        Self {
            audio_duration_seconds: Some(seconds),
            ..Self::empty(model)
        }
    }

    /// A speech synthesis call: input characters plus output audio tokens.
    #[must_use]
    pub fn synthesis(model: impl Into<String>, characters: u64, audio_tokens: u64) -> Self {
        Self {
            character_count: Some(characters),
            output_tokens: Some(audio_tokens),
            ..Self::empty(model)
        }
    }

    /// A realtime voice exchange mixing text and audio tokens.
    #[must_use]
    pub fn realtime(
        model: impl Into<String>,
        input_tokens: u64,
        output_tokens: u64,
        audio_input_tokens: u64,
        audio_output_tokens: u64,
    ) -> Self {
        Self {
            input_tokens: Some(input_tokens),
            output_tokens: Some(output_tokens),
            audio_input_tokens: Some(audio_input_tokens),
            audio_output_tokens: Some(audio_output_tokens),
            ..Self::empty(model)
        }
    }
}

/// The billing families usage falls into. Tier policies (unlimited usage,
/// daily caps) are expressed per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageKind {
    /// Token-priced text chat.
    TextChat,

    /// Duration-priced audio transcription.
    Transcription,

    /// Character/token-priced speech synthesis.
    Synthesis,

    /// Realtime mixed text and audio.
    RealtimeVoice,
}

impl UsageKind {
    /// Stable name used in logs and API payloads.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::TextChat => "text_chat",
            Self::Transcription => "transcription",
            Self::Synthesis => "synthesis",
            Self::RealtimeVoice => "realtime_voice",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_event_sets_only_token_fields() {
        let event = UsageEvent::text("gpt-4o-mini", 800, 200);
        assert_eq!(event.input_tokens, Some(800));
        assert_eq!(event.output_tokens, Some(200));
        assert!(event.audio_duration_seconds.is_none());
        assert!(event.character_count.is_none());
    }

    #[test]
    fn synthesis_event_carries_audio_tokens_in_output_tokens() {
        let event = UsageEvent::synthesis("gpt-4o-mini-tts", 500, 1000);
        assert_eq!(event.character_count, Some(500));
        assert_eq!(event.output_tokens, Some(1000));
    }

    #[test]
    fn absent_fields_are_omitted_from_json() {
        let event = UsageEvent::transcription("whisper-1", 12.5);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["audio_duration_seconds"], 12.5);
        assert!(json.get("input_tokens").is_none());
    }

    #[test]
    fn usage_kind_as_str() {
        assert_eq!(UsageKind::TextChat.as_str(), "text_chat");
        assert_eq!(UsageKind::RealtimeVoice.as_str(), "realtime_voice");
    }
}
