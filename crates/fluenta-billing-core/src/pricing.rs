//! Pricing registry for AI model usage.
//!
//! The registry is an immutable, injected table mapping model ids to pricing
//! rules. Four mutually incompatible pricing shapes exist in production:
//! token-priced text, duration-priced transcription, character+token-priced
//! synthesis, and realtime mixed text/audio.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::usage::UsageKind;

/// USD bought by one credit (the credit conversion rate).
///
/// `credits = ceil(usd_cost / CREDIT_UNIT_USD)`, so a $0.00024 chat turn
/// costs 3 credits and a $0.006 transcribed minute costs 60.
pub const CREDIT_UNIT_USD: f64 = 0.0001;

/// How one model's usage converts to USD. Rates are per single unit
/// (token, character) or per minute, as published by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum PricingRule {
    /// Token-priced text models (chat completions).
    TextTokens {
        /// USD per input token.
        input_per_token: f64,
        /// USD per output token.
        output_per_token: f64,
    },

    /// Duration-priced audio transcription.
    AudioDuration {
        /// USD per minute of audio.
        per_minute: f64,
    },

    /// Speech synthesis priced on input characters and output audio tokens.
    Synthesis {
        /// USD per input character.
        per_character: f64,
        /// USD per synthesized audio token.
        per_audio_token: f64,
    },

    /// Realtime voice models mixing text tokens and audio tokens.
    ///
    /// Audio is billed per minute; `audio_tokens_per_second` converts the
    /// provider's token counts into minutes.
    RealtimeMixed {
        /// USD per text input token.
        text_input_per_token: f64,
        /// USD per text output token.
        text_output_per_token: f64,
        /// USD per minute of input audio.
        audio_input_per_minute: f64,
        /// USD per minute of output audio.
        audio_output_per_minute: f64,
        /// Audio tokens emitted per second of audio.
        audio_tokens_per_second: f64,
    },
}

impl PricingRule {
    /// The usage kind this rule prices.
    #[must_use]
    pub const fn kind(&self) -> UsageKind {
        match self {
            Self::TextTokens { .. } => UsageKind::TextChat,
            Self::AudioDuration { .. } => UsageKind::Transcription,
            Self::Synthesis { .. } => UsageKind::Synthesis,
            Self::RealtimeMixed { .. } => UsageKind::RealtimeVoice,
        }
    }
}

/// Immutable table of per-model pricing rules plus the credit rate.
///
/// Constructed once (typically from configuration) and injected into the
/// calculator, so tests can substitute fixtures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingRegistry {
    /// USD bought by one credit.
    pub credit_unit_usd: f64,

    /// Pricing rules keyed by model id.
    pub rules: HashMap<String, PricingRule>,
}

impl Default for PricingRegistry {
    fn default() -> Self {
        let mut rules = HashMap::new();

        // Text chat models
        rules.insert(
            "gpt-4o-mini".to_string(),
            PricingRule::TextTokens {
                input_per_token: 0.15 / 1e6, // $0.15 per 1M input tokens
                output_per_token: 0.60 / 1e6, // $0.60 per 1M output tokens
            },
        );
        rules.insert(
            "gpt-4o".to_string(),
            PricingRule::TextTokens {
                input_per_token: 2.50 / 1e6,
                output_per_token: 10.00 / 1e6,
            },
        );

        // Transcription
        rules.insert(
            "whisper-1".to_string(),
            PricingRule::AudioDuration {
                per_minute: 0.006, // $0.006 per minute
            },
        );

        // Speech synthesis
        rules.insert(
            "gpt-4o-mini-tts".to_string(),
            PricingRule::Synthesis {
                per_character: 0.60 / 1e6,  // $0.60 per 1M input characters
                per_audio_token: 12.00 / 1e6, // $12.00 per 1M audio tokens
            },
        );

        // Realtime voice
        rules.insert(
            "gpt-4o-realtime-preview".to_string(),
            PricingRule::RealtimeMixed {
                text_input_per_token: 5.00 / 1e6,
                text_output_per_token: 20.00 / 1e6,
                audio_input_per_minute: 0.06,  // $100 per 1M audio tokens
                audio_output_per_minute: 0.12, // $200 per 1M audio tokens
                audio_tokens_per_second: 10.0,
            },
        );

        Self {
            credit_unit_usd: CREDIT_UNIT_USD,
            rules,
        }
    }
}

impl PricingRegistry {
    /// Look up the pricing rule for a model id.
    #[must_use]
    pub fn rule(&self, model: &str) -> Option<&PricingRule> {
        self.rules.get(model)
    }

    /// The usage kind a model belongs to, when the model is known.
    #[must_use]
    pub fn kind_of(&self, model: &str) -> Option<UsageKind> {
        self.rules.get(model).map(PricingRule::kind)
    }

    /// The model used to price balance estimates for a usage kind, before
    /// the caller has resolved a concrete model.
    #[must_use]
    pub const fn reference_model(kind: UsageKind) -> &'static str {
        match kind {
            UsageKind::TextChat => "gpt-4o-mini",
            UsageKind::Transcription => "whisper-1",
            UsageKind::Synthesis => "gpt-4o-mini-tts",
            UsageKind::RealtimeVoice => "gpt-4o-realtime-preview",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_covers_all_kinds() {
        let registry = PricingRegistry::default();
        assert_eq!(registry.kind_of("gpt-4o-mini"), Some(UsageKind::TextChat));
        assert_eq!(
            registry.kind_of("whisper-1"),
            Some(UsageKind::Transcription)
        );
        assert_eq!(
            registry.kind_of("gpt-4o-mini-tts"),
            Some(UsageKind::Synthesis)
        );
        assert_eq!(
            registry.kind_of("gpt-4o-realtime-preview"),
            Some(UsageKind::RealtimeVoice)
        );
    }

    #[test]
    fn unknown_model_has_no_rule() {
        let registry = PricingRegistry::default();
        assert!(registry.rule("mystery-model").is_none());
        assert!(registry.kind_of("mystery-model").is_none());
    }

    #[test]
    fn reference_models_exist_in_default_registry() {
        let registry = PricingRegistry::default();
        for kind in [
            UsageKind::TextChat,
            UsageKind::Transcription,
            UsageKind::Synthesis,
            UsageKind::RealtimeVoice,
        ] {
            let model = PricingRegistry::reference_model(kind);
            assert_eq!(registry.kind_of(model), Some(kind), "missing {model}");
        }
    }

    #[test]
    fn registry_survives_serde() {
        let registry = PricingRegistry::default();
        let json = serde_json::to_string(&registry).unwrap();
        let parsed: PricingRegistry = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.rules.len(), registry.rules.len());
        assert_eq!(parsed.rule("whisper-1"), registry.rule("whisper-1"));
    }
}
