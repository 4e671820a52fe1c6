//! Converts usage events into credits.
//!
//! Three pure stages: normalize one event into USD via its pricing rule,
//! convert USD into an integer credit count (ceiling with a minimum-charge
//! floor), and aggregate a session of events. Rounding always happens per
//! event, never on the pooled total, so many small events cannot sum to a
//! free session.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::pricing::{PricingRegistry, PricingRule};
use crate::usage::UsageEvent;

/// Breakdown map keys. These names are the reporting contract with the
/// upstream pipelines and dashboards; do not rename casually.
pub mod breakdown {
    /// Text prompt token cost.
    pub const INPUT_TOKENS: &str = "inputTokens";
    /// Text completion token cost.
    pub const OUTPUT_TOKENS: &str = "outputTokens";
    /// Transcribed audio duration cost.
    pub const AUDIO_DURATION: &str = "audioDuration";
    /// Synthesis input character cost.
    pub const TTS_INPUT: &str = "ttsInput";
    /// Synthesis output audio token cost.
    pub const TTS_OUTPUT: &str = "ttsOutput";
    /// Realtime input audio cost.
    pub const AUDIO_INPUT: &str = "audioInput";
    /// Realtime output audio cost.
    pub const AUDIO_OUTPUT: &str = "audioOutput";
}

/// Guards the ceiling conversion against float error: without it an exactly
/// priced event (whisper 60s = $0.006 = 60.0 credits) could round up to 61.
const CEIL_EPSILON: f64 = 1e-9;

/// The credit cost of some usage.
///
/// Invariant: `credits == 0` iff `usd_cost == 0.0` iff no field was supplied;
/// any positive cost charges at least one credit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditResult {
    /// Whole credits to charge.
    pub credits: i64,

    /// Raw provider cost in USD.
    pub usd_cost: f64,

    /// Per-component USD costs, keyed by the [`breakdown`] names. A key is
    /// present iff the corresponding raw field was supplied on the event,
    /// even when the supplied value was zero.
    pub breakdown: BTreeMap<String, f64>,
}

impl CreditResult {
    /// A zero-cost result with an empty breakdown.
    #[must_use]
    pub fn zero() -> Self {
        Self {
            credits: 0,
            usd_cost: 0.0,
            breakdown: BTreeMap::new(),
        }
    }
}

/// A non-fatal condition noticed while pricing usage. Callers decide whether
/// to log, alert, or ignore; pricing itself never fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UsageDiagnostic {
    /// The event named a model with no pricing rule; it was billed at zero.
    UnknownModel {
        /// The unresolved model id.
        model: String,
    },
}

/// A priced charge plus any diagnostics raised while computing it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageCharge {
    /// The credit cost.
    pub result: CreditResult,

    /// Conditions the caller should surface (unknown models, etc.).
    pub diagnostics: Vec<UsageDiagnostic>,
}

/// Prices usage events against an injected registry.
#[derive(Debug, Clone)]
pub struct CreditCalculator {
    registry: PricingRegistry,
}

impl CreditCalculator {
    /// Create a calculator over the given pricing registry.
    #[must_use]
    pub fn new(registry: PricingRegistry) -> Self {
        Self { registry }
    }

    /// The registry this calculator prices against.
    #[must_use]
    pub fn registry(&self) -> &PricingRegistry {
        &self.registry
    }

    /// Price a single usage event.
    ///
    /// An unknown model yields a zero-cost result plus an `UnknownModel`
    /// diagnostic; it is never a hard failure.
    #[must_use]
    pub fn calculate(&self, event: &UsageEvent) -> UsageCharge {
        let Some(rule) = self.registry.rule(&event.model) else {
            return UsageCharge {
                result: CreditResult::zero(),
                diagnostics: vec![UsageDiagnostic::UnknownModel {
                    model: event.model.clone(),
                }],
            };
        };

        let breakdown = normalize(event, rule);
        let usd_cost = breakdown.values().sum();

        UsageCharge {
            result: CreditResult {
                credits: self.usd_to_credits(usd_cost),
                usd_cost,
                breakdown,
            },
            diagnostics: Vec::new(),
        }
    }

    /// Price an ordered session of events.
    ///
    /// Each event is rounded independently and the credit counts summed, so
    /// `aggregate([a, b]).credits == calculate(a).credits + calculate(b).credits`.
    /// Breakdown keys merge plainly when every event shares one model and
    /// are namespaced `{model}_{key}` when distinct models appear.
    #[must_use]
    pub fn aggregate(&self, events: &[UsageEvent]) -> UsageCharge {
        let multi_model = events
            .iter()
            .any(|event| event.model != events[0].model);

        let mut credits = 0i64;
        let mut usd_cost = 0.0f64;
        let mut merged: BTreeMap<String, f64> = BTreeMap::new();
        let mut diagnostics = Vec::new();

        for event in events {
            let charge = self.calculate(event);
            credits += charge.result.credits;
            usd_cost += charge.result.usd_cost;
            diagnostics.extend(charge.diagnostics);

            for (key, value) in charge.result.breakdown {
                let key = if multi_model {
                    format!("{}_{key}", event.model)
                } else {
                    key
                };
                *merged.entry(key).or_insert(0.0) += value;
            }
        }

        UsageCharge {
            result: CreditResult {
                credits,
                usd_cost,
                breakdown: merged,
            },
            diagnostics,
        }
    }

    /// Convert a USD cost to whole credits: ceiling division by the credit
    /// unit, with a floor of one credit for any positive cost.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn usd_to_credits(&self, usd: f64) -> i64 {
        if usd <= 0.0 {
            return 0;
        }
        let raw = (usd / self.registry.credit_unit_usd - CEIL_EPSILON).ceil() as i64;
        raw.max(1)
    }
}

/// Apply one pricing rule to one event, producing the per-component USD
/// breakdown. A component appears iff its raw field was supplied.
#[allow(clippy::cast_precision_loss)]
fn normalize(event: &UsageEvent, rule: &PricingRule) -> BTreeMap<String, f64> {
    let mut parts = BTreeMap::new();

    match *rule {
        PricingRule::TextTokens {
            input_per_token,
            output_per_token,
        } => {
            if let Some(tokens) = event.input_tokens {
                parts.insert(
                    breakdown::INPUT_TOKENS.to_string(),
                    tokens as f64 * input_per_token,
                );
            }
            if let Some(tokens) = event.output_tokens {
                parts.insert(
                    breakdown::OUTPUT_TOKENS.to_string(),
                    tokens as f64 * output_per_token,
                );
            }
        }

        PricingRule::AudioDuration { per_minute } => {
            if let Some(seconds) = event.audio_duration_seconds {
                parts.insert(
                    breakdown::AUDIO_DURATION.to_string(),
                    seconds / 60.0 * per_minute,
                );
            }
        }

        PricingRule::Synthesis {
            per_character,
            per_audio_token,
        } => {
            if let Some(characters) = event.character_count {
                parts.insert(
                    breakdown::TTS_INPUT.to_string(),
                    characters as f64 * per_character,
                );
            }
            // The pipeline reports synthesized-audio tokens as output_tokens.
            if let Some(tokens) = event.output_tokens {
                parts.insert(
                    breakdown::TTS_OUTPUT.to_string(),
                    tokens as f64 * per_audio_token,
                );
            }
        }

        PricingRule::RealtimeMixed {
            text_input_per_token,
            text_output_per_token,
            audio_input_per_minute,
            audio_output_per_minute,
            audio_tokens_per_second,
        } => {
            if let Some(tokens) = event.input_tokens {
                parts.insert(
                    breakdown::INPUT_TOKENS.to_string(),
                    tokens as f64 * text_input_per_token,
                );
            }
            if let Some(tokens) = event.output_tokens {
                parts.insert(
                    breakdown::OUTPUT_TOKENS.to_string(),
                    tokens as f64 * text_output_per_token,
                );
            }
            let tokens_per_minute = audio_tokens_per_second * 60.0;
            if let Some(tokens) = event.audio_input_tokens {
                parts.insert(
                    breakdown::AUDIO_INPUT.to_string(),
                    tokens as f64 / tokens_per_minute * audio_input_per_minute,
                );
            }
            if let Some(tokens) = event.audio_output_tokens {
                parts.insert(
                    breakdown::AUDIO_OUTPUT.to_string(),
                    tokens as f64 / tokens_per_minute * audio_output_per_minute,
                );
            }
        }
    }

    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calculator() -> CreditCalculator {
        CreditCalculator::new(PricingRegistry::default())
    }

    fn assert_usd(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn text_chat_turn() {
        let charge = calculator().calculate(&UsageEvent::text("gpt-4o-mini", 800, 200));
        assert_eq!(charge.result.credits, 3);
        assert_usd(charge.result.usd_cost, 0.00024);
        assert_usd(charge.result.breakdown[breakdown::INPUT_TOKENS], 0.00012);
        assert_usd(charge.result.breakdown[breakdown::OUTPUT_TOKENS], 0.00012);
        assert!(charge.diagnostics.is_empty());
    }

    #[test]
    fn transcribed_minute() {
        let charge = calculator().calculate(&UsageEvent::transcription("whisper-1", 60.0));
        assert_eq!(charge.result.credits, 60);
        assert_usd(charge.result.usd_cost, 0.006);
        assert_usd(charge.result.breakdown[breakdown::AUDIO_DURATION], 0.006);
    }

    #[test]
    fn synthesis_call() {
        let charge = calculator().calculate(&UsageEvent::synthesis("gpt-4o-mini-tts", 500, 1000));
        assert_eq!(charge.result.credits, 123);
        assert_usd(charge.result.breakdown[breakdown::TTS_INPUT], 0.0003);
        assert_usd(charge.result.breakdown[breakdown::TTS_OUTPUT], 0.012);
    }

    #[test]
    fn realtime_exchange() {
        // 600 audio tokens at 10 tokens/sec is exactly one minute.
        let event = UsageEvent::realtime("gpt-4o-realtime-preview", 100, 200, 600, 1200);
        let charge = calculator().calculate(&event);
        assert_usd(charge.result.breakdown[breakdown::INPUT_TOKENS], 0.0005);
        assert_usd(charge.result.breakdown[breakdown::OUTPUT_TOKENS], 0.004);
        assert_usd(charge.result.breakdown[breakdown::AUDIO_INPUT], 0.06);
        assert_usd(charge.result.breakdown[breakdown::AUDIO_OUTPUT], 0.24);
        assert_eq!(charge.result.credits, 3045);
    }

    #[test]
    fn zero_usage_is_free_for_all_known_models() {
        let calc = calculator();
        for model in [
            "gpt-4o-mini",
            "gpt-4o",
            "whisper-1",
            "gpt-4o-mini-tts",
            "gpt-4o-realtime-preview",
        ] {
            let charge = calc.calculate(&UsageEvent::empty(model));
            assert_eq!(charge.result, CreditResult::zero(), "model {model}");
            assert!(charge.diagnostics.is_empty());
        }
    }

    #[test]
    fn unknown_model_is_free_with_diagnostic() {
        let charge = calculator().calculate(&UsageEvent::text("mystery-model", 1000, 1000));
        assert_eq!(charge.result, CreditResult::zero());
        assert_eq!(
            charge.diagnostics,
            vec![UsageDiagnostic::UnknownModel {
                model: "mystery-model".to_string()
            }]
        );
    }

    #[test]
    fn supplied_zero_keeps_its_breakdown_key() {
        let charge = calculator().calculate(&UsageEvent::text("gpt-4o-mini", 0, 500));
        assert!(charge.result.breakdown.contains_key(breakdown::INPUT_TOKENS));
        assert_usd(charge.result.breakdown[breakdown::INPUT_TOKENS], 0.0);
    }

    #[test]
    fn omitted_field_omits_its_breakdown_key() {
        let mut event = UsageEvent::empty("gpt-4o-mini");
        event.output_tokens = Some(500);
        let charge = calculator().calculate(&event);
        assert!(!charge.result.breakdown.contains_key(breakdown::INPUT_TOKENS));
        assert!(charge.result.breakdown.contains_key(breakdown::OUTPUT_TOKENS));
    }

    #[test]
    fn nonzero_usage_always_costs_at_least_one_credit() {
        let charge = calculator().calculate(&UsageEvent::text("gpt-4o-mini", 1, 0));
        assert!(charge.result.usd_cost > 0.0);
        assert_eq!(charge.result.credits, 1);
    }

    #[test]
    fn aggregate_matches_per_event_rounding() {
        let calc = calculator();
        let a = UsageEvent::text("gpt-4o-mini", 800, 200);
        let b = UsageEvent::text("gpt-4o-mini", 1, 1);
        let combined = calc.aggregate(&[a.clone(), b.clone()]);
        assert_eq!(
            combined.result.credits,
            calc.calculate(&a).result.credits + calc.calculate(&b).result.credits
        );
        // Same model: keys merge without namespacing.
        assert!(combined.result.breakdown.contains_key(breakdown::INPUT_TOKENS));
    }

    #[test]
    fn aggregate_namespaces_keys_across_models() {
        let calc = calculator();
        let combined = calc.aggregate(&[
            UsageEvent::text("gpt-4o-mini", 800, 200),
            UsageEvent::transcription("whisper-1", 30.0),
        ]);
        assert!(combined
            .result
            .breakdown
            .contains_key("gpt-4o-mini_inputTokens"));
        assert!(combined
            .result
            .breakdown
            .contains_key("whisper-1_audioDuration"));
        assert!(!combined.result.breakdown.contains_key(breakdown::INPUT_TOKENS));
    }

    #[test]
    fn aggregate_of_nothing_is_zero() {
        let charge = calculator().aggregate(&[]);
        assert_eq!(charge.result, CreditResult::zero());
        assert!(charge.diagnostics.is_empty());
    }

    #[test]
    fn aggregate_collects_diagnostics() {
        let calc = calculator();
        let combined = calc.aggregate(&[
            UsageEvent::text("gpt-4o-mini", 10, 10),
            UsageEvent::text("mystery-model", 10, 10),
        ]);
        assert_eq!(combined.diagnostics.len(), 1);
    }

    #[test]
    fn exact_multiples_do_not_round_up() {
        // $0.006 is exactly 60 credits; float error must not make it 61.
        assert_eq!(calculator().usd_to_credits(0.006), 60);
        assert_eq!(calculator().usd_to_credits(0.0001), 1);
        assert_eq!(calculator().usd_to_credits(0.0), 0);
    }
}
