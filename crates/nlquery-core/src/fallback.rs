//! Guarded completion fallback: the last-resort classification stage.
//!
//! Invoked only when the rule and semantic stages produce no accepted
//! candidate, only when the feature flag permits it, and only within the
//! rate/cost quota. The external completion service is asked for output
//! conforming exactly to the candidate schema; any response that fails
//! strict validation, names an unrecognized intent, or does not return in
//! time is treated identically to "no candidate". This stage can never
//! invent intents the catalog does not declare.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;

use crate::catalog::Catalog;
use crate::dsl::{IntentCandidate, Stage};

/// Trait for completion providers.
///
/// The provider is responsible for its own transport timeout; the pipeline
/// additionally bounds the whole call. A transport or service failure is an
/// `Err`; a well-formed HTTP response whose body later fails validation is
/// an `Ok` that [`parse_candidate`] rejects.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Ask the service to complete `prompt`, returning the raw response text.
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Why a completion response was discarded.
#[derive(Debug, Clone, PartialEq)]
pub enum FallbackRejection {
    InvalidJson(String),
    MissingField(&'static str),
    UnknownIntent(String),
    UndeclaredSlot { intent: String, slot: String },
    BadConfidence(f64),
}

impl std::fmt::Display for FallbackRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FallbackRejection::InvalidJson(e) => write!(f, "invalid JSON: {}", e),
            FallbackRejection::MissingField(field) => write!(f, "missing field '{}'", field),
            FallbackRejection::UnknownIntent(label) => {
                write!(f, "intent '{}' is not in the catalog", label)
            }
            FallbackRejection::UndeclaredSlot { intent, slot } => {
                write!(f, "slot '{}' is not declared on intent '{}'", slot, intent)
            }
            FallbackRejection::BadConfidence(c) => {
                write!(f, "confidence {} outside [0, 1]", c)
            }
        }
    }
}

/// Build the constrained instruction sent to the completion service.
///
/// Enumerates the catalog's intents and slots so the service has nothing to
/// invent, and demands a bare JSON object as the entire response.
pub fn build_prompt(catalog: &Catalog, normalized_text: &str) -> String {
    let mut intents = String::new();
    for def in catalog.intents() {
        let slots: Vec<&str> = def.slots.iter().map(|s| s.name.as_str()).collect();
        intents.push_str(&format!(
            "- {}: {} (slots: {})\n",
            def.label,
            def.description,
            if slots.is_empty() {
                "none".to_string()
            } else {
                slots.join(", ")
            }
        ));
    }
    format!(
        "You classify database-administration requests into one of a fixed set \
         of intents. Known intents:\n{intents}\n\
         Classify the following request. Respond with a single JSON object and \
         nothing else, in the form \
         {{\"intent\": \"<label>\", \"slots\": {{\"<name>\": \"<value>\"}}, \"confidence\": <0..1>}}. \
         The intent label MUST be one of the known intents. If none applies, use \
         {{\"intent\": \"unknown\", \"slots\": {{}}, \"confidence\": 0}}.\n\n\
         Request: {text}",
        intents = intents,
        text = normalized_text
    )
}

#[derive(Deserialize)]
struct RawCandidate {
    intent: Option<String>,
    #[serde(default)]
    slots: BTreeMap<String, serde_json::Value>,
    confidence: Option<f64>,
}

/// Strictly validate a completion response against the candidate schema.
///
/// The intent label must name a catalog entry, every slot must be declared
/// on that intent, and the confidence self-estimate must lie in `[0, 1]`.
/// The service saying `"unknown"` is a valid way of declining and is
/// reported as [`FallbackRejection::UnknownIntent`] so the caller falls
/// through to `Unknown` like every other rejection.
pub fn parse_candidate(catalog: &Catalog, raw: &str) -> Result<IntentCandidate, FallbackRejection> {
    let raw = strip_code_fences(raw.trim());
    let parsed: RawCandidate = serde_json::from_str(raw)
        .map_err(|e| FallbackRejection::InvalidJson(e.to_string()))?;

    let label = parsed
        .intent
        .ok_or(FallbackRejection::MissingField("intent"))?;
    let def = catalog
        .intent(&label)
        .ok_or_else(|| FallbackRejection::UnknownIntent(label.clone()))?;

    let confidence = parsed
        .confidence
        .ok_or(FallbackRejection::MissingField("confidence"))?;
    if !(0.0..=1.0).contains(&confidence) || !confidence.is_finite() {
        return Err(FallbackRejection::BadConfidence(confidence));
    }

    let mut candidate = IntentCandidate::new(def.label.clone(), confidence as f32, Stage::Fallback);
    for (name, value) in parsed.slots {
        if !def.slots.iter().any(|s| s.name == name) {
            return Err(FallbackRejection::UndeclaredSlot {
                intent: def.label.clone(),
                slot: name,
            });
        }
        let text = match value {
            serde_json::Value::String(s) => s,
            serde_json::Value::Number(n) => n.to_string(),
            serde_json::Value::Bool(b) => b.to_string(),
            other => {
                return Err(FallbackRejection::InvalidJson(format!(
                    "slot '{}' has non-scalar value {}",
                    name, other
                )))
            }
        };
        candidate.slots.insert(name, text);
    }
    Ok(candidate)
}

/// Models wrap JSON in markdown fences often enough that refusing to peel
/// them would throw away otherwise valid responses.
fn strip_code_fences(raw: &str) -> &str {
    let raw = raw.trim();
    let Some(inner) = raw.strip_prefix("```") else {
        return raw;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.trim_end_matches('`').trim()
}

/// Sliding-window invocation cap for the fallback stage.
///
/// The one piece of cross-request mutable state in the pipeline; the
/// application wraps it in a `Mutex` and updates it atomically. The window
/// is epoch-bucketed: a cost bound, not a scheduler.
#[derive(Debug, Clone)]
pub struct QuotaWindow {
    max_calls: u32,
    window_secs: i64,
    bucket: i64,
    used: u32,
}

impl QuotaWindow {
    pub fn new(max_calls: u32, window_secs: u64) -> Self {
        Self {
            max_calls,
            window_secs: window_secs.max(1) as i64,
            bucket: i64::MIN,
            used: 0,
        }
    }

    /// Try to consume one invocation at `now`. Returns `false` once the
    /// current window's budget is spent.
    pub fn try_acquire(&mut self, now: DateTime<Utc>) -> bool {
        let bucket = now.timestamp().div_euclid(self.window_secs);
        if bucket != self.bucket {
            self.bucket = bucket;
            self.used = 0;
        }
        if self.used >= self.max_calls {
            return false;
        }
        self.used += 1;
        true
    }

    pub fn remaining(&self, now: DateTime<Utc>) -> u32 {
        let bucket = now.timestamp().div_euclid(self.window_secs);
        if bucket != self.bucket {
            self.max_calls
        } else {
            self.max_calls.saturating_sub(self.used)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::testutil::test_catalog;
    use chrono::TimeZone;

    #[test]
    fn test_parse_valid_candidate() {
        let catalog = test_catalog();
        let raw = r#"{"intent": "drop_table", "slots": {"table": "payments"}, "confidence": 0.8}"#;
        let c = parse_candidate(&catalog, raw).unwrap();
        assert_eq!(c.label, "drop_table");
        assert_eq!(c.stage, Stage::Fallback);
        assert_eq!(c.slots.get("table").map(String::as_str), Some("payments"));
        assert!((c.confidence - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_parse_strips_code_fences() {
        let catalog = test_catalog();
        let raw = "```json\n{\"intent\": \"list_tables\", \"slots\": {}, \"confidence\": 0.9}\n```";
        assert!(parse_candidate(&catalog, raw).is_ok());
    }

    #[test]
    fn test_rejects_unknown_intent() {
        let catalog = test_catalog();
        let raw = r#"{"intent": "format_disk", "slots": {}, "confidence": 0.99}"#;
        assert_eq!(
            parse_candidate(&catalog, raw).unwrap_err(),
            FallbackRejection::UnknownIntent("format_disk".to_string())
        );
    }

    #[test]
    fn test_rejects_declined_classification() {
        let catalog = test_catalog();
        let raw = r#"{"intent": "unknown", "slots": {}, "confidence": 0}"#;
        assert!(matches!(
            parse_candidate(&catalog, raw),
            Err(FallbackRejection::UnknownIntent(_))
        ));
    }

    #[test]
    fn test_rejects_undeclared_slot() {
        let catalog = test_catalog();
        let raw = r#"{"intent": "list_tables", "slots": {"table": "x"}, "confidence": 0.9}"#;
        assert!(matches!(
            parse_candidate(&catalog, raw),
            Err(FallbackRejection::UndeclaredSlot { .. })
        ));
    }

    #[test]
    fn test_rejects_bad_confidence_and_garbage() {
        let catalog = test_catalog();
        assert!(matches!(
            parse_candidate(
                &catalog,
                r#"{"intent": "list_tables", "slots": {}, "confidence": 1.7}"#
            ),
            Err(FallbackRejection::BadConfidence(_))
        ));
        assert!(matches!(
            parse_candidate(&catalog, "the intent is probably list_tables"),
            Err(FallbackRejection::InvalidJson(_))
        ));
        assert!(matches!(
            parse_candidate(&catalog, r#"{"slots": {}, "confidence": 0.5}"#),
            Err(FallbackRejection::MissingField("intent"))
        ));
    }

    #[test]
    fn test_prompt_lists_every_intent() {
        let catalog = test_catalog();
        let prompt = build_prompt(&catalog, "blorp the frobnicator");
        for label in catalog.labels() {
            assert!(prompt.contains(label), "prompt missing {}", label);
        }
        assert!(prompt.contains("blorp the frobnicator"));
    }

    #[test]
    fn test_quota_window_caps_and_resets() {
        let mut quota = QuotaWindow::new(2, 60);
        let t0 = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        assert!(quota.try_acquire(t0));
        assert!(quota.try_acquire(t0));
        assert!(!quota.try_acquire(t0));
        assert_eq!(quota.remaining(t0), 0);
        // next window
        let t1 = t0 + chrono::Duration::seconds(60);
        assert!(quota.try_acquire(t1));
        assert_eq!(quota.remaining(t1), 1);
    }
}
