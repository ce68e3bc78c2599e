//! The three-way pipeline output and the intermediate candidate type.
//!
//! Every request terminates in exactly one [`Resolution`] variant. The sum
//! type forces downstream consumers to handle all three outcomes explicitly;
//! there is no "action with optional error" shape anywhere in the pipeline.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Which pipeline stage produced a candidate or resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Rule,
    Semantic,
    Fallback,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Rule => write!(f, "rule"),
            Stage::Semantic => write!(f, "semantic"),
            Stage::Fallback => write!(f, "fallback"),
        }
    }
}

/// Transient classification candidate. Exists only within one request's
/// evaluation; never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentCandidate {
    /// Intent label from the catalog.
    pub label: String,
    /// Confidence in `[0, 1]`. Rule matches are always `1.0`.
    pub confidence: f32,
    /// The stage that produced this candidate.
    pub stage: Stage,
    /// Raw slot values, keyed by slot name. Unvalidated at this point.
    pub slots: BTreeMap<String, String>,
}

impl IntentCandidate {
    pub fn new(label: impl Into<String>, confidence: f32, stage: Stage) -> Self {
        Self {
            label: label.into(),
            confidence,
            stage,
            slots: BTreeMap::new(),
        }
    }
}

/// A schema-qualified identifier, e.g. `staging.payments`.
///
/// Parsed from user text before any schema lookup. Each segment is validated
/// lexically; quoting for SQL output happens in the renderer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualifiedName {
    pub schema: Option<String>,
    pub name: String,
}

impl QualifiedName {
    /// Parse a dotted, possibly quoted identifier.
    ///
    /// Accepts `name`, `schema.name`, `"Schema"."Name"`, and `[Schema].[Name]`.
    /// Returns `None` for empty input, more than two segments, or segments
    /// containing control characters.
    pub fn parse(raw: &str) -> Option<Self> {
        let segments = split_qualified(raw)?;
        match segments.len() {
            1 => Some(Self {
                schema: None,
                name: segments[0].clone(),
            }),
            2 => Some(Self {
                schema: Some(segments[0].clone()),
                name: segments[1].clone(),
            }),
            _ => None,
        }
    }

    /// The unquoted dotted form used for schema-catalog lookups.
    pub fn lookup_key(&self) -> String {
        match &self.schema {
            Some(s) => format!("{}.{}", s, self.name),
            None => self.name.clone(),
        }
    }
}

impl std::fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.lookup_key())
    }
}

/// Split a dotted identifier into unquoted segments, honoring `"…"` and
/// `[…]` quoting so a dot inside quotes is not a separator.
fn split_qualified(raw: &str) -> Option<Vec<String>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        match c {
            '"' => {
                for q in chars.by_ref() {
                    if q == '"' {
                        break;
                    }
                    current.push(q);
                }
            }
            '[' => {
                for q in chars.by_ref() {
                    if q == ']' {
                        break;
                    }
                    current.push(q);
                }
            }
            '.' => {
                if current.is_empty() {
                    return None;
                }
                segments.push(std::mem::take(&mut current));
            }
            c if c.is_control() => return None,
            c => current.push(c),
        }
    }
    if current.is_empty() {
        return None;
    }
    segments.push(current);
    if segments.iter().any(|s| s.is_empty() || s.len() > 128) {
        return None;
    }
    Some(segments)
}

/// A restricted filter predicate: `column <op> value`.
///
/// The column is schema-validated, the operator comes from a fixed set, and
/// the value is always passed as a bound parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Predicate {
    pub column: String,
    pub op: String,
    pub value: String,
}

/// A validated slot value, typed by how it may appear in rendered SQL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SlotValue {
    /// A schema-validated identifier. Rendered quoted, never as a parameter
    /// unless the template binds it as one.
    Identifier { name: QualifiedName },
    /// A canonical SQL type name drawn from the fixed allow-list.
    TypeName { name: String },
    /// An opaque scalar. Always rendered as a bound parameter.
    Scalar { value: String },
    /// A parsed filter predicate.
    Predicate { predicate: Predicate },
}

/// Fully resolved intent: label, validated slots, and provenance.
///
/// Invariant: every slot required by the intent's template is present and
/// has been validated against schema metadata. Constructed only by the slot
/// filler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NLAction {
    pub intent: String,
    pub slots: BTreeMap<String, SlotValue>,
    pub stage: Stage,
    pub confidence: f32,
}

/// The input was ambiguous; a follow-up from the user is required.
///
/// Terminal for the current turn. The follow-up re-enters the pipeline as a
/// fresh request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clarification {
    /// The raw input that could not be resolved outright.
    pub input: String,
    /// Competing candidates, best first. A single entry means the intent was
    /// clear but a slot value was missing.
    pub candidates: Vec<IntentCandidate>,
    /// Generated disambiguation prompt to present to the user.
    pub prompt: String,
}

impl Clarification {
    /// Clarification for competing intents within the tie margin.
    pub fn ambiguous(input: &str, candidates: Vec<IntentCandidate>, catalog_describe: impl Fn(&str) -> String) -> Self {
        let options: Vec<String> = candidates
            .iter()
            .map(|c| format!("{} ({})", c.label, catalog_describe(&c.label)))
            .collect();
        let prompt = format!("Did you mean one of: {}?", options.join(", "));
        Self {
            input: input.to_string(),
            candidates,
            prompt,
        }
    }

    /// Clarification for a single matched intent missing a slot value.
    pub fn missing_slot(input: &str, candidate: IntentCandidate, question: String) -> Self {
        Self {
            input: input.to_string(),
            candidates: vec![candidate],
            prompt: question,
        }
    }
}

/// Why an input resolved to [`Unknown`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownReason {
    /// No stage produced a candidate above its threshold.
    NoMatch,
    /// The fallback stage is switched off by configuration.
    FallbackDisabled,
    /// The fallback invocation cap for the current window was exhausted.
    FallbackQuotaExceeded,
    /// The completion service failed, timed out, or returned a response that
    /// did not validate against the candidate schema.
    FallbackRejected { detail: String },
    /// A slot referenced a table or column the schema catalog does not know.
    UnknownSchemaObject { detail: String },
    /// A slot value could not be parsed into its declared shape.
    UnresolvableSlot { detail: String },
}

impl std::fmt::Display for UnknownReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnknownReason::NoMatch => write!(f, "no match"),
            UnknownReason::FallbackDisabled => write!(f, "fallback disabled"),
            UnknownReason::FallbackQuotaExceeded => write!(f, "fallback quota exceeded"),
            UnknownReason::FallbackRejected { detail } => write!(f, "fallback rejected: {}", detail),
            UnknownReason::UnknownSchemaObject { detail } => write!(f, "unknown schema object: {}", detail),
            UnknownReason::UnresolvableSlot { detail } => write!(f, "unresolvable slot: {}", detail),
        }
    }
}

/// No resolvable intent. Terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unknown {
    pub input: String,
    pub reason: UnknownReason,
}

/// Terminal pipeline outcome. Exactly one per request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Resolution {
    Action(NLAction),
    Clarification(Clarification),
    Unknown(Unknown),
}

impl Resolution {
    pub fn unknown(input: &str, reason: UnknownReason) -> Self {
        Resolution::Unknown(Unknown {
            input: input.to_string(),
            reason,
        })
    }
}
