//! Immutable audit records and the sink collaborator.
//!
//! Every terminal pipeline outcome — action, clarification, or unknown — is
//! recorded, whether or not SQL execution ultimately happens. Records are
//! append-only: nothing in this crate mutates one after creation, and the
//! sink trait only accepts them. Downstream consumers use the stream as an
//! active-learning signal (unknown rate, clarification frequency); that
//! analysis is out of scope here.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::dsl::{Resolution, Stage, UnknownReason};
use crate::risk::{RiskDecision, RiskTier};

/// The resolved side of one audit record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditOutcome {
    Action {
        intent: String,
        stage: Stage,
        confidence: f32,
        tier: RiskTier,
        confirmation_required: bool,
        confirmation_granted: bool,
    },
    /// Rendering was refused after a successful classification.
    RenderRefused {
        intent: String,
        tier: RiskTier,
        error: String,
    },
    Clarification {
        prompt: String,
        candidates: Vec<String>,
    },
    Unknown {
        reason: UnknownReason,
    },
}

/// One immutable audit record. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub at: DateTime<Utc>,
    /// The raw input as received, before normalization.
    pub input: String,
    pub outcome: AuditOutcome,
}

impl AuditRecord {
    pub fn new(input: &str, outcome: AuditOutcome) -> Self {
        Self {
            id: Uuid::new_v4(),
            at: Utc::now(),
            input: input.to_string(),
            outcome,
        }
    }

    /// Build the record for a terminal resolution.
    ///
    /// `decision` accompanies actions; `confirmation_granted` reflects
    /// whether the caller presented confirmation this turn.
    pub fn for_resolution(
        input: &str,
        resolution: &Resolution,
        decision: Option<&RiskDecision>,
        confirmation_granted: bool,
    ) -> Self {
        let outcome = match resolution {
            Resolution::Action(action) => {
                let (tier, confirmation_required) = decision
                    .map(|d| (d.tier, d.confirmation_required))
                    .unwrap_or((RiskTier::Low, false));
                AuditOutcome::Action {
                    intent: action.intent.clone(),
                    stage: action.stage,
                    confidence: action.confidence,
                    tier,
                    confirmation_required,
                    confirmation_granted,
                }
            }
            Resolution::Clarification(c) => AuditOutcome::Clarification {
                prompt: c.prompt.clone(),
                candidates: c.candidates.iter().map(|cand| cand.label.clone()).collect(),
            },
            Resolution::Unknown(u) => AuditOutcome::Unknown {
                reason: u.reason.clone(),
            },
        };
        Self::new(input, outcome)
    }
}

/// Destination for audit records (file, collector, test buffer).
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Append one record. Implementations must be append-only.
    async fn append(&self, record: &AuditRecord) -> Result<()>;
}

/// In-memory sink for tests.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: std::sync::Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().expect("audit sink poisoned").clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn append(&self, record: &AuditRecord) -> Result<()> {
        self.records
            .lock()
            .expect("audit sink poisoned")
            .push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::Unknown;

    #[test]
    fn test_record_for_unknown() {
        let r = Resolution::Unknown(Unknown {
            input: "blorp".to_string(),
            reason: UnknownReason::NoMatch,
        });
        let record = AuditRecord::for_resolution("blorp", &r, None, false);
        assert_eq!(record.input, "blorp");
        assert!(matches!(
            record.outcome,
            AuditOutcome::Unknown {
                reason: UnknownReason::NoMatch
            }
        ));
    }

    #[test]
    fn test_record_serializes_with_tier() {
        let action = crate::dsl::NLAction {
            intent: "drop_table".to_string(),
            slots: Default::default(),
            stage: Stage::Rule,
            confidence: 1.0,
        };
        let decision = RiskDecision {
            intent: "drop_table".to_string(),
            tier: RiskTier::High,
            confirmation_required: true,
        };
        let record = AuditRecord::for_resolution(
            "drop table x",
            &Resolution::Action(action),
            Some(&decision),
            false,
        );
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["outcome"]["kind"], "action");
        assert_eq!(json["outcome"]["tier"], "high");
        assert_eq!(json["outcome"]["confirmation_granted"], false);
    }

    #[tokio::test]
    async fn test_memory_sink_appends() {
        let sink = MemoryAuditSink::new();
        let record = AuditRecord::new(
            "x",
            AuditOutcome::Unknown {
                reason: UnknownReason::NoMatch,
            },
        );
        sink.append(&record).await.unwrap();
        sink.append(&record).await.unwrap();
        assert_eq!(sink.records().len(), 2);
    }
}
