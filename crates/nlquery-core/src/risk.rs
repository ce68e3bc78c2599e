//! Risk classification and the confirmation policy gate.
//!
//! Risk is a pure function of the intent label: each catalog entry declares
//! its tier, and nothing about slot values can change it. The gate decides
//! whether execution requires a second, explicit user acknowledgment, and is
//! the only place an [`ExecutionToken`] can be minted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dsl::NLAction;

/// Risk tier for an intent, declared in the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskTier {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for RiskTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskTier::Low => write!(f, "low"),
            RiskTier::Medium => write!(f, "medium"),
            RiskTier::High => write!(f, "high"),
        }
    }
}

/// The gate's verdict for one resolved action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskDecision {
    pub intent: String,
    pub tier: RiskTier,
    /// `true` for medium and high tiers: execution-eligible SQL may not be
    /// handed to the executor without explicit confirmation.
    pub confirmation_required: bool,
}

/// Attempt to hand medium/high-risk SQL to the executor without confirmation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("intent '{intent}' is {tier} risk and requires explicit confirmation")]
    ConfirmationRequired { intent: String, tier: RiskTier },
}

/// Proof that the confirmation policy was satisfied for one action.
///
/// Has no public constructor; the only way to obtain one is [`authorize`],
/// so an executor payload carrying a token is an executor payload whose
/// confirmation was actually checked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionToken {
    intent: String,
    tier: RiskTier,
    granted_at: DateTime<Utc>,
}

impl ExecutionToken {
    pub fn intent(&self) -> &str {
        &self.intent
    }

    pub fn tier(&self) -> RiskTier {
        self.tier
    }
}

/// Classify a resolved action. Pure: reads the tier the catalog declared for
/// the intent and nothing else.
pub fn decide(action: &NLAction, tier: RiskTier) -> RiskDecision {
    RiskDecision {
        intent: action.intent.clone(),
        tier,
        confirmation_required: tier >= RiskTier::Medium,
    }
}

/// Mint an execution token, enforcing the confirmation policy.
///
/// Low-tier actions need no confirmation. Medium and high tiers require
/// `confirmed == true`; anything else is a hard [`PolicyError`], never a
/// silent downgrade.
pub fn authorize(
    decision: &RiskDecision,
    confirmed: bool,
    now: DateTime<Utc>,
) -> Result<ExecutionToken, PolicyError> {
    if decision.confirmation_required && !confirmed {
        return Err(PolicyError::ConfirmationRequired {
            intent: decision.intent.clone(),
            tier: decision.tier,
        });
    }
    Ok(ExecutionToken {
        intent: decision.intent.clone(),
        tier: decision.tier,
        granted_at: now,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::Stage;
    use std::collections::BTreeMap;

    fn action(intent: &str) -> NLAction {
        NLAction {
            intent: intent.to_string(),
            slots: BTreeMap::new(),
            stage: Stage::Rule,
            confidence: 1.0,
        }
    }

    #[test]
    fn test_tier_ordering() {
        assert!(RiskTier::Low < RiskTier::Medium);
        assert!(RiskTier::Medium < RiskTier::High);
    }

    #[test]
    fn test_low_tier_needs_no_confirmation() {
        let d = decide(&action("row_count"), RiskTier::Low);
        assert!(!d.confirmation_required);
        assert!(authorize(&d, false, Utc::now()).is_ok());
    }

    #[test]
    fn test_medium_and_high_require_confirmation() {
        for tier in [RiskTier::Medium, RiskTier::High] {
            let d = decide(&action("drop_table"), tier);
            assert!(d.confirmation_required);
            let err = authorize(&d, false, Utc::now()).unwrap_err();
            assert_eq!(
                err,
                PolicyError::ConfirmationRequired {
                    intent: "drop_table".to_string(),
                    tier,
                }
            );
            assert!(authorize(&d, true, Utc::now()).is_ok());
        }
    }

    #[test]
    fn test_decision_is_pure_in_slots() {
        // identical intent, different slots: same decision
        let mut a = action("drop_table");
        a.slots.insert(
            "table".to_string(),
            crate::dsl::SlotValue::Scalar {
                value: "anything".to_string(),
            },
        );
        let d1 = decide(&a, RiskTier::High);
        let d2 = decide(&action("drop_table"), RiskTier::High);
        assert_eq!(d1, d2);
    }
}
