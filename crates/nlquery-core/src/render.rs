//! Parameterized SQL rendering: the final transformation stage.
//!
//! Maps an [`NLAction`] plus its [`RiskDecision`] onto the fixed template the
//! catalog binds to that intent. User-supplied values are emitted as bound
//! parameters (`$1`, `$2`, …) and never concatenated into the SQL text. The
//! sole controlled exception is identifiers, which were validated against
//! schema metadata by the slot filler and are quoted with the dialect's
//! identifier rule here.
//!
//! Rendering fails closed: an unbindable slot or an unknown placeholder is a
//! hard [`RenderError`], never best-effort SQL. The renderer returns the
//! statement and its parameters for the external executor; it executes
//! nothing itself.

use serde::Serialize;
use thiserror::Error;

use crate::catalog::{BindMode, Catalog};
use crate::dsl::{NLAction, QualifiedName, SlotValue};
use crate::risk::{ExecutionToken, PolicyError, RiskDecision};

/// A rendering refusal. Surfaced as a hard error, never downgraded.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("intent '{0}' is not in the catalog")]
    UnknownIntent(String),
    #[error("intent '{intent}': template references slot '{slot}' with no value")]
    UnboundSlot { intent: String, slot: String },
    #[error("intent '{intent}': identifier '{identifier}' cannot be safely quoted")]
    UnsafeIdentifier { intent: String, identifier: String },
    #[error("intent '{intent}': slot '{slot}' of kind {kind} cannot be bound as {bind:?}")]
    IncompatibleBind {
        intent: String,
        slot: String,
        kind: &'static str,
        bind: BindMode,
    },
}

/// A rendered statement plus its bound parameters, ready for the executor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedStatement {
    /// SQL text with `$n` placeholders for every user-supplied value.
    pub sql: String,
    /// Bound parameter values, in placeholder order.
    pub params: Vec<String>,
    /// Mirror of the risk decision: medium/high tiers must present an
    /// execution token before this statement is execution-eligible.
    pub confirmation_required: bool,
}

/// What the external SQL executor receives.
///
/// Construction enforces the confirmation policy: a payload for a
/// confirmation-requiring statement cannot exist without a token, so the
/// executor collaborator rejecting unconfirmed medium/high statements is
/// guaranteed by type rather than convention.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutorPayload {
    pub statement: RenderedStatement,
    pub token: Option<ExecutionToken>,
}

impl ExecutorPayload {
    pub fn new(
        statement: RenderedStatement,
        token: Option<ExecutionToken>,
        decision: &RiskDecision,
    ) -> Result<Self, PolicyError> {
        if statement.confirmation_required && token.is_none() {
            return Err(PolicyError::ConfirmationRequired {
                intent: decision.intent.clone(),
                tier: decision.tier,
            });
        }
        Ok(Self { statement, token })
    }
}

/// Quote one identifier segment with the double-quote dialect rule,
/// doubling embedded quotes.
pub fn quote_ident(segment: &str) -> String {
    format!("\"{}\"", segment.replace('"', "\"\""))
}

/// Quote a possibly schema-qualified name, segment by segment.
pub fn quote_qualified(name: &QualifiedName) -> String {
    match &name.schema {
        Some(schema) => format!("{}.{}", quote_ident(schema), quote_ident(&name.name)),
        None => quote_ident(&name.name),
    }
}

fn ident_is_safe(segment: &str) -> bool {
    !segment.is_empty() && segment.len() <= 128 && !segment.chars().any(|c| c.is_control())
}

/// Render an action against its intent's template.
pub fn render(
    catalog: &Catalog,
    action: &NLAction,
    decision: &RiskDecision,
) -> Result<RenderedStatement, RenderError> {
    let def = catalog
        .intent(&action.intent)
        .ok_or_else(|| RenderError::UnknownIntent(action.intent.clone()))?;

    let mut sql = String::with_capacity(def.template.len());
    let mut params: Vec<String> = Vec::new();

    let mut rest = def.template.as_str();
    while let Some(open) = rest.find('{') {
        sql.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            // validated at catalog load; a stray brace here means the
            // template was tampered with after validation
            return Err(RenderError::UnboundSlot {
                intent: def.label.clone(),
                slot: after.to_string(),
            });
        };
        let name = &after[..close];
        rest = &after[close + 1..];

        let spec = def.slots.iter().find(|s| s.name == name).ok_or_else(|| {
            RenderError::UnboundSlot {
                intent: def.label.clone(),
                slot: name.to_string(),
            }
        })?;
        let value = action.slots.get(name);

        match value {
            None => {
                if spec.required {
                    return Err(RenderError::UnboundSlot {
                        intent: def.label.clone(),
                        slot: name.to_string(),
                    });
                }
                // optional slot with no value renders as nothing
            }
            Some(SlotValue::Identifier { name: ident }) => match spec.bind {
                BindMode::Identifier => {
                    let segments_safe = ident_is_safe(&ident.name)
                        && ident.schema.as_deref().map(ident_is_safe).unwrap_or(true);
                    if !segments_safe {
                        return Err(RenderError::UnsafeIdentifier {
                            intent: def.label.clone(),
                            identifier: ident.lookup_key(),
                        });
                    }
                    sql.push_str(&quote_qualified(ident));
                }
                BindMode::Parameter => {
                    params.push(ident.lookup_key());
                    sql.push_str(&placeholder(params.len()));
                }
            },
            Some(SlotValue::TypeName { name: type_name }) => {
                // already canonicalized against the allow-list; emitted as-is
                if spec.bind == BindMode::Parameter {
                    return Err(RenderError::IncompatibleBind {
                        intent: def.label.clone(),
                        slot: name.to_string(),
                        kind: "type name",
                        bind: spec.bind,
                    });
                }
                sql.push_str(type_name);
            }
            Some(SlotValue::Scalar { value }) => {
                if spec.bind == BindMode::Identifier {
                    return Err(RenderError::IncompatibleBind {
                        intent: def.label.clone(),
                        slot: name.to_string(),
                        kind: "scalar",
                        bind: spec.bind,
                    });
                }
                params.push(value.clone());
                sql.push_str(&placeholder(params.len()));
            }
            Some(SlotValue::Predicate { predicate }) => {
                if !ident_is_safe(&predicate.column) {
                    return Err(RenderError::UnsafeIdentifier {
                        intent: def.label.clone(),
                        identifier: predicate.column.clone(),
                    });
                }
                params.push(predicate.value.clone());
                sql.push_str(&format!(
                    " WHERE {} {} {}",
                    quote_ident(&predicate.column),
                    predicate.op,
                    placeholder(params.len())
                ));
            }
        }
    }
    sql.push_str(rest);

    Ok(RenderedStatement {
        sql,
        params,
        confirmation_required: decision.confirmation_required,
    })
}

fn placeholder(n: usize) -> String {
    format!("${}", n)
}
