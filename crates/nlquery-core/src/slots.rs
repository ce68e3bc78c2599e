//! Slot resolution and metadata enrichment: the fifth pipeline stage.
//!
//! Takes an accepted [`IntentCandidate`] and resolves its slots against live
//! schema metadata. Slots the matcher did not capture are inferred where the
//! schema makes that unambiguous (a lone token that names a known table is
//! the table). Missing required slots that cannot be inferred produce a
//! [`Clarification`]; slots naming nonexistent schema objects produce an
//! [`Unknown`] — re-asking cannot make a table exist.

use anyhow::{bail, Result};

use crate::catalog::{Catalog, SlotRole, SlotSpec};
use crate::dsl::{
    Clarification, IntentCandidate, NLAction, Predicate, QualifiedName, Resolution, SlotValue,
    Unknown, UnknownReason,
};
use crate::normalize::SQL_KEYWORDS;
use crate::schema::SchemaCatalog;
use std::collections::BTreeMap;

/// Comparison operators allowed in restricted predicates.
const PREDICATE_OPS: &[&str] = &["<=", ">=", "!=", "<>", "=", "<", ">"];

/// Resolves candidate slots into a fully validated [`NLAction`].
pub struct SlotFiller<'a> {
    catalog: &'a Catalog,
    schema: &'a dyn SchemaCatalog,
}

impl<'a> SlotFiller<'a> {
    pub fn new(catalog: &'a Catalog, schema: &'a dyn SchemaCatalog) -> Self {
        Self { catalog, schema }
    }

    /// Resolve every declared slot of the candidate's intent.
    ///
    /// Returns a terminal [`Resolution`]; collaborator I/O failures surface
    /// as errors.
    pub async fn fill(
        &self,
        raw_input: &str,
        tokens: &[String],
        candidate: IntentCandidate,
    ) -> Result<Resolution> {
        let Some(def) = self.catalog.intent(&candidate.label) else {
            bail!(
                "candidate names intent '{}' absent from the catalog",
                candidate.label
            );
        };

        let mut resolved: BTreeMap<String, SlotValue> = BTreeMap::new();
        for spec in &def.slots {
            let raw = match candidate.slots.get(&spec.name) {
                Some(v) => Some(v.clone()),
                None => match self.infer(spec, tokens, &resolved).await? {
                    Inference::Value(v) => Some(v),
                    Inference::Ambiguous(options) => {
                        let prompt = format!(
                            "Which did you mean for '{}': {}?",
                            spec.name,
                            options.join(" or ")
                        );
                        return Ok(Resolution::Clarification(Clarification::missing_slot(
                            raw_input, candidate, prompt,
                        )));
                    }
                    Inference::None => spec.default.clone(),
                },
            };

            let Some(raw) = raw else {
                if spec.required {
                    let prompt = missing_slot_question(spec, def.description.as_str());
                    return Ok(Resolution::Clarification(Clarification::missing_slot(
                        raw_input, candidate, prompt,
                    )));
                }
                continue;
            };

            match self.validate(spec, &raw, &resolved).await? {
                Validated::Ok(value) => {
                    resolved.insert(spec.name.clone(), value);
                }
                Validated::Missing(detail) => {
                    return Ok(Resolution::Unknown(Unknown {
                        input: raw_input.to_string(),
                        reason: UnknownReason::UnknownSchemaObject { detail },
                    }));
                }
                Validated::Malformed(detail) => {
                    return Ok(Resolution::Unknown(Unknown {
                        input: raw_input.to_string(),
                        reason: UnknownReason::UnresolvableSlot { detail },
                    }));
                }
                Validated::Clarify(prompt) => {
                    return Ok(Resolution::Clarification(Clarification::missing_slot(
                        raw_input, candidate, prompt,
                    )));
                }
            }
        }

        Ok(Resolution::Action(NLAction {
            intent: candidate.label,
            slots: resolved,
            stage: candidate.stage,
            confidence: candidate.confidence,
        }))
    }

    /// Infer an uncaptured slot value from the token stream.
    ///
    /// Only schema-backed roles are inferable: a token naming exactly one
    /// known table (or column of the already-resolved table) fills the slot.
    /// Two distinct matches are ambiguous and bounce back to the user.
    async fn infer(
        &self,
        spec: &SlotSpec,
        tokens: &[String],
        resolved: &BTreeMap<String, SlotValue>,
    ) -> Result<Inference> {
        match &spec.role {
            SlotRole::Table => {
                let mut matches: Vec<String> = Vec::new();
                for token in tokens {
                    let Some(name) = QualifiedName::parse(token) else {
                        continue;
                    };
                    let key = name.lookup_key();
                    if is_sql_keyword(&key) {
                        continue;
                    }
                    if self.schema.table_exists(&key).await? && !matches.contains(&key) {
                        matches.push(key);
                    }
                }
                Ok(match matches.len() {
                    0 => Inference::None,
                    1 => Inference::Value(matches.remove(0)),
                    _ => Inference::Ambiguous(matches),
                })
            }
            SlotRole::Column { table_slot } => {
                let Some(table) = resolved_table(resolved, table_slot) else {
                    return Ok(Inference::None);
                };
                let mut matches: Vec<String> = Vec::new();
                for token in tokens {
                    let candidate = unquote(token);
                    if candidate.is_empty() || is_sql_keyword(&candidate) {
                        continue;
                    }
                    if self.schema.column_exists(&table, &candidate).await?
                        && !matches.contains(&candidate)
                    {
                        matches.push(candidate);
                    }
                }
                Ok(match matches.len() {
                    0 => Inference::None,
                    1 => Inference::Value(matches.remove(0)),
                    _ => Inference::Ambiguous(matches),
                })
            }
            _ => Ok(Inference::None),
        }
    }

    async fn validate(
        &self,
        spec: &SlotSpec,
        raw: &str,
        resolved: &BTreeMap<String, SlotValue>,
    ) -> Result<Validated> {
        match &spec.role {
            SlotRole::Table => {
                let Some(name) = QualifiedName::parse(raw) else {
                    return Ok(Validated::Malformed(format!(
                        "'{}' is not a valid table reference",
                        raw
                    )));
                };
                if !self.schema.table_exists(&name.lookup_key()).await? {
                    return Ok(Validated::Missing(format!(
                        "table '{}' does not exist",
                        name.lookup_key()
                    )));
                }
                Ok(Validated::Ok(SlotValue::Identifier { name }))
            }
            SlotRole::Column { table_slot } => {
                let Some(table) = resolved_table(resolved, table_slot) else {
                    return Ok(Validated::Malformed(format!(
                        "column '{}' cannot be checked without its table",
                        raw
                    )));
                };
                let column = unquote(raw);
                if !self.schema.column_exists(&table, &column).await? {
                    return Ok(Validated::Missing(format!(
                        "column '{}' does not exist on '{}'",
                        column, table
                    )));
                }
                Ok(Validated::Ok(SlotValue::Identifier {
                    name: QualifiedName {
                        schema: None,
                        name: column,
                    },
                }))
            }
            SlotRole::NewIdentifier => {
                let name = unquote(raw);
                if !is_plain_identifier(&name) {
                    return Ok(Validated::Malformed(format!(
                        "'{}' is not a valid identifier",
                        raw
                    )));
                }
                Ok(Validated::Ok(SlotValue::Identifier {
                    name: QualifiedName { schema: None, name },
                }))
            }
            SlotRole::TypeName => match canonical_type_name(raw) {
                Some(name) => Ok(Validated::Ok(SlotValue::TypeName { name })),
                None => Ok(Validated::Clarify(format!(
                    "'{}' is not a supported column type; use e.g. integer, bigint, text, \
                     varchar(100), numeric(12,2), boolean, date, or timestamptz",
                    raw
                ))),
            },
            SlotRole::Value => Ok(Validated::Ok(SlotValue::Scalar {
                value: unquote(raw),
            })),
            SlotRole::Predicate { table_slot } => {
                let Some(table) = resolved_table(resolved, table_slot) else {
                    return Ok(Validated::Malformed(format!(
                        "filter '{}' cannot be checked without its table",
                        raw
                    )));
                };
                let Some(predicate) = parse_predicate(raw) else {
                    return Ok(Validated::Clarify(format!(
                        "I couldn't parse the filter '{}'; use the form <column> <op> <value>",
                        raw
                    )));
                };
                if !self.schema.column_exists(&table, &predicate.column).await? {
                    return Ok(Validated::Missing(format!(
                        "column '{}' does not exist on '{}'",
                        predicate.column, table
                    )));
                }
                Ok(Validated::Ok(SlotValue::Predicate { predicate }))
            }
        }
    }
}

enum Inference {
    Value(String),
    Ambiguous(Vec<String>),
    None,
}

enum Validated {
    Ok(SlotValue),
    /// References a schema object that does not exist. Unrecoverable.
    Missing(String),
    /// Cannot be parsed into the declared shape. Unrecoverable.
    Malformed(String),
    /// Recoverable with a better value from the user.
    Clarify(String),
}

fn missing_slot_question(spec: &SlotSpec, intent_description: &str) -> String {
    match &spec.role {
        SlotRole::Table => format!("Which table should this apply to ({})?", intent_description),
        SlotRole::Column { .. } => format!("Which column ({})?", intent_description),
        SlotRole::NewIdentifier => format!("What should the new {} be named?", spec.name),
        SlotRole::TypeName => {
            "What column type should be used (e.g. varchar(100), integer)?".to_string()
        }
        _ => format!("What value should '{}' be?", spec.name),
    }
}

fn resolved_table(resolved: &BTreeMap<String, SlotValue>, table_slot: &str) -> Option<String> {
    match resolved.get(table_slot) {
        Some(SlotValue::Identifier { name }) => Some(name.lookup_key()),
        _ => None,
    }
}

fn is_sql_keyword(word: &str) -> bool {
    SQL_KEYWORDS.contains(&word)
}

/// Strip one layer of surrounding quotes or brackets.
fn unquote(raw: &str) -> String {
    let raw = raw.trim();
    let stripped = raw
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .or_else(|| raw.strip_prefix('"').and_then(|s| s.strip_suffix('"')))
        .or_else(|| raw.strip_prefix('`').and_then(|s| s.strip_suffix('`')))
        .or_else(|| raw.strip_prefix('[').and_then(|s| s.strip_suffix(']')));
    stripped.unwrap_or(raw).to_string()
}

fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    name.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Canonicalize a SQL type spelling against the fixed allow-list.
///
/// Returns `None` for anything outside it; the caller asks for a supported
/// type rather than passing unvetted text into DDL.
pub fn canonical_type_name(raw: &str) -> Option<String> {
    let compact: String = raw.trim().to_lowercase();
    let compact = compact.split_whitespace().collect::<Vec<_>>().join(" ");

    const PLAIN: &[&str] = &[
        "smallint",
        "integer",
        "int",
        "bigint",
        "real",
        "double precision",
        "text",
        "boolean",
        "bool",
        "date",
        "uuid",
        "json",
        "jsonb",
        "timestamp",
        "timestamptz",
        "numeric",
    ];
    if PLAIN.contains(&compact.as_str()) {
        return Some(match compact.as_str() {
            "int" => "integer".to_string(),
            "bool" => "boolean".to_string(),
            other => other.to_string(),
        });
    }

    // Parameterized forms: varchar(n), char(n), numeric(p) / numeric(p,s)
    let (base, args) = compact.split_once('(')?;
    let args = args.strip_suffix(')')?;
    let base = base.trim();
    let parts: Vec<&str> = args.split(',').map(str::trim).collect();
    let all_numeric = !parts.is_empty() && parts.iter().all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()));
    if !all_numeric {
        return None;
    }
    match (base, parts.len()) {
        ("varchar", 1) | ("char", 1) => Some(format!("{}({})", base, parts[0])),
        ("numeric", 1) => Some(format!("numeric({})", parts[0])),
        ("numeric", 2) => Some(format!("numeric({},{})", parts[0], parts[1])),
        _ => None,
    }
}

/// Parse a restricted `column <op> value` filter.
fn parse_predicate(raw: &str) -> Option<Predicate> {
    let raw = raw.trim();
    for op in PREDICATE_OPS {
        if let Some(pos) = raw.find(op) {
            let column = unquote(raw[..pos].trim());
            let value = unquote(raw[pos + op.len()..].trim());
            if column.is_empty() || value.is_empty() || !is_plain_identifier(&column) {
                return None;
            }
            let op = if *op == "<>" { "!=" } else { *op };
            return Some(Predicate {
                column,
                op: op.to_string(),
                value,
            });
        }
    }
    None
}
