//! The intent catalog: the read-only heart of the pipeline.
//!
//! A [`Catalog`] is built from declarative [`IntentDef`]s (parsed from the
//! catalog document by the application crate) through a validating
//! constructor. Everything that can fail at request time is rejected here
//! instead: patterns that do not compile, capture groups naming undeclared
//! slots, template placeholders with no slot, and overlapping rules.
//!
//! Once built, a catalog is immutable. Reload replaces the whole catalog
//! atomically; it is never patched in place.

use std::collections::{BTreeMap, BTreeSet};

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::risk::RiskTier;
use crate::rules::{first_match, CompiledRule};

/// How a slot's value enters the rendered SQL text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindMode {
    /// Validated, dialect-quoted identifier spliced into the statement.
    Identifier,
    /// Bound parameter (`$n`); the value never appears in the SQL text.
    Parameter,
}

/// What a slot means and how it is validated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotRole {
    /// A table reference; must exist in the schema catalog.
    Table,
    /// A column of the table bound to `table_slot`; must exist there.
    Column { table_slot: String },
    /// An identifier being introduced (new column, new index name). Lexical
    /// validation only — by definition it does not exist yet.
    NewIdentifier,
    /// A SQL type name from the fixed allow-list.
    TypeName,
    /// An opaque scalar passed through as a bound parameter.
    Value,
    /// A restricted `column <op> value` filter; the column is validated
    /// against the table bound to `table_slot`.
    Predicate { table_slot: String },
}

/// Declaration of one slot on an intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotSpec {
    pub name: String,
    pub required: bool,
    pub role: SlotRole,
    pub bind: BindMode,
    /// Used when an optional slot is absent. Required slots have no default.
    pub default: Option<String>,
}

/// Declarative definition of one intent, as loaded from the catalog document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentDef {
    /// Stable label, e.g. `drop_table`.
    pub label: String,
    /// One-line human description, used in clarification prompts.
    pub description: String,
    /// Risk tier declared alongside the intent — never inferred from slots.
    pub risk: RiskTier,
    /// Slot declarations, in resolution order (a `Column` slot must come
    /// after the `Table` slot it refers to).
    pub slots: Vec<SlotSpec>,
    /// SQL template with `{slot}` placeholders.
    pub template: String,
    /// Trigger patterns (regex bodies; anchoring is applied at compile time),
    /// with named capture groups for slots.
    pub triggers: Vec<String>,
    /// Canonical phrases for the semantic index, and the evidence used by
    /// the overlap check.
    pub exemplars: Vec<String>,
    /// Rule priority; lower fires earlier. Ties keep document order.
    pub priority: u32,
}

/// Load-time catalog rejection.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog contains no intents")]
    Empty,
    #[error("duplicate intent label '{0}'")]
    DuplicateLabel(String),
    #[error("intent '{intent}': duplicate slot '{slot}'")]
    DuplicateSlot { intent: String, slot: String },
    #[error("intent '{intent}': slot '{slot}' references unknown table slot '{table_slot}'")]
    BadTableSlotRef {
        intent: String,
        slot: String,
        table_slot: String,
    },
    #[error("intent '{intent}': required slot '{slot}' must not declare a default")]
    RequiredSlotWithDefault { intent: String, slot: String },
    #[error("intent '{intent}': trigger pattern '{pattern}' failed to compile: {source}")]
    BadPattern {
        intent: String,
        pattern: String,
        source: regex::Error,
    },
    #[error("intent '{intent}': trigger captures undeclared slot '{group}'")]
    UndeclaredCapture { intent: String, group: String },
    #[error("intent '{intent}': template placeholder '{{{placeholder}}}' has no slot")]
    UndeclaredPlaceholder { intent: String, placeholder: String },
    #[error("intent '{intent}': template is empty")]
    EmptyTemplate { intent: String },
    #[error(
        "ambiguous rules: exemplar '{phrase}' of intent '{expected}' first-matches rule for '{matched}'"
    )]
    AmbiguousRules {
        phrase: String,
        expected: String,
        matched: String,
    },
}

/// Immutable, validated intent catalog plus its compiled rule list.
#[derive(Debug)]
pub struct Catalog {
    intents: Vec<IntentDef>,
    by_label: BTreeMap<String, usize>,
    rules: Vec<CompiledRule>,
}

impl Catalog {
    /// Validate definitions and compile the rule list.
    ///
    /// Overlap rejection: every exemplar phrase of every intent must either
    /// first-match its own intent's rule or match no rule at all. An
    /// exemplar captured by another intent's rule is a load-time error —
    /// general pattern-intersection is undecidable, but the exemplars are
    /// the catalog's own declared evidence, so they are what gets checked.
    pub fn build(defs: Vec<IntentDef>) -> Result<Self, CatalogError> {
        if defs.is_empty() {
            return Err(CatalogError::Empty);
        }

        let mut by_label = BTreeMap::new();
        for (i, def) in defs.iter().enumerate() {
            if by_label.insert(def.label.clone(), i).is_some() {
                return Err(CatalogError::DuplicateLabel(def.label.clone()));
            }
            validate_slots(def)?;
            validate_template(def)?;
        }

        let mut rules = Vec::new();
        for (index, def) in defs.iter().enumerate() {
            let slot_names: BTreeSet<&str> = def.slots.iter().map(|s| s.name.as_str()).collect();
            for pattern in &def.triggers {
                let anchored = format!("^(?:{})$", pattern);
                let regex = Regex::new(&anchored).map_err(|source| CatalogError::BadPattern {
                    intent: def.label.clone(),
                    pattern: pattern.clone(),
                    source,
                })?;
                for group in regex.capture_names().flatten() {
                    if !slot_names.contains(group) {
                        return Err(CatalogError::UndeclaredCapture {
                            intent: def.label.clone(),
                            group: group.to_string(),
                        });
                    }
                }
                rules.push((def.priority, index, CompiledRule {
                    intent: def.label.clone(),
                    regex,
                    priority: def.priority,
                }));
            }
        }
        rules.sort_by_key(|(priority, index, _)| (*priority, *index));
        let rules: Vec<CompiledRule> = rules.into_iter().map(|(_, _, r)| r).collect();

        let catalog = Self {
            intents: defs,
            by_label,
            rules,
        };
        catalog.reject_overlaps()?;
        Ok(catalog)
    }

    fn reject_overlaps(&self) -> Result<(), CatalogError> {
        for def in &self.intents {
            for phrase in &def.exemplars {
                if let Some(candidate) = first_match(&self.rules, phrase) {
                    if candidate.label != def.label {
                        return Err(CatalogError::AmbiguousRules {
                            phrase: phrase.clone(),
                            expected: def.label.clone(),
                            matched: candidate.label,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    pub fn intent(&self, label: &str) -> Option<&IntentDef> {
        self.by_label.get(label).map(|&i| &self.intents[i])
    }

    pub fn intents(&self) -> &[IntentDef] {
        &self.intents
    }

    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.intents.iter().map(|d| d.label.as_str())
    }

    /// Description for a label; empty string for unknown labels.
    pub fn describe(&self, label: &str) -> String {
        self.intent(label)
            .map(|d| d.description.clone())
            .unwrap_or_default()
    }

    /// Words contributed to the normalizer vocabulary: exemplar words and
    /// label fragments, three characters or longer.
    pub fn vocabulary(&self) -> BTreeSet<String> {
        let mut vocab = BTreeSet::new();
        for def in &self.intents {
            for part in def.label.split('_') {
                if part.len() >= 3 {
                    vocab.insert(part.to_string());
                }
            }
            for phrase in &def.exemplars {
                for word in phrase.split_whitespace() {
                    if word.len() >= 3 && word.chars().all(|c| c.is_ascii_alphabetic()) {
                        vocab.insert(word.to_lowercase());
                    }
                }
            }
        }
        vocab
    }

    /// All exemplar phrases with their labels, for the embedding index.
    pub fn exemplars(&self) -> impl Iterator<Item = (&str, &str)> {
        self.intents.iter().flat_map(|def| {
            def.exemplars
                .iter()
                .map(move |phrase| (def.label.as_str(), phrase.as_str()))
        })
    }
}

fn validate_slots(def: &IntentDef) -> Result<(), CatalogError> {
    let mut seen = BTreeSet::new();
    for slot in &def.slots {
        if !seen.insert(slot.name.as_str()) {
            return Err(CatalogError::DuplicateSlot {
                intent: def.label.clone(),
                slot: slot.name.clone(),
            });
        }
        if slot.required && slot.default.is_some() {
            return Err(CatalogError::RequiredSlotWithDefault {
                intent: def.label.clone(),
                slot: slot.name.clone(),
            });
        }
        let table_ref = match &slot.role {
            SlotRole::Column { table_slot } => Some(table_slot),
            SlotRole::Predicate { table_slot } => Some(table_slot),
            _ => None,
        };
        if let Some(table_slot) = table_ref {
            let ok = def
                .slots
                .iter()
                .any(|s| &s.name == table_slot && s.role == SlotRole::Table);
            if !ok {
                return Err(CatalogError::BadTableSlotRef {
                    intent: def.label.clone(),
                    slot: slot.name.clone(),
                    table_slot: table_slot.clone(),
                });
            }
        }
    }
    Ok(())
}

fn validate_template(def: &IntentDef) -> Result<(), CatalogError> {
    if def.template.trim().is_empty() {
        return Err(CatalogError::EmptyTemplate {
            intent: def.label.clone(),
        });
    }
    let slot_names: BTreeSet<&str> = def.slots.iter().map(|s| s.name.as_str()).collect();
    for placeholder in template_placeholders(&def.template) {
        if !slot_names.contains(placeholder.as_str()) {
            return Err(CatalogError::UndeclaredPlaceholder {
                intent: def.label.clone(),
                placeholder,
            });
        }
    }
    Ok(())
}

/// Extract `{name}` placeholders from a template.
pub fn template_placeholders(template: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut chars = template.chars();
    while let Some(c) = chars.next() {
        if c == '{' {
            let mut name = String::new();
            for n in chars.by_ref() {
                if n == '}' {
                    break;
                }
                name.push(n);
            }
            if !name.is_empty() {
                out.push(name);
            }
        }
    }
    out
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;

    /// A small but representative catalog used across the crate's tests.
    pub fn test_catalog() -> Catalog {
        Catalog::build(test_defs()).unwrap()
    }

    pub fn test_defs() -> Vec<IntentDef> {
        vec![
            IntentDef {
                label: "list_tables".to_string(),
                description: "list all user tables".to_string(),
                risk: RiskTier::Low,
                slots: vec![],
                template: "SELECT table_name FROM information_schema.tables \
                           WHERE table_schema NOT IN ('pg_catalog', 'information_schema') \
                           ORDER BY table_name"
                    .to_string(),
                triggers: vec![
                    "(list|show) (all |the )?tables".to_string(),
                    "what tables (are there|exist)".to_string(),
                ],
                exemplars: vec![
                    "list all tables".to_string(),
                    "show tables".to_string(),
                    "what tables exist".to_string(),
                ],
                priority: 10,
            },
            IntentDef {
                label: "row_count".to_string(),
                description: "count rows in a table".to_string(),
                risk: RiskTier::Low,
                slots: vec![
                    SlotSpec {
                        name: "table".to_string(),
                        required: true,
                        role: SlotRole::Table,
                        bind: BindMode::Identifier,
                        default: None,
                    },
                    SlotSpec {
                        name: "where".to_string(),
                        required: false,
                        role: SlotRole::Predicate {
                            table_slot: "table".to_string(),
                        },
                        bind: BindMode::Parameter,
                        default: None,
                    },
                ],
                template: "SELECT count(*) FROM {table}{where}".to_string(),
                triggers: vec![
                    "count (the )?rows in (?P<table>\\S+)(?: where (?P<where>.+))?".to_string(),
                    "how many rows (are |does )?(in )?(?P<table>\\S+)( have)?".to_string(),
                ],
                exemplars: vec![
                    "count rows in payments".to_string(),
                    "how many rows in orders".to_string(),
                ],
                priority: 20,
            },
            IntentDef {
                label: "drop_table".to_string(),
                description: "drop a table permanently".to_string(),
                risk: RiskTier::High,
                slots: vec![SlotSpec {
                    name: "table".to_string(),
                    required: true,
                    role: SlotRole::Table,
                    bind: BindMode::Identifier,
                    default: None,
                }],
                template: "DROP TABLE {table}".to_string(),
                triggers: vec![
                    "drop (the )?table (?P<table>\\S+)".to_string(),
                    "delete (the )?table (?P<table>\\S+)".to_string(),
                ],
                exemplars: vec![
                    "drop table payments".to_string(),
                    "delete the orders table entirely".to_string(),
                ],
                priority: 20,
            },
            IntentDef {
                label: "add_column".to_string(),
                description: "add a column to a table".to_string(),
                risk: RiskTier::Medium,
                slots: vec![
                    SlotSpec {
                        name: "table".to_string(),
                        required: true,
                        role: SlotRole::Table,
                        bind: BindMode::Identifier,
                        default: None,
                    },
                    SlotSpec {
                        name: "column".to_string(),
                        required: true,
                        role: SlotRole::NewIdentifier,
                        bind: BindMode::Identifier,
                        default: None,
                    },
                    SlotSpec {
                        name: "type".to_string(),
                        required: true,
                        role: SlotRole::TypeName,
                        bind: BindMode::Identifier,
                        default: None,
                    },
                ],
                template: "ALTER TABLE {table} ADD COLUMN {column} {type}".to_string(),
                triggers: vec![
                    "add column (?P<column>\\S+) (?P<type>[a-z ]+?(?:\\([0-9, ]+\\))?) to (?P<table>\\S+)"
                        .to_string(),
                ],
                exemplars: vec![
                    "add column notes varchar(100) to payments".to_string(),
                    "add a new column to the orders table".to_string(),
                ],
                priority: 20,
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::{test_catalog, test_defs};
    use super::*;

    #[test]
    fn test_build_valid_catalog() {
        let catalog = test_catalog();
        assert_eq!(catalog.intents().len(), 4);
        assert!(catalog.intent("drop_table").is_some());
        assert!(catalog.intent("nonexistent").is_none());
    }

    #[test]
    fn test_rules_ordered_by_priority_then_document_order() {
        let catalog = test_catalog();
        let priorities: Vec<u32> = catalog.rules().iter().map(|r| r.priority).collect();
        let mut sorted = priorities.clone();
        sorted.sort();
        assert_eq!(priorities, sorted);
        assert_eq!(catalog.rules()[0].intent, "list_tables");
    }

    #[test]
    fn test_rejects_duplicate_label() {
        let mut defs = test_defs();
        let dup = defs[0].clone();
        defs.push(dup);
        assert!(matches!(
            Catalog::build(defs),
            Err(CatalogError::DuplicateLabel(_))
        ));
    }

    #[test]
    fn test_rejects_bad_pattern() {
        let mut defs = test_defs();
        defs[0].triggers.push("unbalanced (".to_string());
        assert!(matches!(
            Catalog::build(defs),
            Err(CatalogError::BadPattern { .. })
        ));
    }

    #[test]
    fn test_rejects_undeclared_capture() {
        let mut defs = test_defs();
        defs[0].triggers.push("list tables in (?P<schema>\\S+)".to_string());
        assert!(matches!(
            Catalog::build(defs),
            Err(CatalogError::UndeclaredCapture { .. })
        ));
    }

    #[test]
    fn test_rejects_undeclared_placeholder() {
        let mut defs = test_defs();
        defs[0].template = "SELECT * FROM {mystery}".to_string();
        assert!(matches!(
            Catalog::build(defs),
            Err(CatalogError::UndeclaredPlaceholder { .. })
        ));
    }

    #[test]
    fn test_rejects_overlapping_rules() {
        let mut defs = test_defs();
        // A greedy early rule that swallows another intent's exemplar.
        defs[0].triggers.push(".*table.*".to_string());
        defs[0].priority = 0;
        let err = Catalog::build(defs).unwrap_err();
        assert!(matches!(err, CatalogError::AmbiguousRules { .. }));
    }

    #[test]
    fn test_rejects_required_slot_with_default() {
        let mut defs = test_defs();
        defs[1].slots[0].default = Some("payments".to_string());
        assert!(matches!(
            Catalog::build(defs),
            Err(CatalogError::RequiredSlotWithDefault { .. })
        ));
    }

    #[test]
    fn test_rejects_bad_table_slot_ref() {
        let mut defs = test_defs();
        defs[1].slots[1].role = SlotRole::Predicate {
            table_slot: "nope".to_string(),
        };
        assert!(matches!(
            Catalog::build(defs),
            Err(CatalogError::BadTableSlotRef { .. })
        ));
    }

    #[test]
    fn test_vocabulary_includes_exemplar_words_and_label_parts() {
        let catalog = test_catalog();
        let vocab = catalog.vocabulary();
        assert!(vocab.contains("tables"));
        assert!(vocab.contains("count"));
        assert!(vocab.contains("drop"));
        assert!(vocab.contains("payments"));
    }

    #[test]
    fn test_template_placeholders() {
        assert_eq!(
            template_placeholders("ALTER TABLE {table} ADD COLUMN {column} {type}"),
            vec!["table", "column", "type"]
        );
        assert!(template_placeholders("SELECT 1").is_empty());
    }
}
