//! Catalog document loading and the atomically swappable active catalog.
//!
//! The catalog document is TOML: one `[[intent]]` table per intent, with
//! nested `[[intent.slot]]` declarations. Parsing produces
//! [`IntentDef`]s which the core's validating constructor turns into a
//! [`Catalog`]; exemplar phrases are embedded into the
//! [`EmbeddingIndex`]; the combined vocabulary seeds the [`Normalizer`].
//!
//! Those three pieces travel together as one [`CatalogBundle`] generation.
//! Reload builds the replacement bundle completely off to the side — parse,
//! validate, embed — and only then swaps the active reference, so in-flight
//! requests never observe a partially loaded catalog.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::info;

use nlquery_core::catalog::{BindMode, Catalog, IntentDef, SlotRole, SlotSpec};
use nlquery_core::embedding::EmbeddingProvider;
use nlquery_core::normalize::Normalizer;
use nlquery_core::risk::RiskTier;
use nlquery_core::semantic::{EmbeddingIndex, IntentExemplar};

#[derive(Debug, Deserialize)]
struct CatalogDoc {
    #[serde(default)]
    intent: Vec<IntentDoc>,
}

#[derive(Debug, Deserialize)]
struct IntentDoc {
    label: String,
    description: String,
    risk: RiskTier,
    template: String,
    #[serde(default)]
    triggers: Vec<String>,
    #[serde(default)]
    exemplars: Vec<String>,
    #[serde(default = "default_priority")]
    priority: u32,
    #[serde(default)]
    slot: Vec<SlotDoc>,
}

#[derive(Debug, Deserialize)]
struct SlotDoc {
    name: String,
    #[serde(default = "default_required")]
    required: bool,
    /// `table`, `column`, `new_identifier`, `type_name`, `value`, `predicate`.
    role: String,
    /// For `column` and `predicate` roles: the slot holding the table.
    #[serde(default)]
    table_slot: Option<String>,
    /// `identifier` or `parameter`; defaults per role.
    #[serde(default)]
    bind: Option<String>,
    #[serde(default)]
    default: Option<String>,
}

fn default_priority() -> u32 {
    100
}
fn default_required() -> bool {
    true
}

/// Parse the catalog document text into intent definitions.
pub fn parse_catalog_doc(text: &str) -> Result<Vec<IntentDef>> {
    let doc: CatalogDoc = toml::from_str(text).context("Failed to parse catalog document")?;
    doc.intent.into_iter().map(intent_from_doc).collect()
}

fn intent_from_doc(doc: IntentDoc) -> Result<IntentDef> {
    let mut slots = Vec::with_capacity(doc.slot.len());
    for slot in doc.slot {
        let role = match slot.role.as_str() {
            "table" => SlotRole::Table,
            "column" => SlotRole::Column {
                table_slot: require_table_slot(&doc.label, &slot)?,
            },
            "new_identifier" => SlotRole::NewIdentifier,
            "type_name" => SlotRole::TypeName,
            "value" => SlotRole::Value,
            "predicate" => SlotRole::Predicate {
                table_slot: require_table_slot(&doc.label, &slot)?,
            },
            other => bail!(
                "intent '{}': slot '{}' has unknown role '{}'",
                doc.label,
                slot.name,
                other
            ),
        };
        let bind = match slot.bind.as_deref() {
            Some("identifier") => BindMode::Identifier,
            Some("parameter") => BindMode::Parameter,
            Some(other) => bail!(
                "intent '{}': slot '{}' has unknown bind mode '{}'",
                doc.label,
                slot.name,
                other
            ),
            None => match role {
                SlotRole::Value | SlotRole::Predicate { .. } => BindMode::Parameter,
                _ => BindMode::Identifier,
            },
        };
        slots.push(SlotSpec {
            name: slot.name,
            required: slot.required,
            role,
            bind,
            default: slot.default,
        });
    }
    Ok(IntentDef {
        label: doc.label,
        description: doc.description,
        risk: doc.risk,
        slots,
        template: doc.template,
        triggers: doc.triggers,
        exemplars: doc.exemplars,
        priority: doc.priority,
    })
}

fn require_table_slot(intent: &str, slot: &SlotDoc) -> Result<String> {
    slot.table_slot.clone().ok_or_else(|| {
        anyhow::anyhow!(
            "intent '{}': slot '{}' with role '{}' needs table_slot",
            intent,
            slot.name,
            slot.role
        )
    })
}

/// One catalog generation: validated catalog, exemplar index, and the
/// normalizer whose vocabulary was derived from both catalog and schema.
pub struct CatalogBundle {
    pub catalog: Catalog,
    pub index: EmbeddingIndex,
    pub normalizer: Normalizer,
}

/// Build a complete bundle from the catalog file.
///
/// Embeds every exemplar through the provider (one batched call). With the
/// embedding provider disabled the index is left empty and the semantic
/// stage is skipped at request time.
pub async fn build_bundle(
    catalog_path: &Path,
    embedder: &dyn EmbeddingProvider,
    embedding_enabled: bool,
    schema_vocabulary: &[String],
    typo_distance: usize,
) -> Result<CatalogBundle> {
    let text = std::fs::read_to_string(catalog_path)
        .with_context(|| format!("Failed to read catalog file: {}", catalog_path.display()))?;
    let defs = parse_catalog_doc(&text)?;
    let catalog = Catalog::build(defs).context("Catalog validation failed")?;

    let index = if embedding_enabled {
        let pairs: Vec<(String, String)> = catalog
            .exemplars()
            .map(|(label, phrase)| (label.to_string(), phrase.to_string()))
            .collect();
        let phrases: Vec<String> = pairs.iter().map(|(_, p)| p.clone()).collect();
        let vectors = embedder
            .embed_batch(&phrases)
            .await
            .context("Failed to embed catalog exemplars")?;
        if vectors.len() != phrases.len() {
            bail!(
                "Embedding provider returned {} vectors for {} exemplars",
                vectors.len(),
                phrases.len()
            );
        }
        let entries = pairs
            .into_iter()
            .zip(vectors)
            .map(|((label, phrase), vector)| IntentExemplar {
                label,
                phrase,
                vector,
            })
            .collect();
        EmbeddingIndex::new(entries)
    } else {
        EmbeddingIndex::default()
    };

    let mut vocabulary = catalog.vocabulary();
    vocabulary.extend(schema_vocabulary.iter().cloned());
    let normalizer = Normalizer::new(vocabulary).with_typo_distance(typo_distance);

    info!(
        intents = catalog.intents().len(),
        rules = catalog.rules().len(),
        exemplars = index.len(),
        "catalog loaded"
    );

    Ok(CatalogBundle {
        catalog,
        index,
        normalizer,
    })
}

/// Holder for the process-wide active catalog.
///
/// Readers take a snapshot `Arc` at request start and hold no lock while
/// classifying; the write lock is held only for the pointer swap itself.
pub struct ActiveCatalog {
    inner: RwLock<Arc<CatalogBundle>>,
}

impl ActiveCatalog {
    pub fn new(bundle: CatalogBundle) -> Self {
        Self {
            inner: RwLock::new(Arc::new(bundle)),
        }
    }

    /// Clone the current generation's reference.
    pub fn snapshot(&self) -> Arc<CatalogBundle> {
        self.inner.read().expect("catalog lock poisoned").clone()
    }

    /// Publish a fully built replacement bundle.
    pub fn swap(&self, bundle: CatalogBundle) {
        *self.inner.write().expect("catalog lock poisoned") = Arc::new(bundle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"
[[intent]]
label = "list_tables"
description = "list all user tables"
risk = "low"
template = "SELECT table_name FROM information_schema.tables ORDER BY table_name"
triggers = ["(list|show) (all )?tables"]
exemplars = ["list all tables", "show tables"]
priority = 10

[[intent]]
label = "drop_table"
description = "drop a table permanently"
risk = "high"
template = "DROP TABLE {table}"
triggers = ["drop (the )?table (?P<table>\\S+)"]
exemplars = ["drop table payments"]

[[intent.slot]]
name = "table"
role = "table"
"#;

    #[test]
    fn test_parse_catalog_doc() {
        let defs = parse_catalog_doc(DOC).unwrap();
        assert_eq!(defs.len(), 2);
        assert_eq!(defs[0].priority, 10);
        assert_eq!(defs[1].priority, 100);
        assert_eq!(defs[1].slots.len(), 1);
        assert_eq!(defs[1].slots[0].role, SlotRole::Table);
        assert_eq!(defs[1].slots[0].bind, BindMode::Identifier);
        assert!(defs[1].slots[0].required);
        assert_eq!(defs[1].risk, RiskTier::High);
    }

    #[test]
    fn test_column_slot_requires_table_slot() {
        let doc = r#"
[[intent]]
label = "x"
description = "x"
risk = "low"
template = "SELECT {column} FROM t"

[[intent.slot]]
name = "column"
role = "column"
"#;
        assert!(parse_catalog_doc(doc).is_err());
    }

    #[test]
    fn test_unknown_role_rejected() {
        let doc = r#"
[[intent]]
label = "x"
description = "x"
risk = "low"
template = "SELECT 1"

[[intent.slot]]
name = "s"
role = "mystery"
"#;
        assert!(parse_catalog_doc(doc).is_err());
    }

    #[test]
    fn test_catalog_builds_from_doc() {
        let defs = parse_catalog_doc(DOC).unwrap();
        let catalog = Catalog::build(defs).unwrap();
        assert!(catalog.intent("drop_table").is_some());
    }
}
