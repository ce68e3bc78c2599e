//! Schema metadata collaborator.
//!
//! The [`SchemaCatalog`] trait defines the lookups the slot filler and SQL
//! renderer need, enabling pluggable backends (a live database catalog, a
//! cached snapshot, an in-memory table for tests). Implementations must be
//! `Send + Sync` to work with async runtimes.

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;

/// Query interface over database schema metadata.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`table_exists`](SchemaCatalog::table_exists) | Is this table known? |
/// | [`column_exists`](SchemaCatalog::column_exists) | Does the table have this column? |
/// | [`column_type`](SchemaCatalog::column_type) | Declared type of a column |
#[async_trait]
pub trait SchemaCatalog: Send + Sync {
    /// Whether a table exists. `name` is the unquoted, possibly
    /// schema-qualified form (`staging.payments`).
    async fn table_exists(&self, name: &str) -> Result<bool>;

    /// Whether `column` exists on `table`.
    async fn column_exists(&self, table: &str, column: &str) -> Result<bool>;

    /// Declared type of `table.column`, or `None` if the column is unknown.
    async fn column_type(&self, table: &str, column: &str) -> Result<Option<String>>;
}

/// In-memory schema catalog backed by nested maps.
///
/// The application crate builds one from its `[schema]` configuration; tests
/// build one directly. Lookups are case-insensitive on the table and column
/// names, matching the normalizer's case folding.
#[derive(Debug, Clone, Default)]
pub struct StaticSchema {
    /// table name → (column name → declared type)
    tables: BTreeMap<String, BTreeMap<String, String>>,
}

impl StaticSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table with its columns, replacing any previous definition.
    pub fn with_table<I, S, T>(mut self, name: &str, columns: I) -> Self
    where
        I: IntoIterator<Item = (S, T)>,
        S: Into<String>,
        T: Into<String>,
    {
        let cols = columns
            .into_iter()
            .map(|(c, t)| (c.into().to_lowercase(), t.into()))
            .collect();
        self.tables.insert(name.to_lowercase(), cols);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    /// All table and column names, for seeding the normalizer vocabulary.
    pub fn vocabulary(&self) -> Vec<String> {
        let mut words = Vec::new();
        for (table, columns) in &self.tables {
            words.push(table.clone());
            // the bare table name is also a word when qualified
            if let Some((_, bare)) = table.rsplit_once('.') {
                words.push(bare.to_string());
            }
            for column in columns.keys() {
                words.push(column.clone());
            }
        }
        words
    }
}

#[async_trait]
impl SchemaCatalog for StaticSchema {
    async fn table_exists(&self, name: &str) -> Result<bool> {
        Ok(self.tables.contains_key(&name.to_lowercase()))
    }

    async fn column_exists(&self, table: &str, column: &str) -> Result<bool> {
        Ok(self
            .tables
            .get(&table.to_lowercase())
            .map(|cols| cols.contains_key(&column.to_lowercase()))
            .unwrap_or(false))
    }

    async fn column_type(&self, table: &str, column: &str) -> Result<Option<String>> {
        Ok(self
            .tables
            .get(&table.to_lowercase())
            .and_then(|cols| cols.get(&column.to_lowercase()))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> StaticSchema {
        StaticSchema::new()
            .with_table("staging.payments", [("id", "bigint"), ("status", "text")])
            .with_table("orders", [("id", "bigint"), ("total", "numeric")])
    }

    #[tokio::test]
    async fn test_table_lookup() {
        let s = schema();
        assert!(s.table_exists("staging.payments").await.unwrap());
        assert!(s.table_exists("Staging.Payments").await.unwrap());
        assert!(!s.table_exists("staging.refunds").await.unwrap());
    }

    #[tokio::test]
    async fn test_column_lookup() {
        let s = schema();
        assert!(s.column_exists("orders", "total").await.unwrap());
        assert!(!s.column_exists("orders", "status").await.unwrap());
        assert_eq!(
            s.column_type("staging.payments", "status").await.unwrap(),
            Some("text".to_string())
        );
        assert_eq!(s.column_type("orders", "missing").await.unwrap(), None);
    }

    #[test]
    fn test_vocabulary_includes_bare_table_names() {
        let words = schema().vocabulary();
        assert!(words.contains(&"staging.payments".to_string()));
        assert!(words.contains(&"payments".to_string()));
        assert!(words.contains(&"status".to_string()));
    }
}
