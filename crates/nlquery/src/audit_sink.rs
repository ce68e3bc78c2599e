//! Audit sink implementations.
//!
//! The core emits [`AuditRecord`]s through the [`AuditSink`] trait; durable
//! storage is a collaborator concern. The JSONL sink appends one JSON object
//! per line — append-only by construction — and the stderr sink serves
//! development setups with no audit path configured.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;

use nlquery_core::audit::{AuditRecord, AuditSink};

/// Append-only JSONL file sink.
pub struct JsonlAuditSink {
    path: PathBuf,
}

impl JsonlAuditSink {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl AuditSink for JsonlAuditSink {
    async fn append(&self, record: &AuditRecord) -> Result<()> {
        let mut line = serde_json::to_string(record).context("failed to serialize audit record")?;
        line.push('\n');
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("failed to create audit dir: {}", parent.display()))?;
            }
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("failed to open audit log: {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .await
            .context("failed to append audit record")?;
        Ok(())
    }
}

/// Writes records to stderr as JSON lines.
pub struct StderrAuditSink;

#[async_trait]
impl AuditSink for StderrAuditSink {
    async fn append(&self, record: &AuditRecord) -> Result<()> {
        let line = serde_json::to_string(record).context("failed to serialize audit record")?;
        eprintln!("{}", line);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nlquery_core::audit::AuditOutcome;
    use nlquery_core::dsl::UnknownReason;

    #[tokio::test]
    async fn test_jsonl_sink_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let sink = JsonlAuditSink::new(path.clone());

        let record = AuditRecord::new(
            "blorp",
            AuditOutcome::Unknown {
                reason: UnknownReason::NoMatch,
            },
        );
        sink.append(&record).await.unwrap();
        sink.append(&record).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed["input"], "blorp");
        assert_eq!(parsed["outcome"]["kind"], "unknown");
    }
}
