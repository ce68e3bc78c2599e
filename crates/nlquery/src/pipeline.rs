//! Pipeline orchestration: normalization through audit, one request at a time.
//!
//! Stages run sequentially per request and share nothing mutable except the
//! fallback quota window. The active catalog is snapshotted once at request
//! start — an administrative reload swapping the catalog mid-request cannot
//! affect a classification already underway.
//!
//! Stage order and short-circuiting follow the classifier chain: rules
//! first, then semantic similarity, then the guarded completion fallback,
//! each stage consulted only if the previous one produced no decision.

use anyhow::{Context, Result};
use chrono::Utc;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

use nlquery_core::audit::{AuditOutcome, AuditRecord, AuditSink};
use nlquery_core::dsl::{Clarification, IntentCandidate, Resolution, UnknownReason};
use nlquery_core::embedding::EmbeddingProvider;
use nlquery_core::fallback::{self, CompletionProvider, QuotaWindow};
use nlquery_core::normalize::Normalized;
use nlquery_core::render::{self, RenderedStatement};
use nlquery_core::risk::{self, RiskDecision};
use nlquery_core::rules::first_match;
use nlquery_core::schema::{SchemaCatalog, StaticSchema};
use nlquery_core::semantic::{self, SemanticDecision, Thresholds};
use nlquery_core::slots::SlotFiller;

use crate::audit_sink::{JsonlAuditSink, StderrAuditSink};
use crate::completion::HttpCompletionProvider;
use crate::config::{Config, SchemaConfig};
use crate::embedding::create_provider;
use crate::loader::{build_bundle, ActiveCatalog, CatalogBundle};

/// Fallback-stage behavior, distilled from [`FallbackConfig`](crate::config::FallbackConfig).
#[derive(Debug, Clone)]
pub struct FallbackSettings {
    pub enabled: bool,
    pub timeout: Duration,
    pub retry_transient: bool,
}

/// What a catalog reload needs to rebuild the bundle.
pub struct ReloadParams {
    pub catalog_path: PathBuf,
    pub typo_distance: usize,
    pub schema_vocabulary: Vec<String>,
}

/// Everything a [`Pipeline`] is assembled from.
pub struct PipelineParts {
    pub bundle: CatalogBundle,
    pub reload: ReloadParams,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub embedding_enabled: bool,
    pub completion: Option<Arc<dyn CompletionProvider>>,
    pub schema: Arc<dyn SchemaCatalog>,
    pub audit: Arc<dyn AuditSink>,
    pub thresholds: Thresholds,
    pub fallback: FallbackSettings,
    pub quota: QuotaWindow,
}

/// Terminal result of one request.
#[derive(Debug)]
pub struct Outcome {
    pub resolution: Resolution,
    /// Present iff the resolution is an action.
    pub decision: Option<RiskDecision>,
    /// Present iff the resolution is an action and rendering succeeded.
    pub statement: Option<RenderedStatement>,
}

/// The classification pipeline. One instance serves all requests.
pub struct Pipeline {
    active: ActiveCatalog,
    reload: ReloadParams,
    embedder: Arc<dyn EmbeddingProvider>,
    embedding_enabled: bool,
    completion: Option<Arc<dyn CompletionProvider>>,
    schema: Arc<dyn SchemaCatalog>,
    audit: Arc<dyn AuditSink>,
    thresholds: Thresholds,
    fallback: FallbackSettings,
    quota: Mutex<QuotaWindow>,
}

enum Staged {
    Candidate(IntentCandidate),
    Resolved(Resolution),
}

impl Pipeline {
    pub fn new(parts: PipelineParts) -> Self {
        Self {
            active: ActiveCatalog::new(parts.bundle),
            reload: parts.reload,
            embedder: parts.embedder,
            embedding_enabled: parts.embedding_enabled,
            completion: parts.completion,
            schema: parts.schema,
            audit: parts.audit,
            thresholds: parts.thresholds,
            fallback: parts.fallback,
            quota: Mutex::new(parts.quota),
        }
    }

    /// Assemble the pipeline from application configuration: providers,
    /// schema metadata, audit sink, and the initial catalog bundle.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let schema = static_schema(&config.schema);
        let schema_vocabulary = schema.vocabulary();

        let embedder = create_provider(&config.embedding)?;
        let embedding_enabled = config.embedding.is_enabled();

        let bundle = build_bundle(
            &config.catalog.path,
            embedder.as_ref(),
            embedding_enabled,
            &schema_vocabulary,
            config.normalizer.typo_distance,
        )
        .await?;

        let completion: Option<Arc<dyn CompletionProvider>> = if config.fallback.enabled {
            Some(Arc::new(HttpCompletionProvider::new(&config.fallback)?))
        } else {
            None
        };

        let audit: Arc<dyn AuditSink> = match &config.audit.path {
            Some(path) => Arc::new(JsonlAuditSink::new(path.clone())),
            None => Arc::new(StderrAuditSink),
        };

        Ok(Self::new(PipelineParts {
            bundle,
            reload: ReloadParams {
                catalog_path: config.catalog.path.clone(),
                typo_distance: config.normalizer.typo_distance,
                schema_vocabulary,
            },
            embedder,
            embedding_enabled,
            completion,
            schema: Arc::new(schema),
            audit,
            thresholds: config.thresholds.to_thresholds(),
            fallback: FallbackSettings {
                enabled: config.fallback.enabled,
                timeout: Duration::from_secs(config.fallback.timeout_secs),
                retry_transient: config.fallback.retry_transient,
            },
            quota: QuotaWindow::new(config.fallback.max_calls, config.fallback.window_secs),
        }))
    }

    /// Current catalog generation.
    pub fn snapshot(&self) -> Arc<CatalogBundle> {
        self.active.snapshot()
    }

    /// Rebuild the catalog bundle from disk and swap it in atomically.
    ///
    /// The new bundle is parsed, validated, and embedded before the active
    /// reference moves; a failure leaves the old catalog serving.
    pub async fn reload(&self) -> Result<()> {
        let bundle = build_bundle(
            &self.reload.catalog_path,
            self.embedder.as_ref(),
            self.embedding_enabled,
            &self.reload.schema_vocabulary,
            self.reload.typo_distance,
        )
        .await?;
        self.active.swap(bundle);
        Ok(())
    }

    /// Run the full pipeline for one input.
    ///
    /// `confirmed` is whether the caller presented explicit confirmation
    /// this turn; it gates nothing here (rendering always proceeds) but is
    /// recorded and reflected in the statement's `confirmation_required`.
    pub async fn classify(&self, input: &str, confirmed: bool) -> Result<Outcome> {
        let bundle = self.active.snapshot();
        let normalized = bundle.normalizer.normalize(input);
        debug!(text = %normalized.text, "normalized input");

        let staged = self.select_candidate(&bundle, input, &normalized).await;
        let resolution = match staged {
            Staged::Candidate(candidate) => {
                debug!(intent = %candidate.label, stage = %candidate.stage, "candidate accepted");
                SlotFiller::new(&bundle.catalog, self.schema.as_ref())
                    .fill(input, &normalized.tokens, candidate)
                    .await?
            }
            Staged::Resolved(resolution) => resolution,
        };

        let mut decision = None;
        let mut statement = None;
        if let Resolution::Action(action) = &resolution {
            let def = bundle.catalog.intent(&action.intent).ok_or_else(|| {
                anyhow::anyhow!("resolved intent '{}' vanished from catalog", action.intent)
            })?;
            let d = risk::decide(action, def.risk);
            match render::render(&bundle.catalog, action, &d) {
                Ok(stmt) => statement = Some(stmt),
                Err(e) => {
                    // rendering refused: audit it, then abort hard
                    let record = AuditRecord::new(
                        input,
                        AuditOutcome::RenderRefused {
                            intent: action.intent.clone(),
                            tier: d.tier,
                            error: e.to_string(),
                        },
                    );
                    self.audit
                        .append(&record)
                        .await
                        .context("failed to append audit record")?;
                    return Err(e).context("rendering refused");
                }
            }
            decision = Some(d);
        }

        let record = AuditRecord::for_resolution(input, &resolution, decision.as_ref(), confirmed);
        self.audit
            .append(&record)
            .await
            .context("failed to append audit record")?;

        Ok(Outcome {
            resolution,
            decision,
            statement,
        })
    }

    async fn select_candidate(
        &self,
        bundle: &CatalogBundle,
        input: &str,
        normalized: &Normalized,
    ) -> Staged {
        if let Some(candidate) = first_match(bundle.catalog.rules(), &normalized.text) {
            debug!(intent = %candidate.label, "rule match");
            return Staged::Candidate(candidate);
        }

        if self.embedding_enabled && !bundle.index.is_empty() {
            match self.embedder.embed(&normalized.text).await {
                Ok(query) => {
                    match semantic::classify(&bundle.index, &query, &self.thresholds) {
                        SemanticDecision::Accepted(candidate) => {
                            debug!(intent = %candidate.label, confidence = candidate.confidence as f64, "semantic match");
                            return Staged::Candidate(candidate);
                        }
                        SemanticDecision::Ambiguous(candidates) => {
                            let catalog = &bundle.catalog;
                            let clarification = Clarification::ambiguous(input, candidates, |l| {
                                catalog.describe(l)
                            });
                            return Staged::Resolved(Resolution::Clarification(clarification));
                        }
                        SemanticDecision::NoDecision => {}
                    }
                }
                // deterministic stages never retry; degrade to the next stage
                Err(e) => warn!(error = %e, "embedding failed; skipping semantic stage"),
            }
        }

        self.fallback_stage(bundle, input, normalized).await
    }

    async fn fallback_stage(
        &self,
        bundle: &CatalogBundle,
        input: &str,
        normalized: &Normalized,
    ) -> Staged {
        if !self.fallback.enabled {
            return Staged::Resolved(Resolution::unknown(input, UnknownReason::NoMatch));
        }
        let Some(provider) = &self.completion else {
            return Staged::Resolved(Resolution::unknown(input, UnknownReason::FallbackDisabled));
        };

        let allowed = self
            .quota
            .lock()
            .expect("quota lock poisoned")
            .try_acquire(Utc::now());
        if !allowed {
            warn!("fallback quota exceeded; short-circuiting to unknown");
            return Staged::Resolved(Resolution::unknown(
                input,
                UnknownReason::FallbackQuotaExceeded,
            ));
        }

        let prompt = fallback::build_prompt(&bundle.catalog, &normalized.text);
        let attempts = if self.fallback.retry_transient { 2 } else { 1 };
        let mut last_failure = String::new();

        for attempt in 0..attempts {
            if attempt > 0 {
                debug!("retrying fallback call after transient failure");
            }
            match tokio::time::timeout(self.fallback.timeout, provider.complete(&prompt)).await {
                Ok(Ok(raw)) => {
                    return match fallback::parse_candidate(&bundle.catalog, &raw) {
                        Ok(candidate) => Staged::Candidate(candidate),
                        // a malformed response is not transient; no retry
                        Err(rejection) => Staged::Resolved(Resolution::unknown(
                            input,
                            UnknownReason::FallbackRejected {
                                detail: rejection.to_string(),
                            },
                        )),
                    };
                }
                Ok(Err(e)) => last_failure = e.to_string(),
                Err(_) => last_failure = "timed out".to_string(),
            }
        }

        warn!(error = %last_failure, "fallback call failed");
        Staged::Resolved(Resolution::unknown(
            input,
            UnknownReason::FallbackRejected {
                detail: last_failure,
            },
        ))
    }
}

/// Build the in-memory schema catalog from configuration.
pub fn static_schema(config: &SchemaConfig) -> StaticSchema {
    let mut schema = StaticSchema::new();
    for (table, columns) in &config.tables {
        schema = schema.with_table(
            table,
            columns.iter().map(|(c, t)| (c.clone(), t.clone())),
        );
    }
    schema
}
