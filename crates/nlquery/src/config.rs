//! Application configuration (TOML).
//!
//! Everything tunable lives here: catalog path, matching thresholds,
//! normalizer settings, embedding and fallback provider settings, the audit
//! sink destination, and the static schema metadata used by the built-in
//! schema catalog. See `config/nlq.example.toml` for a full example.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use nlquery_core::semantic::Thresholds;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub thresholds: ThresholdsConfig,
    #[serde(default)]
    pub normalizer: NormalizerConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub fallback: FallbackConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub schema: SchemaConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CatalogConfig {
    /// Path to the intent catalog document.
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ThresholdsConfig {
    #[serde(default = "default_similarity_floor")]
    pub similarity_floor: f32,
    #[serde(default = "default_accept_threshold")]
    pub accept_threshold: f32,
    #[serde(default = "default_tie_margin")]
    pub tie_margin: f32,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for ThresholdsConfig {
    fn default() -> Self {
        Self {
            similarity_floor: default_similarity_floor(),
            accept_threshold: default_accept_threshold(),
            tie_margin: default_tie_margin(),
            top_k: default_top_k(),
        }
    }
}

impl ThresholdsConfig {
    pub fn to_thresholds(&self) -> Thresholds {
        Thresholds {
            similarity_floor: self.similarity_floor,
            accept_threshold: self.accept_threshold,
            tie_margin: self.tie_margin,
            top_k: self.top_k,
        }
    }
}

fn default_similarity_floor() -> f32 {
    0.55
}
fn default_accept_threshold() -> f32 {
    0.75
}
fn default_tie_margin() -> f32 {
    0.05
}
fn default_top_k() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct NormalizerConfig {
    /// Maximum edit distance for typo correction; 0 disables it.
    #[serde(default = "default_typo_distance")]
    pub typo_distance: usize,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            typo_distance: default_typo_distance(),
        }
    }
}

fn default_typo_distance() -> usize {
    1
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `"hashing"`, `"openai"`, `"ollama"`, or `"disabled"`.
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for HTTP providers (defaults per provider).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_embed_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
            timeout_secs: default_embed_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_embedding_provider() -> String {
    "hashing".to_string()
}
fn default_embed_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct FallbackConfig {
    /// Feature flag for the completion fallback stage. Off by default.
    #[serde(default)]
    pub enabled: bool,
    /// Chat-completions endpoint URL.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    /// Environment variable holding the API key, if the endpoint needs one.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_fallback_timeout_secs")]
    pub timeout_secs: u64,
    /// Invocation cap per window.
    #[serde(default = "default_max_calls")]
    pub max_calls: u32,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// Retry the external call once on transient failure.
    #[serde(default = "default_true")]
    pub retry_transient: bool,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: None,
            model: None,
            api_key_env: None,
            timeout_secs: default_fallback_timeout_secs(),
            max_calls: default_max_calls(),
            window_secs: default_window_secs(),
            retry_transient: true,
        }
    }
}

fn default_fallback_timeout_secs() -> u64 {
    10
}
fn default_max_calls() -> u32 {
    10
}
fn default_window_secs() -> u64 {
    60
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AuditConfig {
    /// JSONL file to append audit records to. Unset means stderr.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Static schema metadata for the built-in schema catalog implementation:
/// table name → (column name → declared type).
#[derive(Debug, Deserialize, Clone, Default)]
pub struct SchemaConfig {
    #[serde(default)]
    pub tables: BTreeMap<String, BTreeMap<String, String>>,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    let t = &config.thresholds;
    for (name, value) in [
        ("thresholds.similarity_floor", t.similarity_floor),
        ("thresholds.accept_threshold", t.accept_threshold),
        ("thresholds.tie_margin", t.tie_margin),
    ] {
        if !(0.0..=1.0).contains(&value) {
            anyhow::bail!("{} must be in [0.0, 1.0]", name);
        }
    }
    if t.similarity_floor > t.accept_threshold {
        anyhow::bail!("thresholds.similarity_floor must not exceed thresholds.accept_threshold");
    }
    if t.top_k < 1 {
        anyhow::bail!("thresholds.top_k must be >= 1");
    }

    match config.embedding.provider.as_str() {
        "hashing" | "openai" | "ollama" | "disabled" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be hashing, openai, ollama, or disabled.",
            other
        ),
    }
    if matches!(config.embedding.provider.as_str(), "openai" | "ollama") {
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    if config.fallback.enabled {
        if config.fallback.url.is_none() {
            anyhow::bail!("fallback.url must be specified when fallback is enabled");
        }
        if config.fallback.model.is_none() {
            anyhow::bail!("fallback.model must be specified when fallback is enabled");
        }
        if config.fallback.max_calls == 0 {
            anyhow::bail!("fallback.max_calls must be >= 1");
        }
        if config.fallback.window_secs == 0 {
            anyhow::bail!("fallback.window_secs must be >= 1");
        }
    }

    Ok(config)
}
