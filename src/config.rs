//! TOML configuration.
//!
//! Every section except `[server]` is optional and falls back to the
//! defaults below, so a minimal file only needs a bind address. See
//! `config/ans.example.toml` for a full example.
//!
//! | Section | Controls |
//! |---------|----------|
//! | `[store]` | Document store backend (`elasticsearch` or `memory`) |
//! | `[embedding]` | Embedding provider used for vector search and grounding |
//! | `[completion]` | Streaming completion backend |
//! | `[retrieval]` | RRF constant and candidate depth |
//! | `[guardrails]` | Pattern lists and grounding thresholds |
//! | `[generation]` | Snippet lengths and refusal texts |
//! | `[server]` | HTTP bind address |

use anyhow::{bail, Context, Result};
use answer_harness_core::completion::DEFAULT_MAX_FRAGMENTS;
use answer_harness_core::fusion::{FusionParams, DEFAULT_RRF_CONSTANT};
use answer_harness_core::guardrail::{
    default_injection_patterns, default_unsafe_patterns, GuardrailPolicy,
    DEFAULT_OVERLAP_THRESHOLD, DEFAULT_SIMILARITY_THRESHOLD,
};
use answer_harness_core::orchestrator::OrchestratorConfig;
use regex::RegexSetBuilder;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub guardrails: GuardrailsConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_es_url")]
    pub url: String,
    #[serde(default = "default_index")]
    pub index: String,
    /// Model id for `text_expansion` queries. Unset means plain `match`.
    #[serde(default)]
    pub expansion_model: Option<String>,
    /// JSON array of chunks for the `memory` backend.
    #[serde(default)]
    pub chunks_path: Option<PathBuf>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            url: default_es_url(),
            index: default_index(),
            expansion_model: None,
            chunks_path: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_backend() -> String {
    "elasticsearch".to_string()
}
fn default_es_url() -> String {
    "http://localhost:9200".to_string()
}
fn default_index() -> String {
    "rag_chunks".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            url: None,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_max_retries() -> u32 {
    5
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CompletionConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    /// Upper bound on one request, retrieval and generation included.
    #[serde(default = "default_completion_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_fragments")]
    pub max_fragments: usize,
}

impl CompletionConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            url: None,
            timeout_secs: default_completion_timeout_secs(),
            max_fragments: default_max_fragments(),
        }
    }
}

fn default_completion_timeout_secs() -> u64 {
    120
}
fn default_max_fragments() -> usize {
    DEFAULT_MAX_FRAGMENTS
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_rrf_constant")]
    pub rrf_constant: f64,
    #[serde(default)]
    pub candidate_k: Option<usize>,
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            rrf_constant: default_rrf_constant(),
            candidate_k: None,
            default_top_k: default_top_k(),
        }
    }
}

fn default_rrf_constant() -> f64 {
    DEFAULT_RRF_CONSTANT
}
fn default_top_k() -> usize {
    5
}

impl RetrievalConfig {
    pub fn fusion_params(&self) -> FusionParams {
        FusionParams {
            rrf_constant: self.rrf_constant,
            candidate_k: self.candidate_k,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GuardrailsConfig {
    #[serde(default = "default_unsafe_patterns")]
    pub unsafe_patterns: Vec<String>,
    #[serde(default = "default_injection_patterns")]
    pub injection_patterns: Vec<String>,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    #[serde(default = "default_overlap_threshold")]
    pub overlap_threshold: usize,
}

impl Default for GuardrailsConfig {
    fn default() -> Self {
        Self {
            unsafe_patterns: default_unsafe_patterns(),
            injection_patterns: default_injection_patterns(),
            similarity_threshold: default_similarity_threshold(),
            overlap_threshold: default_overlap_threshold(),
        }
    }
}

fn default_similarity_threshold() -> f32 {
    DEFAULT_SIMILARITY_THRESHOLD
}
fn default_overlap_threshold() -> usize {
    DEFAULT_OVERLAP_THRESHOLD
}

impl GuardrailsConfig {
    pub fn policy(&self) -> GuardrailPolicy {
        GuardrailPolicy {
            unsafe_patterns: self.unsafe_patterns.clone(),
            injection_patterns: self.injection_patterns.clone(),
            similarity_threshold: self.similarity_threshold,
            overlap_threshold: self.overlap_threshold,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_snippet_chars")]
    pub snippet_chars: usize,
    #[serde(default = "default_citation_snippet_chars")]
    pub citation_snippet_chars: usize,
    #[serde(default = "default_unsafe_refusal")]
    pub unsafe_refusal: String,
    #[serde(default = "default_injection_refusal")]
    pub injection_refusal: String,
    #[serde(default = "default_fallback")]
    pub no_evidence_text: String,
    #[serde(default = "default_fallback")]
    pub ungrounded_fallback: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            snippet_chars: default_snippet_chars(),
            citation_snippet_chars: default_citation_snippet_chars(),
            unsafe_refusal: default_unsafe_refusal(),
            injection_refusal: default_injection_refusal(),
            no_evidence_text: default_fallback(),
            ungrounded_fallback: default_fallback(),
        }
    }
}

fn default_snippet_chars() -> usize {
    400
}
fn default_citation_snippet_chars() -> usize {
    200
}
fn default_unsafe_refusal() -> String {
    "❌ Unsafe query refused.".to_string()
}
fn default_injection_refusal() -> String {
    "❌ Prompt injection attempt detected and refused.".to_string()
}
fn default_fallback() -> String {
    "I don't know.".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

impl Config {
    /// Orchestrator settings assembled from `[generation]` and `[completion]`.
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            snippet_chars: self.generation.snippet_chars,
            citation_snippet_chars: self.generation.citation_snippet_chars,
            unsafe_refusal: self.generation.unsafe_refusal.clone(),
            injection_refusal: self.generation.injection_refusal.clone(),
            no_evidence_text: self.generation.no_evidence_text.clone(),
            ungrounded_fallback: self.generation.ungrounded_fallback.clone(),
            max_fragments: self.completion.max_fragments,
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate store
    match config.store.backend.as_str() {
        "elasticsearch" => {}
        "memory" => {
            if config.store.chunks_path.is_none() {
                bail!("store.chunks_path must be set when backend is 'memory'");
            }
        }
        other => bail!(
            "Unknown store backend: '{}'. Must be elasticsearch or memory.",
            other
        ),
    }

    // Validate retrieval
    if config.retrieval.default_top_k < 1 {
        bail!("retrieval.default_top_k must be >= 1");
    }
    if config.retrieval.rrf_constant.is_nan() || config.retrieval.rrf_constant <= 0.0 {
        bail!("retrieval.rrf_constant must be > 0");
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "hash" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or hash.",
            other
        ),
    }
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() && config.embedding.provider != "hash" {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    // Validate completion
    match config.completion.provider.as_str() {
        "disabled" => {}
        "ollama" => {
            if config.completion.model.is_none() {
                bail!("completion.model must be specified when provider is 'ollama'");
            }
        }
        other => bail!(
            "Unknown completion provider: '{}'. Must be disabled or ollama.",
            other
        ),
    }
    if config.completion.max_fragments == 0 {
        bail!("completion.max_fragments must be > 0");
    }

    // Validate guardrails
    if !(0.0..=1.0).contains(&config.guardrails.similarity_threshold) {
        bail!("guardrails.similarity_threshold must be in [0.0, 1.0]");
    }
    for (name, patterns) in [
        ("unsafe_patterns", &config.guardrails.unsafe_patterns),
        ("injection_patterns", &config.guardrails.injection_patterns),
    ] {
        RegexSetBuilder::new(patterns)
            .case_insensitive(true)
            .build()
            .with_context(|| format!("guardrails.{} contains an invalid pattern", name))?;
    }

    // Validate generation
    if config.generation.snippet_chars == 0 || config.generation.citation_snippet_chars == 0 {
        bail!("generation snippet lengths must be > 0");
    }

    Ok(config)
}
