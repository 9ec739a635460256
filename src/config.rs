//! TOML configuration.
//!
//! Every section is optional except `[kb]`; unset fields take the defaults
//! below. [`load_config`] validates the whole file before anything is
//! constructed so bad settings fail fast.
//!
//! ```toml
//! [kb]
//! root = "./kb"
//! extensions = ["md", "txt"]
//!
//! [index]
//! db_path = "./data/hkb.sqlite"
//! versions_path = "./data/versions.json"
//!
//! [chunking]
//! chunk_size = 1000
//! chunk_overlap = 200
//!
//! [retrieval]
//! k = 5
//! threshold = 0.6
//! w_dense = 0.5
//! w_sparse = 0.5
//!
//! [embedding]
//! provider = "hash"
//! dims = 384
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::hybrid::FusionParams;
use crate::scanner::ScanOptions;
use crate::sparse::SparseScoring;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub kb: KbConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KbConfig {
    pub root: PathBuf,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default = "default_exclude_globs")]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_extensions() -> Vec<String> {
    vec!["md".to_string(), "txt".to_string()]
}
fn default_exclude_globs() -> Vec<String> {
    vec!["**/target/**".to_string(), "**/node_modules/**".to_string()]
}

impl KbConfig {
    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            extensions: self.extensions.clone(),
            exclude_globs: self.exclude_globs.clone(),
            follow_symlinks: self.follow_symlinks,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_versions_path")]
    pub versions_path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/hkb.sqlite")
}
fn default_versions_path() -> PathBuf {
    PathBuf::from("./data/versions.json")
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            versions_path: default_versions_path(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default = "default_weight")]
    pub w_dense: f64,
    #[serde(default = "default_weight")]
    pub w_sparse: f64,
    #[serde(default)]
    pub sparse_scoring: SparseScoring,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_k() -> usize {
    5
}
fn default_threshold() -> f64 {
    0.6
}
fn default_weight() -> f64 {
    0.5
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            threshold: default_threshold(),
            w_dense: default_weight(),
            w_sparse: default_weight(),
            sparse_scoring: SparseScoring::default(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl RetrievalConfig {
    pub fn fusion_params(&self) -> FusionParams {
        FusionParams {
            threshold: self.threshold,
            w_dense: self.w_dense,
            w_sparse: self.w_sparse,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: default_dims(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "hash".to_string()
}
fn default_dims() -> usize {
    384
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct TelemetryConfig {
    /// Append one JSON line per query here when set.
    #[serde(default)]
    pub log_path: Option<PathBuf>,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // Validate kb
    if config.kb.extensions.is_empty() {
        bail!("kb.extensions must list at least one extension");
    }

    // Validate chunking
    if config.chunking.chunk_size == 0 {
        bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        bail!(
            "chunking.chunk_overlap ({}) must be < chunking.chunk_size ({})",
            config.chunking.chunk_overlap,
            config.chunking.chunk_size
        );
    }

    // Validate retrieval
    let r = &config.retrieval;
    if r.k < 1 {
        bail!("retrieval.k must be >= 1");
    }
    if !r.threshold.is_finite() {
        bail!("retrieval.threshold must be a finite number");
    }
    for (name, w) in [("w_dense", r.w_dense), ("w_sparse", r.w_sparse)] {
        if !w.is_finite() || w < 0.0 {
            bail!("retrieval.{} must be a finite number >= 0", name);
        }
    }
    if r.w_dense == 0.0 && r.w_sparse == 0.0 {
        bail!("retrieval.w_dense and retrieval.w_sparse cannot both be 0");
    }
    if r.timeout_secs == 0 {
        bail!("retrieval.timeout_secs must be > 0");
    }

    // Validate embedding
    if config.embedding.dims == 0 {
        bail!("embedding.dims must be > 0");
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }
    match config.embedding.provider.as_str() {
        "hash" | "openai" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be hash or openai.",
            other
        ),
    }

    Ok(())
}
