use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Where the lexical index and persisted state live
    pub data_dir: PathBuf,
    /// Server bind address
    pub bind_addr: String,
    /// Embedding provider configuration
    pub embedding: EmbeddingConfig,
    /// Indexing pipeline configuration
    pub pipeline: PipelineConfig,
    /// Ranking weights and search tuning
    pub ranking: RankingConfig,
    /// Classification and trending configuration
    pub trends: TrendsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// "hashed", "ollama" or "openai"
    pub provider: String,
    /// Base URL for HTTP providers
    pub base_url: String,
    /// Model name for HTTP providers
    pub model: String,
    /// API key (cloud providers only)
    pub api_key: Option<String>,
    /// Embedding vector dimension
    pub dimension: usize,
    /// Character budget per text; longer inputs are truncated (lossy)
    pub max_chars: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Concurrent workers draining the job queue
    pub workers: usize,
    /// Jobs per micro-batch
    pub batch_size: usize,
    /// Max wait for a partial batch to fill, in milliseconds
    pub batch_max_wait_ms: u64,
    /// Attempts before a job is dead-lettered
    pub max_attempts: u32,
    /// Base retry delay in milliseconds (doubled per attempt, capped, jittered)
    pub backoff_base_ms: u64,
    /// Retry delay cap in milliseconds
    pub backoff_cap_ms: u64,
    /// Interval between reconciliation passes, in seconds
    pub reconcile_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingConfig {
    pub lexical_weight: f32,
    pub semantic_weight: f32,
    pub recency_weight: f32,
    pub engagement_weight: f32,
    /// Minimum cosine similarity for semantic candidates
    pub min_similarity: f32,
    /// Recency half-life in hours
    pub recency_half_life_hours: f32,
    /// Engagement count at which the saturating transform reaches 0.5
    pub engagement_midpoint: f32,
    /// Shared deadline for the two search sub-queries, in milliseconds
    pub search_deadline_ms: u64,
    /// Candidates fetched per sub-query before fusion
    pub fetch_limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendsConfig {
    /// Topic labels classified against
    pub topics: Vec<String>,
    /// Minimum centroid similarity for a topic assignment (inclusive)
    pub classification_threshold: f32,
    /// Width of one trending window, in seconds
    pub window_secs: i64,
    /// Windows retained for the decayed sum
    pub window_count: usize,
    /// Per-window exponential decay factor, in (0, 1)
    pub decay: f64,
    /// Labels kept in the trending snapshot
    pub top_k: usize,
    /// Interval between batch cycles, in seconds
    pub batch_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            bind_addr: "127.0.0.1:9100".to_string(),
            embedding: EmbeddingConfig::default(),
            pipeline: PipelineConfig::default(),
            ranking: RankingConfig::default(),
            trends: TrendsConfig::default(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "hashed".to_string(),
            base_url: "http://localhost:11434".to_string(),
            model: "nomic-embed-text".to_string(),
            api_key: None,
            dimension: 384,
            max_chars: 2_000,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            batch_size: 32,
            batch_max_wait_ms: 2_000,
            max_attempts: 5,
            backoff_base_ms: 500,
            backoff_cap_ms: 30_000,
            reconcile_interval_secs: 300,
        }
    }
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            lexical_weight: 0.3,
            semantic_weight: 0.4,
            recency_weight: 0.2,
            engagement_weight: 0.1,
            min_similarity: 0.25,
            recency_half_life_hours: 24.0,
            engagement_midpoint: 50.0,
            search_deadline_ms: 2_000,
            fetch_limit: 100,
        }
    }
}

impl Default for TrendsConfig {
    fn default() -> Self {
        Self {
            topics: vec![
                "technology".to_string(),
                "politics".to_string(),
                "entertainment".to_string(),
                "sports".to_string(),
                "business".to_string(),
            ],
            classification_threshold: 0.7,
            window_secs: 3_600,
            window_count: 24,
            decay: 0.85,
            top_k: 20,
            batch_interval_secs: 300,
        }
    }
}

impl Config {
    /// Load configuration from the environment, falling back to defaults.
    /// Validation failures are fatal at startup.
    pub fn from_env() -> Result<Self, CoreError> {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("PULSE_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(addr) = std::env::var("PULSE_BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Ok(provider) = std::env::var("EMBEDDING_PROVIDER") {
            config.embedding.provider = provider;
        }
        if let Ok(url) = std::env::var("EMBEDDING_BASE_URL") {
            config.embedding.base_url = url;
        }
        if let Ok(model) = std::env::var("EMBEDDING_MODEL") {
            config.embedding.model = model;
        }
        if let Ok(key) = std::env::var("EMBEDDING_API_KEY") {
            config.embedding.api_key = Some(key);
        }
        if let Ok(val) = std::env::var("EMBEDDING_DIM") {
            if let Ok(v) = val.parse() {
                config.embedding.dimension = v;
            }
        }
        if let Ok(val) = std::env::var("PULSE_PIPELINE_WORKERS") {
            if let Ok(v) = val.parse() {
                config.pipeline.workers = v;
            }
        }
        if let Ok(val) = std::env::var("PULSE_BATCH_SIZE") {
            if let Ok(v) = val.parse() {
                config.pipeline.batch_size = v;
            }
        }
        if let Ok(val) = std::env::var("PULSE_BATCH_MAX_WAIT_MS") {
            if let Ok(v) = val.parse() {
                config.pipeline.batch_max_wait_ms = v;
            }
        }
        if let Ok(val) = std::env::var("PULSE_MAX_ATTEMPTS") {
            if let Ok(v) = val.parse() {
                config.pipeline.max_attempts = v;
            }
        }
        if let Ok(val) = std::env::var("PULSE_LEXICAL_WEIGHT") {
            if let Ok(v) = val.parse() {
                config.ranking.lexical_weight = v;
            }
        }
        if let Ok(val) = std::env::var("PULSE_SEMANTIC_WEIGHT") {
            if let Ok(v) = val.parse() {
                config.ranking.semantic_weight = v;
            }
        }
        if let Ok(val) = std::env::var("PULSE_RECENCY_WEIGHT") {
            if let Ok(v) = val.parse() {
                config.ranking.recency_weight = v;
            }
        }
        if let Ok(val) = std::env::var("PULSE_ENGAGEMENT_WEIGHT") {
            if let Ok(v) = val.parse() {
                config.ranking.engagement_weight = v;
            }
        }
        if let Ok(val) = std::env::var("PULSE_MIN_SIMILARITY") {
            if let Ok(v) = val.parse() {
                config.ranking.min_similarity = v;
            }
        }
        if let Ok(val) = std::env::var("PULSE_TOPICS") {
            let topics: Vec<String> = val
                .split(',')
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect();
            if !topics.is_empty() {
                config.trends.topics = topics;
            }
        }
        if let Ok(val) = std::env::var("PULSE_CLASSIFICATION_THRESHOLD") {
            if let Ok(v) = val.parse() {
                config.trends.classification_threshold = v;
            }
        }
        if let Ok(val) = std::env::var("PULSE_TRENDING_DECAY") {
            if let Ok(v) = val.parse() {
                config.trends.decay = v;
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would make ranking or classification
    /// meaningless. Called once at startup; failures stop the service.
    pub fn validate(&self) -> Result<(), CoreError> {
        let r = &self.ranking;
        let weights = [
            r.lexical_weight,
            r.semantic_weight,
            r.recency_weight,
            r.engagement_weight,
        ];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(CoreError::Configuration(
                "ranking weights must be finite and non-negative".to_string(),
            ));
        }
        if weights.iter().sum::<f32>() <= 0.0 {
            return Err(CoreError::Configuration(
                "at least one ranking weight must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&r.min_similarity) {
            return Err(CoreError::Configuration(
                "min_similarity must be within [0, 1]".to_string(),
            ));
        }
        if r.recency_half_life_hours <= 0.0 || r.engagement_midpoint <= 0.0 {
            return Err(CoreError::Configuration(
                "recency half-life and engagement midpoint must be positive".to_string(),
            ));
        }
        let t = &self.trends;
        if !(0.0..=1.0).contains(&t.classification_threshold) {
            return Err(CoreError::Configuration(
                "classification_threshold must be within [0, 1]".to_string(),
            ));
        }
        if t.topics.is_empty() {
            return Err(CoreError::Configuration(
                "at least one topic label is required".to_string(),
            ));
        }
        if !(t.decay > 0.0 && t.decay < 1.0) {
            return Err(CoreError::Configuration(
                "trending decay must be within (0, 1)".to_string(),
            ));
        }
        if t.window_secs <= 0 || t.window_count == 0 {
            return Err(CoreError::Configuration(
                "trending windows must be non-empty".to_string(),
            ));
        }
        if self.embedding.dimension == 0 || self.embedding.max_chars == 0 {
            return Err(CoreError::Configuration(
                "embedding dimension and char budget must be positive".to_string(),
            ));
        }
        if self.pipeline.workers == 0
            || self.pipeline.batch_size == 0
            || self.pipeline.max_attempts == 0
        {
            return Err(CoreError::Configuration(
                "pipeline workers, batch size and max attempts must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn lexical_dir(&self) -> PathBuf {
        self.data_dir.join("lexical")
    }
}
