use serde::{Deserialize, Serialize};

use crate::config::EmbeddingConfig;
use crate::error::CoreError;

/// Inputs longer than this multiple of the configured character budget are
/// rejected outright instead of truncated, so one pathological body cannot
/// monopolize a batch.
const REJECT_MULTIPLE: usize = 4;

/// Embedding generator. Providers are dispatched by configuration: the
/// hashed embedder runs locally and deterministically (identical input,
/// identical vector), the HTTP providers batch texts against an external
/// model and report `ModelUnavailable` on transport or status failure.
///
/// Safe to call concurrently; no side effects beyond computation.
pub enum Embedder {
    Hashed(HashedEmbedder),
    Ollama { client: reqwest::Client, config: EmbeddingConfig },
    OpenAi { client: reqwest::Client, config: EmbeddingConfig },
}

impl Embedder {
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self, CoreError> {
        match config.provider.as_str() {
            "hashed" => Ok(Embedder::Hashed(HashedEmbedder::new(
                config.dimension,
                config.max_chars,
            ))),
            "ollama" | "openai" => {
                let client = reqwest::Client::builder()
                    .connect_timeout(std::time::Duration::from_secs(10))
                    .timeout(std::time::Duration::from_secs(120))
                    .build()
                    .map_err(|e| CoreError::Configuration(e.to_string()))?;
                if config.provider == "ollama" {
                    Ok(Embedder::Ollama { client, config: config.clone() })
                } else {
                    Ok(Embedder::OpenAi { client, config: config.clone() })
                }
            }
            other => Err(CoreError::Configuration(format!(
                "unknown embedding provider: {other}"
            ))),
        }
    }

    pub fn dimension(&self) -> usize {
        match self {
            Embedder::Hashed(h) => h.dimension,
            Embedder::Ollama { config, .. } | Embedder::OpenAi { config, .. } => config.dimension,
        }
    }

    fn max_chars(&self) -> usize {
        match self {
            Embedder::Hashed(h) => h.max_chars,
            Embedder::Ollama { config, .. } | Embedder::OpenAi { config, .. } => config.max_chars,
        }
    }

    /// Embed a batch of texts, one vector per input, preserving order.
    /// Oversized texts are truncated (lossy); texts past the hard limit fail
    /// with `InputTooLarge`.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CoreError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let budget = self.max_chars();
        for text in texts {
            if text.len() > budget * REJECT_MULTIPLE {
                return Err(CoreError::InputTooLarge {
                    chars: text.len(),
                    budget: budget * REJECT_MULTIPLE,
                });
            }
        }
        let truncated: Vec<String> = texts
            .iter()
            .map(|t| truncate_on_char_boundary(t, budget).to_string())
            .collect();

        match self {
            Embedder::Hashed(h) => Ok(truncated.iter().map(|t| h.embed(t)).collect()),
            Embedder::Ollama { client, config } => embed_ollama(client, config, &truncated).await,
            Embedder::OpenAi { client, config } => embed_openai(client, config, &truncated).await,
        }
    }

    pub async fn embed_single(&self, text: &str) -> Result<Vec<f32>, CoreError> {
        let mut results = self.embed_batch(&[text.to_string()]).await?;
        results
            .pop()
            .ok_or_else(|| CoreError::ModelUnavailable("no embedding returned".to_string()))
    }
}

/// Truncate `text` to at most `max_chars` bytes, splitting on a UTF-8 char
/// boundary. Lossy: anything past the budget does not influence the vector.
fn truncate_on_char_boundary(text: &str, max_chars: usize) -> &str {
    if text.len() <= max_chars {
        return text;
    }
    let mut end = max_chars;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

// ─── Hashed embedder ─────────────────────────────────────

/// Deterministic local embedder: words are decomposed into character
/// trigrams, each trigram hashed into one of `dimension` buckets, and the
/// bucket counts L2-normalized. Shared word stems produce overlapping
/// trigrams, so related texts land near each other under cosine similarity.
pub struct HashedEmbedder {
    dimension: usize,
    max_chars: usize,
}

impl HashedEmbedder {
    pub fn new(dimension: usize, max_chars: usize) -> Self {
        Self { dimension, max_chars }
    }

    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut buckets = vec![0.0f32; self.dimension];

        for word in text.split_whitespace() {
            let normalized: Vec<char> = word
                .chars()
                .filter(|c| c.is_alphanumeric())
                .flat_map(|c| c.to_lowercase())
                .collect();
            if normalized.is_empty() {
                continue;
            }
            if normalized.len() < 3 {
                let token: String = normalized.iter().collect();
                buckets[fnv1a(token.as_bytes()) as usize % self.dimension] += 1.0;
                continue;
            }
            for trigram in normalized.windows(3) {
                let token: String = trigram.iter().collect();
                buckets[fnv1a(token.as_bytes()) as usize % self.dimension] += 1.0;
            }
        }

        let norm = buckets.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut buckets {
                *v /= norm;
            }
        }
        buckets
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325u64;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

// ─── Ollama ──────────────────────────────────────────────

#[derive(Serialize)]
struct OllamaEmbedRequest {
    model: String,
    input: Vec<String>,
    /// Ask Ollama to silently truncate inputs that still exceed the model's
    /// context length instead of returning a 400 error.
    truncate: bool,
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

async fn embed_ollama(
    client: &reqwest::Client,
    config: &EmbeddingConfig,
    texts: &[String],
) -> Result<Vec<Vec<f32>>, CoreError> {
    let url = format!("{}/api/embed", config.base_url);

    let batch_size = 32;
    let mut all_embeddings = Vec::new();

    for chunk in texts.chunks(batch_size) {
        let req = OllamaEmbedRequest {
            model: config.model.clone(),
            input: chunk.to_vec(),
            truncate: true,
        };

        let resp = client
            .post(&url)
            .json(&req)
            .send()
            .await
            .map_err(|e| CoreError::ModelUnavailable(format!("ollama embed call failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(CoreError::ModelUnavailable(format!(
                "ollama embed API returned {status}: {body}"
            )));
        }

        let body: OllamaEmbedResponse = resp.json().await.map_err(|e| {
            CoreError::ModelUnavailable(format!("invalid ollama embed response: {e}"))
        })?;

        all_embeddings.extend(body.embeddings);
    }

    Ok(all_embeddings)
}

// ─── OpenAI-compatible ───────────────────────────────────

#[derive(Serialize)]
struct OpenAiEmbedRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Deserialize)]
struct OpenAiEmbedResponse {
    data: Vec<OpenAiEmbedData>,
}

#[derive(Deserialize)]
struct OpenAiEmbedData {
    embedding: Vec<f32>,
}

async fn embed_openai(
    client: &reqwest::Client,
    config: &EmbeddingConfig,
    texts: &[String],
) -> Result<Vec<Vec<f32>>, CoreError> {
    let url = format!("{}/v1/embeddings", config.base_url);
    let api_key = config.api_key.as_deref().unwrap_or_default();

    let batch_size = 64;
    let mut all_embeddings = Vec::new();

    for chunk in texts.chunks(batch_size) {
        let req = OpenAiEmbedRequest {
            model: config.model.clone(),
            input: chunk.to_vec(),
        };

        let resp = client
            .post(&url)
            .header("Authorization", format!("Bearer {api_key}"))
            .json(&req)
            .send()
            .await
            .map_err(|e| CoreError::ModelUnavailable(format!("openai embed call failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(CoreError::ModelUnavailable(format!(
                "openai embed API returned {status}: {body}"
            )));
        }

        let body: OpenAiEmbedResponse = resp.json().await.map_err(|e| {
            CoreError::ModelUnavailable(format!("invalid openai embed response: {e}"))
        })?;

        all_embeddings.extend(body.data.into_iter().map(|d| d.embedding));
    }

    Ok(all_embeddings)
}

/// Cosine similarity between two vectors; zero when shapes disagree.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for i in 0..a.len() {
        dot += a[i] * b[i];
        norm_a += a[i] * a[i];
        norm_b += b[i] * b[i];
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}
