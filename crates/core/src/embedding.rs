use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use reqwest::blocking::Client;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::error::{ExtractError, Result};

pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";

/// Turns texts into fixed-dimension vectors. One vector per input, in input
/// order.
pub trait Embedder: Send + Sync {
    fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>>;

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut output = self.embed_batch(&[text.to_string()])?;
        output
            .pop()
            .ok_or_else(|| ExtractError::Embedding("provider returned no vector".to_string()))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HashEmbedderConfig {
    pub dimensions: usize,
    pub seed: u64,
}

impl Default for HashEmbedderConfig {
    fn default() -> Self {
        Self {
            dimensions: 256,
            seed: 1337,
        }
    }
}

/// Offline bag-of-words embedder. Tokens are lower-cased, stripped of
/// surrounding punctuation and hashed into buckets.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    config: HashEmbedderConfig,
}

impl HashEmbedder {
    pub fn new(config: HashEmbedderConfig) -> Self {
        Self { config }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let dims = self.config.dimensions.max(1);
        let mut vector = vec![0f32; dims];
        for token in text.split_whitespace() {
            let token = token.trim_matches(|c: char| !c.is_alphanumeric());
            if token.is_empty() {
                continue;
            }
            let bucket = self.bucket_for(token);
            vector[bucket] += 1.0;
        }
        normalize(&mut vector);
        vector
    }

    fn bucket_for(&self, token: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        hasher.write_u64(self.config.seed);
        token.to_lowercase().hash(&mut hasher);
        (hasher.finish() as usize) % self.config.dimensions.max(1)
    }
}

impl Embedder for HashEmbedder {
    fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(inputs.iter().map(|text| self.embed_text(text)).collect())
    }
}

#[derive(Clone)]
pub struct OpenAiEmbeddingClient {
    http: Client,
    model: String,
    url: String,
    api_key: SecretString,
}

impl OpenAiEmbeddingClient {
    pub fn new(model: &str, api_key: Option<SecretString>) -> Result<Self> {
        let api_key = api_key.ok_or_else(|| {
            ExtractError::Configuration("an openai credential is required for embeddings".into())
        })?;
        if api_key.expose_secret().trim().is_empty() {
            return Err(ExtractError::Configuration(
                "the openai embedding credential is empty".into(),
            ));
        }
        Ok(Self {
            http: Client::new(),
            model: model.to_string(),
            url: OPENAI_EMBEDDINGS_URL.to_string(),
            api_key,
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.url = format!("{}/embeddings", base_url.trim_end_matches('/'));
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl Embedder for OpenAiEmbeddingClient {
    fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let payload = serde_json::json!({
            "model": self.model,
            "input": inputs,
        });
        let response = self
            .http
            .post(&self.url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&payload)
            .send()
            .map_err(|e| ExtractError::Embedding(format!("embeddings request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(status_error(status, &body));
        }
        let mut parsed: OpenAiEmbeddingResponse = response
            .json()
            .map_err(|e| ExtractError::Embedding(format!("invalid embeddings response: {e}")))?;
        parsed.data.sort_by_key(|data| data.index);
        Ok(parsed.data.into_iter().map(|data| data.embedding).collect())
    }
}

#[derive(Clone)]
pub enum EmbeddingBackend {
    Hash(HashEmbedder),
    OpenAi(OpenAiEmbeddingClient),
}

#[derive(Clone)]
pub struct EmbeddingClient {
    backend: EmbeddingBackend,
}

impl EmbeddingClient {
    pub fn new(backend: EmbeddingBackend) -> Self {
        Self { backend }
    }

    pub fn hash() -> Self {
        Self::new(EmbeddingBackend::Hash(HashEmbedder::new(
            HashEmbedderConfig::default(),
        )))
    }

    pub fn openai(model: &str, api_key: Option<SecretString>) -> Result<Self> {
        Ok(Self::new(EmbeddingBackend::OpenAi(OpenAiEmbeddingClient::new(
            model, api_key,
        )?)))
    }

    pub fn backend_name(&self) -> &'static str {
        match &self.backend {
            EmbeddingBackend::Hash(_) => "hash",
            EmbeddingBackend::OpenAi(_) => "openai",
        }
    }
}

impl Embedder for EmbeddingClient {
    fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        match &self.backend {
            EmbeddingBackend::Hash(embedder) => embedder.embed_batch(inputs),
            EmbeddingBackend::OpenAi(client) => client.embed_batch(inputs),
        }
    }
}

#[derive(Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbeddingData>,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

/// 401/403 mean the credential was rejected, which no later request will
/// fix.
fn status_error(status: StatusCode, body: &str) -> ExtractError {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        ExtractError::Configuration(format!(
            "openai embeddings rejected the credential ({status}): {body}"
        ))
    } else {
        ExtractError::Embedding(format!(
            "openai embeddings request failed ({status}): {body}"
        ))
    }
}

/// Cosine of the angle between `a` and `b`; 0 for zero-length or
/// non-finite inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut a_norm = 0.0f32;
    let mut b_norm = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        a_norm += x * x;
        b_norm += y * y;
    }
    if a_norm == 0.0 || b_norm == 0.0 {
        return 0.0;
    }
    let score = dot / (a_norm.sqrt() * b_norm.sqrt());
    if score.is_finite() {
        score
    } else {
        0.0
    }
}

fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return;
    }
    for value in vector.iter_mut() {
        *value /= norm;
    }
}
