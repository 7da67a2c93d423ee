use std::env;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use paperplumber_core::{
    connect_llm, Embedder, EmbeddingBackend, EmbeddingClient, Inference, OpenAiEmbeddingClient,
    DEFAULT_EMBEDDING_MODEL, DEFAULT_TOP_K,
};
use paperplumber_llm::{LlmProvider, LlmSettings};
use secrecy::SecretString;
use serde::Deserialize;

const OPENAI_KEY_ENV: &str = "OPENAI_API_KEY";
const ANTHROPIC_KEY_ENV: &str = "ANTHROPIC_API_KEY";
const LOCAL_KEY_ENV: &str = "PAPERPLUMBER_LOCAL_API_KEY";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingKind {
    OpenAi,
    Hash,
}

impl EmbeddingKind {
    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "openai" => Some(Self::OpenAi),
            "hash" => Some(Self::Hash),
            _ => None,
        }
    }
}

#[derive(Clone, Default)]
struct Credentials {
    openai: Option<SecretString>,
    anthropic: Option<SecretString>,
    local: Option<SecretString>,
}

/// Runtime settings for the extraction commands. Built from the
/// environment, then overlaid with an optional TOML file and command-line
/// flags.
#[derive(Clone)]
pub struct PlumberConfig {
    pub provider: LlmProvider,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub embedding: EmbeddingKind,
    pub embedding_model: String,
    pub top_k: usize,
    pub jobs: usize,
    credentials: Credentials,
}

/// Keys accepted in the `--config` file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub embedding: Option<String>,
    pub embedding_model: Option<String>,
    pub top_k: Option<usize>,
    pub jobs: Option<usize>,
}

impl PlumberConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let provider_name = lookup("PAPERPLUMBER_PROVIDER").unwrap_or_else(|| "openai".to_string());
        let provider = parse_provider(&provider_name)?;
        let embedding_name =
            lookup("PAPERPLUMBER_EMBEDDING").unwrap_or_else(|| "openai".to_string());
        let embedding = parse_embedding(&embedding_name)?;
        let top_k = parse_count("PAPERPLUMBER_TOP_K", lookup("PAPERPLUMBER_TOP_K"))?
            .unwrap_or(DEFAULT_TOP_K);
        let jobs = parse_count("PAPERPLUMBER_JOBS", lookup("PAPERPLUMBER_JOBS"))?.unwrap_or(1);
        let secret = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .map(SecretString::new)
        };
        Ok(Self {
            provider,
            model: lookup("PAPERPLUMBER_MODEL").filter(|m| !m.trim().is_empty()),
            base_url: lookup("PAPERPLUMBER_BASE_URL").filter(|u| !u.trim().is_empty()),
            embedding,
            embedding_model: lookup("PAPERPLUMBER_EMBEDDING_MODEL")
                .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
            top_k,
            jobs,
            credentials: Credentials {
                openai: secret(OPENAI_KEY_ENV),
                anthropic: secret(ANTHROPIC_KEY_ENV),
                local: secret(LOCAL_KEY_ENV),
            },
        })
    }

    pub fn apply_file(&mut self, path: &Path) -> Result<()> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let file: FileConfig = toml::from_str(&contents)
            .map_err(|e| anyhow!("invalid config {}: {e}", path.display()))?;
        self.apply(file)
    }

    pub fn apply(&mut self, file: FileConfig) -> Result<()> {
        if let Some(provider) = file.provider {
            self.provider = parse_provider(&provider)?;
        }
        if let Some(model) = file.model {
            self.model = Some(model);
        }
        if let Some(base_url) = file.base_url {
            self.base_url = Some(base_url);
        }
        if let Some(embedding) = file.embedding {
            self.embedding = parse_embedding(&embedding)?;
        }
        if let Some(embedding_model) = file.embedding_model {
            self.embedding_model = embedding_model;
        }
        if let Some(top_k) = file.top_k {
            self.top_k = top_k;
        }
        if let Some(jobs) = file.jobs {
            self.jobs = jobs;
        }
        Ok(())
    }

    /// The configured model, or the provider's default when none is set.
    pub fn model(&self) -> String {
        self.model
            .clone()
            .unwrap_or_else(|| self.provider.default_model().to_string())
    }

    pub fn llm_settings(&self) -> LlmSettings {
        let api_key = match self.provider {
            LlmProvider::OpenAi => self.credentials.openai.clone(),
            LlmProvider::Anthropic => self.credentials.anthropic.clone(),
            LlmProvider::Local => self.credentials.local.clone(),
        };
        LlmSettings {
            api_key,
            base_url: self.base_url.clone(),
            ..LlmSettings::default()
        }
    }

    pub fn inference(&self) -> Result<Arc<dyn Inference>> {
        Ok(connect_llm(self.provider, &self.model(), self.llm_settings())?)
    }

    pub fn embedder(&self) -> Result<Arc<dyn Embedder>> {
        let client = match self.embedding {
            EmbeddingKind::Hash => EmbeddingClient::hash(),
            EmbeddingKind::OpenAi => {
                let mut client = OpenAiEmbeddingClient::new(
                    &self.embedding_model,
                    self.credentials.openai.clone(),
                )?;
                if let (LlmProvider::OpenAi, Some(base_url)) = (self.provider, &self.base_url) {
                    client = client.with_base_url(base_url);
                }
                EmbeddingClient::new(EmbeddingBackend::OpenAi(client))
            }
        };
        Ok(Arc::new(client))
    }
}

fn parse_count(key: &str, raw: Option<String>) -> Result<Option<usize>> {
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => value
            .parse::<usize>()
            .map(Some)
            .with_context(|| format!("{key} must be a non-negative integer, got '{value}'")),
    }
}

fn parse_provider(name: &str) -> Result<LlmProvider> {
    LlmProvider::from_str(name)
        .ok_or_else(|| anyhow!("unknown provider {name}, expected openai|anthropic|local"))
}

fn parse_embedding(name: &str) -> Result<EmbeddingKind> {
    match EmbeddingKind::from_str(name) {
        Some(kind) => Ok(kind),
        None => bail!("unknown embedding provider {name}, expected openai|hash"),
    }
}
