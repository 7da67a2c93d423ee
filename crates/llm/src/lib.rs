use anyhow::{anyhow, Context, Result};
use reqwest::{header::HeaderValue, Client, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::runtime::Runtime;
use tokio::time::{sleep, Duration};

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const LOCAL_BASE_URL: &str = "http://localhost:11434/v1";
const ANTHROPIC_URL: &str = "https://api.anthropic.com/v1/messages";
const DEFAULT_MAX_RETRIES: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAi,
    Anthropic,
    /// Any OpenAI-compatible endpoint (ollama, vllm, llama.cpp server).
    Local,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "openai",
            LlmProvider::Anthropic => "anthropic",
            LlmProvider::Local => "local",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "openai" => Some(LlmProvider::OpenAi),
            "anthropic" => Some(LlmProvider::Anthropic),
            "local" => Some(LlmProvider::Local),
            _ => None,
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "gpt-3.5-turbo",
            LlmProvider::Anthropic => "claude-3-5-haiku-latest",
            LlmProvider::Local => "llama3.1",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LlmRequest {
    pub system: Option<String>,
    pub user: String,
}

#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl LlmResponse {
    pub fn total_tokens(&self) -> u32 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }
}

/// Non-success HTTP answer from a provider. Recoverable from an
/// [`anyhow::Error`] with `downcast_ref`.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{provider} returned error (status {status}): {body}")]
pub struct ProviderStatusError {
    pub provider: String,
    pub status: u16,
    pub body: String,
}

impl ProviderStatusError {
    /// The credential was rejected; every further request would fail the
    /// same way.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self.status, 401 | 403)
    }
}

/// Connection settings handed to [`LlmClient::new`]. Credentials are injected
/// by the caller; the client never reads the environment.
#[derive(Clone, Default)]
pub struct LlmSettings {
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub max_retries: Option<usize>,
}

#[derive(Clone)]
pub struct LlmClient {
    http: Client,
    provider: LlmProvider,
    model: String,
    temperature: Option<f32>,
    max_retries: usize,
    config: ProviderConfig,
}

#[derive(Clone)]
enum ProviderConfig {
    OpenAi(OpenAiConfig),
    Anthropic(AnthropicConfig),
}

#[derive(Clone)]
struct OpenAiConfig {
    api_key: Option<SecretString>,
    base_url: String,
}

#[derive(Clone)]
struct AnthropicConfig {
    api_key: SecretString,
    max_tokens: u32,
}

impl LlmClient {
    /// Builds a client, failing immediately when the provider requires a
    /// credential that was not supplied or does not look valid.
    pub fn new(provider: LlmProvider, model: impl Into<String>, settings: LlmSettings) -> Result<Self> {
        let model = model.into();
        if model.trim().is_empty() {
            return Err(anyhow!("model name must not be empty"));
        }
        let config = match provider {
            LlmProvider::OpenAi => {
                let api_key = require_api_key(provider, settings.api_key)?;
                ProviderConfig::OpenAi(OpenAiConfig {
                    api_key: Some(api_key),
                    base_url: settings
                        .base_url
                        .unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
                })
            }
            LlmProvider::Anthropic => ProviderConfig::Anthropic(AnthropicConfig {
                api_key: require_api_key(provider, settings.api_key)?,
                max_tokens: settings.max_tokens.unwrap_or(512),
            }),
            LlmProvider::Local => ProviderConfig::OpenAi(OpenAiConfig {
                api_key: settings.api_key,
                base_url: settings
                    .base_url
                    .unwrap_or_else(|| LOCAL_BASE_URL.to_string()),
            }),
        };
        Ok(Self {
            http: Client::new(),
            provider,
            model,
            temperature: settings.temperature,
            max_retries: settings.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            config,
        })
    }

    pub fn provider(&self) -> LlmProvider {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn chat(&self, req: &LlmRequest) -> Result<LlmResponse> {
        match &self.config {
            ProviderConfig::OpenAi(cfg) => self.chat_openai(cfg, req).await,
            ProviderConfig::Anthropic(cfg) => self.chat_anthropic(cfg, req).await,
        }
    }

    async fn chat_openai(&self, cfg: &OpenAiConfig, req: &LlmRequest) -> Result<LlmResponse> {
        if self.provider == LlmProvider::OpenAi && openai_uses_responses(&self.model) {
            return self.chat_openai_responses(cfg, req).await;
        }
        self.chat_openai_chat(cfg, req).await
    }

    async fn chat_openai_chat(&self, cfg: &OpenAiConfig, req: &LlmRequest) -> Result<LlmResponse> {
        let url = format!("{}/chat/completions", cfg.base_url.trim_end_matches('/'));
        let mut messages = Vec::new();
        if let Some(system) = &req.system {
            messages.push(json!({"role": "system", "content": system }));
        }
        messages.push(json!({"role": "user", "content": req.user }));
        let mut payload = json!({
            "model": self.model,
            "messages": messages,
        });
        if let Some(temperature) = self.temperature {
            payload["temperature"] = json!(temperature);
        }
        let value = self
            .send_with_retry(self.provider.as_str(), || {
                with_bearer(self.http.post(&url), cfg.api_key.as_ref()).json(&payload)
            })
            .await?;
        let content = extract_openai_text(&value)
            .ok_or_else(|| anyhow!("missing text in {} response", self.provider.as_str()))?;
        let usage: OpenAiUsage = value
            .get("usage")
            .and_then(|value| serde_json::from_value(value.clone()).ok())
            .unwrap_or_default();
        Ok(LlmResponse {
            content,
            prompt_tokens: usage.prompt_tokens.unwrap_or(0),
            completion_tokens: usage.completion_tokens.unwrap_or(0),
        })
    }

    async fn chat_openai_responses(
        &self,
        cfg: &OpenAiConfig,
        req: &LlmRequest,
    ) -> Result<LlmResponse> {
        let url = format!("{}/responses", cfg.base_url.trim_end_matches('/'));
        let mut input = Vec::new();
        if let Some(system) = &req.system {
            input.push(json!({
                "role": "system",
                "content": [{ "type": "input_text", "text": system }],
            }));
        }
        input.push(json!({
            "role": "user",
            "content": [{ "type": "input_text", "text": req.user }],
        }));
        let payload = json!({
            "model": self.model,
            "input": input,
        });
        let value = self
            .send_with_retry("openai", || {
                with_bearer(self.http.post(&url), cfg.api_key.as_ref()).json(&payload)
            })
            .await?;
        let content = extract_openai_text(&value)
            .ok_or_else(|| anyhow!("missing text in OpenAI response"))?;
        let (prompt_tokens, completion_tokens) = parse_responses_usage(&value);
        Ok(LlmResponse {
            content,
            prompt_tokens,
            completion_tokens,
        })
    }

    async fn chat_anthropic(&self, cfg: &AnthropicConfig, req: &LlmRequest) -> Result<LlmResponse> {
        let mut payload = json!({
            "model": self.model,
            "max_tokens": cfg.max_tokens,
            "messages": [ { "role": "user", "content": req.user } ],
        });
        if let Some(system) = &req.system {
            payload["system"] = json!(system);
        }
        if let Some(temperature) = self.temperature {
            payload["temperature"] = json!(temperature);
        }
        let value = self
            .send_with_retry("anthropic", || {
                self.http
                    .post(ANTHROPIC_URL)
                    .header("x-api-key", cfg.api_key.expose_secret().as_str())
                    .header("anthropic-version", "2023-06-01")
                    .json(&payload)
            })
            .await?;
        let response: AnthropicResponse =
            serde_json::from_value(value).context("failed to decode anthropic response")?;
        let text = response
            .content
            .into_iter()
            .find_map(|part| part.text)
            .ok_or_else(|| anyhow!("missing text in Anthropic response"))?;
        let usage = response.usage.unwrap_or_default();
        Ok(LlmResponse {
            content: text,
            prompt_tokens: usage.input_tokens.unwrap_or(0),
            completion_tokens: usage.output_tokens.unwrap_or(0),
        })
    }

    async fn send_with_retry<F>(&self, label: &str, build: F) -> Result<Value>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            let response = match build().send().await {
                Ok(resp) => resp,
                Err(err) => {
                    if attempt > self.max_retries {
                        return Err(err).with_context(|| format!("{label} request failed"));
                    }
                    tracing::debug!(attempt, "{label} request failed, retrying: {err}");
                    sleep(backoff_delay(attempt, None)).await;
                    continue;
                }
            };
            if response.status() == StatusCode::TOO_MANY_REQUESTS {
                if attempt > self.max_retries {
                    return Err(anyhow!(
                        "{label} rate limited after {} retries",
                        self.max_retries
                    ));
                }
                let wait = backoff_delay(attempt, response.headers().get("retry-after"));
                tracing::debug!(attempt, ?wait, "{label} rate limited");
                sleep(wait).await;
                continue;
            }
            return decode_body(label, response).await;
        }
    }
}

/// Synchronous facade over [`LlmClient`] for callers that run outside of an
/// async context. One runtime is shared by every call.
pub struct BlockingLlmClient {
    client: LlmClient,
    runtime: Runtime,
}

impl BlockingLlmClient {
    pub fn new(provider: LlmProvider, model: impl Into<String>, settings: LlmSettings) -> Result<Self> {
        let client = LlmClient::new(provider, model, settings)?;
        let runtime = Runtime::new().context("failed to create tokio runtime")?;
        Ok(Self { client, runtime })
    }

    pub fn client(&self) -> &LlmClient {
        &self.client
    }

    pub fn chat(&self, req: &LlmRequest) -> Result<LlmResponse> {
        self.runtime.block_on(self.client.chat(req))
    }
}

fn with_bearer(builder: RequestBuilder, api_key: Option<&SecretString>) -> RequestBuilder {
    match api_key {
        Some(key) => builder.bearer_auth(key.expose_secret()),
        None => builder,
    }
}

fn backoff_delay(attempt: usize, retry_after: Option<&HeaderValue>) -> Duration {
    if let Some(value) = retry_after {
        if let Ok(text) = value.to_str() {
            if let Ok(secs) = text.trim().parse::<u64>() {
                return Duration::from_secs(secs.max(1));
            }
        }
    }
    let capped = attempt.min(6) as u32;
    Duration::from_secs(1u64 << capped)
}

fn openai_uses_responses(model: &str) -> bool {
    let lower = model.to_lowercase();
    lower.starts_with("gpt-4.1") || lower.starts_with("gpt-4o") || lower.starts_with("o1")
}

fn parse_responses_usage(value: &Value) -> (u32, u32) {
    if let Some(usage) = value.get("usage") {
        let prompt = usage
            .get("input_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32;
        let completion = usage
            .get("output_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32;
        return (prompt, completion);
    }
    (0, 0)
}

async fn decode_body(label: &str, response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if !status.is_success() {
        return Err(ProviderStatusError {
            provider: label.to_string(),
            status: status.as_u16(),
            body,
        }
        .into());
    }
    serde_json::from_str(&body).with_context(|| format!("failed to decode {label} response"))
}

fn require_api_key(provider: LlmProvider, key: Option<SecretString>) -> Result<SecretString> {
    let key = key.ok_or_else(|| {
        anyhow!(
            "{} credential is not configured",
            provider.as_str()
        )
    })?;
    validate_api_key(provider, key.expose_secret())?;
    Ok(key)
}

fn validate_api_key(provider: LlmProvider, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(anyhow!("{} credential is empty", provider.as_str()));
    }
    match provider {
        LlmProvider::OpenAi if !value.starts_with("sk-") => Err(anyhow!(
            "openai credential must start with 'sk-' (see https://platform.openai.com/)"
        )),
        LlmProvider::Anthropic if !value.starts_with("sk-ant-") => {
            Err(anyhow!("anthropic credential must start with 'sk-ant-'"))
        }
        _ => Ok(()),
    }
}

fn extract_openai_text(value: &Value) -> Option<String> {
    if let Some(outputs) = value.get("output").and_then(|v| v.as_array()) {
        for output in outputs {
            if let Some(content) = output.get("content").and_then(|v| v.as_array()) {
                for block in content {
                    if let Some(text) = block.get("text").and_then(|t| t.as_str()) {
                        return Some(text.to_string());
                    }
                }
            }
        }
    }
    if let Some(text) = value.get("output_text").and_then(|v| v.as_str()) {
        return Some(text.to_string());
    }
    if let Some(choices) = value.get("choices").and_then(|v| v.as_array()) {
        if let Some(choice) = choices.first() {
            if let Some(text) = choice.get("text").and_then(|t| t.as_str()) {
                return Some(text.to_string());
            }
            if let Some(content) = choice.get("message").and_then(|m| m.get("content")) {
                if let Some(text) = content.as_str() {
                    return Some(text.to_string());
                }
                if let Some(parts) = content.as_array() {
                    return parts
                        .iter()
                        .find_map(|part| part.get("text").and_then(|t| t.as_str()))
                        .map(str::to_string);
                }
            }
        }
    }
    None
}

#[derive(Default, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Deserialize)]
struct AnthropicContent {
    text: Option<String>,
}

#[derive(Default, Deserialize)]
struct AnthropicUsage {
    input_tokens: Option<u32>,
    output_tokens: Option<u32>,
}
