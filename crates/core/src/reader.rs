use std::sync::Arc;

use paperplumber_llm::{
    BlockingLlmClient, LlmProvider, LlmRequest, LlmSettings, ProviderStatusError,
};
use tracing::debug;

use crate::error::{ExtractError, Result};

pub const NOT_FOUND_SENTINEL: &str = "NA";

/// Completes a prompt to a text response. One call, one external request.
pub trait Inference: Send + Sync {
    fn complete(&self, prompt: &str) -> anyhow::Result<String>;
}

impl Inference for BlockingLlmClient {
    fn complete(&self, prompt: &str) -> anyhow::Result<String> {
        let response = self.chat(&LlmRequest {
            system: None,
            user: prompt.to_string(),
        })?;
        debug!(
            model = self.client().model(),
            tokens = response.total_tokens(),
            "inference completed"
        );
        Ok(response.content)
    }
}

/// Connects to an inference provider, validating the credential up front.
pub fn connect_llm(
    provider: LlmProvider,
    model: &str,
    settings: LlmSettings,
) -> Result<Arc<dyn Inference>> {
    let client = BlockingLlmClient::new(provider, model, settings)
        .map_err(|e| ExtractError::Configuration(format!("{e:#}")))?;
    Ok(Arc::new(client))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractedValue {
    Found(String),
    NotFound,
}

impl ExtractedValue {
    /// Normalises a raw model answer: trims it, drops line breaks and maps
    /// the `NA` sentinel (or an empty answer) to [`ExtractedValue::NotFound`].
    pub fn from_response(raw: &str) -> Self {
        let cleaned: String = raw.trim().chars().filter(|c| *c != '\n' && *c != '\r').collect();
        let unquoted = cleaned.trim_matches(|c| c == '\'' || c == '"').trim();
        if cleaned.is_empty() || unquoted.is_empty() || unquoted == NOT_FOUND_SENTINEL {
            return ExtractedValue::NotFound;
        }
        ExtractedValue::Found(cleaned)
    }

    pub fn as_found(&self) -> Option<&str> {
        match self {
            ExtractedValue::Found(value) => Some(value),
            ExtractedValue::NotFound => None,
        }
    }

    pub fn into_found(self) -> Option<String> {
        match self {
            ExtractedValue::Found(value) => Some(value),
            ExtractedValue::NotFound => None,
        }
    }
}

#[derive(Clone)]
pub struct ValueReader {
    target: String,
    inference: Arc<dyn Inference>,
}

impl ValueReader {
    pub fn new(target: impl Into<String>, inference: Arc<dyn Inference>) -> Result<Self> {
        let target = target.into().trim().to_string();
        if target.is_empty() {
            return Err(ExtractError::Configuration(
                "extraction target must not be empty".to_string(),
            ));
        }
        Ok(Self { target, inference })
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn prompt_for(&self, text: &str) -> String {
        let target = &self.target;
        format!(
            "Can you read the following text from a scientific article, and
tell me if it contains information about the value of {target}?
If the value is not quoted in the text, return just 'NA'. If the value
is quoted in the text, please return the value.

Text: 'The value of {target} is 10 +/- .5'
Answer: 10

Text: 'Chocolate is delicious'
Answer: NA

Text: {text}
Answer:"
        )
    }

    pub fn read(&self, text: &str) -> Result<ExtractedValue> {
        let prompt = self.prompt_for(text);
        let raw = self.inference.complete(&prompt).map_err(inference_error)?;
        Ok(ExtractedValue::from_response(&raw))
    }
}

/// A rejected credential is fatal to the run; anything else is charged to
/// the current paper.
fn inference_error(err: anyhow::Error) -> ExtractError {
    match err.downcast_ref::<ProviderStatusError>() {
        Some(status) if status.is_auth_failure() => {
            ExtractError::Configuration(format!("{err:#}"))
        }
        _ => ExtractError::Inference(format!("{err:#}")),
    }
}
