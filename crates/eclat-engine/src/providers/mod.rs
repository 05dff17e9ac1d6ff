mod dryrun;
mod gemini;

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use reqwest::blocking::Response as HttpResponse;
use serde_json::Value;

use crate::config::EngineConfig;
use crate::credential::ApiKeySlot;
use crate::error::{truncate_text, ProviderError};

pub use dryrun::DryrunProvider;
pub use gemini::GeminiProvider;

#[derive(Debug, Clone, PartialEq)]
pub struct TextRequest {
    pub model: String,
    pub prompt: String,
    pub system_instruction: Option<String>,
    /// JSON schema the reply must satisfy. When set the reply is a JSON
    /// document rendered as text.
    pub response_schema: Option<Value>,
}

pub trait TextProvider: Send + Sync {
    fn name(&self) -> &str;
    fn complete(&self, request: &TextRequest) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    pub model: String,
    pub prompt: String,
    pub aspect_ratio: String,
    pub image_size: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub bytes: Vec<u8>,
    pub mime_type: Option<String>,
}

pub trait ImageProvider: Send + Sync {
    fn name(&self) -> &str;
    /// `Ok(None)` when the service answered without an image part.
    fn generate(&self, request: &ImageRequest) -> Result<Option<ImagePayload>>;
}

#[derive(Default, Clone)]
pub struct ProviderRegistry {
    text: BTreeMap<String, Arc<dyn TextProvider>>,
    image: BTreeMap<String, Arc<dyn ImageProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_text(&mut self, provider: Arc<dyn TextProvider>) {
        self.text.insert(provider.name().to_string(), provider);
    }

    pub fn register_image(&mut self, provider: Arc<dyn ImageProvider>) {
        self.image.insert(provider.name().to_string(), provider);
    }

    pub fn text(&self, name: &str) -> Option<Arc<dyn TextProvider>> {
        self.text.get(name).cloned()
    }

    pub fn image(&self, name: &str) -> Option<Arc<dyn ImageProvider>> {
        self.image.get(name).cloned()
    }

    pub fn text_names(&self) -> Vec<String> {
        self.text.keys().cloned().collect()
    }

    pub fn image_names(&self) -> Vec<String> {
        self.image.keys().cloned().collect()
    }
}

pub fn default_provider_registry(config: &EngineConfig, key: ApiKeySlot) -> Result<ProviderRegistry> {
    let mut registry = ProviderRegistry::new();
    let dryrun = Arc::new(DryrunProvider);
    registry.register_text(dryrun.clone());
    registry.register_image(dryrun);
    let gemini = Arc::new(GeminiProvider::new(
        config.api_base.clone(),
        key,
        config.transport,
    )?);
    registry.register_text(gemini.clone());
    registry.register_image(gemini);
    Ok(registry)
}

fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        return Err(ProviderError::Http {
            provider: provider.to_string(),
            status: status.as_u16(),
            body: truncate_text(&body, 512),
        }
        .into());
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}

fn is_retryable_transport_error(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<reqwest::Error>()
            .map(|reqwest_err| {
                reqwest_err.is_timeout() || reqwest_err.is_connect() || reqwest_err.is_request()
            })
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;

    use super::{default_provider_registry, is_retryable_transport_error};
    use crate::config::EngineConfig;
    use crate::credential::ApiKeySlot;

    #[test]
    fn default_registry_has_both_transports() -> anyhow::Result<()> {
        let registry = default_provider_registry(&EngineConfig::default(), ApiKeySlot::new())?;
        assert_eq!(registry.text_names(), vec!["dryrun", "gemini"]);
        assert_eq!(registry.image_names(), vec!["dryrun", "gemini"]);
        assert!(registry.text("openai").is_none());
        Ok(())
    }

    #[test]
    fn plain_errors_are_not_retried() {
        assert!(!is_retryable_transport_error(&anyhow!("bad request")));
    }
}
