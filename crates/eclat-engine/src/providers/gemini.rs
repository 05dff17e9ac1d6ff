use std::thread;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::blocking::{Client as HttpClient, RequestBuilder, Response as HttpResponse};
use serde_json::{json, Map, Value};

use super::{
    is_retryable_transport_error, response_json_or_error, ImagePayload, ImageProvider,
    ImageRequest, TextProvider, TextRequest,
};
use crate::config::TransportSettings;
use crate::credential::ApiKeySlot;
use crate::error::ProviderError;

const PROVIDER_LABEL: &str = "Gemini";
const API_KEY_HEADER: &str = "x-goog-api-key";

const SUPPORTED_RATIOS: [(&str, f64); 10] = [
    ("1:1", 1.0),
    ("2:3", 2.0 / 3.0),
    ("3:2", 3.0 / 2.0),
    ("3:4", 3.0 / 4.0),
    ("4:3", 4.0 / 3.0),
    ("4:5", 4.0 / 5.0),
    ("5:4", 5.0 / 4.0),
    ("9:16", 9.0 / 16.0),
    ("16:9", 16.0 / 9.0),
    ("21:9", 21.0 / 9.0),
];

/// `generateContent` transport for both text and image models. The key is
/// read from the shared slot on every call so a freshly selected key is
/// picked up without rebuilding the provider. It travels in a header, never
/// in the URL, so transport errors cannot echo it back.
pub struct GeminiProvider {
    api_base: String,
    http: HttpClient,
    key: ApiKeySlot,
    transport: TransportSettings,
}

impl GeminiProvider {
    pub fn new(
        api_base: impl Into<String>,
        key: ApiKeySlot,
        transport: TransportSettings,
    ) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(transport.request_timeout())
            .build()
            .context("failed to build Gemini HTTP client")?;
        Ok(Self {
            api_base: api_base.into().trim().trim_end_matches('/').to_string(),
            http,
            key,
            transport,
        })
    }

    fn api_key(&self) -> Result<String> {
        self.key.get().ok_or_else(|| {
            ProviderError::MissingApiKey {
                provider: PROVIDER_LABEL.to_string(),
            }
            .into()
        })
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    fn request(&self, endpoint: &str, api_key: &str, payload: &Value) -> RequestBuilder {
        self.http
            .post(endpoint)
            .header(API_KEY_HEADER, api_key)
            .timeout(self.transport.request_timeout())
            .json(payload)
    }

    fn post_with_transport_retries(
        &self,
        endpoint: &str,
        api_key: &str,
        payload: &Value,
    ) -> Result<HttpResponse> {
        let max_retries = self.transport.retries;
        let mut attempt = 0;
        loop {
            let response = self.request(endpoint, api_key, payload).send();
            match response {
                Ok(ok) => return Ok(ok),
                Err(raw) => {
                    let err = anyhow::Error::new(raw.without_url())
                        .context(format!("{PROVIDER_LABEL} request failed ({endpoint})"));
                    if !is_retryable_transport_error(&err) || attempt >= max_retries {
                        return Err(err);
                    }
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_retries,
                        "Gemini transport retry after transient request failure"
                    );
                    thread::sleep(self.transport.backoff_for_attempt(attempt));
                    attempt += 1;
                }
            }
        }
    }

    fn call(&self, model: &str, payload: &Value) -> Result<Value> {
        let api_key = self.api_key()?;
        let endpoint = self.endpoint_for_model(model);
        let response = self.post_with_transport_retries(&endpoint, &api_key, payload)?;
        response_json_or_error(PROVIDER_LABEL, response)
    }
}

impl TextProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn complete(&self, request: &TextRequest) -> Result<String> {
        let payload = text_payload(request);
        let response = self
            .call(&request.model, &payload)
            .context("Gemini text completion failed")?;
        Ok(extract_text(&response))
    }
}

impl ImageProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn generate(&self, request: &ImageRequest) -> Result<Option<ImagePayload>> {
        let payload = image_payload(request);
        let response = self
            .call(&request.model, &payload)
            .context("Gemini image generation failed")?;
        extract_first_image(&response)
    }
}

fn text_payload(request: &TextRequest) -> Value {
    let mut payload = Map::new();
    payload.insert(
        "contents".to_string(),
        json!([{ "role": "user", "parts": [{ "text": request.prompt }] }]),
    );
    if let Some(instruction) = request
        .system_instruction
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        payload.insert(
            "systemInstruction".to_string(),
            json!({ "parts": [{ "text": instruction }] }),
        );
    }
    if let Some(schema) = request.response_schema.as_ref() {
        payload.insert(
            "generationConfig".to_string(),
            json!({
                "responseMimeType": "application/json",
                "responseSchema": schema,
            }),
        );
    }
    Value::Object(payload)
}

fn image_payload(request: &ImageRequest) -> Value {
    json!({
        "contents": [{ "role": "user", "parts": [{ "text": request.prompt }] }],
        "generationConfig": {
            "responseModalities": ["IMAGE"],
            "imageConfig": {
                "aspectRatio": normalize_aspect_ratio(&request.aspect_ratio),
                "imageSize": resolve_image_size_tier(&request.image_size),
            },
        },
    })
}

/// Snap a requested ratio (`"4:3"`, `"1024x768"`, `"portrait"`) onto one the
/// image models accept.
pub(crate) fn normalize_aspect_ratio(raw: &str) -> String {
    let normalized = raw.trim().to_ascii_lowercase();
    match normalized.as_str() {
        "" | "square" => return "1:1".to_string(),
        "portrait" | "tall" => return "9:16".to_string(),
        "landscape" | "wide" => return "16:9".to_string(),
        _ => {}
    }
    if SUPPORTED_RATIOS
        .iter()
        .any(|(candidate, _)| *candidate == normalized)
    {
        return normalized;
    }
    let Some((left, right)) = split_pair(&normalized) else {
        tracing::debug!(requested = raw, "unrecognised aspect ratio; using 1:1");
        return "1:1".to_string();
    };
    let target = left as f64 / right as f64;
    let mut best_key = "1:1";
    let mut best_delta = f64::MAX;
    for (key, ratio) in SUPPORTED_RATIOS {
        let delta = (ratio - target).abs();
        if delta < best_delta {
            best_key = key;
            best_delta = delta;
        }
    }
    tracing::debug!(requested = raw, snapped = best_key, "aspect ratio snapped");
    best_key.to_string()
}

pub(crate) fn resolve_image_size_tier(raw: &str) -> String {
    let normalized = raw.trim().to_ascii_lowercase();
    if matches!(normalized.as_str(), "1k" | "2k" | "4k") {
        return normalized.to_ascii_uppercase();
    }
    if let Some((width, height)) = split_pair(&normalized) {
        let longest = width.max(height);
        if longest >= 3600 {
            return "4K".to_string();
        }
        if longest >= 1800 {
            return "2K".to_string();
        }
        if longest >= 64 {
            return "1K".to_string();
        }
    }
    "2K".to_string()
}

fn split_pair(value: &str) -> Option<(u32, u32)> {
    let (left, right) = value.split_once(':').or_else(|| value.split_once('x'))?;
    let left = left.trim().parse::<u32>().ok()?;
    let right = right.trim().parse::<u32>().ok()?;
    if left == 0 || right == 0 {
        return None;
    }
    Some((left, right))
}

fn candidate_parts(response: &Value) -> impl Iterator<Item = &Value> {
    response
        .get("candidates")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|candidate| {
            candidate
                .get("content")
                .and_then(|content| content.get("parts"))
                .and_then(Value::as_array)
        })
        .flatten()
}

/// Concatenated answer text of the first candidate, thought parts excluded.
pub(crate) fn extract_text(response: &Value) -> String {
    let Some(parts) = response
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|candidates| candidates.first())
        .and_then(|candidate| candidate.get("content"))
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)
    else {
        return String::new();
    };
    parts
        .iter()
        .filter(|part| !part.get("thought").and_then(Value::as_bool).unwrap_or(false))
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join("")
        .trim()
        .to_string()
}

pub(crate) fn extract_first_image(response: &Value) -> Result<Option<ImagePayload>> {
    for part in candidate_parts(response) {
        let Some(inline) = part
            .get("inlineData")
            .or_else(|| part.get("inline_data"))
            .and_then(Value::as_object)
        else {
            continue;
        };
        let data = inline.get("data").and_then(Value::as_str).unwrap_or_default();
        if data.is_empty() {
            continue;
        }
        let bytes = BASE64
            .decode(data.as_bytes())
            .context("Gemini image base64 decode failed")?;
        let mime_type = inline
            .get("mimeType")
            .or_else(|| inline.get("mime_type"))
            .and_then(Value::as_str)
            .map(str::to_string);
        return Ok(Some(ImagePayload { bytes, mime_type }));
    }
    Ok(None)
}
