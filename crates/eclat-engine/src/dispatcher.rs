use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use eclat_contracts::models::{Capability, ModelSelector, ModelSpec};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::{EngineConfig, DEFAULT_ASPECT_RATIO, DEFAULT_IMAGE_SIZE};
use crate::error::{error_chain_text, GenerationError};
use crate::image_ref::ImageRef;
use crate::providers::{ImageProvider, ImageRequest, ProviderRegistry, TextProvider, TextRequest};

pub const GREETING: &str = "Bienvenue à L'Éclat de Saveurs. Je suis votre majordome numérique. Comment puis-je rendre votre visite mémorable ?";

pub const CONCIERGE_SYSTEM_INSTRUCTION: &str = "Ton ton est luxueux, accueillant et expert en gastronomie française et accords mets-vins. Tu parles comme un majordome de palace.";

pub const CHAT_FAILURE_REPLY: &str =
    "Nos cuisines sont actuellement en pleine effervescence, je reviens vers vous dans un instant.";

pub const CHAT_EMPTY_REPLY: &str = "Une erreur est survenue dans nos cuisines numériques.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DishRecommendation {
    pub dish_type: String,
    pub flavor_profile: String,
    pub reasoning: String,
}

pub fn concierge_prompt(question: &str) -> String {
    format!(
        "Tu es le concierge expert de \"L'Éclat de Saveurs\", un restaurant 3 étoiles. Réponds de manière élégante, concise et passionnée à cette question : {}.",
        question.trim()
    )
}

/// Expand a short dish description into a photographic brief.
pub fn enriched_dish_prompt(dish: &str) -> String {
    [
        "Ultra-photorealistic Michelin-star culinary art.".to_string(),
        format!("DISH: {}.", dish.trim()),
        "STYLE: Professional food photography for a luxury editorial.".to_string(),
        "COMPOSITION: Minimalist architectural plating on a dark slate plate, generous negative space, sculptural height.".to_string(),
        "TEXTURES: Translucent gels, velvety emulsions with micro-bubbles, fragile tuiles, moisture droplets on herbs, glossy glaze.".to_string(),
        "LIGHTING: Moody chiaroscuro side lighting, subtle glints on silver cutlery and gold leaf flakes.".to_string(),
        "CAMERA: 100mm macro lens at f/2.8, razor-sharp focus, creamy cinematic bokeh.".to_string(),
        "QUALITY: Highly detailed, photorealistic, vibrant but natural colour grading.".to_string(),
    ]
    .join("\n")
}

pub fn recommendation_prompt(mood: &str, dietary_prefs: &str) -> String {
    format!(
        "L'utilisateur se sent {} et a ces préférences : {}. Suggère un type de plat parfait et un profil de saveur pour un menu de restaurant de luxe.",
        mood.trim(),
        dietary_prefs.trim()
    )
}

fn recommendation_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "dishType": { "type": "STRING" },
            "flavorProfile": { "type": "STRING" },
            "reasoning": { "type": "STRING" },
        },
        "required": ["dishType", "flavorProfile", "reasoning"],
    })
}

/// Issues the remote calls and converts every failure into a
/// [`GenerationError`] or a recovered reply.
pub struct RequestDispatcher {
    text: Arc<dyn TextProvider>,
    text_model: ModelSpec,
    image: Arc<dyn ImageProvider>,
    image_model: ModelSpec,
    aspect_ratio: String,
    image_size: String,
}

impl RequestDispatcher {
    pub fn new(
        text: Arc<dyn TextProvider>,
        text_model: ModelSpec,
        image: Arc<dyn ImageProvider>,
        image_model: ModelSpec,
    ) -> Self {
        Self {
            text,
            text_model,
            image,
            image_model,
            aspect_ratio: DEFAULT_ASPECT_RATIO.to_string(),
            image_size: DEFAULT_IMAGE_SIZE.to_string(),
        }
    }

    pub fn with_image_shape(
        mut self,
        aspect_ratio: impl Into<String>,
        image_size: impl Into<String>,
    ) -> Self {
        self.aspect_ratio = aspect_ratio.into();
        self.image_size = image_size.into();
        self
    }

    /// Resolve the configured models and bind them to registered providers.
    pub fn from_config(config: &EngineConfig, providers: &ProviderRegistry) -> Result<Self> {
        let selector = ModelSelector::new(None);
        let text_model = select_model(&selector, config.text_model.as_deref(), Capability::Text)?;
        let image_model =
            select_model(&selector, config.image_model.as_deref(), Capability::Image)?;
        let text = providers
            .text(&text_model.provider)
            .ok_or_else(|| anyhow!("no text provider registered for '{}'", text_model.provider))?;
        let image = providers.image(&image_model.provider).ok_or_else(|| {
            anyhow!("no image provider registered for '{}'", image_model.provider)
        })?;
        Ok(Self::new(text, text_model, image, image_model)
            .with_image_shape(config.aspect_ratio.clone(), config.image_size.clone()))
    }

    pub fn text_model(&self) -> &ModelSpec {
        &self.text_model
    }

    pub fn image_model(&self) -> &ModelSpec {
        &self.image_model
    }

    pub fn send_chat_message(&self, text: &str) -> Result<String, GenerationError> {
        let question = text.trim();
        if question.is_empty() {
            return Err(GenerationError::BlankInput);
        }
        let request = TextRequest {
            model: self.text_model.name.clone(),
            prompt: concierge_prompt(question),
            system_instruction: Some(CONCIERGE_SYSTEM_INSTRUCTION.to_string()),
            response_schema: None,
        };
        match self.text.complete(&request) {
            Ok(reply) if !reply.trim().is_empty() => Ok(reply.trim().to_string()),
            Ok(_) => {
                tracing::warn!(model = %self.text_model.name, "concierge returned an empty reply");
                Ok(CHAT_EMPTY_REPLY.to_string())
            }
            Err(err) => {
                tracing::warn!(
                    model = %self.text_model.name,
                    error = %error_chain_text(&err, 512),
                    "concierge request failed"
                );
                Ok(CHAT_FAILURE_REPLY.to_string())
            }
        }
    }

    /// `Ok(None)` means the service answered without an image.
    pub fn generate_image(&self, key: &str, prompt: &str) -> Result<Option<ImageRef>, GenerationError> {
        if prompt.trim().is_empty() {
            return Err(GenerationError::BlankInput);
        }
        let request = ImageRequest {
            model: self.image_model.name.clone(),
            prompt: enriched_dish_prompt(prompt),
            aspect_ratio: self.aspect_ratio.clone(),
            image_size: self.image_size.clone(),
        };
        let payload = self
            .image
            .generate(&request)
            .with_context(|| format!("image generation for '{key}' failed"))
            .map_err(|err| {
                let classified = GenerationError::classify(&err);
                tracing::warn!(
                    key,
                    model = %self.image_model.name,
                    credential_invalid = classified.is_credential_invalid(),
                    error = %error_chain_text(&err, 512),
                    "image request failed"
                );
                classified
            })?;
        Ok(payload.map(|payload| ImageRef::new(payload.bytes, payload.mime_type.as_deref())))
    }

    /// Mood-driven suggestion. Any failure, including a reply that does not
    /// match the schema, yields `None`.
    pub fn recommend_dish(&self, mood: &str, dietary_prefs: &str) -> Option<DishRecommendation> {
        if mood.trim().is_empty() {
            return None;
        }
        let request = TextRequest {
            model: self.text_model.name.clone(),
            prompt: recommendation_prompt(mood, dietary_prefs),
            system_instruction: None,
            response_schema: Some(recommendation_schema()),
        };
        let parsed = self.text.complete(&request).and_then(|reply| {
            serde_json::from_str::<DishRecommendation>(reply.trim())
                .context("recommendation reply is not valid JSON")
        });
        match parsed {
            Ok(recommendation) => Some(recommendation),
            Err(err) => {
                tracing::warn!(error = %error_chain_text(&err, 512), "recommendation failed");
                None
            }
        }
    }
}

fn select_model(
    selector: &ModelSelector,
    requested: Option<&str>,
    capability: Capability,
) -> Result<ModelSpec> {
    let selection = selector
        .select(requested, capability)
        .map_err(anyhow::Error::msg)?;
    if let Some(reason) = selection.fallback_reason.as_deref() {
        if selection.requested.is_some() {
            tracing::warn!(model = %selection.model.name, reason, "model fallback");
        } else {
            tracing::debug!(model = %selection.model.name, reason, "default model selected");
        }
    }
    Ok(selection.model)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use anyhow::{anyhow, bail, Result};
    use eclat_contracts::models::{Capability, ModelSpec};

    use super::{
        RequestDispatcher, CHAT_EMPTY_REPLY, CHAT_FAILURE_REPLY, CONCIERGE_SYSTEM_INSTRUCTION,
    };
    use crate::config::EngineConfig;
    use crate::credential::ApiKeySlot;
    use crate::error::{GenerationError, ProviderError};
    use crate::providers::{
        default_provider_registry, ImagePayload, ImageProvider, ImageRequest, TextProvider,
        TextRequest,
    };

    pub(crate) fn stub_model(name: &str, capability: Capability) -> ModelSpec {
        ModelSpec {
            name: name.to_string(),
            provider: "stub".to_string(),
            capabilities: vec![capability],
            structured_output: true,
        }
    }

    /// Text double that replays a fixed reply and records every request.
    pub(crate) struct StubText {
        pub reply: Result<String, String>,
        pub calls: AtomicUsize,
        pub seen: Mutex<Vec<TextRequest>>,
    }

    impl StubText {
        pub(crate) fn replying(reply: &str) -> Self {
            Self {
                reply: Ok(reply.to_string()),
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn failing(message: &str) -> Self {
            Self {
                reply: Err(message.to_string()),
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl TextProvider for StubText {
        fn name(&self) -> &str {
            "stub"
        }

        fn complete(&self, request: &TextRequest) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Ok(mut seen) = self.seen.lock() {
                seen.push(request.clone());
            }
            self.reply.clone().map_err(|message| anyhow!(message))
        }
    }

    pub(crate) enum ImageBehaviour {
        Payload(Vec<u8>),
        Empty,
        Status(u16),
        Message(&'static str),
    }

    pub(crate) struct StubImage {
        pub behaviour: ImageBehaviour,
        pub calls: AtomicUsize,
    }

    impl StubImage {
        pub(crate) fn new(behaviour: ImageBehaviour) -> Self {
            Self {
                behaviour,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl ImageProvider for StubImage {
        fn name(&self) -> &str {
            "stub"
        }

        fn generate(&self, _request: &ImageRequest) -> Result<Option<ImagePayload>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.behaviour {
                ImageBehaviour::Payload(bytes) => Ok(Some(ImagePayload {
                    bytes: bytes.clone(),
                    mime_type: Some("image/png".to_string()),
                })),
                ImageBehaviour::Empty => Ok(None),
                ImageBehaviour::Status(status) => Err(ProviderError::Http {
                    provider: "stub".to_string(),
                    status: *status,
                    body: "upstream said no".to_string(),
                }
                .into()),
                ImageBehaviour::Message(message) => bail!("{message}"),
            }
        }
    }

    fn dispatcher(text: Arc<StubText>, image: Arc<StubImage>) -> RequestDispatcher {
        RequestDispatcher::new(
            text,
            stub_model("stub-text", Capability::Text),
            image,
            stub_model("stub-image", Capability::Image),
        )
    }

    #[test]
    fn blank_chat_never_reaches_the_service() {
        let text = Arc::new(StubText::replying("bonjour"));
        let dispatcher = dispatcher(text.clone(), Arc::new(StubImage::new(ImageBehaviour::Empty)));
        assert_eq!(dispatcher.send_chat_message(""), Err(GenerationError::BlankInput));
        assert_eq!(dispatcher.send_chat_message("   \n"), Err(GenerationError::BlankInput));
        assert_eq!(text.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn chat_wraps_question_in_concierge_persona() -> Result<()> {
        let text = Arc::new(StubText::replying("  Un Chablis, bien sûr.  "));
        let dispatcher = dispatcher(text.clone(), Arc::new(StubImage::new(ImageBehaviour::Empty)));
        let reply = dispatcher.send_chat_message(" Quel vin avec le homard ? ")?;
        assert_eq!(reply, "Un Chablis, bien sûr.");

        let seen = text.seen.lock().map_err(|_| anyhow!("poisoned"))?;
        assert!(seen[0].prompt.contains("L'Éclat de Saveurs"));
        assert!(seen[0].prompt.ends_with("Quel vin avec le homard ?."));
        assert_eq!(
            seen[0].system_instruction.as_deref(),
            Some(CONCIERGE_SYSTEM_INSTRUCTION)
        );
        Ok(())
    }

    #[test]
    fn chat_failures_are_recovered() -> Result<()> {
        let failing = dispatcher(
            Arc::new(StubText::failing("rate limited")),
            Arc::new(StubImage::new(ImageBehaviour::Empty)),
        );
        assert_eq!(failing.send_chat_message("Bonsoir")?, CHAT_FAILURE_REPLY);

        let empty = dispatcher(
            Arc::new(StubText::replying("   ")),
            Arc::new(StubImage::new(ImageBehaviour::Empty)),
        );
        assert_eq!(empty.send_chat_message("Bonsoir")?, CHAT_EMPTY_REPLY);
        Ok(())
    }

    #[test]
    fn image_outcomes_are_classified() -> Result<()> {
        let text = Arc::new(StubText::replying(""));
        let ok = dispatcher(
            text.clone(),
            Arc::new(StubImage::new(ImageBehaviour::Payload(vec![7, 7, 7]))),
        );
        let image = ok
            .generate_image("dish-1", "Saint-Jacques")?
            .ok_or_else(|| anyhow!("expected image"))?;
        assert_eq!(image.bytes(), &[7, 7, 7]);

        let empty = dispatcher(text.clone(), Arc::new(StubImage::new(ImageBehaviour::Empty)));
        assert_eq!(empty.generate_image("dish-1", "Saint-Jacques")?, None);

        let expired = dispatcher(text.clone(), Arc::new(StubImage::new(ImageBehaviour::Status(401))));
        assert!(expired
            .generate_image("dish-1", "Saint-Jacques")
            .is_err_and(|err| err.is_credential_invalid()));

        let missing_model = dispatcher(
            text.clone(),
            Arc::new(StubImage::new(ImageBehaviour::Message("Requested entity was not found."))),
        );
        assert!(missing_model
            .generate_image("dish-1", "Saint-Jacques")
            .is_err_and(|err| err.is_credential_invalid()));

        let busy = dispatcher(text, Arc::new(StubImage::new(ImageBehaviour::Status(503))));
        assert!(matches!(
            busy.generate_image("dish-1", "Saint-Jacques"),
            Err(GenerationError::Transient { .. })
        ));
        Ok(())
    }

    #[test]
    fn blank_image_prompt_is_rejected_locally() {
        let image = Arc::new(StubImage::new(ImageBehaviour::Empty));
        let dispatcher = dispatcher(Arc::new(StubText::replying("")), image.clone());
        assert_eq!(
            dispatcher.generate_image("dish-1", "  "),
            Err(GenerationError::BlankInput)
        );
        assert_eq!(image.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn recommendation_parses_structured_reply() {
        let text = Arc::new(StubText::replying(
            r#"{"dishType":"Risotto","flavorProfile":"Terreux","reasoning":"Réconfortant."}"#,
        ));
        let dispatcher = dispatcher(text.clone(), Arc::new(StubImage::new(ImageBehaviour::Empty)));
        let recommendation = dispatcher.recommend_dish("fatigué", "végétarien");
        assert_eq!(
            recommendation.map(|rec| rec.dish_type),
            Some("Risotto".to_string())
        );
        let schema_sent = text
            .seen
            .lock()
            .map(|seen| seen[0].response_schema.is_some())
            .unwrap_or(false);
        assert!(schema_sent);
    }

    #[test]
    fn recommendation_failures_yield_none() {
        let garbage = dispatcher(
            Arc::new(StubText::replying("pas du json")),
            Arc::new(StubImage::new(ImageBehaviour::Empty)),
        );
        assert!(garbage.recommend_dish("joyeux", "aucune").is_none());

        let down = dispatcher(
            Arc::new(StubText::failing("unavailable")),
            Arc::new(StubImage::new(ImageBehaviour::Empty)),
        );
        assert!(down.recommend_dish("joyeux", "aucune").is_none());
    }

    #[test]
    fn from_config_binds_dryrun_models() -> Result<()> {
        let config = EngineConfig {
            text_model: Some("dryrun-text-1".to_string()),
            image_model: Some("dryrun-image-1".to_string()),
            ..EngineConfig::default()
        };
        let providers = default_provider_registry(&config, ApiKeySlot::new())?;
        let dispatcher = RequestDispatcher::from_config(&config, &providers)?;
        assert_eq!(dispatcher.text_model().provider, "dryrun");
        assert_eq!(dispatcher.image_model().name, "dryrun-image-1");
        assert!(dispatcher.generate_image("dish-3", "Homard bleu")?.is_some());
        Ok(())
    }

    #[test]
    fn unknown_model_falls_back_to_default() -> Result<()> {
        let config = EngineConfig {
            image_model: Some("imaginary-model".to_string()),
            ..EngineConfig::default()
        };
        let providers = default_provider_registry(&config, ApiKeySlot::new())?;
        let dispatcher = RequestDispatcher::from_config(&config, &providers)?;
        assert_eq!(dispatcher.image_model().name, "gemini-3-pro-image-preview");
        Ok(())
    }
}
