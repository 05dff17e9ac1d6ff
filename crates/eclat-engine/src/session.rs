use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use eclat_contracts::cache::ResultCache;
use eclat_contracts::chat::{ChatLog, ChatTurn};
use eclat_contracts::events::{EventPayload, EventWriter};
use eclat_contracts::menu::MenuItem;
use serde_json::{json, Value};

use crate::config::{EngineConfig, DEFAULT_NARRATOR_PERIOD};
use crate::credential::{CredentialAuthority, CredentialGate};
use crate::dispatcher::{DishRecommendation, RequestDispatcher, GREETING};
use crate::error::GenerationError;
use crate::image_ref::ImageRef;
use crate::narrator::ProgressNarrator;
use crate::providers::ProviderRegistry;
use crate::tracker::InFlightTracker;

/// Result of one image request that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageOutcome {
    Generated(ImageRef),
    /// The service answered without an image. Nothing is cached.
    NoContent,
    /// A request for this key is already outstanding; this one was dropped.
    AlreadyInProgress,
    /// No credential was selected. Acquisition was attempted instead of the
    /// request; retry once `acquired` is true.
    CredentialRequired { acquired: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub enum DisplayImage {
    Generated(ImageRef),
    Placeholder(String),
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub narrator_period: Duration,
    pub narrator_phrases: Vec<String>,
    pub cache_capacity: Option<usize>,
    pub events: Option<EventWriter>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            narrator_period: DEFAULT_NARRATOR_PERIOD,
            narrator_phrases: Vec::new(),
            cache_capacity: None,
            events: None,
        }
    }
}

pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Owns every piece of per-session state and is the only thing allowed to
/// mutate it. Shared between threads through `Arc`.
pub struct GenerationSession {
    gate: CredentialGate,
    dispatcher: RequestDispatcher,
    tracker: InFlightTracker,
    narrator: Arc<ProgressNarrator>,
    cache: Mutex<ResultCache<ImageRef>>,
    chat: Mutex<ChatLog>,
    chat_lane: Mutex<()>,
    thinking: AtomicBool,
    last_notice: Mutex<Option<String>>,
    events: EventWriter,
}

impl GenerationSession {
    pub fn new(
        dispatcher: RequestDispatcher,
        authority: Option<Arc<dyn CredentialAuthority>>,
        options: SessionOptions,
    ) -> Self {
        let narrator = Arc::new(ProgressNarrator::new(
            options.narrator_phrases,
            options.narrator_period,
        ));
        let tracker = InFlightTracker::new().with_observer(narrator.clone());
        let cache = match options.cache_capacity {
            Some(capacity) => ResultCache::bounded(capacity),
            None => ResultCache::new(),
        };
        let events = options
            .events
            .unwrap_or_else(|| EventWriter::in_memory(new_session_id()));
        let session = Self {
            gate: CredentialGate::new(authority),
            dispatcher,
            tracker,
            narrator,
            cache: Mutex::new(cache),
            chat: Mutex::new(ChatLog::with_greeting(GREETING)),
            chat_lane: Mutex::new(()),
            thinking: AtomicBool::new(false),
            last_notice: Mutex::new(None),
            events,
        };
        session.emit(
            "session_started",
            json!({
                "text_model": session.dispatcher.text_model().name,
                "image_model": session.dispatcher.image_model().name,
                "credential_available": session.gate.is_available(),
                "has_credential": session.gate.has_credential(),
            }),
        );
        session
    }

    pub fn from_config(
        config: &EngineConfig,
        providers: &ProviderRegistry,
        authority: Option<Arc<dyn CredentialAuthority>>,
        events: Option<EventWriter>,
    ) -> Result<Self> {
        let dispatcher = RequestDispatcher::from_config(config, providers)
            .context("failed to resolve session models")?;
        let options = SessionOptions {
            narrator_period: config.narrator_period,
            cache_capacity: config.cache_capacity,
            events,
            ..SessionOptions::default()
        };
        Ok(Self::new(dispatcher, authority, options))
    }

    pub fn session_id(&self) -> &str {
        self.events.session_id()
    }

    pub fn events(&self) -> &EventWriter {
        &self.events
    }

    pub fn dispatcher(&self) -> &RequestDispatcher {
        &self.dispatcher
    }

    pub fn has_credential(&self) -> bool {
        self.gate.has_credential()
    }

    pub fn credential_available(&self) -> bool {
        self.gate.is_available()
    }

    pub fn request_credential(&self) -> bool {
        let acquired = self.gate.request_credential();
        self.emit(
            "credential_requested",
            json!({ "acquired": acquired, "available": self.gate.is_available() }),
        );
        acquired
    }

    /// Generate (or regenerate) the image for `key`.
    ///
    /// Order of checks: blank input, busy key, missing credential. The key
    /// is released before this returns on every path, and the cache is
    /// only written on success.
    pub fn generate_dish_image(
        &self,
        key: &str,
        prompt: &str,
    ) -> Result<ImageOutcome, GenerationError> {
        let key = key.trim();
        if key.is_empty() || prompt.trim().is_empty() {
            self.set_notice(Some(GenerationError::BlankInput.user_notice()));
            return Err(GenerationError::BlankInput);
        }
        if self.tracker.is_busy(key) {
            return Ok(ImageOutcome::AlreadyInProgress);
        }
        if !self.gate.has_credential() {
            let acquired = self.request_credential();
            return Ok(ImageOutcome::CredentialRequired { acquired });
        }
        let Some(guard) = self.tracker.try_acquire(key) else {
            return Ok(ImageOutcome::AlreadyInProgress);
        };
        self.set_notice(None);
        self.emit(
            "image_generation_started",
            json!({ "key": key, "model": self.dispatcher.image_model().name }),
        );

        let result = self.dispatcher.generate_image(key, prompt);
        if let Ok(Some(image)) = &result {
            if let Some(evicted) = self.cache().put(key, image.clone()) {
                tracing::debug!(key, evicted = %evicted, "result cache evicted entry");
            }
        }
        drop(guard);

        match result {
            Ok(Some(image)) => {
                self.emit(
                    "image_generated",
                    json!({
                        "key": key,
                        "mime_type": image.mime_type(),
                        "bytes": image.bytes().len(),
                        "sha256": image.digest(),
                    }),
                );
                Ok(ImageOutcome::Generated(image))
            }
            Ok(None) => {
                self.emit("image_no_content", json!({ "key": key }));
                Ok(ImageOutcome::NoContent)
            }
            Err(err) => {
                self.set_notice(Some(err.user_notice()));
                self.emit(
                    "image_generation_failed",
                    json!({
                        "key": key,
                        "credential_invalid": err.is_credential_invalid(),
                        "error": err.to_string(),
                    }),
                );
                if err.is_credential_invalid() {
                    self.request_credential();
                }
                Err(err)
            }
        }
    }

    pub fn generate_menu_item_image(
        &self,
        item: &MenuItem,
    ) -> Result<ImageOutcome, GenerationError> {
        self.generate_dish_image(&item.id, &item.generation_prompt)
    }

    /// Run [`Self::generate_dish_image`] on a worker thread. Credential
    /// acquisition should already have happened on the calling thread.
    pub fn spawn_dish_image(
        self: &Arc<Self>,
        key: &str,
        prompt: &str,
    ) -> Result<JoinHandle<Result<ImageOutcome, GenerationError>>> {
        let session = Arc::clone(self);
        let key = key.trim().to_string();
        let prompt = prompt.to_string();
        thread::Builder::new()
            .name(format!("eclat-image-{key}"))
            .spawn(move || session.generate_dish_image(&key, &prompt))
            .context("failed to spawn image generation thread")
    }

    /// Append the user's turn, ask the concierge and append its reply.
    /// Chat requests are serialised so turns stay paired.
    pub fn send_chat_message(&self, text: &str) -> Result<ChatTurn, GenerationError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(GenerationError::BlankInput);
        }
        let _lane = self.chat_lane.lock().unwrap_or_else(PoisonError::into_inner);
        self.chat().append(ChatTurn::user(text));
        self.thinking.store(true, Ordering::SeqCst);
        let reply = self.dispatcher.send_chat_message(text);
        self.thinking.store(false, Ordering::SeqCst);

        let turn = ChatTurn::assistant(reply?);
        self.chat().append(turn.clone());
        self.emit(
            "chat_reply",
            json!({
                "question_chars": text.chars().count(),
                "reply_chars": turn.text.chars().count(),
            }),
        );
        Ok(turn)
    }

    pub fn is_thinking(&self) -> bool {
        self.thinking.load(Ordering::SeqCst)
    }

    pub fn chat_transcript(&self) -> Vec<ChatTurn> {
        self.chat().all().to_vec()
    }

    pub fn recommend_dish(&self, mood: &str, dietary_prefs: &str) -> Option<DishRecommendation> {
        self.dispatcher.recommend_dish(mood, dietary_prefs)
    }

    pub fn image_for(&self, key: &str) -> Option<ImageRef> {
        self.cache().get(key.trim())
    }

    pub fn display_image(&self, item: &MenuItem) -> DisplayImage {
        match self.image_for(&item.id) {
            Some(image) => DisplayImage::Generated(image),
            None => DisplayImage::Placeholder(item.image.clone()),
        }
    }

    pub fn cached_keys(&self) -> Vec<String> {
        self.cache().keys().map(str::to_string).collect()
    }

    pub fn is_generating(&self, key: &str) -> bool {
        self.tracker.is_busy(key.trim())
    }

    pub fn in_flight_keys(&self) -> Vec<String> {
        self.tracker.busy_keys()
    }

    /// Current status phrase while anything is generating.
    pub fn narration(&self) -> Option<String> {
        self.narrator
            .is_running()
            .then(|| self.narrator.current_phrase().to_string())
    }

    pub fn narrator(&self) -> &ProgressNarrator {
        &self.narrator
    }

    pub fn last_notice(&self) -> Option<String> {
        self.last_notice
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_notice(&self, notice: Option<&str>) {
        *self.last_notice.lock().unwrap_or_else(PoisonError::into_inner) =
            notice.map(str::to_string);
    }

    fn cache(&self) -> MutexGuard<'_, ResultCache<ImageRef>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn chat(&self) -> MutexGuard<'_, ChatLog> {
        self.chat.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event_type: &str, payload: Value) {
        let payload: EventPayload = match payload {
            Value::Object(map) => map,
            _ => EventPayload::new(),
        };
        if let Err(err) = self.events.emit(event_type, payload) {
            tracing::warn!(event_type, error = %err, "failed to record session event");
        }
    }
}
