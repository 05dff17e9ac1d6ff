pub mod config;
pub mod credential;
pub mod dispatcher;
pub mod error;
pub mod image_ref;
pub mod narrator;
pub mod providers;
pub mod session;
pub mod tracker;

pub use config::{EngineConfig, TransportSettings};
pub use credential::{ApiKeySlot, CredentialAuthority, CredentialGate, KeySlotAuthority};
pub use dispatcher::{DishRecommendation, RequestDispatcher};
pub use error::{GenerationError, ProviderError};
pub use image_ref::ImageRef;
pub use narrator::ProgressNarrator;
pub use providers::{default_provider_registry, ProviderRegistry};
pub use session::{new_session_id, DisplayImage, GenerationSession, ImageOutcome, SessionOptions};
pub use tracker::{InFlightGuard, InFlightObserver, InFlightTracker};
