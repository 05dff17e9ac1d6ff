use std::env;
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_ASPECT_RATIO: &str = "1:1";
pub const DEFAULT_IMAGE_SIZE: &str = "2K";
pub const DEFAULT_NARRATOR_PERIOD: Duration = Duration::from_secs(3);

/// Bounds on a single remote call. Every request carries a timeout so no
/// key can stay busy forever.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransportSettings {
    pub request_timeout_s: f64,
    pub retries: usize,
    pub retry_backoff_s: f64,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            request_timeout_s: 90.0,
            retries: 2,
            retry_backoff_s: 1.2,
        }
    }
}

impl TransportSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.request_timeout_s)
    }

    pub fn backoff_for_attempt(&self, attempt: usize) -> Duration {
        Duration::from_secs_f64(self.retry_backoff_s * (attempt as f64 + 1.0))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub api_base: String,
    pub text_model: Option<String>,
    pub image_model: Option<String>,
    pub transport: TransportSettings,
    pub narrator_period: Duration,
    pub aspect_ratio: String,
    pub image_size: String,
    pub cache_capacity: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            text_model: None,
            image_model: None,
            transport: TransportSettings::default(),
            narrator_period: DEFAULT_NARRATOR_PERIOD,
            aspect_ratio: DEFAULT_ASPECT_RATIO.to_string(),
            image_size: DEFAULT_IMAGE_SIZE.to_string(),
            cache_capacity: None,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Out-of-range numbers are
    /// clamped, unparsable ones fall back to the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |keys: &[&str]| {
            keys.iter().find_map(|key| {
                lookup(*key)
                    .map(|value| value.trim().to_string())
                    .filter(|value| !value.is_empty())
            })
        };
        let defaults = Self::default();
        let transport = TransportSettings {
            request_timeout_s: clamped_f64(
                get(&["ECLAT_REQUEST_TIMEOUT"]),
                defaults.transport.request_timeout_s,
                15.0,
                300.0,
            ),
            retries: clamped_f64(
                get(&["ECLAT_TRANSPORT_RETRIES"]),
                defaults.transport.retries as f64,
                0.0,
                4.0,
            )
            .round() as usize,
            retry_backoff_s: clamped_f64(
                get(&["ECLAT_RETRY_BACKOFF"]),
                defaults.transport.retry_backoff_s,
                0.1,
                10.0,
            ),
        };
        let narrator_ms = clamped_f64(
            get(&["ECLAT_NARRATOR_PERIOD_MS"]),
            defaults.narrator_period.as_millis() as f64,
            50.0,
            60_000.0,
        );

        Self {
            api_base: get(&["ECLAT_API_BASE", "GEMINI_API_BASE"])
                .map(|value| value.trim_end_matches('/').to_string())
                .unwrap_or(defaults.api_base),
            text_model: get(&["ECLAT_TEXT_MODEL"]),
            image_model: get(&["ECLAT_IMAGE_MODEL"]),
            transport,
            narrator_period: Duration::from_millis(narrator_ms.round() as u64),
            aspect_ratio: get(&["ECLAT_ASPECT_RATIO"]).unwrap_or(defaults.aspect_ratio),
            image_size: get(&["ECLAT_IMAGE_SIZE"]).unwrap_or(defaults.image_size),
            cache_capacity: get(&["ECLAT_CACHE_CAPACITY"])
                .and_then(|value| value.parse::<usize>().ok())
                .filter(|value| *value > 0),
        }
    }
}

fn clamped_f64(raw: Option<String>, default: f64, min: f64, max: f64) -> f64 {
    raw.and_then(|value| value.parse::<f64>().ok())
        .filter(|value| value.is_finite())
        .unwrap_or(default)
        .clamp(min, max)
}
