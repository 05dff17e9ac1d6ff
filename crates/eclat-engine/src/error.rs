use thiserror::Error;

/// Failure kinds surfaced to front-ends. Remote failures never reach a
/// caller in any other form.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    #[error("input is blank")]
    BlankInput,
    #[error("generation failed: {message}")]
    Transient { message: String },
    #[error("credential invalid or expired: {message}")]
    CredentialInvalid { message: String },
}

pub const TRANSIENT_IMAGE_NOTICE: &str = "L'art prend du temps... réessayez dans un instant.";
pub const CREDENTIAL_INVALID_NOTICE: &str =
    "Clé API invalide ou expirée. Veuillez re-sélectionner.";
pub const BLANK_INPUT_NOTICE: &str = "Veuillez saisir votre requête.";

impl GenerationError {
    /// Classify a provider failure. Structured provider errors win; the
    /// rendered error chain is the fallback.
    pub fn classify(err: &anyhow::Error) -> Self {
        let message = error_chain_text(err, 512);
        for cause in err.chain() {
            if let Some(provider_err) = cause.downcast_ref::<ProviderError>() {
                return if provider_err.indicates_bad_credential() {
                    Self::CredentialInvalid { message }
                } else {
                    Self::Transient { message }
                };
            }
        }
        Self::classify_message(&message)
    }

    pub fn classify_message(message: &str) -> Self {
        let message = message.trim().to_string();
        if message.to_lowercase().contains("not found") {
            Self::CredentialInvalid { message }
        } else {
            Self::Transient { message }
        }
    }

    pub fn is_credential_invalid(&self) -> bool {
        matches!(self, Self::CredentialInvalid { .. })
    }

    pub fn user_notice(&self) -> &'static str {
        match self {
            Self::BlankInput => BLANK_INPUT_NOTICE,
            Self::Transient { .. } => TRANSIENT_IMAGE_NOTICE,
            Self::CredentialInvalid { .. } => CREDENTIAL_INVALID_NOTICE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("{provider} request failed ({status}): {body}")]
    Http {
        provider: String,
        status: u16,
        body: String,
    },
    #[error("{provider} API key not set")]
    MissingApiKey { provider: String },
}

impl ProviderError {
    fn indicates_bad_credential(&self) -> bool {
        match self {
            Self::Http { status, .. } => matches!(status, 401 | 403 | 404),
            Self::MissingApiKey { .. } => true,
        }
    }
}

pub(crate) fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() || parts.last().is_some_and(|last| last == trimmed) {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;

    use super::{error_chain_text, GenerationError, ProviderError};

    #[test]
    fn not_found_text_is_a_credential_problem() {
        assert!(GenerationError::classify_message("model not found").is_credential_invalid());
        assert!(
            GenerationError::classify_message("Requested entity was NOT FOUND.")
                .is_credential_invalid()
        );
    }

    #[test]
    fn other_text_is_transient() {
        assert_eq!(
            GenerationError::classify_message("rate limited"),
            GenerationError::Transient {
                message: "rate limited".to_string()
            }
        );
    }

    #[test]
    fn structured_status_beats_message_text() {
        let unauthorized = anyhow::Error::new(ProviderError::Http {
            provider: "Gemini".to_string(),
            status: 403,
            body: "permission denied".to_string(),
        })
        .context("image generation failed");
        assert!(GenerationError::classify(&unauthorized).is_credential_invalid());

        let throttled = anyhow::Error::new(ProviderError::Http {
            provider: "Gemini".to_string(),
            status: 429,
            body: "quota for model not found in tier".to_string(),
        });
        assert!(matches!(
            GenerationError::classify(&throttled),
            GenerationError::Transient { .. }
        ));

        let missing = anyhow::Error::new(ProviderError::MissingApiKey {
            provider: "Gemini".to_string(),
        });
        assert!(GenerationError::classify(&missing).is_credential_invalid());
    }

    #[test]
    fn unstructured_errors_fall_back_to_text() {
        let err = anyhow!("model not found").context("Gemini request failed");
        assert!(GenerationError::classify(&err).is_credential_invalid());

        let err = anyhow!("connection reset by peer");
        assert!(!GenerationError::classify(&err).is_credential_invalid());
    }

    #[test]
    fn error_chain_text_keeps_each_context_once() {
        let err = anyhow!("socket closed")
            .context("Gemini request failed (https://example.test)")
            .context("image generation failed");
        let rendered = error_chain_text(&err, 400);
        assert_eq!(
            rendered,
            "image generation failed | caused by: Gemini request failed (https://example.test) | caused by: socket closed"
        );
        assert!(error_chain_text(&err, 5).ends_with('…'));
    }
}
