use std::env;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use anyhow::Result;

/// Host-side storage for the selected API key, shared by the credential
/// authority (writer) and the remote providers (readers). The session never
/// sees the key itself.
#[derive(Clone, Default)]
pub struct ApiKeySlot {
    inner: Arc<RwLock<Option<String>>>,
}

impl ApiKeySlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_env() -> Self {
        let slot = Self::new();
        if let Some(key) = first_non_empty_env(&["GEMINI_API_KEY", "GOOGLE_API_KEY"]) {
            slot.set(key);
        }
        slot
    }

    pub fn get(&self) -> Option<String> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set(&self, key: impl Into<String>) {
        let key = key.into().trim().to_string();
        let mut slot = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        *slot = if key.is_empty() { None } else { Some(key) };
    }

    pub fn clear(&self) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn is_set(&self) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl fmt::Debug for ApiKeySlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiKeySlot")
            .field("is_set", &self.is_set())
            .finish()
    }
}

/// Ambient facility that knows whether a key is selected and can ask the
/// user to pick one.
pub trait CredentialAuthority: Send + Sync {
    fn has_selected_key(&self) -> Result<bool>;
    /// Opens the selection flow and returns once the user is done with it.
    fn open_select_key(&self) -> Result<()>;
}

/// Authority backed by an [`ApiKeySlot`] and a picker callback that returns
/// the key the user chose, if any.
pub struct KeySlotAuthority {
    slot: ApiKeySlot,
    picker: Box<dyn Fn() -> Result<Option<String>> + Send + Sync>,
}

impl KeySlotAuthority {
    pub fn new(
        slot: ApiKeySlot,
        picker: impl Fn() -> Result<Option<String>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            slot,
            picker: Box::new(picker),
        }
    }
}

impl CredentialAuthority for KeySlotAuthority {
    fn has_selected_key(&self) -> Result<bool> {
        Ok(self.slot.is_set())
    }

    fn open_select_key(&self) -> Result<()> {
        if let Some(key) = (self.picker)()? {
            self.slot.set(key);
        }
        Ok(())
    }
}

/// Tracks whether image generation may proceed.
///
/// The state is read from the authority once at construction and afterwards
/// only flips to `true`, after an acquisition completes. Without an authority
/// the gate stays closed and acquisition is a no-op.
pub struct CredentialGate {
    authority: Option<Arc<dyn CredentialAuthority>>,
    has_credential: AtomicBool,
}

impl CredentialGate {
    pub fn new(authority: Option<Arc<dyn CredentialAuthority>>) -> Self {
        let initial = match authority.as_ref() {
            Some(authority) => authority.has_selected_key().unwrap_or_else(|err| {
                tracing::warn!(error = %err, "credential check failed; gate starts closed");
                false
            }),
            None => false,
        };
        Self {
            authority,
            has_credential: AtomicBool::new(initial),
        }
    }

    pub fn has_credential(&self) -> bool {
        self.has_credential.load(Ordering::SeqCst)
    }

    pub fn is_available(&self) -> bool {
        self.authority.is_some()
    }

    pub fn request_credential(&self) -> bool {
        let Some(authority) = self.authority.as_ref() else {
            return self.has_credential();
        };
        match authority.open_select_key() {
            Ok(()) => {
                self.has_credential.store(true, Ordering::SeqCst);
                true
            }
            Err(err) => {
                tracing::warn!(error = %err, "credential selection failed");
                self.has_credential()
            }
        }
    }
}

impl fmt::Debug for CredentialGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialGate")
            .field("available", &self.is_available())
            .field("has_credential", &self.has_credential())
            .finish()
    }
}

fn first_non_empty_env(keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        env::var(key)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}
