use std::fmt;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use sha2::{Digest, Sha256};

/// Displayable reference to a generated image. Cloning shares the payload.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageRef {
    bytes: Arc<[u8]>,
    mime_type: String,
    digest: String,
}

impl ImageRef {
    pub fn new(bytes: Vec<u8>, mime_type: Option<&str>) -> Self {
        let mime_type = mime_type
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or("image/png")
            .to_ascii_lowercase();
        let digest = hex::encode(Sha256::digest(&bytes));
        Self {
            bytes: bytes.into(),
            mime_type,
            digest,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// Hex SHA-256 of the payload.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, BASE64.encode(&self.bytes))
    }

    pub fn extension(&self) -> &'static str {
        match self.mime_type.as_str() {
            "image/jpeg" | "image/jpg" => "jpg",
            "image/webp" => "webp",
            _ => "png",
        }
    }
}

impl fmt::Debug for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageRef")
            .field("mime_type", &self.mime_type)
            .field("len", &self.bytes.len())
            .field("digest", &&self.digest[..12.min(self.digest.len())])
            .finish()
    }
}
