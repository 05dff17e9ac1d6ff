use std::io::Cursor;

use anyhow::{Context, Result};
use image::{ImageFormat, Rgb, RgbImage};
use serde_json::json;
use sha2::{Digest, Sha256};

use super::{ImagePayload, ImageProvider, ImageRequest, TextProvider, TextRequest};

const DRYRUN_EDGE: u32 = 64;

/// Offline provider: deterministic replies and solid-colour images derived
/// from the prompt. Used by `--dryrun` and by tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryrunProvider;

impl TextProvider for DryrunProvider {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn complete(&self, request: &TextRequest) -> Result<String> {
        let prompt = request.prompt.trim();
        if request.response_schema.is_some() {
            let reply = json!({
                "dishType": "Menu dégustation du moment",
                "flavorProfile": "Iodé, beurré, une pointe d'agrume",
                "reasoning": format!("Suggestion hors-ligne pour : {}", short_echo(prompt)),
            });
            return Ok(reply.to_string());
        }
        Ok(format!(
            "[dryrun:{}] Avec plaisir. Vous m'interrogez sur « {} ».",
            request.model,
            short_echo(prompt)
        ))
    }
}

impl ImageProvider for DryrunProvider {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn generate(&self, request: &ImageRequest) -> Result<Option<ImagePayload>> {
        let (width, height) = dims_for_ratio(&request.aspect_ratio);
        let (r, g, b) = color_from_prompt(&request.prompt);
        let image = RgbImage::from_pixel(width, height, Rgb([r, g, b]));
        let mut cursor = Cursor::new(Vec::new());
        image
            .write_to(&mut cursor, ImageFormat::Png)
            .context("dryrun PNG encode failed")?;
        Ok(Some(ImagePayload {
            bytes: cursor.into_inner(),
            mime_type: Some("image/png".to_string()),
        }))
    }
}

fn short_echo(prompt: &str) -> String {
    let mut echoed: String = prompt.chars().take(60).collect();
    if prompt.chars().count() > 60 {
        echoed.push('…');
    }
    echoed
}

fn dims_for_ratio(aspect_ratio: &str) -> (u32, u32) {
    let Some((left, right)) = aspect_ratio.trim().split_once(':') else {
        return (DRYRUN_EDGE, DRYRUN_EDGE);
    };
    match (left.trim().parse::<u32>(), right.trim().parse::<u32>()) {
        (Ok(w), Ok(h)) if w > 0 && h > 0 => {
            if w >= h {
                (DRYRUN_EDGE, (DRYRUN_EDGE * h / w).max(1))
            } else {
                ((DRYRUN_EDGE * w / h).max(1), DRYRUN_EDGE)
            }
        }
        _ => (DRYRUN_EDGE, DRYRUN_EDGE),
    }
}

fn color_from_prompt(prompt: &str) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}
