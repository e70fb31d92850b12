use std::io::Cursor;

use anyhow::{Context, Result};
use image::{ImageFormat, Rgb, RgbImage};
use sha2::{Digest, Sha256};

use super::{GenerationRequest, GenerationResponse, ImageGenerator, InlineImage, ResponsePart};

const FALLBACK_DIMS: (u32, u32) = (1024, 768);

/// Offline stand-in: answers every request with a flat image the size of the
/// first input image, colored from a hash of the prompt text.
pub struct DryrunGenerator;

impl ImageGenerator for DryrunGenerator {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse> {
        let (width, height) = request
            .images()
            .next()
            .and_then(|path| image::image_dimensions(path).ok())
            .unwrap_or(FALLBACK_DIMS);
        let (r, g, b) = color_from_prompt(&request.prompt_text());
        let image = RgbImage::from_pixel(width.max(1), height.max(1), Rgb([r, g, b]));
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .context("dryrun image encode failed")?;

        Ok(GenerationResponse {
            parts: vec![ResponsePart {
                text: None,
                inline_image: Some(InlineImage {
                    bytes,
                    mime_type: Some("image/png".to_string()),
                }),
            }],
        })
    }
}

fn color_from_prompt(prompt: &str) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}
