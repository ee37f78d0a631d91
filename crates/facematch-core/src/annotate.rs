//! Drawing recognition results onto an RGB copy of the input.

use crate::types::RecognitionResult;
use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use std::path::Path;
use thiserror::Error;

const MATCH_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const REJECT_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const LABEL_SCALE: f32 = 18.0;
const BOX_THICKNESS: u32 = 2;

#[derive(Error, Debug)]
pub enum FontError {
    #[error("font read failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid font file: {0}")]
    Invalid(String),
}

/// Draws a box per recognized face, green when matched and red otherwise.
///
/// With a font loaded, each box also gets a `"{name} ({confidence}%)"` label.
#[derive(Clone, Default)]
pub struct Annotator {
    font: Option<FontArc>,
}

impl Annotator {
    /// Boxes only.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_font(font: FontArc) -> Self {
        Self { font: Some(font) }
    }

    /// Load a TrueType/OpenType font for label text.
    pub fn load_font(path: &Path) -> Result<Self, FontError> {
        let bytes = std::fs::read(path)?;
        let font = FontArc::try_from_vec(bytes)
            .map_err(|e| FontError::Invalid(format!("{}: {e}", path.display())))?;
        tracing::info!(path = %path.display(), "label font loaded");
        Ok(Self::with_font(font))
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    pub fn draw(&self, canvas: &mut RgbImage, results: &[RecognitionResult]) {
        for result in results {
            let region = result.region.clamped(canvas.width(), canvas.height());
            if region.area() == 0 {
                continue;
            }
            let color = if result.matched { MATCH_COLOR } else { REJECT_COLOR };

            for inset in 0..BOX_THICKNESS {
                if region.width <= 2 * inset || region.height <= 2 * inset {
                    break;
                }
                let rect = Rect::at((region.x + inset) as i32, (region.y + inset) as i32)
                    .of_size(region.width - 2 * inset, region.height - 2 * inset);
                draw_hollow_rect_mut(canvas, rect, color);
            }

            if let Some(font) = &self.font {
                let label = format!("{} ({}%)", result.predicted_name, result.confidence_percent);
                let scale = PxScale::from(LABEL_SCALE);
                let (_, text_h) = text_size(scale, font, &label);
                let y = region.y as i32 - text_h as i32 - 4;
                draw_text_mut(canvas, color, region.x as i32, y.max(0), scale, font, &label);
            }
        }
    }
}
