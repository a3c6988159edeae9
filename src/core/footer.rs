// Synthesized caption footer: model name on the left, a faint divider, lens
// and exposure details on the right.

use crate::core::geometry::Rect;
use crate::core::glyphs::{draw_text, text_height, text_width, GLYPH_HEIGHT};
use crate::core::lens::{iso_label, lens_label, shutter_label};
use crate::core::metadata::{CaptureMetadata, UNKNOWN_MODEL};
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect as PixelRect;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Horizontal padding as a share of the footer width.
pub const PAD_RATIO: f32 = 0.03;
/// Divider position as a share of the footer width.
pub const DIVIDER_POSITION: f32 = 0.55;
/// Divider opacity over the footer background.
pub const DIVIDER_OPACITY: f32 = 0.3;
/// Model text height as a share of the footer height, capped at
/// [`MAX_TEXT_HEIGHT`].
pub const TEXT_HEIGHT_RATIO: f32 = 0.4;
pub const MAX_TEXT_HEIGHT: f32 = 32.0;
/// Detail lines are drawn slightly smaller than the model name.
pub const DETAIL_TEXT_SCALE: f32 = 0.9;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FooterBackground {
    White,
    #[default]
    Black,
}

impl FooterBackground {
    pub fn background(self) -> Rgb<u8> {
        match self {
            FooterBackground::White => Rgb([255, 255, 255]),
            FooterBackground::Black => Rgb([0, 0, 0]),
        }
    }

    pub fn foreground(self) -> Rgb<u8> {
        match self {
            FooterBackground::White => Rgb([0, 0, 0]),
            FooterBackground::Black => Rgb([255, 255, 255]),
        }
    }

    pub fn divider(self) -> Rgb<u8> {
        blend(self.background(), self.foreground(), DIVIDER_OPACITY)
    }
}

impl fmt::Display for FooterBackground {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FooterBackground::White => write!(f, "white"),
            FooterBackground::Black => write!(f, "black"),
        }
    }
}

impl FromStr for FooterBackground {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "white" => Ok(FooterBackground::White),
            "black" => Ok(FooterBackground::Black),
            other => Err(format!("unknown footer background '{other}' (white, black)")),
        }
    }
}

/// The three caption strings of a footer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FooterText {
    pub model: String,
    pub lens_line: String,
    pub exposure_line: String,
}

impl FooterText {
    pub fn from_metadata(meta: &CaptureMetadata) -> Self {
        let model = match meta.model.trim() {
            "" => UNKNOWN_MODEL.to_string(),
            m => m.to_string(),
        };
        Self {
            model,
            lens_line: format!("{} · {}", lens_label(meta.focal_length_mm), meta.aperture),
            exposure_line: format!(
                "{}  {}",
                shutter_label(meta.shutter_seconds),
                iso_label(meta.iso)
            ),
        }
    }
}

/// Draw a footer band filling `area` of the canvas.
pub fn draw_footer_band(
    canvas: &mut RgbImage,
    area: Rect,
    text: &FooterText,
    background: FooterBackground,
) {
    if area.is_empty() {
        return;
    }

    let foreground = background.foreground();
    draw_filled_rect_mut(canvas, to_pixel_rect(area), background.background());

    let width = area.width as f32;
    let height = area.height as f32;
    let pad = (width * PAD_RATIO).round() as i32;
    let text_px = (height * TEXT_HEIGHT_RATIO).min(MAX_TEXT_HEIGHT);
    let model_scale = scale_for(text_px);
    let detail_scale = scale_for(text_px * DETAIL_TEXT_SCALE);

    let divider_x = area.x as i32 + (width * DIVIDER_POSITION).round() as i32;

    // Left: model name, vertically centered and kept clear of the divider.
    let model_room = (divider_x - area.x as i32 - 2 * pad).max(0) as u32;
    let (model, model_scale) = fit_text(&text.model, model_room, model_scale);
    draw_text(
        canvas,
        area.x as i32 + pad,
        centered_y(area, 0.5, model_scale),
        &model,
        model_scale,
        foreground,
    );

    let divider_top = area.y as i32 + (height * 0.15).round() as i32;
    let divider_len = ((height * 0.7).round() as u32).max(1);
    draw_filled_rect_mut(
        canvas,
        PixelRect::at(divider_x, divider_top).of_size(1, divider_len),
        background.divider(),
    );

    // Right: lens and aperture, then shutter and ISO.
    let right_x = divider_x + pad;
    let detail_room = (area.right() as i32 - right_x - pad).max(0) as u32;
    let (lens_line, lens_scale) = fit_text(&text.lens_line, detail_room, detail_scale);
    draw_text(
        canvas,
        right_x,
        centered_y(area, 0.35, lens_scale),
        &lens_line,
        lens_scale,
        foreground,
    );
    let (exposure_line, exposure_scale) = fit_text(&text.exposure_line, detail_room, detail_scale);
    draw_text(
        canvas,
        right_x,
        centered_y(area, 0.65, exposure_scale),
        &exposure_line,
        exposure_scale,
        foreground,
    );
}

fn scale_for(text_px: f32) -> u32 {
    ((text_px / GLYPH_HEIGHT as f32).round() as u32).max(1)
}

fn centered_y(area: Rect, position: f32, scale: u32) -> i32 {
    let center = area.y as f32 + area.height as f32 * position;
    (center - text_height(scale) as f32 / 2.0).round() as i32
}

/// Shrink the scale, then truncate, until `text` fits in `room` pixels.
fn fit_text(text: &str, room: u32, scale: u32) -> (String, u32) {
    let mut scale = scale.max(1);
    while scale > 1 && text_width(text, scale) > room {
        scale -= 1;
    }

    let mut fitted: String = text.to_string();
    while !fitted.is_empty() && text_width(&fitted, scale) > room {
        fitted.pop();
    }
    (fitted, scale)
}

fn blend(base: Rgb<u8>, over: Rgb<u8>, alpha: f32) -> Rgb<u8> {
    let mix = |b: u8, o: u8| (b as f32 * (1.0 - alpha) + o as f32 * alpha).round() as u8;
    Rgb([
        mix(base.0[0], over.0[0]),
        mix(base.0[1], over.0[1]),
        mix(base.0[2], over.0[2]),
    ])
}

pub(crate) fn to_pixel_rect(rect: Rect) -> PixelRect {
    PixelRect::at(rect.x as i32, rect.y as i32).of_size(rect.width.max(1), rect.height.max(1))
}
