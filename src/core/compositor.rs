use crate::core::detector::{measure_native_footer_height, PresenceCheck};
use crate::core::footer::{draw_footer_band, to_pixel_rect, FooterBackground, FooterText};
use crate::core::geometry::{
    cover_crop, footer_height, ComparisonLayout, Rect, Side, CANVAS_HEIGHT, CANVAS_WIDTH,
};
use crate::core::metadata::CaptureMetadata;
use chrono::{DateTime, Local, TimeZone};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, ImageReader, Rgb, RgbImage};
use imageproc::drawing::draw_filled_rect_mut;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Fill for a slot whose source could not be decoded.
pub const PLACEHOLDER_COLOR: Rgb<u8> = Rgb([0x33, 0x33, 0x33]);
pub const GUTTER_COLOR: Rgb<u8> = Rgb([0x17, 0x17, 0x17]);
pub const DEFAULT_JPEG_QUALITY: u8 = 95;

#[derive(Debug, Error)]
pub enum CompositeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Invalid path: {path}")]
    InvalidPath { path: String },
}

/// What to do with a caption band the camera already burned into the frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NativeFooterPolicy {
    /// Measure the band, crop it away and draw our own footer.
    #[default]
    Crop,
    /// Leave the source untouched and draw our own footer.
    Keep,
    /// When a band is present, show the source over the whole slot and skip
    /// our footer.
    PreferNative,
}

impl fmt::Display for NativeFooterPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativeFooterPolicy::Crop => write!(f, "crop"),
            NativeFooterPolicy::Keep => write!(f, "keep"),
            NativeFooterPolicy::PreferNative => write!(f, "prefer-native"),
        }
    }
}

impl FromStr for NativeFooterPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "crop" => Ok(NativeFooterPolicy::Crop),
            "keep" => Ok(NativeFooterPolicy::Keep),
            "prefer-native" | "native" => Ok(NativeFooterPolicy::PreferNative),
            other => Err(format!(
                "unknown native footer policy '{other}' (crop, keep, prefer-native)"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompositeOptions {
    pub footer_background: FooterBackground,
    pub native_footer: NativeFooterPolicy,
    pub presence_check: PresenceCheck,
}

/// Where a slot's pixels come from.
#[derive(Debug, Clone)]
pub enum ImageSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

impl ImageSource {
    pub fn decode(&self) -> Result<DynamicImage, CompositeError> {
        match self {
            ImageSource::Path(path) => {
                if !path.exists() {
                    return Err(CompositeError::InvalidPath {
                        path: path.to_string_lossy().to_string(),
                    });
                }
                Ok(ImageReader::open(path)?.with_guessed_format()?.decode()?)
            }
            ImageSource::Bytes(bytes) => Ok(image::load_from_memory(bytes)?),
        }
    }
}

/// One side of the comparison.
#[derive(Debug, Clone, Copy)]
pub struct SlotImage<'a> {
    pub source: &'a ImageSource,
    pub metadata: &'a CaptureMetadata,
}

impl<'a> SlotImage<'a> {
    pub fn new(source: &'a ImageSource, metadata: &'a CaptureMetadata) -> Self {
        Self { source, metadata }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotOutcome {
    Rendered {
        /// Source rows removed as a native caption band.
        native_footer_px: u32,
        synthesized_footer: bool,
    },
    Placeholder {
        message: String,
    },
}

impl SlotOutcome {
    pub fn is_placeholder(&self) -> bool {
        matches!(self, SlotOutcome::Placeholder { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderReport {
    pub left: SlotOutcome,
    pub right: SlotOutcome,
}

/// The fixed 3840x2160 destination surface.
///
/// Rendering takes `&mut self`, so a canvas can only ever have one render in
/// flight. Every render repaints the whole surface.
pub struct CompositeCanvas {
    image: RgbImage,
    layout: ComparisonLayout,
}

impl Default for CompositeCanvas {
    fn default() -> Self {
        Self::new()
    }
}

impl CompositeCanvas {
    pub fn new() -> Self {
        Self {
            image: RgbImage::new(CANVAS_WIDTH, CANVAS_HEIGHT),
            layout: ComparisonLayout::standard(),
        }
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }

    pub fn render(
        &mut self,
        left: SlotImage<'_>,
        right: SlotImage<'_>,
        options: &CompositeOptions,
    ) -> RenderReport {
        let (left_decoded, right_decoded) =
            rayon::join(|| left.source.decode(), || right.source.decode());

        draw_filled_rect_mut(
            &mut self.image,
            to_pixel_rect(Rect::new(0, 0, CANVAS_WIDTH, CANVAS_HEIGHT)),
            Rgb([0, 0, 0]),
        );
        draw_filled_rect_mut(&mut self.image, to_pixel_rect(self.layout.gutter), GUTTER_COLOR);

        let left_outcome = self.draw_slot(Side::Left, left_decoded, left.metadata, options);
        let right_outcome = self.draw_slot(Side::Right, right_decoded, right.metadata, options);

        RenderReport {
            left: left_outcome,
            right: right_outcome,
        }
    }

    fn draw_slot(
        &mut self,
        side: Side,
        decoded: Result<DynamicImage, CompositeError>,
        metadata: &CaptureMetadata,
        options: &CompositeOptions,
    ) -> SlotOutcome {
        let slot = self.layout.slot(side);

        let source = match decoded {
            Ok(source) if source.width() > 0 && source.height() > 0 => source,
            Ok(_) => return self.placeholder(slot, side, "image has no pixels".to_string()),
            Err(e) => return self.placeholder(slot, side, e.to_string()),
        };

        let (native_footer_px, synthesize) = match options.native_footer {
            NativeFooterPolicy::Crop => (measure_native_footer_height(&source), true),
            NativeFooterPolicy::Keep => (0, true),
            NativeFooterPolicy::PreferNative => {
                (0, !options.presence_check.detect(&source))
            }
        };

        let (content, footer) = if synthesize {
            slot.split_bottom(footer_height(slot.height))
        } else {
            slot.split_bottom(0)
        };

        // Never crop the whole frame away.
        let usable_height = if native_footer_px < source.height() {
            source.height() - native_footer_px
        } else {
            source.height()
        };
        if native_footer_px > 0 {
            log::debug!("{:?} slot: cropping {} px native footer", side, native_footer_px);
        }

        if !content.is_empty() {
            let crop = cover_crop(source.width(), usable_height, content.width, content.height);
            let region = source
                .crop_imm(crop.x, crop.y, crop.width, crop.height)
                .to_rgb8();
            let fitted = imageops::resize(
                &region,
                content.width,
                content.height,
                FilterType::Lanczos3,
            );
            imageops::replace(&mut self.image, &fitted, content.x as i64, content.y as i64);
        }

        if synthesize {
            draw_footer_band(
                &mut self.image,
                footer,
                &FooterText::from_metadata(metadata),
                options.footer_background,
            );
        }

        SlotOutcome::Rendered {
            native_footer_px: source.height() - usable_height,
            synthesized_footer: synthesize,
        }
    }

    fn placeholder(&mut self, slot: Rect, side: Side, message: String) -> SlotOutcome {
        log::warn!("{:?} slot could not be decoded: {}", side, message);
        draw_filled_rect_mut(&mut self.image, to_pixel_rect(slot), PLACEHOLDER_COLOR);
        SlotOutcome::Placeholder { message }
    }

    /// Write the canvas as a JPEG into `output_dir`, named after both models.
    pub fn export(
        &self,
        output_dir: &Path,
        left_model: &str,
        right_model: &str,
        quality: u8,
    ) -> Result<PathBuf, CompositeError> {
        fs::create_dir_all(output_dir)?;
        let path = output_dir.join(export_file_name(left_model, right_model, &Local::now()));
        save_jpeg(&self.image, &path, quality)?;
        log::info!("Exported comparison to {}", path.display());
        Ok(path)
    }
}

/// Render a comparison into a fresh canvas.
pub fn composite(
    left: SlotImage<'_>,
    right: SlotImage<'_>,
    options: &CompositeOptions,
) -> (CompositeCanvas, RenderReport) {
    let mut canvas = CompositeCanvas::new();
    let report = canvas.render(left, right, options);
    (canvas, report)
}

/// `<left>_vs_<right>_<YYYYmmdd-HHMMSS>.jpg`
pub fn export_file_name<Tz: TimeZone>(
    left_model: &str,
    right_model: &str,
    at: &DateTime<Tz>,
) -> String
where
    Tz::Offset: fmt::Display,
{
    format!(
        "{}_vs_{}_{}.jpg",
        slugify(left_model),
        slugify(right_model),
        at.format("%Y%m%d-%H%M%S")
    )
}

/// Lowercase, with runs of anything non-alphanumeric collapsed to `-`.
pub fn slugify(label: &str) -> String {
    let mut slug = String::with_capacity(label.len());
    for ch in label.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    if slug.is_empty() {
        "unknown".to_string()
    } else {
        slug
    }
}

pub fn save_jpeg(image: &RgbImage, path: &Path, quality: u8) -> Result<(), CompositeError> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    let encoder = JpegEncoder::new_with_quality(&mut writer, quality.clamp(1, 100));
    image.write_with_encoder(encoder)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::geometry::SLOT_WIDTH;
    use chrono::Utc;
    use image::{ImageBuffer, ImageFormat};
    use std::io::Cursor;
    use tempfile::TempDir;

    fn png_bytes(img: &RgbImage) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    fn solid(width: u32, height: u32, color: Rgb<u8>) -> ImageSource {
        ImageSource::Bytes(png_bytes(&ImageBuffer::from_pixel(width, height, color)))
    }

    /// Red frame with a white band along the bottom.
    fn banded(width: u32, height: u32, band: u32) -> ImageSource {
        let img = ImageBuffer::from_fn(width, height, |_, y| {
            if y >= height - band {
                Rgb([255u8, 255, 255])
            } else {
                Rgb([220u8, 20, 20])
            }
        });
        ImageSource::Bytes(png_bytes(&img))
    }

    fn meta(model: &str) -> CaptureMetadata {
        CaptureMetadata {
            model: model.to_string(),
            ..CaptureMetadata::default()
        }
    }

    #[test]
    fn test_composite_yields_fixed_canvas() {
        let left = solid(120, 90, Rgb([10, 120, 200]));
        let right = solid(640, 480, Rgb([200, 120, 10]));
        let (left_meta, right_meta) = (meta("Pixel 8"), meta("iPhone 15"));

        let (canvas, report) = composite(
            SlotImage::new(&left, &left_meta),
            SlotImage::new(&right, &right_meta),
            &CompositeOptions::default(),
        );

        assert_eq!(canvas.image().dimensions(), (3840, 2160));
        assert!(!report.left.is_placeholder());
        assert!(!report.right.is_placeholder());

        // Content, gutter and footer background.
        assert_eq!(canvas.image().get_pixel(900, 900).0, [10, 120, 200]);
        assert_eq!(canvas.image().get_pixel(1920, 900).0, GUTTER_COLOR.0);
        assert_eq!(canvas.image().get_pixel(1925 + 900, 900).0, [200, 120, 10]);
        assert_eq!(canvas.image().get_pixel(5, 2150).0, [0, 0, 0]);
    }

    #[test]
    fn test_failed_slot_becomes_placeholder() {
        let broken = ImageSource::Bytes(b"not an image".to_vec());
        let right = solid(400, 300, Rgb([30, 200, 30]));
        let (left_meta, right_meta) = (meta("A"), meta("B"));
        let options = CompositeOptions {
            footer_background: FooterBackground::White,
            ..CompositeOptions::default()
        };

        let (canvas, report) = composite(
            SlotImage::new(&broken, &left_meta),
            SlotImage::new(&right, &right_meta),
            &options,
        );

        assert_eq!(canvas.image().dimensions(), (3840, 2160));
        assert!(report.left.is_placeholder());
        assert!(!report.right.is_placeholder());

        // Whole left slot is gray, footer area included.
        assert_eq!(canvas.image().get_pixel(100, 100).0, PLACEHOLDER_COLOR.0);
        assert_eq!(canvas.image().get_pixel(SLOT_WIDTH - 1, 2159).0, PLACEHOLDER_COLOR.0);
        // Right slot renders normally with a white footer.
        assert_eq!(canvas.image().get_pixel(1925 + 900, 900).0, [30, 200, 30]);
        assert_eq!(canvas.image().get_pixel(1925 + 5, 2150).0, [255, 255, 255]);
    }

    #[test]
    fn test_missing_path_becomes_placeholder() {
        let missing = ImageSource::Path(PathBuf::from("/non/existent/left.jpg"));
        let right = solid(64, 64, Rgb([1, 2, 3]));
        let m = meta("X");

        let (_, report) = composite(
            SlotImage::new(&missing, &m),
            SlotImage::new(&right, &m),
            &CompositeOptions::default(),
        );
        match report.left {
            SlotOutcome::Placeholder { message } => assert!(message.contains("left.jpg")),
            other => panic!("expected placeholder, got {other:?}"),
        }
    }

    #[test]
    fn test_crop_policy_removes_native_band() {
        let source = banded(1000, 500, 50);
        let m = meta("Camera");

        let mut canvas = CompositeCanvas::new();
        let report = canvas.render(
            SlotImage::new(&source, &m),
            SlotImage::new(&source, &m),
            &CompositeOptions::default(),
        );
        assert_eq!(
            report.left,
            SlotOutcome::Rendered {
                native_footer_px: 50,
                synthesized_footer: true
            }
        );
        // Last content row comes from the red area.
        let bottom = canvas.image().get_pixel(900, 1900).0;
        assert!(bottom[0] > 200 && bottom[1] < 60, "got {bottom:?}");

        let report = canvas.render(
            SlotImage::new(&source, &m),
            SlotImage::new(&source, &m),
            &CompositeOptions {
                native_footer: NativeFooterPolicy::Keep,
                ..CompositeOptions::default()
            },
        );
        assert_eq!(
            report.left,
            SlotOutcome::Rendered {
                native_footer_px: 0,
                synthesized_footer: true
            }
        );
        // The band is now part of the content.
        let bottom = canvas.image().get_pixel(900, 1900).0;
        assert!(bottom[1] > 200, "got {bottom:?}");
    }

    #[test]
    fn test_prefer_native_skips_synthesized_footer() {
        let source = banded(1000, 500, 50);
        let plain = solid(1000, 500, Rgb([40, 40, 160]));
        let m = CaptureMetadata {
            has_native_footer: None,
            ..meta("Camera")
        };
        let options = CompositeOptions {
            native_footer: NativeFooterPolicy::PreferNative,
            ..CompositeOptions::default()
        };

        let (canvas, report) = composite(
            SlotImage::new(&source, &m),
            SlotImage::new(&plain, &m),
            &options,
        );
        assert_eq!(
            report.left,
            SlotOutcome::Rendered {
                native_footer_px: 0,
                synthesized_footer: false
            }
        );
        assert_eq!(
            report.right,
            SlotOutcome::Rendered {
                native_footer_px: 0,
                synthesized_footer: true
            }
        );
        // Left fills the slot down to the last row.
        let bottom = canvas.image().get_pixel(900, 2159).0;
        assert!(bottom[1] > 200, "got {bottom:?}");
    }

    #[test]
    fn test_export_writes_jpeg() {
        let temp_dir = TempDir::new().unwrap();
        let out = temp_dir.path().join("exports");
        let left = solid(80, 60, Rgb([90, 90, 90]));
        let m = meta("Galaxy S23 Ultra");

        let (canvas, _) = composite(
            SlotImage::new(&left, &m),
            SlotImage::new(&left, &m),
            &CompositeOptions::default(),
        );
        let path = canvas
            .export(&out, "Galaxy S23 Ultra", "iPhone 15 Pro", DEFAULT_JPEG_QUALITY)
            .unwrap();

        assert!(path.exists());
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("galaxy-s23-ultra_vs_iphone-15-pro_"));
        assert!(name.ends_with(".jpg"));

        let reloaded = image::open(&path).unwrap();
        assert_eq!(reloaded.dimensions(), (3840, 2160));
    }

    #[test]
    fn test_export_file_name() {
        let at = Utc.with_ymd_and_hms(2024, 5, 18, 9, 41, 7).unwrap();
        assert_eq!(
            export_file_name("Pixel 8 Pro", "iPhone 15", &at),
            "pixel-8-pro_vs_iphone-15_20240518-094107.jpg"
        );
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("  Galaxy S23 Ultra! "), "galaxy-s23-ultra");
        assert_eq!(slugify("——"), "unknown");
        assert_eq!(slugify(""), "unknown");
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!("crop".parse::<NativeFooterPolicy>(), Ok(NativeFooterPolicy::Crop));
        assert_eq!(
            "prefer-native".parse::<NativeFooterPolicy>(),
            Ok(NativeFooterPolicy::PreferNative)
        );
        assert!("hide".parse::<NativeFooterPolicy>().is_err());
    }
}
