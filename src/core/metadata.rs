use crate::core::detector::is_tall_aspect;
use crate::core::lens::aperture_label;
use chrono::{DateTime, Utc};
use exif::{Exif, In, Reader, Tag, Value};
use image::{ImageFormat, ImageReader};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;
use thiserror::Error;

/// Focal length assumed when the file does not record one.
pub const DEFAULT_FOCAL_LENGTH_MM: f64 = 24.0;
/// Model label used when the file does not record one.
pub const UNKNOWN_MODEL: &str = "Unknown";

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("EXIF parsing error: {0}")]
    Parse(#[from] exif::Error),

    #[error("Date parsing error: {message}")]
    DateParse { message: String },
}

/// Normalized capture details for one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureMetadata {
    pub make: String,
    /// Marketing model name after device-map normalization.
    pub model: String,
    pub focal_length_mm: f64,
    pub aperture: String,
    pub iso: u32,
    pub shutter_seconds: f64,
    pub captured_at: DateTime<Utc>,
    /// Precomputed native footer flag, when the provider could tell.
    pub has_native_footer: Option<bool>,
}

impl Default for CaptureMetadata {
    fn default() -> Self {
        Self {
            make: String::new(),
            model: UNKNOWN_MODEL.to_string(),
            focal_length_mm: DEFAULT_FOCAL_LENGTH_MM,
            aperture: aperture_label(None),
            iso: 0,
            shutter_seconds: 0.0,
            captured_at: DateTime::<Utc>::UNIX_EPOCH,
            has_native_footer: Some(false),
        }
    }
}

/// Turns raw image bytes into normalized capture metadata.
///
/// Implementations never fail: anything unreadable comes back as
/// [`CaptureMetadata::default`].
pub trait MetadataProvider: Send + Sync {
    fn extract(&self, bytes: &[u8], format_hint: Option<&str>) -> CaptureMetadata;

    fn extract_path(&self, path: &Path) -> CaptureMetadata {
        match std::fs::read(path) {
            Ok(bytes) => {
                let hint = path.extension().and_then(|ext| ext.to_str());
                self.extract(&bytes, hint)
            }
            Err(e) => {
                log::warn!("Failed to read {}: {}", path.display(), e);
                CaptureMetadata::default()
            }
        }
    }
}

/// EXIF-backed metadata provider.
#[derive(Debug, Clone, Default)]
pub struct ExifMetadataProvider {
    device_models: HashMap<String, String>,
}

impl ExifMetadataProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map raw EXIF model strings to display names, e.g. `SM-S918B` to
    /// `Galaxy S23 Ultra`.
    pub fn with_device_models(mut self, device_models: HashMap<String, String>) -> Self {
        self.device_models = device_models;
        self
    }

    pub fn normalize_model(&self, raw_model: Option<&str>) -> String {
        let trimmed = raw_model.map(str::trim).unwrap_or_default();
        if trimmed.is_empty() {
            return UNKNOWN_MODEL.to_string();
        }
        self.device_models
            .get(trimmed)
            .cloned()
            .unwrap_or_else(|| trimmed.to_string())
    }

    fn read_exif(&self, bytes: &[u8]) -> Result<Exif, MetadataError> {
        let mut cursor = Cursor::new(bytes);
        Ok(Reader::new().read_from_container(&mut cursor)?)
    }

    fn apply_exif(&self, exif: &Exif, meta: &mut CaptureMetadata) {
        if let Some(make) = string_field(exif, Tag::Make) {
            meta.make = make.trim().to_string();
        }
        meta.model = self.normalize_model(string_field(exif, Tag::Model).as_deref());

        if let Some(focal) = rational_field(exif, Tag::FocalLength).filter(|f| *f > 0.0) {
            meta.focal_length_mm = focal;
        }

        if let Some(f_number) = rational_field(exif, Tag::FNumber) {
            meta.aperture = aperture_label(Some(f_number));
        }

        if let Some(iso) = uint_field(exif, Tag::PhotographicSensitivity)
            .or_else(|| uint_field(exif, Tag::ISOSpeed))
        {
            meta.iso = iso;
        }

        if let Some(exposure) = rational_field(exif, Tag::ExposureTime) {
            meta.shutter_seconds = exposure;
        }

        let taken = string_field(exif, Tag::DateTimeOriginal)
            .or_else(|| string_field(exif, Tag::DateTime));
        if let Some(taken) = taken {
            match parse_exif_datetime(&taken) {
                Ok(dt) => meta.captured_at = dt,
                Err(e) => log::warn!("{}", e),
            }
        }
    }
}

impl MetadataProvider for ExifMetadataProvider {
    fn extract(&self, bytes: &[u8], format_hint: Option<&str>) -> CaptureMetadata {
        let mut meta = CaptureMetadata::default();

        match self.read_exif(bytes) {
            Ok(exif) => self.apply_exif(&exif, &mut meta),
            Err(e) => log::debug!("No usable EXIF data: {}", e),
        }

        if let Some((width, height)) = image_dimensions(bytes, format_hint) {
            meta.has_native_footer = Some(is_tall_aspect(width, height));
        }

        meta
    }
}

fn image_dimensions(bytes: &[u8], format_hint: Option<&str>) -> Option<(u32, u32)> {
    let mut reader = ImageReader::new(Cursor::new(bytes));
    match format_hint.and_then(ImageFormat::from_extension) {
        Some(format) => reader.set_format(format),
        None => reader = reader.with_guessed_format().ok()?,
    }
    reader.into_dimensions().ok()
}

fn string_field(exif: &Exif, tag: Tag) -> Option<String> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    match &field.value {
        Value::Ascii(values) => values.first().map(|raw| {
            String::from_utf8_lossy(raw)
                .trim_end_matches('\0')
                .to_string()
        }),
        Value::Undefined(data, _) => Some(
            String::from_utf8_lossy(data)
                .trim_end_matches('\0')
                .to_string(),
        ),
        _ => None,
    }
}

fn uint_field(exif: &Exif, tag: Tag) -> Option<u32> {
    exif.get_field(tag, In::PRIMARY)?.value.get_uint(0)
}

fn rational_field(exif: &Exif, tag: Tag) -> Option<f64> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    match &field.value {
        Value::Rational(values) => values
            .first()
            .filter(|r| r.denom != 0)
            .map(|r| r.num as f64 / r.denom as f64),
        Value::SRational(values) => values
            .first()
            .filter(|r| r.denom != 0)
            .map(|r| r.num as f64 / r.denom as f64),
        _ => field.value.get_uint(0).map(f64::from),
    }
}

/// Parse an EXIF `YYYY:MM:DD HH:MM:SS` timestamp as UTC.
pub fn parse_exif_datetime(datetime_str: &str) -> Result<DateTime<Utc>, MetadataError> {
    let trimmed = datetime_str.trim();
    chrono::NaiveDateTime::parse_from_str(trimmed, "%Y:%m:%d %H:%M:%S")
        .or_else(|_| chrono::NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S"))
        .map(|dt| dt.and_utc())
        .map_err(|e| MetadataError::DateParse {
            message: format!("'{}': {}", datetime_str, e),
        })
}
