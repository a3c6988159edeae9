//! Native caption band detection.
//!
//! Some cameras burn a solid strip of capture details into the bottom of the
//! frame. The compositor needs to know whether such a band exists and how
//! tall it is so it can crop it out before drawing its own footer.
//!
//! Both scans work on a downsampled copy of the bottom of the image capped at
//! [`SAMPLE_MAX_WIDTH`] x [`SAMPLE_MAX_HEIGHT`], so cost does not grow with
//! source resolution.

use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, RgbImage};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Share of the image height inspected by the presence check.
pub const PRESENCE_BAND_RATIO: f32 = 0.15;
/// Maximum share of the image height a native band may occupy.
pub const MEASURE_BAND_RATIO: f32 = 0.20;
/// Sampling canvas width cap.
pub const SAMPLE_MAX_WIDTH: u32 = 400;
/// Sampling canvas height cap.
pub const SAMPLE_MAX_HEIGHT: u32 = 120;
/// A pixel is pure white when every channel is above this value.
pub const PURE_WHITE_MIN: u8 = 250;
/// A pixel is pure black when every channel is below this value.
pub const PURE_BLACK_MAX: u8 = 10;
/// Rows with at least this share of pure white or pure black pixels are solid.
pub const SOLID_ROW_SHARE: f32 = 0.9;
/// Per-channel row mean above which a row counts as part of a white band.
/// Lower than [`PURE_WHITE_MIN`] to tolerate JPEG noise.
pub const BAND_ROW_MEAN_MIN: f32 = 230.0;
/// Height/width ratio above which the aspect heuristic reports a band.
pub const TALL_ASPECT_RATIO: f64 = 1.45;

/// Strategy for the yes/no native footer question.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PresenceCheck {
    /// Row classification over the bottom band of pixels.
    #[default]
    Pixel,
    /// `height / width > 1.45`. Cheap, but flags every tall photo.
    AspectRatio,
}

impl PresenceCheck {
    pub fn detect(self, image: &DynamicImage) -> bool {
        match self {
            PresenceCheck::Pixel => detect_native_footer(image),
            PresenceCheck::AspectRatio => {
                let (width, height) = image.dimensions();
                is_tall_aspect(width, height)
            }
        }
    }
}

impl fmt::Display for PresenceCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PresenceCheck::Pixel => write!(f, "pixel"),
            PresenceCheck::AspectRatio => write!(f, "aspect-ratio"),
        }
    }
}

impl FromStr for PresenceCheck {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pixel" => Ok(PresenceCheck::Pixel),
            "aspect-ratio" | "aspect" => Ok(PresenceCheck::AspectRatio),
            other => Err(format!("unknown presence check '{other}' (pixel, aspect-ratio)")),
        }
    }
}

/// Aspect-ratio heuristic for a native footer.
pub fn is_tall_aspect(width: u32, height: u32) -> bool {
    if width == 0 {
        return false;
    }
    height as f64 / width as f64 > TALL_ASPECT_RATIO
}

/// Whether the image carries a near-solid white or black band at the bottom.
///
/// A missing or zero-area image reports `false`.
pub fn detect_native_footer(image: &DynamicImage) -> bool {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return false;
    }

    let band_height = band_rows(height, PRESENCE_BAND_RATIO);
    let sample = sample_bottom(image, band_height);
    let needed = (sample.width() as f32 * SOLID_ROW_SHARE).ceil() as usize;

    sample.rows().any(|row| {
        let solid = row
            .filter(|pixel| {
                pixel.0.iter().all(|&c| c > PURE_WHITE_MIN)
                    || pixel.0.iter().all(|&c| c < PURE_BLACK_MAX)
            })
            .count();
        solid >= needed
    })
}

/// Height in source pixels of a white band touching the bottom edge.
///
/// Walks sampled rows upward from the bottom and stops at the first row whose
/// channel means are not all above [`BAND_ROW_MEAN_MIN`], or after
/// [`MEASURE_BAND_RATIO`] of the image height. Returns 0 when there is no
/// band or the image is empty. Bands that do not touch the bottom edge, or
/// that are broken by a logo, are not measured.
pub fn measure_native_footer_height(image: &DynamicImage) -> u32 {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return 0;
    }

    let region_height = band_rows(height, MEASURE_BAND_RATIO);
    let sample = sample_bottom(image, region_height);

    let light_rows = (0..sample.height())
        .rev()
        .take_while(|&y| is_light_row(&sample, y))
        .count() as u32;

    if light_rows == 0 {
        return 0;
    }

    let scaled = light_rows as f64 * region_height as f64 / sample.height() as f64;
    (scaled.round() as u32).min(region_height)
}

fn band_rows(height: u32, ratio: f32) -> u32 {
    ((height as f32 * ratio).round() as u32).clamp(1, height)
}

/// Downsample the bottom `rows` rows of the image onto the capped sampling
/// canvas. Regions already within the caps are copied as-is.
fn sample_bottom(image: &DynamicImage, rows: u32) -> RgbImage {
    let (width, height) = image.dimensions();
    let band = image.crop_imm(0, height - rows, width, rows).to_rgb8();

    let sample_width = width.min(SAMPLE_MAX_WIDTH);
    let sample_height = rows.min(SAMPLE_MAX_HEIGHT);
    if (sample_width, sample_height) == band.dimensions() {
        band
    } else {
        imageops::resize(&band, sample_width, sample_height, FilterType::Triangle)
    }
}

fn is_light_row(sample: &RgbImage, y: u32) -> bool {
    let width = sample.width();
    if width == 0 {
        return false;
    }

    let mut sums = [0u64; 3];
    for x in 0..width {
        let pixel = sample.get_pixel(x, y);
        for (sum, &channel) in sums.iter_mut().zip(pixel.0.iter()) {
            *sum += channel as u64;
        }
    }

    sums
        .iter()
        .all(|&sum| sum as f32 / width as f32 > BAND_ROW_MEAN_MIN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn with_bottom_band(width: u32, height: u32, band: u32, color: Rgb<u8>) -> DynamicImage {
        let img = ImageBuffer::from_fn(width, height, |x, y| {
            if y >= height - band {
                color
            } else {
                let v = ((x * 7 + y * 3) % 160) as u8 + 40;
                Rgb([v, v / 2, 255 - v])
            }
        });
        DynamicImage::ImageRgb8(img)
    }

    fn noise(width: u32, height: u32, seed: u64) -> DynamicImage {
        let mut rng = StdRng::seed_from_u64(seed);
        let img = ImageBuffer::from_fn(width, height, |_, _| {
            Rgb([rng.random::<u8>(), rng.random::<u8>(), rng.random::<u8>()])
        });
        DynamicImage::ImageRgb8(img)
    }

    #[test]
    fn test_noise_has_no_footer() {
        let img = noise(640, 480, 42);
        assert_eq!(measure_native_footer_height(&img), 0);
        assert!(!detect_native_footer(&img));
    }

    #[test]
    fn test_measure_exact_white_band() {
        // Region is 100 rows by 400 columns, so nothing is resampled.
        let img = with_bottom_band(400, 500, 50, Rgb([255, 255, 255]));
        assert_eq!(measure_native_footer_height(&img), 50);
        assert!(detect_native_footer(&img));
    }

    #[test]
    fn test_measure_downsampled_white_band() {
        let img = with_bottom_band(2000, 1500, 150, Rgb([255, 255, 255]));
        let measured = measure_native_footer_height(&img) as i64;
        assert!((measured - 150).abs() <= 10, "measured {measured}");
    }

    #[test]
    fn test_measure_tolerates_off_white() {
        let img = with_bottom_band(400, 500, 40, Rgb([241, 238, 236]));
        assert_eq!(measure_native_footer_height(&img), 40);
        // Not pure enough for the presence check.
        assert!(!detect_native_footer(&img));
    }

    #[test]
    fn test_measure_caps_at_twenty_percent() {
        let img = with_bottom_band(400, 500, 300, Rgb([255, 255, 255]));
        assert_eq!(measure_native_footer_height(&img), 100);
    }

    #[test]
    fn test_band_must_touch_bottom_edge() {
        let img = ImageBuffer::from_fn(400, 500, |_, y| {
            if (420..460).contains(&y) {
                Rgb([255u8, 255, 255])
            } else {
                Rgb([90u8, 90, 90])
            }
        });
        assert_eq!(measure_native_footer_height(&DynamicImage::ImageRgb8(img)), 0);
    }

    #[test]
    fn test_black_band_is_present_but_not_measured() {
        let img = with_bottom_band(400, 500, 30, Rgb([0, 0, 0]));
        assert!(detect_native_footer(&img));
        assert_eq!(measure_native_footer_height(&img), 0);
    }

    #[test]
    fn test_mixed_white_and_black_row_is_present() {
        // Dark logo block on a white caption band.
        let img = ImageBuffer::from_fn(400, 500, |x, y| {
            if y < 460 {
                Rgb([120, 90, 60])
            } else if x < 240 {
                Rgb([255, 255, 255])
            } else {
                Rgb([0, 0, 0])
            }
        });
        assert!(detect_native_footer(&DynamicImage::ImageRgb8(img)));
    }

    #[test]
    fn test_empty_image() {
        let img = DynamicImage::new_rgb8(0, 0);
        assert!(!detect_native_footer(&img));
        assert_eq!(measure_native_footer_height(&img), 0);
    }

    #[test]
    fn test_aspect_ratio_heuristic() {
        assert!(is_tall_aspect(1000, 1500));
        assert!(!is_tall_aspect(1000, 1450));
        assert!(!is_tall_aspect(0, 1500));

        let tall = DynamicImage::new_rgb8(100, 150);
        assert!(PresenceCheck::AspectRatio.detect(&tall));
        assert!(!PresenceCheck::Pixel.detect(&noise(100, 150, 7)));
    }

    #[test]
    fn test_presence_check_parsing() {
        assert_eq!("pixel".parse::<PresenceCheck>(), Ok(PresenceCheck::Pixel));
        assert_eq!(
            "aspect-ratio".parse::<PresenceCheck>(),
            Ok(PresenceCheck::AspectRatio)
        );
        assert!("histogram".parse::<PresenceCheck>().is_err());
    }
}
