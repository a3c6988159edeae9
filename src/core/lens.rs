// Caption labels derived from capture metadata.

/// Placeholder shown when a value is unknown.
pub const UNKNOWN_VALUE: &str = "—";

/// Zoom keyword for a focal length in millimeters.
///
/// Each band includes its lower bound: `<18` UW, `18..35` 1X, `35..85` 3X,
/// `>=85` 5X.
pub fn zoom_label(focal_length_mm: f64) -> &'static str {
    if focal_length_mm < 18.0 {
        "UW"
    } else if focal_length_mm < 35.0 {
        "1X"
    } else if focal_length_mm < 85.0 {
        "3X"
    } else if focal_length_mm >= 85.0 {
        "5X"
    } else {
        // NaN
        "1X"
    }
}

/// Lens label as shown in the footer, e.g. `24mm (1X)`.
pub fn lens_label(focal_length_mm: f64) -> String {
    format!(
        "{}mm ({})",
        focal_length_mm.round() as i64,
        zoom_label(focal_length_mm)
    )
}

/// Shutter speed as shown in the footer.
///
/// Under one second renders as `1/Ns`; one second or longer renders the
/// seconds literally, e.g. `2s` or `1.5s`. Unknown (zero) renders as `—`.
pub fn shutter_label(seconds: f64) -> String {
    if seconds.is_nan() || seconds <= 0.0 {
        return UNKNOWN_VALUE.to_string();
    }
    if seconds < 1.0 {
        format!("1/{}s", (1.0 / seconds).round() as u64)
    } else {
        format!("{}s", trim_decimal(seconds))
    }
}

/// ISO as shown in the footer, e.g. `ISO 100`.
pub fn iso_label(iso: u32) -> String {
    if iso == 0 {
        format!("ISO {UNKNOWN_VALUE}")
    } else {
        format!("ISO {iso}")
    }
}

/// Aperture label from an f-number, e.g. `f/1.8` or `f/2`.
pub fn aperture_label(f_number: Option<f64>) -> String {
    match f_number {
        Some(n) if n > 0.0 => format!("f/{}", trim_decimal((n * 10.0).round() / 10.0)),
        _ => format!("f/{UNKNOWN_VALUE}"),
    }
}

fn trim_decimal(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        let text = format!("{value:.2}");
        text.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}
