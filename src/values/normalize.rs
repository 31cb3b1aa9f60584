//! Numeric normalization and the heuristics compensating for lost decimal
//! points.

use tracing::warn;

use super::locale::NumericLocale;
use super::matcher::Reading;

/// Per-region options influencing normalization.
#[derive(Clone, Copy, Debug, Default)]
pub struct NormalizeOptions {
    /// Decimal point as the remote UI draws it
    pub decimal_point: Option<char>,
    /// Upper bound of plausible values
    pub max_value: Option<f64>,
    /// Decimal places the UI always shows
    pub mandatory_decimal_places: Option<u32>,
}

/// Converts a reading into a number in the base unit.
///
/// Never fails: an unparseable number becomes `0.0` and is logged.
pub fn normalize(reading: &Reading, locale: &NumericLocale, options: &NormalizeOptions) -> f64 {
    let localized = localize_decimal_point(&reading.number, locale, options.decimal_point);

    let mut value = match locale.parse(&localized) {
        Some(v) => v,
        None => {
            warn!(
                "Could not parse number '{}' ({}), using 0.0",
                reading.number,
                reading.unit.canonical()
            );
            0.0
        }
    };
    value *= reading.unit.scale();

    if let Some(max) = options.max_value {
        value = correct_magnitude(value, max);
    }

    if let Some(places) = options.mandatory_decimal_places {
        if !has_decimal_separator(&reading.number, locale, options.decimal_point) {
            value = restore_decimal_places(value, places);
        }
    }

    value
}

/// Rewrites the UI decimal point to the locale's one and drops grouping.
///
/// The replacement happens first so that an override equal to the locale's
/// thousands separator is still read as a decimal point.
pub fn localize_decimal_point(text: &str, locale: &NumericLocale, ui_point: Option<char>) -> String {
    let replaced: String = match ui_point {
        Some(point) => text
            .chars()
            .map(|c| if c == point { locale.decimal_point() } else { c })
            .collect(),
        None => text.to_string(),
    };

    match locale.thousands_separator() {
        Some(sep) => replaced.chars().filter(|c| *c != sep).collect(),
        None => replaced,
    }
}

/// Divides by 10 until the value no longer exceeds `max`.
///
/// `max` must be positive; configuration validation ensures that.
pub fn correct_magnitude(mut value: f64, max: f64) -> f64 {
    while value > max {
        value /= 10.0;
    }
    value
}

/// Shifts the decimal point left by `places`.
pub fn restore_decimal_places(value: f64, places: u32) -> f64 {
    value / 10f64.powi(places as i32)
}

fn has_decimal_separator(text: &str, locale: &NumericLocale, ui_point: Option<char>) -> bool {
    text.contains(locale.decimal_point()) || ui_point.is_some_and(|p| text.contains(p))
}

/// Renders a number the way the dataset stores it: `21.3`, `0.0`, `1500.0`.
pub fn format_number(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e16 {
        format!("{:.1}", value)
    } else {
        format!("{}", value)
    }
}
