//! Text cleanup applied to every recognized segment before matching.

/// Letters Tesseract commonly returns in place of digits on the Mira display.
const CONFUSIONS: &[(char, char)] = &[
    ('A', '4'),
    ('B', '8'),
    ('D', '0'),
    ('I', '1'),
    ('T', '7'),
    // Dotless i shows up for the thin separator line next to values
    ('\u{0131}', ' '),
];

/// Replaces commonly misread characters according to [`CONFUSIONS`].
pub fn correct_confusions(text: &str) -> String {
    text.chars()
        .map(|c| {
            CONFUSIONS
                .iter()
                .find(|(from, _)| *from == c)
                .map_or(c, |(_, to)| *to)
        })
        .collect()
}

/// Trims a segment and applies the OCR corrections.
///
/// A zero-watts reading is frequently recognized as `0WW`; both that and any
/// case variant of `0W` become the canonical `0W`.
pub fn clean_segment(text: &str, corrections: bool) -> String {
    let mut cleaned = text.trim().to_string();

    if corrections {
        cleaned = correct_confusions(&cleaned).trim().to_string();
    }

    if cleaned.eq_ignore_ascii_case("0ww") || cleaned.eq_ignore_ascii_case("0w") {
        cleaned = "0W".to_string();
    }

    cleaned
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correct_confusions() {
        assert_eq!(correct_confusions("1A5°C"), "145°C");
        assert_eq!(correct_confusions("B,D kWh"), "8,0 kWh");
        assert_eq!(correct_confusions("IT"), "17");
        assert_eq!(correct_confusions("12\u{0131}W"), "12 W");
    }

    #[test]
    fn test_clean_segment_trims() {
        assert_eq!(clean_segment("  21,3°C \n", true), "21,3°C");
        assert_eq!(clean_segment("\u{0131}21,3°C", true), "21,3°C");
    }

    #[test]
    fn test_clean_segment_zero_watts() {
        assert_eq!(clean_segment("0WW", true), "0W");
        assert_eq!(clean_segment("0ww", true), "0W");
        assert_eq!(clean_segment(" 0w ", false), "0W");
        assert_eq!(clean_segment("10W", true), "10W");
    }

    #[test]
    fn test_clean_segment_without_corrections() {
        assert_eq!(clean_segment("Automatik", false), "Automatik");
        assert_eq!(clean_segment("Automatik", true), "4utomatik");
    }
}
