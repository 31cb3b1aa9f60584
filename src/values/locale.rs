//! Numeric conventions of a locale.
//!
//! Resolved once per run from a locale tag and passed to every numeric
//! normalization. Nothing in here touches the process locale.

/// Decimal point and thousands separator of a locale.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NumericLocale {
    decimal_point: char,
    thousands_separator: Option<char>,
}

/// Languages writing `1.234,5`.
const COMMA_DECIMAL_DOT_GROUPING: &[&str] = &[
    "de", "nl", "es", "it", "da", "pt", "tr", "id", "el", "ro", "hr", "sl", "sr", "is", "vi",
];

/// Languages writing `1 234,5`.
const COMMA_DECIMAL_SPACE_GROUPING: &[&str] = &[
    "fr", "sv", "fi", "nb", "nn", "no", "pl", "cs", "sk", "ru", "uk", "hu", "bg", "lt", "lv",
    "et",
];

/// Languages writing `1,234.5`.
const DOT_DECIMAL_COMMA_GROUPING: &[&str] = &[
    "en", "ja", "zh", "ko", "he", "th", "ga", "mt", "ms", "hi",
];

impl NumericLocale {
    pub fn new(decimal_point: char, thousands_separator: Option<char>) -> Self {
        Self {
            decimal_point,
            thousands_separator,
        }
    }

    /// The POSIX "C" locale: `.` as decimal point, no grouping.
    pub fn c() -> Self {
        Self::new('.', None)
    }

    /// Resolves a locale tag such as `de_DE.UTF-8`, `en_US` or `C`.
    ///
    /// Returns `None` for languages without a known convention.
    pub fn from_tag(tag: &str) -> Option<Self> {
        // Drop codeset and modifier: "de_DE.UTF-8@euro" -> "de_DE"
        let name = tag
            .split(['.', '@'])
            .next()
            .unwrap_or_default()
            .trim();

        if name.eq_ignore_ascii_case("c") || name.eq_ignore_ascii_case("posix") {
            return Some(Self::c());
        }

        let mut parts = name.split(['_', '-']);
        let language = parts.next().unwrap_or_default().to_ascii_lowercase();
        let territory = parts.next().unwrap_or_default().to_ascii_uppercase();

        // Swiss and Liechtenstein German/Italian group with an apostrophe
        if matches!(language.as_str(), "de" | "it") && matches!(territory.as_str(), "CH" | "LI") {
            return Some(Self::new('.', Some('\'')));
        }

        let language = language.as_str();
        if COMMA_DECIMAL_DOT_GROUPING.contains(&language) {
            Some(Self::new(',', Some('.')))
        } else if COMMA_DECIMAL_SPACE_GROUPING.contains(&language) {
            Some(Self::new(',', Some(' ')))
        } else if DOT_DECIMAL_COMMA_GROUPING.contains(&language) {
            Some(Self::new('.', Some(',')))
        } else {
            None
        }
    }

    pub fn decimal_point(&self) -> char {
        self.decimal_point
    }

    pub fn thousands_separator(&self) -> Option<char> {
        self.thousands_separator
    }

    /// Parses a number written in this locale's convention.
    ///
    /// Grouping characters are removed and the decimal point is mapped to `.`.
    pub fn parse(&self, text: &str) -> Option<f64> {
        let canonical: String = text
            .trim()
            .chars()
            .filter(|c| Some(*c) != self.thousands_separator)
            .map(|c| if c == self.decimal_point { '.' } else { c })
            .collect();

        canonical.parse::<f64>().ok().filter(|v| v.is_finite())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_tag_german() {
        let locale = NumericLocale::from_tag("de_DE.UTF-8").unwrap();
        assert_eq!(locale.decimal_point(), ',');
        assert_eq!(locale.thousands_separator(), Some('.'));
    }

    #[test]
    fn test_from_tag_variants() {
        assert_eq!(NumericLocale::from_tag("C"), Some(NumericLocale::c()));
        assert_eq!(NumericLocale::from_tag("POSIX"), Some(NumericLocale::c()));
        assert_eq!(
            NumericLocale::from_tag("en_US.UTF-8"),
            Some(NumericLocale::new('.', Some(',')))
        );
        assert_eq!(
            NumericLocale::from_tag("de-AT"),
            Some(NumericLocale::new(',', Some('.')))
        );
        assert_eq!(
            NumericLocale::from_tag("de_CH.UTF-8"),
            Some(NumericLocale::new('.', Some('\'')))
        );
        assert_eq!(
            NumericLocale::from_tag("fr_FR@euro"),
            Some(NumericLocale::new(',', Some(' ')))
        );
        assert_eq!(NumericLocale::from_tag("xx_YY"), None);
        assert_eq!(NumericLocale::from_tag(""), None);
    }

    #[test]
    fn test_parse_with_grouping() {
        let de = NumericLocale::from_tag("de_DE").unwrap();
        assert_eq!(de.parse("1.234,5"), Some(1234.5));
        assert_eq!(de.parse("21,3"), Some(21.3));
        assert_eq!(de.parse("-5"), Some(-5.0));

        let en = NumericLocale::from_tag("en_US").unwrap();
        assert_eq!(en.parse("1,234.5"), Some(1234.5));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let de = NumericLocale::from_tag("de_DE").unwrap();
        assert_eq!(de.parse(""), None);
        assert_eq!(de.parse("1,2,3"), None);
        assert_eq!(de.parse("abc"), None);
        assert_eq!(de.parse("inf"), None);
    }
}
