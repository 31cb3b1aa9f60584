//! Turns the raw OCR text of a region into typed key/value pairs.
//!
//! The steps always run in the same order: gating, splitting on brackets,
//! cleanup, classification, unit canonicalization, numeric normalization and
//! the two decimal-point heuristics.

pub mod cleanup;
pub mod locale;
pub mod matcher;
pub mod normalize;

pub use locale::NumericLocale;

use anyhow::Result;
use std::fmt;
use tracing::debug;

use crate::automation::config::RegionDefinition;
use cleanup::clean_segment;
use matcher::{Matcher, classify, default_matchers};
use normalize::{NormalizeOptions, format_number, normalize};

/// A dataset value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Text(String),
    Number(f64),
}

impl Value {
    /// The empty value stored for unreadable or gated-out keys.
    pub fn empty() -> Self {
        Value::Text(String::new())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(text) => write!(f, "{}", text),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
        }
    }
}

/// A value together with the region that produced it.
#[derive(Clone, Debug, PartialEq)]
pub struct ExtractedValue {
    pub key: String,
    pub value: Value,
    /// Key of the region the value was read from
    pub region: String,
}

impl ExtractedValue {
    fn new(key: &str, value: Value, region: &RegionDefinition) -> Self {
        Self {
            key: key.to_string(),
            value,
            region: region.key.clone(),
        }
    }
}

/// Parses region texts with a fixed set of matchers.
pub struct ValueParser {
    matchers: Vec<Box<dyn Matcher>>,
}

impl ValueParser {
    pub fn new() -> Result<Self> {
        Ok(Self {
            matchers: default_matchers()?,
        })
    }

    /// Parses the recognized text of one region.
    ///
    /// Returns the values in key order: primary key first, then the secondary
    /// keys that had a bracketed segment.
    pub fn parse(
        &self,
        raw_text: &str,
        region: &RegionDefinition,
        locale: &NumericLocale,
    ) -> Vec<ExtractedValue> {
        if let Some(missing) = region
            .mandatory_text
            .iter()
            .find(|t| !raw_text.contains(t.as_str()))
        {
            debug!(
                "Region {}: mandatory text '{}' not found in '{}'",
                region.key, missing, raw_text
            );
            return region
                .output_keys()
                .map(|key| ExtractedValue::new(key, Value::empty(), region))
                .collect();
        }

        let segments: Vec<&str> = raw_text.split('(').collect();
        if segments.len() > 1 {
            debug!("Region {}: split into {:?}", region.key, segments);
        }

        segments
            .iter()
            .enumerate()
            .zip(region.output_keys())
            .map(|((index, segment), key)| {
                // Secondary values carry the closing bracket
                let segment = if index > 0 {
                    segment.trim().trim_end_matches(')')
                } else {
                    segment
                };
                let value = self.parse_segment(segment, key, region, locale);
                debug!("Region {}: {} = '{}'", region.key, key, value);
                ExtractedValue::new(key, value, region)
            })
            .collect()
    }

    fn parse_segment(
        &self,
        segment: &str,
        key: &str,
        region: &RegionDefinition,
        locale: &NumericLocale,
    ) -> Value {
        let cleaned = clean_segment(segment, region.ocr_corrections);

        match classify(&self.matchers, &cleaned) {
            Some((kind, reading)) => {
                debug!(
                    "Region {}: '{}' classified as {} ({}{})",
                    region.key,
                    cleaned,
                    kind,
                    reading.number,
                    reading.unit.canonical()
                );
                let options = NormalizeOptions {
                    decimal_point: region.decimal_point,
                    max_value: region.max_value,
                    mandatory_decimal_places: region.mandatory_decimal_places,
                };
                Value::Number(normalize(&reading, locale, &options))
            }
            None if region.unit_hint(key).is_some() => {
                debug!(
                    "Region {}: '{}' does not look like a {} value",
                    region.key,
                    cleaned,
                    region.unit_hint(key).unwrap_or_default()
                );
                Value::empty()
            }
            None => Value::Text(cleaned),
        }
    }
}
