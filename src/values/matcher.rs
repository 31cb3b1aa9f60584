//! Measurement classification.
//!
//! Each matcher recognizes one kind of quantity in a cleaned segment. The
//! matchers are tried in a fixed priority order and the first hit wins.

use anyhow::Result;
use regex::Regex;

/// Canonical measurement units.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Unit {
    Celsius,
    KilowattHour,
    MegawattHour,
    Watt,
    Kilowatt,
}

impl Unit {
    /// Maps any case variant of a recognized unit token to its unit.
    pub fn from_token(token: &str) -> Option<Unit> {
        match token.to_lowercase().as_str() {
            "°c" => Some(Unit::Celsius),
            "kwh" => Some(Unit::KilowattHour),
            "mwh" => Some(Unit::MegawattHour),
            "w" => Some(Unit::Watt),
            // "kKW" is a frequent misread of "kW"
            "kw" | "kkw" => Some(Unit::Kilowatt),
            _ => None,
        }
    }

    /// Returns the canonical spelling.
    pub fn canonical(&self) -> &'static str {
        match self {
            Unit::Celsius => "°C",
            Unit::KilowattHour => "kWh",
            Unit::MegawattHour => "MWh",
            Unit::Watt => "W",
            Unit::Kilowatt => "kW",
        }
    }

    /// The unit values are reported in after scaling.
    pub fn base(&self) -> Unit {
        match self {
            Unit::MegawattHour => Unit::KilowattHour,
            Unit::Kilowatt => Unit::Watt,
            other => *other,
        }
    }

    /// Factor bringing the value to the base unit (kWh, W, °C).
    pub fn scale(&self) -> f64 {
        match self {
            Unit::MegawattHour | Unit::Kilowatt => 1000.0,
            Unit::Celsius | Unit::KilowattHour | Unit::Watt => 1.0,
        }
    }
}

/// A measurement found in a segment: the number as written and its unit.
#[derive(Clone, Debug, PartialEq)]
pub struct Reading {
    pub number: String,
    pub unit: Unit,
}

/// Common interface of all classifiers.
pub trait Matcher: Send + Sync {
    /// Name used in log output.
    fn name(&self) -> &'static str;

    /// Returns the reading if the segment contains this kind of quantity.
    fn try_match(&self, text: &str) -> Option<Reading>;
}

/// Matcher driven by a regex with a number group and a unit group.
struct PatternMatcher {
    name: &'static str,
    regex: Regex,
}

impl PatternMatcher {
    fn new(name: &'static str, pattern: &str) -> Result<Self> {
        Ok(Self {
            name,
            regex: Regex::new(pattern)?,
        })
    }
}

impl Matcher for PatternMatcher {
    fn name(&self) -> &'static str {
        self.name
    }

    fn try_match(&self, text: &str) -> Option<Reading> {
        let captures = self.regex.captures(text)?;
        let number = captures.get(1)?.as_str().to_string();
        let unit = Unit::from_token(captures.get(2)?.as_str())?;
        Some(Reading { number, unit })
    }
}

/// Temperatures: up to two digits, optional decimal separator and digit,
/// optional minus. A match never starts inside a longer number.
const TEMPERATURE_PATTERN: &str = r"(?:^|[^\d.,])(-?\d{1,2}[.,]?\d?)\s*(°C)";

/// Energies in kWh or MWh, any case.
const ENERGY_PATTERN: &str = r"(\d+[.,]?\d*)\s*((?i:kwh|mwh))";

/// Powers in W or kW, any case.
const POWER_PATTERN: &str = r"(\d+[.,]?\d*)\s*((?i:kk?w|w))";

/// Builds the matchers in priority order: temperature, energy, power.
pub fn default_matchers() -> Result<Vec<Box<dyn Matcher>>> {
    Ok(vec![
        Box::new(PatternMatcher::new("temperature", TEMPERATURE_PATTERN)?),
        Box::new(PatternMatcher::new("energy", ENERGY_PATTERN)?),
        Box::new(PatternMatcher::new("power", POWER_PATTERN)?),
    ])
}

/// Returns the first reading any matcher finds, with the matcher's name.
pub fn classify<'m>(matchers: &'m [Box<dyn Matcher>], text: &str) -> Option<(&'m str, Reading)> {
    matchers
        .iter()
        .find_map(|m| m.try_match(text).map(|reading| (m.name(), reading)))
}
