//! Collected values of one run and their delivery.
//!
//! A dataset is published as a flat JSON object of strings, in collection
//! order.

use anyhow::{Context, Result, bail};
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::values::{ExtractedValue, Value};

/// Insertion-ordered mapping from key to value.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Dataset {
    entries: Vec<ExtractedValue>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a value; a key can only be inserted once.
    pub fn insert(&mut self, value: ExtractedValue) -> Result<()> {
        if self.get(&value.key).is_some() {
            bail!(
                "Key '{}' from region '{}' is already in the dataset",
                value.key,
                value.region
            );
        }
        self.entries.push(value);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|e| e.key == key)
            .map(|e| &e.value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns `(key, value string)` pairs in insertion order.
    pub fn to_flat(&self) -> Vec<(&str, String)> {
        self.entries
            .iter()
            .map(|e| (e.key.as_str(), e.value.to_string()))
            .collect()
    }
}

impl Serialize for Dataset {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for entry in &self.entries {
            map.serialize_entry(&entry.key, &entry.value.to_string())?;
        }
        map.end()
    }
}

/// Delivers a finished dataset.
pub trait Publisher {
    fn publish(&mut self, dataset: &Dataset) -> Result<()>;
}

/// Where the JSON publisher writes to.
#[derive(Clone, Debug, PartialEq)]
pub enum JsonTarget {
    Stdout,
    File(PathBuf),
}

/// Publishes the dataset as one pretty-printed JSON object.
pub struct JsonPublisher {
    target: JsonTarget,
}

impl JsonPublisher {
    pub fn new(target: JsonTarget) -> Self {
        Self { target }
    }

    /// Writes to `path` if given, stdout otherwise.
    pub fn from_output(path: Option<&Path>) -> Self {
        match path {
            Some(path) => Self::new(JsonTarget::File(path.to_path_buf())),
            None => Self::new(JsonTarget::Stdout),
        }
    }
}

impl Publisher for JsonPublisher {
    fn publish(&mut self, dataset: &Dataset) -> Result<()> {
        match &self.target {
            JsonTarget::Stdout => {
                let stdout = io::stdout();
                let mut out = stdout.lock();
                write_json(&mut out, dataset)?;
            }
            JsonTarget::File(path) => {
                let file = File::create(path)
                    .with_context(|| format!("Failed to create {}", path.display()))?;
                let mut out = BufWriter::new(file);
                write_json(&mut out, dataset)?;
                out.flush()?;
                info!("Dataset written to {}", path.display());
            }
        }
        Ok(())
    }
}

fn write_json<W: Write>(out: &mut W, dataset: &Dataset) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, dataset).context("Failed to serialize dataset")?;
    writeln!(out)?;
    Ok(())
}
