//! User-defined variables
//!
//! Loaded once at session start from a plain text file, one `name value` pair
//! per line. Values use the same hex/decimal grammar as command arguments.

use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

use super::resolver::parse_number;
use crate::error::{DebugError, Result};
use crate::transport::Word;

/// Owned name to word mapping, read-only once the session starts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariableMap {
    entries: BTreeMap<String, Word>,
}

impl VariableMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read and parse a variables file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DebugError::InvalidConfig(format!(
                "Failed to read variables file {}: {}",
                path.display(),
                e
            ))
        })?;
        let vars = Self::parse(&content)?;
        info!("Loaded {} variables from {}", vars.len(), path.display());
        Ok(vars)
    }

    /// Parse `name value` lines. Blank lines and `#` comments are skipped.
    pub fn parse(content: &str) -> Result<Self> {
        let mut entries = BTreeMap::new();

        for (number, raw) in content.lines().enumerate() {
            let line = raw.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }

            let mut fields = line.split_whitespace();
            let (Some(name), Some(value), None) = (fields.next(), fields.next(), fields.next()) else {
                return Err(DebugError::InvalidConfig(format!(
                    "Variables line {}: expected '<name> <value>', got '{}'",
                    number + 1,
                    line
                )));
            };
            let value = parse_number(value).ok_or_else(|| {
                DebugError::InvalidConfig(format!(
                    "Variables line {}: invalid value '{}' for '{}'",
                    number + 1,
                    value,
                    name
                ))
            })?;

            debug!("Variable {} = 0x{:08X}", name, value);
            entries.insert(name.to_string(), value);
        }

        Ok(Self { entries })
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Word) {
        self.entries.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<Word> {
        self.entries.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Variables in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, Word)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), *value))
    }
}

impl<S: Into<String>> FromIterator<(S, Word)> for VariableMap {
    fn from_iter<I: IntoIterator<Item = (S, Word)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|(name, value)| (name.into(), value)).collect(),
        }
    }
}
