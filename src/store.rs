//! Value Stores
//!
//! In-memory stores for the two kinds of state the engine tracks: decoded
//! OpenTherm variables (typed [`Value`]s keyed by name) and gateway
//! configuration items (string values with display text and provenance).
//! Both suppress writes that do not change anything so observers only see
//! real transitions.

use std::collections::HashMap;

use crate::codec::Value;
use crate::protocol::ConfigId;

/// One gateway configuration item as reported by the device
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConfigEntry {
    pub id: ConfigId,
    pub label: String,
    /// Raw value as accepted by the write command
    pub value: String,
    /// Human-readable rendering of the value
    pub text_value: String,
    /// Whether the item has a write command
    pub modifiable: bool,
    /// Where the value came from, a read-back response or an unsolicited
    /// update line
    pub source: String,
}

/// Store of decoded OpenTherm variables
#[derive(Debug, Default)]
pub struct VariableStore {
    values: HashMap<String, Value>,
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value, returning true if it changed. Unchanged values are
    /// suppressed unless `forced`.
    pub fn set(&mut self, name: &str, value: Value, forced: bool) -> bool {
        if !forced {
            if let Some(current) = self.values.get(name) {
                if *current == value {
                    return false;
                }
            }
        }
        self.values.insert(name.to_string(), value);
        true
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.values.clone()
    }
}

/// Store of gateway configuration items, keyed by variable name (with slot
/// suffix for multi-slot items)
#[derive(Debug, Default)]
pub struct ConfigStore {
    entries: HashMap<String, ConfigEntry>,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update an entry, returning true if the stored value
    /// changed
    pub fn set(&mut self, name: &str, entry: ConfigEntry) -> bool {
        if let Some(current) = self.entries.get(name) {
            if current.value == entry.value {
                return false;
            }
        }
        self.entries.insert(name.to_string(), entry);
        true
    }

    pub fn get(&self, name: &str) -> Option<&ConfigEntry> {
        self.entries.get(name)
    }

    pub fn snapshot(&self) -> HashMap<String, ConfigEntry> {
        self.entries.clone()
    }
}
