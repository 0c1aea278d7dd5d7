//! Event Delivery
//!
//! Change notifications flow out of the engine through standard mpsc
//! channels. Observers either subscribe to the full [`Event`] stream or
//! watch a single variable by name. Senders whose receiver has been
//! dropped are pruned on the next emit.

use std::collections::HashMap;
use std::sync::mpsc::{channel, Receiver, Sender};

use crate::codec::Value;
use crate::protocol::ConfigId;
use crate::store::ConfigEntry;

/// Engine state change
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Event {
    /// Gateway search finished. `found` is false when the search or the
    /// connection failed.
    Found {
        found: bool,
        ip: String,
        port: u16,
        version: String,
    },
    /// Gateway is connected and identified
    Available,
    /// Connection lost or closed
    Unavailable,
    /// Response to a free-form command
    Response { raw: String, parsed: Value },
    /// Full configuration snapshot after an item changed
    Config(HashMap<String, ConfigEntry>),
    /// A decoded variable changed
    Variable { name: String, value: Value },
    /// A single gateway setting changed
    Setting { id: ConfigId, value: String },
}

/// Fan-out of engine events to subscribers and per-variable watchers
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Vec<Sender<Event>>,
    watches: HashMap<String, Vec<Sender<Value>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive every engine event
    pub fn subscribe(&mut self) -> Receiver<Event> {
        let (tx, rx) = channel();
        self.subscribers.push(tx);
        rx
    }

    /// Receive updates for one variable
    pub fn watch(&mut self, name: &str) -> Receiver<Value> {
        let (tx, rx) = channel();
        self.watches.entry(name.to_string()).or_default().push(tx);
        rx
    }

    /// Drop all watchers of a variable
    pub fn unwatch(&mut self, name: &str) {
        self.watches.remove(name);
    }

    pub fn emit(&mut self, event: Event) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Emit a variable change on the event stream and to its watchers
    pub fn emit_variable(&mut self, name: &str, value: &Value) {
        self.emit(Event::Variable {
            name: name.to_string(),
            value: value.clone(),
        });
        if let Some(watchers) = self.watches.get_mut(name) {
            watchers.retain(|tx| tx.send(value.clone()).is_ok());
            if watchers.is_empty() {
                self.watches.remove(name);
            }
        }
    }
}
