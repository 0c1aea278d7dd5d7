//! OpenTherm and Gateway Protocol Tables
//!
//! Static knowledge about the wire protocol: the OpenTherm data-ID message
//! table with value formats and flag expansions, and the gateway
//! configuration table with its firmware-version overlay.

pub mod config;
pub mod messages;

pub use config::{ConfigId, ConfigTable};
pub use messages::{FaultFlags, SensorKind, StatusFlags};
