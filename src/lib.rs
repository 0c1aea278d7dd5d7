#![doc = include_str!("../README.md")]

pub mod client;
pub mod codec;
pub mod event;
pub mod frame;
pub mod protocol;
pub mod queue;
pub mod store;
pub mod transport;

// Re-export main types without glob imports to avoid conflicts
pub use client::{DhwMode, OtgwClient, VariableInfo};
pub use codec::{DataFormat, Value};
pub use event::Event;
pub use frame::{FrameError, Initiator, MsgType, OtFrame};
pub use protocol::{ConfigId, ConfigTable, FaultFlags, SensorKind, StatusFlags};
pub use queue::{CommandError, CommandHandle, Expectation};
pub use store::ConfigEntry;
pub use transport::{TcpTransport, Transport, TransportError};
