//! OpenTherm Frame Parsing
//!
//! The gateway reports every OpenTherm exchange it sees as a nine character
//! line: one initiator letter followed by eight uppercase hex digits, e.g.
//! `B40194000`. The hex digits form the 32-bit OpenTherm frame: a first byte
//! carrying the parity bit, message type and spare nibble, the data ID byte,
//! and two data bytes.
//!
//! # Example
//!
//! ```
//! use otgw_rs::frame::{Initiator, MsgType, OtFrame};
//!
//! let frame = OtFrame::parse("B40194000").unwrap();
//! assert_eq!(frame.initiator, Initiator::Boiler);
//! assert_eq!(frame.msg_type, MsgType::ReadAck);
//! assert_eq!(frame.data_id, 25);
//! assert_eq!(frame.data, [0x40, 0x00]);
//! assert_eq!(frame.encode(), "B40194000");
//! ```

use thiserror::Error;

/// Length of a monitor line: initiator letter plus eight hex digits
pub const FRAME_LEN: usize = 9;

/// Errors that can occur while parsing a monitor line
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Line is not exactly nine characters
    #[error("frame must be {FRAME_LEN} characters, got {0}")]
    Length(usize),
    /// First character is not one of `A`, `B`, `R`, `T`
    #[error("unknown initiator `{0}`")]
    Initiator(char),
    /// Remaining characters are not uppercase hex digits
    #[error("invalid hex digits in frame")]
    InvalidHex,
}

/// Which party put the frame on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Initiator {
    /// Answer returned to the thermostat, possibly modified by the gateway
    Answer,
    /// Response from the boiler
    Boiler,
    /// Request sent to the boiler, possibly modified by the gateway
    Request,
    /// Request from the thermostat
    Thermostat,
}

impl Initiator {
    /// Decode the initiator letter
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'A' => Some(Initiator::Answer),
            'B' => Some(Initiator::Boiler),
            'R' => Some(Initiator::Request),
            'T' => Some(Initiator::Thermostat),
            _ => None,
        }
    }

    /// The wire letter for this initiator
    pub fn as_char(&self) -> char {
        match self {
            Initiator::Answer => 'A',
            Initiator::Boiler => 'B',
            Initiator::Request => 'R',
            Initiator::Thermostat => 'T',
        }
    }

    /// Human-readable name
    pub fn label(&self) -> &'static str {
        match self {
            Initiator::Answer => "Answer",
            Initiator::Boiler => "Boiler",
            Initiator::Request => "Request",
            Initiator::Thermostat => "Thermostat",
        }
    }

    /// True for frames the gateway injects or rewrites itself (the `A` and
    /// `R` directions) as opposed to ground-truth device traffic.
    pub fn is_override(&self) -> bool {
        matches!(self, Initiator::Answer | Initiator::Request)
    }
}

impl std::fmt::Display for Initiator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// OpenTherm message type, the low three bits of the first hex digit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MsgType {
    ReadData = 0,
    WriteData = 1,
    InvalidData = 2,
    Reserved = 3,
    ReadAck = 4,
    WriteAck = 5,
    DataInvalid = 6,
    UnknownDataId = 7,
}

impl MsgType {
    /// Decode from the three type bits
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x7 {
            0 => MsgType::ReadData,
            1 => MsgType::WriteData,
            2 => MsgType::InvalidData,
            3 => MsgType::Reserved,
            4 => MsgType::ReadAck,
            5 => MsgType::WriteAck,
            6 => MsgType::DataInvalid,
            _ => MsgType::UnknownDataId,
        }
    }

    /// Human-readable name
    pub fn label(&self) -> &'static str {
        match self {
            MsgType::ReadData => "Read-Data",
            MsgType::WriteData => "Write-Data",
            MsgType::InvalidData => "Invalid-Data",
            MsgType::Reserved => "-reserved-",
            MsgType::ReadAck => "Read-Ack",
            MsgType::WriteAck => "Write-Ack",
            MsgType::DataInvalid => "Data-Invalid",
            MsgType::UnknownDataId => "Unknown-DataId",
        }
    }
}

impl std::fmt::Display for MsgType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// A decoded OpenTherm monitor line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OtFrame {
    /// Which party sent the frame
    pub initiator: Initiator,
    /// Parity bit of the first frame byte
    pub parity: bool,
    /// Message type
    pub msg_type: MsgType,
    /// Spare nibble of the first frame byte
    pub spare: u8,
    /// OpenTherm data ID
    pub data_id: u8,
    /// High and low data bytes
    pub data: [u8; 2],
}

impl OtFrame {
    /// Parse a monitor line. The match is case-sensitive: the wire protocol
    /// uses uppercase hex only, and lowercase lines are rejected.
    pub fn parse(line: &str) -> Result<Self, FrameError> {
        if line.len() != FRAME_LEN {
            return Err(FrameError::Length(line.len()));
        }
        let mut chars = line.chars();
        let first = chars.next().ok_or(FrameError::Length(0))?;
        let initiator = Initiator::from_char(first).ok_or(FrameError::Initiator(first))?;

        let digits = &line[1..];
        if !digits
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'A'..=b'F').contains(&b))
        {
            return Err(FrameError::InvalidHex);
        }
        let bytes = hex::decode(digits).map_err(|_| FrameError::InvalidHex)?;

        Ok(OtFrame {
            initiator,
            parity: bytes[0] & 0x80 != 0,
            msg_type: MsgType::from_bits(bytes[0] >> 4),
            spare: bytes[0] & 0x0F,
            data_id: bytes[1],
            data: [bytes[2], bytes[3]],
        })
    }

    /// Encode back to the nine character wire form
    pub fn encode(&self) -> String {
        let first = ((self.parity as u8) << 7) | ((self.msg_type as u8) << 4) | self.spare;
        format!(
            "{}{:02X}{:02X}{:02X}{:02X}",
            self.initiator.as_char(),
            first,
            self.data_id,
            self.data[0],
            self.data[1]
        )
    }

    /// The 16-bit data value, high byte first
    pub fn data_word(&self) -> u16 {
        u16::from_be_bytes(self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_monitor_line() {
        let frame = OtFrame::parse("T10014000").unwrap();
        assert_eq!(frame.initiator, Initiator::Thermostat);
        assert_eq!(frame.msg_type, MsgType::WriteData);
        assert!(!frame.parity);
        assert_eq!(frame.data_id, 1);
        assert_eq!(frame.data, [0x40, 0x00]);
        assert_eq!(frame.data_word(), 0x4000);
    }

    #[test]
    fn test_parity_and_spare_round_trip() {
        let frame = OtFrame::parse("BC0194000").unwrap();
        assert!(frame.parity);
        assert_eq!(frame.msg_type, MsgType::ReadAck);
        assert_eq!(frame.encode(), "BC0194000");
    }

    #[test]
    fn test_rejects_bad_lines() {
        assert_eq!(OtFrame::parse(""), Err(FrameError::Length(0)));
        assert_eq!(OtFrame::parse("B4019400"), Err(FrameError::Length(8)));
        assert_eq!(OtFrame::parse("X40194000"), Err(FrameError::Initiator('X')));
        // lowercase hex is not valid wire format
        assert_eq!(OtFrame::parse("b40194000"), Err(FrameError::Initiator('b')));
        assert_eq!(OtFrame::parse("B40194e00"), Err(FrameError::InvalidHex));
        assert_eq!(OtFrame::parse("PR: A=foo"), Err(FrameError::Initiator('P')));
    }

    #[test]
    fn test_initiator_override() {
        assert!(Initiator::Answer.is_override());
        assert!(Initiator::Request.is_override());
        assert!(!Initiator::Boiler.is_override());
        assert!(!Initiator::Thermostat.is_override());
    }

    proptest! {
        #[test]
        fn frame_round_trips(line in "[ABRT][0-9A-F]{8}") {
            let frame = OtFrame::parse(&line).unwrap();
            prop_assert_eq!(frame.encode(), line);
        }
    }
}
