//! Value Codec
//!
//! Decodes the two data bytes of an OpenTherm frame into a typed value,
//! driven by the format declared in the message table. Sixteen-bit formats
//! consume both bytes; byte formats decode the high byte and, when the low
//! byte is supplied as well, produce a space-separated pair the way the
//! gateway's own tools print them.

/// Payload format of an OpenTherm data value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataFormat {
    /// Unsigned byte
    U8,
    /// Signed byte (two's complement)
    S8,
    /// Unsigned 16-bit
    U16,
    /// Signed 16-bit (two's complement)
    S16,
    /// Signed fixed point, 8 integer bits and 8 fractional bits
    F8_8,
    /// Eight individual flag bits, rendered as a bit string
    Flag8,
}

/// A decoded variable value
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Value {
    Number(f64),
    Bool(bool),
    Text(String),
}

impl Value {
    /// Numeric view of the value, if it has one
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{}", n),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Default number of fractional digits kept for `f8.8` values
pub const DEFAULT_FLOAT_DIGITS: u32 = 2;

/// Decode a data value.
///
/// `hb` is the high data byte. For 16-bit formats `lb` must carry the low
/// byte (a missing low byte decodes as zero). For byte formats a present
/// `lb` is decoded independently and appended as text. `digits` rounds
/// `f8.8` values to that many fractional digits; `None` keeps full
/// precision.
pub fn decode(hb: u8, format: DataFormat, lb: Option<u8>, digits: Option<u32>) -> Value {
    match format {
        DataFormat::U16 => Value::Number(f64::from(u16::from_be_bytes([hb, lb.unwrap_or(0)]))),
        DataFormat::S16 => Value::Number(f64::from(i16::from_be_bytes([hb, lb.unwrap_or(0)]))),
        DataFormat::F8_8 => {
            let mut val = f64::from(hb) + f64::from(lb.unwrap_or(0)) / 256.0;
            if hb & 0x80 != 0 {
                val -= 256.0;
            }
            if let Some(d) = digits {
                val = round_to(val, d);
            }
            Value::Number(val)
        }
        DataFormat::U8 | DataFormat::S8 | DataFormat::Flag8 => {
            let first = decode_byte(hb, format);
            match lb {
                Some(low) => Value::Text(format!("{} {}", first, decode_byte(low, format))),
                None => first,
            }
        }
    }
}

fn decode_byte(byte: u8, format: DataFormat) -> Value {
    match format {
        DataFormat::U8 => Value::Number(f64::from(byte)),
        DataFormat::S8 => Value::Number(f64::from(byte as i8)),
        DataFormat::Flag8 => {
            let mut bits = String::with_capacity(8);
            for i in (0..8).rev() {
                bits.push(if byte & (1 << i) != 0 { '1' } else { '0' });
            }
            Value::Text(bits)
        }
        _ => Value::Number(f64::from(byte)),
    }
}

fn round_to(value: f64, digits: u32) -> f64 {
    let factor = 10f64.powi(digits as i32);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_f8_8_decode() {
        assert_eq!(
            decode(0x00, DataFormat::F8_8, Some(0x80), Some(2)),
            Value::Number(0.5)
        );
        // sign bit lives on the high byte
        assert_eq!(
            decode(0x80, DataFormat::F8_8, Some(0x00), Some(2)),
            Value::Number(-128.0)
        );
        assert_eq!(
            decode(0x14, DataFormat::F8_8, Some(0x80), Some(2)),
            Value::Number(20.5)
        );
    }

    #[test]
    fn test_f8_8_rounding() {
        // 0x01/256 = 0.00390625
        assert_eq!(
            decode(0x00, DataFormat::F8_8, Some(0x01), Some(2)),
            Value::Number(0.0)
        );
        assert_eq!(
            decode(0x00, DataFormat::F8_8, Some(0x01), Some(4)),
            Value::Number(0.0039)
        );
        assert_eq!(
            decode(0x00, DataFormat::F8_8, Some(0x01), None),
            Value::Number(0.00390625)
        );
    }

    #[test]
    fn test_u16_s16() {
        assert_eq!(
            decode(0x01, DataFormat::U16, Some(0x02), None),
            Value::Number(258.0)
        );
        assert_eq!(
            decode(0xFF, DataFormat::S16, Some(0xFF), None),
            Value::Number(-1.0)
        );
        assert_eq!(
            decode(0x80, DataFormat::S16, Some(0x00), None),
            Value::Number(-32768.0)
        );
    }

    #[test]
    fn test_byte_formats() {
        assert_eq!(decode(0x64, DataFormat::U8, None, None), Value::Number(100.0));
        assert_eq!(decode(0xFF, DataFormat::S8, None, None), Value::Number(-1.0));
        assert_eq!(
            decode(0x40, DataFormat::U8, Some(0x64), None),
            Value::Text("64 100".to_string())
        );
        assert_eq!(
            decode(0xA5, DataFormat::Flag8, None, None),
            Value::Text("10100101".to_string())
        );
    }
}
