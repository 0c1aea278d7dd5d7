//! Gateway Configuration Table
//!
//! Definitions of the gateway-side settings (`PR`/`PS` remote parameters
//! and their write commands), keyed by [`ConfigId`]. The base table covers
//! firmware 3.x report syntax; firmware 4.x and later replaces several
//! entries wholesale through an overlay. [`ConfigTable::for_firmware`]
//! merges the two and compiles the response patterns once per connection.

use std::collections::HashMap;

use regex::Regex;

/// Identity of a gateway configuration item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConfigId {
    Version,
    Mode,
    LedFunctions,
    IgnoreTransitions,
    RemoteOverride,
    ReferenceVoltage,
    SetbackTemperature,
    DhwSetting,
    Gpio,
    PowerLevel,
}

/// Static definition of one configuration item
#[derive(Debug, Clone, Copy)]
pub struct ConfigSpec {
    pub id: ConfigId,
    pub label: &'static str,
    /// Variable name the value is published under. Multi-slot items append
    /// the slot index; `<A>` in the label is replaced by the slot letter.
    pub variable: &'static str,
    /// Command prefix used to change the item, `<A>` replaced per slot
    pub write_cmd: Option<&'static str>,
    /// `PR=` letter used to read the item back
    pub read_code: Option<char>,
    /// Pattern matched against response lines; capture 1 is the value
    pub pattern: &'static str,
    /// Number of independent slots (LED outputs, GPIO pins)
    pub slots: usize,
    /// Raw value to display text
    pub values: Option<&'static [(&'static str, &'static str)]>,
    /// Raw response character to canonical value (firmware 4 reports the
    /// mode as `M`/`G` where the command takes `0`/`1`)
    pub value_map: Option<&'static [(&'static str, &'static str)]>,
}

pub const GATEWAY_MODE: &[(&str, &str)] = &[("0", "Monitor"), ("1", "Gateway")];

pub const REMOTE_OVERRIDE: &[(&str, &str)] = &[
    ("0", "Low byte only"),
    ("1", "Both bytes"),
];

pub const POWER_LEVELS: &[(&str, &str)] =
    &[("L", "Low"), ("M", "Medium"), ("H", "High")];

pub const LED_FUNCTION: &[(&str, &str)] = &[
    ("R", "Receiving OpenTherm message"),
    ("X", "Transmitting OpenTherm message"),
    ("T", "Transmitting or receiving on master interface"),
    ("B", "Transmitting or receiving on slave interface"),
    ("O", "Remote setpoint override active"),
    ("F", "Flame on"),
    ("H", "Central heating on"),
    ("W", "Hot water on"),
    ("C", "Comfort mode on"),
    ("E", "Transmission error detected"),
    ("M", "Boiler requires maintenance"),
    ("P", "Raised power mode active"),
];

pub const GPIO_FUNCTION: &[(&str, &str)] = &[
    ("0", "No function"),
    ("1", "Ground"),
    ("2", "Vcc"),
    ("3", "LED E"),
    ("4", "LED F"),
    ("5", "Home/away setback"),
    ("6", "Away/home setback"),
    ("7", "DS1820 temperature sensor"),
];

pub const IGNORE_TRANSITIONS: &[(&str, &str)] =
    &[("0", "Generate errors"), ("1", "Ignore errors")];

pub const REFERENCE_VOLTAGE: &[(&str, &str)] = &[
    ("0", "0.625 V"),
    ("1", "0.833 V"),
    ("2", "1.042 V"),
    ("3", "1.250 V"),
    ("4", "1.458 V"),
    ("5", "1.667 V"),
    ("6", "1.875 V"),
    ("7", "2.083 V"),
    ("8", "2.292 V"),
    ("9", "2.500 V"),
];

pub const DHW_SETTING: &[(&str, &str)] = &[
    ("0", "Off"),
    ("1", "On (comfort mode)"),
    ("A", "Thermostat controlled"),
];

const MODE_VALUE_MAP: &[(&str, &str)] = &[("M", "0"), ("G", "1")];

/// Settings the gateway reports unsolicited as `CODE: value` lines when
/// changed from another connection, keyed by command code
pub const SETTING_UPDATES: &[(&str, ConfigId)] = &[
    ("GW", ConfigId::Mode),
    ("OH", ConfigId::RemoteOverride),
    ("IT", ConfigId::IgnoreTransitions),
    ("VR", ConfigId::ReferenceVoltage),
    ("HW", ConfigId::DhwSetting),
];

/// Command codes the gateway accepts
pub const COMMANDS: &[&str] = &[
    "TT", "TC", "OT", "SC", "HW", "PR", "PS", "GW", "LA", "LB", "LC", "LD",
    "LE", "LF", "GA", "GB", "SB", "AA", "DA", "UI", "KI", "PM", "SR", "CR",
    "SH", "SW", "MM", "CS", "CH", "VS", "RS", "IT", "OH", "FT", "VR", "DP",
];

/// Items read back after the gateway version is established
pub const STARTUP: &[ConfigId] = &[
    ConfigId::Mode,
    ConfigId::LedFunctions,
    ConfigId::IgnoreTransitions,
    ConfigId::RemoteOverride,
    ConfigId::ReferenceVoltage,
    ConfigId::SetbackTemperature,
    ConfigId::DhwSetting,
    ConfigId::Gpio,
    ConfigId::PowerLevel,
];

/// Firmware 3.x definitions. The version entry never changes across
/// firmware generations and anchors the search handshake.
const BASE: &[ConfigSpec] = &[
    ConfigSpec {
        id: ConfigId::Version,
        label: "Firmware version",
        variable: "FirmwareVersion",
        write_cmd: None,
        read_code: Some('A'),
        pattern: r"OpenTherm Gateway (.*)",
        slots: 1,
        values: None,
        value_map: None,
    },
    ConfigSpec {
        id: ConfigId::Mode,
        label: "Function",
        variable: "GatewayMode",
        write_cmd: Some("GW"),
        read_code: Some('G'),
        pattern: r"([01])",
        slots: 1,
        values: Some(GATEWAY_MODE),
        value_map: None,
    },
    ConfigSpec {
        id: ConfigId::LedFunctions,
        label: "LED <A> function",
        variable: "LedFunction",
        write_cmd: Some("L<A>"),
        read_code: Some('L'),
        pattern: r"([RXTBOFHWCEM]+)",
        slots: 4,
        values: Some(LED_FUNCTION),
        value_map: None,
    },
    ConfigSpec {
        id: ConfigId::IgnoreTransitions,
        label: "Mid-bit transition errors",
        variable: "IgnoreTransitions",
        write_cmd: Some("IT"),
        read_code: Some('T'),
        pattern: r"([01])",
        slots: 1,
        values: Some(IGNORE_TRANSITIONS),
        value_map: None,
    },
    ConfigSpec {
        id: ConfigId::ReferenceVoltage,
        label: "Reference voltage",
        variable: "ReferenceVoltage",
        write_cmd: Some("VR"),
        read_code: Some('V'),
        pattern: r"(\d)",
        slots: 1,
        values: Some(REFERENCE_VOLTAGE),
        value_map: None,
    },
    ConfigSpec {
        id: ConfigId::DhwSetting,
        label: "Domestic hot water setting",
        variable: "DHWSetting",
        write_cmd: Some("HW"),
        read_code: Some('W'),
        pattern: r"([01A])",
        slots: 1,
        values: Some(DHW_SETTING),
        value_map: None,
    },
];

/// Firmware 4.x overlay. Entries here replace the base entry of the same
/// id completely; new ids extend the table.
const FW4_OVERLAY: &[ConfigSpec] = &[
    ConfigSpec {
        id: ConfigId::Mode,
        label: "Function",
        variable: "GatewayMode",
        write_cmd: Some("GW"),
        read_code: Some('M'),
        pattern: r"PR: M=([MG])",
        slots: 1,
        values: Some(GATEWAY_MODE),
        value_map: Some(MODE_VALUE_MAP),
    },
    ConfigSpec {
        id: ConfigId::LedFunctions,
        label: "LED <A> function",
        variable: "LedFunction",
        write_cmd: Some("L<A>"),
        read_code: Some('L'),
        pattern: r"PR: L=([RXTBOFHWCEMP]+)",
        slots: 6,
        values: Some(LED_FUNCTION),
        value_map: None,
    },
    ConfigSpec {
        id: ConfigId::IgnoreTransitions,
        label: "Mid-bit transition errors",
        variable: "IgnoreTransitions",
        write_cmd: Some("IT"),
        read_code: Some('T'),
        pattern: r"PR: T=([01])",
        slots: 1,
        values: Some(IGNORE_TRANSITIONS),
        value_map: None,
    },
    ConfigSpec {
        id: ConfigId::RemoteOverride,
        label: "Remote override in both bytes",
        variable: "ROFInBothBytes",
        write_cmd: Some("OH"),
        read_code: Some('T'),
        pattern: r"PR: T=[01]([01])",
        slots: 1,
        values: Some(REMOTE_OVERRIDE),
        value_map: None,
    },
    ConfigSpec {
        id: ConfigId::ReferenceVoltage,
        label: "Reference voltage",
        variable: "ReferenceVoltage",
        write_cmd: Some("VR"),
        read_code: Some('V'),
        pattern: r"PR: V=(\d)",
        slots: 1,
        values: Some(REFERENCE_VOLTAGE),
        value_map: None,
    },
    ConfigSpec {
        id: ConfigId::SetbackTemperature,
        label: "Setback temperature",
        variable: "SetbackTemperature",
        write_cmd: Some("SB"),
        read_code: Some('S'),
        pattern: r"PR: S=(\d+\.\d+)",
        slots: 1,
        values: None,
        value_map: None,
    },
    ConfigSpec {
        id: ConfigId::DhwSetting,
        label: "Domestic hot water setting",
        variable: "DHWSetting",
        write_cmd: Some("HW"),
        read_code: Some('W'),
        pattern: r"PR: W=([01A])",
        slots: 1,
        values: Some(DHW_SETTING),
        value_map: None,
    },
    ConfigSpec {
        id: ConfigId::Gpio,
        label: "GPIO <A> function",
        variable: "GPIOFunction",
        write_cmd: Some("G<A>"),
        read_code: Some('G'),
        pattern: r"PR: G=(\d+)",
        slots: 2,
        values: Some(GPIO_FUNCTION),
        value_map: None,
    },
    ConfigSpec {
        id: ConfigId::PowerLevel,
        label: "Power level",
        variable: "PowerLevel",
        write_cmd: None,
        read_code: Some('P'),
        pattern: r"PR: P=([LMH])",
        slots: 1,
        values: Some(POWER_LEVELS),
        value_map: None,
    },
];

/// One merged entry with its compiled response pattern
#[derive(Debug, Clone)]
pub struct ConfigEntryDef {
    pub spec: ConfigSpec,
    pub pattern: Regex,
}

/// Configuration table for a specific firmware generation
#[derive(Debug, Clone)]
pub struct ConfigTable {
    entries: HashMap<ConfigId, ConfigEntryDef>,
}

impl ConfigTable {
    /// Build the table for a firmware major version. Version 4 and above
    /// apply the overlay on top of the base definitions.
    pub fn for_firmware(major: u8) -> Self {
        let mut entries = HashMap::new();
        for spec in BASE {
            entries.insert(spec.id, compile(spec));
        }
        if major >= 4 {
            for spec in FW4_OVERLAY {
                entries.insert(spec.id, compile(spec));
            }
        }
        ConfigTable { entries }
    }

    pub fn get(&self, id: ConfigId) -> Option<&ConfigEntryDef> {
        self.entries.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConfigEntryDef> {
        self.entries.values()
    }
}

// The patterns are hardcoded above and should be valid
#[allow(clippy::expect_used)]
fn compile(spec: &ConfigSpec) -> ConfigEntryDef {
    ConfigEntryDef {
        spec: *spec,
        pattern: Regex::new(spec.pattern).expect("invalid config pattern"),
    }
}

/// Look up the display text for a raw value in a value table
pub fn value_text(values: Option<&[(&str, &str)]>, value: &str) -> Option<String> {
    values?
        .iter()
        .find(|(raw, _)| *raw == value)
        .map(|(_, text)| (*text).to_string())
}

/// Map a command code from an unsolicited `CODE: value` line to its
/// configuration item
pub fn setting_update(code: &str) -> Option<ConfigId> {
    SETTING_UPDATES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, id)| *id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_table() {
        let table = ConfigTable::for_firmware(3);
        let mode = table.get(ConfigId::Mode).unwrap();
        assert_eq!(mode.spec.read_code, Some('G'));
        assert!(mode.pattern.is_match("1"));
        assert!(table.get(ConfigId::Gpio).is_none());
        assert!(table.get(ConfigId::PowerLevel).is_none());
        assert_eq!(table.get(ConfigId::LedFunctions).unwrap().spec.slots, 4);
    }

    #[test]
    fn test_fw4_overlay_replaces_entries() {
        let table = ConfigTable::for_firmware(4);
        let mode = table.get(ConfigId::Mode).unwrap();
        assert_eq!(mode.spec.read_code, Some('M'));
        let caps = mode.pattern.captures("PR: M=G").unwrap();
        assert_eq!(&caps[1], "G");
        assert_eq!(table.get(ConfigId::LedFunctions).unwrap().spec.slots, 6);
        assert!(table.get(ConfigId::Gpio).is_some());
        assert!(table.get(ConfigId::PowerLevel).is_some());
    }

    #[test]
    fn test_version_pattern_survives_overlay() {
        let table = ConfigTable::for_firmware(5);
        let version = table.get(ConfigId::Version).unwrap();
        let caps = version
            .pattern
            .captures("OpenTherm Gateway 4.2.5")
            .unwrap();
        assert_eq!(&caps[1], "4.2.5");
    }

    #[test]
    fn test_remote_override_captures_second_digit() {
        let table = ConfigTable::for_firmware(4);
        let rof = table.get(ConfigId::RemoteOverride).unwrap();
        let caps = rof.pattern.captures("PR: T=01").unwrap();
        assert_eq!(&caps[1], "1");
    }

    #[test]
    fn test_value_text() {
        assert_eq!(value_text(Some(GATEWAY_MODE), "1"), Some("Gateway".into()));
        assert_eq!(value_text(Some(DHW_SETTING), "A"), Some("Thermostat controlled".into()));
        assert_eq!(value_text(Some(GATEWAY_MODE), "2"), None);
        assert_eq!(value_text(None, "1"), None);
    }

    #[test]
    fn test_setting_update_lookup() {
        assert_eq!(setting_update("HW"), Some(ConfigId::DhwSetting));
        assert_eq!(setting_update("GW"), Some(ConfigId::Mode));
        assert_eq!(setting_update("TT"), None);
    }
}
