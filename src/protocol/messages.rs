//! OpenTherm Message Table
//!
//! Static definitions for the OpenTherm data IDs the engine understands:
//! payload format, the variable name(s) a decoded value is stored under,
//! an optional flag-bit table expanding a 16-bit word into named boolean
//! variables, and the sensor kind used for discovery. IDs not listed here
//! are logged and dropped by the message processor.

use bitflags::bitflags;

use crate::codec::DataFormat;

bitflags! {
    /// Boiler/thermostat status word (data ID 0). The low byte carries the
    /// slave status bits, the high byte the master enable bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct StatusFlags: u16 {
        const FAULT = 0x0001;
        const CH_MODE = 0x0002;
        const DHW_MODE = 0x0004;
        const FLAME = 0x0008;
        const COOLING = 0x0010;
        const CH2_MODE = 0x0020;
        const DIAGNOSTIC = 0x0040;
        const CH_ENABLED = 0x0100;
        const DHW_ENABLED = 0x0200;
        const COOL_ENABLED = 0x0400;
        const OTC_ACTIVE = 0x0800;
        const CH2_ENABLED = 0x1000;
        const SUMMER_WINTER = 0x2000;
        const DHW_BLOCKED = 0x4000;
    }
}

bitflags! {
    /// Application-specific fault word (data ID 5, high byte)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FaultFlags: u16 {
        const SERVICE_REQUEST = 0x0100;
        const LOCKOUT_RESET = 0x0200;
        const LOW_WATER_PRESSURE = 0x0400;
        const GAS_FLAME = 0x0800;
        const AIR_PRESSURE = 0x1000;
        const WATER_OVER_TEMPERATURE = 0x2000;
    }
}

/// Sensor category a variable is discoverable under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SensorKind {
    Temperature,
    Pressure,
    Humidity,
    Percentage,
    Counter,
}

impl SensorKind {
    pub fn label(&self) -> &'static str {
        match self {
            SensorKind::Temperature => "temperature",
            SensorKind::Pressure => "pressure",
            SensorKind::Humidity => "humidity",
            SensorKind::Percentage => "percentage",
            SensorKind::Counter => "counter",
        }
    }
}

/// How the two data bytes are decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFormat {
    /// One value spanning the payload (16-bit formats) or rendered as a
    /// byte pair (byte formats)
    Single(DataFormat),
    /// Two independently decoded byte halves
    Split { hb: DataFormat, lb: DataFormat },
}

/// Where a decoded value is stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableSlot {
    /// Not stored (flag-only or unnamed messages)
    None,
    /// Whole decoded value under one name
    Whole(&'static str),
    /// Raw high/low bytes under separate names
    Split {
        hb: Option<&'static str>,
        lb: Option<&'static str>,
    },
}

/// One bit of a flag word mapped to a named boolean variable
#[derive(Debug, Clone, Copy)]
pub struct FlagDef {
    pub mask: u16,
    pub variable: Option<&'static str>,
    pub label: &'static str,
}

/// Definition of one OpenTherm data ID
#[derive(Debug, Clone, Copy)]
pub struct MessageDef {
    pub id: u8,
    pub label: &'static str,
    pub payload: PayloadFormat,
    pub variable: VariableSlot,
    pub flags: Option<&'static [FlagDef]>,
    pub sensor: Option<SensorKind>,
}

/// Status word bits (data ID 0)
pub const STATUS_FLAGS: &[FlagDef] = &[
    FlagDef { mask: StatusFlags::FAULT.bits(), variable: Some("StatusFault"), label: "Fault indication" },
    FlagDef { mask: StatusFlags::CH_MODE.bits(), variable: Some("StatusCHMode"), label: "Central heating mode" },
    FlagDef { mask: StatusFlags::DHW_MODE.bits(), variable: Some("StatusDHWMode"), label: "Domestic hot water mode" },
    FlagDef { mask: StatusFlags::FLAME.bits(), variable: Some("StatusFlame"), label: "Flame status" },
    FlagDef { mask: StatusFlags::COOLING.bits(), variable: Some("StatusCooling"), label: "Cooling status" },
    FlagDef { mask: StatusFlags::CH2_MODE.bits(), variable: Some("StatusCH2Mode"), label: "Central heating 2 mode" },
    FlagDef { mask: StatusFlags::DIAGNOSTIC.bits(), variable: Some("StatusDiagnostic"), label: "Diagnostic indication" },
    FlagDef { mask: StatusFlags::CH_ENABLED.bits(), variable: Some("StatusCHEnabled"), label: "Central heating enabled" },
    FlagDef { mask: StatusFlags::DHW_ENABLED.bits(), variable: Some("StatusDHWEnabled"), label: "Domestic hot water enabled" },
    FlagDef { mask: StatusFlags::COOL_ENABLED.bits(), variable: Some("StatusCoolEnabled"), label: "Cooling enabled" },
    FlagDef { mask: StatusFlags::OTC_ACTIVE.bits(), variable: Some("StatusOTCActive"), label: "Outside temperature compensation active" },
    FlagDef { mask: StatusFlags::CH2_ENABLED.bits(), variable: Some("StatusCH2Enabled"), label: "Central heating 2 enabled" },
    FlagDef { mask: StatusFlags::SUMMER_WINTER.bits(), variable: Some("StatusSummerWinter"), label: "Summer/winter mode" },
    FlagDef { mask: StatusFlags::DHW_BLOCKED.bits(), variable: Some("StatusDHWBlocked"), label: "Domestic hot water blocked" },
];

/// Fault word bits (data ID 5, high byte)
pub const FAULT_FLAGS: &[FlagDef] = &[
    FlagDef { mask: FaultFlags::SERVICE_REQUEST.bits(), variable: Some("FaultServiceRequest"), label: "Service required" },
    FlagDef { mask: FaultFlags::LOCKOUT_RESET.bits(), variable: Some("FaultLockoutReset"), label: "Lockout reset enabled" },
    FlagDef { mask: FaultFlags::LOW_WATER_PRESSURE.bits(), variable: Some("FaultLowWaterPressure"), label: "Low water pressure" },
    FlagDef { mask: FaultFlags::GAS_FLAME.bits(), variable: Some("FaultGasFlame"), label: "Gas or flame fault" },
    FlagDef { mask: FaultFlags::AIR_PRESSURE.bits(), variable: Some("FaultAirPressure"), label: "Air pressure fault" },
    FlagDef { mask: FaultFlags::WATER_OVER_TEMPERATURE.bits(), variable: Some("FaultWaterOverTemperature"), label: "Water over-temperature" },
];

/// Slave configuration bits (data ID 3, high byte)
pub const SLAVE_CONFIG_FLAGS: &[FlagDef] = &[
    FlagDef { mask: 0x0100, variable: Some("ConfigDHWPresent"), label: "Domestic hot water present" },
    FlagDef { mask: 0x0200, variable: Some("ConfigControlType"), label: "On/off control type" },
    FlagDef { mask: 0x0400, variable: Some("ConfigCooling"), label: "Cooling supported" },
    FlagDef { mask: 0x0800, variable: Some("ConfigDHWStorageTank"), label: "Domestic hot water storage tank" },
    FlagDef { mask: 0x1000, variable: Some("ConfigMasterLowOff"), label: "Master low-off and pump control" },
    FlagDef { mask: 0x2000, variable: Some("ConfigCH2Present"), label: "Central heating 2 present" },
];

macro_rules! msg {
    ($id:expr, $label:expr, $payload:expr, $variable:expr, $flags:expr, $sensor:expr) => {
        MessageDef {
            id: $id,
            label: $label,
            payload: $payload,
            variable: $variable,
            flags: $flags,
            sensor: $sensor,
        }
    };
}

use DataFormat::{Flag8, F8_8, S16, S8, U16, U8};
use PayloadFormat::{Single, Split};
use SensorKind::{Counter, Humidity, Percentage, Pressure, Temperature};
use VariableSlot::{None as NoVar, Split as SplitVar, Whole};

/// All known data IDs, sorted by ID
pub const MESSAGES: &[MessageDef] = &[
    msg!(0, "Master/slave status", Single(Flag8), NoVar, Some(STATUS_FLAGS), None),
    msg!(1, "Control setpoint", Single(F8_8), Whole("ControlSetpoint"), None, Some(Temperature)),
    msg!(2, "Master configuration", Split { hb: Flag8, lb: U8 }, SplitVar { hb: None, lb: Some("MasterMemberId") }, None, None),
    msg!(3, "Slave configuration", Split { hb: Flag8, lb: U8 }, SplitVar { hb: None, lb: Some("SlaveMemberId") }, Some(SLAVE_CONFIG_FLAGS), None),
    msg!(5, "Application-specific fault flags", Split { hb: Flag8, lb: U8 }, SplitVar { hb: None, lb: Some("OEMFaultCode") }, Some(FAULT_FLAGS), None),
    msg!(7, "Cooling control signal", Single(F8_8), Whole("CoolingControlSignal"), None, Some(Percentage)),
    msg!(8, "Control setpoint 2", Single(F8_8), Whole("ControlSetpointCH2"), None, Some(Temperature)),
    msg!(9, "Remote override room setpoint", Single(F8_8), Whole("RemoteOverrideRoomSetpoint"), None, None),
    msg!(14, "Maximum relative modulation level", Single(F8_8), Whole("MaxRelativeModulationLevel"), None, Some(Percentage)),
    msg!(15, "Boiler capacity and modulation limits", Split { hb: U8, lb: U8 }, SplitVar { hb: Some("MaxBoilerCapacity"), lb: Some("MinModulationLevel") }, None, None),
    msg!(16, "Room setpoint", Single(F8_8), Whole("RoomSetpoint"), None, Some(Temperature)),
    msg!(17, "Relative modulation level", Single(F8_8), Whole("RelativeModulationLevel"), None, Some(Percentage)),
    msg!(18, "Central heating water pressure", Single(F8_8), Whole("CHWaterPressure"), None, Some(Pressure)),
    msg!(19, "Domestic hot water flow rate", Single(F8_8), Whole("DHWFlowRate"), None, None),
    msg!(23, "Room setpoint 2", Single(F8_8), Whole("RoomSetpointCH2"), None, Some(Temperature)),
    msg!(24, "Room temperature", Single(F8_8), Whole("RoomTemperature"), None, Some(Temperature)),
    msg!(25, "Boiler water temperature", Single(F8_8), Whole("BoilerWaterTemperature"), None, Some(Temperature)),
    msg!(26, "Domestic hot water temperature", Single(F8_8), Whole("DHWTemperature"), None, Some(Temperature)),
    msg!(27, "Outside temperature", Single(F8_8), Whole("OutsideTemperature"), None, Some(Temperature)),
    msg!(28, "Return water temperature", Single(F8_8), Whole("ReturnWaterTemperature"), None, Some(Temperature)),
    msg!(29, "Solar storage temperature", Single(F8_8), Whole("SolarStorageTemperature"), None, Some(Temperature)),
    msg!(30, "Solar collector temperature", Single(S16), Whole("SolarCollectorTemperature"), None, Some(Temperature)),
    msg!(31, "Flow temperature 2", Single(F8_8), Whole("FlowTemperatureCH2"), None, Some(Temperature)),
    msg!(32, "Domestic hot water 2 temperature", Single(F8_8), Whole("DHW2Temperature"), None, Some(Temperature)),
    msg!(33, "Boiler exhaust temperature", Single(S16), Whole("BoilerExhaustTemperature"), None, Some(Temperature)),
    msg!(48, "Domestic hot water setpoint bounds", Split { hb: S8, lb: S8 }, SplitVar { hb: Some("DHWSetpointUpper"), lb: Some("DHWSetpointLower") }, None, None),
    msg!(49, "Maximum central heating setpoint bounds", Split { hb: S8, lb: S8 }, SplitVar { hb: Some("MaxCHSetpointUpper"), lb: Some("MaxCHSetpointLower") }, None, None),
    msg!(56, "Domestic hot water setpoint", Single(F8_8), Whole("DHWSetpoint"), None, Some(Temperature)),
    msg!(57, "Maximum central heating water setpoint", Single(F8_8), Whole("MaxCHWaterSetpoint"), None, Some(Temperature)),
    msg!(78, "Relative humidity", Split { hb: U8, lb: U8 }, SplitVar { hb: Some("RelativeHumidity"), lb: None }, None, Some(Humidity)),
    msg!(100, "Remote override function", Split { hb: U8, lb: Flag8 }, SplitVar { hb: None, lb: Some("RemoteOverrideFunction") }, None, None),
    msg!(113, "Unsuccessful burner starts", Single(U16), Whole("UnsuccessfulBurnerStarts"), None, Some(Counter)),
    msg!(115, "OEM diagnostic code", Single(U16), Whole("OEMDiagnosticCode"), None, None),
    msg!(116, "Burner starts", Single(U16), Whole("BurnerStarts"), None, Some(Counter)),
    msg!(117, "Central heating pump starts", Single(U16), Whole("CHPumpStarts"), None, Some(Counter)),
    msg!(118, "Domestic hot water pump starts", Single(U16), Whole("DHWPumpStarts"), None, Some(Counter)),
    msg!(119, "Domestic hot water burner starts", Single(U16), Whole("DHWBurnerStarts"), None, Some(Counter)),
    msg!(120, "Burner operation hours", Single(U16), Whole("BurnerOperationHours"), None, Some(Counter)),
    msg!(121, "Central heating pump operation hours", Single(U16), Whole("CHPumpOperationHours"), None, Some(Counter)),
    msg!(122, "Domestic hot water pump operation hours", Single(U16), Whole("DHWPumpOperationHours"), None, Some(Counter)),
    msg!(123, "Domestic hot water burner operation hours", Single(U16), Whole("DHWBurnerOperationHours"), None, Some(Counter)),
    msg!(124, "OpenTherm version master", Single(F8_8), Whole("OpenThermVersionMaster"), None, None),
    msg!(125, "OpenTherm version slave", Single(F8_8), Whole("OpenThermVersionSlave"), None, None),
    msg!(126, "Master product version", Split { hb: U8, lb: U8 }, SplitVar { hb: Some("MasterProductType"), lb: Some("MasterProductVersion") }, None, None),
    msg!(127, "Slave product version", Split { hb: U8, lb: U8 }, SplitVar { hb: Some("SlaveProductType"), lb: Some("SlaveProductVersion") }, None, None),
];

/// Look up a data ID in the message table
pub fn lookup(id: u8) -> Option<&'static MessageDef> {
    MESSAGES
        .binary_search_by_key(&id, |m| m.id)
        .ok()
        .map(|idx| &MESSAGES[idx])
}

/// Resolve a flag table by its conventional name (`StatusFlags`,
/// `FaultFlags`, `SlaveConfigFlags`)
pub fn flag_table(name: &str) -> Option<&'static [FlagDef]> {
    match name {
        "StatusFlags" => Some(STATUS_FLAGS),
        "FaultFlags" => Some(FAULT_FLAGS),
        "SlaveConfigFlags" => Some(SLAVE_CONFIG_FLAGS),
        _ => None,
    }
}

/// Find the message or flag entry that defines `variable`, returning its
/// human-readable label
pub fn variable_label(variable: &str) -> Option<&'static str> {
    for table in [STATUS_FLAGS, FAULT_FLAGS, SLAVE_CONFIG_FLAGS] {
        if let Some(flag) = table.iter().find(|f| f.variable == Some(variable)) {
            return Some(flag.label);
        }
    }
    for msg in MESSAGES {
        match msg.variable {
            VariableSlot::Whole(name) if name == variable => return Some(msg.label),
            VariableSlot::Split { hb, lb }
                if hb == Some(variable) || lb == Some(variable) =>
            {
                return Some(msg.label)
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_is_sorted_and_unique() {
        for pair in MESSAGES.windows(2) {
            assert!(pair[0].id < pair[1].id, "table must be sorted by id");
        }
    }

    #[test]
    fn test_lookup() {
        let def = lookup(25).unwrap();
        assert_eq!(def.label, "Boiler water temperature");
        assert_eq!(def.variable, VariableSlot::Whole("BoilerWaterTemperature"));
        assert!(lookup(4).is_none());
        assert!(lookup(255).is_none());
    }

    #[test]
    fn test_status_masks_match_bitflags() {
        let flame = STATUS_FLAGS.iter().find(|f| f.variable == Some("StatusFlame")).unwrap();
        assert_eq!(flame.mask, 0x0008);
        let dhw = STATUS_FLAGS.iter().find(|f| f.variable == Some("StatusDHWEnabled")).unwrap();
        assert_eq!(dhw.mask, 0x0200);
    }

    #[test]
    fn test_variable_label() {
        assert_eq!(variable_label("StatusFlame"), Some("Flame status"));
        assert_eq!(variable_label("OEMFaultCode"), Some("Application-specific fault flags"));
        assert_eq!(variable_label("BoilerWaterTemperature"), Some("Boiler water temperature"));
        assert_eq!(variable_label("NoSuchVariable"), None);
    }

    #[test]
    fn test_flag_table_by_name() {
        assert!(flag_table("StatusFlags").is_some());
        assert!(flag_table("FaultFlags").is_some());
        assert!(flag_table("WhateverFlags").is_none());
    }
}
