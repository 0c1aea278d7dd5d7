//! OpenTherm Gateway Client
//!
//! # Overview
//!
//! The engine behind the crate: a poll-driven state machine that owns the
//! link to one gateway, decodes everything the gateway relays, and exposes
//! thermostat and boiler control as typed operations. Drive it by calling
//! [`OtgwClient::poll`] regularly; all timers (search, resend, reconnect,
//! idle detection) derive from that call, there are no background threads.
//!
//! Opening a port starts a search: the client probes for the firmware
//! version and only declares the gateway found when the version banner
//! comes back. The reported version selects the configuration table, after
//! which the client switches the gateway to raw reporting and reads back
//! every setting. A lost link on a found gateway triggers immediate
//! reconnection, then retries on a fixed interval.
//!
//! # Example
//!
//! ```no_run
//! use otgw_rs::OtgwClient;
//!
//! let mut client = OtgwClient::new();
//! let events = client.subscribe();
//! client.open_port("192.168.1.20", 6638);
//! loop {
//!     client.poll();
//!     while let Ok(event) = events.try_recv() {
//!         println!("{event:?}");
//!     }
//! }
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::mpsc::Receiver;
use std::time::{Duration, Instant};

use chrono::{DateTime, Datelike, Local, Timelike};

use crate::codec::{self, Value};
use crate::event::{Event, EventBus};
use crate::frame::{MsgType, OtFrame};
use crate::protocol::config::{self, ConfigId, ConfigTable};
use crate::protocol::messages::{
    self, FaultFlags, PayloadFormat, SensorKind, StatusFlags, VariableSlot,
};
use crate::queue::{CommandError, CommandHandle, CommandQueue, Expectation};
use crate::store::{ConfigEntry, ConfigStore, VariableStore};
use crate::transport::{TcpTransport, Transport};

/// Probes sent before the search is considered failed
pub const SEARCH_ATTEMPTS: u8 = 3;
/// Delay between version probes
pub const SEARCH_RETRY: Duration = Duration::from_secs(1);
/// Overall search timeout
pub const SEARCH_TIMEOUT: Duration = Duration::from_secs(20);
/// Retry interval after losing a found gateway
pub const RECONNECT_INTERVAL: Duration = Duration::from_secs(30);
/// How long one poll waits for incoming data
const POLL_WAIT: Duration = Duration::from_millis(50);

/// Domestic hot water mode as accepted by the `HW` command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DhwMode {
    Off,
    On,
    Thermostat,
}

impl DhwMode {
    pub fn as_code(&self) -> char {
        match self {
            DhwMode::Off => '0',
            DhwMode::On => '1',
            DhwMode::Thermostat => 'A',
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "0" => Some(DhwMode::Off),
            "1" => Some(DhwMode::On),
            "A" => Some(DhwMode::Thermostat),
            _ => None,
        }
    }
}

/// A discoverable variable, from the message table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariableInfo {
    pub name: &'static str,
    pub label: &'static str,
    pub sensor: Option<SensorKind>,
}

/// Stateful client for one OpenTherm Gateway
pub struct OtgwClient {
    ip: String,
    port: u16,
    transport: Option<Box<dyn Transport>>,
    bus: EventBus,
    values: VariableStore,
    config: ConfigStore,
    queue: CommandQueue,
    /// Data IDs the boiler or thermostat has acknowledged
    supported: HashSet<u8>,
    table: ConfigTable,
    fw_major: u8,
    version: String,
    found: bool,
    gateway_mode: bool,
    awaiting_free_form: bool,
    float_digits: Option<u32>,
    status: StatusFlags,
    faults: FaultFlags,
    search_count: u8,
    search_retry_at: Option<Instant>,
    search_deadline: Option<Instant>,
    reconnect_at: Option<Instant>,
}

impl OtgwClient {
    pub fn new() -> Self {
        OtgwClient {
            ip: String::new(),
            port: 0,
            transport: None,
            bus: EventBus::new(),
            values: VariableStore::new(),
            config: ConfigStore::new(),
            queue: CommandQueue::new(),
            supported: HashSet::new(),
            table: ConfigTable::for_firmware(3),
            fw_major: 3,
            version: String::new(),
            found: false,
            gateway_mode: false,
            awaiting_free_form: false,
            float_digits: Some(codec::DEFAULT_FLOAT_DIGITS),
            status: StatusFlags::empty(),
            faults: FaultFlags::empty(),
            search_count: 0,
            search_retry_at: None,
            search_deadline: None,
            reconnect_at: None,
        }
    }

    // ---- observers ----

    /// Receive every engine event
    pub fn subscribe(&mut self) -> Receiver<Event> {
        self.bus.subscribe()
    }

    /// Receive updates for one variable by name
    pub fn watch_variable(&mut self, name: &str) -> Receiver<Value> {
        self.bus.watch(name)
    }

    pub fn unwatch_variable(&mut self, name: &str) {
        self.bus.unwatch(name);
    }

    // ---- connection management ----

    /// Connect to a gateway and start the search. Returns false when the
    /// TCP connection itself failed; the search outcome arrives as an
    /// [`Event::Found`].
    pub fn open_port(&mut self, ip: &str, port: u16) -> bool {
        self.ip = ip.to_string();
        self.port = port;
        if self.found {
            self.found = false;
            self.bus.emit(Event::Unavailable);
            if self.reconnect_at.is_none() {
                self.reconnect_at = Some(Instant::now() + RECONNECT_INTERVAL);
            }
        }
        self.transport = None;
        self.queue.fail_all(CommandError::NotConnected);
        self.search_retry_at = None;
        self.search_deadline = None;
        match TcpTransport::connect(ip, port) {
            Ok(transport) => {
                self.connect_transport(Box::new(transport));
                true
            }
            Err(e) => {
                log::warn!("connect to {ip}:{port} failed: {e}");
                self.emit_found(false);
                false
            }
        }
    }

    /// Attach an already established link and start the search. This is
    /// the seam [`open_port`](Self::open_port) goes through; it also
    /// serves bridges that are not plain TCP.
    pub fn connect_transport(&mut self, transport: Box<dyn Transport>) {
        self.transport = Some(transport);
        self.reconnect_at = None;
        self.search_count = 0;
        self.search_deadline = Some(Instant::now() + SEARCH_TIMEOUT);
        self.search_tick(Instant::now());
    }

    /// Drop the connection. Reconnection stops until the next
    /// [`open_port`](Self::open_port).
    pub fn close_port(&mut self) {
        self.transport = None;
        self.reconnect_at = None;
        self.search_retry_at = None;
        self.search_deadline = None;
        self.queue.fail_all(CommandError::NotConnected);
        if self.found {
            self.found = false;
            self.bus.emit(Event::Unavailable);
        }
    }

    /// Whether a gateway has been found and identified
    pub fn is_found(&self) -> bool {
        self.found
    }

    /// Drive the engine: drain incoming lines, then run the timers
    pub fn poll(&mut self) {
        loop {
            let result = match self.transport.as_mut() {
                Some(transport) => transport.poll_line(POLL_WAIT),
                None => break,
            };
            match result {
                Ok(Some(line)) => self.process_line(&line),
                Ok(None) => break,
                Err(e) => {
                    log::warn!("link error: {e}");
                    self.handle_link_error();
                    break;
                }
            }
        }
        self.tick(Instant::now());
    }

    fn tick(&mut self, now: Instant) {
        // The deadline only survives on a link that has produced no data
        // at all; the probe cycle has already reported the failed search
        if let Some(deadline) = self.search_deadline {
            if now >= deadline {
                log::info!("no data from {}:{} since connecting", self.ip, self.port);
                self.search_deadline = None;
                self.search_retry_at = None;
                self.transport = None;
                self.queue.fail_all(CommandError::NotConnected);
            }
        }
        if let Some(at) = self.search_retry_at {
            if now >= at {
                self.search_retry_at = None;
                self.search_tick(now);
            }
        }
        if let Some(at) = self.reconnect_at {
            if now >= at {
                self.reconnect_at = Some(now + RECONNECT_INTERVAL);
                let ip = self.ip.clone();
                let port = self.port;
                self.open_port(&ip, port);
            }
        }
        self.sweep_queue();
    }

    /// Send the next version probe, or report the failed search once the
    /// attempts are exhausted. The link stays up: a slow gateway can still
    /// be recognized by a late version banner.
    fn search_tick(&mut self, now: Instant) {
        if self.found {
            return;
        }
        if self.search_count >= SEARCH_ATTEMPTS {
            log::info!("no gateway answered at {}:{}", self.ip, self.port);
            self.emit_found(false);
            return;
        }
        self.search_count += 1;
        log::debug!("probing for gateway, attempt {}", self.search_count);
        if self.send_raw("PR=A").is_err() {
            self.handle_link_error();
            return;
        }
        self.search_retry_at = Some(now + SEARCH_RETRY);
    }

    fn handle_link_error(&mut self) {
        self.transport = None;
        self.queue.fail_all(CommandError::NotConnected);
        self.search_retry_at = None;
        self.search_deadline = None;
        if self.found {
            // Reconnect right away; open_port arms the retry interval
            let ip = self.ip.clone();
            let port = self.port;
            self.open_port(&ip, port);
        } else {
            self.emit_found(false);
        }
    }

    fn emit_found(&mut self, found: bool) {
        self.bus.emit(Event::Found {
            found,
            ip: self.ip.clone(),
            port: self.port,
            version: self.version.clone(),
        });
    }

    // ---- commands ----

    /// Send a command line, tracking it until the expected response
    /// arrives. Without an explicit expectation the command's echo is
    /// derived from the firmware generation.
    pub fn write_command(
        &mut self,
        cmd: &str,
        expect: Option<Expectation>,
    ) -> Result<CommandHandle, CommandError> {
        if self.transport.is_none() {
            return Err(CommandError::NotConnected);
        }
        let expect = expect.unwrap_or_else(|| Expectation::Literal(self.expected_echo(cmd)));
        if self.send_raw(cmd).is_err() {
            self.handle_link_error();
            return Err(CommandError::NotConnected);
        }
        Ok(self.queue.push(cmd.to_string(), expect, Instant::now()))
    }

    /// Send a free-form command after checking it against the command
    /// whitelist. The next non-frame line the gateway sends is emitted as
    /// an [`Event::Response`].
    pub fn send_command(&mut self, cmd: &str) -> Result<CommandHandle, CommandError> {
        let prefix = cmd.get(..2).unwrap_or("");
        if cmd.as_bytes().get(2) != Some(&b'=') || !config::COMMANDS.contains(&prefix) {
            return Err(CommandError::InvalidCommand(cmd.to_string()));
        }
        if self.transport.is_none() {
            return Err(CommandError::NotConnected);
        }
        if self.send_raw(cmd).is_err() {
            self.handle_link_error();
            return Err(CommandError::NotConnected);
        }
        self.awaiting_free_form = true;
        Ok(CommandHandle::resolved())
    }

    /// Echo the gateway sends back for a command. Firmware 4 repeats the
    /// command with `=` turned into `: ` and commas into slashes, older
    /// firmware answers `OK`.
    fn expected_echo(&self, cmd: &str) -> String {
        if self.fw_major >= 4 {
            cmd.replacen('=', ": ", 1).replace(',', "/")
        } else {
            "OK".to_string()
        }
    }

    fn send_raw(&mut self, line: &str) -> Result<(), CommandError> {
        match self.transport.as_mut() {
            Some(transport) => transport.send_line(line).map_err(|e| {
                log::warn!("send failed: {e}");
                CommandError::NotConnected
            }),
            None => Err(CommandError::NotConnected),
        }
    }

    fn sweep_queue(&mut self) {
        let transport = &mut self.transport;
        self.queue.sweep(Instant::now(), |cmd| {
            if let Some(t) = transport.as_mut() {
                if let Err(e) = t.send_line(cmd) {
                    log::warn!("resend failed: {e}");
                }
            }
        });
    }

    // ---- line processing ----

    fn process_line(&mut self, line: &str) {
        log::trace!("<- {line}");
        // Any inbound data proves the link is alive
        self.search_deadline = None;
        if let Ok(frame) = OtFrame::parse(line) {
            self.process_frame(&frame);
        } else if self.awaiting_free_form {
            self.awaiting_free_form = false;
            let parsed = parse_response_value(line);
            self.bus.emit(Event::Response {
                raw: line.to_string(),
                parsed,
            });
        } else if !line.is_empty() {
            self.match_response(line);
        }
        self.sweep_queue();
    }

    fn process_frame(&mut self, frame: &OtFrame) {
        let Some(def) = messages::lookup(frame.data_id) else {
            log::debug!("unknown data id {} in {}", frame.data_id, frame.encode());
            return;
        };
        let override_src = frame.initiator.is_override();
        // An acknowledgement straight from the boiler or thermostat marks
        // the data ID as supported, including for this frame's own
        // validity decision
        if !override_src && matches!(frame.msg_type, MsgType::ReadAck | MsgType::WriteAck) {
            self.supported.insert(frame.data_id);
        }
        let supported = self.supported.contains(&frame.data_id);
        let valid = match frame.msg_type {
            MsgType::ReadAck => (override_src && !supported) || (!override_src && supported),
            MsgType::WriteData => true,
            MsgType::DataInvalid => override_src,
            _ => false,
        };
        if !valid {
            return;
        }

        if let Some(flag_defs) = def.flags {
            let word = frame.data_word();
            match frame.data_id {
                0 => self.status = StatusFlags::from_bits_truncate(word),
                5 => self.faults = FaultFlags::from_bits_truncate(word),
                _ => {}
            }
            for flag in flag_defs {
                if let Some(name) = flag.variable {
                    self.set_value(name, Value::Bool(word & flag.mask != 0), false);
                }
            }
        }

        match def.variable {
            VariableSlot::Whole(name) => {
                if let PayloadFormat::Single(format) = def.payload {
                    let value = codec::decode(
                        frame.data[0],
                        format,
                        Some(frame.data[1]),
                        self.float_digits,
                    );
                    self.set_value(name, value, false);
                }
            }
            VariableSlot::Split { hb, lb } => {
                if let PayloadFormat::Split { hb: hf, lb: lf } = def.payload {
                    if let Some(name) = hb {
                        let value = codec::decode(frame.data[0], hf, None, self.float_digits);
                        self.set_value(name, value, false);
                    }
                    if let Some(name) = lb {
                        let value = codec::decode(frame.data[1], lf, None, self.float_digits);
                        self.set_value(name, value, false);
                    }
                }
            }
            VariableSlot::None => {}
        }
    }

    /// Store a variable and notify observers when it changed
    pub fn set_value(&mut self, name: &str, value: Value, forced: bool) {
        if self.values.set(name, value.clone(), forced) {
            log::debug!("{name} = {value}");
            self.bus.emit_variable(name, &value);
        }
    }

    /// Match a non-frame line against the pending commands, then against
    /// the version banner and unsolicited setting updates
    fn match_response(&mut self, line: &str) {
        let mut matched = None;
        'queue: for (idx, cmd) in self.queue.iter().enumerate() {
            match &cmd.expect {
                Expectation::Literal(prefix) => {
                    if line.starts_with(prefix.as_str()) {
                        matched = Some((idx, None));
                        break;
                    }
                }
                Expectation::Config(id) => {
                    let Some(entry) = self.table.get(*id) else { continue };
                    let Some(caps) = entry.pattern.captures(line) else { continue };
                    let Some(m) = caps.get(1) else { continue };
                    let raw = m.as_str();
                    let value = match entry.spec.value_map {
                        Some(map) => match map.iter().find(|(from, _)| *from == raw) {
                            Some((_, to)) => (*to).to_string(),
                            None => continue 'queue,
                        },
                        None => raw.to_string(),
                    };
                    matched = Some((idx, Some((*id, value))));
                    break;
                }
            }
        }

        if let Some((idx, config)) = matched {
            self.queue.complete(idx, Ok(()));
            if let Some((id, value)) = config {
                self.add_config(id, value, line);
            }
            return;
        }

        // The version banner may arrive without a pending request, at
        // connect or after a gateway reset
        if let Some(version) = self.capture_version(line) {
            self.add_config(ConfigId::Version, version, line);
            return;
        }
        // Settings changed over another connection come in as
        // `CODE: value` lines
        if let Some((code, rest)) = line.split_once(':') {
            let value = rest.trim();
            if let Some(id) = config::setting_update(code) {
                let known = self.table.get(id).is_some_and(|entry| {
                    entry
                        .spec
                        .values
                        .is_none_or(|values| values.iter().any(|(raw, _)| *raw == value))
                });
                if known {
                    self.add_config(id, value.to_string(), line);
                    return;
                }
            }
        }
        log::trace!("unmatched line: {line}");
    }

    fn capture_version(&self, line: &str) -> Option<String> {
        let entry = self.table.get(ConfigId::Version)?;
        let caps = entry.pattern.captures(line)?;
        Some(caps.get(1)?.as_str().to_string())
    }

    /// Record a configuration value, fanning multi-slot items out into one
    /// entry per slot
    fn add_config(&mut self, id: ConfigId, value: String, source: &str) {
        let Some(entry) = self.table.get(id) else { return };
        let spec = entry.spec;
        let mut changed = false;
        if spec.slots > 1 {
            for (slot, c) in value.chars().take(spec.slots).enumerate() {
                let slot_value = c.to_string();
                let letter = (b'A' + slot as u8) as char;
                let text = config::value_text(spec.values, &slot_value)
                    .unwrap_or_else(|| slot_value.clone());
                changed |= self.config.set(
                    &format!("{}{}", spec.variable, slot),
                    ConfigEntry {
                        id,
                        label: spec.label.replace("<A>", &letter.to_string()),
                        value: slot_value,
                        text_value: text,
                        modifiable: spec.write_cmd.is_some(),
                        source: source.to_string(),
                    },
                );
            }
        } else {
            let text = config::value_text(spec.values, &value).unwrap_or_else(|| value.clone());
            changed |= self.config.set(
                spec.variable,
                ConfigEntry {
                    id,
                    label: spec.label.to_string(),
                    value: value.clone(),
                    text_value: text,
                    modifiable: spec.write_cmd.is_some(),
                    source: source.to_string(),
                },
            );
        }
        if changed {
            log::info!("{} = {}", spec.variable, value);
            self.bus.emit(Event::Config(self.config.snapshot()));
            self.bus.emit(Event::Setting {
                id,
                value: value.clone(),
            });
        }
        self.on_setting(id, &value);
    }

    /// Settings the engine itself reacts to
    fn on_setting(&mut self, id: ConfigId, value: &str) {
        match id {
            ConfigId::Version => {
                self.version = value.to_string();
                if let Some(major) = value.chars().find_map(|c| c.to_digit(10)) {
                    self.fw_major = major as u8;
                }
                self.table = ConfigTable::for_firmware(self.fw_major);
                if !self.found {
                    self.found = true;
                    self.search_retry_at = None;
                    self.search_deadline = None;
                    log::info!(
                        "found OpenTherm Gateway {} at {}:{}",
                        self.version,
                        self.ip,
                        self.port
                    );
                    self.emit_found(true);
                    self.bus.emit(Event::Available);
                    // Raw report mode, then read back every setting
                    let _ = self.send_raw("PS=0");
                    self.request_settings();
                }
            }
            ConfigId::Mode => {
                self.gateway_mode = value == "1";
            }
            _ => {}
        }
    }

    fn request_settings(&mut self) {
        let reads: Vec<(ConfigId, char)> = config::STARTUP
            .iter()
            .filter_map(|id| {
                self.table
                    .get(*id)
                    .and_then(|entry| entry.spec.read_code.map(|code| (*id, code)))
            })
            .collect();
        for (id, code) in reads {
            let _ = self.write_command(&format!("PR={code}"), Some(Expectation::Config(id)));
        }
    }

    // ---- gateway configuration ----

    /// Current configuration, keyed by variable name
    pub fn gateway_config(&self) -> HashMap<String, ConfigEntry> {
        self.config.snapshot()
    }

    /// Apply configuration changes. Items that are unknown, unmodifiable
    /// or already at the requested value are skipped. Each change is
    /// written and then read back; the returned handles track the
    /// read-backs.
    pub fn set_gateway_config(
        &mut self,
        updates: &HashMap<String, String>,
    ) -> Result<Vec<CommandHandle>, CommandError> {
        if self.transport.is_none() {
            return Err(CommandError::NotConnected);
        }
        let mut work = Vec::new();
        for (name, value) in updates {
            let Some(current) = self.config.get(name) else { continue };
            if !current.modifiable || current.value == *value {
                continue;
            }
            let Some(entry) = self.table.get(current.id) else { continue };
            let spec = entry.spec;
            let Some(write_cmd) = spec.write_cmd else { continue };
            let cmd = if spec.slots > 1 {
                let slot: usize = name
                    .strip_prefix(spec.variable)
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(0);
                let letter = (b'A' + slot as u8) as char;
                format!("{}={}", write_cmd.replace("<A>", &letter.to_string()), value)
            } else {
                format!("{write_cmd}={value}")
            };
            work.push((cmd, spec.read_code, current.id));
        }
        let mut handles = Vec::new();
        for (cmd, read_code, id) in work {
            self.write_command(&cmd, None)?;
            if let Some(code) = read_code {
                handles.push(
                    self.write_command(&format!("PR={code}"), Some(Expectation::Config(id)))?,
                );
            }
        }
        Ok(handles)
    }

    /// Whether the gateway is in gateway (not monitor) mode
    pub fn gateway_mode(&self) -> bool {
        self.gateway_mode
    }

    pub fn set_gateway_mode(&mut self, enabled: bool) -> Result<CommandHandle, CommandError> {
        self.write_command(&format!("GW={}", if enabled { '1' } else { '0' }), None)?;
        self.read_back(ConfigId::Mode)
    }

    fn read_back(&mut self, id: ConfigId) -> Result<CommandHandle, CommandError> {
        match self.table.get(id).and_then(|entry| entry.spec.read_code) {
            Some(code) => self.write_command(&format!("PR={code}"), Some(Expectation::Config(id))),
            None => Ok(CommandHandle::resolved()),
        }
    }

    // ---- thermostat and boiler operations ----

    /// Override the room setpoint, either until the next schedule change
    /// or permanently. Requires gateway mode.
    pub fn set_thermostat_target_temp(
        &mut self,
        temp: f64,
        permanent: bool,
    ) -> Result<CommandHandle, CommandError> {
        if !self.gateway_mode {
            return Err(CommandError::NotGatewayMode);
        }
        let code = if permanent { "TC" } else { "TT" };
        self.write_command(&format!("{code}={temp:.2}"), None)
    }

    /// Cancel the room setpoint override
    pub fn set_thermostat_auto(&mut self) -> Result<CommandHandle, CommandError> {
        if !self.gateway_mode {
            return Err(CommandError::NotGatewayMode);
        }
        self.write_command("TT=0", None)
    }

    /// Whether a remote setpoint override is in effect
    pub fn thermostat_override_active(&self) -> bool {
        self.values
            .get("RemoteOverrideRoomSetpoint")
            .and_then(|v| v.as_f64())
            .is_some_and(|v| v != 0.0)
    }

    /// Push the wall clock to the thermostat. Firmware 4 also takes the
    /// date and year. Requires gateway mode.
    pub fn set_thermostat_clock(
        &mut self,
        time: Option<DateTime<Local>>,
    ) -> Result<(), CommandError> {
        if !self.gateway_mode {
            return Err(CommandError::NotGatewayMode);
        }
        let time = time.unwrap_or_else(Local::now);
        if self.fw_major >= 4 {
            self.write_command(&format!("SR=21:{},{}", time.month(), time.day()), None)?;
            let year = time.year() as u32;
            self.write_command(&format!("SR=22:{},{}", year / 256, year % 256), None)?;
        }
        self.write_command(
            &format!(
                "SC={}:{:02}/{}",
                time.hour(),
                time.minute(),
                time.weekday().number_from_monday()
            ),
            None,
        )?;
        Ok(())
    }

    /// Feed an outside temperature to the thermostat. Requires gateway
    /// mode.
    pub fn set_outside_temperature(&mut self, temp: f64) -> Result<CommandHandle, CommandError> {
        if !self.gateway_mode {
            return Err(CommandError::NotGatewayMode);
        }
        self.write_command(&format!("OT={temp:.2}"), None)
    }

    /// Report a room humidity reading (data ID 78). Requires gateway mode.
    pub fn set_room_humidity(&mut self, humidity: u8) -> Result<CommandHandle, CommandError> {
        if !self.gateway_mode {
            return Err(CommandError::NotGatewayMode);
        }
        self.write_command(&format!("SR=78:{humidity},0"), None)
    }

    /// Override the boiler's domestic hot water setting. The store updates
    /// when the read-back confirms the change.
    pub fn set_boiler_hot_water(&mut self, mode: DhwMode) -> Result<CommandHandle, CommandError> {
        self.write_command(&format!("HW={}", mode.as_code()), None)?;
        self.read_back(ConfigId::DhwSetting)
    }

    pub fn boiler_hot_water(&self) -> Option<DhwMode> {
        self.config
            .get("DHWSetting")
            .and_then(|entry| DhwMode::from_code(&entry.value))
    }

    // ---- state queries ----

    /// Last decoded value of a variable
    pub fn value(&self, name: &str) -> Option<Value> {
        self.values.get(name).cloned()
    }

    /// All decoded variables
    pub fn variables(&self) -> HashMap<String, Value> {
        self.values.snapshot()
    }

    /// Current boiler/thermostat status word
    pub fn boiler_state(&self) -> StatusFlags {
        self.status
    }

    /// Current application-specific fault word
    pub fn fault_state(&self) -> FaultFlags {
        self.faults
    }

    /// Firmware version string as reported, empty before the gateway is
    /// found
    pub fn firmware_version(&self) -> &str {
        &self.version
    }

    /// Sensor-bearing variables that have reported a value,
    /// optionally filtered by kind
    pub fn available_sensors(&self, kind: Option<SensorKind>) -> Vec<VariableInfo> {
        let mut out = Vec::new();
        for def in messages::MESSAGES {
            if !self.supported.contains(&def.id) {
                continue;
            }
            let Some(sensor) = def.sensor else { continue };
            if kind.is_some() && kind != Some(sensor) {
                continue;
            }
            push_variables(&mut out, def.variable, def.label, Some(sensor));
        }
        // Support alone is not enough; a sensor needs an actual reading
        out.retain(|info| self.values.get(info.name).is_some());
        out
    }

    /// Every variable the boiler has shown support for
    pub fn available_variables(&self) -> Vec<VariableInfo> {
        let mut out = Vec::new();
        for def in messages::MESSAGES {
            if !self.supported.contains(&def.id) {
                continue;
            }
            push_variables(&mut out, def.variable, def.label, def.sensor);
        }
        out
    }

    /// Boolean flag variables of supported flag-bearing messages
    pub fn flag_variables(&self) -> Vec<VariableInfo> {
        let mut out = Vec::new();
        for def in messages::MESSAGES {
            if !self.supported.contains(&def.id) {
                continue;
            }
            let Some(flags) = def.flags else { continue };
            for flag in flags {
                if let Some(name) = flag.variable {
                    out.push(VariableInfo {
                        name,
                        label: flag.label,
                        sensor: None,
                    });
                }
            }
        }
        out
    }

    /// Whether a second heating circuit has been seen (data ID 23)
    pub fn supports_heating2(&self) -> bool {
        self.supported.contains(&23)
    }

    /// Decimal places for f8.8 values, `None` for full precision
    pub fn set_float_digits(&mut self, digits: Option<u32>) {
        self.float_digits = digits;
    }
}

impl Default for OtgwClient {
    fn default() -> Self {
        Self::new()
    }
}

fn push_variables(
    out: &mut Vec<VariableInfo>,
    slot: VariableSlot,
    label: &'static str,
    sensor: Option<SensorKind>,
) {
    match slot {
        VariableSlot::Whole(name) => out.push(VariableInfo { name, label, sensor }),
        VariableSlot::Split { hb, lb } => {
            for name in [hb, lb].into_iter().flatten() {
                out.push(VariableInfo { name, label, sensor });
            }
        }
        VariableSlot::None => {}
    }
}

/// Value part of a free-form command response: after the `=` when present,
/// otherwise after the `XX: ` echo prefix
fn parse_response_value(line: &str) -> Value {
    let raw = match line.split_once('=') {
        Some((_, rest)) => rest.trim(),
        None => line.get(4..).unwrap_or("").trim(),
    };
    match raw.parse::<f64>() {
        Ok(n) => Value::Number(n),
        Err(_) => Value::Text(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{MAX_RESENDS, RESEND_AFTER};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    #[derive(Default, Clone)]
    struct MockTransport {
        incoming: Arc<Mutex<VecDeque<String>>>,
        sent: Arc<Mutex<Vec<String>>>,
    }

    impl MockTransport {
        fn new() -> Self {
            Self::default()
        }

        fn push_line(&self, line: &str) {
            self.incoming.lock().unwrap().push_back(line.to_string());
        }

        fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }

        fn clear_sent(&self) {
            self.sent.lock().unwrap().clear();
        }
    }

    impl Transport for MockTransport {
        fn send_line(&mut self, line: &str) -> crate::transport::Result<()> {
            self.sent.lock().unwrap().push(line.to_string());
            Ok(())
        }

        fn poll_line(&mut self, _wait: Duration) -> crate::transport::Result<Option<String>> {
            Ok(self.incoming.lock().unwrap().pop_front())
        }

        fn peer(&self) -> String {
            "mock".into()
        }
    }

    /// Client that has completed the search against firmware 4.2.5 and
    /// received answers to all startup setting reads
    fn connected_fw4() -> (OtgwClient, MockTransport) {
        let mock = MockTransport::new();
        let mut client = OtgwClient::new();
        client.connect_transport(Box::new(mock.clone()));
        mock.push_line("PR: A=OpenTherm Gateway 4.2.5");
        // Answers in request order; the two T reports serve the transition
        // and override items
        for line in [
            "PR: M=M",
            "PR: L=FXWCEM",
            "PR: T=00",
            "PR: T=00",
            "PR: V=3",
            "PR: S=16.0",
            "PR: W=0",
            "PR: G=00",
            "PR: P=L",
        ] {
            mock.push_line(line);
        }
        client.poll();
        assert!(client.queue.is_empty());
        mock.clear_sent();
        (client, mock)
    }

    #[test]
    fn test_search_identifies_gateway() {
        let mock = MockTransport::new();
        let mut client = OtgwClient::new();
        let events = client.subscribe();
        client.connect_transport(Box::new(mock.clone()));
        assert_eq!(mock.sent(), vec!["PR=A".to_string()]);

        mock.push_line("PR: A=OpenTherm Gateway 4.2.5");
        client.poll();

        assert!(client.is_found());
        assert_eq!(client.firmware_version(), "4.2.5");
        // Raw report mode plus the startup setting reads
        let sent = mock.sent();
        assert!(sent.contains(&"PS=0".to_string()));
        assert!(sent.contains(&"PR=M".to_string()));
        assert!(sent.contains(&"PR=W".to_string()));

        let mut saw_found = false;
        let mut saw_available = false;
        while let Ok(event) = events.try_recv() {
            match event {
                Event::Found { found: true, ref version, .. } => {
                    assert_eq!(version, "4.2.5");
                    saw_found = true;
                }
                Event::Available => saw_available = true,
                _ => {}
            }
        }
        assert!(saw_found);
        assert!(saw_available);
    }

    #[test]
    fn test_search_gives_up_after_three_probes() {
        let mock = MockTransport::new();
        let mut client = OtgwClient::new();
        let events = client.subscribe();
        client.connect_transport(Box::new(mock.clone()));

        // Two more probes, one second apart
        for attempt in 2..=3 {
            client.search_retry_at = Some(Instant::now() - Duration::from_millis(1));
            client.poll();
            assert_eq!(client.search_count, attempt);
        }
        assert_eq!(mock.sent(), vec!["PR=A".to_string(); 3]);

        // The retry after the third unanswered probe reports the failure
        // but keeps the link up
        client.search_retry_at = Some(Instant::now() - Duration::from_millis(1));
        client.poll();
        assert!(!client.is_found());
        assert!(client.transport.is_some());
        let mut saw_not_found = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, Event::Found { found: false, .. }) {
                saw_not_found = true;
            }
        }
        assert!(saw_not_found);

        // A link that never produced any data is torn down at the deadline
        client.search_deadline = Some(Instant::now() - Duration::from_millis(1));
        client.poll();
        assert!(client.transport.is_none());
    }

    #[test]
    fn test_incoming_line_clears_search_deadline() {
        let mock = MockTransport::new();
        let mut client = OtgwClient::new();
        client.connect_transport(Box::new(mock.clone()));
        assert!(client.search_deadline.is_some());

        // Relayed OpenTherm traffic proves the link is alive even before
        // the version banner arrives
        mock.push_line("T10014000");
        client.poll();
        assert!(client.search_deadline.is_none());
        assert!(client.transport.is_some());

        // A late banner still completes the search
        mock.push_line("PR: A=OpenTherm Gateway 4.2.5");
        client.poll();
        assert!(client.is_found());
        assert!(client.transport.is_some());
    }

    #[test]
    fn test_frame_updates_variable_and_watchers() {
        let (mut client, mock) = connected_fw4();
        let watcher = client.watch_variable("BoilerWaterTemperature");

        mock.push_line("B40194000");
        client.poll();

        assert_eq!(
            client.value("BoilerWaterTemperature"),
            Some(Value::Number(64.0))
        );
        assert_eq!(watcher.try_recv(), Ok(Value::Number(64.0)));
        assert!(client
            .available_sensors(Some(SensorKind::Temperature))
            .iter()
            .any(|info| info.name == "BoilerWaterTemperature"));
    }

    #[test]
    fn test_available_sensors_require_reported_value() {
        let (mut client, mock) = connected_fw4();

        // A write acknowledgement marks the ID as supported but carries
        // no reading to store
        mock.push_line("B50010000");
        client.poll();
        assert!(client.supported.contains(&1));
        assert!(!client
            .available_sensors(Some(SensorKind::Temperature))
            .iter()
            .any(|info| info.name == "ControlSetpoint"));

        // The thermostat write that follows supplies the value
        mock.push_line("T10014000");
        client.poll();
        assert!(client
            .available_sensors(Some(SensorKind::Temperature))
            .iter()
            .any(|info| info.name == "ControlSetpoint"));
    }

    #[test]
    fn test_answer_line_decodes_end_to_end() {
        let (mut client, mock) = connected_fw4();
        let events = client.subscribe();
        let watcher = client.watch_variable("BoilerWaterTemperature");

        // An injected answer for a data ID the boiler never acknowledged:
        // f8.8 payload 0x40 0x64 is 64 + 100/256, rounded to 64.39
        mock.push_line("A40194064");
        client.poll();

        assert_eq!(
            client.value("BoilerWaterTemperature"),
            Some(Value::Number(64.39))
        );
        assert_eq!(watcher.try_recv(), Ok(Value::Number(64.39)));
        let mut saw_update = false;
        while let Ok(event) = events.try_recv() {
            if let Event::Variable { name, value } = event {
                if name == "BoilerWaterTemperature" {
                    assert_eq!(value, Value::Number(64.39));
                    saw_update = true;
                }
            }
        }
        assert!(saw_update);
    }

    #[test]
    fn test_override_answer_ignored_for_supported_id() {
        let (mut client, mock) = connected_fw4();
        mock.push_line("B40194000");
        client.poll();
        assert_eq!(
            client.value("BoilerWaterTemperature"),
            Some(Value::Number(64.0))
        );

        // The boiler answered for this id already; a gateway-substituted
        // answer must not overwrite it
        mock.push_line("A40194233");
        client.poll();
        assert_eq!(
            client.value("BoilerWaterTemperature"),
            Some(Value::Number(64.0))
        );
    }

    #[test]
    fn test_override_answer_accepted_for_unsupported_id() {
        let (mut client, mock) = connected_fw4();
        mock.push_line("A40194233");
        client.poll();
        assert_eq!(
            client.value("BoilerWaterTemperature"),
            Some(Value::Number(66.2))
        );
    }

    #[test]
    fn test_status_flags_decoded() {
        let (mut client, mock) = connected_fw4();
        mock.push_line("B4000030A");
        client.poll();

        assert!(client.boiler_state().contains(StatusFlags::FLAME));
        assert!(client.boiler_state().contains(StatusFlags::CH_ENABLED));
        assert_eq!(client.value("StatusFlame"), Some(Value::Bool(true)));
        assert_eq!(client.value("StatusFault"), Some(Value::Bool(false)));
        assert!(client
            .flag_variables()
            .iter()
            .any(|info| info.name == "StatusDHWMode"));
    }

    #[test]
    fn test_data_invalid_from_gateway_carries_fault() {
        let (mut client, mock) = connected_fw4();
        mock.push_line("A60000001");
        client.poll();
        assert!(client.boiler_state().contains(StatusFlags::FAULT));
        assert_eq!(client.value("StatusFault"), Some(Value::Bool(true)));
    }

    #[test]
    fn test_command_echo_completes_handle() {
        let (mut client, mock) = connected_fw4();
        let handle = client.write_command("GW=1", None).unwrap();
        assert_eq!(mock.sent(), vec!["GW=1".to_string()]);
        assert!(handle.try_result().is_none());

        mock.push_line("GW: 1");
        client.poll();
        assert_eq!(handle.try_result(), Some(Ok(())));
    }

    #[test]
    fn test_unacknowledged_command_is_resent_then_dropped() {
        let (mut client, mock) = connected_fw4();
        let handle = client.write_command("GW=1", None).unwrap();
        mock.clear_sent();

        let overdue = Instant::now() - RESEND_AFTER - Duration::from_secs(1);
        client.queue.pending.last_mut().unwrap().sent_at = overdue;
        client.poll();
        assert_eq!(mock.sent(), vec!["GW=1".to_string()]);
        assert!(handle.try_result().is_none());

        let last = client.queue.pending.last_mut().unwrap();
        last.sent_at = overdue;
        last.resends = MAX_RESENDS;
        client.poll();
        assert_eq!(
            handle.try_result(),
            Some(Err(CommandError::NotAcknowledged))
        );
    }

    #[test]
    fn test_gateway_mode_gates_thermostat_commands() {
        let (mut client, mock) = connected_fw4();
        assert_eq!(
            client.set_thermostat_target_temp(21.5, false).unwrap_err(),
            CommandError::NotGatewayMode
        );

        // The gateway reports a mode change made over another connection
        mock.push_line("GW: 1");
        client.poll();
        assert!(client.gateway_mode());
        mock.clear_sent();
        client.set_thermostat_target_temp(21.5, false).unwrap();
        assert_eq!(mock.sent(), vec!["TT=21.50".to_string()]);
    }

    #[test]
    fn test_hot_water_updates_on_read_back() {
        let (mut client, mock) = connected_fw4();
        let handle = client.set_boiler_hot_water(DhwMode::On).unwrap();
        assert_eq!(mock.sent(), vec!["HW=1".to_string(), "PR=W".to_string()]);
        // The store holds the startup value until the read-back confirms
        assert_eq!(client.boiler_hot_water(), Some(DhwMode::Off));

        mock.push_line("HW: 1"); // echo
        mock.push_line("PR: W=1"); // read-back
        client.poll();
        assert_eq!(client.boiler_hot_water(), Some(DhwMode::On));
        assert_eq!(handle.try_result(), Some(Ok(())));
    }

    #[test]
    fn test_unsolicited_setting_update() {
        let (mut client, mock) = connected_fw4();
        let events = client.subscribe();
        mock.push_line("HW: A");
        client.poll();

        assert_eq!(client.boiler_hot_water(), Some(DhwMode::Thermostat));
        let config = client.gateway_config();
        assert_eq!(config["DHWSetting"].value, "A");
        assert_eq!(config["DHWSetting"].text_value, "Thermostat controlled");
        let mut saw_setting = false;
        while let Ok(event) = events.try_recv() {
            if let Event::Setting { id, value } = event {
                assert_eq!(id, ConfigId::DhwSetting);
                assert_eq!(value, "A");
                saw_setting = true;
            }
        }
        assert!(saw_setting);
    }

    #[test]
    fn test_led_functions_fan_out_per_slot() {
        let (client, _mock) = connected_fw4();
        let config = client.gateway_config();
        assert_eq!(config["LedFunction0"].value, "F");
        assert_eq!(config["LedFunction0"].label, "LED A function");
        assert_eq!(config["LedFunction0"].text_value, "Flame on");
        assert_eq!(config["LedFunction5"].value, "M");
        assert_eq!(config["LedFunction5"].label, "LED F function");
    }

    #[test]
    fn test_set_gateway_config_writes_and_reads_back() {
        let (mut client, mock) = connected_fw4();
        let mut updates = HashMap::new();
        updates.insert("LedFunction1".to_string(), "H".to_string());
        // Unchanged value is skipped
        updates.insert("LedFunction0".to_string(), "F".to_string());
        client.set_gateway_config(&updates).unwrap();
        assert_eq!(mock.sent(), vec!["LB=H".to_string(), "PR=L".to_string()]);
    }

    #[test]
    fn test_free_form_command() {
        let (mut client, mock) = connected_fw4();
        let events = client.subscribe();

        assert!(matches!(
            client.send_command("ZZ=1"),
            Err(CommandError::InvalidCommand(_))
        ));
        assert!(matches!(
            client.send_command("TT21"),
            Err(CommandError::InvalidCommand(_))
        ));

        let handle = client.send_command("TT=21.5").unwrap();
        assert_eq!(handle.try_result(), Some(Ok(())));
        mock.push_line("TT: 21.50");
        client.poll();

        let mut saw_response = false;
        while let Ok(event) = events.try_recv() {
            if let Event::Response { raw, parsed } = event {
                assert_eq!(raw, "TT: 21.50");
                assert_eq!(parsed, Value::Number(21.5));
                saw_response = true;
            }
        }
        assert!(saw_response);
    }

    #[test]
    fn test_thermostat_clock_fw4() {
        use chrono::TimeZone;
        let (mut client, mock) = connected_fw4();
        mock.push_line("GW: 1");
        client.poll();
        mock.clear_sent();

        // Wednesday 2026-08-26 14:05
        let time = Local.with_ymd_and_hms(2026, 8, 26, 14, 5, 0).unwrap();
        client.set_thermostat_clock(Some(time)).unwrap();
        assert_eq!(
            mock.sent(),
            vec![
                "SR=21:8,26".to_string(),
                "SR=22:7,234".to_string(),
                "SC=14:05/3".to_string(),
            ]
        );
    }

    #[test]
    fn test_commands_require_connection() {
        let mut client = OtgwClient::new();
        assert_eq!(
            client.write_command("GW=1", None).unwrap_err(),
            CommandError::NotConnected
        );
        assert_eq!(
            client.send_command("TT=20").unwrap_err(),
            CommandError::NotConnected
        );
    }

    #[test]
    fn test_close_port_fails_pending_commands() {
        let (mut client, _mock) = connected_fw4();
        let handle = client.write_command("GW=1", None).unwrap();
        client.close_port();
        assert_eq!(handle.try_result(), Some(Err(CommandError::NotConnected)));
        assert!(!client.is_found());
    }

    #[test]
    fn test_supports_heating2() {
        let (mut client, mock) = connected_fw4();
        assert!(!client.supports_heating2());
        mock.push_line("B40170000");
        client.poll();
        assert!(client.supports_heating2());
    }
}
