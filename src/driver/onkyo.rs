//! Onkyo AV receiver driver (ISCP over RS232)
//!
//! The receiver speaks Onkyo's ISCP text protocol: commands go out as
//! `!1<CMD><VALUE>\n` with the value in upper-case hex, responses and
//! unsolicited state changes come back as `!1<CMD><VALUE>` terminated by
//! 0x1A. The receiver echoes every accepted change, so confirmations always
//! come from the wire rather than from the set path.
//!
//! Enum features carry a dense 0-based index towards clients; the sparse
//! ISCP codes live only in the tables here. Volume is inverted on the wire
//! (`code = 82 - value`), hence the INVERSE flag on the feature.

use crate::config::ModuleConfig;
use crate::driver::{DeviceDriver, DriverEvent, EventSender};
use crate::error::{Error, Result};
use crate::model::device::Device;
use crate::model::feature::{Feature, FLAG_INVERSE, FLAG_POWER, FLAG_SLIDER};
use crate::model::id::{DeviceId, FeatureId};
use crate::model::module::Module;
use parking_lot::Mutex;
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const DEFAULT_BAUD: u32 = 9600;

/// ISCP end-of-message character on the receive side
const EOM: u8 = 0x1A;

/// How long a QSTN may stay unanswered before it is sent again. The receiver
/// silently drops requests while switching out of standby.
const PENDING_RETRY: Duration = Duration::from_secs(1);

// Command indices, 0-based; feature index on the device is command + 1.
const CMD_POWER: usize = 0;
const CMD_MUTE: usize = 1;
const CMD_INPUT: usize = 2;
const CMD_MODE: usize = 3;
const CMD_VOLUME: usize = 4;
const CMD_LATENIGHT: usize = 5;
const CMD_DIMMER: usize = 6;
const CMD_PRESET: usize = 7;
const NUM_COMMANDS: usize = 8;

const COMMAND_CODES: [&str; NUM_COMMANDS] =
    ["PWR", "AMT", "SLI", "LMD", "MVL", "LTN", "DIM", "PRS"];

/// AV inputs: enum label and ISCP selector code
const INPUTS: [(&str, u8); 11] = [
    ("DVD", 0x10),
    ("VCR/DVR", 0x00),
    ("CBL/SAT", 0x01),
    ("Game/TV", 0x02),
    ("Aux1", 0x03),
    ("Aux2", 0x04),
    ("Tape", 0x20),
    ("Tuner", 0x24),
    ("Tuner(AM)", 0x25),
    ("CD", 0x23),
    ("Phono", 0x22),
];

/// Listening modes: enum label and ISCP mode code
const MODES: [(&str, u8); 26] = [
    ("Pure Audio", 0x11),
    ("Direct", 0x01),
    ("Stereo", 0x00),
    ("Surround", 0x02),
    ("All Ch Stereo", 0x0C),
    ("Film", 0x03),
    ("THX", 0x04),
    ("Action", 0x05),
    ("Musical", 0x06),
    ("Mono Movie", 0x07),
    ("Orchestra", 0x08),
    ("Unplugged", 0x09),
    ("Studio Mix", 0x0A),
    ("TV Logic", 0x0B),
    ("Theater", 0x0D),
    ("Enhanced7", 0x0E),
    ("Mono", 0x0F),
    ("Full Mono", 0x13),
    ("PLII Movie", 0x80),
    ("PLII Music", 0x81),
    ("Neo6: Cinema", 0x82),
    ("Neo6: Music", 0x83),
    ("Neo THX Cinema", 0x84),
    ("PLII THX Cinema", 0x85),
    ("PLII Game", 0x86),
    ("Neural THX 5.1", 0x88),
];

/// Display dimmer levels: enum label and ISCP code
const DIMMERS: [(&str, u8); 4] = [
    ("Brightest", 0x00),
    ("Bright", 0x08),
    ("Dim", 0x01),
    ("Dark", 0x02),
];

fn enum_table(cmd: usize) -> Option<&'static [(&'static str, u8)]> {
    match cmd {
        CMD_INPUT => Some(&INPUTS),
        CMD_MODE => Some(&MODES),
        CMD_DIMMER => Some(&DIMMERS),
        _ => None,
    }
}

fn labels(table: &[(&'static str, u8)]) -> Vec<&'static str> {
    table.iter().map(|(label, _)| *label).collect()
}

/// Convert a feature value into its ISCP wire code
fn to_wire(cmd: usize, value: i32) -> Option<u8> {
    if let Some(table) = enum_table(cmd) {
        return table.get(usize::try_from(value).ok()?).map(|(_, code)| *code);
    }
    match cmd {
        CMD_POWER | CMD_MUTE if (0..=1).contains(&value) => Some(value as u8),
        // Main volume is inverted on the wire
        CMD_VOLUME if (0..=60).contains(&value) => Some((82 - value) as u8),
        CMD_LATENIGHT if (0..=2).contains(&value) => Some(value as u8),
        CMD_PRESET if (0..=30).contains(&value) => Some(value as u8),
        _ => None,
    }
}

/// Convert an ISCP wire code into a feature value
fn from_wire(cmd: usize, code: u8) -> Option<i32> {
    if let Some(table) = enum_table(cmd) {
        return table
            .iter()
            .position(|(_, c)| *c == code)
            .map(|index| index as i32);
    }
    let value = match cmd {
        CMD_VOLUME => 82 - code as i32,
        _ => code as i32,
    };
    if to_wire(cmd, value).is_some() {
        Some(value)
    } else {
        None
    }
}

/// Build a set command, e.g. `!1MVL39\n`
fn encode_set(cmd: usize, code: u8) -> String {
    format!("!1{}{:02X}\n", COMMAND_CODES[cmd], code)
}

/// Build a state query, e.g. `!1PWRQSTN\n`
fn encode_query(cmd: usize) -> String {
    format!("!1{}QSTN\n", COMMAND_CODES[cmd])
}

/// Decode a received message into (command index, feature value)
fn decode_response(line: &str) -> Option<(usize, i32)> {
    let rest = line.strip_prefix("!1")?;
    let cmd_str = rest.get(..3)?;
    let value_str = rest.get(3..5)?;
    let cmd = COMMAND_CODES.iter().position(|c| *c == cmd_str)?;
    let code = u8::from_str_radix(value_str, 16).ok()?;
    let value = from_wire(cmd, code)?;
    Some((cmd, value))
}

pub struct OnkyoAvDriver {
    port_path: String,
    baud: u32,
    device_id: Option<DeviceId>,
    port: Option<Arc<Mutex<Box<dyn SerialPort>>>>,
    shutdown: Arc<AtomicBool>,
    reader: Option<thread::JoinHandle<()>>,
}

impl OnkyoAvDriver {
    pub fn new(config: &ModuleConfig) -> Result<OnkyoAvDriver> {
        let port_path = config.port.clone().ok_or_else(|| {
            Error::InvalidConfig("onkyo_av driver requires a serial port".into())
        })?;
        Ok(OnkyoAvDriver {
            port_path,
            baud: config.baud.unwrap_or(DEFAULT_BAUD),
            device_id: None,
            port: None,
            shutdown: Arc::new(AtomicBool::new(false)),
            reader: None,
        })
    }
}

impl DeviceDriver for OnkyoAvDriver {
    fn init(&mut self, module: &mut Module) -> Result<()> {
        let device_id = DeviceId::new(module.id, 1);
        let mut device = Device::new(device_id, "TX-SR875", "AV-Receiver");

        let fid = |idx: usize| FeatureId::new(device_id, idx as u8 + 1);
        device.features.push(
            Feature::switch(fid(CMD_POWER), "Power", "toggle device power state")
                .with_flags(FLAG_POWER),
        );
        device
            .features
            .push(Feature::switch(fid(CMD_MUTE), "Mute", "toggle mute"));
        device.features.push(Feature::enumeration(
            fid(CMD_INPUT),
            "Input",
            "select av input",
            &labels(&INPUTS),
        ));
        device.features.push(Feature::enumeration(
            fid(CMD_MODE),
            "Listening Mode",
            "listening mode",
            &labels(&MODES),
        ));
        device.features.push(
            Feature::range(fid(CMD_VOLUME), "Volume", "main zone volume", 0, 60)
                .with_flags(FLAG_SLIDER | FLAG_INVERSE),
        );
        device.features.push(Feature::range(
            fid(CMD_LATENIGHT),
            "Late Night Mode",
            "adjust sound levels",
            0,
            2,
        ));
        device.features.push(Feature::enumeration(
            fid(CMD_DIMMER),
            "Dimmer",
            "set device illumination",
            &labels(&DIMMERS),
        ));
        device.features.push(Feature::range(
            fid(CMD_PRESET),
            "Preset",
            "tuner preset",
            0,
            30,
        ));
        module.devices.push(device);

        module.name = "OnkyoAV".to_string();
        module.description = "control Onkyo AV-Receiver via RS232".to_string();
        module.version = "0.1".to_string();
        self.device_id = Some(device_id);
        Ok(())
    }

    fn start(&mut self, events: EventSender) -> Result<()> {
        if self.reader.is_some() {
            return Err(Error::AlreadyRunning);
        }
        let device_id = self.device_id.ok_or(Error::NotRunning)?;

        let port = serialport::new(&self.port_path, self.baud)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(Duration::from_millis(100))
            .open()?;
        log::info!(
            "Opened Onkyo receiver on {} at {} baud",
            self.port_path,
            self.baud
        );

        let port = Arc::new(Mutex::new(port));
        self.shutdown.store(false, Ordering::Relaxed);
        let shutdown = Arc::clone(&self.shutdown);
        let reader_port = Arc::clone(&port);

        self.reader = Some(thread::spawn(move || {
            reader_loop(reader_port, shutdown, events, device_id);
        }));
        self.port = Some(port);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let Some(reader) = self.reader.take() else {
            return Err(Error::NotRunning);
        };
        self.shutdown.store(true, Ordering::Relaxed);
        if reader.join().is_err() {
            log::warn!("Onkyo reader thread panicked");
        }
        self.port = None;
        Ok(())
    }

    fn set_value(&mut self, feature: FeatureId, value: i32) -> Result<()> {
        let port = self.port.as_ref().ok_or(Error::NotRunning)?;

        let cmd = feature.feature_idx() as usize;
        let cmd = cmd
            .checked_sub(1)
            .filter(|c| *c < NUM_COMMANDS)
            .ok_or_else(|| {
                Error::DriverRejected(format!("unknown command index {}", feature.feature_idx()))
            })?;
        let code = to_wire(cmd, value).ok_or_else(|| {
            Error::DriverRejected(format!(
                "invalid value {} for '{}'",
                value, COMMAND_CODES[cmd]
            ))
        })?;

        let message = encode_set(cmd, code);
        log::debug!("Onkyo sending {}", message.trim_end());
        port.lock().write_all(message.as_bytes())?;
        // The receiver echoes the new state; confirmation comes via the reader
        Ok(())
    }
}

/// Per-command outstanding state query
struct PendingQuery {
    issued: Instant,
}

/// Reader loop: query the full state once, then decode `0x1A`-terminated
/// responses and keep unanswered queries alive.
fn reader_loop(
    port: Arc<Mutex<Box<dyn SerialPort>>>,
    shutdown: Arc<AtomicBool>,
    events: EventSender,
    device_id: DeviceId,
) {
    let mut buf = [0u8; 128];
    let mut message: Vec<u8> = Vec::with_capacity(64);
    let mut pending: [Option<PendingQuery>; NUM_COMMANDS] = Default::default();

    // Initial full state request
    for cmd in 0..NUM_COMMANDS {
        let query = encode_query(cmd);
        if let Err(e) = port.lock().write_all(query.as_bytes()) {
            log::error!("Onkyo initial state request failed: {}", e);
            return;
        }
        pending[cmd] = Some(PendingQuery {
            issued: Instant::now(),
        });
    }

    while !shutdown.load(Ordering::Relaxed) {
        let read = {
            let mut port = port.lock();
            match port.read(&mut buf) {
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => 0,
                Err(e) => {
                    log::error!("Onkyo read error: {}", e);
                    thread::sleep(Duration::from_millis(100));
                    continue;
                }
            }
        };

        for &byte in &buf[..read] {
            if byte != EOM {
                message.push(byte);
                continue;
            }
            let text = String::from_utf8_lossy(&message).to_string();
            message.clear();
            let Some((cmd, value)) = decode_response(text.trim_end_matches(['\r', '\n'])) else {
                log::warn!("Onkyo unrecognized message '{}'", text);
                continue;
            };
            pending[cmd] = None;
            let feature = FeatureId::new(device_id, cmd as u8 + 1);
            if events.send(DriverEvent { feature, value }).is_err() {
                log::info!("Onkyo event channel closed, reader exiting");
                return;
            }
        }

        // While in standby the receiver drops some requests; resend stale ones
        for (cmd, slot) in pending.iter_mut().enumerate() {
            let Some(query) = slot else { continue };
            if query.issued.elapsed() < PENDING_RETRY {
                continue;
            }
            let message = encode_query(cmd);
            if let Err(e) = port.lock().write_all(message.as_bytes()) {
                log::error!("Onkyo query resend failed: {}", e);
            }
            query.issued = Instant::now();
        }

        if read == 0 {
            thread::sleep(Duration::from_millis(10));
        }
    }

    log::info!("Onkyo reader thread exiting");
}
