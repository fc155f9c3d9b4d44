//! CUL driver: FS20 lights behind a CUL USB dongle
//!
//! The dongle speaks a line-based text protocol over USB serial. `X01\r\n`
//! puts it into listening mode; after that every received RF telegram arrives
//! as one `\r`-terminated line. Sending the same telegram switches the light,
//! so set requests and externally observed changes share one decode table.

use crate::config::ModuleConfig;
use crate::driver::{DeviceDriver, DriverEvent, EventSender};
use crate::error::{Error, Result};
use crate::model::device::Device;
use crate::model::feature::{Feature, FLAG_POWER};
use crate::model::id::{DeviceId, FeatureId};
use crate::model::module::Module;
use parking_lot::Mutex;
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const DEFAULT_BAUD: u32 = 9600;

const FEATURE_CEILING: u8 = 1;
const FEATURE_DESK: u8 = 2;

/// FS20 telegram for a feature index and switch state
fn telegram_for(feature_index: u8, value: i32) -> Option<&'static str> {
    match (feature_index, value != 0) {
        (FEATURE_CEILING, true) => Some("F758F0111"),
        (FEATURE_CEILING, false) => Some("F758F0100"),
        (FEATURE_DESK, true) => Some("F758F0011"),
        (FEATURE_DESK, false) => Some("F758F0000"),
        _ => None,
    }
}

/// Decode a received telegram line into (feature index, switch state)
fn decode_telegram(line: &str) -> Option<(u8, i32)> {
    match line {
        "F758F0111" => Some((FEATURE_CEILING, 1)),
        "F758F0100" => Some((FEATURE_CEILING, 0)),
        "F758F0011" => Some((FEATURE_DESK, 1)),
        "F758F0000" => Some((FEATURE_DESK, 0)),
        _ => None,
    }
}

pub struct CulDriver {
    port_path: String,
    baud: u32,
    device_id: Option<DeviceId>,
    port: Option<Arc<Mutex<Box<dyn SerialPort>>>>,
    events: Option<EventSender>,
    shutdown: Arc<AtomicBool>,
    reader: Option<thread::JoinHandle<()>>,
}

impl CulDriver {
    pub fn new(config: &ModuleConfig) -> Result<CulDriver> {
        let port_path = config
            .port
            .clone()
            .ok_or_else(|| Error::InvalidConfig("cul driver requires a serial port".into()))?;
        Ok(CulDriver {
            port_path,
            baud: config.baud.unwrap_or(DEFAULT_BAUD),
            device_id: None,
            port: None,
            events: None,
            shutdown: Arc::new(AtomicBool::new(false)),
            reader: None,
        })
    }
}

impl DeviceDriver for CulDriver {
    fn init(&mut self, module: &mut Module) -> Result<()> {
        let device_id = DeviceId::new(module.id, 1);
        let mut device = Device::new(device_id, "Light", "CULV3");
        device.features.push(
            Feature::switch(
                FeatureId::new(device_id, FEATURE_CEILING),
                "Ceiling",
                "toggle light",
            )
            .with_flags(FLAG_POWER),
        );
        device.features.push(
            Feature::switch(
                FeatureId::new(device_id, FEATURE_DESK),
                "Desk",
                "toggle light",
            )
            .with_flags(FLAG_POWER),
        );
        module.devices.push(device);

        module.name = "CUL".to_string();
        module.description = "control RF devices via CUL dongle".to_string();
        module.version = "1.0".to_string();
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
        log::info!("Opened CUL dongle on {} at {} baud", self.port_path, self.baud);

        let port = Arc::new(Mutex::new(port));
        // Put the dongle into RF listening mode
        port.lock().write_all(b"X01\r\n")?;

        self.shutdown.store(false, Ordering::Relaxed);
        let shutdown = Arc::clone(&self.shutdown);
        let reader_port = Arc::clone(&port);
        let reader_events = events.clone();

        self.reader = Some(thread::spawn(move || {
            reader_loop(reader_port, shutdown, reader_events, device_id);
        }));
        self.port = Some(port);
        self.events = Some(events);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let Some(reader) = self.reader.take() else {
            return Err(Error::NotRunning);
        };
        self.shutdown.store(true, Ordering::Relaxed);
        if reader.join().is_err() {
            log::warn!("CUL reader thread panicked");
        }
        self.port = None;
        self.events = None;
        Ok(())
    }

    fn set_value(&mut self, feature: FeatureId, value: i32) -> Result<()> {
        let port = self.port.as_ref().ok_or(Error::NotRunning)?;
        let events = self.events.as_ref().ok_or(Error::NotRunning)?;

        let Some(telegram) = telegram_for(feature.feature_idx(), value) else {
            return Err(Error::DriverRejected(format!(
                "no telegram for feature index {}",
                feature.feature_idx()
            )));
        };

        {
            let mut port = port.lock();
            port.write_all(telegram.as_bytes())?;
            port.write_all(b"\r\n")?;
        }
        log::debug!("CUL sent telegram {}", telegram);

        // FS20 is fire-and-forget; the dongle does not echo our own telegrams,
        // so the change is confirmed as soon as the write succeeds.
        events
            .send(DriverEvent { feature, value })
            .map_err(|_| Error::Other("event channel closed".into()))?;
        Ok(())
    }
}

/// Reader loop: accumulate `\r`-terminated lines and report decoded telegrams
fn reader_loop(
    port: Arc<Mutex<Box<dyn SerialPort>>>,
    shutdown: Arc<AtomicBool>,
    events: EventSender,
    device_id: DeviceId,
) {
    let mut buf = [0u8; 64];
    let mut line: Vec<u8> = Vec::with_capacity(32);

    while !shutdown.load(Ordering::Relaxed) {
        let read = {
            let mut port = port.lock();
            match port.read(&mut buf) {
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => 0,
                Err(e) => {
                    log::error!("CUL read error: {}", e);
                    thread::sleep(Duration::from_millis(100));
                    continue;
                }
            }
        };

        if read == 0 {
            thread::sleep(Duration::from_millis(10));
            continue;
        }

        for &byte in &buf[..read] {
            match byte {
                b'\r' => {
                    let text = String::from_utf8_lossy(&line).to_string();
                    log::debug!("CUL received line '{}'", text);
                    if let Some((index, value)) = decode_telegram(&text) {
                        let feature = FeatureId::new(device_id, index);
                        if events.send(DriverEvent { feature, value }).is_err() {
                            log::info!("CUL event channel closed, reader exiting");
                            return;
                        }
                    }
                    line.clear();
                }
                b'\n' => {}
                _ => line.push(byte),
            }
        }
    }

    log::info!("CUL reader thread exiting");
}
