//! End-to-end protocol tests over a real TCP socket
//!
//! The server runs on its own thread with drivers that confirm every set
//! request immediately, so driver confirmations still flow through the event
//! inbox exactly as they do with real hardware.

use griha_io::config::{Config, LoggingConfig, ModuleConfig, NetworkConfig, ProfileConfig};
use griha_io::driver::{DeviceDriver, DriverEvent, EventSender};
use griha_io::error::Result;
use griha_io::model::device::Device;
use griha_io::model::feature::{Feature, FLAG_POWER, VALUE_UNKNOWN};
use griha_io::model::id::{DeviceId, FeatureId, ModuleId};
use griha_io::model::module::Module;
use griha_io::model::Registry;
use griha_io::packet::Packet;
use griha_io::profile::ProfileStore;
use griha_io::server::{message, Server};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

enum Kind {
    Switch,
    Range(i32, i32),
    Enum(&'static [&'static str]),
}

/// Driver that accepts every in-bounds request and confirms it straight away
struct ImmediateDriver {
    device_name: &'static str,
    features: Vec<(&'static str, Kind, u32)>,
    events: Option<EventSender>,
}

impl ImmediateDriver {
    fn light() -> ImmediateDriver {
        ImmediateDriver {
            device_name: "Light",
            features: vec![
                ("Ceiling", Kind::Switch, FLAG_POWER),
                ("Desk", Kind::Switch, FLAG_POWER),
            ],
            events: None,
        }
    }

    fn amp() -> ImmediateDriver {
        ImmediateDriver {
            device_name: "Amp",
            features: vec![
                ("Volume", Kind::Range(0, 60), 0),
                ("Input", Kind::Enum(&["DVD", "CD", "Tuner"]), 0),
            ],
            events: None,
        }
    }
}

impl DeviceDriver for ImmediateDriver {
    fn init(&mut self, module: &mut Module) -> Result<()> {
        module.name = "Test".into();
        module.version = "1.0".into();
        let did = DeviceId::new(module.id, 1);
        let mut device = Device::new(did, self.device_name, "test device");
        for (idx, (name, kind, flags)) in self.features.iter().enumerate() {
            let fid = FeatureId::new(did, idx as u8 + 1);
            let feature = match kind {
                Kind::Switch => Feature::switch(fid, name, ""),
                Kind::Range(lo, hi) => Feature::range(fid, name, "", *lo, *hi),
                Kind::Enum(labels) => Feature::enumeration(fid, name, "", labels),
            };
            device.features.push(feature.with_flags(*flags));
        }
        module.devices.push(device);
        Ok(())
    }

    fn start(&mut self, events: EventSender) -> Result<()> {
        self.events = Some(events);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.events = None;
        Ok(())
    }

    fn set_value(&mut self, feature: FeatureId, value: i32) -> Result<()> {
        if let Some(events) = &self.events {
            let _ = events.send(DriverEvent { feature, value });
        }
        Ok(())
    }
}

struct TestServer {
    addr: SocketAddr,
    running: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
    _dir: tempfile::TempDir,
}

impl TestServer {
    fn start(driver: ImmediateDriver) -> TestServer {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            network: NetworkConfig {
                bind_address: "127.0.0.1:0".to_string(),
            },
            profiles: ProfileConfig {
                store_path: dir.path().join("profiles.bin").display().to_string(),
            },
            logging: LoggingConfig::default(),
            modules: Vec::<ModuleConfig>::new(),
        };

        let mut registry = Registry::new();
        registry.load(Box::new(driver)).unwrap();
        let store = ProfileStore::open(&config.profiles.store_path).unwrap();

        let mut server = Server::bind(&config, registry, store).unwrap();
        server.start_drivers().unwrap();
        let addr = server.local_addr().unwrap();

        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let handle = thread::spawn(move || server.run(&flag));

        TestServer {
            addr,
            running,
            handle: Some(handle),
            _dir: dir,
        }
    }

    fn connect(&self) -> Client {
        let stream = TcpStream::connect(self.addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        Client { stream }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

struct Client {
    stream: TcpStream,
}

impl Client {
    fn send(&mut self, frame: &[u8]) {
        self.stream.write_all(frame).unwrap();
    }

    /// Read exactly one frame; panics on timeout
    fn read_frame(&mut self) -> Vec<u8> {
        let mut header = [0u8; 4];
        self.stream.read_exact(&mut header).unwrap();
        let total = u32::from_be_bytes(header) as usize;
        let mut rest = vec![0u8; total - 4];
        self.stream.read_exact(&mut rest).unwrap();
        let mut frame = header.to_vec();
        frame.extend_from_slice(&rest);
        frame
    }

    /// Read frames until one of the given type arrives, skipping others
    fn read_until(&mut self, msg_type: u8) -> Packet {
        for _ in 0..20 {
            let frame = self.read_frame();
            if frame[4] == msg_type {
                let mut p = Packet::from_bytes(&frame);
                p.read_u32().unwrap();
                p.read_u8().unwrap();
                return p;
            }
        }
        panic!("no frame of type {} arrived", msg_type);
    }
}

fn fid(index: u8) -> FeatureId {
    FeatureId::new(DeviceId::new(ModuleId::new(1), 1), index)
}

fn set_int_frame(feature: FeatureId, value: i32) -> Vec<u8> {
    let mut p = Packet::frame(message::C_FEATURE_SET_INT);
    p.append_u32(feature.raw());
    p.append_i32(value);
    p.finish()
}

#[test]
fn set_confirm_broadcast_retrieve() {
    let server = TestServer::start(ImmediateDriver::light());
    let mut client = server.connect();

    let ceiling = fid(1);
    client.send(&set_int_frame(ceiling, 1));

    // Driver confirmation comes back as a broadcast change
    let mut changed = client.read_until(message::S_FEATURE_CHANGED_INT);
    assert_eq!(changed.read_u32().unwrap(), ceiling.raw());
    assert_eq!(changed.read_i32().unwrap(), 1);

    // A subsequent RETRIEVE reflects the confirmed state
    client.send(&Packet::frame(message::C_RETRIEVE).finish());
    let mut tree = client.read_until(message::S_RETRIEVE_RESPONSE);
    assert_eq!(tree.read_u8().unwrap(), 1); // module count
    tree.read_u32().unwrap();
    tree.read_string().unwrap(); // "Test"
    tree.read_string().unwrap();
    tree.read_string().unwrap();
    assert_eq!(tree.read_u32().unwrap(), 1); // device count
    tree.read_u32().unwrap();
    assert_eq!(tree.read_string().unwrap(), "Light");
    tree.read_string().unwrap();
    tree.read_u32().unwrap(); // device flags
    assert_eq!(tree.read_u32().unwrap(), 2); // feature count

    // Ceiling: state 1 after confirmation
    assert_eq!(tree.read_u32().unwrap(), ceiling.raw());
    assert_eq!(tree.read_string().unwrap(), "Ceiling");
    tree.read_string().unwrap();
    tree.read_u32().unwrap(); // type
    tree.read_u32().unwrap(); // flags
    assert_eq!(tree.read_i32().unwrap(), 1);

    // Desk: still unknown
    tree.read_u32().unwrap();
    assert_eq!(tree.read_string().unwrap(), "Desk");
    tree.read_string().unwrap();
    tree.read_u32().unwrap();
    tree.read_u32().unwrap();
    assert_eq!(tree.read_i32().unwrap(), VALUE_UNKNOWN);
}

#[test]
fn rejected_set_reports_feature_error() {
    let server = TestServer::start(ImmediateDriver::amp());
    let mut client = server.connect();

    let volume = fid(1);
    client.send(&set_int_frame(volume, 900)); // out of bounds
    let mut error = client.read_until(message::S_FEATURE_ERROR);
    assert_eq!(error.read_u32().unwrap(), volume.raw());
}

#[test]
fn profile_skips_active_step_and_reports_loaded() {
    let server = TestServer::start(ImmediateDriver::amp());
    let mut client = server.connect();

    let volume = fid(1);
    let input = fid(2);

    // Subscribe to profile events before anything else
    client.send(&Packet::frame(message::C_PROFILE_LIST).finish());
    let mut list = client.read_until(message::S_PROFILE_LIST_RESPONSE);
    assert_eq!(list.read_u32().unwrap(), 0);

    // Drive the volume to 30 so the profile's first step is a no-op
    client.send(&set_int_frame(volume, 30));
    client.read_until(message::S_FEATURE_CHANGED_INT);

    // Save {volume: 30, input: 2}
    let mut save = Packet::frame(message::C_PROFILE_SAVE);
    save.append_u32(0); // request a fresh id
    save.append_string("Movie Night");
    save.append_u32(2);
    save.append_u32(volume.raw());
    save.append_u32(30);
    save.append_u32(input.raw());
    save.append_u32(2);
    client.send(&save.finish());

    let mut saved = client.read_until(message::S_PROFILE_SAVE_RESULT);
    let profile_id = saved.read_u32().unwrap();
    assert_eq!(saved.read_u8().unwrap(), 1);

    // Load it: only the input step should reach the hardware
    let mut load = Packet::frame(message::C_PROFILE_LOAD);
    load.append_u32(profile_id);
    client.send(&load.finish());

    let mut changed = client.read_until(message::S_FEATURE_CHANGED_INT);
    assert_eq!(changed.read_u32().unwrap(), input.raw());
    assert_eq!(changed.read_i32().unwrap(), 2);

    // Terminal result arrives once the input confirmation lands
    loop {
        let mut result = client.read_until(message::S_PROFILE_LOAD_RESULT);
        assert_eq!(result.read_u32().unwrap(), profile_id);
        match result.read_u8().unwrap() {
            0 => continue, // Loading
            2 => break,    // Loaded
            other => panic!("unexpected profile status {}", other),
        }
    }
}

#[test]
fn split_frame_reassembles() {
    let server = TestServer::start(ImmediateDriver::light());
    let mut client = server.connect();

    let frame = set_int_frame(fid(2), 1);
    let (head, tail) = frame.split_at(3);
    client.send(head);
    thread::sleep(Duration::from_millis(100));
    client.send(tail);

    let mut changed = client.read_until(message::S_FEATURE_CHANGED_INT);
    assert_eq!(changed.read_u32().unwrap(), fid(2).raw());
    assert_eq!(changed.read_i32().unwrap(), 1);
}

#[test]
fn oversize_frame_closes_connection() {
    let server = TestServer::start(ImmediateDriver::light());
    let mut client = server.connect();

    let mut bogus = 2000u32.to_be_bytes().to_vec();
    bogus.push(message::C_RETRIEVE);
    client.send(&bogus);

    // The server closes without dispatching anything
    let mut buf = [0u8; 16];
    loop {
        match client.stream.read(&mut buf) {
            Ok(0) => break, // EOF, closed as expected
            Ok(_) => panic!("server replied to an oversize frame"),
            Err(e) => panic!("expected clean close, got {}", e),
        }
    }
}

#[test]
fn absurd_profile_step_count_closes_connection() {
    let server = TestServer::start(ImmediateDriver::amp());
    let mut client = server.connect();

    // Well-framed save whose declared step count has no data behind it
    let mut save = Packet::frame(message::C_PROFILE_SAVE);
    save.append_u32(0);
    save.append_string("bogus");
    save.append_u32(0xFFFF_FFF0);
    client.send(&save.finish());

    let mut buf = [0u8; 16];
    loop {
        match client.stream.read(&mut buf) {
            Ok(0) => break, // EOF, closed as expected
            Ok(_) => panic!("server replied to a malformed save"),
            Err(e) => panic!("expected clean close, got {}", e),
        }
    }
}

#[test]
fn pong_keeps_unknown_types_harmless() {
    // An unknown message type is logged and ignored; the connection lives on
    let server = TestServer::start(ImmediateDriver::light());
    let mut client = server.connect();

    client.send(&Packet::frame(99).finish());
    client.send(&Packet::frame(message::C_UPDATE).finish());

    let mut snapshot = client.read_until(message::S_UPDATE);
    assert_eq!(snapshot.read_u32().unwrap(), 2); // two features
}
