//! TCP connection manager and core event loop
//!
//! One thread services everything: new connections, inbound frames, the
//! driver event inbox, write buffers and the keepalive scan. Drivers run
//! their own threads and reach this loop only through the event channel, so
//! the registry, profile engine and connection list need no locks.

use crate::config::Config;
use crate::driver::{DriverEvent, EventSender};
use crate::error::{Error, Result};
use crate::model::id::FeatureId;
use crate::model::{Registry, SetOutcome};
use crate::packet::Packet;
use crate::profile::{Profile, ProfileEngine, ProfileStatus, ProfileStep, ProfileStore};
use crate::server::connection::{self, Connection, Keepalive};
use crate::server::message;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Idle sleep between loop passes
const TICK: Duration = Duration::from_millis(10);

pub struct Server {
    listener: TcpListener,
    connections: Vec<Connection>,
    registry: Registry,
    engine: ProfileEngine,
    store: ProfileStore,
    events_tx: Sender<DriverEvent>,
    inbox: Receiver<DriverEvent>,
    next_client_id: u32,
    last_keepalive: Instant,
}

impl Server {
    /// Bind the listening socket. This is the only fatal startup error once
    /// configuration has parsed.
    pub fn bind(config: &Config, registry: Registry, store: ProfileStore) -> Result<Server> {
        let listener = TcpListener::bind(&config.network.bind_address)?;
        listener.set_nonblocking(true)?;
        log::info!("Listening on {}", config.network.bind_address);

        let (events_tx, inbox) = unbounded();
        Ok(Server {
            listener,
            connections: Vec::new(),
            registry,
            engine: ProfileEngine::new(),
            store,
            events_tx,
            inbox,
            next_client_id: 1,
            last_keepalive: Instant::now(),
        })
    }

    /// Address actually bound, for configs that requested port 0
    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Channel end handed to every driver
    pub fn event_sender(&self) -> EventSender {
        self.events_tx.clone()
    }

    /// Start all drivers with this server's event inbox
    pub fn start_drivers(&mut self) -> Result<()> {
        let events = self.events_tx.clone();
        self.registry.start_all(&events)
    }

    /// Main loop; returns after `running` is lowered and teardown completes
    pub fn run(&mut self, running: &AtomicBool) {
        log::info!("Server loop running");
        while running.load(Ordering::Relaxed) {
            self.accept_clients();
            self.service_connections();
            self.drain_driver_events();
            self.keepalive_scan();
            self.flush_and_sweep();
            thread::sleep(TICK);
        }
        self.shutdown();
    }

    fn accept_clients(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    let id = self.next_client_id;
                    self.next_client_id += 1;
                    match Connection::new(stream, id) {
                        Ok(conn) => {
                            log::info!("client #{} connected from {}", id, addr);
                            self.connections.push(conn);
                        }
                        Err(e) => log::warn!("failed to set up client socket: {}", e),
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    log::warn!("accept failed: {}", e);
                    break;
                }
            }
        }
    }

    fn service_connections(&mut self) {
        for idx in 0..self.connections.len() {
            if !self.connections[idx].open {
                continue;
            }
            if !self.connections[idx].fill() {
                self.connections[idx].open = false;
                continue;
            }
            loop {
                match self.connections[idx].take_frame() {
                    Ok(Some(frame)) => {
                        if let Err(e) = self.handle_frame(idx, &frame) {
                            log::warn!(
                                "client #{}: malformed frame: {}",
                                self.connections[idx].id,
                                e
                            );
                            self.connections[idx].open = false;
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        log::warn!("client #{}: {}", self.connections[idx].id, e);
                        self.connections[idx].open = false;
                        break;
                    }
                }
            }
        }
    }

    /// Frames on one connection are handled strictly in arrival order
    fn handle_frame(&mut self, idx: usize, frame: &[u8]) -> Result<()> {
        let mut p = Packet::from_bytes(frame);
        let _length = p.read_u32()?;
        let msg_type = p.read_u8()?;

        match msg_type {
            message::C_PONG => {
                self.connections[idx].last_pong = Instant::now();
            }
            message::C_FEATURE_SET_INT => {
                let raw = p.read_u32()?;
                let value = p.read_i32()?;
                let outcome = FeatureId::from_raw(raw)
                    .map(|feature| self.registry.set_value(feature, value));
                match outcome {
                    Some(SetOutcome::Applied) | Some(SetOutcome::AlreadyActive) => {}
                    _ => self.connections[idx].queue(&message::feature_error(raw)),
                }
            }
            message::C_FEATURE_SET_STRING => {
                let raw = p.read_u32()?;
                let value = p.read_string()?;
                let outcome = FeatureId::from_raw(raw)
                    .map(|feature| self.registry.set_string(feature, &value));
                match outcome {
                    Some(SetOutcome::Applied) | Some(SetOutcome::AlreadyActive) => {}
                    _ => self.connections[idx].queue(&message::feature_error(raw)),
                }
            }
            message::C_RETRIEVE => {
                let response = message::retrieve_response(&self.registry);
                self.connections[idx].queue(&response);
            }
            message::C_UPDATE => {
                let response = message::update_snapshot(&self.registry);
                self.connections[idx].queue(&response);
            }
            message::C_PROFILE_LOAD => {
                let id = p.read_u32()?;
                let status = match self.engine.load(id, &self.store, &mut self.registry) {
                    Ok(status) => status,
                    Err(e) => {
                        log::warn!("Profile {} load rejected: {}", id, e);
                        ProfileStatus::Failed
                    }
                };
                let result = message::profile_load_result(id, status);
                self.connections[idx].queue(&result);
                self.broadcast_profile_event(&result, Some(idx));
            }
            message::C_PROFILE_SAVE => {
                let id = p.read_u32()?;
                let name = p.read_string()?;
                let count = p.read_u32()?;
                // The declared count is client-controlled; a conforming frame
                // holds at most ~126 steps, so cap the pre-allocation and let
                // the reads fail on a short payload.
                let mut steps = Vec::with_capacity(count.min(128) as usize);
                let mut parse_ok = true;
                for _ in 0..count {
                    let raw = p.read_u32()?;
                    let value = p.read_i32()?;
                    match FeatureId::from_raw(raw) {
                        Some(feature) => steps.push(ProfileStep { feature, value }),
                        None => parse_ok = false,
                    }
                }
                let saved = if parse_ok {
                    self.engine
                        .save(Profile { id, name, steps }, &mut self.store, &self.registry)
                } else {
                    Err(Error::InvalidProfileStep("unparseable feature id".into()))
                };
                match saved {
                    Ok(assigned) => {
                        let result = message::profile_save_result(assigned, true);
                        self.connections[idx].queue(&result);
                        self.broadcast_profile_event(&result, Some(idx));
                    }
                    Err(e) => {
                        log::warn!("Profile save rejected: {}", e);
                        self.connections[idx].queue(&message::profile_save_result(id, false));
                    }
                }
            }
            message::C_PROFILE_DELETE => {
                let id = p.read_u32()?;
                match self.engine.delete(id, &mut self.store) {
                    Ok(()) => {
                        let result = message::profile_delete_result(id, true);
                        self.connections[idx].queue(&result);
                        self.broadcast_profile_event(&result, Some(idx));
                    }
                    Err(e) => {
                        log::warn!("Profile {} delete rejected: {}", id, e);
                        self.connections[idx].queue(&message::profile_delete_result(id, false));
                    }
                }
            }
            message::C_PROFILE_LIST => {
                self.connections[idx].wants_profiles = true;
                let response = message::profile_list_response(&self.store);
                self.connections[idx].queue(&response);
            }
            other => {
                log::warn!(
                    "client #{}: ignoring unknown message type {}",
                    self.connections[idx].id,
                    other
                );
            }
        }
        Ok(())
    }

    /// Apply driver confirmations: update the tree, feed the profile engine,
    /// fan the change out to every open connection.
    fn drain_driver_events(&mut self) {
        while let Ok(event) = self.inbox.try_recv() {
            let Some(value) = self
                .registry
                .apply_external_change(event.feature, event.value)
            else {
                log::warn!("Driver event for unknown feature {:?}", event.feature);
                continue;
            };

            let update = message::feature_changed(event.feature, value);
            for conn in self.connections.iter_mut().filter(|c| c.open) {
                conn.queue(&update);
            }

            if let Some((profile_id, status)) =
                self.engine
                    .on_feature_changed(event.feature, value, &self.store, &mut self.registry)
            {
                let result = message::profile_load_result(profile_id, status);
                self.broadcast_profile_event(&result, None);
            }
        }
    }

    fn broadcast_profile_event(&mut self, frame: &[u8], except: Option<usize>) {
        for (i, conn) in self.connections.iter_mut().enumerate() {
            if conn.open && conn.wants_profiles && Some(i) != except {
                conn.queue(frame);
            }
        }
    }

    fn keepalive_scan(&mut self) {
        let now = Instant::now();
        if now.duration_since(self.last_keepalive) < connection::KEEPALIVE_SCAN {
            return;
        }
        self.last_keepalive = now;

        let epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let ping = message::ping(epoch);

        for conn in self.connections.iter_mut().filter(|c| c.open) {
            match connection::keepalive_check(now, conn.last_ping, conn.last_pong) {
                Keepalive::Wait => {}
                Keepalive::SendPing => {
                    conn.queue(&ping);
                    conn.last_ping = now;
                }
                Keepalive::Close => {
                    log::info!("client #{} missed keepalive, closing", conn.id);
                    conn.open = false;
                }
            }
        }
    }

    fn flush_and_sweep(&mut self) {
        for conn in &mut self.connections {
            if conn.open && !conn.flush() {
                conn.open = false;
            }
        }
        self.connections.retain(|c| {
            if !c.open {
                log::info!("client #{} disconnected", c.id);
            }
            c.open
        });
    }

    /// Stop drivers first (blocking until their loops exit), then tell every
    /// client goodbye and drop the sockets.
    fn shutdown(&mut self) {
        log::info!("Server shutting down");
        self.registry.stop_all();

        let goodbye = message::disconnect();
        for conn in &mut self.connections {
            if conn.open {
                conn.queue(&goodbye);
                conn.flush_blocking();
            }
        }
        self.connections.clear();
    }
}
