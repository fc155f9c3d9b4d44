//! Hardware driver contract and driver registry
//!
//! A driver owns the physical link to one piece of equipment. At startup it
//! populates a [`Module`] descriptor with its device subtree, then runs its
//! own background I/O loop. Confirmed value changes — whether triggered by a
//! set request or observed on the wire — are reported through a
//! [`DriverEvent`] channel into the single core-owned inbox; the driver never
//! mutates shared state directly.
//!
//! Drivers are selected by name from the configuration, mirroring the
//! device-type dispatch in the daemon config.

pub mod cul;
pub mod onkyo;
pub mod stub;

use crate::config::ModuleConfig;
use crate::error::{Error, Result};
use crate::model::id::FeatureId;
use crate::model::module::Module;

/// A confirmed feature value reported by a driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverEvent {
    pub feature: FeatureId,
    pub value: i32,
}

/// Channel into the core event inbox, cloned into each driver
pub type EventSender = crossbeam_channel::Sender<DriverEvent>;

/// Device driver trait for hardware abstraction
///
/// Lifecycle: `init` populates the module descriptor once at load time,
/// `start` spawns the driver's I/O loop (a second call while running is an
/// error), `stop` blocks until that loop has exited and the link is released.
///
/// `set_value` only reports whether the request was *accepted*; the confirmed
/// value arrives later as a [`DriverEvent`]. Callers must not assume
/// synchronous application. A driver that cannot reach its hardware reports
/// UNKNOWN values rather than failing the process.
pub trait DeviceDriver: Send {
    /// Populate the module descriptor with devices and features
    fn init(&mut self, module: &mut Module) -> Result<()>;

    /// Start the background I/O loop, confirming changes via `events`
    fn start(&mut self, events: EventSender) -> Result<()>;

    /// Stop the I/O loop, blocking until it has fully terminated
    fn stop(&mut self) -> Result<()>;

    /// Request a value change on the hardware
    fn set_value(&mut self, feature: FeatureId, value: i32) -> Result<()>;
}

/// Create a driver from a `[[module]]` config entry
pub fn create_driver(config: &ModuleConfig) -> Result<Box<dyn DeviceDriver>> {
    match config.driver.as_str() {
        "stub" => Ok(Box::new(stub::StubDriver::new())),
        "cul" => Ok(Box::new(cul::CulDriver::new(config)?)),
        "onkyo_av" => Ok(Box::new(onkyo::OnkyoAvDriver::new(config)?)),
        _ => Err(Error::UnknownDriver(config.driver.clone())),
    }
}
