//! Modules: loaded driver instances owning an ordered device list

use crate::model::device::Device;
use crate::model::id::{DeviceId, ModuleId};

/// Descriptor of a loaded driver instance. Populated by the driver's `init`
/// and owned by the registry for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct Module {
    pub id: ModuleId,
    pub name: String,
    pub description: String,
    pub version: String,
    pub devices: Vec<Device>,
}

impl Module {
    /// Empty descriptor handed to a driver for population
    pub fn new(id: ModuleId) -> Module {
        Module {
            id,
            name: String::new(),
            description: String::new(),
            version: String::new(),
            devices: Vec::new(),
        }
    }

    /// Locate a device by id (small lists, linear scan)
    pub fn device(&self, id: DeviceId) -> Option<&Device> {
        self.devices.iter().find(|d| d.id == id)
    }

    pub fn device_mut(&mut self, id: DeviceId) -> Option<&mut Device> {
        self.devices.iter_mut().find(|d| d.id == id)
    }
}
