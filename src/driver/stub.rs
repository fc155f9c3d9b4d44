//! Stub driver: a single switch with no hardware behind it
//!
//! Confirms every accepted set immediately through the event channel, which
//! makes it useful for protocol testing and as the minimal example of the
//! driver contract.

use crate::driver::{DeviceDriver, DriverEvent, EventSender};
use crate::error::{Error, Result};
use crate::model::device::Device;
use crate::model::feature::{Feature, FLAG_POWER};
use crate::model::id::{DeviceId, FeatureId};
use crate::model::module::Module;

pub struct StubDriver {
    events: Option<EventSender>,
}

impl StubDriver {
    pub fn new() -> StubDriver {
        StubDriver { events: None }
    }
}

impl Default for StubDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceDriver for StubDriver {
    fn init(&mut self, module: &mut Module) -> Result<()> {
        let device_id = DeviceId::new(module.id, 1);
        let mut device = Device::new(device_id, "Stub", "simulated device");
        device.features.push(
            Feature::switch(
                FeatureId::new(device_id, 1),
                "Power",
                "toggle device power state",
            )
            .with_flags(FLAG_POWER),
        );
        module.devices.push(device);

        module.name = "Stub".to_string();
        module.description = "test module".to_string();
        module.version = "1.0".to_string();
        Ok(())
    }

    fn start(&mut self, events: EventSender) -> Result<()> {
        if self.events.is_some() {
            return Err(Error::AlreadyRunning);
        }
        self.events = Some(events);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if self.events.take().is_none() {
            return Err(Error::NotRunning);
        }
        Ok(())
    }

    fn set_value(&mut self, feature: FeatureId, value: i32) -> Result<()> {
        let events = self.events.as_ref().ok_or(Error::NotRunning)?;
        // No hardware: every accepted request is immediately confirmed
        events
            .send(DriverEvent { feature, value })
            .map_err(|_| Error::Other("event channel closed".into()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::id::ModuleId;

    #[test]
    fn test_start_is_idempotent_guarded() {
        let mut driver = StubDriver::new();
        let (tx, _rx) = crossbeam_channel::unbounded();
        driver.start(tx.clone()).unwrap();
        assert!(driver.start(tx).is_err());
        driver.stop().unwrap();
        assert!(driver.stop().is_err());
    }

    #[test]
    fn test_set_confirms_immediately() {
        let mut driver = StubDriver::new();
        let mut module = Module::new(ModuleId::new(1));
        driver.init(&mut module).unwrap();
        let feature = module.devices[0].features[0].id;

        let (tx, rx) = crossbeam_channel::unbounded();
        driver.start(tx).unwrap();
        driver.set_value(feature, 1).unwrap();
        assert_eq!(rx.try_recv().unwrap(), DriverEvent { feature, value: 1 });
    }

    #[test]
    fn test_set_before_start_fails() {
        let mut driver = StubDriver::new();
        let mut module = Module::new(ModuleId::new(1));
        driver.init(&mut module).unwrap();
        let feature = module.devices[0].features[0].id;
        assert!(driver.set_value(feature, 1).is_err());
    }
}
