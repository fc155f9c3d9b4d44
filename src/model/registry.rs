//! Device registry: the in-memory tree of modules, devices and features
//!
//! The registry owns every loaded module together with its driver. All
//! mutation happens on the server thread; drivers communicate back through
//! the event inbox only, so no locking is needed here.
//!
//! The value stored for a feature is only updated by
//! [`Registry::apply_external_change`] — the driver's confirmation — never
//! optimistically when a set request is issued.

use crate::driver::{DeviceDriver, EventSender};
use crate::error::{Error, Result};
use crate::model::device::Device;
use crate::model::feature::{Feature, DEVICE_FLAG_STANDBY, FLAG_POWER};
use crate::model::id::{DeviceId, FeatureId, ModuleId};
use crate::model::module::Module;

/// Outcome of a set-value request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    /// Accepted by the driver; confirmation will arrive asynchronously
    Applied,
    /// The feature already holds the requested value; no driver call made
    AlreadyActive,
    /// The feature id resolves to nothing
    NotFound,
    /// The value violates the feature's type constraints
    OutOfBounds,
    /// The driver refused the request
    Rejected,
}

struct ModuleSlot {
    module: Module,
    driver: Box<dyn DeviceDriver>,
    running: bool,
}

/// Tree of loaded modules plus their drivers
#[derive(Default)]
pub struct Registry {
    slots: Vec<ModuleSlot>,
}

impl Registry {
    pub fn new() -> Registry {
        Registry { slots: Vec::new() }
    }

    /// Load a driver: assign the next 1-based module id, let the driver
    /// populate its descriptor, and take ownership of both. The id scheme
    /// packs the module index into one byte, so at most 255 modules load.
    pub fn load(&mut self, mut driver: Box<dyn DeviceDriver>) -> Result<ModuleId> {
        if self.slots.len() >= 255 {
            return Err(Error::InvalidConfig("module limit of 255 reached".into()));
        }
        let id = ModuleId::new(self.slots.len() as u8 + 1);
        let mut module = Module::new(id);
        driver.init(&mut module)?;
        log::info!(
            "Loaded module '{}' v{} with {} device(s)",
            module.name,
            module.version,
            module.devices.len()
        );
        self.slots.push(ModuleSlot {
            module,
            driver,
            running: false,
        });
        Ok(id)
    }

    /// Start every driver, handing each a clone of the event channel
    pub fn start_all(&mut self, events: &EventSender) -> Result<()> {
        for slot in &mut self.slots {
            slot.driver.start(events.clone())?;
            slot.running = true;
            log::info!("Started module '{}'", slot.module.name);
        }
        Ok(())
    }

    /// Stop every running driver, blocking until each loop has exited
    pub fn stop_all(&mut self) {
        for slot in &mut self.slots {
            if !slot.running {
                continue;
            }
            if let Err(e) = slot.driver.stop() {
                log::warn!("Error stopping module '{}': {}", slot.module.name, e);
            }
            slot.running = false;
        }
    }

    /// Number of loaded modules
    pub fn module_count(&self) -> usize {
        self.slots.len()
    }

    /// Enumerate modules in load order (stable for a session)
    pub fn module_at(&self, index: usize) -> Option<&Module> {
        self.slots.get(index).map(|s| &s.module)
    }

    /// Resolve a module by id
    pub fn module(&self, id: ModuleId) -> Option<&Module> {
        self.slots.iter().map(|s| &s.module).find(|m| m.id == id)
    }

    /// Resolve a device by id via its owning module
    pub fn device(&self, id: DeviceId) -> Option<&Device> {
        self.module(id.module_id())?.device(id)
    }

    /// Resolve a feature by id via its owning module and device
    pub fn feature(&self, id: FeatureId) -> Option<&Feature> {
        self.device(id.device_id())?.feature(id)
    }

    fn feature_mut(&mut self, id: FeatureId) -> Option<&mut Feature> {
        let module_id = id.module_id();
        let slot = self.slots.iter_mut().find(|s| s.module.id == module_id)?;
        slot.module.device_mut(id.device_id())?.feature_mut(id)
    }

    /// Request a feature value change.
    ///
    /// Validates existence and bounds, short-circuits when the value is
    /// already in effect, then delegates to the owning driver. The stored
    /// value is left untouched until the driver confirms.
    pub fn set_value(&mut self, id: FeatureId, value: i32) -> SetOutcome {
        let module_id = id.module_id();
        let Some(slot) = self.slots.iter_mut().find(|s| s.module.id == module_id) else {
            return SetOutcome::NotFound;
        };
        let Some(feature) = slot
            .module
            .device(id.device_id())
            .and_then(|d| d.feature(id))
        else {
            return SetOutcome::NotFound;
        };

        if !feature.value.in_bounds(value) {
            log::warn!(
                "Value {} out of bounds for feature '{}'",
                value,
                feature.name
            );
            return SetOutcome::OutOfBounds;
        }
        if feature.value.current() == value {
            return SetOutcome::AlreadyActive;
        }

        log::info!(">> set feature '{}' to {}", feature.name, value);
        match slot.driver.set_value(id, value) {
            Ok(()) => SetOutcome::Applied,
            Err(e) => {
                log::warn!("Driver rejected set on '{}': {}", slot.module.name, e);
                SetOutcome::Rejected
            }
        }
    }

    /// Request a string value change. Reserved for future value types; no
    /// current feature accepts strings.
    pub fn set_string(&mut self, id: FeatureId, _value: &str) -> SetOutcome {
        if self.feature(id).is_none() {
            return SetOutcome::NotFound;
        }
        SetOutcome::Rejected
    }

    /// Apply a value change confirmed by a driver. Updates the stored value,
    /// maintains the POWER/STANDBY device flag, and returns the applied value.
    /// Returns `None` when the feature no longer resolves.
    pub fn apply_external_change(&mut self, id: FeatureId, value: i32) -> Option<i32> {
        let is_power = {
            let feature = self.feature_mut(id)?;
            log::info!("<< feature '{}' changed to {}", feature.name, value);
            feature.value.store(value);
            feature.flags & FLAG_POWER != 0
        };

        if is_power {
            let module_id = id.module_id();
            let slot = self.slots.iter_mut().find(|s| s.module.id == module_id)?;
            let device = slot.module.device_mut(id.device_id())?;
            if value == 0 {
                device.flags |= DEVICE_FLAG_STANDBY;
            } else {
                device.flags &= !DEVICE_FLAG_STANDBY;
            }
        }
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Driver that records set calls and never confirms on its own
    struct RecordingDriver {
        calls: Arc<AtomicUsize>,
        reject: bool,
    }

    impl DeviceDriver for RecordingDriver {
        fn init(&mut self, module: &mut Module) -> Result<()> {
            module.name = "Recorder".into();
            module.description = "test module".into();
            module.version = "1.0".into();
            let did = DeviceId::new(module.id, 1);
            let mut device = Device::new(did, "Amp", "test amp");
            device.features.push(
                Feature::switch(FeatureId::new(did, 1), "Power", "toggle power")
                    .with_flags(FLAG_POWER),
            );
            device
                .features
                .push(Feature::range(FeatureId::new(did, 2), "Volume", "", 0, 60));
            device.features.push(Feature::enumeration(
                FeatureId::new(did, 3),
                "Input",
                "",
                &["DVD", "CD", "Tuner"],
            ));
            module.devices.push(device);
            Ok(())
        }

        fn start(&mut self, _events: EventSender) -> Result<()> {
            Ok(())
        }

        fn stop(&mut self) -> Result<()> {
            Ok(())
        }

        fn set_value(&mut self, _feature: FeatureId, _value: i32) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.reject {
                Err(Error::DriverRejected("offline".into()))
            } else {
                Ok(())
            }
        }
    }

    fn setup(reject: bool) -> (Registry, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = Registry::new();
        registry
            .load(Box::new(RecordingDriver {
                calls: Arc::clone(&calls),
                reject,
            }))
            .unwrap();
        (registry, calls)
    }

    fn feature_id(registry: &Registry, idx: u8) -> FeatureId {
        let device = registry.module_at(0).unwrap().devices[0].id;
        FeatureId::new(device, idx)
    }

    #[test]
    fn test_set_value_delegates_to_driver() {
        let (mut registry, calls) = setup(false);
        let volume = feature_id(&registry, 2);
        assert_eq!(registry.set_value(volume, 30), SetOutcome::Applied);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // Not applied optimistically
        assert_eq!(
            registry.feature(volume).unwrap().value.current(),
            crate::model::feature::VALUE_UNKNOWN
        );
    }

    #[test]
    fn test_already_active_skips_driver() {
        let (mut registry, calls) = setup(false);
        let volume = feature_id(&registry, 2);
        registry.apply_external_change(volume, 30);
        assert_eq!(registry.set_value(volume, 30), SetOutcome::AlreadyActive);
        assert_eq!(registry.set_value(volume, 30), SetOutcome::AlreadyActive);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_out_of_bounds_and_not_found() {
        let (mut registry, calls) = setup(false);
        let volume = feature_id(&registry, 2);
        let input = feature_id(&registry, 3);
        assert_eq!(registry.set_value(volume, 61), SetOutcome::OutOfBounds);
        assert_eq!(registry.set_value(input, 3), SetOutcome::OutOfBounds);
        assert_eq!(registry.set_value(input, -1), SetOutcome::OutOfBounds);
        let missing = feature_id(&registry, 9);
        assert_eq!(registry.set_value(missing, 0), SetOutcome::NotFound);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_driver_rejection() {
        let (mut registry, _calls) = setup(true);
        let volume = feature_id(&registry, 2);
        assert_eq!(registry.set_value(volume, 30), SetOutcome::Rejected);
    }

    #[test]
    fn test_power_confirmation_drives_standby_flag() {
        let (mut registry, _calls) = setup(false);
        let power = feature_id(&registry, 1);
        let device = registry.module_at(0).unwrap().devices[0].id;

        registry.apply_external_change(power, 0);
        assert_ne!(registry.device(device).unwrap().flags & DEVICE_FLAG_STANDBY, 0);

        registry.apply_external_change(power, 1);
        assert_eq!(registry.device(device).unwrap().flags & DEVICE_FLAG_STANDBY, 0);
        assert_eq!(registry.feature(power).unwrap().value.current(), 1);
    }

    #[test]
    fn test_module_limit_enforced() {
        struct NullDriver;
        impl DeviceDriver for NullDriver {
            fn init(&mut self, _module: &mut Module) -> Result<()> {
                Ok(())
            }
            fn start(&mut self, _events: EventSender) -> Result<()> {
                Ok(())
            }
            fn stop(&mut self) -> Result<()> {
                Ok(())
            }
            fn set_value(&mut self, _feature: FeatureId, _value: i32) -> Result<()> {
                Ok(())
            }
        }

        let mut registry = Registry::new();
        for _ in 0..255 {
            registry.load(Box::new(NullDriver)).unwrap();
        }
        assert!(matches!(
            registry.load(Box::new(NullDriver)),
            Err(Error::InvalidConfig(_))
        ));
        assert_eq!(registry.module_count(), 255);
        // The last id assigned must not have wrapped
        assert_eq!(registry.module_at(254).unwrap().id, ModuleId::new(255));
    }

    #[test]
    fn test_set_string_is_rejected() {
        let (mut registry, _calls) = setup(false);
        let volume = feature_id(&registry, 2);
        assert_eq!(registry.set_string(volume, "x"), SetOutcome::Rejected);
        let missing = feature_id(&registry, 9);
        assert_eq!(registry.set_string(missing, "x"), SetOutcome::NotFound);
    }
}
