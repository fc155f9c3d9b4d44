//! Bit-packed entity identifiers
//!
//! Every module, device and feature carries a 32-bit identifier that encodes
//! its position in the tree:
//!
//! ```text
//! ┌────────┬────────────┬────────────┬─────────────┐
//! │ kind   │ module idx │ device idx │ feature idx │
//! │ 31..24 │ 23..16     │ 15..8      │ 7..0        │
//! └────────┴────────────┴────────────┴─────────────┘
//! ```
//!
//! Indices are 1-based and assigned in module load order; a feature id yields
//! its owning device and module ids by masking alone, no lookup required.
//! Construction and decoding go through validated constructors so the packing
//! invariants live in one place.

use std::fmt;

/// Entity kind tag stored in the top byte of an identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EntityKind {
    Module = 1,
    Device = 2,
    Feature = 3,
}

impl EntityKind {
    /// Decode the kind tag of a raw identifier
    pub fn of(raw: u32) -> Option<EntityKind> {
        match raw >> 24 {
            1 => Some(EntityKind::Module),
            2 => Some(EntityKind::Device),
            3 => Some(EntityKind::Feature),
            _ => None,
        }
    }
}

/// Identifier of a loaded module
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleId(u32);

/// Identifier of a device owned by a module
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId(u32);

/// Identifier of a feature owned by a device
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FeatureId(u32);

impl ModuleId {
    /// Build a module id from its 1-based load index
    pub fn new(module_idx: u8) -> ModuleId {
        ModuleId(((EntityKind::Module as u32) << 24) | ((module_idx as u32) << 16))
    }

    /// Validate a raw wire value as a module id
    pub fn from_raw(raw: u32) -> Option<ModuleId> {
        if EntityKind::of(raw) == Some(EntityKind::Module) && raw & 0x0000_FFFF == 0 {
            Some(ModuleId(raw))
        } else {
            None
        }
    }

    /// Raw 32-bit wire representation
    pub fn raw(self) -> u32 {
        self.0
    }

    /// 1-based module index
    pub fn module_idx(self) -> u8 {
        (self.0 >> 16) as u8
    }
}

impl DeviceId {
    /// Build a device id under the given module
    pub fn new(module: ModuleId, device_idx: u8) -> DeviceId {
        DeviceId(
            ((EntityKind::Device as u32) << 24)
                | (module.raw() & 0x00FF_0000)
                | ((device_idx as u32) << 8),
        )
    }

    /// Validate a raw wire value as a device id
    pub fn from_raw(raw: u32) -> Option<DeviceId> {
        if EntityKind::of(raw) == Some(EntityKind::Device) && raw & 0x0000_00FF == 0 {
            Some(DeviceId(raw))
        } else {
            None
        }
    }

    /// Raw 32-bit wire representation
    pub fn raw(self) -> u32 {
        self.0
    }

    /// Owning module id, derived by masking
    pub fn module_id(self) -> ModuleId {
        ModuleId(((EntityKind::Module as u32) << 24) | (self.0 & 0x00FF_0000))
    }

    /// 1-based module index
    pub fn module_idx(self) -> u8 {
        (self.0 >> 16) as u8
    }

    /// 1-based device index within the module
    pub fn device_idx(self) -> u8 {
        (self.0 >> 8) as u8
    }
}

impl FeatureId {
    /// Build a feature id under the given device
    pub fn new(device: DeviceId, feature_idx: u8) -> FeatureId {
        FeatureId(
            ((EntityKind::Feature as u32) << 24)
                | (device.raw() & 0x00FF_FF00)
                | feature_idx as u32,
        )
    }

    /// Validate a raw wire value as a feature id
    pub fn from_raw(raw: u32) -> Option<FeatureId> {
        if EntityKind::of(raw) == Some(EntityKind::Feature) {
            Some(FeatureId(raw))
        } else {
            None
        }
    }

    /// Raw 32-bit wire representation
    pub fn raw(self) -> u32 {
        self.0
    }

    /// Owning device id, derived by masking
    pub fn device_id(self) -> DeviceId {
        DeviceId(((EntityKind::Device as u32) << 24) | (self.0 & 0x00FF_FF00))
    }

    /// Owning module id, derived by masking
    pub fn module_id(self) -> ModuleId {
        ModuleId(((EntityKind::Module as u32) << 24) | (self.0 & 0x00FF_0000))
    }

    /// 1-based module index
    pub fn module_idx(self) -> u8 {
        (self.0 >> 16) as u8
    }

    /// 1-based device index within the module
    pub fn device_idx(self) -> u8 {
        (self.0 >> 8) as u8
    }

    /// 1-based feature index within the device
    pub fn feature_idx(self) -> u8 {
        self.0 as u8
    }
}

impl fmt::Debug for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ModuleId({:#010x})", self.0)
    }
}

impl fmt::Debug for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceId({:#010x})", self.0)
    }
}

impl fmt::Debug for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FeatureId({:#010x})", self.0)
    }
}
