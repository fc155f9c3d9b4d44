//! In-memory device model: Modules → Devices → Features
//!
//! Identifiers are bit-packed 32-bit values ([`id`]); the tree itself is held
//! by the [`registry::Registry`], which also owns the drivers.

pub mod device;
pub mod feature;
pub mod id;
pub mod module;
pub mod registry;

pub use device::Device;
pub use feature::{Feature, FeatureValue};
pub use id::{DeviceId, EntityKind, FeatureId, ModuleId};
pub use module::Module;
pub use registry::{Registry, SetOutcome};
