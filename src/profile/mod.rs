//! Profiles: named, ordered lists of feature target values
//!
//! A profile is applied as one logical operation; the [`engine`] walks the
//! steps in order and waits for driver confirmation between them, the
//! [`store`] persists profiles across restarts.

pub mod engine;
pub mod store;

pub use engine::ProfileEngine;
pub use store::ProfileStore;

use crate::model::id::FeatureId;

/// One step of a profile: drive a feature to a target value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileStep {
    pub feature: FeatureId,
    pub value: i32,
}

/// A named, ordered list of feature target values
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    /// Server-assigned id, never 0
    pub id: u32,
    pub name: String,
    pub steps: Vec<ProfileStep>,
}

/// Execution status reported to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProfileStatus {
    /// Steps are being applied, confirmations outstanding
    Loading = 0,
    /// A step was invalid or rejected; the profile was aborted
    Failed = 1,
    /// Every step confirmed or already in effect
    Loaded = 2,
}

impl ProfileStatus {
    /// Wire representation
    pub fn code(self) -> u8 {
        self as u8
    }
}
