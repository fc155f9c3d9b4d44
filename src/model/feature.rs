//! Features: single controllable or observable values on a device

use crate::model::id::FeatureId;

/// Value has not been retrieved from the hardware yet
pub const VALUE_UNKNOWN: i32 = 0x0FFF_FFFF;

/// Last set attempt was rejected by the hardware
pub const VALUE_ERROR: i32 = 0x0EFF_FFFF;

/// Feature should be rendered as a slider
pub const FLAG_SLIDER: u32 = 1 << 0;

/// Displayed scale runs opposite to the raw value
pub const FLAG_INVERSE: u32 = 1 << 1;

/// Toggling this feature powers the owning device up/down
pub const FLAG_POWER: u32 = 1 << 2;

/// Device flag: the device is in standby (mirrors its POWER feature)
pub const DEVICE_FLAG_STANDBY: u32 = 1 << 2;

/// Wire type tags for the three feature variants
pub const TYPE_RANGE: u32 = 1;
pub const TYPE_SWITCH: u32 = 2;
pub const TYPE_ENUM: u32 = 3;

/// Type-specific payload of a feature
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureValue {
    /// Continuous value in `[start, end]`
    Range { start: i32, end: i32, value: i32 },
    /// Binary state, 0 or 1
    Switch { state: i32 },
    /// One of an ordered set of labelled values
    Enum { labels: Vec<String>, value: i32 },
}

impl FeatureValue {
    /// Wire type tag for this variant
    pub fn type_tag(&self) -> u32 {
        match self {
            FeatureValue::Range { .. } => TYPE_RANGE,
            FeatureValue::Switch { .. } => TYPE_SWITCH,
            FeatureValue::Enum { .. } => TYPE_ENUM,
        }
    }

    /// Current value (may be a sentinel)
    pub fn current(&self) -> i32 {
        match self {
            FeatureValue::Range { value, .. } => *value,
            FeatureValue::Switch { state } => *state,
            FeatureValue::Enum { value, .. } => *value,
        }
    }

    /// Store a confirmed value without validation; sentinels are allowed
    pub fn store(&mut self, v: i32) {
        match self {
            FeatureValue::Range { value, .. } => *value = v,
            FeatureValue::Switch { state } => *state = v,
            FeatureValue::Enum { value, .. } => *value = v,
        }
    }

    /// Check a requested value against the type constraints. Sentinels are
    /// never valid targets.
    pub fn in_bounds(&self, v: i32) -> bool {
        match self {
            FeatureValue::Range { start, end, .. } => v >= *start && v <= *end,
            FeatureValue::Switch { .. } => v == 0 || v == 1,
            FeatureValue::Enum { labels, .. } => v >= 0 && (v as usize) < labels.len(),
        }
    }
}

/// A single controllable value on a device
#[derive(Debug, Clone)]
pub struct Feature {
    pub id: FeatureId,
    pub name: String,
    pub description: String,
    pub flags: u32,
    pub value: FeatureValue,
}

impl Feature {
    /// Range feature starting at UNKNOWN
    pub fn range(id: FeatureId, name: &str, description: &str, start: i32, end: i32) -> Feature {
        Feature {
            id,
            name: name.to_string(),
            description: description.to_string(),
            flags: 0,
            value: FeatureValue::Range {
                start,
                end,
                value: VALUE_UNKNOWN,
            },
        }
    }

    /// Switch feature starting at UNKNOWN
    pub fn switch(id: FeatureId, name: &str, description: &str) -> Feature {
        Feature {
            id,
            name: name.to_string(),
            description: description.to_string(),
            flags: 0,
            value: FeatureValue::Switch {
                state: VALUE_UNKNOWN,
            },
        }
    }

    /// Enum feature starting at UNKNOWN
    pub fn enumeration(
        id: FeatureId,
        name: &str,
        description: &str,
        labels: &[&str],
    ) -> Feature {
        Feature {
            id,
            name: name.to_string(),
            description: description.to_string(),
            flags: 0,
            value: FeatureValue::Enum {
                labels: labels.iter().map(|s| s.to_string()).collect(),
                value: VALUE_UNKNOWN,
            },
        }
    }

    /// Builder-style flag setter
    pub fn with_flags(mut self, flags: u32) -> Feature {
        self.flags = flags;
        self
    }
}
