//! Devices: controllable physical units owning an ordered feature list

use crate::model::feature::Feature;
use crate::model::id::{DeviceId, FeatureId};

/// A controllable physical unit (receiver, light, switch box)
#[derive(Debug, Clone)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    pub description: String,
    pub flags: u32,
    pub features: Vec<Feature>,
}

impl Device {
    pub fn new(id: DeviceId, name: &str, description: &str) -> Device {
        Device {
            id,
            name: name.to_string(),
            description: description.to_string(),
            flags: 0,
            features: Vec::new(),
        }
    }

    /// Locate a feature by id (small lists, linear scan)
    pub fn feature(&self, id: FeatureId) -> Option<&Feature> {
        self.features.iter().find(|f| f.id == id)
    }

    pub fn feature_mut(&mut self, id: FeatureId) -> Option<&mut Feature> {
        self.features.iter_mut().find(|f| f.id == id)
    }
}
