//! Wire message catalogue and frame builders
//!
//! One byte of message type follows the length prefix. The two directions
//! have independent ordinal spaces. Inbound payloads are decoded inline by
//! the dispatch loop; everything the server sends is built here.
//!
//! `PROFILE_SAVE_RESULT` and `PROFILE_DELETE_RESULT` carry the profile id
//! and a one-byte success flag; `PROFILE_LOAD_RESULT` carries the id and a
//! status byte (Loading=0, Failed=1, Loaded=2).

use crate::model::feature::FeatureValue;
use crate::model::id::FeatureId;
use crate::model::Registry;
use crate::packet::Packet;
use crate::profile::{ProfileStatus, ProfileStore};

// Server → client
pub const S_DISCONNECT: u8 = 0;
pub const S_FEATURE_CHANGED_INT: u8 = 1;
pub const S_FEATURE_CHANGED_STRING: u8 = 2;
pub const S_FEATURE_ERROR: u8 = 3;
pub const S_RETRIEVE_RESPONSE: u8 = 4;
pub const S_PING: u8 = 5;
pub const S_UPDATE: u8 = 6;
pub const S_PROFILE_LOAD_RESULT: u8 = 7;
pub const S_PROFILE_SAVE_RESULT: u8 = 8;
pub const S_PROFILE_DELETE_RESULT: u8 = 9;
pub const S_PROFILE_LIST_RESPONSE: u8 = 10;

// Client → server
pub const C_PONG: u8 = 0;
pub const C_FEATURE_SET_INT: u8 = 1;
pub const C_FEATURE_SET_STRING: u8 = 2;
pub const C_RETRIEVE: u8 = 3;
pub const C_UPDATE: u8 = 4;
pub const C_PROFILE_LOAD: u8 = 5;
pub const C_PROFILE_SAVE: u8 = 6;
pub const C_PROFILE_DELETE: u8 = 7;
pub const C_PROFILE_LIST: u8 = 8;

pub fn disconnect() -> Vec<u8> {
    Packet::frame(S_DISCONNECT).finish()
}

pub fn ping(epoch_seconds: u64) -> Vec<u8> {
    let mut p = Packet::frame(S_PING);
    p.append_u64(epoch_seconds);
    p.finish()
}

pub fn feature_changed(feature: FeatureId, value: i32) -> Vec<u8> {
    let mut p = Packet::frame(S_FEATURE_CHANGED_INT);
    p.append_u32(feature.raw());
    p.append_i32(value);
    p.finish()
}

/// Reports a rejected set request back to its sender
pub fn feature_error(raw_feature: u32) -> Vec<u8> {
    let mut p = Packet::frame(S_FEATURE_ERROR);
    p.append_u32(raw_feature);
    p.finish()
}

/// Serialize the full device tree: a one-byte module count, then per module
/// {id, name, description, version, device count, devices}, each device
/// {id, name, description, flags, feature count, features}, each feature
/// {id, name, description, type, flags, type-specific payload}.
pub fn retrieve_response(registry: &Registry) -> Vec<u8> {
    let mut p = Packet::frame(S_RETRIEVE_RESPONSE);
    p.append_u8(registry.module_count() as u8);

    for index in 0..registry.module_count() {
        let Some(module) = registry.module_at(index) else {
            break;
        };
        p.append_u32(module.id.raw());
        p.append_string(&module.name);
        p.append_string(&module.description);
        p.append_string(&module.version);

        p.append_u32(module.devices.len() as u32);
        for device in &module.devices {
            p.append_u32(device.id.raw());
            p.append_string(&device.name);
            p.append_string(&device.description);
            p.append_u32(device.flags);

            p.append_u32(device.features.len() as u32);
            for feature in &device.features {
                p.append_u32(feature.id.raw());
                p.append_string(&feature.name);
                p.append_string(&feature.description);
                p.append_u32(feature.value.type_tag());
                p.append_u32(feature.flags);

                match &feature.value {
                    FeatureValue::Enum { labels, value } => {
                        p.append_u32(labels.len() as u32);
                        for label in labels {
                            p.append_string(label);
                        }
                        p.append_i32(*value);
                    }
                    FeatureValue::Switch { state } => {
                        p.append_i32(*state);
                    }
                    FeatureValue::Range { start, end, value } => {
                        p.append_i32(*start);
                        p.append_i32(*end);
                        p.append_i32(*value);
                    }
                }
            }
        }
    }
    p.finish()
}

/// Current value of every feature as (id, value) pairs
pub fn update_snapshot(registry: &Registry) -> Vec<u8> {
    let mut p = Packet::frame(S_UPDATE);
    let mut count = 0u32;
    p.append_u32(0); // patched below

    for index in 0..registry.module_count() {
        let Some(module) = registry.module_at(index) else {
            break;
        };
        for device in &module.devices {
            for feature in &device.features {
                p.append_u32(feature.id.raw());
                p.append_i32(feature.value.current());
                count += 1;
            }
        }
    }

    let end = p.size();
    // Count sits right behind the type byte
    if p.seek(5).is_ok() {
        p.append_u32(count);
        let _ = p.seek(end);
    }
    p.finish()
}

pub fn profile_load_result(profile_id: u32, status: ProfileStatus) -> Vec<u8> {
    let mut p = Packet::frame(S_PROFILE_LOAD_RESULT);
    p.append_u32(profile_id);
    p.append_u8(status.code());
    p.finish()
}

pub fn profile_save_result(profile_id: u32, success: bool) -> Vec<u8> {
    let mut p = Packet::frame(S_PROFILE_SAVE_RESULT);
    p.append_u32(profile_id);
    p.append_u8(success as u8);
    p.finish()
}

pub fn profile_delete_result(profile_id: u32, success: bool) -> Vec<u8> {
    let mut p = Packet::frame(S_PROFILE_DELETE_RESULT);
    p.append_u32(profile_id);
    p.append_u8(success as u8);
    p.finish()
}

/// All stored profiles: count, then per profile {id, name, step count,
/// (feature, value) pairs} — the same record shape the store persists.
pub fn profile_list_response(store: &ProfileStore) -> Vec<u8> {
    let mut p = Packet::frame(S_PROFILE_LIST_RESPONSE);
    let profiles = store.profiles();
    p.append_u32(profiles.len() as u32);
    for profile in profiles {
        p.append_u32(profile.id);
        p.append_string(&profile.name);
        p.append_u32(profile.steps.len() as u32);
        for step in &profile.steps {
            p.append_u32(step.feature.raw());
            p.append_u32(step.value as u32);
        }
    }
    p.finish()
}
