//! On-disk profile store
//!
//! Profiles are persisted as a flat record sequence built with the packet
//! codec: `{id:u32, name:string, step_count:u32, (feature:u32, value:u32)*}`
//! per profile, no framing. The file is rewritten in full on every change via
//! a temp file and an atomic rename, so a crash mid-write leaves the previous
//! store intact.

use crate::error::{Error, Result};
use crate::model::id::FeatureId;
use crate::packet::Packet;
use crate::profile::{Profile, ProfileStep};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub struct ProfileStore {
    path: PathBuf,
    profiles: Vec<Profile>,
    next_id: u32,
}

impl ProfileStore {
    /// Open a store, loading any existing file. A missing file is an empty
    /// store, not an error.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<ProfileStore> {
        let path = path.as_ref().to_path_buf();
        let profiles = match fs::read(&path) {
            Ok(bytes) => decode_records(&bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        let next_id = profiles.iter().map(|p| p.id).max().unwrap_or(0) + 1;
        log::info!("Loaded {} profile(s) from {}", profiles.len(), path.display());
        Ok(ProfileStore {
            path,
            profiles,
            next_id,
        })
    }

    /// All stored profiles in id-assignment order
    pub fn profiles(&self) -> &[Profile] {
        &self.profiles
    }

    /// Look up a profile by id
    pub fn get(&self, id: u32) -> Option<&Profile> {
        self.profiles.iter().find(|p| p.id == id)
    }

    /// Insert or replace a profile and rewrite the file. An id of 0 requests
    /// a fresh server-assigned id. Returns the effective id.
    pub fn save(&mut self, mut profile: Profile) -> Result<u32> {
        if profile.id == 0 {
            profile.id = self.next_id;
            self.next_id += 1;
        }
        let id = profile.id;
        match self.profiles.iter_mut().find(|p| p.id == id) {
            Some(existing) => *existing = profile,
            None => {
                self.next_id = self.next_id.max(id + 1);
                self.profiles.push(profile);
            }
        }
        self.persist()?;
        log::info!("Saved profile {}", id);
        Ok(id)
    }

    /// Remove a profile and rewrite the file
    pub fn delete(&mut self, id: u32) -> Result<()> {
        let before = self.profiles.len();
        self.profiles.retain(|p| p.id != id);
        if self.profiles.len() == before {
            return Err(Error::UnknownProfile(id));
        }
        self.persist()?;
        log::info!("Deleted profile {}", id);
        Ok(())
    }

    fn persist(&self) -> Result<()> {
        let mut packet = Packet::new();
        for profile in &self.profiles {
            encode_record(&mut packet, profile);
        }

        let tmp = self.path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(packet.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn encode_record(packet: &mut Packet, profile: &Profile) {
    packet.append_u32(profile.id);
    packet.append_string(&profile.name);
    packet.append_u32(profile.steps.len() as u32);
    for step in &profile.steps {
        packet.append_u32(step.feature.raw());
        packet.append_u32(step.value as u32);
    }
}

/// Decode the record sequence, dropping records that no longer make sense.
/// A truncated tail aborts the scan; everything read so far is kept.
fn decode_records(bytes: &[u8]) -> Vec<Profile> {
    let mut packet = Packet::from_bytes(bytes);
    let mut profiles = Vec::new();

    while packet.cursor() < packet.size() {
        match decode_record(&mut packet) {
            Ok(Some(profile)) => profiles.push(profile),
            Ok(None) => {} // dropped, already logged
            Err(e) => {
                log::warn!("Profile store truncated: {}", e);
                break;
            }
        }
    }
    profiles
}

fn decode_record(packet: &mut Packet) -> Result<Option<Profile>> {
    let id = packet.read_u32()?;
    let name = packet.read_string()?;
    let count = packet.read_u32()?;

    // The count comes from disk and may be corrupt; cap the pre-allocation
    let mut steps = Vec::with_capacity(count.min(128) as usize);
    let mut valid = true;
    for _ in 0..count {
        let raw = packet.read_u32()?;
        let value = packet.read_u32()? as i32;
        match FeatureId::from_raw(raw) {
            Some(feature) => steps.push(ProfileStep { feature, value }),
            None => valid = false,
        }
    }

    if !valid {
        log::warn!("Dropping profile {} ('{}'): stale feature id", id, name);
        return Ok(None);
    }
    Ok(Some(Profile { id, name, steps }))
}
