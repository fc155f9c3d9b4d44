//! Profile execution engine
//!
//! Applies a profile's steps strictly in order. A step whose target value is
//! already in effect is skipped synchronously; a step the driver accepted
//! parks the engine until the matching confirmation arrives through the
//! driver event inbox. At most one profile is in flight at a time, and the
//! engine lives on the server thread, so no locking is involved.
//!
//! An invalid or rejected step aborts the whole profile; there is no
//! skip-and-continue. Re-sending a command whose target is already correct
//! would be visible on some hardware (relay clicks, display flicker), which
//! is why the skip goes through the registry's `AlreadyActive` check instead
//! of blindly re-driving every step.

use crate::error::{Error, Result};
use crate::model::{Registry, SetOutcome};
use crate::profile::{Profile, ProfileStatus, ProfileStep, ProfileStore};
use crate::model::id::FeatureId;

/// The load that is currently waiting for a driver confirmation
#[derive(Debug, Clone, Copy)]
struct Pending {
    profile_id: u32,
    cursor: usize,
}

/// Outcome of walking steps from a cursor position
enum Advance {
    Done,
    Failed,
    Awaiting(usize),
}

#[derive(Default)]
pub struct ProfileEngine {
    pending: Option<Pending>,
}

impl ProfileEngine {
    pub fn new() -> ProfileEngine {
        ProfileEngine { pending: None }
    }

    /// Id of the profile currently in flight, if any
    pub fn loading(&self) -> Option<u32> {
        self.pending.map(|p| p.profile_id)
    }

    /// Start applying a profile. Returns the immediate status: `Loaded` if
    /// every step was already in effect, `Loading` if a confirmation is now
    /// outstanding, `Failed` if a step was invalid.
    pub fn load(
        &mut self,
        id: u32,
        store: &ProfileStore,
        registry: &mut Registry,
    ) -> Result<ProfileStatus> {
        if let Some(pending) = self.pending {
            return Err(Error::ProfileBusy(pending.profile_id));
        }
        let profile = store.get(id).ok_or(Error::UnknownProfile(id))?;
        log::info!("Loading profile {} ('{}')", profile.id, profile.name);
        Ok(self.run(profile, 0, registry))
    }

    /// Feed one confirmed feature change from the driver inbox. Returns a
    /// status to broadcast when the in-flight load finishes either way.
    pub fn on_feature_changed(
        &mut self,
        feature: FeatureId,
        value: i32,
        store: &ProfileStore,
        registry: &mut Registry,
    ) -> Option<(u32, ProfileStatus)> {
        let pending = self.pending?;
        let Some(profile) = store.get(pending.profile_id) else {
            // Deletion of an executing profile is rejected upstream; if the
            // profile is gone anyway the load cannot continue.
            self.pending = None;
            return Some((pending.profile_id, ProfileStatus::Failed));
        };

        let step = profile.steps[pending.cursor];
        if step.feature != feature {
            return None;
        }

        // A non-target value means a third party drove the feature elsewhere
        // while we waited; retry the step from scratch.
        let next = if value == step.value {
            pending.cursor + 1
        } else {
            log::debug!(
                "Profile {} step {} got value {}, expected {}; re-issuing",
                profile.id,
                pending.cursor,
                value,
                step.value
            );
            pending.cursor
        };

        self.pending = None;
        match self.run(profile, next, registry) {
            ProfileStatus::Loading => None,
            done => Some((profile.id, done)),
        }
    }

    /// Validate and persist a profile. Every step must resolve to a feature
    /// and pass its bounds check before anything is written.
    pub fn save(
        &mut self,
        profile: Profile,
        store: &mut ProfileStore,
        registry: &Registry,
    ) -> Result<u32> {
        if profile.id != 0 && self.loading() == Some(profile.id) {
            return Err(Error::ProfileBusy(profile.id));
        }
        for step in &profile.steps {
            validate_step(step, registry)?;
        }
        store.save(profile)
    }

    /// Delete a profile; the one currently executing cannot be deleted
    pub fn delete(&mut self, id: u32, store: &mut ProfileStore) -> Result<()> {
        if self.loading() == Some(id) {
            return Err(Error::ProfileBusy(id));
        }
        store.delete(id)
    }

    /// Walk steps from `cursor`, recording the pending position when a step
    /// goes out to the hardware.
    fn run(&mut self, profile: &Profile, cursor: usize, registry: &mut Registry) -> ProfileStatus {
        match execute(profile, cursor, registry) {
            Advance::Done => {
                log::info!("Profile {} loaded", profile.id);
                ProfileStatus::Loaded
            }
            Advance::Failed => {
                log::warn!("Profile {} failed at step {}", profile.id, cursor);
                ProfileStatus::Failed
            }
            Advance::Awaiting(at) => {
                self.pending = Some(Pending {
                    profile_id: profile.id,
                    cursor: at,
                });
                ProfileStatus::Loading
            }
        }
    }
}

fn execute(profile: &Profile, mut cursor: usize, registry: &mut Registry) -> Advance {
    while cursor < profile.steps.len() {
        let step = profile.steps[cursor];
        match registry.set_value(step.feature, step.value) {
            SetOutcome::AlreadyActive => cursor += 1,
            SetOutcome::Applied => return Advance::Awaiting(cursor),
            SetOutcome::NotFound | SetOutcome::OutOfBounds | SetOutcome::Rejected => {
                return Advance::Failed
            }
        }
    }
    Advance::Done
}

fn validate_step(step: &ProfileStep, registry: &Registry) -> Result<()> {
    let feature = registry
        .feature(step.feature)
        .ok_or_else(|| Error::InvalidProfileStep(format!("unknown feature {:?}", step.feature)))?;
    if !feature.value.in_bounds(step.value) {
        return Err(Error::InvalidProfileStep(format!(
            "value {} out of bounds for '{}'",
            step.value, feature.name
        )));
    }
    Ok(())
}
