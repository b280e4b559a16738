//! Participation rules shared by the SQLite repository and in-memory backends.
//!
//! Every function here is pure: callers load the current rows, ask the guard, then write.

use thiserror::Error;

use crate::models::{Mission, Participation};

/// A write that would break a participation invariant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuardViolation {
    #[error("user {user_id} already joined mission {mission_id}")]
    AlreadyJoined { user_id: String, mission_id: String },
    #[error("mission {mission_id} has no spots left")]
    MissionFull { mission_id: String },
    #[error("spot delta must be +1 or -1, got {0}")]
    InvalidDelta(i64),
}

pub struct ParticipationGuard;

impl ParticipationGuard {
    /// Allow a new participation only if the pair has no confirmed one yet.
    pub fn admit(
        user_id: &str,
        mission_id: &str,
        existing: &[Participation],
    ) -> Result<(), GuardViolation> {
        if existing.iter().any(|p| p.is_active_for(user_id, mission_id)) {
            return Err(GuardViolation::AlreadyJoined {
                user_id: user_id.to_string(),
                mission_id: mission_id.to_string(),
            });
        }
        Ok(())
    }

    /// New `spotsTaken` after applying `delta`.
    ///
    /// Increments past `spotsTotal` are rejected; decrements stop at zero.
    pub fn spots_after(mission: &Mission, delta: i64) -> Result<i64, GuardViolation> {
        match delta {
            1 if mission.spots_taken >= mission.spots_total => Err(GuardViolation::MissionFull {
                mission_id: mission.id.clone(),
            }),
            1 => Ok(mission.spots_taken + 1),
            -1 => Ok((mission.spots_taken - 1).max(0)),
            other => Err(GuardViolation::InvalidDelta(other)),
        }
    }
}
