//! Joining and leaving missions.

use std::sync::Arc;

use super::{MutationCoordinator, MutationStatus, OptimisticEdit};
use crate::cache::{CacheStore, CacheValue, KeyFilter, KeyScope, QueryKey};
use crate::client::{ClientError, ResourceClient};
use crate::models::{Mission, Participation};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRequest {
    pub user_id: String,
    pub mission_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelRequest {
    pub participation_id: String,
    pub mission_id: String,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    pub participation: Participation,
    /// Server copy after the increment. For an existing participation, whatever was cached.
    pub mission: Option<Mission>,
    /// `false` when the user had already joined and nothing was sent.
    pub created: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled { mission: Mission },
    /// The participation was already gone; the counter was left alone.
    AlreadyCancelled,
}

fn require(field: &str, value: &str) -> Result<(), ClientError> {
    if value.trim().is_empty() {
        return Err(ClientError::Validation(format!("{} is required", field)));
    }
    Ok(())
}

/// Copy of `value` with `f` applied to every cached copy of mission `id`, if there is one.
fn edit_mission_copies(
    value: Option<&CacheValue>,
    id: &str,
    f: impl Fn(&mut Mission),
) -> Option<CacheValue> {
    let mut value = value?.clone();
    let copies = value.missions_mut(id);
    if copies.is_empty() {
        return None;
    }
    copies.into_iter().for_each(f);
    Some(value)
}

struct JoinEdit {
    user_id: String,
    mission_id: String,
    placeholder: Participation,
}

impl OptimisticEdit for JoinEdit {
    type Output = (Participation, Mission);

    fn name(&self) -> &'static str {
        "join_mission"
    }

    fn targets(&self) -> Vec<KeyFilter> {
        vec![
            KeyScope::Missions.into(),
            QueryKey::Mission(self.mission_id.clone()).into(),
            QueryKey::Participations(self.user_id.clone()).into(),
        ]
    }

    fn apply(&self, key: &QueryKey, current: Option<&CacheValue>) -> Option<CacheValue> {
        match key {
            QueryKey::Participations(user_id) if *user_id == self.user_id => {
                let mut list = match current {
                    Some(CacheValue::Participations(list)) => list.clone(),
                    _ => Vec::new(),
                };
                list.push(self.placeholder.clone());
                Some(CacheValue::Participations(list))
            }
            QueryKey::Participations(_) | QueryKey::User(_) => None,
            QueryKey::Missions(_) | QueryKey::Mission(_) => {
                edit_mission_copies(current, &self.mission_id, |m| m.spots_taken += 1)
            }
        }
    }

    fn rollback_invalidations(&self) -> Vec<KeyFilter> {
        vec![KeyScope::Missions.into()]
    }

    fn on_commit(&self, cache: &CacheStore, (participation, mission): &Self::Output) {
        let placeholder_id = &self.placeholder.id;
        cache.update(&QueryKey::Participations(self.user_id.clone()), |value| {
            match value {
                CacheValue::Participations(list) => CacheValue::Participations(
                    list.iter()
                        .map(|p| {
                            if p.id == *placeholder_id {
                                participation.clone()
                            } else {
                                p.clone()
                            }
                        })
                        .collect(),
                ),
                other => other.clone(),
            }
        });

        for scope in [KeyScope::Missions, KeyScope::Mission] {
            cache.update_matching(&scope.into(), |_, value| {
                edit_mission_copies(Some(value), &mission.id, |m| {
                    m.spots_taken = mission.spots_taken
                })
            });
        }
    }
}

struct CancelEdit {
    participation_id: String,
    mission_id: String,
    user_id: String,
}

impl OptimisticEdit for CancelEdit {
    type Output = CancelOutcome;

    fn name(&self) -> &'static str {
        "cancel_participation"
    }

    fn targets(&self) -> Vec<KeyFilter> {
        vec![
            KeyScope::Missions.into(),
            QueryKey::Mission(self.mission_id.clone()).into(),
            QueryKey::Participations(self.user_id.clone()).into(),
        ]
    }

    fn apply(&self, key: &QueryKey, current: Option<&CacheValue>) -> Option<CacheValue> {
        match (key, current) {
            (QueryKey::Participations(user_id), Some(CacheValue::Participations(list)))
                if *user_id == self.user_id =>
            {
                let kept = list
                    .iter()
                    .filter(|p| p.id != self.participation_id)
                    .cloned()
                    .collect();
                Some(CacheValue::Participations(kept))
            }
            (QueryKey::Missions(_) | QueryKey::Mission(_), _) => {
                edit_mission_copies(current, &self.mission_id, |m| {
                    m.spots_taken = (m.spots_taken - 1).max(0)
                })
            }
            _ => None,
        }
    }

    fn rollback_invalidations(&self) -> Vec<KeyFilter> {
        vec![KeyScope::Missions.into()]
    }

    fn restore_on_commit(&self, outcome: &Self::Output) -> Vec<KeyFilter> {
        match outcome {
            CancelOutcome::AlreadyCancelled => vec![
                KeyScope::Missions.into(),
                QueryKey::Mission(self.mission_id.clone()).into(),
            ],
            CancelOutcome::Cancelled { .. } => Vec::new(),
        }
    }

    fn on_commit(&self, cache: &CacheStore, outcome: &Self::Output) {
        if let CancelOutcome::Cancelled { mission } = outcome {
            for scope in [KeyScope::Missions, KeyScope::Mission] {
                cache.update_matching(&scope.into(), |_, value| {
                    edit_mission_copies(Some(value), &mission.id, |m| {
                        m.spots_taken = mission.spots_taken
                    })
                });
            }
        }
    }
}

impl MutationCoordinator {
    /// Confirmed participation for the pair, placeholders included, from the user's cached list.
    pub fn confirmed_participation(&self, user_id: &str, mission_id: &str) -> Option<Participation> {
        let list: Vec<Participation> = self
            .cache()
            .read_as(&QueryKey::Participations(user_id.to_string()))?;
        list.into_iter().find(|p| p.is_active_for(user_id, mission_id))
    }

    /// Best cached copy of a mission: the detail entry, else any list containing it.
    pub fn cached_mission(&self, mission_id: &str) -> Option<Mission> {
        let cache = self.cache();
        if let Some(mission) = cache.read_as::<Mission>(&QueryKey::Mission(mission_id.to_string())) {
            return Some(mission);
        }
        cache
            .keys_matching(&KeyScope::Missions.into())
            .iter()
            .filter_map(|key| cache.read(key))
            .find_map(|value| value.find_mission(mission_id).cloned())
    }

    /// Join a mission: one participation and one spot, shown immediately.
    ///
    /// A pair that already has a confirmed participation in the cache returns it without a
    /// network call.
    pub async fn join(
        &self,
        request: &JoinRequest,
        status: &MutationStatus,
    ) -> Result<JoinOutcome, ClientError> {
        require("userId", &request.user_id)?;
        require("missionId", &request.mission_id)?;

        if let Some(existing) = self.confirmed_participation(&request.user_id, &request.mission_id)
        {
            tracing::debug!(
                user_id = %request.user_id,
                mission_id = %request.mission_id,
                "Already joined, skipping request"
            );
            return Ok(JoinOutcome {
                participation: existing,
                mission: self.cached_mission(&request.mission_id),
                created: false,
            });
        }

        let edit = JoinEdit {
            user_id: request.user_id.clone(),
            mission_id: request.mission_id.clone(),
            placeholder: Participation::placeholder(&request.user_id, &request.mission_id),
        };
        let op = create_then_increment(
            Arc::clone(self.backend()),
            request.user_id.clone(),
            request.mission_id.clone(),
        );

        let (participation, mission) = self.run(&edit, status, op).await?;
        Ok(JoinOutcome {
            participation,
            mission: Some(mission),
            created: true,
        })
    }

    /// Leave a mission: drop the participation and free one spot, shown immediately.
    pub async fn cancel(
        &self,
        request: &CancelRequest,
        status: &MutationStatus,
    ) -> Result<CancelOutcome, ClientError> {
        require("participationId", &request.participation_id)?;
        require("missionId", &request.mission_id)?;
        require("userId", &request.user_id)?;

        let edit = CancelEdit {
            participation_id: request.participation_id.clone(),
            mission_id: request.mission_id.clone(),
            user_id: request.user_id.clone(),
        };
        let op = delete_then_decrement(
            Arc::clone(self.backend()),
            request.participation_id.clone(),
            request.mission_id.clone(),
        );

        self.run(&edit, status, op).await
    }
}

async fn create_then_increment(
    backend: Arc<dyn ResourceClient>,
    user_id: String,
    mission_id: String,
) -> Result<(Participation, Mission), ClientError> {
    let participation = backend.create_participation(&user_id, &mission_id).await?;

    match backend.adjust_spots(&mission_id, 1).await {
        Ok(mission) => Ok((participation, mission)),
        Err(e) => {
            // Do not leave a participation without its spot.
            if let Err(undo) = backend.delete_participation(&participation.id).await {
                tracing::error!(
                    participation_id = %participation.id,
                    "Failed to undo participation after counter error: {}",
                    undo
                );
            }
            Err(e)
        }
    }
}

async fn delete_then_decrement(
    backend: Arc<dyn ResourceClient>,
    participation_id: String,
    mission_id: String,
) -> Result<CancelOutcome, ClientError> {
    let deleted = match backend.delete_participation(&participation_id).await {
        Ok(deleted) => deleted,
        Err(ClientError::NotFound(_)) => false,
        Err(e) => return Err(e),
    };

    if !deleted {
        tracing::debug!(participation_id = %participation_id, "Participation already gone");
        return Ok(CancelOutcome::AlreadyCancelled);
    }

    let mission = backend.adjust_spots(&mission_id, -1).await?;
    Ok(CancelOutcome::Cancelled { mission })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Category;

    fn mission(id: &str, taken: i64, total: i64) -> Mission {
        Mission {
            id: id.to_string(),
            title: "Haie bocagère".to_string(),
            description: String::new(),
            category: Category::TreePlanting,
            date: "2025-11-20T09:00:00Z".to_string(),
            location: "Quimper".to_string(),
            spots_total: total,
            spots_taken: taken,
            image: String::new(),
            organizer: String::new(),
            duration: String::new(),
        }
    }

    #[test]
    fn test_join_edit_adds_spot_and_placeholder() {
        let edit = JoinEdit {
            user_id: "u1".into(),
            mission_id: "m1".into(),
            placeholder: Participation::placeholder("u1", "m1"),
        };

        let list = CacheValue::Missions(vec![mission("m1", 3, 10), mission("m2", 1, 10)]);
        let Some(CacheValue::Missions(edited)) = edit.apply(&QueryKey::all_missions(), Some(&list))
        else {
            panic!("list should be edited");
        };
        assert_eq!(edited[0].spots_taken, 4);
        assert_eq!(edited[1].spots_taken, 1);

        // Absent detail stays absent; a list without the mission is untouched.
        assert_eq!(edit.apply(&QueryKey::Mission("m1".into()), None), None);
        let other = CacheValue::Missions(vec![mission("m2", 1, 10)]);
        assert_eq!(edit.apply(&QueryKey::all_missions(), Some(&other)), None);

        let Some(CacheValue::Participations(created)) =
            edit.apply(&QueryKey::Participations("u1".into()), None)
        else {
            panic!("participation list should be created");
        };
        assert_eq!(created.len(), 1);
        assert!(created[0].is_placeholder());
    }

    #[test]
    fn test_cancel_edit_floors_at_zero() {
        let edit = CancelEdit {
            participation_id: "p1".into(),
            mission_id: "m1".into(),
            user_id: "u1".into(),
        };
        let detail = CacheValue::Mission(mission("m1", 0, 10));
        assert_eq!(
            edit.apply(&QueryKey::Mission("m1".into()), Some(&detail)),
            Some(CacheValue::Mission(mission("m1", 0, 10)))
        );
        assert_eq!(edit.apply(&QueryKey::Participations("u1".into()), None), None);
    }
}
