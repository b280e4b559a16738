//! Participation endpoints.
//!
//! Creating a participation does not move the spot counter; clients call
//! `POST /api/missions/{id}/spots` afterwards.

use axum::{
    extract::{Path, Query, State},
    Json,
};

use super::{error, success, ApiResult};
use crate::errors::AppError;
use crate::models::{CreateParticipationRequest, DeleteOutcome, Participation, ParticipationQuery};
use crate::AppState;

/// GET /api/participations - Filter by any of userId, missionId and status.
pub async fn list_participations(
    State(state): State<AppState>,
    Query(query): Query<ParticipationQuery>,
) -> ApiResult<Vec<Participation>> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.list_participations(&query).await {
        Ok(participations) => success(participations, revision_id),
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/participations - Join a mission.
pub async fn create_participation(
    State(state): State<AppState>,
    Json(request): Json<CreateParticipationRequest>,
) -> ApiResult<Participation> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    if request.user_id.trim().is_empty() || request.mission_id.trim().is_empty() {
        return error(
            AppError::Validation("userId and missionId are required".to_string()),
            revision_id,
        );
    }

    match state
        .repo
        .create_participation(&request.user_id, &request.mission_id)
        .await
    {
        Ok(participation) => {
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(participation, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// DELETE /api/participations/:id - Leave a mission. Unknown ids report `deleted: false`.
pub async fn delete_participation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<DeleteOutcome> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.delete_participation(&id).await {
        Ok(deleted) => {
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(DeleteOutcome { deleted }, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}
