//! Mission endpoints.

use std::collections::HashSet;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;

use super::{error, success, ApiResult};
use crate::errors::AppError;
use crate::models::{Category, Mission, MissionPatch, SpotAdjustment};
use crate::AppState;

/// Query string of the list endpoint. Both parameters are optional.
#[derive(Debug, Default, Deserialize)]
pub struct ListMissionsParams {
    pub category: Option<String>,
    pub q: Option<String>,
}

/// GET /api/missions - List missions by date, filtered by category and free text.
pub async fn list_missions(
    State(state): State<AppState>,
    Query(params): Query<ListMissionsParams>,
) -> ApiResult<Vec<Mission>> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    let category = match params.category.as_deref().map(str::trim) {
        None | Some("") | Some("all") => None,
        Some(raw) => match Category::parse(raw) {
            Some(category) => Some(category),
            None => {
                return error(
                    AppError::Validation(format!("Unknown category: {}", raw)),
                    revision_id,
                )
            }
        },
    };

    let missions = match state.repo.list_missions(category).await {
        Ok(missions) => missions,
        Err(e) => return error(e, revision_id),
    };

    let text = params.q.as_deref().map(str::trim).unwrap_or_default();
    if text.is_empty() {
        return success(missions, revision_id);
    }

    match state.search.search_all(text) {
        Ok(hits) => {
            let matched: HashSet<String> = hits.into_iter().map(|hit| hit.mission_id).collect();
            let missions = missions
                .into_iter()
                .filter(|m| matched.contains(&m.id))
                .collect();
            success(missions, revision_id)
        }
        Err(e) => error(e, revision_id),
    }
}

/// GET /api/missions/:id - Get a single mission.
pub async fn get_mission(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Mission> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.get_mission(&id).await {
        Ok(Some(mission)) => success(mission, revision_id),
        Ok(None) => error(
            AppError::NotFound(format!("Mission {} not found", id)),
            revision_id,
        ),
        Err(e) => error(e, revision_id),
    }
}

/// PATCH /api/missions/:id - Partial update.
pub async fn patch_mission(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<MissionPatch>,
) -> ApiResult<Mission> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.patch_mission(&id, &patch).await {
        Ok(mission) => {
            if let Err(e) = state.search.index_mission(&mission).await {
                tracing::warn!("Failed to re-index mission {}: {}", mission.id, e);
            }

            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(mission, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/missions/:id/spots - Take or release one spot.
pub async fn adjust_spots(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(adjustment): Json<SpotAdjustment>,
) -> ApiResult<Mission> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.adjust_spots(&id, adjustment.delta).await {
        Ok(mission) => {
            tracing::debug!(
                mission_id = %mission.id,
                delta = adjustment.delta,
                spots_taken = mission.spots_taken,
                "Spot counter adjusted"
            );
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(mission, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}
