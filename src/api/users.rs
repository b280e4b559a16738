//! Account endpoints.

use axum::{
    extract::{Path, State},
    Json,
};

use super::{error, success, ApiResult};
use crate::errors::AppError;
use crate::models::{LoginRequest, RegisterRequest, User};
use crate::AppState;

/// POST /api/users - Register.
pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> ApiResult<User> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.create_user(&request).await {
        Ok(user) => {
            tracing::info!(user_id = %user.id, "Account registered");
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(user, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/users/login - Check credentials and return the account.
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> ApiResult<User> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    if request.email.trim().is_empty() || request.password.is_empty() {
        return error(
            AppError::Validation("Email and password are required".to_string()),
            revision_id,
        );
    }

    match state
        .repo
        .verify_credentials(&request.email, &request.password)
        .await
    {
        Ok(user) => success(user, revision_id),
        Err(e) => error(e, revision_id),
    }
}

/// GET /api/users/:id - Profile and impact stats.
pub async fn get_user(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<User> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.get_user(&id).await {
        Ok(Some(user)) => success(user, revision_id),
        Ok(None) => error(
            AppError::NotFound(format!("User {} not found", id)),
            revision_id,
        ),
        Err(e) => error(e, revision_id),
    }
}
