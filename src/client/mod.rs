//! Typed access to the mission backend.
//!
//! [`ResourceClient`] is the seam between the sync layer and the network. It never retries;
//! retry policy belongs to the query layer.

mod http;

pub use http::HttpClient;

use async_trait::async_trait;
use thiserror::Error;

use crate::guard::GuardViolation;
use crate::models::{
    LoginRequest, Mission, MissionFilter, MissionPatch, Participation, ParticipationQuery,
    RegisterRequest, User,
};

/// Failure of one backend operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },
    #[error("validation error: {0}")]
    Validation(String),
}

impl ClientError {
    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Network(_) | ClientError::Server { .. })
    }
}

impl From<GuardViolation> for ClientError {
    fn from(violation: GuardViolation) -> Self {
        match violation {
            GuardViolation::InvalidDelta(_) => ClientError::Validation(violation.to_string()),
            _ => ClientError::Conflict(violation.to_string()),
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

#[async_trait]
pub trait ResourceClient: Send + Sync {
    async fn list_missions(&self, filter: &MissionFilter) -> ClientResult<Vec<Mission>>;

    async fn get_mission(&self, id: &str) -> ClientResult<Mission>;

    async fn patch_mission(&self, id: &str, patch: &MissionPatch) -> ClientResult<Mission>;

    /// Move `spotsTaken` by `delta` (+1 or -1) in one server-side step.
    async fn adjust_spots(&self, id: &str, delta: i64) -> ClientResult<Mission>;

    async fn list_participations(
        &self,
        query: &ParticipationQuery,
    ) -> ClientResult<Vec<Participation>>;

    async fn create_participation(
        &self,
        user_id: &str,
        mission_id: &str,
    ) -> ClientResult<Participation>;

    /// `Ok(false)` when there was nothing to delete.
    async fn delete_participation(&self, id: &str) -> ClientResult<bool>;

    async fn get_user(&self, id: &str) -> ClientResult<User>;

    async fn register(&self, request: &RegisterRequest) -> ClientResult<User>;

    async fn login(&self, request: &LoginRequest) -> ClientResult<User>;
}
