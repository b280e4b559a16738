//! Caller-facing handles: typed queries and the join/cancel mutations.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::cache::{CacheConfig, CacheStore, QueryKey};
use crate::client::{ClientError, ClientResult, HttpClient, ResourceClient};
use crate::config::ClientConfig;
use crate::models::{Category, Mission, MissionFilter, Participation, User};
use crate::mutation::{
    CancelOutcome, CancelRequest, JoinOutcome, JoinRequest, MutationCoordinator, MutationState,
    MutationStatus,
};
use crate::query::{Query, QueryClient, RetryPolicy};

/// Entry point of the sync layer. Cheap to clone; clones share one cache.
#[derive(Clone)]
pub struct EcoClient {
    queries: QueryClient,
    coordinator: MutationCoordinator,
}

impl EcoClient {
    pub fn new(backend: Arc<dyn ResourceClient>, cache: CacheConfig, retry: RetryPolicy) -> Self {
        let queries = QueryClient::new(Arc::new(CacheStore::new(cache)), backend, retry);
        let coordinator = MutationCoordinator::new(queries.clone());
        Self {
            queries,
            coordinator,
        }
    }

    /// HTTP-backed client with default cache timings.
    pub fn connect(config: &ClientConfig) -> ClientResult<Self> {
        let backend = HttpClient::new(config)?;
        tracing::info!(base_url = %config.base_url, "Connecting to Eco Action backend");
        Ok(Self::new(
            Arc::new(backend),
            CacheConfig::default(),
            RetryPolicy::with_retries(config.retries),
        ))
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        self.queries.cache()
    }

    pub fn queries(&self) -> &QueryClient {
        &self.queries
    }

    pub fn missions(&self, category: Option<Category>, search: &str) -> Query<Vec<Mission>> {
        let key = QueryKey::Missions(MissionFilter::new(category, search));
        Query::new(self.queries.clone(), key)
    }

    pub fn mission(&self, id: &str) -> Query<Mission> {
        Query::new(self.queries.clone(), QueryKey::Mission(id.to_string()))
    }

    /// Confirmed participations of `user_id`. Disabled while signed out (empty id).
    pub fn my_participations(&self, user_id: &str) -> Query<Vec<Participation>> {
        Query::new(
            self.queries.clone(),
            QueryKey::Participations(user_id.to_string()),
        )
    }

    pub fn user(&self, id: &str) -> Query<User> {
        Query::new(self.queries.clone(), QueryKey::User(id.to_string()))
    }

    pub fn join_mission(&self) -> JoinMission {
        JoinMission {
            coordinator: self.coordinator.clone(),
            status: MutationStatus::default(),
        }
    }

    pub fn cancel_participation(&self) -> CancelParticipation {
        CancelParticipation {
            coordinator: self.coordinator.clone(),
            status: MutationStatus::default(),
        }
    }

    /// Evict unused cache entries every `period` until the handle is aborted.
    pub fn spawn_garbage_collector(&self, period: Duration) -> JoinHandle<()> {
        let cache = Arc::clone(self.cache());
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                cache.collect_garbage();
            }
        })
    }
}

/// Drive an attempt on its own task so it settles even if the caller stops waiting.
async fn run_detached<T, F>(attempt: F) -> ClientResult<T>
where
    T: Send + 'static,
    F: Future<Output = ClientResult<T>> + Send + 'static,
{
    match tokio::spawn(attempt).await {
        Ok(result) => result,
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(e) => Err(ClientError::Network(format!("mutation task stopped: {}", e))),
    }
}

/// Join handle. Each `mutate` is one attempt; `state()` reflects the latest one.
#[derive(Clone)]
pub struct JoinMission {
    coordinator: MutationCoordinator,
    status: MutationStatus,
}

impl JoinMission {
    pub async fn mutate(&self, request: JoinRequest) -> ClientResult<JoinOutcome> {
        let already_joined = self
            .coordinator
            .confirmed_participation(&request.user_id, &request.mission_id)
            .is_some();

        if !already_joined {
            if let Some(mission) = self.coordinator.cached_mission(&request.mission_id) {
                if mission.is_full() {
                    let error = ClientError::Conflict(format!("mission {} is full", mission.id));
                    tracing::debug!(mission_id = %mission.id, "Join rejected, no spots left");
                    self.status.reject(error.clone());
                    return Err(error);
                }
            }
        }

        let coordinator = self.coordinator.clone();
        let status = self.status.clone();
        run_detached(async move { coordinator.join(&request, &status).await }).await
    }

    pub fn state(&self) -> MutationState {
        self.status.state()
    }

    pub fn is_pending(&self) -> bool {
        self.status.is_pending()
    }

    pub fn error(&self) -> Option<ClientError> {
        self.status.error()
    }
}

#[derive(Clone)]
pub struct CancelParticipation {
    coordinator: MutationCoordinator,
    status: MutationStatus,
}

impl CancelParticipation {
    pub async fn mutate(&self, request: CancelRequest) -> ClientResult<CancelOutcome> {
        let coordinator = self.coordinator.clone();
        let status = self.status.clone();
        run_detached(async move { coordinator.cancel(&request, &status).await }).await
    }

    pub fn state(&self) -> MutationState {
        self.status.state()
    }

    pub fn is_pending(&self) -> bool {
        self.status.is_pending()
    }

    pub fn error(&self) -> Option<ClientError> {
        self.status.error()
    }
}
