//! Optimistic writes: edit the cache first, call the backend, then commit or roll back.
//!
//! Every attempt moves `Idle -> Pending -> Committed | RolledBack`. Whatever the outcome, the
//! touched keys are invalidated at the end so the next read comes from the server.

mod participation;

pub use participation::*;

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::cache::{CacheStore, CacheValue, KeyFilter, QueryKey};
use crate::client::{ClientError, ResourceClient};
use crate::query::QueryClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MutationState {
    #[default]
    Idle,
    Pending,
    Committed,
    RolledBack,
}

#[derive(Debug, Default)]
struct StatusInner {
    state: MutationState,
    error: Option<ClientError>,
}

/// Observable state of the latest attempt of one mutation handle.
#[derive(Debug, Clone, Default)]
pub struct MutationStatus {
    inner: Arc<Mutex<StatusInner>>,
}

impl MutationStatus {
    fn lock(&self) -> MutexGuard<'_, StatusInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> MutationState {
        self.lock().state
    }

    pub fn error(&self) -> Option<ClientError> {
        self.lock().error.clone()
    }

    pub fn is_pending(&self) -> bool {
        self.state() == MutationState::Pending
    }

    fn begin(&self) {
        let mut inner = self.lock();
        inner.state = MutationState::Pending;
        inner.error = None;
    }

    fn commit(&self) {
        self.lock().state = MutationState::Committed;
    }

    fn roll_back(&self, error: ClientError) {
        let mut inner = self.lock();
        inner.state = MutationState::RolledBack;
        inner.error = Some(error);
    }

    /// Surface an error raised before any attempt started. The state is left as is.
    pub(crate) fn reject(&self, error: ClientError) {
        self.lock().error = Some(error);
    }
}

/// The cache side of one optimistic write.
pub trait OptimisticEdit: Send + Sync {
    type Output: Send;

    fn name(&self) -> &'static str;

    /// Entries to snapshot and edit. Exact keys are included even when absent.
    fn targets(&self) -> Vec<KeyFilter>;

    /// New value for `key`, or `None` to leave it alone.
    fn apply(&self, key: &QueryKey, current: Option<&CacheValue>) -> Option<CacheValue>;

    /// Extra invalidations after a rollback.
    fn rollback_invalidations(&self) -> Vec<KeyFilter> {
        Vec::new()
    }

    /// Invalidations after every attempt.
    fn settle_invalidations(&self) -> Vec<KeyFilter> {
        self.targets()
    }

    /// Entries put back to their pre-edit state after a commit, when the server did not
    /// make the change the edit anticipated.
    fn restore_on_commit(&self, _output: &Self::Output) -> Vec<KeyFilter> {
        Vec::new()
    }

    /// Fold the server's answer into the cache before settling.
    fn on_commit(&self, _cache: &CacheStore, _output: &Self::Output) {}
}

#[derive(Clone)]
pub struct MutationCoordinator {
    queries: QueryClient,
}

impl MutationCoordinator {
    pub fn new(queries: QueryClient) -> Self {
        Self { queries }
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        self.queries.cache()
    }

    pub fn backend(&self) -> &Arc<dyn ResourceClient> {
        self.queries.backend()
    }

    /// Run one optimistic attempt.
    ///
    /// `op` is not polled until the optimistic edit is in place. On failure every snapshotted
    /// entry is restored before the error is returned.
    pub async fn run<E, Fut>(
        &self,
        edit: &E,
        status: &MutationStatus,
        op: Fut,
    ) -> Result<E::Output, ClientError>
    where
        E: OptimisticEdit,
        Fut: Future<Output = Result<E::Output, ClientError>> + Send,
    {
        let cache = self.cache();
        status.begin();

        let targets = edit.targets();
        for target in &targets {
            self.queries.cancel(target);
        }
        let snapshot = cache.apply_optimistic(&targets, |key, current| edit.apply(key, current));
        tracing::debug!(
            mutation = edit.name(),
            touched = snapshot.len(),
            "Mutation pending"
        );

        let result = op.await;

        match &result {
            Ok(output) => {
                let unmade = edit.restore_on_commit(output);
                if !unmade.is_empty() {
                    cache.restore(snapshot.only(&unmade));
                }
                edit.on_commit(cache, output);
                status.commit();
                tracing::debug!(mutation = edit.name(), "Mutation committed");
            }
            Err(error) => {
                cache.restore(snapshot);
                for filter in edit.rollback_invalidations() {
                    cache.invalidate(&filter);
                }
                status.roll_back(error.clone());
                tracing::warn!(mutation = edit.name(), "Mutation rolled back: {}", error);
            }
        }

        for filter in edit.settle_invalidations() {
            cache.invalidate(&filter);
        }
        result
    }
}
