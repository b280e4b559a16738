//! Declarative reads over the cache.
//!
//! A [`QueryClient`] derives the fetch for a key from its kind, runs at most one fetch per key
//! at a time and shares it among every caller. Fetches run on spawned tasks, so they finish and
//! land in the cache even when nobody is waiting anymore.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};

use crate::cache::{CacheStore, CacheValue, Cacheable, KeyFilter, QueryKey};
use crate::client::{ClientError, ResourceClient};
use crate::models::ParticipationQuery;

type FetchResult = Result<CacheValue, ClientError>;
type SharedFetch = Shared<BoxFuture<'static, FetchResult>>;

/// Exponential backoff for retryable fetch failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            retries: 0,
            ..Self::default()
        }
    }

    pub fn with_retries(retries: u32) -> Self {
        Self {
            retries,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (zero-based): `base * 2^attempt`, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

struct InFlight {
    id: u64,
    fetch: SharedFetch,
}

struct QueryInner {
    cache: Arc<CacheStore>,
    backend: Arc<dyn ResourceClient>,
    retry: RetryPolicy,
    // Lock order: `inflight` before the cache's own lock, never the reverse.
    inflight: Mutex<HashMap<QueryKey, InFlight>>,
    next_id: AtomicU64,
}

impl QueryInner {
    fn inflight(&self) -> MutexGuard<'_, HashMap<QueryKey, InFlight>> {
        self.inflight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a finished fetch unless it was cancelled or superseded meanwhile.
    fn settle(&self, key: &QueryKey, id: u64, result: &FetchResult) {
        let mut inflight = self.inflight();
        match inflight.get(key) {
            Some(current) if current.id == id => {
                inflight.remove(key);
                self.cache.complete_fetch(key, result.clone());
            }
            _ => tracing::debug!(%key, "Discarding result of cancelled fetch"),
        }
    }
}

#[derive(Clone)]
pub struct QueryClient {
    inner: Arc<QueryInner>,
}

impl QueryClient {
    pub fn new(
        cache: Arc<CacheStore>,
        backend: Arc<dyn ResourceClient>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(QueryInner {
                cache,
                backend,
                retry,
                inflight: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.inner.cache
    }

    pub fn backend(&self) -> &Arc<dyn ResourceClient> {
        &self.inner.backend
    }

    /// Cached value if fresh, otherwise the result of a (shared) fetch.
    pub async fn ensure(&self, key: &QueryKey) -> FetchResult {
        if !self.inner.cache.is_stale(key) {
            if let Some(value) = self.inner.cache.read(key) {
                return Ok(value);
            }
        }
        self.fetch_shared(key).await
    }

    /// Fetch regardless of staleness, joining a fetch already in flight.
    pub async fn refetch(&self, key: &QueryKey) -> FetchResult {
        self.fetch_shared(key).await
    }

    pub fn is_fetching(&self, key: &QueryKey) -> bool {
        self.inner.inflight().contains_key(key)
    }

    /// Detach in-flight fetches matching `filter`. Their results will not reach the cache.
    pub fn cancel(&self, filter: &KeyFilter) -> usize {
        let mut inflight = self.inner.inflight();
        let keys: Vec<QueryKey> = inflight
            .keys()
            .filter(|k| filter.matches(k))
            .cloned()
            .collect();
        for key in &keys {
            inflight.remove(key);
            self.inner.cache.end_fetch(key);
        }
        if !keys.is_empty() {
            tracing::debug!(cancelled = keys.len(), "Cancelled in-flight fetches");
        }
        keys.len()
    }

    fn fetch_shared(&self, key: &QueryKey) -> SharedFetch {
        let mut inflight = self.inner.inflight();
        if let Some(existing) = inflight.get(key) {
            return existing.fetch.clone();
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.cache.begin_fetch(key);

        let weak: Weak<QueryInner> = Arc::downgrade(&self.inner);
        let backend = Arc::clone(&self.inner.backend);
        let retry = self.inner.retry;
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            let result = fetch_with_retry(backend.as_ref(), &task_key, retry).await;
            if let Some(inner) = weak.upgrade() {
                inner.settle(&task_key, id, &result);
            }
            result
        });

        let fetch = async move {
            handle
                .await
                .unwrap_or_else(|e| Err(ClientError::Network(format!("fetch task failed: {}", e))))
        }
        .boxed()
        .shared();

        inflight.insert(
            key.clone(),
            InFlight {
                id,
                fetch: fetch.clone(),
            },
        );
        fetch
    }
}

/// Queries keyed on an empty id never fetch.
pub fn is_enabled(key: &QueryKey) -> bool {
    match key {
        QueryKey::Missions(_) => true,
        QueryKey::Mission(id) | QueryKey::Participations(id) | QueryKey::User(id) => {
            !id.trim().is_empty()
        }
    }
}

async fn run_query(backend: &dyn ResourceClient, key: &QueryKey) -> FetchResult {
    match key {
        QueryKey::Missions(filter) => backend.list_missions(filter).await.map(CacheValue::Missions),
        QueryKey::Mission(id) => backend.get_mission(id).await.map(CacheValue::Mission),
        QueryKey::Participations(user_id) => backend
            .list_participations(&ParticipationQuery::confirmed_for(user_id))
            .await
            .map(CacheValue::Participations),
        QueryKey::User(id) => backend.get_user(id).await.map(CacheValue::User),
    }
}

async fn fetch_with_retry(
    backend: &dyn ResourceClient,
    key: &QueryKey,
    retry: RetryPolicy,
) -> FetchResult {
    let mut attempt = 0;
    loop {
        match run_query(backend, key).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < retry.retries => {
                let delay = retry.delay_for(attempt);
                tracing::warn!(%key, attempt = attempt + 1, ?delay, "Query failed, retrying: {}", e);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                tracing::debug!(%key, "Query failed: {}", e);
                return Err(e);
            }
        }
    }
}

/// What a caller sees of one query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryState<T> {
    pub data: Option<T>,
    pub error: Option<ClientError>,
    /// Fetching with nothing to show yet.
    pub is_loading: bool,
    /// Fetching while older data is shown.
    pub is_refetching: bool,
    pub is_stale: bool,
}

impl<T> QueryState<T> {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

impl<T> Default for QueryState<T> {
    fn default() -> Self {
        Self {
            data: None,
            error: None,
            is_loading: false,
            is_refetching: false,
            is_stale: true,
        }
    }
}

/// A typed subscription to one key.
pub struct Query<T> {
    key: QueryKey,
    client: QueryClient,
    enabled: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Query<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            client: self.client.clone(),
            enabled: self.enabled,
            _marker: PhantomData,
        }
    }
}

impl<T: Cacheable> Query<T> {
    pub fn new(client: QueryClient, key: QueryKey) -> Self {
        let enabled = is_enabled(&key);
        Self {
            key,
            client,
            enabled,
            _marker: PhantomData,
        }
    }

    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Current state straight from the cache, without fetching.
    pub fn state(&self) -> QueryState<T> {
        if !self.enabled {
            return QueryState::default();
        }
        let Some(view) = self.client.cache().entry_view(&self.key) else {
            return QueryState::default();
        };
        let data = view.data.as_ref().and_then(|d| T::from_cache(&d.value));
        QueryState {
            is_loading: view.fetching && data.is_none(),
            is_refetching: view.fetching && data.is_some(),
            data,
            error: view.error,
            is_stale: view.stale,
        }
    }

    /// Revalidate if stale, then report the state.
    pub async fn fetch(&self) -> QueryState<T> {
        if self.enabled {
            let _ = self.client.ensure(&self.key).await;
        }
        self.state()
    }

    /// Fetch even if fresh, then report the state.
    pub async fn refetch(&self) -> QueryState<T> {
        if self.enabled {
            let _ = self.client.refetch(&self.key).await;
        }
        self.state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Mission, MissionFilter};
    use crate::tests::support::{sample_missions, Op, ScriptedBackend};

    fn client_with(backend: Arc<ScriptedBackend>, retry: RetryPolicy) -> QueryClient {
        QueryClient::new(Arc::new(CacheStore::default()), backend, retry)
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let retry = RetryPolicy::default();
        assert_eq!(retry.delay_for(0), Duration::from_secs(1));
        assert_eq!(retry.delay_for(1), Duration::from_secs(2));
        assert_eq!(retry.delay_for(4), Duration::from_secs(16));
        assert_eq!(retry.delay_for(5), Duration::from_secs(30));
        assert_eq!(retry.delay_for(40), Duration::from_secs(30));
    }

    #[test]
    fn test_empty_ids_disable_queries() {
        assert!(!is_enabled(&QueryKey::Mission(String::new())));
        assert!(!is_enabled(&QueryKey::Participations("  ".into())));
        assert!(is_enabled(&QueryKey::Missions(MissionFilter::default())));
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_fetch() {
        let backend = Arc::new(ScriptedBackend::with_missions(sample_missions()));
        let gate = backend.gate(Op::ListMissions);
        let client = client_with(backend.clone(), RetryPolicy::none());
        let key = QueryKey::all_missions();

        let first = tokio::spawn({
            let client = client.clone();
            let key = key.clone();
            async move { client.ensure(&key).await }
        });
        gate.entered().await;
        let second = tokio::spawn({
            let client = client.clone();
            let key = key.clone();
            async move { client.refetch(&key).await }
        });
        tokio::task::yield_now().await;
        gate.open();

        assert!(first.await.unwrap().is_ok());
        assert!(second.await.unwrap().is_ok());
        assert_eq!(backend.calls(Op::ListMissions), 1);

        // Fresh now: no further call.
        client.ensure(&key).await.unwrap();
        assert_eq!(backend.calls(Op::ListMissions), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_errors_with_backoff() {
        let backend = Arc::new(ScriptedBackend::with_missions(sample_missions()));
        backend.fail_next(Op::GetMission, ClientError::Network("reset".into()));
        backend.fail_next(Op::GetMission, ClientError::Server {
            status: 503,
            message: "busy".into(),
        });
        let client = client_with(backend.clone(), RetryPolicy::default());

        let started = tokio::time::Instant::now();
        let value = client.ensure(&QueryKey::Mission("1".into())).await.unwrap();

        assert!(matches!(value, CacheValue::Mission(ref m) if m.id == "1"));
        assert_eq!(backend.calls(Op::GetMission), 3);
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_conflicts_are_not_retried() {
        let backend = Arc::new(ScriptedBackend::with_missions(sample_missions()));
        backend.fail_next(Op::GetMission, ClientError::NotFound("9".into()));
        let client = client_with(backend.clone(), RetryPolicy::default());

        let err = client.ensure(&QueryKey::Mission("9".into())).await.unwrap_err();
        assert_eq!(err, ClientError::NotFound("9".into()));
        assert_eq!(backend.calls(Op::GetMission), 1);
    }

    #[tokio::test]
    async fn test_error_keeps_last_good_data() {
        let backend = Arc::new(ScriptedBackend::with_missions(sample_missions()));
        let client = client_with(backend.clone(), RetryPolicy::none());
        let query: Query<Mission> = Query::new(client.clone(), QueryKey::Mission("1".into()));

        let state = query.fetch().await;
        assert!(state.data.is_some());
        assert!(!state.is_error());

        backend.fail_next(Op::GetMission, ClientError::Network("offline".into()));
        let state = query.refetch().await;
        assert!(state.is_error());
        assert_eq!(state.data.map(|m| m.id), Some("1".to_string()));
        assert!(!state.is_loading);
    }

    #[tokio::test]
    async fn test_cancelled_fetch_does_not_overwrite() {
        let backend = Arc::new(ScriptedBackend::with_missions(sample_missions()));
        let gate = backend.gate(Op::GetMission);
        let client = client_with(backend.clone(), RetryPolicy::none());
        let key = QueryKey::Mission("1".into());

        let pending = tokio::spawn({
            let client = client.clone();
            let key = key.clone();
            async move { client.refetch(&key).await }
        });
        gate.entered().await;

        assert_eq!(client.cancel(&KeyFilter::Exact(key.clone())), 1);
        let mut local = sample_missions().remove(0);
        local.spots_taken = 99;
        client.cache().write(&key, CacheValue::Mission(local.clone()));

        gate.open();
        assert!(pending.await.unwrap().is_ok());

        assert_eq!(client.cache().read_as::<Mission>(&key), Some(local));
        assert!(!client.is_fetching(&key));
    }

    #[tokio::test]
    async fn test_disabled_query_never_fetches() {
        let backend = Arc::new(ScriptedBackend::with_missions(sample_missions()));
        let client = client_with(backend.clone(), RetryPolicy::none());
        let query: Query<Mission> = Query::new(client, QueryKey::Mission(String::new()));

        let state = query.fetch().await;
        assert!(state.data.is_none());
        assert!(!state.is_loading);
        assert_eq!(backend.calls(Op::GetMission), 0);
    }
}
