//! Keyed store of query results with staleness and garbage-collection timers.
//!
//! One `std::sync::Mutex` guards the whole map. It is never held across an `.await`, and every
//! multi-key edit happens under a single acquisition so readers see all of it or none of it.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::Instant;

use super::keys::{KeyFilter, KeyScope, QueryKey};
use super::value::{CacheValue, Cacheable};
use crate::client::ClientError;

const EVENT_CAPACITY: usize = 256;

/// How long entries of one scope stay fresh, and how long unused ones are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Freshness {
    pub stale_time: Duration,
    pub gc_time: Duration,
}

impl Freshness {
    pub const fn minutes(stale: u64, gc: u64) -> Self {
        Self {
            stale_time: Duration::from_secs(stale * 60),
            gc_time: Duration::from_secs(gc * 60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    pub missions: Freshness,
    pub mission: Freshness,
    pub participations: Freshness,
    pub user: Freshness,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            missions: Freshness::minutes(5, 30),
            mission: Freshness::minutes(5, 30),
            participations: Freshness::minutes(2, 10),
            user: Freshness::minutes(10, 30),
        }
    }
}

impl CacheConfig {
    pub fn for_scope(&self, scope: KeyScope) -> Freshness {
        match scope {
            KeyScope::Missions => self.missions,
            KeyScope::Mission => self.mission,
            KeyScope::Participations => self.participations,
            KeyScope::User => self.user,
        }
    }
}

/// A value and the moment it was last written.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedData {
    pub value: CacheValue,
    pub updated_at: Instant,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    data: Option<CachedData>,
    freshness: Freshness,
    invalidated: bool,
    error: Option<ClientError>,
    fetching: bool,
    last_accessed: Instant,
}

impl CacheEntry {
    fn new(freshness: Freshness, now: Instant) -> Self {
        Self {
            data: None,
            freshness,
            invalidated: false,
            error: None,
            fetching: false,
            last_accessed: now,
        }
    }

    fn is_stale(&self, now: Instant) -> bool {
        match &self.data {
            None => true,
            Some(_) if self.invalidated => true,
            Some(data) => now.duration_since(data.updated_at) >= self.freshness.stale_time,
        }
    }
}

/// Point-in-time view of one entry.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryView {
    pub data: Option<CachedData>,
    pub error: Option<ClientError>,
    pub fetching: bool,
    pub stale: bool,
}

/// Change notification. Receivers that lag lose old events, never the cache state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    Updated(QueryKey),
    Invalidated(QueryKey),
    Removed(QueryKey),
}

#[derive(Debug, Clone)]
struct SnapshotEntry {
    key: QueryKey,
    /// `None` when the key had no entry at all.
    saved: Option<SavedState>,
}

#[derive(Debug, Clone)]
struct SavedState {
    data: Option<CachedData>,
    invalidated: bool,
    error: Option<ClientError>,
}

/// Pre-edit state of every entry an optimistic edit touched, absent ones included.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    entries: Vec<SnapshotEntry>,
}

impl Snapshot {
    pub fn keys(&self) -> impl Iterator<Item = &QueryKey> {
        self.entries.iter().map(|e| &e.key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The part of the snapshot whose keys match any of `filters`.
    pub fn only(self, filters: &[KeyFilter]) -> Snapshot {
        let entries = self
            .entries
            .into_iter()
            .filter(|e| filters.iter().any(|f| f.matches(&e.key)))
            .collect();
        Snapshot { entries }
    }
}

pub struct CacheStore {
    entries: Mutex<HashMap<QueryKey, CacheEntry>>,
    config: CacheConfig,
    events: broadcast::Sender<CacheEvent>,
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl CacheStore {
    pub fn new(config: CacheConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            entries: Mutex::new(HashMap::new()),
            config,
            events,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<QueryKey, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: CacheEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    fn entry<'a>(
        &self,
        entries: &'a mut HashMap<QueryKey, CacheEntry>,
        key: &QueryKey,
        now: Instant,
    ) -> &'a mut CacheEntry {
        let freshness = self.config.for_scope(key.scope());
        entries
            .entry(key.clone())
            .or_insert_with(|| CacheEntry::new(freshness, now))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    pub fn read(&self, key: &QueryKey) -> Option<CacheValue> {
        let mut entries = self.lock();
        let entry = entries.get_mut(key)?;
        entry.last_accessed = Instant::now();
        entry.data.as_ref().map(|d| d.value.clone())
    }

    pub fn read_as<T: Cacheable>(&self, key: &QueryKey) -> Option<T> {
        self.read(key).as_ref().and_then(T::from_cache)
    }

    /// Overwrite the value. Last write wins; the entry becomes fresh and loses its error.
    pub fn write(&self, key: &QueryKey, value: CacheValue) {
        let now = Instant::now();
        {
            let mut entries = self.lock();
            let entry = self.entry(&mut entries, key, now);
            entry.data = Some(CachedData {
                value,
                updated_at: now,
            });
            entry.invalidated = false;
            entry.error = None;
            entry.last_accessed = now;
        }
        self.emit(CacheEvent::Updated(key.clone()));
    }

    /// Replace a present value with `f(value)`. Returns whether anything changed.
    pub fn update<F>(&self, key: &QueryKey, f: F) -> bool
    where
        F: FnOnce(&CacheValue) -> CacheValue,
    {
        let updated = {
            let mut entries = self.lock();
            match entries.get_mut(key).and_then(|e| e.data.as_mut()) {
                Some(data) => {
                    data.value = f(&data.value);
                    true
                }
                None => false,
            }
        };
        if updated {
            self.emit(CacheEvent::Updated(key.clone()));
        }
        updated
    }

    /// Apply `f` to every present value matching `filter`; `None` leaves a value as is.
    pub fn update_matching<F>(&self, filter: &KeyFilter, mut f: F) -> usize
    where
        F: FnMut(&QueryKey, &CacheValue) -> Option<CacheValue>,
    {
        let mut changed = Vec::new();
        {
            let mut entries = self.lock();
            for (key, entry) in entries.iter_mut().filter(|(k, _)| filter.matches(k)) {
                if let Some(data) = entry.data.as_mut() {
                    if let Some(next) = f(key, &data.value) {
                        data.value = next;
                        changed.push(key.clone());
                    }
                }
            }
        }
        let count = changed.len();
        for key in changed {
            self.emit(CacheEvent::Updated(key));
        }
        count
    }

    /// Mark matching entries stale. Their data stays readable until replaced.
    pub fn invalidate(&self, filter: &KeyFilter) -> usize {
        let keys: Vec<QueryKey> = {
            let mut entries = self.lock();
            entries
                .iter_mut()
                .filter(|(k, _)| filter.matches(k))
                .map(|(k, e)| {
                    e.invalidated = true;
                    k.clone()
                })
                .collect()
        };
        let count = keys.len();
        for key in keys {
            self.emit(CacheEvent::Invalidated(key));
        }
        count
    }

    /// Absent, empty, invalidated and expired entries are all stale.
    pub fn is_stale(&self, key: &QueryKey) -> bool {
        let now = Instant::now();
        self.lock().get(key).map_or(true, |e| e.is_stale(now))
    }

    pub fn keys_matching(&self, filter: &KeyFilter) -> Vec<QueryKey> {
        self.lock()
            .keys()
            .filter(|k| filter.matches(k))
            .cloned()
            .collect()
    }

    /// Edit every entry selected by `targets` in one critical section.
    ///
    /// Scope filters select existing entries; exact filters also select an absent key so the
    /// edit can create it. `edit` returns the new value, or `None` to leave the entry untouched.
    /// Edited entries keep their previous timestamp.
    pub fn apply_optimistic<F>(&self, targets: &[KeyFilter], mut edit: F) -> Snapshot
    where
        F: FnMut(&QueryKey, Option<&CacheValue>) -> Option<CacheValue>,
    {
        let now = Instant::now();
        let mut snapshot = Snapshot::default();
        let mut changed = Vec::new();
        {
            let mut entries = self.lock();

            let mut keys: Vec<QueryKey> = Vec::new();
            for target in targets {
                let selected: Vec<QueryKey> = match target {
                    KeyFilter::Exact(key) => vec![key.clone()],
                    KeyFilter::Scope(_) => entries
                        .keys()
                        .filter(|k| target.matches(k))
                        .cloned()
                        .collect(),
                };
                for key in selected {
                    if !keys.contains(&key) {
                        keys.push(key);
                    }
                }
            }

            for key in keys {
                let saved = entries.get(&key).map(|e| SavedState {
                    data: e.data.clone(),
                    invalidated: e.invalidated,
                    error: e.error.clone(),
                });

                let current = saved
                    .as_ref()
                    .and_then(|s| s.data.as_ref())
                    .map(|d| &d.value);
                if let Some(next) = edit(&key, current) {
                    let entry = self.entry(&mut entries, &key, now);
                    let updated_at = entry.data.as_ref().map_or(now, |d| d.updated_at);
                    entry.data = Some(CachedData {
                        value: next,
                        updated_at,
                    });
                    changed.push(key.clone());
                }

                snapshot.entries.push(SnapshotEntry { key, saved });
            }
        }
        for key in changed {
            self.emit(CacheEvent::Updated(key));
        }
        snapshot
    }

    /// Put every snapshotted entry back exactly as it was, removing ones that were absent.
    pub fn restore(&self, snapshot: Snapshot) {
        let mut events = Vec::with_capacity(snapshot.entries.len());
        {
            let mut entries = self.lock();
            for SnapshotEntry { key, saved } in snapshot.entries {
                match saved {
                    Some(saved) => {
                        let now = Instant::now();
                        let entry = self.entry(&mut entries, &key, now);
                        entry.data = saved.data;
                        entry.invalidated = saved.invalidated;
                        entry.error = saved.error;
                        events.push(CacheEvent::Updated(key));
                    }
                    None => {
                        if entries.remove(&key).is_some() {
                            events.push(CacheEvent::Removed(key));
                        }
                    }
                }
            }
        }
        for event in events {
            self.emit(event);
        }
    }

    pub fn entry_view(&self, key: &QueryKey) -> Option<EntryView> {
        let now = Instant::now();
        let mut entries = self.lock();
        let entry = entries.get_mut(key)?;
        entry.last_accessed = now;
        Some(EntryView {
            data: entry.data.clone(),
            error: entry.error.clone(),
            fetching: entry.fetching,
            stale: entry.is_stale(now),
        })
    }

    /// Flag a fetch as running, creating the entry if needed.
    pub fn begin_fetch(&self, key: &QueryKey) {
        let now = Instant::now();
        let mut entries = self.lock();
        let entry = self.entry(&mut entries, key, now);
        entry.fetching = true;
        entry.last_accessed = now;
    }

    pub fn end_fetch(&self, key: &QueryKey) {
        if let Some(entry) = self.lock().get_mut(key) {
            entry.fetching = false;
        }
    }

    /// Store the outcome of a fetch. Errors keep the last good value.
    pub fn complete_fetch(&self, key: &QueryKey, result: Result<CacheValue, ClientError>) {
        match result {
            Ok(value) => {
                self.write(key, value);
                self.end_fetch(key);
            }
            Err(error) => {
                let now = Instant::now();
                let mut entries = self.lock();
                let entry = self.entry(&mut entries, key, now);
                entry.error = Some(error);
                entry.fetching = false;
            }
        }
    }

    pub fn remove(&self, key: &QueryKey) -> Option<CacheValue> {
        let entry = self.lock().remove(key)?;
        self.emit(CacheEvent::Removed(key.clone()));
        entry.data.map(|d| d.value)
    }

    pub fn clear(&self) {
        let keys: Vec<QueryKey> = self.lock().drain().map(|(k, _)| k).collect();
        for key in keys {
            self.emit(CacheEvent::Removed(key));
        }
    }

    /// Drop entries unused for longer than their scope's GC time. Running fetches are kept.
    pub fn collect_garbage(&self) -> usize {
        let now = Instant::now();
        let mut evicted = Vec::new();
        {
            let mut entries = self.lock();
            entries.retain(|key, entry| {
                let keep = entry.fetching
                    || now.duration_since(entry.last_accessed) < entry.freshness.gc_time;
                if !keep {
                    evicted.push(key.clone());
                }
                keep
            });
        }
        let count = evicted.len();
        if count > 0 {
            tracing::debug!(evicted = count, "Cache garbage collected");
        }
        for key in evicted {
            self.emit(CacheEvent::Removed(key));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Category, Mission, MissionFilter};

    fn mission(id: &str, taken: i64) -> Mission {
        Mission {
            id: id.to_string(),
            title: format!("Mission {}", id),
            description: String::new(),
            category: Category::Education,
            date: "2025-09-01T09:00:00Z".to_string(),
            location: "Rennes".to_string(),
            spots_total: 10,
            spots_taken: taken,
            image: String::new(),
            organizer: String::new(),
            duration: String::new(),
        }
    }

    fn bump(value: Option<&CacheValue>) -> Option<CacheValue> {
        let mut value = value?.clone();
        for m in value.missions_mut("1") {
            m.spots_taken += 1;
        }
        Some(value)
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_go_stale_after_their_scope_time() {
        let store = CacheStore::default();
        let list = QueryKey::all_missions();
        let participations = QueryKey::Participations("u1".into());

        assert!(store.is_stale(&list));
        store.write(&list, CacheValue::Missions(vec![mission("1", 0)]));
        store.write(&participations, CacheValue::Participations(vec![]));
        assert!(!store.is_stale(&list));

        tokio::time::advance(Duration::from_secs(150)).await;
        assert!(!store.is_stale(&list));
        assert!(store.is_stale(&participations));

        tokio::time::advance(Duration::from_secs(150)).await;
        assert!(store.is_stale(&list));
    }

    #[test]
    fn test_invalidate_scope_keeps_data_and_spares_details() {
        let store = CacheStore::default();
        let all = QueryKey::all_missions();
        let filtered = QueryKey::Missions(MissionFilter::new(Some(Category::Education), ""));
        let detail = QueryKey::Mission("1".into());
        store.write(&all, CacheValue::Missions(vec![mission("1", 0)]));
        store.write(&filtered, CacheValue::Missions(vec![mission("1", 0)]));
        store.write(&detail, CacheValue::Mission(mission("1", 0)));

        assert_eq!(store.invalidate(&KeyScope::Missions.into()), 2);
        assert!(store.is_stale(&all));
        assert!(store.is_stale(&filtered));
        assert!(!store.is_stale(&detail));
        assert!(store.read(&all).is_some());

        store.write(&all, CacheValue::Missions(vec![]));
        assert!(!store.is_stale(&all));
    }

    #[test]
    fn test_optimistic_edit_touches_every_copy_and_restores_verbatim() {
        let store = CacheStore::default();
        let all = QueryKey::all_missions();
        let detail = QueryKey::Mission("1".into());
        let absent = QueryKey::Participations("u1".into());
        store.write(&all, CacheValue::Missions(vec![mission("1", 4), mission("2", 0)]));
        store.write(&detail, CacheValue::Mission(mission("1", 4)));
        store.invalidate(&detail.clone().into());
        let before_all = store.entry_view(&all).unwrap();
        let before_detail = store.entry_view(&detail).unwrap();

        let snapshot = store.apply_optimistic(
            &[
                KeyScope::Missions.into(),
                detail.clone().into(),
                absent.clone().into(),
            ],
            |key, value| match key {
                QueryKey::Participations(_) => Some(CacheValue::Participations(vec![])),
                _ => bump(value),
            },
        );
        assert_eq!(snapshot.len(), 3);

        let list: Vec<Mission> = store.read_as(&all).unwrap();
        assert_eq!(list[0].spots_taken, 5);
        assert_eq!(list[1].spots_taken, 0);
        let single: Mission = store.read_as(&detail).unwrap();
        assert_eq!(single.spots_taken, 5);
        assert!(store.read(&absent).is_some());

        store.restore(snapshot);
        assert_eq!(store.entry_view(&all).unwrap().data, before_all.data);
        assert_eq!(store.entry_view(&detail).unwrap().data, before_detail.data);
        assert!(store.is_stale(&detail));
        assert!(store.entry_view(&absent).is_none());
    }

    #[test]
    fn test_partial_restore_leaves_other_edits() {
        let store = CacheStore::default();
        let all = QueryKey::all_missions();
        let participations = QueryKey::Participations("u1".into());
        store.write(&all, CacheValue::Missions(vec![mission("1", 4)]));
        store.write(&participations, CacheValue::Participations(vec![]));

        let snapshot = store.apply_optimistic(
            &[KeyScope::Missions.into(), participations.clone().into()],
            |key, value| match key {
                QueryKey::Participations(_) => None,
                _ => bump(value),
            },
        );
        store.write(&participations, CacheValue::Participations(vec![]));

        let kept = snapshot.only(&[KeyScope::Missions.into()]);
        assert_eq!(kept.keys().collect::<Vec<_>>(), vec![&all]);
        store.restore(kept);

        let list: Vec<Mission> = store.read_as(&all).unwrap();
        assert_eq!(list[0].spots_taken, 4);
        assert!(store.read(&participations).is_some());
    }

    #[test]
    fn test_failed_fetch_keeps_last_good_value() {
        let store = CacheStore::default();
        let key = QueryKey::Mission("1".into());
        store.write(&key, CacheValue::Mission(mission("1", 2)));

        store.begin_fetch(&key);
        store.complete_fetch(&key, Err(ClientError::Network("offline".into())));

        let view = store.entry_view(&key).unwrap();
        assert!(!view.fetching);
        assert_eq!(view.error, Some(ClientError::Network("offline".into())));
        assert_eq!(
            view.data.map(|d| d.value),
            Some(CacheValue::Mission(mission("1", 2)))
        );

        store.complete_fetch(&key, Ok(CacheValue::Mission(mission("1", 3))));
        assert!(store.entry_view(&key).unwrap().error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_garbage_collection_spares_recent_and_fetching() {
        let store = CacheStore::default();
        let old = QueryKey::Mission("9".into());
        let busy = QueryKey::User("u2".into());
        let fresh = QueryKey::Participations("u1".into());
        store.write(&old, CacheValue::Mission(mission("9", 0)));
        store.begin_fetch(&busy);

        tokio::time::advance(Duration::from_secs(29 * 60)).await;
        store.write(&fresh, CacheValue::Participations(vec![]));
        tokio::time::advance(Duration::from_secs(2 * 60)).await;

        assert_eq!(store.collect_garbage(), 1);
        assert!(store.entry_view(&old).is_none());
        assert!(store.entry_view(&busy).is_some());
        assert!(store.read(&fresh).is_some());
    }

    #[tokio::test]
    async fn test_events_are_broadcast() {
        let store = CacheStore::default();
        let mut events = store.subscribe();
        let key = QueryKey::Mission("1".into());

        store.write(&key, CacheValue::Mission(mission("1", 0)));
        store.invalidate(&KeyScope::Mission.into());
        store.remove(&key);

        assert_eq!(events.recv().await.unwrap(), CacheEvent::Updated(key.clone()));
        assert_eq!(events.recv().await.unwrap(), CacheEvent::Invalidated(key.clone()));
        assert_eq!(events.recv().await.unwrap(), CacheEvent::Removed(key));
    }
}
