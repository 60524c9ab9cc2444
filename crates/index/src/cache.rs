//! Bounded registry of per-event [`SimilarityIndex`] instances.
//!
//! Slots live in an [`lru::LruCache`] behind a short synchronous lock that is
//! never held across an `.await`. Each slot holds a `tokio::sync::OnceCell`
//! that doubles as the build-in-progress marker: concurrent misses for the
//! same event wait on one build instead of racing to build twice. Builds for
//! different events never wait on each other.
//!
//! The LRU list itself is unbounded; admission evicts the least recently used
//! half once `capacity` is reached. Evicting a slot only drops the cache's
//! `Arc`, so lookups already holding the index keep using it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use lru::LruCache;
use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::ann::{AnnConfig, SimilarityIndex};
use crate::{resolve_participants, IndexError, Repository};

/// Default number of events kept in memory.
pub const DEFAULT_CACHE_CAPACITY: usize = 10;

#[derive(Default)]
struct CacheSlot {
    cell: OnceCell<Arc<SimilarityIndex>>,
}

/// Snapshot of one cached event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CachedEventStats {
    pub event_id: String,
    pub participants: usize,
    pub uses_ann: bool,
    pub built_at: DateTime<Utc>,
}

/// Snapshot of the whole cache.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub active_events: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub builds: u64,
    pub evictions: u64,
    /// Most recently used first.
    pub events: Vec<CachedEventStats>,
}

/// Event id to [`SimilarityIndex`] map with least-recently-used-half eviction.
pub struct IndexCache {
    repository: Arc<dyn Repository>,
    dimension: usize,
    ann: AnnConfig,
    capacity: usize,
    slots: Mutex<LruCache<String, Arc<CacheSlot>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    builds: AtomicU64,
    evictions: AtomicU64,
}

impl IndexCache {
    /// Create a cache; a zero `capacity` is raised to one.
    pub fn new(
        repository: Arc<dyn Repository>,
        dimension: usize,
        ann: AnnConfig,
        capacity: usize,
    ) -> Self {
        Self {
            repository,
            dimension,
            ann,
            capacity: capacity.max(1),
            slots: Mutex::new(LruCache::unbounded()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            builds: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn with_defaults(repository: Arc<dyn Repository>, dimension: usize) -> Self {
        Self::new(
            repository,
            dimension,
            AnnConfig::default(),
            DEFAULT_CACHE_CAPACITY,
        )
    }

    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.repository
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Return the event's index, building it on a miss.
    ///
    /// `Ok(None)` means the event has fewer than two valid participants.
    /// Neither that outcome nor an error is cached; the next call rebuilds.
    pub async fn get_or_build(
        &self,
        event_id: &str,
    ) -> Result<Option<Arc<SimilarityIndex>>, IndexError> {
        let slot = {
            let mut slots = self.slots();
            let existing = slots.get(event_id).map(Arc::clone);
            if let Some(index) = existing.as_ref().and_then(|slot| slot.cell.get()) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Some(Arc::clone(index)));
            }
            match existing {
                Some(slot) => slot,
                None => self.admit(&mut slots, event_id),
            }
        };
        self.misses.fetch_add(1, Ordering::Relaxed);

        let outcome = slot
            .cell
            .get_or_try_init(|| self.build(event_id))
            .await
            .map(Arc::clone);

        let mut slots = self.slots();
        match outcome {
            Ok(index) => {
                slots.promote(event_id);
                Ok(Some(index))
            }
            Err(err) => {
                let stale = slots.peek(event_id).is_some_and(|current| {
                    Arc::ptr_eq(current, &slot) && current.cell.get().is_none()
                });
                if stale {
                    slots.pop(event_id);
                }
                match err {
                    IndexError::NotBuilt { .. } => Ok(None),
                    other => Err(other),
                }
            }
        }
    }

    /// Drop the cached index for one event. Returns whether one was present.
    pub fn invalidate(&self, event_id: &str) -> bool {
        let removed = self.slots().pop(event_id).is_some();
        if removed {
            debug!(event_id = %event_id, "index_invalidated");
        }
        removed
    }

    /// Drop every cached index. Returns how many entries were removed.
    pub fn invalidate_all(&self) -> usize {
        let mut slots = self.slots();
        let count = slots.len();
        slots.clear();
        if count > 0 {
            info!(entries = count, "index_cache_cleared");
        }
        count
    }

    /// Number of slots, including builds still in flight.
    pub fn len(&self) -> usize {
        self.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots().is_empty()
    }

    /// Whether a built index for the event is cached. Does not count as a use.
    pub fn contains(&self, event_id: &str) -> bool {
        self.slots()
            .peek(event_id)
            .is_some_and(|slot| slot.cell.get().is_some())
    }

    pub fn stats(&self) -> CacheStats {
        let events: Vec<CachedEventStats> = self
            .slots()
            .iter()
            .filter_map(|(event_id, slot)| {
                let index = slot.cell.get()?;
                Some(CachedEventStats {
                    event_id: event_id.clone(),
                    participants: index.len(),
                    uses_ann: index.uses_ann(),
                    built_at: index.built_at(),
                })
            })
            .collect();

        CacheStats {
            active_events: events.len(),
            capacity: self.capacity,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            builds: self.builds.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            events,
        }
    }

    fn slots(&self) -> MutexGuard<'_, LruCache<String, Arc<CacheSlot>>> {
        // Every mutation leaves the list consistent, so a poisoned lock is still usable.
        self.slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert a fresh slot for `event_id`, evicting first when full.
    fn admit(
        &self,
        slots: &mut LruCache<String, Arc<CacheSlot>>,
        event_id: &str,
    ) -> Arc<CacheSlot> {
        if slots.len() >= self.capacity {
            let to_evict = (slots.len() / 2).max(1);
            for _ in 0..to_evict {
                if let Some((evicted, _)) = slots.pop_lru() {
                    debug!(event_id = %evicted, "index_evicted");
                }
            }
            self.evictions.fetch_add(to_evict as u64, Ordering::Relaxed);
            info!(
                evicted = to_evict,
                remaining = slots.len(),
                "index_cache_evicted"
            );
        }

        let slot = Arc::new(CacheSlot::default());
        slots.put(event_id.to_string(), Arc::clone(&slot));
        slot
    }

    async fn build(&self, event_id: &str) -> Result<Arc<SimilarityIndex>, IndexError> {
        let records = self
            .repository
            .get_participant_vectors(event_id)
            .await
            .inspect_err(|err| {
                warn!(event_id = %event_id, error = %err, "index_build_fetch_failed");
            })?;
        let total = records.len();
        let participants = resolve_participants(event_id, records, self.dimension);

        let index = SimilarityIndex::build(event_id, participants, self.dimension, self.ann);
        if !index.is_built() {
            debug!(
                event_id = %event_id,
                valid = index.len(),
                total,
                "index_not_built"
            );
            return Err(IndexError::NotBuilt {
                event_id: event_id.to_string(),
            });
        }

        self.builds.fetch_add(1, Ordering::Relaxed);
        info!(
            event_id = %event_id,
            participants = index.len(),
            skipped = total - index.len(),
            uses_ann = index.uses_ann(),
            "index_built"
        );
        Ok(Arc::new(index))
    }
}

impl std::fmt::Debug for IndexCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexCache")
            .field("capacity", &self.capacity)
            .field("entries", &self.len())
            .field("dimension", &self.dimension)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        EventInfo, InMemoryRepository, MatchRecord, NewPhoto, ParticipantRecord, RepositoryError,
        StoredPhoto,
    };
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Counts participant fetches and can be told to fail them.
    struct CountingRepository {
        inner: InMemoryRepository,
        fetches: AtomicUsize,
        fail: std::sync::atomic::AtomicBool,
        delay: Duration,
    }

    impl CountingRepository {
        fn new(delay: Duration) -> Self {
            Self {
                inner: InMemoryRepository::new(),
                fetches: AtomicUsize::new(0),
                fail: std::sync::atomic::AtomicBool::new(false),
                delay,
            }
        }

        fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Repository for CountingRepository {
        async fn get_event(&self, event_id: &str) -> Result<Option<EventInfo>, RepositoryError> {
            self.inner.get_event(event_id).await
        }

        async fn get_participant_vectors(
            &self,
            event_id: &str,
        ) -> Result<Vec<ParticipantRecord>, RepositoryError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(RepositoryError::backend("database unavailable"));
            }
            self.inner.get_participant_vectors(event_id).await
        }

        async fn find_photo(
            &self,
            event_id: &str,
            file_name: &str,
        ) -> Result<Option<StoredPhoto>, RepositoryError> {
            self.inner.find_photo(event_id, file_name).await
        }

        async fn save_photo(&self, photo: NewPhoto) -> Result<StoredPhoto, RepositoryError> {
            self.inner.save_photo(photo).await
        }

        async fn save_match(&self, record: MatchRecord) -> Result<(), RepositoryError> {
            self.inner.save_match(record).await
        }

        async fn matches_for_user(
            &self,
            event_id: &str,
            user_id: &str,
        ) -> Result<Vec<MatchRecord>, RepositoryError> {
            self.inner.matches_for_user(event_id, user_id).await
        }
    }

    fn seed_event(repo: &InMemoryRepository, event_id: &str) {
        repo.enroll(event_id, ParticipantRecord::new("a", vec![1.0, 0.0]))
            .unwrap();
        repo.enroll(event_id, ParticipantRecord::new("b", vec![0.0, 1.0]))
            .unwrap();
    }

    fn cache_with(repo: Arc<dyn Repository>, capacity: usize) -> IndexCache {
        IndexCache::new(repo, 2, AnnConfig::default(), capacity)
    }

    #[tokio::test]
    async fn builds_once_and_reuses() {
        let repo = Arc::new(CountingRepository::new(Duration::ZERO));
        seed_event(&repo.inner, "evt");
        let cache = cache_with(repo.clone(), 4);

        let first = cache.get_or_build("evt").await.unwrap().unwrap();
        let second = cache.get_or_build("evt").await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(repo.fetches(), 1);

        let stats = cache.stats();
        assert_eq!(stats.active_events, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.builds, 1);
        assert_eq!(stats.events[0].participants, 2);
    }

    #[tokio::test]
    async fn not_built_is_not_cached() {
        let repo = Arc::new(CountingRepository::new(Duration::ZERO));
        repo.inner
            .enroll("evt", ParticipantRecord::new("solo", vec![1.0, 0.0]))
            .unwrap();
        let cache = cache_with(repo.clone(), 4);

        assert!(cache.get_or_build("evt").await.unwrap().is_none());
        assert!(cache.is_empty());

        repo.inner
            .enroll("evt", ParticipantRecord::new("second", vec![0.0, 1.0]))
            .unwrap();
        assert!(cache.get_or_build("evt").await.unwrap().is_some());
        assert_eq!(repo.fetches(), 2);
    }

    #[tokio::test]
    async fn failed_build_is_retried() {
        let repo = Arc::new(CountingRepository::new(Duration::ZERO));
        seed_event(&repo.inner, "evt");
        repo.fail.store(true, Ordering::SeqCst);
        let cache = cache_with(repo.clone(), 4);

        let err = cache.get_or_build("evt").await.unwrap_err();
        assert!(matches!(err, IndexError::Repository(_)));
        assert!(!cache.contains("evt"));

        repo.fail.store(false, Ordering::SeqCst);
        assert!(cache.get_or_build("evt").await.unwrap().is_some());
        assert!(cache.contains("evt"));
    }

    #[tokio::test]
    async fn never_exceeds_capacity_and_evicts_least_recently_used_half() {
        let repo = Arc::new(InMemoryRepository::new());
        for i in 0..5 {
            seed_event(&repo, &format!("evt-{i}"));
        }
        let cache = cache_with(repo.clone(), 4);

        for i in 0..4 {
            cache.get_or_build(&format!("evt-{i}")).await.unwrap();
        }
        assert_eq!(cache.len(), 4);

        // Touch 0 and 2 so 1 and 3 become the oldest half.
        cache.get_or_build("evt-0").await.unwrap();
        cache.get_or_build("evt-2").await.unwrap();

        cache.get_or_build("evt-4").await.unwrap();
        assert!(cache.len() <= 4);
        assert_eq!(cache.len(), 3);
        assert!(cache.contains("evt-0"));
        assert!(cache.contains("evt-2"));
        assert!(cache.contains("evt-4"));
        assert!(!cache.contains("evt-1"));
        assert!(!cache.contains("evt-3"));
        assert_eq!(cache.stats().evictions, 2);
    }

    #[tokio::test]
    async fn stats_list_most_recently_used_first() {
        let repo = Arc::new(InMemoryRepository::new());
        for event_id in ["x", "y", "z"] {
            seed_event(&repo, event_id);
        }
        let cache = cache_with(repo.clone(), 4);
        for event_id in ["x", "y", "z", "x"] {
            cache.get_or_build(event_id).await.unwrap();
        }
        // Checking membership is not a use.
        assert!(cache.contains("y"));

        let order: Vec<String> = cache
            .stats()
            .events
            .into_iter()
            .map(|event| event.event_id)
            .collect();
        assert_eq!(order, ["x", "z", "y"]);
    }

    #[tokio::test]
    async fn eviction_does_not_affect_held_index() {
        let repo = Arc::new(InMemoryRepository::new());
        seed_event(&repo, "held");
        seed_event(&repo, "other");
        let cache = cache_with(repo.clone(), 1);

        let held = cache.get_or_build("held").await.unwrap().unwrap();
        cache.get_or_build("other").await.unwrap();
        assert!(!cache.contains("held"));

        let results = held.find_nearest(&[1.0, 0.0], 1).unwrap();
        assert_eq!(results[0].participant.user_id, "a");
    }

    #[tokio::test]
    async fn invalidate_forces_rebuild_with_new_reference() {
        let repo = Arc::new(InMemoryRepository::new());
        seed_event(&repo, "evt");
        let cache = cache_with(repo.clone(), 4);

        cache.get_or_build("evt").await.unwrap();
        repo.enroll("evt", ParticipantRecord::new("a", vec![-1.0, 0.0]))
            .unwrap();

        // Stale until invalidated.
        let stale = cache.get_or_build("evt").await.unwrap().unwrap();
        assert_eq!(stale.participants()[0].reference.as_slice(), &[1.0, 0.0]);

        assert!(cache.invalidate("evt"));
        assert!(!cache.invalidate("evt"));
        let fresh = cache.get_or_build("evt").await.unwrap().unwrap();
        assert_eq!(fresh.participants()[0].reference.as_slice(), &[-1.0, 0.0]);
    }

    #[tokio::test]
    async fn invalidate_all_clears_everything() {
        let repo = Arc::new(InMemoryRepository::new());
        seed_event(&repo, "x");
        seed_event(&repo, "y");
        let cache = cache_with(repo.clone(), 4);
        cache.get_or_build("x").await.unwrap();
        cache.get_or_build("y").await.unwrap();

        assert_eq!(cache.invalidate_all(), 2);
        assert!(cache.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_misses_share_one_build() {
        let repo = Arc::new(CountingRepository::new(Duration::from_millis(50)));
        seed_event(&repo.inner, "evt");
        let cache = Arc::new(cache_with(repo.clone(), 4));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move {
                cache.get_or_build("evt").await.unwrap().unwrap()
            }));
        }

        let mut indexes = Vec::new();
        for handle in handles {
            indexes.push(handle.await.unwrap());
        }
        assert_eq!(repo.fetches(), 1);
        assert!(indexes.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn different_events_build_independently() {
        let repo = Arc::new(CountingRepository::new(Duration::from_millis(20)));
        for i in 0..4 {
            seed_event(&repo.inner, &format!("evt-{i}"));
        }
        let cache = Arc::new(cache_with(repo.clone(), 8));

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.get_or_build(&format!("evt-{i}")).await })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap().unwrap().is_some());
        }
        assert_eq!(repo.fetches(), 4);
        assert_eq!(cache.len(), 4);
    }
}
