//! # Comments Store
//!
//! Versioned in-memory state with synchronous change notification.
//!
//! The store is the only shared mutable resource of the cache. Writers
//! replace the whole state through [`Store::set`]; readers take cheap
//! [`Arc`] snapshots through [`Store::get`] or register a callback with
//! [`Store::subscribe`].
//!
//! # Locking
//!
//! The state lock is held only while an updater runs, never across an
//! `.await`. Subscribers are called after the state lock is released, so a
//! subscriber may read the store (or even write to it) without deadlocking.
//!
//! # Delivery order
//!
//! Writers from different threads are serialized by a reentrant delivery
//! lock held for the whole of [`Store::set`], so every subscriber sees
//! snapshots in version order even on a multi-threaded runtime. A write made
//! from inside a callback is delivered before the outer write finishes; a
//! subscriber that already saw the newer snapshot skips the older one.
//!
//! A callback must therefore not block on another thread that writes to the
//! same store.

use crate::optimistic::{
    apply_optimistic_notification_updates, apply_optimistic_updates, OptimisticUpdate,
    OptimisticUpdateId,
};
use crate::query::{QueryKey, QueryState};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use murmur_core::{InboxNotification, InboxNotificationId, RoomId, Thread, ThreadId};
use parking_lot::{Mutex, ReentrantMutex};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Full cache state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommentsState {
    /// Committed (server-acknowledged) threads
    pub threads: HashMap<ThreadId, Thread>,
    /// Loading/error state per distinct query
    pub threads_queries: HashMap<QueryKey, QueryState>,
    /// Pending optimistic updates in insertion order
    pub optimistic_updates: IndexMap<OptimisticUpdateId, OptimisticUpdate>,
    /// Committed inbox notifications
    pub inbox_notifications: HashMap<InboxNotificationId, InboxNotification>,
    /// Deletion time of every thread removed from committed state
    ///
    /// Server copies not newer than the tombstone are ignored, so a fetch
    /// that started before the deletion cannot bring the thread back.
    pub deleted_threads: HashMap<ThreadId, DateTime<Utc>>,
}

impl CommentsState {
    /// Committed threads with every pending update replayed over them.
    pub fn projected_threads(&self) -> HashMap<ThreadId, Thread> {
        apply_optimistic_updates(&self.threads, self.optimistic_updates.values())
    }

    /// Committed notifications with every pending update replayed over them.
    pub fn projected_inbox_notifications(&self) -> HashMap<InboxNotificationId, InboxNotification> {
        apply_optimistic_notification_updates(
            &self.inbox_notifications,
            self.optimistic_updates.values(),
        )
    }

    /// Whether any threads query of `room_id` has completed successfully.
    pub fn is_room_loaded(&self, room_id: &RoomId) -> bool {
        self.threads_queries
            .iter()
            .any(|(key, state)| &key.room_id == room_id && state.loaded)
    }
}

struct Listener {
    callback: Box<dyn Fn(&CommentsState) + Send + Sync>,
    /// Highest version delivered to this listener
    seen: AtomicU64,
}

struct StoreInner {
    state: Mutex<Arc<CommentsState>>,
    version: AtomicU64,
    next_update_id: AtomicU64,
    delivery: ReentrantMutex<()>,
    listeners: Mutex<ListenerRegistry>,
}

#[derive(Default)]
struct ListenerRegistry {
    next_id: u64,
    callbacks: BTreeMap<u64, Arc<Listener>>,
}

/// Shared handle to the cache state.
///
/// Cloning is cheap; all clones observe the same state.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("version", &self.version())
            .field("listeners", &self.inner.listeners.lock().callbacks.len())
            .finish()
    }
}

impl Store {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::with_state(CommentsState::default())
    }

    /// Create a store seeded with `state`.
    pub fn with_state(state: CommentsState) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                state: Mutex::new(Arc::new(state)),
                version: AtomicU64::new(0),
                next_update_id: AtomicU64::new(1),
                delivery: ReentrantMutex::new(()),
                listeners: Mutex::new(ListenerRegistry::default()),
            }),
        }
    }

    /// Current state snapshot.
    pub fn get(&self) -> Arc<CommentsState> {
        self.inner.state.lock().clone()
    }

    /// Number of state replacements so far.
    pub fn version(&self) -> u64 {
        self.inner.version.load(Ordering::Acquire)
    }

    /// Replace the state with `updater(current)` and notify subscribers.
    ///
    /// The updater receives the current state and must return a complete new
    /// state; it runs under the state lock and must not block.
    pub fn set<F>(&self, updater: F)
    where
        F: FnOnce(&CommentsState) -> CommentsState,
    {
        let _delivery = self.inner.delivery.lock();
        let (next, version) = {
            let mut guard = self.inner.state.lock();
            let next = Arc::new(updater(&guard));
            *guard = next.clone();
            let version = self.inner.version.fetch_add(1, Ordering::AcqRel) + 1;
            (next, version)
        };
        self.notify(&next, version);
    }

    /// Register `callback` to run after every [`Store::set`].
    ///
    /// Dropping the returned handle unsubscribes.
    #[must_use = "dropping the handle unsubscribes immediately"]
    pub fn subscribe<F>(&self, callback: F) -> StoreSubscription
    where
        F: Fn(&CommentsState) + Send + Sync + 'static,
    {
        let mut listeners = self.inner.listeners.lock();
        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners.callbacks.insert(
            id,
            Arc::new(Listener {
                callback: Box::new(callback),
                seen: AtomicU64::new(self.version()),
            }),
        );
        StoreSubscription {
            store: Arc::downgrade(&self.inner),
            id: Some(id),
        }
    }

    /// Append an optimistic update and return its id.
    pub fn push_optimistic_update(&self, update: OptimisticUpdate) -> OptimisticUpdateId {
        let id = OptimisticUpdateId(self.inner.next_update_id.fetch_add(1, Ordering::Relaxed));
        self.set(|state| {
            let mut next = state.clone();
            next.optimistic_updates.insert(id, update);
            next
        });
        id
    }

    /// Remove an optimistic update. Removing an unknown id is a no-op.
    pub fn remove_optimistic_update(&self, id: OptimisticUpdateId) {
        self.set(|state| {
            let mut next = state.clone();
            next.optimistic_updates.shift_remove(&id);
            next
        });
    }

    /// Record the loading/error state of a query.
    pub fn set_threads_query_state(&self, key: QueryKey, query_state: QueryState) {
        self.set(|state| {
            let mut next = state.clone();
            next.threads_queries.insert(key, query_state);
            next
        });
    }

    fn notify(&self, state: &CommentsState, version: u64) {
        let listeners: Vec<Arc<Listener>> = self
            .inner
            .listeners
            .lock()
            .callbacks
            .values()
            .cloned()
            .collect();
        for listener in listeners {
            if listener.seen.fetch_max(version, Ordering::AcqRel) < version {
                (listener.callback)(state);
            }
        }
    }
}

/// Handle returned by [`Store::subscribe`].
pub struct StoreSubscription {
    store: Weak<StoreInner>,
    id: Option<u64>,
}

impl StoreSubscription {
    /// Stop receiving notifications.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let (Some(id), Some(store)) = (self.id.take(), self.store.upgrade()) {
            store.listeners.lock().callbacks.remove(&id);
        }
    }
}

impl Drop for StoreSubscription {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use murmur_core::{InboxNotificationId, RoomId};
    use std::sync::atomic::AtomicUsize;

    fn read_update(id: &str) -> OptimisticUpdate {
        OptimisticUpdate::MarkInboxNotificationRead {
            notification_id: InboxNotificationId::new(id),
            read_at: Utc.timestamp_opt(1, 0).unwrap(),
        }
    }

    #[test]
    fn set_replaces_state_and_bumps_version() {
        let store = Store::new();
        let before = store.get();
        store.set_threads_query_state(
            QueryKey::new(&RoomId::new("room"), &Default::default()),
            QueryState::loading(),
        );

        assert_eq!(store.version(), 1);
        assert!(before.threads_queries.is_empty());
        assert_eq!(store.get().threads_queries.len(), 1);
    }

    #[test]
    fn subscribers_run_on_every_set_until_dropped() {
        let store = Store::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let subscription = store.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        store.set(|state| state.clone());
        store.set(|state| state.clone());
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        subscription.unsubscribe();
        store.set(|state| state.clone());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn subscribers_may_read_the_store() {
        let store = Store::new();
        let reader = store.clone();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_in_callback = seen.clone();
        let _subscription = store.subscribe(move |state| {
            // Snapshot passed in equals what a fresh read returns.
            assert_eq!(*reader.get(), *state);
            seen_in_callback.store(state.optimistic_updates.len(), Ordering::SeqCst);
        });

        store.push_optimistic_update(read_update("in_1"));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn write_from_a_callback_is_not_followed_by_the_older_snapshot() {
        let store = Store::new();
        let writer = store.clone();
        let _first = store.subscribe(move |state| {
            if state.optimistic_updates.len() == 1 {
                writer.push_optimistic_update(read_update("in_2"));
            }
        });
        let seen: Arc<Mutex<Vec<usize>>> = Arc::default();
        let sink = seen.clone();
        let _second = store.subscribe(move |state| {
            sink.lock().push(state.optimistic_updates.len());
        });

        store.push_optimistic_update(read_update("in_1"));
        assert_eq!(*seen.lock(), vec![2]);
        assert_eq!(store.version(), 2);
    }

    #[test]
    fn concurrent_writers_are_delivered_in_version_order() {
        let store = Store::new();
        let seen: Arc<Mutex<Vec<usize>>> = Arc::default();
        let sink = seen.clone();
        let _subscription = store.subscribe(move |state| {
            sink.lock().push(state.optimistic_updates.len());
        });

        std::thread::scope(|scope| {
            for writer in 0..4 {
                let store = store.clone();
                scope.spawn(move || {
                    for n in 0..25 {
                        store.push_optimistic_update(read_update(&format!("in_{writer}_{n}")));
                    }
                });
            }
        });

        let seen = seen.lock();
        assert_eq!(seen.len(), 100);
        assert!(seen.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn optimistic_updates_keep_insertion_order_and_remove_by_id() {
        let store = Store::new();
        let a = store.push_optimistic_update(read_update("in_a"));
        let b = store.push_optimistic_update(read_update("in_b"));
        let c = store.push_optimistic_update(read_update("in_c"));
        assert!(a < b && b < c);

        store.remove_optimistic_update(b);
        store.remove_optimistic_update(b);

        let ids: Vec<_> = store.get().optimistic_updates.keys().copied().collect();
        assert_eq!(ids, vec![a, c]);
    }

    #[test]
    fn room_is_loaded_after_first_successful_query() {
        let room = RoomId::new("room");
        let key = QueryKey::new(&room, &Default::default());
        let store = Store::new();
        assert!(!store.get().is_room_loaded(&room));

        store.set_threads_query_state(key.clone(), QueryState::loading());
        assert!(!store.get().is_room_loaded(&room));

        store.set_threads_query_state(key, QueryState::success());
        assert!(store.get().is_room_loaded(&room));
        assert!(!store.get().is_room_loaded(&RoomId::new("other")));
    }
}
