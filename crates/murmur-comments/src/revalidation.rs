//! # Revalidation and Polling
//!
//! Keeps committed threads fresh per distinct query.
//!
//! ## Request lifecycle
//!
//! ```text
//! idle ──revalidate──▶ fetching ──ok──▶ idle (merge page, loaded)
//!  ▲                     │
//!  └─────────err─────────┘ (record error, keep committed data)
//! ```
//!
//! Every fetch runs in its own task and is published as a shared future, so
//! concurrent callers for the same key join one request. Each key carries a
//! generation counter: a fetch whose generation is no longer current when it
//! completes is stale and its result is dropped. Single-thread refetches are
//! tracked the same way per thread id.
//!
//! ## Polling
//!
//! Consumers call [`Revalidator::retain`] and [`Revalidator::release`]. While
//! at least one query is retained a single poll task runs; it revalidates every
//! retained query on each tick, reacts to server change events immediately,
//! and picks its interval from the connection status.

use crate::client::{RoomClient, RoomEvent};
use crate::commit::{merge_threads_page, remove_thread, upsert_inbox_notification, upsert_thread};
use crate::config::{CommentsConfig, ConnectionStatus, PollingConfig};
use crate::query::{QueryKey, QueryState, ThreadsQuery};
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::store::Store;
use futures::future::{BoxFuture, FutureExt, Shared};
use murmur_core::{ApiError, PhysicalTimeEffects, RandomEffects, RoomId, ThreadId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Handle to a (possibly shared) threads fetch.
pub type RevalidationFuture = Shared<BoxFuture<'static, Result<(), ApiError>>>;

// =============================================================================
// Per-key bookkeeping
// =============================================================================

struct InFlight {
    generation: u64,
    started_at: Instant,
    done: bool,
    future: RevalidationFuture,
}

#[derive(Default)]
struct KeyState {
    generation: u64,
    in_flight: Option<InFlight>,
}

struct ActiveQuery {
    query: ThreadsQuery,
    consumers: usize,
}

struct Inner<C: ?Sized, E: ?Sized> {
    room_id: RoomId,
    client: Arc<C>,
    effects: Arc<E>,
    store: Store,
    polling: PollingConfig,
    dedupe_interval: Duration,
    retry: RetryPolicy,
    keys: Mutex<HashMap<QueryKey, KeyState>>,
    active: Mutex<HashMap<QueryKey, ActiveQuery>>,
    poller: Mutex<Option<JoinHandle<()>>>,
    next_thread_generation: AtomicU64,
    /// Latest generation of each single-thread refetch in flight
    thread_generations: Mutex<HashMap<ThreadId, u64>>,
}

impl<C: ?Sized, E: ?Sized> Drop for Inner<C, E> {
    fn drop(&mut self) {
        if let Some(poller) = self.poller.get_mut().take() {
            poller.abort();
        }
    }
}

/// Revalidation and polling controller for one room.
pub struct Revalidator<C: ?Sized, E: ?Sized> {
    inner: Arc<Inner<C, E>>,
}

impl<C: ?Sized, E: ?Sized> Clone for Revalidator<C, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C, E> Revalidator<C, E>
where
    C: RoomClient + ?Sized + 'static,
    E: PhysicalTimeEffects + RandomEffects + ?Sized + 'static,
{
    /// Create a controller writing into `store`.
    pub fn new(client: Arc<C>, effects: Arc<E>, store: Store, config: &CommentsConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                room_id: client.room_id(),
                client,
                effects,
                store,
                polling: config.polling.clone(),
                dedupe_interval: config.dedupe_interval(),
                retry: config.retry.policy(),
                keys: Mutex::new(HashMap::new()),
                active: Mutex::new(HashMap::new()),
                poller: Mutex::new(None),
                next_thread_generation: AtomicU64::new(1),
                thread_generations: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Fetch `query` unless a fetch for the same key is running or started
    /// within the dedupe window, in which case that fetch is joined.
    ///
    /// The fetch starts immediately; awaiting the returned future is optional.
    /// Must be called from within a tokio runtime.
    pub fn revalidate(&self, query: &ThreadsQuery) -> RevalidationFuture {
        self.inner.start(query, false)
    }

    /// Start a fresh fetch of `query`, superseding any fetch in flight.
    ///
    /// The superseded fetch still completes but its result is discarded.
    pub fn invalidate(&self, query: &ThreadsQuery) -> RevalidationFuture {
        self.inner.start(query, true)
    }

    /// Refetch a single thread.
    ///
    /// A not-found response removes the thread and its notifications from
    /// committed state. A refetch overtaken by a later refetch of the same
    /// thread drops its result.
    pub async fn revalidate_thread(&self, thread_id: &ThreadId) -> Result<(), ApiError> {
        self.inner.revalidate_thread(thread_id).await
    }

    /// Register one consumer of `query`.
    ///
    /// The first consumer of a key triggers a fetch; the first consumer
    /// overall starts the poll task.
    pub fn retain(&self, query: &ThreadsQuery) {
        let key = QueryKey::new(&self.inner.room_id, query);
        let (first_for_key, first_overall) = {
            let mut active = self.inner.active.lock();
            let first_overall = active.is_empty();
            let entry = active.entry(key.clone()).or_insert_with(|| ActiveQuery {
                query: query.clone(),
                consumers: 0,
            });
            entry.consumers += 1;
            (entry.consumers == 1, first_overall)
        };

        debug!(room_id = %self.inner.room_id, query = %key, "Retained threads query");
        if first_overall {
            self.start_polling();
        }
        if first_for_key {
            drop(self.inner.start(query, false));
        }
    }

    /// Drop one consumer of `query`. The poll task stops with the last consumer.
    pub fn release(&self, query: &ThreadsQuery) {
        let key = QueryKey::new(&self.inner.room_id, query);
        let now_idle = {
            let mut active = self.inner.active.lock();
            let Some(entry) = active.get_mut(&key) else {
                return;
            };
            entry.consumers -= 1;
            if entry.consumers == 0 {
                active.remove(&key);
            }
            active.is_empty()
        };

        debug!(room_id = %self.inner.room_id, query = %key, "Released threads query");
        if now_idle {
            if let Some(poller) = self.inner.poller.lock().take() {
                debug!(room_id = %self.inner.room_id, "Stopping poller");
                poller.abort();
            }
        }
    }

    /// Number of distinct retained queries.
    pub fn active_queries(&self) -> usize {
        self.inner.active.lock().len()
    }

    /// Whether the poll task is running.
    pub fn is_polling(&self) -> bool {
        self.inner
            .poller
            .lock()
            .as_ref()
            .is_some_and(|poller| !poller.is_finished())
    }

    fn start_polling(&self) {
        let status = self.inner.client.connection_status();
        let events = self.inner.client.subscribe_changes();
        let handle = tokio::spawn(poll_loop(
            Arc::downgrade(&self.inner),
            status,
            events,
            self.inner.polling.clone(),
        ));
        debug!(room_id = %self.inner.room_id, "Started poller");
        if let Some(previous) = self.inner.poller.lock().replace(handle) {
            previous.abort();
        }
    }
}

impl<C, E> Inner<C, E>
where
    C: RoomClient + ?Sized + 'static,
    E: PhysicalTimeEffects + RandomEffects + ?Sized + 'static,
{
    fn start(self: &Arc<Self>, query: &ThreadsQuery, force: bool) -> RevalidationFuture {
        let key = QueryKey::new(&self.room_id, query);

        // Only a key that has never been fetched shows as loading; later
        // fetches keep the last result visible.
        if !self.store.get().threads_queries.contains_key(&key) {
            self.store
                .set_threads_query_state(key.clone(), QueryState::loading());
        }

        let mut keys = self.keys.lock();
        let entry = keys.entry(key.clone()).or_default();

        if !force {
            if let Some(in_flight) = &entry.in_flight {
                if !in_flight.done || in_flight.started_at.elapsed() < self.dedupe_interval {
                    debug!(
                        room_id = %self.room_id,
                        query = %key,
                        generation = in_flight.generation,
                        "Joining in-flight revalidation"
                    );
                    return in_flight.future.clone();
                }
            }
        }

        entry.generation += 1;
        let generation = entry.generation;
        debug!(room_id = %self.room_id, query = %key, generation, force, "Revalidating threads");

        let task = tokio::spawn(self.clone().fetch(key, query.clone(), generation));
        let future = async move {
            match task.await {
                Ok(result) => result,
                Err(error) if error.is_panic() => std::panic::resume_unwind(error.into_panic()),
                Err(_) => Err(ApiError::network("revalidation cancelled")),
            }
        }
        .boxed()
        .shared();

        entry.in_flight = Some(InFlight {
            generation,
            started_at: Instant::now(),
            done: false,
            future: future.clone(),
        });
        future
    }

    async fn fetch(
        self: Arc<Self>,
        key: QueryKey,
        query: ThreadsQuery,
        generation: u64,
    ) -> Result<(), ApiError> {
        let result = retry_with_backoff(&self.retry, &*self.effects, "get_threads", || {
            self.client.get_threads(&query)
        })
        .await;

        let current = {
            let mut keys = self.keys.lock();
            let entry = keys.entry(key.clone()).or_default();
            if let Some(in_flight) = entry
                .in_flight
                .as_mut()
                .filter(|in_flight| in_flight.generation == generation)
            {
                in_flight.done = true;
            }
            entry.generation == generation
        };

        if !current {
            debug!(
                room_id = %self.room_id,
                query = %key,
                generation,
                "Discarding stale revalidation result"
            );
            return result.map(|_| ());
        }

        match result {
            Ok(page) => {
                debug!(
                    room_id = %self.room_id,
                    query = %key,
                    threads = page.threads.len(),
                    "Revalidation succeeded"
                );
                self.store.set(|state| {
                    let mut next = merge_threads_page(state, page);
                    next.threads_queries.insert(key, QueryState::success());
                    next
                });
                Ok(())
            }
            Err(error) => {
                warn!(room_id = %self.room_id, query = %key, error = %error, "Revalidation failed");
                self.store.set(|state| {
                    let mut next = state.clone();
                    let failed = QueryState::failure(state.threads_queries.get(&key), error.clone());
                    next.threads_queries.insert(key, failed);
                    next
                });
                Err(error)
            }
        }
    }

    async fn revalidate_thread(&self, thread_id: &ThreadId) -> Result<(), ApiError> {
        let generation = self.next_thread_generation.fetch_add(1, Ordering::Relaxed);
        self.thread_generations
            .lock()
            .insert(thread_id.clone(), generation);

        let result = retry_with_backoff(&self.retry, &*self.effects, "get_thread", || {
            self.client.get_thread(thread_id)
        })
        .await;

        let current = {
            let mut generations = self.thread_generations.lock();
            let current = generations.get(thread_id) == Some(&generation);
            if current {
                generations.remove(thread_id);
            }
            current
        };

        if !current {
            debug!(
                room_id = %self.room_id,
                thread_id = %thread_id,
                generation,
                "Discarding stale thread revalidation result"
            );
            return match result {
                Err(error) if !error.is_not_found() => Err(error),
                _ => Ok(()),
            };
        }

        match result {
            Ok(fetched) => {
                self.store.set(|state| {
                    let mut next = state.clone();
                    upsert_thread(&mut next, fetched.thread);
                    if let Some(notification) = fetched.inbox_notification {
                        upsert_inbox_notification(&mut next, notification);
                    }
                    next
                });
                Ok(())
            }
            Err(error) if error.is_not_found() => {
                debug!(room_id = %self.room_id, thread_id = %thread_id, "Thread no longer exists");
                let deleted_at = self.effects.now();
                self.store.set(|state| {
                    let mut next = state.clone();
                    remove_thread(&mut next, thread_id, deleted_at);
                    next
                });
                Ok(())
            }
            Err(error) => {
                warn!(
                    room_id = %self.room_id,
                    thread_id = %thread_id,
                    error = %error,
                    "Thread revalidation failed"
                );
                Err(error)
            }
        }
    }

    fn active_queries(&self) -> Vec<ThreadsQuery> {
        self.active
            .lock()
            .values()
            .map(|active| active.query.clone())
            .collect()
    }

    fn revalidate_active(self: &Arc<Self>, force: bool) {
        for query in self.active_queries() {
            drop(self.start(&query, force));
        }
    }
}

// =============================================================================
// Poll loop
// =============================================================================

async fn poll_loop<C, E>(
    inner: Weak<Inner<C, E>>,
    mut status: watch::Receiver<ConnectionStatus>,
    mut events: broadcast::Receiver<RoomEvent>,
    polling: PollingConfig,
) where
    C: RoomClient + ?Sized + 'static,
    E: PhysicalTimeEffects + RandomEffects + ?Sized + 'static,
{
    let mut status_open = true;
    let mut events_open = true;

    loop {
        let interval = polling.interval_for(*status.borrow());

        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                let Some(inner) = inner.upgrade() else { break };
                debug!(room_id = %inner.room_id, interval_ms = interval.as_millis() as u64, "Poll tick");
                inner.revalidate_active(false);
            }
            changed = status.changed(), if status_open => {
                // The next iteration re-arms the sleep with the new interval.
                if changed.is_err() {
                    status_open = false;
                }
            }
            event = events.recv(), if events_open => {
                let Some(inner) = inner.upgrade() else { break };
                match event {
                    Ok(RoomEvent::ThreadsChanged) => inner.revalidate_active(true),
                    Ok(RoomEvent::ThreadUpdated { thread_id })
                    | Ok(RoomEvent::ThreadDeleted { thread_id }) => {
                        let inner = inner.clone();
                        tokio::spawn(async move {
                            // Failures are logged inside.
                            let _ = inner.revalidate_thread(&thread_id).await;
                        });
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(room_id = %inner.room_id, skipped, "Missed change events, refetching");
                        inner.revalidate_active(true);
                    }
                    Err(broadcast::error::RecvError::Closed) => events_open = false,
                }
            }
        }
    }
}
