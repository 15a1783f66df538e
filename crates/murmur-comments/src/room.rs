//! # Comments Room
//!
//! Entry point for one room: reads, subscriptions, revalidation and (in
//! [`crate::mutations`]) the mutation callbacks.
//!
//! Nothing here is global. A [`CommentsClient`] owns the store that several
//! rooms share; dropping the client and its rooms tears everything down.

use crate::client::RoomClient;
use crate::config::{CommentsConfig, ConfigError};
use crate::errors::CommentsError;
use crate::query::ThreadsQuery;
use crate::revalidation::{RevalidationFuture, Revalidator};
use crate::selection::ThreadsResult;
use crate::store::{Store, StoreSubscription};
use murmur_core::{ApiError, InboxNotification, PhysicalTimeEffects, RandomEffects, RoomId, ThreadId};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

/// Capacity of the per-room error channel.
const ERROR_CHANNEL_CAPACITY: usize = 64;

/// Owner of the store shared by every room of one session.
pub struct CommentsClient<E: ?Sized> {
    store: Store,
    effects: Arc<E>,
    config: CommentsConfig,
}

impl<E> CommentsClient<E>
where
    E: PhysicalTimeEffects + RandomEffects + ?Sized + 'static,
{
    /// Create a client with an empty store.
    pub fn new(effects: Arc<E>, config: CommentsConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            store: Store::new(),
            effects,
            config,
        })
    }

    /// The shared store.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// The active configuration.
    pub fn config(&self) -> &CommentsConfig {
        &self.config
    }

    /// Open a room backed by `client`.
    pub fn room<C>(&self, client: Arc<C>) -> CommentsRoom<C, E>
    where
        C: RoomClient + ?Sized + 'static,
    {
        CommentsRoom::new(
            client,
            self.effects.clone(),
            self.store.clone(),
            self.config.clone(),
        )
    }
}

/// Comments cache for one room.
pub struct CommentsRoom<C: ?Sized, E: ?Sized> {
    pub(crate) room_id: RoomId,
    pub(crate) client: Arc<C>,
    pub(crate) effects: Arc<E>,
    pub(crate) store: Store,
    pub(crate) config: CommentsConfig,
    pub(crate) revalidator: Revalidator<C, E>,
    pub(crate) errors: broadcast::Sender<CommentsError>,
}

impl<C: ?Sized, E: ?Sized> Clone for CommentsRoom<C, E> {
    fn clone(&self) -> Self {
        Self {
            room_id: self.room_id.clone(),
            client: self.client.clone(),
            effects: self.effects.clone(),
            store: self.store.clone(),
            config: self.config.clone(),
            revalidator: self.revalidator.clone(),
            errors: self.errors.clone(),
        }
    }
}

impl<C, E> CommentsRoom<C, E>
where
    C: RoomClient + ?Sized + 'static,
    E: PhysicalTimeEffects + RandomEffects + ?Sized + 'static,
{
    /// Create a room writing into `store`.
    pub fn new(client: Arc<C>, effects: Arc<E>, store: Store, config: CommentsConfig) -> Self {
        let revalidator = Revalidator::new(client.clone(), effects.clone(), store.clone(), &config);
        let (errors, _) = broadcast::channel(ERROR_CHANNEL_CAPACITY);
        Self {
            room_id: client.room_id(),
            client,
            effects,
            store,
            config,
            revalidator,
            errors,
        }
    }

    /// Room id.
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// Store this room writes into.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// The revalidation controller.
    pub fn revalidator(&self) -> &Revalidator<C, E> {
        &self.revalidator
    }

    /// Receive mutation failures published after rollback.
    pub fn errors(&self) -> broadcast::Receiver<CommentsError> {
        self.errors.subscribe()
    }

    /// Current result of `query`.
    pub fn threads(&self, query: &ThreadsQuery) -> ThreadsResult {
        ThreadsResult::from_state(&self.room_id, &self.store.get(), query)
    }

    /// Watch `query`: keeps it polled and calls `callback` after every store change.
    ///
    /// `callback` also runs once with the current result. Dropping the
    /// returned handle stops both.
    pub fn subscribe_threads<F>(&self, query: ThreadsQuery, callback: F) -> ThreadsSubscription
    where
        F: Fn(ThreadsResult) + Send + Sync + 'static,
    {
        let callback = Arc::new(callback);
        let room_id = self.room_id.clone();
        let selected = query.clone();
        let listener = callback.clone();
        let store_subscription = self.store.subscribe(move |state| {
            listener(ThreadsResult::from_state(&room_id, state, &selected));
        });

        self.revalidator.retain(&query);
        callback(self.threads(&query));

        let revalidator = self.revalidator.clone();
        ThreadsSubscription {
            store_subscription: Some(store_subscription),
            release: Some(Box::new(move || revalidator.release(&query))),
        }
    }

    /// Projected inbox notifications of this room, most recent first.
    pub fn inbox_notifications(&self) -> Vec<InboxNotification> {
        let mut notifications: Vec<_> = self
            .store
            .get()
            .projected_inbox_notifications()
            .into_values()
            .filter(|notification| notification.room_id == self.room_id)
            .collect();
        notifications.sort_by(|a, b| {
            b.notified_at
                .cmp(&a.notified_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        notifications
    }

    /// Fetch `query`, joining a recent fetch of the same key.
    pub fn revalidate(&self, query: &ThreadsQuery) -> RevalidationFuture {
        self.revalidator.revalidate(query)
    }

    /// Fetch `query`, superseding any fetch in flight.
    pub fn invalidate(&self, query: &ThreadsQuery) -> RevalidationFuture {
        self.revalidator.invalidate(query)
    }

    /// Refetch one thread; a not-found response removes it.
    pub async fn revalidate_thread(&self, thread_id: &ThreadId) -> Result<(), ApiError> {
        self.revalidator.revalidate_thread(thread_id).await
    }

    pub(crate) fn publish_error(&self, error: CommentsError) {
        if self.errors.send(error).is_err() {
            debug!(room_id = %self.room_id, "No error listeners");
        }
    }
}

/// Handle returned by [`CommentsRoom::subscribe_threads`].
pub struct ThreadsSubscription {
    store_subscription: Option<StoreSubscription>,
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl ThreadsSubscription {
    /// Stop watching the query.
    pub fn unsubscribe(self) {}
}

impl Drop for ThreadsSubscription {
    fn drop(&mut self) {
        if let Some(subscription) = self.store_subscription.take() {
            subscription.unsubscribe();
        }
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for ThreadsSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadsSubscription")
            .field("active", &self.release.is_some())
            .finish()
    }
}
