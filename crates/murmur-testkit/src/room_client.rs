//! In-memory room server
//!
//! [`MockRoomClient`] implements [`RoomClient`] against an in-memory copy of
//! the server's threads. Tests can:
//!
//! - count calls per operation
//! - hold an operation so its requests block until released
//! - script failures for the next calls of an operation
//! - script the id the server assigns to the next created thread
//! - push change events and connection status updates

use crate::mock_effects::MockEffects;
use async_trait::async_trait;
use murmur_comments::{
    ConnectionStatus, CreateCommentRequest, CreateThreadRequest, EditCommentRequest,
    EditThreadMetadataRequest, ReactionRequest, RoomClient, RoomEvent, ThreadWithNotification,
    ThreadsPage, ThreadsQuery,
};
use murmur_core::{
    apply_metadata_patch, ApiError, Comment, CommentId, InboxNotification, InboxNotificationId,
    Metadata, PhysicalTimeEffects, Reaction, RoomId, Thread, ThreadId, ThreadUpdate, UserId,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Semaphore};

/// Operation names used for counters, gates and scripted failures.
pub mod ops {
    /// `get_threads`
    pub const GET_THREADS: &str = "get_threads";
    /// `get_thread`
    pub const GET_THREAD: &str = "get_thread";
    /// `create_thread`
    pub const CREATE_THREAD: &str = "create_thread";
    /// `delete_thread`
    pub const DELETE_THREAD: &str = "delete_thread";
    /// `edit_thread_metadata`
    pub const EDIT_THREAD_METADATA: &str = "edit_thread_metadata";
    /// `mark_thread_as_resolved`
    pub const MARK_THREAD_AS_RESOLVED: &str = "mark_thread_as_resolved";
    /// `mark_thread_as_unresolved`
    pub const MARK_THREAD_AS_UNRESOLVED: &str = "mark_thread_as_unresolved";
    /// `create_comment`
    pub const CREATE_COMMENT: &str = "create_comment";
    /// `edit_comment`
    pub const EDIT_COMMENT: &str = "edit_comment";
    /// `delete_comment`
    pub const DELETE_COMMENT: &str = "delete_comment";
    /// `add_reaction`
    pub const ADD_REACTION: &str = "add_reaction";
    /// `remove_reaction`
    pub const REMOVE_REACTION: &str = "remove_reaction";
    /// `mark_inbox_notification_as_read`
    pub const MARK_INBOX_NOTIFICATION_AS_READ: &str = "mark_inbox_notification_as_read";
}

#[derive(Default)]
struct ServerState {
    threads: BTreeMap<ThreadId, Thread>,
    notifications: BTreeMap<InboxNotificationId, InboxNotification>,
    next_thread_ids: VecDeque<ThreadId>,
}

#[derive(Default)]
struct Script {
    calls: HashMap<&'static str, usize>,
    gates: HashMap<&'static str, Arc<Semaphore>>,
    delays: HashMap<&'static str, Duration>,
    failures: HashMap<&'static str, VecDeque<ApiError>>,
}

/// Scriptable in-memory [`RoomClient`].
pub struct MockRoomClient {
    room_id: RoomId,
    user_id: Mutex<Option<UserId>>,
    clock: MockEffects,
    server: Mutex<ServerState>,
    script: Mutex<Script>,
    status: watch::Sender<ConnectionStatus>,
    events: broadcast::Sender<RoomEvent>,
}

impl MockRoomClient {
    /// Connected client for `room_id`, authenticated as `alice`.
    pub fn new(room_id: impl Into<RoomId>) -> Self {
        Self::with_clock(room_id, MockEffects::with_seed(7, crate::DEFAULT_START_MS))
    }

    /// Like [`MockRoomClient::new`] with an explicit server clock.
    pub fn with_clock(room_id: impl Into<RoomId>, clock: MockEffects) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Connected);
        let (events, _) = broadcast::channel(64);
        Self {
            room_id: room_id.into(),
            user_id: Mutex::new(Some(UserId::new("alice"))),
            clock,
            server: Mutex::new(ServerState::default()),
            script: Mutex::new(Script::default()),
            status,
            events,
        }
    }

    // =========================================================================
    // Server state
    // =========================================================================

    /// Seed a thread on the server.
    pub fn insert_thread(&self, thread: Thread) {
        self.server.lock().threads.insert(thread.id.clone(), thread);
    }

    /// Seed an inbox notification on the server.
    pub fn insert_notification(&self, notification: InboxNotification) {
        self.server
            .lock()
            .notifications
            .insert(notification.id.clone(), notification);
    }

    /// Remove a thread on the server without going through the cache.
    pub fn remove_thread(&self, thread_id: &ThreadId) {
        let mut server = self.server.lock();
        server.threads.remove(thread_id);
        server
            .notifications
            .retain(|_, notification| &notification.thread_id != thread_id);
    }

    /// Server copy of a thread.
    pub fn thread(&self, thread_id: &ThreadId) -> Option<Thread> {
        self.server.lock().threads.get(thread_id).cloned()
    }

    /// The next created thread gets `thread_id` instead of the client's id.
    pub fn assign_next_thread_id(&self, thread_id: impl Into<ThreadId>) {
        self.server
            .lock()
            .next_thread_ids
            .push_back(thread_id.into());
    }

    /// Change the authenticated user; `None` simulates an anonymous session.
    pub fn set_user(&self, user_id: Option<UserId>) {
        *self.user_id.lock() = user_id;
    }

    // =========================================================================
    // Scripting
    // =========================================================================

    /// Number of calls made to `op` so far.
    pub fn calls(&self, op: &str) -> usize {
        self.script.lock().calls.get(op).copied().unwrap_or(0)
    }

    /// Make every request to `op` wait until released.
    ///
    /// Reads answer from the server state at call time; the gate only delays
    /// delivery, like a response still on the wire.
    pub fn hold(&self, op: &'static str) {
        self.script
            .lock()
            .gates
            .insert(op, Arc::new(Semaphore::new(0)));
    }

    /// Let `count` held requests to `op` proceed.
    pub fn release(&self, op: &'static str, count: usize) {
        if let Some(gate) = self.script.lock().gates.get(op) {
            gate.add_permits(count);
        }
    }

    /// Let every held and future request to `op` proceed.
    pub fn release_all(&self, op: &'static str) {
        if let Some(gate) = self.script.lock().gates.remove(op) {
            gate.close();
        }
    }

    /// Delay every request to `op` by `delay` (tokio time).
    pub fn delay(&self, op: &'static str, delay: Duration) {
        self.script.lock().delays.insert(op, delay);
    }

    /// Fail the next call to `op` with `error`. Calls queue up in order.
    pub fn fail_next(&self, op: &'static str, error: ApiError) {
        self.script
            .lock()
            .failures
            .entry(op)
            .or_default()
            .push_back(error);
    }

    /// Publish a change event.
    pub fn emit(&self, event: RoomEvent) {
        let _ = self.events.send(event);
    }

    /// Publish a connection status.
    pub fn set_connection_status(&self, status: ConnectionStatus) {
        self.status.send_replace(status);
    }

    async fn enter(&self, op: &'static str) -> Result<(), ApiError> {
        let (gate, delay) = {
            let mut script = self.script.lock();
            *script.calls.entry(op).or_default() += 1;
            (script.gates.get(op).cloned(), script.delays.get(op).copied())
        };
        if let Some(gate) = gate {
            // A closed gate means "released for good".
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match self
            .script
            .lock()
            .failures
            .get_mut(op)
            .and_then(VecDeque::pop_front)
        {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn threads_page(&self, query: &ThreadsQuery) -> ThreadsPage {
        let server = self.server.lock();
        let threads: Vec<Thread> = server
            .threads
            .values()
            .filter(|thread| {
                thread.room_id == self.room_id
                    && thread.has_live_comments()
                    && query.matches(thread)
            })
            .cloned()
            .collect();
        let inbox_notifications = server
            .notifications
            .values()
            .filter(|notification| threads.iter().any(|t| t.id == notification.thread_id))
            .cloned()
            .collect();
        ThreadsPage {
            threads,
            inbox_notifications,
        }
    }

    fn thread_with_notification(
        &self,
        thread_id: &ThreadId,
    ) -> Result<ThreadWithNotification, ApiError> {
        let server = self.server.lock();
        let thread = server
            .threads
            .get(thread_id)
            .filter(|thread| thread.has_live_comments())
            .cloned()
            .ok_or_else(|| not_found("thread", thread_id.as_str()))?;
        let inbox_notification = server
            .notifications
            .values()
            .find(|notification| &notification.thread_id == thread_id)
            .cloned();
        Ok(ThreadWithNotification {
            thread,
            inbox_notification,
        })
    }

    fn with_thread<T>(
        &self,
        thread_id: &ThreadId,
        f: impl FnOnce(&mut ServerState, Thread) -> Result<T, ApiError>,
    ) -> Result<T, ApiError> {
        let mut server = self.server.lock();
        let thread = server
            .threads
            .get(thread_id)
            .cloned()
            .ok_or_else(|| not_found("thread", thread_id.as_str()))?;
        f(&mut *server, thread)
    }

    fn store_update(
        server: &mut ServerState,
        thread_id: &ThreadId,
        update: ThreadUpdate,
        missing: &str,
    ) -> Result<(), ApiError> {
        match update {
            ThreadUpdate::Unchanged => Err(not_found("comment", missing)),
            ThreadUpdate::Updated(thread) => {
                server.threads.insert(thread_id.clone(), thread);
                Ok(())
            }
            ThreadUpdate::Deleted => {
                server.threads.remove(thread_id);
                Ok(())
            }
        }
    }

    fn require_user(&self) -> Result<UserId, ApiError> {
        self.user_id
            .lock()
            .clone()
            .ok_or_else(|| ApiError::new(401, "not authenticated"))
    }
}

fn not_found(kind: &str, id: &str) -> ApiError {
    ApiError::new(404, format!("{kind} {id} not found"))
}

#[async_trait]
impl RoomClient for MockRoomClient {
    fn room_id(&self) -> RoomId {
        self.room_id.clone()
    }

    fn current_user_id(&self) -> Option<UserId> {
        self.user_id.lock().clone()
    }

    fn connection_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    fn subscribe_changes(&self) -> broadcast::Receiver<RoomEvent> {
        self.events.subscribe()
    }

    async fn get_threads(&self, query: &ThreadsQuery) -> Result<ThreadsPage, ApiError> {
        let page = self.threads_page(query);
        self.enter(ops::GET_THREADS).await?;
        Ok(page)
    }

    async fn get_thread(&self, thread_id: &ThreadId) -> Result<ThreadWithNotification, ApiError> {
        let fetched = self.thread_with_notification(thread_id);
        self.enter(ops::GET_THREAD).await?;
        fetched
    }
    async fn create_thread(&self, request: CreateThreadRequest) -> Result<Thread, ApiError> {
        self.enter(ops::CREATE_THREAD).await?;
        let user_id = self.require_user()?;
        let now = self.clock.now();
        let mut server = self.server.lock();
        let thread_id = server
            .next_thread_ids
            .pop_front()
            .unwrap_or(request.thread_id);
        let thread = Thread {
            id: thread_id.clone(),
            room_id: self.room_id.clone(),
            created_at: now,
            updated_at: None,
            resolved: false,
            metadata: request.metadata,
            comments: vec![Comment {
                id: request.comment_id,
                thread_id: thread_id.clone(),
                room_id: self.room_id.clone(),
                user_id,
                created_at: now,
                edited_at: None,
                deleted_at: None,
                body: Some(request.body),
                reactions: Vec::new(),
            }],
        };
        server.threads.insert(thread_id, thread.clone());
        Ok(thread)
    }

    async fn delete_thread(&self, thread_id: &ThreadId) -> Result<(), ApiError> {
        self.enter(ops::DELETE_THREAD).await?;
        self.with_thread(thread_id, |server, _| {
            server.threads.remove(thread_id);
            server
                .notifications
                .retain(|_, notification| &notification.thread_id != thread_id);
            Ok(())
        })
    }

    async fn edit_thread_metadata(
        &self,
        request: EditThreadMetadataRequest,
    ) -> Result<Metadata, ApiError> {
        self.enter(ops::EDIT_THREAD_METADATA).await?;
        let now = self.clock.now();
        self.with_thread(&request.thread_id, |server, thread| {
            let metadata = apply_metadata_patch(&thread.metadata, &request.metadata);
            let update = thread.with_metadata(metadata.clone(), now);
            Self::store_update(server, &request.thread_id, update, "")?;
            Ok(metadata)
        })
    }

    async fn mark_thread_as_resolved(&self, thread_id: &ThreadId) -> Result<(), ApiError> {
        self.enter(ops::MARK_THREAD_AS_RESOLVED).await?;
        let now = self.clock.now();
        self.with_thread(thread_id, |server, thread| {
            Self::store_update(server, thread_id, thread.set_resolved(true, now), "")
        })
    }

    async fn mark_thread_as_unresolved(&self, thread_id: &ThreadId) -> Result<(), ApiError> {
        self.enter(ops::MARK_THREAD_AS_UNRESOLVED).await?;
        let now = self.clock.now();
        self.with_thread(thread_id, |server, thread| {
            Self::store_update(server, thread_id, thread.set_resolved(false, now), "")
        })
    }

    async fn create_comment(&self, request: CreateCommentRequest) -> Result<Comment, ApiError> {
        self.enter(ops::CREATE_COMMENT).await?;
        let user_id = self.require_user()?;
        let now = self.clock.now();
        self.with_thread(&request.thread_id, |server, thread| {
            let comment = Comment {
                id: request.comment_id.clone(),
                thread_id: request.thread_id.clone(),
                room_id: self.room_id.clone(),
                user_id,
                created_at: now,
                edited_at: None,
                deleted_at: None,
                body: Some(request.body),
                reactions: Vec::new(),
            };
            let update = thread.upsert_comment(comment.clone());
            Self::store_update(server, &request.thread_id, update, request.comment_id.as_str())?;
            Ok(comment)
        })
    }

    async fn edit_comment(&self, request: EditCommentRequest) -> Result<Comment, ApiError> {
        self.enter(ops::EDIT_COMMENT).await?;
        let now = self.clock.now();
        self.with_thread(&request.thread_id, |server, thread| {
            let update = thread.edit_comment(&request.comment_id, &request.body, now);
            Self::store_update(server, &request.thread_id, update, request.comment_id.as_str())?;
            server
                .threads
                .get(&request.thread_id)
                .and_then(|thread| thread.comment(&request.comment_id))
                .cloned()
                .ok_or_else(|| not_found("comment", request.comment_id.as_str()))
        })
    }

    async fn delete_comment(
        &self,
        thread_id: &ThreadId,
        comment_id: &CommentId,
    ) -> Result<(), ApiError> {
        self.enter(ops::DELETE_COMMENT).await?;
        let now = self.clock.now();
        self.with_thread(thread_id, |server, thread| {
            let update = thread.delete_comment(comment_id, now);
            Self::store_update(server, thread_id, update, comment_id.as_str())
        })
    }

    async fn add_reaction(&self, request: ReactionRequest) -> Result<Reaction, ApiError> {
        self.enter(ops::ADD_REACTION).await?;
        let user_id = self.require_user()?;
        let now = self.clock.now();
        self.with_thread(&request.thread_id, |server, thread| {
            let update = thread.add_reaction(&request.comment_id, &request.emoji, &user_id, now);
            Self::store_update(server, &request.thread_id, update, request.comment_id.as_str())?;
            server
                .threads
                .get(&request.thread_id)
                .and_then(|thread| thread.comment(&request.comment_id))
                .and_then(|comment| {
                    comment
                        .reactions
                        .iter()
                        .find(|reaction| reaction.emoji == request.emoji)
                })
                .cloned()
                .ok_or_else(|| not_found("reaction", &request.emoji))
        })
    }

    async fn remove_reaction(&self, request: ReactionRequest) -> Result<(), ApiError> {
        self.enter(ops::REMOVE_REACTION).await?;
        let user_id = self.require_user()?;
        let now = self.clock.now();
        self.with_thread(&request.thread_id, |server, thread| {
            let update =
                thread.remove_reaction(&request.comment_id, &request.emoji, &user_id, now);
            Self::store_update(server, &request.thread_id, update, request.comment_id.as_str())
        })
    }

    async fn mark_inbox_notification_as_read(
        &self,
        notification_id: &InboxNotificationId,
    ) -> Result<(), ApiError> {
        self.enter(ops::MARK_INBOX_NOTIFICATION_AS_READ).await?;
        let now = self.clock.now();
        let mut server = self.server.lock();
        let notification = server
            .notifications
            .get(notification_id)
            .ok_or_else(|| not_found("inbox notification", notification_id.as_str()))?;
        let read = notification.marked_read(now);
        server.notifications.insert(notification_id.clone(), read);
        Ok(())
    }
}
