//! Room client contract
//!
//! The cache treats the network as a black box behind [`RoomClient`]. Every
//! request either returns the authoritative entity or fails with an
//! [`ApiError`]. The client also exposes the two push sources the
//! revalidation controller listens to: server change notifications and the
//! connection status.

use crate::config::ConnectionStatus;
use crate::query::ThreadsQuery;
use async_trait::async_trait;
use murmur_core::{
    ApiError, Comment, CommentBody, CommentId, InboxNotification, InboxNotificationId, Metadata,
    MetadataPatch, Reaction, RoomId, Thread, ThreadId, UserId,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};

/// Result of a threads query.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ThreadsPage {
    /// Threads matching the query
    pub threads: Vec<Thread>,
    /// Inbox notifications for those threads
    #[serde(default)]
    pub inbox_notifications: Vec<InboxNotification>,
}

/// A single thread and its inbox notification, if the user has one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadWithNotification {
    /// The thread
    pub thread: Thread,
    /// Notification for that thread
    #[serde(default)]
    pub inbox_notification: Option<InboxNotification>,
}

/// Server-pushed change notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoomEvent {
    /// Something changed; the affected threads are unknown
    ThreadsChanged,
    /// A thread or one of its comments changed
    ThreadUpdated {
        /// Thread that changed
        thread_id: ThreadId,
    },
    /// A thread was deleted
    ThreadDeleted {
        /// Thread that was deleted
        thread_id: ThreadId,
    },
}

/// Request to create a thread with its first comment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateThreadRequest {
    /// Client-generated thread id
    pub thread_id: ThreadId,
    /// Client-generated id of the first comment
    pub comment_id: CommentId,
    /// Body of the first comment
    pub body: CommentBody,
    /// Initial metadata
    pub metadata: Metadata,
}

/// Request to patch thread metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditThreadMetadataRequest {
    /// Target thread
    pub thread_id: ThreadId,
    /// Keys to set (`Some`) or delete (`None`)
    pub metadata: MetadataPatch,
}

/// Request to add a comment to a thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateCommentRequest {
    /// Target thread
    pub thread_id: ThreadId,
    /// Client-generated comment id
    pub comment_id: CommentId,
    /// Comment body
    pub body: CommentBody,
}

/// Request to replace a comment's body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditCommentRequest {
    /// Target thread
    pub thread_id: ThreadId,
    /// Target comment
    pub comment_id: CommentId,
    /// New body
    pub body: CommentBody,
}

/// Request to add or remove a reaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionRequest {
    /// Target thread
    pub thread_id: ThreadId,
    /// Target comment
    pub comment_id: CommentId,
    /// Emoji
    pub emoji: String,
}

/// Network client for one room.
#[async_trait]
pub trait RoomClient: Send + Sync {
    /// Room this client talks to.
    fn room_id(&self) -> RoomId;

    /// User the client is authenticated as, once known.
    fn current_user_id(&self) -> Option<UserId>;

    /// Connection status source, used to pick the polling interval.
    fn connection_status(&self) -> watch::Receiver<ConnectionStatus>;

    /// Server-pushed change notifications.
    fn subscribe_changes(&self) -> broadcast::Receiver<RoomEvent>;

    /// Fetch the threads matching `query`.
    async fn get_threads(&self, query: &ThreadsQuery) -> Result<ThreadsPage, ApiError>;

    /// Fetch one thread. A 404 means the thread no longer exists.
    async fn get_thread(&self, thread_id: &ThreadId) -> Result<ThreadWithNotification, ApiError>;

    /// Create a thread.
    async fn create_thread(&self, request: CreateThreadRequest) -> Result<Thread, ApiError>;

    /// Delete a thread.
    async fn delete_thread(&self, thread_id: &ThreadId) -> Result<(), ApiError>;

    /// Patch thread metadata, returning the full resulting metadata.
    async fn edit_thread_metadata(
        &self,
        request: EditThreadMetadataRequest,
    ) -> Result<Metadata, ApiError>;

    /// Mark a thread resolved.
    async fn mark_thread_as_resolved(&self, thread_id: &ThreadId) -> Result<(), ApiError>;

    /// Mark a thread unresolved.
    async fn mark_thread_as_unresolved(&self, thread_id: &ThreadId) -> Result<(), ApiError>;

    /// Add a comment.
    async fn create_comment(&self, request: CreateCommentRequest) -> Result<Comment, ApiError>;

    /// Edit a comment.
    async fn edit_comment(&self, request: EditCommentRequest) -> Result<Comment, ApiError>;

    /// Delete a comment.
    async fn delete_comment(
        &self,
        thread_id: &ThreadId,
        comment_id: &CommentId,
    ) -> Result<(), ApiError>;

    /// Add the current user's reaction, returning the resulting reaction entry.
    async fn add_reaction(&self, request: ReactionRequest) -> Result<Reaction, ApiError>;

    /// Remove the current user's reaction.
    async fn remove_reaction(&self, request: ReactionRequest) -> Result<(), ApiError>;

    /// Mark an inbox notification read.
    async fn mark_inbox_notification_as_read(
        &self,
        notification_id: &InboxNotificationId,
    ) -> Result<(), ApiError>;
}
