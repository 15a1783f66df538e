//! Comments errors
//!
//! [`CommentsError`] has one variant per mutation kind. Each carries the ids
//! involved plus the underlying [`ApiError`]. These errors never surface
//! from the mutation call itself: the caller already holds the optimistic
//! entity, so failures are rolled back and published on the room's error
//! channel instead.
//!
//! [`UsageError`] covers programming-contract violations and is returned
//! synchronously.

use murmur_core::{ApiError, CommentId, InboxNotificationId, MetadataPatch, RoomId, ThreadId};

/// Documentation consulted when a request is rejected as forbidden.
pub const PERMISSIONS_DOCS_URL: &str = "https://murmur.dev/docs/authentication#permissions";

/// A failed mutation, published after its optimistic update was rolled back.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CommentsError {
    /// Creating a thread failed
    #[error("failed to create thread {thread_id} in room {room_id}: {cause}")]
    CreateThread {
        /// Room
        room_id: RoomId,
        /// Optimistic thread id
        thread_id: ThreadId,
        /// Optimistic id of the first comment
        comment_id: CommentId,
        /// Underlying failure
        #[source]
        cause: ApiError,
    },

    /// Deleting a thread failed
    #[error("failed to delete thread {thread_id} in room {room_id}: {cause}")]
    DeleteThread {
        /// Room
        room_id: RoomId,
        /// Target thread
        thread_id: ThreadId,
        /// Underlying failure
        #[source]
        cause: ApiError,
    },

    /// Editing thread metadata failed
    #[error("failed to edit metadata of thread {thread_id} in room {room_id}: {cause}")]
    EditThreadMetadata {
        /// Room
        room_id: RoomId,
        /// Target thread
        thread_id: ThreadId,
        /// Patch that was rejected
        metadata: MetadataPatch,
        /// Underlying failure
        #[source]
        cause: ApiError,
    },

    /// Marking a thread resolved failed
    #[error("failed to resolve thread {thread_id} in room {room_id}: {cause}")]
    MarkThreadResolved {
        /// Room
        room_id: RoomId,
        /// Target thread
        thread_id: ThreadId,
        /// Underlying failure
        #[source]
        cause: ApiError,
    },

    /// Marking a thread unresolved failed
    #[error("failed to unresolve thread {thread_id} in room {room_id}: {cause}")]
    MarkThreadUnresolved {
        /// Room
        room_id: RoomId,
        /// Target thread
        thread_id: ThreadId,
        /// Underlying failure
        #[source]
        cause: ApiError,
    },

    /// Creating a comment failed
    #[error("failed to create comment {comment_id} in thread {thread_id}: {cause}")]
    CreateComment {
        /// Room
        room_id: RoomId,
        /// Target thread
        thread_id: ThreadId,
        /// Optimistic comment id
        comment_id: CommentId,
        /// Underlying failure
        #[source]
        cause: ApiError,
    },

    /// Editing a comment failed
    #[error("failed to edit comment {comment_id} in thread {thread_id}: {cause}")]
    EditComment {
        /// Room
        room_id: RoomId,
        /// Target thread
        thread_id: ThreadId,
        /// Target comment
        comment_id: CommentId,
        /// Underlying failure
        #[source]
        cause: ApiError,
    },

    /// Deleting a comment failed
    #[error("failed to delete comment {comment_id} in thread {thread_id}: {cause}")]
    DeleteComment {
        /// Room
        room_id: RoomId,
        /// Target thread
        thread_id: ThreadId,
        /// Target comment
        comment_id: CommentId,
        /// Underlying failure
        #[source]
        cause: ApiError,
    },

    /// Adding a reaction failed
    #[error("failed to add reaction {emoji} to comment {comment_id}: {cause}")]
    AddReaction {
        /// Room
        room_id: RoomId,
        /// Target thread
        thread_id: ThreadId,
        /// Target comment
        comment_id: CommentId,
        /// Emoji
        emoji: String,
        /// Underlying failure
        #[source]
        cause: ApiError,
    },

    /// Removing a reaction failed
    #[error("failed to remove reaction {emoji} from comment {comment_id}: {cause}")]
    RemoveReaction {
        /// Room
        room_id: RoomId,
        /// Target thread
        thread_id: ThreadId,
        /// Target comment
        comment_id: CommentId,
        /// Emoji
        emoji: String,
        /// Underlying failure
        #[source]
        cause: ApiError,
    },

    /// Marking an inbox notification read failed
    #[error("failed to mark inbox notification {notification_id} as read: {cause}")]
    MarkInboxNotificationRead {
        /// Room
        room_id: RoomId,
        /// Target notification
        notification_id: InboxNotificationId,
        /// Underlying failure
        #[source]
        cause: ApiError,
    },
}

impl CommentsError {
    /// Name of the failed operation.
    pub fn operation(&self) -> &'static str {
        match self {
            Self::CreateThread { .. } => "createThread",
            Self::DeleteThread { .. } => "deleteThread",
            Self::EditThreadMetadata { .. } => "editThreadMetadata",
            Self::MarkThreadResolved { .. } => "markThreadAsResolved",
            Self::MarkThreadUnresolved { .. } => "markThreadAsUnresolved",
            Self::CreateComment { .. } => "createComment",
            Self::EditComment { .. } => "editComment",
            Self::DeleteComment { .. } => "deleteComment",
            Self::AddReaction { .. } => "addReaction",
            Self::RemoveReaction { .. } => "removeReaction",
            Self::MarkInboxNotificationRead { .. } => "markInboxNotificationAsRead",
        }
    }

    /// Room the failed operation targeted.
    pub fn room_id(&self) -> &RoomId {
        match self {
            Self::CreateThread { room_id, .. }
            | Self::DeleteThread { room_id, .. }
            | Self::EditThreadMetadata { room_id, .. }
            | Self::MarkThreadResolved { room_id, .. }
            | Self::MarkThreadUnresolved { room_id, .. }
            | Self::CreateComment { room_id, .. }
            | Self::EditComment { room_id, .. }
            | Self::DeleteComment { room_id, .. }
            | Self::AddReaction { room_id, .. }
            | Self::RemoveReaction { room_id, .. }
            | Self::MarkInboxNotificationRead { room_id, .. } => room_id,
        }
    }

    /// Thread the failed operation targeted, if any.
    pub fn thread_id(&self) -> Option<&ThreadId> {
        match self {
            Self::CreateThread { thread_id, .. }
            | Self::DeleteThread { thread_id, .. }
            | Self::EditThreadMetadata { thread_id, .. }
            | Self::MarkThreadResolved { thread_id, .. }
            | Self::MarkThreadUnresolved { thread_id, .. }
            | Self::CreateComment { thread_id, .. }
            | Self::EditComment { thread_id, .. }
            | Self::DeleteComment { thread_id, .. }
            | Self::AddReaction { thread_id, .. }
            | Self::RemoveReaction { thread_id, .. } => Some(thread_id),
            Self::MarkInboxNotificationRead { .. } => None,
        }
    }

    /// The transport failure behind this error.
    pub fn cause(&self) -> &ApiError {
        match self {
            Self::CreateThread { cause, .. }
            | Self::DeleteThread { cause, .. }
            | Self::EditThreadMetadata { cause, .. }
            | Self::MarkThreadResolved { cause, .. }
            | Self::MarkThreadUnresolved { cause, .. }
            | Self::CreateComment { cause, .. }
            | Self::EditComment { cause, .. }
            | Self::DeleteComment { cause, .. }
            | Self::AddReaction { cause, .. }
            | Self::RemoveReaction { cause, .. }
            | Self::MarkInboxNotificationRead { cause, .. } => cause,
        }
    }

    /// Suggested fix shown alongside forbidden responses.
    pub fn forbidden_hint(&self) -> String {
        format!(
            "Check that the current user has write access to room `{}`; \
             {} requires comment permissions",
            self.room_id(),
            self.operation()
        )
    }
}

/// Contract violation detected before any state was touched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UsageError {
    /// Threads were mutated before any threads query of the room finished loading
    #[error("cannot mutate threads in room {room_id} before they are loaded")]
    NotLoaded {
        /// Room
        room_id: RoomId,
    },

    /// The targeted thread is not in the projected view
    #[error("thread {thread_id} does not exist in room {room_id}")]
    UnknownThread {
        /// Room
        room_id: RoomId,
        /// Requested thread
        thread_id: ThreadId,
    },

    /// The room client has no current user to author the change
    #[error("room {room_id} has no current user")]
    NoCurrentUser {
        /// Room
        room_id: RoomId,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessors_expose_context() {
        let error = CommentsError::AddReaction {
            room_id: RoomId::new("room"),
            thread_id: ThreadId::new("th_1"),
            comment_id: CommentId::new("cm_1"),
            emoji: "👍".into(),
            cause: ApiError::new(403, "denied"),
        };

        assert_eq!(error.operation(), "addReaction");
        assert_eq!(error.room_id().as_str(), "room");
        assert_eq!(error.thread_id().map(ThreadId::as_str), Some("th_1"));
        assert!(error.cause().is_forbidden());
        assert!(error.forbidden_hint().contains("room"));
    }

    #[test]
    fn display_mentions_ids_and_cause() {
        let error = CommentsError::DeleteComment {
            room_id: RoomId::new("room"),
            thread_id: ThreadId::new("th_1"),
            comment_id: CommentId::new("cm_9"),
            cause: ApiError::network("offline"),
        };
        let message = error.to_string();
        assert!(message.contains("cm_9"));
        assert!(message.contains("th_1"));
        assert!(message.contains("Could not reach the server"));
    }
}
