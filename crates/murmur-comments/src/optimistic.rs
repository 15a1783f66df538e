//! # Optimistic Updates
//!
//! Pending local mutations and the pure reducer that projects them over
//! committed state.
//!
//! ```text
//! committed threads ──┐
//!                     ├─ apply_optimistic_updates ─▶ projected threads
//! pending updates ────┘        (ordered fold)
//! ```
//!
//! Updates are replayed in insertion order. An update whose target is missing
//! (thread or comment absent) is a silent no-op: the target may already have
//! been removed by a later authoritative result.

use chrono::{DateTime, Utc};
use murmur_core::{
    Comment, CommentBody, CommentId, InboxNotification, InboxNotificationId, MetadataPatch,
    Thread, ThreadId, ThreadUpdate, UserId,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Identifier of a pending optimistic update, unique within one store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OptimisticUpdateId(pub u64);

impl fmt::Display for OptimisticUpdateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ou_{}", self.0)
    }
}

/// A pending local mutation, carrying enough data to replay it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum OptimisticUpdate {
    /// A thread created locally
    CreateThread {
        /// The locally constructed thread
        thread: Thread,
    },
    /// A thread deleted locally
    DeleteThread {
        /// Target thread
        thread_id: ThreadId,
        /// Local deletion time
        deleted_at: DateTime<Utc>,
    },
    /// Metadata patched locally
    EditThreadMetadata {
        /// Target thread
        thread_id: ThreadId,
        /// Partial metadata to merge
        metadata: MetadataPatch,
        /// Local edit time
        updated_at: DateTime<Utc>,
    },
    /// Resolved flag changed locally
    MarkThreadResolved {
        /// Target thread
        thread_id: ThreadId,
        /// New resolved flag
        resolved: bool,
        /// Local change time
        updated_at: DateTime<Utc>,
    },
    /// A comment created locally
    CreateComment {
        /// The locally constructed comment
        comment: Comment,
    },
    /// A comment edited locally
    EditComment {
        /// Target thread
        thread_id: ThreadId,
        /// Target comment
        comment_id: CommentId,
        /// New body
        body: CommentBody,
        /// Local edit time
        edited_at: DateTime<Utc>,
    },
    /// A comment deleted locally
    DeleteComment {
        /// Target thread
        thread_id: ThreadId,
        /// Target comment
        comment_id: CommentId,
        /// Local deletion time
        deleted_at: DateTime<Utc>,
    },
    /// A reaction added locally
    AddReaction {
        /// Target thread
        thread_id: ThreadId,
        /// Target comment
        comment_id: CommentId,
        /// Emoji
        emoji: String,
        /// Reacting user
        user_id: UserId,
        /// Local reaction time
        created_at: DateTime<Utc>,
    },
    /// A reaction removed locally
    RemoveReaction {
        /// Target thread
        thread_id: ThreadId,
        /// Target comment
        comment_id: CommentId,
        /// Emoji
        emoji: String,
        /// User whose reaction is removed
        user_id: UserId,
        /// Local removal time
        removed_at: DateTime<Utc>,
    },
    /// An inbox notification read locally
    MarkInboxNotificationRead {
        /// Target notification
        notification_id: InboxNotificationId,
        /// Local read time
        read_at: DateTime<Utc>,
    },
}

impl OptimisticUpdate {
    /// Short kind name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CreateThread { .. } => "create-thread",
            Self::DeleteThread { .. } => "delete-thread",
            Self::EditThreadMetadata { .. } => "edit-thread-metadata",
            Self::MarkThreadResolved { .. } => "mark-thread-resolved",
            Self::CreateComment { .. } => "create-comment",
            Self::EditComment { .. } => "edit-comment",
            Self::DeleteComment { .. } => "delete-comment",
            Self::AddReaction { .. } => "add-reaction",
            Self::RemoveReaction { .. } => "remove-reaction",
            Self::MarkInboxNotificationRead { .. } => "mark-inbox-notification-read",
        }
    }

    /// Thread targeted by this update, if any.
    pub fn thread_id(&self) -> Option<&ThreadId> {
        match self {
            Self::CreateThread { thread } => Some(&thread.id),
            Self::CreateComment { comment } => Some(&comment.thread_id),
            Self::DeleteThread { thread_id, .. }
            | Self::EditThreadMetadata { thread_id, .. }
            | Self::MarkThreadResolved { thread_id, .. }
            | Self::EditComment { thread_id, .. }
            | Self::DeleteComment { thread_id, .. }
            | Self::AddReaction { thread_id, .. }
            | Self::RemoveReaction { thread_id, .. } => Some(thread_id),
            Self::MarkInboxNotificationRead { .. } => None,
        }
    }
}

fn apply_to_thread(
    threads: &mut HashMap<ThreadId, Thread>,
    thread_id: &ThreadId,
    f: impl FnOnce(&Thread) -> ThreadUpdate,
) {
    let Some(thread) = threads.get(thread_id) else {
        return;
    };
    match f(thread) {
        ThreadUpdate::Unchanged => {}
        ThreadUpdate::Updated(updated) => {
            threads.insert(thread_id.clone(), updated);
        }
        ThreadUpdate::Deleted => {
            threads.remove(thread_id);
        }
    }
}

/// Replay `updates` in order over a copy of `threads`.
///
/// Pure and deterministic: the same inputs always produce the same map.
pub fn apply_optimistic_updates<'a, I>(
    threads: &HashMap<ThreadId, Thread>,
    updates: I,
) -> HashMap<ThreadId, Thread>
where
    I: IntoIterator<Item = &'a OptimisticUpdate>,
{
    let mut projected = threads.clone();

    for update in updates {
        match update {
            OptimisticUpdate::CreateThread { thread } => {
                projected.insert(thread.id.clone(), thread.clone());
            }
            OptimisticUpdate::DeleteThread { thread_id, .. } => {
                projected.remove(thread_id);
            }
            OptimisticUpdate::EditThreadMetadata {
                thread_id,
                metadata,
                updated_at,
            } => apply_to_thread(&mut projected, thread_id, |thread| {
                thread.patch_metadata(metadata, *updated_at)
            }),
            OptimisticUpdate::MarkThreadResolved {
                thread_id,
                resolved,
                updated_at,
            } => apply_to_thread(&mut projected, thread_id, |thread| {
                thread.set_resolved(*resolved, *updated_at)
            }),
            OptimisticUpdate::CreateComment { comment } => {
                apply_to_thread(&mut projected, &comment.thread_id, |thread| {
                    thread.upsert_comment(comment.clone())
                })
            }
            OptimisticUpdate::EditComment {
                thread_id,
                comment_id,
                body,
                edited_at,
            } => apply_to_thread(&mut projected, thread_id, |thread| {
                thread.edit_comment(comment_id, body, *edited_at)
            }),
            OptimisticUpdate::DeleteComment {
                thread_id,
                comment_id,
                deleted_at,
            } => apply_to_thread(&mut projected, thread_id, |thread| {
                thread.delete_comment(comment_id, *deleted_at)
            }),
            OptimisticUpdate::AddReaction {
                thread_id,
                comment_id,
                emoji,
                user_id,
                created_at,
            } => apply_to_thread(&mut projected, thread_id, |thread| {
                thread.add_reaction(comment_id, emoji, user_id, *created_at)
            }),
            OptimisticUpdate::RemoveReaction {
                thread_id,
                comment_id,
                emoji,
                user_id,
                removed_at,
            } => apply_to_thread(&mut projected, thread_id, |thread| {
                thread.remove_reaction(comment_id, emoji, user_id, *removed_at)
            }),
            OptimisticUpdate::MarkInboxNotificationRead { .. } => {}
        }
    }

    projected
}

/// Replay `updates` over a copy of the committed inbox notifications.
///
/// Deleting a thread optimistically also hides its notifications.
pub fn apply_optimistic_notification_updates<'a, I>(
    notifications: &HashMap<InboxNotificationId, InboxNotification>,
    updates: I,
) -> HashMap<InboxNotificationId, InboxNotification>
where
    I: IntoIterator<Item = &'a OptimisticUpdate>,
{
    let mut projected = notifications.clone();

    for update in updates {
        match update {
            OptimisticUpdate::MarkInboxNotificationRead {
                notification_id,
                read_at,
            } => {
                if let Some(notification) = projected.get(notification_id) {
                    let read = notification.marked_read(*read_at);
                    projected.insert(notification_id.clone(), read);
                }
            }
            OptimisticUpdate::DeleteThread { thread_id, .. } => {
                projected.retain(|_, notification| &notification.thread_id != thread_id);
            }
            _ => {}
        }
    }

    projected
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use murmur_core::{Metadata, MetadataValue, RoomId};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn comment(thread: &str, id: &str, created: i64) -> Comment {
        Comment {
            id: CommentId::new(id),
            thread_id: ThreadId::new(thread),
            room_id: RoomId::new("room"),
            user_id: UserId::new("alice"),
            created_at: at(created),
            edited_at: None,
            deleted_at: None,
            body: Some(CommentBody::plain("hello")),
            reactions: Vec::new(),
        }
    }

    fn thread(id: &str) -> Thread {
        Thread {
            id: ThreadId::new(id),
            room_id: RoomId::new("room"),
            created_at: at(1),
            updated_at: None,
            resolved: false,
            metadata: Metadata::new(),
            comments: vec![comment(id, "cm_1", 1)],
        }
    }

    fn patch(key: &str, value: i64) -> MetadataPatch {
        MetadataPatch::from([(key.to_string(), Some(MetadataValue::from(value)))])
    }

    #[test]
    fn replay_is_idempotent() {
        let committed = HashMap::from([(ThreadId::new("th_a"), thread("th_a"))]);
        let updates = vec![
            OptimisticUpdate::CreateThread {
                thread: thread("th_b"),
            },
            OptimisticUpdate::EditThreadMetadata {
                thread_id: ThreadId::new("th_a"),
                metadata: patch("a", 1),
                updated_at: at(5),
            },
        ];

        let first = apply_optimistic_updates(&committed, &updates);
        let second = apply_optimistic_updates(&committed, &updates);
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
        // Committed input is untouched
        assert!(committed[&ThreadId::new("th_a")].metadata.is_empty());
    }

    #[test]
    fn create_then_edit_shows_both() {
        let updates = vec![
            OptimisticUpdate::CreateThread {
                thread: thread("th_t"),
            },
            OptimisticUpdate::EditThreadMetadata {
                thread_id: ThreadId::new("th_t"),
                metadata: patch("a", 1),
                updated_at: at(5),
            },
        ];

        let projected = apply_optimistic_updates(&HashMap::new(), &updates);
        let t = &projected[&ThreadId::new("th_t")];
        assert_eq!(t.metadata.get("a"), Some(&MetadataValue::Number(1.0)));
    }

    #[test]
    fn edit_before_create_is_dropped() {
        let updates = vec![
            OptimisticUpdate::EditThreadMetadata {
                thread_id: ThreadId::new("th_t"),
                metadata: patch("a", 1),
                updated_at: at(5),
            },
            OptimisticUpdate::CreateThread {
                thread: thread("th_t"),
            },
        ];

        let projected = apply_optimistic_updates(&HashMap::new(), &updates);
        assert!(projected[&ThreadId::new("th_t")].metadata.is_empty());
    }

    #[test]
    fn deleting_only_comment_removes_thread() {
        let committed = HashMap::from([(ThreadId::new("th_a"), thread("th_a"))]);
        let updates = vec![OptimisticUpdate::DeleteComment {
            thread_id: ThreadId::new("th_a"),
            comment_id: CommentId::new("cm_1"),
            deleted_at: at(9),
        }];

        let projected = apply_optimistic_updates(&committed, &updates);
        assert!(!projected.contains_key(&ThreadId::new("th_a")));
    }

    #[test]
    fn comment_updates_on_missing_targets_are_noops() {
        let committed = HashMap::from([(ThreadId::new("th_a"), thread("th_a"))]);
        let updates = vec![
            OptimisticUpdate::CreateComment {
                comment: comment("th_missing", "cm_9", 3),
            },
            OptimisticUpdate::EditComment {
                thread_id: ThreadId::new("th_a"),
                comment_id: CommentId::new("cm_missing"),
                body: CommentBody::plain("x"),
                edited_at: at(4),
            },
            OptimisticUpdate::AddReaction {
                thread_id: ThreadId::new("th_missing"),
                comment_id: CommentId::new("cm_1"),
                emoji: "👍".into(),
                user_id: UserId::new("bob"),
                created_at: at(5),
            },
        ];

        assert_eq!(apply_optimistic_updates(&committed, &updates), committed);
    }

    #[test]
    fn updates_after_comment_deletion_leave_it_deleted() {
        let mut th_a = thread("th_a");
        th_a.comments.push(comment("th_a", "cm_2", 2));
        let committed = HashMap::from([(ThreadId::new("th_a"), th_a)]);
        let updates = vec![
            OptimisticUpdate::DeleteComment {
                thread_id: ThreadId::new("th_a"),
                comment_id: CommentId::new("cm_1"),
                deleted_at: at(3),
            },
            OptimisticUpdate::EditComment {
                thread_id: ThreadId::new("th_a"),
                comment_id: CommentId::new("cm_1"),
                body: CommentBody::plain("back again"),
                edited_at: at(4),
            },
            OptimisticUpdate::AddReaction {
                thread_id: ThreadId::new("th_a"),
                comment_id: CommentId::new("cm_1"),
                emoji: "👍".into(),
                user_id: UserId::new("bob"),
                created_at: at(5),
            },
        ];

        let projected = apply_optimistic_updates(&committed, &updates);
        let cm_1 = &projected[&ThreadId::new("th_a")].comments[0];
        assert!(cm_1.is_deleted());
        assert_eq!(cm_1.body, None);
        assert_eq!(cm_1.edited_at, None);
        assert!(cm_1.reactions.is_empty());
    }

    #[test]
    fn reactions_replay_in_order() {
        let committed = HashMap::from([(ThreadId::new("th_a"), thread("th_a"))]);
        let add = |emoji: &str, secs| OptimisticUpdate::AddReaction {
            thread_id: ThreadId::new("th_a"),
            comment_id: CommentId::new("cm_1"),
            emoji: emoji.into(),
            user_id: UserId::new("bob"),
            created_at: at(secs),
        };
        let updates = vec![
            add("👍", 2),
            add("🎉", 3),
            OptimisticUpdate::RemoveReaction {
                thread_id: ThreadId::new("th_a"),
                comment_id: CommentId::new("cm_1"),
                emoji: "👍".into(),
                user_id: UserId::new("bob"),
                removed_at: at(4),
            },
        ];

        let projected = apply_optimistic_updates(&committed, &updates);
        let reactions = &projected[&ThreadId::new("th_a")].comments[0].reactions;
        assert_eq!(reactions.len(), 1);
        assert_eq!(reactions[0].emoji, "🎉");
    }

    #[test]
    fn notification_projection_marks_read_and_hides_deleted_threads() {
        let notification = |id: &str, thread: &str| InboxNotification {
            id: InboxNotificationId::new(id),
            thread_id: ThreadId::new(thread),
            room_id: RoomId::new("room"),
            notified_at: at(1),
            read_at: None,
        };
        let committed = HashMap::from([
            (InboxNotificationId::new("in_1"), notification("in_1", "th_a")),
            (InboxNotificationId::new("in_2"), notification("in_2", "th_b")),
        ]);
        let updates = vec![
            OptimisticUpdate::MarkInboxNotificationRead {
                notification_id: InboxNotificationId::new("in_1"),
                read_at: at(2),
            },
            OptimisticUpdate::DeleteThread {
                thread_id: ThreadId::new("th_b"),
                deleted_at: at(3),
            },
        ];

        let projected = apply_optimistic_notification_updates(&committed, &updates);
        assert_eq!(projected.len(), 1);
        assert!(projected[&InboxNotificationId::new("in_1")].is_read());
    }
}
