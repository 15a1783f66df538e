//! Fixture builders for threads, comments and notifications

use chrono::{DateTime, TimeZone, Utc};
use murmur_core::{
    Comment, CommentBody, CommentId, InboxNotification, InboxNotificationId, Metadata,
    MetadataValue, RoomId, Thread, ThreadId, UserId,
};

/// Timestamp `secs` seconds after the Unix epoch.
pub fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

/// A live comment by `alice` with a plain-text body.
pub fn comment(room: &str, thread: &str, id: &str, created_secs: i64) -> Comment {
    Comment {
        id: CommentId::new(id),
        thread_id: ThreadId::new(thread),
        room_id: RoomId::new(room),
        user_id: UserId::new("alice"),
        created_at: ts(created_secs),
        edited_at: None,
        deleted_at: None,
        body: Some(CommentBody::plain(format!("comment {id}"))),
        reactions: Vec::new(),
    }
}

/// An unread notification for `thread`.
pub fn notification(room: &str, thread: &str, id: &str, notified_secs: i64) -> InboxNotification {
    InboxNotification {
        id: InboxNotificationId::new(id),
        thread_id: ThreadId::new(thread),
        room_id: RoomId::new(room),
        notified_at: ts(notified_secs),
        read_at: None,
    }
}

/// Builder for [`Thread`] fixtures.
///
/// A built thread always has at least one comment (`cm_1`), since a thread
/// without live comments counts as deleted.
#[derive(Debug, Clone)]
pub struct ThreadBuilder {
    thread: Thread,
}

impl ThreadBuilder {
    /// Thread `id` in room `room`, created at second 1.
    pub fn new(room: &str, id: &str) -> Self {
        Self {
            thread: Thread {
                id: ThreadId::new(id),
                room_id: RoomId::new(room),
                created_at: ts(1),
                updated_at: None,
                resolved: false,
                metadata: Metadata::new(),
                comments: Vec::new(),
            },
        }
    }

    /// Set the creation time.
    pub fn created_at(mut self, secs: i64) -> Self {
        self.thread.created_at = ts(secs);
        self
    }

    /// Set the update time.
    pub fn updated_at(mut self, secs: i64) -> Self {
        self.thread.updated_at = Some(ts(secs));
        self
    }

    /// Mark resolved.
    pub fn resolved(mut self) -> Self {
        self.thread.resolved = true;
        self
    }

    /// Add a metadata pair.
    pub fn metadata(mut self, key: &str, value: impl Into<MetadataValue>) -> Self {
        self.thread.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Append a comment created at `created_secs`.
    pub fn comment(mut self, id: &str, created_secs: i64) -> Self {
        let comment = comment(
            self.thread.room_id.as_str(),
            self.thread.id.as_str(),
            id,
            created_secs,
        );
        self.thread.comments.push(comment);
        self
    }

    /// Finish the thread.
    pub fn build(mut self) -> Thread {
        if self.thread.comments.is_empty() {
            let created = self.thread.created_at.timestamp();
            self = self.comment("cm_1", created);
        }
        self.thread
    }
}
