//! Threads
//!
//! A [`Thread`] is an immutable snapshot. Every transform below takes `&self`
//! and reports the outcome as a [`ThreadUpdate`], so the same code path serves
//! both the optimistic projection and the commit of server results.

use crate::comment::{Comment, CommentBody};
use crate::ids::{CommentId, RoomId, ThreadId, UserId};
use crate::metadata::{apply_metadata_patch, Metadata, MetadataPatch};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A comment thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    /// Thread identifier
    pub id: ThreadId,
    /// Room the thread lives in
    pub room_id: RoomId,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Time of the most recent change
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    /// Whether the thread has been resolved
    #[serde(default)]
    pub resolved: bool,
    /// Application-defined metadata
    #[serde(default)]
    pub metadata: Metadata,
    /// Comments in creation order
    pub comments: Vec<Comment>,
}

/// Outcome of applying a transform to a thread.
#[derive(Debug, Clone, PartialEq)]
pub enum ThreadUpdate {
    /// The transform targeted something that does not exist; nothing changed
    Unchanged,
    /// The thread changed
    Updated(Thread),
    /// Every comment is now deleted, so the thread is gone
    Deleted,
}

impl ThreadUpdate {
    /// The updated thread, if the transform produced one.
    pub fn into_thread(self) -> Option<Thread> {
        match self {
            Self::Updated(thread) => Some(thread),
            Self::Unchanged | Self::Deleted => None,
        }
    }
}

impl Thread {
    /// `updated_at`, falling back to `created_at`.
    pub fn updated_at_or_created(&self) -> DateTime<Utc> {
        self.updated_at.unwrap_or(self.created_at)
    }

    /// Whether `self` is strictly newer than `other`.
    ///
    /// Server data never overwrites a thread that is locally newer.
    pub fn is_newer_than(&self, other: &Thread) -> bool {
        self.updated_at_or_created() > other.updated_at_or_created()
    }

    /// Whether at least one comment has not been deleted.
    pub fn has_live_comments(&self) -> bool {
        self.comments.iter().any(|comment| !comment.is_deleted())
    }

    /// Look up a comment by id.
    pub fn comment(&self, comment_id: &CommentId) -> Option<&Comment> {
        self.comments.iter().find(|comment| &comment.id == comment_id)
    }

    fn touched(&self, comments: Vec<Comment>, at: DateTime<Utc>) -> Thread {
        Thread {
            comments,
            updated_at: Some(self.updated_at.map_or(at, |current| current.max(at))),
            ..self.clone()
        }
    }

    /// Apply `f` to a live comment. Deleted comments are immutable.
    fn map_comment(
        &self,
        comment_id: &CommentId,
        at: DateTime<Utc>,
        f: impl FnOnce(&Comment) -> Comment,
    ) -> ThreadUpdate {
        let Some(index) = self
            .comments
            .iter()
            .position(|comment| &comment.id == comment_id && !comment.is_deleted())
        else {
            return ThreadUpdate::Unchanged;
        };
        let mut comments = self.comments.clone();
        comments[index] = f(&comments[index]);
        ThreadUpdate::Updated(self.touched(comments, at))
    }

    /// Insert a comment, or replace the comment with the same id.
    ///
    /// An existing comment that was modified more recently than `comment` is
    /// kept. New comments are appended, preserving creation order.
    pub fn upsert_comment(&self, comment: Comment) -> ThreadUpdate {
        let at = comment.last_modified();
        match self.comments.iter().position(|c| c.id == comment.id) {
            Some(index) => {
                if self.comments[index].last_modified() > at {
                    return ThreadUpdate::Unchanged;
                }
                let mut comments = self.comments.clone();
                comments[index] = comment;
                self.settle(self.touched(comments, at))
            }
            None => {
                let mut comments = self.comments.clone();
                comments.push(comment);
                self.settle(self.touched(comments, at))
            }
        }
    }

    /// Replace a comment's body and stamp its edit time.
    pub fn edit_comment(
        &self,
        comment_id: &CommentId,
        body: &CommentBody,
        edited_at: DateTime<Utc>,
    ) -> ThreadUpdate {
        self.map_comment(comment_id, edited_at, |comment| {
            comment.edited(body.clone(), edited_at)
        })
    }

    /// Mark a comment deleted. Deleting the last live comment deletes the thread.
    pub fn delete_comment(&self, comment_id: &CommentId, deleted_at: DateTime<Utc>) -> ThreadUpdate {
        match self.map_comment(comment_id, deleted_at, |comment| comment.deleted(deleted_at)) {
            ThreadUpdate::Updated(thread) => self.settle(thread),
            other => other,
        }
    }

    /// Add a user's reaction to a comment.
    pub fn add_reaction(
        &self,
        comment_id: &CommentId,
        emoji: &str,
        user_id: &UserId,
        at: DateTime<Utc>,
    ) -> ThreadUpdate {
        self.map_comment(comment_id, at, |comment| {
            comment.with_reaction_added(emoji, user_id, at)
        })
    }

    /// Remove a user's reaction from a comment.
    pub fn remove_reaction(
        &self,
        comment_id: &CommentId,
        emoji: &str,
        user_id: &UserId,
        at: DateTime<Utc>,
    ) -> ThreadUpdate {
        self.map_comment(comment_id, at, |comment| {
            comment.with_reaction_removed(emoji, user_id)
        })
    }

    /// Shallow-merge a metadata patch.
    pub fn patch_metadata(&self, patch: &MetadataPatch, at: DateTime<Utc>) -> ThreadUpdate {
        ThreadUpdate::Updated(Thread {
            metadata: apply_metadata_patch(&self.metadata, patch),
            ..self.touched(self.comments.clone(), at)
        })
    }

    /// Replace the metadata wholesale.
    pub fn with_metadata(&self, metadata: Metadata, at: DateTime<Utc>) -> ThreadUpdate {
        ThreadUpdate::Updated(Thread {
            metadata,
            ..self.touched(self.comments.clone(), at)
        })
    }

    /// Set the resolved flag.
    pub fn set_resolved(&self, resolved: bool, at: DateTime<Utc>) -> ThreadUpdate {
        ThreadUpdate::Updated(Thread {
            resolved,
            ..self.touched(self.comments.clone(), at)
        })
    }

    fn settle(&self, thread: Thread) -> ThreadUpdate {
        if thread.has_live_comments() {
            ThreadUpdate::Updated(thread)
        } else {
            ThreadUpdate::Deleted
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn comment(id: &str, created: i64) -> Comment {
        Comment {
            id: CommentId::new(id),
            thread_id: ThreadId::new("th_1"),
            room_id: RoomId::new("room"),
            user_id: UserId::new("alice"),
            created_at: at(created),
            edited_at: None,
            deleted_at: None,
            body: Some(CommentBody::plain(id)),
            reactions: Vec::new(),
        }
    }

    fn thread(comments: Vec<Comment>) -> Thread {
        Thread {
            id: ThreadId::new("th_1"),
            room_id: RoomId::new("room"),
            created_at: at(1),
            updated_at: None,
            resolved: false,
            metadata: Metadata::new(),
            comments,
        }
    }

    #[test]
    fn newer_comparison_falls_back_to_created_at() {
        let mut a = thread(vec![comment("cm_1", 1)]);
        let mut b = a.clone();
        b.created_at = at(2);
        assert!(b.is_newer_than(&a));

        a.updated_at = Some(at(5));
        assert!(a.is_newer_than(&b));
        assert!(!a.is_newer_than(&a));
    }

    #[test]
    fn upsert_appends_and_bumps_updated_at() {
        let t = thread(vec![comment("cm_1", 1)]);
        let updated = t.upsert_comment(comment("cm_2", 7)).into_thread().unwrap();

        assert_eq!(updated.comments.len(), 2);
        assert_eq!(updated.comments[1].id, CommentId::new("cm_2"));
        assert_eq!(updated.updated_at, Some(at(7)));
    }

    #[test]
    fn upsert_keeps_newer_existing_comment() {
        let edited = comment("cm_1", 1).edited(CommentBody::plain("new"), at(9));
        let t = thread(vec![edited]);
        assert_eq!(t.upsert_comment(comment("cm_1", 1)), ThreadUpdate::Unchanged);
    }

    #[test]
    fn edits_keep_comment_order() {
        let t = thread(vec![comment("cm_1", 1), comment("cm_2", 2), comment("cm_3", 3)]);
        let updated = t
            .edit_comment(&CommentId::new("cm_2"), &CommentBody::plain("x"), at(10))
            .into_thread()
            .unwrap();
        let ids: Vec<_> = updated.comments.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["cm_1", "cm_2", "cm_3"]);
        assert_eq!(updated.comments[1].edited_at, Some(at(10)));
    }

    #[test]
    fn deleting_last_live_comment_deletes_thread() {
        let t = thread(vec![comment("cm_1", 1)]);
        assert_eq!(
            t.delete_comment(&CommentId::new("cm_1"), at(3)),
            ThreadUpdate::Deleted
        );
    }

    #[test]
    fn deleting_one_of_two_comments_keeps_thread() {
        let t = thread(vec![comment("cm_1", 1), comment("cm_2", 2)]);
        let updated = t
            .delete_comment(&CommentId::new("cm_1"), at(3))
            .into_thread()
            .unwrap();
        assert_eq!(updated.comments.len(), 2);
        assert!(updated.comments[0].is_deleted());
        assert_eq!(updated.comments[0].body, None);
    }

    #[test]
    fn missing_comment_is_unchanged() {
        let t = thread(vec![comment("cm_1", 1)]);
        let missing = CommentId::new("cm_404");
        assert_eq!(t.delete_comment(&missing, at(2)), ThreadUpdate::Unchanged);
        assert_eq!(
            t.add_reaction(&missing, "👍", &UserId::new("bob"), at(2)),
            ThreadUpdate::Unchanged
        );
    }

    #[test]
    fn deleted_comments_cannot_be_edited_or_reacted_to() {
        let t = thread(vec![comment("cm_1", 1), comment("cm_2", 2)]);
        let cm_1 = CommentId::new("cm_1");
        let deleted = t.delete_comment(&cm_1, at(5)).into_thread().unwrap();

        assert_eq!(
            deleted.edit_comment(&cm_1, &CommentBody::plain("again"), at(6)),
            ThreadUpdate::Unchanged
        );
        assert_eq!(
            deleted.add_reaction(&cm_1, "👍", &UserId::new("bob"), at(6)),
            ThreadUpdate::Unchanged
        );
        assert_eq!(deleted.delete_comment(&cm_1, at(7)), ThreadUpdate::Unchanged);
        assert_eq!(deleted.comments[0].body, None);
        assert_eq!(deleted.comments[0].deleted_at, Some(at(5)));
    }

    #[test]
    fn metadata_patch_and_resolve() {
        let t = thread(vec![comment("cm_1", 1)]);
        let mut patch = MetadataPatch::new();
        patch.insert("a".into(), Some(1i64.into()));

        let patched = t.patch_metadata(&patch, at(4)).into_thread().unwrap();
        assert_eq!(patched.metadata.len(), 1);

        let resolved = patched.set_resolved(true, at(5)).into_thread().unwrap();
        assert!(resolved.resolved);
        assert_eq!(resolved.updated_at, Some(at(5)));
    }
}
