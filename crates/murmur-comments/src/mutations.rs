//! # Mutations
//!
//! One method per mutation kind. Every mutation follows the same sequence:
//!
//! 1. Build the local entity or delta, with client ids and the current time.
//! 2. Push an optimistic update so the projected view changes immediately.
//! 3. Spawn the network request.
//! 4. On success, fold the server result into committed state and drop the
//!    optimistic update in the same [`Store::set`](crate::store::Store::set).
//! 5. On failure, drop the optimistic update only and publish a
//!    [`CommentsError`] on the room's error channel.
//!
//! Mutations are never retried. They only fail synchronously on
//! [`UsageError`], before any state is touched.

use crate::client::{
    CreateCommentRequest, CreateThreadRequest, EditCommentRequest, EditThreadMetadataRequest,
    ReactionRequest, RoomClient,
};
use crate::commit::{commit_with, remove_thread, update_committed_thread, upsert_thread};
use crate::errors::{CommentsError, UsageError, PERMISSIONS_DOCS_URL};
use crate::optimistic::{OptimisticUpdate, OptimisticUpdateId};
use crate::room::CommentsRoom;
use crate::store::CommentsState;
use murmur_core::{
    ApiError, Comment, CommentBody, CommentId, InboxNotificationId, Metadata, MetadataPatch,
    PhysicalTimeEffects, RandomEffects, Thread, ThreadId, UserId,
};
use std::future::Future;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

const CANCELLED_MESSAGE: &str = "mutation cancelled before the server answered";

/// Result of starting a mutation.
///
/// The optimistic value is available right away. The request keeps running
/// whether or not the handle is kept.
#[derive(Debug)]
pub struct MutationHandle<T> {
    update_id: OptimisticUpdateId,
    optimistic: T,
    task: JoinHandle<Result<(), CommentsError>>,
    cancelled: CommentsError,
}

impl<T> MutationHandle<T> {
    /// Id of the optimistic update backing this mutation.
    pub fn update_id(&self) -> OptimisticUpdateId {
        self.update_id
    }

    /// The locally constructed value.
    pub fn optimistic(&self) -> &T {
        &self.optimistic
    }

    /// Take the locally constructed value and let the request finish in the background.
    pub fn into_optimistic(self) -> T {
        self.optimistic
    }

    /// Wait for the request to be committed or rolled back.
    ///
    /// The error is also published on the room's error channel.
    ///
    /// If the request task was cancelled (its runtime shut down) before the
    /// server answered, the outcome is unknown: the server may or may not have
    /// applied the mutation, and the optimistic update stays pending. This is
    /// reported as the mutation's error with a network cause carrying no
    /// status, and is not published on the error channel.
    pub async fn settled(self) -> Result<(), CommentsError> {
        match self.task.await {
            Ok(result) => result,
            Err(join_error) if join_error.is_panic() => {
                std::panic::resume_unwind(join_error.into_panic())
            }
            Err(_) => Err(self.cancelled),
        }
    }
}

impl<C, E> CommentsRoom<C, E>
where
    C: RoomClient + ?Sized + 'static,
    E: PhysicalTimeEffects + RandomEffects + ?Sized + 'static,
{
    // =========================================================================
    // Threads
    // =========================================================================

    /// Create a thread whose first comment has `body`.
    ///
    /// Does not require the room to be loaded.
    pub fn create_thread(
        &self,
        body: CommentBody,
        metadata: Metadata,
    ) -> Result<MutationHandle<Thread>, UsageError> {
        let user_id = self.require_user()?;
        let now = self.effects.now();
        let thread_id = ThreadId::generate(&*self.effects, self.config.id_length);
        let comment_id = CommentId::generate(&*self.effects, self.config.id_length);

        let thread = Thread {
            id: thread_id.clone(),
            room_id: self.room_id.clone(),
            created_at: now,
            updated_at: None,
            resolved: false,
            metadata: metadata.clone(),
            comments: vec![Comment {
                id: comment_id.clone(),
                thread_id: thread_id.clone(),
                room_id: self.room_id.clone(),
                user_id,
                created_at: now,
                edited_at: None,
                deleted_at: None,
                body: Some(body.clone()),
                reactions: Vec::new(),
            }],
        };

        let client = self.client.clone();
        let request = CreateThreadRequest {
            thread_id: thread_id.clone(),
            comment_id: comment_id.clone(),
            body,
            metadata,
        };
        let room_id = self.room_id.clone();

        Ok(self.run(
            OptimisticUpdate::CreateThread {
                thread: thread.clone(),
            },
            thread,
            async move { client.create_thread(request).await },
            |state, created| upsert_thread(state, created),
            move |cause| CommentsError::CreateThread {
                room_id,
                thread_id,
                comment_id,
                cause,
            },
        ))
    }

    /// Delete a thread and every comment in it.
    pub fn delete_thread(&self, thread_id: &ThreadId) -> Result<MutationHandle<()>, UsageError> {
        self.require_thread(thread_id)?;
        let now = self.effects.now();

        let client = self.client.clone();
        let target = thread_id.clone();
        let committed = thread_id.clone();
        let room_id = self.room_id.clone();
        let failed = thread_id.clone();

        Ok(self.run(
            OptimisticUpdate::DeleteThread {
                thread_id: thread_id.clone(),
                deleted_at: now,
            },
            (),
            async move { client.delete_thread(&target).await },
            move |state, ()| remove_thread(state, &committed, now),
            move |cause| CommentsError::DeleteThread {
                room_id,
                thread_id: failed,
                cause,
            },
        ))
    }

    /// Shallow-merge `metadata` into a thread's metadata. `None` values delete keys.
    pub fn edit_thread_metadata(
        &self,
        thread_id: &ThreadId,
        metadata: MetadataPatch,
    ) -> Result<MutationHandle<()>, UsageError> {
        self.require_thread(thread_id)?;
        let now = self.effects.now();

        let client = self.client.clone();
        let request = EditThreadMetadataRequest {
            thread_id: thread_id.clone(),
            metadata: metadata.clone(),
        };
        let committed = thread_id.clone();
        let room_id = self.room_id.clone();
        let failed = thread_id.clone();
        let rejected = metadata.clone();

        Ok(self.run(
            OptimisticUpdate::EditThreadMetadata {
                thread_id: thread_id.clone(),
                metadata,
                updated_at: now,
            },
            (),
            async move { client.edit_thread_metadata(request).await },
            move |state, server_metadata| {
                update_committed_thread(state, &committed, now, |thread| {
                    thread.with_metadata(server_metadata, now)
                })
            },
            move |cause| CommentsError::EditThreadMetadata {
                room_id,
                thread_id: failed,
                metadata: rejected,
                cause,
            },
        ))
    }

    /// Mark a thread resolved.
    pub fn mark_thread_as_resolved(
        &self,
        thread_id: &ThreadId,
    ) -> Result<MutationHandle<()>, UsageError> {
        self.set_resolved(thread_id, true)
    }

    /// Mark a thread unresolved.
    pub fn mark_thread_as_unresolved(
        &self,
        thread_id: &ThreadId,
    ) -> Result<MutationHandle<()>, UsageError> {
        self.set_resolved(thread_id, false)
    }

    fn set_resolved(
        &self,
        thread_id: &ThreadId,
        resolved: bool,
    ) -> Result<MutationHandle<()>, UsageError> {
        self.require_thread(thread_id)?;
        let now = self.effects.now();

        let client = self.client.clone();
        let target = thread_id.clone();
        let committed = thread_id.clone();
        let room_id = self.room_id.clone();
        let failed = thread_id.clone();

        Ok(self.run(
            OptimisticUpdate::MarkThreadResolved {
                thread_id: thread_id.clone(),
                resolved,
                updated_at: now,
            },
            (),
            async move {
                if resolved {
                    client.mark_thread_as_resolved(&target).await
                } else {
                    client.mark_thread_as_unresolved(&target).await
                }
            },
            move |state, ()| {
                update_committed_thread(state, &committed, now, |thread| {
                    thread.set_resolved(resolved, now)
                })
            },
            move |cause| {
                if resolved {
                    CommentsError::MarkThreadResolved {
                        room_id,
                        thread_id: failed,
                        cause,
                    }
                } else {
                    CommentsError::MarkThreadUnresolved {
                        room_id,
                        thread_id: failed,
                        cause,
                    }
                }
            },
        ))
    }

    // =========================================================================
    // Comments
    // =========================================================================

    /// Add a comment to an existing thread.
    pub fn create_comment(
        &self,
        thread_id: &ThreadId,
        body: CommentBody,
    ) -> Result<MutationHandle<Comment>, UsageError> {
        self.require_thread(thread_id)?;
        let user_id = self.require_user()?;
        let now = self.effects.now();
        let comment_id = CommentId::generate(&*self.effects, self.config.id_length);

        let comment = Comment {
            id: comment_id.clone(),
            thread_id: thread_id.clone(),
            room_id: self.room_id.clone(),
            user_id,
            created_at: now,
            edited_at: None,
            deleted_at: None,
            body: Some(body.clone()),
            reactions: Vec::new(),
        };

        let client = self.client.clone();
        let request = CreateCommentRequest {
            thread_id: thread_id.clone(),
            comment_id: comment_id.clone(),
            body,
        };
        let room_id = self.room_id.clone();
        let failed = thread_id.clone();

        Ok(self.run(
            OptimisticUpdate::CreateComment {
                comment: comment.clone(),
            },
            comment,
            async move { client.create_comment(request).await },
            |state, created: Comment| {
                let thread_id = created.thread_id.clone();
                let at = created.last_modified();
                update_committed_thread(state, &thread_id, at, |thread| {
                    thread.upsert_comment(created)
                })
            },
            move |cause| CommentsError::CreateComment {
                room_id,
                thread_id: failed,
                comment_id,
                cause,
            },
        ))
    }

    /// Replace a comment's body.
    pub fn edit_comment(
        &self,
        thread_id: &ThreadId,
        comment_id: &CommentId,
        body: CommentBody,
    ) -> Result<MutationHandle<()>, UsageError> {
        self.require_thread(thread_id)?;
        let now = self.effects.now();

        let client = self.client.clone();
        let request = EditCommentRequest {
            thread_id: thread_id.clone(),
            comment_id: comment_id.clone(),
            body: body.clone(),
        };
        let room_id = self.room_id.clone();
        let failed_thread = thread_id.clone();
        let failed_comment = comment_id.clone();

        Ok(self.run(
            OptimisticUpdate::EditComment {
                thread_id: thread_id.clone(),
                comment_id: comment_id.clone(),
                body,
                edited_at: now,
            },
            (),
            async move { client.edit_comment(request).await },
            |state, edited: Comment| {
                let thread_id = edited.thread_id.clone();
                let at = edited.last_modified();
                update_committed_thread(state, &thread_id, at, |thread| {
                    thread.upsert_comment(edited)
                })
            },
            move |cause| CommentsError::EditComment {
                room_id,
                thread_id: failed_thread,
                comment_id: failed_comment,
                cause,
            },
        ))
    }

    /// Delete a comment. Deleting the last live comment deletes the thread.
    pub fn delete_comment(
        &self,
        thread_id: &ThreadId,
        comment_id: &CommentId,
    ) -> Result<MutationHandle<()>, UsageError> {
        self.require_thread(thread_id)?;
        let now = self.effects.now();

        let client = self.client.clone();
        let target_thread = thread_id.clone();
        let target_comment = comment_id.clone();
        let committed_thread = thread_id.clone();
        let committed_comment = comment_id.clone();
        let room_id = self.room_id.clone();
        let failed_thread = thread_id.clone();
        let failed_comment = comment_id.clone();

        Ok(self.run(
            OptimisticUpdate::DeleteComment {
                thread_id: thread_id.clone(),
                comment_id: comment_id.clone(),
                deleted_at: now,
            },
            (),
            async move { client.delete_comment(&target_thread, &target_comment).await },
            move |state, ()| {
                update_committed_thread(state, &committed_thread, now, |thread| {
                    thread.delete_comment(&committed_comment, now)
                })
            },
            move |cause| CommentsError::DeleteComment {
                room_id,
                thread_id: failed_thread,
                comment_id: failed_comment,
                cause,
            },
        ))
    }

    // =========================================================================
    // Reactions
    // =========================================================================

    /// Add the current user's `emoji` reaction to a comment.
    pub fn add_reaction(
        &self,
        thread_id: &ThreadId,
        comment_id: &CommentId,
        emoji: &str,
    ) -> Result<MutationHandle<()>, UsageError> {
        self.require_thread(thread_id)?;
        let user_id = self.require_user()?;
        let now = self.effects.now();

        let client = self.client.clone();
        let request = ReactionRequest {
            thread_id: thread_id.clone(),
            comment_id: comment_id.clone(),
            emoji: emoji.to_string(),
        };
        let committed = request.clone();
        let failed = request.clone();
        let room_id = self.room_id.clone();
        let reactor = user_id.clone();

        Ok(self.run(
            OptimisticUpdate::AddReaction {
                thread_id: thread_id.clone(),
                comment_id: comment_id.clone(),
                emoji: emoji.to_string(),
                user_id,
                created_at: now,
            },
            (),
            async move { client.add_reaction(request).await },
            move |state, reaction| {
                let at = reaction.created_at;
                update_committed_thread(state, &committed.thread_id, at, |thread| {
                    thread.add_reaction(
                        &committed.comment_id,
                        &committed.emoji,
                        &reactor,
                        at,
                    )
                })
            },
            move |cause| CommentsError::AddReaction {
                room_id,
                thread_id: failed.thread_id,
                comment_id: failed.comment_id,
                emoji: failed.emoji,
                cause,
            },
        ))
    }

    /// Remove the current user's `emoji` reaction from a comment.
    pub fn remove_reaction(
        &self,
        thread_id: &ThreadId,
        comment_id: &CommentId,
        emoji: &str,
    ) -> Result<MutationHandle<()>, UsageError> {
        self.require_thread(thread_id)?;
        let user_id = self.require_user()?;
        let now = self.effects.now();

        let client = self.client.clone();
        let request = ReactionRequest {
            thread_id: thread_id.clone(),
            comment_id: comment_id.clone(),
            emoji: emoji.to_string(),
        };
        let committed = request.clone();
        let failed = request.clone();
        let room_id = self.room_id.clone();
        let reactor = user_id.clone();

        Ok(self.run(
            OptimisticUpdate::RemoveReaction {
                thread_id: thread_id.clone(),
                comment_id: comment_id.clone(),
                emoji: emoji.to_string(),
                user_id,
                removed_at: now,
            },
            (),
            async move { client.remove_reaction(request).await },
            move |state, ()| {
                update_committed_thread(state, &committed.thread_id, now, |thread| {
                    thread.remove_reaction(&committed.comment_id, &committed.emoji, &reactor, now)
                })
            },
            move |cause| CommentsError::RemoveReaction {
                room_id,
                thread_id: failed.thread_id,
                comment_id: failed.comment_id,
                emoji: failed.emoji,
                cause,
            },
        ))
    }

    // =========================================================================
    // Inbox notifications
    // =========================================================================

    /// Mark an inbox notification read.
    pub fn mark_inbox_notification_as_read(
        &self,
        notification_id: &InboxNotificationId,
    ) -> Result<MutationHandle<()>, UsageError> {
        let now = self.effects.now();

        let client = self.client.clone();
        let target = notification_id.clone();
        let committed = notification_id.clone();
        let room_id = self.room_id.clone();
        let failed = notification_id.clone();

        Ok(self.run(
            OptimisticUpdate::MarkInboxNotificationRead {
                notification_id: notification_id.clone(),
                read_at: now,
            },
            (),
            async move { client.mark_inbox_notification_as_read(&target).await },
            move |state, ()| {
                if let Some(notification) = state.inbox_notifications.get(&committed) {
                    let read = notification.marked_read(now);
                    state.inbox_notifications.insert(committed, read);
                }
            },
            move |cause| CommentsError::MarkInboxNotificationRead {
                room_id,
                notification_id: failed,
                cause,
            },
        ))
    }

    // =========================================================================
    // Shared machinery
    // =========================================================================

    fn require_user(&self) -> Result<UserId, UsageError> {
        self.client
            .current_user_id()
            .ok_or_else(|| UsageError::NoCurrentUser {
                room_id: self.room_id.clone(),
            })
    }

    fn require_thread(&self, thread_id: &ThreadId) -> Result<(), UsageError> {
        let state = self.store.get();
        if !state.is_room_loaded(&self.room_id) {
            return Err(UsageError::NotLoaded {
                room_id: self.room_id.clone(),
            });
        }
        let exists = state
            .projected_threads()
            .get(thread_id)
            .is_some_and(|thread| thread.room_id == self.room_id);
        if !exists {
            return Err(UsageError::UnknownThread {
                room_id: self.room_id.clone(),
                thread_id: thread_id.clone(),
            });
        }
        Ok(())
    }

    fn run<T, R, Fut, Commit, ToError>(
        &self,
        update: OptimisticUpdate,
        optimistic: T,
        request: Fut,
        commit: Commit,
        to_error: ToError,
    ) -> MutationHandle<T>
    where
        Fut: Future<Output = Result<R, ApiError>> + Send + 'static,
        R: Send + 'static,
        Commit: FnOnce(&mut CommentsState, R) + Send + 'static,
        ToError: FnOnce(ApiError) -> CommentsError + Clone + Send + 'static,
    {
        let kind = update.kind();
        let cancelled = to_error.clone()(ApiError::network(CANCELLED_MESSAGE));
        let update_id = self.store.push_optimistic_update(update);
        debug!(room_id = %self.room_id, update_id = %update_id, kind, "Applied optimistic update");

        let room = self.clone();
        let task = tokio::spawn(async move {
            match request.await {
                Ok(response) => {
                    room.store.set(|state| {
                        commit_with(state, update_id, |next| commit(next, response))
                    });
                    debug!(room_id = %room.room_id, update_id = %update_id, kind, "Committed mutation");
                    Ok(())
                }
                Err(cause) => {
                    room.store.remove_optimistic_update(update_id);
                    let failure = to_error(cause);
                    room.report_failure(update_id, &failure);
                    room.publish_error(failure.clone());
                    Err(failure)
                }
            }
        });

        MutationHandle {
            update_id,
            optimistic,
            task,
            cancelled,
        }
    }

    fn report_failure(&self, update_id: OptimisticUpdateId, failure: &CommentsError) {
        warn!(
            room_id = %self.room_id,
            update_id = %update_id,
            operation = failure.operation(),
            error = %failure.cause(),
            "Mutation failed, rolled back optimistic update"
        );
        if failure.cause().is_forbidden() {
            error!(
                room_id = %self.room_id,
                operation = failure.operation(),
                suggestion = %failure.forbidden_hint(),
                docs = PERMISSIONS_DOCS_URL,
                "{}",
                failure.cause().human_message()
            );
        }
    }
}
