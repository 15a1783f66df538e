//! Committing authoritative data
//!
//! Pure helpers that fold server results into committed state. Both the
//! mutation orchestrator and the revalidation controller go through these,
//! always inside a single [`Store::set`](crate::store::Store::set) so a commit
//! and the removal of its optimistic update land in the same state snapshot.

use crate::client::ThreadsPage;
use crate::optimistic::OptimisticUpdateId;
use crate::store::CommentsState;
use chrono::{DateTime, Utc};
use murmur_core::{InboxNotification, Thread, ThreadId, ThreadUpdate};

/// Insert or replace `incoming` unless the committed copy is newer.
///
/// A thread with no live comments counts as deleted and is removed instead.
/// A thread that was deleted is only accepted again when `incoming` changed
/// after the deletion.
pub fn upsert_thread(state: &mut CommentsState, incoming: Thread) {
    let changed_at = incoming.updated_at_or_created();
    if !incoming.has_live_comments() {
        remove_thread(state, &incoming.id, changed_at);
        return;
    }
    if let Some(deleted_at) = state.deleted_threads.get(&incoming.id) {
        if *deleted_at >= changed_at {
            return;
        }
    }
    if let Some(existing) = state.threads.get(&incoming.id) {
        if existing.is_newer_than(&incoming) {
            return;
        }
    }
    state.deleted_threads.remove(&incoming.id);
    state.threads.insert(incoming.id.clone(), incoming);
}

/// Insert or replace a notification unless the committed copy was notified later.
///
/// Notifications of a deleted thread are dropped.
pub fn upsert_inbox_notification(state: &mut CommentsState, incoming: InboxNotification) {
    if state.deleted_threads.contains_key(&incoming.thread_id) {
        return;
    }
    if let Some(existing) = state.inbox_notifications.get(&incoming.id) {
        if existing.notified_at > incoming.notified_at {
            return;
        }
    }
    state
        .inbox_notifications
        .insert(incoming.id.clone(), incoming);
}

/// Remove a thread and every notification that references it, leaving a
/// tombstone stamped `deleted_at`.
pub fn remove_thread(
    state: &mut CommentsState,
    thread_id: &ThreadId,
    deleted_at: DateTime<Utc>,
) {
    state.threads.remove(thread_id);
    state
        .deleted_threads
        .entry(thread_id.clone())
        .and_modify(|at| *at = (*at).max(deleted_at))
        .or_insert(deleted_at);
    state
        .inbox_notifications
        .retain(|_, notification| &notification.thread_id != thread_id);
}

/// Merge a fetched page into committed state.
///
/// Fetches are additive: threads missing from the page are left alone.
pub fn merge_threads_page(state: &CommentsState, page: ThreadsPage) -> CommentsState {
    let mut next = state.clone();
    for thread in page.threads {
        upsert_thread(&mut next, thread);
    }
    for notification in page.inbox_notifications {
        upsert_inbox_notification(&mut next, notification);
    }
    next
}

/// Apply a thread transform to the committed copy of `thread_id`.
///
/// Missing threads are left alone; a transform that deletes the thread
/// removes it along with its notifications, tombstoned at `at`.
pub fn update_committed_thread(
    state: &mut CommentsState,
    thread_id: &ThreadId,
    at: DateTime<Utc>,
    f: impl FnOnce(&Thread) -> ThreadUpdate,
) {
    let Some(thread) = state.threads.get(thread_id) else {
        return;
    };
    match f(thread) {
        ThreadUpdate::Unchanged => {}
        ThreadUpdate::Updated(updated) => {
            state.threads.insert(thread_id.clone(), updated);
        }
        ThreadUpdate::Deleted => remove_thread(state, thread_id, at),
    }
}

/// Copy `state`, let `commit` fold the server result in, and drop the
/// optimistic update `update_id` from the copy.
pub fn commit_with(
    state: &CommentsState,
    update_id: OptimisticUpdateId,
    commit: impl FnOnce(&mut CommentsState),
) -> CommentsState {
    let mut next = state.clone();
    commit(&mut next);
    next.optimistic_updates.shift_remove(&update_id);
    next
}
