//! Read-side projections

use crate::query::{QueryKey, ThreadsQuery};
use crate::store::CommentsState;
use murmur_core::{ApiError, RoomId, Thread};

/// Projected threads of `room_id` matching `query`, oldest first.
pub fn selected_threads(
    room_id: &RoomId,
    state: &CommentsState,
    query: &ThreadsQuery,
) -> Vec<Thread> {
    let mut threads: Vec<Thread> = state
        .projected_threads()
        .into_values()
        .filter(|thread| &thread.room_id == room_id && query.matches(thread))
        .collect();
    threads.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    threads
}

/// What a threads consumer renders.
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadsResult {
    /// No result yet and a fetch is in flight
    pub is_loading: bool,
    /// Projected threads, once the query has loaded at least once
    pub threads: Option<Vec<Thread>>,
    /// Error of the last fetch, if it failed
    pub error: Option<ApiError>,
}

impl ThreadsResult {
    /// Compute the result of `query` against `state`.
    pub fn from_state(room_id: &RoomId, state: &CommentsState, query: &ThreadsQuery) -> Self {
        let key = QueryKey::new(room_id, query);
        match state.threads_queries.get(&key) {
            None => Self {
                is_loading: true,
                threads: None,
                error: None,
            },
            Some(query_state) => Self {
                is_loading: query_state.is_loading,
                threads: query_state
                    .loaded
                    .then(|| selected_threads(room_id, state, query)),
                error: query_state.error.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimistic::{OptimisticUpdate, OptimisticUpdateId};
    use crate::query::QueryState;
    use chrono::{DateTime, TimeZone, Utc};
    use murmur_core::{Comment, CommentBody, CommentId, Metadata, ThreadId, UserId};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn thread(id: &str, room: &str, created: i64) -> Thread {
        Thread {
            id: ThreadId::new(id),
            room_id: RoomId::new(room),
            created_at: at(created),
            updated_at: None,
            resolved: false,
            metadata: Metadata::new(),
            comments: vec![Comment {
                id: CommentId::new(format!("cm_{id}")),
                thread_id: ThreadId::new(id),
                room_id: RoomId::new(room),
                user_id: UserId::new("alice"),
                created_at: at(created),
                edited_at: None,
                deleted_at: None,
                body: Some(CommentBody::plain("hi")),
                reactions: Vec::new(),
            }],
        }
    }

    #[test]
    fn selection_filters_by_room_and_query_and_sorts() {
        let mut resolved = thread("th_c", "room", 1);
        resolved.resolved = true;
        let mut state = CommentsState::default();
        for t in [
            thread("th_b", "room", 5),
            thread("th_a", "room", 2),
            thread("th_x", "elsewhere", 0),
            resolved,
        ] {
            state.threads.insert(t.id.clone(), t);
        }

        let ids: Vec<_> = selected_threads(
            &RoomId::new("room"),
            &state,
            &ThreadsQuery::all().with_resolved(false),
        )
        .into_iter()
        .map(|t| t.id)
        .collect();
        assert_eq!(ids, vec![ThreadId::new("th_a"), ThreadId::new("th_b")]);
    }

    #[test]
    fn selection_includes_pending_threads() {
        let mut state = CommentsState::default();
        state.optimistic_updates.insert(
            OptimisticUpdateId(1),
            OptimisticUpdate::CreateThread {
                thread: thread("th_new", "room", 3),
            },
        );
        let threads = selected_threads(&RoomId::new("room"), &state, &ThreadsQuery::all());
        assert_eq!(threads.len(), 1);
    }

    #[test]
    fn result_reflects_query_state() {
        let room = RoomId::new("room");
        let query = ThreadsQuery::all();
        let mut state = CommentsState::default();

        let pending = ThreadsResult::from_state(&room, &state, &query);
        assert!(pending.is_loading);
        assert_eq!(pending.threads, None);

        state
            .threads_queries
            .insert(QueryKey::new(&room, &query), QueryState::success());
        let loaded = ThreadsResult::from_state(&room, &state, &query);
        assert!(!loaded.is_loading);
        assert_eq!(loaded.threads, Some(Vec::new()));
    }
}
