//! Thread queries and their per-key loading state

use murmur_core::{metadata_matches, ApiError, Metadata, MetadataValue, RoomId, Thread};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Filter selecting a subset of a room's threads.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ThreadsQuery {
    /// Every pair must match the thread's metadata
    #[serde(default)]
    pub metadata: Metadata,
    /// Only threads with this resolved flag, when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved: Option<bool>,
}

impl ThreadsQuery {
    /// Query matching every thread.
    pub fn all() -> Self {
        Self::default()
    }

    /// Restrict to threads with the given metadata pair.
    pub fn with_metadata(
        mut self,
        key: impl Into<String>,
        value: impl Into<MetadataValue>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Restrict to resolved or unresolved threads.
    pub fn with_resolved(mut self, resolved: bool) -> Self {
        self.resolved = Some(resolved);
        self
    }

    /// Whether `thread` satisfies this query.
    pub fn matches(&self, thread: &Thread) -> bool {
        self.resolved.map_or(true, |resolved| thread.resolved == resolved)
            && metadata_matches(&thread.metadata, &self.metadata)
    }

    /// Deterministic serialization used in query keys.
    pub fn serialized(&self) -> String {
        // Metadata is a BTreeMap, so key order is stable.
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Key identifying one distinct query: the room plus the serialized filter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey {
    /// Room the query runs against
    pub room_id: RoomId,
    /// Serialized [`ThreadsQuery`]
    pub filter: String,
}

impl QueryKey {
    /// Key for `query` in `room_id`.
    pub fn new(room_id: &RoomId, query: &ThreadsQuery) -> Self {
        Self {
            room_id: room_id.clone(),
            filter: query.serialized(),
        }
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.room_id, self.filter)
    }
}

/// Loading state of one query key.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueryState {
    /// A fetch with no previous result is in flight
    pub is_loading: bool,
    /// Error of the most recent fetch, if it failed
    pub error: Option<ApiError>,
    /// At least one fetch for this key has succeeded
    pub loaded: bool,
}

impl QueryState {
    /// Initial fetch in flight.
    pub fn loading() -> Self {
        Self {
            is_loading: true,
            error: None,
            loaded: false,
        }
    }

    /// Most recent fetch succeeded.
    pub fn success() -> Self {
        Self {
            is_loading: false,
            error: None,
            loaded: true,
        }
    }

    /// Most recent fetch failed; `loaded` is carried over from the previous state.
    pub fn failure(previous: Option<&QueryState>, error: ApiError) -> Self {
        Self {
            is_loading: false,
            error: Some(error),
            loaded: previous.is_some_and(|state| state.loaded),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_keys_are_stable_across_insertion_order() {
        let room = RoomId::new("room");
        let a = ThreadsQuery::all().with_metadata("x", 1i64).with_metadata("y", "z");
        let b = ThreadsQuery::all().with_metadata("y", "z").with_metadata("x", 1i64);
        assert_eq!(QueryKey::new(&room, &a), QueryKey::new(&room, &b));
        assert_eq!(
            QueryKey::new(&room, &ThreadsQuery::all()).to_string(),
            "room:{\"metadata\":{}}"
        );
    }

    #[test]
    fn resolved_filter_is_part_of_the_key() {
        let room = RoomId::new("room");
        assert_ne!(
            QueryKey::new(&room, &ThreadsQuery::all()),
            QueryKey::new(&room, &ThreadsQuery::all().with_resolved(false))
        );
    }

    #[test]
    fn failure_keeps_loaded_flag() {
        let previous = QueryState::success();
        let failed = QueryState::failure(Some(&previous), ApiError::network("down"));
        assert!(failed.loaded);
        assert!(!failed.is_loading);
        assert!(!QueryState::failure(None, ApiError::network("down")).loaded);
    }
}
