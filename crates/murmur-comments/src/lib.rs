//! Murmur-Comments: Optimistic Comments Cache
//!
//! Client-side cache for comment threads that applies local mutations
//! immediately and reconciles them with the server in the background.
//!
//! # Architecture Overview
//!
//! ```text
//!  mutations ──push/commit/rollback──┐
//!                                    ▼
//!                                 Store ──subscribe──▶ consumers
//!                                    ▲                (projected view)
//!  revalidation ──merge page─────────┘
//! ```
//!
//! - [`store`]: versioned state with synchronous change notification
//! - [`optimistic`]: pending updates and the pure projection reducer
//! - [`mutations`]: one method per mutation kind on [`CommentsRoom`]
//! - [`revalidation`]: deduplicated fetches, staleness checks and polling
//!
//! # Design Principles
//!
//! - **Effect-Based**: time and randomness come from injected effect traits
//! - **Explicit Ownership**: no global state; [`CommentsClient`] owns the store
//! - **Atomic Commits**: a server result and the removal of its optimistic
//!   update land in one state snapshot
//!
//! # Usage
//!
//! ```rust,no_run
//! use murmur_comments::{CommentsClient, CommentsConfig, RoomClient, ThreadsQuery};
//! use murmur_core::{CommentBody, Metadata, SystemEffects};
//! use std::sync::Arc;
//!
//! async fn open<C: RoomClient + 'static>(room_client: Arc<C>) {
//!     let client = CommentsClient::new(Arc::new(SystemEffects), CommentsConfig::default())
//!         .expect("default config is valid");
//!     let room = client.room(room_client);
//!
//!     let _subscription = room.subscribe_threads(ThreadsQuery::all(), |result| {
//!         println!("{} threads", result.threads.map_or(0, |t| t.len()));
//!     });
//!
//!     let handle = room
//!         .create_thread(CommentBody::plain("hello"), Metadata::new())
//!         .expect("user is known");
//!     println!("created {}", handle.optimistic().id);
//! }
//! ```

#![forbid(unsafe_code)]

/// Room network client contract
pub mod client;
/// Committing authoritative data
pub mod commit;
/// Configuration
pub mod config;
/// Error types
pub mod errors;
/// Mutation orchestration
pub mod mutations;
/// Optimistic updates and the projection reducer
pub mod optimistic;
/// Thread queries and their loading state
pub mod query;
/// Background retry with backoff
pub mod retry;
/// Revalidation and polling
pub mod revalidation;
/// Per-room facade
pub mod room;
/// Read-side projections
pub mod selection;
/// Versioned state store
pub mod store;

pub use client::{
    CreateCommentRequest, CreateThreadRequest, EditCommentRequest, EditThreadMetadataRequest,
    ReactionRequest, RoomClient, RoomEvent, ThreadWithNotification, ThreadsPage,
};
pub use config::{CommentsConfig, ConfigError, ConnectionStatus, PollingConfig, RetryConfig};
pub use errors::{CommentsError, UsageError, PERMISSIONS_DOCS_URL};
pub use mutations::MutationHandle;
pub use optimistic::{apply_optimistic_updates, OptimisticUpdate, OptimisticUpdateId};
pub use query::{QueryKey, QueryState, ThreadsQuery};
pub use retry::{BackoffStrategy, RetryPolicy};
pub use revalidation::{RevalidationFuture, Revalidator};
pub use room::{CommentsClient, CommentsRoom, ThreadsSubscription};
pub use selection::{selected_threads, ThreadsResult};
pub use store::{CommentsState, Store, StoreSubscription};
