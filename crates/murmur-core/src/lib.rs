//! # Murmur Core
//!
//! Data model for threaded comments in a collaborative room: threads,
//! comments, reactions, metadata and inbox notifications, plus the
//! transport error type and the effect traits used for time and randomness.
//!
//! All model types are immutable snapshots. Transforms such as
//! [`Thread::delete_comment`] return a new value rather than mutating in place.

#![forbid(unsafe_code)]

pub mod comment;
pub mod effects;
pub mod errors;
pub mod ids;
pub mod metadata;
pub mod notification;
pub mod thread;

pub use comment::{BodyBlock, BodyInline, Comment, CommentBody, Reaction};
pub use effects::{PhysicalTimeEffects, RandomEffects, SystemEffects};
pub use errors::{ApiError, ApiErrorKind};
pub use ids::{CommentId, InboxNotificationId, RoomId, ThreadId, UserId, DEFAULT_ID_LENGTH};
pub use metadata::{apply_metadata_patch, metadata_matches, Metadata, MetadataPatch, MetadataValue};
pub use notification::InboxNotification;
pub use thread::{Thread, ThreadUpdate};
