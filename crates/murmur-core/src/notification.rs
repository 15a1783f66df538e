//! Inbox notifications

use crate::ids::{InboxNotificationId, RoomId, ThreadId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A per-user notification pointing at a thread with unseen activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboxNotification {
    /// Notification identifier
    pub id: InboxNotificationId,
    /// Thread the notification refers to
    pub thread_id: ThreadId,
    /// Room of that thread
    pub room_id: RoomId,
    /// When the notification was last triggered
    pub notified_at: DateTime<Utc>,
    /// When the user read it
    #[serde(default)]
    pub read_at: Option<DateTime<Utc>>,
}

impl InboxNotification {
    /// Whether the notification has been read since it was last triggered.
    pub fn is_read(&self) -> bool {
        self.read_at
            .is_some_and(|read_at| read_at >= self.notified_at)
    }

    /// Copy of this notification marked read at `at`.
    pub fn marked_read(&self, at: DateTime<Utc>) -> Self {
        Self {
            read_at: Some(at),
            ..self.clone()
        }
    }
}
