//! Comments, comment bodies and reactions

use crate::ids::{CommentId, RoomId, ThreadId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

// ============================================================================
// Comment Body
// ============================================================================

/// Rich-text body of a comment.
///
/// The body is a list of block elements; the only block kind is a paragraph
/// of inline elements (text runs, mentions, links).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentBody {
    /// Body format version
    pub version: u32,
    /// Block-level content
    pub content: Vec<BodyBlock>,
}

/// A block element of a comment body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum BodyBlock {
    /// A paragraph of inline elements
    Paragraph {
        /// Inline children
        children: Vec<BodyInline>,
    },
}

/// An inline element of a comment body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum BodyInline {
    /// A run of text
    Text {
        /// The text
        text: String,
        /// Bold formatting
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        bold: bool,
        /// Italic formatting
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        italic: bool,
        /// Inline code formatting
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        code: bool,
    },
    /// A mention of a user
    Mention {
        /// Mentioned user
        id: UserId,
    },
    /// A hyperlink
    Link {
        /// Link target
        url: String,
        /// Link text, defaults to the url when absent
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
}

impl CommentBody {
    /// Current body format version.
    pub const VERSION: u32 = 1;

    /// A body consisting of a single plain-text paragraph.
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            version: Self::VERSION,
            content: vec![BodyBlock::Paragraph {
                children: vec![BodyInline::Text {
                    text: text.into(),
                    bold: false,
                    italic: false,
                    code: false,
                }],
            }],
        }
    }

    /// Flatten the body to plain text, one line per paragraph.
    pub fn plain_text(&self) -> String {
        self.content
            .iter()
            .map(|block| match block {
                BodyBlock::Paragraph { children } => children
                    .iter()
                    .map(|inline| match inline {
                        BodyInline::Text { text, .. } => text.clone(),
                        BodyInline::Mention { id } => format!("@{id}"),
                        BodyInline::Link { url, text } => text.clone().unwrap_or_else(|| url.clone()),
                    })
                    .collect::<String>(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Whether the body has no visible text.
    pub fn is_empty(&self) -> bool {
        self.plain_text().trim().is_empty()
    }
}

// ============================================================================
// Reactions
// ============================================================================

/// An emoji reaction on a comment and the users who reacted with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    /// The emoji
    pub emoji: String,
    /// When the first user reacted with this emoji
    pub created_at: DateTime<Utc>,
    /// Users who reacted with this emoji
    pub users: BTreeSet<UserId>,
}

// ============================================================================
// Comment
// ============================================================================

/// A single comment inside a thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    /// Comment identifier
    pub id: CommentId,
    /// Thread this comment belongs to
    pub thread_id: ThreadId,
    /// Room this comment belongs to
    pub room_id: RoomId,
    /// Author
    pub user_id: UserId,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last edit time
    #[serde(default)]
    pub edited_at: Option<DateTime<Utc>>,
    /// Deletion time
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
    /// Body, absent once the comment is deleted
    #[serde(default)]
    pub body: Option<CommentBody>,
    /// Reactions in the order their emoji was first used
    #[serde(default)]
    pub reactions: Vec<Reaction>,
}

impl Comment {
    /// Whether the comment has been deleted.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Most recent time this comment changed.
    pub fn last_modified(&self) -> DateTime<Utc> {
        [Some(self.created_at), self.edited_at, self.deleted_at]
            .into_iter()
            .flatten()
            .max()
            .unwrap_or(self.created_at)
    }

    /// Copy of this comment with a new body.
    pub fn edited(&self, body: CommentBody, edited_at: DateTime<Utc>) -> Self {
        Self {
            body: Some(body),
            edited_at: Some(edited_at),
            ..self.clone()
        }
    }

    /// Copy of this comment marked deleted, with its body cleared.
    pub fn deleted(&self, deleted_at: DateTime<Utc>) -> Self {
        Self {
            body: None,
            deleted_at: Some(deleted_at),
            ..self.clone()
        }
    }

    /// Copy of this comment with `user_id` added to the `emoji` reaction.
    ///
    /// Creates the reaction when nobody has used that emoji yet. Adding a
    /// user that already reacted leaves the comment unchanged.
    pub fn with_reaction_added(&self, emoji: &str, user_id: &UserId, at: DateTime<Utc>) -> Self {
        let mut reactions = self.reactions.clone();
        match reactions.iter_mut().find(|reaction| reaction.emoji == emoji) {
            Some(reaction) => {
                reaction.users.insert(user_id.clone());
            }
            None => reactions.push(Reaction {
                emoji: emoji.to_string(),
                created_at: at,
                users: BTreeSet::from([user_id.clone()]),
            }),
        }
        Self {
            reactions,
            ..self.clone()
        }
    }

    /// Copy of this comment with `user_id` removed from the `emoji` reaction.
    ///
    /// The reaction entry disappears once its last user is removed.
    pub fn with_reaction_removed(&self, emoji: &str, user_id: &UserId) -> Self {
        let mut reactions = self.reactions.clone();
        if let Some(index) = reactions.iter().position(|reaction| reaction.emoji == emoji) {
            reactions[index].users.remove(user_id);
            if reactions[index].users.is_empty() {
                reactions.remove(index);
            }
        }
        Self {
            reactions,
            ..self.clone()
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

    fn comment() -> Comment {
        Comment {
            id: CommentId::new("cm_1"),
            thread_id: ThreadId::new("th_1"),
            room_id: RoomId::new("room"),
            user_id: UserId::new("alice"),
            created_at: at(10),
            edited_at: None,
            deleted_at: None,
            body: Some(CommentBody::plain("hello")),
            reactions: Vec::new(),
        }
    }

    #[test]
    fn plain_text_flattens_inlines() {
        let body = CommentBody {
            version: 1,
            content: vec![
                BodyBlock::Paragraph {
                    children: vec![
                        BodyInline::Text {
                            text: "hi ".into(),
                            bold: true,
                            italic: false,
                            code: false,
                        },
                        BodyInline::Mention { id: "bob".into() },
                    ],
                },
                BodyBlock::Paragraph {
                    children: vec![BodyInline::Link {
                        url: "https://example.com".into(),
                        text: None,
                    }],
                },
            ],
        };
        assert_eq!(body.plain_text(), "hi @bob\nhttps://example.com");
        assert!(CommentBody::plain("  ").is_empty());
    }

    #[test]
    fn delete_clears_body() {
        let deleted = comment().deleted(at(20));
        assert!(deleted.is_deleted());
        assert_eq!(deleted.body, None);
        assert_eq!(deleted.last_modified(), at(20));
    }

    #[test]
    fn reactions_accumulate_users_per_emoji() {
        let alice = UserId::new("alice");
        let bob = UserId::new("bob");
        let c = comment()
            .with_reaction_added("👍", &alice, at(11))
            .with_reaction_added("👍", &bob, at(12))
            .with_reaction_added("👍", &bob, at(13))
            .with_reaction_added("🎉", &alice, at(14));

        assert_eq!(c.reactions.len(), 2);
        assert_eq!(c.reactions[0].users.len(), 2);
        assert_eq!(c.reactions[0].created_at, at(11));
        assert_eq!(c.reactions[1].emoji, "🎉");
    }

    #[test]
    fn removing_first_reaction_works() {
        // Regression: the reaction at index 0 must be removable.
        let alice = UserId::new("alice");
        let c = comment()
            .with_reaction_added("👍", &alice, at(11))
            .with_reaction_added("🎉", &alice, at(12));

        let removed = c.with_reaction_removed("👍", &alice);
        assert_eq!(removed.reactions.len(), 1);
        assert_eq!(removed.reactions[0].emoji, "🎉");
    }

    #[test]
    fn removing_one_of_many_users_keeps_reaction() {
        let alice = UserId::new("alice");
        let bob = UserId::new("bob");
        let c = comment()
            .with_reaction_added("👍", &alice, at(11))
            .with_reaction_added("👍", &bob, at(12))
            .with_reaction_removed("👍", &alice);

        assert_eq!(c.reactions.len(), 1);
        assert!(c.reactions[0].users.contains(&bob));
        assert!(!c.reactions[0].users.contains(&alice));
    }

    #[test]
    fn removing_unknown_reaction_is_noop() {
        let c = comment();
        assert_eq!(c.with_reaction_removed("👍", &UserId::new("alice")), c);
    }
}
