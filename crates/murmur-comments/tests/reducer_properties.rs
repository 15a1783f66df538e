//! Property tests for the optimistic projection reducer

use murmur_comments::{apply_optimistic_updates, OptimisticUpdate};
use murmur_core::{CommentBody, CommentId, MetadataPatch, MetadataValue, Thread, ThreadId, UserId};
use murmur_testkit::{comment, ts, ThreadBuilder};
use proptest::prelude::*;
use std::collections::HashMap;

const ROOM: &str = "room";

fn committed_threads() -> HashMap<ThreadId, Thread> {
    [
        ThreadBuilder::new(ROOM, "th_a").comment("cm_1", 1).build(),
        ThreadBuilder::new(ROOM, "th_b")
            .comment("cm_1", 1)
            .comment("cm_2", 2)
            .build(),
    ]
    .into_iter()
    .map(|thread| (thread.id.clone(), thread))
    .collect()
}

fn update_strategy() -> impl Strategy<Value = OptimisticUpdate> {
    let thread = prop::sample::select(vec!["th_a", "th_b", "th_c"]);
    let comment_id = prop::sample::select(vec!["cm_1", "cm_2", "cm_3"]);
    let emoji = prop::sample::select(vec!["👍", "🎉"]);
    let user = prop::sample::select(vec!["alice", "bob"]);
    let secs = 1i64..100;

    prop_oneof![
        (thread.clone(), secs.clone()).prop_map(|(t, s)| OptimisticUpdate::CreateThread {
            thread: ThreadBuilder::new(ROOM, t).created_at(s).build(),
        }),
        (thread.clone(), secs.clone()).prop_map(|(t, s)| OptimisticUpdate::DeleteThread {
            thread_id: ThreadId::new(t),
            deleted_at: ts(s),
        }),
        (thread.clone(), any::<bool>(), secs.clone()).prop_map(|(t, flag, s)| {
            OptimisticUpdate::EditThreadMetadata {
                thread_id: ThreadId::new(t),
                metadata: MetadataPatch::from([(
                    "flag".to_string(),
                    Some(MetadataValue::Bool(flag)),
                )]),
                updated_at: ts(s),
            }
        }),
        (thread.clone(), comment_id.clone(), secs.clone()).prop_map(|(t, c, s)| {
            OptimisticUpdate::CreateComment {
                comment: comment(ROOM, t, c, s),
            }
        }),
        (thread.clone(), comment_id.clone(), secs.clone()).prop_map(|(t, c, s)| {
            OptimisticUpdate::EditComment {
                thread_id: ThreadId::new(t),
                comment_id: CommentId::new(c),
                body: CommentBody::plain("edited"),
                edited_at: ts(s),
            }
        }),
        (thread.clone(), comment_id.clone(), secs.clone()).prop_map(|(t, c, s)| {
            OptimisticUpdate::DeleteComment {
                thread_id: ThreadId::new(t),
                comment_id: CommentId::new(c),
                deleted_at: ts(s),
            }
        }),
        (
            thread.clone(),
            comment_id.clone(),
            emoji.clone(),
            user.clone(),
            secs.clone()
        )
            .prop_map(|(t, c, e, u, s)| OptimisticUpdate::AddReaction {
                thread_id: ThreadId::new(t),
                comment_id: CommentId::new(c),
                emoji: e.to_string(),
                user_id: UserId::new(u),
                created_at: ts(s),
            }),
        (thread, comment_id, emoji, user, secs).prop_map(|(t, c, e, u, s)| {
            OptimisticUpdate::RemoveReaction {
                thread_id: ThreadId::new(t),
                comment_id: CommentId::new(c),
                emoji: e.to_string(),
                user_id: UserId::new(u),
                removed_at: ts(s),
            }
        }),
    ]
}

proptest! {
    #[test]
    fn replay_is_deterministic_and_leaves_input_alone(
        updates in prop::collection::vec(update_strategy(), 0..16)
    ) {
        let committed = committed_threads();
        let first = apply_optimistic_updates(&committed, &updates);
        let second = apply_optimistic_updates(&committed, &updates);

        prop_assert_eq!(&first, &second);
        prop_assert_eq!(&committed, &committed_threads());
    }

    #[test]
    fn projected_threads_always_have_live_comments(
        updates in prop::collection::vec(update_strategy(), 0..16)
    ) {
        let projected = apply_optimistic_updates(&committed_threads(), &updates);
        for thread in projected.values() {
            prop_assert!(thread.has_live_comments(), "thread {} has no live comments", thread.id);
        }
    }

    #[test]
    fn deleted_comments_stay_without_body(
        updates in prop::collection::vec(update_strategy(), 0..16)
    ) {
        let projected = apply_optimistic_updates(&committed_threads(), &updates);
        for comment in projected.values().flat_map(|thread| &thread.comments) {
            if comment.is_deleted() {
                prop_assert!(comment.body.is_none(), "comment {} kept a body", comment.id);
            }
        }
    }

    #[test]
    fn reactions_never_keep_empty_user_sets(
        updates in prop::collection::vec(update_strategy(), 0..16)
    ) {
        let projected = apply_optimistic_updates(&committed_threads(), &updates);
        for comment in projected.values().flat_map(|thread| &thread.comments) {
            for reaction in &comment.reactions {
                prop_assert!(!reaction.users.is_empty());
            }
        }
    }
}
