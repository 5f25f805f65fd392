//! Property-based tests for timeline reconciliation.
//!
//! Uses proptest to verify:
//! 1. Every sent message ends up as exactly one confirmed entry, whatever
//!    order the confirmations arrive in and whether they echo the token.
//! 2. Applying the same confirmed message twice changes nothing.
//! 3. Reader sets never shrink under any mix of pushes and read updates.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::{BTreeMap, BTreeSet};

use chrono::{TimeZone, Utc};
use pairchat::chat::model::Message;
use pairchat::chat::timeline::MessageTimeline;
use pairchat_proto::conversation::ChatId;
use pairchat_proto::message::{ClientToken, MessageId};
use pairchat_proto::user::UserId;
use proptest::prelude::*;

const ME: &str = "u-me";
const THEM: &str = "u-them";

fn chat() -> ChatId {
    ChatId::new("chat-1")
}

fn confirmed(id: usize, sender: &str, content: &str, token: Option<ClientToken>) -> Message {
    Message {
        id: MessageId::new(format!("m-{id}")),
        conversation_id: chat(),
        sender_id: UserId::new(sender),
        sender_name: None,
        content: content.to_string(),
        timestamp: Utc.timestamp_opt(1_700_000_000 + i64::try_from(id).unwrap(), 0)
            .unwrap(),
        read_by: BTreeSet::new(),
        is_optimistic: false,
        client_token: token,
    }
}

fn readers_by_id(timeline: &MessageTimeline) -> BTreeMap<MessageId, BTreeSet<UserId>> {
    timeline
        .messages()
        .iter()
        .map(|m| (m.id.clone(), m.read_by.clone()))
        .collect()
}

/// Short contents from a tiny alphabet so equal texts are common.
fn arb_content() -> impl Strategy<Value = String> {
    "[ab]{1,2}"
}

fn arb_reader() -> impl Strategy<Value = UserId> + Clone {
    prop_oneof![Just(UserId::new(ME)), Just(UserId::new(THEM))]
}

#[derive(Debug, Clone)]
enum Op {
    /// Push of message `m-{0}` carrying the given readers.
    Push(usize, BTreeSet<UserId>),
    /// Read update for message `m-{0}`.
    Read(usize, BTreeSet<UserId>),
    /// Local acknowledgement of message `m-{0}`.
    Ack(usize, UserId),
}

fn arb_op() -> impl Strategy<Value = Op> {
    let readers = prop::collection::btree_set(arb_reader(), 0..=2);
    prop_oneof![
        (0..6_usize, readers.clone()).prop_map(|(i, r)| Op::Push(i, r)),
        (0..6_usize, readers).prop_map(|(i, r)| Op::Read(i, r)),
        (0..6_usize, arb_reader()).prop_map(|(i, r)| Op::Ack(i, r)),
    ]
}

proptest! {
    #[test]
    fn every_send_confirms_into_one_entry(
        contents in prop::collection::vec(arb_content(), 1..8),
        order in any::<u64>(),
        echo_tokens in any::<bool>(),
    ) {
        let mut timeline = MessageTimeline::new(chat());
        let tokens: Vec<ClientToken> = (0..contents.len())
            .map(|i| ClientToken::new(format!("tok-{i}")))
            .collect();
        for (content, token) in contents.iter().zip(&tokens) {
            timeline.push_optimistic(Message::optimistic(
                chat(),
                UserId::new(ME),
                content.clone(),
                token.clone(),
            ));
        }

        // Deterministic shuffle of confirmation order from the seed.
        let mut indices: Vec<usize> = (0..contents.len()).collect();
        let mut seed = order;
        for i in (1..indices.len()).rev() {
            seed = seed.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
            let j = usize::try_from(seed >> 33).unwrap() % (i + 1);
            indices.swap(i, j);
        }

        for i in indices {
            let token = echo_tokens.then(|| tokens[i].clone());
            timeline.reconcile(confirmed(i, ME, &contents[i], token));
        }

        prop_assert_eq!(timeline.len(), contents.len());
        prop_assert_eq!(timeline.optimistic_count(), 0);
        let ids: BTreeSet<&MessageId> = timeline.messages().iter().map(|m| &m.id).collect();
        prop_assert_eq!(ids.len(), contents.len());
        if echo_tokens {
            // With tokens every entry keeps its send position and text.
            for (i, message) in timeline.messages().iter().enumerate() {
                prop_assert_eq!(&message.content, &contents[i]);
                prop_assert_eq!(message.id.clone(), MessageId::new(format!("m-{i}")));
            }
        }
    }

    #[test]
    fn reconciling_twice_is_a_no_op(
        backlog in prop::collection::vec((arb_content(), any::<bool>()), 0..6),
        index in 0..6_usize,
        content in arb_content(),
        readers in prop::collection::btree_set(arb_reader(), 0..=2),
    ) {
        let mut timeline = MessageTimeline::new(chat());
        for (i, (text, mine)) in backlog.iter().enumerate() {
            let sender = if *mine { ME } else { THEM };
            timeline.reconcile(confirmed(i, sender, text, None));
        }

        let mut incoming = confirmed(index, THEM, &content, None);
        incoming.read_by = readers;

        timeline.reconcile(incoming.clone());
        let once = timeline.clone();
        timeline.reconcile(incoming);
        prop_assert_eq!(timeline, once);
    }

    #[test]
    fn reader_sets_only_grow(ops in prop::collection::vec(arb_op(), 1..40)) {
        let mut timeline = MessageTimeline::new(chat());
        for op in ops {
            let before = readers_by_id(&timeline);
            match op {
                Op::Push(i, readers) => {
                    let mut message = confirmed(i, THEM, "x", None);
                    message.read_by = readers;
                    timeline.reconcile(message);
                }
                Op::Read(i, readers) => {
                    timeline.apply_read_update(&MessageId::new(format!("m-{i}")), readers);
                }
                Op::Ack(i, reader) => {
                    timeline.mark_read_locally(&MessageId::new(format!("m-{i}")), &reader);
                }
            }
            let after = readers_by_id(&timeline);
            for (id, readers) in &before {
                let now = after.get(id);
                prop_assert!(now.is_some(), "message {} disappeared", id);
                prop_assert!(now.unwrap().is_superset(readers), "readers of {} shrank", id);
            }
        }
    }

    #[test]
    fn resync_keeps_readers_and_drops_nothing_confirmed(
        known in prop::collection::vec(
            prop::collection::btree_set(arb_reader(), 0..=2),
            1..6,
        ),
        extra in 0..3_usize,
    ) {
        let mut timeline = MessageTimeline::new(chat());
        for (i, readers) in known.iter().enumerate() {
            let mut message = confirmed(i, THEM, "x", None);
            message.read_by = readers.clone();
            timeline.reconcile(message);
        }
        let before = readers_by_id(&timeline);

        // The server history knows every message but none of the readers,
        // plus a few that arrived while away.
        let history = (0..known.len() + extra)
            .map(|i| confirmed(i, THEM, "x", None))
            .collect();
        timeline.resync(history);

        prop_assert_eq!(timeline.len(), known.len() + extra);
        let after = readers_by_id(&timeline);
        for (id, readers) in &before {
            prop_assert!(after[id].is_superset(readers));
        }
    }
}
