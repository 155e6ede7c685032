#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Property-based tests for the room registry.
//!
//! Runs random join/leave/relay sequences against a simple model and checks:
//! 1. No room ever holds more than two occupants.
//! 2. A room exists exactly when it has at least one occupant.
//! 3. Join and leave outcomes match the model.
//! 4. Every pairing delivers the peer's key followed by the notice.
//! 5. A relay is never delivered back to its sender.
//! 6. A leave sends the survivor exactly one "left" notice.

use std::collections::HashMap;

use keyswap_proto::message::ChatMessage;
use keyswap_relay::rooms::{
    ConnectionHandle, JoinOutcome, LeaveOutcome, ROOM_CAPACITY, RoomRegistry,
};
use proptest::prelude::*;
use tokio::sync::mpsc::UnboundedReceiver;

const CONNS: usize = 6;
const ROOMS: [&str; 3] = ["alpha", "beta", "gamma"];
const KEYS: [&str; 3] = ["k0", "k1", "k2"];

#[derive(Debug, Clone)]
enum Op {
    Join { conn: usize, room: usize, key: usize },
    Leave { conn: usize, room: usize },
    Relay { conn: usize, room: usize },
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..CONNS, 0..ROOMS.len(), 0..KEYS.len())
            .prop_map(|(conn, room, key)| Op::Join { conn, room, key }),
        (0..CONNS, 0..ROOMS.len()).prop_map(|(conn, room)| Op::Leave { conn, room }),
        (0..CONNS, 0..ROOMS.len()).prop_map(|(conn, room)| Op::Relay { conn, room }),
    ]
}

fn drain(rx: &mut UnboundedReceiver<ChatMessage>) -> Vec<ChatMessage> {
    let mut out = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        out.push(msg);
    }
    out
}

proptest! {
    #[test]
    fn registry_matches_model(ops in prop::collection::vec(arb_op(), 1..64)) {
        let registry = RoomRegistry::new();
        let (handles, mut receivers): (Vec<_>, Vec<_>) =
            (0..CONNS).map(|_| ConnectionHandle::channel()).unzip();

        // room -> [(conn, key)] in join order
        let mut model: HashMap<&str, Vec<(usize, &str)>> = HashMap::new();

        for op in ops {
            for rx in &mut receivers {
                drain(rx);
            }

            match op {
                Op::Join { conn, room, key } => {
                    // A connection joins at most one room, once.
                    if model.values().any(|m| m.iter().any(|(c, _)| *c == conn)) {
                        continue;
                    }
                    let (room, key) = (ROOMS[room], KEYS[key]);
                    let members = model.entry(room).or_default();
                    let expected = if members.len() >= ROOM_CAPACITY {
                        JoinOutcome::RoomFull
                    } else if members.iter().any(|(_, k)| *k == key) {
                        JoinOutcome::DuplicateKey
                    } else {
                        members.push((conn, key));
                        if members.len() == ROOM_CAPACITY {
                            JoinOutcome::Paired
                        } else {
                            JoinOutcome::Waiting
                        }
                    };
                    if members.is_empty() {
                        model.remove(room);
                    }

                    let outcome = registry.join(handles[conn].clone(), room, key);
                    prop_assert_eq!(outcome, expected);

                    if outcome == JoinOutcome::Paired {
                        let peers = &model[room];
                        for (i, (c, _)) in peers.iter().enumerate() {
                            let (_, peer_key) = peers[1 - i];
                            prop_assert_eq!(
                                drain(&mut receivers[*c]),
                                vec![
                                    ChatMessage::exchange_public_key(peer_key),
                                    ChatMessage::keys_exchanged(),
                                ]
                            );
                        }
                    }
                }
                Op::Leave { conn, room } => {
                    let room = ROOMS[room];
                    let expected = match model.get_mut(room) {
                        Some(members) if members.iter().any(|(c, _)| *c == conn) => {
                            members.retain(|(c, _)| *c != conn);
                            let remaining = members.len();
                            if remaining == 0 {
                                model.remove(room);
                            }
                            LeaveOutcome::Left { remaining }
                        }
                        _ => LeaveOutcome::NotMember,
                    };
                    prop_assert_eq!(registry.leave(room, handles[conn].id()), expected);

                    // Survivors hear about it exactly once, the leaver hears nothing.
                    prop_assert!(drain(&mut receivers[conn]).is_empty());
                    let survivors: Vec<usize> = model
                        .get(room)
                        .map(|m| m.iter().map(|(c, _)| *c).collect())
                        .unwrap_or_default();
                    for c in survivors {
                        let expected_inbox = if expected == LeaveOutcome::NotMember {
                            vec![]
                        } else {
                            vec![ChatMessage::peer_left()]
                        };
                        prop_assert_eq!(drain(&mut receivers[c]), expected_inbox);
                    }
                }
                Op::Relay { conn, room } => {
                    let room = ROOMS[room];
                    let recipients: Vec<usize> = model
                        .get(room)
                        .map(|m| m.iter().map(|(c, _)| *c).filter(|c| *c != conn).collect())
                        .unwrap_or_default();

                    let msg = ChatMessage::chatting(format!("from {conn}"));
                    prop_assert_eq!(
                        registry.relay(room, &msg, handles[conn].id()),
                        recipients.len()
                    );
                    prop_assert!(drain(&mut receivers[conn]).is_empty());
                    for c in recipients {
                        prop_assert_eq!(drain(&mut receivers[c]), vec![msg.clone()]);
                    }
                }
            }

            for room in ROOMS {
                let expected = model.get(room).map_or(0, Vec::len);
                let occupants = registry.occupants(room);
                prop_assert!(occupants <= ROOM_CAPACITY);
                prop_assert_eq!(occupants, expected);
                prop_assert_eq!(registry.contains_room(room), occupants > 0);
            }
            prop_assert_eq!(registry.room_count(), model.len());
        }
    }
}
