use serde::{Deserialize, Serialize};

use crate::proposal::ProposalNumber;

/// A tagged message exchanged between clients, proposers, and acceptors.
///
/// Serialized as a JSON object with a `message_type` discriminant; unknown
/// fields are ignored on decode because this derives serde's default
/// (non-`deny_unknown_fields`) behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "message_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    /// client -> any peer
    Read { key: String },
    /// client -> leader
    Write { key: String, value: String },
    /// proposer -> acceptor
    Prepare {
        sender_id: i64,
        prop_num: ProposalNumber,
        key: String,
    },
    /// acceptor -> proposer
    Promise {
        sender_id: i64,
        prop_num: ProposalNumber,
    },
    /// acceptor -> proposer
    PrepareNack {
        sender_id: i64,
        prop_num: ProposalNumber,
        leader_id: Option<i64>,
        last_heartbeat: i64,
    },
    /// proposer -> acceptor
    AcceptRequest {
        sender_id: i64,
        prop_num: ProposalNumber,
        key: String,
        value: String,
    },
    /// acceptor -> proposer; also the READ response
    Accepted {
        sender_id: i64,
        prop_num: ProposalNumber,
        leader_id: Option<i64>,
        key: String,
        value: String,
    },
    /// acceptor -> proposer
    AcceptNack {
        sender_id: i64,
        prop_num: ProposalNumber,
        leader_id: Option<i64>,
        leader_prop_num: ProposalNumber,
    },
    /// leader -> client
    WriteNack { key: String, value: String },
    /// leader -> all
    Heartbeat { sender_id: i64, heartbeat: i64 },
    /// synthesized locally on transport failure
    Error { reason: String },
}

impl Message {
    /// The `message_type` tag this message would serialize with, for
    /// logging without serializing the whole payload.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Read { .. } => "READ",
            Message::Write { .. } => "WRITE",
            Message::Prepare { .. } => "PREPARE",
            Message::Promise { .. } => "PROMISE",
            Message::PrepareNack { .. } => "PREPARE_NACK",
            Message::AcceptRequest { .. } => "ACCEPT_REQUEST",
            Message::Accepted { .. } => "ACCEPTED",
            Message::AcceptNack { .. } => "ACCEPT_NACK",
            Message::WriteNack { .. } => "WRITE_NACK",
            Message::Heartbeat { .. } => "HEARTBEAT",
            Message::Error { .. } => "ERROR",
        }
    }

    /// Builds a synthetic `ERROR` message carrying the given reason, used
    /// whenever a send or decode fails so the caller sees one uniform
    /// return type.
    pub fn error(reason: impl Into<String>) -> Self {
        Message::Error { reason: reason.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode, encode};

    fn sample_messages() -> Vec<Message> {
        vec![
            Message::Read { key: "a".into() },
            Message::Write { key: "a".into(), value: "1".into() },
            Message::Prepare {
                sender_id: 2,
                prop_num: ProposalNumber::new(1, 2),
                key: "a".into(),
            },
            Message::Promise { sender_id: 2, prop_num: ProposalNumber::new(1, 2) },
            Message::PrepareNack {
                sender_id: 0,
                prop_num: ProposalNumber::new(1, 0),
                leader_id: Some(2),
                last_heartbeat: 1234,
            },
            Message::AcceptRequest {
                sender_id: 2,
                prop_num: ProposalNumber::new(1, 2),
                key: "a".into(),
                value: "1".into(),
            },
            Message::Accepted {
                sender_id: 0,
                prop_num: ProposalNumber::new(1, 2),
                leader_id: Some(2),
                key: "a".into(),
                value: "1".into(),
            },
            Message::AcceptNack {
                sender_id: 0,
                prop_num: ProposalNumber::new(1, 2),
                leader_id: Some(3),
                leader_prop_num: ProposalNumber::new(2, 3),
            },
            Message::WriteNack { key: "a".into(), value: "1".into() },
            Message::Heartbeat { sender_id: 2, heartbeat: 555 },
            Message::Error { reason: "boom".into() },
        ]
    }

    #[test]
    fn round_trips_every_variant() {
        for m in sample_messages() {
            let bytes = encode(&m).expect("encode");
            let decoded = decode(&bytes).expect("decode");
            assert_eq!(m, decoded);
        }
    }

    #[test]
    fn message_type_tag_is_screaming_snake_case() {
        let bytes = encode(&Message::PrepareNack {
            sender_id: 0,
            prop_num: ProposalNumber::LOWEST,
            leader_id: None,
            last_heartbeat: 0,
        })
        .unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("\"message_type\":\"PREPARE_NACK\""));
    }

    #[test]
    fn unknown_fields_are_ignored_on_decode() {
        let text = r#"{"message_type":"READ","key":"a","unexpected":42}"#;
        let decoded = decode(text.as_bytes()).expect("decode");
        assert_eq!(decoded, Message::Read { key: "a".into() });
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn short_string() -> impl Strategy<Value = String> {
            "[a-zA-Z0-9]{0,16}"
        }

        fn prop_num() -> impl Strategy<Value = ProposalNumber> {
            (any::<i64>(), any::<i64>()).prop_map(|(round_no, node_id)| ProposalNumber::new(round_no, node_id))
        }

        fn arb_message() -> impl Strategy<Value = Message> {
            prop_oneof![
                short_string().prop_map(|key| Message::Read { key }),
                (short_string(), short_string()).prop_map(|(key, value)| Message::Write { key, value }),
                (any::<i64>(), prop_num(), short_string())
                    .prop_map(|(sender_id, prop_num, key)| Message::Prepare { sender_id, prop_num, key }),
                (any::<i64>(), prop_num()).prop_map(|(sender_id, prop_num)| Message::Promise { sender_id, prop_num }),
                (any::<i64>(), prop_num(), proptest::option::of(any::<i64>()), any::<i64>()).prop_map(
                    |(sender_id, prop_num, leader_id, last_heartbeat)| Message::PrepareNack {
                        sender_id,
                        prop_num,
                        leader_id,
                        last_heartbeat
                    }
                ),
                (any::<i64>(), prop_num(), short_string(), short_string()).prop_map(
                    |(sender_id, prop_num, key, value)| Message::AcceptRequest { sender_id, prop_num, key, value }
                ),
                (any::<i64>(), prop_num(), proptest::option::of(any::<i64>()), short_string(), short_string()).prop_map(
                    |(sender_id, prop_num, leader_id, key, value)| Message::Accepted {
                        sender_id,
                        prop_num,
                        leader_id,
                        key,
                        value
                    }
                ),
                (any::<i64>(), prop_num(), proptest::option::of(any::<i64>()), prop_num()).prop_map(
                    |(sender_id, prop_num, leader_id, leader_prop_num)| Message::AcceptNack {
                        sender_id,
                        prop_num,
                        leader_id,
                        leader_prop_num
                    }
                ),
                (short_string(), short_string()).prop_map(|(key, value)| Message::WriteNack { key, value }),
                (any::<i64>(), any::<i64>()).prop_map(|(sender_id, heartbeat)| Message::Heartbeat { sender_id, heartbeat }),
                short_string().prop_map(|reason| Message::Error { reason }),
            ]
        }

        proptest! {
            /// `decode(encode(m)) == m` for every well-formed message.
            #[test]
            fn round_trip_holds_for_arbitrary_messages(m in arb_message()) {
                let bytes = encode(&m).expect("well-formed messages stay under the byte cap");
                let decoded = decode(&bytes).expect("encode's own output always decodes");
                prop_assert_eq!(decoded, m);
            }
        }
    }
}
