//! Message kinds

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use partage_core::{NodeAddr, PacketId};

use crate::ConsensusMessage;

/// Origin to highest contiguous sequence number
pub type StatusMap = BTreeMap<NodeAddr, u64>;

/// A broadcast message tagged with its origin and per-origin sequence
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rumor {
    pub origin: NodeAddr,
    /// Starts at 1 and increases by one per broadcast of `origin`
    pub sequence: u64,
    pub msg: Message,
}

#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RumorsMessage {
    pub rumors: Vec<Rumor>,
}

#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusMessage(pub StatusMap);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckMessage {
    pub acked_packet_id: PacketId,
    pub status: StatusMessage,
}

/// Opaque application payload
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomMessage {
    pub kind: String,
    pub payload: Vec<u8>,
}

/// Every message a packet can carry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body")]
pub enum Message {
    Rumors(RumorsMessage),
    Status(StatusMessage),
    Ack(AckMessage),
    /// Heartbeat
    Empty,
    Consensus(ConsensusMessage),
    Custom(CustomMessage),
}

/// Discriminant used as the dispatch key for handlers
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum MessageKind {
    Rumors,
    Status,
    Ack,
    Empty,
    Consensus,
    Custom(String),
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Rumors => f.write_str("rumors"),
            MessageKind::Status => f.write_str("status"),
            MessageKind::Ack => f.write_str("ack"),
            MessageKind::Empty => f.write_str("empty"),
            MessageKind::Consensus => f.write_str("consensus"),
            MessageKind::Custom(kind) => write!(f, "custom:{}", kind),
        }
    }
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Rumors(_) => MessageKind::Rumors,
            Message::Status(_) => MessageKind::Status,
            Message::Ack(_) => MessageKind::Ack,
            Message::Empty => MessageKind::Empty,
            Message::Consensus(_) => MessageKind::Consensus,
            Message::Custom(custom) => MessageKind::Custom(custom.kind.clone()),
        }
    }

    pub fn custom(kind: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Message::Custom(CustomMessage {
            kind: kind.into(),
            payload: payload.into(),
        })
    }
}

impl From<ConsensusMessage> for Message {
    fn from(msg: ConsensusMessage) -> Self {
        Message::Consensus(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PaxosMessage;

    #[test]
    fn test_kinds() {
        assert_eq!(Message::Empty.kind(), MessageKind::Empty);
        assert_eq!(
            Message::custom("chat", b"hi".to_vec()).kind(),
            MessageKind::Custom("chat".into())
        );
        assert_eq!(MessageKind::Custom("chat".into()).to_string(), "custom:chat");
    }

    #[test]
    fn test_status_serializes_as_map() {
        let mut status = StatusMap::new();
        status.insert(NodeAddr::from("a"), 3);
        let json = serde_json::to_string(&Message::Status(StatusMessage(status))).unwrap();
        assert_eq!(json, r#"{"kind":"Status","body":{"a":3}}"#);
    }

    #[test]
    fn test_rumor_embeds_consensus_message() {
        let inner = ConsensusMessage::new(
            "t",
            PaxosMessage::Prepare {
                step: 0,
                id: 1,
                source: NodeAddr::from("a"),
            },
        );
        let rumor = Rumor {
            origin: NodeAddr::from("a"),
            sequence: 1,
            msg: inner.into(),
        };
        let json = serde_json::to_vec(&Message::Rumors(RumorsMessage { rumors: vec![rumor.clone()] })).unwrap();
        match serde_json::from_slice::<Message>(&json).unwrap() {
            Message::Rumors(m) => assert_eq!(m.rumors, vec![rumor]),
            other => panic!("unexpected {:?}", other),
        }
    }
}
