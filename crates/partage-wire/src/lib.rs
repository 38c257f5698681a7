//! Partage wire protocol
//!
//! Every datagram carries one [`Packet`]: an envelope [`Header`] plus a single
//! [`Message`]. Messages are a closed tagged enum; consensus traffic is
//! multiplexed by topic inside [`Message::Consensus`], and applications can
//! ship opaque payloads through [`Message::Custom`].

pub mod header;
pub mod message;
pub mod packet;
pub mod paxos;

pub use header::*;
pub use message::*;
pub use packet::*;
pub use paxos::*;
